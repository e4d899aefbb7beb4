//! Rules deciding which conversational messages become durable facts.
//!
//! ```text
//! message ─▶ exclusions ─▶ triggers ─▶ rate limit ─▶ duplicate check ─▶ write
//!               │             │            │               │
//!               ▼             ▼            ▼               ▼
//!            Excluded     NoTrigger    RateLimited      Duplicate
//! ```
//!
//! This module holds the pure parts: exclusion and trigger patterns
//! (English and Czech), category inference, and the sliding-window
//! [`RateLimiter`]. The engine wires them to the embedder and vector store.

use std::collections::{HashMap, VecDeque};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::models::CaptureCategory;
use crate::recall::RECALL_MARKER;

/// Messages shorter than this are never captured.
pub const MIN_CAPTURE_CHARS: usize = 15;
/// Messages longer than this are never captured.
pub const MAX_CAPTURE_CHARS: usize = 500;
/// Messages with more emoji than this are never captured.
pub const MAX_EMOJI: usize = 3;

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid capture regex")
}

static EXCLUSIONS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        // Tool calls and XML-ish markup.
        re(r"</?[A-Za-z_][\w:-]*(?:\s[^<>]*)?/?>"),
        re(r"```"),
        re(r"(?m)^\s*(?:[-*+]|\d+[.)])\s+\S"),
        re(r"[?？]\s*$"),
        re(r"(?i)\b(?:i'll remember|i will remember|i've (?:saved|stored|noted|remembered)|saved to memory|stored (?:in|to) memory|noted(?: that)?[.!]|got it[.!,]|understood[.!]|zapamatováno|uloženo)"),
    ]
});

static TRIGGERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        // Explicit save requests.
        re(r"(?i)\b(?:remember|don't forget|do not forget|keep in mind|note that)\b|zapamatuj si|pamatuj|nezapomeň"),
        // Preferences.
        re(r"(?i)\bi (?:really )?(?:like|prefer|hate|love|want|need|dislike|enjoy)\b|\bprefer\b|preferuji|radši|nechci|mám rád|nemám rád"),
        // Decisions.
        re(r"(?i)\b(?:we decided|i decided|decided to|we will use|we'll use|let's use|going with|we chose)\b|rozhodli jsme|rozhodl jsem|budeme používat"),
        // Phone numbers.
        re(r"\+\d{10,}|\b\d{3}[-. ]\d{3}[-. ]\d{3,4}\b"),
        // Emails.
        re(r"[\w.+-]+@[\w-]+\.[\w.-]+"),
        // Identity.
        re(r"(?i)\bmy name is\b|\bcall me\b|\bi am called\b|jmenuji se|říkej mi"),
        // Possessive facts.
        re(r"(?i)\bmy\s+\w+\s+is\b|\bis\s+my\b|\bmůj\s+\w+\s+je\b|\bmoje\s+\w+\s+je\b|\bje\s+můj\b"),
        // Importance qualifiers.
        re(r"(?i)\b(?:always|never|important)\b|\bvždy\b|\bnikdy\b|důležit"),
        // Timezone and location.
        re(r"(?i)\bi live in\b|\bi'm based in\b|\bi am based in\b|\bmy time ?zone\b|\btime ?zone is\b|\bi'm in [A-Za-z/_]+ time\b|bydlím v|žiju v"),
    ]
});

static PREFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\bprefer|\b(?:like|love|hate|dislike|enjoy|want)\b|preferuji|radši|mám rád|nechci")
});
static PROJECT: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\bdecided\b|\bwe will use\b|\bwe'll use\b|\blet's use\b|\bgoing with\b|\bproject\b|\bdeadline\b|\brepo(?:sitory)?\b|rozhodli|budeme používat|projekt")
});
static PERSONAL: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\bmy name\b|\bcall me\b|\bi am\b|\bi'm\b|\bmy\s+\w+\s+is\b|\bis\s+my\b|@|\+\d{10,}|\bi live\b|\btime ?zone\b|jmenuji|můj|moje|bydlím")
});

/// Whether `text` is barred from capture regardless of content.
pub fn is_excluded(text: &str) -> bool {
    let len = text.chars().count();
    if !(MIN_CAPTURE_CHARS..=MAX_CAPTURE_CHARS).contains(&len) {
        return true;
    }
    if text.contains(RECALL_MARKER) {
        return true;
    }
    if count_emoji(text) > MAX_EMOJI {
        return true;
    }
    EXCLUSIONS.iter().any(|re| re.is_match(text.trim()))
}

/// Whether `text` contains something worth remembering.
pub fn has_trigger(text: &str) -> bool {
    TRIGGERS.iter().any(|re| re.is_match(text))
}

/// Exclusions first, then triggers.
pub fn should_capture(text: &str) -> bool {
    !is_excluded(text) && has_trigger(text)
}

/// Classify a message: preference, then project or decision, then personal
/// or identity, else other.
pub fn detect_category(text: &str) -> CaptureCategory {
    if PREFERENCE.is_match(text) {
        CaptureCategory::Preference
    } else if PROJECT.is_match(text) {
        CaptureCategory::Project
    } else if PERSONAL.is_match(text) {
        CaptureCategory::Personal
    } else {
        CaptureCategory::Other
    }
}

fn count_emoji(text: &str) -> usize {
    text.chars()
        .filter(|c| {
            matches!(*c as u32,
                0x1F300..=0x1F5FF
                | 0x1F600..=0x1F64F
                | 0x1F680..=0x1F6FF
                | 0x1F900..=0x1FAFF
                | 0x2600..=0x27BF
                | 0x1F1E6..=0x1F1FF)
        })
        .count()
}

/// Per-session sliding-window limiter.
///
/// [`RateLimiter::try_acquire`] records the attempt before returning `true`,
/// so concurrent callers cannot overshoot the limit.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max: usize,
    windows: HashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max: usize) -> Self {
        Self {
            window,
            max,
            windows: HashMap::new(),
        }
    }

    /// Reserve a slot for `key` at `now`. Returns `false` when the window
    /// is full.
    pub fn try_acquire(&mut self, key: &str, now: Instant) -> bool {
        let entries = self.windows.entry(key.to_string()).or_default();
        while let Some(oldest) = entries.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                entries.pop_front();
            } else {
                break;
            }
        }
        if entries.len() >= self.max {
            return false;
        }
        entries.push_back(now);
        true
    }

    /// Drop sessions whose windows have fully expired.
    pub fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.windows.retain(|_, entries| {
            entries
                .back()
                .is_some_and(|last| now.saturating_duration_since(*last) < window)
        });
    }

    pub fn sessions(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_and_long_rejected() {
        assert!(!should_capture("ok"));
        let long = format!("Remember {}", "a".repeat(492));
        assert_eq!(long.chars().count(), 501);
        assert!(!should_capture(&long));
    }

    #[test]
    fn test_email_request_captured() {
        assert!(should_capture("Remember my email is a@b.com"));
    }

    #[test]
    fn test_code_fence_excluded() {
        assert!(!should_capture("Remember this:\n```\nlet x = 1;\n```"));
    }

    #[test]
    fn test_other_exclusions() {
        assert!(!should_capture("Do you remember my email address?"));
        assert!(!should_capture("- remember to buy milk tomorrow"));
        assert!(!should_capture("<tool_call>remember my name is Ada</tool_call>"));
        assert!(!should_capture("Got it, I'll remember that you prefer tea."));
        assert!(!should_capture("<relevant-memories> I always prefer tea"));
        assert!(!should_capture("I love this 😀😀😀😀 so much, always"));
    }

    #[test]
    fn test_triggers() {
        assert!(should_capture("I prefer dark roast coffee in the morning"));
        assert!(should_capture("We decided to use Postgres for the backend"));
        assert!(should_capture("My name is Ada Lovelace, nice to meet you"));
        assert!(should_capture("Call me at +420123456789 after five"));
        assert!(should_capture("I live in Prague and work remotely"));
        assert!(should_capture("Zapamatuj si, že mám rád čaj."));
        assert!(!should_capture("The weather is nice today outside."));
    }

    #[test]
    fn test_three_emoji_allowed() {
        assert!(should_capture("I love hiking 🏔️🌲🌞 in the mountains"));
    }

    #[test]
    fn test_detect_category() {
        assert_eq!(detect_category("I prefer tabs over spaces"), CaptureCategory::Preference);
        assert_eq!(detect_category("We decided to ship on Friday"), CaptureCategory::Project);
        assert_eq!(detect_category("My name is Ada"), CaptureCategory::Personal);
        assert_eq!(detect_category("Always run the tests twice"), CaptureCategory::Other);
        // Preference outranks identity.
        assert_eq!(detect_category("My name is Ada and I love tea"), CaptureCategory::Preference);
    }

    #[test]
    fn test_rate_limiter_window() {
        let mut rl = RateLimiter::new(Duration::from_millis(1000), 1);
        let t0 = Instant::now();
        assert!(rl.try_acquire("s1", t0));
        assert!(!rl.try_acquire("s1", t0 + Duration::from_millis(500)));
        assert!(rl.try_acquire("s2", t0 + Duration::from_millis(500)));
        assert!(rl.try_acquire("s1", t0 + Duration::from_millis(1000)));
    }

    #[test]
    fn test_rate_limiter_prune() {
        let mut rl = RateLimiter::new(Duration::from_secs(1), 2);
        let t0 = Instant::now();
        rl.try_acquire("a", t0);
        rl.try_acquire("b", t0 + Duration::from_millis(900));
        rl.prune(t0 + Duration::from_millis(1500));
        assert_eq!(rl.sessions(), 1);
    }
}
