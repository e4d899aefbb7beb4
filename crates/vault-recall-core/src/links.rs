//! Wikilink graph over logical file paths.
//!
//! Tracks outgoing `[[links]]` and incoming backlinks for every file that
//! either links somewhere or is linked to. A target that is linked but has
//! no file of its own appears as a "ghost" node: it has backlinks and no
//! links.
//!
//! # Invariant
//!
//! For every node `A` and every `b` in `A.links`, the node for `b` lists
//! `A` in its backlinks, and vice versa. Every mutation restores this
//! before returning.
//!
//! Link targets are stored as written in the note (alias and `#anchor`
//! removed), not resolved against vault paths, so the graph does not
//! depend on the order files are indexed in. Resolution happens on read:
//! a file node absorbs the backlinks of every ghost whose target names it
//! (`[[b]]` and `[[notes/b]]` both name `vault/notes/b.md`), and its own
//! links point at file nodes where one exists. [`LinkGraph::related`] and
//! [`LinkGraph::orphans`] both see the resolved view.
//!
//! # Persistence
//!
//! The graph serializes as a flat JSON map `{ file: { links, backlinks } }`.
//! [`LinkGraph::save`] skips the write when nothing changed since the last
//! load or save.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

static FENCED_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?(?:```|\z)|~~~.*?(?:~~~|\z)").expect("valid fence regex"));
static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`[^`\n]*`").expect("valid inline code regex"));
static WIKILINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\[\]\n]+?)\]\]").expect("valid wikilink regex"));

/// A file's place in the graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub backlinks: Vec<String>,
}

/// Neighbors returned by [`LinkGraph::related`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Related {
    /// The node key that matched the lookup.
    pub file: String,
    pub links: Vec<String>,
    pub backlinks: Vec<String>,
}

impl Related {
    /// Links followed by backlinks, deduplicated, at most `limit` entries.
    pub fn neighbors(&self, limit: usize) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for f in self.links.iter().chain(self.backlinks.iter()) {
            if out.len() >= limit {
                break;
            }
            if f != &self.file && !out.contains(f) {
                out.push(f.clone());
            }
        }
        out
    }
}

/// Bidirectional wikilink graph.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkGraph {
    nodes: BTreeMap<String, GraphNode>,
    #[serde(skip)]
    dirty: bool,
}

/// Extract `[[target]]` / `[[target|alias]]` targets from Markdown text.
///
/// Fenced and inline code is stripped first. Links preceded by a
/// backslash are ignored. Duplicates are kept.
pub fn extract_links(text: &str) -> Vec<String> {
    let without_fences = FENCED_CODE.replace_all(text, "");
    let cleaned = INLINE_CODE.replace_all(&without_fences, "");

    let mut links = Vec::new();
    for cap in WIKILINK.captures_iter(&cleaned) {
        let Some(whole) = cap.get(0) else {
            continue;
        };
        if cleaned[..whole.start()].ends_with('\\') {
            continue;
        }
        let target = normalize_target(&cap[1]);
        if !target.is_empty() {
            links.push(target);
        }
    }
    links
}

/// Whether link target `target` names the file at logical path `file`:
/// equal once `.md` is dropped, or a trailing path suffix of it. Case is
/// ignored.
fn names_file(target: &str, file: &str) -> bool {
    let target = target.strip_suffix(".md").unwrap_or(target).to_lowercase();
    if target.is_empty() {
        return false;
    }
    let file = file.strip_suffix(".md").unwrap_or(file).to_lowercase();
    file == target || file.ends_with(&format!("/{}", target))
}

/// Strip alias and heading anchor from a raw link body.
fn normalize_target(raw: &str) -> String {
    let target = raw.split('|').next().unwrap_or(raw);
    let target = target.split('#').next().unwrap_or(target);
    target.trim().to_string()
}

impl LinkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `path`. A missing file yields an empty graph.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read link graph: {}", path.display()))?;
        let graph: LinkGraph = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse link graph: {}", path.display()))?;
        Ok(graph)
    }

    /// Write to `path` if dirty. Returns whether a write happened.
    pub fn save(&mut self, path: &Path) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write link graph: {}", path.display()))?;
        self.dirty = false;
        Ok(true)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, file: &str) -> Option<&GraphNode> {
        self.nodes.get(file)
    }

    pub fn files(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    /// Recompute `file`'s links from `text` and repair backlinks.
    /// Returns the deduplicated link set now recorded for `file`.
    pub fn update_file(&mut self, file: &str, text: &str) -> Vec<String> {
        let mut new_links: Vec<String> = Vec::new();
        for link in extract_links(text) {
            if !new_links.contains(&link) {
                new_links.push(link);
            }
        }

        let old_links = self
            .nodes
            .get(file)
            .map(|n| n.links.clone())
            .unwrap_or_default();
        if old_links == new_links {
            return new_links;
        }

        for target in old_links.iter().filter(|t| !new_links.contains(t)) {
            self.drop_backlink(target, file);
        }
        for target in new_links.iter().filter(|t| !old_links.contains(t)) {
            let node = self.nodes.entry(target.clone()).or_default();
            if !node.backlinks.iter().any(|b| b == file) {
                node.backlinks.push(file.to_string());
            }
        }

        let node = self.nodes.entry(file.to_string()).or_default();
        node.links = new_links.clone();
        self.prune(file);
        self.dirty = true;
        new_links
    }

    /// Remove `file`'s outgoing links. The node survives as a ghost while
    /// other files still link to it.
    pub fn remove_file(&mut self, file: &str) {
        let Some(node) = self.nodes.get_mut(file) else {
            return;
        };
        let links = std::mem::take(&mut node.links);
        for target in &links {
            self.drop_backlink(target, file);
        }
        self.prune(file);
        self.dirty = true;
    }

    /// Neighbors of `file`: exact key, then the key without `.md`, then the
    /// first node whose basename matches. First match wins.
    pub fn related(&self, file: &str) -> Option<Related> {
        let key = self.resolve(file)?;
        let node = &self.nodes[key];

        let mut links: Vec<String> = Vec::new();
        for target in &node.links {
            let resolved = self.resolve_target(target).to_string();
            if !links.contains(&resolved) {
                links.push(resolved);
            }
        }
        Some(Related {
            file: key.clone(),
            links,
            backlinks: self.backlinks_of(key),
        })
    }

    /// Every node nobody links to, under any name.
    pub fn orphans(&self) -> Vec<String> {
        self.nodes
            .keys()
            .filter(|k| self.backlinks_of(k).is_empty())
            .cloned()
            .collect()
    }

    /// `key`'s own backlinks plus those of ghosts whose target names it.
    fn backlinks_of(&self, key: &str) -> Vec<String> {
        let mut out = self
            .nodes
            .get(key)
            .map(|n| n.backlinks.clone())
            .unwrap_or_default();
        for (alias, node) in &self.nodes {
            if alias == key || !node.links.is_empty() || !names_file(alias, key) {
                continue;
            }
            for source in &node.backlinks {
                if source != key && !out.contains(source) {
                    out.push(source.clone());
                }
            }
        }
        out
    }

    /// The file node a link target names, or the target itself.
    fn resolve_target<'a>(&'a self, target: &'a str) -> &'a str {
        self.nodes
            .iter()
            .find(|(key, node)| {
                key.as_str() != target && !node.links.is_empty() && names_file(target, key)
            })
            .map(|(key, _)| key.as_str())
            .unwrap_or(target)
    }

    fn resolve(&self, file: &str) -> Option<&String> {
        if let Some((key, _)) = self.nodes.get_key_value(file) {
            return Some(key);
        }

        let stem = file.strip_suffix(".md").unwrap_or(file);
        if let Some((key, _)) = self.nodes.get_key_value(stem) {
            return Some(key);
        }

        let base = stem.rsplit('/').next().unwrap_or(stem).to_lowercase();
        if base.is_empty() {
            return None;
        }
        self.nodes.keys().find(|key| {
            let key_stem = key.strip_suffix(".md").unwrap_or(key).to_lowercase();
            key_stem == base || key_stem.ends_with(&format!("/{}", base))
        })
    }

    fn drop_backlink(&mut self, target: &str, source: &str) {
        if let Some(node) = self.nodes.get_mut(target) {
            node.backlinks.retain(|b| b != source);
        }
        self.prune(target);
    }

    /// Delete a node that has neither links nor backlinks.
    fn prune(&mut self, key: &str) {
        let empty = self
            .nodes
            .get(key)
            .is_some_and(|n| n.links.is_empty() && n.backlinks.is_empty());
        if empty {
            self.nodes.remove(key);
        }
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        for (a, node) in &self.nodes {
            for b in &node.links {
                let target = self.nodes.get(b).expect("link target has a node");
                assert!(target.backlinks.contains(a), "{} -> {} missing backlink", a, b);
            }
            for b in &node.backlinks {
                let source = self.nodes.get(b).expect("backlink source has a node");
                assert!(source.links.contains(a), "{} <- {} missing link", a, b);
            }
            assert!(!node.links.is_empty() || !node.backlinks.is_empty());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_extract_links_basic() {
        let text = "See [[Alpha]] and [[Beta|the beta note]] or [[Gamma#Intro]].";
        assert_eq!(extract_links(text), vec!["Alpha", "Beta", "Gamma"]);
    }

    #[test]
    fn test_extract_links_skips_code_and_escapes() {
        let text = "Real [[One]]\n```\n[[InFence]]\n```\nand `[[Inline]]` plus \\[[Escaped]] then [[Two]][[Three]]";
        assert_eq!(extract_links(text), vec!["One", "Two", "Three"]);
    }

    #[test]
    fn test_extract_links_keeps_duplicates() {
        assert_eq!(extract_links("[[a]] [[a]]"), vec!["a", "a"]);
    }

    #[test]
    fn test_update_creates_backlinks_and_ghosts() {
        let mut g = LinkGraph::new();
        let links = g.update_file("vault/a.md", "[[b]] [[c]] [[b]]");
        assert_eq!(links, vec!["b", "c"]);
        assert_eq!(g.node("b").unwrap().backlinks, vec!["vault/a.md"]);
        assert_eq!(g.node("c").unwrap().backlinks, vec!["vault/a.md"]);
        assert!(g.is_dirty());
        g.assert_consistent();
    }

    #[test]
    fn test_update_diffs_links() {
        let mut g = LinkGraph::new();
        g.update_file("vault/a.md", "[[b]] [[c]]");
        g.update_file("vault/a.md", "[[c]] [[d]]");
        assert!(g.node("b").is_none(), "ghost without backlinks is dropped");
        assert_eq!(g.node("d").unwrap().backlinks, vec!["vault/a.md"]);
        g.assert_consistent();
    }

    #[test]
    fn test_remove_file_demotes_to_ghost() {
        let mut g = LinkGraph::new();
        g.update_file("a", "[[b]]");
        g.update_file("b", "[[c]]");
        g.remove_file("b");

        let b = g.node("b").expect("b is still linked from a");
        assert!(b.links.is_empty());
        assert_eq!(b.backlinks, vec!["a"]);
        assert!(g.node("c").is_none());
        g.assert_consistent();

        g.remove_file("a");
        assert!(g.is_empty());
    }

    #[test]
    fn test_self_link() {
        let mut g = LinkGraph::new();
        g.update_file("a", "[[a]] [[b]]");
        g.assert_consistent();
        g.remove_file("a");
        g.assert_consistent();
        assert!(g.is_empty());
    }

    #[test]
    fn test_invariant_after_mixed_sequence() {
        let mut g = LinkGraph::new();
        let files = ["a", "b", "c", "d"];
        let bodies = ["[[b]] [[c]]", "[[c]]", "[[a]] [[d]] [[x]]", "", "[[a]]"];
        for round in 0..6 {
            for (i, f) in files.iter().enumerate() {
                let body = bodies[(i + round) % bodies.len()];
                if (i + round) % 3 == 0 {
                    g.remove_file(f);
                } else {
                    g.update_file(f, body);
                }
                g.assert_consistent();
            }
        }
        for orphan in g.orphans() {
            assert!(g.node(&orphan).unwrap().backlinks.is_empty());
        }
    }

    #[test]
    fn test_related_fallbacks() {
        let mut g = LinkGraph::new();
        g.update_file("vault/notes/alpha.md", "[[beta]] [[gamma]]");
        g.update_file("vault/notes/beta.md", "[[alpha]]");

        let exact = g.related("vault/notes/alpha.md").unwrap();
        assert_eq!(exact.links, vec!["vault/notes/beta.md", "gamma"]);
        assert_eq!(exact.backlinks, vec!["vault/notes/beta.md"]);

        let by_basename = g.related("alpha").unwrap();
        assert_eq!(by_basename.file, "alpha");
        assert_eq!(by_basename.backlinks, vec!["vault/notes/beta.md"]);

        let fuzzy = g.related("other/gamma.md").unwrap();
        assert_eq!(fuzzy.file, "gamma");

        assert!(g.related("missing.md").is_none());
    }

    #[test]
    fn test_related_neighbors_limit() {
        let related = Related {
            file: "a".into(),
            links: vec!["b".into(), "c".into(), "a".into()],
            backlinks: vec!["b".into(), "d".into(), "e".into()],
        };
        assert_eq!(related.neighbors(3), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_orphans() {
        let mut g = LinkGraph::new();
        g.update_file("a", "[[b]]");
        g.update_file("c", "[[b]]");
        let mut orphans = g.orphans();
        orphans.sort();
        assert_eq!(orphans, vec!["a", "c"]);
    }

    #[test]
    fn test_linked_file_with_own_links_is_not_orphan() {
        let mut g = LinkGraph::new();
        g.update_file("vault/a.md", "see [[b]]");
        g.update_file("vault/b.md", "see [[c]]");
        g.assert_consistent();

        assert_eq!(g.orphans(), vec!["vault/a.md"]);

        let b = g.related("vault/b.md").unwrap();
        assert_eq!(b.links, vec!["c"]);
        assert_eq!(b.backlinks, vec!["vault/a.md"]);

        let a = g.related("vault/a.md").unwrap();
        assert_eq!(a.links, vec!["vault/b.md"]);
        assert_eq!(a.neighbors(5), vec!["vault/b.md"]);
    }

    #[test]
    fn test_path_style_targets_resolve() {
        let mut g = LinkGraph::new();
        g.update_file("vault/Projects/garden.md", "[[Topics/soil]]");
        g.update_file("vault/Topics/soil.md", "[[projects/garden.md]]");

        assert!(g.orphans().is_empty());
        assert_eq!(
            g.related("vault/Topics/soil.md").unwrap().backlinks,
            vec!["vault/Projects/garden.md"]
        );
        // A suffix must align with a path segment.
        assert!(!names_file("oil", "vault/Topics/soil.md"));
    }

    #[test]
    fn test_save_load_and_dirty_flag() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("graph.json");

        let mut g = LinkGraph::new();
        assert!(!g.save(&path).unwrap(), "clean graph is not written");
        assert!(!path.exists());

        g.update_file("a", "[[b]]");
        assert!(g.save(&path).unwrap());
        assert!(!g.save(&path).unwrap(), "second save is a no-op");

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["b"]["backlinks"][0], "a");

        let loaded = LinkGraph::load(&path).unwrap();
        assert!(!loaded.is_dirty());
        assert_eq!(loaded.node("a").unwrap().links, vec!["b"]);
        loaded.assert_consistent();
    }

    #[test]
    fn test_unchanged_update_keeps_clean() {
        let mut g = LinkGraph::new();
        g.update_file("a", "[[b]]");
        g.dirty = false;
        g.update_file("a", "text [[b]] again");
        assert!(!g.is_dirty());
    }
}
