//! Effect trees - mergeable text fragments addressed by dot-paths
//!
//! An effect tree maps path segments to subtrees; every node may carry a
//! list of strings. Writing to a path only ever appends, and merging two
//! trees concatenates lists at matching paths, so no fragment is lost.
//! Merges are pure: they build a new tree and leave both inputs intact.
//! Paths are taken as written; an empty path or an empty segment is an error.

use crate::error::{Error, Result};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;

/// Key used for a node's own values when it also has children
pub const VALUES_KEY: &str = "$values";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectTree {
    values: Vec<String>,
    children: BTreeMap<String, EffectTree>,
}

impl EffectTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from `(path, values)` pairs
    pub fn from_paths<I, P, V>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (P, V)>,
        P: AsRef<str>,
        V: IntoIterator<Item = String>,
    {
        let mut tree = Self::new();
        for (path, values) in entries {
            tree.set_effect_path(path.as_ref(), values)?;
        }
        Ok(tree)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.children.values().all(EffectTree::is_empty)
    }

    /// Append values at a dot-path, creating intermediate nodes
    pub fn set_effect_path<V>(&mut self, path: &str, values: V) -> Result<()>
    where
        V: IntoIterator<Item = String>,
    {
        let mut node = self;
        for segment in path_segments(path)? {
            node = node.children.entry(segment.to_string()).or_default();
        }
        node.values.extend(values);
        Ok(())
    }

    /// Values stored exactly at `path`
    pub fn get(&self, path: &str) -> Option<&[String]> {
        let mut node = self;
        for segment in path_segments(path).ok()? {
            node = node.children.get(segment)?;
        }
        Some(&node.values)
    }

    /// Pure merge: lists at matching paths are concatenated, `self` first
    pub fn merge(&self, other: &EffectTree) -> EffectTree {
        let mut values = self.values.clone();
        values.extend(other.values.iter().cloned());

        let mut children = self.children.clone();
        for (key, theirs) in &other.children {
            let merged = match children.get(key) {
                Some(ours) => ours.merge(theirs),
                None => theirs.clone(),
            };
            children.insert(key.clone(), merged);
        }
        EffectTree { values, children }
    }

    /// Every non-empty value list with its full dot-path, depth first
    pub fn leaves(&self) -> Vec<(String, Vec<String>)> {
        let mut out = Vec::new();
        self.collect_leaves("", &mut out);
        out
    }

    fn collect_leaves(&self, prefix: &str, out: &mut Vec<(String, Vec<String>)>) {
        if !self.values.is_empty() {
            out.push((prefix.to_string(), self.values.clone()));
        }
        for (key, child) in &self.children {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };
            child.collect_leaves(&path, out);
        }
    }
}

/// Split a dot-path into its segments
pub fn path_segments(path: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(Error::Write(format!("malformed path: {:?}", path)));
    }
    Ok(segments)
}

pub fn is_well_formed_path(path: &str) -> bool {
    path_segments(path).is_ok()
}

/// Merge two trees (free-function form of [`EffectTree::merge`])
pub fn merge(a: &EffectTree, b: &EffectTree) -> EffectTree {
    a.merge(b)
}

impl Serialize for EffectTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if self.children.is_empty() && !self.values.is_empty() {
            return self.values.serialize(serializer);
        }
        let extra = usize::from(!self.values.is_empty());
        let mut map = serializer.serialize_map(Some(self.children.len() + extra))?;
        if !self.values.is_empty() {
            map.serialize_entry(VALUES_KEY, &self.values)?;
        }
        for (key, child) in &self.children {
            map.serialize_entry(key, child)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tree(path: &str, values: &[&str]) -> EffectTree {
        EffectTree::from_paths([(path, values.iter().map(|s| s.to_string()))]).unwrap()
    }

    #[test]
    fn test_set_path_appends() {
        let mut t = EffectTree::new();
        t.set_effect_path("inject.pre", vec!["a".to_string()]).unwrap();
        t.set_effect_path("inject.pre", vec!["b".to_string()]).unwrap();
        assert_eq!(t.get("inject.pre"), Some(&["a".to_string(), "b".to_string()][..]));
        assert_eq!(t.get("inject.post"), None);
    }

    #[test]
    fn test_merge_concatenates_and_is_pure() {
        let a = tree("a", &["x"]);
        let b = tree("a", &["y"]);
        let merged = a.merge(&b);
        assert_eq!(merged.get("a"), Some(&["x".to_string(), "y".to_string()][..]));
        assert_eq!(a.get("a"), Some(&["x".to_string()][..]));
    }

    #[test]
    fn test_leaf_and_branch_coexist() {
        let merged = tree("inject", &["whole"]).merge(&tree("inject.pre", &["part"]));
        let json = serde_json::to_value(&merged).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"inject": {"$values": ["whole"], "pre": ["part"]}})
        );
        assert_eq!(
            merged.leaves(),
            vec![
                ("inject".to_string(), vec!["whole".to_string()]),
                ("inject.pre".to_string(), vec!["part".to_string()]),
            ]
        );
    }

    #[test]
    fn test_empty_tree() {
        assert!(EffectTree::new().is_empty());
        assert!(!tree("a", &["x"]).is_empty());
        assert_eq!(serde_json::to_string(&EffectTree::new()).unwrap(), "{}");
    }

    #[test]
    fn test_malformed_paths_rejected() {
        let mut t = EffectTree::new();
        for path in ["", "inject..pre", ".inject", "inject."] {
            assert!(t.set_effect_path(path, vec!["x".to_string()]).is_err(), "{:?}", path);
        }
        assert!(t.is_empty());
        assert!(EffectTree::from_paths([("", vec!["y".to_string()])]).is_err());
        assert_eq!(tree("inject.pre", &["x"]).get("inject..pre"), None);
        assert!(!is_well_formed_path("a..b"));
        assert!(is_well_formed_path("inject.pre"));
    }
}
