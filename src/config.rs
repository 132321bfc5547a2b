//! Engine configuration
//!
//! An optional YAML file that tunes how rules and blocks are run:
//!
//! ```yaml
//! version: 1
//! strict_reads: false
//! allowed_targets: [character.personality, character.scenario]
//! target_aliases:
//!   notes: character.memory.notes
//! allowlists:
//!   food: [lastUser.norm, history.norm]
//! lists:
//!   sweets: [cake, "ice cream"]
//! history_window: 10
//! seed: 42
//! ```

use crate::chain::{ChainInput, DEFAULT_WINDOW};
use crate::error::{Error, Result};
use crate::runtime::{default_target_aliases, ProgressiveOptions, DEFAULT_ALLOWED_TARGETS};
use crate::source::SourceRegistry;
use rand::rngs::StdRng;
use rand::SeedableRng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Current config schema version
pub const CONFIG_VERSION: u32 = 1;

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_allowed_targets() -> Vec<String> {
    DEFAULT_ALLOWED_TARGETS.iter().map(|s| s.to_string()).collect()
}

fn default_window() -> usize {
    DEFAULT_WINDOW
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[schemars(title = "Engine config")]
pub struct EngineConfig {
    /// Schema version for migrations
    #[serde(default = "default_version")]
    pub version: u32,

    /// Source failures abort the rule instead of reading as missing
    #[serde(default)]
    pub strict_reads: bool,

    /// Dot-paths the progressive runtime may write to
    #[serde(default = "default_allowed_targets")]
    pub allowed_targets: Vec<String>,

    /// Extra `targetId` aliases, merged over the built-in ones
    #[serde(default)]
    pub target_aliases: BTreeMap<String, String>,

    /// Per-module source allowlists
    #[serde(default)]
    pub allowlists: BTreeMap<String, Vec<String>>,

    /// Keyword lists for the chain runner, merged under a block set's own lists
    #[serde(default)]
    pub lists: BTreeMap<String, Vec<String>>,

    /// Default history window for list conditions
    #[serde(default = "default_window")]
    pub history_window: usize,

    /// Seed for `randomChance` and `appendRandomFromList`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            strict_reads: false,
            allowed_targets: default_allowed_targets(),
            target_aliases: BTreeMap::new(),
            allowlists: BTreeMap::new(),
            lists: BTreeMap::new(),
            history_window: DEFAULT_WINDOW,
            seed: None,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_norway::from_str(yaml).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_norway::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Default sources with this config's module allowlists applied
    pub fn registry(&self) -> SourceRegistry {
        let mut registry = SourceRegistry::with_defaults();
        for (module, ids) in &self.allowlists {
            registry.set_allowlist(module.clone(), ids.iter().cloned());
        }
        registry
    }

    /// All `targetId` aliases, built-ins first
    pub fn aliases(&self) -> BTreeMap<String, String> {
        let mut aliases = default_target_aliases();
        aliases.extend(self.target_aliases.clone());
        aliases
    }

    pub fn progressive_options(&self) -> ProgressiveOptions {
        let mut options =
            ProgressiveOptions::new(self.allowed_targets.iter().cloned()).strict(self.strict_reads);
        options.target_aliases = self.aliases();
        options
    }

    /// Chain input with this config's lists under `lists`
    pub fn chain_input(&self, lists: &BTreeMap<String, Vec<String>>) -> ChainInput {
        let mut merged = self.lists.clone();
        merged.extend(lists.clone());
        ChainInput::new(merged).with_window(self.history_window)
    }

    /// Seeded RNG when `seed` (or the override) is set, entropy otherwise
    pub fn rng(&self, seed_override: Option<u64>) -> StdRng {
        match seed_override.or(self.seed) {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config = EngineConfig::from_yaml("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.allowed_targets.len(), 3);
    }

    #[test]
    fn test_load_and_apply() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ruleforge.yaml");
        std::fs::write(
            &path,
            r#"
strict_reads: true
allowed_targets: [character.personality]
target_aliases:
  notes: character.memory.notes
allowlists:
  food: [lastUser.norm]
lists:
  sweets: [cake]
history_window: 4
seed: 9
"#,
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        let registry = config.registry();
        assert!(registry.is_allowed("food", "lastUser.norm"));
        assert!(!registry.is_allowed("food", "history.norm"));
        assert!(registry.is_allowed("core", "history.norm"));

        let options = config.progressive_options();
        assert!(options.strict);
        assert!(options.is_allowed("character.personality"));
        assert!(!options.is_allowed("character.scenario"));
        assert_eq!(options.target_aliases["notes"], "character.memory.notes");
        assert_eq!(options.target_aliases["scenario"], "character.scenario");

        let input = config.chain_input(&BTreeMap::from([(
            "salty".to_string(),
            vec!["chips".to_string()],
        )]));
        assert_eq!(input.window, 4);
        assert_eq!(input.lists.len(), 2);
    }

    #[test]
    fn test_seeded_rng_is_reproducible() {
        use rand::Rng;
        let config = EngineConfig {
            seed: Some(3),
            ..Default::default()
        };
        let a: u32 = config.rng(None).gen();
        let b: u32 = config.rng(None).gen();
        assert_eq!(a, b);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(EngineConfig::load(&dir.path().join("nope.yaml")).is_err());
    }
}
