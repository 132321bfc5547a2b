//! Block model - IF/ELSEIF/ELSE units for the chain runner
//!
//! A block set is an ordered list of blocks plus the named keyword lists
//! their conditions and actions refer to.
//!
//! ```yaml
//! lists:
//!   sweets: [cake, "ice cream"]
//! blocks:
//!   - id: b1
//!     type: if
//!     join: AND
//!     conditions:
//!       - nodeType: cond
//!         type: anyInList
//!         listId: sweets
//!     actions:
//!       - type: appendPersonality
//!         text: "Has a sweet tooth."
//! ```

use crate::error::{Error, Result};
use crate::reasons::CompareOp;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Position of a block in its chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    #[default]
    If,
    Elseif,
    Else,
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockType::If => write!(f, "if"),
            BlockType::Elseif => write!(f, "elseif"),
            BlockType::Else => write!(f, "else"),
        }
    }
}

/// How a list of conditions combines. Blocks write it upper-case and
/// groups lower-case; both spellings are accepted either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum Join {
    #[default]
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or,
}

/// Lower-case join used inside condition groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum GroupJoin {
    #[default]
    #[serde(rename = "and", alias = "AND")]
    And,
    #[serde(rename = "or", alias = "OR")]
    Or,
}

impl From<GroupJoin> for Join {
    fn from(join: GroupJoin) -> Self {
        match join {
            GroupJoin::And => Join::And,
            GroupJoin::Or => Join::Or,
        }
    }
}

impl Join {
    /// Combine child results. An empty list passes for both joins.
    pub fn combine(self, results: &[bool]) -> bool {
        if results.is_empty() {
            return true;
        }
        match self {
            Join::And => results.iter().all(|r| *r),
            Join::Or => results.iter().any(|r| *r),
        }
    }
}

impl std::fmt::Display for Join {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Join::And => write!(f, "AND"),
            Join::Or => write!(f, "OR"),
        }
    }
}

/// One IF/ELSEIF/ELSE unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type", default)]
    pub kind: BlockType,

    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub join: Join,

    #[serde(default)]
    pub conditions: Vec<ConditionNode>,

    #[serde(default)]
    pub actions: Vec<Action>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

impl Block {
    pub fn new(id: impl Into<String>, kind: BlockType) -> Self {
        Self {
            id: id.into(),
            kind,
            ..Default::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_join(mut self, join: Join) -> Self {
        self.join = join;
        self
    }

    pub fn with_condition(mut self, node: ConditionNode) -> Self {
        self.conditions.push(node);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Label, falling back to the id
    pub fn display_label(&self) -> &str {
        if self.label.is_empty() {
            &self.id
        } else {
            &self.label
        }
    }
}

/// Condition tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "nodeType", rename_all = "lowercase")]
pub enum ConditionNode {
    Cond(CondLeaf),
    Group(CondGroup),
}

impl ConditionNode {
    pub fn cond(condition: Condition) -> Self {
        ConditionNode::Cond(CondLeaf {
            not: false,
            condition,
        })
    }

    pub fn not_cond(condition: Condition) -> Self {
        ConditionNode::Cond(CondLeaf {
            not: true,
            condition,
        })
    }

    pub fn group(join: GroupJoin, not: bool, items: Vec<ConditionNode>) -> Self {
        ConditionNode::Group(CondGroup { join, not, items })
    }
}

/// A leaf condition with its negation flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CondLeaf {
    #[serde(default)]
    pub not: bool,

    #[serde(flatten)]
    pub condition: Condition,
}

/// Nested group; `not` applies after the children are combined
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CondGroup {
    #[serde(default)]
    pub join: GroupJoin,

    #[serde(default)]
    pub not: bool,

    #[serde(default)]
    pub items: Vec<ConditionNode>,
}

/// Leaf condition kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Condition {
    /// Passes with the given probability (0–100)
    RandomChance { percent: f64 },

    /// Compares the chat's public message count
    MessageCountComparison {
        #[serde(default)]
        op: CompareOp,
        value: f64,
    },

    /// Last message contains any term from the list
    #[serde(rename_all = "camelCase")]
    AnyInList { list_id: String },

    /// Last message contains no term from the list
    #[serde(rename_all = "camelCase")]
    NoneInList { list_id: String },

    /// Number of recent messages mentioning the list, compared to a value
    #[serde(rename_all = "camelCase")]
    CountInHistory {
        list_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        window: Option<usize>,
        #[serde(default)]
        op: CompareOp,
        value: f64,
    },

    /// Any recent message mentions the list
    #[serde(rename_all = "camelCase")]
    HistoryContainsList {
        list_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        window: Option<usize>,
    },

    DerivedNumberComparison {
        key: String,
        #[serde(default)]
        op: CompareOp,
        value: f64,
    },

    #[serde(rename_all = "camelCase")]
    MemoryNumberComparison {
        mem_key: String,
        #[serde(default)]
        op: CompareOp,
        value: f64,
    },

    #[serde(rename_all = "camelCase")]
    MemoryStringContains { mem_key: String, text: String },

    PersonalityContains { text: String },

    ScenarioContains { text: String },
}

impl Condition {
    pub fn type_name(&self) -> &'static str {
        match self {
            Condition::RandomChance { .. } => "randomChance",
            Condition::MessageCountComparison { .. } => "messageCountComparison",
            Condition::AnyInList { .. } => "anyInList",
            Condition::NoneInList { .. } => "noneInList",
            Condition::CountInHistory { .. } => "countInHistory",
            Condition::HistoryContainsList { .. } => "historyContainsList",
            Condition::DerivedNumberComparison { .. } => "derivedNumberComparison",
            Condition::MemoryNumberComparison { .. } => "memoryNumberComparison",
            Condition::MemoryStringContains { .. } => "memoryStringContains",
            Condition::PersonalityContains { .. } => "personalityContains",
            Condition::ScenarioContains { .. } => "scenarioContains",
        }
    }
}

/// Character field targeted by `appendRandomFromList`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TextTarget {
    #[default]
    Personality,
    Scenario,
    ExampleDialogs,
}

impl TextTarget {
    pub fn path(&self) -> &'static str {
        match self {
            TextTarget::Personality => "character.personality",
            TextTarget::Scenario => "character.scenario",
            TextTarget::ExampleDialogs => "character.example_dialogs",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum NumericMode {
    #[default]
    Set,
    Inc,
    Dec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum StringMode {
    #[default]
    Set,
    Append,
}

/// Action run when the owning block executes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    AppendPersonality {
        #[serde(default)]
        text: String,
    },
    AppendScenario {
        #[serde(default)]
        text: String,
    },
    AppendExampleDialogs {
        #[serde(default)]
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    AppendRandomFromList {
        list_id: String,
        #[serde(default)]
        target: TextTarget,
    },
    /// `value` wins; otherwise `text` is parsed as a number
    #[serde(rename_all = "camelCase")]
    MemoryNumeric {
        mem_key: String,
        #[serde(default)]
        mode: NumericMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    MemoryString {
        mem_key: String,
        #[serde(default)]
        mode: StringMode,
        #[serde(default)]
        text: String,
    },
}

impl Action {
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::AppendPersonality { .. } => "appendPersonality",
            Action::AppendScenario { .. } => "appendScenario",
            Action::AppendExampleDialogs { .. } => "appendExampleDialogs",
            Action::AppendRandomFromList { .. } => "appendRandomFromList",
            Action::MemoryNumeric { .. } => "memoryNumeric",
            Action::MemoryString { .. } => "memoryString",
        }
    }
}

/// Blocks plus the keyword lists they reference
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[schemars(title = "Block set", description = "IF/ELSEIF/ELSE blocks and keyword lists")]
pub struct BlockSet {
    #[serde(default)]
    pub blocks: Vec<Block>,

    #[serde(default)]
    pub lists: BTreeMap<String, Vec<String>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BlockSetFile {
    List(Vec<Block>),
    Wrapped(BlockSet),
}

impl From<BlockSetFile> for BlockSet {
    fn from(file: BlockSetFile) -> Self {
        match file {
            BlockSetFile::List(blocks) => BlockSet {
                blocks,
                lists: BTreeMap::new(),
            },
            BlockSetFile::Wrapped(set) => set,
        }
    }
}

impl BlockSet {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_norway::from_str::<BlockSetFile>(yaml)
            .map(Into::into)
            .map_err(|e| Error::BlockParse(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str::<BlockSetFile>(json)
            .map(Into::into)
            .map_err(|e| Error::BlockParse(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::BlockParse(e.to_string()))
    }

    /// Parse by file extension (`.json`, otherwise YAML)
    pub fn from_path_str(path: &str, content: &str) -> Result<Self> {
        if path.ends_with(".json") {
            Self::from_json(content)
        } else {
            Self::from_yaml(content)
        }
    }

    pub fn get_block(&self, id: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }
}
