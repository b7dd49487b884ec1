use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanDirection {
    Input,
    Output,
}

impl ScanDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

impl fmt::Display for ScanDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanAction {
    Allow,
    Block,
}

impl ScanAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Block => "block",
        }
    }
}

/// Verdict of one content-safety scan. `category` is vendor-defined and only
/// ever forwarded to server-side logs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub action: ScanAction,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub details: Option<BTreeMap<String, Value>>,
}

impl ScanResult {
    pub fn allow() -> Self {
        Self { action: ScanAction::Allow, category: None, details: None }
    }

    pub fn block(category: impl Into<String>) -> Self {
        Self { action: ScanAction::Block, category: Some(category.into()), details: None }
    }

    pub fn is_blocked(&self) -> bool {
        self.action == ScanAction::Block
    }
}
