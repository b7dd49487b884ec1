use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One stored history entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: TurnRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: TurnRole::Assistant, content: content.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub user: String,
    pub assistant: String,
}

/// Display projection of a history: consecutive entries paired two at a time.
///
/// Pairing is positional. A trailing unpaired entry (left behind by a blocked
/// turn) is dropped, and an unpaired entry earlier in the list shifts every
/// later pair by one.
pub fn pair_exchanges(turns: &[Turn]) -> Vec<Exchange> {
    turns
        .chunks_exact(2)
        .map(|pair| Exchange { user: pair[0].content.clone(), assistant: pair[1].content.clone() })
        .collect()
}
