//! Records stored and returned by the unlock service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CompetitionMode;
use crate::registry::ItemKind;

/// Authenticated caller, as supplied by the session layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: i64,
    pub team_id: Option<i64>,
    /// The spending account: the user in users mode, the team in teams mode
    pub account_id: i64,
}

impl Principal {
    /// Derive the account from the competition mode. A teamless user cannot
    /// spend in teams mode.
    pub fn for_mode(mode: CompetitionMode, user_id: i64, team_id: Option<i64>) -> Option<Self> {
        let account_id = match mode {
            CompetitionMode::Users => user_id,
            CompetitionMode::Teams => team_id?,
        };
        Some(Self {
            user_id,
            team_id,
            account_id,
        })
    }
}

/// Body of an unlock request. Fields are optional so that a malformed body
/// is reported per field instead of as a parse failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnlockRequest {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub target: Option<i64>,
}

impl UnlockRequest {
    pub fn new(kind: impl Into<String>, target: i64) -> Self {
        Self {
            kind: Some(kind.into()),
            target: Some(target),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub id: i64,
    pub name: String,
    pub category: String,
}

/// A cost-bearing item that can be revealed by spending points
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchasableItem {
    pub id: i64,
    pub kind: ItemKind,
    pub challenge_id: i64,
    pub challenge_name: String,
    pub cost: i64,
    pub content: String,
}

impl PurchasableItem {
    pub fn name(&self) -> String {
        format!("{} {}", self.kind.display_name(), self.id)
    }

    pub fn description(&self) -> String {
        format!("{} for {}", self.kind.display_name(), self.challenge_name)
    }

    pub fn category(&self) -> &'static str {
        self.kind.tag()
    }
}

/// Evidence that an account has revealed an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unlock {
    pub id: i64,
    pub account_id: i64,
    pub user_id: i64,
    pub team_id: Option<i64>,
    pub target: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub date: DateTime<Utc>,
}

/// Signed score-ledger entry; spends carry negative values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Award {
    pub id: i64,
    pub user_id: Option<i64>,
    pub team_id: Option<i64>,
    pub name: String,
    pub description: String,
    pub category: String,
    pub value: i64,
    pub date: DateTime<Utc>,
}

/// Award fields before insertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAward {
    pub user_id: Option<i64>,
    pub team_id: Option<i64>,
    pub name: String,
    pub description: String,
    pub category: String,
    pub value: i64,
}

impl NewAward {
    /// The debit recorded alongside an unlock
    pub fn debit_for(principal: &Principal, item: &PurchasableItem) -> Self {
        Self {
            user_id: Some(principal.user_id),
            team_id: principal.team_id,
            name: item.name(),
            description: item.description(),
            category: item.category().to_string(),
            value: -item.cost,
        }
    }
}
