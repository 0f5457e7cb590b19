//! Purchasable item kinds
//!
//! Unlock requests name the item table by tag (`"hints"`). Tags are resolved
//! against a registry built once at startup, so an unknown or disabled tag is
//! rejected before any storage access.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::error::UnlockError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    #[serde(rename = "hints")]
    Hint,
}

impl ItemKind {
    pub const ALL: [ItemKind; 1] = [ItemKind::Hint];

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Tag used on the wire and stored in `unlocks.type`
    pub fn tag(self) -> &'static str {
        match self {
            Self::Hint => "hints",
        }
    }

    /// Backing table
    pub fn table(self) -> &'static str {
        match self {
            Self::Hint => "hints",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Hint => "Hint",
        }
    }
}

/// Enabled item kinds keyed by tag
#[derive(Debug, Clone)]
pub struct ItemRegistry {
    kinds: HashMap<&'static str, ItemKind>,
}

impl ItemRegistry {
    pub fn new(kinds: impl IntoIterator<Item = ItemKind>) -> Self {
        Self {
            kinds: kinds.into_iter().map(|k| (k.tag(), k)).collect(),
        }
    }

    /// Build from configured tags, failing on any tag without a kind
    pub fn from_tags<S: AsRef<str>>(tags: &[S]) -> Result<Self> {
        let kinds = tags
            .iter()
            .map(|tag| {
                let tag = tag.as_ref();
                ItemKind::from_tag(tag).ok_or_else(|| anyhow!("Unknown item type: {}", tag))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(kinds))
    }

    pub fn resolve(&self, tag: &str) -> Result<ItemKind, UnlockError> {
        self.kinds
            .get(tag)
            .copied()
            .ok_or_else(|| UnlockError::not_found("type", format!("Item type '{}'", tag)))
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl Default for ItemRegistry {
    fn default() -> Self {
        Self::new(ItemKind::ALL)
    }
}
