//! Hint purchase transaction
//!
//! A purchase validates, in order, the request shape, the item type, the
//! target, the cost ordering on the target's challenge, the duplicate rule
//! and the account balance. It then records the unlock together with a
//! negative award in one commit and invalidates cached standings.
//!
//! Validation and write share one IMMEDIATE transaction, so concurrent
//! purchases by the same account are serialized. The `UNIQUE` constraint on
//! unlocks backs this up: a commit that still collides is reported as
//! `PersistenceConflict` and the whole sequence is re-run against fresh state.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::config::{CompetitionMode, Config};
use crate::error::{classify_write_error, UnlockError};
use crate::ledger;
use crate::models::{NewAward, Principal, Unlock, UnlockRequest};
use crate::registry::{ItemKind, ItemRegistry};
use crate::standings::StandingsCache;
use crate::storage::{
    fetch_item, fetch_user_team, insert_award, insert_unlock, team_exists, Storage,
};

const DEFAULT_MAX_ATTEMPTS: u32 = 2;
const MISSING_FIELD: &str = "Missing data for required field.";

pub struct UnlockTransactor {
    storage: Arc<Storage>,
    registry: ItemRegistry,
    standings: Arc<dyn StandingsCache>,
    mode: CompetitionMode,
    max_attempts: u32,
}

impl UnlockTransactor {
    pub fn new(
        storage: Arc<Storage>,
        registry: ItemRegistry,
        standings: Arc<dyn StandingsCache>,
        mode: CompetitionMode,
    ) -> Self {
        Self {
            storage,
            registry,
            standings,
            mode,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn from_config(
        config: &Config,
        storage: Arc<Storage>,
        standings: Arc<dyn StandingsCache>,
    ) -> anyhow::Result<Self> {
        let registry = ItemRegistry::from_tags(&config.unlocks.item_types)?;
        Ok(Self::new(storage, registry, standings, config.competition.mode)
            .with_max_attempts(config.unlocks.max_attempts))
    }

    /// Total attempts when the commit conflicts; at least one
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn mode(&self) -> CompetitionMode {
        self.mode
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Spend the principal's points to unlock `request.target`
    pub fn purchase(
        &self,
        principal: &Principal,
        request: &UnlockRequest,
    ) -> Result<Unlock, UnlockError> {
        let (tag, target) = validate_request(request)?;
        let kind = self.registry.resolve(tag)?;

        let result = self.with_retry(|| self.try_purchase(principal, kind, target));

        match result {
            Ok(unlock) => {
                info!(
                    "Account {} (user {}) unlocked {} {}",
                    principal.account_id, principal.user_id, kind.tag(), target
                );
                self.invalidate_standings();
                Ok(unlock)
            }
            Err(UnlockError::PersistenceConflict) => {
                Err(self.resolve_conflict(principal, kind, target))
            }
            Err(e) => {
                debug!(
                    "Unlock of {} {} by account {} rejected: {}",
                    kind.tag(),
                    target,
                    principal.account_id,
                    e
                );
                Err(e)
            }
        }
    }

    fn try_purchase(
        &self,
        principal: &Principal,
        kind: ItemKind,
        target: i64,
    ) -> Result<Unlock, UnlockError> {
        self.storage.immediate(|conn| {
            ensure_principal(conn, principal)?;

            let item = fetch_item(conn, kind, target)?.ok_or_else(|| {
                UnlockError::not_found("target", format!("{} {}", kind.display_name(), target))
            })?;

            let prerequisites = ledger::compute_prerequisites(conn, principal.account_id, &item)?;
            if !prerequisites.is_satisfied() {
                debug!(
                    "Account {} is missing cheaper hints {:?}",
                    principal.account_id,
                    prerequisites.missing()
                );
                return Err(UnlockError::OrderingViolation);
            }
            if prerequisites.contains(item.id) {
                return Err(UnlockError::AlreadyUnlocked);
            }

            let score = ledger::account_score(conn, self.mode, principal.account_id)?;
            if item.cost > score {
                return Err(UnlockError::InsufficientBalance {
                    cost: item.cost,
                    score,
                });
            }

            let now = Utc::now();
            let unlock = insert_unlock(conn, principal, &item, now).map_err(classify_write_error)?;
            insert_award(conn, &NewAward::debit_for(principal, &item), now)
                .map_err(classify_write_error)?;

            Ok(unlock)
        })
    }

    /// Run `op` until it succeeds, fails for a non-retryable reason, or the
    /// attempt budget runs out
    fn with_retry<T>(
        &self,
        mut op: impl FnMut() -> Result<T, UnlockError>,
    ) -> Result<T, UnlockError> {
        let mut attempt = 1;
        loop {
            match op() {
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        "Unlock commit conflicted (attempt {}/{}), retrying",
                        attempt, self.max_attempts
                    );
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Final answer for a purchase whose every attempt conflicted
    fn resolve_conflict(&self, principal: &Principal, kind: ItemKind, target: i64) -> UnlockError {
        let already = match self.storage.is_unlocked(principal.account_id, kind, target) {
            Ok(already) => already,
            Err(e) => {
                warn!(
                    "Could not check unlock of {} {} by account {}: {}",
                    kind.tag(),
                    target,
                    principal.account_id,
                    e
                );
                false
            }
        };

        warn!(
            "Unlock of {} {} by account {} still conflicted after {} attempts",
            kind.tag(),
            target,
            principal.account_id,
            self.max_attempts
        );

        if already {
            UnlockError::AlreadyUnlocked
        } else {
            UnlockError::PersistenceConflict
        }
    }

    fn invalidate_standings(&self) {
        if let Err(e) = self.standings.invalidate() {
            warn!("Failed to invalidate standings cache: {}", e);
        }
    }
}

fn validate_request(request: &UnlockRequest) -> Result<(&str, i64), UnlockError> {
    let mut errors = BTreeMap::new();

    let tag = match request.kind.as_deref() {
        Some(tag) if !tag.trim().is_empty() => Some(tag),
        _ => {
            errors.insert("type".to_string(), MISSING_FIELD.to_string());
            None
        }
    };
    if request.target.is_none() {
        errors.insert("target".to_string(), MISSING_FIELD.to_string());
    }

    match (tag, request.target) {
        (Some(tag), Some(target)) => Ok((tag, target)),
        _ => Err(UnlockError::ValidationFailure(errors)),
    }
}

/// The principal comes from request headers, so its user and team must be
/// checked against the database before anything is written for them
fn ensure_principal(conn: &Connection, principal: &Principal) -> Result<(), UnlockError> {
    if fetch_user_team(conn, principal.user_id)?.is_none() {
        return Err(UnlockError::not_found(
            "user",
            format!("User {}", principal.user_id),
        ));
    }
    if let Some(team_id) = principal.team_id {
        if !team_exists(conn, team_id)? {
            return Err(UnlockError::not_found("team", format!("Team {}", team_id)));
        }
    }
    Ok(())
}
