//! SQLite storage for unlocks and the award ledger
//!
//! All purchase reads and writes for one request run inside a single
//! `BEGIN IMMEDIATE` transaction. SQLite admits one writer at a time, so a
//! concurrent purchase waits (up to the busy timeout) and then validates
//! against the committed state.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info};

use crate::config::CompetitionMode;
use crate::error::{classify_write_error, UnlockError};
use crate::ledger;
use crate::models::{Award, Challenge, NewAward, Principal, PurchasableItem, Unlock};
use crate::registry::ItemKind;

const SCHEMA_VERSION: i64 = 1;

pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .context("Failed to enable WAL journal")?;
        Self::init(conn, busy_timeout)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, Duration::from_secs(5))
    }

    fn init(conn: Connection, busy_timeout: Duration) -> Result<Self> {
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.run_migrations()?;
        Ok(storage)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock();

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations')",
            [],
            |row| row.get(0),
        )?;
        let applied: bool = exists
            && conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE version = ?1)",
                params![SCHEMA_VERSION],
                |row| row.get(0),
            )?;

        if !applied {
            let migration_sql = include_str!("../migrations/001_schema.sql");
            conn.execute_batch(migration_sql)
                .context("Failed to apply migration 001_schema")?;
            info!("Applied migration 001_schema");
        }

        Ok(())
    }

    /// Run `f` inside an IMMEDIATE transaction and commit when it succeeds.
    /// Any error drops the transaction, which rolls it back.
    pub fn immediate<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, UnlockError>,
    ) -> Result<T, UnlockError> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(classify_write_error)?;
        let value = f(&tx)?;
        tx.commit().map_err(classify_write_error)?;
        Ok(value)
    }

    // ========================================================================
    // ADMIN SEEDING
    // ========================================================================

    pub fn create_team(&self, name: &str) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute("INSERT INTO teams (name) VALUES (?1)", params![name])
            .with_context(|| format!("Failed to create team {}", name))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn create_user(&self, name: &str, team_id: Option<i64>) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (name, team_id) VALUES (?1, ?2)",
            params![name, team_id],
        )
        .with_context(|| format!("Failed to create user {}", name))?;
        Ok(conn.last_insert_rowid())
    }

    /// Team of a user: `None` if the user does not exist, `Some(None)` if teamless
    pub fn user_team(&self, user_id: i64) -> Result<Option<Option<i64>>> {
        let conn = self.conn.lock();
        Ok(fetch_user_team(&conn, user_id)?)
    }

    /// `team` if given, otherwise the team the user belongs to
    pub fn team_or_default(&self, user_id: i64, team: Option<i64>) -> Result<Option<i64>> {
        match team {
            Some(team) => Ok(Some(team)),
            None => self
                .user_team(user_id)?
                .ok_or_else(|| anyhow::anyhow!("Unknown user {}", user_id)),
        }
    }

    pub fn create_challenge(&self, name: &str, category: &str) -> Result<Challenge> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO challenges (name, category) VALUES (?1, ?2)",
            params![name, category],
        )?;
        Ok(Challenge {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            category: category.to_string(),
        })
    }

    pub fn create_hint(&self, challenge_id: i64, content: &str, cost: i64) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO hints (challenge_id, content, cost) VALUES (?1, ?2, ?3)",
            params![challenge_id, content, cost],
        )
        .with_context(|| format!("Failed to create hint for challenge {}", challenge_id))?;
        Ok(conn.last_insert_rowid())
    }

    /// Record an award outside of a purchase (prizes, manual adjustments)
    pub fn grant_award(&self, award: &NewAward) -> Result<Award> {
        let conn = self.conn.lock();
        let award = insert_award(&conn, award, Utc::now())?;
        debug!("Granted award {} ({})", award.id, award.value);
        Ok(award)
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Every unlock, for the administrative listing
    pub fn list_unlocks(&self) -> Result<Vec<Unlock>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, account_id, user_id, team_id, target, type, date FROM unlocks ORDER BY id",
        )?;
        let unlocks = stmt
            .query_map([], unlock_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(unlocks)
    }

    pub fn unlocks_for_account(&self, account_id: i64) -> Result<Vec<Unlock>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, account_id, user_id, team_id, target, type, date
             FROM unlocks WHERE account_id = ?1 ORDER BY id",
        )?;
        let unlocks = stmt
            .query_map(params![account_id], unlock_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(unlocks)
    }

    pub fn awards_for_account(&self, mode: CompetitionMode, account_id: i64) -> Result<Vec<Award>> {
        let conn = self.conn.lock();
        let sql = match mode {
            CompetitionMode::Users => {
                "SELECT id, user_id, team_id, name, description, category, value, date
                 FROM awards WHERE user_id = ?1 ORDER BY id"
            }
            CompetitionMode::Teams => {
                "SELECT id, user_id, team_id, name, description, category, value, date
                 FROM awards WHERE team_id = ?1 ORDER BY id"
            }
        };
        let mut stmt = conn.prepare(sql)?;
        let awards = stmt
            .query_map(params![account_id], award_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(awards)
    }

    /// Whether `account_id` already holds an unlock of `kind` on `target`.
    /// Plain read, no write lock taken.
    pub fn is_unlocked(&self, account_id: i64, kind: ItemKind, target: i64) -> Result<bool> {
        let conn = self.conn.lock();
        Ok(ledger::unlocked_targets(&conn, account_id, kind)?.contains(&target))
    }

    /// Current score, outside of any purchase
    pub fn score(&self, mode: CompetitionMode, account_id: i64) -> Result<i64> {
        let conn = self.conn.lock();
        Ok(ledger::account_score(&conn, mode, account_id)?)
    }
}

// ============================================================================
// TRANSACTION-SCOPED ACCESSORS
// ============================================================================

/// Team of a user on the caller's connection, see [`Storage::user_team`]
pub fn fetch_user_team(conn: &Connection, user_id: i64) -> rusqlite::Result<Option<Option<i64>>> {
    conn.query_row(
        "SELECT team_id FROM users WHERE id = ?1",
        params![user_id],
        |row| row.get(0),
    )
    .optional()
}

pub fn team_exists(conn: &Connection, team_id: i64) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM teams WHERE id = ?1)",
        params![team_id],
        |row| row.get(0),
    )
}

/// Fetch an item of `kind` by id
pub fn fetch_item(
    conn: &Connection,
    kind: ItemKind,
    id: i64,
) -> rusqlite::Result<Option<PurchasableItem>> {
    let sql = format!(
        "SELECT i.id, i.challenge_id, c.name, i.cost, i.content
         FROM {} i JOIN challenges c ON c.id = i.challenge_id
         WHERE i.id = ?1",
        kind.table()
    );
    conn.prepare_cached(&sql)?
        .query_row(params![id], |row| {
            Ok(PurchasableItem {
                id: row.get(0)?,
                kind,
                challenge_id: row.get(1)?,
                challenge_name: row.get(2)?,
                cost: row.get(3)?,
                content: row.get(4)?,
            })
        })
        .optional()
}

pub fn insert_unlock(
    conn: &Connection,
    principal: &Principal,
    item: &PurchasableItem,
    date: DateTime<Utc>,
) -> rusqlite::Result<Unlock> {
    conn.execute(
        "INSERT INTO unlocks (account_id, user_id, team_id, target, type, date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            principal.account_id,
            principal.user_id,
            principal.team_id,
            item.id,
            item.kind.tag(),
            date,
        ],
    )?;
    Ok(Unlock {
        id: conn.last_insert_rowid(),
        account_id: principal.account_id,
        user_id: principal.user_id,
        team_id: principal.team_id,
        target: item.id,
        kind: item.kind.tag().to_string(),
        date,
    })
}

pub fn insert_award(
    conn: &Connection,
    award: &NewAward,
    date: DateTime<Utc>,
) -> rusqlite::Result<Award> {
    conn.execute(
        "INSERT INTO awards (user_id, team_id, name, description, category, value, date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            award.user_id,
            award.team_id,
            award.name,
            award.description,
            award.category,
            award.value,
            date,
        ],
    )?;
    Ok(Award {
        id: conn.last_insert_rowid(),
        user_id: award.user_id,
        team_id: award.team_id,
        name: award.name.clone(),
        description: award.description.clone(),
        category: award.category.clone(),
        value: award.value,
        date,
    })
}

fn unlock_from_row(row: &Row<'_>) -> rusqlite::Result<Unlock> {
    Ok(Unlock {
        id: row.get(0)?,
        account_id: row.get(1)?,
        user_id: row.get(2)?,
        team_id: row.get(3)?,
        target: row.get(4)?,
        kind: row.get(5)?,
        date: row.get(6)?,
    })
}

fn award_from_row(row: &Row<'_>) -> rusqlite::Result<Award> {
    Ok(Award {
        id: row.get(0)?,
        user_id: row.get(1)?,
        team_id: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        category: row.get(5)?,
        value: row.get(6)?,
        date: row.get(7)?,
    })
}
