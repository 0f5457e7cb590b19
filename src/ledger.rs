//! Ledger reads used to validate a purchase
//!
//! Every function takes the connection handle of the caller's open
//! transaction, so prerequisite, duplicate and balance checks all see the
//! snapshot the subsequent write commits against.

use std::collections::HashSet;

use rusqlite::{params, Connection};

use crate::config::CompetitionMode;
use crate::models::PurchasableItem;
use crate::registry::ItemKind;

/// Unlock state of one account relative to one target item
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prerequisites {
    /// Targets the account has already unlocked
    pub unlocked: HashSet<i64>,
    /// Same-challenge items strictly cheaper than the target
    pub required: HashSet<i64>,
}

impl Prerequisites {
    pub fn is_satisfied(&self) -> bool {
        self.required.is_subset(&self.unlocked)
    }

    pub fn contains(&self, target: i64) -> bool {
        self.unlocked.contains(&target)
    }

    /// Required items not yet unlocked, ascending
    pub fn missing(&self) -> Vec<i64> {
        let mut missing: Vec<i64> = self.required.difference(&self.unlocked).copied().collect();
        missing.sort_unstable();
        missing
    }
}

pub fn compute_prerequisites(
    conn: &Connection,
    account_id: i64,
    target: &PurchasableItem,
) -> rusqlite::Result<Prerequisites> {
    Ok(Prerequisites {
        unlocked: unlocked_targets(conn, account_id, target.kind)?,
        required: cheaper_siblings(conn, target)?,
    })
}

pub fn unlocked_targets(
    conn: &Connection,
    account_id: i64,
    kind: ItemKind,
) -> rusqlite::Result<HashSet<i64>> {
    let mut stmt =
        conn.prepare_cached("SELECT target FROM unlocks WHERE account_id = ?1 AND type = ?2")?;
    let targets = stmt
        .query_map(params![account_id, kind.tag()], |row| row.get(0))?
        .collect::<rusqlite::Result<HashSet<i64>>>()?;
    Ok(targets)
}

fn cheaper_siblings(conn: &Connection, target: &PurchasableItem) -> rusqlite::Result<HashSet<i64>> {
    let sql = format!(
        "SELECT id FROM {} WHERE challenge_id = ?1 AND cost < ?2",
        target.kind.table()
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let ids = stmt
        .query_map(params![target.challenge_id, target.cost], |row| row.get(0))?
        .collect::<rusqlite::Result<HashSet<i64>>>()?;
    Ok(ids)
}

/// Sum of award values for the account; zero when it has none
pub fn account_score(
    conn: &Connection,
    mode: CompetitionMode,
    account_id: i64,
) -> rusqlite::Result<i64> {
    let sql = match mode {
        CompetitionMode::Users => "SELECT COALESCE(SUM(value), 0) FROM awards WHERE user_id = ?1",
        CompetitionMode::Teams => "SELECT COALESCE(SUM(value), 0) FROM awards WHERE team_id = ?1",
    };
    conn.query_row(sql, params![account_id], |row| row.get(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewAward, Principal};
    use crate::storage::{fetch_item, insert_unlock, Storage};
    use crate::error::UnlockError;
    use chrono::Utc;

    struct Fixture {
        storage: Storage,
        user: i64,
        hints: Vec<i64>,
    }

    fn fixture(costs: &[i64]) -> Fixture {
        let storage = Storage::in_memory().unwrap();
        let user = storage.create_user("alice", None).unwrap();
        let challenge = storage.create_challenge("Crypto 1", "crypto").unwrap();
        let other = storage.create_challenge("Web 1", "web").unwrap();
        // A cheap hint elsewhere must never become a prerequisite
        storage.create_hint(other.id, "elsewhere", 1).unwrap();
        let hints = costs
            .iter()
            .map(|cost| storage.create_hint(challenge.id, "hint", *cost).unwrap())
            .collect();
        Fixture { storage, user, hints }
    }

    fn prerequisites(f: &Fixture, account: i64, hint: i64) -> Prerequisites {
        f.storage
            .immediate(|conn| {
                let item = fetch_item(conn, ItemKind::Hint, hint)?.unwrap();
                Ok(compute_prerequisites(conn, account, &item)?)
            })
            .unwrap()
    }

    #[test]
    fn test_required_set_is_strictly_cheaper_same_challenge() {
        let f = fixture(&[50, 100, 100, 200]);
        let p = prerequisites(&f, f.user, f.hints[2]);
        let expected: HashSet<i64> = [f.hints[0]].into_iter().collect();
        assert_eq!(p.required, expected);

        let p = prerequisites(&f, f.user, f.hints[3]);
        assert_eq!(p.required.len(), 3);
        assert_eq!(p.missing(), vec![f.hints[0], f.hints[1], f.hints[2]]);
    }

    #[test]
    fn test_cheapest_has_no_prerequisites() {
        let f = fixture(&[0, 10]);
        let p = prerequisites(&f, f.user, f.hints[0]);
        assert!(p.required.is_empty());
        assert!(p.is_satisfied());
    }

    #[test]
    fn test_unlocked_set_is_per_account() {
        let f = fixture(&[50, 100]);
        let other = f.storage.create_user("bob", None).unwrap();

        f.storage
            .immediate(|conn| {
                let item = fetch_item(conn, ItemKind::Hint, f.hints[0])?.unwrap();
                let principal = Principal {
                    user_id: f.user,
                    team_id: None,
                    account_id: f.user,
                };
                insert_unlock(conn, &principal, &item, Utc::now())?;
                Ok::<_, UnlockError>(())
            })
            .unwrap();

        let mine = prerequisites(&f, f.user, f.hints[1]);
        assert!(mine.is_satisfied());
        assert!(mine.contains(f.hints[0]));
        assert!(!mine.contains(f.hints[1]));

        let theirs = prerequisites(&f, other, f.hints[1]);
        assert!(!theirs.is_satisfied());
        assert_eq!(theirs.missing(), vec![f.hints[0]]);
    }

    #[test]
    fn test_account_score_sums_awards() {
        let f = fixture(&[]);
        for value in [500, -50, -100] {
            f.storage
                .grant_award(&NewAward {
                    user_id: Some(f.user),
                    team_id: None,
                    name: "adjustment".to_string(),
                    description: String::new(),
                    category: String::new(),
                    value,
                })
                .unwrap();
        }
        assert_eq!(f.storage.score(CompetitionMode::Users, f.user).unwrap(), 350);
        assert_eq!(f.storage.score(CompetitionMode::Users, f.user + 1).unwrap(), 0);
    }
}
