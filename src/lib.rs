//! Hint Unlocks - Spend competition points to reveal challenge hints
//!
//! A participant (a user, or a whole team in team mode) spends score to
//! reveal a hint attached to a challenge.
//!
//! # Rules
//!
//! 1. Cheaper hints on the same challenge must be unlocked first
//!    (equal-cost siblings are not prerequisites)
//! 2. A hint can be unlocked once per account
//! 3. The hint's cost may not exceed the account's current score
//!
//! # Ledger
//!
//! Score is never stored. It is the sum of the account's awards, and a
//! purchase records the unlock together with a negative award in a single
//! transaction that also performed the checks above.

pub mod config;
pub mod error;
pub mod ledger;
pub mod models;
pub mod registry;
pub mod server;
pub mod standings;
pub mod storage;
pub mod transactor;

pub use config::{CompetitionMode, Config};
pub use error::{ErrorKind, UnlockError};
pub use ledger::Prerequisites;
pub use models::{Award, NewAward, Principal, PurchasableItem, Unlock, UnlockRequest};
pub use registry::{ItemKind, ItemRegistry};
pub use standings::{MemoryStandings, NoopStandings, StandingsCache};
pub use storage::Storage;
pub use transactor::UnlockTransactor;
