pub mod ledger;
pub mod seed;
