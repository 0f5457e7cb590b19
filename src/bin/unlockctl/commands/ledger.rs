//! Ledger commands: score, unlock listing and operator purchases

use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;
use hint_unlocks::{
    CompetitionMode, NoopStandings, Principal, Storage, UnlockRequest, UnlockTransactor,
};

use crate::style::*;

pub fn score(storage: &Storage, mode: CompetitionMode, account: i64) -> Result<()> {
    print_header(&format!("Account {} ({:?} mode)", account, mode));

    let awards = storage.awards_for_account(mode, account)?;
    if awards.is_empty() {
        print_info("No awards yet.");
    }
    for award in &awards {
        println!(
            "{:>6}  {:>8}  {:<24}  {}",
            award.id,
            format_points(award.value),
            award.name,
            award.date.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
        );
    }

    println!();
    println!("Score: {}", storage.score(mode, account)?.to_string().bold());
    Ok(())
}

pub fn unlocks(storage: &Storage, account: Option<i64>) -> Result<()> {
    let unlocks = match account {
        Some(account) => storage.unlocks_for_account(account)?,
        None => storage.list_unlocks()?,
    };

    print_header("Unlocks");
    if unlocks.is_empty() {
        print_info("No unlocks recorded.");
        return Ok(());
    }

    println!(
        "{:>6}  {:>8}  {:>6}  {:>6}  {:<8}  {:>6}  Date",
        "Id", "Account", "User", "Team", "Type", "Target"
    );
    println!("{}", "─".repeat(70));
    for unlock in &unlocks {
        println!(
            "{:>6}  {:>8}  {:>6}  {:>6}  {:<8}  {:>6}  {}",
            unlock.id,
            unlock.account_id,
            unlock.user_id,
            unlock.team_id.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string()),
            unlock.kind,
            unlock.target,
            unlock.date.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
        );
    }
    println!();
    println!("Total unlocks: {}", unlocks.len());
    Ok(())
}

/// Purchase on behalf of a user, through the same transaction as the server
pub fn buy(
    storage: Arc<Storage>,
    config: &hint_unlocks::Config,
    user: i64,
    team: Option<i64>,
    hint: i64,
) -> Result<()> {
    let mode = config.competition.mode;
    let team = storage.team_or_default(user, team)?;
    let principal = Principal::for_mode(mode, user, team)
        .ok_or_else(|| anyhow::anyhow!("User {} must join a team to spend points", user))?;

    let transactor = UnlockTransactor::from_config(config, storage.clone(), Arc::new(NoopStandings))?;
    let unlock = transactor.purchase(&principal, &UnlockRequest::new("hints", hint))?;

    print_success(&format!(
        "Account {} unlocked hint {} (unlock {})",
        unlock.account_id, unlock.target, unlock.id
    ));
    println!("Remaining score: {}", storage.score(mode, principal.account_id)?);
    Ok(())
}
