//! Authoring commands: teams, users, challenges, hints and awards

use anyhow::Result;
use hint_unlocks::{NewAward, Storage};

use crate::style::*;

pub fn add_team(storage: &Storage, name: &str) -> Result<()> {
    let id = storage.create_team(name)?;
    print_success(&format!("Created team {} (id {})", name, id));
    Ok(())
}

pub fn add_user(storage: &Storage, name: &str, team: Option<i64>) -> Result<()> {
    let id = storage.create_user(name, team)?;
    match team {
        Some(team) => print_success(&format!("Created user {} (id {}) in team {}", name, id, team)),
        None => print_success(&format!("Created user {} (id {})", name, id)),
    }
    Ok(())
}

pub fn add_challenge(storage: &Storage, name: &str, category: &str) -> Result<()> {
    let challenge = storage.create_challenge(name, category)?;
    print_success(&format!(
        "Created challenge {} (id {})",
        challenge.name, challenge.id
    ));
    Ok(())
}

pub fn add_hint(storage: &Storage, challenge: i64, cost: i64, content: &str) -> Result<()> {
    if cost < 0 {
        anyhow::bail!("Hint cost cannot be negative");
    }
    let id = storage.create_hint(challenge, content, cost)?;
    print_success(&format!(
        "Created hint {} on challenge {} costing {}",
        id, challenge, cost
    ));
    Ok(())
}

pub fn award(
    storage: &Storage,
    user: i64,
    team: Option<i64>,
    value: i64,
    name: &str,
    category: &str,
) -> Result<()> {
    if value < 0 {
        print_warning("Negative awards reduce score without unlocking anything");
    }
    let team = storage.team_or_default(user, team)?;
    let award = storage.grant_award(&NewAward {
        user_id: Some(user),
        team_id: team,
        name: name.to_string(),
        description: String::new(),
        category: category.to_string(),
        value,
    })?;
    print_success(&format!(
        "Recorded award {} ({}) for user {}",
        award.id,
        format_points(award.value),
        user
    ));
    Ok(())
}
