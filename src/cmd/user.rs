//! User account commands: `kartavya user`.

use anyhow::{Result, anyhow};
use console::style;

use kartavya::config::Config;
use kartavya::tracker::auth;
use kartavya::tracker::db::NewUser;
use kartavya::tracker::server::open_database;
use kartavya_common::models::Role;

use super::super::UserCommands;

pub fn cmd_user(config: &Config, command: UserCommands) -> Result<()> {
    let db = open_database(&config.db_path)?;

    match command {
        UserCommands::Add {
            name,
            email,
            password,
            role,
        } => {
            let role: Role = role.parse().map_err(|e: String| anyhow!(e))?;
            auth::validate_password(&password)?;
            let user = db.create_user(NewUser {
                name,
                email,
                password_hash: auth::hash_password(&password),
                role,
            })?;
            println!(
                "{} user {} <{}> as {}",
                style("Created").green(),
                user.id,
                user.email,
                user.role
            );
        }
        UserCommands::List => {
            let users = db.list_users()?;
            if users.is_empty() {
                println!("No users. Run 'kartavya user add' or 'kartavya seed'.");
                return Ok(());
            }
            for user in users {
                let status = if user.active {
                    style("active").green()
                } else {
                    style("inactive").dim()
                };
                println!(
                    "{:>4}  {:<32} {:<10} {}  {}",
                    user.id,
                    user.email,
                    user.role.as_str(),
                    status,
                    user.name
                );
            }
        }
    }

    Ok(())
}
