//! Database setup commands: `kartavya init`, `kartavya seed`.

use anyhow::Result;
use console::style;
use std::path::Path;

use kartavya::config::{Config, KartavyaToml};
use kartavya::tracker::seed::{self, DEMO_PASSWORD, SeedOptions};
use kartavya::tracker::server::open_database;

pub fn cmd_init(config_path: &Path, config: &Config) -> Result<()> {
    if config_path.exists() {
        println!("Using existing config at {}", config_path.display());
    } else {
        KartavyaToml::default().save(config_path)?;
        println!("Created {}", config_path.display());
    }

    open_database(&config.db_path)?;
    println!(
        "{} database at {}",
        style("Initialized").green(),
        config.db_path.display()
    );
    println!();
    println!("Next steps:");
    println!("  kartavya seed     # load demo data");
    println!("  kartavya serve    # start the API");
    Ok(())
}

pub fn cmd_seed(
    config: &Config,
    admin_email: Option<String>,
    admin_password: Option<String>,
) -> Result<()> {
    let mut options = SeedOptions::from_env();
    if let Some(email) = admin_email {
        options.admin_email = email;
    }
    if let Some(password) = admin_password {
        options.admin_password = password;
    }

    let db = open_database(&config.db_path)?;
    let report = seed::seed(&db, &options)?;

    if report.is_empty() {
        println!("Nothing to seed; demo data already present.");
        return Ok(());
    }
    println!(
        "{} {} users, {} project, {} sprint, {} issues",
        style("Seeded").green(),
        report.users_created,
        usize::from(report.project_created),
        report.sprints_created,
        report.issues_created
    );
    println!();
    println!("  admin:       {}", options.admin_email);
    println!(
        "  demo users:  manager@, developer@, viewer@kartavya.local (password {})",
        DEMO_PASSWORD
    );
    Ok(())
}
