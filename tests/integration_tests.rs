//! Integration tests for the kartavya CLI.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a kartavya Command running inside `dir`
fn kartavya(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("kartavya");
    cmd.current_dir(dir.path())
        .env_remove("KARTAVYA_DB_PATH")
        .env_remove("KARTAVYA_CONFIG")
        .env_remove("KARTAVYA_ADMIN_EMAIL")
        .env_remove("KARTAVYA_ADMIN_PASSWORD")
        .env_remove("KARTAVYA_TOKEN_SECRET")
        .env_remove("RUST_LOG");
    cmd
}

fn init_project(dir: &TempDir) {
    kartavya(dir).arg("init").assert().success();
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        let dir = TempDir::new().unwrap();
        kartavya(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("seed"));
    }

    #[test]
    fn test_version() {
        let dir = TempDir::new().unwrap();
        kartavya(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_unknown_command_fails() {
        let dir = TempDir::new().unwrap();
        kartavya(&dir).arg("frobnicate").assert().failure();
    }

    #[test]
    fn test_init_creates_config_and_database() {
        let dir = TempDir::new().unwrap();
        kartavya(&dir)
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized"));

        assert!(dir.path().join(".kartavya/kartavya.toml").exists());
        assert!(dir.path().join(".kartavya/kartavya.db").exists());
    }

    #[test]
    fn test_init_twice_keeps_config() {
        let dir = TempDir::new().unwrap();
        init_project(&dir);
        let config = dir.path().join(".kartavya/kartavya.toml");
        fs::write(&config, "[server]\nport = 4321\n").unwrap();

        kartavya(&dir)
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Using existing config"));
        assert_eq!(fs::read_to_string(&config).unwrap(), "[server]\nport = 4321\n");
    }
}

// =============================================================================
// Seeding
// =============================================================================

mod seeding {
    use super::*;

    #[test]
    fn test_seed_then_reseed() {
        let dir = TempDir::new().unwrap();
        init_project(&dir);

        kartavya(&dir)
            .arg("seed")
            .assert()
            .success()
            .stdout(predicate::str::contains("Seeded 4 users"))
            .stdout(predicate::str::contains("admin@kartavya.local"));

        kartavya(&dir)
            .arg("seed")
            .assert()
            .success()
            .stdout(predicate::str::contains("Nothing to seed"));
    }

    #[test]
    fn test_seed_with_custom_admin() {
        let dir = TempDir::new().unwrap();
        kartavya(&dir)
            .args(["seed", "--admin-email", "ops@example.com"])
            .args(["--admin-password", "long-enough-secret"])
            .assert()
            .success()
            .stdout(predicate::str::contains("ops@example.com"));

        kartavya(&dir)
            .args(["user", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("ops@example.com"))
            .stdout(predicate::str::contains("viewer@kartavya.local"));
    }

    #[test]
    fn test_seed_admin_from_env() {
        let dir = TempDir::new().unwrap();
        kartavya(&dir)
            .arg("seed")
            .env("KARTAVYA_ADMIN_EMAIL", "envadmin@example.com")
            .assert()
            .success()
            .stdout(predicate::str::contains("envadmin@example.com"));
    }

    #[test]
    fn test_seed_rejects_short_password() {
        let dir = TempDir::new().unwrap();
        kartavya(&dir)
            .args(["seed", "--admin-password", "short"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("at least 8 characters"));
    }

    #[test]
    fn test_db_path_flag() {
        let dir = TempDir::new().unwrap();
        kartavya(&dir)
            .args(["--db-path", "custom/tracker.db", "seed"])
            .assert()
            .success();
        assert!(dir.path().join("custom/tracker.db").exists());
    }
}

// =============================================================================
// Users
// =============================================================================

mod users {
    use super::*;

    #[test]
    fn test_user_add_and_list() {
        let dir = TempDir::new().unwrap();
        init_project(&dir);

        kartavya(&dir)
            .args(["user", "add", "--name", "Asha", "--email", "asha@example.com"])
            .args(["--password", "password123", "--role", "manager"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created user"))
            .stdout(predicate::str::contains("manager"));

        kartavya(&dir)
            .args(["user", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("asha@example.com"));
    }

    #[test]
    fn test_user_add_duplicate_email_fails() {
        let dir = TempDir::new().unwrap();
        let add = |email: &str| {
            kartavya(&dir)
                .args(["user", "add", "--name", "Dup", "--email", email])
                .args(["--password", "password123"])
                .assert()
        };
        add("dup@example.com").success();
        add("DUP@example.com").failure();
    }

    #[test]
    fn test_user_add_invalid_role_fails() {
        let dir = TempDir::new().unwrap();
        kartavya(&dir)
            .args(["user", "add", "--name", "X", "--email", "x@example.com"])
            .args(["--password", "password123", "--role", "overlord"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid role"));
    }

    #[test]
    fn test_user_list_empty() {
        let dir = TempDir::new().unwrap();
        kartavya(&dir)
            .args(["user", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No users"));
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_init_writes_defaults() {
        let dir = TempDir::new().unwrap();
        kartavya(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created kartavya.toml"));

        let content = fs::read_to_string(dir.path().join(".kartavya/kartavya.toml")).unwrap();
        assert!(content.contains("[server]"));
        assert!(content.contains("port = 4000"));

        kartavya(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_config_show_redacts_secret() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".kartavya")).unwrap();
        fs::write(
            dir.path().join(".kartavya/kartavya.toml"),
            "[server]\nport = 5050\n\n[auth]\ntoken_secret = \"super-secret-value-that-is-long-enough\"\n",
        )
        .unwrap();

        kartavya(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 5050"))
            .stdout(predicate::str::contains("<redacted>"))
            .stdout(predicate::str::contains("super-secret").not());
    }

    #[test]
    fn test_config_show_applies_env() {
        let dir = TempDir::new().unwrap();
        kartavya(&dir)
            .args(["config", "show"])
            .env("KARTAVYA_PORT", "6060")
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 6060"));
    }

    #[test]
    fn test_config_validate_warns() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".kartavya")).unwrap();
        fs::write(
            dir.path().join(".kartavya/kartavya.toml"),
            "[auth]\ntoken_secret = \"short\"\ntoken_ttl_secs = 0\n",
        )
        .unwrap();

        kartavya(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration warnings"))
            .stdout(predicate::str::contains("token_ttl_secs"));
    }

    #[test]
    fn test_config_validate_clean() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".kartavya")).unwrap();
        fs::write(
            dir.path().join(".kartavya/kartavya.toml"),
            format!("[auth]\ntoken_secret = \"{}\"\n", "k".repeat(40)),
        )
        .unwrap();

        kartavya(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid"));
    }

    #[test]
    fn test_explicit_config_path() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("alt.toml"), "[server]\nport = 7171\n").unwrap();
        kartavya(&dir)
            .args(["--config", "alt.toml", "config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 7171"));
    }

    #[test]
    fn test_invalid_config_fails() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".kartavya")).unwrap();
        fs::write(dir.path().join(".kartavya/kartavya.toml"), "[server\nport = ").unwrap();
        kartavya(&dir).arg("init").assert().failure();
    }
}
