//! Idempotent demo-data bootstrap.
//!
//! Creates an admin, one account per remaining role and a `KAR` project with
//! a planned sprint and a handful of issues. Existing users (by email) and an
//! existing `KAR` project are left alone, so re-running is harmless.

use kartavya_common::models::{IssueType, Priority, Role, User};

use crate::errors::TrackerResult;
use crate::tracker::auth;
use crate::tracker::db::{NewIssue, NewProject, NewSprint, NewUser, TrackerDb};

pub const DEFAULT_ADMIN_EMAIL: &str = "admin@kartavya.local";
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin12345";
/// Password for the non-admin demo accounts.
pub const DEMO_PASSWORD: &str = "demo12345";
pub const DEMO_PROJECT_KEY: &str = "KAR";

const DEMO_USERS: [(&str, &str, Role); 3] = [
    ("Maya Manager", "manager@kartavya.local", Role::Manager),
    ("Dev Developer", "developer@kartavya.local", Role::Developer),
    ("Vic Viewer", "viewer@kartavya.local", Role::Viewer),
];

#[derive(Debug, Clone)]
pub struct SeedOptions {
    pub admin_email: String,
    pub admin_password: String,
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self {
            admin_email: DEFAULT_ADMIN_EMAIL.to_string(),
            admin_password: DEFAULT_ADMIN_PASSWORD.to_string(),
        }
    }
}

impl SeedOptions {
    /// Defaults overridden by `KARTAVYA_ADMIN_EMAIL` / `KARTAVYA_ADMIN_PASSWORD`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            admin_email: lookup("KARTAVYA_ADMIN_EMAIL").unwrap_or(defaults.admin_email),
            admin_password: lookup("KARTAVYA_ADMIN_PASSWORD").unwrap_or(defaults.admin_password),
        }
    }
}

/// What a seed run actually inserted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub users_created: usize,
    pub project_created: bool,
    pub sprints_created: usize,
    pub issues_created: usize,
}

impl SeedReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Seed the database. All inserts happen atomically.
pub fn seed(db: &TrackerDb, options: &SeedOptions) -> TrackerResult<SeedReport> {
    auth::validate_password(&options.admin_password)?;

    db.atomic(|_| {
        let mut report = SeedReport::default();

        let admin = ensure_user(
            db,
            "Administrator",
            &options.admin_email,
            &options.admin_password,
            Role::Admin,
            &mut report,
        )?;
        let mut members = Vec::with_capacity(DEMO_USERS.len());
        for (name, email, role) in DEMO_USERS {
            members.push(ensure_user(db, name, email, DEMO_PASSWORD, role, &mut report)?);
        }

        if db.get_project_by_key(DEMO_PROJECT_KEY)?.is_none() {
            seed_project(db, &admin, &members, &mut report)?;
        }

        Ok(report)
    })
}

fn ensure_user(
    db: &TrackerDb,
    name: &str,
    email: &str,
    password: &str,
    role: Role,
    report: &mut SeedReport,
) -> TrackerResult<User> {
    if let Some(user) = db.get_user_by_email(email)? {
        tracing::debug!(email, "Seed user already exists");
        return Ok(user);
    }
    let user = db.create_user(NewUser {
        name: name.to_string(),
        email: email.to_string(),
        password_hash: auth::hash_password(password),
        role,
    })?;
    report.users_created += 1;
    tracing::info!(user_id = user.id, role = %role, "Seeded user");
    Ok(user)
}

fn seed_project(
    db: &TrackerDb,
    admin: &User,
    members: &[User],
    report: &mut SeedReport,
) -> TrackerResult<()> {
    let lead = members.first().unwrap_or(admin);
    let developer = members.get(1).unwrap_or(admin);

    let project = db.create_project(NewProject {
        name: "Kartavya".to_string(),
        key: DEMO_PROJECT_KEY.to_string(),
        description: Some("Demo project for trying out the tracker".to_string()),
        lead_id: Some(lead.id),
    })?;
    report.project_created = true;

    let sprint = db.create_sprint(NewSprint {
        project_id: project.id,
        name: "Sprint 1".to_string(),
        goal: Some("Ship the first usable board".to_string()),
        start_date: None,
        end_date: None,
    })?;
    report.sprints_created += 1;

    let samples: [(&str, IssueType, Priority, Option<i64>, bool); 5] = [
        ("Set up the delivery pipeline", IssueType::Epic, Priority::High, None, false),
        ("As a user I can log in", IssueType::Story, Priority::High, Some(5), true),
        ("Write the onboarding guide", IssueType::Task, Priority::Medium, Some(2), true),
        ("Board drops cards on slow networks", IssueType::Bug, Priority::Critical, Some(3), true),
        ("Add password rules to the login form", IssueType::Subtask, Priority::Low, Some(1), false),
    ];
    for (summary, issue_type, priority, story_points, in_sprint) in samples {
        db.create_issue(
            NewIssue {
                project_id: project.id,
                summary: summary.to_string(),
                issue_type: Some(issue_type),
                priority: Some(priority),
                assignee_id: Some(developer.id),
                sprint_id: in_sprint.then_some(sprint.id),
                story_points,
                labels: Some(vec!["demo".to_string()]),
                ..Default::default()
            },
            Some(admin.id),
        )?;
        report.issues_created += 1;
    }
    tracing::info!(
        project_id = project.id,
        issues = report.issues_created,
        "Seeded demo project"
    );
    Ok(())
}
