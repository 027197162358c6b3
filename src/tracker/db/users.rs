use kartavya_common::models::{Role, User};
use rusqlite::{OptionalExtension, Row, params};
use serde::Deserialize;

use super::{TrackerDb, parse_column, require_non_empty};
use crate::errors::{TrackerError, TrackerResult};

const USER_COLUMNS: &str = "id, name, email, role, active, created_at";

pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

/// Shallow patch for a user. The password arrives pre-hashed.
#[derive(Debug, Default, Deserialize)]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub active: Option<bool>,
    #[serde(skip)]
    pub password_hash: Option<String>,
}

struct UserRow {
    id: i64,
    name: String,
    email: String,
    role: String,
    active: bool,
    created_at: String,
}

impl UserRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            role: row.get(3)?,
            active: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_user(self) -> TrackerResult<User> {
        Ok(User {
            id: self.id,
            name: self.name,
            email: self.email,
            role: parse_column(&self.role, "role")?,
            active: self.active,
            created_at: self.created_at,
        })
    }
}

fn normalize_email(email: &str) -> TrackerResult<String> {
    let email = email.trim().to_lowercase();
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.'));
    if !valid {
        return Err(TrackerError::validation(format!("Invalid email address: {}", email)));
    }
    Ok(email)
}

impl TrackerDb {
    // ── User CRUD ─────────────────────────────────────────────────────

    pub fn create_user(&self, new: NewUser) -> TrackerResult<User> {
        let name = require_non_empty(&new.name, "name")?;
        let email = normalize_email(&new.email)?;
        if self.get_user_by_email(&email)?.is_some() {
            return Err(TrackerError::Conflict(format!(
                "A user with email {} already exists",
                email
            )));
        }
        self.conn.execute(
            "INSERT INTO users (name, email, password_hash, role) VALUES (?1, ?2, ?3, ?4)",
            params![name, email, new.password_hash, new.role.as_str()],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_user(id)?
            .ok_or_else(|| TrackerError::not_found("User", id))
    }

    pub fn list_users(&self) -> TrackerResult<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM users ORDER BY id", USER_COLUMNS))?;
        let rows = stmt.query_map([], UserRow::from_row)?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row?.into_user()?);
        }
        Ok(users)
    }

    pub fn get_user(&self, id: i64) -> TrackerResult<Option<User>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                params![id],
                UserRow::from_row,
            )
            .optional()?;
        row.map(UserRow::into_user).transpose()
    }

    pub fn get_user_by_email(&self, email: &str) -> TrackerResult<Option<User>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS),
                params![email.trim()],
                UserRow::from_row,
            )
            .optional()?;
        row.map(UserRow::into_user).transpose()
    }

    /// User plus stored password hash, for login.
    pub fn get_user_credentials(&self, email: &str) -> TrackerResult<Option<(User, String)>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {}, password_hash FROM users WHERE email = ?1",
                    USER_COLUMNS
                ),
                params![email.trim()],
                |row| Ok((UserRow::from_row(row)?, row.get::<_, String>(6)?)),
            )
            .optional()?;
        match row {
            Some((user, hash)) => Ok(Some((user.into_user()?, hash))),
            None => Ok(None),
        }
    }

    pub fn update_user(&self, id: i64, patch: UserPatch) -> TrackerResult<Option<User>> {
        let Some(current) = self.get_user(id)? else {
            return Ok(None);
        };

        let name = match patch.name {
            Some(n) => require_non_empty(&n, "name")?,
            None => current.name,
        };
        let email = match patch.email {
            Some(e) => {
                let e = normalize_email(&e)?;
                if let Some(other) = self.get_user_by_email(&e)? {
                    if other.id != id {
                        return Err(TrackerError::Conflict(format!(
                            "A user with email {} already exists",
                            e
                        )));
                    }
                }
                e
            }
            None => current.email,
        };
        let role = patch.role.unwrap_or(current.role);
        let active = patch.active.unwrap_or(current.active);

        self.atomic(|tx| {
            tx.execute(
                "UPDATE users SET name = ?1, email = ?2, role = ?3, active = ?4 WHERE id = ?5",
                params![name, email, role.as_str(), active, id],
            )?;
            if let Some(hash) = patch.password_hash {
                tx.execute(
                    "UPDATE users SET password_hash = ?1 WHERE id = ?2",
                    params![hash, id],
                )?;
            }
            Ok(())
        })?;
        self.get_user(id)
    }

    pub fn delete_user(&self, id: i64) -> TrackerResult<bool> {
        let count = self
            .conn
            .execute("DELETE FROM users WHERE id = ?1", params![id])?;
        Ok(count > 0)
    }

    pub fn count_users(&self) -> TrackerResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
    }
}
