use kartavya_common::models::{ApiToken, Permission};
use rusqlite::{OptionalExtension, Row, params};

use super::{TrackerDb, parse_json_column, require_non_empty, to_json};
use crate::errors::{TrackerError, TrackerResult};

const TOKEN_COLUMNS: &str =
    "id, name, user_id, prefix, permissions, created_at, last_used_at, expires_at";

/// A token ready to persist. Only the digest of the secret is stored.
#[derive(Debug)]
pub struct NewApiToken {
    pub name: String,
    pub user_id: i64,
    pub token_hash: String,
    pub prefix: String,
    pub permissions: Vec<Permission>,
    pub expires_at: Option<String>,
}

struct TokenRow {
    id: i64,
    name: String,
    user_id: i64,
    prefix: String,
    permissions: String,
    created_at: String,
    last_used_at: Option<String>,
    expires_at: Option<String>,
}

impl TokenRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            user_id: row.get(2)?,
            prefix: row.get(3)?,
            permissions: row.get(4)?,
            created_at: row.get(5)?,
            last_used_at: row.get(6)?,
            expires_at: row.get(7)?,
        })
    }

    fn into_token(self) -> TrackerResult<ApiToken> {
        Ok(ApiToken {
            id: self.id,
            name: self.name,
            user_id: self.user_id,
            prefix: self.prefix,
            permissions: parse_json_column(&self.permissions, "permissions")?,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
            expires_at: self.expires_at,
        })
    }
}

impl TrackerDb {
    // ── API tokens ────────────────────────────────────────────────────

    pub fn create_api_token(&self, new: NewApiToken) -> TrackerResult<ApiToken> {
        let name = require_non_empty(&new.name, "name")?;
        self.conn.execute(
            "INSERT INTO api_tokens (name, user_id, token_hash, prefix, permissions, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                name,
                new.user_id,
                new.token_hash,
                new.prefix,
                to_json(&new.permissions)?,
                new.expires_at
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_api_token(id)?
            .ok_or_else(|| TrackerError::not_found("ApiToken", id))
    }

    /// Tokens owned by `user_id`, or every token when `None`.
    pub fn list_api_tokens(&self, user_id: Option<i64>) -> TrackerResult<Vec<ApiToken>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM api_tokens WHERE ?1 IS NULL OR user_id = ?1 ORDER BY id",
            TOKEN_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_id], TokenRow::from_row)?;
        let mut tokens = Vec::new();
        for row in rows {
            tokens.push(row?.into_token()?);
        }
        Ok(tokens)
    }

    pub fn get_api_token(&self, id: i64) -> TrackerResult<Option<ApiToken>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM api_tokens WHERE id = ?1", TOKEN_COLUMNS),
                params![id],
                TokenRow::from_row,
            )
            .optional()?;
        row.map(TokenRow::into_token).transpose()
    }

    pub fn get_api_token_by_hash(&self, token_hash: &str) -> TrackerResult<Option<ApiToken>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM api_tokens WHERE token_hash = ?1", TOKEN_COLUMNS),
                params![token_hash],
                TokenRow::from_row,
            )
            .optional()?;
        row.map(TokenRow::into_token).transpose()
    }

    /// Record that a token was just used.
    pub fn touch_api_token(&self, id: i64) -> TrackerResult<()> {
        self.conn.execute(
            "UPDATE api_tokens SET last_used_at = datetime('now') WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    pub fn delete_api_token(&self, id: i64) -> TrackerResult<bool> {
        let count = self
            .conn
            .execute("DELETE FROM api_tokens WHERE id = ?1", params![id])?;
        Ok(count > 0)
    }
}
