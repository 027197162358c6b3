use kartavya_common::models::Comment;
use rusqlite::{OptionalExtension, Row, params};

use super::{TrackerDb, require_non_empty};
use crate::errors::{TrackerError, TrackerResult};

const COMMENT_COLUMNS: &str = "id, issue_id, author_id, content, created_at, updated_at";

pub struct NewComment {
    pub issue_id: i64,
    pub author_id: Option<i64>,
    pub content: String,
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        issue_id: row.get(1)?,
        author_id: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

impl TrackerDb {
    // ── Comments ──────────────────────────────────────────────────────

    pub fn create_comment(&self, new: NewComment) -> TrackerResult<Comment> {
        let content = require_non_empty(&new.content, "content")?;
        self.require_issue(new.issue_id)?;
        self.conn.execute(
            "INSERT INTO comments (issue_id, author_id, content) VALUES (?1, ?2, ?3)",
            params![new.issue_id, new.author_id, content],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_comment(id)?
            .ok_or_else(|| TrackerError::not_found("Comment", id))
    }

    /// Comments on an issue, oldest first.
    pub fn list_comments(&self, issue_id: i64) -> TrackerResult<Vec<Comment>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM comments WHERE issue_id = ?1 ORDER BY id",
            COMMENT_COLUMNS
        ))?;
        let comments = stmt
            .query_map(params![issue_id], comment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(comments)
    }

    pub fn get_comment(&self, id: i64) -> TrackerResult<Option<Comment>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} FROM comments WHERE id = ?1", COMMENT_COLUMNS),
                params![id],
                comment_from_row,
            )
            .optional()?)
    }

    pub fn update_comment(&self, id: i64, content: &str) -> TrackerResult<Option<Comment>> {
        let content = require_non_empty(content, "content")?;
        let count = self.conn.execute(
            "UPDATE comments SET content = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![content, id],
        )?;
        if count == 0 {
            return Ok(None);
        }
        self.get_comment(id)
    }

    pub fn delete_comment(&self, id: i64) -> TrackerResult<bool> {
        let count = self
            .conn
            .execute("DELETE FROM comments WHERE id = ?1", params![id])?;
        Ok(count > 0)
    }
}
