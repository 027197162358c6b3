use kartavya_common::models::{Issue, IssueFilter, SavedFilter};
use rusqlite::{OptionalExtension, Row, params};
use serde::Deserialize;

use super::{Page, TrackerDb, double_option, parse_json_column, require_non_empty, to_json};
use crate::errors::{TrackerError, TrackerResult};

const FILTER_COLUMNS: &str = "id, name, owner_id, project_id, query, shared, created_at";

#[derive(Debug, Deserialize)]
pub struct NewFilter {
    pub name: String,
    pub project_id: Option<i64>,
    #[serde(default)]
    pub query: IssueFilter,
    #[serde(default)]
    pub shared: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct FilterPatch {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub project_id: Option<Option<i64>>,
    pub query: Option<IssueFilter>,
    pub shared: Option<bool>,
}

struct FilterRow {
    id: i64,
    name: String,
    owner_id: i64,
    project_id: Option<i64>,
    query: String,
    shared: bool,
    created_at: String,
}

impl FilterRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            owner_id: row.get(2)?,
            project_id: row.get(3)?,
            query: row.get(4)?,
            shared: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_filter(self) -> TrackerResult<SavedFilter> {
        Ok(SavedFilter {
            id: self.id,
            name: self.name,
            owner_id: self.owner_id,
            project_id: self.project_id,
            query: parse_json_column(&self.query, "query")?,
            shared: self.shared,
            created_at: self.created_at,
        })
    }
}

impl TrackerDb {
    // ── Saved filters ─────────────────────────────────────────────────

    pub fn create_filter(&self, owner_id: i64, new: NewFilter) -> TrackerResult<SavedFilter> {
        let name = require_non_empty(&new.name, "name")?;
        if let Some(project_id) = new.project_id {
            self.ensure_project_exists(project_id)?;
        }
        self.conn.execute(
            "INSERT INTO saved_filters (name, owner_id, project_id, query, shared)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![name, owner_id, new.project_id, to_json(&new.query)?, new.shared],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_filter(id)?
            .ok_or_else(|| TrackerError::not_found("Filter", id))
    }

    /// Filters visible to `viewer_id`: their own plus shared ones. `None`
    /// lists every filter.
    pub fn list_filters(&self, viewer_id: Option<i64>) -> TrackerResult<Vec<SavedFilter>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM saved_filters WHERE ?1 IS NULL OR owner_id = ?1 OR shared = 1 ORDER BY id",
            FILTER_COLUMNS
        ))?;
        let rows = stmt.query_map(params![viewer_id], FilterRow::from_row)?;
        let mut filters = Vec::new();
        for row in rows {
            filters.push(row?.into_filter()?);
        }
        Ok(filters)
    }

    pub fn get_filter(&self, id: i64) -> TrackerResult<Option<SavedFilter>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM saved_filters WHERE id = ?1", FILTER_COLUMNS),
                params![id],
                FilterRow::from_row,
            )
            .optional()?;
        row.map(FilterRow::into_filter).transpose()
    }

    pub fn update_filter(&self, id: i64, patch: FilterPatch) -> TrackerResult<Option<SavedFilter>> {
        let Some(current) = self.get_filter(id)? else {
            return Ok(None);
        };
        let name = match patch.name {
            Some(n) => require_non_empty(&n, "name")?,
            None => current.name,
        };
        let project_id = match patch.project_id {
            Some(Some(pid)) => {
                self.ensure_project_exists(pid)?;
                Some(pid)
            }
            Some(None) => None,
            None => current.project_id,
        };
        let query = patch.query.unwrap_or(current.query);
        let shared = patch.shared.unwrap_or(current.shared);

        self.conn.execute(
            "UPDATE saved_filters SET name = ?1, project_id = ?2, query = ?3, shared = ?4 WHERE id = ?5",
            params![name, project_id, to_json(&query)?, shared, id],
        )?;
        self.get_filter(id)
    }

    pub fn delete_filter(&self, id: i64) -> TrackerResult<bool> {
        let count = self
            .conn
            .execute("DELETE FROM saved_filters WHERE id = ?1", params![id])?;
        Ok(count > 0)
    }

    /// Execute a saved filter. The filter's project scopes the query unless
    /// the query names a project itself.
    pub fn run_filter(&self, id: i64, page: Page) -> TrackerResult<(Vec<Issue>, usize)> {
        let filter = self
            .get_filter(id)?
            .ok_or_else(|| TrackerError::not_found("Filter", id))?;
        let mut query = filter.query;
        if query.project_id.is_none() {
            query.project_id = filter.project_id;
        }
        self.list_issues(&query, page)
    }

    fn ensure_project_exists(&self, id: i64) -> TrackerResult<()> {
        if self.get_project(id)?.is_none() {
            return Err(TrackerError::validation(format!("Project {} does not exist", id)));
        }
        Ok(())
    }
}
