use kartavya_common::models::{
    Issue, IssueDetail, IssueFilter, IssueType, Priority, SprintStatus, UserSummary,
};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde::Deserialize;

use super::{TrackerDb, double_option, parse_column, parse_json_column, require_non_empty, to_json};
use crate::errors::{TrackerError, TrackerResult};
use crate::tracker::workflow;

const ISSUE_COLUMNS: &str = "id, key, project_id, summary, description, issue_type, status, priority, \
     assignee_id, reporter_id, sprint_id, story_points, labels, position, created_at, updated_at";

/// Upper bound for a single page of issues.
pub const MAX_PAGE_SIZE: i64 = 500;

#[derive(Debug, Default, Deserialize)]
pub struct NewIssue {
    pub project_id: i64,
    pub summary: String,
    pub description: Option<String>,
    pub issue_type: Option<IssueType>,
    pub priority: Option<Priority>,
    pub assignee_id: Option<i64>,
    pub sprint_id: Option<i64>,
    pub story_points: Option<i64>,
    pub labels: Option<Vec<String>>,
}

/// Shallow patch. Nullable references use `Some(None)` to clear.
#[derive(Debug, Default, Deserialize)]
pub struct IssuePatch {
    pub summary: Option<String>,
    pub description: Option<String>,
    pub issue_type: Option<IssueType>,
    pub priority: Option<Priority>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub assignee_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub sprint_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub story_points: Option<Option<i64>>,
    pub labels: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct IssueMove {
    pub status: String,
    pub position: i64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Page {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

struct IssueRow {
    id: i64,
    key: String,
    project_id: i64,
    summary: String,
    description: String,
    issue_type: String,
    status: String,
    priority: String,
    assignee_id: Option<i64>,
    reporter_id: Option<i64>,
    sprint_id: Option<i64>,
    story_points: Option<i64>,
    labels: String,
    position: i64,
    created_at: String,
    updated_at: String,
}

impl IssueRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            key: row.get(1)?,
            project_id: row.get(2)?,
            summary: row.get(3)?,
            description: row.get(4)?,
            issue_type: row.get(5)?,
            status: row.get(6)?,
            priority: row.get(7)?,
            assignee_id: row.get(8)?,
            reporter_id: row.get(9)?,
            sprint_id: row.get(10)?,
            story_points: row.get(11)?,
            labels: row.get(12)?,
            position: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }

    fn into_issue(self) -> TrackerResult<Issue> {
        Ok(Issue {
            id: self.id,
            key: self.key,
            project_id: self.project_id,
            summary: self.summary,
            description: self.description,
            issue_type: parse_column(&self.issue_type, "issue_type")?,
            status: self.status,
            priority: parse_column(&self.priority, "priority")?,
            assignee_id: self.assignee_id,
            reporter_id: self.reporter_id,
            sprint_id: self.sprint_id,
            story_points: self.story_points,
            labels: parse_json_column(&self.labels, "labels")?,
            position: self.position,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Trim, drop blanks and de-duplicate while keeping first-seen order.
fn normalize_labels(labels: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(labels.len());
    for label in labels {
        let label = label.trim().to_string();
        if !label.is_empty() && !out.contains(&label) {
            out.push(label);
        }
    }
    out
}

fn check_story_points(points: Option<i64>) -> TrackerResult<()> {
    match points {
        Some(p) if p < 0 => Err(TrackerError::validation("story_points must not be negative")),
        _ => Ok(()),
    }
}

/// Escape LIKE wildcards so user text matches literally.
fn like_pattern(text: &str) -> String {
    let escaped = text
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Build the WHERE clause and bound values for a filter.
fn filter_clause(filter: &IssueFilter) -> (String, Vec<Value>) {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(project_id) = filter.project_id {
        clauses.push("project_id = ?");
        values.push(project_id.into());
    }
    if let Some(status) = &filter.status {
        clauses.push("status = ?");
        values.push(status.clone().into());
    }
    if let Some(assignee_id) = filter.assignee_id {
        clauses.push("assignee_id = ?");
        values.push(assignee_id.into());
    }
    if let Some(sprint_id) = filter.sprint_id {
        clauses.push("sprint_id = ?");
        values.push(sprint_id.into());
    }
    if let Some(issue_type) = filter.issue_type {
        clauses.push("issue_type = ?");
        values.push(issue_type.as_str().to_string().into());
    }
    if let Some(priority) = filter.priority {
        clauses.push("priority = ?");
        values.push(priority.as_str().to_string().into());
    }
    if let Some(label) = &filter.label {
        clauses.push("EXISTS (SELECT 1 FROM json_each(issues.labels) WHERE json_each.value = ?)");
        values.push(label.trim().to_string().into());
    }
    if let Some(q) = filter.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        clauses.push(
            "(LOWER(key) LIKE ? ESCAPE '\\' OR LOWER(summary) LIKE ? ESCAPE '\\' \
             OR LOWER(description) LIKE ? ESCAPE '\\')",
        );
        let pattern = like_pattern(q);
        for _ in 0..3 {
            values.push(pattern.clone().into());
        }
    }
    match filter.backlog {
        Some(true) => clauses.push("sprint_id IS NULL"),
        Some(false) => clauses.push("sprint_id IS NOT NULL"),
        None => {}
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}

impl TrackerDb {
    // ── Issue CRUD ────────────────────────────────────────────────────

    /// Create an issue. The per-project key counter is bumped in the same
    /// transaction as the insert, so keys are never handed out twice.
    pub fn create_issue(&self, new: NewIssue, reporter_id: Option<i64>) -> TrackerResult<Issue> {
        let summary = require_non_empty(&new.summary, "summary")?;
        if self.get_project(new.project_id)?.is_none() {
            return Err(TrackerError::validation(format!(
                "Project {} does not exist",
                new.project_id
            )));
        }
        if let Some(assignee) = new.assignee_id {
            self.ensure_user_exists(assignee)?;
        }
        if let Some(sprint_id) = new.sprint_id {
            self.ensure_sprint_usable(sprint_id, new.project_id)?;
        }
        check_story_points(new.story_points)?;
        let labels = to_json(&normalize_labels(new.labels.unwrap_or_default()))?;
        let wf = self.require_workflow(new.project_id)?;
        let status = workflow::initial_status(&wf).to_string();

        let id = self.atomic(|tx| {
            tx.execute(
                "UPDATE projects SET issue_seq = issue_seq + 1 WHERE id = ?1",
                params![new.project_id],
            )?;
            let (project_key, seq): (String, i64) = tx.query_row(
                "SELECT key, issue_seq FROM projects WHERE id = ?1",
                params![new.project_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let position: i64 = tx.query_row(
                "SELECT COALESCE(MAX(position), -1) + 1 FROM issues WHERE project_id = ?1 AND status = ?2",
                params![new.project_id, status],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT INTO issues (key, project_id, summary, description, issue_type, status, priority,
                                     assignee_id, reporter_id, sprint_id, story_points, labels, position)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    format!("{}-{}", project_key, seq),
                    new.project_id,
                    summary,
                    new.description.unwrap_or_default(),
                    new.issue_type.unwrap_or_default().as_str(),
                    status,
                    new.priority.unwrap_or_default().as_str(),
                    new.assignee_id,
                    reporter_id,
                    new.sprint_id,
                    new.story_points,
                    labels,
                    position,
                ],
            )?;
            let id = tx.last_insert_rowid();
            Ok(id)
        })?;

        self.get_issue(id)?
            .ok_or_else(|| TrackerError::not_found("Issue", id))
    }

    /// Issues matching `filter` in insertion order, plus the unpaginated match count.
    pub fn list_issues(&self, filter: &IssueFilter, page: Page) -> TrackerResult<(Vec<Issue>, usize)> {
        let (clause, values) = filter_clause(filter);

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM issues{}", clause),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        // SQLite treats a negative LIMIT as unbounded.
        let limit = page.limit.map_or(-1, |l| l.clamp(0, MAX_PAGE_SIZE));
        let offset = page.offset.unwrap_or(0).max(0);
        let mut values = values;
        values.push(limit.into());
        values.push(offset.into());

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM issues{} ORDER BY id LIMIT ? OFFSET ?",
            ISSUE_COLUMNS, clause
        ))?;
        let rows = stmt.query_map(params_from_iter(values.iter()), IssueRow::from_row)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?.into_issue()?);
        }
        Ok((issues, total as usize))
    }

    pub fn get_issue(&self, id: i64) -> TrackerResult<Option<Issue>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM issues WHERE id = ?1", ISSUE_COLUMNS),
                params![id],
                IssueRow::from_row,
            )
            .optional()?;
        row.map(IssueRow::into_issue).transpose()
    }

    pub fn get_issue_by_key(&self, key: &str) -> TrackerResult<Option<Issue>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM issues WHERE key = ?1", ISSUE_COLUMNS),
                params![key.trim().to_uppercase()],
                IssueRow::from_row,
            )
            .optional()?;
        row.map(IssueRow::into_issue).transpose()
    }

    pub(crate) fn require_issue(&self, id: i64) -> TrackerResult<Issue> {
        self.get_issue(id)?
            .ok_or_else(|| TrackerError::not_found("Issue", id))
    }

    /// Issue with its assignee, reporter and comments resolved.
    pub fn get_issue_detail(&self, id: i64) -> TrackerResult<Option<IssueDetail>> {
        let Some(issue) = self.get_issue(id)? else {
            return Ok(None);
        };
        let summary = |user_id: Option<i64>| -> TrackerResult<Option<UserSummary>> {
            Ok(match user_id {
                Some(uid) => self.get_user(uid)?.as_ref().map(UserSummary::from),
                None => None,
            })
        };
        let assignee = summary(issue.assignee_id)?;
        let reporter = summary(issue.reporter_id)?;
        let comments = self.list_comments(id)?;
        Ok(Some(IssueDetail {
            issue,
            assignee,
            reporter,
            comments,
        }))
    }

    pub fn update_issue(&self, id: i64, patch: IssuePatch) -> TrackerResult<Option<Issue>> {
        let Some(current) = self.get_issue(id)? else {
            return Ok(None);
        };

        let summary = match patch.summary {
            Some(s) => require_non_empty(&s, "summary")?,
            None => current.summary.clone(),
        };
        let assignee_id = match patch.assignee_id {
            Some(Some(uid)) => {
                self.ensure_user_exists(uid)?;
                Some(uid)
            }
            Some(None) => None,
            None => current.assignee_id,
        };
        let sprint_id = match patch.sprint_id {
            Some(Some(sid)) if Some(sid) != current.sprint_id => {
                self.ensure_sprint_usable(sid, current.project_id)?;
                Some(sid)
            }
            Some(other) => other,
            None => current.sprint_id,
        };
        let story_points = patch.story_points.unwrap_or(current.story_points);
        check_story_points(story_points)?;
        let labels = patch
            .labels
            .map(normalize_labels)
            .unwrap_or_else(|| current.labels.clone());

        let mut position = current.position;
        let status = match patch.status {
            Some(status) if status != current.status => {
                let wf = self.require_workflow(current.project_id)?;
                workflow::check_transition(&wf, &current.status, &status)?;
                position = self.conn.query_row(
                    "SELECT COALESCE(MAX(position), -1) + 1 FROM issues WHERE project_id = ?1 AND status = ?2",
                    params![current.project_id, status],
                    |row| row.get(0),
                )?;
                status
            }
            _ => current.status.clone(),
        };

        self.atomic(|tx| {
            tx.execute(
                "UPDATE issues SET summary = ?1, description = ?2, issue_type = ?3, priority = ?4,
                        status = ?5, assignee_id = ?6, sprint_id = ?7, story_points = ?8, labels = ?9,
                        position = ?10, updated_at = datetime('now')
                 WHERE id = ?11",
                params![
                    summary,
                    patch.description.unwrap_or(current.description),
                    patch.issue_type.unwrap_or(current.issue_type).as_str(),
                    patch.priority.unwrap_or(current.priority).as_str(),
                    status,
                    assignee_id,
                    sprint_id,
                    story_points,
                    to_json(&labels)?,
                    position,
                    id,
                ],
            )?;
            if status != current.status {
                renumber_column(tx, current.project_id, &current.status)?;
            }
            Ok(())
        })?;
        self.get_issue(id)
    }

    /// Move an issue on the board: change its status (subject to the
    /// workflow) and place it at `position` within the target column.
    /// Both affected columns are renumbered densely from 0.
    pub fn move_issue(&self, id: i64, mv: IssueMove) -> TrackerResult<Option<Issue>> {
        let Some(current) = self.get_issue(id)? else {
            return Ok(None);
        };
        let wf = self.require_workflow(current.project_id)?;
        workflow::check_transition(&wf, &current.status, &mv.status)?;

        self.atomic(|tx| {
            let mut target: Vec<i64> = column_ids(tx, current.project_id, &mv.status)?
                .into_iter()
                .filter(|other| *other != id)
                .collect();
            let index = mv.position.clamp(0, target.len() as i64) as usize;
            target.insert(index, id);

            tx.execute(
                "UPDATE issues SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![mv.status, id],
            )?;
            assign_positions(tx, &target)?;
            if mv.status != current.status {
                renumber_column(tx, current.project_id, &current.status)?;
            }
            Ok(())
        })?;
        self.get_issue(id)
    }

    pub fn delete_issue(&self, id: i64) -> TrackerResult<bool> {
        let Some(current) = self.get_issue(id)? else {
            return Ok(false);
        };
        self.atomic(|tx| {
            tx.execute("DELETE FROM issues WHERE id = ?1", params![id])?;
            renumber_column(tx, current.project_id, &current.status)
        })?;
        Ok(true)
    }

    /// A sprint can take issues if it belongs to the project and is not completed.
    fn ensure_sprint_usable(&self, sprint_id: i64, project_id: i64) -> TrackerResult<()> {
        let sprint = self.get_sprint(sprint_id)?.ok_or_else(|| {
            TrackerError::validation(format!("Sprint {} does not exist", sprint_id))
        })?;
        if sprint.project_id != project_id {
            return Err(TrackerError::validation(format!(
                "Sprint {} belongs to a different project",
                sprint_id
            )));
        }
        if sprint.status == SprintStatus::Completed {
            return Err(TrackerError::validation(format!(
                "Sprint {} is already completed",
                sprint_id
            )));
        }
        Ok(())
    }
}

/// Issue ids of one board column in display order.
pub(super) fn column_ids(tx: &Connection, project_id: i64, status: &str) -> TrackerResult<Vec<i64>> {
    let mut stmt = tx.prepare(
        "SELECT id FROM issues WHERE project_id = ?1 AND status = ?2 ORDER BY position, id",
    )?;
    let ids = stmt
        .query_map(params![project_id, status], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

/// Give `ids` the positions 0, 1, 2... in order.
pub(super) fn assign_positions(tx: &Connection, ids: &[i64]) -> TrackerResult<()> {
    let mut stmt = tx.prepare("UPDATE issues SET position = ?1 WHERE id = ?2")?;
    for (pos, issue_id) in ids.iter().enumerate() {
        stmt.execute(params![pos as i64, issue_id])?;
    }
    Ok(())
}

/// Close any gaps left in a column after an issue leaves it.
pub(super) fn renumber_column(tx: &Connection, project_id: i64, status: &str) -> TrackerResult<()> {
    let ids = column_ids(tx, project_id, status)?;
    assign_positions(tx, &ids)
}

#[cfg(test)]
mod tests {
    use super::super::test_support;
    use super::super::{NewComment, NewSprint};
    use super::*;
    use kartavya_common::models::Role;

    #[test]
    fn test_create_issue_assigns_sequential_keys() -> TrackerResult<()> {
        let db = test_support::db();
        let reporter = test_support::user(&db, "rep@example.com", Role::Developer);
        let project = test_support::project(&db, "KAR");

        let first = db.create_issue(
            NewIssue {
                project_id: project.id,
                summary: "Fix login".into(),
                description: Some("Crashes on submit".into()),
                issue_type: Some(IssueType::Bug),
                labels: Some(vec![" auth ".into(), "auth".into(), "".into()]),
                ..Default::default()
            },
            Some(reporter.id),
        )?;
        let second = test_support::issue(&db, project.id, "Second");

        assert_eq!(first.key, "KAR-1");
        assert_eq!(second.key, "KAR-2");
        assert_eq!(first.status, "todo");
        assert_eq!(first.issue_type, IssueType::Bug);
        assert_eq!(first.priority, Priority::Medium);
        assert_eq!(first.reporter_id, Some(reporter.id));
        assert_eq!(first.labels, vec!["auth"]);
        assert_eq!(first.position, 0);
        assert_eq!(second.position, 1);
        Ok(())
    }

    #[test]
    fn test_issue_keys_not_reused_after_delete() -> TrackerResult<()> {
        let db = test_support::db();
        let project = test_support::project(&db, "KAR");
        let first = test_support::issue(&db, project.id, "One");
        assert!(db.delete_issue(first.id)?);
        let next = test_support::issue(&db, project.id, "Two");
        assert_eq!(next.key, "KAR-2");
        assert!(db.get_issue_by_key("kar-2")?.is_some());
        Ok(())
    }

    #[test]
    fn test_create_issue_validation() {
        let db = test_support::db();
        let project = test_support::project(&db, "KAR");
        let other = test_support::project(&db, "OTH");
        let foreign_sprint = db
            .create_sprint(NewSprint {
                project_id: other.id,
                name: "Other sprint".into(),
                goal: None,
                start_date: None,
                end_date: None,
            })
            .unwrap();

        let cases = [
            NewIssue {
                project_id: project.id,
                summary: "   ".into(),
                ..Default::default()
            },
            NewIssue {
                project_id: 999,
                summary: "Orphan".into(),
                ..Default::default()
            },
            NewIssue {
                project_id: project.id,
                summary: "Ghost assignee".into(),
                assignee_id: Some(77),
                ..Default::default()
            },
            NewIssue {
                project_id: project.id,
                summary: "Wrong sprint".into(),
                sprint_id: Some(foreign_sprint.id),
                ..Default::default()
            },
            NewIssue {
                project_id: project.id,
                summary: "Negative".into(),
                story_points: Some(-3),
                ..Default::default()
            },
        ];
        for case in cases {
            let summary = case.summary.clone();
            let err = db.create_issue(case, None).unwrap_err();
            assert!(matches!(err, TrackerError::Validation(_)), "{}", summary);
        }
    }

    #[test]
    fn test_fetch_returns_created_fields() -> TrackerResult<()> {
        let db = test_support::db();
        let project = test_support::project(&db, "KAR");
        let created = test_support::issue(&db, project.id, "Round trip");
        let fetched = db.get_issue(created.id)?.expect("issue exists");
        assert_eq!(fetched, created);
        assert!(db.get_issue(created.id + 100)?.is_none());
        Ok(())
    }

    #[test]
    fn test_update_issue_merges_only_provided_fields() -> TrackerResult<()> {
        let db = test_support::db();
        let dev = test_support::user(&db, "dev@example.com", Role::Developer);
        let project = test_support::project(&db, "KAR");
        let issue = db.create_issue(
            NewIssue {
                project_id: project.id,
                summary: "Original".into(),
                description: Some("Keep me".into()),
                assignee_id: Some(dev.id),
                story_points: Some(3),
                ..Default::default()
            },
            None,
        )?;

        let updated = db
            .update_issue(
                issue.id,
                IssuePatch {
                    summary: Some("Renamed".into()),
                    priority: Some(Priority::Critical),
                    ..Default::default()
                },
            )?
            .expect("issue exists");
        assert_eq!(updated.summary, "Renamed");
        assert_eq!(updated.priority, Priority::Critical);
        assert_eq!(updated.description, "Keep me");
        assert_eq!(updated.assignee_id, Some(dev.id));
        assert_eq!(updated.story_points, Some(3));

        let cleared = db
            .update_issue(
                issue.id,
                IssuePatch {
                    assignee_id: Some(None),
                    story_points: Some(None),
                    ..Default::default()
                },
            )?
            .expect("issue exists");
        assert_eq!(cleared.assignee_id, None);
        assert_eq!(cleared.story_points, None);

        assert!(db.update_issue(12345, IssuePatch::default())?.is_none());
        Ok(())
    }

    #[test]
    fn test_update_issue_enforces_workflow() -> TrackerResult<()> {
        let db = test_support::db();
        let project = test_support::project(&db, "KAR");
        let issue = test_support::issue(&db, project.id, "Flow");

        let err = db
            .update_issue(
                issue.id,
                IssuePatch {
                    status: Some("in_review".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, TrackerError::InvalidTransition { .. }));

        let moved = db
            .update_issue(
                issue.id,
                IssuePatch {
                    status: Some("in_progress".into()),
                    ..Default::default()
                },
            )?
            .expect("issue exists");
        assert_eq!(moved.status, "in_progress");
        Ok(())
    }

    #[test]
    fn test_list_issues_filters() -> TrackerResult<()> {
        let db = test_support::db();
        let dev = test_support::user(&db, "dev@example.com", Role::Developer);
        let a = test_support::project(&db, "AAA");
        let b = test_support::project(&db, "BBB");
        db.create_issue(
            NewIssue {
                project_id: a.id,
                summary: "Payment 100% broken".into(),
                issue_type: Some(IssueType::Bug),
                assignee_id: Some(dev.id),
                labels: Some(vec!["billing".into()]),
                ..Default::default()
            },
            None,
        )?;
        test_support::issue(&db, a.id, "Write docs");
        test_support::issue(&db, b.id, "Other project");

        let by_project = IssueFilter {
            project_id: Some(a.id),
            ..Default::default()
        };
        let (issues, total) = db.list_issues(&by_project, Page::default())?;
        assert_eq!(total, 2);
        assert_eq!(issues[0].summary, "Payment 100% broken");

        let cases = [
            (IssueFilter { issue_type: Some(IssueType::Bug), ..Default::default() }, 1),
            (IssueFilter { assignee_id: Some(dev.id), ..Default::default() }, 1),
            (IssueFilter { label: Some("billing".into()), ..Default::default() }, 1),
            (IssueFilter { q: Some("DOCS".into()), ..Default::default() }, 1),
            (IssueFilter { q: Some("100%".into()), ..Default::default() }, 1),
            (IssueFilter { q: Some("bbb-1".into()), ..Default::default() }, 1),
            (IssueFilter { q: Some("%".into()), project_id: Some(b.id), ..Default::default() }, 0),
            (IssueFilter { backlog: Some(true), ..Default::default() }, 3),
            (IssueFilter { status: Some("done".into()), ..Default::default() }, 0),
        ];
        for (filter, expected) in cases {
            let (_, total) = db.list_issues(&filter, Page::default())?;
            assert_eq!(total, expected, "{:?}", filter);
        }
        Ok(())
    }

    #[test]
    fn test_list_issues_pagination_reports_full_total() -> TrackerResult<()> {
        let db = test_support::db();
        let project = test_support::project(&db, "PAG");
        for n in 0..5 {
            test_support::issue(&db, project.id, &format!("Issue {}", n));
        }
        let (page, total) = db.list_issues(
            &IssueFilter::default(),
            Page {
                limit: Some(2),
                offset: Some(2),
            },
        )?;
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].summary, "Issue 2");
        Ok(())
    }

    #[test]
    fn test_move_issue_reorders_columns() -> TrackerResult<()> {
        let db = test_support::db();
        let project = test_support::project(&db, "MOV");
        let a = test_support::issue(&db, project.id, "A");
        let b = test_support::issue(&db, project.id, "B");
        let c = test_support::issue(&db, project.id, "C");

        // Reorder within the same column: C to the top.
        db.move_issue(
            c.id,
            IssueMove {
                status: "todo".into(),
                position: 0,
            },
        )?;
        let positions: Vec<(i64, i64)> = [a.id, b.id, c.id]
            .iter()
            .map(|id| (*id, db.get_issue(*id).unwrap().unwrap().position))
            .collect();
        assert_eq!(positions, vec![(a.id, 1), (b.id, 2), (c.id, 0)]);

        // Move A to in_progress; the todo column closes the gap.
        let moved = db
            .move_issue(
                a.id,
                IssueMove {
                    status: "in_progress".into(),
                    position: 10,
                },
            )?
            .expect("issue exists");
        assert_eq!(moved.status, "in_progress");
        assert_eq!(moved.position, 0);
        assert_eq!(db.get_issue(b.id)?.unwrap().position, 1);

        let err = db
            .move_issue(
                b.id,
                IssueMove {
                    status: "in_review".into(),
                    position: 0,
                },
            )
            .unwrap_err();
        assert!(matches!(err, TrackerError::InvalidTransition { .. }));
        Ok(())
    }

    fn column(db: &TrackerDb, project_id: i64, status: &str) -> Vec<(i64, i64)> {
        let filter = IssueFilter {
            project_id: Some(project_id),
            status: Some(status.into()),
            ..Default::default()
        };
        let (mut issues, _) = db.list_issues(&filter, Page::default()).unwrap();
        issues.sort_by_key(|i| (i.position, i.id));
        issues.iter().map(|i| (i.id, i.position)).collect()
    }

    #[test]
    fn test_status_change_and_delete_keep_columns_dense() -> TrackerResult<()> {
        let db = test_support::db();
        let project = test_support::project(&db, "DNS");
        let a = test_support::issue(&db, project.id, "A");
        let b = test_support::issue(&db, project.id, "B");
        let c = test_support::issue(&db, project.id, "C");
        let d = test_support::issue(&db, project.id, "D");

        db.update_issue(
            a.id,
            IssuePatch {
                status: Some("in_progress".into()),
                ..Default::default()
            },
        )?;
        assert_eq!(column(&db, project.id, "todo"), vec![(b.id, 0), (c.id, 1), (d.id, 2)]);
        assert_eq!(column(&db, project.id, "in_progress"), vec![(a.id, 0)]);

        assert!(db.delete_issue(c.id)?);
        assert_eq!(column(&db, project.id, "todo"), vec![(b.id, 0), (d.id, 1)]);
        assert!(!db.delete_issue(c.id)?);
        Ok(())
    }

    #[test]
    fn test_delete_issue_cascades_comments() -> TrackerResult<()> {
        let db = test_support::db();
        let project = test_support::project(&db, "DEL");
        let issue = test_support::issue(&db, project.id, "With comments");
        let comment = db.create_comment(NewComment {
            issue_id: issue.id,
            author_id: None,
            content: "hello".into(),
        })?;

        assert!(db.delete_issue(issue.id)?);
        assert!(db.get_comment(comment.id)?.is_none());
        assert!(!db.delete_issue(issue.id)?);
        Ok(())
    }

    #[test]
    fn test_issue_detail_resolves_users() -> TrackerResult<()> {
        let db = test_support::db();
        let dev = test_support::user(&db, "dev@example.com", Role::Developer);
        let project = test_support::project(&db, "DET");
        let issue = db.create_issue(
            NewIssue {
                project_id: project.id,
                summary: "Detail".into(),
                assignee_id: Some(dev.id),
                ..Default::default()
            },
            Some(dev.id),
        )?;
        db.create_comment(NewComment {
            issue_id: issue.id,
            author_id: Some(dev.id),
            content: "Looking".into(),
        })?;

        let detail = db.get_issue_detail(issue.id)?.expect("issue exists");
        assert_eq!(detail.assignee.as_ref().map(|u| u.id), Some(dev.id));
        assert_eq!(detail.reporter.as_ref().map(|u| u.email.as_str()), Some("dev@example.com"));
        assert_eq!(detail.comments.len(), 1);
        assert!(db.get_issue_detail(999)?.is_none());
        Ok(())
    }
}
