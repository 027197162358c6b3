use chrono::{NaiveDate, Utc};
use kartavya_common::models::{IssueFilter, Sprint, SprintReport, SprintStatus};
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, params, params_from_iter};
use serde::Deserialize;

use super::{Page, TrackerDb, double_option, parse_column, require_non_empty};
use crate::errors::{TrackerError, TrackerResult};
use crate::tracker::workflow;

const SPRINT_COLUMNS: &str = "id, project_id, name, goal, status, start_date, end_date, created_at";
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Deserialize)]
pub struct NewSprint {
    pub project_id: i64,
    pub name: String,
    pub goal: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SprintPatch {
    pub name: Option<String>,
    pub goal: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub start_date: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub end_date: Option<Option<String>>,
}

/// Where unfinished issues go when a sprint closes. `None` means the backlog.
#[derive(Debug, Default, Deserialize)]
pub struct SprintCompletion {
    pub move_to_sprint_id: Option<i64>,
}

struct SprintRow {
    id: i64,
    project_id: i64,
    name: String,
    goal: String,
    status: String,
    start_date: Option<String>,
    end_date: Option<String>,
    created_at: String,
}

impl SprintRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            name: row.get(2)?,
            goal: row.get(3)?,
            status: row.get(4)?,
            start_date: row.get(5)?,
            end_date: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_sprint(self) -> TrackerResult<Sprint> {
        Ok(Sprint {
            id: self.id,
            project_id: self.project_id,
            name: self.name,
            goal: self.goal,
            status: parse_column(&self.status, "status")?,
            start_date: self.start_date,
            end_date: self.end_date,
            created_at: self.created_at,
        })
    }
}

fn parse_date(value: &str, field: &str) -> TrackerResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|_| {
        TrackerError::validation(format!("{} must be a YYYY-MM-DD date, got '{}'", field, value))
    })
}

/// Parse both optional dates and reject an end before the start.
fn check_dates(
    start: Option<&str>,
    end: Option<&str>,
) -> TrackerResult<(Option<String>, Option<String>)> {
    let start = start.map(|s| parse_date(s, "start_date")).transpose()?;
    let end = end.map(|e| parse_date(e, "end_date")).transpose()?;
    if let (Some(s), Some(e)) = (start, end) {
        if e < s {
            return Err(TrackerError::validation("end_date must not be before start_date"));
        }
    }
    Ok((
        start.map(|d| d.format(DATE_FORMAT).to_string()),
        end.map(|d| d.format(DATE_FORMAT).to_string()),
    ))
}

fn today() -> String {
    Utc::now().date_naive().format(DATE_FORMAT).to_string()
}

impl TrackerDb {
    // ── Sprint CRUD ───────────────────────────────────────────────────

    pub fn create_sprint(&self, new: NewSprint) -> TrackerResult<Sprint> {
        let name = require_non_empty(&new.name, "name")?;
        if self.get_project(new.project_id)?.is_none() {
            return Err(TrackerError::validation(format!(
                "Project {} does not exist",
                new.project_id
            )));
        }
        let (start_date, end_date) =
            check_dates(new.start_date.as_deref(), new.end_date.as_deref())?;

        self.conn.execute(
            "INSERT INTO sprints (project_id, name, goal, start_date, end_date)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                new.project_id,
                name,
                new.goal.unwrap_or_default().trim(),
                start_date,
                end_date
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.require_sprint(id)
    }

    pub fn list_sprints(
        &self,
        project_id: Option<i64>,
        status: Option<SprintStatus>,
    ) -> TrackerResult<Vec<Sprint>> {
        let mut clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(project_id) = project_id {
            clauses.push("project_id = ?");
            values.push(project_id.into());
        }
        if let Some(status) = status {
            clauses.push("status = ?");
            values.push(status.as_str().to_string().into());
        }
        let clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM sprints{} ORDER BY id",
            SPRINT_COLUMNS, clause
        ))?;
        let rows = stmt.query_map(params_from_iter(values.iter()), SprintRow::from_row)?;
        let mut sprints = Vec::new();
        for row in rows {
            sprints.push(row?.into_sprint()?);
        }
        Ok(sprints)
    }

    pub fn get_sprint(&self, id: i64) -> TrackerResult<Option<Sprint>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM sprints WHERE id = ?1", SPRINT_COLUMNS),
                params![id],
                SprintRow::from_row,
            )
            .optional()?;
        row.map(SprintRow::into_sprint).transpose()
    }

    fn require_sprint(&self, id: i64) -> TrackerResult<Sprint> {
        self.get_sprint(id)?
            .ok_or_else(|| TrackerError::not_found("Sprint", id))
    }

    pub fn update_sprint(&self, id: i64, patch: SprintPatch) -> TrackerResult<Option<Sprint>> {
        let Some(current) = self.get_sprint(id)? else {
            return Ok(None);
        };
        let name = match patch.name {
            Some(n) => require_non_empty(&n, "name")?,
            None => current.name,
        };
        let goal = patch
            .goal
            .map(|g| g.trim().to_string())
            .unwrap_or(current.goal);
        let start = patch.start_date.unwrap_or(current.start_date);
        let end = patch.end_date.unwrap_or(current.end_date);
        let (start_date, end_date) = check_dates(start.as_deref(), end.as_deref())?;

        self.conn.execute(
            "UPDATE sprints SET name = ?1, goal = ?2, start_date = ?3, end_date = ?4 WHERE id = ?5",
            params![name, goal, start_date, end_date, id],
        )?;
        self.get_sprint(id)
    }

    /// Issues in the sprint fall back to the backlog.
    pub fn delete_sprint(&self, id: i64) -> TrackerResult<bool> {
        let count = self.atomic(|tx| {
            tx.execute(
                "UPDATE issues SET sprint_id = NULL, updated_at = datetime('now') WHERE sprint_id = ?1",
                params![id],
            )?;
            let count = tx.execute("DELETE FROM sprints WHERE id = ?1", params![id])?;
            Ok(count)
        })?;
        Ok(count > 0)
    }

    // ── Lifecycle ─────────────────────────────────────────────────────

    /// Start a planned sprint. A project has at most one active sprint.
    pub fn start_sprint(&self, id: i64) -> TrackerResult<Sprint> {
        let sprint = self.require_sprint(id)?;
        if sprint.status != SprintStatus::Planned {
            return Err(TrackerError::validation(format!(
                "Only planned sprints can be started; sprint {} is {}",
                id,
                sprint.status.as_str()
            )));
        }
        let active = self.list_sprints(Some(sprint.project_id), Some(SprintStatus::Active))?;
        if let Some(other) = active.first() {
            return Err(TrackerError::Conflict(format!(
                "Sprint '{}' is already active in this project",
                other.name
            )));
        }

        let start_date = sprint.start_date.unwrap_or_else(today);
        check_dates(Some(&start_date), sprint.end_date.as_deref())?;
        self.conn.execute(
            "UPDATE sprints SET status = 'active', start_date = ?1 WHERE id = ?2",
            params![start_date, id],
        )?;
        self.require_sprint(id)
    }

    /// Close an active sprint. Issues not in the done status move to
    /// `move_to_sprint_id` (a planned sprint of the same project) or to the
    /// backlog. Returns the completed sprint and how many issues moved.
    pub fn complete_sprint(
        &self,
        id: i64,
        completion: SprintCompletion,
    ) -> TrackerResult<(Sprint, usize)> {
        let sprint = self.require_sprint(id)?;
        if sprint.status != SprintStatus::Active {
            return Err(TrackerError::validation(format!(
                "Only active sprints can be completed; sprint {} is {}",
                id,
                sprint.status.as_str()
            )));
        }
        if let Some(target_id) = completion.move_to_sprint_id {
            let target = self.get_sprint(target_id)?.ok_or_else(|| {
                TrackerError::validation(format!("Sprint {} does not exist", target_id))
            })?;
            if target.id == id
                || target.project_id != sprint.project_id
                || target.status != SprintStatus::Planned
            {
                return Err(TrackerError::validation(format!(
                    "Sprint {} is not a planned sprint of the same project",
                    target_id
                )));
            }
        }
        let end_date = sprint.end_date.clone().unwrap_or_else(today);
        check_dates(sprint.start_date.as_deref(), Some(&end_date))?;
        let wf = self.require_workflow(sprint.project_id)?;
        let done = workflow::done_status(&wf).to_string();

        let moved = self.atomic(|tx| {
            let moved = tx.execute(
                "UPDATE issues SET sprint_id = ?1, updated_at = datetime('now')
                 WHERE sprint_id = ?2 AND status != ?3",
                params![completion.move_to_sprint_id, id, done],
            )?;
            tx.execute(
                "UPDATE sprints SET status = 'completed', end_date = ?1 WHERE id = ?2",
                params![end_date, id],
            )?;
            Ok(moved)
        })?;

        Ok((self.require_sprint(id)?, moved))
    }

    pub fn sprint_report(&self, id: i64) -> TrackerResult<SprintReport> {
        let sprint = self.require_sprint(id)?;
        let wf = self.require_workflow(sprint.project_id)?;
        let done = workflow::done_status(&wf);
        let filter = IssueFilter {
            sprint_id: Some(id),
            ..Default::default()
        };
        let (issues, total) = self.list_issues(&filter, Page::default())?;

        let mut report = SprintReport {
            sprint_id: id,
            total,
            ..Default::default()
        };
        for issue in &issues {
            let points = issue.story_points.unwrap_or(0);
            report.story_points_total += points;
            if issue.status == done {
                report.completed += 1;
                report.story_points_completed += points;
            }
        }
        report.remaining = total - report.completed;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support;
    use super::super::{IssuePatch, NewIssue};
    use super::*;

    fn sprint(db: &TrackerDb, project_id: i64, name: &str) -> Sprint {
        db.create_sprint(NewSprint {
            project_id,
            name: name.into(),
            goal: None,
            start_date: None,
            end_date: None,
        })
        .unwrap()
    }

    fn issue_in(db: &TrackerDb, project_id: i64, sprint_id: i64, points: i64) -> i64 {
        db.create_issue(
            NewIssue {
                project_id,
                summary: format!("{} points", points),
                sprint_id: Some(sprint_id),
                story_points: Some(points),
                ..Default::default()
            },
            None,
        )
        .unwrap()
        .id
    }

    fn finish(db: &TrackerDb, issue_id: i64) {
        db.update_issue(
            issue_id,
            IssuePatch {
                status: Some("done".into()),
                ..Default::default()
            },
        )
        .unwrap();
    }

    #[test]
    fn test_create_sprint_defaults_to_planned() -> TrackerResult<()> {
        let db = test_support::db();
        let project = test_support::project(&db, "SPR");
        let created = db.create_sprint(NewSprint {
            project_id: project.id,
            name: "Sprint 1".into(),
            goal: Some("Ship it".into()),
            start_date: Some("2026-01-05".into()),
            end_date: Some("2026-01-19".into()),
        })?;
        assert_eq!(created.status, SprintStatus::Planned);
        assert_eq!(created.goal, "Ship it");
        assert_eq!(created.start_date.as_deref(), Some("2026-01-05"));
        Ok(())
    }

    #[test]
    fn test_sprint_date_validation() {
        let db = test_support::db();
        let project = test_support::project(&db, "SPR");
        for (start, end) in [("2026-13-01", "2026-12-01"), ("2026-02-10", "2026-02-01")] {
            let err = db
                .create_sprint(NewSprint {
                    project_id: project.id,
                    name: "Bad".into(),
                    goal: None,
                    start_date: Some(start.into()),
                    end_date: Some(end.into()),
                })
                .unwrap_err();
            assert!(matches!(err, TrackerError::Validation(_)), "{} {}", start, end);
        }
    }

    #[test]
    fn test_list_sprints_by_project_and_status() -> TrackerResult<()> {
        let db = test_support::db();
        let a = test_support::project(&db, "AAA");
        let b = test_support::project(&db, "BBB");
        let first = sprint(&db, a.id, "A1");
        sprint(&db, a.id, "A2");
        sprint(&db, b.id, "B1");
        db.start_sprint(first.id)?;

        assert_eq!(db.list_sprints(None, None)?.len(), 3);
        assert_eq!(db.list_sprints(Some(a.id), None)?.len(), 2);
        let active = db.list_sprints(Some(a.id), Some(SprintStatus::Active))?;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, first.id);
        Ok(())
    }

    #[test]
    fn test_update_sprint_clears_dates() -> TrackerResult<()> {
        let db = test_support::db();
        let project = test_support::project(&db, "SPR");
        let created = db.create_sprint(NewSprint {
            project_id: project.id,
            name: "Sprint".into(),
            goal: None,
            start_date: Some("2026-03-01".into()),
            end_date: None,
        })?;
        let updated = db
            .update_sprint(
                created.id,
                SprintPatch {
                    name: Some("Renamed".into()),
                    start_date: Some(None),
                    ..Default::default()
                },
            )?
            .expect("sprint exists");
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.start_date, None);
        assert!(db.update_sprint(999, SprintPatch::default())?.is_none());
        Ok(())
    }

    #[test]
    fn test_only_one_active_sprint_per_project() -> TrackerResult<()> {
        let db = test_support::db();
        let project = test_support::project(&db, "ONE");
        let first = sprint(&db, project.id, "First");
        let second = sprint(&db, project.id, "Second");

        let started = db.start_sprint(first.id)?;
        assert_eq!(started.status, SprintStatus::Active);
        assert!(started.start_date.is_some());

        let err = db.start_sprint(second.id).unwrap_err();
        assert!(matches!(err, TrackerError::Conflict(_)));
        let err = db.start_sprint(first.id).unwrap_err();
        assert!(matches!(err, TrackerError::Validation(_)));
        Ok(())
    }

    #[test]
    fn test_lifecycle_dates_stay_ordered() -> TrackerResult<()> {
        let db = test_support::db();
        let project = test_support::project(&db, "ORD");

        // Starting today would land after the planned end date.
        let overdue = db.create_sprint(NewSprint {
            project_id: project.id,
            name: "Overdue".into(),
            goal: None,
            start_date: None,
            end_date: Some("2020-01-01".into()),
        })?;
        let err = db.start_sprint(overdue.id).unwrap_err();
        assert!(matches!(err, TrackerError::Validation(_)));
        let unchanged = db.require_sprint(overdue.id)?;
        assert_eq!(unchanged.status, SprintStatus::Planned);
        assert_eq!(unchanged.start_date, None);

        // Completing today would land before a future start date.
        let future = db.create_sprint(NewSprint {
            project_id: project.id,
            name: "Future".into(),
            goal: None,
            start_date: Some("2099-01-01".into()),
            end_date: None,
        })?;
        db.start_sprint(future.id)?;
        let err = db
            .complete_sprint(future.id, SprintCompletion::default())
            .unwrap_err();
        assert!(matches!(err, TrackerError::Validation(_)));
        let still_active = db.require_sprint(future.id)?;
        assert_eq!(still_active.status, SprintStatus::Active);
        assert_eq!(still_active.end_date, None);
        Ok(())
    }

    #[test]
    fn test_complete_sprint_moves_unfinished_issues() -> TrackerResult<()> {
        let db = test_support::db();
        let project = test_support::project(&db, "CMP");
        let current = sprint(&db, project.id, "Current");
        let next = sprint(&db, project.id, "Next");
        let finished = issue_in(&db, project.id, current.id, 3);
        let open = issue_in(&db, project.id, current.id, 5);
        finish(&db, finished);

        let err = db
            .complete_sprint(current.id, SprintCompletion::default())
            .unwrap_err();
        assert!(matches!(err, TrackerError::Validation(_)), "planned sprint cannot complete");

        db.start_sprint(current.id)?;
        let (closed, moved) = db.complete_sprint(
            current.id,
            SprintCompletion {
                move_to_sprint_id: Some(next.id),
            },
        )?;
        assert_eq!(closed.status, SprintStatus::Completed);
        assert!(closed.end_date.is_some());
        assert_eq!(moved, 1);
        assert_eq!(db.get_issue(open)?.unwrap().sprint_id, Some(next.id));
        assert_eq!(db.get_issue(finished)?.unwrap().sprint_id, Some(current.id));

        // The completed sprint no longer blocks starting another one.
        db.start_sprint(next.id)?;
        Ok(())
    }

    #[test]
    fn test_complete_sprint_to_backlog_and_bad_target() -> TrackerResult<()> {
        let db = test_support::db();
        let project = test_support::project(&db, "BKL");
        let other = test_support::project(&db, "OTH");
        let current = sprint(&db, project.id, "Current");
        let foreign = sprint(&db, other.id, "Foreign");
        let open = issue_in(&db, project.id, current.id, 2);
        db.start_sprint(current.id)?;

        let err = db
            .complete_sprint(
                current.id,
                SprintCompletion {
                    move_to_sprint_id: Some(foreign.id),
                },
            )
            .unwrap_err();
        assert!(matches!(err, TrackerError::Validation(_)));

        let (_, moved) = db.complete_sprint(current.id, SprintCompletion::default())?;
        assert_eq!(moved, 1);
        assert_eq!(db.get_issue(open)?.unwrap().sprint_id, None);
        Ok(())
    }

    #[test]
    fn test_delete_sprint_returns_issues_to_backlog() -> TrackerResult<()> {
        let db = test_support::db();
        let project = test_support::project(&db, "DEL");
        let doomed = sprint(&db, project.id, "Doomed");
        let issue = issue_in(&db, project.id, doomed.id, 1);

        assert!(db.delete_sprint(doomed.id)?);
        assert_eq!(db.get_issue(issue)?.unwrap().sprint_id, None);
        assert!(!db.delete_sprint(doomed.id)?);
        Ok(())
    }

    #[test]
    fn test_sprint_report() -> TrackerResult<()> {
        let db = test_support::db();
        let project = test_support::project(&db, "REP");
        let current = sprint(&db, project.id, "Current");
        let done = issue_in(&db, project.id, current.id, 3);
        issue_in(&db, project.id, current.id, 5);
        finish(&db, done);

        let report = db.sprint_report(current.id)?;
        assert_eq!(
            report,
            SprintReport {
                sprint_id: current.id,
                total: 2,
                completed: 1,
                remaining: 1,
                story_points_total: 8,
                story_points_completed: 3,
            }
        );
        assert!(matches!(db.sprint_report(404), Err(TrackerError::NotFound { .. })));
        Ok(())
    }
}
