use std::collections::BTreeMap;

use kartavya_common::models::{
    BoardColumn, BoardView, IssueFilter, Project, ProjectReport, Transition, Workflow,
};
use rusqlite::{OptionalExtension, Row, params};
use serde::Deserialize;

use super::issues::{assign_positions, column_ids};
use super::{
    Page, TrackerDb, double_option, parse_json_column, require_non_empty, to_json,
};
use crate::errors::{TrackerError, TrackerResult};
use crate::tracker::workflow;

const PROJECT_COLUMNS: &str = "id, name, key, description, lead_id, created_at, updated_at";

#[derive(Debug, Deserialize)]
pub struct NewProject {
    pub name: String,
    pub key: String,
    pub description: Option<String>,
    pub lead_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub lead_id: Option<Option<i64>>,
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        key: row.get(2)?,
        description: row.get(3)?,
        lead_id: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Project keys are 2-10 uppercase ASCII letters or digits, starting with a letter.
pub fn normalize_project_key(key: &str) -> TrackerResult<String> {
    let key = key.trim().to_uppercase();
    let valid = (2..=10).contains(&key.len())
        && key.starts_with(|c: char| c.is_ascii_uppercase())
        && key.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
    if !valid {
        return Err(TrackerError::validation(format!(
            "Invalid project key '{}': use 2-10 letters or digits, starting with a letter",
            key
        )));
    }
    Ok(key)
}

impl TrackerDb {
    // ── Project CRUD ──────────────────────────────────────────────────

    /// Insert the project and its default workflow atomically.
    pub fn create_project(&self, new: NewProject) -> TrackerResult<Project> {
        let name = require_non_empty(&new.name, "name")?;
        let key = normalize_project_key(&new.key)?;
        if self.get_project_by_key(&key)?.is_some() {
            return Err(TrackerError::Conflict(format!(
                "Project key {} is already in use",
                key
            )));
        }
        if let Some(lead_id) = new.lead_id {
            self.ensure_user_exists(lead_id)?;
        }

        let id = self.atomic(|tx| {
            tx.execute(
                "INSERT INTO projects (name, key, description, lead_id) VALUES (?1, ?2, ?3, ?4)",
                params![
                    name,
                    key,
                    new.description.unwrap_or_default().trim(),
                    new.lead_id
                ],
            )?;
            let id = tx.last_insert_rowid();
            let wf = workflow::default_workflow(id);
            tx.execute(
                "INSERT INTO workflows (project_id, statuses, transitions) VALUES (?1, ?2, ?3)",
                params![id, to_json(&wf.statuses)?, to_json(&wf.transitions)?],
            )?;
            Ok(id)
        })?;

        self.get_project(id)?
            .ok_or_else(|| TrackerError::not_found("Project", id))
    }

    pub fn list_projects(&self) -> TrackerResult<Vec<Project>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM projects ORDER BY id", PROJECT_COLUMNS))?;
        let rows = stmt.query_map([], project_from_row)?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row?);
        }
        Ok(projects)
    }

    pub fn get_project(&self, id: i64) -> TrackerResult<Option<Project>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLUMNS),
                params![id],
                project_from_row,
            )
            .optional()?)
    }

    pub fn get_project_by_key(&self, key: &str) -> TrackerResult<Option<Project>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} FROM projects WHERE key = ?1", PROJECT_COLUMNS),
                params![key.trim().to_uppercase()],
                project_from_row,
            )
            .optional()?)
    }

    pub fn update_project(&self, id: i64, patch: ProjectPatch) -> TrackerResult<Option<Project>> {
        let Some(current) = self.get_project(id)? else {
            return Ok(None);
        };
        let name = match patch.name {
            Some(n) => require_non_empty(&n, "name")?,
            None => current.name,
        };
        let description = patch
            .description
            .map(|d| d.trim().to_string())
            .unwrap_or(current.description);
        let lead_id = match patch.lead_id {
            Some(Some(lead)) => {
                self.ensure_user_exists(lead)?;
                Some(lead)
            }
            Some(None) => None,
            None => current.lead_id,
        };

        self.conn.execute(
            "UPDATE projects SET name = ?1, description = ?2, lead_id = ?3, updated_at = datetime('now')
             WHERE id = ?4",
            params![name, description, lead_id, id],
        )?;
        self.get_project(id)
    }

    /// Removes the project with its issues, sprints and workflow.
    pub fn delete_project(&self, id: i64) -> TrackerResult<bool> {
        let count = self
            .conn
            .execute("DELETE FROM projects WHERE id = ?1", params![id])?;
        Ok(count > 0)
    }

    pub(crate) fn require_project(&self, id: i64) -> TrackerResult<Project> {
        self.get_project(id)?
            .ok_or_else(|| TrackerError::not_found("Project", id))
    }

    pub(crate) fn ensure_user_exists(&self, id: i64) -> TrackerResult<()> {
        if self.get_user(id)?.is_none() {
            return Err(TrackerError::validation(format!("User {} does not exist", id)));
        }
        Ok(())
    }

    // ── Workflow ──────────────────────────────────────────────────────

    pub fn get_workflow(&self, project_id: i64) -> TrackerResult<Option<Workflow>> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT statuses, transitions FROM workflows WHERE project_id = ?1",
                params![project_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((statuses, transitions)) => Ok(Some(Workflow {
                project_id,
                statuses: parse_json_column(&statuses, "statuses")?,
                transitions: parse_json_column::<Vec<Transition>>(&transitions, "transitions")?,
            })),
            None => {
                // Projects always get a workflow on creation; fall back for safety.
                Ok(self
                    .get_project(project_id)?
                    .map(|_| workflow::default_workflow(project_id)))
            }
        }
    }

    pub(crate) fn require_workflow(&self, project_id: i64) -> TrackerResult<Workflow> {
        self.get_workflow(project_id)?
            .ok_or_else(|| TrackerError::not_found("Project", project_id))
    }

    /// Replace a project's workflow. Issues in a status that no longer
    /// exists are moved to the first status. Returns the stored workflow
    /// and the number of issues remapped.
    pub fn set_workflow(
        &self,
        project_id: i64,
        statuses: Vec<String>,
        transitions: Vec<Transition>,
    ) -> TrackerResult<(Workflow, usize)> {
        self.require_project(project_id)?;
        let wf = workflow::validate(Workflow {
            project_id,
            statuses,
            transitions,
        })?;

        let remapped = self.atomic(|tx| {
            tx.execute(
                "INSERT INTO workflows (project_id, statuses, transitions, updated_at)
                 VALUES (?1, ?2, ?3, datetime('now'))
                 ON CONFLICT(project_id) DO UPDATE SET
                    statuses = excluded.statuses,
                    transitions = excluded.transitions,
                    updated_at = excluded.updated_at",
                params![project_id, to_json(&wf.statuses)?, to_json(&wf.transitions)?],
            )?;

            // Orphaned issues join the end of the initial column in board order.
            let initial = workflow::initial_status(&wf).to_string();
            let placeholders = vec!["?"; wf.statuses.len()].join(", ");
            let mut values: Vec<rusqlite::types::Value> = vec![project_id.into()];
            values.extend(wf.statuses.iter().cloned().map(Into::into));
            let orphaned = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT id FROM issues WHERE project_id = ? AND status NOT IN ({})
                     ORDER BY position, id",
                    placeholders
                ))?;
                stmt.query_map(rusqlite::params_from_iter(values.iter()), |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<i64>>>()?
            };
            if orphaned.is_empty() {
                return Ok(0);
            }

            let mut column = column_ids(tx, project_id, &initial)?;
            for issue_id in &orphaned {
                tx.execute(
                    "UPDATE issues SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
                    params![initial, issue_id],
                )?;
            }
            column.extend(&orphaned);
            assign_positions(tx, &column)?;
            Ok(orphaned.len())
        })?;

        Ok((wf, remapped))
    }

    // ── Board & report ────────────────────────────────────────────────

    /// One column per workflow status, issues ordered by position.
    pub fn get_board(&self, project_id: i64, sprint_id: Option<i64>) -> TrackerResult<BoardView> {
        let project = self.require_project(project_id)?;
        let wf = self.require_workflow(project_id)?;
        let filter = IssueFilter {
            project_id: Some(project_id),
            sprint_id,
            ..Default::default()
        };
        let (mut issues, _) = self.list_issues(&filter, Page::default())?;
        issues.sort_by_key(|i| (i.position, i.id));

        let columns = wf
            .statuses
            .iter()
            .map(|status| BoardColumn {
                status: status.clone(),
                issues: issues
                    .iter()
                    .filter(|i| &i.status == status)
                    .cloned()
                    .collect(),
            })
            .collect();

        Ok(BoardView {
            project,
            sprint_id,
            columns,
        })
    }

    pub fn project_report(&self, project_id: i64) -> TrackerResult<ProjectReport> {
        self.require_project(project_id)?;
        let wf = self.require_workflow(project_id)?;
        let done = workflow::done_status(&wf);
        let filter = IssueFilter {
            project_id: Some(project_id),
            ..Default::default()
        };
        let (issues, total) = self.list_issues(&filter, Page::default())?;

        let mut by_status: BTreeMap<String, usize> =
            wf.statuses.iter().map(|s| (s.clone(), 0)).collect();
        let mut by_type = BTreeMap::new();
        let mut by_priority = BTreeMap::new();
        let mut report = ProjectReport {
            project_id,
            total,
            ..Default::default()
        };
        for issue in &issues {
            *by_status.entry(issue.status.clone()).or_insert(0) += 1;
            *by_type.entry(issue.issue_type.as_str().to_string()).or_insert(0) += 1;
            *by_priority
                .entry(issue.priority.as_str().to_string())
                .or_insert(0) += 1;
            if issue.assignee_id.is_none() {
                report.unassigned += 1;
            }
            let points = issue.story_points.unwrap_or(0);
            report.story_points_total += points;
            if issue.status == done {
                report.story_points_completed += points;
            }
        }
        report.by_status = by_status;
        report.by_type = by_type;
        report.by_priority = by_priority;
        Ok(report)
    }
}
