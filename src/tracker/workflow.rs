//! Project workflows: the ordered status list and the allowed transitions
//! between statuses.

use std::collections::HashSet;

use kartavya_common::models::{Transition, Workflow};

use crate::errors::{TrackerError, TrackerResult};

pub const DEFAULT_STATUSES: [&str; 4] = ["todo", "in_progress", "in_review", "done"];

const DEFAULT_TRANSITIONS: [(&str, &str); 7] = [
    ("todo", "in_progress"),
    ("todo", "done"),
    ("in_progress", "todo"),
    ("in_progress", "in_review"),
    ("in_review", "in_progress"),
    ("in_review", "done"),
    ("done", "todo"),
];

pub fn default_workflow(project_id: i64) -> Workflow {
    Workflow {
        project_id,
        statuses: DEFAULT_STATUSES.iter().map(|s| s.to_string()).collect(),
        transitions: DEFAULT_TRANSITIONS
            .iter()
            .map(|(from, to)| Transition {
                from: from.to_string(),
                to: to.to_string(),
            })
            .collect(),
    }
}

/// Check a workflow definition and return it with statuses trimmed.
///
/// Rejects: an empty status list, blank or duplicate (case-insensitive)
/// statuses, transitions whose endpoints are not listed statuses, self
/// transitions, and duplicate transitions.
pub fn validate(mut workflow: Workflow) -> TrackerResult<Workflow> {
    if workflow.statuses.is_empty() {
        return Err(TrackerError::validation(
            "Workflow must define at least one status",
        ));
    }

    let mut seen = HashSet::new();
    for status in &mut workflow.statuses {
        *status = status.trim().to_string();
        if status.is_empty() {
            return Err(TrackerError::validation("Workflow statuses must not be blank"));
        }
        if !seen.insert(status.to_lowercase()) {
            return Err(TrackerError::validation(format!(
                "Duplicate workflow status: {}",
                status
            )));
        }
    }

    let mut seen_transitions = HashSet::new();
    for transition in &mut workflow.transitions {
        transition.from = transition.from.trim().to_string();
        transition.to = transition.to.trim().to_string();
        for endpoint in [&transition.from, &transition.to] {
            if !workflow.statuses.contains(endpoint) {
                return Err(TrackerError::validation(format!(
                    "Transition references unknown status: {}",
                    endpoint
                )));
            }
        }
        if transition.from == transition.to {
            return Err(TrackerError::validation(format!(
                "Transition from '{}' to itself is not allowed",
                transition.from
            )));
        }
        if !seen_transitions.insert(transition.clone()) {
            return Err(TrackerError::validation(format!(
                "Duplicate transition: {} -> {}",
                transition.from, transition.to
            )));
        }
    }

    Ok(workflow)
}

/// Status assigned to newly created issues.
pub fn initial_status(workflow: &Workflow) -> &str {
    workflow
        .statuses
        .first()
        .map(String::as_str)
        .unwrap_or(DEFAULT_STATUSES[0])
}

/// The status that counts as "completed" for reports and sprint closing.
pub fn done_status(workflow: &Workflow) -> &str {
    workflow
        .statuses
        .last()
        .map(String::as_str)
        .unwrap_or(DEFAULT_STATUSES[3])
}

/// Staying in place is always allowed.
pub fn transition_allowed(workflow: &Workflow, from: &str, to: &str) -> bool {
    from == to
        || workflow
            .transitions
            .iter()
            .any(|t| t.from == from && t.to == to)
}

/// Validate that `to` is a known status reachable from `from`.
pub fn check_transition(workflow: &Workflow, from: &str, to: &str) -> TrackerResult<()> {
    if !workflow.statuses.iter().any(|s| s == to) {
        return Err(TrackerError::validation(format!("Unknown status: {}", to)));
    }
    if !transition_allowed(workflow, from, to) {
        return Err(TrackerError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wf(statuses: &[&str], transitions: &[(&str, &str)]) -> Workflow {
        Workflow {
            project_id: 1,
            statuses: statuses.iter().map(|s| s.to_string()).collect(),
            transitions: transitions
                .iter()
                .map(|(f, t)| Transition {
                    from: f.to_string(),
                    to: t.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_default_workflow_is_valid() {
        let workflow = validate(default_workflow(1)).unwrap();
        assert_eq!(initial_status(&workflow), "todo");
        assert_eq!(done_status(&workflow), "done");
        assert!(transition_allowed(&workflow, "todo", "in_progress"));
        assert!(!transition_allowed(&workflow, "todo", "in_review"));
    }

    #[test]
    fn test_validate_trims_statuses() {
        let workflow = validate(wf(&[" open ", "closed"], &[("open", "closed")])).unwrap();
        assert_eq!(workflow.statuses, vec!["open", "closed"]);
    }

    #[test]
    fn test_validate_rejects_bad_definitions() {
        let cases = [
            wf(&[], &[]),
            wf(&["open", " "], &[]),
            wf(&["open", "Open"], &[]),
            wf(&["open", "closed"], &[("open", "archived")]),
            wf(&["open", "closed"], &[("open", "open")]),
            wf(&["open", "closed"], &[("open", "closed"), ("open", "closed")]),
        ];
        for case in cases {
            let err = validate(case.clone()).unwrap_err();
            assert!(matches!(err, TrackerError::Validation(_)), "{:?}", case);
        }
    }

    #[test]
    fn test_check_transition() {
        let workflow = default_workflow(1);
        assert!(check_transition(&workflow, "todo", "todo").is_ok());
        assert!(check_transition(&workflow, "in_review", "done").is_ok());
        assert!(matches!(
            check_transition(&workflow, "todo", "in_review"),
            Err(TrackerError::InvalidTransition { .. })
        ));
        assert!(matches!(
            check_transition(&workflow, "todo", "blocked"),
            Err(TrackerError::Validation(_))
        ));
    }
}
