//! Candidate ranking stages.
//!
//! Each stage picks the candidates worth verifying at that priority level.
//! The finder walks the stages in order and stops at the first candidate
//! that verifies.

use std::collections::HashSet;

use crate::types::ProcessCandidate;
use crate::workspace::{classify, WorkspaceMatch};

/// Maximum parent hops walked by the ancestry stage
pub const MAX_ANCESTRY_DEPTH: usize = 3;

/// Ranking stages, strongest signal first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// `--workspace_id` equals one of our workspace identifiers
    WorkspaceId,
    /// Parent PID is our PID
    DirectChild,
    /// Parent PID is our parent PID
    Sibling,
    /// Our PID appears among the candidate's ancestors
    Ancestry,
    /// Everything not yet tried and not in another workspace
    Remaining,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::WorkspaceId,
        Stage::DirectChild,
        Stage::Sibling,
        Stage::Ancestry,
        Stage::Remaining,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Stage::WorkspaceId => "workspace id",
            Stage::DirectChild => "direct child",
            Stage::Sibling => "sibling",
            Stage::Ancestry => "ancestry",
            Stage::Remaining => "remaining",
        }
    }
}

/// Who we are, for parent/child relations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub pid: u32,
    /// `None` when the OS offers no cheap lookup; resolved on demand
    pub ppid: Option<u32>,
}

impl ProcessIdentity {
    pub fn current() -> Self {
        #[cfg(unix)]
        let ppid = Some(std::os::unix::process::parent_id());
        #[cfg(not(unix))]
        let ppid = None;

        Self {
            pid: std::process::id(),
            ppid,
        }
    }
}

/// Indices of untried candidates selected by a synchronous stage.
///
/// [`Stage::Ancestry`] needs parent lookups and is driven by the finder;
/// here it selects the candidates eligible for the walk.
pub fn select(
    stage: Stage,
    candidates: &[ProcessCandidate],
    expected: &[String],
    me: &ProcessIdentity,
    tried: &HashSet<u32>,
) -> Vec<usize> {
    candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| !tried.contains(&c.pid))
        .filter(|(_, c)| {
            let workspace = classify(c.workspace_id.as_deref(), expected);
            match stage {
                Stage::WorkspaceId => workspace == WorkspaceMatch::Exact,
                Stage::DirectChild => c.ppid == Some(me.pid),
                Stage::Sibling => me.ppid.is_some() && c.ppid == me.ppid,
                Stage::Ancestry | Stage::Remaining => workspace != WorkspaceMatch::Mismatch,
            }
        })
        .map(|(i, _)| i)
        .collect()
}

/// Untried candidates that belong to another workspace
pub fn mismatched(
    candidates: &[ProcessCandidate],
    expected: &[String],
    tried: &HashSet<u32>,
) -> Vec<u32> {
    candidates
        .iter()
        .filter(|c| !tried.contains(&c.pid))
        .filter(|c| classify(c.workspace_id.as_deref(), expected) == WorkspaceMatch::Mismatch)
        .map(|c| c.pid)
        .collect()
}

/// Whether a PID is a plausible parent to keep walking from
pub fn is_walkable(pid: u32) -> bool {
    pid > 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(pid: u32, ppid: Option<u32>, workspace_id: Option<&str>) -> ProcessCandidate {
        ProcessCandidate {
            pid,
            ppid,
            extension_port: 0,
            csrf_token: format!("t{}", pid),
            workspace_id: workspace_id.map(String::from),
            app_data_dir: None,
        }
    }

    fn me() -> ProcessIdentity {
        ProcessIdentity {
            pid: 500,
            ppid: Some(400),
        }
    }

    #[test]
    fn test_stage_selection() {
        let candidates = vec![
            candidate(1, Some(900), None),
            candidate(2, Some(500), None),
            candidate(3, Some(400), Some("file_elsewhere")),
            candidate(4, Some(900), Some("file_home_me_proj")),
            candidate(5, Some(900), Some("file_home_me-proj")),
        ];
        let expected = vec!["file_home_me_proj".to_string()];
        let tried = HashSet::new();

        let pick = |stage| select(stage, &candidates, &expected, &me(), &tried);
        assert_eq!(pick(Stage::WorkspaceId), vec![3]);
        assert_eq!(pick(Stage::DirectChild), vec![1]);
        assert_eq!(pick(Stage::Sibling), vec![2]);
        // Mismatching workspace is never walked or tried last; loose matches are
        assert_eq!(pick(Stage::Remaining), vec![0, 1, 3, 4]);
        assert_eq!(mismatched(&candidates, &expected, &tried), vec![3]);
    }

    #[test]
    fn test_tried_candidates_are_not_selected_again() {
        let candidates = vec![candidate(1, Some(500), None), candidate(2, Some(500), None)];
        let tried = HashSet::from([1]);
        assert_eq!(
            select(Stage::DirectChild, &candidates, &[], &me(), &tried),
            vec![1]
        );
    }

    #[test]
    fn test_unknown_parent_is_never_a_sibling() {
        let candidates = vec![candidate(1, None, None)];
        let me = ProcessIdentity { pid: 500, ppid: None };
        assert!(select(Stage::Sibling, &candidates, &[], &me, &HashSet::new()).is_empty());
    }

    #[test]
    fn test_no_workspace_open_matches_nothing_exactly() {
        let candidates = vec![candidate(1, None, Some("file_x"))];
        let tried = HashSet::new();
        assert!(select(Stage::WorkspaceId, &candidates, &[], &me(), &tried).is_empty());
        assert_eq!(select(Stage::Remaining, &candidates, &[], &me(), &tried), vec![0]);
    }
}
