use gcb_ci_core::models::{Conclusion, RepoStatus};

pub const INTERNAL_ERROR: &str = "Internal Server Error.Check your CI server logs for details.";
pub const NOT_MERGEABLE: &str = "Changes can not be merged.";
pub const CONFIG_NOT_FOUND: &str = "Build configuration file not found.";
pub const PULL_REQUEST_NOT_FOUND: &str = "Pull request details not found";
pub const REPO_NOT_TRACKED: &str = "Repository is not tracked for integration";

/// Why a check run is being terminated early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// Decide from the pipeline outcome.
    Pipeline,
    /// Unexpected failure; the pipeline outcome is irrelevant.
    Forced,
    /// Something the check run depends on does not exist.
    NotFound(&'static str),
}

/// Conclusion and summary for an aborted check run, most specific known cause first.
pub fn abort_outcome(status: &RepoStatus, reason: &AbortReason) -> (Conclusion, &'static str) {
    match reason {
        AbortReason::Forced => return (Conclusion::Failure, INTERNAL_ERROR),
        AbortReason::NotFound(message) => return (Conclusion::ActionRequired, *message),
        AbortReason::Pipeline => {}
    }
    if !status.fetched {
        (Conclusion::Failure, INTERNAL_ERROR)
    } else if !status.merged {
        (Conclusion::ActionRequired, NOT_MERGEABLE)
    } else if status.yaml_found
        && (status.step_lines.is_empty() || !status.tar_created || !status.uploaded || !status.triggered)
    {
        (Conclusion::Failure, INTERNAL_ERROR)
    } else {
        (Conclusion::ActionRequired, CONFIG_NOT_FOUND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(flags: [bool; 6]) -> RepoStatus {
        let [fetched, merged, yaml_found, steps, tar_created, uploaded] = flags;
        RepoStatus {
            fetched,
            merged,
            yaml_found,
            step_lines: if steps { vec![1] } else { vec![] },
            tar_created,
            uploaded,
            ..Default::default()
        }
    }

    #[test]
    fn test_precedence() {
        let cases = [
            ([false, false, false, false, false, false], Conclusion::Failure, INTERNAL_ERROR),
            ([true, false, false, false, false, false], Conclusion::ActionRequired, NOT_MERGEABLE),
            ([true, true, false, false, false, false], Conclusion::ActionRequired, CONFIG_NOT_FOUND),
            ([true, true, true, false, false, false], Conclusion::Failure, INTERNAL_ERROR),
            ([true, true, true, true, false, false], Conclusion::Failure, INTERNAL_ERROR),
            ([true, true, true, true, true, false], Conclusion::Failure, INTERNAL_ERROR),
            // Uploaded but never triggered.
            ([true, true, true, true, true, true], Conclusion::Failure, INTERNAL_ERROR),
        ];
        for (flags, conclusion, message) in cases {
            assert_eq!(abort_outcome(&status(flags), &AbortReason::Pipeline), (conclusion, message), "{flags:?}");
        }
    }

    #[test]
    fn test_forced_and_not_found_override_flags() {
        let merged = status([true, true, false, false, false, false]);
        assert_eq!(abort_outcome(&merged, &AbortReason::Forced), (Conclusion::Failure, INTERNAL_ERROR));
        assert_eq!(
            abort_outcome(&RepoStatus::default(), &AbortReason::NotFound(REPO_NOT_TRACKED)),
            (Conclusion::ActionRequired, REPO_NOT_TRACKED)
        );
    }
}
