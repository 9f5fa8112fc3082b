//! Revision chains.
//!
//! A chain is every submission sharing one `original_id`; members are
//! ordered by `revision_number`, which starts at 0 and grows by exactly one
//! per resubmission. Functions here take the chain as a slice so they can
//! run against whatever the store returned.

use serde::{Deserialize, Serialize};

use super::{AreaId, NewSubmission, Submission};
use crate::error::{WorkflowError, WorkflowResult};

/// Highest revision number in the chain, 0 when only the root exists.
pub fn latest_version_number(chain: &[Submission]) -> i32 {
    chain
        .iter()
        .map(|s| s.revision_number)
        .max()
        .unwrap_or(0)
}

pub fn is_latest_version(submission: &Submission, chain: &[Submission]) -> bool {
    submission.revision_number == latest_version_number(chain)
}

pub fn previous_revision<'a>(
    submission: &Submission,
    chain: &'a [Submission],
) -> Option<&'a Submission> {
    if submission.is_original() {
        return None;
    }
    chain.iter().find(|s| {
        s.original_id == submission.original_id
            && s.revision_number == submission.revision_number - 1
    })
}

/// Earlier versions, oldest first.
pub fn previous_versions<'a>(
    submission: &Submission,
    chain: &'a [Submission],
) -> Vec<&'a Submission> {
    let mut versions: Vec<&Submission> = chain
        .iter()
        .filter(|s| {
            s.original_id == submission.original_id
                && s.revision_number < submission.revision_number
        })
        .collect();
    versions.sort_by_key(|s| s.revision_number);
    versions
}

/// Author-supplied overrides for a resubmission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RevisionRequest {
    pub title: Option<String>,
    pub area: Option<AreaId>,
}

/// Builds the fields for the next version of `predecessor`.
///
/// Only the latest version of a chain may be revised, and only after a
/// decision inviting revisions.
pub fn prepare_revision(
    predecessor: &Submission,
    chain: &[Submission],
    request: RevisionRequest,
) -> WorkflowResult<NewSubmission> {
    if !is_latest_version(predecessor, chain) {
        return Err(WorkflowError::Validation(
            "only the latest version of a submission can be revised".to_string(),
        ));
    }
    if predecessor.withdrawn {
        return Err(WorkflowError::Validation(
            "submission has been withdrawn".to_string(),
        ));
    }
    if !predecessor.decision.invites_revision() {
        return Err(WorkflowError::Validation(format!(
            "decision {} does not invite a revision",
            predecessor.decision.as_str()
        )));
    }

    let new = NewSubmission {
        title: request.title.unwrap_or_else(|| predecessor.title.clone()),
        author: predecessor.author,
        area: request.area.unwrap_or(predecessor.area),
    };
    new.validate()?;
    Ok(new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Decision;
    use crate::test_utils::submission;
    use proptest::prelude::*;

    fn chain_of(len: i32) -> Vec<Submission> {
        (0..len)
            .map(|n| {
                let mut s = submission(100 + i64::from(n));
                s.original_id = 100;
                s.revision_number = n;
                s
            })
            .collect()
    }

    #[test]
    fn root_only_chain() {
        let chain = chain_of(1);
        assert_eq!(latest_version_number(&chain), 0);
        assert!(is_latest_version(&chain[0], &chain));
        assert!(previous_revision(&chain[0], &chain).is_none());
        assert!(previous_versions(&chain[0], &chain).is_empty());
    }

    #[test]
    fn previous_revision_is_one_step_back() {
        let chain = chain_of(4);
        let prev = previous_revision(&chain[3], &chain).unwrap();
        assert_eq!(prev.revision_number, 2);
        let history: Vec<i32> = previous_versions(&chain[3], &chain)
            .iter()
            .map(|s| s.revision_number)
            .collect();
        assert_eq!(history, vec![0, 1, 2]);
    }

    #[test]
    fn revision_requires_inviting_decision() {
        let mut chain = chain_of(2);
        let err = prepare_revision(&chain[1], &chain, RevisionRequest::default()).unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));

        chain[1].decision = Decision::MajorRevisions;
        let new = prepare_revision(&chain[1], &chain, RevisionRequest::default()).unwrap();
        assert_eq!(new.title, chain[1].title);

        chain[0].decision = Decision::MajorRevisions;
        assert!(prepare_revision(&chain[0], &chain, RevisionRequest::default()).is_err());
    }

    #[test]
    fn revision_overrides_are_validated() {
        let mut chain = chain_of(1);
        chain[0].decision = Decision::MinorRevisions;
        let request = RevisionRequest {
            title: Some(String::new()),
            area: Some(9),
        };
        assert!(prepare_revision(&chain[0], &chain, request).is_err());
    }

    proptest! {
        #[test]
        fn exactly_one_latest_member(len in 1i32..12) {
            let chain = chain_of(len);
            let latest: Vec<_> = chain.iter().filter(|s| is_latest_version(s, &chain)).collect();
            prop_assert_eq!(latest.len(), 1);
            prop_assert_eq!(latest_version_number(&chain), len - 1);
        }
    }
}
