//! Request lifecycle state (C11): a single `status` column mutated by many
//! independent processes, guarded by an explicit transition function rather
//! than a type-state machine — there is no single in-process owner of a
//! request's lifetime, so the phantom-type pattern does not fit here.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain_types::RequestId;
use crate::error::StateTransitionError;

/// A request's persisted status, matching spec §3's lifecycle:
/// `received → routing → splitting → classifying → extracting →
/// consolidating → completed`, with terminal alternates `failed` and
/// `sla_breached`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Ingress has persisted the request row; the workflow router has not
    /// yet run.
    Received,
    /// The workflow router is resolving the first stage and SLA deadline.
    Routing,
    /// The splitter is writing pages and the classification aggregation
    /// row.
    Splitting,
    /// Pages are being OCR'd and classified.
    Classifying,
    /// Documents are being extracted.
    Extracting,
    /// The consolidator is assembling the final result.
    Consolidating,
    /// Terminal: the consolidator has produced `result_payload`.
    Completed,
    /// Terminal: a stage gave up permanently.
    Failed,
    /// Terminal: the SLA monitor observed `deadline_utc <= now` before
    /// completion.
    SlaBreached,
}

impl RequestStatus {
    /// Terminal statuses never transition further, with the sole exception
    /// of the SLA monitor's breach override from a *non-terminal* status
    /// (the override itself is to a terminal status, so once any terminal
    /// status is reached it is final).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Failed | RequestStatus::SlaBreached
        )
    }

    fn ordinal(self) -> u8 {
        match self {
            RequestStatus::Received => 0,
            RequestStatus::Routing => 1,
            RequestStatus::Splitting => 2,
            RequestStatus::Classifying => 3,
            RequestStatus::Extracting => 4,
            RequestStatus::Consolidating => 5,
            RequestStatus::Completed
            | RequestStatus::Failed
            | RequestStatus::SlaBreached => 6,
        }
    }
}

/// Validate and perform a requested status transition for `request_id`,
/// enforcing the monotonicity invariant from spec §3. Returns the new
/// status to persist, or an error the caller should surface (and must not
/// write to storage) if the transition is illegal.
///
/// `to = SlaBreached` is accepted from any non-terminal `from`, matching
/// the SLA monitor's carve-out; every other transition must strictly
/// advance the normal-path ordinal, or move from any non-terminal status
/// into `Failed`.
pub fn transition_to(
    request_id: RequestId,
    from: RequestStatus,
    to: RequestStatus,
) -> Result<RequestStatus, StateTransitionError> {
    if from.is_terminal() {
        warn!(
            %request_id,
            ?from,
            ?to,
            "rejected transition out of a terminal request status"
        );
        return Err(StateTransitionError::IllegalTransition { request_id, from, to });
    }

    let legal = match to {
        RequestStatus::SlaBreached | RequestStatus::Failed => true,
        _ => to.ordinal() > from.ordinal(),
    };

    if !legal {
        warn!(%request_id, ?from, ?to, "rejected illegal request status transition");
        return Err(StateTransitionError::IllegalTransition { request_id, from, to });
    }

    Ok(to)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid() -> RequestId {
        RequestId::generate()
    }

    #[test]
    fn normal_path_advances_monotonically() {
        let id = rid();
        let status = transition_to(id, RequestStatus::Received, RequestStatus::Routing).unwrap();
        assert_eq!(status, RequestStatus::Routing);
    }

    #[test]
    fn cannot_skip_backwards() {
        let id = rid();
        let result = transition_to(id, RequestStatus::Extracting, RequestStatus::Splitting);
        assert!(result.is_err());
    }

    #[test]
    fn sla_breach_overrides_any_non_terminal_status() {
        let id = rid();
        let result = transition_to(id, RequestStatus::Classifying, RequestStatus::SlaBreached);
        assert_eq!(result.unwrap(), RequestStatus::SlaBreached);
    }

    #[test]
    fn terminal_status_never_reverts() {
        let id = rid();
        let result = transition_to(id, RequestStatus::Completed, RequestStatus::Routing);
        assert!(result.is_err());

        let result = transition_to(id, RequestStatus::SlaBreached, RequestStatus::Completed);
        assert!(result.is_err());
    }
}
