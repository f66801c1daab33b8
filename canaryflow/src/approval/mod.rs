//! Manual approval gate between the canary and production stages.
//!
//! A run registers an [`ApprovalRequest`] and waits on a oneshot channel until
//! an approver calls [`ApprovalGate::approve`] / [`ApprovalGate::reject`], or
//! an operator calls [`ApprovalGate::abort`]. Requests are keyed by run id.

use crate::core::ApprovalDecision;
use crate::utils::{now_utc, Timestamp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A pending approval, as shown to approvers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// The suspended run.
    pub run_id: Uuid,
    /// Approval action name.
    pub action_name: String,
    /// Image running on the canary.
    pub image: String,
    /// When the run reached the gate.
    pub requested_at: Timestamp,
}

/// How a wait at the gate ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// An approver recorded a decision.
    Decided {
        /// The decision.
        decision: ApprovalDecision,
        /// Who decided.
        actor: Option<String>,
    },
    /// An operator aborted the run.
    Aborted {
        /// Reason given by the operator.
        reason: String,
    },
    /// The timeout elapsed without a decision.
    TimedOut,
}

#[derive(Debug)]
enum GateSignal {
    Decision {
        decision: ApprovalDecision,
        actor: Option<String>,
    },
    Abort {
        reason: String,
    },
}

#[derive(Debug)]
struct PendingApproval {
    request: ApprovalRequest,
    ticket: u64,
    response_tx: oneshot::Sender<GateSignal>,
}

/// Gate holding the runs currently waiting for approval.
#[derive(Default)]
pub struct ApprovalGate {
    pending: RwLock<HashMap<Uuid, PendingApproval>>,
    next_ticket: AtomicU64,
    registered: Notify,
}

/// Removes a waiter's own entry when its wait ends or is dropped.
struct Registration<'a> {
    gate: &'a ApprovalGate,
    run_id: Uuid,
    ticket: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut pending = self.gate.pending.write();
        if pending
            .get(&self.run_id)
            .is_some_and(|p| p.ticket == self.ticket)
        {
            pending.remove(&self.run_id);
            debug!(run_id = %self.run_id, "Approval request withdrawn");
        }
    }
}

impl ApprovalGate {
    /// Creates an empty gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `request` and waits for its outcome.
    ///
    /// `timeout` of `None` waits indefinitely. A second request for the same
    /// run replaces the first, whose waiter then resolves as aborted. If the
    /// returned future is dropped before an outcome, the request is withdrawn.
    pub async fn wait(&self, request: ApprovalRequest, timeout: Option<Duration>) -> ApprovalOutcome {
        let run_id = request.run_id;
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let previous = self.pending.write().insert(
                run_id,
                PendingApproval {
                    request,
                    ticket,
                    response_tx: tx,
                },
            );
            if previous.is_some() {
                warn!(run_id = %run_id, "Replaced an existing approval request");
            }
        }
        let _registration = Registration {
            gate: self,
            run_id,
            ticket,
        };
        self.registered.notify_waiters();
        info!(run_id = %run_id, timeout = ?timeout, "Waiting for approval");

        let received = match timeout {
            Some(limit) => tokio::time::timeout(limit, rx).await.ok(),
            None => Some(rx.await),
        };

        match received {
            Some(Ok(GateSignal::Decision { decision, actor })) => {
                ApprovalOutcome::Decided { decision, actor }
            }
            Some(Ok(GateSignal::Abort { reason })) => ApprovalOutcome::Aborted { reason },
            Some(Err(_)) => {
                // Sender dropped without a decision: the request was replaced.
                ApprovalOutcome::Aborted {
                    reason: "approval request superseded".to_string(),
                }
            }
            None => ApprovalOutcome::TimedOut,
        }
    }

    /// Approves a pending run. Returns false if the run is not waiting.
    pub fn approve(&self, run_id: Uuid, actor: Option<&str>) -> bool {
        self.decide(run_id, ApprovalDecision::Approve, actor)
    }

    /// Rejects a pending run. Returns false if the run is not waiting.
    pub fn reject(&self, run_id: Uuid, actor: Option<&str>) -> bool {
        self.decide(run_id, ApprovalDecision::Reject, actor)
    }

    /// Records a decision for a pending run.
    pub fn decide(&self, run_id: Uuid, decision: ApprovalDecision, actor: Option<&str>) -> bool {
        let sent = self.send(
            run_id,
            GateSignal::Decision {
                decision,
                actor: actor.map(str::to_string),
            },
        );
        if sent {
            info!(run_id = %run_id, %decision, actor = ?actor, "Approval decided");
        }
        sent
    }

    /// Aborts a pending run. Returns false if the run is not waiting.
    pub fn abort(&self, run_id: Uuid, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let sent = self.send(run_id, GateSignal::Abort { reason: reason.clone() });
        if sent {
            warn!(run_id = %run_id, reason = %reason, "Run aborted at approval gate");
        }
        sent
    }

    fn send(&self, run_id: Uuid, signal: GateSignal) -> bool {
        match self.pending.write().remove(&run_id) {
            Some(pending) => pending.response_tx.send(signal).is_ok(),
            None => false,
        }
    }

    /// Returns true if the run is waiting at the gate.
    #[must_use]
    pub fn is_pending(&self, run_id: Uuid) -> bool {
        self.pending.read().contains_key(&run_id)
    }

    /// Returns the number of waiting runs.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.read().len()
    }

    /// Lists the waiting requests, oldest first.
    #[must_use]
    pub fn pending_requests(&self) -> Vec<ApprovalRequest> {
        let mut requests: Vec<_> = self
            .pending
            .read()
            .values()
            .map(|p| p.request.clone())
            .collect();
        requests.sort_by_key(|r| r.requested_at);
        requests
    }

    /// Resolves once `run_id` is waiting at the gate.
    pub async fn wait_until_pending(&self, run_id: Uuid) {
        loop {
            let notified = self.registered.notified();
            if self.is_pending(run_id) {
                return;
            }
            notified.await;
        }
    }

    /// Resolves with the oldest waiting request once any run is at the gate.
    pub async fn next_pending(&self) -> ApprovalRequest {
        loop {
            let notified = self.registered.notified();
            if let Some(request) = self.pending_requests().into_iter().next() {
                return request;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for ApprovalGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalGate")
            .field("pending_count", &self.pending_count())
            .finish()
    }
}

impl ApprovalRequest {
    /// Creates a request for a run reaching the gate now.
    #[must_use]
    pub fn new(run_id: Uuid, action_name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            run_id,
            action_name: action_name.into(),
            image: image.into(),
            requested_at: now_utc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    fn request(run_id: Uuid) -> ApprovalRequest {
        ApprovalRequest::new(run_id, "ApproveDeployment", "repo/app:abc123")
    }

    #[tokio::test]
    async fn test_approval_approved() {
        let gate = Arc::new(ApprovalGate::new());
        let run_id = Uuid::new_v4();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait(request(run_id), None).await })
        };

        gate.wait_until_pending(run_id).await;
        assert_eq!(gate.pending_requests()[0].image, "repo/app:abc123");
        assert!(gate.approve(run_id, Some("alice")));

        let outcome = waiter.await.unwrap();
        assert_eq!(
            outcome,
            ApprovalOutcome::Decided {
                decision: ApprovalDecision::Approve,
                actor: Some("alice".to_string()),
            }
        );
        assert_eq!(gate.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_approval_rejected() {
        let gate = Arc::new(ApprovalGate::new());
        let run_id = Uuid::new_v4();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait(request(run_id), None).await })
        };

        gate.wait_until_pending(run_id).await;
        assert!(gate.reject(run_id, None));

        assert_eq!(
            waiter.await.unwrap(),
            ApprovalOutcome::Decided {
                decision: ApprovalDecision::Reject,
                actor: None,
            }
        );
    }

    #[tokio::test]
    async fn test_abort() {
        let gate = Arc::new(ApprovalGate::new());
        let run_id = Uuid::new_v4();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait(request(run_id), None).await })
        };

        gate.wait_until_pending(run_id).await;
        assert!(gate.abort(run_id, "bad canary metrics"));

        assert_eq!(
            waiter.await.unwrap(),
            ApprovalOutcome::Aborted {
                reason: "bad canary metrics".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_approval_timeout() {
        let gate = ApprovalGate::new();
        let run_id = Uuid::new_v4();

        let outcome = gate
            .wait(request(run_id), Some(Duration::from_millis(20)))
            .await;

        assert_eq!(outcome, ApprovalOutcome::TimedOut);
        assert!(!gate.is_pending(run_id));
    }

    #[test]
    fn test_decisions_for_unknown_runs_are_ignored() {
        let gate = ApprovalGate::new();
        let run_id = Uuid::new_v4();

        assert!(!gate.approve(run_id, None));
        assert!(!gate.reject(run_id, None));
        assert!(!gate.abort(run_id, "nothing to abort"));
    }

    #[tokio::test]
    async fn test_replaced_request_resolves_as_aborted() {
        let gate = Arc::new(ApprovalGate::new());
        let run_id = Uuid::new_v4();

        let first = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait(request(run_id), None).await })
        };
        gate.wait_until_pending(run_id).await;

        let second = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait(request(run_id), None).await })
        };

        assert!(matches!(first.await.unwrap(), ApprovalOutcome::Aborted { .. }));

        gate.wait_until_pending(run_id).await;
        assert!(gate.approve(run_id, None));
        assert!(matches!(
            second.await.unwrap(),
            ApprovalOutcome::Decided {
                decision: ApprovalDecision::Approve,
                ..
            }
        ));
    }

    #[test]
    fn test_decision_wakes_waiter() {
        let gate = ApprovalGate::new();
        let run_id = Uuid::new_v4();

        let mut waiter = task::spawn(gate.wait(request(run_id), None));
        assert_pending!(waiter.poll());
        assert!(gate.is_pending(run_id));

        assert!(gate.approve(run_id, Some("alice")));
        assert!(waiter.is_woken());
        assert_ready_eq!(
            waiter.poll(),
            ApprovalOutcome::Decided {
                decision: ApprovalDecision::Approve,
                actor: Some("alice".to_string()),
            }
        );
    }

    #[test]
    fn test_dropped_wait_withdraws_request() {
        let gate = ApprovalGate::new();
        let run_id = Uuid::new_v4();

        let mut waiter = task::spawn(gate.wait(request(run_id), None));
        assert_pending!(waiter.poll());
        assert_eq!(gate.pending_count(), 1);

        drop(waiter);

        assert_eq!(gate.pending_count(), 0);
        assert!(gate.pending_requests().is_empty());
        assert!(!gate.approve(run_id, None));
    }

    #[test]
    fn test_dropped_replaced_wait_keeps_new_request() {
        let gate = ApprovalGate::new();
        let run_id = Uuid::new_v4();

        let mut first = task::spawn(gate.wait(request(run_id), None));
        assert_pending!(first.poll());
        let mut second = task::spawn(gate.wait(request(run_id), None));
        assert_pending!(second.poll());

        drop(first);

        assert!(gate.is_pending(run_id));
        assert!(gate.reject(run_id, None));
        assert_ready_eq!(
            second.poll(),
            ApprovalOutcome::Decided {
                decision: ApprovalDecision::Reject,
                actor: None,
            }
        );
    }
}
