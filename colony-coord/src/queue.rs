//! Priority- and dependency-ordered work queue with exactly-once claiming.
//!
//! The queue hands each task to at most one agent. Claim ordering is
//! deterministic only with respect to `(priority, created_at)` at the instant
//! of claim; nothing is guaranteed across concurrent submissions. The queue
//! never resubmits failed work on its own - retry policy and backoff belong
//! to the caller (see [`colony_core::Task::next_attempt`]).

use std::collections::HashSet;
use std::sync::Arc;

use colony_core::{
    CallerContext, ColonyResult, CoordConfig, EntityId, Task, TaskStatus, Timestamp,
    ValidationError,
};
use colony_storage::{DurableStore, TaskFinishOutcome};
use tracing::debug;

use crate::notify::{ChangeFeed, CoordEvent};
use crate::permission::{ensure_permitted, operations, AllowAll, PermissionGate};

/// Error-message prefix marking an orchestrator-initiated cancellation.
///
/// Cancellation goes through the same terminal transition as any failure, so
/// this code is how a reader of `error_message` tells the two apart.
pub const CANCELLATION_CODE: &str = "cancelled-by-orchestrator";

/// Result of a claim attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The caller now owns this task.
    Claimed(Task),
    /// No pending task matches the caller's filter with all dependencies
    /// completed. A normal result; re-poll later.
    NoWorkAvailable,
}

/// Parameters for submitting one task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSubmission {
    pub task_type: String,
    pub description: String,
    pub input_payload: Option<serde_json::Value>,
    /// Lower is more urgent. Defaults to the configured priority.
    pub priority: Option<i32>,
    pub depends_on: Vec<EntityId>,
    pub max_attempts: Option<i32>,
    pub deadline: Option<Timestamp>,
}

impl TaskSubmission {
    /// Create a submission with only the required fields.
    pub fn new(task_type: &str, description: &str) -> Self {
        Self {
            task_type: task_type.to_string(),
            description: description.to_string(),
            input_payload: None,
            priority: None,
            depends_on: Vec::new(),
            max_attempts: None,
            deadline: None,
        }
    }

    /// Set the structured input payload.
    pub fn with_input(mut self, payload: serde_json::Value) -> Self {
        self.input_payload = Some(payload);
        self
    }

    /// Set the priority (lower = more urgent).
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set the dependency set.
    pub fn with_dependencies(mut self, depends_on: Vec<EntityId>) -> Self {
        self.depends_on = depends_on;
        self
    }

    /// Set the claim budget.
    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set an advisory deadline.
    pub fn with_deadline(mut self, deadline: Timestamp) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Work assignment over a [`DurableStore`].
pub struct WorkQueue {
    store: Arc<dyn DurableStore>,
    gate: Arc<dyn PermissionGate>,
    config: CoordConfig,
    feed: ChangeFeed,
}

impl WorkQueue {
    /// Create a queue with the default config and an allow-all gate.
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            store,
            gate: Arc::new(AllowAll),
            config: CoordConfig::default(),
            feed: ChangeFeed::default(),
        }
    }

    /// Set the authorization gate.
    pub fn with_gate(mut self, gate: Arc<dyn PermissionGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: CoordConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a change feed with other services.
    pub fn with_feed(mut self, feed: ChangeFeed) -> Self {
        self.feed = feed;
        self
    }

    /// Submit a new task in `Pending`.
    ///
    /// Every id in `depends_on` must name an existing task; unknown ids are
    /// rejected outright rather than silently creating an always-blocked
    /// task, and a dependency set that would close a cycle is rejected the
    /// same way. Nothing is written on rejection.
    pub fn submit(&self, ctx: &CallerContext, submission: TaskSubmission) -> ColonyResult<Task> {
        ensure_permitted(&*self.gate, operations::SUBMIT_TASK, ctx, &submission.task_type)?;
        if submission.task_type.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "task_type".to_string(),
            }
            .into());
        }

        let mut task = Task::new(&submission.task_type, &submission.description)
            .with_priority(submission.priority.unwrap_or(self.config.default_priority))
            .with_max_attempts(
                submission
                    .max_attempts
                    .unwrap_or(self.config.default_max_attempts),
            )
            .with_dependencies(submission.depends_on);
        if let Some(payload) = submission.input_payload {
            task = task.with_input(payload);
        }
        if let Some(deadline) = submission.deadline {
            task = task.with_deadline(deadline);
        }

        self.validate_dependencies(&task)?;
        self.store.task_insert(&task)?;

        debug!(task_id = %task.task_id, task_type = %task.task_type, "task submitted");
        self.feed.publish(CoordEvent::TaskSubmitted {
            task_id: task.task_id,
            task_type: task.task_type.clone(),
        });
        Ok(task)
    }

    /// Claim exactly one eligible task for the calling agent.
    ///
    /// Eligible: `Pending`, type admitted by `allowed_task_types`, every
    /// dependency `Completed`. A task whose dependency ended `Failed` or
    /// `Cancelled` stays `Pending` and is never returned here; pruning such
    /// dependents is the caller's job, via [`WorkQueue::cancel`].
    pub fn claim(
        &self,
        ctx: &CallerContext,
        allowed_task_types: Option<&[String]>,
    ) -> ColonyResult<ClaimOutcome> {
        ensure_permitted(&*self.gate, operations::CLAIM_TASK, ctx, "queue")?;

        match self
            .store
            .task_claim_next(&ctx.agent_id, allowed_task_types, ctx.now())?
        {
            Some(task) => {
                debug!(task_id = %task.task_id, agent = %ctx.agent_id, "task claimed");
                self.feed.publish(CoordEvent::TaskClaimed {
                    task_id: task.task_id,
                    agent_id: ctx.agent_id.clone(),
                });
                Ok(ClaimOutcome::Claimed(task))
            }
            None => Ok(ClaimOutcome::NoWorkAvailable),
        }
    }

    /// Report the caller's assigned task finished.
    ///
    /// Rejected with `NotOwner` when the caller is not `assigned_to`.
    /// Dependents are not updated here: unblocking is evaluated lazily at
    /// claim time, so the status flip is all that is needed.
    pub fn complete(
        &self,
        ctx: &CallerContext,
        task_id: EntityId,
        success: bool,
        result_payload: Option<serde_json::Value>,
        error_message: Option<String>,
    ) -> ColonyResult<TaskFinishOutcome> {
        ensure_permitted(&*self.gate, operations::COMPLETE_TASK, ctx, "queue")?;

        let terminal = if success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        let outcome = self.store.task_finish(
            task_id,
            Some(&ctx.agent_id),
            terminal,
            result_payload,
            error_message,
        )?;

        if let TaskFinishOutcome::Updated(task) = &outcome {
            debug!(task_id = %task.task_id, status = %task.status, "task finished");
            self.feed.publish(CoordEvent::TaskFinished {
                task_id: task.task_id,
                status: task.status,
            });
        }
        Ok(outcome)
    }

    /// Read-only snapshot of a task. Never mutates ownership.
    pub fn get(&self, task_id: EntityId) -> ColonyResult<Option<Task>> {
        self.store.task_get(task_id)
    }

    /// Cancel a task on the orchestrator's authority.
    ///
    /// Same terminal code path as a failure, with [`CANCELLATION_CODE`]
    /// prefixed to the reason, so cancellations are observable through
    /// [`WorkQueue::get`] like any other failure. No ownership check: the
    /// orchestrator may cancel pending or assigned tasks it does not hold.
    pub fn cancel(
        &self,
        ctx: &CallerContext,
        task_id: EntityId,
        reason: &str,
    ) -> ColonyResult<TaskFinishOutcome> {
        ensure_permitted(&*self.gate, operations::CANCEL_TASK, ctx, "queue")?;

        let message = format!("{}: {}", CANCELLATION_CODE, reason);
        let outcome =
            self.store
                .task_finish(task_id, None, TaskStatus::Cancelled, None, Some(message))?;

        if let TaskFinishOutcome::Updated(task) = &outcome {
            debug!(task_id = %task.task_id, "task cancelled");
            self.feed.publish(CoordEvent::TaskFinished {
                task_id: task.task_id,
                status: task.status,
            });
        }
        Ok(outcome)
    }

    /// Reject submissions whose dependency set names unknown tasks or would
    /// close a cycle. The walk follows `depends_on` edges from every named
    /// dependency; reaching the new task's own id means a cycle.
    fn validate_dependencies(&self, task: &Task) -> ColonyResult<()> {
        for dep in &task.depends_on {
            if self.store.task_get(*dep)?.is_none() {
                return Err(ValidationError::UnknownDependency { task_id: *dep }.into());
            }
        }

        let mut visited: HashSet<EntityId> = HashSet::new();
        let mut frontier: Vec<EntityId> = task.depends_on.clone();
        while let Some(id) = frontier.pop() {
            if id == task.task_id {
                return Err(ValidationError::CircularDependency {
                    ids: visited.into_iter().collect(),
                }
                .into());
            }
            if !visited.insert(id) {
                continue;
            }
            if let Some(existing) = self.store.task_get(id)? {
                frontier.extend(existing.depends_on.iter().copied());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colony_core::ColonyError;
    use colony_storage::MemoryStore;
    use uuid::Uuid;

    fn queue() -> WorkQueue {
        WorkQueue::new(Arc::new(MemoryStore::new()))
    }

    fn worker(name: &str) -> CallerContext {
        CallerContext::new(name, "coder")
    }

    #[test]
    fn test_submit_then_claim() {
        let queue = queue();
        let ctx = worker("alice");

        let task = queue
            .submit(&ctx, TaskSubmission::new("implement", "build the thing"))
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        match queue.claim(&ctx, None).unwrap() {
            ClaimOutcome::Claimed(claimed) => {
                assert_eq!(claimed.task_id, task.task_id);
                assert_eq!(claimed.assigned_to.as_deref(), Some("alice"));
                assert_eq!(claimed.attempt_count, 1);
            }
            other => panic!("expected Claimed, got {:?}", other),
        }

        assert_eq!(queue.claim(&ctx, None).unwrap(), ClaimOutcome::NoWorkAvailable);
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let queue = queue();
        let ctx = worker("alice");

        let ghost = Uuid::now_v7();
        let err = queue
            .submit(
                &ctx,
                TaskSubmission::new("implement", "blocked").with_dependencies(vec![ghost]),
            )
            .expect_err("unknown dependency must be rejected");
        assert!(matches!(err, ColonyError::Validation(_)));

        // Nothing was partially created.
        assert!(queue.claim(&ctx, None).unwrap() == ClaimOutcome::NoWorkAvailable);
    }

    #[test]
    fn test_empty_task_type_rejected() {
        let queue = queue();
        let ctx = worker("alice");
        assert!(queue.submit(&ctx, TaskSubmission::new("", "no type")).is_err());
    }

    #[test]
    fn test_dependency_gating_until_completion() {
        let queue = queue();
        let submitter = worker("orchestrator");
        let agent = worker("alice");

        let a = queue
            .submit(&submitter, TaskSubmission::new("implement", "a").with_priority(1))
            .unwrap();
        let b = queue
            .submit(
                &submitter,
                TaskSubmission::new("implement", "b")
                    .with_priority(1)
                    .with_dependencies(vec![a.task_id]),
            )
            .unwrap();

        // Only a is claimable until it completes, regardless of priority.
        match queue.claim(&agent, None).unwrap() {
            ClaimOutcome::Claimed(task) => assert_eq!(task.task_id, a.task_id),
            other => panic!("expected a, got {:?}", other),
        }
        assert_eq!(queue.claim(&agent, None).unwrap(), ClaimOutcome::NoWorkAvailable);

        queue
            .complete(&agent, a.task_id, true, None, None)
            .unwrap();
        match queue.claim(&agent, None).unwrap() {
            ClaimOutcome::Claimed(task) => assert_eq!(task.task_id, b.task_id),
            other => panic!("expected b, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_dependency_blocks_forever() {
        let queue = queue();
        let ctx = worker("alice");

        let a = queue
            .submit(&ctx, TaskSubmission::new("implement", "a"))
            .unwrap();
        let b = queue
            .submit(
                &ctx,
                TaskSubmission::new("implement", "b").with_dependencies(vec![a.task_id]),
            )
            .unwrap();

        match queue.claim(&ctx, None).unwrap() {
            ClaimOutcome::Claimed(task) => assert_eq!(task.task_id, a.task_id),
            other => panic!("expected a, got {:?}", other),
        }
        queue
            .complete(&ctx, a.task_id, false, None, Some("broke".to_string()))
            .unwrap();

        // b stays pending and unclaimable; nobody cancels it automatically.
        assert_eq!(queue.claim(&ctx, None).unwrap(), ClaimOutcome::NoWorkAvailable);
        assert_eq!(queue.get(b.task_id).unwrap().unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn test_complete_rejects_non_owner() {
        let queue = queue();
        let alice = worker("alice");
        let bob = worker("bob");

        let task = queue
            .submit(&alice, TaskSubmission::new("implement", "work"))
            .unwrap();
        queue.claim(&alice, None).unwrap();

        let before = queue.get(task.task_id).unwrap().unwrap();
        match queue.complete(&bob, task.task_id, true, None, None).unwrap() {
            TaskFinishOutcome::NotOwner { assigned_to } => {
                assert_eq!(assigned_to.as_deref(), Some("alice"));
            }
            other => panic!("expected NotOwner, got {:?}", other),
        }
        // Unchanged by the rejected call.
        assert_eq!(queue.get(task.task_id).unwrap().unwrap(), before);
    }

    #[test]
    fn test_cancel_reads_like_a_failure() {
        let queue = queue();
        let orchestrator = worker("orchestrator");
        let alice = worker("alice");

        let task = queue
            .submit(&orchestrator, TaskSubmission::new("implement", "doomed"))
            .unwrap();
        queue.claim(&alice, None).unwrap();

        // The orchestrator is not the owner, and cancels anyway.
        match queue
            .cancel(&orchestrator, task.task_id, "superseded by new plan")
            .unwrap()
        {
            TaskFinishOutcome::Updated(cancelled) => {
                assert_eq!(cancelled.status, TaskStatus::Cancelled);
                let message = cancelled.error_message.unwrap();
                assert!(message.starts_with(CANCELLATION_CODE));
                assert!(message.contains("superseded"));
            }
            other => panic!("expected Updated, got {:?}", other),
        }

        assert_eq!(
            queue.get(task.task_id).unwrap().unwrap().status,
            TaskStatus::Cancelled
        );
    }

    #[test]
    fn test_cancel_unknown_task_is_not_found() {
        let queue = queue();
        let ctx = worker("orchestrator");
        assert_eq!(
            queue.cancel(&ctx, Uuid::now_v7(), "gone").unwrap(),
            TaskFinishOutcome::NotFound
        );
    }

    #[test]
    fn test_type_filtered_claim() {
        let queue = queue();
        let ctx = worker("alice");
        queue
            .submit(&ctx, TaskSubmission::new("review", "review it"))
            .unwrap();

        let implement_only = vec!["implement".to_string()];
        assert_eq!(
            queue.claim(&ctx, Some(&implement_only)).unwrap(),
            ClaimOutcome::NoWorkAvailable
        );

        let review_too = vec!["implement".to_string(), "review".to_string()];
        assert!(matches!(
            queue.claim(&ctx, Some(&review_too)).unwrap(),
            ClaimOutcome::Claimed(_)
        ));
    }

    #[test]
    fn test_cross_reference_cycle_rejected() {
        let queue = queue();

        // Forge the state a package-level grouping could produce: an existing
        // task already points at the id the new submission will carry.
        let new_task = Task::new("implement", "closes the loop");
        let existing = Task::new("implement", "points forward")
            .with_dependencies(vec![new_task.task_id]);
        queue.store.task_insert(&existing).unwrap();

        let candidate = new_task.with_dependencies(vec![existing.task_id]);
        let err = queue
            .validate_dependencies(&candidate)
            .expect_err("cycle must be rejected");
        assert!(matches!(err, ColonyError::Validation(_)));
    }

    #[test]
    fn test_diamond_dependencies_are_not_a_cycle() {
        let queue = queue();
        let ctx = worker("alice");

        let root = queue
            .submit(&ctx, TaskSubmission::new("implement", "root"))
            .unwrap();
        let left = queue
            .submit(
                &ctx,
                TaskSubmission::new("implement", "left").with_dependencies(vec![root.task_id]),
            )
            .unwrap();
        let right = queue
            .submit(
                &ctx,
                TaskSubmission::new("implement", "right").with_dependencies(vec![root.task_id]),
            )
            .unwrap();

        // Both paths reconverge; the walk must terminate and accept.
        assert!(queue
            .submit(
                &ctx,
                TaskSubmission::new("implement", "join")
                    .with_dependencies(vec![left.task_id, right.task_id]),
            )
            .is_ok());
    }

    #[test]
    fn test_retry_convention_via_next_attempt() {
        let queue = queue();
        let ctx = worker("alice");

        let task = queue
            .submit(&ctx, TaskSubmission::new("implement", "flaky"))
            .unwrap();
        queue.claim(&ctx, None).unwrap();
        let failed = match queue
            .complete(&ctx, task.task_id, false, None, Some("flake".to_string()))
            .unwrap()
        {
            TaskFinishOutcome::Updated(task) => task,
            other => panic!("expected Updated, got {:?}", other),
        };

        // The caller decides to retry: fresh row, old row untouched.
        assert!(failed.attempts_remaining());
        let retry = failed.next_attempt();
        queue.store.task_insert(&retry).unwrap();

        match queue.claim(&ctx, None).unwrap() {
            ClaimOutcome::Claimed(claimed) => {
                assert_eq!(claimed.task_id, retry.task_id);
                assert_eq!(claimed.attempt_count, 2);
            }
            other => panic!("expected Claimed, got {:?}", other),
        }
        assert_eq!(
            queue.get(task.task_id).unwrap().unwrap().status,
            TaskStatus::Failed
        );
    }
}
