use std::sync::Arc;

use chrono::Utc;

use huddle_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use huddle_core::domain::confirmation::{
    cancellation_text, expiry_text, feedback_text, Decision, PendingConfirmation,
};
use huddle_core::domain::conversation::{ActionCall, ActionOutcome, ConversationState, Turn};
use huddle_core::errors::{DomainError, WorkflowError};

use crate::checkpoint::SessionCheckpoint;
use crate::tools::{ActionRegistry, DispatchError, Safety};

pub const SKIPPED_AFTER_REJECT: &str =
    "skipped because an earlier action in the batch was rejected";
pub const SKIPPED_AFTER_EXPIRY: &str =
    "skipped because an earlier confirmation in the batch expired";
pub const SKIPPED_SUPERSEDED: &str = "skipped because the user sent a new message";
pub const INTERRUPTED_DISPATCH: &str = "dispatch interrupted; outcome unknown";

#[derive(Clone, Debug, PartialEq)]
pub enum DispatchOutcome {
    BatchCompleted,
    Suspended(PendingConfirmation),
    Rejected { action_name: String },
}

/// Works through the open action batch in emission order. Safe actions run
/// immediately; the first sensitive one suspends the batch.
pub struct DispatchStep {
    registry: Arc<ActionRegistry>,
    audit: Arc<dyn AuditSink>,
}

impl DispatchStep {
    pub fn new(registry: Arc<ActionRegistry>, audit: Arc<dyn AuditSink>) -> Self {
        Self { registry, audit }
    }

    pub async fn run(
        &self,
        state: &mut ConversationState,
        checkpoint: &mut SessionCheckpoint,
        audit: &AuditContext,
    ) -> Result<DispatchOutcome, WorkflowError> {
        loop {
            let Some(call) = state.unresolved_calls().first().map(|call| (*call).clone()) else {
                return Ok(DispatchOutcome::BatchCompleted);
            };

            match self.registry.classify(&call.name) {
                None => return Err(WorkflowError::UnknownAction(call.name)),
                Some(Safety::Safe) => {
                    let result = self.execute(&call).await?;
                    state.append(result);
                    checkpoint.commit(state).await?;
                }
                Some(Safety::Sensitive) => {
                    let pending = PendingConfirmation::for_call(&call, Utc::now());
                    state.pending = Some(pending.clone());
                    checkpoint.commit(state).await?;

                    tracing::info!(
                        event_name = "workflow.dispatch.suspended",
                        session_key = %state.session_key,
                        correlation_id = %audit.correlation_id,
                        action = %call.name,
                        call_id = %call.id.as_str(),
                        "sensitive action awaiting confirmation"
                    );
                    self.audit.emit(
                        AuditEvent::from_context(
                            audit,
                            "confirmation.requested",
                            AuditCategory::Confirmation,
                            AuditOutcome::Success,
                        )
                        .with_metadata("action", call.name.as_str())
                        .with_metadata("call_id", call.id.as_str())
                        .with_metadata("token", pending.token.to_string()),
                    );
                    return Ok(DispatchOutcome::Suspended(pending));
                }
            }
        }
    }

    /// Applies a human decision to the pending confirmation in `state`.
    ///
    /// Accept and edit consume the confirmation and commit `in_flight` before
    /// the handler runs, so a concurrent replay of the same decision loses the
    /// version race instead of dispatching twice.
    pub async fn resume(
        &self,
        state: &mut ConversationState,
        checkpoint: &mut SessionCheckpoint,
        decision: Decision,
        audit: &AuditContext,
    ) -> Result<DispatchOutcome, WorkflowError> {
        let pending = state
            .pending
            .clone()
            .ok_or_else(|| WorkflowError::NoPendingConfirmation(state.session_key.to_string()))?;
        let call = state.find_open_call(&pending.call_id).cloned().ok_or_else(|| {
            DomainError::UnknownCall { call_id: pending.call_id.as_str().to_string() }
        })?;

        self.audit.emit(
            AuditEvent::from_context(
                audit,
                "confirmation.resolved",
                AuditCategory::Confirmation,
                match decision {
                    Decision::Reject => AuditOutcome::Rejected,
                    _ => AuditOutcome::Success,
                },
            )
            .with_metadata("action", call.name.as_str())
            .with_metadata("call_id", call.id.as_str())
            .with_metadata("decision", decision.kind().as_str()),
        );

        match decision {
            Decision::Accept | Decision::Edit { .. } => {
                let call = match decision {
                    Decision::Edit { arguments } => {
                        state.replace_call_arguments(&call.id, arguments.clone())?;
                        ActionCall { arguments, ..call }
                    }
                    _ => call,
                };

                state.pending = None;
                state.in_flight = Some(call.id.clone());
                checkpoint.commit(state).await?;

                let result = self.execute(&call).await?;
                let outcome = match &result {
                    Turn::ActionResult { outcome, .. } => *outcome,
                    _ => ActionOutcome::Completed,
                };
                self.audit.emit(
                    AuditEvent::from_context(
                        audit,
                        "dispatch.sensitive_executed",
                        AuditCategory::Dispatch,
                        if outcome == ActionOutcome::Completed {
                            AuditOutcome::Success
                        } else {
                            AuditOutcome::Failed
                        },
                    )
                    .with_metadata("action", call.name.as_str())
                    .with_metadata("call_id", call.id.as_str())
                    .with_metadata("arguments", call.arguments.to_string()),
                );

                state.append(result);
                state.in_flight = None;
                checkpoint.commit(state).await?;

                self.run(state, checkpoint, audit).await
            }
            Decision::Reject => {
                state.pending = None;
                state.append(Turn::action_result(
                    &call,
                    ActionOutcome::Cancelled,
                    cancellation_text(&call.name),
                ));
                abandon_batch(state, ActionOutcome::Cancelled, SKIPPED_AFTER_REJECT);
                checkpoint.commit(state).await?;

                tracing::info!(
                    event_name = "workflow.dispatch.rejected",
                    session_key = %state.session_key,
                    correlation_id = %audit.correlation_id,
                    action = %call.name,
                    "sensitive action rejected; turn ends"
                );
                Ok(DispatchOutcome::Rejected { action_name: call.name })
            }
            Decision::Feedback { text } => {
                state.pending = None;
                state.append(Turn::action_result(
                    &call,
                    ActionOutcome::Feedback,
                    feedback_text(&text),
                ));
                checkpoint.commit(state).await?;

                self.run(state, checkpoint, audit).await
            }
        }
    }

    /// Resolves an expired confirmation and the rest of its batch. The caller commits.
    pub fn expire(
        &self,
        state: &mut ConversationState,
        audit: &AuditContext,
    ) -> Option<PendingConfirmation> {
        let pending = state.pending.take()?;
        let call = state
            .find_open_call(&pending.call_id)
            .cloned()
            .unwrap_or_else(|| ActionCall {
                id: pending.call_id.clone(),
                name: pending.action_name.clone(),
                arguments: pending.arguments.clone(),
            });

        state.append(Turn::action_result(
            &call,
            ActionOutcome::Expired,
            expiry_text(&pending.action_name),
        ));
        abandon_batch(state, ActionOutcome::Cancelled, SKIPPED_AFTER_EXPIRY);

        self.audit.emit(
            AuditEvent::from_context(
                audit,
                "confirmation.expired",
                AuditCategory::Confirmation,
                AuditOutcome::Rejected,
            )
            .with_metadata("action", pending.action_name.as_str())
            .with_metadata("call_id", pending.call_id.as_str())
            .with_metadata("requested_at", pending.requested_at.to_rfc3339()),
        );
        Some(pending)
    }

    /// Records a failed result for a sensitive call whose outcome was never
    /// committed. Returns whether anything changed; the caller commits.
    pub fn recover_in_flight(&self, state: &mut ConversationState, audit: &AuditContext) -> bool {
        let Some(call_id) = state.in_flight.take() else {
            return false;
        };
        if state.has_result_for(&call_id) {
            return true;
        }

        let Some(call) = state.find_open_call(&call_id).cloned() else {
            tracing::warn!(
                event_name = "workflow.dispatch.in_flight_orphaned",
                session_key = %state.session_key,
                call_id = %call_id.as_str(),
                "in-flight marker points outside the open batch"
            );
            return true;
        };

        tracing::warn!(
            event_name = "workflow.dispatch.interrupted",
            session_key = %state.session_key,
            correlation_id = %audit.correlation_id,
            action = %call.name,
            call_id = %call.id.as_str(),
            "previous dispatch of a sensitive action did not record a result"
        );
        self.audit.emit(
            AuditEvent::from_context(
                audit,
                "dispatch.interrupted",
                AuditCategory::Dispatch,
                AuditOutcome::Failed,
            )
            .with_metadata("action", call.name.as_str())
            .with_metadata("call_id", call.id.as_str()),
        );
        state.append(Turn::action_result(&call, ActionOutcome::Failed, INTERRUPTED_DISPATCH));
        true
    }

    async fn execute(&self, call: &ActionCall) -> Result<Turn, WorkflowError> {
        match self.registry.dispatch(&call.name, call.arguments.clone()).await {
            Ok(output) => Ok(Turn::action_result(call, ActionOutcome::Completed, output)),
            Err(DispatchError::Handler { source, .. }) => {
                tracing::warn!(
                    event_name = "workflow.dispatch.handler_failed",
                    action = %call.name,
                    call_id = %call.id.as_str(),
                    error = %source,
                    "action handler failed"
                );
                Ok(Turn::action_result(call, ActionOutcome::Failed, format!("error: {source}")))
            }
            Err(DispatchError::UnknownAction(name)) => Err(WorkflowError::UnknownAction(name)),
        }
    }
}

/// Resolves every remaining call of the open batch with `outcome`, so the
/// session is idle again. Returns how many calls were closed.
pub fn abandon_batch(state: &mut ConversationState, outcome: ActionOutcome, reason: &str) -> usize {
    let remaining: Vec<ActionCall> = state.unresolved_calls().into_iter().cloned().collect();
    for call in &remaining {
        state.append(Turn::action_result(call, outcome, reason));
    }
    remaining.len()
}
