use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use huddle_core::audit::{AuditContext, AuditSink, TracingAuditSink};
use huddle_core::checkpoint::{CheckpointRecord, CheckpointStore};
use huddle_core::config::AgentConfig;
use huddle_core::domain::confirmation::{ConfirmationToken, Decision, DecisionRecord};
use huddle_core::domain::conversation::{ActionOutcome, ConversationState, Turn};
use huddle_core::domain::session::{SessionIdentity, SessionKey};
use huddle_core::errors::{DomainError, WorkflowError};
use huddle_core::flows::{ConfirmationGatedFlow, FlowEngine, WorkflowEvent, WorkflowStep};

use crate::booking_tools::{system_clock, Clock};
use crate::checkpoint::SessionCheckpoint;
use crate::decision::{DecisionOutcome, DecisionStep};
use crate::dispatch::{abandon_batch, DispatchOutcome, DispatchStep, SKIPPED_SUPERSEDED};
use crate::llm::LlmClient;
use crate::tools::ActionRegistry;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentSettings {
    pub max_steps_per_turn: u32,
    pub confirmation_ttl: Option<Duration>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self { max_steps_per_turn: 16, confirmation_ttl: None }
    }
}

impl AgentSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            max_steps_per_turn: config.max_steps_per_turn,
            confirmation_ttl: config
                .confirmation_ttl_secs
                .and_then(|secs| i64::try_from(secs).ok())
                .map(Duration::seconds),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TurnInput {
    Message(String),
    Decision(DecisionRecord),
}

impl TurnInput {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Decision(_) => "decision",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnResult {
    FinalReply {
        text: String,
    },
    ConfirmationRequired {
        token: ConfirmationToken,
        action_name: String,
        arguments: Value,
        description: String,
    },
}

impl TurnResult {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FinalReply { .. } => "final_reply",
            Self::ConfirmationRequired { .. } => "confirmation_required",
        }
    }
}

pub fn rejection_reply(action_name: &str) -> String {
    format!("Understood. The {action_name} action was cancelled and nothing was changed.")
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuntimeBuildError {
    #[error("agent runtime is missing its {0}")]
    MissingComponent(&'static str),
}

enum Next {
    Continue(WorkflowStep),
    Done(TurnResult),
}

/// Drives one session's turns through the Decision / Dispatch loop.
///
/// Turns for the same session are serialised in-process; across processes the
/// checkpoint version check is the only guard.
pub struct AgentRuntime {
    decision: DecisionStep,
    dispatch: DispatchStep,
    registry: Arc<ActionRegistry>,
    store: Arc<dyn CheckpointStore>,
    audit: Arc<dyn AuditSink>,
    flow: FlowEngine<ConfirmationGatedFlow>,
    settings: AgentSettings,
    sessions: SessionLocks,
}

pub struct AgentRuntimeBuilder {
    llm: Option<Arc<dyn LlmClient>>,
    registry: Option<Arc<ActionRegistry>>,
    store: Option<Arc<dyn CheckpointStore>>,
    audit: Arc<dyn AuditSink>,
    settings: AgentSettings,
    clock: Clock,
}

impl Default for AgentRuntimeBuilder {
    fn default() -> Self {
        Self {
            llm: None,
            registry: None,
            store: None,
            audit: Arc::new(TracingAuditSink),
            settings: AgentSettings::default(),
            clock: system_clock(),
        }
    }
}

impl AgentRuntimeBuilder {
    pub fn llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn registry(mut self, registry: Arc<ActionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn settings(mut self, settings: AgentSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<AgentRuntime, RuntimeBuildError> {
        let llm = self.llm.ok_or(RuntimeBuildError::MissingComponent("model client"))?;
        let registry = self.registry.ok_or(RuntimeBuildError::MissingComponent("action registry"))?;
        let store = self.store.ok_or(RuntimeBuildError::MissingComponent("checkpoint store"))?;

        Ok(AgentRuntime {
            decision: DecisionStep::new(llm, Arc::clone(&registry), self.clock),
            dispatch: DispatchStep::new(Arc::clone(&registry), Arc::clone(&self.audit)),
            registry,
            store,
            audit: self.audit,
            flow: FlowEngine::default(),
            settings: self.settings,
            sessions: Mutex::new(HashMap::new()),
        })
    }
}

impl AgentRuntime {
    pub fn builder() -> AgentRuntimeBuilder {
        AgentRuntimeBuilder::default()
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Latest committed checkpoint, `None` for a session never written.
    pub async fn session(&self, key: &SessionKey) -> Result<Option<CheckpointRecord>, WorkflowError> {
        Ok(self.store.load(key).await?)
    }

    pub async fn history(&self, key: &SessionKey) -> Result<Vec<CheckpointRecord>, WorkflowError> {
        Ok(self.store.history(key).await?)
    }

    /// Starts a new turn from user text, or resumes a suspended one from a
    /// human decision.
    pub async fn handle_turn(
        &self,
        key: &SessionKey,
        identity: SessionIdentity,
        input: TurnInput,
    ) -> Result<TurnResult, WorkflowError> {
        let correlation_id = Uuid::new_v4().to_string();
        let audit = AuditContext::new(Some(key.clone()), correlation_id.clone(), "agent-runtime");
        let started = Instant::now();

        tracing::info!(
            event_name = "workflow.turn.started",
            session_key = %key,
            correlation_id = %correlation_id,
            input = input.kind(),
            user_id = identity.user_id,
            "turn started"
        );

        let _turn = self.lock_session(key).await;

        let result = self.run_turn(key, identity, input, &audit).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(outcome) => tracing::info!(
                event_name = "workflow.turn.completed",
                session_key = %key,
                correlation_id = %correlation_id,
                outcome = outcome.kind(),
                elapsed_ms,
                "turn completed"
            ),
            Err(error) => tracing::warn!(
                event_name = "workflow.turn.failed",
                session_key = %key,
                correlation_id = %correlation_id,
                error_class = error.error_class(),
                error = %error,
                elapsed_ms,
                "turn failed"
            ),
        }
        result
    }

    async fn lock_session(&self, key: &SessionKey) -> SessionTurn<'_> {
        let lock = {
            let mut sessions = lock_sessions(&self.sessions);
            Arc::clone(sessions.entry(key.clone()).or_default())
        };
        let guard = lock.lock_owned().await;
        SessionTurn { sessions: &self.sessions, key: key.clone(), guard: Some(guard) }
    }

    async fn run_turn(
        &self,
        key: &SessionKey,
        identity: SessionIdentity,
        input: TurnInput,
        audit: &AuditContext,
    ) -> Result<TurnResult, WorkflowError> {
        // Protocol errors must not touch the checkpoint.
        let input = match input {
            TurnInput::Decision(record) => {
                let decision = record.parse()?;
                Resumption::Decision { decision, token: record.token }
            }
            TurnInput::Message(text) => Resumption::Message(text),
        };

        let (mut checkpoint, mut state) = SessionCheckpoint::open(Arc::clone(&self.store), key).await?;

        if self.dispatch.recover_in_flight(&mut state, audit) {
            checkpoint.commit(&state).await?;
        }
        apply_identity(&mut state, identity);

        match input {
            Resumption::Message(text) => {
                self.start_turn(&mut state, &mut checkpoint, text, audit).await
            }
            Resumption::Decision { decision, token } => {
                self.resume_turn(&mut state, &mut checkpoint, decision, token, audit).await
            }
        }
    }

    async fn start_turn(
        &self,
        state: &mut ConversationState,
        checkpoint: &mut SessionCheckpoint,
        text: String,
        audit: &AuditContext,
    ) -> Result<TurnResult, WorkflowError> {
        if let Some(pending) = &state.pending {
            if !pending.is_expired(self.settings.confirmation_ttl, Utc::now()) {
                return Err(WorkflowError::ConfirmationPending {
                    session_key: state.session_key.to_string(),
                    action_name: pending.action_name.clone(),
                });
            }
            self.dispatch.expire(state, audit);
        }

        let skipped = abandon_batch(state, ActionOutcome::Cancelled, SKIPPED_SUPERSEDED);
        if skipped > 0 {
            tracing::warn!(
                event_name = "workflow.turn.batch_superseded",
                session_key = %state.session_key,
                correlation_id = %audit.correlation_id,
                skipped,
                "unfinished action batch closed by a new message"
            );
        }

        // The user turn is committed together with the model's response, so a
        // provider failure leaves the checkpoint where it was.
        state.append(Turn::user(text));
        let step = self.transition(WorkflowStep::Terminal, WorkflowEvent::TurnStarted, audit)?;
        self.drive(state, checkpoint, step, audit).await
    }

    async fn resume_turn(
        &self,
        state: &mut ConversationState,
        checkpoint: &mut SessionCheckpoint,
        decision: Decision,
        token: Option<ConfirmationToken>,
        audit: &AuditContext,
    ) -> Result<TurnResult, WorkflowError> {
        let pending = state
            .pending
            .clone()
            .ok_or_else(|| WorkflowError::NoPendingConfirmation(state.session_key.to_string()))?;

        if pending.is_expired(self.settings.confirmation_ttl, Utc::now()) {
            self.dispatch.expire(state, audit);
            checkpoint.commit(state).await?;
            return Err(WorkflowError::ConfirmationExpired { action_name: pending.action_name });
        }

        if let Some(supplied) = token {
            if supplied != pending.token {
                return Err(WorkflowError::StaleConfirmation { supplied: supplied.0 });
            }
        }

        if !pending.allows(decision.kind()) {
            return Err(WorkflowError::InvalidDecisionPayload {
                kind: decision.kind().as_str().to_string(),
                reason: format!("not an allowed response for `{}`", pending.action_name),
            });
        }

        tracing::info!(
            event_name = "workflow.turn.resumed",
            session_key = %state.session_key,
            correlation_id = %audit.correlation_id,
            action = %pending.action_name,
            decision = decision.kind().as_str(),
            "resuming suspended turn"
        );

        let step = self.transition(WorkflowStep::Terminal, WorkflowEvent::DecisionResumed, audit)?;
        let outcome = self.dispatch.resume(state, checkpoint, decision, audit).await?;
        match self.settle(step, outcome, audit)? {
            Next::Continue(step) => self.drive(state, checkpoint, step, audit).await,
            Next::Done(result) => Ok(result),
        }
    }

    async fn drive(
        &self,
        state: &mut ConversationState,
        checkpoint: &mut SessionCheckpoint,
        mut step: WorkflowStep,
        audit: &AuditContext,
    ) -> Result<TurnResult, WorkflowError> {
        let mut decisions = 0_u32;

        loop {
            match step {
                WorkflowStep::Decision => {
                    decisions += 1;
                    if decisions > self.settings.max_steps_per_turn {
                        return Err(WorkflowError::StepLimitExceeded {
                            limit: self.settings.max_steps_per_turn,
                        });
                    }

                    match self.decision.run(state).await? {
                        DecisionOutcome::Reply(text) => {
                            checkpoint.commit(state).await?;
                            self.transition(step, WorkflowEvent::ReplyProduced, audit)?;
                            return Ok(TurnResult::FinalReply { text });
                        }
                        DecisionOutcome::Actions(_) => {
                            checkpoint.commit(state).await?;
                            step = self.transition(step, WorkflowEvent::ActionsRequested, audit)?;
                        }
                    }
                }
                WorkflowStep::Dispatch => {
                    let outcome = self.dispatch.run(state, checkpoint, audit).await?;
                    match self.settle(step, outcome, audit)? {
                        Next::Continue(next) => step = next,
                        Next::Done(result) => return Ok(result),
                    }
                }
                WorkflowStep::Terminal => {
                    return Err(DomainError::InvariantViolation(
                        "workflow loop reached terminal without a result".to_string(),
                    )
                    .into());
                }
            }
        }
    }

    fn settle(
        &self,
        step: WorkflowStep,
        outcome: DispatchOutcome,
        audit: &AuditContext,
    ) -> Result<Next, WorkflowError> {
        match outcome {
            DispatchOutcome::BatchCompleted => {
                Ok(Next::Continue(self.transition(step, WorkflowEvent::BatchCompleted, audit)?))
            }
            DispatchOutcome::Suspended(pending) => {
                self.transition(step, WorkflowEvent::ConfirmationRequested, audit)?;
                Ok(Next::Done(TurnResult::ConfirmationRequired {
                    token: pending.token,
                    action_name: pending.action_name,
                    arguments: pending.arguments,
                    description: pending.description,
                }))
            }
            DispatchOutcome::Rejected { action_name } => {
                self.transition(step, WorkflowEvent::ActionRejected, audit)?;
                Ok(Next::Done(TurnResult::FinalReply { text: rejection_reply(&action_name) }))
            }
        }
    }

    fn transition(
        &self,
        from: WorkflowStep,
        event: WorkflowEvent,
        audit: &AuditContext,
    ) -> Result<WorkflowStep, WorkflowError> {
        self.flow
            .apply_with_audit(from, event, self.audit.as_ref(), audit)
            .map(|outcome| outcome.to)
            .map_err(|error| WorkflowError::Domain(DomainError::from(error)))
    }
}

type SessionMap = HashMap<SessionKey, Arc<tokio::sync::Mutex<()>>>;
type SessionLocks = Mutex<SessionMap>;

fn lock_sessions(sessions: &SessionLocks) -> MutexGuard<'_, SessionMap> {
    match sessions.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Exclusive hold on one session for the duration of a turn. On drop the
/// session's entry is removed unless another turn is holding or awaiting it.
struct SessionTurn<'a> {
    sessions: &'a SessionLocks,
    key: SessionKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionTurn<'_> {
    fn drop(&mut self) {
        let mut sessions = lock_sessions(self.sessions);
        self.guard.take();
        if sessions.get(&self.key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            sessions.remove(&self.key);
        }
    }
}

enum Resumption {
    Message(String),
    Decision { decision: Decision, token: Option<ConfirmationToken> },
}

/// The most recently supplied identity wins.
fn apply_identity(state: &mut ConversationState, identity: SessionIdentity) {
    match &state.identity {
        Some(current) if *current == identity => {}
        Some(current) => {
            tracing::warn!(
                event_name = "workflow.session.identity_changed",
                session_key = %state.session_key,
                previous_user_id = current.user_id,
                user_id = identity.user_id,
                "session identity changed mid-conversation"
            );
            state.identity = Some(identity);
        }
        None => state.identity = Some(identity),
    }
}
