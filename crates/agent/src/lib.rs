//! Agent Runtime - confirmation-gated booking assistant
//!
//! This crate turns a conversation into model calls and action dispatches:
//! - Presents the action catalogue and session identity to the model
//! - Runs read-only actions immediately
//! - Parks side-effecting actions behind a human decision
//! - Commits the conversation after every step so a suspended turn can be
//!   resumed by a different process
//!
//! # Architecture
//!
//! One turn walks a small state machine (`huddle_core::flows`):
//! 1. **Decision** (`decision`) - ask the model for a reply or a batch of actions
//! 2. **Dispatch** (`dispatch`) - run the batch in order, suspending on the
//!    first sensitive action
//! 3. **Resume** (`runtime`) - apply accept / edit / reject / feedback and
//!    continue the loop
//!
//! # Key Types
//!
//! - `AgentRuntime` - the workflow controller (see `runtime` module)
//! - `ActionRegistry` - name to handler map with a fixed safety class per action
//! - `LlmClient` - model provider boundary; `ScriptedLlmClient` for tests
//!
//! # Safety Principle
//!
//! The model never changes booking data on its own. Every mutating action is
//! registered as sensitive and only runs after an explicit accept or edit.

pub mod booking_tools;
pub mod checkpoint;
pub mod decision;
pub mod dispatch;
pub mod guardrails;
pub mod llm;
pub mod prompt;
pub mod runtime;
pub mod tools;

pub use booking_tools::{booking_registry, system_clock, Clock};
pub use guardrails::ConfirmationPolicy;
pub use llm::{Completion, CompletionRequest, LlmClient, LlmError, OpenAiCompatibleClient, ScriptedLlmClient};
pub use runtime::{AgentRuntime, AgentRuntimeBuilder, AgentSettings, TurnInput, TurnResult};
pub use tools::{Action, ActionError, ActionRegistry, ActionSpec, Safety, SideEffect};
