use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use huddle_core::domain::booking::BookingStoreError;

use crate::guardrails::{ConfirmationPolicy, PolicyVerdict};

/// Whether an action may run without a human decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Safety {
    Safe,
    Sensitive,
}

impl Safety {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Sensitive => "sensitive",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    ReadOnly,
    Mutating,
}

impl SideEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOnly => "read_only",
            Self::Mutating => "mutating",
        }
    }
}

/// What the model is told about an action, plus its static classification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    pub description: String,
    pub safety: Safety,
    pub effect: SideEffect,
    /// JSON Schema of the argument object.
    pub parameters: Value,
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Store(#[from] BookingStoreError),
}

impl ActionError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArguments(message.into())
    }
}

#[async_trait]
pub trait Action: Send + Sync {
    fn spec(&self) -> ActionSpec;
    async fn execute(&self, arguments: Value) -> Result<String, ActionError>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("action `{0}` is already registered")]
    DuplicateAction(String),
    #[error("action `{name}` violates the confirmation policy: {reason}")]
    PolicyViolation { name: String, reason: String },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown action `{0}`")]
    UnknownAction(String),
    #[error("action `{action}` failed: {source}")]
    Handler {
        action: String,
        #[source]
        source: ActionError,
    },
}

/// One row of the action permissions table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActionPermission {
    pub name: String,
    pub safety: Safety,
    pub effect: SideEffect,
}

struct RegisteredAction {
    spec: ActionSpec,
    handler: Arc<dyn Action>,
}

/// Names the model may request, each bound to a handler and a safety class.
/// The set is fixed once the runtime is built.
#[derive(Default)]
pub struct ActionRegistry {
    order: Vec<String>,
    actions: HashMap<String, RegisteredAction>,
    policy: ConfirmationPolicy,
}

impl ActionRegistry {
    pub fn with_policy(policy: ConfirmationPolicy) -> Self {
        Self { order: Vec::new(), actions: HashMap::new(), policy }
    }

    pub fn register<A>(&mut self, action: A) -> Result<(), RegistryError>
    where
        A: Action + 'static,
    {
        let spec = action.spec();
        if self.actions.contains_key(&spec.name) {
            return Err(RegistryError::DuplicateAction(spec.name));
        }
        if let PolicyVerdict::Violation { reason } = self.policy.evaluate(&spec) {
            return Err(RegistryError::PolicyViolation { name: spec.name, reason });
        }

        self.order.push(spec.name.clone());
        self.actions
            .insert(spec.name.clone(), RegisteredAction { spec, handler: Arc::new(action) });
        Ok(())
    }

    pub fn classify(&self, name: &str) -> Option<Safety> {
        self.actions.get(name).map(|registered| registered.spec.safety)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Specs in registration order, as presented to the model.
    pub fn catalogue(&self) -> Vec<ActionSpec> {
        self.order
            .iter()
            .filter_map(|name| self.actions.get(name))
            .map(|registered| registered.spec.clone())
            .collect()
    }

    pub fn permissions_table(&self) -> Vec<ActionPermission> {
        self.catalogue()
            .into_iter()
            .map(|spec| ActionPermission { name: spec.name, safety: spec.safety, effect: spec.effect })
            .collect()
    }

    pub async fn dispatch(&self, name: &str, arguments: Value) -> Result<String, DispatchError> {
        let registered =
            self.actions.get(name).ok_or_else(|| DispatchError::UnknownAction(name.to_string()))?;

        registered
            .handler
            .execute(arguments)
            .await
            .map_err(|source| DispatchError::Handler { action: name.to_string(), source })
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
