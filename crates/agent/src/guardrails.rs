use crate::tools::{ActionSpec, Safety, SideEffect};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyVerdict {
    Allow,
    Violation { reason: String },
}

/// Registration-time check on how actions are classified.
///
/// Anything that writes to the booking store must be gated by a human
/// decision, and read-only actions run without one. `allow_gated_reads`
/// relaxes the second rule for deployments that want extra prompts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    pub mutating_requires_confirmation: bool,
    pub allow_gated_reads: bool,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self { mutating_requires_confirmation: true, allow_gated_reads: false }
    }
}

impl ConfirmationPolicy {
    pub fn evaluate(&self, spec: &ActionSpec) -> PolicyVerdict {
        match (spec.effect, spec.safety) {
            (SideEffect::Mutating, Safety::Safe) if self.mutating_requires_confirmation => {
                PolicyVerdict::Violation {
                    reason: "mutating actions must be classified sensitive".to_string(),
                }
            }
            (SideEffect::ReadOnly, Safety::Sensitive) if !self.allow_gated_reads => {
                PolicyVerdict::Violation {
                    reason: "read-only actions may not require confirmation".to_string(),
                }
            }
            _ => PolicyVerdict::Allow,
        }
    }
}
