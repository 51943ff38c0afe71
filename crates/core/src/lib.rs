pub mod audit;
pub mod checkpoint;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use checkpoint::{CheckpointError, CheckpointRecord, CheckpointStore};
pub use domain::booking::{BookingStore, BookingStoreError, Reservation, ReservationId, Room, RoomId};
pub use domain::confirmation::{
    ConfirmationToken, Decision, DecisionKind, DecisionRecord, PendingConfirmation,
};
pub use domain::conversation::{ActionCall, ActionCallId, ActionOutcome, ConversationState, Turn};
pub use domain::session::{SessionIdentity, SessionKey};
pub use errors::{ApplicationError, DomainError, InterfaceError, WorkflowError};
pub use flows::{FlowEngine, WorkflowEvent, WorkflowStep};
