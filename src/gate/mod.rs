//! Access decision core.
//!
//! Everything here is transport-agnostic: the HTTP layer in [`crate::api`] builds a
//! [`ClientIdentity`] and an [`AccessRequest`], hands them to the
//! [`AccessDecisionEngine`] and renders the [`Decision`].

pub mod actuator;
pub mod admin;
pub mod audit;
pub mod block;
pub mod capsule;
pub mod clock;
pub mod config;
pub mod decision;
pub mod error;
pub mod ledger;
pub mod scope;
pub mod session;
pub mod users;

pub use self::admin::{AdminDenied, AdminGate};
pub use self::actuator::{Actuator, ActuatorError, HomeAssistantActuator, SimulatedActuator};
pub use self::audit::{
    AuditError, AuditEvent, AuditSink, AuditStatus, FanoutAuditSink, JsonLinesAuditSink,
    TracingAuditSink, UNKNOWN_USER,
};
pub use self::block::{BlockState, BlockVerdict, PersistedBlockToken, Reservation};
pub use self::capsule::{CapsuleError, CapsuleSealer};
pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::config::GateConfig;
pub use self::decision::{
    AccessDecisionEngine, AccessOutcome, AccessRequest, AuthMethod, CredentialFailure, Decision,
    PinlessPolicy,
};
pub use self::error::GateError;
pub use self::ledger::{AttemptLedger, AttemptRecord, BlockReason, BlockRecord};
pub use self::scope::{ClientIdentity, Scope, ScopeKind, fingerprint};
pub use self::session::{AuthenticatedSession, SessionClaims, SessionStore, generate_session_id};
pub use self::users::{MemoryUserStore, User, UserStore, UserStoreError, display_name};
