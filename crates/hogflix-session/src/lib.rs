//! Session reconciliation and the Hogflix client runtime.
//!
//! - [`reconcile_fsm`]: the flicker-resistant login/logout state machine
//! - [`Reconciler`]: the loop that feeds polls and pushed events into it
//! - [`SessionStore`]: what the UI renders, published over a `watch` channel
//! - [`AppRuntime`]: signup, login, logout, profile and media operations

mod dedup;
mod error;
pub mod reconcile_fsm;
mod reconciler;
mod runtime;
mod store;

pub use dedup::{EventKey, SeenEvents, DEFAULT_SEEN_CAPACITY};
pub use error::{AppError, AppResult};
pub use reconcile_fsm::{
    Commit, ConfidenceTracker, ReconcileMachine, ReconcileState, Signal, LOGIN_CONFIRMATIONS,
    LOGOUT_CONFIRMATIONS,
};
pub use reconciler::{Reconciler, ReconcilerHandle};
pub use runtime::{AppRuntime, Services, SIGNUP_RATE_LIMIT_KEY};
pub use store::{SessionPatch, SessionState, SessionStore};
