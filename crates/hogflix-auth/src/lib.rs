//! Session sources for the Hogflix client.
//!
//! - [`SupabaseAuth`]: GoTrue client (signup, password login, refresh,
//!   server verification, logout) with an explicit credential FSM
//! - [`DemoSessionProvider`]: storage-backed demo sessions
//! - [`ModalSessionSource`]: routes to whichever of the two is authoritative
//! - [`RateLimiter`] and [`SignupRequest`] validation for the signup flow

mod credential_fsm;
mod demo;
mod error;
mod rate_limit;
mod source;
mod supabase_auth;
mod types;
mod validation;

pub use credential_fsm::{
    CredentialInput, CredentialMachine, CredentialMachineState, CredentialState, RefreshConfig,
};
pub use demo::{demo_user_id, DemoSession, DemoSessionProvider};
pub use error::{AuthError, AuthResult};
pub use rate_limit::RateLimiter;
pub use source::{event_bus, AccountService, EventBus, ModalSessionSource, SessionSource};
pub use supabase_auth::{SignUpOutcome, SupabaseAuth};
pub use types::{AuthEvent, AuthEventKind, AuthSession, AuthUser, SessionOrigin};
pub use validation::{
    validate_display_name, validate_email, validate_language, SignupRequest, SubscriptionPlan,
    ValidationError, MAX_DISPLAY_NAME_LEN, MIN_PASSWORD_LEN,
};
