//! Credential lifecycle state machine using rust-fsm.
//!
//! Tracks what the GoTrue client is doing with the stored tokens. Transient
//! states (signing up, logging in, refreshing, logging out) are never
//! persisted; on start the machine is `NotLoggedIn` and the first
//! `get_session` walks it through validation.
//!
//! ## State Diagram
//!
//! ```text
//!                 ┌─────────────────┐
//!      ┌──────────│   NotLoggedIn   │ (initial)──────────────┐
//!      │          └────────┬────────┘                        │
//!      │ SignUpAttempt     │ LoginAttempt                    │ ValidateSession
//!      ▼                   ▼                                 ▼
//! ┌───────────┐     ┌─────────────────┐              ┌─────────────────┐
//! │ SigningUp │     │   LoggingIn     │              │   Validating    │
//! └─────┬─────┘     └────────┬────────┘              └────────┬────────┘
//!       │ SignUpSuccess      │ LoginSuccess     TokenNotExpired │  SessionExpired
//!       ▼                    ▼                                ▼        │
//! ┌─────────────────────────────────┐           ┌─────────────────────┐│
//! │            LoggedIn             │◄──────────│ VerifyingWithServer ││
//! └───────┬─────────────────┬───────┘ Verified  └─────────────────────┘│
//!         │ TokenExpired    │ LogoutRequested                          │
//!         ▼                 ▼                                          │
//! ┌─────────────────┐ ┌─────────────────┐                              │
//! │   Refreshing    │ │   LoggingOut    │                              │
//! └─────────────────┘ └─────────────────┘◄─────────────────────────────┘
//! ```
//!
//! Every failure edge returns to `NotLoggedIn`.

use rust_fsm::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub credential_machine(NotLoggedIn)

    NotLoggedIn => {
        SignUpAttempt => SigningUp,
        LoginAttempt => LoggingIn,
        ValidateSession => Validating
    },
    SigningUp => {
        SignUpSuccess => LoggedIn,
        // Account created but email confirmation is required first
        SignUpPending => NotLoggedIn,
        SignUpFailed => NotLoggedIn
    },
    LoggingIn => {
        LoginSuccess => LoggedIn,
        LoginFailed => NotLoggedIn
    },
    Validating => {
        TokenNotExpired => VerifyingWithServer,
        SessionExpired => Refreshing,
        NoSession => NotLoggedIn
    },
    VerifyingWithServer => {
        ServerVerified => LoggedIn,
        // Revoked or invalid: stored tokens are cleared
        ServerRejected => NotLoggedIn,
        // Network trouble: tokens are kept for the next attempt
        ServerUnreachable => NotLoggedIn
    },
    LoggedIn => {
        TokenExpired => Refreshing,
        LogoutRequested => LoggingOut,
        LoginAttempt => LoggingIn,
        SignUpAttempt => SigningUp
    },
    Refreshing => {
        RefreshSuccess => LoggedIn,
        RefreshRetry => Refreshing,
        RefreshFailed => NotLoggedIn
    },
    LoggingOut => {
        LogoutComplete => NotLoggedIn
    }
}

pub use credential_machine::Input as CredentialInput;
pub use credential_machine::State as CredentialMachineState;
pub use credential_machine::StateMachine as CredentialMachine;

/// Simplified view of the machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
    NotLoggedIn,
    SigningUp,
    LoggingIn,
    Validating,
    VerifyingWithServer,
    LoggedIn,
    Refreshing,
    LoggingOut,
}

impl CredentialState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, CredentialState::LoggedIn)
    }

    /// True for in-progress states.
    pub fn is_transient(&self) -> bool {
        !matches!(self, CredentialState::NotLoggedIn | CredentialState::LoggedIn)
    }
}

impl From<&CredentialMachineState> for CredentialState {
    fn from(state: &CredentialMachineState) -> Self {
        match state {
            CredentialMachineState::NotLoggedIn => CredentialState::NotLoggedIn,
            CredentialMachineState::SigningUp => CredentialState::SigningUp,
            CredentialMachineState::LoggingIn => CredentialState::LoggingIn,
            CredentialMachineState::Validating => CredentialState::Validating,
            CredentialMachineState::VerifyingWithServer => CredentialState::VerifyingWithServer,
            CredentialMachineState::LoggedIn => CredentialState::LoggedIn,
            CredentialMachineState::Refreshing => CredentialState::Refreshing,
            CredentialMachineState::LoggingOut => CredentialState::LoggingOut,
        }
    }
}

/// Retry behavior during token refresh.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
        }
    }
}

impl RefreshConfig {
    /// Delay before retry `attempt` (0-indexed): exponential, capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        let delay_ms = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logged_in() -> CredentialMachine {
        let mut machine = CredentialMachine::new();
        machine.consume(&CredentialInput::LoginAttempt).unwrap();
        machine.consume(&CredentialInput::LoginSuccess).unwrap();
        machine
    }

    #[test]
    fn test_initial_state_is_not_logged_in() {
        let machine = CredentialMachine::new();
        assert_eq!(*machine.state(), CredentialMachineState::NotLoggedIn);
    }

    #[test]
    fn test_sign_up_flows() {
        let mut machine = CredentialMachine::new();
        machine.consume(&CredentialInput::SignUpAttempt).unwrap();
        assert_eq!(*machine.state(), CredentialMachineState::SigningUp);
        machine.consume(&CredentialInput::SignUpSuccess).unwrap();
        assert_eq!(*machine.state(), CredentialMachineState::LoggedIn);

        let mut machine = CredentialMachine::new();
        machine.consume(&CredentialInput::SignUpAttempt).unwrap();
        machine.consume(&CredentialInput::SignUpPending).unwrap();
        assert_eq!(*machine.state(), CredentialMachineState::NotLoggedIn);
    }

    #[test]
    fn test_login_failure_returns_to_not_logged_in() {
        let mut machine = CredentialMachine::new();
        machine.consume(&CredentialInput::LoginAttempt).unwrap();
        machine.consume(&CredentialInput::LoginFailed).unwrap();
        assert_eq!(*machine.state(), CredentialMachineState::NotLoggedIn);
    }

    #[test]
    fn test_validation_must_verify_with_server() {
        let mut machine = CredentialMachine::new();
        machine.consume(&CredentialInput::ValidateSession).unwrap();

        assert!(machine.consume(&CredentialInput::ServerVerified).is_err());

        machine.consume(&CredentialInput::TokenNotExpired).unwrap();
        assert_eq!(*machine.state(), CredentialMachineState::VerifyingWithServer);
        machine.consume(&CredentialInput::ServerVerified).unwrap();
        assert_eq!(*machine.state(), CredentialMachineState::LoggedIn);
    }

    #[test]
    fn test_unreachable_server_drops_to_not_logged_in() {
        let mut machine = CredentialMachine::new();
        machine.consume(&CredentialInput::ValidateSession).unwrap();
        machine.consume(&CredentialInput::TokenNotExpired).unwrap();
        machine.consume(&CredentialInput::ServerUnreachable).unwrap();
        assert_eq!(*machine.state(), CredentialMachineState::NotLoggedIn);
    }

    #[test]
    fn test_expired_session_refreshes_with_retries() {
        let mut machine = CredentialMachine::new();
        machine.consume(&CredentialInput::ValidateSession).unwrap();
        machine.consume(&CredentialInput::SessionExpired).unwrap();
        machine.consume(&CredentialInput::RefreshRetry).unwrap();
        assert_eq!(*machine.state(), CredentialMachineState::Refreshing);
        machine.consume(&CredentialInput::RefreshSuccess).unwrap();
        assert_eq!(*machine.state(), CredentialMachineState::LoggedIn);
    }

    #[test]
    fn test_logout_flow() {
        let mut machine = logged_in();
        machine.consume(&CredentialInput::LogoutRequested).unwrap();
        assert_eq!(*machine.state(), CredentialMachineState::LoggingOut);
        machine.consume(&CredentialInput::LogoutComplete).unwrap();
        assert_eq!(*machine.state(), CredentialMachineState::NotLoggedIn);
    }

    #[test]
    fn test_switching_accounts_from_logged_in() {
        let mut machine = logged_in();
        machine.consume(&CredentialInput::LoginAttempt).unwrap();
        assert_eq!(*machine.state(), CredentialMachineState::LoggingIn);
    }

    #[test]
    fn test_invalid_transition_returns_error() {
        let mut machine = CredentialMachine::new();
        assert!(machine.consume(&CredentialInput::LogoutRequested).is_err());
        assert!(machine.consume(&CredentialInput::LoginSuccess).is_err());
        assert!(machine.consume(&CredentialInput::TokenExpired).is_err());
    }

    #[test]
    fn test_state_view() {
        assert!(CredentialState::LoggedIn.is_authenticated());
        assert!(!CredentialState::Refreshing.is_authenticated());
        assert!(CredentialState::SigningUp.is_transient());
        assert!(!CredentialState::NotLoggedIn.is_transient());
        assert_eq!(
            CredentialState::from(&CredentialMachineState::VerifyingWithServer),
            CredentialState::VerifyingWithServer
        );
    }

    #[test]
    fn test_refresh_config_delay_exponential_backoff() {
        let config = RefreshConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(5000));
        assert_eq!(config.delay_for_attempt(80), Duration::from_millis(5000));
    }
}
