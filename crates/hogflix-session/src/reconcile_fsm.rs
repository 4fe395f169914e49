//! Session reconciliation state machine.
//!
//! Decides what the UI shows ("logged in" or not) from a stream of noisy
//! signals: background polls, push events and user actions. Login is applied
//! on a single signal; logout needs corroboration so a flaky poll never kicks
//! an authenticated user out.
//!
//! ## State Diagram
//!
//! ```text
//!                     ┌──────────────┐
//!        present/in   │   Unknown    │ (initial)   absent/out
//!      ┌──────────────└──────────────┘─────────────────────┐
//!      ▼                                                   ▼
//! ┌──────────────────┐  3 present   ┌─────────────┐  ┌──────────────┐
//! │ ProvisionalIn(n) │─────────────►│ ConfirmedIn │  │ ConfirmedOut │
//! └──────────────────┘              └─────────────┘  └──────────────┘
//!      ▲     │ absent/out                  │ absent/out      ▲  │
//!      │     ▼                             ▼                 │  │ present/in
//!      │  ┌───────────────────────────────────┐  evidence ≥ 4│  │
//!      └──│        ProvisionalOut(evidence)   │──────────────┘  │
//!  present└───────────────────────────────────┘                 │
//!      ▲                                                        │
//!      └────────────────────────────────────────────────────────┘
//! ```
//!
//! `ExplicitLogout` goes to `ConfirmedOut` from every state.

use chrono::{DateTime, Utc};
use hogflix_config::PollingConfig;
use rust_fsm::{StateMachine, StateMachineImpl};
use serde::Serialize;
use std::time::Duration;

/// Logout evidence needed before a logged-in user is shown as logged out.
pub const LOGOUT_CONFIRMATIONS: u8 = 4;

/// Consecutive matching polls before a login is considered stable.
pub const LOGIN_CONFIRMATIONS: u8 = 3;

/// Evidence carried by a pushed `SIGNED_OUT`.
pub const SIGNED_OUT_WEIGHT: u8 = 3;

/// Upper bound of every [`ConfidenceTracker`] score.
pub const MAX_SCORE: u8 = 5;

/// One observation fed to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// A poll returned a session.
    SessionPresent,
    /// A poll returned no session, or failed.
    SessionAbsent,
    /// Pushed `SIGNED_IN`, `USER_UPDATED` or `TOKEN_REFRESHED`.
    SignedIn,
    /// Pushed `SIGNED_OUT`.
    SignedOut,
    /// The user pressed "log out".
    ExplicitLogout,
}

impl Signal {
    pub fn is_login(&self) -> bool {
        matches!(self, Signal::SessionPresent | Signal::SignedIn)
    }

    fn logout_weight(&self) -> u8 {
        match self {
            Signal::SessionAbsent => 1,
            Signal::SignedOut => SIGNED_OUT_WEIGHT,
            Signal::ExplicitLogout => LOGOUT_CONFIRMATIONS,
            Signal::SessionPresent | Signal::SignedIn => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReconcileState {
    /// Nothing observed yet.
    Unknown,
    /// Shown as logged in; `confirmations` matching signals so far.
    ProvisionalIn { confirmations: u8 },
    /// Shown as logged in and stable.
    ConfirmedIn,
    /// Still shown as logged in while logout evidence accumulates.
    ProvisionalOut { evidence: u8 },
    /// Shown as logged out.
    ConfirmedOut,
}

impl ReconcileState {
    /// Whether the UI should show a logged-in user.
    pub fn is_logged_in(&self) -> bool {
        matches!(
            self,
            ReconcileState::ProvisionalIn { .. }
                | ReconcileState::ConfirmedIn
                | ReconcileState::ProvisionalOut { .. }
        )
    }

    pub fn is_stable(&self) -> bool {
        matches!(self, ReconcileState::ConfirmedIn | ReconcileState::ConfirmedOut)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, ReconcileState::Unknown)
    }

    pub fn poll_interval(&self, polling: &PollingConfig) -> Duration {
        if self.is_stable() {
            polling.stable_interval()
        } else {
            polling.unstable_interval()
        }
    }
}

/// A change of what the UI shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    LoggedIn,
    LoggedOut,
}

fn next_state(state: &ReconcileState, signal: &Signal) -> ReconcileState {
    use ReconcileState::*;

    if *signal == Signal::ExplicitLogout {
        return ConfirmedOut;
    }

    match (*state, signal.is_login()) {
        (Unknown, true) | (ConfirmedOut, true) | (ProvisionalOut { .. }, true) => {
            ProvisionalIn { confirmations: 1 }
        }
        (Unknown, false) | (ConfirmedOut, false) => ConfirmedOut,

        (ProvisionalIn { confirmations }, true) => {
            let confirmations = confirmations.saturating_add(1);
            if confirmations >= LOGIN_CONFIRMATIONS {
                ConfirmedIn
            } else {
                ProvisionalIn { confirmations }
            }
        }
        (ConfirmedIn, true) => ConfirmedIn,

        (ProvisionalIn { .. }, false) | (ConfirmedIn, false) => {
            accumulate_logout(0, signal.logout_weight())
        }
        (ProvisionalOut { evidence }, false) => accumulate_logout(evidence, signal.logout_weight()),
    }
}

fn accumulate_logout(evidence: u8, weight: u8) -> ReconcileState {
    let evidence = evidence.saturating_add(weight);
    if evidence >= LOGOUT_CONFIRMATIONS {
        ReconcileState::ConfirmedOut
    } else {
        ReconcileState::ProvisionalOut { evidence }
    }
}

/// Transition table for [`ReconcileMachine`].
#[derive(Debug)]
pub struct Reconciliation;

impl StateMachineImpl for Reconciliation {
    type Input = Signal;
    type State = ReconcileState;
    type Output = Commit;
    const INITIAL_STATE: Self::State = ReconcileState::Unknown;

    fn transition(state: &Self::State, input: &Self::Input) -> Option<Self::State> {
        Some(next_state(state, input))
    }

    fn output(state: &Self::State, input: &Self::Input) -> Option<Self::Output> {
        let next = next_state(state, input);
        match (state.is_logged_in(), next.is_logged_in()) {
            (false, true) => Some(Commit::LoggedIn),
            (true, false) => Some(Commit::LoggedOut),
            // Leaving `Unknown` always commits so the loading flag clears.
            (false, false) if !state.is_known() => Some(Commit::LoggedOut),
            _ => None,
        }
    }
}

pub type ReconcileMachine = StateMachine<Reconciliation>;

/// Score view of the machine, for diagnostics and the UI's debug panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfidenceTracker {
    pub logged_in_score: u8,
    pub logged_out_score: u8,
    pub consecutive_matches: u8,
    pub stability_score: u8,
    pub last_check_at: Option<DateTime<Utc>>,
}

impl ConfidenceTracker {
    pub fn from_state(state: &ReconcileState, last_check_at: Option<DateTime<Utc>>) -> Self {
        let (logged_in_score, logged_out_score, consecutive_matches, stability_score) = match *state
        {
            ReconcileState::Unknown => (0, 0, 0, 0),
            ReconcileState::ProvisionalIn { confirmations } => {
                (LOGIN_CONFIRMATIONS, 0, confirmations, confirmations)
            }
            ReconcileState::ConfirmedIn => (
                MAX_SCORE,
                0,
                LOGIN_CONFIRMATIONS,
                LOGIN_CONFIRMATIONS + 1,
            ),
            ReconcileState::ProvisionalOut { evidence } => (0, evidence, 0, 0),
            ReconcileState::ConfirmedOut => (
                0,
                LOGOUT_CONFIRMATIONS,
                LOGIN_CONFIRMATIONS,
                LOGIN_CONFIRMATIONS + 1,
            ),
        };

        Self {
            logged_in_score: logged_in_score.min(MAX_SCORE),
            logged_out_score: logged_out_score.min(MAX_SCORE),
            consecutive_matches,
            stability_score: stability_score.min(MAX_SCORE),
            last_check_at,
        }
    }
}
