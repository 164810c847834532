//! Session lifecycle state machine.
//!
//! Tracks where a gateway session is between "never registered" and
//! "holding a live access token", and which transitions are legal.
//!
//! ```text
//!  ┌──────────────┐      ┌─────────────┐      ┌────────────┐
//!  │ Unregistered │─────▶│ Registering │─────▶│ Registered │
//!  └──────▲───────┘      └──────┬──────┘      └─────┬──────┘
//!         │                     │ (failed)          │
//!         │                     ▼                   ▼
//!         │              ┌──────────────┐    ┌──────────────┐
//!         │              │ Unregistered │    │ TokenPending │◀──┐
//!         │              └──────────────┘    └──────┬───────┘   │
//!         │                                         │           │ (expired)
//!         │             ┌────────────┐       ┌──────▼───────┐   │
//!         └─────────────│ Recovering │◀──────│ Authenticated│───┘
//!           (full wipe) └─────┬──────┘       └──────▲───────┘
//!                             │ (token-only clear)  │
//!                             └─────▶ Registered ───┘
//! ```

use serde::Serialize;

/// Where a gateway session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No device certificate or identifier exists for this gateway.
    Unregistered,
    /// A device registration round-trip is in flight.
    Registering,
    /// The device is registered but holds no usable access token.
    Registered,
    /// A token grant or refresh round-trip is in flight.
    TokenPending,
    /// A valid access token is held.
    Authenticated,
    /// A recoverable error is being corrected.
    Recovering,
}

/// Check whether a transition is legal.
#[must_use]
pub const fn is_valid_transition(from: SessionState, to: SessionState) -> bool {
    use SessionState::{
        Authenticated, Recovering, Registered, Registering, TokenPending, Unregistered,
    };

    matches!(
        (from, to),
        // Registration starts from nothing and either completes or resets.
        (Unregistered, Registering)
            | (Registering, Registered | Unregistered)
            // Token acquisition, including re-acquiring after expiry.
            | (Registered | Authenticated, TokenPending)
            | (TokenPending, Authenticated | Registered)
            // Recovery enters from an authenticated failure and lands on
            // whatever the corrective action left behind.
            | (Authenticated | TokenPending, Recovering)
            | (Recovering, Authenticated | Registered | Unregistered)
    )
}

/// True if requests can be sent without first acquiring a token.
#[must_use]
pub const fn is_authenticated(state: SessionState) -> bool {
    matches!(state, SessionState::Authenticated)
}

/// True if a registration or token round-trip is in flight.
#[must_use]
pub const fn is_in_flight(state: SessionState) -> bool {
    matches!(
        state,
        SessionState::Registering | SessionState::TokenPending | SessionState::Recovering
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::{
        Authenticated, Recovering, Registered, Registering, TokenPending, Unregistered,
    };

    #[test]
    fn happy_path_transitions() {
        assert!(is_valid_transition(Unregistered, Registering));
        assert!(is_valid_transition(Registering, Registered));
        assert!(is_valid_transition(Registered, TokenPending));
        assert!(is_valid_transition(TokenPending, Authenticated));
    }

    #[test]
    fn expiry_reenters_token_acquisition() {
        assert!(is_valid_transition(Authenticated, TokenPending));
    }

    #[test]
    fn recovery_lands_on_what_was_cleared() {
        assert!(is_valid_transition(Authenticated, Recovering));
        // Token-only clear.
        assert!(is_valid_transition(Recovering, Registered));
        // Full wipe.
        assert!(is_valid_transition(Recovering, Unregistered));
        // Certificate renewed in place.
        assert!(is_valid_transition(Recovering, Authenticated));
    }

    #[test]
    fn illegal_transitions() {
        // Registration cannot be skipped.
        assert!(!is_valid_transition(Unregistered, Authenticated));
        assert!(!is_valid_transition(Unregistered, TokenPending));
        // A finished session does not jump back into registration.
        assert!(!is_valid_transition(Authenticated, Registering));
        // Recovery is entered from failures, not from idle states.
        assert!(!is_valid_transition(Unregistered, Recovering));
        assert!(!is_valid_transition(Registered, Recovering));
    }

    #[test]
    fn classification_helpers() {
        assert!(is_authenticated(Authenticated));
        assert!(!is_authenticated(Registered));
        assert!(is_in_flight(Registering));
        assert!(is_in_flight(TokenPending));
        assert!(is_in_flight(Recovering));
        assert!(!is_in_flight(Authenticated));
    }
}
