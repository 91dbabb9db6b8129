//! Authentication session statuses and the legal transitions between them.

/// Status of an authentication session.
///
/// A session is created in [`None`](AuthenticationStatus::None), moves to
/// [`Started`](AuthenticationStatus::Started) when the transport starts it, and
/// from there is driven by `do_work` ticks and CBS completions until it reaches
/// a terminal [`Idle`](AuthenticationStatus::Idle),
/// [`Failed`](AuthenticationStatus::Failed) or
/// [`FailedTimeout`](AuthenticationStatus::FailedTimeout).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthenticationStatus {
    /// Created, never started.
    None,
    /// Stopped after a completed session; can be started again.
    Idle,
    /// Started, no authentication attempt dispatched yet.
    Started,
    /// A `put_token` request is outstanding on CBS.
    Authenticating,
    /// The peer accepted the current token.
    Authenticated,
    /// The current token is due for replacement; a new attempt follows.
    Refreshing,
    /// A `delete_token` request is outstanding on CBS.
    Deauthenticating,
    /// The session failed (dispatch, completion or clock failure).
    Failed,
    /// A `put_token` request did not complete within the request timeout.
    FailedTimeout,
}

impl AuthenticationStatus {
    /// Whether moving from `self` to `target` is part of the session lifecycle.
    pub fn can_transition_to(self, target: AuthenticationStatus) -> bool {
        use AuthenticationStatus::*;

        matches!(
            (self, target),
            (None, Started)
                | (Idle, Started)
                | (Started, Authenticating)
                | (Started, Failed)
                | (Authenticating, Authenticated)
                | (Authenticating, Failed)
                | (Authenticating, FailedTimeout)
                | (Authenticating, Deauthenticating)
                | (Authenticated, Refreshing)
                | (Authenticated, Deauthenticating)
                | (Refreshing, Authenticating)
                | (Refreshing, Failed)
                | (Deauthenticating, Idle)
                | (Deauthenticating, Failed)
                | (Failed, Idle)
                | (FailedTimeout, Idle)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::AuthenticationStatus::*;

    #[test]
    fn start_is_reachable_from_fresh_and_stopped_sessions_only() {
        assert!(None.can_transition_to(Started));
        assert!(Idle.can_transition_to(Started));

        for status in [
            Started,
            Authenticating,
            Authenticated,
            Refreshing,
            Deauthenticating,
            Failed,
            FailedTimeout,
        ] {
            assert!(
                !status.can_transition_to(Started),
                "{status:?} must not transition to Started"
            );
        }
    }

    #[test]
    fn authenticating_resolves_to_success_failure_timeout_or_stop() {
        assert!(Authenticating.can_transition_to(Authenticated));
        assert!(Authenticating.can_transition_to(Failed));
        assert!(Authenticating.can_transition_to(FailedTimeout));
        assert!(Authenticating.can_transition_to(Deauthenticating));

        assert!(!Authenticating.can_transition_to(Refreshing));
        assert!(!Authenticating.can_transition_to(Idle));
    }

    #[test]
    fn refresh_cycle_loops_back_through_authenticating() {
        assert!(Authenticated.can_transition_to(Refreshing));
        assert!(Refreshing.can_transition_to(Authenticating));
        assert!(Refreshing.can_transition_to(Failed));

        assert!(!Refreshing.can_transition_to(Authenticated));
    }

    #[test]
    fn failed_sessions_only_recover_through_stop() {
        assert!(Failed.can_transition_to(Idle));
        assert!(FailedTimeout.can_transition_to(Idle));

        assert!(!Failed.can_transition_to(Authenticating));
        assert!(!FailedTimeout.can_transition_to(Authenticating));
        assert!(!Failed.can_transition_to(Deauthenticating));
    }

    #[test]
    fn deauthenticating_resolves_to_idle_or_failed() {
        assert!(Deauthenticating.can_transition_to(Idle));
        assert!(Deauthenticating.can_transition_to(Failed));

        assert!(!Deauthenticating.can_transition_to(Authenticated));
    }

    #[test]
    fn no_status_transitions_to_itself() {
        for status in [
            None,
            Idle,
            Started,
            Authenticating,
            Authenticated,
            Refreshing,
            Deauthenticating,
            Failed,
            FailedTimeout,
        ] {
            assert!(
                !status.can_transition_to(status),
                "{status:?} must not self-transition"
            );
        }
    }
}
