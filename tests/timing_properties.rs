//! Property-based coverage of the refresh and timeout schedules: driven one
//! tick per second, the session refreshes and times out exactly on the
//! boundary ticks the configured intervals imply.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use proptest::prelude::*;

use iothub_amqp_auth::{
    AuthenticationConfig, AuthenticationStatus, Authenticator, CbsClient, CbsCompletion, CbsError,
    CbsOperationResult, Clock, ClockError, OPTION_CBS_REQUEST_TIMEOUT, OPTION_SAS_TOKEN_LIFETIME,
    OPTION_SAS_TOKEN_REFRESH_TIME,
};

struct TestClock(Cell<u64>);

impl Clock for TestClock {
    fn epoch_seconds(&self) -> Result<u64, ClockError> {
        Ok(self.0.get())
    }
}

/// Minimal CBS double: records nothing, answers every put immediately unless
/// told to stall.
struct TestCbs {
    pending: RefCell<Vec<CbsCompletion>>,
    stall: Cell<bool>,
}

impl TestCbs {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            pending: RefCell::new(Vec::new()),
            stall: Cell::new(false),
        })
    }

    fn complete_all(&self, result: CbsOperationResult) {
        let completions: Vec<_> = self.pending.borrow_mut().drain(..).collect();
        for completion in completions {
            completion(result, 200, None);
        }
    }
}

impl CbsClient for TestCbs {
    fn put_token(
        &self,
        _token_type: &str,
        _audience: &str,
        _token: &str,
        on_complete: CbsCompletion,
    ) -> Result<(), CbsError> {
        self.pending.borrow_mut().push(on_complete);
        if !self.stall.get() {
            self.complete_all(CbsOperationResult::Ok);
        }
        Ok(())
    }

    fn delete_token(
        &self,
        _audience: &str,
        _token_type: &str,
        on_complete: CbsCompletion,
    ) -> Result<(), CbsError> {
        self.pending.borrow_mut().push(on_complete);
        Ok(())
    }
}

fn device_key_config() -> AuthenticationConfig {
    AuthenticationConfig {
        device_id: "dev1".to_string(),
        host_fqdn: "hub.example.net".to_string(),
        device_key: Some("c2hhcmVkLWFjY2Vzcy1rZXk=".to_string()),
        ..Default::default()
    }
}

proptest! {
    /// Ticked every second, a device-key session initiates its refresh on the
    /// tick where `now - create_time` first reaches `refresh_ms / 1000`.
    #[test]
    fn refresh_fires_on_the_expected_tick(refresh_ms in 1_000u64..30_000) {
        let clock = Rc::new(TestClock(Cell::new(0)));
        let cbs = TestCbs::new();

        let clock_dyn: Rc<dyn Clock> = Rc::clone(&clock) as Rc<dyn Clock>;
        let cbs_dyn: Rc<dyn CbsClient> = Rc::clone(&cbs) as Rc<dyn CbsClient>;
        let authenticator = Authenticator::with_clock(device_key_config(), clock_dyn).unwrap();

        let refreshes = Rc::new(Cell::new(0u32));
        let refreshes_observed = Rc::clone(&refreshes);
        authenticator
            .start(
                Some(cbs_dyn),
                Box::new(move |_, new| {
                    if new == AuthenticationStatus::Refreshing {
                        refreshes_observed.set(refreshes_observed.get() + 1);
                    }
                }),
            )
            .unwrap();

        authenticator.set_option(OPTION_SAS_TOKEN_REFRESH_TIME, refresh_ms).unwrap();
        authenticator.set_option(OPTION_SAS_TOKEN_LIFETIME, refresh_ms + 60_000).unwrap();

        // Token created at t=0, put answered immediately.
        authenticator.do_work().unwrap();
        prop_assert_eq!(authenticator.status(), AuthenticationStatus::Authenticated);

        let expected_tick = refresh_ms / 1000;
        for tick in 1..=expected_tick {
            clock.0.set(tick);
            authenticator.do_work().unwrap();
            if tick < expected_tick {
                prop_assert_eq!(
                    refreshes.get(),
                    0,
                    "refresh fired early at tick {}",
                    tick
                );
            }
        }
        prop_assert_eq!(refreshes.get(), 1, "exactly one refresh by the boundary tick");
    }

    /// Ticked every second while the peer never answers, the session reaches
    /// `FailedTimeout` on the tick where `(now - put_time) * 1000` first
    /// reaches the request timeout.
    #[test]
    fn stalled_put_times_out_on_the_expected_tick(timeout_ms in 1_000u64..30_000) {
        let clock = Rc::new(TestClock(Cell::new(0)));
        let cbs = TestCbs::new();
        cbs.stall.set(true);

        let clock_dyn: Rc<dyn Clock> = Rc::clone(&clock) as Rc<dyn Clock>;
        let cbs_dyn: Rc<dyn CbsClient> = Rc::clone(&cbs) as Rc<dyn CbsClient>;
        let authenticator = Authenticator::with_clock(device_key_config(), clock_dyn).unwrap();
        authenticator.start(Some(cbs_dyn), Box::new(|_, _| {})).unwrap();
        authenticator.set_option(OPTION_CBS_REQUEST_TIMEOUT, timeout_ms).unwrap();

        authenticator.do_work().unwrap();
        prop_assert_eq!(authenticator.status(), AuthenticationStatus::Authenticating);

        // First tick at which (tick * 1000) >= timeout_ms.
        let expected_tick = timeout_ms.div_ceil(1000);
        for tick in 1..=expected_tick {
            clock.0.set(tick);
            authenticator.do_work().unwrap();
            if tick < expected_tick {
                prop_assert_eq!(
                    authenticator.status(),
                    AuthenticationStatus::Authenticating,
                    "timed out early at tick {}",
                    tick
                );
            }
        }
        prop_assert_eq!(authenticator.status(), AuthenticationStatus::FailedTimeout);
    }
}
