//! Authentication facade and state machine for a single device session.
//!
//! The authenticator owns the session record and mediates every status change
//! through one choke point, so the status-change observer fires exactly once
//! per actual change. It is driven cooperatively: the enclosing transport calls
//! [`Authenticator::do_work`] from its tick loop, and the CBS client delivers
//! completions synchronously on that same thread.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::cbs::{CbsClient, CbsCompletion, CbsOperationResult, SAS_TOKEN_TYPE};
use crate::clock::{Clock, SystemClock};
use crate::errors::AuthenticationError;
use crate::sas_token_generator;
use crate::status::AuthenticationStatus;
use crate::token_lifecycle::{device_audience, TokenLifecycle};
use crate::types::{
    AuthenticationConfig, CredentialType, DeviceCredential, OnStatusChanged, OnStopCompleted,
    StopResult, OPTION_CBS_REQUEST_TIMEOUT, OPTION_SAS_TOKEN_LIFETIME,
    OPTION_SAS_TOKEN_REFRESH_TIME,
};

struct AuthenticationState {
    device_id: String,
    host_fqdn: String,
    credential: DeviceCredential,
    cbs: Option<Rc<dyn CbsClient>>,
    lifecycle: TokenLifecycle,
    status: AuthenticationStatus,
    on_status_changed: Option<OnStatusChanged>,
    /// Bumped on every registration or clear of `on_status_changed`, so the
    /// choke point can tell a reentrant `start`/`stop` from an untouched slot
    /// while the observer is checked out.
    observer_generation: u64,
    on_stop_completed: Option<OnStopCompleted>,
    clock: Rc<dyn Clock>,
}

/// Authenticates one device against a hub's CBS endpoint for the lifetime of a
/// session.
///
/// The session is created with a fixed credential, started with a CBS client
/// and a status observer, and then driven by [`do_work`](Self::do_work) ticks:
/// the authenticator constructs or forwards SAS tokens, refreshes them before
/// expiry, converts stalled requests into timeouts, and revokes the installed
/// token on [`stop`](Self::stop). Dropping the authenticator releases the
/// record; completions that arrive afterwards are disarmed.
///
/// All operations, observers and completions run on the single driving thread.
///
/// # Examples
///
/// ```no_run
/// use std::rc::Rc;
///
/// use iothub_amqp_auth::{AuthenticationConfig, Authenticator, CbsClient};
///
/// # use iothub_amqp_auth::{CbsCompletion, CbsError};
/// # struct AmqpCbs;
/// # impl CbsClient for AmqpCbs {
/// #     fn put_token(&self, _: &str, _: &str, _: &str, _: CbsCompletion) -> Result<(), CbsError> { Ok(()) }
/// #     fn delete_token(&self, _: &str, _: &str, _: CbsCompletion) -> Result<(), CbsError> { Ok(()) }
/// # }
/// let config = AuthenticationConfig {
///     device_id: "device-1".to_string(),
///     host_fqdn: "my-hub.azure-devices.net".to_string(),
///     device_key: Some("base64-device-key".to_string()),
///     ..Default::default()
/// };
/// let cbs_client: Rc<dyn CbsClient> = Rc::new(AmqpCbs);
///
/// let authenticator = Authenticator::new(config)?;
/// authenticator.start(
///     Some(cbs_client),
///     Box::new(|old, new| println!("status {old:?} -> {new:?}")),
/// )?;
///
/// // From the transport's tick loop:
/// authenticator.do_work()?;
/// # Ok::<(), iothub_amqp_auth::AuthenticationError>(())
/// ```
pub struct Authenticator {
    state: Rc<RefCell<AuthenticationState>>,
}

impl Authenticator {
    /// Creates a session from `config` using the system wall-clock.
    pub fn new(config: AuthenticationConfig) -> Result<Self, AuthenticationError> {
        Self::with_clock(config, Rc::new(SystemClock))
    }

    /// Creates a session from `config` with an explicit time source.
    pub fn with_clock(
        config: AuthenticationConfig,
        clock: Rc<dyn Clock>,
    ) -> Result<Self, AuthenticationError> {
        if config.device_id.is_empty() {
            log::error!("cannot create the authentication session (device_id is empty)");
            return Err(AuthenticationError::Configuration(
                "device_id must not be empty".to_string(),
            ));
        }
        if config.host_fqdn.is_empty() {
            log::error!("cannot create the authentication session (host_fqdn is empty)");
            return Err(AuthenticationError::Configuration(
                "host_fqdn must not be empty".to_string(),
            ));
        }

        let credential = resolve_credential(&config)?;

        Ok(Self {
            state: Rc::new(RefCell::new(AuthenticationState {
                device_id: config.device_id,
                host_fqdn: config.host_fqdn,
                credential,
                cbs: None,
                lifecycle: TokenLifecycle::new(),
                status: AuthenticationStatus::None,
                on_status_changed: None,
                observer_generation: 0,
                on_stop_completed: None,
                clock,
            })),
        })
    }

    /// Starts the session: records the CBS client, registers the status
    /// observer (overwriting any previous registration) and transitions to
    /// `Started`.
    ///
    /// `cbs` may be `None` only for X.509 sessions, which authenticate at the
    /// TLS layer and have no CBS work. Legal only while the status is `None`
    /// or `Idle`.
    pub fn start(
        &self,
        cbs: Option<Rc<dyn CbsClient>>,
        on_status_changed: OnStatusChanged,
    ) -> Result<(), AuthenticationError> {
        {
            let mut state = self.state.borrow_mut();

            match state.status {
                AuthenticationStatus::None | AuthenticationStatus::Idle => {}
                status => {
                    log::error!("start called while the session status is {status:?}");
                    return Err(AuthenticationError::InvalidState { status });
                }
            }

            let credential_type = state.credential.credential_type();
            let uses_cbs = matches!(
                credential_type,
                CredentialType::DeviceKey | CredentialType::DeviceSasToken
            );
            if uses_cbs && cbs.is_none() {
                log::error!("start requires a CBS client for {credential_type:?} sessions");
                return Err(AuthenticationError::Configuration(
                    "a CBS client is required for CBS-authenticated credentials".to_string(),
                ));
            }

            state.cbs = cbs;
            state.on_status_changed = Some(on_status_changed);
            state.observer_generation = state.observer_generation.wrapping_add(1);
        }

        Self::update_status(&self.state, AuthenticationStatus::Started);
        Ok(())
    }

    /// Drives the session one tick: dispatches authentication attempts,
    /// evaluates the refresh schedule and detects request timeouts.
    ///
    /// A tick that finds nothing to do returns `Ok(())`. X.509 sessions have
    /// no CBS work, so every tick on a started X.509 session is such a tick.
    pub fn do_work(&self) -> Result<(), AuthenticationError> {
        let status = self.state.borrow().status;
        if matches!(
            status,
            AuthenticationStatus::None | AuthenticationStatus::Idle
        ) {
            log::error!("do_work called on a session that was not started (status {status:?})");
            return Err(AuthenticationError::InvalidState { status });
        }

        // X.509 authenticates at the TLS layer and bypasses CBS entirely.
        if self.state.borrow().credential.credential_type() == CredentialType::X509 {
            return Ok(());
        }

        if status == AuthenticationStatus::Authenticated {
            let refresh_due = {
                let (credential_type, lifecycle, clock) = {
                    let state = self.state.borrow();
                    (
                        state.credential.credential_type(),
                        state.lifecycle.clone(),
                        Rc::clone(&state.clock),
                    )
                };
                // Only constructed tokens are refreshed here; a caller-supplied
                // SAS token is replaced by recreating the session.
                credential_type == CredentialType::DeviceKey && lifecycle.refresh_due(clock.as_ref())
            };
            if refresh_due {
                Self::update_status(&self.state, AuthenticationStatus::Refreshing);
            }
        }

        let status = self.state.borrow().status;
        match status {
            AuthenticationStatus::Started | AuthenticationStatus::Refreshing => {
                self.authenticate_device()
            }
            AuthenticationStatus::Authenticating => {
                let (lifecycle, clock) = {
                    let state = self.state.borrow();
                    (state.lifecycle.clone(), Rc::clone(&state.clock))
                };
                match lifecycle.put_timed_out(clock.as_ref()) {
                    Ok(true) => {
                        Self::update_status(&self.state, AuthenticationStatus::FailedTimeout);
                        Ok(())
                    }
                    Ok(false) => Ok(()),
                    Err(e) => {
                        log::error!("failed verifying the authentication timeout: {e}");
                        Self::update_status(&self.state, AuthenticationStatus::Failed);
                        Err(e.into())
                    }
                }
            }
            _ => Ok(()),
        }
    }

    /// Stops the session, revoking the installed token through CBS if one may
    /// be installed.
    ///
    /// From `Failed` or `FailedTimeout` the session goes straight to `Idle`,
    /// the status observer is cleared, and `on_stop_completed` is never
    /// invoked (no CBS work was outstanding). From `Authenticated` or
    /// `Authenticating` a `delete_token` is dispatched and `on_stop_completed`
    /// fires exactly once from its completion.
    pub fn stop(&self, on_stop_completed: OnStopCompleted) -> Result<(), AuthenticationError> {
        let (credential_type, status) = {
            let state = self.state.borrow();
            (state.credential.credential_type(), state.status)
        };

        if credential_type == CredentialType::X509 {
            log::error!("stop is not applicable to X.509 sessions (nothing to revoke through CBS)");
            return Err(AuthenticationError::CredentialNotApplicable { credential_type });
        }

        match status {
            AuthenticationStatus::Failed | AuthenticationStatus::FailedTimeout => {
                Self::update_status(&self.state, AuthenticationStatus::Idle);
                let mut state = self.state.borrow_mut();
                state.on_status_changed = None;
                state.observer_generation = state.observer_generation.wrapping_add(1);
                Ok(())
            }
            AuthenticationStatus::Authenticated | AuthenticationStatus::Authenticating => {
                let audience = {
                    let state = self.state.borrow();
                    device_audience(&state.host_fqdn, &state.device_id)
                };
                let cbs = self.state.borrow().cbs.clone();
                let Some(cbs) = cbs else {
                    log::error!("no CBS client is attached to the session");
                    return Err(AuthenticationError::Configuration(
                        "no CBS client is attached to the session".to_string(),
                    ));
                };

                self.state.borrow_mut().on_stop_completed = Some(on_stop_completed);
                Self::update_status(&self.state, AuthenticationStatus::Deauthenticating);

                let completion = Self::delete_token_completion(Rc::downgrade(&self.state));
                match cbs.delete_token(&audience, SAS_TOKEN_TYPE, completion) {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        log::error!("failed revoking the SAS token from CBS: {e}");
                        self.state.borrow_mut().on_stop_completed = None;
                        Self::update_status(&self.state, AuthenticationStatus::Failed);
                        Err(e.into())
                    }
                }
            }
            status => {
                log::error!("stop called while the session status is {status:?}");
                Err(AuthenticationError::InvalidState { status })
            }
        }
    }

    /// The kind of credential this session was configured with.
    pub fn credential_type(&self) -> CredentialType {
        self.state.borrow().credential.credential_type()
    }

    /// Current session status.
    pub fn status(&self) -> AuthenticationStatus {
        self.state.borrow().status
    }

    /// Applies a timing option, in milliseconds.
    ///
    /// Recognised names are [`OPTION_SAS_TOKEN_LIFETIME`],
    /// [`OPTION_SAS_TOKEN_REFRESH_TIME`] and [`OPTION_CBS_REQUEST_TIMEOUT`];
    /// any other name is rejected. The refresh interval must stay strictly
    /// below the lifetime.
    pub fn set_option(&self, name: &str, value_ms: u64) -> Result<(), AuthenticationError> {
        let mut state = self.state.borrow_mut();
        match name {
            OPTION_SAS_TOKEN_LIFETIME => {
                if value_ms <= state.lifecycle.sas_token_refresh_ms {
                    return Err(AuthenticationError::InvalidOptionValue {
                        name: name.to_string(),
                        reason: format!(
                            "lifetime {value_ms}ms must exceed the refresh interval {}ms",
                            state.lifecycle.sas_token_refresh_ms
                        ),
                    });
                }
                state.lifecycle.sas_token_lifetime_ms = value_ms;
                Ok(())
            }
            OPTION_SAS_TOKEN_REFRESH_TIME => {
                if value_ms >= state.lifecycle.sas_token_lifetime_ms {
                    return Err(AuthenticationError::InvalidOptionValue {
                        name: name.to_string(),
                        reason: format!(
                            "refresh interval {value_ms}ms must stay below the lifetime {}ms",
                            state.lifecycle.sas_token_lifetime_ms
                        ),
                    });
                }
                state.lifecycle.sas_token_refresh_ms = value_ms;
                Ok(())
            }
            OPTION_CBS_REQUEST_TIMEOUT => {
                if value_ms == 0 {
                    return Err(AuthenticationError::InvalidOptionValue {
                        name: name.to_string(),
                        reason: "request timeout must be non-zero".to_string(),
                    });
                }
                state.lifecycle.cbs_request_timeout_ms = value_ms;
                Ok(())
            }
            _ => {
                log::error!("set_option called with unrecognized option '{name}'");
                Err(AuthenticationError::UnknownOption {
                    name: name.to_string(),
                })
            }
        }
    }

    /// Constructs (or forwards) a SAS token and hands it to CBS.
    ///
    /// Called from `do_work` while the status is `Started` or `Refreshing`.
    fn authenticate_device(&self) -> Result<(), AuthenticationError> {
        let clock = Rc::clone(&self.state.borrow().clock);
        let now_s = match clock.epoch_seconds() {
            Ok(now_s) => now_s,
            Err(e) => {
                log::error!("failed reading the clock to stamp the SAS token: {e}");
                Self::update_status(&self.state, AuthenticationStatus::Failed);
                return Err(e.into());
            }
        };

        let put = {
            let state = self.state.borrow();
            let audience = device_audience(&state.host_fqdn, &state.device_id);
            match &state.credential {
                DeviceCredential::DeviceKey(key) => {
                    let expiry = state.lifecycle.expiry_for(now_s);
                    match sas_token_generator::generate_sas_token(
                        key,
                        &audience,
                        &state.lifecycle.sas_token_key_name,
                        expiry,
                    ) {
                        Ok(token) => Ok((audience, token, true)),
                        Err(e) => {
                            // Construction failure leaves the status untouched.
                            log::error!("could not generate a new SAS token for CBS: {e}");
                            Err(AuthenticationError::from(e))
                        }
                    }
                }
                DeviceCredential::DeviceSasToken(token) => Ok((audience, token.clone(), false)),
                DeviceCredential::X509 { .. } => {
                    log::error!("cannot authenticate through CBS with an X.509 credential");
                    Err(AuthenticationError::CredentialNotApplicable {
                        credential_type: CredentialType::X509,
                    })
                }
            }
        };
        let (audience, token, constructed) = put?;

        if constructed {
            self.state.borrow_mut().lifecycle.mark_token_created(now_s);
        }
        Self::update_status(&self.state, AuthenticationStatus::Authenticating);
        self.dispatch_put_token(&audience, &token, now_s)
    }

    fn dispatch_put_token(
        &self,
        audience: &str,
        token: &str,
        now_s: u64,
    ) -> Result<(), AuthenticationError> {
        let cbs = self.state.borrow().cbs.clone();
        let Some(cbs) = cbs else {
            log::error!("no CBS client is attached to the session");
            Self::update_status(&self.state, AuthenticationStatus::Failed);
            return Err(AuthenticationError::Configuration(
                "no CBS client is attached to the session".to_string(),
            ));
        };

        let completion = Self::put_token_completion(Rc::downgrade(&self.state));
        match cbs.put_token(SAS_TOKEN_TYPE, audience, token, completion) {
            Ok(()) => {
                self.state.borrow_mut().lifecycle.mark_token_put(now_s);
                Ok(())
            }
            Err(e) => {
                log::error!("failed handing the SAS token to CBS: {e}");
                Self::update_status(&self.state, AuthenticationStatus::Failed);
                Err(e.into())
            }
        }
    }

    fn put_token_completion(state: Weak<RefCell<AuthenticationState>>) -> CbsCompletion {
        Box::new(move |result, status_code, description| {
            let Some(state) = state.upgrade() else {
                log::debug!("put-token completion arrived after the session was destroyed");
                return;
            };

            if result == CbsOperationResult::Ok {
                Self::update_status(&state, AuthenticationStatus::Authenticated);
            } else {
                log::error!(
                    "CBS reported status code {status_code}, error: {} for put token operation",
                    description.as_deref().unwrap_or("unknown")
                );
                Self::update_status(&state, AuthenticationStatus::Failed);
            }
        })
    }

    fn delete_token_completion(state: Weak<RefCell<AuthenticationState>>) -> CbsCompletion {
        Box::new(move |result, status_code, description| {
            let Some(state) = state.upgrade() else {
                log::debug!("delete-token completion arrived after the session was destroyed");
                return;
            };

            let (stop_result, new_status) = if result == CbsOperationResult::Ok {
                state.borrow_mut().lifecycle.current_sas_token_create_time_s = 0;
                (StopResult::Success, AuthenticationStatus::Idle)
            } else {
                log::error!(
                    "delete SAS token operation failed (CBS reported status code {status_code}, error: {})",
                    description.as_deref().unwrap_or("unknown")
                );
                (StopResult::Error, AuthenticationStatus::Failed)
            };

            // The stop observer fires before the status change so it sees the
            // session outcome first.
            let on_stop_completed = state.borrow_mut().on_stop_completed.take();
            if let Some(on_stop_completed) = on_stop_completed {
                on_stop_completed(stop_result);
            }
            Self::update_status(&state, new_status);
        })
    }

    /// The one choke point every status change passes through.
    ///
    /// Applies the change and invokes the observer only when the status
    /// actually changed, with the interior borrow released so the observer may
    /// call back into the facade. A reentrant `start` or `stop` owns the
    /// observer slot: the checked-out observer goes back only if the slot was
    /// left untouched during the callback.
    fn update_status(state: &RefCell<AuthenticationState>, new_status: AuthenticationStatus) {
        let (old_status, observer, generation) = {
            let mut state = state.borrow_mut();
            if state.status == new_status {
                return;
            }
            let old_status = state.status;
            if !old_status.can_transition_to(new_status) {
                log::warn!(
                    "unexpected authentication status transition {old_status:?} -> {new_status:?}"
                );
            }
            state.status = new_status;
            (
                old_status,
                state.on_status_changed.take(),
                state.observer_generation,
            )
        };

        log::debug!("authentication status changed from {old_status:?} to {new_status:?}");

        if let Some(mut observer) = observer {
            observer(old_status, new_status);
            let mut state = state.borrow_mut();
            if state.observer_generation == generation {
                state.on_status_changed = Some(observer);
            }
        }
    }
}

fn resolve_credential(
    config: &AuthenticationConfig,
) -> Result<DeviceCredential, AuthenticationError> {
    if config.device_key.is_some() && config.device_sas_token.is_some() {
        log::error!("cannot create the authentication session (both device_key and device_sas_token are set)");
        return Err(AuthenticationError::Configuration(
            "device_key and device_sas_token are mutually exclusive".to_string(),
        ));
    }

    if let Some(token) = &config.device_sas_token {
        return Ok(DeviceCredential::DeviceSasToken(token.clone()));
    }
    if let Some(key) = &config.device_key {
        return Ok(DeviceCredential::DeviceKey(key.clone()));
    }

    match (&config.x509_certificate, &config.x509_private_key) {
        (Some(certificate), Some(private_key)) => Ok(DeviceCredential::X509 {
            certificate: certificate.clone(),
            private_key: private_key.clone(),
        }),
        (Some(_), None) | (None, Some(_)) => {
            log::error!("cannot create the authentication session (incomplete X.509 pair)");
            Err(AuthenticationError::Configuration(
                "x509_certificate and x509_private_key must be provided together".to_string(),
            ))
        }
        (None, None) => {
            log::error!("cannot create the authentication session (no credential source)");
            Err(AuthenticationError::Configuration(
                "no credential source: provide device_key, device_sas_token or an X.509 pair"
                    .to_string(),
            ))
        }
    }
}
