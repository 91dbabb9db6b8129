//! # IoT Hub AMQP Authentication
//!
//! Authentication subsystem for an AMQP-based IoT hub device transport,
//! built around the Claims-Based Security (CBS) protocol. One
//! [`Authenticator`] authenticates one device: it installs a SAS token on the
//! peer's CBS endpoint, refreshes the token before it expires, converts
//! stalled requests into timeouts, and revokes the token when the session
//! stops.
//!
//! ## Credential Types
//!
//! - **Device key** - the authenticator constructs time-limited SAS tokens
//!   from the device's shared access key and refreshes them proactively.
//! - **Device SAS token** - a caller-supplied token is installed verbatim and
//!   never refreshed here; the embedding application supplies a fresh token by
//!   recreating the session.
//! - **X.509** - acknowledged but bypasses this subsystem entirely; the
//!   certificate authenticates at the TLS layer and no CBS work is done.
//!
//! ## Driving Model
//!
//! The subsystem is single-threaded and cooperative. The enclosing transport
//! calls [`Authenticator::do_work`] from its tick loop; the CBS client is
//! polled from the same loop and delivers completions synchronously on the
//! same thread. Apparent asynchrony is state transitions between ticks;
//! nothing inside the subsystem blocks.
//!
//! Session progress is observable through the status-change callback
//! registered at [`start`](Authenticator::start), which fires exactly once per
//! actual status change with the old and new [`AuthenticationStatus`].
//!
//! ```no_run
//! use std::rc::Rc;
//!
//! use iothub_amqp_auth::{AuthenticationConfig, Authenticator, CbsClient};
//!
//! # use iothub_amqp_auth::{CbsCompletion, CbsError};
//! # struct AmqpCbs;
//! # impl CbsClient for AmqpCbs {
//! #     fn put_token(&self, _: &str, _: &str, _: &str, _: CbsCompletion) -> Result<(), CbsError> { Ok(()) }
//! #     fn delete_token(&self, _: &str, _: &str, _: CbsCompletion) -> Result<(), CbsError> { Ok(()) }
//! # }
//! let config = AuthenticationConfig {
//!     device_id: "device-1".to_string(),
//!     host_fqdn: "my-hub.azure-devices.net".to_string(),
//!     device_key: Some("base64-device-key".to_string()),
//!     ..Default::default()
//! };
//! let cbs: Rc<dyn CbsClient> = Rc::new(AmqpCbs);
//!
//! let authenticator = Authenticator::new(config)?;
//! authenticator.start(Some(cbs), Box::new(|old, new| {
//!     log::info!("authentication status {old:?} -> {new:?}");
//! }))?;
//!
//! // From the transport's tick loop:
//! authenticator.do_work()?;
//! # Ok::<(), iothub_amqp_auth::AuthenticationError>(())
//! ```

pub mod authenticator;
pub mod cbs;
pub mod clock;
pub mod errors;
pub mod sas_token_generator;
pub mod status;
mod token_lifecycle;
pub mod types;

pub use authenticator::Authenticator;
pub use cbs::{CbsClient, CbsCompletion, CbsError, CbsOperationResult, SAS_TOKEN_TYPE};
pub use clock::{Clock, ClockError, SystemClock};
pub use errors::AuthenticationError;
pub use sas_token_generator::{generate_sas_token, SasTokenError};
pub use status::AuthenticationStatus;
pub use types::{
    AuthenticationConfig, CredentialType, DeviceCredential, OnStatusChanged, OnStopCompleted,
    StopResult, DEFAULT_CBS_REQUEST_TIMEOUT_MS, DEFAULT_SAS_TOKEN_LIFETIME_MS,
    DEFAULT_SAS_TOKEN_REFRESH_MS, OPTION_CBS_REQUEST_TIMEOUT, OPTION_SAS_TOKEN_LIFETIME,
    OPTION_SAS_TOKEN_REFRESH_TIME,
};
