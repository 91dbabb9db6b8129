//! Wall-clock abstraction.
//!
//! The authenticator stamps token creation and submission times against a
//! seconds-since-epoch clock. Production code uses [`SystemClock`]; tests
//! inject a settable double through [`Authenticator::with_clock`].
//!
//! [`Authenticator::with_clock`]: crate::Authenticator::with_clock

use chrono::Utc;
use thiserror::Error;

/// The wall-clock could not be read.
#[derive(Clone, Debug, Error)]
#[error("Failed reading the wall-clock: {0}")]
pub struct ClockError(pub String);

/// Source of wall-clock time in whole seconds since the Unix epoch.
pub trait Clock {
    fn epoch_seconds(&self) -> Result<u64, ClockError>;
}

/// System wall-clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_seconds(&self) -> Result<u64, ClockError> {
        let now = Utc::now().timestamp();
        u64::try_from(now).map_err(|_| ClockError(format!("timestamp {now} precedes the epoch")))
    }
}
