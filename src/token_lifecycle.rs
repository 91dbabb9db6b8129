//! Timing state of the current SAS token.
//!
//! Tracks when the current token was constructed and when it was handed to CBS,
//! and answers the two scheduling questions the `do_work` tick asks: is the
//! token due for a refresh, and has the outstanding put request timed out.

use crate::clock::{Clock, ClockError};
use crate::types::{
    DEFAULT_CBS_REQUEST_TIMEOUT_MS, DEFAULT_SAS_TOKEN_LIFETIME_MS, DEFAULT_SAS_TOKEN_REFRESH_MS,
};

/// Builds the CBS audience for a device: `<host_fqdn>/devices/<device_id>`.
///
/// Rebuilt on every use, never cached.
pub(crate) fn device_audience(host_fqdn: &str, device_id: &str) -> String {
    format!("{host_fqdn}/devices/{device_id}")
}

/// CBS-related configuration and timestamps for one session.
#[derive(Clone, Debug)]
pub(crate) struct TokenLifecycle {
    /// How long a constructed SAS token is valid, in milliseconds.
    pub(crate) sas_token_lifetime_ms: u64,
    /// How long before a constructed SAS token is proactively replaced, in
    /// milliseconds. Always strictly less than the lifetime.
    pub(crate) sas_token_refresh_ms: u64,
    /// How long a `put_token` may stay outstanding before the session is
    /// declared timed out, in milliseconds.
    pub(crate) cbs_request_timeout_ms: u64,
    /// SAS key name; the empty string for the supported device modes.
    pub(crate) sas_token_key_name: String,
    /// When the current token was constructed, seconds since epoch; 0 when none.
    pub(crate) current_sas_token_create_time_s: u64,
    /// When the current token was handed to CBS, seconds since epoch; 0 when none.
    pub(crate) current_sas_token_put_time_s: u64,
}

impl TokenLifecycle {
    pub(crate) fn new() -> Self {
        Self {
            sas_token_lifetime_ms: DEFAULT_SAS_TOKEN_LIFETIME_MS,
            sas_token_refresh_ms: DEFAULT_SAS_TOKEN_REFRESH_MS,
            cbs_request_timeout_ms: DEFAULT_CBS_REQUEST_TIMEOUT_MS,
            sas_token_key_name: String::new(),
            current_sas_token_create_time_s: 0,
            current_sas_token_put_time_s: 0,
        }
    }

    /// Expiry for a token constructed now.
    pub(crate) fn expiry_for(&self, now_s: u64) -> u64 {
        now_s + self.sas_token_lifetime_ms / 1000
    }

    pub(crate) fn mark_token_created(&mut self, now_s: u64) {
        self.current_sas_token_create_time_s = now_s;
    }

    pub(crate) fn mark_token_put(&mut self, now_s: u64) {
        self.current_sas_token_put_time_s = now_s;
    }

    /// Whether the current token is due for proactive replacement.
    ///
    /// An unreadable clock forces a refresh attempt rather than letting the
    /// token silently expire.
    pub(crate) fn refresh_due(&self, clock: &dyn Clock) -> bool {
        match clock.epoch_seconds() {
            Ok(now_s) => {
                now_s.saturating_sub(self.current_sas_token_create_time_s)
                    >= self.sas_token_refresh_ms / 1000
            }
            Err(e) => {
                log::error!("failed reading the clock to evaluate the SAS token refresh: {e}");
                true
            }
        }
    }

    /// Whether the outstanding `put_token` has exceeded the request timeout.
    pub(crate) fn put_timed_out(&self, clock: &dyn Clock) -> Result<bool, ClockError> {
        let now_s = clock.epoch_seconds()?;
        Ok(
            now_s.saturating_sub(self.current_sas_token_put_time_s) * 1000
                >= self.cbs_request_timeout_ms,
        )
    }
}
