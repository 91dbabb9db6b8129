//! Errors surfaced by the authentication facade.

use thiserror::Error;

use crate::cbs::CbsError;
use crate::clock::ClockError;
use crate::sas_token_generator::SasTokenError;
use crate::status::AuthenticationStatus;
use crate::types::CredentialType;

/// Errors returned by [`Authenticator`](crate::Authenticator) operations.
///
/// Asynchronous CBS failures and request timeouts are not errors in this sense;
/// they surface as status transitions observed through the status-change
/// callback.
#[derive(Debug, Error)]
pub enum AuthenticationError {
    /// Missing or conflicting configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The operation is not legal in the current session status.
    #[error("Operation is not valid while the session status is {status:?}")]
    InvalidState { status: AuthenticationStatus },

    /// A CBS operation was requested for a credential that does not
    /// authenticate through CBS.
    #[error("Credential type {credential_type:?} does not authenticate through CBS")]
    CredentialNotApplicable { credential_type: CredentialType },

    /// `set_option` was called with a name this subsystem does not recognise.
    #[error("Unrecognized option '{name}'")]
    UnknownOption { name: String },

    /// `set_option` was called with a value that violates an invariant.
    #[error("Invalid value for option '{name}': {reason}")]
    InvalidOptionValue { name: String, reason: String },

    /// The wall-clock could not be read.
    #[error(transparent)]
    Clock(#[from] ClockError),

    /// A SAS token could not be constructed from the device key.
    #[error(transparent)]
    SasToken(#[from] SasTokenError),

    /// A CBS request could not be submitted.
    #[error(transparent)]
    Cbs(#[from] CbsError),
}
