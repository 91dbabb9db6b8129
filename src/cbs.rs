//! Interface to the Claims-Based Security endpoint of the AMQP connection.
//!
//! The CBS client itself is owned by the enclosing transport and polled from
//! its tick loop; this module only defines the seam the authenticator drives.
//! Both operations are asynchronous in the cooperative sense: submission either
//! fails synchronously or eventually invokes the supplied completion on the
//! driving thread.

use thiserror::Error;

/// Token type attached to every CBS put and delete request.
pub const SAS_TOKEN_TYPE: &str = "servicebus.windows.net:sastoken";

/// Result reported by the peer for a completed CBS operation.
///
/// Only [`Ok`](CbsOperationResult::Ok) is a success; the other variants are
/// protocol-level failures whose accompanying status code and description are
/// logged but never steer the outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CbsOperationResult {
    Ok,
    CbsError,
    OperationFailed,
    InstanceClosed,
}

/// A CBS request could not be submitted.
#[derive(Clone, Debug, Error)]
pub enum CbsError {
    #[error("Failed submitting {operation} to CBS: {reason}")]
    Dispatch {
        operation: &'static str,
        reason: String,
    },
}

/// Completion callback for an asynchronous CBS request: the peer's result, the
/// numeric status code it reported, and an optional status description.
pub type CbsCompletion = Box<dyn FnOnce(CbsOperationResult, u32, Option<String>)>;

/// Client for the CBS node of an established AMQP connection.
///
/// Implementations deliver completions synchronously from the same thread that
/// drives the authenticator. At most one request per authenticator is
/// outstanding at a time.
pub trait CbsClient {
    /// Install `token` for `audience` on the peer.
    fn put_token(
        &self,
        token_type: &str,
        audience: &str,
        token: &str,
        on_complete: CbsCompletion,
    ) -> Result<(), CbsError>;

    /// Revoke the token previously installed for `audience`.
    fn delete_token(
        &self,
        audience: &str,
        token_type: &str,
        on_complete: CbsCompletion,
    ) -> Result<(), CbsError>;
}
