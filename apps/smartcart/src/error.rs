use cart_sdk::{BackendError, LineId};
use thiserror::Error;

use crate::failure::FailureClass;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("cart fetch failed after {attempts} attempts: {source}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        source: BackendError,
    },
    #[error("{0} failures reached the ceiling; polling suspended")]
    FailureCeilingReached(FailureClass),
    #[error("no duplicate prompt is pending")]
    NoPendingPrompt,
    #[error("cart line {0} has not been confirmed by the server yet")]
    UnsyncedLine(LineId),
    #[error("cart is empty")]
    EmptyCart,
    #[error("cart session is closed")]
    SessionClosed,
}
