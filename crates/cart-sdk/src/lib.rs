//! Asynchronous client for the SmartCart backend.
//!
//! The backend owns camera capture, product detection and the authoritative
//! cart. This crate only knows its REST surface: the wire shapes, a bounded
//! request helper, and the [`CartBackend`] seam that cart sessions are written
//! against. [`ReqwestCartBackend`] talks HTTP; [`InMemoryCartBackend`] keeps
//! the same semantics in process for tests, demos and offline wiring.

pub mod backend;
pub mod memory;
pub mod model;
pub mod transport;

pub use backend::{ensure_success, BackendError, CartBackend, ReqwestCartBackend, ServerConfig};
pub use memory::{Endpoint, InMemoryCartBackend, RecordedCall};
pub use model::{
    Ack, CartLine, CartSnapshot, LineId, PromptSignal, QuantityAction, SearchHit,
};
pub use transport::{fetch_with_timeout, Timeouts, TransportError};
