//! Cart synchronization and scan polling for the SmartCart kiosk.
//!
//! A [`CartSession`] reconciles the locally cached cart with the backend; a
//! [`SessionActor`] drives it from user commands and poller ticks on a single
//! task, and [`SessionHandle`] is how front ends talk to it.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod failure;
pub mod metrics;
pub mod observer;
pub mod poller;
pub mod session;
pub mod shell;
pub mod telemetry;

pub use cache::{CacheSnapshot, CartCache};
pub use config::{RollbackPolicy, SessionSettings};
pub use engine::{CartSession, PollReport, PromptResolution, RemoveOutcome, SignalOutcome};
pub use error::SessionError;
pub use failure::{FailureClass, FailureTracker, NoticeLimiter};
pub use observer::{
    CartObserver, Notice, NoticeLevel, PendingPrompt, RecordingObserver, RenderFrame,
};
pub use poller::{Poller, PollerState};
pub use session::{spawn_session, SessionActor, SessionCommand, SessionHandle, SessionSnapshot};
