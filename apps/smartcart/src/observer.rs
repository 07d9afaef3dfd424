use std::fmt;
use std::sync::Mutex;

use cart_sdk::{CartLine, LineId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl NoticeLevel {
    pub fn label(self) -> &'static str {
        match self {
            NoticeLevel::Info => "info",
            NoticeLevel::Success => "success",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Error => "error",
        }
    }
}

/// A short user-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, message)
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level.label(), self.message)
    }
}

/// Everything a front end needs to draw the cart once.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderFrame {
    pub lines: Vec<CartLine>,
    pub total: f64,
    pub item_count: u32,
    pub highlight: Option<LineId>,
}

impl RenderFrame {
    pub fn total_label(&self) -> String {
        format!("{:.2}", self.total)
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// The duplicate-item decision currently waiting on the user.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPrompt {
    pub item: CartLine,
}

impl PendingPrompt {
    pub fn message(&self) -> String {
        format!(
            "{} is already in your cart. What would you like to do?",
            self.item.name
        )
    }
}

/// Display callback injected into a cart session.
///
/// Calls happen on the session task and must not block.
pub trait CartObserver: Send + Sync {
    fn render(&self, frame: &RenderFrame);

    fn notify(&self, notice: &Notice);

    /// `None` closes whatever prompt is showing.
    fn prompt(&self, prompt: Option<&PendingPrompt>);

    /// Audible cue for a detection. Failures are ignored by the session.
    fn chime(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Observer that keeps every callback, for tests and headless runs.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    inner: Mutex<Recorded>,
}

#[derive(Debug, Default, Clone)]
pub struct Recorded {
    pub frames: Vec<RenderFrame>,
    pub notices: Vec<Notice>,
    pub prompts: Vec<Option<PendingPrompt>>,
    pub chimes: usize,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Recorded {
        self.lock().clone()
    }

    pub fn last_frame(&self) -> Option<RenderFrame> {
        self.lock().frames.last().cloned()
    }

    pub fn messages(&self) -> Vec<String> {
        self.lock()
            .notices
            .iter()
            .map(|notice| notice.message.clone())
            .collect()
    }

    pub fn count_message(&self, message: &str) -> usize {
        self.lock()
            .notices
            .iter()
            .filter(|notice| notice.message == message)
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        // A poisoned recorder still holds usable history.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CartObserver for RecordingObserver {
    fn render(&self, frame: &RenderFrame) {
        self.lock().frames.push(frame.clone());
    }

    fn notify(&self, notice: &Notice) {
        self.lock().notices.push(notice.clone());
    }

    fn prompt(&self, prompt: Option<&PendingPrompt>) {
        self.lock().prompts.push(prompt.cloned());
    }

    fn chime(&self) -> anyhow::Result<()> {
        self.lock().chimes += 1;
        Ok(())
    }
}
