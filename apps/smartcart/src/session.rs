use std::sync::Arc;

use cart_sdk::{CartBackend, LineId, SearchHit};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SessionSettings;
use crate::engine::{CartSession, PromptResolution, RemoveOutcome};
use crate::error::SessionError;
use crate::failure::FailureClass;
use crate::observer::{CartObserver, PendingPrompt, RenderFrame};
use crate::poller::{Poller, PollerState};

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

pub enum SessionCommand {
    StartCapture(Reply<()>),
    StopCapture(Reply<()>),
    Refresh(Reply<()>),
    Increment(LineId, Reply<()>),
    Decrement(LineId, Reply<()>),
    Remove(LineId, Reply<RemoveOutcome>),
    Clear(Reply<()>),
    AddByName {
        name: String,
        price: f64,
        description: String,
        reply: Reply<LineId>,
    },
    Search(String, Reply<Vec<SearchHit>>),
    Checkout(Reply<String>),
    ResolvePrompt(PromptResolution, Reply<()>),
    Snapshot(Reply<SessionSnapshot>),
    Shutdown,
}

/// Point-in-time view of a session, for front ends and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub frame: RenderFrame,
    pub prompt: Option<PendingPrompt>,
    pub capture_active: bool,
    pub poller: PollerState,
    pub scan_feed_failures: u32,
    pub cart_fetch_failures: u32,
}

enum Event {
    Command(SessionCommand),
    Tick,
    Closed,
}

/// The single writer of a cart session: applies commands and poller ticks one
/// at a time.
pub struct SessionActor {
    session: CartSession,
    poller: Poller,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
}

impl SessionActor {
    pub fn new(
        session: CartSession,
        poller: Poller,
        commands: mpsc::UnboundedReceiver<SessionCommand>,
    ) -> Self {
        Self {
            session,
            poller,
            commands,
        }
    }

    pub async fn run(mut self) {
        debug!(target = "smartcart::session", "session actor started");
        loop {
            let event = tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(command) => Event::Command(command),
                    None => Event::Closed,
                },
                _ = self.poller.tick() => Event::Tick,
            };
            match event {
                Event::Closed | Event::Command(SessionCommand::Shutdown) => break,
                Event::Command(command) => self.dispatch(command).await,
                Event::Tick => self.on_tick().await,
            }
            self.sync_poller();
        }
        self.poller.stop();
        debug!(target = "smartcart::session", "session actor stopped");
    }

    async fn on_tick(&mut self) {
        if !self.session.capture_active() {
            self.poller.stop();
            return;
        }
        let report = self.session.poll_once().await;
        debug!(target = "smartcart::session", ?report, "poll finished");
        if let Err(err) = report.ceiling() {
            warn!(target = "smartcart::session", error = %err, "polling suspended");
            self.poller.stop();
        }
    }

    fn sync_poller(&mut self) {
        if self.poller.is_polling()
            && (!self.session.capture_active() || self.session.should_suspend())
        {
            info!(target = "smartcart::session", "poller idle");
            self.poller.stop();
        }
    }

    async fn dispatch(&mut self, command: SessionCommand) {
        let session = &mut self.session;
        match command {
            SessionCommand::StartCapture(reply) => {
                let result = session.start_capture().await;
                if result.is_ok() {
                    self.poller.start();
                }
                let _ = reply.send(result);
            }
            SessionCommand::StopCapture(reply) => {
                let result = session.stop_capture().await;
                if !session.capture_active() {
                    self.poller.stop();
                }
                let _ = reply.send(result);
            }
            SessionCommand::Refresh(reply) => {
                let _ = reply.send(session.refresh().await);
            }
            SessionCommand::Increment(id, reply) => {
                let _ = reply.send(session.increment(id).await);
            }
            SessionCommand::Decrement(id, reply) => {
                let _ = reply.send(session.decrement(id).await);
            }
            SessionCommand::Remove(id, reply) => {
                let _ = reply.send(session.remove(id).await);
            }
            SessionCommand::Clear(reply) => {
                let _ = reply.send(session.clear().await);
            }
            SessionCommand::AddByName {
                name,
                price,
                description,
                reply,
            } => {
                let _ = reply.send(session.add_by_name(&name, price, &description).await);
            }
            SessionCommand::Search(query, reply) => {
                let _ = reply.send(session.search(&query).await);
            }
            SessionCommand::Checkout(reply) => {
                let _ = reply.send(session.checkout().await);
            }
            SessionCommand::ResolvePrompt(resolution, reply) => {
                let _ = reply.send(session.resolve_prompt(resolution).await);
            }
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(Ok(self.snapshot()));
            }
            SessionCommand::Shutdown => {}
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        let failures = self.session.failures();
        SessionSnapshot {
            frame: self.session.frame(None),
            prompt: self.session.pending_prompt().cloned(),
            capture_active: self.session.capture_active(),
            poller: self.poller.state(),
            scan_feed_failures: failures.count(FailureClass::ScanFeed),
            cart_fetch_failures: failures.count(FailureClass::CartFetch),
        }
    }
}

/// Cloneable front door to a running [`SessionActor`].
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn new(commands: mpsc::UnboundedSender<SessionCommand>) -> Self {
        Self { commands }
    }

    pub async fn start_capture(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::StartCapture).await
    }

    pub async fn stop_capture(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::StopCapture).await
    }

    pub async fn refresh(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::Refresh).await
    }

    pub async fn increment(&self, id: LineId) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Increment(id, reply))
            .await
    }

    pub async fn decrement(&self, id: LineId) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Decrement(id, reply))
            .await
    }

    pub async fn remove(&self, id: LineId) -> Result<RemoveOutcome, SessionError> {
        self.request(|reply| SessionCommand::Remove(id, reply)).await
    }

    pub async fn clear(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::Clear).await
    }

    pub async fn add_by_name(
        &self,
        name: impl Into<String>,
        price: f64,
        description: impl Into<String>,
    ) -> Result<LineId, SessionError> {
        let name = name.into();
        let description = description.into();
        self.request(|reply| SessionCommand::AddByName {
            name,
            price,
            description,
            reply,
        })
        .await
    }

    pub async fn search(&self, query: impl Into<String>) -> Result<Vec<SearchHit>, SessionError> {
        let query = query.into();
        self.request(|reply| SessionCommand::Search(query, reply))
            .await
    }

    pub async fn checkout(&self) -> Result<String, SessionError> {
        self.request(SessionCommand::Checkout).await
    }

    pub async fn resolve_prompt(&self, resolution: PromptResolution) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::ResolvePrompt(resolution, reply))
            .await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(SessionCommand::Snapshot).await
    }

    /// Asks the actor to exit after the command in progress.
    pub fn shutdown(&self) {
        let _ = self.commands.send(SessionCommand::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| SessionError::SessionClosed)?;
        response.await.map_err(|_| SessionError::SessionClosed)?
    }
}

/// Spawns the actor for a new session on the current runtime.
pub fn spawn_session(
    backend: Arc<dyn CartBackend>,
    observer: Arc<dyn CartObserver>,
    settings: &SessionSettings,
) -> (SessionHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = CartSession::new(backend, observer, settings);
    let actor = SessionActor::new(session, Poller::new(settings.poll_interval), rx);
    let task = tokio::spawn(actor.run());
    (SessionHandle::new(tx), task)
}
