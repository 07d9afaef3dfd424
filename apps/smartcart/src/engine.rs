use std::sync::Arc;

use cart_sdk::{
    BackendError, CartBackend, CartLine, LineId, PromptSignal, QuantityAction, SearchHit,
};
use tracing::{debug, info, warn};

use crate::cache::{CacheSnapshot, CartCache};
use crate::config::{RollbackPolicy, SessionSettings};
use crate::error::SessionError;
use crate::failure::{FailureClass, FailureTracker, NoticeLimiter};
use crate::metrics;
use crate::observer::{CartObserver, Notice, PendingPrompt, RenderFrame};

const PROMPT_FEED_DOWN: &str = "Prompt feed unavailable. Pausing cart updates.";
const CART_UPDATE_FAILED: &str = "Failed to update cart";
const CART_UPDATES_PAUSED: &str = "Too many cart update failures. Pausing updates.";

/// What a poll did with the scan-detection feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalOutcome {
    /// Capture inactive or a prompt is still open; the feed was not read.
    Skipped,
    /// Nothing was detected since the last poll.
    Quiet,
    /// A new product was pushed into the cache.
    Added { id: LineId, name: String },
    /// The server reported an add for a name the cache already holds.
    AlreadyPresent(String),
    /// A duplicate prompt was opened for the server line `id`.
    Prompted(LineId),
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub signal: SignalOutcome,
    pub refreshed: bool,
    /// Set when a failure class sits at its ceiling and polling must stop.
    pub suspend: Option<FailureClass>,
}

impl PollReport {
    pub fn ceiling(&self) -> Result<(), SessionError> {
        match self.suspend {
            Some(class) => Err(SessionError::FailureCeilingReached(class)),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptResolution {
    Increment,
    Remove,
    Cancel,
}

/// Result of a remove: the local filter always applies, the server may lag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveOutcome {
    /// A local line was filtered out.
    pub removed: bool,
    /// The server acknowledged the removal.
    pub confirmed: bool,
}

/// Reconciliation engine for one cart session.
///
/// Owns the local cache, the pending duplicate prompt and the failure
/// counters. Every method runs to completion before the next one starts, which
/// is what keeps refreshes from overwriting a newer optimistic patch.
pub struct CartSession {
    backend: Arc<dyn CartBackend>,
    observer: Arc<dyn CartObserver>,
    cache: CartCache,
    prompt: Option<PendingPrompt>,
    failures: FailureTracker,
    cart_notice: NoticeLimiter,
    capture_active: bool,
    cart_retries: u32,
    rollback: RollbackPolicy,
}

impl CartSession {
    pub fn new(
        backend: Arc<dyn CartBackend>,
        observer: Arc<dyn CartObserver>,
        settings: &SessionSettings,
    ) -> Self {
        Self {
            backend,
            observer,
            cache: CartCache::new(),
            prompt: None,
            failures: FailureTracker::new(settings.max_errors),
            cart_notice: NoticeLimiter::new(settings.error_notice_window),
            capture_active: false,
            cart_retries: settings.cart_retries,
            rollback: settings.rollback,
        }
    }

    pub fn cache(&self) -> &CartCache {
        &self.cache
    }

    pub fn pending_prompt(&self) -> Option<&PendingPrompt> {
        self.prompt.as_ref()
    }

    pub fn failures(&self) -> &FailureTracker {
        &self.failures
    }

    pub fn capture_active(&self) -> bool {
        self.capture_active
    }

    /// True once any failure class has reached its ceiling.
    pub fn should_suspend(&self) -> bool {
        self.failures.tripped_class().is_some()
    }

    pub fn frame(&self, highlight: Option<LineId>) -> RenderFrame {
        RenderFrame {
            lines: self.cache.lines().to_vec(),
            total: self.cache.total(),
            item_count: self.cache.item_count(),
            highlight,
        }
    }

    /// One poller tick: read the scan feed, then refresh the cart.
    pub async fn poll_once(&mut self) -> PollReport {
        metrics::POLL_TICKS.inc();
        if self.failures.tripped(FailureClass::CartFetch) {
            return PollReport {
                signal: SignalOutcome::Skipped,
                refreshed: false,
                suspend: Some(FailureClass::CartFetch),
            };
        }

        let signal = if self.capture_active && self.prompt.is_none() {
            self.check_signal().await
        } else {
            SignalOutcome::Skipped
        };
        let highlight = match &signal {
            SignalOutcome::Added { name, .. } => Some(name.clone()),
            _ => None,
        };
        let refreshed = self
            .refresh_with_retries(highlight.as_deref())
            .await
            .is_ok();

        PollReport {
            signal,
            refreshed,
            suspend: self.failures.tripped_class(),
        }
    }

    async fn check_signal(&mut self) -> SignalOutcome {
        match self.backend.poll_signal().await {
            Ok(signal) => {
                self.failures.record_success(FailureClass::ScanFeed);
                self.apply_signal(signal)
            }
            Err(err) => {
                metrics::BACKEND_FAILURES
                    .with_label_values(&[FailureClass::ScanFeed.label()])
                    .inc();
                warn!(target = "smartcart::engine", error = %err, "prompt poll failed");
                if self.failures.record_failure(FailureClass::ScanFeed) {
                    self.observer.notify(&Notice::error(PROMPT_FEED_DOWN));
                }
                SignalOutcome::Failed
            }
        }
    }

    /// Applies one scan-detection signal to the cache.
    pub fn apply_signal(&mut self, signal: PromptSignal) -> SignalOutcome {
        match signal {
            PromptSignal::None => SignalOutcome::Quiet,
            PromptSignal::Add { item } => {
                let id = item.id;
                let name = item.name.clone();
                if !self.cache.push_detected(item) {
                    debug!(target = "smartcart::engine", %name, "detected item already cached");
                    return SignalOutcome::AlreadyPresent(name);
                }
                self.chime();
                self.observer
                    .notify(&Notice::success(format!("{name} added to cart!")));
                self.render(Some(id));
                SignalOutcome::Added { id, name }
            }
            PromptSignal::Prompt { item } => {
                let id = item.id;
                info!(
                    target = "smartcart::engine",
                    name = %item.name,
                    %id,
                    "duplicate prompt opened"
                );
                metrics::PROMPTS_OPENED.inc();
                self.prompt = Some(PendingPrompt { item });
                self.chime();
                self.observer.prompt(self.prompt.as_ref());
                SignalOutcome::Prompted(id)
            }
        }
    }

    /// Explicit authoritative fetch; runs whether or not capture is active.
    pub async fn refresh(&mut self) -> Result<(), SessionError> {
        self.refresh_with_retries(None).await
    }

    /// Fetches `/cart`, retrying immediately on failure, and replaces the
    /// cache wholesale. `highlight` names the line to mark in the render.
    async fn refresh_with_retries(&mut self, highlight: Option<&str>) -> Result<(), SessionError> {
        let attempts = self.cart_retries.saturating_add(1);
        let mut attempt = 0;
        let source = loop {
            attempt += 1;
            match self.backend.fetch_cart().await {
                Ok(snapshot) => {
                    self.cache.replace(snapshot);
                    self.failures.record_success(FailureClass::CartFetch);
                    metrics::CART_REFRESHES.with_label_values(&["ok"]).inc();
                    self.render_named(highlight);
                    return Ok(());
                }
                Err(err) if attempt < attempts => {
                    debug!(
                        target = "smartcart::engine",
                        attempt,
                        error = %err,
                        "cart fetch failed; retrying"
                    );
                }
                Err(err) => break err,
            }
        };

        metrics::CART_REFRESHES.with_label_values(&["error"]).inc();
        metrics::BACKEND_FAILURES
            .with_label_values(&[FailureClass::CartFetch.label()])
            .inc();
        warn!(
            target = "smartcart::engine",
            attempts,
            error = %source,
            "cart fetch exhausted retries"
        );
        let tripped = self.failures.record_failure(FailureClass::CartFetch);
        if self.cart_notice.allow() {
            self.observer.notify(&Notice::error(CART_UPDATE_FAILED));
        }
        if tripped {
            self.observer.notify(&Notice::error(CART_UPDATES_PAUSED));
        }
        self.render_named(highlight);
        Err(SessionError::ExhaustedRetries { attempts, source })
    }

    pub async fn increment(&mut self, id: LineId) -> Result<(), SessionError> {
        ensure_synced(id)?;
        self.adjust(Some(id), id, QuantityAction::Increment).await
    }

    pub async fn decrement(&mut self, id: LineId) -> Result<(), SessionError> {
        ensure_synced(id)?;
        // The cache floors at one; the server is asked regardless and floors too.
        self.adjust(Some(id), id, QuantityAction::Decrement).await
    }

    /// Patches the local line `local` (if any), then sends `action` for the
    /// server line `remote`.
    async fn adjust(
        &mut self,
        local: Option<LineId>,
        remote: LineId,
        action: QuantityAction,
    ) -> Result<(), SessionError> {
        let before = self.cache.snapshot();
        if let Some(local) = local {
            match action {
                QuantityAction::Increment => self.cache.increment(local),
                QuantityAction::Decrement => self.cache.decrement(local),
            };
        }
        self.render(None);

        match self.backend.update_quantity(remote, action).await {
            Ok(_) => {
                let message = match action {
                    QuantityAction::Increment => "Quantity increased",
                    QuantityAction::Decrement => "Quantity decreased",
                };
                self.observer.notify(&Notice::info(message));
                Ok(())
            }
            Err(err) => {
                warn!(
                    target = "smartcart::engine",
                    id = %remote,
                    action = action.label(),
                    error = %err,
                    "quantity update failed"
                );
                self.mutation_failed(before, "Failed to update quantity");
                Err(err.into())
            }
        }
    }

    /// Removes a line locally and asks the server to do the same. A server
    /// failure is reported in the outcome, not as an error.
    pub async fn remove(&mut self, id: LineId) -> Result<RemoveOutcome, SessionError> {
        ensure_synced(id)?;
        Ok(self.remove_line(Some(id), id).await)
    }

    async fn remove_line(&mut self, local: Option<LineId>, remote: LineId) -> RemoveOutcome {
        let removed = local.is_some_and(|local| self.cache.remove(local));
        self.render(None);
        let confirmed = match self.backend.remove_line(remote).await {
            Ok(_) => {
                self.observer.notify(&Notice::info("Item removed"));
                true
            }
            Err(err) => {
                warn!(
                    target = "smartcart::engine",
                    id = %remote,
                    error = %err,
                    "remove not confirmed by server"
                );
                false
            }
        };
        RemoveOutcome { removed, confirmed }
    }

    /// Empties the cart, then re-reads it from the server once the clear is
    /// acknowledged.
    pub async fn clear(&mut self) -> Result<(), SessionError> {
        let before = self.cache.snapshot();
        self.cache.clear();
        self.render(None);

        match self.backend.clear_cart().await {
            Ok(_) => {
                self.observer.notify(&Notice::success("Cart cleared"));
                if let Err(err) = self.refresh().await {
                    warn!(target = "smartcart::engine", error = %err, "refresh after clear failed");
                }
                Ok(())
            }
            Err(err) => {
                warn!(target = "smartcart::engine", error = %err, "clear cart failed");
                self.mutation_failed(before, "Failed to clear cart");
                Err(err.into())
            }
        }
    }

    /// Adds one unit of a product picked from search results.
    ///
    /// Returns the id the line carries afterwards: the server id when the
    /// follow-up refresh succeeded, otherwise the local (possibly provisional)
    /// one.
    pub async fn add_by_name(
        &mut self,
        name: &str,
        price: f64,
        description: &str,
    ) -> Result<LineId, SessionError> {
        let before = self.cache.snapshot();
        let local = self.cache.add_by_name(name, price, description);
        self.render(Some(local));

        match self.backend.add_by_name(name).await {
            Ok(_) => {
                self.chime();
                self.observer
                    .notify(&Notice::success(format!("{name} added to cart!")));
                if let Err(err) = self.refresh_with_retries(Some(name)).await {
                    warn!(target = "smartcart::engine", error = %err, "refresh after add failed");
                }
                Ok(self
                    .cache
                    .find_by_name(name)
                    .map(|line| line.id)
                    .unwrap_or(local))
            }
            Err(err) => {
                warn!(target = "smartcart::engine", %name, error = %err, "add by name failed");
                self.mutation_failed(before, "Failed to add item to cart");
                Err(err.into())
            }
        }
    }

    /// Catalog lookup. Blank queries return nothing without a request.
    pub async fn search(&mut self, query: &str) -> Result<Vec<SearchHit>, SessionError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        match self.backend.search(query).await {
            Ok(hits) => {
                debug!(target = "smartcart::engine", %query, hits = hits.len(), "search finished");
                Ok(hits)
            }
            Err(err) => {
                warn!(target = "smartcart::engine", %query, error = %err, "search failed");
                self.observer
                    .notify(&Notice::error("Search failed. Please try again."));
                Err(err.into())
            }
        }
    }

    /// Pays for the cart. Returns the server's confirmation message.
    pub async fn checkout(&mut self) -> Result<String, SessionError> {
        if self.cache.is_empty() {
            self.observer.notify(&Notice::warning("Your cart is empty"));
            return Err(SessionError::EmptyCart);
        }
        match self.backend.checkout().await {
            Ok(ack) => {
                let message = ack
                    .message
                    .unwrap_or_else(|| "Payment successful!".to_string());
                info!(
                    target = "smartcart::engine",
                    total = self.cache.total(),
                    "checkout complete"
                );
                self.cache.clear();
                self.close_prompt();
                self.render(None);
                self.observer.notify(&Notice::success(message.clone()));
                Ok(message)
            }
            Err(err) => {
                warn!(target = "smartcart::engine", error = %err, "checkout failed");
                self.observer.notify(&Notice::error(checkout_failure(&err)));
                Err(err.into())
            }
        }
    }

    /// Starts a capture session. On success the failure counters start over.
    pub async fn start_capture(&mut self) -> Result<(), SessionError> {
        match self.backend.start_capture().await {
            Ok(_) => {
                self.capture_active = true;
                self.failures.reset();
                info!(target = "smartcart::engine", "capture started");
                self.observer.notify(&Notice::success("Camera started"));
                Ok(())
            }
            Err(err) => {
                warn!(target = "smartcart::engine", error = %err, "capture start failed");
                let message = match &err {
                    BackendError::Rejected(reason) => format!("Failed to start camera: {reason}"),
                    _ => "Error starting camera".to_string(),
                };
                self.observer.notify(&Notice::error(message));
                Err(err.into())
            }
        }
    }

    /// Stops the capture session. A transport failure still leaves the client
    /// treating capture as stopped.
    pub async fn stop_capture(&mut self) -> Result<(), SessionError> {
        match self.backend.stop_capture().await {
            Ok(_) => {
                self.capture_active = false;
                info!(target = "smartcart::engine", "capture stopped");
                self.observer.notify(&Notice::info("Camera stopped"));
                Ok(())
            }
            Err(BackendError::Rejected(reason)) => {
                warn!(target = "smartcart::engine", %reason, "capture stop rejected");
                self.observer
                    .notify(&Notice::error(format!("Failed to stop camera: {reason}")));
                Err(BackendError::Rejected(reason).into())
            }
            Err(err) => {
                warn!(
                    target = "smartcart::engine",
                    error = %err,
                    "capture stop failed; treating capture as stopped"
                );
                self.capture_active = false;
                self.observer.notify(&Notice::error("Error stopping camera"));
                Err(err.into())
            }
        }
    }

    /// Settles the pending duplicate prompt. The prompt is closed whatever the
    /// server says.
    pub async fn resolve_prompt(
        &mut self,
        resolution: PromptResolution,
    ) -> Result<(), SessionError> {
        let Some(PendingPrompt { item }) = self.prompt.take() else {
            return Err(SessionError::NoPendingPrompt);
        };
        self.observer.prompt(None);
        debug!(
            target = "smartcart::engine",
            name = %item.name,
            id = %item.id,
            ?resolution,
            "prompt resolved"
        );

        let local = self.cache.locate(item.id, &item.name);
        match resolution {
            PromptResolution::Increment => {
                self.adjust(local, item.id, QuantityAction::Increment).await
            }
            PromptResolution::Remove => {
                self.remove_line(local, item.id).await;
                Ok(())
            }
            PromptResolution::Cancel => Ok(()),
        }
    }

    fn close_prompt(&mut self) {
        if self.prompt.take().is_some() {
            self.observer.prompt(None);
        }
    }

    fn mutation_failed(&mut self, before: CacheSnapshot, message: &str) {
        metrics::BACKEND_FAILURES.with_label_values(&["mutation"]).inc();
        if self.rollback == RollbackPolicy::Revert {
            self.cache.restore(before);
            self.render(None);
        }
        self.observer.notify(&Notice::error(message));
    }

    fn chime(&self) {
        if let Err(err) = self.observer.chime() {
            debug!(target = "smartcart::engine", error = %err, "chime failed");
        }
    }

    fn render(&self, highlight: Option<LineId>) {
        self.observer.render(&self.frame(highlight));
    }

    fn render_named(&self, highlight: Option<&str>) {
        let highlight = highlight
            .and_then(|name| self.cache.find_by_name(name))
            .map(|line: &CartLine| line.id);
        self.render(highlight);
    }
}

fn ensure_synced(id: LineId) -> Result<(), SessionError> {
    if id.is_provisional() {
        Err(SessionError::UnsyncedLine(id))
    } else {
        Ok(())
    }
}

fn checkout_failure(err: &BackendError) -> String {
    match err {
        BackendError::Rejected(reason) => format!("Checkout failed: {reason}"),
        _ => "Checkout failed. Please try again.".to_string(),
    }
}
