use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::Mutex;

use crate::backend::{BackendError, CartBackend};
use crate::model::{Ack, CartLine, CartSnapshot, LineId, PromptSignal, QuantityAction, SearchHit};

/// Backend endpoints, used to inject faults and inspect traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    CameraStart,
    CameraStop,
    Prompt,
    Cart,
    Update,
    Remove,
    Clear,
    Add,
    Search,
    Checkout,
}

/// A call observed by [`InMemoryCartBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    CameraStart,
    CameraStop,
    Prompt,
    Cart,
    Update(LineId, QuantityAction),
    Remove(LineId),
    Clear,
    Add(String),
    Search(String),
    Checkout,
}

impl RecordedCall {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            RecordedCall::CameraStart => Endpoint::CameraStart,
            RecordedCall::CameraStop => Endpoint::CameraStop,
            RecordedCall::Prompt => Endpoint::Prompt,
            RecordedCall::Cart => Endpoint::Cart,
            RecordedCall::Update(..) => Endpoint::Update,
            RecordedCall::Remove(_) => Endpoint::Remove,
            RecordedCall::Clear => Endpoint::Clear,
            RecordedCall::Add(_) => Endpoint::Add,
            RecordedCall::Search(_) => Endpoint::Search,
            RecordedCall::Checkout => Endpoint::Checkout,
        }
    }
}

#[derive(Default)]
struct ServerState {
    catalog: Vec<SearchHit>,
    cart: Vec<CartLine>,
    next_id: i64,
    signals: VecDeque<PromptSignal>,
    capture_active: bool,
    camera_available: bool,
    faults: HashMap<Endpoint, u32>,
    calls: Vec<RecordedCall>,
}

impl ServerState {
    fn record(&mut self, call: RecordedCall) -> Result<(), BackendError> {
        let endpoint = call.endpoint();
        self.calls.push(call);
        match self.faults.get_mut(&endpoint) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(BackendError::HttpStatus(StatusCode::SERVICE_UNAVAILABLE))
            }
            _ => Ok(()),
        }
    }

    fn product(&self, name: &str) -> Option<&SearchHit> {
        self.catalog.iter().find(|hit| hit.name == name)
    }

    fn mint_id(&mut self) -> LineId {
        let id = LineId(self.next_id);
        self.next_id += 1;
        id
    }
}

/// In-memory adapter mirroring the backend's cart semantics.
///
/// Ids are minted from a monotonic counter, so they stay unique across
/// removals. Faults can be queued per endpoint and every call is recorded.
pub struct InMemoryCartBackend {
    state: Mutex<ServerState>,
}

impl InMemoryCartBackend {
    pub fn new() -> Arc<Self> {
        Self::with_catalog(Vec::new())
    }

    pub fn with_catalog(catalog: Vec<SearchHit>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ServerState {
                catalog,
                camera_available: true,
                ..ServerState::default()
            }),
        })
    }

    /// Simulates the detector recognising `name` in front of the camera.
    ///
    /// Returns `false` when the product is unknown or capture is not running.
    pub async fn detect(&self, name: &str) -> bool {
        let mut state = self.state.lock().await;
        if !state.capture_active {
            return false;
        }
        let Some(product) = state.product(name).cloned() else {
            return false;
        };
        let existing = state
            .cart
            .iter()
            .find(|line| line.name == name)
            .map(|line| (line.id, line.quantity));
        let signal = match existing {
            Some((id, quantity)) => PromptSignal::Prompt {
                item: CartLine {
                    id,
                    name: product.name,
                    price: product.price,
                    description: product.description,
                    quantity,
                },
            },
            None => {
                let line = CartLine {
                    id: state.mint_id(),
                    name: product.name,
                    price: product.price,
                    description: product.description,
                    quantity: 1,
                };
                state.cart.push(line.clone());
                PromptSignal::Add { item: line }
            }
        };
        state.signals.push_back(signal);
        true
    }

    /// Queues a raw signal for the next `GET /prompt`.
    pub async fn push_signal(&self, signal: PromptSignal) {
        self.state.lock().await.signals.push_back(signal);
    }

    /// Places a line in the server cart as is.
    pub async fn seed_line(&self, line: CartLine) {
        let mut state = self.state.lock().await;
        state.next_id = state.next_id.max(line.id.0 + 1);
        state.cart.push(line);
    }

    /// The next `times` calls to `endpoint` fail with a 503.
    pub async fn fail_next(&self, endpoint: Endpoint, times: u32) {
        self.state.lock().await.faults.insert(endpoint, times);
    }

    pub async fn set_camera_available(&self, available: bool) {
        self.state.lock().await.camera_available = available;
    }

    pub async fn cart_lines(&self) -> Vec<CartLine> {
        self.state.lock().await.cart.clone()
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn count_calls(&self, endpoint: Endpoint) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|call| call.endpoint() == endpoint)
            .count()
    }

    pub async fn capture_active(&self) -> bool {
        self.state.lock().await.capture_active
    }
}

#[async_trait]
impl CartBackend for InMemoryCartBackend {
    async fn start_capture(&self) -> Result<Ack, BackendError> {
        let mut state = self.state.lock().await;
        state.record(RecordedCall::CameraStart)?;
        if !state.camera_available {
            return Err(BackendError::Rejected("Cannot Access Webcam".into()));
        }
        state.capture_active = true;
        Ok(Ack::ok())
    }

    async fn stop_capture(&self) -> Result<Ack, BackendError> {
        let mut state = self.state.lock().await;
        state.record(RecordedCall::CameraStop)?;
        state.capture_active = false;
        Ok(Ack::ok())
    }

    async fn poll_signal(&self) -> Result<PromptSignal, BackendError> {
        let mut state = self.state.lock().await;
        state.record(RecordedCall::Prompt)?;
        Ok(state.signals.pop_front().unwrap_or(PromptSignal::None))
    }

    async fn fetch_cart(&self) -> Result<CartSnapshot, BackendError> {
        let mut state = self.state.lock().await;
        state.record(RecordedCall::Cart)?;
        Ok(CartSnapshot::from_lines(state.cart.clone()))
    }

    async fn update_quantity(
        &self,
        id: LineId,
        action: QuantityAction,
    ) -> Result<Ack, BackendError> {
        let mut state = self.state.lock().await;
        state.record(RecordedCall::Update(id, action))?;
        let Some(line) = state.cart.iter_mut().find(|line| line.id == id) else {
            return Err(BackendError::Rejected(format!("no cart line with id {id}")));
        };
        match action {
            QuantityAction::Increment => line.quantity += 1,
            QuantityAction::Decrement if line.quantity > 1 => line.quantity -= 1,
            QuantityAction::Decrement => {}
        }
        Ok(Ack::ok())
    }

    async fn remove_line(&self, id: LineId) -> Result<Ack, BackendError> {
        let mut state = self.state.lock().await;
        state.record(RecordedCall::Remove(id))?;
        state.cart.retain(|line| line.id != id);
        Ok(Ack::ok())
    }

    async fn clear_cart(&self) -> Result<Ack, BackendError> {
        let mut state = self.state.lock().await;
        state.record(RecordedCall::Clear)?;
        state.cart.clear();
        Ok(Ack::ok())
    }

    async fn add_by_name(&self, name: &str) -> Result<Ack, BackendError> {
        let mut state = self.state.lock().await;
        state.record(RecordedCall::Add(name.to_string()))?;
        let Some(product) = state.product(name).cloned() else {
            return Err(BackendError::Rejected(format!("unknown product '{name}'")));
        };
        if let Some(index) = state.cart.iter().position(|line| line.name == name) {
            state.cart[index].quantity += 1;
        } else {
            let id = state.mint_id();
            state.cart.push(CartLine {
                id,
                name: product.name,
                price: product.price,
                description: product.description,
                quantity: 1,
            });
        }
        Ok(Ack::ok())
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, BackendError> {
        let mut state = self.state.lock().await;
        state.record(RecordedCall::Search(query.to_string()))?;
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        Ok(state
            .catalog
            .iter()
            .filter(|hit| hit.name.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    async fn checkout(&self) -> Result<Ack, BackendError> {
        let mut state = self.state.lock().await;
        state.record(RecordedCall::Checkout)?;
        state.cart.clear();
        Ok(Ack {
            success: true,
            error: None,
            message: Some("Payment successful! Thank You For Shopping.".into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<SearchHit> {
        vec![
            SearchHit {
                name: "Milk".into(),
                price: 60.0,
                description: "1L".into(),
            },
            SearchHit {
                name: "Marie Biscuits".into(),
                price: 30.0,
                description: "Marie Biscuits - 250g pack".into(),
            },
        ]
    }

    #[tokio::test]
    async fn detection_adds_then_prompts() {
        let backend = InMemoryCartBackend::with_catalog(catalog());
        assert!(!backend.detect("Milk").await, "capture is not running yet");

        backend.start_capture().await.unwrap();
        assert!(backend.detect("Milk").await);
        assert!(backend.detect("Milk").await);

        let first = backend.poll_signal().await.unwrap();
        assert!(matches!(first, PromptSignal::Add { ref item } if item.name == "Milk"));
        let second = backend.poll_signal().await.unwrap();
        assert!(matches!(second, PromptSignal::Prompt { ref item } if item.quantity == 1));
        assert_eq!(backend.poll_signal().await.unwrap(), PromptSignal::None);
    }

    #[tokio::test]
    async fn ids_stay_unique_after_removal() {
        let backend = InMemoryCartBackend::with_catalog(catalog());
        backend.add_by_name("Milk").await.unwrap();
        backend.add_by_name("Marie Biscuits").await.unwrap();
        backend.remove_line(LineId(0)).await.unwrap();
        backend.add_by_name("Milk").await.unwrap();

        let ids: Vec<_> = backend.cart_lines().await.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![LineId(1), LineId(2)]);
    }

    #[tokio::test]
    async fn injected_faults_are_consumed() {
        let backend = InMemoryCartBackend::with_catalog(catalog());
        backend.fail_next(Endpoint::Cart, 2).await;
        assert!(backend.fetch_cart().await.is_err());
        assert!(backend.fetch_cart().await.is_err());
        assert!(backend.fetch_cart().await.is_ok());
        assert_eq!(backend.count_calls(Endpoint::Cart).await, 3);
    }

    #[tokio::test]
    async fn decrement_floors_at_one() {
        let backend = InMemoryCartBackend::with_catalog(catalog());
        backend.add_by_name("Milk").await.unwrap();
        backend
            .update_quantity(LineId(0), QuantityAction::Decrement)
            .await
            .unwrap();
        assert_eq!(backend.cart_lines().await[0].quantity, 1);
    }
}
