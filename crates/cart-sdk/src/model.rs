use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a cart line.
///
/// Server-assigned ids are never negative. Lines a client creates before the
/// server has confirmed them carry a provisional id from the negative range so
/// the two id spaces cannot collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineId(pub i64);

impl LineId {
    pub fn is_provisional(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for LineId {
    fn from(value: i64) -> Self {
        LineId(value)
    }
}

/// One product entry in a cart. `name` is the de-duplication key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub id: LineId,
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub description: String,
    pub quantity: u32,
}

impl CartLine {
    pub fn subtotal(&self) -> f64 {
        self.price * f64::from(self.quantity)
    }
}

/// Payload of `GET /cart`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartSnapshot {
    pub cart: Vec<CartLine>,
    #[serde(default)]
    pub item_count: Option<u32>,
    #[serde(default)]
    pub total: Option<f64>,
}

impl CartSnapshot {
    pub fn from_lines(cart: Vec<CartLine>) -> Self {
        let item_count = cart.iter().map(|line| line.quantity).sum();
        let total = cart.iter().map(CartLine::subtotal).sum();
        Self {
            cart,
            item_count: Some(item_count),
            total: Some(total),
        }
    }
}

/// Payload of `GET /prompt`: what the detector saw since the last poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PromptSignal {
    None,
    /// The product was new; the server already placed it in its cart.
    Add { item: CartLine },
    /// The product name is already in the cart; the user has to decide.
    Prompt { item: CartLine },
}

/// One `GET /search` hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityAction {
    Increment,
    Decrement,
}

impl QuantityAction {
    pub fn label(self) -> &'static str {
        match self {
            QuantityAction::Increment => "increment",
            QuantityAction::Decrement => "decrement",
        }
    }
}

/// The `{success, error?, message?}` envelope every mutating endpoint returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
            message: None,
        }
    }

    /// Best human-readable reason attached to a rejection.
    pub fn reason(&self) -> Option<&str> {
        self.error.as_deref().or(self.message.as_deref())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct UpdateQuantityRequest {
    pub action: QuantityAction,
}

#[derive(Debug, Serialize)]
pub(crate) struct AddByNameRequest<'a> {
    pub name: &'a str,
}
