//! Value objects for the order domain.

use serde::{Deserialize, Serialize};

/// Product identifier as used by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    /// Creates a new product ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the product ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProductId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ProductId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Money amount in minor currency units (kopecks, cents).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates an amount from minor units.
    pub fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self(0)
    }

    /// Returns the amount in minor units.
    pub fn minor(&self) -> i64 {
        self.0
    }

    /// Returns true if the amount is below zero.
    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies by a quantity, or `None` on overflow.
    pub fn checked_times(&self, quantity: u32) -> Option<Money> {
        self.0.checked_mul(i64::from(quantity)).map(Money)
    }

    /// Adds two amounts, or `None` on overflow.
    pub fn checked_add(&self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{sign}{}.{:02}", (self.0 / 100).abs(), (self.0 % 100).abs())
    }
}

/// What the courier should do when the recipient cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AbsenceStrategy {
    /// Phone the customer and wait for instructions.
    #[default]
    CallCustomer,
    /// Leave the parcel at the door.
    LeaveAtDoor,
    /// Bring the parcel back to the store.
    ReturnToStore,
}

impl AbsenceStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbsenceStrategy::CallCustomer => "CALL_CUSTOMER",
            AbsenceStrategy::LeaveAtDoor => "LEAVE_AT_DOOR",
            AbsenceStrategy::ReturnToStore => "RETURN_TO_STORE",
        }
    }
}

impl std::str::FromStr for AbsenceStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CALL_CUSTOMER" => Ok(AbsenceStrategy::CallCustomer),
            "LEAVE_AT_DOOR" => Ok(AbsenceStrategy::LeaveAtDoor),
            "RETURN_TO_STORE" => Ok(AbsenceStrategy::ReturnToStore),
            other => Err(format!("unknown absence strategy: {other}")),
        }
    }
}

/// A line in an order.
///
/// Name, article and price are a snapshot taken when the line was added, so
/// later catalog edits never change what the customer agreed to pay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub name: String,
    pub article: String,
    /// Price per unit.
    pub price: Money,
    pub quantity: u32,
}

impl OrderItem {
    pub fn new(
        product_id: impl Into<ProductId>,
        name: impl Into<String>,
        article: impl Into<String>,
        price: Money,
        quantity: u32,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            name: name.into(),
            article: article.into(),
            price,
            quantity,
        }
    }

    /// Returns `price * quantity`, or `None` if it does not fit in [`Money`].
    pub fn line_total(&self) -> Option<Money> {
        self.price.checked_times(self.quantity)
    }
}
