//! Value objects for the order domain.

use serde::{Deserialize, Serialize};

use super::OrderError;

/// Catalogue reference of a product (SKU or catalogue document id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductRef(String);

impl ProductRef {
    /// Creates a new product reference from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the product reference as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the reference is empty or whitespace.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for ProductRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProductRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProductRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Money amount in minor units (cents) to avoid floating point issues.
///
/// Serialized as a bare integer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a new Money amount from minor units.
    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self(0)
    }

    /// Returns the amount in minor units.
    pub fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the amount in whole units, rounded up.
    ///
    /// Mobile-money providers only accept whole amounts; rounding up never
    /// undercharges.
    pub fn whole_units_ceil(&self) -> i64 {
        self.0.div_euclid(100) + i64::from(self.0.rem_euclid(100) != 0)
    }

    /// Returns true if the amount is positive.
    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Returns true if the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Adds another amount, returning `None` on overflow.
    pub fn checked_add(&self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    /// Multiplies by a quantity, returning `None` on overflow.
    pub fn checked_mul(&self, quantity: u32) -> Option<Money> {
        self.0.checked_mul(i64::from(quantity)).map(Money)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// A line item in an order. Immutable once the order exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_ref: ProductRef,
    pub name: String,
    pub unit_price: Money,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

impl LineItem {
    /// Creates a line item without size or image.
    pub fn new(
        product_ref: impl Into<ProductRef>,
        name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            product_ref: product_ref.into(),
            name: name.into(),
            unit_price,
            quantity,
            size_label: None,
            image_ref: None,
        }
    }

    /// Sets the size label.
    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size_label = Some(size.into());
        self
    }

    /// Sets the image URL.
    pub fn with_image(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = Some(image_ref.into());
        self
    }

    /// Checks the item is well formed.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.product_ref.is_blank() {
            return Err(OrderError::MissingProductRef);
        }
        if self.name.trim().is_empty() {
            return Err(OrderError::MissingItemName {
                product_ref: self.product_ref.to_string(),
            });
        }
        if self.quantity == 0 {
            return Err(OrderError::InvalidQuantity {
                quantity: self.quantity,
            });
        }
        if !self.unit_price.is_positive() {
            return Err(OrderError::InvalidPrice {
                price: self.unit_price.cents(),
            });
        }
        Ok(())
    }

    /// Returns `unit_price × quantity`, or `None` on overflow.
    pub fn subtotal(&self) -> Option<Money> {
        self.unit_price.checked_mul(self.quantity)
    }
}

fn default_customer_name() -> String {
    "Customer".to_string()
}

/// Delivery details captured at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryInfo {
    #[serde(default = "default_customer_name")]
    pub customer_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zipcode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl Default for DeliveryInfo {
    fn default() -> Self {
        Self {
            customer_name: default_customer_name(),
            email: None,
            phone: None,
            street: None,
            city: None,
            state: None,
            zipcode: None,
            country: None,
        }
    }
}

/// Provider receipt recorded on a successful payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub receipt_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_paid: Option<Money>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_date: Option<String>,
}

impl PaymentReceipt {
    pub fn new(receipt_number: impl Into<String>) -> Self {
        Self {
            receipt_number: receipt_number.into(),
            amount_paid: None,
            payer_phone: None,
            transaction_date: None,
        }
    }
}
