//! Order input commands.

use super::{DeliveryInfo, LineItem, Money, PaymentMethod};

/// Input for placing a new order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub items: Vec<LineItem>,
    pub delivery: DeliveryInfo,
    pub delivery_fee: Money,
    pub payment_method: PaymentMethod,

    /// Total the storefront displayed; must match the computed total if set.
    pub expected_total: Option<Money>,
}

impl NewOrder {
    /// Creates an order input with no delivery fee and default delivery details.
    pub fn new(items: Vec<LineItem>, payment_method: PaymentMethod) -> Self {
        Self {
            items,
            delivery: DeliveryInfo::default(),
            delivery_fee: Money::zero(),
            payment_method,
            expected_total: None,
        }
    }

    pub fn with_delivery(mut self, delivery: DeliveryInfo) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn with_delivery_fee(mut self, fee: Money) -> Self {
        self.delivery_fee = fee;
        self
    }

    pub fn with_expected_total(mut self, total: Money) -> Self {
        self.expected_total = Some(total);
        self
    }
}
