//! Order aggregate root.

use chrono::{DateTime, TimeDelta, Utc};
use common::{OrderId, SubjectId};
use order_store::{OrderDocument, Version};
use serde::{Deserialize, Serialize};

use crate::gateway::PaymentOutcome;

use super::{
    DeliveryInfo, FulfillmentStatus, LineItem, Money, NewOrder, OrderError, PaymentMethod,
    PaymentReceipt, PaymentStatus,
};

/// Whether a transition modified the order.
///
/// `Unchanged` results are not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Changed,
    Unchanged,
}

impl Transition {
    pub fn is_changed(&self) -> bool {
        matches!(self, Transition::Changed)
    }
}

/// Order aggregate root.
///
/// Carries two independent state machines: fulfillment (driven by admins)
/// and payment (driven by admins for cash on delivery, by provider callbacks
/// otherwise). All transition methods are pure; persistence is handled by
/// [`crate::OrderEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    id: OrderId,
    owner_id: SubjectId,
    items: Vec<LineItem>,
    delivery_fee: Money,
    total_amount: Money,
    #[serde(default)]
    delivery: DeliveryInfo,
    payment_method: PaymentMethod,
    payment_status: PaymentStatus,
    fulfillment_status: FulfillmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payment_provider_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    charge_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    payment_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payment_receipt: Option<PaymentReceipt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payment_failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,

    /// Store version; lives in the document envelope, not the body.
    #[serde(skip)]
    version: Version,
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn owner_id(&self) -> &SubjectId {
        &self.owner_id
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn delivery_fee(&self) -> Money {
        self.delivery_fee
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn delivery(&self) -> &DeliveryInfo {
        &self.delivery
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn fulfillment_status(&self) -> FulfillmentStatus {
        self.fulfillment_status
    }

    pub fn payment_provider_ref(&self) -> Option<&str> {
        self.payment_provider_ref.as_deref()
    }

    pub fn charge_started_at(&self) -> Option<DateTime<Utc>> {
        self.charge_started_at
    }

    pub fn payment_attempts(&self) -> u32 {
        self.payment_attempts
    }

    pub fn payment_receipt(&self) -> Option<&PaymentReceipt> {
        self.payment_receipt.as_ref()
    }

    pub fn payment_failure_reason(&self) -> Option<&str> {
        self.payment_failure_reason.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns true if `subject` placed this order.
    pub fn is_owned_by(&self, subject: &SubjectId) -> bool {
        &self.owner_id == subject
    }

    /// Returns true if a charge attempt is claimed and not yet settled.
    pub fn has_charge_in_flight(&self) -> bool {
        self.charge_started_at.is_some()
    }
}

// Transitions
impl Order {
    /// Validates the input and builds a new order in `{Received, Pending}`.
    pub fn place(
        id: OrderId,
        owner_id: SubjectId,
        input: NewOrder,
        now: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        if input.items.is_empty() {
            return Err(OrderError::NoItems);
        }
        if input.delivery_fee.is_negative() {
            return Err(OrderError::InvalidDeliveryFee {
                fee: input.delivery_fee.cents(),
            });
        }

        let mut total = input.delivery_fee;
        for item in &input.items {
            item.validate()?;
            total = item
                .subtotal()
                .and_then(|subtotal| total.checked_add(subtotal))
                .ok_or(OrderError::AmountOverflow)?;
        }

        if !total.is_positive() {
            return Err(OrderError::InvalidTotal {
                total: total.cents(),
            });
        }
        if let Some(expected) = input.expected_total
            && expected != total
        {
            return Err(OrderError::TotalMismatch {
                expected,
                computed: total,
            });
        }

        Ok(Self {
            id,
            owner_id,
            items: input.items,
            delivery_fee: input.delivery_fee,
            total_amount: total,
            delivery: input.delivery,
            payment_method: input.payment_method,
            payment_status: PaymentStatus::Pending,
            fulfillment_status: FulfillmentStatus::Received,
            payment_provider_ref: None,
            charge_started_at: None,
            payment_attempts: 0,
            payment_receipt: None,
            payment_failure_reason: None,
            created_at: now,
            updated_at: now,
            version: Version::initial(),
        })
    }

    /// Moves fulfillment to `target`, which must be the current stage or the next one.
    pub fn advance_fulfillment(
        &mut self,
        target: FulfillmentStatus,
    ) -> Result<Transition, OrderError> {
        if !self.fulfillment_status.can_advance_to(target) {
            return Err(OrderError::InvalidFulfillmentTransition {
                from: self.fulfillment_status,
                to: target,
            });
        }
        if self.fulfillment_status == target {
            return Ok(Transition::Unchanged);
        }
        self.fulfillment_status = target;
        Ok(Transition::Changed)
    }

    /// Admin override of the payment status. Cash on delivery only.
    pub fn set_payment_status_manual(
        &mut self,
        status: PaymentStatus,
    ) -> Result<Transition, OrderError> {
        if self.payment_method != PaymentMethod::CashOnDelivery {
            return Err(OrderError::ManualPaymentNotAllowed {
                method: self.payment_method,
            });
        }
        if self.payment_status == status {
            return Ok(Transition::Unchanged);
        }
        self.payment_status = status;
        Ok(Transition::Changed)
    }

    /// Claims a new charge attempt and returns its attempt number.
    ///
    /// A claim without a provider ref older than `claim_ttl` is treated as
    /// abandoned and may be taken over.
    pub fn claim_charge(
        &mut self,
        now: DateTime<Utc>,
        claim_ttl: TimeDelta,
    ) -> Result<u32, OrderError> {
        if !self.payment_method.is_provider_mediated() {
            return Err(OrderError::ProviderPaymentNotSupported {
                method: self.payment_method,
            });
        }
        if !self.payment_status.can_initiate_charge() {
            return Err(OrderError::PaymentNotInitiable {
                status: self.payment_status,
            });
        }
        if let Some(started_at) = self.charge_started_at {
            let abandoned = self.payment_provider_ref.is_none() && now - started_at >= claim_ttl;
            if !abandoned {
                return Err(OrderError::ChargeInFlight);
            }
        }

        self.payment_status = PaymentStatus::Pending;
        self.payment_failure_reason = None;
        self.charge_started_at = Some(now);
        self.payment_attempts += 1;
        Ok(self.payment_attempts)
    }

    fn holds_dispatch_claim(&self, attempt: u32) -> bool {
        self.payment_attempts == attempt
            && self.charge_started_at.is_some()
            && self.payment_provider_ref.is_none()
            && self.payment_status == PaymentStatus::Pending
    }

    /// Stores the provider ref for the claimed `attempt`.
    pub fn record_provider_ref(
        &mut self,
        attempt: u32,
        provider_ref: &str,
    ) -> Result<Transition, OrderError> {
        if !self.holds_dispatch_claim(attempt) {
            return Err(OrderError::StaleChargeAttempt { attempt });
        }
        self.payment_provider_ref = Some(provider_ref.to_string());
        Ok(Transition::Changed)
    }

    /// Drops the claim for `attempt` after the provider could not be reached.
    pub fn release_charge(&mut self, attempt: u32) -> Transition {
        if !self.holds_dispatch_claim(attempt) {
            return Transition::Unchanged;
        }
        self.charge_started_at = None;
        Transition::Changed
    }

    /// Marks `attempt` failed after the provider refused it outright.
    pub fn reject_charge(&mut self, attempt: u32, reason: &str) -> Transition {
        if !self.holds_dispatch_claim(attempt) {
            return Transition::Unchanged;
        }
        self.charge_started_at = None;
        self.payment_status = PaymentStatus::Failed;
        self.payment_failure_reason = Some(reason.to_string());
        Transition::Changed
    }

    /// Applies a provider's final word on the outstanding charge.
    ///
    /// Paid orders are never changed by a callback, so redelivered
    /// notifications are no-ops.
    pub fn apply_payment_outcome(
        &mut self,
        outcome: &PaymentOutcome,
    ) -> Result<Transition, OrderError> {
        if !self.payment_method.is_provider_mediated() {
            return Err(OrderError::ProviderPaymentNotSupported {
                method: self.payment_method,
            });
        }
        if self.payment_status != PaymentStatus::Pending {
            return Ok(Transition::Unchanged);
        }

        match outcome {
            PaymentOutcome::Succeeded { receipt } => {
                self.payment_status = PaymentStatus::Paid;
                self.payment_receipt = receipt.clone();
                self.payment_failure_reason = None;
                self.charge_started_at = None;
                if let Some(paid) = self.paid_amount_mismatch() {
                    tracing::warn!(order_id = %self.id, %paid, total = %self.total_amount, "provider reported a different amount than the order total");
                }
            }
            PaymentOutcome::Failed { reason } => {
                self.payment_status = PaymentStatus::Failed;
                self.payment_failure_reason = Some(reason.clone());
                self.payment_provider_ref = None;
                self.charge_started_at = None;
            }
        }
        Ok(Transition::Changed)
    }

    /// Returns the amount on the receipt when it matches neither the total
    /// nor the total rounded up to whole units.
    ///
    /// The order stays paid either way; the provider has already collected.
    pub fn paid_amount_mismatch(&self) -> Option<Money> {
        let paid = self.payment_receipt.as_ref()?.amount_paid?;
        let whole_units = Money::from_cents(self.total_amount.whole_units_ceil() * 100);
        (paid != self.total_amount && paid != whole_units).then_some(paid)
    }

    /// Refreshes `updated_at` before a write.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    pub(crate) fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}

// Persistence
impl Order {
    /// Converts the order into a store document.
    pub fn to_document(&self) -> Result<OrderDocument, serde_json::Error> {
        let body = serde_json::to_value(self)?;
        Ok(
            OrderDocument::new(self.id, self.owner_id.clone(), self.created_at, body)
                .with_provider_ref(self.payment_provider_ref.clone())
                .with_updated_at(self.updated_at),
        )
    }

    /// Rebuilds an order from a store document.
    pub fn from_document(document: OrderDocument) -> Result<Self, serde_json::Error> {
        let mut order: Order = serde_json::from_value(document.body)?;
        order.version = document.version;
        Ok(order)
    }
}
