//! Order lifecycle engine.

use std::time::Instant;

use chrono::{TimeDelta, Utc};
use common::OrderId;
use order_store::{OrderQuery, OrderStore, OrderStoreError, ParkedCallback};

use crate::access::Identity;
use crate::error::DomainError;
use crate::gateway::{ChargeRequest, GatewayError, PaymentGateway, PaymentOutcome, ProviderCallback, ProviderRef};
use crate::order::{
    FulfillmentStatus, NewOrder, Order, OrderError, PaymentStatus, Transition,
};

/// Tuning knobs for [`OrderEngine`].
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// How many times a read-validate-write is retried after a version conflict.
    pub max_conflict_retries: u32,

    /// Age after which a charge claim that never got a provider ref is
    /// considered abandoned.
    pub dispatch_claim_ttl: TimeDelta,

    /// How long a callback for a not yet recorded provider ref is kept.
    pub parked_callback_ttl: TimeDelta,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 5,
            dispatch_claim_ttl: TimeDelta::seconds(120),
            parked_callback_ttl: TimeDelta::minutes(15),
        }
    }
}

/// Paging for order listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Page {
    fn apply(self, query: OrderQuery) -> OrderQuery {
        let query = match self.limit {
            Some(limit) => query.limit(limit),
            None => query,
        };
        match self.offset {
            Some(offset) => query.offset(offset),
            None => query,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Locator<'a> {
    Id(OrderId),
    ProviderRef(&'a str),
}

/// The only component that changes order state.
///
/// Every mutation is an optimistic read-validate-write against the store:
/// the order is loaded, the transition is applied to the in-memory entity,
/// and the result is written with the version that was read. A version
/// conflict reruns the whole cycle on fresh state.
pub struct OrderEngine<S, G> {
    store: S,
    gateway: G,
    config: EngineConfig,
}

impl<S: OrderStore, G: PaymentGateway> OrderEngine<S, G> {
    /// Creates an engine with the default configuration.
    pub fn new(store: S, gateway: G) -> Self {
        Self::with_config(store, gateway, EngineConfig::default())
    }

    pub fn with_config(store: S, gateway: G, config: EngineConfig) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns a reference to the payment gateway.
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Validates and persists a new order owned by the caller.
    #[tracing::instrument(skip(self, identity, input), fields(subject = %identity.subject_id, method = %input.payment_method))]
    pub async fn create_order(
        &self,
        identity: &Identity,
        input: NewOrder,
    ) -> Result<Order, DomainError> {
        let mut order = Order::place(
            OrderId::new(),
            identity.subject_id.clone(),
            input,
            Utc::now(),
        )?;

        let version = self.store.insert(order.to_document()?).await?;
        order.set_version(version);

        metrics::counter!("orders_created_total", "method" => order.payment_method().as_str())
            .increment(1);
        tracing::info!(order_id = %order.id(), total = %order.total_amount(), "order created");
        Ok(order)
    }

    /// Moves an order's fulfillment stage forward. Admin only.
    #[tracing::instrument(skip(self, identity), fields(subject = %identity.subject_id))]
    pub async fn advance_fulfillment(
        &self,
        identity: &Identity,
        order_id: OrderId,
        target: FulfillmentStatus,
    ) -> Result<Order, DomainError> {
        require_admin(identity, "advance fulfillment")?;

        let (order, transition) = self
            .mutate(Locator::Id(order_id), |order| {
                Ok(order.advance_fulfillment(target)?)
            })
            .await?;

        if transition.is_changed() {
            metrics::counter!("fulfillment_transitions_total", "to" => target.as_str())
                .increment(1);
            tracing::info!(%order_id, status = %target, "fulfillment advanced");
        }
        Ok(order)
    }

    /// Admin override of the payment status of a cash-on-delivery order.
    #[tracing::instrument(skip(self, identity), fields(subject = %identity.subject_id))]
    pub async fn set_payment_status_manual(
        &self,
        identity: &Identity,
        order_id: OrderId,
        status: PaymentStatus,
    ) -> Result<Order, DomainError> {
        require_admin(identity, "set payment status")?;

        let (order, transition) = self
            .mutate(Locator::Id(order_id), |order| {
                Ok(order.set_payment_status_manual(status)?)
            })
            .await?;

        if transition.is_changed() {
            tracing::info!(%order_id, %status, "payment status set manually");
        }
        Ok(order)
    }

    /// Starts a provider charge for the caller's order.
    ///
    /// The attempt is claimed on the order before the provider is called and
    /// the returned ref is recorded only if that claim is still current. A
    /// callback parked under the returned ref is applied in the same write.
    #[tracing::instrument(skip(self, identity, payer_contact), fields(subject = %identity.subject_id))]
    pub async fn initiate_payment(
        &self,
        identity: &Identity,
        order_id: OrderId,
        payer_contact: &str,
    ) -> Result<ProviderRef, DomainError> {
        let payer_contact = payer_contact.trim();
        if payer_contact.is_empty() {
            return Err(OrderError::PayerContactRequired.into());
        }

        let now = Utc::now();
        let ttl = self.config.dispatch_claim_ttl;
        let mut attempt = 0;
        let (order, _) = self
            .mutate(Locator::Id(order_id), |order| {
                if !order.is_owned_by(&identity.subject_id) {
                    return Err(DomainError::Authorization(
                        "only the order owner can pay for it".into(),
                    ));
                }
                attempt = order.claim_charge(now, ttl)?;
                Ok(Transition::Changed)
            })
            .await?;

        let request = ChargeRequest {
            order_id,
            method: order.payment_method(),
            amount: order.total_amount(),
            payer_contact: payer_contact.to_string(),
        };

        let started = Instant::now();
        let result = self.gateway.initiate_charge(request).await;
        metrics::histogram!("payment_gateway_request_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(provider_ref) => {
                // The provider may have answered before we got here
                let parked = self
                    .parked_outcome(&provider_ref)
                    .await
                    .unwrap_or_else(|e| {
                        tracing::warn!(%order_id, %provider_ref, error = %e, "could not check for a parked callback");
                        None
                    });

                let (order, _) = self
                    .mutate(Locator::Id(order_id), |order| {
                        let recorded = order.record_provider_ref(attempt, provider_ref.as_str())?;
                        if let Some(outcome) = &parked {
                            order.apply_payment_outcome(outcome)?;
                        }
                        Ok(recorded)
                    })
                    .await
                    .inspect_err(|e| {
                        tracing::error!(%order_id, %provider_ref, error = %e, "charge dispatched but provider ref not recorded");
                    })?;

                metrics::counter!("payment_initiations_total", "outcome" => "dispatched")
                    .increment(1);
                tracing::info!(%order_id, %provider_ref, attempt, "payment initiated");

                match parked {
                    Some(outcome) => {
                        metrics::counter!(
                            "payment_callbacks_total",
                            "outcome" => outcome.as_str(),
                            "applied" => "true"
                        )
                        .increment(1);
                        tracing::info!(%order_id, %provider_ref, status = %order.payment_status(), "parked callback applied");
                        self.discard_parked(&provider_ref).await;
                    }
                    None => self.settle_late_parked(&provider_ref).await,
                }
                Ok(provider_ref)
            }
            Err(err) => {
                let outcome = match &err {
                    GatewayError::Unavailable(_) => "unavailable",
                    GatewayError::Rejected(_) => "rejected",
                };
                metrics::counter!("payment_initiations_total", "outcome" => outcome).increment(1);
                tracing::warn!(%order_id, attempt, error = %err, "payment initiation failed");

                let settle = self
                    .mutate(Locator::Id(order_id), |order| {
                        Ok(match &err {
                            GatewayError::Unavailable(_) => order.release_charge(attempt),
                            GatewayError::Rejected(reason) => order.reject_charge(attempt, reason),
                        })
                    })
                    .await;
                if let Err(e) = settle {
                    tracing::error!(%order_id, attempt, error = %e, "failed to release charge claim");
                }

                Err(err.into())
            }
        }
    }

    /// Applies a provider callback to the order that carries its ref.
    ///
    /// Redelivered callbacks are no-ops, so at-least-once delivery is safe.
    /// A callback whose ref no order carries yet is parked and still reported
    /// as [`DomainError::ProviderRefNotFound`]; the charge that owns the ref
    /// applies it when the ref is recorded.
    #[tracing::instrument(skip(self, callback), fields(provider_ref = %callback.provider_ref, outcome = callback.outcome.as_str()))]
    pub async fn reconcile_payment_callback(
        &self,
        callback: &ProviderCallback,
    ) -> Result<Order, DomainError> {
        match self.apply_callback(callback).await {
            Err(DomainError::ProviderRefNotFound(provider_ref)) => {
                self.park(callback).await?;

                // The ref may have been recorded while the callback was parked
                match self.apply_callback(callback).await {
                    Ok(order) => {
                        self.discard_parked(&callback.provider_ref).await;
                        Ok(order)
                    }
                    Err(DomainError::ProviderRefNotFound(_)) => {
                        tracing::warn!(%provider_ref, "callback for unrecorded provider reference parked");
                        Err(DomainError::ProviderRefNotFound(provider_ref))
                    }
                    Err(e) => Err(e),
                }
            }
            other => other,
        }
    }

    async fn apply_callback(&self, callback: &ProviderCallback) -> Result<Order, DomainError> {
        let (order, transition) = self
            .mutate(
                Locator::ProviderRef(callback.provider_ref.as_str()),
                |order| {
                    if order.payment_status() == PaymentStatus::Paid
                        && !callback.outcome.is_success()
                    {
                        tracing::warn!(order_id = %order.id(), "failure callback for a paid order ignored");
                    }
                    Ok(order.apply_payment_outcome(&callback.outcome)?)
                },
            )
            .await?;

        let applied = if transition.is_changed() { "true" } else { "false" };
        metrics::counter!(
            "payment_callbacks_total",
            "outcome" => callback.outcome.as_str(),
            "applied" => applied
        )
        .increment(1);

        match (&callback.outcome, transition) {
            (PaymentOutcome::Succeeded { .. }, Transition::Changed) => {
                tracing::info!(order_id = %order.id(), "payment reconciled as paid");
            }
            (PaymentOutcome::Failed { reason }, Transition::Changed) => {
                tracing::info!(order_id = %order.id(), %reason, "payment reconciled as failed");
            }
            (_, Transition::Unchanged) => {
                tracing::debug!(order_id = %order.id(), "duplicate callback ignored");
            }
        }
        Ok(order)
    }

    async fn park(&self, callback: &ProviderCallback) -> Result<(), DomainError> {
        let now = Utc::now();
        let purged = self
            .store
            .purge_parked_callbacks(now - self.config.parked_callback_ttl)
            .await?;
        if purged > 0 {
            tracing::debug!(purged, "stale parked callbacks purged");
        }

        let outcome = serde_json::to_value(&callback.outcome)?;
        self.store
            .park_callback(ParkedCallback::new(
                callback.provider_ref.as_str(),
                outcome,
                now,
            ))
            .await?;
        metrics::counter!("payment_callbacks_parked_total", "outcome" => callback.outcome.as_str())
            .increment(1);
        Ok(())
    }

    /// Returns the outcome parked under `provider_ref` unless it has gone stale.
    async fn parked_outcome(
        &self,
        provider_ref: &ProviderRef,
    ) -> Result<Option<PaymentOutcome>, DomainError> {
        let Some(parked) = self.store.parked_callback(provider_ref.as_str()).await? else {
            return Ok(None);
        };
        if Utc::now() - parked.received_at > self.config.parked_callback_ttl {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(parked.outcome)?))
    }

    /// Applies a callback parked after the ref was recorded but before it
    /// became visible to the callback's own lookup.
    async fn settle_late_parked(&self, provider_ref: &ProviderRef) {
        let outcome = match self.parked_outcome(provider_ref).await {
            Ok(Some(outcome)) => outcome,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(%provider_ref, error = %e, "could not check for a parked callback");
                return;
            }
        };

        let callback = ProviderCallback {
            provider_ref: provider_ref.clone(),
            outcome,
        };
        match self.apply_callback(&callback).await {
            Ok(_) => self.discard_parked(provider_ref).await,
            Err(e) => {
                tracing::warn!(%provider_ref, error = %e, "parked callback not applied");
            }
        }
    }

    async fn discard_parked(&self, provider_ref: &ProviderRef) {
        if let Err(e) = self
            .store
            .discard_parked_callback(provider_ref.as_str())
            .await
        {
            tracing::warn!(%provider_ref, error = %e, "failed to discard parked callback");
        }
    }

    /// Returns an order visible to the caller.
    #[tracing::instrument(skip(self, identity), fields(subject = %identity.subject_id))]
    pub async fn get_order(
        &self,
        identity: &Identity,
        order_id: OrderId,
    ) -> Result<Order, DomainError> {
        let order = self.load(Locator::Id(order_id)).await?;
        if !identity.is_admin() && !order.is_owned_by(&identity.subject_id) {
            return Err(DomainError::Authorization(
                "order belongs to another customer".into(),
            ));
        }
        Ok(order)
    }

    /// Lists the caller's orders, newest first.
    #[tracing::instrument(skip(self, identity), fields(subject = %identity.subject_id))]
    pub async fn list_own_orders(
        &self,
        identity: &Identity,
        page: Page,
    ) -> Result<Vec<Order>, DomainError> {
        self.list(page.apply(OrderQuery::for_owner(identity.subject_id.clone())))
            .await
    }

    /// Lists every order, newest first. Admin only.
    #[tracing::instrument(skip(self, identity), fields(subject = %identity.subject_id))]
    pub async fn list_all_orders(
        &self,
        identity: &Identity,
        page: Page,
    ) -> Result<Vec<Order>, DomainError> {
        require_admin(identity, "list all orders")?;
        self.list(page.apply(OrderQuery::new())).await
    }

    async fn list(&self, query: OrderQuery) -> Result<Vec<Order>, DomainError> {
        let documents = self.store.query(query).await?;
        documents
            .into_iter()
            .map(|doc| Order::from_document(doc).map_err(DomainError::from))
            .collect()
    }

    async fn load(&self, locator: Locator<'_>) -> Result<Order, DomainError> {
        let document = match locator {
            Locator::Id(id) => self
                .store
                .get(id)
                .await?
                .ok_or(DomainError::OrderNotFound(id))?,
            Locator::ProviderRef(provider_ref) => self
                .store
                .find_by_provider_ref(provider_ref)
                .await?
                .ok_or_else(|| DomainError::ProviderRefNotFound(provider_ref.to_string()))?,
        };
        Ok(Order::from_document(document)?)
    }

    /// Runs an optimistic read-validate-write cycle on one order.
    async fn mutate<F>(
        &self,
        locator: Locator<'_>,
        mut apply: F,
    ) -> Result<(Order, Transition), DomainError>
    where
        F: FnMut(&mut Order) -> Result<Transition, DomainError> + Send,
    {
        let mut conflicts = 0;
        loop {
            let mut order = self.load(locator).await?;
            let expected = order.version();

            if apply(&mut order)? == Transition::Unchanged {
                return Ok((order, Transition::Unchanged));
            }

            order.touch(Utc::now());
            match self.store.update(order.to_document()?, expected).await {
                Ok(version) => {
                    order.set_version(version);
                    return Ok((order, Transition::Changed));
                }
                Err(OrderStoreError::ConcurrencyConflict { order_id, .. }) => {
                    conflicts += 1;
                    metrics::counter!("order_conflict_retries_total").increment(1);
                    if conflicts > self.config.max_conflict_retries {
                        tracing::warn!(%order_id, conflicts, "giving up after repeated version conflicts");
                        return Err(DomainError::Conflict(format!(
                            "order {order_id} is being modified concurrently"
                        )));
                    }
                    tracing::debug!(%order_id, conflicts, "version conflict, retrying");
                }
                Err(OrderStoreError::DuplicateProviderRef(provider_ref)) => {
                    return Err(DomainError::Conflict(format!(
                        "provider reference {provider_ref} is already in use"
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn require_admin(identity: &Identity, action: &str) -> Result<(), DomainError> {
    if identity.is_admin() {
        Ok(())
    } else {
        Err(DomainError::Authorization(format!(
            "only admins can {action}"
        )))
    }
}
