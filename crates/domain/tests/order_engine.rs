//! Integration tests for the order lifecycle engine.
//!
//! These drive `OrderEngine` end to end over the in-memory store with a
//! scripted payment gateway.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::TimeDelta;
use domain::{
    ChargeRequest, DeliveryInfo, DomainError, EngineConfig, FulfillmentStatus, GatewayError,
    Identity, LineItem, Money, NewOrder, OrderEngine, OrderError, OrderId, Page, PaymentGateway,
    PaymentMethod, PaymentReceipt, PaymentStatus, ProviderCallback, ProviderRef,
};
use order_store::{InMemoryOrderStore, OrderStore, Version};
use tokio::sync::Notify;

/// Gateway that replays queued responses and records every request.
#[derive(Clone, Default)]
struct ScriptedGateway {
    responses: Arc<Mutex<VecDeque<Result<ProviderRef, GatewayError>>>>,
    requests: Arc<Mutex<Vec<ChargeRequest>>>,
}

impl ScriptedGateway {
    fn respond(&self, response: Result<ProviderRef, GatewayError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    fn requests(&self) -> Vec<ChargeRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn initiate_charge(&self, request: ChargeRequest) -> Result<ProviderRef, GatewayError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::Unavailable("no scripted response".into())))
    }
}

/// Gateway that announces each call and answers only once released.
#[derive(Clone, Default)]
struct HeldGateway {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl PaymentGateway for HeldGateway {
    async fn initiate_charge(&self, _: ChargeRequest) -> Result<ProviderRef, GatewayError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(ProviderRef::new("R1"))
    }
}

type Engine = OrderEngine<InMemoryOrderStore, ScriptedGateway>;

fn create_engine() -> (Engine, InMemoryOrderStore, ScriptedGateway) {
    let store = InMemoryOrderStore::new();
    let gateway = ScriptedGateway::default();
    let engine = OrderEngine::new(store.clone(), gateway.clone());
    (engine, store, gateway)
}

fn customer() -> Identity {
    Identity::customer("customer_1")
}

fn admin() -> Identity {
    Identity::admin("admin_1")
}

fn new_order(method: PaymentMethod) -> NewOrder {
    NewOrder::new(
        vec![
            LineItem::new("SKU-001", "Linen Shirt", 2, Money::from_cents(250_000)).with_size("M"),
            LineItem::new("SKU-002", "Canvas Tote", 1, Money::from_cents(50_000)),
        ],
        method,
    )
    .with_delivery_fee(Money::from_cents(50_000))
    .with_delivery(DeliveryInfo {
        customer_name: "Wanjiku".into(),
        phone: Some("0712345678".into()),
        city: Some("Nairobi".into()),
        ..DeliveryInfo::default()
    })
}

mod creation {
    use super::*;

    #[tokio::test]
    async fn order_is_created_received_and_pending() {
        let (engine, store, _) = create_engine();

        let order = engine
            .create_order(&customer(), new_order(PaymentMethod::MobileMoney))
            .await
            .unwrap();

        assert_eq!(order.fulfillment_status(), FulfillmentStatus::Received);
        assert_eq!(order.payment_status(), PaymentStatus::Pending);
        assert_eq!(order.total_amount(), Money::from_cents(600_000));
        assert_eq!(order.owner_id().as_str(), "customer_1");
        assert_eq!(order.version(), Version::first());
        assert_eq!(store.order_count().await, 1);
    }

    #[tokio::test]
    async fn card_orders_are_not_marked_paid_at_creation() {
        let (engine, _, _) = create_engine();
        let order = engine
            .create_order(&customer(), new_order(PaymentMethod::Card))
            .await
            .unwrap();
        assert_eq!(order.payment_status(), PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn empty_items_fail_and_nothing_is_stored() {
        let (engine, store, _) = create_engine();

        let result = engine
            .create_order(
                &customer(),
                NewOrder::new(vec![], PaymentMethod::CashOnDelivery),
            )
            .await;

        assert!(matches!(
            result,
            Err(DomainError::Validation(OrderError::NoItems))
        ));
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn expected_total_must_match() {
        let (engine, store, _) = create_engine();

        let result = engine
            .create_order(
                &customer(),
                new_order(PaymentMethod::CashOnDelivery).with_expected_total(Money::from_cents(1)),
            )
            .await;

        assert!(matches!(
            result,
            Err(DomainError::Validation(OrderError::TotalMismatch { .. }))
        ));
        assert_eq!(store.order_count().await, 0);
    }
}

mod fulfillment {
    use super::*;

    #[tokio::test]
    async fn admin_walks_order_to_delivered() {
        let (engine, _, _) = create_engine();
        let order = engine
            .create_order(&customer(), new_order(PaymentMethod::CashOnDelivery))
            .await
            .unwrap();

        let mut last = FulfillmentStatus::Received;
        for target in [
            FulfillmentStatus::Packed,
            FulfillmentStatus::InTransit,
            FulfillmentStatus::Delivered,
        ] {
            let updated = engine
                .advance_fulfillment(&admin(), order.id(), target)
                .await
                .unwrap();
            assert!(updated.fulfillment_status() >= last);
            assert!(updated.updated_at() >= order.updated_at());
            last = updated.fulfillment_status();
        }

        assert_eq!(last, FulfillmentStatus::Delivered);
    }

    #[tokio::test]
    async fn cod_order_cannot_skip_in_transit() {
        let (engine, _, _) = create_engine();
        let order = engine
            .create_order(&customer(), new_order(PaymentMethod::CashOnDelivery))
            .await
            .unwrap();

        engine
            .advance_fulfillment(&admin(), order.id(), FulfillmentStatus::Packed)
            .await
            .unwrap();

        let result = engine
            .advance_fulfillment(&admin(), order.id(), FulfillmentStatus::Delivered)
            .await;
        assert!(matches!(result, Err(DomainError::InvalidTransition(_))));

        engine
            .advance_fulfillment(&admin(), order.id(), FulfillmentStatus::InTransit)
            .await
            .unwrap();
        let delivered = engine
            .advance_fulfillment(&admin(), order.id(), FulfillmentStatus::Delivered)
            .await
            .unwrap();
        assert_eq!(delivered.fulfillment_status(), FulfillmentStatus::Delivered);

        let paid = engine
            .set_payment_status_manual(&admin(), order.id(), PaymentStatus::Paid)
            .await
            .unwrap();
        assert_eq!(paid.payment_status(), PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn non_admin_cannot_advance() {
        let (engine, _, _) = create_engine();
        let order = engine
            .create_order(&customer(), new_order(PaymentMethod::CashOnDelivery))
            .await
            .unwrap();

        let result = engine
            .advance_fulfillment(&customer(), order.id(), FulfillmentStatus::Packed)
            .await;
        assert!(matches!(result, Err(DomainError::Authorization(_))));

        let stored = engine.get_order(&customer(), order.id()).await.unwrap();
        assert_eq!(stored.fulfillment_status(), FulfillmentStatus::Received);
        assert_eq!(stored.version(), Version::first());
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let (engine, _, _) = create_engine();
        let result = engine
            .advance_fulfillment(&admin(), OrderId::new(), FulfillmentStatus::Packed)
            .await;
        assert!(matches!(result, Err(DomainError::OrderNotFound(_))));
    }

    #[tokio::test]
    async fn concurrent_advances_converge() {
        let (engine, _, _) = create_engine();
        let engine = Arc::new(engine);
        let order = engine
            .create_order(&customer(), new_order(PaymentMethod::CashOnDelivery))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let engine = engine.clone();
            let id = order.id();
            handles.push(tokio::spawn(async move {
                engine
                    .advance_fulfillment(&admin(), id, FulfillmentStatus::Packed)
                    .await
            }));
        }

        for handle in handles {
            let updated = handle.await.unwrap().unwrap();
            assert_eq!(updated.fulfillment_status(), FulfillmentStatus::Packed);
        }

        let stored = engine.get_order(&admin(), order.id()).await.unwrap();
        assert_eq!(stored.fulfillment_status(), FulfillmentStatus::Packed);
        // Only the first advance writes; the rest observe Packed and no-op.
        assert_eq!(stored.version(), Version::new(2));
    }
}

mod payments {
    use super::*;

    async fn placed(engine: &Engine, method: PaymentMethod) -> domain::Order {
        engine
            .create_order(&customer(), new_order(method))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn mpesa_payment_reconciles_once() {
        let (engine, _, gateway) = create_engine();
        let order = placed(&engine, PaymentMethod::MobileMoney).await;
        gateway.respond(Ok(ProviderRef::new("R1")));

        let provider_ref = engine
            .initiate_payment(&customer(), order.id(), "0712345678")
            .await
            .unwrap();
        assert_eq!(provider_ref.as_str(), "R1");

        let requests = gateway.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].amount, Money::from_cents(600_000));
        assert_eq!(requests[0].method, PaymentMethod::MobileMoney);
        assert_eq!(requests[0].payer_contact, "0712345678");

        let callback = ProviderCallback::succeeded("R1", Some(PaymentReceipt::new("ABC123")));
        let paid = engine.reconcile_payment_callback(&callback).await.unwrap();
        assert_eq!(paid.payment_status(), PaymentStatus::Paid);
        assert_eq!(paid.payment_receipt().unwrap().receipt_number, "ABC123");

        // Redelivery changes nothing
        let again = engine.reconcile_payment_callback(&callback).await.unwrap();
        assert_eq!(again.payment_status(), PaymentStatus::Paid);
        assert_eq!(again.version(), paid.version());
        assert_eq!(again.payment_receipt(), paid.payment_receipt());
    }

    #[tokio::test]
    async fn manual_override_rejected_for_provider_orders() {
        let (engine, _, _) = create_engine();
        for method in [PaymentMethod::Card, PaymentMethod::MobileMoney] {
            let order = placed(&engine, method).await;
            let result = engine
                .set_payment_status_manual(&admin(), order.id(), PaymentStatus::Paid)
                .await;
            assert!(matches!(result, Err(DomainError::InvalidTransition(_))));

            let stored = engine.get_order(&admin(), order.id()).await.unwrap();
            assert_eq!(stored.payment_status(), PaymentStatus::Pending);
        }
    }

    #[tokio::test]
    async fn second_initiation_while_in_flight_conflicts() {
        let (engine, _, gateway) = create_engine();
        let order = placed(&engine, PaymentMethod::MobileMoney).await;
        gateway.respond(Ok(ProviderRef::new("R1")));
        gateway.respond(Ok(ProviderRef::new("R2")));

        engine
            .initiate_payment(&customer(), order.id(), "0712345678")
            .await
            .unwrap();
        let result = engine
            .initiate_payment(&customer(), order.id(), "0712345678")
            .await;

        assert!(matches!(result, Err(DomainError::Conflict(_))));
        assert_eq!(gateway.requests().len(), 1);
        let stored = engine.get_order(&customer(), order.id()).await.unwrap();
        assert_eq!(stored.payment_provider_ref(), Some("R1"));
        assert_eq!(stored.payment_attempts(), 1);
    }

    #[tokio::test]
    async fn concurrent_initiations_dispatch_one_charge() {
        let (engine, _, gateway) = create_engine();
        let engine = Arc::new(engine);
        let order = placed(&engine, PaymentMethod::MobileMoney).await;
        for n in 0..4 {
            gateway.respond(Ok(ProviderRef::new(format!("R{n}"))));
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let engine = engine.clone();
            let id = order.id();
            handles.push(tokio::spawn(async move {
                engine.initiate_payment(&customer(), id, "0712345678").await
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(DomainError::Conflict(_)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(succeeded, 1);
        assert_eq!(gateway.requests().len(), 1);
    }

    #[tokio::test]
    async fn only_owner_can_initiate() {
        let (engine, _, gateway) = create_engine();
        let order = placed(&engine, PaymentMethod::Card).await;

        let result = engine
            .initiate_payment(&Identity::customer("someone_else"), order.id(), "tok_visa")
            .await;

        assert!(matches!(result, Err(DomainError::Authorization(_))));
        assert!(gateway.requests().is_empty());
    }

    #[tokio::test]
    async fn cash_orders_cannot_initiate() {
        let (engine, _, gateway) = create_engine();
        let order = placed(&engine, PaymentMethod::CashOnDelivery).await;

        let result = engine
            .initiate_payment(&customer(), order.id(), "0712345678")
            .await;

        assert!(matches!(result, Err(DomainError::InvalidTransition(_))));
        assert!(gateway.requests().is_empty());
    }

    #[tokio::test]
    async fn failure_callback_clears_ref_and_permits_retry() {
        let (engine, _, gateway) = create_engine();
        let order = placed(&engine, PaymentMethod::MobileMoney).await;
        gateway.respond(Ok(ProviderRef::new("R1")));
        gateway.respond(Ok(ProviderRef::new("R2")));

        engine
            .initiate_payment(&customer(), order.id(), "0712345678")
            .await
            .unwrap();
        let failed = engine
            .reconcile_payment_callback(&ProviderCallback::failed(
                "R1",
                "Request cancelled by user",
            ))
            .await
            .unwrap();
        assert_eq!(failed.payment_status(), PaymentStatus::Failed);
        assert_eq!(failed.payment_provider_ref(), None);
        assert_eq!(
            failed.payment_failure_reason(),
            Some("Request cancelled by user")
        );

        // The ref is gone, so a redelivered failure no longer finds the order
        let redelivered = engine
            .reconcile_payment_callback(&ProviderCallback::failed("R1", "again"))
            .await;
        assert!(matches!(
            redelivered,
            Err(DomainError::ProviderRefNotFound(_))
        ));

        let retry = engine
            .initiate_payment(&customer(), order.id(), "0712345678")
            .await
            .unwrap();
        assert_eq!(retry.as_str(), "R2");

        let stored = engine.get_order(&customer(), order.id()).await.unwrap();
        assert_eq!(stored.payment_status(), PaymentStatus::Pending);
        assert_eq!(stored.payment_attempts(), 2);
    }

    #[tokio::test]
    async fn failure_after_success_does_not_reopen() {
        let (engine, _, gateway) = create_engine();
        let order = placed(&engine, PaymentMethod::Card).await;
        gateway.respond(Ok(ProviderRef::new("ch_1")));

        engine
            .initiate_payment(&customer(), order.id(), "cus_1")
            .await
            .unwrap();
        engine
            .reconcile_payment_callback(&ProviderCallback::succeeded("ch_1", None))
            .await
            .unwrap();

        let after = engine
            .reconcile_payment_callback(&ProviderCallback::failed("ch_1", "late"))
            .await
            .unwrap();
        assert_eq!(after.payment_status(), PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn rejected_charge_marks_failed() {
        let (engine, _, gateway) = create_engine();
        let order = placed(&engine, PaymentMethod::MobileMoney).await;
        gateway.respond(Err(GatewayError::Rejected("Invalid phone number".into())));

        let result = engine
            .initiate_payment(&customer(), order.id(), "12")
            .await;
        assert!(matches!(result, Err(DomainError::GatewayRejected(_))));

        let stored = engine.get_order(&customer(), order.id()).await.unwrap();
        assert_eq!(stored.payment_status(), PaymentStatus::Failed);
        assert_eq!(stored.payment_failure_reason(), Some("Invalid phone number"));
        assert!(!stored.has_charge_in_flight());
    }

    #[tokio::test]
    async fn unavailable_gateway_leaves_pending_and_releases_claim() {
        let (engine, _, gateway) = create_engine();
        let order = placed(&engine, PaymentMethod::MobileMoney).await;
        gateway.respond(Err(GatewayError::Unavailable("timeout".into())));
        gateway.respond(Ok(ProviderRef::new("R1")));

        let result = engine
            .initiate_payment(&customer(), order.id(), "0712345678")
            .await;
        assert!(matches!(result, Err(DomainError::GatewayUnavailable(_))));

        let stored = engine.get_order(&customer(), order.id()).await.unwrap();
        assert_eq!(stored.payment_status(), PaymentStatus::Pending);
        assert!(!stored.has_charge_in_flight());

        let provider_ref = engine
            .initiate_payment(&customer(), order.id(), "0712345678")
            .await
            .unwrap();
        assert_eq!(provider_ref.as_str(), "R1");
    }

    #[tokio::test]
    async fn abandoned_claim_is_reclaimed_after_ttl() {
        let store = InMemoryOrderStore::new();
        let gateway = ScriptedGateway::default();
        let config = EngineConfig {
            dispatch_claim_ttl: TimeDelta::zero(),
            ..EngineConfig::default()
        };
        let engine = OrderEngine::with_config(store.clone(), gateway.clone(), config);
        let order = placed(&engine, PaymentMethod::MobileMoney).await;

        // Simulate a crash between claim and dispatch
        let mut document = store.get(order.id()).await.unwrap().unwrap();
        document.body["chargeStartedAt"] = serde_json::json!("2020-01-01T00:00:00Z");
        document.body["paymentAttempts"] = serde_json::json!(1);
        store.update(document, Version::first()).await.unwrap();

        gateway.respond(Ok(ProviderRef::new("R9")));
        let provider_ref = engine
            .initiate_payment(&customer(), order.id(), "0712345678")
            .await
            .unwrap();
        assert_eq!(provider_ref.as_str(), "R9");

        let stored = engine.get_order(&customer(), order.id()).await.unwrap();
        assert_eq!(stored.payment_attempts(), 2);
    }

    #[tokio::test]
    async fn unknown_callback_ref_is_not_found_and_parked() {
        let (engine, store, _) = create_engine();
        let result = engine
            .reconcile_payment_callback(&ProviderCallback::succeeded("nope", None))
            .await;
        assert!(matches!(result, Err(DomainError::ProviderRefNotFound(_))));
        assert_eq!(store.parked_count().await, 1);
    }

    /// Starts a charge that blocks inside the gateway, delivers `callback`
    /// while it is blocked, then lets the charge finish.
    async fn callback_before_ref_is_recorded(
        callback: ProviderCallback,
    ) -> (
        Arc<OrderEngine<InMemoryOrderStore, HeldGateway>>,
        InMemoryOrderStore,
        OrderId,
    ) {
        let store = InMemoryOrderStore::new();
        let gateway = HeldGateway::default();
        let engine = Arc::new(OrderEngine::new(store.clone(), gateway.clone()));
        let order = engine
            .create_order(&customer(), new_order(PaymentMethod::MobileMoney))
            .await
            .unwrap();

        let initiating = {
            let engine = engine.clone();
            let id = order.id();
            tokio::spawn(async move { engine.initiate_payment(&customer(), id, "0712345678").await })
        };
        gateway.entered.notified().await;

        let early = engine.reconcile_payment_callback(&callback).await;
        assert!(matches!(early, Err(DomainError::ProviderRefNotFound(ref r)) if r == "R1"));

        gateway.release.notify_one();
        let provider_ref = initiating.await.unwrap().unwrap();
        assert_eq!(provider_ref.as_str(), "R1");

        (engine, store, order.id())
    }

    #[tokio::test]
    async fn success_callback_before_ref_is_recorded_marks_paid() {
        let callback = ProviderCallback::succeeded("R1", Some(PaymentReceipt::new("ABC123")));
        let (engine, store, order_id) = callback_before_ref_is_recorded(callback.clone()).await;

        let stored = engine.get_order(&customer(), order_id).await.unwrap();
        assert_eq!(stored.payment_status(), PaymentStatus::Paid);
        assert_eq!(stored.payment_receipt().unwrap().receipt_number, "ABC123");
        assert_eq!(stored.payment_provider_ref(), Some("R1"));
        assert!(!stored.has_charge_in_flight());
        assert_eq!(store.parked_count().await, 0);

        // Provider redelivery after the ref landed is a no-op
        let again = engine.reconcile_payment_callback(&callback).await.unwrap();
        assert_eq!(again.version(), stored.version());

        let retry = engine
            .initiate_payment(&customer(), order_id, "0712345678")
            .await;
        assert!(matches!(retry, Err(DomainError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn failure_callback_before_ref_is_recorded_permits_retry() {
        let callback = ProviderCallback::failed("R1", "Request cancelled by user");
        let (engine, store, order_id) = callback_before_ref_is_recorded(callback).await;

        let stored = engine.get_order(&customer(), order_id).await.unwrap();
        assert_eq!(stored.payment_status(), PaymentStatus::Failed);
        assert_eq!(stored.payment_provider_ref(), None);
        assert_eq!(
            stored.payment_failure_reason(),
            Some("Request cancelled by user")
        );
        assert!(!stored.has_charge_in_flight());
        assert_eq!(store.parked_count().await, 0);
    }

    #[tokio::test]
    async fn stale_parked_callback_is_not_applied() {
        let store = InMemoryOrderStore::new();
        let gateway = ScriptedGateway::default();
        let config = EngineConfig {
            parked_callback_ttl: TimeDelta::zero(),
            ..EngineConfig::default()
        };
        let engine = OrderEngine::with_config(store.clone(), gateway.clone(), config);
        let order = placed(&engine, PaymentMethod::MobileMoney).await;

        engine
            .reconcile_payment_callback(&ProviderCallback::succeeded("R1", None))
            .await
            .unwrap_err();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        gateway.respond(Ok(ProviderRef::new("R1")));
        engine
            .initiate_payment(&customer(), order.id(), "0712345678")
            .await
            .unwrap();

        let stored = engine.get_order(&customer(), order.id()).await.unwrap();
        assert_eq!(stored.payment_status(), PaymentStatus::Pending);
        assert_eq!(stored.payment_provider_ref(), Some("R1"));
    }
}

mod queries {
    use super::*;

    #[tokio::test]
    async fn customers_see_only_their_orders_newest_first() {
        let (engine, _, _) = create_engine();
        let other = Identity::customer("customer_2");

        let first = engine
            .create_order(&customer(), new_order(PaymentMethod::CashOnDelivery))
            .await
            .unwrap();
        engine
            .create_order(&other, new_order(PaymentMethod::Card))
            .await
            .unwrap();
        let second = engine
            .create_order(&customer(), new_order(PaymentMethod::MobileMoney))
            .await
            .unwrap();

        let mine = engine
            .list_own_orders(&customer(), Page::default())
            .await
            .unwrap();
        let ids: Vec<_> = mine.iter().map(|o| o.id()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first.id()));
        assert!(ids.contains(&second.id()));
        assert!(mine[0].created_at() >= mine[1].created_at());

        let denied = engine.get_order(&other, first.id()).await;
        assert!(matches!(denied, Err(DomainError::Authorization(_))));
    }

    #[tokio::test]
    async fn only_admins_list_all_orders() {
        let (engine, _, _) = create_engine();
        for _ in 0..3 {
            engine
                .create_order(&customer(), new_order(PaymentMethod::CashOnDelivery))
                .await
                .unwrap();
        }

        let denied = engine.list_all_orders(&customer(), Page::default()).await;
        assert!(matches!(denied, Err(DomainError::Authorization(_))));

        let all = engine
            .list_all_orders(&admin(), Page::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let page = engine
            .list_all_orders(
                &admin(),
                Page {
                    limit: Some(2),
                    offset: Some(2),
                },
            )
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
    }
}
