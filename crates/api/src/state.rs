//! Shared application state.

use std::sync::Arc;

use domain::{AccessGate, EngineConfig, OrderEngine, PaymentGateway};
use order_store::OrderStore;
use payments::{CallbackVerifier, InMemoryPaymentGateway, RoutingGateway};

use crate::auth::JwtAccessGate;

/// Gateway type the engine is built with.
pub type SharedGateway = Arc<dyn PaymentGateway>;

/// Shared application state accessible from all handlers.
pub struct AppState<S: OrderStore> {
    pub engine: OrderEngine<S, SharedGateway>,
    pub access_gate: Arc<dyn AccessGate>,
    pub callback_verifier: CallbackVerifier,
}

impl<S: OrderStore> AppState<S> {
    pub fn new(
        store: S,
        gateway: SharedGateway,
        access_gate: Arc<dyn AccessGate>,
        callback_verifier: CallbackVerifier,
        engine_config: EngineConfig,
    ) -> Self {
        Self {
            engine: OrderEngine::with_config(store, gateway, engine_config),
            access_gate,
            callback_verifier,
        }
    }
}

/// Creates state backed by the sandbox gateway for both card and
/// mobile-money charges, with callback verification disabled.
///
/// The sandbox gateway is returned so callers can inspect issued refs.
pub fn create_default_state<S: OrderStore + 'static>(
    store: S,
    jwt_secret: &str,
) -> (Arc<AppState<S>>, InMemoryPaymentGateway) {
    let sandbox = InMemoryPaymentGateway::new();
    let gateway = RoutingGateway::new()
        .with_mobile_money(Arc::new(sandbox.clone()))
        .with_card(Arc::new(sandbox.clone()));

    let state = AppState::new(
        store,
        Arc::new(gateway),
        Arc::new(JwtAccessGate::new(jwt_secret, None)),
        CallbackVerifier::Disabled,
        EngineConfig::default(),
    );

    (Arc::new(state), sandbox)
}
