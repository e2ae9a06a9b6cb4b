//! In-memory payment gateway.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use domain::{ChargeRequest, GatewayError, PaymentGateway, ProviderRef};

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    charges: HashMap<String, ChargeRequest>,
    next_id: u32,
    last_ref: Option<ProviderRef>,
    failure: Option<GatewayError>,
}

/// Deterministic gateway for tests and sandbox deployments.
///
/// Hands out `CHG-0001`, `CHG-0002`, ... and never contacts a provider;
/// outcomes are delivered by posting callbacks for the issued refs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<Mutex<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory gateway.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryGatewayState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes every following charge fail with `failure`, or succeed again with `None`.
    pub fn set_failure(&self, failure: Option<GatewayError>) {
        self.state().failure = failure;
    }

    /// Returns the number of charges started.
    pub fn charge_count(&self) -> usize {
        self.state().charges.len()
    }

    /// Returns the request behind an issued ref.
    pub fn charge(&self, provider_ref: &str) -> Option<ChargeRequest> {
        self.state().charges.get(provider_ref).cloned()
    }

    /// Returns the most recently issued ref.
    pub fn last_ref(&self) -> Option<ProviderRef> {
        self.state().last_ref.clone()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn initiate_charge(&self, request: ChargeRequest) -> Result<ProviderRef, GatewayError> {
        let mut state = self.state();

        if let Some(failure) = state.failure.clone() {
            return Err(failure);
        }

        state.next_id += 1;
        let provider_ref = ProviderRef::new(format!("CHG-{:04}", state.next_id));
        state
            .charges
            .insert(provider_ref.as_str().to_string(), request);
        state.last_ref = Some(provider_ref.clone());

        tracing::debug!(%provider_ref, "sandbox charge started");
        Ok(provider_ref)
    }
}
