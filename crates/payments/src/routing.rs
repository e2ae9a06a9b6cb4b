//! Per-method gateway routing.

use std::sync::Arc;

use async_trait::async_trait;
use domain::{ChargeRequest, GatewayError, PaymentGateway, PaymentMethod, ProviderRef};

/// Sends each charge to the gateway configured for its payment method.
#[derive(Clone, Default)]
pub struct RoutingGateway {
    mobile_money: Option<Arc<dyn PaymentGateway>>,
    card: Option<Arc<dyn PaymentGateway>>,
}

impl RoutingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes mobile-money charges to `gateway`.
    pub fn with_mobile_money(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.mobile_money = Some(gateway);
        self
    }

    /// Routes card charges to `gateway`.
    pub fn with_card(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.card = Some(gateway);
        self
    }

    fn route(&self, method: PaymentMethod) -> Option<&Arc<dyn PaymentGateway>> {
        match method {
            PaymentMethod::MobileMoney => self.mobile_money.as_ref(),
            PaymentMethod::Card => self.card.as_ref(),
            PaymentMethod::CashOnDelivery => None,
        }
    }
}

#[async_trait]
impl PaymentGateway for RoutingGateway {
    async fn initiate_charge(&self, request: ChargeRequest) -> Result<ProviderRef, GatewayError> {
        match self.route(request.method) {
            Some(gateway) => gateway.initiate_charge(request).await,
            None => Err(GatewayError::Unavailable(format!(
                "no payment gateway configured for {}",
                request.method
            ))),
        }
    }
}
