//! Safaricom Daraja (M-Pesa) STK push gateway.
//!
//! A charge is a Lipa Na M-Pesa Online request: the customer gets a PIN
//! prompt on their phone and the outcome is posted later to the configured
//! callback URL (see [`callback`]).

pub mod callback;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{TimeDelta, Utc};
use domain::{ChargeRequest, GatewayError, PaymentGateway, ProviderRef};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

pub use callback::parse_stk_callback;

const SANDBOX_BASE_URL: &str = "https://sandbox.safaricom.co.ke";
const TOKEN_PATH: &str = "/oauth/v1/generate?grant_type=client_credentials";
const STK_PUSH_PATH: &str = "/mpesa/stkpush/v1/processrequest";

/// Refresh tokens this long before the provider says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Daraja credentials and STK push settings.
#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    /// Paybill or till number charged to.
    pub shortcode: String,
    pub passkey: String,
    /// Public URL Daraja posts the STK result to.
    pub callback_url: String,
    pub transaction_desc: String,
    pub request_timeout: Duration,
}

impl MpesaConfig {
    /// Creates a sandbox configuration with the given credentials.
    pub fn new(
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
        shortcode: impl Into<String>,
        passkey: impl Into<String>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            base_url: SANDBOX_BASE_URL.to_string(),
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            shortcode: shortcode.into(),
            passkey: passkey.into(),
            callback_url: callback_url.into(),
            transaction_desc: "Order payment".to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Builds the STK password for a timestamp.
    pub fn password(&self, timestamp: &str) -> String {
        BASE64.encode(format!("{}{}{}", self.shortcode, self.passkey, timestamp))
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Daraja sends this as a string; accept numbers too.
    expires_in: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushRequest<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    transaction_type: &'static str,
    amount: i64,
    party_a: &'a str,
    party_b: &'a str,
    phone_number: &'a str,
    #[serde(rename = "CallBackURL")]
    call_back_url: &'a str,
    account_reference: String,
    transaction_desc: &'a str,
}

#[derive(Debug, Deserialize)]
struct StkPushResponse {
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: Option<String>,
    #[serde(rename = "ResponseCode")]
    response_code: Option<String>,
    #[serde(rename = "ResponseDescription")]
    response_description: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

/// M-Pesa gateway over the Daraja REST API.
pub struct MpesaGateway {
    config: MpesaConfig,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl MpesaGateway {
    pub fn new(config: MpesaConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            config,
            client,
            token: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &MpesaConfig {
        &self.config
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > Instant::now()
        {
            return Ok(token.access_token.clone());
        }

        let response = self
            .client
            .get(format!("{}{}", self.config.base_url, TOKEN_PATH))
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await
            .map_err(|e| unavailable("token request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Unavailable(format!(
                "token request returned {status}"
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| unavailable("malformed token response", e))?;

        let lifetime = match &body.expires_in {
            serde_json::Value::String(s) => s.parse::<u64>().ok(),
            serde_json::Value::Number(n) => n.as_u64(),
            _ => None,
        }
        .unwrap_or(3599);

        let ttl = Duration::from_secs(lifetime).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            access_token: body.access_token.clone(),
            expires_at: Instant::now() + ttl,
        });
        metrics::counter!("mpesa_token_refreshes_total").increment(1);
        tracing::debug!(lifetime, "obtained daraja access token");
        Ok(body.access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }
}

#[async_trait]
impl PaymentGateway for MpesaGateway {
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn initiate_charge(&self, request: ChargeRequest) -> Result<ProviderRef, GatewayError> {
        let phone = normalize_msisdn(&request.payer_contact).ok_or_else(|| {
            GatewayError::Rejected(format!(
                "invalid M-Pesa phone number: {}",
                request.payer_contact
            ))
        })?;
        let amount = request.amount.whole_units_ceil();
        if amount < 1 {
            return Err(GatewayError::Rejected(format!(
                "amount {} is below the M-Pesa minimum",
                request.amount
            )));
        }

        let token = self.access_token().await?;
        let timestamp = daraja_timestamp();
        let body = StkPushRequest {
            business_short_code: &self.config.shortcode,
            password: self.config.password(&timestamp),
            timestamp,
            transaction_type: "CustomerPayBillOnline",
            amount,
            party_a: &phone,
            party_b: &self.config.shortcode,
            phone_number: &phone,
            call_back_url: &self.config.callback_url,
            account_reference: account_reference(&request),
            transaction_desc: &self.config.transaction_desc,
        };

        let response = self
            .client
            .post(format!("{}{}", self.config.base_url, STK_PUSH_PATH))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| unavailable("STK push request failed", e))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.invalidate_token().await;
            return Err(GatewayError::Unavailable(
                "access token rejected by provider".into(),
            ));
        }
        if status.is_server_error() {
            return Err(GatewayError::Unavailable(format!(
                "STK push returned {status}"
            )));
        }

        let parsed: StkPushResponse = response
            .json()
            .await
            .map_err(|e| unavailable("malformed STK push response", e))?;

        if status.is_client_error() {
            let reason = parsed
                .error_message
                .unwrap_or_else(|| format!("STK push returned {status}"));
            return Err(GatewayError::Rejected(reason));
        }

        match (parsed.response_code.as_deref(), parsed.checkout_request_id) {
            (Some("0"), Some(checkout_request_id)) => {
                tracing::info!(%checkout_request_id, amount, "STK push accepted");
                Ok(ProviderRef::new(checkout_request_id))
            }
            (Some("0"), None) => Err(GatewayError::Unavailable(
                "STK push accepted without a CheckoutRequestID".into(),
            )),
            (code, _) => Err(GatewayError::Rejected(
                parsed
                    .response_description
                    .unwrap_or_else(|| format!("STK push response code {code:?}")),
            )),
        }
    }
}

fn unavailable(context: &str, err: reqwest::Error) -> GatewayError {
    tracing::warn!(error = %err, "{context}");
    GatewayError::Unavailable(format!("{context}: {err}"))
}

/// Daraja timestamps are `YYYYMMDDHHmmss` in East Africa Time (UTC+3).
fn daraja_timestamp() -> String {
    (Utc::now() + TimeDelta::hours(3))
        .format("%Y%m%d%H%M%S")
        .to_string()
}

/// Daraja caps the account reference at 12 characters.
fn account_reference(request: &ChargeRequest) -> String {
    let mut reference = request.order_id.to_string().replace('-', "");
    reference.truncate(12);
    reference.to_uppercase()
}

/// Normalizes a Kenyan mobile number to `2547XXXXXXXX` / `2541XXXXXXXX`.
///
/// Accepts `07…`, `01…`, `7…`, `1…`, `2547…` and `+2547…` forms with
/// optional spaces or dashes.
pub fn normalize_msisdn(input: &str) -> Option<String> {
    let digits: String = input
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    let digits = digits.strip_prefix('+').unwrap_or(&digits);
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let local = if let Some(rest) = digits.strip_prefix("254") {
        rest
    } else if let Some(rest) = digits.strip_prefix('0') {
        rest
    } else {
        digits
    };

    let valid = local.len() == 9 && (local.starts_with('7') || local.starts_with('1'));
    valid.then(|| format!("254{local}"))
}
