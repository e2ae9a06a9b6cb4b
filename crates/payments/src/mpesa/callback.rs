//! Daraja STK push result callbacks.
//!
//! ```json
//! { "Body": { "stkCallback": {
//!     "MerchantRequestID": "29115-34620561-1",
//!     "CheckoutRequestID": "ws_CO_191220191020363925",
//!     "ResultCode": 0,
//!     "ResultDesc": "The service request is processed successfully.",
//!     "CallbackMetadata": { "Item": [
//!         { "Name": "Amount", "Value": 1.00 },
//!         { "Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV" },
//!         { "Name": "TransactionDate", "Value": 20191219102115 },
//!         { "Name": "PhoneNumber", "Value": 254708374149 } ] } } } }
//! ```

use domain::{Money, PaymentReceipt, ProviderCallback};
use serde::Deserialize;
use serde_json::Value;

use crate::error::CallbackError;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Body")]
    body: Body,
}

#[derive(Debug, Deserialize)]
struct Body {
    #[serde(rename = "stkCallback")]
    stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
struct StkCallback {
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    result_code: Value,
    #[serde(rename = "ResultDesc", default)]
    result_desc: Option<String>,
    #[serde(rename = "CallbackMetadata", default)]
    callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    items: Vec<MetadataItem>,
}

#[derive(Debug, Deserialize)]
struct MetadataItem {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value", default)]
    value: Option<Value>,
}

impl CallbackMetadata {
    fn get(&self, name: &str) -> Option<&Value> {
        self.items
            .iter()
            .find(|item| item.name == name)
            .and_then(|item| item.value.as_ref())
    }
}

/// Renders a metadata value as text; Daraja sends ids and dates as numbers.
fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_money(value: &Value) -> Option<Money> {
    let units = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.parse::<f64>().ok()?,
        _ => return None,
    };
    Some(Money::from_cents((units * 100.0).round() as i64))
}

fn result_code(value: &Value) -> Result<i64, CallbackError> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| CallbackError::Malformed(format!("unexpected ResultCode {value}")))
}

/// Normalizes a Daraja STK callback body.
///
/// `ResultCode` 0 is a successful payment; anything else is a failure whose
/// reason is the provider's `ResultDesc`.
pub fn parse_stk_callback(body: &[u8]) -> Result<ProviderCallback, CallbackError> {
    let envelope: Envelope = serde_json::from_slice(body)?;
    let callback = envelope.body.stk_callback;

    if callback.checkout_request_id.trim().is_empty() {
        return Err(CallbackError::Malformed("empty CheckoutRequestID".into()));
    }

    if result_code(&callback.result_code)? != 0 {
        let reason = callback
            .result_desc
            .unwrap_or_else(|| format!("ResultCode {}", callback.result_code));
        return Ok(ProviderCallback::failed(callback.checkout_request_id, reason));
    }

    let receipt = callback.callback_metadata.as_ref().and_then(|metadata| {
        let receipt_number = metadata.get("MpesaReceiptNumber").and_then(as_text)?;
        Some(PaymentReceipt {
            receipt_number,
            amount_paid: metadata.get("Amount").and_then(as_money),
            payer_phone: metadata.get("PhoneNumber").and_then(as_text),
            transaction_date: metadata.get("TransactionDate").and_then(as_text),
        })
    });

    Ok(ProviderCallback::succeeded(callback.checkout_request_id, receipt))
}
