//! Payment provider callback endpoint.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use domain::DomainError;
use order_store::OrderStore;
use payments::{SIGNATURE_HEADER, parse_stk_callback};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub token: Option<String>,
}

/// Body Daraja expects back; anything else makes it redeliver.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallbackAck {
    pub result_code: i32,
    pub result_desc: &'static str,
}

impl CallbackAck {
    fn accepted() -> Self {
        Self {
            result_code: 0,
            result_desc: "Accepted",
        }
    }
}

/// POST /payments/mpesa/callback: STK push result from Daraja.
///
/// Verified and parseable callbacks are always acknowledged, including
/// redeliveries and refs that no order carries yet; the latter are parked
/// until the charge records its ref. Store failures are not, so the
/// provider retries them.
#[tracing::instrument(skip_all)]
pub async fn mpesa_callback<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CallbackAck>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    if let Err(err) = state
        .callback_verifier
        .verify(&body, params.token.as_deref(), signature)
    {
        metrics::counter!("payment_callbacks_rejected_total", "reason" => "verification")
            .increment(1);
        return Err(err.into());
    }

    let callback = parse_stk_callback(&body).inspect_err(|err| {
        metrics::counter!("payment_callbacks_rejected_total", "reason" => "malformed")
            .increment(1);
        tracing::warn!(error = %err, "unparseable payment callback");
    })?;

    match state.engine.reconcile_payment_callback(&callback).await {
        Ok(order) => {
            tracing::debug!(order_id = %order.id(), status = %order.payment_status(), "callback reconciled");
        }
        Err(DomainError::ProviderRefNotFound(provider_ref)) => {
            tracing::warn!(%provider_ref, "callback for unrecorded provider reference parked and acknowledged");
        }
        Err(err @ (DomainError::Validation(_) | DomainError::InvalidTransition(_))) => {
            tracing::warn!(provider_ref = %callback.provider_ref, error = %err, "callback not applied");
        }
        Err(err) => return Err(err.into()),
    }

    Ok(Json(CallbackAck::accepted()))
}
