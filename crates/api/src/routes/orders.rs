//! Order endpoints.
//!
//! Amounts are integers in minor currency units (cents).

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use domain::{
    DeliveryInfo, FulfillmentStatus, LineItem, Money, NewOrder, Order, OrderId, Page,
    PaymentMethod, PaymentStatus,
};
use order_store::OrderStore;
use serde::{Deserialize, Serialize};

use crate::auth::Authenticated;
use crate::error::ApiError;
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub items: Vec<LineItem>,
    #[serde(default, alias = "address")]
    pub delivery: Option<DeliveryInfo>,
    #[serde(default)]
    pub delivery_fee: Money,
    pub payment_method: PaymentMethod,
    /// Total shown at checkout; rejected if it disagrees with the items.
    #[serde(default, alias = "amount")]
    pub total_amount: Option<Money>,
}

impl From<CreateOrderRequest> for NewOrder {
    fn from(req: CreateOrderRequest) -> Self {
        let order = NewOrder::new(req.items, req.payment_method)
            .with_delivery(req.delivery.unwrap_or_default())
            .with_delivery_fee(req.delivery_fee);
        match req.total_amount {
            Some(total) => order.with_expected_total(total),
            None => order,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl From<PageParams> for Page {
    fn from(params: PageParams) -> Self {
        Page {
            limit: params.limit,
            offset: params.offset,
        }
    }
}

#[derive(Deserialize)]
pub struct FulfillmentUpdateRequest {
    #[serde(alias = "fulfillmentStatus")]
    pub status: FulfillmentStatus,
}

#[derive(Deserialize)]
pub struct PaymentUpdateRequest {
    #[serde(alias = "paymentStatus")]
    pub status: PaymentStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentRequest {
    /// Phone number for mobile money; card token reference for card charges.
    #[serde(default, alias = "phone")]
    pub payer_contact: String,
}

// -- Response types --

/// An order as stored, plus its version.
#[derive(Serialize)]
pub struct OrderResponse {
    #[serde(flatten)]
    pub order: Order,
    pub version: i64,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        let version = order.version().as_i64();
        Self { order, version }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInitiatedResponse {
    pub order_id: String,
    pub provider_ref: String,
    pub payment_status: PaymentStatus,
}

// -- Handlers --

/// POST /orders: Place an order owned by the caller.
#[tracing::instrument(skip(state, identity, payload), fields(subject = %identity.subject_id))]
pub async fn create<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Authenticated(identity): Authenticated,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let Json(req) = payload?;
    let order = state.engine.create_order(&identity, req.into()).await?;
    Ok((StatusCode::CREATED, Json(order.into())))
}

/// GET /orders/mine: The caller's orders, newest first.
#[tracing::instrument(skip(state, identity, params), fields(subject = %identity.subject_id))]
pub async fn list_mine<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Authenticated(identity): Authenticated,
    params: Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let Query(params) = params?;
    let orders = state
        .engine
        .list_own_orders(&identity, params.into())
        .await?;
    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}

/// GET /orders: Every order, newest first. Admin only.
#[tracing::instrument(skip(state, identity, params), fields(subject = %identity.subject_id))]
pub async fn list_all<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Authenticated(identity): Authenticated,
    params: Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let Query(params) = params?;
    let orders = state
        .engine
        .list_all_orders(&identity, params.into())
        .await?;
    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}

/// GET /orders/{id}: A single order, for its owner or an admin.
#[tracing::instrument(skip(state, identity), fields(subject = %identity.subject_id))]
pub async fn get<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Authenticated(identity): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state.engine.get_order(&identity, order_id).await?;
    Ok(Json(order.into()))
}

/// PUT /orders/{id}/status: Move fulfillment forward. Admin only.
#[tracing::instrument(skip(state, identity, payload), fields(subject = %identity.subject_id))]
pub async fn update_status<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Authenticated(identity): Authenticated,
    Path(id): Path<String>,
    payload: Result<Json<FulfillmentUpdateRequest>, JsonRejection>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let Json(req) = payload?;
    let order = state
        .engine
        .advance_fulfillment(&identity, order_id, req.status)
        .await?;
    Ok(Json(order.into()))
}

/// PUT /orders/{id}/payment: Settle a cash-on-delivery order. Admin only.
#[tracing::instrument(skip(state, identity, payload), fields(subject = %identity.subject_id))]
pub async fn update_payment<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Authenticated(identity): Authenticated,
    Path(id): Path<String>,
    payload: Result<Json<PaymentUpdateRequest>, JsonRejection>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let Json(req) = payload?;
    let order = state
        .engine
        .set_payment_status_manual(&identity, order_id, req.status)
        .await?;
    Ok(Json(order.into()))
}

/// POST /orders/{id}/payments: Start a provider charge for the caller's order.
///
/// The outcome arrives later through the provider callback.
#[tracing::instrument(skip(state, identity, payload), fields(subject = %identity.subject_id))]
pub async fn initiate_payment<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Authenticated(identity): Authenticated,
    Path(id): Path<String>,
    payload: Result<Json<InitiatePaymentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PaymentInitiatedResponse>), ApiError> {
    let order_id = parse_order_id(&id)?;
    let Json(req) = payload?;
    let provider_ref = state
        .engine
        .initiate_payment(&identity, order_id, &req.payer_contact)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(PaymentInitiatedResponse {
            order_id: order_id.to_string(),
            provider_ref: provider_ref.into_inner(),
            payment_status: PaymentStatus::Pending,
        }),
    ))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    OrderId::parse(id).map_err(|e| ApiError::BadRequest(format!("Invalid order id: {e}")))
}
