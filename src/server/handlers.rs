//! Per-endpoint handlers for the JSON API.
//!
//! Error bodies have the shape `{"Error": "<message>"}`. Domain errors map
//! to status codes: `NotFound` 404, `AlreadyExists` 409, decoding and
//! validation failures 400, everything else 500.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::Error;
use crate::models::{SiteRecord, Subscriber, Subscription};

/// Domain error adapted to an HTTP response.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(Error::Validation(format!("request decoder: {rejection}")))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::AlreadyExists(_) => StatusCode::CONFLICT,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(ErrorBody {
            error: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    #[serde(rename = "Error")]
    error: String,
}

#[derive(Deserialize)]
pub struct SiteQuery {
    #[serde(rename = "Subscription")]
    subscription: Option<Subscription>,
}

#[derive(Deserialize)]
pub struct SubscriberRequest {
    #[serde(rename = "Subscriber")]
    subscriber: Option<Subscriber>,
}

#[derive(Deserialize)]
pub struct EmailRequest {
    #[serde(rename = "Email")]
    email: String,
}

#[derive(Deserialize)]
pub struct SubscribeRequest {
    #[serde(rename = "Email", default)]
    email: String,
    #[serde(rename = "Subscription")]
    subscription: Option<Subscription>,
}

#[derive(Serialize)]
pub struct SiteResponse {
    #[serde(rename = "Site")]
    site: SiteRecord,
}

#[derive(Serialize)]
pub struct SubscribersResponse {
    #[serde(rename = "Subscribers")]
    subscribers: Vec<Subscriber>,
}

#[derive(Serialize)]
pub struct SubscriptionsResponse {
    #[serde(rename = "Subscriptions")]
    subscriptions: Vec<Subscription>,
}

fn require<T>(value: Option<T>, what: &str) -> Result<T, ApiError> {
    value.ok_or_else(|| {
        ApiError(Error::Validation(format!(
            "could not find valid {what} in request"
        )))
    })
}

/// GET /api/site
pub async fn get_site(
    State(state): State<AppState>,
    payload: Result<Json<SiteQuery>, JsonRejection>,
) -> Result<Json<SiteResponse>, ApiError> {
    let Json(query) = payload?;
    let subscription = require(query.subscription, "subscription")?;
    let site = state.archive.get(&subscription).await?;
    Ok(Json(SiteResponse { site }))
}

/// POST /api/subscriber
pub async fn add_subscriber(
    State(state): State<AppState>,
    payload: Result<Json<SubscriberRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(request) = payload?;
    let subscriber = require(request.subscriber, "subscriber")?;
    state.subscriptions.add_subscriber(&subscriber).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/subscriber
pub async fn get_subscribers(
    State(state): State<AppState>,
) -> Result<Json<SubscribersResponse>, ApiError> {
    let subscribers = state.subscriptions.get_subscribers().await?;
    Ok(Json(SubscribersResponse { subscribers }))
}

/// GET /api/subscriber/by_subscription
pub async fn get_subscribers_by_subscription(
    State(state): State<AppState>,
    payload: Result<Json<SiteQuery>, JsonRejection>,
) -> Result<Json<SubscribersResponse>, ApiError> {
    let Json(query) = payload?;
    let subscription = require(query.subscription, "subscription")?;
    let subscribers = state
        .subscriptions
        .get_subscribers_by_subscription(&subscription)
        .await?;
    Ok(Json(SubscribersResponse { subscribers }))
}

/// DELETE /api/subscriber
pub async fn delete_subscriber(
    State(state): State<AppState>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(request) = payload?;
    state.subscriptions.delete_subscriber(&request.email).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/subscription
pub async fn subscribe(
    State(state): State<AppState>,
    payload: Result<Json<SubscribeRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(request) = payload?;
    let subscription = require(request.subscription, "subscription")?;
    state
        .subscriptions
        .subscribe(&request.email, &subscription)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/subscription/by_subscriber
pub async fn get_subscriptions_by_subscriber(
    State(state): State<AppState>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> Result<Json<SubscriptionsResponse>, ApiError> {
    let Json(request) = payload?;
    let subscriptions = state
        .subscriptions
        .get_subscriptions_by_subscriber(&request.email)
        .await?;
    Ok(Json(SubscriptionsResponse { subscriptions }))
}

/// DELETE /api/subscription
pub async fn unsubscribe(
    State(state): State<AppState>,
    payload: Result<Json<SubscribeRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(request) = payload?;
    let subscription = require(request.subscription, "subscription")?;
    state
        .subscriptions
        .unsubscribe(&request.email, &subscription)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
