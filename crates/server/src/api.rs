//! JSON API over the quote service.
//!
//! Authentication is external: callers pass the already-authenticated
//! actor's id in `X-Actor-Id`, and the handler resolves it against the
//! user directory once per request. Timestamps are taken here, at the
//! boundary, and passed into the service explicitly.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use bitquote_core::domain::actor::{Actor, ActorId};
use bitquote_core::domain::party::{ContactId, CustomerId};
use bitquote_core::domain::product::ProductId;
use bitquote_core::domain::quote::{
    DiscountRate, PaymentTerms, Quote, QuoteComment, QuoteId,
};
use bitquote_core::errors::{ApplicationError, DomainError};
use bitquote_core::pricing::LineInput;
use bitquote_core::workflow::TransitionOutcome;
use bitquote_db::{
    CreateQuoteInput, DashboardSnapshot, QuoteDetail, QuoteListQuery, QuoteService,
};

const ACTOR_HEADER: &str = "x-actor-id";

#[derive(Clone)]
pub struct ApiState {
    service: Arc<QuoteService>,
}

type ApiError = (StatusCode, Json<ErrorBody>);

pub fn router(service: Arc<QuoteService>) -> Router {
    Router::new()
        .route("/api/v1/quotes", post(create_quote).get(list_quotes))
        .route("/api/v1/quotes/{id}", get(get_quote))
        .route("/api/v1/quotes/{id}/lines", put(rebuild_lines))
        .route("/api/v1/quotes/{id}/close", post(close_internal))
        .route("/api/v1/quotes/{id}/approve", post(approve))
        .route("/api/v1/quotes/{id}/send", post(mark_sent))
        .route("/api/v1/quotes/{id}/won", post(mark_won))
        .route("/api/v1/quotes/{id}/lost", post(mark_lost))
        .route("/api/v1/quotes/{id}/expire", post(mark_expired))
        .route("/api/v1/quotes/{id}/comments", post(add_comment).get(list_comments))
        .route("/api/v1/dashboard", get(dashboard))
        .with_state(ApiState { service })
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateQuoteRequest {
    pub customer_id: i64,
    pub contact_id: i64,
    pub owner_id: Option<i64>,
    /// Storage code, e.g. `CSH` or `N30`. Defaults to cash.
    pub payment_terms: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RebuildLinesRequest {
    pub lines: Vec<LineRequest>,
    pub payment_terms: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LineRequest {
    pub product_id: i64,
    pub quantity: u32,
    /// Discount percentage from the fixed set (0/3/5/7/10/15/50/100).
    #[serde(default)]
    pub discount: u32,
    #[serde(default)]
    pub delivery_days: u32,
    pub unit_price: Option<Decimal>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MarkLostRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub body: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuotesParams {
    pub customer_id: Option<i64>,
    pub owner_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    pub action: &'static str,
    pub from: &'static str,
    pub to: &'static str,
}

impl From<TransitionOutcome> for TransitionResponse {
    fn from(outcome: TransitionOutcome) -> Self {
        Self {
            action: outcome.action.as_str(),
            from: outcome.from.as_str(),
            to: outcome.to.as_str(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_index: Option<usize>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub async fn create_quote(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<CreateQuoteRequest>,
) -> Result<(StatusCode, Json<Quote>), ApiError> {
    let actor = require_actor(&state, &headers).await?;
    let payment_terms = parse_payment_terms(request.payment_terms.as_deref())?;

    let quote = state
        .service
        .create_quote(
            CreateQuoteInput {
                customer_id: CustomerId(request.customer_id),
                contact_id: ContactId(request.contact_id),
                owner_id: request.owner_id.map(ActorId),
                payment_terms,
            },
            &actor,
            Utc::now(),
        )
        .await
        .map_err(error_response)?;

    info!(
        event_name = "api.quote.created",
        quote_id = quote.id.0,
        actor_id = actor.id.0,
        "quote created"
    );
    Ok((StatusCode::CREATED, Json(quote)))
}

pub async fn list_quotes(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(params): Query<ListQuotesParams>,
) -> Result<Json<Vec<Quote>>, ApiError> {
    let actor = require_actor(&state, &headers).await?;
    let quotes = state
        .service
        .list_quotes(
            &QuoteListQuery {
                customer_id: params.customer_id.map(CustomerId),
                owner_id: params.owner_id.map(ActorId),
            },
            &actor,
        )
        .await
        .map_err(error_response)?;
    Ok(Json(quotes))
}

pub async fn get_quote(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<QuoteDetail>, ApiError> {
    require_actor(&state, &headers).await?;
    let detail = state.service.get_quote(QuoteId(id)).await.map_err(error_response)?;
    Ok(Json(detail))
}

pub async fn rebuild_lines(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(request): Json<RebuildLinesRequest>,
) -> Result<Json<QuoteDetail>, ApiError> {
    let actor = require_actor(&state, &headers).await?;
    let payment_terms = match request.payment_terms.as_deref() {
        Some(code) => Some(parse_payment_terms(Some(code))?),
        None => None,
    };
    let lines = convert_lines(&request.lines)?;

    let detail = state
        .service
        .rebuild_lines(QuoteId(id), &lines, payment_terms, &actor, Utc::now())
        .await
        .map_err(error_response)?;
    Ok(Json(detail))
}

pub async fn close_internal(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let actor = require_actor(&state, &headers).await?;
    let outcome = state
        .service
        .close_internal(QuoteId(id), &actor, Utc::now())
        .await
        .map_err(error_response)?;
    Ok(Json(outcome.into()))
}

pub async fn approve(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let actor = require_actor(&state, &headers).await?;
    let outcome =
        state.service.approve(QuoteId(id), &actor, Utc::now()).await.map_err(error_response)?;
    Ok(Json(outcome.into()))
}

pub async fn mark_sent(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let actor = require_actor(&state, &headers).await?;
    let outcome =
        state.service.mark_sent(QuoteId(id), &actor, Utc::now()).await.map_err(error_response)?;
    Ok(Json(outcome.into()))
}

pub async fn mark_won(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let actor = require_actor(&state, &headers).await?;
    let outcome =
        state.service.mark_won(QuoteId(id), &actor, Utc::now()).await.map_err(error_response)?;
    Ok(Json(outcome.into()))
}

pub async fn mark_lost(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(request): Json<MarkLostRequest>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let actor = require_actor(&state, &headers).await?;
    let outcome = state
        .service
        .mark_lost(QuoteId(id), &actor, &request.reason, Utc::now())
        .await
        .map_err(error_response)?;
    Ok(Json(outcome.into()))
}

/// Invoked by the external expiry scheduler, not an end user; the caller
/// still authenticates like any other actor.
pub async fn mark_expired(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<TransitionResponse>, ApiError> {
    require_actor(&state, &headers).await?;
    let outcome =
        state.service.mark_expired(QuoteId(id), Utc::now()).await.map_err(error_response)?;
    Ok(Json(outcome.into()))
}

pub async fn add_comment(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(request): Json<CommentRequest>,
) -> Result<(StatusCode, Json<QuoteComment>), ApiError> {
    let actor = require_actor(&state, &headers).await?;
    let comment = state
        .service
        .add_comment(QuoteId(id), &actor, &request.body, Utc::now())
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn list_comments(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Vec<QuoteComment>>, ApiError> {
    require_actor(&state, &headers).await?;
    let comments = state.service.comments(QuoteId(id)).await.map_err(error_response)?;
    Ok(Json(comments))
}

pub async fn dashboard(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<DashboardSnapshot>, ApiError> {
    let actor = require_actor(&state, &headers).await?;
    let snapshot =
        state.service.dashboard(&actor, Utc::now()).await.map_err(error_response)?;
    Ok(Json(snapshot))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn require_actor(state: &ApiState, headers: &HeaderMap) -> Result<Actor, ApiError> {
    let raw = headers
        .get(ACTOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| unauthorized("missing X-Actor-Id header"))?;
    let id = raw
        .parse::<i64>()
        .map_err(|_| unauthorized("X-Actor-Id header must be a numeric user id"))?;

    state
        .service
        .resolve_actor(ActorId(id))
        .await
        .map_err(|_| unauthorized("unknown actor"))
}

fn parse_payment_terms(code: Option<&str>) -> Result<PaymentTerms, ApiError> {
    match code {
        None => Ok(PaymentTerms::default()),
        Some(code) => PaymentTerms::parse(code).ok_or_else(|| {
            validation_error(
                format!("unknown payment terms code `{code}`"),
                Some("payment_terms".to_owned()),
                None,
            )
        }),
    }
}

fn convert_lines(requests: &[LineRequest]) -> Result<Vec<LineInput>, ApiError> {
    requests
        .iter()
        .enumerate()
        .map(|(index, request)| {
            let discount = DiscountRate::from_percent(request.discount).ok_or_else(|| {
                validation_error(
                    format!(
                        "line {index}: discount {}% is not one of the allowed rates",
                        request.discount
                    ),
                    None,
                    Some(index),
                )
            })?;
            Ok(LineInput {
                product_id: ProductId(request.product_id),
                quantity: request.quantity,
                discount,
                delivery_days: request.delivery_days,
                unit_price: request.unit_price,
                description: request.description.clone(),
            })
        })
        .collect()
}

fn unauthorized(message: &str) -> ApiError {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorBody { error: message.to_owned(), field: None, line_index: None }),
    )
}

fn validation_error(message: String, field: Option<String>, line_index: Option<usize>) -> ApiError {
    (StatusCode::UNPROCESSABLE_ENTITY, Json(ErrorBody { error: message, field, line_index }))
}

fn error_response(error: ApplicationError) -> ApiError {
    let status = match &error {
        ApplicationError::Domain(domain) => match domain {
            DomainError::TransitionRejected { .. } => StatusCode::CONFLICT,
            DomainError::Forbidden { .. } => StatusCode::FORBIDDEN,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        },
        ApplicationError::NotFound(_) => StatusCode::NOT_FOUND,
        ApplicationError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
        ApplicationError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let (field, line_index) = match &error {
        ApplicationError::Domain(DomainError::Validation { field, .. }) => {
            (Some((*field).to_owned()), None)
        }
        ApplicationError::Domain(DomainError::LineValidation { index, .. })
        | ApplicationError::Domain(DomainError::UnknownProduct { index, .. }) => {
            (None, Some(*index))
        }
        _ => (None, None),
    };

    (status, Json(ErrorBody { error: error.to_string(), field, line_index }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, HeaderValue, StatusCode};
    use axum::Json;

    use bitquote_core::config::AppConfig;
    use bitquote_db::{connect_with_settings, migrations, QuoteService, SeedDataset};

    use super::{
        close_internal, create_quote, mark_sent, rebuild_lines, ApiState, CreateQuoteRequest,
        LineRequest, RebuildLinesRequest,
    };

    async fn setup_state() -> ApiState {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        SeedDataset::load(&pool).await.expect("load seed fixtures");

        let config = AppConfig::default();
        let service = QuoteService::new(pool, &config.pricing, &config.approval);
        ApiState { service: Arc::new(service) }
    }

    fn actor_headers(id: i64) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-actor-id",
            HeaderValue::from_str(&id.to_string()).expect("valid header value"),
        );
        headers
    }

    fn create_request() -> CreateQuoteRequest {
        CreateQuoteRequest {
            customer_id: 1,
            contact_id: 1,
            owner_id: None,
            payment_terms: Some("N30".to_owned()),
        }
    }

    #[tokio::test]
    async fn create_quote_returns_created_with_reference() {
        let state = setup_state().await;

        let (status, Json(quote)) =
            create_quote(State(state), actor_headers(1), Json(create_request()))
                .await
                .expect("create quote");

        assert_eq!(status, StatusCode::CREATED);
        assert!(quote.reference.expect("reference").0.starts_with("BIT-MG-"));
    }

    #[tokio::test]
    async fn missing_actor_header_is_unauthorized() {
        let state = setup_state().await;

        let error = create_quote(State(state), HeaderMap::new(), Json(create_request()))
            .await
            .expect_err("no actor header");
        assert_eq!(error.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn disallowed_discount_reports_the_line_index() {
        let state = setup_state().await;
        let (_, Json(quote)) =
            create_quote(State(state.clone()), actor_headers(1), Json(create_request()))
                .await
                .expect("create quote");

        let request = RebuildLinesRequest {
            payment_terms: None,
            lines: vec![
                LineRequest {
                    product_id: 3,
                    quantity: 1,
                    discount: 0,
                    delivery_days: 0,
                    unit_price: None,
                    description: None,
                },
                LineRequest {
                    product_id: 3,
                    quantity: 1,
                    discount: 12,
                    delivery_days: 0,
                    unit_price: None,
                    description: None,
                },
            ],
        };

        let (status, Json(body)) =
            rebuild_lines(State(state), actor_headers(1), Path(quote.id.0), Json(request))
                .await
                .expect_err("discount 12 is not allowed");
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.line_index, Some(1));
    }

    #[tokio::test]
    async fn sending_a_draft_is_a_conflict() {
        let state = setup_state().await;
        let (_, Json(quote)) =
            create_quote(State(state.clone()), actor_headers(1), Json(create_request()))
                .await
                .expect("create quote");

        let (status, _) = mark_sent(State(state), actor_headers(1), Path(quote.id.0))
            .await
            .expect_err("draft cannot be sent");
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn close_then_send_succeeds_for_the_owner() {
        let state = setup_state().await;
        let (_, Json(quote)) =
            create_quote(State(state.clone()), actor_headers(1), Json(create_request()))
                .await
                .expect("create quote");

        let request = RebuildLinesRequest {
            payment_terms: None,
            lines: vec![LineRequest {
                product_id: 3,
                quantity: 2,
                discount: 5,
                delivery_days: 10,
                unit_price: None,
                description: None,
            }],
        };
        rebuild_lines(
            State(state.clone()),
            actor_headers(1),
            Path(quote.id.0),
            Json(request),
        )
        .await
        .expect("rebuild lines");

        let Json(closed) =
            close_internal(State(state.clone()), actor_headers(1), Path(quote.id.0))
                .await
                .expect("close internal");
        assert_eq!(closed.to, "APP");

        let Json(sent) = mark_sent(State(state), actor_headers(1), Path(quote.id.0))
            .await
            .expect("mark sent");
        assert_eq!(sent.from, "APP");
        assert_eq!(sent.to, "SNT");
    }
}
