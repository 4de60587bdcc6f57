use std::ops::DerefMut;
use std::str::FromStr;

use actix_request_identifier::RequestId;
use actix_web::{get, post, web, HttpRequest, HttpResponse};
use bigdecimal::BigDecimal;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;
use serde::Deserialize;
use tracing::{error, instrument, warn};

use crate::config::Config;
use crate::database::orders::{self, OrderLineInput};
use crate::database::{queries, settlement, withdrawals};
use crate::error::SettlementError;
use crate::events::{self, PaymentProvider, WebhookError, WebhookHeaders};
use crate::notify::{self, Notifier};
use crate::responses;

type DbPool = Pool<ConnectionManager<PgConnection>>;

fn log_settlement_error(err: &SettlementError) {
    if err.is_fatal() {
        error!("settlement halted, manual reconciliation required: {err}");
    } else if err.is_retryable() {
        error!("{err}");
    }
}

#[post("/webhooks/{provider}")]
#[instrument(skip(db, config, notifier, req, body), fields(request_id = request_id.as_str()))]
pub async fn webhook_handler(
    db: web::Data<DbPool>,
    config: web::Data<Config>,
    notifier: web::Data<dyn Notifier>,
    request_id: RequestId,
    provider_path: web::Path<String>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, Box<dyn std::error::Error>> {
    let provider = match PaymentProvider::from_path(provider_path.as_str()) {
        Some(provider) => provider,
        None => return Ok(responses::not_found_http_response("provider")),
    };
    let secret = match provider {
        PaymentProvider::Stripe => config.stripe_webhook_secret.clone(),
        PaymentProvider::MercadoPago => config.mercadopago_webhook_secret.clone(),
    };
    if secret.is_empty() {
        return Ok(responses::not_configured_http_response("webhook secret"));
    }

    let header = |name: &str| req.headers().get(name).and_then(|value| value.to_str().ok());
    let headers = WebhookHeaders {
        signature: match provider {
            PaymentProvider::Stripe => header("stripe-signature"),
            PaymentProvider::MercadoPago => header("x-signature"),
        },
        request_id: header("x-request-id"),
    };

    // authenticity is checked before any database interaction
    let now_epoch = chrono::Utc::now().timestamp();
    let event = match events::normalize(provider, &body, &headers, &secret, now_epoch) {
        Ok(Some(event)) => event,
        Ok(None) => return Ok(responses::webhook_ignored_http_response()),
        Err(WebhookError::InvalidSignature(reason)) => {
            warn!("rejected {} delivery: {reason}", provider.as_str());
            return Ok(responses::invalid_signature_http_response(reason));
        }
        Err(WebhookError::MalformedPayload(reason)) => {
            return Ok(responses::bad_parameter_http_response(reason));
        }
    };

    let mut conn = db.get()?;
    let fee_percent = config.platform_fee_percent.clone();
    let result =
        web::block(move || settlement::handle_event(conn.deref_mut(), &fee_percent, &event)).await;

    match result {
        Ok(Ok(outcome)) => {
            // the transaction is committed; notification failures stay here
            notify::notify_settlement(notifier.get_ref(), &outcome);
            Ok(responses::webhook_ack_http_response(&outcome))
        }
        Ok(Err(e)) => {
            log_settlement_error(&e);
            Ok(responses::settlement_error_http_response(&e))
        }
        Err(e) => {
            error!("{e}");
            Ok(responses::retryable_http_response())
        }
    }
}

#[derive(Deserialize)]
pub struct OrderLineJson {
    pub photographer_id: String,
    pub photo_id: String,
    pub price: String,
}

#[derive(Deserialize)]
pub struct CreateOrderInput {
    pub buyer_id: String,
    pub lines: Vec<OrderLineJson>,
}

#[post("/orders")]
#[instrument(skip(db, input), fields(request_id = request_id.as_str()))]
pub async fn create_order_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    input: web::Json<CreateOrderInput>,
) -> Result<HttpResponse, Box<dyn std::error::Error>> {
    let input = input.into_inner();
    if input.buyer_id.is_empty() {
        return Ok(responses::bad_parameter_http_response("buyer_id"));
    }
    let mut lines = Vec::with_capacity(input.lines.len());
    for line in input.lines {
        if line.photographer_id.is_empty() {
            return Ok(responses::bad_parameter_http_response("photographer_id"));
        }
        let price_paid = match BigDecimal::from_str(&line.price) {
            Ok(price) => price,
            Err(_) => return Ok(responses::bad_parameter_http_response("price")),
        };
        lines.push(OrderLineInput {
            photographer_id: line.photographer_id,
            photo_id: line.photo_id,
            price_paid,
        });
    }

    let mut conn = db.get()?;
    let buyer_id = input.buyer_id;
    let result = web::block(move || -> Result<_, SettlementError> {
        let order = orders::create_order(conn.deref_mut(), &buyer_id, lines)?;
        queries::load_order_with_lines(conn.deref_mut(), order.id)?
            .ok_or(SettlementError::OrderNotFound(order.id))
    })
    .await;

    match result {
        Ok(Ok((order, lines))) => Ok(responses::order_http_response(order, lines)),
        Ok(Err(e)) => {
            log_settlement_error(&e);
            Ok(responses::settlement_error_http_response(&e))
        }
        Err(e) => {
            error!("{e}");
            Ok(responses::retryable_http_response())
        }
    }
}

#[get("/orders/{id}")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn order_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    order_id: web::Path<i64>,
) -> Result<HttpResponse, Box<dyn std::error::Error>> {
    let order_id = order_id.into_inner();
    let mut conn = db.get()?;
    web::block(move || queries::load_order_with_lines(conn.deref_mut(), order_id).map_err(anyhow::Error::from))
        .await
        .unwrap_or_else(|e| {
            error!("{e}");
            Err(e.into())
        })
        .map(|detail| match detail {
            Some((order, lines)) => responses::order_http_response(order, lines),
            None => responses::not_found_http_response("order"),
        })
        .map_err(Into::into)
}

#[get("/balance/{photographer_id}")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn balance_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    photographer_id: web::Path<String>,
) -> Result<HttpResponse, Box<dyn std::error::Error>> {
    let photographer_id = photographer_id.into_inner();
    let mut conn = db.get()?;

    let photographer_id1 = photographer_id.clone();
    web::block(move || {
        queries::load_balance(conn.deref_mut(), photographer_id1.as_str()).map_err(anyhow::Error::from)
    })
    .await
    .unwrap_or_else(|e| {
        error!("{e}");
        Err(e.into())
    })
    .map(|balance| responses::balance_http_response(balance, photographer_id.as_str()))
    .map_err(Into::into)
}

#[get("/photographers/{photographer_id}/statement")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn statement_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    photographer_id: web::Path<String>,
) -> Result<HttpResponse, Box<dyn std::error::Error>> {
    let photographer_id = photographer_id.into_inner();
    let mut conn = db.get()?;
    web::block(move || {
        queries::load_statement(conn.deref_mut(), photographer_id.as_str()).map_err(anyhow::Error::from)
    })
    .await
    .unwrap_or_else(|e| {
        error!("{e}");
        Err(e.into())
    })
    .map(responses::statement_http_response)
    .map_err(Into::into)
}

#[get("/photographers/{photographer_id}/audit")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn audit_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    photographer_id: web::Path<String>,
) -> Result<HttpResponse, Box<dyn std::error::Error>> {
    let photographer_id = photographer_id.into_inner();
    let mut conn = db.get()?;
    web::block(move || {
        queries::audit_balance(conn.deref_mut(), photographer_id.as_str()).map_err(anyhow::Error::from)
    })
    .await
    .unwrap_or_else(|e| {
        error!("{e}");
        Err(e.into())
    })
    .map(responses::audit_http_response)
    .map_err(Into::into)
}

#[get("/photographers/{photographer_id}/withdrawals")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn withdrawal_list_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    photographer_id: web::Path<String>,
) -> Result<HttpResponse, Box<dyn std::error::Error>> {
    let photographer_id = photographer_id.into_inner();
    let mut conn = db.get()?;
    web::block(move || {
        queries::list_withdrawals(conn.deref_mut(), photographer_id.as_str()).map_err(anyhow::Error::from)
    })
    .await
    .unwrap_or_else(|e| {
        error!("{e}");
        Err(e.into())
    })
    .map(responses::withdrawal_list_http_response)
    .map_err(Into::into)
}

#[derive(Deserialize)]
pub struct CreateWithdrawalInput {
    pub photographer_id: String,
    pub amount: String,
    pub pix_key: String,
}

#[post("/withdrawals")]
#[instrument(skip(db, config, input), fields(request_id = request_id.as_str()))]
pub async fn create_withdrawal_handler(
    db: web::Data<DbPool>,
    config: web::Data<Config>,
    request_id: RequestId,
    input: web::Json<CreateWithdrawalInput>,
) -> Result<HttpResponse, Box<dyn std::error::Error>> {
    let input = input.into_inner();
    if input.photographer_id.is_empty() {
        return Ok(responses::bad_parameter_http_response("photographer_id"));
    }
    let amount = match BigDecimal::from_str(&input.amount) {
        Ok(amount) => amount,
        Err(_) => return Ok(responses::bad_parameter_http_response("amount")),
    };

    let mut conn = db.get()?;
    let min_withdrawal = config.min_withdrawal.clone();
    let result = web::block(move || {
        withdrawals::create(
            conn.deref_mut(),
            &input.photographer_id,
            &amount,
            &input.pix_key,
            &min_withdrawal,
        )
    })
    .await;

    match result {
        Ok(Ok(request)) => Ok(responses::withdrawal_http_response(request)),
        Ok(Err(e)) => {
            log_settlement_error(&e);
            Ok(responses::settlement_error_http_response(&e))
        }
        Err(e) => {
            error!("{e}");
            Ok(responses::retryable_http_response())
        }
    }
}

#[get("/withdrawals/{id}")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn withdrawal_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    withdrawal_id: web::Path<i64>,
) -> Result<HttpResponse, Box<dyn std::error::Error>> {
    let withdrawal_id = withdrawal_id.into_inner();
    let mut conn = db.get()?;
    web::block(move || {
        queries::load_withdrawal(conn.deref_mut(), withdrawal_id).map_err(anyhow::Error::from)
    })
    .await
    .unwrap_or_else(|e| {
        error!("{e}");
        Err(e.into())
    })
    .map(|request| match request {
        Some(request) => responses::withdrawal_http_response(request),
        None => responses::not_found_http_response("withdrawal"),
    })
    .map_err(Into::into)
}

enum Resolution {
    Approve,
    Pay,
    Reject(String),
}

async fn resolve_withdrawal(
    db: web::Data<DbPool>,
    notifier: web::Data<dyn Notifier>,
    withdrawal_id: i64,
    resolution: Resolution,
) -> Result<HttpResponse, Box<dyn std::error::Error>> {
    let mut conn = db.get()?;
    let result = web::block(move || match resolution {
        Resolution::Approve => withdrawals::approve(conn.deref_mut(), withdrawal_id),
        Resolution::Pay => withdrawals::mark_paid(conn.deref_mut(), withdrawal_id),
        Resolution::Reject(reason) => withdrawals::reject(conn.deref_mut(), withdrawal_id, &reason),
    })
    .await;

    match result {
        Ok(Ok(request)) => {
            if let Some(status) = request.parsed_status() {
                notifier.withdrawal_resolved(request.id, &request.photographer_id, status);
            }
            Ok(responses::withdrawal_http_response(request))
        }
        Ok(Err(e)) => {
            log_settlement_error(&e);
            Ok(responses::settlement_error_http_response(&e))
        }
        Err(e) => {
            error!("{e}");
            Ok(responses::retryable_http_response())
        }
    }
}

#[post("/withdrawals/{id}/approve")]
#[instrument(skip(db, notifier), fields(request_id = request_id.as_str()))]
pub async fn approve_withdrawal_handler(
    db: web::Data<DbPool>,
    notifier: web::Data<dyn Notifier>,
    request_id: RequestId,
    withdrawal_id: web::Path<i64>,
) -> Result<HttpResponse, Box<dyn std::error::Error>> {
    resolve_withdrawal(db, notifier, withdrawal_id.into_inner(), Resolution::Approve).await
}

#[post("/withdrawals/{id}/pay")]
#[instrument(skip(db, notifier), fields(request_id = request_id.as_str()))]
pub async fn pay_withdrawal_handler(
    db: web::Data<DbPool>,
    notifier: web::Data<dyn Notifier>,
    request_id: RequestId,
    withdrawal_id: web::Path<i64>,
) -> Result<HttpResponse, Box<dyn std::error::Error>> {
    resolve_withdrawal(db, notifier, withdrawal_id.into_inner(), Resolution::Pay).await
}

#[derive(Deserialize)]
pub struct RejectWithdrawalInput {
    pub reason: Option<String>,
}

#[post("/withdrawals/{id}/reject")]
#[instrument(skip(db, notifier, input), fields(request_id = request_id.as_str()))]
pub async fn reject_withdrawal_handler(
    db: web::Data<DbPool>,
    notifier: web::Data<dyn Notifier>,
    request_id: RequestId,
    withdrawal_id: web::Path<i64>,
    input: web::Json<RejectWithdrawalInput>,
) -> Result<HttpResponse, Box<dyn std::error::Error>> {
    let reason = input
        .into_inner()
        .reason
        .unwrap_or_else(|| "Rejected by operator".to_string());
    resolve_withdrawal(
        db,
        notifier,
        withdrawal_id.into_inner(),
        Resolution::Reject(reason),
    )
    .await
}
