use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde::Serialize;

use crate::database::models::{LedgerEntry, Order, OrderLine, OrderStatus, WithdrawalRequest};
use crate::database::queries::{BalanceAudit, PhotographerBalance};
use crate::database::settlement::SettlementOutcome;
use crate::error::SettlementError;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

fn error_body(status: StatusCode, code: &'static str, message: String) -> HttpResponse {
    HttpResponse::build(status).json(ErrorBody {
        error: message,
        code,
    })
}

pub fn settlement_error_http_response(err: &SettlementError) -> HttpResponse {
    use SettlementError::*;
    let (status, code) = match err {
        InvalidAmount => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
        InvalidPercent => (StatusCode::BAD_REQUEST, "INVALID_PERCENT"),
        NegativeAmount => (StatusCode::BAD_REQUEST, "NEGATIVE_AMOUNT"),
        InsufficientFunds { .. } => (StatusCode::BAD_REQUEST, "INSUFFICIENT_FUNDS"),
        BelowMinimum { .. } => (StatusCode::BAD_REQUEST, "BELOW_MINIMUM"),
        MissingPixKey => (StatusCode::BAD_REQUEST, "MISSING_PIX_KEY"),
        EmptyOrder => (StatusCode::BAD_REQUEST, "EMPTY_ORDER"),
        InvalidStateTransition { .. } => (StatusCode::CONFLICT, "INVALID_STATE_TRANSITION"),
        OrderNotFound(_) => (StatusCode::NOT_FOUND, "ORDER_NOT_FOUND"),
        WithdrawalNotFound(_) => (StatusCode::NOT_FOUND, "WITHDRAWAL_NOT_FOUND"),
        LedgerInconsistency { .. } | CorruptRecord(..) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_INCONSISTENCY")
        }
        // the provider must redeliver
        Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "RETRYABLE"),
    };
    error_body(status, code, err.to_string())
}

pub fn bad_parameter_http_response(field: &str) -> HttpResponse {
    error_body(
        StatusCode::BAD_REQUEST,
        "BAD_PARAMETER",
        format!("invalid parameter: {field}"),
    )
}

pub fn not_found_http_response(what: &str) -> HttpResponse {
    error_body(StatusCode::NOT_FOUND, "NOT_FOUND", format!("{what} not found"))
}

pub fn not_configured_http_response(what: &str) -> HttpResponse {
    error_body(
        StatusCode::SERVICE_UNAVAILABLE,
        "NOT_CONFIGURED",
        format!("{what} is not configured"),
    )
}

pub fn invalid_signature_http_response(reason: &str) -> HttpResponse {
    error_body(
        StatusCode::UNAUTHORIZED,
        "INVALID_SIGNATURE",
        format!("invalid signature: {reason}"),
    )
}

pub fn retryable_http_response() -> HttpResponse {
    error_body(
        StatusCode::INTERNAL_SERVER_ERROR,
        "RETRYABLE",
        "transient failure, retry the delivery".to_string(),
    )
}

#[derive(Serialize)]
struct WebhookAck {
    received: bool,
    result: &'static str,
}

pub fn webhook_ack_http_response(outcome: &SettlementOutcome) -> HttpResponse {
    let result = match outcome {
        SettlementOutcome::Settled { .. } => "settled",
        SettlementOutcome::OrderClosed { .. } => "order_closed",
        SettlementOutcome::Reversed { .. } => "reversed",
        SettlementOutcome::AlreadyProcessed => "already_processed",
    };
    HttpResponse::Ok().json(WebhookAck {
        received: true,
        result,
    })
}

/// Authentic deliveries we take no action on still get a 200 so the provider
/// stops redelivering them.
pub fn webhook_ignored_http_response() -> HttpResponse {
    HttpResponse::Ok().json(WebhookAck {
        received: true,
        result: "ignored",
    })
}

#[derive(Serialize)]
struct BalanceBody {
    photographer_id: String,
    available: String,
    held: String,
}

pub fn balance_http_response(balance: PhotographerBalance, photographer_id: &str) -> HttpResponse {
    match balance {
        PhotographerBalance::Ok(values) => HttpResponse::Ok().json(BalanceBody {
            photographer_id: photographer_id.to_string(),
            available: values.available.to_string(),
            held: values.held.to_string(),
        }),
        PhotographerBalance::NotFound => not_found_http_response("balance"),
    }
}

#[derive(Serialize)]
struct LedgerEntryBody {
    id: String,
    kind: String,
    amount: String,
    description: String,
    related_order_id: Option<String>,
    related_withdrawal_id: Option<String>,
    created_at: String,
}

pub fn statement_http_response(entries: Vec<LedgerEntry>) -> HttpResponse {
    let body: Vec<LedgerEntryBody> = entries
        .into_iter()
        .map(|entry| LedgerEntryBody {
            id: entry.id.to_string(),
            kind: entry.kind,
            amount: entry.amount.to_string(),
            description: entry.description,
            related_order_id: entry.related_order_id.map(|id| id.to_string()),
            related_withdrawal_id: entry.related_withdrawal_id.map(|id| id.to_string()),
            created_at: entry.created_at.to_string(),
        })
        .collect();
    HttpResponse::Ok().json(body)
}

#[derive(Serialize)]
struct AuditBody {
    available: String,
    held: String,
    ledger_sum: String,
    consistent: bool,
}

pub fn audit_http_response(audit: BalanceAudit) -> HttpResponse {
    HttpResponse::Ok().json(AuditBody {
        available: audit.available.to_string(),
        held: audit.held.to_string(),
        ledger_sum: audit.ledger_sum.to_string(),
        consistent: audit.consistent,
    })
}

#[derive(Serialize)]
struct OrderLineBody {
    id: String,
    photographer_id: String,
    photo_id: String,
    price_paid: String,
    /// Present only once the order is PAID.
    download_token: Option<String>,
}

#[derive(Serialize)]
struct OrderBody {
    id: String,
    buyer_id: String,
    status: String,
    total: String,
    external_payment_id: Option<String>,
    created_at: String,
    lines: Vec<OrderLineBody>,
}

pub fn order_http_response(order: Order, lines: Vec<OrderLine>) -> HttpResponse {
    let unlocked = order.parsed_status() == Some(OrderStatus::Paid);
    let lines = lines
        .into_iter()
        .map(|line| OrderLineBody {
            id: line.id.to_string(),
            photographer_id: line.photographer_id,
            photo_id: line.photo_id,
            price_paid: line.price_paid.to_string(),
            download_token: unlocked.then_some(line.download_token),
        })
        .collect();
    HttpResponse::Ok().json(OrderBody {
        id: order.id.to_string(),
        buyer_id: order.buyer_id,
        status: order.status,
        total: order.total.to_string(),
        external_payment_id: order.external_payment_id,
        created_at: order.created_at.to_string(),
        lines,
    })
}

#[derive(Serialize)]
struct WithdrawalBody {
    id: String,
    photographer_id: String,
    amount: String,
    status: String,
    pix_key: String,
    note: Option<String>,
    requested_at: String,
    resolved_at: Option<String>,
}

fn withdrawal_body(request: WithdrawalRequest) -> WithdrawalBody {
    WithdrawalBody {
        id: request.id.to_string(),
        photographer_id: request.photographer_id,
        amount: request.amount.to_string(),
        status: request.status,
        pix_key: request.pix_key,
        note: request.note,
        requested_at: request.requested_at.to_string(),
        resolved_at: request.resolved_at.map(|at| at.to_string()),
    }
}

pub fn withdrawal_http_response(request: WithdrawalRequest) -> HttpResponse {
    HttpResponse::Ok().json(withdrawal_body(request))
}

pub fn withdrawal_list_http_response(requests: Vec<WithdrawalRequest>) -> HttpResponse {
    let body: Vec<WithdrawalBody> = requests.into_iter().map(withdrawal_body).collect();
    HttpResponse::Ok().json(body)
}
