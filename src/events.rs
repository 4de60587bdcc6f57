//! Normalization of provider webhook deliveries.
//!
//! Each provider adapter verifies the delivery's signature and maps the
//! payload into one [`NormalizedEvent`] before anything touches the
//! database. Provider quirks stay here; settlement only ever sees the
//! normalized shape.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Deliveries older or newer than this many seconds are rejected.
const TIMESTAMP_TOLERANCE_SECONDS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentProvider {
    Stripe,
    MercadoPago,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Stripe => "STRIPE",
            PaymentProvider::MercadoPago => "MERCADOPAGO",
        }
    }

    /// Resolves the `{provider}` path segment of the webhook endpoint.
    pub fn from_path(segment: &str) -> Option<PaymentProvider> {
        match segment {
            "stripe" => Some(PaymentProvider::Stripe),
            "mercadopago" => Some(PaymentProvider::MercadoPago),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Paid,
    Failed,
    Cancelled,
    Refunded,
}

/// The provider-agnostic event shape consumed by settlement.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub provider: PaymentProvider,
    pub event_id: String,
    pub order_ref: i64,
    pub outcome: PaymentOutcome,
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid signature: {0}")]
    InvalidSignature(&'static str),

    #[error("malformed payload: {0}")]
    MalformedPayload(&'static str),
}

/// Headers a webhook delivery arrives with. Which ones matter depends on
/// the provider.
pub struct WebhookHeaders<'a> {
    /// `Stripe-Signature` for Stripe, `x-signature` for Mercado Pago.
    pub signature: Option<&'a str>,
    /// `x-request-id`, part of Mercado Pago's signed manifest.
    pub request_id: Option<&'a str>,
}

/// Verifies and normalizes one webhook delivery.
///
/// `Ok(None)` means the delivery is authentic but not settlement-relevant
/// (an event type we do not act on); it must be acknowledged so the provider
/// stops redelivering it.
pub fn normalize(
    provider: PaymentProvider,
    body: &[u8],
    headers: &WebhookHeaders,
    secret: &str,
    now_epoch: i64,
) -> Result<Option<NormalizedEvent>, WebhookError> {
    match provider {
        PaymentProvider::Stripe => normalize_stripe(body, headers, secret, now_epoch),
        PaymentProvider::MercadoPago => normalize_mercadopago(body, headers, secret, now_epoch),
    }
}

fn parse_signature_pairs(header: &str) -> (Option<i64>, Vec<&str>) {
    let mut timestamp = None;
    let mut hashes = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) | Some(("ts", value)) => timestamp = value.trim().parse().ok(),
            Some(("v1", value)) => hashes.push(value.trim()),
            _ => {}
        }
    }
    (timestamp, hashes)
}

fn hmac_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

fn check_timestamp(timestamp: i64, now_epoch: i64) -> Result<(), WebhookError> {
    if (now_epoch - timestamp).abs() > TIMESTAMP_TOLERANCE_SECONDS {
        return Err(WebhookError::InvalidSignature("timestamp expired"));
    }
    Ok(())
}

/// Stripe signs `"{t}.{raw body}"` with HMAC-SHA256 and sends
/// `Stripe-Signature: t=...,v1=...` (possibly several v1 entries during
/// secret rollover).
fn normalize_stripe(
    body: &[u8],
    headers: &WebhookHeaders,
    secret: &str,
    now_epoch: i64,
) -> Result<Option<NormalizedEvent>, WebhookError> {
    let header = headers
        .signature
        .ok_or(WebhookError::InvalidSignature("missing Stripe-Signature"))?;
    let (timestamp, hashes) = parse_signature_pairs(header);
    let timestamp = timestamp.ok_or(WebhookError::InvalidSignature("bad header format"))?;
    if hashes.is_empty() {
        return Err(WebhookError::InvalidSignature("bad header format"));
    }
    check_timestamp(timestamp, now_epoch)?;

    let mut signed_payload = format!("{timestamp}.").into_bytes();
    signed_payload.extend_from_slice(body);
    let expected = hmac_hex(secret, &signed_payload);
    if !hashes.iter().any(|hash| *hash == expected) {
        return Err(WebhookError::InvalidSignature("signature mismatch"));
    }

    let payload: serde_json::Value = serde_json::from_slice(body)
        .map_err(|_| WebhookError::MalformedPayload("body is not json"))?;
    let event_id = payload["id"]
        .as_str()
        .ok_or(WebhookError::MalformedPayload("missing event id"))?
        .to_string();
    let event_type = payload["type"].as_str().unwrap_or_default();

    let outcome = match event_type {
        "checkout.session.completed" | "payment_intent.succeeded" => PaymentOutcome::Paid,
        "payment_intent.payment_failed" => PaymentOutcome::Failed,
        "payment_intent.canceled" => PaymentOutcome::Cancelled,
        "charge.refunded" => PaymentOutcome::Refunded,
        _ => return Ok(None),
    };

    let object = &payload["data"]["object"];
    let order_ref = object["metadata"]["order_id"]
        .as_str()
        .or_else(|| object["client_reference_id"].as_str())
        .ok_or(WebhookError::MalformedPayload("missing order reference"))?;
    let order_ref = order_ref
        .parse()
        .map_err(|_| WebhookError::MalformedPayload("order reference is not numeric"))?;

    Ok(Some(NormalizedEvent {
        provider: PaymentProvider::Stripe,
        event_id,
        order_ref,
        outcome,
    }))
}

/// Mercado Pago signs the manifest `id:{data.id};request-id:{rid};ts:{ts};`
/// (data id lowercased) and sends `x-signature: ts=...,v1=...` plus the
/// request id in `x-request-id`.
fn normalize_mercadopago(
    body: &[u8],
    headers: &WebhookHeaders,
    secret: &str,
    now_epoch: i64,
) -> Result<Option<NormalizedEvent>, WebhookError> {
    let payload: serde_json::Value = serde_json::from_slice(body)
        .map_err(|_| WebhookError::MalformedPayload("body is not json"))?;

    let topic = payload["type"]
        .as_str()
        .or_else(|| payload["topic"].as_str())
        .unwrap_or_default();
    if topic != "payment" {
        return Ok(None);
    }

    let data = &payload["data"];
    let data_id = match &data["id"] {
        serde_json::Value::String(id) => id.clone(),
        serde_json::Value::Number(id) => id.to_string(),
        _ => return Err(WebhookError::MalformedPayload("missing data id")),
    };

    let header = headers
        .signature
        .ok_or(WebhookError::InvalidSignature("missing x-signature"))?;
    let (timestamp, hashes) = parse_signature_pairs(header);
    let timestamp = timestamp.ok_or(WebhookError::InvalidSignature("bad header format"))?;
    let hash = *hashes
        .first()
        .ok_or(WebhookError::InvalidSignature("bad header format"))?;
    check_timestamp(timestamp, now_epoch)?;

    let manifest = format!(
        "id:{};request-id:{};ts:{};",
        data_id.to_lowercase(),
        headers.request_id.unwrap_or_default(),
        timestamp
    );
    if hmac_hex(secret, manifest.as_bytes()) != hash {
        return Err(WebhookError::InvalidSignature("signature mismatch"));
    }

    let order_ref = data["external_reference"]
        .as_str()
        .ok_or(WebhookError::MalformedPayload("missing order reference"))?
        .parse()
        .map_err(|_| WebhookError::MalformedPayload("order reference is not numeric"))?;

    let outcome = match data["status"].as_str().unwrap_or_default() {
        "approved" => PaymentOutcome::Paid,
        "rejected" => PaymentOutcome::Failed,
        "cancelled" => PaymentOutcome::Cancelled,
        "refunded" | "charged_back" => PaymentOutcome::Refunded,
        // pending / in_process / unknown: acknowledge and wait for the next
        // status notification
        _ => return Ok(None),
    };

    Ok(Some(NormalizedEvent {
        provider: PaymentProvider::MercadoPago,
        event_id: data_id,
        order_ref,
        outcome,
    }))
}
