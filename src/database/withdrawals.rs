//! Withdrawal request lifecycle: PENDENTE -> {APROVADO -> PAGO, REJEITADO}.
//!
//! Funds are reserved when the request is created and either paid out or
//! released when it resolves. Transition legality is checked before any
//! ledger mutation, under a row lock on the request, so an illegal call
//! leaves both the request and the ledger untouched.

use bigdecimal::{BigDecimal, Signed};
use diesel::{Connection, ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};
use tracing::info;

use crate::commission::round_to_cents;
use crate::database::idgen;
use crate::database::ledger;
use crate::database::models::{NewWithdrawalRequest, WithdrawalRequest, WithdrawalStatus};
use crate::error::SettlementError;

/// Creates a PENDENTE request and moves the amount from available to held in
/// the same transaction, so the funds cannot back another request while this
/// one is open.
pub fn create(
    conn: &mut PgConnection,
    req_photographer: &str,
    req_amount: &BigDecimal,
    req_pix_key: &str,
    min_withdrawal: &BigDecimal,
) -> Result<WithdrawalRequest, SettlementError> {
    if !req_amount.is_positive() {
        return Err(SettlementError::NegativeAmount);
    }
    let req_amount = round_to_cents(req_amount);
    if req_amount < *min_withdrawal {
        return Err(SettlementError::BelowMinimum {
            minimum: min_withdrawal.clone(),
        });
    }
    if req_pix_key.trim().is_empty() {
        return Err(SettlementError::MissingPixKey);
    }

    conn.transaction::<_, SettlementError, _>(|conn| {
        ledger::reserve(conn, req_photographer, &req_amount)?;

        use crate::schema::withdrawal_requests::dsl::*;
        let new_request = NewWithdrawalRequest {
            id: idgen::next(),
            photographer_id: req_photographer.to_string(),
            amount: req_amount,
            status: WithdrawalStatus::Pendente.as_str().to_string(),
            pix_key: req_pix_key.to_string(),
            requested_at: chrono::Utc::now().naive_utc(),
        };
        diesel::insert_into(withdrawal_requests)
            .values(&new_request)
            .execute(conn)?;

        info!(
            "withdrawal {} requested by {} for {}",
            new_request.id, req_photographer, new_request.amount
        );
        withdrawal_requests
            .filter(id.eq(new_request.id))
            .first::<WithdrawalRequest>(conn)
            .map_err(Into::into)
    })
}

fn lock_request(conn: &mut PgConnection, req_id: i64) -> Result<(WithdrawalRequest, WithdrawalStatus), SettlementError> {
    use crate::schema::withdrawal_requests::dsl::*;
    let request = withdrawal_requests
        .filter(id.eq(req_id))
        .for_update()
        .first::<WithdrawalRequest>(conn)
        .optional()?
        .ok_or(SettlementError::WithdrawalNotFound(req_id))?;
    let current = request
        .parsed_status()
        .ok_or(SettlementError::CorruptRecord("withdrawal_requests", req_id))?;
    Ok((request, current))
}

fn check_transition(
    current: WithdrawalStatus,
    next: WithdrawalStatus,
) -> Result<(), SettlementError> {
    if current.can_transition_to(next) {
        Ok(())
    } else {
        Err(SettlementError::InvalidStateTransition {
            from: current.as_str().to_string(),
            attempted: next.as_str().to_string(),
        })
    }
}

/// The operator gate before the payout transfer runs on the external rail.
/// No ledger effect.
pub fn approve(conn: &mut PgConnection, req_id: i64) -> Result<WithdrawalRequest, SettlementError> {
    conn.transaction::<_, SettlementError, _>(|conn| {
        let (request, current) = lock_request(conn, req_id)?;
        check_transition(current, WithdrawalStatus::Aprovado)?;

        use crate::schema::withdrawal_requests::dsl::*;
        diesel::update(withdrawal_requests.filter(id.eq(req_id)))
            .set(status.eq(WithdrawalStatus::Aprovado.as_str()))
            .execute(conn)?;
        info!("withdrawal {} approved", request.id);
        reload(conn, req_id)
    })
}

/// Records that the payout transfer went through: the held funds leave the
/// ledger permanently.
pub fn mark_paid(conn: &mut PgConnection, req_id: i64) -> Result<WithdrawalRequest, SettlementError> {
    conn.transaction::<_, SettlementError, _>(|conn| {
        let (request, current) = lock_request(conn, req_id)?;
        check_transition(current, WithdrawalStatus::Pago)?;

        ledger::settle(conn, &request.photographer_id, &request.amount, request.id)?;

        use crate::schema::withdrawal_requests::dsl::*;
        diesel::update(withdrawal_requests.filter(id.eq(req_id)))
            .set((
                status.eq(WithdrawalStatus::Pago.as_str()),
                resolved_at.eq(chrono::Utc::now().naive_utc()),
            ))
            .execute(conn)?;
        info!("withdrawal {} paid out to {}", request.id, request.photographer_id);
        reload(conn, req_id)
    })
}

/// Rejects a pending or approved request and returns the reserved funds.
pub fn reject(
    conn: &mut PgConnection,
    req_id: i64,
    reason: &str,
) -> Result<WithdrawalRequest, SettlementError> {
    conn.transaction::<_, SettlementError, _>(|conn| {
        let (request, current) = lock_request(conn, req_id)?;
        check_transition(current, WithdrawalStatus::Rejeitado)?;

        ledger::release(conn, &request.photographer_id, &request.amount)?;

        use crate::schema::withdrawal_requests::dsl::*;
        diesel::update(withdrawal_requests.filter(id.eq(req_id)))
            .set((
                status.eq(WithdrawalStatus::Rejeitado.as_str()),
                note.eq(reason),
                resolved_at.eq(chrono::Utc::now().naive_utc()),
            ))
            .execute(conn)?;
        info!("withdrawal {} rejected: {}", request.id, reason);
        reload(conn, req_id)
    })
}

fn reload(conn: &mut PgConnection, req_id: i64) -> Result<WithdrawalRequest, SettlementError> {
    use crate::schema::withdrawal_requests::dsl::*;
    withdrawal_requests
        .filter(id.eq(req_id))
        .first::<WithdrawalRequest>(conn)
        .map_err(Into::into)
}
