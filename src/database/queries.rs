use bigdecimal::BigDecimal;
use diesel::{result::Error, ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};

use crate::database::models::{Balance, LedgerEntry, Order, OrderLine, WithdrawalRequest};

#[derive(PartialEq, Debug)]
pub enum PhotographerBalance {
    Ok(BalanceValues),
    NotFound,
}

#[derive(PartialEq, Debug)]
pub struct BalanceValues {
    pub available: BigDecimal,
    pub held: BigDecimal,
}

pub fn load_balance(
    conn: &mut PgConnection,
    req_photographer: &str,
) -> Result<PhotographerBalance, Error> {
    use crate::schema::balances::dsl::*;
    let balance = balances
        .filter(photographer_id.eq(req_photographer))
        .first::<Balance>(conn)
        .optional()?;
    Ok(match balance {
        Some(balance) => PhotographerBalance::Ok(BalanceValues {
            available: balance.available,
            held: balance.held,
        }),
        None => PhotographerBalance::NotFound,
    })
}

/// A photographer's ledger entries, newest first.
pub fn load_statement(
    conn: &mut PgConnection,
    req_photographer: &str,
) -> Result<Vec<LedgerEntry>, Error> {
    use crate::schema::ledger_entries::dsl::*;
    ledger_entries
        .filter(photographer_id.eq(req_photographer))
        .order(created_at.desc())
        .load::<LedgerEntry>(conn)
}

#[derive(Debug)]
pub struct BalanceAudit {
    pub available: BigDecimal,
    pub held: BigDecimal,
    /// Sum of all ledger entries for the photographer.
    pub ledger_sum: BigDecimal,
    /// The ledger is the source of truth: the materialized balance must
    /// always equal the recomputed entry sum.
    pub consistent: bool,
}

pub fn audit_balance(conn: &mut PgConnection, req_photographer: &str) -> Result<BalanceAudit, Error> {
    let (available, held) = match load_balance(conn, req_photographer)? {
        PhotographerBalance::Ok(values) => (values.available, values.held),
        PhotographerBalance::NotFound => (BigDecimal::from(0), BigDecimal::from(0)),
    };
    let ledger_sum = {
        use crate::schema::ledger_entries::dsl::*;
        ledger_entries
            .filter(photographer_id.eq(req_photographer))
            .load::<LedgerEntry>(conn)?
            .into_iter()
            .fold(BigDecimal::from(0), |acc, entry| acc + entry.amount)
    };
    let consistent = &available + &held == ledger_sum;
    Ok(BalanceAudit {
        available,
        held,
        ledger_sum,
        consistent,
    })
}

pub fn load_order_with_lines(
    conn: &mut PgConnection,
    req_order_id: i64,
) -> Result<Option<(Order, Vec<OrderLine>)>, Error> {
    let order = {
        use crate::schema::orders::dsl::*;
        orders
            .filter(id.eq(req_order_id))
            .first::<Order>(conn)
            .optional()?
    };
    let order = match order {
        Some(order) => order,
        None => return Ok(None),
    };
    let lines = {
        use crate::schema::order_lines::dsl::*;
        order_lines
            .filter(order_id.eq(req_order_id))
            .order(id.asc())
            .load::<OrderLine>(conn)?
    };
    Ok(Some((order, lines)))
}

pub fn load_withdrawal(
    conn: &mut PgConnection,
    req_id: i64,
) -> Result<Option<WithdrawalRequest>, Error> {
    use crate::schema::withdrawal_requests::dsl::*;
    withdrawal_requests
        .filter(id.eq(req_id))
        .first::<WithdrawalRequest>(conn)
        .optional()
}

/// Withdrawal history for a photographer, newest first.
pub fn list_withdrawals(
    conn: &mut PgConnection,
    req_photographer: &str,
) -> Result<Vec<WithdrawalRequest>, Error> {
    use crate::schema::withdrawal_requests::dsl::*;
    withdrawal_requests
        .filter(photographer_id.eq(req_photographer))
        .order(requested_at.desc())
        .load::<WithdrawalRequest>(conn)
}
