//! Authoritative source of photographer funds.
//!
//! Every mutation appends a ledger entry and updates the materialized
//! balance together, under a `FOR UPDATE` lock on the photographer's balance
//! row. All functions here expect to run inside the caller's transaction;
//! reserve/release move funds between the available and held columns without
//! a ledger entry, so the entry sum always equals available + held.

use bigdecimal::{BigDecimal, Signed};
use diesel::{ExpressionMethods, PgConnection, QueryDsl, RunQueryDsl};
use tracing::info;

use crate::database::models::{Balance, LedgerKind, NewLedgerEntry};
use crate::database::idgen;
use crate::error::SettlementError;

// creates the balance row on first use, then locks it for the rest of the
// enclosing transaction
fn lock_balance(conn: &mut PgConnection, req_photographer: &str) -> Result<Balance, SettlementError> {
    use crate::schema::balances::dsl::*;
    diesel::insert_into(balances)
        .values((
            photographer_id.eq(req_photographer),
            available.eq(BigDecimal::from(0)),
            held.eq(BigDecimal::from(0)),
        ))
        .on_conflict(photographer_id)
        .do_nothing()
        .execute(conn)?;
    balances
        .filter(photographer_id.eq(req_photographer))
        .for_update()
        .first::<Balance>(conn)
        .map_err(Into::into)
}

// invariant: available >= 0 and held >= 0 after every mutation; a violation
// means a prior bug, so the transaction aborts instead of clamping
fn store_balance(
    conn: &mut PgConnection,
    req_photographer: &str,
    new_available: &BigDecimal,
    new_held: &BigDecimal,
) -> Result<(), SettlementError> {
    if new_available.is_negative() || new_held.is_negative() {
        return Err(SettlementError::LedgerInconsistency {
            photographer_id: req_photographer.to_string(),
            detail: format!("balance would become available={new_available} held={new_held}"),
        });
    }
    use crate::schema::balances::dsl::*;
    diesel::update(balances.filter(photographer_id.eq(req_photographer)))
        .set((available.eq(new_available.clone()), held.eq(new_held.clone())))
        .execute(conn)?;
    Ok(())
}

fn append_entry(
    conn: &mut PgConnection,
    req_photographer: &str,
    kind: LedgerKind,
    entry_amount: BigDecimal,
    entry_description: String,
    order: Option<i64>,
    withdrawal: Option<i64>,
) -> Result<i64, SettlementError> {
    use crate::schema::ledger_entries::dsl::ledger_entries;
    let entry = NewLedgerEntry {
        id: idgen::next(),
        photographer_id: req_photographer.to_string(),
        kind: kind.as_str().to_string(),
        amount: entry_amount,
        description: entry_description,
        related_order_id: order,
        related_withdrawal_id: withdrawal,
        created_at: chrono::Utc::now().naive_utc(),
    };
    diesel::insert_into(ledger_entries).values(&entry).execute(conn)?;
    Ok(entry.id)
}

/// Credits a photographer's share of a sale. Called only by settlement.
pub fn credit(
    conn: &mut PgConnection,
    photographer: &str,
    amount: &BigDecimal,
    order_id: i64,
    description: &str,
) -> Result<i64, SettlementError> {
    if !amount.is_positive() {
        return Err(SettlementError::NegativeAmount);
    }
    let balance = lock_balance(conn, photographer)?;
    let new_available = &balance.available + amount;
    store_balance(conn, photographer, &new_available, &balance.held)?;
    let entry_id = append_entry(
        conn,
        photographer,
        LedgerKind::CreditSale,
        amount.clone(),
        description.to_string(),
        Some(order_id),
        None,
    )?;
    info!("photographer {photographer} credited {amount} for order {order_id}");
    Ok(entry_id)
}

/// Takes back a previously credited sale amount after a refund or
/// chargeback. A reversal larger than the available balance means funds were
/// already withdrawn and the case needs manual reconciliation.
pub fn reverse(
    conn: &mut PgConnection,
    photographer: &str,
    amount: &BigDecimal,
    order_id: i64,
    description: &str,
) -> Result<i64, SettlementError> {
    if !amount.is_positive() {
        return Err(SettlementError::NegativeAmount);
    }
    let balance = lock_balance(conn, photographer)?;
    if balance.available < *amount {
        return Err(SettlementError::LedgerInconsistency {
            photographer_id: photographer.to_string(),
            detail: format!(
                "reversal of {amount} exceeds available balance {}",
                balance.available
            ),
        });
    }
    let new_available = &balance.available - amount;
    store_balance(conn, photographer, &new_available, &balance.held)?;
    append_entry(
        conn,
        photographer,
        LedgerKind::Reversal,
        -amount.clone(),
        description.to_string(),
        Some(order_id),
        None,
    )
}

/// Moves funds from available to held against a pending withdrawal.
pub fn reserve(
    conn: &mut PgConnection,
    photographer: &str,
    amount: &BigDecimal,
) -> Result<(), SettlementError> {
    if !amount.is_positive() {
        return Err(SettlementError::NegativeAmount);
    }
    let balance = lock_balance(conn, photographer)?;
    if balance.available < *amount {
        return Err(SettlementError::InsufficientFunds {
            available: balance.available,
            requested: amount.clone(),
        });
    }
    let new_available = &balance.available - amount;
    let new_held = &balance.held + amount;
    store_balance(conn, photographer, &new_available, &new_held)
}

/// Moves reserved funds back to available after a withdrawal is rejected.
pub fn release(
    conn: &mut PgConnection,
    photographer: &str,
    amount: &BigDecimal,
) -> Result<(), SettlementError> {
    if !amount.is_positive() {
        return Err(SettlementError::NegativeAmount);
    }
    let balance = lock_balance(conn, photographer)?;
    if balance.held < *amount {
        return Err(SettlementError::LedgerInconsistency {
            photographer_id: photographer.to_string(),
            detail: format!("release of {amount} exceeds held balance {}", balance.held),
        });
    }
    let new_available = &balance.available + amount;
    let new_held = &balance.held - amount;
    store_balance(conn, photographer, &new_available, &new_held)
}

/// Removes reserved funds permanently once a withdrawal is paid out.
pub fn settle(
    conn: &mut PgConnection,
    photographer: &str,
    amount: &BigDecimal,
    withdrawal_id: i64,
) -> Result<i64, SettlementError> {
    if !amount.is_positive() {
        return Err(SettlementError::NegativeAmount);
    }
    let balance = lock_balance(conn, photographer)?;
    if balance.held < *amount {
        return Err(SettlementError::LedgerInconsistency {
            photographer_id: photographer.to_string(),
            detail: format!("payout of {amount} exceeds held balance {}", balance.held),
        });
    }
    let new_held = &balance.held - amount;
    store_balance(conn, photographer, &balance.available, &new_held)?;
    append_entry(
        conn,
        photographer,
        LedgerKind::DebitWithdrawal,
        -amount.clone(),
        format!("Withdrawal {withdrawal_id} paid out"),
        None,
        Some(withdrawal_id),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database;
    use crate::database::queries;
    use diesel::Connection;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn test_credit_and_reserve_cycle() {
        dotenvy::dotenv().ok();
        let pool = database::connect::create_test_pool();
        let photographer = "ledger_cycle_photographer";

        pool.get().unwrap().test_transaction::<_, SettlementError, _>(|conn| {
            credit(conn, photographer, &dec("100.00"), 1, "Photo sale")?;
            reserve(conn, photographer, &dec("60.00"))?;

            let balance = queries::load_balance(conn, photographer)?;
            let balance = match balance {
                queries::PhotographerBalance::Ok(values) => values,
                queries::PhotographerBalance::NotFound => panic!("balance missing"),
            };
            assert_eq!(balance.available, dec("40.00"));
            assert_eq!(balance.held, dec("60.00"));

            release(conn, photographer, &dec("10.00"))?;
            settle(conn, photographer, &dec("50.00"), 77)?;

            let audit = queries::audit_balance(conn, photographer)?;
            assert!(audit.consistent);
            assert_eq!(audit.available, dec("50.00"));
            assert_eq!(audit.held, dec("0.00"));
            Ok(())
        });
    }

    #[test]
    fn test_credit_rejects_non_positive_amounts() {
        dotenvy::dotenv().ok();
        let pool = database::connect::create_test_pool();

        pool.get().unwrap().test_transaction::<_, SettlementError, _>(|conn| {
            assert!(matches!(
                credit(conn, "p", &dec("0"), 1, "x"),
                Err(SettlementError::NegativeAmount)
            ));
            assert!(matches!(
                credit(conn, "p", &dec("-5"), 1, "x"),
                Err(SettlementError::NegativeAmount)
            ));
            Ok(())
        });
    }

    #[test]
    fn test_reserve_insufficient_funds() {
        dotenvy::dotenv().ok();
        let pool = database::connect::create_test_pool();
        let photographer = "ledger_insufficient_photographer";

        pool.get().unwrap().test_transaction::<_, SettlementError, _>(|conn| {
            credit(conn, photographer, &dec("10.00"), 1, "Photo sale")?;
            let result = reserve(conn, photographer, &dec("10.01"));
            assert!(matches!(
                result,
                Err(SettlementError::InsufficientFunds { .. })
            ));

            // failed reservation must not have touched anything
            let audit = queries::audit_balance(conn, photographer)?;
            assert!(audit.consistent);
            assert_eq!(audit.available, dec("10.00"));
            Ok(())
        });
    }

    #[test]
    fn test_settle_beyond_held_is_fatal() {
        dotenvy::dotenv().ok();
        let pool = database::connect::create_test_pool();
        let photographer = "ledger_overdraw_photographer";

        pool.get().unwrap().test_transaction::<_, SettlementError, _>(|conn| {
            credit(conn, photographer, &dec("30.00"), 1, "Photo sale")?;
            reserve(conn, photographer, &dec("20.00"))?;
            let result = settle(conn, photographer, &dec("20.01"), 5);
            assert!(matches!(
                result,
                Err(SettlementError::LedgerInconsistency { .. })
            ));
            Ok(())
        });
    }

    #[test]
    fn test_reversal_exceeding_available_is_fatal() {
        dotenvy::dotenv().ok();
        let pool = database::connect::create_test_pool();
        let photographer = "ledger_reversal_photographer";

        pool.get().unwrap().test_transaction::<_, SettlementError, _>(|conn| {
            credit(conn, photographer, &dec("25.42"), 1, "Photo sale")?;
            reserve(conn, photographer, &dec("20.00"))?;
            let result = reverse(conn, photographer, &dec("25.42"), 1, "Refund");
            assert!(matches!(
                result,
                Err(SettlementError::LedgerInconsistency { .. })
            ));
            Ok(())
        });
    }

    // random credit/reserve/release/settle sequences, rejecting invalid ops,
    // must keep the balance non-negative and the entry sum consistent
    #[test]
    fn test_random_operation_sequences_keep_invariants() {
        dotenvy::dotenv().ok();
        let pool = database::connect::create_test_pool();
        let photographer = "ledger_random_photographer";
        fastrand::seed(0x5e77);

        pool.get().unwrap().test_transaction::<_, SettlementError, _>(|conn| {
            let mut expected_available = BigDecimal::from(0);
            let mut expected_held = BigDecimal::from(0);
            let mut next_order = 1i64;

            for step in 0..200 {
                let amount = BigDecimal::from(fastrand::i64(1..5000)) / BigDecimal::from(100);
                match fastrand::u8(0..4) {
                    0 => {
                        credit(conn, photographer, &amount, next_order, "Photo sale")?;
                        next_order += 1;
                        expected_available += &amount;
                    }
                    1 => match reserve(conn, photographer, &amount) {
                        Ok(()) => {
                            expected_available -= &amount;
                            expected_held += &amount;
                        }
                        Err(SettlementError::InsufficientFunds { .. }) => {
                            assert!(expected_available < amount, "step {step}");
                        }
                        Err(other) => return Err(other),
                    },
                    2 => match release(conn, photographer, &amount) {
                        Ok(()) => {
                            expected_available += &amount;
                            expected_held -= &amount;
                        }
                        Err(SettlementError::LedgerInconsistency { .. }) => {
                            assert!(expected_held < amount, "step {step}");
                        }
                        Err(other) => return Err(other),
                    },
                    _ => match settle(conn, photographer, &amount, step) {
                        Ok(_) => {
                            expected_held -= &amount;
                        }
                        Err(SettlementError::LedgerInconsistency { .. }) => {
                            assert!(expected_held < amount, "step {step}");
                        }
                        Err(other) => return Err(other),
                    },
                }

                let audit = queries::audit_balance(conn, photographer)?;
                assert!(audit.consistent, "step {step}");
                assert_eq!(audit.available, expected_available, "step {step}");
                assert_eq!(audit.held, expected_held, "step {step}");
                assert!(!audit.available.is_negative(), "step {step}");
                assert!(!audit.held.is_negative(), "step {step}");
            }
            Ok(())
        });
    }
}
