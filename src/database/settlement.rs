//! Exactly-once order settlement driven by normalized provider events.
//!
//! The whole of [`handle_event`] runs in one transaction: the payment-event
//! insert is the idempotency boundary, the order row lock serializes racing
//! deliveries for the same order, and any failure before commit rolls the
//! attempt back completely so the provider's redelivery starts fresh.

use bigdecimal::{BigDecimal, Signed};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::{Connection, ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};
use tracing::info;

use crate::commission;
use crate::database::ledger;
use crate::database::models::{LedgerEntry, LedgerKind, NewPaymentEvent, Order, OrderLine, OrderStatus};
use crate::error::SettlementError;
use crate::events::{NormalizedEvent, PaymentOutcome};

#[derive(Debug, PartialEq)]
pub struct CreditedLine {
    pub photographer_id: String,
    pub amount: BigDecimal,
}

#[derive(Debug, PartialEq)]
pub enum SettlementOutcome {
    /// The order settled as PAID and the photographers were credited.
    Settled {
        order_id: i64,
        buyer_id: String,
        credits: Vec<CreditedLine>,
    },
    /// The order was closed without payment; no ledger effect.
    OrderClosed {
        order_id: i64,
        status: OrderStatus,
    },
    /// A refund or chargeback took back the credits of a paid order.
    Reversed {
        order_id: i64,
        reversed_lines: usize,
    },
    /// A duplicate delivery, or an order some earlier delivery already
    /// settled. A successful no-op, not an error.
    AlreadyProcessed,
}

pub fn handle_event(
    conn: &mut PgConnection,
    fee_percent: &BigDecimal,
    event: &NormalizedEvent,
) -> Result<SettlementOutcome, SettlementError> {
    conn.transaction::<_, SettlementError, _>(|conn| {
        // a given (provider, event id) settles at most once
        let inserted = {
            use crate::schema::payment_events::dsl::*;
            let new_event = NewPaymentEvent {
                provider: event.provider.as_str().to_string(),
                event_id: event.event_id.clone(),
                order_id: event.order_ref,
                received_at: chrono::Utc::now().naive_utc(),
            };
            diesel::insert_into(payment_events)
                .values(&new_event)
                .on_conflict((provider, event_id))
                .do_nothing()
                .execute(conn)
        };
        let inserted = match inserted {
            Ok(count) => count,
            Err(DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _)) => {
                return Err(SettlementError::OrderNotFound(event.order_ref));
            }
            Err(e) => return Err(e.into()),
        };
        if inserted == 0 {
            info!(
                "event {} from {} already processed",
                event.event_id,
                event.provider.as_str()
            );
            return Ok(SettlementOutcome::AlreadyProcessed);
        }

        // racing deliveries for the same order serialize here
        let order = {
            use crate::schema::orders::dsl::*;
            orders
                .filter(id.eq(event.order_ref))
                .for_update()
                .first::<Order>(conn)
                .optional()?
        }
        .ok_or(SettlementError::OrderNotFound(event.order_ref))?;
        let order_status = order
            .parsed_status()
            .ok_or(SettlementError::CorruptRecord("orders", order.id))?;

        let outcome = match (order_status, event.outcome) {
            (OrderStatus::Pending, PaymentOutcome::Paid) => {
                settle_paid(conn, fee_percent, &order, event)?
            }
            (OrderStatus::Pending, PaymentOutcome::Failed) => {
                close_order(conn, &order, OrderStatus::Failed)?
            }
            (OrderStatus::Pending, PaymentOutcome::Cancelled) => {
                close_order(conn, &order, OrderStatus::Cancelled)?
            }
            (OrderStatus::Paid, PaymentOutcome::Refunded) => reverse_paid(conn, &order)?,
            // settled by an earlier delivery; acknowledge without touching
            // the ledger
            _ => SettlementOutcome::AlreadyProcessed,
        };

        {
            use crate::schema::payment_events::dsl::*;
            diesel::update(
                payment_events
                    .filter(provider.eq(event.provider.as_str()))
                    .filter(event_id.eq(event.event_id.as_str())),
            )
            .set(processed_at.eq(chrono::Utc::now().naive_utc()))
            .execute(conn)?;
        }

        Ok(outcome)
    })
}

fn load_lines(conn: &mut PgConnection, req_order_id: i64) -> Result<Vec<OrderLine>, SettlementError> {
    use crate::schema::order_lines::dsl::*;
    order_lines
        .filter(order_id.eq(req_order_id))
        .load::<OrderLine>(conn)
        .map_err(Into::into)
}

fn settle_paid(
    conn: &mut PgConnection,
    fee_percent: &BigDecimal,
    order: &Order,
    event: &NormalizedEvent,
) -> Result<SettlementOutcome, SettlementError> {
    {
        use crate::schema::orders::dsl::*;
        diesel::update(orders.filter(id.eq(order.id)))
            .set((
                status.eq(OrderStatus::Paid.as_str()),
                external_payment_id.eq(event.event_id.as_str()),
            ))
            .execute(conn)?;
    }

    let lines = load_lines(conn, order.id)?;
    let mut credits = Vec::new();
    for line in &lines {
        let split = commission::split(&line.price_paid, fee_percent)?;
        if split.photographer_amount.is_positive() {
            ledger::credit(
                conn,
                &line.photographer_id,
                &split.photographer_amount,
                order.id,
                &format!("Photo sale: {}", line.photo_id),
            )?;
            credits.push(CreditedLine {
                photographer_id: line.photographer_id.clone(),
                amount: split.photographer_amount,
            });
        }
    }

    info!(
        "order {} settled as PAID, {} lines credited",
        order.id,
        credits.len()
    );
    Ok(SettlementOutcome::Settled {
        order_id: order.id,
        buyer_id: order.buyer_id.clone(),
        credits,
    })
}

fn close_order(
    conn: &mut PgConnection,
    order: &Order,
    new_status: OrderStatus,
) -> Result<SettlementOutcome, SettlementError> {
    use crate::schema::orders::dsl::*;
    diesel::update(orders.filter(id.eq(order.id)))
        .set(status.eq(new_status.as_str()))
        .execute(conn)?;
    info!("order {} closed as {}", order.id, new_status.as_str());
    Ok(SettlementOutcome::OrderClosed {
        order_id: order.id,
        status: new_status,
    })
}

/// Takes back exactly what the original settlement credited, by replaying
/// the order's CREDIT_SALE entries rather than recomputing the split (the
/// fee percent may have changed since the sale). The order row stays PAID;
/// the ledger carries the reversal.
fn reverse_paid(conn: &mut PgConnection, order: &Order) -> Result<SettlementOutcome, SettlementError> {
    let (sale_credits, already_reversed) = {
        use crate::schema::ledger_entries::dsl::*;
        let entries: Vec<LedgerEntry> = ledger_entries
            .filter(related_order_id.eq(order.id))
            .load(conn)?;
        let reversed = entries
            .iter()
            .any(|entry| entry.kind == LedgerKind::Reversal.as_str());
        let credits: Vec<LedgerEntry> = entries
            .into_iter()
            .filter(|entry| entry.kind == LedgerKind::CreditSale.as_str())
            .collect();
        (credits, reversed)
    };
    if already_reversed {
        return Ok(SettlementOutcome::AlreadyProcessed);
    }

    for entry in &sale_credits {
        ledger::reverse(
            conn,
            &entry.photographer_id,
            &entry.amount,
            order.id,
            &format!("Refund: {}", entry.description),
        )?;
    }

    info!(
        "order {} refunded, {} credits reversed",
        order.id,
        sale_credits.len()
    );
    Ok(SettlementOutcome::Reversed {
        order_id: order.id,
        reversed_lines: sale_credits.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database;
    use crate::database::orders::{create_order, OrderLineInput};
    use crate::database::queries;
    use crate::events::PaymentProvider;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn line(photographer: &str, photo: &str, price: &str) -> OrderLineInput {
        OrderLineInput {
            photographer_id: photographer.to_string(),
            photo_id: photo.to_string(),
            price_paid: dec(price),
        }
    }

    fn paid_event(event_id: &str, order_ref: i64) -> NormalizedEvent {
        NormalizedEvent {
            provider: PaymentProvider::MercadoPago,
            event_id: event_id.to_string(),
            order_ref,
            outcome: PaymentOutcome::Paid,
        }
    }

    fn available(conn: &mut PgConnection, photographer: &str) -> BigDecimal {
        match queries::load_balance(conn, photographer).unwrap() {
            queries::PhotographerBalance::Ok(values) => values.available,
            queries::PhotographerBalance::NotFound => BigDecimal::from(0),
        }
    }

    #[test]
    fn test_paid_event_credits_commission_split() {
        dotenvy::dotenv().ok();
        let pool = database::connect::create_test_pool();

        pool.get().unwrap().test_transaction::<_, SettlementError, _>(|conn| {
            let order = create_order(conn, "buyer_1", vec![line("ph_settle", "photo_a", "29.90")])?;
            let outcome = handle_event(conn, &dec("15"), &paid_event("mp-1", order.id))?;

            match outcome {
                SettlementOutcome::Settled { credits, .. } => {
                    assert_eq!(credits.len(), 1);
                    assert_eq!(credits[0].photographer_id, "ph_settle");
                    assert_eq!(credits[0].amount, dec("25.42"));
                }
                other => panic!("unexpected outcome {other:?}"),
            }

            assert_eq!(available(conn, "ph_settle"), dec("25.42"));

            let (order, _) = queries::load_order_with_lines(conn, order.id)?.unwrap();
            assert_eq!(order.parsed_status(), Some(OrderStatus::Paid));
            assert_eq!(order.external_payment_id.as_deref(), Some("mp-1"));

            let recorded: Vec<crate::database::models::PaymentEvent> = {
                use crate::schema::payment_events::dsl::*;
                payment_events.filter(order_id.eq(order.id)).load(conn)?
            };
            assert_eq!(recorded.len(), 1);
            assert_eq!(recorded[0].provider, "MERCADOPAGO");
            assert!(recorded[0].processed_at.is_some());
            Ok(())
        });
    }

    #[test]
    fn test_duplicate_event_id_credits_once() {
        dotenvy::dotenv().ok();
        let pool = database::connect::create_test_pool();

        pool.get().unwrap().test_transaction::<_, SettlementError, _>(|conn| {
            let order = create_order(conn, "buyer_1", vec![line("ph_dup", "photo_a", "100.00")])?;
            let event = paid_event("mp-dup", order.id);

            let first = handle_event(conn, &dec("15"), &event)?;
            assert!(matches!(first, SettlementOutcome::Settled { .. }));
            assert_eq!(available(conn, "ph_dup"), dec("85.00"));

            let second = handle_event(conn, &dec("15"), &event)?;
            assert_eq!(second, SettlementOutcome::AlreadyProcessed);
            assert_eq!(available(conn, "ph_dup"), dec("85.00"));
            Ok(())
        });
    }

    #[test]
    fn test_second_delivery_with_new_event_id_hits_status_guard() {
        dotenvy::dotenv().ok();
        let pool = database::connect::create_test_pool();

        pool.get().unwrap().test_transaction::<_, SettlementError, _>(|conn| {
            let order = create_order(conn, "buyer_1", vec![line("ph_race", "photo_a", "100.00")])?;

            handle_event(conn, &dec("15"), &paid_event("mp-a", order.id))?;
            let replay = handle_event(conn, &dec("15"), &paid_event("mp-b", order.id))?;

            assert_eq!(replay, SettlementOutcome::AlreadyProcessed);
            assert_eq!(available(conn, "ph_race"), dec("85.00"));
            Ok(())
        });
    }

    #[test]
    fn test_failed_outcome_has_no_ledger_effect() {
        dotenvy::dotenv().ok();
        let pool = database::connect::create_test_pool();

        pool.get().unwrap().test_transaction::<_, SettlementError, _>(|conn| {
            let order = create_order(conn, "buyer_1", vec![line("ph_fail", "photo_a", "50.00")])?;
            let mut event = paid_event("mp-fail", order.id);
            event.outcome = PaymentOutcome::Failed;

            let outcome = handle_event(conn, &dec("15"), &event)?;
            assert_eq!(
                outcome,
                SettlementOutcome::OrderClosed {
                    order_id: order.id,
                    status: OrderStatus::Failed
                }
            );
            assert_eq!(available(conn, "ph_fail"), dec("0"));

            let statement = queries::load_statement(conn, "ph_fail")?;
            assert!(statement.is_empty());
            Ok(())
        });
    }

    #[test]
    fn test_refund_reverses_exactly_what_was_credited() {
        dotenvy::dotenv().ok();
        let pool = database::connect::create_test_pool();

        pool.get().unwrap().test_transaction::<_, SettlementError, _>(|conn| {
            let order = create_order(
                conn,
                "buyer_1",
                vec![line("ph_ref_a", "photo_a", "29.90"), line("ph_ref_b", "photo_b", "50.00")],
            )?;
            handle_event(conn, &dec("15"), &paid_event("mp-pay", order.id))?;
            assert_eq!(available(conn, "ph_ref_a"), dec("25.42"));
            assert_eq!(available(conn, "ph_ref_b"), dec("42.50"));

            let mut refund = paid_event("mp-refund", order.id);
            refund.outcome = PaymentOutcome::Refunded;
            let outcome = handle_event(conn, &dec("15"), &refund)?;
            assert_eq!(
                outcome,
                SettlementOutcome::Reversed {
                    order_id: order.id,
                    reversed_lines: 2
                }
            );
            assert_eq!(available(conn, "ph_ref_a"), dec("0.00"));
            assert_eq!(available(conn, "ph_ref_b"), dec("0.00"));

            // the order stays PAID; the ledger carries the reversal
            let (order_row, _) = queries::load_order_with_lines(conn, order.id)?.unwrap();
            assert_eq!(order_row.parsed_status(), Some(OrderStatus::Paid));

            let audit = queries::audit_balance(conn, "ph_ref_a")?;
            assert!(audit.consistent);

            // a second refund notification must be a no-op
            let mut second = paid_event("mp-refund-2", order.id);
            second.outcome = PaymentOutcome::Refunded;
            let outcome = handle_event(conn, &dec("15"), &second)?;
            assert_eq!(outcome, SettlementOutcome::AlreadyProcessed);
            assert_eq!(available(conn, "ph_ref_a"), dec("0.00"));
            Ok(())
        });
    }

    #[test]
    fn test_refund_before_payment_is_a_no_op() {
        dotenvy::dotenv().ok();
        let pool = database::connect::create_test_pool();

        pool.get().unwrap().test_transaction::<_, SettlementError, _>(|conn| {
            let order = create_order(conn, "buyer_1", vec![line("ph_early", "photo_a", "10.00")])?;
            let mut refund = paid_event("mp-early", order.id);
            refund.outcome = PaymentOutcome::Refunded;

            let outcome = handle_event(conn, &dec("15"), &refund)?;
            assert_eq!(outcome, SettlementOutcome::AlreadyProcessed);
            assert_eq!(available(conn, "ph_early"), dec("0"));
            Ok(())
        });
    }

    #[test]
    fn test_unknown_order_is_reported() {
        dotenvy::dotenv().ok();
        let pool = database::connect::create_test_pool();

        pool.get().unwrap().test_transaction::<_, SettlementError, _>(|conn| {
            let result = handle_event(conn, &dec("15"), &paid_event("mp-ghost", 424242));
            assert!(matches!(result, Err(SettlementError::OrderNotFound(424242))));
            Ok(())
        });
    }

    #[test]
    fn test_zero_priced_line_settles_without_credit() {
        dotenvy::dotenv().ok();
        let pool = database::connect::create_test_pool();

        pool.get().unwrap().test_transaction::<_, SettlementError, _>(|conn| {
            let order = create_order(conn, "buyer_1", vec![line("ph_free", "photo_a", "0.00")])?;
            let outcome = handle_event(conn, &dec("15"), &paid_event("mp-free", order.id))?;
            match outcome {
                SettlementOutcome::Settled { credits, .. } => assert!(credits.is_empty()),
                other => panic!("unexpected outcome {other:?}"),
            }
            assert!(queries::load_statement(conn, "ph_free")?.is_empty());
            Ok(())
        });
    }
}
