use bigdecimal::{BigDecimal, Signed};
use diesel::{ExpressionMethods, PgConnection, QueryDsl, RunQueryDsl};

use crate::commission::round_to_cents;
use crate::database::idgen;
use crate::database::models::{NewOrder, NewOrderLine, Order, OrderStatus};
use crate::error::SettlementError;

/// One photo purchase inside a new order.
pub struct OrderLineInput {
    pub photographer_id: String,
    pub photo_id: String,
    pub price_paid: BigDecimal,
}

fn new_download_token() -> String {
    format!("{:016x}{:016x}", fastrand::u64(..), fastrand::u64(..))
}

/// Creates a PENDING order with its lines. The total is computed from the
/// lines, never trusted from the caller, so `total == sum(price_paid)` holds
/// by construction. Download tokens are minted here but stay locked until
/// the order settles as PAID.
pub fn create_order(
    conn: &mut PgConnection,
    req_buyer_id: &str,
    lines: Vec<OrderLineInput>,
) -> Result<Order, SettlementError> {
    if lines.is_empty() {
        return Err(SettlementError::EmptyOrder);
    }
    for line in &lines {
        if line.price_paid.is_negative() {
            return Err(SettlementError::InvalidAmount);
        }
    }

    let new_order_id = idgen::next();
    let now = chrono::Utc::now().naive_utc();

    let new_lines: Vec<NewOrderLine> = lines
        .into_iter()
        .map(|line| NewOrderLine {
            id: idgen::next(),
            order_id: new_order_id,
            photographer_id: line.photographer_id,
            photo_id: line.photo_id,
            price_paid: round_to_cents(&line.price_paid),
            download_token: new_download_token(),
        })
        .collect();
    let order_total = new_lines
        .iter()
        .fold(BigDecimal::from(0), |acc, line| acc + &line.price_paid);

    {
        use crate::schema::orders::dsl::*;
        let new_order = NewOrder {
            id: new_order_id,
            buyer_id: req_buyer_id.to_string(),
            status: OrderStatus::Pending.as_str().to_string(),
            total: order_total,
            created_at: now,
        };
        diesel::insert_into(orders).values(&new_order).execute(conn)?;
    }
    {
        use crate::schema::order_lines::dsl::*;
        diesel::insert_into(order_lines).values(&new_lines).execute(conn)?;
    }

    use crate::schema::orders::dsl::*;
    orders
        .filter(id.eq(new_order_id))
        .first::<Order>(conn)
        .map_err(Into::into)
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

    fn line(photographer: &str, photo: &str, price: &str) -> OrderLineInput {
        OrderLineInput {
            photographer_id: photographer.to_string(),
            photo_id: photo.to_string(),
            price_paid: dec(price),
        }
    }

    #[test]
    fn test_create_order_totals_lines() {
        dotenvy::dotenv().ok();
        let pool = database::connect::create_test_pool();

        pool.get().unwrap().test_transaction::<_, SettlementError, _>(|conn| {
            let order = create_order(
                conn,
                "buyer_1",
                vec![line("ph_1", "photo_a", "29.90"), line("ph_2", "photo_b", "50.00")],
            )?;
            assert_eq!(order.total, dec("79.90"));
            assert_eq!(order.parsed_status(), Some(OrderStatus::Pending));
            assert!(order.external_payment_id.is_none());

            let (_, lines) = queries::load_order_with_lines(conn, order.id)?
                .expect("order just created");
            assert_eq!(lines.len(), 2);
            assert!(lines.iter().all(|l| l.download_token.len() == 32));
            Ok(())
        });
    }

    #[test]
    fn test_create_order_rejects_bad_input() {
        dotenvy::dotenv().ok();
        let pool = database::connect::create_test_pool();

        pool.get().unwrap().test_transaction::<_, SettlementError, _>(|conn| {
            assert!(matches!(
                create_order(conn, "buyer_1", vec![]),
                Err(SettlementError::EmptyOrder)
            ));
            assert!(matches!(
                create_order(conn, "buyer_1", vec![line("ph_1", "photo_a", "-1.00")]),
                Err(SettlementError::InvalidAmount)
            ));
            Ok(())
        });
    }
}
