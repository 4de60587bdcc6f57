use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use diesel::prelude::*;

/// Order lifecycle. PENDING is the only state that settles; PAID is terminal
/// and immutable once set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Option<OrderStatus> {
        match value {
            "PENDING" => Some(OrderStatus::Pending),
            "PAID" => Some(OrderStatus::Paid),
            "FAILED" => Some(OrderStatus::Failed),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

/// Kinds of append-only ledger entries. Amounts are signed: credits are
/// positive, withdrawal debits and reversals negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerKind {
    CreditSale,
    DebitWithdrawal,
    Reversal,
}

impl LedgerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerKind::CreditSale => "CREDIT_SALE",
            LedgerKind::DebitWithdrawal => "DEBIT_WITHDRAWAL",
            LedgerKind::Reversal => "REVERSAL",
        }
    }
}

/// Withdrawal request lifecycle, in the domain language of the marketplace.
/// PAGO and REJEITADO are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawalStatus {
    Pendente,
    Aprovado,
    Pago,
    Rejeitado,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pendente => "PENDENTE",
            WithdrawalStatus::Aprovado => "APROVADO",
            WithdrawalStatus::Pago => "PAGO",
            WithdrawalStatus::Rejeitado => "REJEITADO",
        }
    }

    pub fn parse(value: &str) -> Option<WithdrawalStatus> {
        match value {
            "PENDENTE" => Some(WithdrawalStatus::Pendente),
            "APROVADO" => Some(WithdrawalStatus::Aprovado),
            "PAGO" => Some(WithdrawalStatus::Pago),
            "REJEITADO" => Some(WithdrawalStatus::Rejeitado),
            _ => None,
        }
    }

    /// The only legal forward transitions. Everything else is rejected
    /// before any ledger mutation happens.
    pub fn can_transition_to(self, next: WithdrawalStatus) -> bool {
        matches!(
            (self, next),
            (WithdrawalStatus::Pendente, WithdrawalStatus::Aprovado)
                | (WithdrawalStatus::Pendente, WithdrawalStatus::Rejeitado)
                | (WithdrawalStatus::Aprovado, WithdrawalStatus::Pago)
                | (WithdrawalStatus::Aprovado, WithdrawalStatus::Rejeitado)
        )
    }
}

#[derive(Debug, Queryable)]
pub struct Order {
    pub id: i64,
    pub buyer_id: String,
    pub status: String,
    pub total: BigDecimal,
    pub external_payment_id: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Order {
    pub fn parsed_status(&self) -> Option<OrderStatus> {
        OrderStatus::parse(&self.status)
    }
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct NewOrder {
    pub id: i64,
    pub buyer_id: String,
    pub status: String,
    pub total: BigDecimal,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Queryable)]
pub struct OrderLine {
    pub id: i64,
    pub order_id: i64,
    pub photographer_id: String,
    pub photo_id: String,
    pub price_paid: BigDecimal,
    pub download_token: String,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::order_lines)]
pub struct NewOrderLine {
    pub id: i64,
    pub order_id: i64,
    pub photographer_id: String,
    pub photo_id: String,
    pub price_paid: BigDecimal,
    pub download_token: String,
}

#[derive(Debug, Queryable)]
pub struct PaymentEvent {
    pub provider: String,
    pub event_id: String,
    pub order_id: i64,
    pub received_at: NaiveDateTime,
    pub processed_at: Option<NaiveDateTime>,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::payment_events)]
pub struct NewPaymentEvent {
    pub provider: String,
    pub event_id: String,
    pub order_id: i64,
    pub received_at: NaiveDateTime,
}

#[derive(Debug, Queryable)]
pub struct LedgerEntry {
    pub id: i64,
    pub photographer_id: String,
    pub kind: String,
    pub amount: BigDecimal,
    pub description: String,
    pub related_order_id: Option<i64>,
    pub related_withdrawal_id: Option<i64>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::ledger_entries)]
pub struct NewLedgerEntry {
    pub id: i64,
    pub photographer_id: String,
    pub kind: String,
    pub amount: BigDecimal,
    pub description: String,
    pub related_order_id: Option<i64>,
    pub related_withdrawal_id: Option<i64>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Queryable)]
pub struct Balance {
    pub photographer_id: String,
    pub available: BigDecimal,
    pub held: BigDecimal,
}

#[derive(Debug, Queryable)]
pub struct WithdrawalRequest {
    pub id: i64,
    pub photographer_id: String,
    pub amount: BigDecimal,
    pub status: String,
    pub pix_key: String,
    pub note: Option<String>,
    pub requested_at: NaiveDateTime,
    pub resolved_at: Option<NaiveDateTime>,
}

impl WithdrawalRequest {
    pub fn parsed_status(&self) -> Option<WithdrawalStatus> {
        WithdrawalStatus::parse(&self.status)
    }
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::withdrawal_requests)]
pub struct NewWithdrawalRequest {
    pub id: i64,
    pub photographer_id: String,
    pub amount: BigDecimal,
    pub status: String,
    pub pix_key: String,
    pub requested_at: NaiveDateTime,
}
