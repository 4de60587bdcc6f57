use bigdecimal::BigDecimal;
use thiserror::Error;

/// Failures of the settlement core.
///
/// Three classes matter to callers: validation errors are the caller's fault
/// and never retried, database errors are transient and safe to retry because
/// every mutation is transactional, and `LedgerInconsistency` is fatal and
/// requires manual reconciliation.
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("amount must not be negative")]
    InvalidAmount,

    #[error("fee percent must be within [0, 100]")]
    InvalidPercent,

    #[error("ledger amounts must be positive")]
    NegativeAmount,

    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        available: BigDecimal,
        requested: BigDecimal,
    },

    #[error("illegal withdrawal transition from {from} via {attempted}")]
    InvalidStateTransition { from: String, attempted: String },

    #[error("withdrawal amount is below the minimum of {minimum}")]
    BelowMinimum { minimum: BigDecimal },

    #[error("a pix key is required to request a withdrawal")]
    MissingPixKey,

    #[error("order must contain at least one line")]
    EmptyOrder,

    #[error("order {0} not found")]
    OrderNotFound(i64),

    #[error("withdrawal request {0} not found")]
    WithdrawalNotFound(i64),

    #[error("ledger inconsistency for photographer {photographer_id}: {detail}")]
    LedgerInconsistency {
        photographer_id: String,
        detail: String,
    },

    #[error("corrupt {0} record {1}: unrecognized status")]
    CorruptRecord(&'static str, i64),

    #[error(transparent)]
    Database(#[from] diesel::result::Error),
}

impl SettlementError {
    /// Transient failures the webhook layer should surface as retryable so
    /// the provider redelivers.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SettlementError::Database(_))
    }

    /// Internal-consistency violations. These indicate a prior bug, not bad
    /// input; the mutating transaction has been rolled back and the case
    /// needs manual reconciliation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SettlementError::LedgerInconsistency { .. } | SettlementError::CorruptRecord(..)
        )
    }
}
