//! Post-commit notification dispatch. Fire-and-forget: implementations log
//! their own failures and must never affect settled financial state.

use bigdecimal::BigDecimal;
use tracing::info;

use crate::database::models::WithdrawalStatus;
use crate::database::settlement::SettlementOutcome;

pub trait Notifier: Send + Sync {
    fn order_paid(&self, order_id: i64, buyer_id: &str);
    fn photographer_credited(&self, photographer_id: &str, amount: &BigDecimal, order_id: i64);
    fn withdrawal_resolved(&self, withdrawal_id: i64, photographer_id: &str, status: WithdrawalStatus);
}

/// Fans a settlement outcome out to the interested parties. Called only
/// after the settlement transaction has committed.
pub fn notify_settlement(notifier: &dyn Notifier, outcome: &SettlementOutcome) {
    if let SettlementOutcome::Settled {
        order_id,
        buyer_id,
        credits,
    } = outcome
    {
        notifier.order_paid(*order_id, buyer_id);
        for credit in credits {
            notifier.photographer_credited(&credit.photographer_id, &credit.amount, *order_id);
        }
    }
}

/// Default sink: structured log lines. The original system pushed e-mails
/// and in-app notifications here; those rails live outside this service.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn order_paid(&self, order_id: i64, buyer_id: &str) {
        info!("notify buyer {buyer_id}: order {order_id} paid");
    }

    fn photographer_credited(&self, photographer_id: &str, amount: &BigDecimal, order_id: i64) {
        info!("notify photographer {photographer_id}: credited {amount} for order {order_id}");
    }

    fn withdrawal_resolved(&self, withdrawal_id: i64, photographer_id: &str, status: WithdrawalStatus) {
        info!(
            "notify photographer {photographer_id}: withdrawal {withdrawal_id} {}",
            status.as_str()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::settlement::CreditedLine;
    use std::str::FromStr;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn order_paid(&self, order_id: i64, buyer_id: &str) {
            self.messages.lock().unwrap().push(format!("paid:{order_id}:{buyer_id}"));
        }

        fn photographer_credited(&self, photographer_id: &str, amount: &BigDecimal, order_id: i64) {
            self.messages
                .lock()
                .unwrap()
                .push(format!("credit:{photographer_id}:{amount}:{order_id}"));
        }

        fn withdrawal_resolved(&self, _: i64, _: &str, _: WithdrawalStatus) {}
    }

    #[test]
    fn test_settled_outcome_notifies_buyer_and_photographers() {
        let notifier = RecordingNotifier::default();
        let outcome = SettlementOutcome::Settled {
            order_id: 7,
            buyer_id: "buyer_1".to_string(),
            credits: vec![CreditedLine {
                photographer_id: "ph_1".to_string(),
                amount: BigDecimal::from_str("25.42").unwrap(),
            }],
        };
        notify_settlement(&notifier, &outcome);
        let messages = notifier.messages.lock().unwrap();
        assert_eq!(
            *messages,
            vec!["paid:7:buyer_1".to_string(), "credit:ph_1:25.42:7".to_string()]
        );
    }

    #[test]
    fn test_no_op_outcomes_stay_silent() {
        let notifier = RecordingNotifier::default();
        notify_settlement(&notifier, &SettlementOutcome::AlreadyProcessed);
        assert!(notifier.messages.lock().unwrap().is_empty());
    }
}
