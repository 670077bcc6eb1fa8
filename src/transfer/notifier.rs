//! Post-commit notifications
//!
//! At most once, best effort. The orchestrator dispatches on a spawned task
//! after commit; a failing channel is logged and otherwise ignored.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::ledger::{AccountId, TransactionId, TransactionRecord, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TransferSent,
    TransferReceived,
    Deposit,
    Withdrawal,
    ReversalDebited,
    ReversalCredited,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub account_id: AccountId,
    pub transaction_id: TransactionId,
    pub reference: String,
    pub amount: Decimal,
    pub currency: String,
}

impl NotificationEvent {
    pub fn for_record(kind: NotificationKind, account_id: AccountId, record: &TransactionRecord) -> Self {
        Self {
            kind,
            account_id,
            transaction_id: record.id,
            reference: record.reference.clone(),
            amount: record.amount,
            currency: record.currency.clone(),
        }
    }
}

/// Out-of-band notification channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: UserId, event: &NotificationEvent) -> anyhow::Result<()>;
}

/// Writes notifications to the log; the default channel
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user_id: UserId, event: &NotificationEvent) -> anyhow::Result<()> {
        tracing::info!(
            user_id = %user_id,
            kind = ?event.kind,
            account_id = %event.account_id,
            reference = %event.reference,
            amount = %event.amount,
            currency = %event.currency,
            "Notification"
        );
        Ok(())
    }
}
