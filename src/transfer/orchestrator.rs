//! Transfer Orchestrator
//!
//! The only writer of account balances. Every operation runs as one storage
//! transaction:
//!
//! 1. lock the involved accounts in canonical order ([`lock_order`])
//! 2. re-read balances under the locks and apply the business rules
//! 3. stage the new balances and the transaction record
//! 4. commit
//!
//! A storage conflict (serialization failure, deadlock victim, reference
//! collision) reruns the whole transaction from step 1 with fresh reads, up to
//! `max_attempts` times. The per-request deadline bounds steps 1-3; once
//! commit is issued it is awaited to completion so a timeout can never report
//! failure for a transfer that actually committed.
//!
//! Cache invalidation and notifications happen only after commit and can
//! never undo it.

use rand::Rng;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::error::TransferError;
use super::notifier::{NotificationEvent, NotificationKind, Notifier};
use super::types::{EntryRequest, TransferRequest};
use crate::cache::LedgerCache;
use crate::config::TransferConfig;
use crate::ledger::models::AMOUNT_SCALE;
use crate::ledger::{
    Account, AccountId, LedgerStore, LedgerTx, StoreError, TransactionId, TransactionRecord,
    TransactionStatus, TransactionType, UserId, lock_order,
};

/// Largest value a `NUMERIC(20, 4)` balance can hold
fn max_balance() -> Decimal {
    Decimal::from_i128_with_scale(99_999_999_999_999_999_999, AMOUNT_SCALE)
}

fn validate_amount(amount: Decimal) -> Result<(), TransferError> {
    if amount <= Decimal::ZERO {
        return Err(TransferError::InvalidAmount);
    }
    if amount.normalize().scale() > AMOUNT_SCALE {
        return Err(TransferError::PrecisionOverflow);
    }
    if amount > max_balance() {
        return Err(TransferError::AmountTooLarge);
    }
    Ok(())
}

enum LedgerOp<'a> {
    Transfer(&'a TransferRequest),
    Deposit(&'a EntryRequest),
    Withdraw(&'a EntryRequest),
    Reverse(TransactionId),
}

impl LedgerOp<'_> {
    fn name(&self) -> &'static str {
        match self {
            LedgerOp::Transfer(_) => "transfer",
            LedgerOp::Deposit(_) => "deposit",
            LedgerOp::Withdraw(_) => "withdraw",
            LedgerOp::Reverse(_) => "reverse",
        }
    }

    fn deadline(&self) -> Option<Duration> {
        match self {
            LedgerOp::Transfer(request) => request.deadline,
            LedgerOp::Deposit(request) | LedgerOp::Withdraw(request) => request.deadline,
            LedgerOp::Reverse(_) => None,
        }
    }
}

/// Everything an attempt produced, handed to the post-commit phase
struct Staged {
    record: TransactionRecord,
    touched: Vec<AccountId>,
    notices: Vec<(UserId, NotificationEvent)>,
}

enum AttemptError {
    Rejected(TransferError),
    Store(StoreError),
    DeadlineExceeded,
}

impl From<TransferError> for AttemptError {
    fn from(e: TransferError) -> Self {
        AttemptError::Rejected(e)
    }
}

impl From<StoreError> for AttemptError {
    fn from(e: StoreError) -> Self {
        AttemptError::Store(e)
    }
}

pub struct TransferOrchestrator {
    store: Arc<dyn LedgerStore>,
    cache: LedgerCache,
    notifier: Arc<dyn Notifier>,
    config: TransferConfig,
}

impl TransferOrchestrator {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        cache: LedgerCache,
        notifier: Arc<dyn Notifier>,
        config: TransferConfig,
    ) -> Self {
        Self {
            store,
            cache,
            notifier,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Move `amount` from one account to another atomically
    pub async fn transfer(&self, request: TransferRequest) -> Result<TransactionRecord, TransferError> {
        if request.from_account_id == request.to_account_id {
            return Err(TransferError::SameAccount);
        }
        validate_amount(request.amount)?;
        self.execute(LedgerOp::Transfer(&request)).await
    }

    pub async fn deposit(&self, request: EntryRequest) -> Result<TransactionRecord, TransferError> {
        validate_amount(request.amount)?;
        self.execute(LedgerOp::Deposit(&request)).await
    }

    pub async fn withdraw(&self, request: EntryRequest) -> Result<TransactionRecord, TransferError> {
        validate_amount(request.amount)?;
        self.execute(LedgerOp::Withdraw(&request)).await
    }

    /// Undo a completed transfer. Returns the compensating record.
    pub async fn reverse(&self, transaction_id: TransactionId) -> Result<TransactionRecord, TransferError> {
        self.execute(LedgerOp::Reverse(transaction_id)).await
    }

    async fn execute(&self, op: LedgerOp<'_>) -> Result<TransactionRecord, TransferError> {
        let budget = op.deadline().unwrap_or_else(|| self.config.deadline());
        let deadline = Instant::now() + budget;
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt: u32 = 1;

        loop {
            match self.attempt(&op, deadline).await {
                Ok(staged) => {
                    info!(
                        op = op.name(),
                        transaction_id = %staged.record.id,
                        reference = %staged.record.reference,
                        amount = %staged.record.amount,
                        attempt,
                        "Ledger operation committed"
                    );
                    let record = staged.record.clone();
                    self.after_commit(staged).await;
                    return Ok(record);
                }
                Err(AttemptError::Rejected(e)) => {
                    debug!(op = op.name(), error = %e, "Ledger operation rejected");
                    return Err(e);
                }
                Err(AttemptError::DeadlineExceeded) => {
                    warn!(op = op.name(), attempt, "Deadline exceeded before commit, rolled back");
                    return Err(TransferError::Transient(format!(
                        "{} did not complete within {:?}",
                        op.name(),
                        budget
                    )));
                }
                Err(AttemptError::Store(e)) if e.is_conflict() || e.is_unique_violation() => {
                    if attempt >= max_attempts {
                        warn!(op = op.name(), attempt, error = %e, "Retries exhausted");
                        return Err(TransferError::Transient(format!(
                            "{} gave up after {} attempts: {}",
                            op.name(),
                            attempt,
                            e
                        )));
                    }
                    let backoff = self.backoff(attempt);
                    if Instant::now() + backoff >= deadline {
                        warn!(op = op.name(), attempt, "No time left for another attempt");
                        return Err(TransferError::Transient(format!(
                            "{} hit its deadline while retrying: {}",
                            op.name(),
                            e
                        )));
                    }
                    debug!(op = op.name(), attempt, error = %e, ?backoff, "Storage conflict, retrying");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(AttemptError::Store(e)) => {
                    error!(op = op.name(), attempt, error = %e, "Ledger operation failed");
                    return Err(TransferError::DatabaseError(e.to_string()));
                }
            }
        }
    }

    async fn attempt(&self, op: &LedgerOp<'_>, deadline: Instant) -> Result<Staged, AttemptError> {
        // Dropping the timed-out future drops the transaction, which rolls it back
        let (tx, staged) = match tokio::time::timeout_at(deadline, self.begin_and_stage(op)).await {
            Ok(result) => result?,
            Err(_) => return Err(AttemptError::DeadlineExceeded),
        };
        tx.commit().await?;
        Ok(staged)
    }

    async fn begin_and_stage(
        &self,
        op: &LedgerOp<'_>,
    ) -> Result<(Box<dyn LedgerTx>, Staged), AttemptError> {
        let mut tx = self.store.begin().await?;

        let staged = match op {
            LedgerOp::Transfer(request) => stage_transfer(tx.as_mut(), request).await,
            LedgerOp::Deposit(request) => stage_deposit(tx.as_mut(), request).await,
            LedgerOp::Withdraw(request) => stage_withdraw(tx.as_mut(), request).await,
            LedgerOp::Reverse(id) => stage_reversal(tx.as_mut(), *id).await,
        };

        match staged {
            Ok(staged) => Ok((tx, staged)),
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Exponential base with full jitter in its upper half
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.retry_backoff().as_millis() as u64;
        let ceiling = base.saturating_mul(1u64 << (attempt - 1).min(6));
        let millis = rand::thread_rng().gen_range(ceiling / 2..=ceiling);
        Duration::from_millis(millis)
    }

    async fn after_commit(&self, staged: Staged) {
        self.cache.invalidate_accounts(&staged.touched).await;

        if staged.notices.is_empty() {
            return;
        }
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            for (user_id, event) in staged.notices {
                if let Err(e) = notifier.notify(user_id, &event).await {
                    warn!(
                        user_id = %user_id,
                        reference = %event.reference,
                        error = %e,
                        "Notification failed"
                    );
                }
            }
        });
    }
}

// ============================================================================
// Staging
// ============================================================================

async fn lock_existing(tx: &mut dyn LedgerTx, id: AccountId) -> Result<Account, AttemptError> {
    match tx.lock_account(id).await? {
        Some(account) => Ok(account),
        None => Err(TransferError::AccountNotFound(id).into()),
    }
}

/// Lock two accounts in canonical order; returns them in argument order
async fn lock_pair(
    tx: &mut dyn LedgerTx,
    a: AccountId,
    b: AccountId,
) -> Result<(Account, Account), AttemptError> {
    let [first, second] = lock_order(a, b);
    let first = lock_existing(tx, first).await?;
    let second = lock_existing(tx, second).await?;
    if first.id == a {
        Ok((first, second))
    } else {
        Ok((second, first))
    }
}

fn ensure_owner(account: &Account, initiator: Option<UserId>) -> Result<(), TransferError> {
    match initiator {
        Some(user_id) if user_id != account.user_id => Err(TransferError::Unauthorized),
        _ => Ok(()),
    }
}

fn ensure_active(account: &Account) -> Result<(), TransferError> {
    if account.is_active() {
        Ok(())
    } else {
        Err(TransferError::AccountNotActive(account.id))
    }
}

fn credit(balance: Decimal, amount: Decimal) -> Result<Decimal, TransferError> {
    balance
        .checked_add(amount)
        .filter(|b| *b <= max_balance())
        .ok_or(TransferError::AmountTooLarge)
}

fn debit(balance: Decimal, amount: Decimal) -> Result<Decimal, TransferError> {
    if balance < amount {
        return Err(TransferError::InsufficientBalance);
    }
    Ok(balance - amount)
}

async fn stage_transfer(
    tx: &mut dyn LedgerTx,
    request: &TransferRequest,
) -> Result<Staged, AttemptError> {
    let (from, to) = lock_pair(tx, request.from_account_id, request.to_account_id).await?;

    ensure_owner(&from, request.initiator)?;
    ensure_active(&from)?;
    ensure_active(&to)?;
    if from.currency != to.currency {
        return Err(TransferError::CurrencyMismatch {
            from: from.currency,
            to: to.currency,
        }
        .into());
    }

    let from_balance = debit(from.balance, request.amount)?;
    let to_balance = credit(to.balance, request.amount)?;
    tx.set_balance(from.id, from_balance).await?;
    tx.set_balance(to.id, to_balance).await?;

    let record = TransactionRecord::completed(
        TransactionType::Transfer,
        Some(from.id),
        Some(to.id),
        request.amount,
        &from.currency,
        request.description.clone(),
    );
    tx.insert_transaction(&record).await?;

    let notices = vec![
        (
            from.user_id,
            NotificationEvent::for_record(NotificationKind::TransferSent, from.id, &record),
        ),
        (
            to.user_id,
            NotificationEvent::for_record(NotificationKind::TransferReceived, to.id, &record),
        ),
    ];
    Ok(Staged {
        record,
        touched: vec![from.id, to.id],
        notices,
    })
}

async fn stage_deposit(tx: &mut dyn LedgerTx, request: &EntryRequest) -> Result<Staged, AttemptError> {
    let account = lock_existing(tx, request.account_id).await?;
    ensure_owner(&account, request.initiator)?;
    ensure_active(&account)?;

    let balance = credit(account.balance, request.amount)?;
    tx.set_balance(account.id, balance).await?;

    let record = TransactionRecord::completed(
        TransactionType::Deposit,
        None,
        Some(account.id),
        request.amount,
        &account.currency,
        request.description.clone(),
    );
    tx.insert_transaction(&record).await?;

    let notice = NotificationEvent::for_record(NotificationKind::Deposit, account.id, &record);
    Ok(Staged {
        record,
        touched: vec![account.id],
        notices: vec![(account.user_id, notice)],
    })
}

async fn stage_withdraw(tx: &mut dyn LedgerTx, request: &EntryRequest) -> Result<Staged, AttemptError> {
    let account = lock_existing(tx, request.account_id).await?;
    ensure_owner(&account, request.initiator)?;
    ensure_active(&account)?;

    let balance = debit(account.balance, request.amount)?;
    tx.set_balance(account.id, balance).await?;

    let record = TransactionRecord::completed(
        TransactionType::Withdrawal,
        Some(account.id),
        None,
        request.amount,
        &account.currency,
        request.description.clone(),
    );
    tx.insert_transaction(&record).await?;

    let notice = NotificationEvent::for_record(NotificationKind::Withdrawal, account.id, &record);
    Ok(Staged {
        record,
        touched: vec![account.id],
        notices: vec![(account.user_id, notice)],
    })
}

async fn stage_reversal(tx: &mut dyn LedgerTx, id: TransactionId) -> Result<Staged, AttemptError> {
    let original = match tx.lock_transaction(id).await? {
        Some(record) => record,
        None => return Err(TransferError::TransactionNotFound(id).into()),
    };

    let is_reversal = original
        .metadata
        .as_ref()
        .is_some_and(|m| m.get("reverses").is_some());
    if original.tx_type != TransactionType::Transfer
        || is_reversal
        || !original.status.can_transition_to(TransactionStatus::Reversed)
    {
        return Err(TransferError::InvalidStateTransition(format!(
            "{} {} {} cannot be reversed",
            original.status, original.tx_type, original.reference
        ))
        .into());
    }
    let (Some(source_id), Some(dest_id)) = (original.from_account_id, original.to_account_id) else {
        return Err(TransferError::InvalidStateTransition(format!(
            "{} is missing a leg",
            original.reference
        ))
        .into());
    };

    // Funds flow back: the original destination pays the original source
    let (source, dest) = lock_pair(tx, source_id, dest_id).await?;
    let dest_balance = debit(dest.balance, original.amount)?;
    let source_balance = credit(source.balance, original.amount)?;
    tx.set_balance(dest.id, dest_balance).await?;
    tx.set_balance(source.id, source_balance).await?;

    let mut record = TransactionRecord::completed(
        TransactionType::Transfer,
        Some(dest.id),
        Some(source.id),
        original.amount,
        &original.currency,
        Some(format!("Reversal of {}", original.reference)),
    );
    record.metadata = Some(serde_json::json!({
        "reverses": original.id,
        "original_reference": original.reference,
    }));
    tx.insert_transaction(&record).await?;
    tx.set_transaction_status(original.id, TransactionStatus::Completed, TransactionStatus::Reversed)
        .await?;

    let notices = vec![
        (
            dest.user_id,
            NotificationEvent::for_record(NotificationKind::ReversalDebited, dest.id, &record),
        ),
        (
            source.user_id,
            NotificationEvent::for_record(NotificationKind::ReversalCredited, source.id, &record),
        ),
    ];
    Ok(Staged {
        record,
        touched: vec![source.id, dest.id],
        notices,
    })
}
