//! Transaction history reads
//!
//! Read-only; sees committed records only. Callers may read a record when
//! they own at least one of its legs.

use std::sync::Arc;

use super::error::TransferError;
use crate::ledger::{
    AccountId, AccountRepository, TransactionFilter, TransactionId, TransactionRecord,
    TransactionRepository, UserId,
};

pub struct TransactionQueries {
    accounts: Arc<dyn AccountRepository>,
    transactions: Arc<dyn TransactionRepository>,
}

impl TransactionQueries {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        transactions: Arc<dyn TransactionRepository>,
    ) -> Self {
        Self {
            accounts,
            transactions,
        }
    }

    pub async fn get_transaction(
        &self,
        user_id: UserId,
        id: TransactionId,
    ) -> Result<TransactionRecord, TransferError> {
        let record = self
            .transactions
            .get_transaction(id)
            .await?
            .ok_or(TransferError::TransactionNotFound(id))?;
        self.ensure_party(user_id, &record).await?;
        Ok(record)
    }

    pub async fn get_by_reference(
        &self,
        user_id: UserId,
        reference: &str,
    ) -> Result<Option<TransactionRecord>, TransferError> {
        let Some(record) = self.transactions.get_by_reference(reference).await? else {
            return Ok(None);
        };
        self.ensure_party(user_id, &record).await?;
        Ok(Some(record))
    }

    /// History of one of the caller's accounts, newest first
    pub async fn list_by_account(
        &self,
        user_id: UserId,
        account_id: AccountId,
        filter: TransactionFilter,
    ) -> Result<Vec<TransactionRecord>, TransferError> {
        let account = self
            .accounts
            .get_by_id(account_id)
            .await?
            .ok_or(TransferError::AccountNotFound(account_id))?;
        if account.user_id != user_id {
            return Err(TransferError::Unauthorized);
        }
        Ok(self.transactions.list_by_account(account_id, filter).await?)
    }

    async fn ensure_party(&self, user_id: UserId, record: &TransactionRecord) -> Result<(), TransferError> {
        for leg in [record.from_account_id, record.to_account_id].into_iter().flatten() {
            // Ownership never changes, so a cached copy is good enough here
            if let Some(account) = self.accounts.get_by_id(leg).await? {
                if account.user_id == user_id {
                    return Ok(());
                }
            }
        }
        Err(TransferError::Unauthorized)
    }
}
