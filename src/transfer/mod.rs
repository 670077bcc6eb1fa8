//! Funds Transfer
//!
//! Atomic movement of money between accounts of the same currency.
//!
//! # Transaction shape
//!
//! ```text
//! BEGIN
//!   lock min(from, to)      SELECT ... FOR UPDATE
//!   lock max(from, to)
//!   check active / owner / currency / balance
//!   debit, credit, insert record (status = completed)
//! COMMIT
//! invalidate cache -> notify (both best effort)
//! ```
//!
//! # Transaction status
//!
//! ```text
//! PENDING → COMPLETED → REVERSED
//!     ↓
//!   FAILED
//! ```
//!
//! # Safety Invariants
//!
//! 1. **No partial commit**: debit, credit and record are one storage transaction
//! 2. **Canonical lock order**: rows are locked by ascending account id, never request order
//! 3. **Fresh reads on retry**: a conflicted attempt is rerun from the first lock
//! 4. **Commit before side effects**: cache and notifications never run for a rolled back attempt

pub mod api;
pub mod error;
pub mod notifier;
pub mod orchestrator;
pub mod queries;
pub mod types;


pub use api::{TransferApiRequest, create_transfer, get_transaction, list_transactions};
pub use error::TransferError;
pub use notifier::{LogNotifier, NotificationEvent, NotificationKind, Notifier};
pub use orchestrator::TransferOrchestrator;
pub use queries::TransactionQueries;
pub use types::{EntryRequest, TransferRequest};
