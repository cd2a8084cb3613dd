pub mod purchase;
pub mod store;

pub use purchase::{CreditPurchaseRequest, PurchaseError, PurchaseForwarder};
pub use store::{CreditError, CreditStore, DebitReceipt};

/// Best-effort refund of one debited credit after a post-debit failure.
///
/// The refund restores exactly what the matching debit took; a refund
/// failure is logged and swallowed so it cannot mask the original error.
/// That leaves the ledger inconsistent until an operator intervenes, which
/// is why the failure is logged at error level with the full context.
pub async fn refund_debit(store: &dyn CreditStore, receipt: &DebitReceipt, failed_stage: &str) {
    if let Err(error) = store.credit(&receipt.identity, 1).await {
        tracing::error!(
            identity = %receipt.identity,
            failed_stage,
            balance_before = receipt.balance_before,
            reason = %error,
            "credit refund failed; ledger left inconsistent"
        );
    } else {
        tracing::info!(
            identity = %receipt.identity,
            failed_stage,
            "debited credit refunded"
        );
    }
}
