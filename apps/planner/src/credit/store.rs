use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::auth::Identity;
use crate::db::PlannerDb;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CreditError {
    #[error("insufficient credits")]
    Insufficient,
    #[error("no credit account for identity")]
    AccountNotFound,
    #[error("credit store error: {0}")]
    Db(String),
}

/// Proof of a single one-credit decrement. Carries the pre-decrement balance
/// so the compensator can restore exactly what was taken; consumed at most
/// once.
#[derive(Debug, Clone)]
pub struct DebitReceipt {
    pub identity: Identity,
    pub balance_before: i64,
    pub debited_at: DateTime<Utc>,
}

/// Authoritative per-identity credit balance.
///
/// Accounts are provisioned by an external collaborator; this store only
/// reads and mutates balances, and a balance never goes negative.
#[async_trait]
pub trait CreditStore: Send + Sync {
    /// Decrement the balance by exactly 1 iff it is currently >= 1.
    ///
    /// The check and the write are a single storage-level operation: two
    /// concurrent debits against the same identity with balance 1 can never
    /// both succeed. In-process locking is not enough once instances run on
    /// separate machines, so the postgres impl uses a conditional UPDATE.
    async fn try_debit(&self, identity: &Identity) -> Result<DebitReceipt, CreditError>;

    /// Restore `amount` credits. Only the compensator calls this.
    async fn credit(&self, identity: &Identity, amount: i64) -> Result<(), CreditError>;

    async fn balance(&self, identity: &Identity) -> Result<i64, CreditError>;
}

pub fn memory() -> Arc<MemoryCreditStore> {
    Arc::new(MemoryCreditStore::default())
}

pub fn postgres(db: Arc<PlannerDb>) -> Arc<dyn CreditStore> {
    Arc::new(PostgresCreditStore { db })
}

#[derive(Default)]
pub struct MemoryCreditStore {
    balances: Mutex<HashMap<String, i64>>,
}

impl MemoryCreditStore {
    /// Provisioning hook for tests and local development; production
    /// accounts are created by the account-provisioning collaborator.
    pub async fn set_balance(&self, identity: &Identity, balance: i64) {
        let mut balances = self.balances.lock().await;
        balances.insert(identity.as_str().to_string(), balance);
    }
}

#[async_trait]
impl CreditStore for MemoryCreditStore {
    async fn try_debit(&self, identity: &Identity) -> Result<DebitReceipt, CreditError> {
        let mut balances = self.balances.lock().await;
        let Some(balance) = balances.get_mut(identity.as_str()) else {
            return Err(CreditError::AccountNotFound);
        };
        if *balance < 1 {
            return Err(CreditError::Insufficient);
        }
        let balance_before = *balance;
        *balance -= 1;
        Ok(DebitReceipt {
            identity: identity.clone(),
            balance_before,
            debited_at: Utc::now(),
        })
    }

    async fn credit(&self, identity: &Identity, amount: i64) -> Result<(), CreditError> {
        let mut balances = self.balances.lock().await;
        let Some(balance) = balances.get_mut(identity.as_str()) else {
            return Err(CreditError::AccountNotFound);
        };
        *balance += amount;
        Ok(())
    }

    async fn balance(&self, identity: &Identity) -> Result<i64, CreditError> {
        let balances = self.balances.lock().await;
        balances
            .get(identity.as_str())
            .copied()
            .ok_or(CreditError::AccountNotFound)
    }
}

struct PostgresCreditStore {
    db: Arc<PlannerDb>,
}

#[async_trait]
impl CreditStore for PostgresCreditStore {
    async fn try_debit(&self, identity: &Identity) -> Result<DebitReceipt, CreditError> {
        let client = self.db.client();
        let client = client.lock().await;

        // Single conditional statement: the database serializes concurrent
        // debits per row, so the balance can never be driven below zero.
        let row = client
            .query_opt(
                r#"
                UPDATE planner.credit_accounts
                   SET balance = balance - 1
                 WHERE user_id = $1 AND balance >= 1
                RETURNING balance
                "#,
                &[&identity.as_str()],
            )
            .await
            .map_err(|error| CreditError::Db(error.to_string()))?;

        if let Some(row) = row {
            let balance_after: i64 = row
                .try_get("balance")
                .map_err(|error| CreditError::Db(error.to_string()))?;
            return Ok(DebitReceipt {
                identity: identity.clone(),
                balance_before: balance_after + 1,
                debited_at: Utc::now(),
            });
        }

        // The conditional update matched nothing: distinguish an empty
        // balance from a missing account. Read-only, so no race with the
        // debit path.
        let exists = client
            .query_opt(
                "SELECT balance FROM planner.credit_accounts WHERE user_id = $1",
                &[&identity.as_str()],
            )
            .await
            .map_err(|error| CreditError::Db(error.to_string()))?;
        match exists {
            Some(_) => Err(CreditError::Insufficient),
            None => Err(CreditError::AccountNotFound),
        }
    }

    async fn credit(&self, identity: &Identity, amount: i64) -> Result<(), CreditError> {
        let client = self.db.client();
        let client = client.lock().await;
        let updated = client
            .execute(
                r#"
                UPDATE planner.credit_accounts
                   SET balance = balance + $2
                 WHERE user_id = $1
                "#,
                &[&identity.as_str(), &amount],
            )
            .await
            .map_err(|error| CreditError::Db(error.to_string()))?;
        if updated == 0 {
            return Err(CreditError::AccountNotFound);
        }
        Ok(())
    }

    async fn balance(&self, identity: &Identity) -> Result<i64, CreditError> {
        let client = self.db.client();
        let client = client.lock().await;
        let row = client
            .query_opt(
                "SELECT balance FROM planner.credit_accounts WHERE user_id = $1",
                &[&identity.as_str()],
            )
            .await
            .map_err(|error| CreditError::Db(error.to_string()))?;
        let row = row.ok_or(CreditError::AccountNotFound)?;
        row.try_get("balance")
            .map_err(|error| CreditError::Db(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use crate::auth::Identity;

    use super::{CreditError, CreditStore, memory};

    #[tokio::test]
    async fn debit_fails_without_touching_an_empty_balance() {
        let store = memory();
        let identity = Identity::new("user-1");
        store.set_balance(&identity, 0).await;

        assert_eq!(
            store.try_debit(&identity).await.unwrap_err(),
            CreditError::Insufficient
        );
        assert_eq!(store.balance(&identity).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn debit_fails_for_an_unknown_account() {
        let store = memory();
        let identity = Identity::new("ghost");
        assert_eq!(
            store.try_debit(&identity).await.unwrap_err(),
            CreditError::AccountNotFound
        );
    }

    #[tokio::test]
    async fn debit_takes_exactly_one_credit_and_reports_the_prior_balance() {
        let store = memory();
        let identity = Identity::new("user-1");
        store.set_balance(&identity, 3).await;

        let receipt = store.try_debit(&identity).await.unwrap();
        assert_eq!(receipt.balance_before, 3);
        assert_eq!(store.balance(&identity).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn credit_restores_a_debited_balance() {
        let store = memory();
        let identity = Identity::new("user-1");
        store.set_balance(&identity, 1).await;

        let _receipt = store.try_debit(&identity).await.unwrap();
        store.credit(&identity, 1).await.unwrap();
        assert_eq!(store.balance(&identity).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_debits_on_a_single_credit_admit_exactly_one_winner() {
        let store = memory();
        let identity = Identity::new("user-1");
        store.set_balance(&identity, 1).await;

        let (first, second) = tokio::join!(store.try_debit(&identity), store.try_debit(&identity));

        let outcomes = [first.is_ok(), second.is_ok()];
        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
        for result in [first, second] {
            if let Err(error) = result {
                assert_eq!(error, CreditError::Insufficient);
            }
        }
        assert_eq!(store.balance(&identity).await.unwrap(), 0);
    }
}
