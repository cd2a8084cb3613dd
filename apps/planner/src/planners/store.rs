use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::Identity;
use crate::db::PlannerDb;
use crate::planners::types::{PlanSections, PlannerRecord};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum PlannerStoreError {
    #[error("planner store error: {0}")]
    Db(String),
}

/// Durable home of generated plans. Append-only: records are inserted once
/// and never mutated; history management lives elsewhere.
#[async_trait]
pub trait PlannerStore: Send + Sync {
    /// Insert exactly one new record; id and timestamp are store-assigned.
    async fn insert(
        &self,
        identity: &Identity,
        inputs: Value,
        outputs: PlanSections,
    ) -> Result<PlannerRecord, PlannerStoreError>;

    async fn get(&self, id: &str) -> Result<Option<PlannerRecord>, PlannerStoreError>;
}

pub fn memory() -> Arc<MemoryPlannerStore> {
    Arc::new(MemoryPlannerStore::default())
}

pub fn postgres(db: Arc<PlannerDb>) -> Arc<dyn PlannerStore> {
    Arc::new(PostgresPlannerStore { db })
}

#[derive(Default)]
pub struct MemoryPlannerStore {
    records: Mutex<HashMap<String, PlannerRecord>>,
}

impl MemoryPlannerStore {
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl PlannerStore for MemoryPlannerStore {
    async fn insert(
        &self,
        identity: &Identity,
        inputs: Value,
        outputs: PlanSections,
    ) -> Result<PlannerRecord, PlannerStoreError> {
        let record = PlannerRecord {
            id: Uuid::now_v7().to_string(),
            identity: identity.as_str().to_string(),
            created_at: Utc::now(),
            inputs,
            outputs,
        };
        let mut records = self.records.lock().await;
        records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<PlannerRecord>, PlannerStoreError> {
        let records = self.records.lock().await;
        Ok(records.get(id).cloned())
    }
}

struct PostgresPlannerStore {
    db: Arc<PlannerDb>,
}

#[async_trait]
impl PlannerStore for PostgresPlannerStore {
    async fn insert(
        &self,
        identity: &Identity,
        inputs: Value,
        outputs: PlanSections,
    ) -> Result<PlannerRecord, PlannerStoreError> {
        let id = Uuid::now_v7().to_string();
        let created_at = Utc::now();
        let outputs_json = serde_json::to_value(&outputs)
            .map_err(|error| PlannerStoreError::Db(error.to_string()))?;

        let client = self.db.client();
        let client = client.lock().await;
        client
            .execute(
                r#"
                INSERT INTO planner.planners_history (
                    id, user_id, user_inputs, ai_outputs, created_at
                ) VALUES ($1,$2,$3,$4,$5)
                "#,
                &[
                    &id,
                    &identity.as_str(),
                    &inputs,
                    &outputs_json,
                    &created_at,
                ],
            )
            .await
            .map_err(|error| PlannerStoreError::Db(error.to_string()))?;

        Ok(PlannerRecord {
            id,
            identity: identity.as_str().to_string(),
            created_at,
            inputs,
            outputs,
        })
    }

    async fn get(&self, id: &str) -> Result<Option<PlannerRecord>, PlannerStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let row = client
            .query_opt(
                r#"
                SELECT id, user_id, user_inputs, ai_outputs, created_at
                  FROM planner.planners_history
                 WHERE id = $1
                "#,
                &[&id],
            )
            .await
            .map_err(|error| PlannerStoreError::Db(error.to_string()))?;
        row.as_ref().map(map_record_row).transpose()
    }
}

fn map_record_row(row: &tokio_postgres::Row) -> Result<PlannerRecord, PlannerStoreError> {
    let outputs_json: Value = row
        .try_get("ai_outputs")
        .map_err(|error| PlannerStoreError::Db(error.to_string()))?;
    let outputs: PlanSections = serde_json::from_value(outputs_json)
        .map_err(|error| PlannerStoreError::Db(error.to_string()))?;
    Ok(PlannerRecord {
        id: row
            .try_get("id")
            .map_err(|error| PlannerStoreError::Db(error.to_string()))?,
        identity: row
            .try_get("user_id")
            .map_err(|error| PlannerStoreError::Db(error.to_string()))?,
        created_at: row
            .try_get("created_at")
            .map_err(|error| PlannerStoreError::Db(error.to_string()))?,
        inputs: row
            .try_get("user_inputs")
            .map_err(|error| PlannerStoreError::Db(error.to_string()))?,
        outputs,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::auth::Identity;
    use crate::planners::types::PlanSections;

    use super::{PlannerStore, memory};

    #[tokio::test]
    async fn insert_assigns_an_id_and_round_trips_through_get() {
        let store = memory();
        let identity = Identity::new("user-1");
        let inputs = json!({"idade": 30, "objetivoPrincipal": "bulk_extremo"});
        let outputs = PlanSections {
            visao_geral: Some("plan".to_string()),
            ..PlanSections::default()
        };

        let record = store
            .insert(&identity, inputs.clone(), outputs.clone())
            .await
            .unwrap();
        assert!(!record.id.is_empty());
        assert_eq!(record.identity, "user-1");
        assert_eq!(record.inputs, inputs);

        let fetched = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(fetched, record);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn get_returns_none_for_an_unknown_id() {
        let store = memory();
        assert_eq!(store.get("missing").await.unwrap(), None);
    }
}
