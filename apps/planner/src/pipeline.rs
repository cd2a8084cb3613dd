use std::sync::Arc;

use serde_json::Value;

use crate::auth::{AuthError, Identity, IdentityVerifier};
use crate::credit::{self, CreditError, CreditStore};
use crate::generation::{EnvelopeError, GenerationClient, GenerationError, unwrap_envelope};
use crate::planners::store::{PlannerStore, PlannerStoreError};
use crate::planners::types::PlannerRecord;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("missing userInputs in request body")]
    MissingInput,
    #[error(transparent)]
    Credit(CreditError),
    #[error(transparent)]
    Generation(GenerationError),
    #[error(transparent)]
    Envelope(EnvelopeError),
    #[error(transparent)]
    Store(PlannerStoreError),
    #[error("generation task failed: {0}")]
    Internal(String),
}

/// End-to-end generation pipeline:
/// verify -> debit -> invoke -> unwrap -> persist,
/// refunding the debited credit when any post-debit stage fails.
#[derive(Clone)]
pub struct GenerationPipeline {
    verifier: Arc<dyn IdentityVerifier>,
    credits: Arc<dyn CreditStore>,
    generator: GenerationClient,
    planners: Arc<dyn PlannerStore>,
}

impl GenerationPipeline {
    #[must_use]
    pub fn new(
        verifier: Arc<dyn IdentityVerifier>,
        credits: Arc<dyn CreditStore>,
        generator: GenerationClient,
        planners: Arc<dyn PlannerStore>,
    ) -> Self {
        Self {
            verifier,
            credits,
            generator,
            planners,
        }
    }

    /// Run one generation request.
    ///
    /// Authentication and the input-shape check run inline (nothing has
    /// been spent yet). The debit-and-generate half runs on a spawned task:
    /// a caller that disconnects mid-request cannot cancel it, so an
    /// abandoned request never silently consumes a credit.
    pub async fn run(
        &self,
        token: &str,
        inputs: Option<Value>,
    ) -> Result<PlannerRecord, PipelineError> {
        let identity = self.verifier.verify(token).await?;
        let inputs = match inputs {
            Some(value @ Value::Object(_)) => value,
            _ => return Err(PipelineError::MissingInput),
        };

        let pipeline = self.clone();
        let task =
            tokio::spawn(async move { pipeline.debit_and_generate(identity, inputs).await });
        task.await
            .map_err(|error| PipelineError::Internal(error.to_string()))?
    }

    async fn debit_and_generate(
        &self,
        identity: Identity,
        inputs: Value,
    ) -> Result<PlannerRecord, PipelineError> {
        let receipt = self
            .credits
            .try_debit(&identity)
            .await
            .map_err(PipelineError::Credit)?;

        // Every failure from here on refunds the debit before returning.
        let raw = match self.generator.generate(&inputs).await {
            Ok(raw) => raw,
            Err(error) => {
                credit::refund_debit(self.credits.as_ref(), &receipt, "invoke").await;
                return Err(PipelineError::Generation(error));
            }
        };

        let outputs = match unwrap_envelope(&raw) {
            Ok(outputs) => outputs,
            Err(error) => {
                credit::refund_debit(self.credits.as_ref(), &receipt, "unwrap").await;
                return Err(PipelineError::Envelope(error));
            }
        };

        match self.planners.insert(&identity, inputs, outputs).await {
            Ok(record) => {
                tracing::info!(
                    identity = %identity,
                    record_id = %record.id,
                    balance_before = receipt.balance_before,
                    "planner generated"
                );
                Ok(record)
            }
            Err(error) => {
                credit::refund_debit(self.credits.as_ref(), &receipt, "persist").await;
                Err(PipelineError::Store(error))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use axum::{Json, Router, routing::post};
    use serde_json::{Value, json};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    use crate::auth::{Identity, StaticIdentityVerifier};
    use crate::credit::store::{self as credit_store, CreditStore};
    use crate::generation::GenerationClient;
    use crate::planners::store as planner_store;

    use super::{GenerationPipeline, PipelineError};

    struct WebhookStub {
        base_url: String,
        shutdown: Option<oneshot::Sender<()>>,
    }

    impl WebhookStub {
        fn stop(mut self) {
            if let Some(shutdown) = self.shutdown.take() {
                let _ = shutdown.send(());
            }
        }
    }

    async fn spawn_webhook_stub(body: Value) -> Result<WebhookStub> {
        let app = Router::new().route(
            "/",
            post(move || {
                let body = body.clone();
                async move { Json(body) }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            let _ = server.await;
        });
        Ok(WebhookStub {
            base_url: format!("http://{addr}/"),
            shutdown: Some(shutdown_tx),
        })
    }

    fn pipeline_against(
        webhook_url: &str,
        credits: Arc<credit_store::MemoryCreditStore>,
        planners: Arc<planner_store::MemoryPlannerStore>,
    ) -> GenerationPipeline {
        let verifier = Arc::new(StaticIdentityVerifier::new().with_token("tok", "user-1"));
        GenerationPipeline::new(
            verifier,
            credits,
            GenerationClient::new(Some(webhook_url.to_string()), 2_000),
            planners,
        )
    }

    #[tokio::test]
    async fn a_successful_run_spends_one_credit_and_persists_one_record() -> Result<()> {
        let stub =
            spawn_webhook_stub(json!([{"output": "{\"visao_geral\":\"plan\"}"}])).await?;
        let credits = credit_store::memory();
        let planners = planner_store::memory();
        let identity = Identity::new("user-1");
        credits.set_balance(&identity, 2).await;

        let pipeline = pipeline_against(&stub.base_url, credits.clone(), planners.clone());
        let record = pipeline.run("tok", Some(json!({"idade": 30}))).await?;

        assert_eq!(record.outputs.visao_geral.as_deref(), Some("plan"));
        assert_eq!(credits.balance(&identity).await?, 1);
        assert_eq!(planners.len().await, 1);

        stub.stop();
        Ok(())
    }

    #[tokio::test]
    async fn a_malformed_envelope_refunds_the_debit_and_persists_nothing() -> Result<()> {
        let stub = spawn_webhook_stub(json!({"not": "an array"})).await?;
        let credits = credit_store::memory();
        let planners = planner_store::memory();
        let identity = Identity::new("user-1");
        credits.set_balance(&identity, 1).await;

        let pipeline = pipeline_against(&stub.base_url, credits.clone(), planners.clone());
        let error = pipeline
            .run("tok", Some(json!({"idade": 30})))
            .await
            .unwrap_err();

        assert!(matches!(error, PipelineError::Envelope(_)));
        assert_eq!(credits.balance(&identity).await?, 1);
        assert!(planners.is_empty().await);

        stub.stop();
        Ok(())
    }

    #[tokio::test]
    async fn an_unreachable_webhook_refunds_the_debit() -> Result<()> {
        let credits = credit_store::memory();
        let planners = planner_store::memory();
        let identity = Identity::new("user-1");
        credits.set_balance(&identity, 1).await;

        // Nothing listens here; the connect fails fast.
        let pipeline = pipeline_against("http://127.0.0.1:9/", credits.clone(), planners.clone());
        let error = pipeline
            .run("tok", Some(json!({"idade": 30})))
            .await
            .unwrap_err();

        assert!(matches!(error, PipelineError::Generation(_)));
        assert_eq!(credits.balance(&identity).await?, 1);

        Ok(())
    }

    #[tokio::test]
    async fn an_invalid_credential_consumes_nothing() -> Result<()> {
        let credits = credit_store::memory();
        let planners = planner_store::memory();
        let identity = Identity::new("user-1");
        credits.set_balance(&identity, 1).await;

        let pipeline = pipeline_against("http://127.0.0.1:9/", credits.clone(), planners.clone());
        let error = pipeline
            .run("wrong-token", Some(json!({"idade": 30})))
            .await
            .unwrap_err();

        assert!(matches!(error, PipelineError::Auth(_)));
        assert_eq!(credits.balance(&identity).await?, 1);

        Ok(())
    }

    #[tokio::test]
    async fn missing_inputs_are_rejected_before_the_debit() -> Result<()> {
        let credits = credit_store::memory();
        let planners = planner_store::memory();
        let identity = Identity::new("user-1");
        credits.set_balance(&identity, 1).await;

        let pipeline = pipeline_against("http://127.0.0.1:9/", credits.clone(), planners.clone());

        for inputs in [None, Some(json!("a string")), Some(json!([1, 2]))] {
            let error = pipeline.run("tok", inputs).await.unwrap_err();
            assert!(matches!(error, PipelineError::MissingInput));
        }
        assert_eq!(credits.balance(&identity).await?, 1);

        Ok(())
    }
}
