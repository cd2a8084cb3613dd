#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::{
    auth::{HttpIdentityVerifier, IdentityVerifier, StaticIdentityVerifier},
    config::Config,
    credit::PurchaseForwarder,
    db::PlannerDb,
    generation::GenerationClient,
    server::{AppState, build_router},
};

pub mod auth;
pub mod config;
pub mod credit;
pub mod db;
pub mod generation;
pub mod pipeline;
pub mod planners;
pub mod server;

pub async fn build_state(config: Config) -> Result<AppState> {
    let db = match config.db_url.clone() {
        Some(url) => Some(Arc::new(PlannerDb::connect(url.as_str()).await?)),
        None => None,
    };

    let verifier: Arc<dyn IdentityVerifier> = match config.identity_base_url.clone() {
        Some(base_url) => Arc::new(HttpIdentityVerifier::new(
            base_url,
            config.identity_timeout_ms,
        )),
        None => {
            warn!("no identity service configured; every credential will be rejected");
            Arc::new(StaticIdentityVerifier::new())
        }
    };

    let (credits, planners) = match db {
        Some(db) => (
            credit::store::postgres(db.clone()),
            planners::store::postgres(db),
        ),
        None => {
            warn!("no database configured; balances and planners are in-memory only");
            (
                credit::store::memory() as Arc<dyn credit::CreditStore>,
                planners::store::memory() as Arc<dyn planners::store::PlannerStore>,
            )
        }
    };

    let generator = GenerationClient::new(
        config.generation_webhook_url.clone(),
        config.generation_timeout_ms,
    );
    let purchases = Arc::new(PurchaseForwarder::new(
        config.purchase_webhook_url.clone(),
        config.purchase_timeout_ms,
    ));

    Ok(AppState::new(
        config, verifier, credits, planners, generator, purchases,
    ))
}

pub async fn build_app(config: Config) -> Result<axum::Router> {
    Ok(build_router(build_state(config).await?))
}

pub async fn serve(config: Config) -> Result<()> {
    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(
        service = %config.service_name,
        bind_addr = %config.bind_addr,
        "planner service listening"
    );
    axum::serve(listener, build_app(config).await?).await?;
    Ok(())
}
