use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Decoded plan produced by the generation webhook.
///
/// Field names are the generation service's wire contract; every section is
/// optional free text and unknown fields in the decoded object are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSections {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visao_geral: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objetivo_divisao_treino: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dicas_musculo_enfase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dieta_suplementacao: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tempo_medio_resultados: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dicas_mentalidade: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analise_shape: Option<String>,
}

/// One persisted generation: the caller's inputs verbatim plus the decoded
/// plan. Append-only; `id` and `created_at` are assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerRecord {
    pub id: String,
    pub identity: String,
    pub created_at: DateTime<Utc>,
    pub inputs: Value,
    pub outputs: PlanSections,
}
