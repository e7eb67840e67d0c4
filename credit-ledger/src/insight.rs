//! Clinical insight text from an external language model.
//!
//! Opaque to the ledger: nothing here reads or writes balances, and any
//! provider failure turns into a fixed apology string.

use crate::error::{LedgerError, LedgerResult};
use crate::models::{Appointment, Patient};
use async_trait::async_trait;
use logger_redacted::PiiRedactor;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

pub const INSIGHT_UNAVAILABLE: &str = "Could not generate insights right now.";
pub const INSIGHT_PROVIDER_ERROR: &str =
    "Error communicating with the AI assistant. Check the API settings.";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub timeout_secs: u64,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-1.5-flash".to_string(),
            temperature: 0.7,
            top_p: 0.8,
            timeout_secs: 30,
        }
    }
}

/// Text generation backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InsightProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> LedgerResult<String>;
}

// ============================================================================
// GEMINI
// ============================================================================

pub struct GeminiInsightProvider {
    client: reqwest::Client,
    config: InsightConfig,
    api_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

impl GeminiInsightProvider {
    pub fn new(config: InsightConfig) -> LedgerResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| LedgerError::Config("insight.api_key is not set".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LedgerError::Config(format!("HTTP client error: {e}")))?;

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl InsightProvider for GeminiInsightProvider {
    async fn generate(&self, prompt: &str) -> LedgerResult<String> {
        let payload = GenerateRequest {
            contents: vec![Content {
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
            },
        };

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| LedgerError::ExternalService(format!("Gemini request error: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LedgerError::ExternalService(format!(
                "Gemini error {status}: {error_text}"
            )));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::ExternalService(format!("Response parse error: {e}")))?;

        Ok(body
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .map(|p| p.text)
            .collect::<Vec<_>>()
            .join(""))
    }
}

/// Stand-in when no API key is configured
pub struct UnconfiguredInsightProvider;

#[async_trait]
impl InsightProvider for UnconfiguredInsightProvider {
    async fn generate(&self, _prompt: &str) -> LedgerResult<String> {
        Err(LedgerError::Config(
            "No insight provider configured".to_string(),
        ))
    }
}

// ============================================================================
// SERVICE
// ============================================================================

pub struct InsightService {
    provider: Arc<dyn InsightProvider>,
    redactor: PiiRedactor,
}

impl InsightService {
    pub fn new(provider: Arc<dyn InsightProvider>) -> Self {
        Self {
            provider,
            redactor: PiiRedactor::default(),
        }
    }

    /// Prose insight for the professional, or a fixed apology on failure
    pub async fn generate_insight(&self, patient: &Patient, appointments: &[Appointment]) -> String {
        let prompt = self.redactor.redact(&build_prompt(patient, appointments));
        debug!(patient_id = %patient.id, prompt_len = prompt.len(), "Requesting clinical insight");

        match self.provider.generate(&prompt).await {
            Ok(text) if text.trim().is_empty() => INSIGHT_UNAVAILABLE.to_string(),
            Ok(text) => text,
            Err(e) => {
                error!(patient_id = %patient.id, error = %e, "Insight provider failed");
                INSIGHT_PROVIDER_ERROR.to_string()
            }
        }
    }
}

/// One line per session of this patient: `- <date> (<status>): <notes>`
pub fn session_history(patient: &Patient, appointments: &[Appointment]) -> String {
    appointments
        .iter()
        .filter(|a| a.patient_id == patient.id)
        .map(|a| {
            let notes = if a.notes.trim().is_empty() {
                "No notes"
            } else {
                a.notes.as_str()
            };
            format!("- {} ({}): {}", a.date, a.status, notes)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_prompt(patient: &Patient, appointments: &[Appointment]) -> String {
    let mut prompt = String::from(
        "Analyze the following session history and give the psychologist a concise \
         clinical insight (at most 3 topics). Focus on potential patterns, warnings \
         that need attention, or suggested areas of focus for the next session.\n\n",
    );
    let _ = writeln!(
        prompt,
        "Patient profile: {}, Status: {:?}",
        patient.name, patient.status
    );
    let _ = writeln!(prompt, "Notes: {}\n", patient.notes);
    let _ = writeln!(prompt, "Session history:");
    prompt.push_str(&session_history(patient, appointments));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::*;
    use chrono::{NaiveDate, NaiveTime, Utc};
    use uuid::Uuid;

    fn patient() -> Patient {
        Patient {
            id: Uuid::new_v4(),
            professional_id: Uuid::new_v4(),
            name: "Elisa".to_string(),
            email: "elisa@example.com".to_string(),
            phone: String::new(),
            cpf: None,
            date_of_birth: None,
            status: PatientStatus::Active,
            registration_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            notes: "Reach her at elisa@example.com".to_string(),
            age_group: Some(AgeGroup::Adult),
            guardian_name: None,
        }
    }

    fn session(patient: &Patient, notes: &str) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            professional_id: patient.professional_id,
            patient_id: patient.id,
            date: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            duration_minutes: 50,
            status: AppointmentStatus::Completed,
            service_type: ServiceType::Single,
            grant_id: None,
            notes: notes.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_history_lines() {
        let p = patient();
        let history = session_history(&p, &[session(&p, ""), session(&p, "Slept better")]);
        assert_eq!(
            history,
            "- 2024-03-04 (completed): No notes\n- 2024-03-04 (completed): Slept better"
        );
    }

    #[tokio::test]
    async fn test_prompt_is_redacted_before_sending() {
        let mut provider = MockInsightProvider::new();
        provider
            .expect_generate()
            .withf(|prompt| !prompt.contains("elisa@example.com") && prompt.contains("Elisa"))
            .times(1)
            .returning(|_| Ok("1. Sleep is improving".to_string()));
        let service = InsightService::new(Arc::new(provider));
        let p = patient();

        let text = service.generate_insight(&p, &[session(&p, "ok")]).await;

        assert_eq!(text, "1. Sleep is improving");
    }

    #[tokio::test]
    async fn test_provider_error_becomes_apology() {
        let mut provider = MockInsightProvider::new();
        provider
            .expect_generate()
            .returning(|_| Err(LedgerError::ExternalService("quota".to_string())));
        let service = InsightService::new(Arc::new(provider));

        let text = service.generate_insight(&patient(), &[]).await;

        assert_eq!(text, INSIGHT_PROVIDER_ERROR);
    }

    #[tokio::test]
    async fn test_empty_reply_is_unavailable() {
        let mut provider = MockInsightProvider::new();
        provider.expect_generate().returning(|_| Ok("  ".to_string()));
        let service = InsightService::new(Arc::new(provider));

        assert_eq!(service.generate_insight(&patient(), &[]).await, INSIGHT_UNAVAILABLE);
    }

    #[test]
    fn test_gemini_requires_key() {
        assert!(matches!(
            GeminiInsightProvider::new(InsightConfig::default()),
            Err(LedgerError::Config(_))
        ));
    }
}
