use std::sync::Arc;
use std::time::Instant;

use reqwest::Url;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use super::prompt::{Language, Prompt};
use super::{CredentialPool, InsightError, TextBackend};
use crate::metrics::{
    INSIGHT_ATTEMPTS_TOTAL, INSIGHT_FALLBACKS_TOTAL, INSIGHT_KEY_ROTATIONS_TOTAL,
    INSIGHT_LATENCY_SECONDS,
};
use crate::model::{
    Device, Explanation, MaintenanceInsight, Reading, RiskAssessment, RiskLevel, SystemSummary,
    VoiceAlert,
};

const TTS_ENDPOINT: &str = "https://translate.google.com/translate_tts";
const VOICE_TEXT_MAX_CHARS: usize = 200;

const RISK_FALLBACK_REASON: &str = "AI analysis failed.";
const EXPLANATION_FALLBACK: &str =
    "Unable to generate explanation. Please check the device readings manually.";
const MAINTENANCE_FALLBACK: &str = "Manual inspection recommended.";
const SUMMARY_FALLBACK: &str = "Unable to generate summary.";
const CHAT_FALLBACK: &str = "I'm having trouble analyzing the data right now.";

/// Insight client over a rotating credential pool.
///
/// Construct once at startup and share behind an `Arc`; the rotation cursor
/// lives inside and is shared by every caller.
pub struct InsightClient {
    pool: CredentialPool,
    backend: Arc<dyn TextBackend>,
}

impl InsightClient {
    pub fn new(keys: Vec<String>, backend: Arc<dyn TextBackend>) -> Self {
        if keys.is_empty() {
            warn!("No insight API keys configured; insight endpoints will return fallbacks");
        } else {
            info!("Loaded {} insight API keys", keys.len());
        }

        Self {
            pool: CredentialPool::new(keys),
            backend,
        }
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    /// Generates text, rotating keys on quota errors.
    pub async fn generate(&self, prompt: &str) -> Result<String, InsightError> {
        self.generate_with_attempts(prompt, None).await
    }

    /// Like [`generate`](Self::generate), but never tries more than
    /// `max_attempts` keys. The bound is clamped to `1..=pool size`.
    pub async fn generate_with_attempts(
        &self,
        prompt: &str,
        max_attempts: Option<usize>,
    ) -> Result<String, InsightError> {
        if self.pool.is_empty() {
            return Err(InsightError::ServiceUnconfigured);
        }

        let pool_size = self.pool.len();
        let attempts = max_attempts.map_or(pool_size, |m| m.clamp(1, pool_size));

        for attempt in 1..=attempts {
            let (index, key) = self
                .pool
                .current()
                .ok_or(InsightError::ServiceUnconfigured)?;

            INSIGHT_ATTEMPTS_TOTAL.inc();
            let started = Instant::now();
            let result = self.backend.generate(key, prompt).await;
            INSIGHT_LATENCY_SECONDS.observe(started.elapsed().as_secs_f64());

            match result.map_err(InsightError::from) {
                Ok(text) => {
                    if attempt > 1 {
                        info!("Generation succeeded with key #{} on attempt {}", index + 1, attempt);
                    }
                    return Ok(text);
                }
                Err(InsightError::QuotaExhausted { status, message }) => {
                    let next = self.pool.advance_from(index);
                    INSIGHT_KEY_ROTATIONS_TOTAL.inc();
                    warn!(
                        "Quota reached on key #{} (status {:?}): {}. Rotating to key #{} ({}/{})",
                        index + 1,
                        status,
                        message,
                        next + 1,
                        attempt,
                        attempts
                    );
                }
                Err(e) => {
                    error!("Generation failed with key #{}: {}", index + 1, e);
                    return Err(e);
                }
            }
        }

        Err(InsightError::AllKeysExhausted { attempts })
    }

    async fn generate_json<T: DeserializeOwned>(
        &self,
        prompt: Prompt<'_>,
        lang: &Language,
    ) -> Result<T, InsightError> {
        let text = self.generate(&prompt.render(lang)?).await?;
        parse_json(&text)
    }

    pub async fn risk_assessment(&self, readings: &[Reading], lang: &Language) -> RiskAssessment {
        match self
            .generate_json::<RiskAssessment>(Prompt::Risk { readings }, lang)
            .await
        {
            Ok(mut risk) => {
                risk.confidence = clamp_confidence(risk.confidence);
                risk
            }
            Err(e) => fallback(
                "risk",
                e,
                RiskAssessment {
                    risk_level: RiskLevel::Unknown,
                    confidence: 0.0,
                    reason: RISK_FALLBACK_REASON.to_string(),
                },
            ),
        }
    }

    pub async fn explanation(
        &self,
        device_id: &str,
        readings: &[Reading],
        lang: &Language,
    ) -> Explanation {
        let prompt = Prompt::Explanation {
            device_id,
            readings,
        };

        self.generate_json(prompt, lang).await.unwrap_or_else(|e| {
            fallback(
                "explanation",
                e,
                Explanation {
                    explanation: EXPLANATION_FALLBACK.to_string(),
                },
            )
        })
    }

    pub async fn maintenance_insight(
        &self,
        device_id: &str,
        history: &[Reading],
        lang: &Language,
    ) -> MaintenanceInsight {
        let prompt = Prompt::Maintenance { device_id, history };

        self.generate_json(prompt, lang).await.unwrap_or_else(|e| {
            fallback(
                "maintenance",
                e,
                MaintenanceInsight {
                    maintenance_required: false,
                    suggested_action: MAINTENANCE_FALLBACK.to_string(),
                },
            )
        })
    }

    pub async fn system_summary(&self, devices: &[Device], lang: &Language) -> SystemSummary {
        self.generate_json(Prompt::Summary { devices }, lang)
            .await
            .unwrap_or_else(|e| {
                fallback(
                    "summary",
                    e,
                    SystemSummary {
                        overall_status: "UNKNOWN".to_string(),
                        devices_at_risk: 0,
                        summary: SUMMARY_FALLBACK.to_string(),
                    },
                )
            })
    }

    /// Free-text answer; the response is returned as generated, not parsed.
    pub async fn chat_response(&self, device_id: &str, history: &[Reading], query: &str) -> String {
        match self.chat_text(device_id, history, query).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => fallback("chat", e, CHAT_FALLBACK.to_string()),
        }
    }

    async fn chat_text(
        &self,
        device_id: &str,
        history: &[Reading],
        query: &str,
    ) -> Result<String, InsightError> {
        let prompt = Prompt::Chat {
            device_id,
            history,
            query,
        }
        .render(&Language::default())?;
        self.generate(&prompt).await
    }

    /// Spoken alert built from [`explanation`](Self::explanation), so it
    /// inherits its fallback.
    pub async fn voice_alert(
        &self,
        device_id: &str,
        readings: &[Reading],
        lang: &Language,
    ) -> VoiceAlert {
        let explanation = self.explanation(device_id, readings, lang).await;
        let text = truncate_chars(&explanation.explanation, VOICE_TEXT_MAX_CHARS);
        let audio_url = speech_url(&text, lang);

        VoiceAlert { text, audio_url }
    }
}

fn fallback<T>(operation: &str, err: InsightError, value: T) -> T {
    INSIGHT_FALLBACKS_TOTAL.inc();
    match err {
        InsightError::ServiceUnconfigured => {
            debug!("Insight {} skipped: {}", operation, err)
        }
        _ => error!("Insight {} failed, using fallback: {}", operation, err),
    }
    value
}

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Returns the content of the first fenced code block in `text`, or the
/// trimmed text when there is no fence.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };

    let after_open = &trimmed[open + 3..];
    // Skip the info string (`json`, `JSON`, ...) on the opening line.
    let body = match after_open.find('\n') {
        Some(newline) => &after_open[newline + 1..],
        None => after_open.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    let body = match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    };
    body.trim()
}

/// Plain JSON is taken as is; only text that fails to parse is unfenced.
fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, InsightError> {
    let trimmed = text.trim();
    serde_json::from_str(trimmed)
        .or_else(|_| serde_json::from_str(strip_code_fence(trimmed)))
        .map_err(|e| InsightError::MalformedUpstreamResponse(e.to_string()))
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn speech_url(text: &str, lang: &Language) -> String {
    match Url::parse_with_params(
        TTS_ENDPOINT,
        &[
            ("ie", "UTF-8"),
            ("q", text),
            ("tl", lang.code()),
            ("client", "tw-ob"),
        ],
    ) {
        Ok(url) => url.to_string(),
        Err(e) => {
            error!("Failed to build speech URL: {}", e);
            TTS_ENDPOINT.to_string()
        }
    }
}
