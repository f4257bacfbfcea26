use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use thiserror::Error;

use crate::audio::AudioPayload;
use crate::biomarkers::{AcousticBiomarkers, InferenceResult, Label, DEFAULT_REASONING};
use crate::config::Config;

const INSTRUCTION: &str = r#"Listen carefully to this audio sample. You are an expert clinical speech-language pathologist.
Analyze the speech for neurological markers of stroke (dysarthria).

Evaluation criteria:
1. Articulation: is there slurring or imprecise consonants?
2. Prosody: is the rhythm monotonic or scanning?
3. Phonation: is the voice breathy, strained or harsh?
4. Fluency: are there abnormal pauses or word-finding struggles?

Output requirements:
- Clear, rhythmic, natural speech is 'Healthy' with a low stroke probability.
- Clear slurring, uneven rhythm or vocal instability is 'Stroke'.
- Report realistic acoustic biomarkers measured from the audio provided.
- Give a specific clinical reasoning string.

Respond ONLY in JSON."#;

/// Failures that make the inference service unusable for one call.
/// Never shown to the caller as an error; see [`Classification::Fallback`].
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("no Gemini API key configured")]
    MissingApiKey,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gemini API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("unreadable response envelope: {0}")]
    Envelope(#[from] serde_json::Error),
}

/// Outcome of [`Classifier::classify`]. Both variants carry a well-formed result.
#[derive(Debug)]
pub enum Classification {
    /// The service answered; its payload was reconciled field by field.
    Analyzed(InferenceResult),
    /// The service was unusable; `result` is the fixed safe default.
    Fallback {
        result: InferenceResult,
        cause: InferenceError,
    },
}

impl Classification {
    pub fn result(&self) -> &InferenceResult {
        match self {
            Classification::Analyzed(result) => result,
            Classification::Fallback { result, .. } => result,
        }
    }

    pub fn into_result(self) -> InferenceResult {
        match self {
            Classification::Analyzed(result) => result,
            Classification::Fallback { result, .. } => result,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Classification::Fallback { .. })
    }
}

/// Response as the model sent it: every field optional, none trusted yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawInference {
    pub stroke_probability: Option<f64>,
    pub predicted_label: Option<Label>,
    pub reasoning: Option<String>,
    pub biomarkers: Option<AcousticBiomarkers>,
}

impl RawInference {
    /// Read the model's text. Absent, malformed or non-object text yields an
    /// empty value; a field of the wrong type counts as absent.
    /// Unparseable text is repaired here rather than sent down the failure
    /// path, unlike the dashboard this replaces, which returned the failure default.
    pub fn parse(text: Option<&str>) -> Self {
        let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
            return Self::default();
        };
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Self::from_map(&map),
            Ok(other) => {
                log::warn!("Model returned non-object JSON, ignoring: {other}");
                Self::default()
            }
            Err(e) => {
                log::warn!("Model returned malformed JSON, ignoring: {e}");
                Self::default()
            }
        }
    }

    fn from_map(map: &Map<String, Value>) -> Self {
        Self {
            stroke_probability: field(map, "strokeProbability"),
            predicted_label: field(map, "predictedLabel"),
            reasoning: field(map, "reasoning"),
            // all five numbers or nothing
            biomarkers: field(map, "biomarkers"),
        }
    }
}

fn field<T: DeserializeOwned>(map: &Map<String, Value>, key: &str) -> Option<T> {
    map.get(key).and_then(|v| T::deserialize(v).ok())
}

/// Fill every missing field of a raw response with its fixed default.
///
/// The probability-derived label is only a default: a label the model
/// supplied is kept even when it disagrees with the threshold.
pub fn reconcile(raw: RawInference) -> InferenceResult {
    let derived = Label::from_probability(raw.stroke_probability.unwrap_or(0.0));
    InferenceResult {
        stroke_probability: raw.stroke_probability.unwrap_or(0.0),
        predicted_label: raw.predicted_label.unwrap_or(derived),
        reasoning: raw
            .reasoning
            .unwrap_or_else(|| DEFAULT_REASONING.to_string()),
        biomarkers: raw.biomarkers.unwrap_or_else(AcousticBiomarkers::canonical),
    }
}

/// Gemini request types
#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize, Default)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: Value,
}

/// Gemini response types
#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiResponse {
    /// Concatenated text of the first candidate, if any.
    fn into_text(self) -> Option<String> {
        let parts = self
            .candidates?
            .into_iter()
            .next()?
            .content?
            .parts;
        let texts: Vec<String> = parts.into_iter().filter_map(|p| p.text).collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.join(""))
        }
    }
}

fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "strokeProbability": { "type": "NUMBER", "description": "Confidence score (0.0 to 1.0)" },
            "predictedLabel": { "type": "STRING", "enum": ["Stroke", "Healthy"] },
            "reasoning": { "type": "STRING", "description": "Specific observations from the audio" },
            "biomarkers": {
                "type": "OBJECT",
                "properties": {
                    "jitter": { "type": "NUMBER" },
                    "shimmer": { "type": "NUMBER" },
                    "hnr": { "type": "NUMBER" },
                    "speakingRate": { "type": "NUMBER" },
                    "pauseFrequency": { "type": "NUMBER" }
                },
                "required": ["jitter", "shimmer", "hnr", "speakingRate", "pauseFrequency"]
            }
        },
        "required": ["strokeProbability", "predictedLabel", "biomarkers", "reasoning"]
    })
}

/// Stroke-speech classifier backed by the Gemini generateContent API.
pub struct Classifier {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl Classifier {
    pub fn new(config: &Config) -> Self {
        let timeout = Duration::from_secs(config.request_timeout_secs.max(1));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Falling back to default HTTP client: {e}");
                reqwest::Client::new()
            });
        Self {
            client,
            api_key: config.gemini_api_key.trim().to_string(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    /// Classify a voice sample. Never fails: any service problem yields
    /// [`InferenceResult::failure_default`] wrapped in `Fallback`.
    pub async fn classify(&self, payload: &AudioPayload) -> Classification {
        match self.request(payload).await {
            Ok(text) => Classification::Analyzed(reconcile(RawInference::parse(text.as_deref()))),
            Err(cause) => {
                log::error!("Inference error, using safe default: {cause}");
                Classification::Fallback {
                    result: InferenceResult::failure_default(),
                    cause,
                }
            }
        }
    }

    async fn request(&self, payload: &AudioPayload) -> Result<Option<String>, InferenceError> {
        if self.api_key.is_empty() {
            return Err(InferenceError::MissingApiKey);
        }

        let body = GeminiRequest {
            contents: vec![Content {
                parts: vec![
                    Part {
                        inline_data: Some(InlineData {
                            mime_type: payload.mime_type.clone(),
                            data: payload.to_base64(),
                        }),
                        ..Part::default()
                    },
                    Part {
                        text: Some(INSTRUCTION.to_string()),
                        ..Part::default()
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: response_schema(),
            },
        };

        log::info!(
            "Classifying {} bytes of {} with {}",
            payload.bytes.len(),
            payload.mime_type,
            self.model
        );

        let resp = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(InferenceError::Api { status, body });
        }

        let raw = resp.bytes().await?;
        let gemini_resp: GeminiResponse = serde_json::from_slice(&raw)?;
        Ok(gemini_resp.into_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn canonical() -> AcousticBiomarkers {
        AcousticBiomarkers {
            jitter: 0.5,
            shimmer: 2.1,
            hnr: 24.5,
            speaking_rate: 4.2,
            pause_frequency: 8.0,
        }
    }

    fn reconcile_text(text: &str) -> InferenceResult {
        reconcile(RawInference::parse(Some(text)))
    }

    #[test]
    fn probability_only_scenario() {
        let result = reconcile_text(r#"{"strokeProbability": 0.9}"#);
        assert_eq!(
            result,
            InferenceResult {
                stroke_probability: 0.9,
                predicted_label: Label::Stroke,
                reasoning: "Analysis complete.".into(),
                biomarkers: canonical(),
            }
        );
    }

    #[test]
    fn derived_label_follows_threshold() {
        assert_eq!(
            reconcile_text(r#"{"strokeProbability": 0.56}"#).predicted_label,
            Label::Stroke
        );
        assert_eq!(
            reconcile_text(r#"{"strokeProbability": 0.55}"#).predicted_label,
            Label::Healthy
        );
        assert_eq!(
            reconcile_text(r#"{"strokeProbability": 0.2}"#).predicted_label,
            Label::Healthy
        );
    }

    #[test]
    fn supplied_label_is_kept_even_against_threshold() {
        let result = reconcile_text(r#"{"strokeProbability": 0.95, "predictedLabel": "Healthy"}"#);
        assert_eq!(result.predicted_label, Label::Healthy);
        let result = reconcile_text(r#"{"strokeProbability": 0.05, "predictedLabel": "Stroke"}"#);
        assert_eq!(result.predicted_label, Label::Stroke);
    }

    #[test]
    fn complete_response_passes_through() {
        let text = r#"{
            "strokeProbability": 0.73,
            "predictedLabel": "Stroke",
            "reasoning": "Slurred consonants and scanning prosody.",
            "biomarkers": {"jitter": 1.9, "shimmer": 5.4, "hnr": 14.2, "speakingRate": 2.8, "pauseFrequency": 19}
        }"#;
        assert_eq!(
            reconcile_text(text),
            InferenceResult {
                stroke_probability: 0.73,
                predicted_label: Label::Stroke,
                reasoning: "Slurred consonants and scanning prosody.".into(),
                biomarkers: AcousticBiomarkers {
                    jitter: 1.9,
                    shimmer: 5.4,
                    hnr: 14.2,
                    speaking_rate: 2.8,
                    pause_frequency: 19.0,
                },
            }
        );
    }

    #[test]
    fn missing_biomarkers_use_whole_default() {
        let result = reconcile_text(
            r#"{"strokeProbability": 0.3, "predictedLabel": "Healthy", "reasoning": "Clear speech."}"#,
        );
        assert_eq!(result.biomarkers, canonical());
    }

    #[test]
    fn partial_biomarkers_are_not_merged() {
        let result = reconcile_text(r#"{"biomarkers": {"jitter": 3.3, "shimmer": 7.0}}"#);
        assert_eq!(result.biomarkers, canonical());
    }

    #[test]
    fn absent_or_malformed_text_is_an_empty_object() {
        let empty = InferenceResult {
            stroke_probability: 0.0,
            predicted_label: Label::Healthy,
            reasoning: "Analysis complete.".into(),
            biomarkers: canonical(),
        };
        assert_eq!(reconcile(RawInference::parse(None)), empty);
        assert_eq!(reconcile_text(""), empty);
        assert_eq!(reconcile_text("{\"strokeProbability\": 0.9"), empty);
        assert_eq!(reconcile_text("[0.9]"), empty);
        assert_eq!(reconcile_text("null"), empty);
    }

    #[test]
    fn wrongly_typed_fields_count_as_absent() {
        let raw = RawInference::parse(Some(
            r#"{"strokeProbability": "0.9", "predictedLabel": "maybe", "reasoning": 7, "biomarkers": null}"#,
        ));
        assert_eq!(raw, RawInference::default());
    }

    #[test]
    fn candidate_text_is_concatenated() {
        let resp: GeminiResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"{\"strokeProb"},{"text":"ability\": 0.6}"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(resp.into_text().as_deref(), Some(r#"{"strokeProbability": 0.6}"#));

        let empty: GeminiResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert_eq!(empty.into_text(), None);
        let blocked: GeminiResponse = serde_json::from_str(r#"{"promptFeedback":{}}"#).unwrap();
        assert_eq!(blocked.into_text(), None);
    }

    fn config_for(base_url: &str, api_key: &str) -> Config {
        Config {
            gemini_api_key: api_key.into(),
            base_url: base_url.into(),
            request_timeout_secs: 5,
            ..Config::default()
        }
    }

    fn payload() -> AudioPayload {
        AudioPayload::new(vec![0xfb, 0xff, 0x00, 0x10], "audio/wav")
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    async fn read_request(sock: &mut tokio::net::TcpStream) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = sock.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = find(&buf, b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + len {
                    break;
                }
            }
        }
        buf
    }

    /// Answer exactly one HTTP request with a canned response.
    async fn serve_once(status: &'static str, body: String) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let request = read_request(&mut sock).await;
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(response.as_bytes()).await.unwrap();
            let _ = sock.shutdown().await;
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{addr}"), handle)
    }

    fn envelope(model_text: &str) -> String {
        json!({
            "candidates": [{ "content": { "role": "model", "parts": [{ "text": model_text }] } }]
        })
        .to_string()
    }

    #[tokio::test]
    async fn analyzes_service_response() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (url, server) = serve_once("200 OK", envelope(r#"{"strokeProbability": 0.9}"#)).await;
        let classifier = Classifier::new(&config_for(&url, "test-key"));

        let outcome = classifier.classify(&payload()).await;
        assert!(!outcome.is_fallback());
        assert_eq!(outcome.result().predicted_label, Label::Stroke);
        assert_eq!(outcome.result().biomarkers, canonical());

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1beta/models/gemini-3-flash-preview:generateContent"));
        assert!(request.to_ascii_lowercase().contains("x-goog-api-key: test-key"));
        assert!(request.contains(r#""mime_type":"audio/wav""#));
        assert!(request.contains(r#""data":"+/8AEA==""#));
        assert!(request.contains(r#""response_mime_type":"application/json""#));
        assert!(request.contains("Articulation"));
    }

    #[tokio::test]
    async fn malformed_model_text_is_repaired_not_failed() {
        let (url, server) = serve_once("200 OK", envelope("I cannot analyze this.")).await;
        let classifier = Classifier::new(&config_for(&url, "k"));

        let outcome = classifier.classify(&payload()).await;
        assert!(!outcome.is_fallback());
        assert_eq!(outcome.result().stroke_probability, 0.0);
        assert_eq!(outcome.result().reasoning, "Analysis complete.");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn api_error_falls_back() {
        let (url, server) = serve_once(
            "500 Internal Server Error",
            r#"{"error":{"code":500}}"#.to_string(),
        )
        .await;
        let classifier = Classifier::new(&config_for(&url, "k"));

        let outcome = classifier.classify(&payload()).await;
        match &outcome {
            Classification::Fallback {
                cause: InferenceError::Api { status, .. },
                ..
            } => assert_eq!(*status, 500),
            other => panic!("expected api fallback, got {other:?}"),
        }
        assert_eq!(outcome.into_result(), InferenceResult::failure_default());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unreadable_envelope_falls_back() {
        let (url, server) = serve_once("200 OK", "<html>proxy</html>".to_string()).await;
        let classifier = Classifier::new(&config_for(&url, "k"));

        let outcome = classifier.classify(&payload()).await;
        assert!(matches!(
            outcome,
            Classification::Fallback {
                cause: InferenceError::Envelope(_),
                ..
            }
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_service_falls_back_identically() {
        let classifier = Classifier::new(&config_for("http://127.0.0.1:1", "k"));

        let first = classifier.classify(&payload()).await;
        let second = classifier.classify(&payload()).await;
        assert!(matches!(
            first,
            Classification::Fallback {
                cause: InferenceError::Http(_),
                ..
            }
        ));
        let first = first.into_result();
        assert_eq!(first, InferenceResult::failure_default());
        assert_eq!(first, second.into_result());
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&InferenceResult::failure_default()).unwrap()
        );
    }

    #[tokio::test]
    async fn missing_key_falls_back_without_network() {
        let classifier = Classifier::new(&config_for("http://127.0.0.1:1", "  "));
        let outcome = classifier.classify(&payload()).await;
        assert!(matches!(
            outcome,
            Classification::Fallback {
                cause: InferenceError::MissingApiKey,
                ..
            }
        ));
    }
}
