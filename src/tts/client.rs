//! HTTP client for the speech synthesis endpoints

use std::sync::OnceLock;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Response};
use serde_json::Value;

use crate::error::{ClientError, ErrorKind};

/// Shared HTTP client for synthesis requests
static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn get_http_client() -> &'static Client {
    HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Falling back to default HTTP client: {}", e);
                Client::new()
            })
    })
}

const ENDPOINT_SYNTHESIZE: &str = "synthesize";
const ENDPOINT_STREAM: &str = "synthesize/stream";

/// Errors that can occur during synthesis
#[derive(Debug)]
pub enum SpeechError {
    /// Text was empty or only whitespace
    EmptyText,
    /// No voice given and no default configured
    MissingVoice,
    /// Network/HTTP error
    Network(String),
    /// The service returned an error
    Api { status: u16, message: String },
}

impl std::fmt::Display for SpeechError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpeechError::EmptyText => write!(f, "Text is required for synthesis"),
            SpeechError::MissingVoice => write!(f, "Voice is required for synthesis"),
            SpeechError::Network(e) => write!(f, "Network error: {}", e),
            SpeechError::Api { status, message } => {
                write!(f, "TTS API error ({}): {}", status, message)
            }
        }
    }
}

impl std::error::Error for SpeechError {}

impl From<SpeechError> for ClientError {
    fn from(error: SpeechError) -> Self {
        let kind = match &error {
            SpeechError::EmptyText | SpeechError::MissingVoice => ErrorKind::InvalidConfiguration,
            SpeechError::Api { status: 401 | 403, .. } => ErrorKind::Authentication,
            SpeechError::Api { .. } | SpeechError::Network(_) => ErrorKind::Network,
        };
        ClientError::new(kind, error.to_string()).with_cause(error)
    }
}

/// Client for the text-to-speech endpoints
#[derive(Debug, Clone)]
pub struct SpeechClient {
    base_url: String,
    bearer: String,
    default_voice: Option<String>,
}

impl SpeechClient {
    pub fn new(base_url: impl Into<String>, bearer: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer: bearer.into(),
            default_voice: None,
        }
    }

    /// Voice used when a call does not name one
    pub fn with_default_voice(mut self, voice: impl Into<String>) -> Self {
        self.default_voice = Some(voice.into());
        self
    }

    pub fn default_voice(&self) -> Option<&str> {
        self.default_voice.as_deref()
    }

    /// Synthesize `text` and return the complete audio body
    pub async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<Vec<u8>, SpeechError> {
        let voice = self.resolve(text, voice)?;
        let response = self.post(ENDPOINT_SYNTHESIZE, text, voice).await?;

        let audio = response
            .bytes()
            .await
            .map_err(|e| SpeechError::Network(e.to_string()))?;

        log::info!("Synthesized {} bytes of audio", audio.len());
        Ok(audio.to_vec())
    }

    /// Synthesize `text` and yield the audio as it arrives
    pub async fn stream(
        &self,
        text: &str,
        voice: Option<&str>,
    ) -> Result<impl Stream<Item = Result<Vec<u8>, SpeechError>>, SpeechError> {
        let voice = self.resolve(text, voice)?;
        let response = self.post(ENDPOINT_STREAM, text, voice).await?;

        log::info!("Streaming synthesized audio");
        Ok(response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| SpeechError::Network(e.to_string()))
        }))
    }

    /// The voice catalog
    pub fn voices(&self) -> &'static [super::Voice] {
        super::VOICES
    }

    fn resolve<'a>(&'a self, text: &str, voice: Option<&'a str>) -> Result<&'a str, SpeechError> {
        if text.trim().is_empty() {
            return Err(SpeechError::EmptyText);
        }
        voice
            .filter(|v| !v.is_empty())
            .or(self.default_voice.as_deref())
            .ok_or(SpeechError::MissingVoice)
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/tts/{}", self.base_url, endpoint)
    }

    async fn post(&self, endpoint: &str, text: &str, voice: &str) -> Result<Response, SpeechError> {
        log::debug!("POST {} (voice {}, {} chars)", endpoint, voice, text.len());

        let response = get_http_client()
            .post(self.url(endpoint))
            .header(AUTHORIZATION, format!("Bearer {}", self.bearer))
            .form(&[("text", text), ("voice", voice)])
            .send()
            .await
            .map_err(|e| {
                log::error!("Error calling {}: {}", endpoint, e);
                SpeechError::Network(e.to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = error_message(endpoint, &body, status.canonical_reason().unwrap_or(""));
        log::error!("Error calling {}: {}", endpoint, message);
        Err(SpeechError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// The `detail` field of an error body, or a generic message naming the
/// first path segment of the endpoint
fn error_message(endpoint: &str, body: &str, status_text: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| match v.get("detail") {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        })
        .unwrap_or_else(|| {
            let name = endpoint.split('/').next().unwrap_or(endpoint);
            format!("TTS {} failed: {}", name, status_text)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_trims_trailing_slash() {
        let client = SpeechClient::new("https://api.test.com/", "token");
        assert_eq!(
            client.url(ENDPOINT_STREAM),
            "https://api.test.com/api/tts/synthesize/stream"
        );
    }

    #[tokio::test]
    async fn test_blank_text_rejected_before_request() {
        let client = SpeechClient::new("http://127.0.0.1:1", "token").with_default_voice("af_sky");
        assert!(matches!(
            client.synthesize("   ", None).await,
            Err(SpeechError::EmptyText)
        ));
        assert!(matches!(
            client.stream("", Some("af_sky")).await,
            Err(SpeechError::EmptyText)
        ));
    }

    #[tokio::test]
    async fn test_missing_voice_rejected_before_request() {
        let client = SpeechClient::new("http://127.0.0.1:1", "token");
        assert!(matches!(
            client.synthesize("hello", None).await,
            Err(SpeechError::MissingVoice)
        ));
    }

    #[test]
    fn test_explicit_voice_wins_over_default() {
        let client = SpeechClient::new("http://x", "t").with_default_voice("af_sky");
        assert_eq!(client.resolve("hi", Some("bm_lewis")).unwrap(), "bm_lewis");
        assert_eq!(client.resolve("hi", None).unwrap(), "af_sky");
    }

    #[test]
    fn test_error_message_prefers_detail() {
        assert_eq!(
            error_message(ENDPOINT_SYNTHESIZE, r#"{"detail":"voice not found"}"#, "Bad Request"),
            "voice not found"
        );
        assert_eq!(
            error_message(ENDPOINT_STREAM, "<html>", "Internal Server Error"),
            "TTS synthesize failed: Internal Server Error"
        );
        assert_eq!(
            error_message(ENDPOINT_SYNTHESIZE, r#"{"other":1}"#, "Not Found"),
            "TTS synthesize failed: Not Found"
        );
    }

    #[test]
    fn test_speech_error_into_client_error() {
        let err: ClientError = SpeechError::Api {
            status: 401,
            message: "bad token".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Authentication);

        let err: ClientError = SpeechError::MissingVoice.into();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
        assert!(err.cause().is_some());
    }
}
