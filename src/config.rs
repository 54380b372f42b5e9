use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ClientError, ErrorKind};
use crate::streaming::TransportKind;

/// Environment variable consulted when the config carries no bearer token
pub const BEARER_ENV_VAR: &str = "SPEECHLINK_BEARER";

pub const DEFAULT_SAMPLE_RATE: u32 = 16000;
pub const DEFAULT_FRAME_SIZE: usize = 4096;
pub const DEFAULT_CHANNELS: u16 = 1;

/// Server namespace of the streaming endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Namespace {
    #[default]
    #[serde(rename = "/events")]
    Events,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Events => "/events",
        }
    }
}

/// Which transports the channel may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportPreference {
    /// Long-polling only
    Polling,
    WebSocket,
    /// Polling with automatic upgrade to WebSocket
    #[default]
    All,
}

impl TransportPreference {
    /// Candidate transports, in negotiation order
    pub fn candidates(&self) -> Vec<TransportKind> {
        match self {
            TransportPreference::Polling => vec![TransportKind::Polling],
            _ => vec![TransportKind::Polling, TransportKind::WebSocket],
        }
    }
}

/// Microphone settings as supplied by the caller. Omitted fields take defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MicConfigInput {
    pub sample_rate: Option<u32>,
    /// Frame size in samples
    pub chunk_size: Option<usize>,
    pub channels: Option<u16>,
}

/// Normalized microphone settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MicConfig {
    pub sample_rate: u32,
    pub frame_size: usize,
    pub channels: u16,
}

impl Default for MicConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_size: DEFAULT_FRAME_SIZE,
            channels: DEFAULT_CHANNELS,
        }
    }
}

impl From<&MicConfigInput> for MicConfig {
    fn from(input: &MicConfigInput) -> Self {
        Self {
            sample_rate: input.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE),
            frame_size: input.chunk_size.unwrap_or(DEFAULT_FRAME_SIZE),
            channels: input.channels.unwrap_or(DEFAULT_CHANNELS),
        }
    }
}

/// Configuration of a streaming session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    /// Service base URL, e.g. `https://api.example.com`
    pub base_url: String,
    pub namespace: Namespace,
    /// Bearer token
    pub bearer: String,
    /// Extra query parameters sent with the connection
    pub query_params: BTreeMap<String, String>,
    pub mic_config: MicConfigInput,
    pub transports: TransportPreference,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, bearer: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            bearer: bearer.into(),
            ..Default::default()
        }
    }

    /// Load a JSON config file
    pub fn load(path: &Path) -> Result<Self, ClientError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ClientError::new(
                ErrorKind::InvalidConfiguration,
                format!("Failed to read config {:?}: {}", path, e),
            )
            .with_cause(e)
        })?;

        serde_json::from_str::<ClientConfig>(&contents).map_err(|e| {
            ClientError::new(
                ErrorKind::InvalidConfiguration,
                format!("Failed to parse config {:?}: {}", path, e),
            )
            .with_cause(e)
        })
    }

    /// Fill an empty bearer from `SPEECHLINK_BEARER`
    pub fn with_env_bearer(mut self) -> Self {
        if self.bearer.is_empty() {
            if let Ok(token) = std::env::var(BEARER_ENV_VAR) {
                if !token.is_empty() {
                    self.bearer = token;
                }
            }
        }
        self
    }

    /// Microphone settings with defaults applied
    pub fn mic(&self) -> MicConfig {
        MicConfig::from(&self.mic_config)
    }

    /// Base URL joined with the namespace
    pub fn endpoint(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.namespace.as_str()
        )
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        let invalid = |msg: &str| ClientError::new(ErrorKind::InvalidConfiguration, msg);

        if self.base_url.trim().is_empty() {
            return Err(invalid("baseUrl is required"));
        }
        if self.bearer.trim().is_empty() {
            return Err(invalid("bearer is required"));
        }

        let mic = self.mic();
        if mic.sample_rate == 0 {
            return Err(invalid("micConfig.sampleRate must be positive"));
        }
        if mic.frame_size == 0 {
            return Err(invalid("micConfig.chunkSize must be positive"));
        }
        if mic.channels == 0 {
            return Err(invalid("micConfig.channels must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mic_defaults_fill_only_missing_fields() {
        let mut config = ClientConfig::new("http://test.com", "token");
        assert_eq!(config.mic(), MicConfig::default());

        config.mic_config.sample_rate = Some(48000);
        let mic = config.mic();
        assert_eq!(mic.sample_rate, 48000);
        assert_eq!(mic.frame_size, 4096);
        assert_eq!(mic.channels, 1);
    }

    #[test]
    fn test_transport_candidates() {
        assert_eq!(
            TransportPreference::Polling.candidates(),
            vec![TransportKind::Polling]
        );
        assert_eq!(
            TransportPreference::All.candidates(),
            vec![TransportKind::Polling, TransportKind::WebSocket]
        );
        assert_eq!(
            TransportPreference::WebSocket.candidates(),
            vec![TransportKind::Polling, TransportKind::WebSocket]
        );
    }

    #[test]
    fn test_endpoint_joins_namespace() {
        let config = ClientConfig::new("http://test.com/", "token");
        assert_eq!(config.endpoint(), "http://test.com/events");
    }

    #[test]
    fn test_validate() {
        assert!(ClientConfig::new("http://test.com", "token").validate().is_ok());

        let err = ClientConfig::new("", "token").validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);

        let err = ClientConfig::new("http://test.com", " ").validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);

        let mut config = ClientConfig::new("http://test.com", "token");
        config.mic_config.chunk_size = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_camel_case() {
        let json = r#"{
            "baseUrl": "https://api.test.com",
            "namespace": "/events",
            "bearer": "abc",
            "queryParams": { "flow_id": "f1" },
            "micConfig": { "chunkSize": 2048 },
            "transports": "polling"
        }"#;
        let config: ClientConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.base_url, "https://api.test.com");
        assert_eq!(config.query_params.get("flow_id"), Some(&"f1".to_string()));
        assert_eq!(config.transports, TransportPreference::Polling);
        assert_eq!(config.mic().frame_size, 2048);
        assert_eq!(config.mic().sample_rate, 16000);
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "baseUrl": "http://x", "bearer": "t" }}"#).unwrap();

        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.base_url, "http://x");
        assert_eq!(config.transports, TransportPreference::All);
    }

    #[test]
    fn test_load_invalid_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = ClientConfig::load(file.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    }
}
