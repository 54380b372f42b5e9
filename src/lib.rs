//! Client SDK for streaming microphone audio to a speech-recognition service
//! and for text-to-speech.
//!
//! # Streaming recognition
//!
//! ```ignore
//! use speechlink::{Callbacks, ClientConfig, StreamingClient};
//!
//! let config = ClientConfig::new("https://api.example.com", "token");
//! let callbacks = Callbacks::new()
//!     .on_transcript(|data| log::info!("transcript: {}", data))
//!     .on_error(|e| log::error!("{}", e));
//!
//! let mut client = StreamingClient::with_defaults(config, callbacks)?;
//! client.set_keywords(&["invoice", "purchase order"])?;
//! client.connect(true);
//! client.run().await;
//! ```
//!
//! # Text-to-speech
//!
//! ```ignore
//! let tts = speechlink::SpeechClient::new("https://api.example.com", "token");
//! let audio = tts.synthesize("Hello", Some("af_bella")).await?;
//! ```

pub mod audio;
mod callbacks;
pub mod config;
mod error;
mod session;
pub mod streaming;
pub mod tts;

pub use callbacks::Callbacks;
pub use config::{ClientConfig, MicConfig, MicConfigInput, Namespace, TransportPreference};
pub use error::{ClientError, ErrorKind};
pub use session::StreamingClient;
pub use streaming::TransportKind;
pub use tts::{SpeechClient, SpeechError};

/// Version of this SDK
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
