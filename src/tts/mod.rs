//! Text-to-speech over HTTP
//!
//! A request/response client: [`SpeechClient::synthesize`] returns the whole
//! audio body, [`SpeechClient::stream`] yields it chunk by chunk as it
//! arrives.

mod client;
mod voices;

pub use client::{SpeechClient, SpeechError};
pub use voices::{voice_id, Voice, VOICES};
