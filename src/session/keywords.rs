//! Active keyword set and its synchronization with the server

use serde_json::Value;

use super::StreamingClient;
use crate::audio::Microphone;
use crate::error::{ClientError, ErrorKind};
use crate::streaming::protocol::EVENT_SET_KEYWORDS;
use crate::streaming::{Emit, Transport};

fn invalid_keywords() -> ClientError {
    ClientError::new(ErrorKind::Keywords, "Keywords must be a valid array")
}

impl<T: Transport, M: Microphone> StreamingClient<T, M> {
    /// Replace the active keyword set.
    ///
    /// An empty slice clears the set. Otherwise entries are trimmed and blank
    /// ones dropped; if none remain the call fails and the active set is left
    /// alone. The new set is stored before any network action, so a later
    /// connect republishes it. When connected the set is published as a JSON
    /// array and acknowledged through `on_keywords_set`.
    pub fn set_keywords<S: AsRef<str>>(&mut self, keywords: &[S]) -> Result<(), ClientError> {
        if keywords.is_empty() {
            self.keywords.clear();
            log::info!("Clearing keywords");
            return self.publish_keywords(Vec::new(), Vec::new(), false);
        }

        let valid: Vec<String> = keywords
            .iter()
            .map(|k| k.as_ref().trim())
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect();

        if valid.is_empty() {
            return Err(ClientError::new(
                ErrorKind::Keywords,
                "At least one valid keyword must be provided",
            ));
        }

        self.keywords = valid.clone();

        if !self.is_connected() {
            log::debug!("Stored {} keywords for the next connection", valid.len());
            return Ok(());
        }

        let payload = match serde_json::to_vec(&valid) {
            Ok(payload) => payload,
            Err(e) => {
                let error = ClientError::new(
                    ErrorKind::Keywords,
                    format!("Error emitting keywords: {}", e),
                )
                .with_cause(e);
                self.raise(error.clone());
                return Err(error);
            }
        };

        self.publish_keywords(valid, payload, true)
    }

    /// [`set_keywords`](Self::set_keywords) for untyped input: anything but
    /// an array of strings is rejected.
    pub fn set_keywords_json(&mut self, keywords: &Value) -> Result<(), ClientError> {
        let Value::Array(items) = keywords else {
            return Err(invalid_keywords());
        };
        let keywords = items
            .iter()
            .map(Value::as_str)
            .collect::<Option<Vec<&str>>>()
            .ok_or_else(invalid_keywords)?;
        self.set_keywords(&keywords)
    }

    /// Copy of the active keyword set
    pub fn get_active_keywords(&self) -> Vec<String> {
        self.keywords.clone()
    }

    fn publish_keywords(
        &mut self,
        keywords: Vec<String>,
        payload: Vec<u8>,
        watch_errors: bool,
    ) -> Result<(), ClientError> {
        let Some(connection) = self.connection.as_mut().filter(|c| c.connected) else {
            return Ok(());
        };

        let id = connection.next_ack_id;
        connection.next_ack_id += 1;

        match connection
            .channel
            .emit(Emit::with_ack(EVENT_SET_KEYWORDS, payload, id))
        {
            Ok(()) => {
                log::info!("Published {} keywords (ack {})", keywords.len(), id);
                connection.pending_acks.insert(id, keywords);
                if watch_errors {
                    connection.keyword_error_watch = true;
                }
                Ok(())
            }
            Err(e) => {
                let error = ClientError::new(
                    ErrorKind::Keywords,
                    format!("Error emitting keywords: {}", e),
                )
                .with_cause(e);
                self.raise(error.clone());
                Err(error)
            }
        }
    }

    /// Reply to a `set_keywords` publish: `{status: "received"}` or
    /// `{error: "..."}`
    pub(super) fn handle_keywords_ack(&mut self, id: u64, reply: Value) {
        let Some(keywords) = self
            .connection
            .as_mut()
            .and_then(|c| c.pending_acks.remove(&id))
        else {
            log::debug!("Ignoring unexpected ack {}", id);
            return;
        };

        let server_error = match reply.get("error") {
            None | Some(Value::Null) | Some(Value::Bool(false)) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        };

        if let Some(message) = server_error {
            log::error!("Server returned error: {}", message);
            self.raise(ClientError::new(
                ErrorKind::Keywords,
                format!("Server error: {}", message),
            ));
            return;
        }

        if reply.get("status").and_then(Value::as_str) == Some("received") {
            log::info!("Server acknowledged {} keywords", keywords.len());
            self.callbacks.keywords_set(&keywords);
        }
    }
}
