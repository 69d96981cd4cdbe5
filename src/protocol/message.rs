//! Inbound message and notification payload types.
//!
//! A [`Message`] is what subscription handlers receive. The personal
//! notifications destination additionally decodes its payload into a
//! [`Notification`].

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

use super::frame::{Frame, FrameCommand};

// ============================================================================
// Message
// ============================================================================

/// A message pushed by the broker on a subscribed destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Destination the message was published to.
    pub destination: String,
    /// Raw payload.
    pub payload: Vec<u8>,
    /// All frame headers.
    pub headers: FxHashMap<String, String>,
}

impl Message {
    /// Builds a message from a MESSAGE frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the frame is not a MESSAGE or has no
    /// `destination` header.
    pub fn from_frame(frame: Frame) -> Result<Self> {
        if frame.command != FrameCommand::Message {
            return Err(Error::protocol(format!(
                "Expected MESSAGE frame, got {}",
                frame.command
            )));
        }

        let destination = frame
            .header("destination")
            .ok_or_else(|| Error::protocol("MESSAGE frame without destination header"))?
            .to_string();

        let mut headers = FxHashMap::default();
        for (name, value) in frame.headers {
            headers.entry(name).or_insert(value);
        }

        Ok(Self {
            destination,
            payload: frame.body,
            headers,
        })
    }

    /// Returns a header value.
    #[inline]
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Returns the wire subscription id the broker delivered this on.
    #[inline]
    #[must_use]
    pub fn subscription(&self) -> Option<&str> {
        self.header("subscription")
    }

    /// Returns the payload as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Payload`] if the payload is not valid UTF-8.
    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.payload)
            .map_err(|e| Error::payload(&self.destination, e.to_string()))
    }

    /// Deserializes the JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Payload`] if the payload is not the expected JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| Error::payload(&self.destination, e.to_string()))
    }
}

// ============================================================================
// Notification
// ============================================================================

/// A personal notification record.
///
/// # Format
///
/// ```json
/// {
///   "id": "42",
///   "type": "TASK_ASSIGNED",
///   "title": "New assignment",
///   "message": "You were assigned to \"Fix login\"",
///   "taskId": "7",
///   "projectId": "3",
///   "createdAt": "2026-10-18T09:00:00Z"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Server-side notification id.
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,

    /// Notification kind (e.g. `TASK_ASSIGNED`).
    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    /// Optional short title.
    #[serde(default)]
    pub title: Option<String>,

    /// Human-readable text.
    pub message: String,

    /// Related task, if any.
    #[serde(default, deserialize_with = "string_or_number")]
    pub task_id: Option<String>,

    /// Related project, if any.
    #[serde(default, deserialize_with = "string_or_number")]
    pub project_id: Option<String>,

    /// Creation timestamp as sent by the server.
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Notification {
    /// Decodes a notification from a message payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Payload`] if the payload is not a notification
    /// object or its message is blank.
    pub fn from_message(message: &Message) -> Result<Self> {
        let notification: Self = message.json()?;
        if notification.message.trim().is_empty() {
            return Err(Error::payload(
                &message.destination,
                "notification message is empty",
            ));
        }
        Ok(notification)
    }

    /// Returns the text shown to the user.
    #[must_use]
    pub fn summary(&self) -> String {
        match self.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => format!("{title}: {}", self.message.trim()),
            _ => self.message.trim().to_string(),
        }
    }
}

/// Accepts ids sent either as JSON strings or numbers.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    }))
}

// ============================================================================
// Tests
// ============================================================================
