use serde::{Deserialize, Serialize};

use crate::code::SessionCode;
use crate::constants::RelayEvent;
use crate::messages::{SessionErrorKind, SessionErrorPayload};

/// Envelope for all relay communication.
///
/// The `payload` field uses `serde_json::value::RawValue` so the relay can
/// forward offers, answers and candidates without decoding them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub event: RelayEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<SessionCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<serde_json::value::RawValue>>,
}

impl Message {
    /// Creates a new message with the given event, code and payload.
    pub fn new<T: Serialize>(
        event: RelayEvent,
        code: Option<SessionCode>,
        payload: Option<&T>,
    ) -> Result<Self, serde_json::Error> {
        let raw = match payload {
            Some(p) => {
                let json = serde_json::to_string(p)?;
                Some(serde_json::value::RawValue::from_string(json)?)
            }
            None => None,
        };
        Ok(Self {
            event,
            code,
            payload: raw,
        })
    }

    /// Creates a payload-less message.
    pub fn bare(event: RelayEvent, code: Option<SessionCode>) -> Self {
        Self {
            event,
            code,
            payload: None,
        }
    }

    /// Deserializes the payload into the given type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(
        &self,
    ) -> Result<Option<T>, serde_json::Error> {
        match &self.payload {
            Some(raw) => Ok(Some(serde_json::from_str(raw.get())?)),
            None => Ok(None),
        }
    }

    /// Creates a `session-error` message.
    pub fn session_error(
        code: Option<SessionCode>,
        kind: SessionErrorKind,
        reason: impl Into<String>,
    ) -> Self {
        let payload = SessionErrorPayload {
            kind,
            reason: reason.into(),
        };
        // A two-field struct of plain strings always serializes.
        Self::new(RelayEvent::SessionError, code.clone(), Some(&payload))
            .unwrap_or_else(|_| Self::bare(RelayEvent::SessionError, code))
    }

    /// Serializes the envelope to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
