//! Transport message types.

use std::collections::HashMap;

use bytes::Bytes;
use mcpload_protocol::{JsonRpcMessage, MessageId};
use serde::{Deserialize, Serialize};

use crate::error::{TransportError, TransportResult};

/// One serialized JSON-RPC message travelling over a transport.
#[derive(Debug, Clone)]
pub struct TransportMessage {
    /// Correlation id of the message; `None` for notifications.
    pub id: Option<MessageId>,

    /// The JSON payload of the message.
    pub payload: Bytes,

    /// Metadata associated with the message.
    pub metadata: TransportMessageMetadata,
}

impl TransportMessage {
    /// Creates a new `TransportMessage` with a given id and payload.
    pub fn new(id: Option<MessageId>, payload: Bytes) -> Self {
        Self {
            id,
            payload,
            metadata: TransportMessageMetadata::default(),
        }
    }

    /// Serializes a JSON-RPC message, carrying its id alongside.
    pub fn from_jsonrpc(message: &JsonRpcMessage) -> TransportResult<Self> {
        let payload = serde_json::to_vec(message)?;
        Ok(Self::new(message.id().cloned(), Bytes::from(payload))
            .with_content_type("application/json"))
    }

    /// Wraps raw inbound bytes, extracting the id without a full decode.
    ///
    /// Fails when the payload is not a JSON object.
    pub fn from_payload(payload: Bytes) -> TransportResult<Self> {
        let value: serde_json::Value = serde_json::from_slice(&payload)?;
        let object = value.as_object().ok_or_else(|| {
            TransportError::ProtocolError("JSON-RPC message must be an object".to_string())
        })?;
        let id = object
            .get("id")
            .and_then(|id| serde_json::from_value::<MessageId>(id.clone()).ok());
        Ok(Self::new(id, payload))
    }

    /// Decodes the payload as a JSON-RPC message.
    pub fn to_jsonrpc(&self) -> TransportResult<JsonRpcMessage> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Sets the payload content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.metadata.content_type = Some(content_type.into());
        self
    }

    /// Returns the size of the message payload in bytes.
    pub const fn size(&self) -> usize {
        self.payload.len()
    }

    /// Returns the content type of the message, if specified.
    pub fn content_type(&self) -> Option<&str> {
        self.metadata.content_type.as_deref()
    }
}

/// Metadata associated with a `TransportMessage`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportMessageMetadata {
    /// The MIME type of the message payload (e.g., "application/json").
    pub content_type: Option<String>,

    /// SSE event id the message arrived with, if any.
    pub event_id: Option<String>,

    /// Extra transport-specific headers.
    pub headers: HashMap<String, String>,
}
