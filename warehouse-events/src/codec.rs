//! Wire encoding for mutation events.
//!
//! Events are JSON on the wire. Decoding checks that the event kind matches
//! the topic it arrived on and re-validates product fields; any failure is
//! a [`CodecError`], which consumers treat as a poison message.

use warehouse_core::CodecError;

use crate::event::{MutationEvent, MutationKind};

/// Encode an event for publishing.
pub fn encode(event: &MutationEvent) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(event).map_err(|e| CodecError::Encode {
        reason: e.to_string(),
    })
}

/// Decode an event delivered on `topic`.
pub fn decode(topic: &str, payload: &[u8]) -> Result<MutationEvent, CodecError> {
    let event: MutationEvent = serde_json::from_slice(payload).map_err(|e| CodecError::Decode {
        reason: e.to_string(),
    })?;

    if MutationKind::from_topic(topic) != Some(event.kind()) {
        return Err(CodecError::TopicMismatch {
            topic: topic.to_string(),
            found: event.kind().to_string(),
        });
    }

    event.mutation.validate().map_err(|e| CodecError::Decode {
        reason: e.to_string(),
    })?;

    Ok(event)
}
