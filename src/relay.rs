//! Relay frame schema and room topic naming.
//!
//! Dispatched bodies are JSON frames `{room, event, payload}`. `join` and
//! `leave` manage a session's room membership; any other event is fanned out
//! on the room's bus topic to every member session except the sender.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Event that subscribes the dispatching session to a room.
pub const JOIN_EVENT: &str = "join";
/// Event that drops the dispatching session from a room.
pub const LEAVE_EVENT: &str = "leave";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(String),

    #[error("frame room name is empty")]
    EmptyRoom,
}

/// One relay frame, as posted by a client and as buffered for delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub room: String,
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Frame {
    pub fn parse(body: &str) -> Result<Self, FrameError> {
        let frame: Frame =
            serde_json::from_str(body).map_err(|e| FrameError::Json(e.to_string()))?;
        if frame.room.is_empty() {
            return Err(FrameError::EmptyRoom);
        }
        Ok(frame)
    }

    /// Canonical encoding used for room fan-out and client delivery.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Bus topic carrying a room's traffic.
pub fn room_topic(room: &str) -> String {
    format!("room:{room}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_frame() {
        let frame = Frame::parse(r#"{"room":"lobby","event":"msg","payload":{"body":"hi"}}"#)
            .unwrap();
        assert_eq!(frame.room, "lobby");
        assert_eq!(frame.event, "msg");
        assert_eq!(frame.payload["body"], "hi");
    }

    #[test]
    fn payload_is_optional() {
        let frame = Frame::parse(r#"{"room":"lobby","event":"join"}"#).unwrap();
        assert!(frame.payload.is_null());
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(matches!(Frame::parse("not json"), Err(FrameError::Json(_))));
        assert!(matches!(Frame::parse("{}"), Err(FrameError::Json(_))));
    }

    #[test]
    fn rejects_empty_room() {
        assert_eq!(
            Frame::parse(r#"{"room":"","event":"msg"}"#).unwrap_err(),
            FrameError::EmptyRoom
        );
    }

    #[test]
    fn encode_round_trips() {
        let frame = Frame::parse(r#"{"room":"a","event":"msg","payload":1}"#).unwrap();
        let again = Frame::parse(&frame.encode()).unwrap();
        assert_eq!(again.room, "a");
        assert_eq!(again.payload, serde_json::json!(1));
    }

    #[test]
    fn room_topic_naming() {
        assert_eq!(room_topic("lobby"), "room:lobby");
    }
}
