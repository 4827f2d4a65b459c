//! Messages delivered by the broker.

use std::fmt;

/// One message received from the broker on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message was published on.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

impl InboundMessage {
    /// Create a new inbound message.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Payload decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Render the message as the text frame sent to WebSocket clients.
    #[must_use]
    pub fn render(&self) -> String {
        self.to_string()
    }

    /// Render the message in the monitor's `topic:payload` form.
    #[must_use]
    pub fn render_monitor_line(&self) -> String {
        format!("{}:{}", self.topic, self.payload_text())
    }
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rcv {} {}", self.topic, String::from_utf8_lossy(&self.payload))
    }
}
