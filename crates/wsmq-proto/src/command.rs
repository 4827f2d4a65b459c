//! Client command parsing.
//!
//! A command is one line of text: a verb, a single space, and the rest of
//! the line. Only the first space separates the verb; everything after it
//! belongs to the arguments.

/// Verb for subscribe commands.
pub const SUBSCRIBE_VERB: &str = "sub";

/// Verb for publish commands.
pub const PUBLISH_VERB: &str = "pub";

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `sub <topic>`: subscribe to a topic filter.
    Subscribe {
        /// Topic filter, taken verbatim from the rest of the line.
        topic: String,
    },
    /// `pub <topic> <payload>`: publish a payload.
    Publish {
        /// Destination topic (never contains a space).
        topic: String,
        /// Payload text, may contain spaces.
        payload: String,
    },
    /// `pub` with no payload after the topic.
    PublishMissingPayload,
    /// Any verb other than `sub` or `pub`.
    Unrecognized {
        /// The verb that was not understood.
        verb: String,
    },
}

impl Command {
    /// Parse a normalized line into a command.
    ///
    /// Parsing never fails: unknown input becomes [`Command::Unrecognized`].
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));

        match verb {
            SUBSCRIBE_VERB => Self::Subscribe {
                topic: rest.to_string(),
            },
            PUBLISH_VERB => parse_publish(rest),
            other => Self::Unrecognized {
                verb: other.to_string(),
            },
        }
    }

    /// Whether executing this command calls the broker.
    #[must_use]
    pub const fn needs_broker(&self) -> bool {
        matches!(self, Self::Subscribe { .. } | Self::Publish { .. })
    }
}

fn parse_publish(rest: &str) -> Command {
    match rest.trim().split_once(' ') {
        Some((topic, payload)) => Command::Publish {
            topic: topic.to_string(),
            payload: payload.to_string(),
        },
        None => Command::PublishMissingPayload,
    }
}

/// Normalize a raw text frame into a single command line.
///
/// Embedded newlines become spaces and surrounding whitespace is trimmed.
#[must_use]
pub fn normalize_frame(text: &str) -> String {
    text.replace('\n', " ").trim().to_string()
}
