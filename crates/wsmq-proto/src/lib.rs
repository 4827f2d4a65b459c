//! # wsmq-proto
//!
//! Text protocol spoken between WebSocket clients and the wsmq gateway.
//!
//! Clients send one command per text frame:
//!
//! - `sub <topic>` subscribes the client's broker connection to `<topic>`
//! - `pub <topic> <payload>` publishes `<payload>` to `<topic>`
//!
//! The gateway answers with a plain text [`Reply`] and relays broker
//! deliveries as `rcv <topic> <payload>` (see [`InboundMessage`]).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod command;
pub mod error;
pub mod message;
pub mod reply;
pub mod topic;

pub use command::{Command, normalize_frame};
pub use error::{ProtoError, ProtoResult};
pub use message::InboundMessage;
pub use reply::Reply;
pub use topic::{MATCH_ALL, filter_matches, validate_filter, validate_topic};
