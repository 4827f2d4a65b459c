//! MQTT topic names and subscription filters.
//!
//! Levels are separated by `/`. In filters, `+` matches exactly one level
//! and `#` matches any number of trailing levels (including the parent).
//! Topics beginning with `$` are never matched by a leading wildcard.

use crate::error::{ProtoError, ProtoResult};

/// Filter that matches every non-system topic.
pub const MATCH_ALL: &str = "#";

/// Maximum topic length in bytes allowed by MQTT.
pub const MAX_TOPIC_LEN: usize = 65_535;

const LEVEL_SEPARATOR: char = '/';
const SINGLE_LEVEL: &str = "+";
const MULTI_LEVEL: &str = "#";

fn check_common(value: &str) -> ProtoResult<()> {
    if value.is_empty() {
        return Err(ProtoError::EmptyTopic);
    }
    if value.len() > MAX_TOPIC_LEN {
        return Err(ProtoError::TopicTooLong {
            len: value.len(),
            limit: MAX_TOPIC_LEN,
        });
    }
    if value.contains('\0') {
        return Err(ProtoError::NulCharacter);
    }
    Ok(())
}

/// Validate a topic name used for publishing.
pub fn validate_topic(topic: &str) -> ProtoResult<()> {
    check_common(topic)?;
    if topic.contains(['+', '#']) {
        return Err(ProtoError::WildcardInTopic(topic.to_string()));
    }
    Ok(())
}

/// Validate a subscription filter.
pub fn validate_filter(filter: &str) -> ProtoResult<()> {
    check_common(filter)?;

    let mut levels = filter.split(LEVEL_SEPARATOR).peekable();
    while let Some(level) = levels.next() {
        let is_last = levels.peek().is_none();
        if level.contains('#') && (level != MULTI_LEVEL || !is_last) {
            return Err(ProtoError::InvalidWildcard(filter.to_string()));
        }
        if level.contains('+') && level != SINGLE_LEVEL {
            return Err(ProtoError::InvalidWildcard(filter.to_string()));
        }
    }
    Ok(())
}

/// Check whether a topic name matches a subscription filter.
///
/// The filter is assumed to be valid; invalid filters simply fail to match.
#[must_use]
pub fn filter_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split(LEVEL_SEPARATOR);
    let mut topic_levels = topic.split(LEVEL_SEPARATOR);

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some(MULTI_LEVEL), _) => return true,
            (Some(SINGLE_LEVEL), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
