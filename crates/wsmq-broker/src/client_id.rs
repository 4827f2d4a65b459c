//! Broker client identifier generation.

use rand::Rng;
use rand::distributions::Alphanumeric;

/// Longest client identifier every MQTT 3.1.1 broker must accept.
pub const MAX_CLIENT_ID_LEN: usize = 23;

/// Number of random characters appended to the prefix.
pub const RANDOM_SUFFIX_LEN: usize = 12;

/// Generate a client identifier: `prefix` followed by random alphanumerics.
///
/// The prefix is truncated so the whole identifier stays within
/// [`MAX_CLIENT_ID_LEN`]. Non-ASCII characters in the prefix are dropped
/// since brokers are only required to accept `[0-9a-zA-Z]`.
#[must_use]
pub fn generate_client_id(prefix: &str) -> String {
    let max_prefix = MAX_CLIENT_ID_LEN - RANDOM_SUFFIX_LEN;
    let mut id: String = prefix
        .chars()
        .filter(char::is_ascii)
        .take(max_prefix)
        .collect();

    let suffix = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_SUFFIX_LEN)
        .map(char::from);
    id.extend(suffix);
    id
}
