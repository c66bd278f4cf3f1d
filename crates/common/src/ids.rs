//! Trace id minting
//!
//! A trace id is a 32-character process-unique, collision-resistant
//! identifier threaded through one request's lifecycle.

use uuid::Uuid;

/// Mint a 32-character lowercase hex trace id
///
/// Safe for concurrent use; uniqueness comes from UUIDv4 randomness.
pub fn trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}
