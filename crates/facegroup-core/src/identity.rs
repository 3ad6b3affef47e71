//! User identifier normalization.

use uuid::Uuid;

/// Coerce a caller-supplied user identifier into a UUID.
///
/// Anything that parses as a UUID is used as-is. Any other string maps to a
/// name-based (v5) UUID in the DNS namespace, so the same string always
/// yields the same identifier.
pub fn normalize_user_id(raw: &str) -> Uuid {
    match Uuid::parse_str(raw) {
        Ok(id) => id,
        Err(_) => Uuid::new_v5(&Uuid::NAMESPACE_DNS, raw.as_bytes()),
    }
}
