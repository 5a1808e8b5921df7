use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let id = campus_common::id::prefixed_ulid("ws");
/// assert!(id.starts_with("ws_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}

/// Marker trait for types that carry a prefixed ID.
pub trait PrefixedId {
    const PREFIX: &'static str;

    fn generate_id() -> String {
        prefixed_ulid(Self::PREFIX)
    }
}

/// Well-known ID prefixes.
pub mod prefix {
    /// Live chat connection.
    pub const CHAT_SESSION: &str = "ws";
}
