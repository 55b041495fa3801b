use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let id = linkfeed_common::id::prefixed_ulid("usr");
/// assert!(id.starts_with("usr_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new().to_string())
}

/// Prefixes for the IDs this service mints itself.
pub mod prefix {
    pub const CONNECTION: &str = "conn";
    pub const NOTIFICATION: &str = "ntf";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_ulid_format() {
        let id = prefixed_ulid("conn");
        assert!(id.starts_with("conn_"));
        // ULID is 26 chars, plus prefix + underscore
        assert_eq!(id.len(), 5 + 26);
    }

    #[test]
    fn test_uniqueness() {
        let a = prefixed_ulid("ntf");
        let b = prefixed_ulid("ntf");
        assert_ne!(a, b);
    }
}
