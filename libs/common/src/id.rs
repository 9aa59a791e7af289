use ulid::Ulid;

/// Length of a ULID in its canonical Crockford base32 form.
const ULID_LEN: usize = 26;

/// Generates a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let id = roomcast_common::id::prefixed_ulid("conn");
/// assert!(id.starts_with("conn_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}

/// Returns true when `id` is `<prefix>_<ulid>` with a well-formed ULID.
pub fn has_prefix(id: &str, prefix: &str) -> bool {
    id.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|ulid| ulid.len() == ULID_LEN && Ulid::from_string(ulid).is_ok())
}

/// Marker trait for types that represent a prefixed ID.
pub trait PrefixedId {
    const PREFIX: &'static str;

    fn generate() -> String {
        prefixed_ulid(Self::PREFIX)
    }

    fn is_valid(id: &str) -> bool {
        has_prefix(id, Self::PREFIX)
    }
}

/// Well-known ID prefixes.
pub mod prefix {
    /// One live WebSocket connection.
    pub const CONNECTION: &str = "conn";
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe;

    impl PrefixedId for Probe {
        const PREFIX: &'static str = "probe";
    }

    #[test]
    fn prefixed_ulid_format() {
        let id = prefixed_ulid(prefix::CONNECTION);
        assert!(id.starts_with("conn_"));
        assert_eq!(id.len(), "conn_".len() + ULID_LEN);
    }

    #[test]
    fn ids_are_unique() {
        let a = prefixed_ulid("conn");
        let b = prefixed_ulid("conn");
        assert_ne!(a, b);
    }

    #[test]
    fn has_prefix_checks_both_halves() {
        let id = prefixed_ulid("conn");
        assert!(has_prefix(&id, "conn"));
        assert!(!has_prefix(&id, "con"));
        assert!(!has_prefix("conn_not-a-ulid", "conn"));
        assert!(!has_prefix("conn", "conn"));
    }

    #[test]
    fn trait_generates_valid_ids() {
        let id = Probe::generate();
        assert!(Probe::is_valid(&id));
        assert!(!Probe::is_valid(&prefixed_ulid("other")));
    }
}
