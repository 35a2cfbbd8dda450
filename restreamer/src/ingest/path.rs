//! Ingest path routing.

/// Extract the routing key from a session path.
///
/// The key is the final `/`-delimited segment after the configured mount
/// root. A path that does not start with the mount root is rejected, as are
/// empty or missing segments.
pub fn extract_routing_key<'a>(path: &'a str, mount_root: &str) -> Option<&'a str> {
    let remainder = path.strip_prefix(mount_root)?;

    // The mount root must end at a path boundary: "/ingestx/key" is not
    // under "/ingest".
    if !remainder.is_empty() && !remainder.starts_with('/') {
        return None;
    }

    let key = remainder.trim_matches('/').rsplit('/').next()?;
    if key.is_empty() { None } else { Some(key) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_trailing_segment() {
        assert_eq!(extract_routing_key("/ingest/abc123", "/ingest"), Some("abc123"));
    }

    #[test]
    fn test_tolerates_trailing_slash() {
        assert_eq!(extract_routing_key("/ingest/abc123/", "/ingest"), Some("abc123"));
    }

    #[test]
    fn test_nested_path_uses_last_segment() {
        assert_eq!(extract_routing_key("/ingest/a/b/key", "/ingest"), Some("key"));
    }

    #[test]
    fn test_missing_key_is_rejected() {
        assert_eq!(extract_routing_key("/ingest", "/ingest"), None);
        assert_eq!(extract_routing_key("/ingest/", "/ingest"), None);
    }

    #[test]
    fn test_wrong_mount_root_is_rejected() {
        assert_eq!(extract_routing_key("/watch/abc123", "/ingest"), None);
        assert_eq!(extract_routing_key("abc123", "/ingest"), None);
        assert_eq!(extract_routing_key("", "/ingest"), None);
    }

    #[test]
    fn test_prefix_must_end_at_boundary() {
        assert_eq!(extract_routing_key("/ingestx/abc123", "/ingest"), None);
    }
}
