//! Conflict detection and resolution.
//!
//! The policy is whole-document last-write-wins on `updatedAt`. Ties favor
//! the copy already in hand.

use serde_json::{Map, Value};

use crate::normalize::timestamp_from_value;

/// Fields of which a remote document must expose at least one.
const ENVELOPE_MARKERS: [&str; 4] = ["version", "updatedAt", "blocks", "modeOrders"];

/// Outcome of comparing a local copy with a remote copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Keep the local copy.
    PreferLocal,
    /// Replace the local copy with the remote one.
    PreferRemote,
}

/// Verdict of the guard read done before a remote write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteGuard {
    /// No newer remote copy; the write may go ahead.
    Proceed,
    /// The remote copy is newer; the write must be skipped.
    SkipNewerRemote { remote_updated_at: i64 },
}

/// Structural check of a fetched remote document.
///
/// Returns the document fields when the payload is a non-empty object
/// exposing at least one envelope marker; anything else counts as absent.
pub fn validate_remote(remote: Option<&Value>) -> Option<&Map<String, Value>> {
    let fields = remote?.as_object()?;
    if fields.is_empty() || !ENVELOPE_MARKERS.iter().any(|m| fields.contains_key(*m)) {
        return None;
    }
    Some(fields)
}

/// `updatedAt` of a structurally valid remote document.
pub fn remote_updated_at(remote: Option<&Value>) -> Option<i64> {
    validate_remote(remote)?
        .get("updatedAt")
        .and_then(timestamp_from_value)
}

/// True iff the remote payload is valid and strictly newer than the local copy.
pub fn should_prefer_remote(local_updated_at: i64, remote: Option<&Value>) -> bool {
    remote_updated_at(remote).is_some_and(|remote_ts| remote_ts > local_updated_at)
}

/// Decide which copy of a document wins.
///
/// A missing local copy loses to any valid remote copy.
pub fn resolve(local_updated_at: Option<i64>, remote: Option<&Value>) -> Resolution {
    let prefer_remote = match local_updated_at {
        Some(local_ts) => should_prefer_remote(local_ts, remote),
        None => validate_remote(remote).is_some(),
    };

    if prefer_remote {
        Resolution::PreferRemote
    } else {
        Resolution::PreferLocal
    }
}

/// Guard a remote write stamped `save_timestamp` against the current remote copy.
pub fn guard_write(save_timestamp: i64, remote: Option<&Value>) -> WriteGuard {
    match remote_updated_at(remote) {
        Some(remote_updated_at) if remote_updated_at > save_timestamp => {
            WriteGuard::SkipNewerRemote { remote_updated_at }
        }
        _ => WriteGuard::Proceed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const T: i64 = 1_000;

    #[test]
    fn test_prefer_remote_only_when_strictly_newer() {
        assert!(should_prefer_remote(T, Some(&json!({"updatedAt": T + 1}))));
        assert!(!should_prefer_remote(T, Some(&json!({"updatedAt": T}))));
        assert!(!should_prefer_remote(T, Some(&json!({"updatedAt": T - 1}))));
    }

    #[test]
    fn test_invalid_remote_is_absent() {
        for remote in [
            json!(null),
            json!({}),
            json!([{"updatedAt": T + 1}]),
            json!({"foo": 1, "bar": T + 1}),
            json!("updatedAt"),
        ] {
            assert!(!should_prefer_remote(T, Some(&remote)), "{remote} preferred");
        }
        assert!(!should_prefer_remote(T, None));
    }

    #[test]
    fn test_valid_remote_without_timestamp_never_wins() {
        let remote = json!({"blocks": []});
        assert!(validate_remote(Some(&remote)).is_some());
        assert!(!should_prefer_remote(T, Some(&remote)));
    }

    #[test]
    fn test_resolve_missing_local() {
        assert_eq!(resolve(None, Some(&json!({"blocks": []}))), Resolution::PreferRemote);
        assert_eq!(resolve(None, Some(&json!({"junk": 1}))), Resolution::PreferLocal);
        assert_eq!(resolve(Some(T), Some(&json!({"updatedAt": T}))), Resolution::PreferLocal);
    }

    #[test]
    fn test_guard_write() {
        assert_eq!(guard_write(1000, Some(&json!({"updatedAt": 900}))), WriteGuard::Proceed);
        assert_eq!(guard_write(1000, Some(&json!({"updatedAt": 1000}))), WriteGuard::Proceed);
        assert_eq!(
            guard_write(1000, Some(&json!({"updatedAt": 1500}))),
            WriteGuard::SkipNewerRemote {
                remote_updated_at: 1500
            }
        );
        assert_eq!(guard_write(1000, None), WriteGuard::Proceed);
    }
}
