use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub const ARTIFACT_SCHEME: &str = "artifact";

/// Revocable reference the presentation layer uses to render a blob.
///
/// Ids are never reused, so a stale handle can only ever miss; it cannot
/// resolve to (or revoke) a resource registered after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisplayHandle(u64);

impl DisplayHandle {
    pub fn id(&self) -> u64 {
        self.0
    }

    pub fn url(&self) -> String {
        format!("{}://localhost/{}", ARTIFACT_SCHEME, self.0)
    }

    /// Parses the path component of an `artifact://` url (`/42` or `42`).
    pub fn from_path(path: &str) -> Option<Self> {
        path.trim_start_matches('/')
            .trim_end_matches('/')
            .parse::<u64>()
            .ok()
            .map(DisplayHandle)
    }
}

impl fmt::Display for DisplayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url())
    }
}

#[derive(Debug, Default)]
pub struct ResourceLedger {
    live: HashMap<DisplayHandle, Bytes>,
    next_id: u64,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a live handle for `bytes`. Empty or undecodable payloads still
    /// get a handle; rendering them is the presentation layer's problem.
    pub fn register(&mut self, bytes: Bytes) -> DisplayHandle {
        self.next_id += 1;
        let handle = DisplayHandle(self.next_id);
        log::debug!("registered {} ({} bytes)", handle, bytes.len());
        self.live.insert(handle, bytes);
        handle
    }

    /// Releases `handle`. Returns whether it was still live.
    pub fn revoke(&mut self, handle: DisplayHandle) -> bool {
        let released = self.live.remove(&handle).is_some();
        if released {
            log::debug!("revoked {}", handle);
        }
        released
    }

    pub fn revoke_all<I>(&mut self, handles: I) -> usize
    where
        I: IntoIterator<Item = DisplayHandle>,
    {
        handles
            .into_iter()
            .filter(|handle| self.revoke(*handle))
            .count()
    }

    pub fn resolve(&self, handle: DisplayHandle) -> Option<&Bytes> {
        self.live.get(&handle)
    }

    pub fn is_live(&self, handle: DisplayHandle) -> bool {
        self.live.contains_key(&handle)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_hands_out_distinct_live_handles() {
        let mut ledger = ResourceLedger::new();
        let a = ledger.register(Bytes::from_static(b"a"));
        let b = ledger.register(Bytes::from_static(b"b"));

        assert_ne!(a, b);
        assert_eq!(ledger.live_count(), 2);
        assert_eq!(ledger.resolve(a).map(|bytes| bytes.as_ref()), Some(&b"a"[..]));
        assert_eq!(ledger.resolve(b).map(|bytes| bytes.as_ref()), Some(&b"b"[..]));
    }

    #[test]
    fn double_revoke_leaves_other_handles_alone() {
        let mut ledger = ResourceLedger::new();
        let first = ledger.register(Bytes::from_static(b"first"));
        assert!(ledger.revoke(first));

        let second = ledger.register(Bytes::from_static(b"second"));
        assert!(!ledger.revoke(first));

        assert!(ledger.is_live(second));
        assert!(!ledger.is_live(first));
        assert_eq!(ledger.live_count(), 1);
    }

    #[test]
    fn revoke_all_counts_only_live_handles() {
        let mut ledger = ResourceLedger::new();
        let a = ledger.register(Bytes::new());
        let b = ledger.register(Bytes::new());
        ledger.revoke(a);

        assert_eq!(ledger.revoke_all([a, b]), 1);
        assert_eq!(ledger.live_count(), 0);
    }

    #[test]
    fn empty_payload_still_gets_a_handle() {
        let mut ledger = ResourceLedger::new();
        let handle = ledger.register(Bytes::new());
        assert!(ledger.is_live(handle));
        assert_eq!(ledger.resolve(handle).map(|bytes| bytes.len()), Some(0));
    }

    #[test]
    fn handle_url_round_trips_through_path() {
        let mut ledger = ResourceLedger::new();
        let handle = ledger.register(Bytes::from_static(b"x"));

        assert_eq!(handle.url(), format!("artifact://localhost/{}", handle.id()));
        assert_eq!(DisplayHandle::from_path(&format!("/{}", handle.id())), Some(handle));
        assert_eq!(DisplayHandle::from_path("/not-a-number"), None);
    }
}
