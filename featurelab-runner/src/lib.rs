//! FeatureLab Runner — persistence around the core resolver.
//!
//! This crate builds on `featurelab-core` to provide:
//! - Named CSV snapshots of feature tables (export, load, list, info)
//! - Left joins of an arbitrary dated CSV with a snapshot

pub mod snapshot;

pub use snapshot::{SnapshotError, SnapshotInfo, SnapshotStore, SNAPSHOT_PREFIX};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn snapshot_store_is_send_sync() {
        assert_send::<SnapshotStore>();
        assert_sync::<SnapshotStore>();
        assert_send::<SnapshotInfo>();
        assert_sync::<SnapshotInfo>();
    }
}
