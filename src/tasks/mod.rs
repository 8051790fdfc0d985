pub mod background_sync;

pub use background_sync::{BackgroundSync, SyncHandle, SyncSignal, SyncStats, SYNC_TAG};
