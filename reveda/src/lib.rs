pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod identifiers;
pub mod models;
pub mod session;

pub use client::{ApiClient, ApiMethod, FilePart, PendingRequest, RequestBody};
pub use config::{ApiConfig, Platform};
pub use error::{ApiError, ApiResult};
pub use models::*;
pub use session::{FileBackend, MemoryBackend, SessionBackend, SessionStore, StoredSession};

/// Helper to generate the current UNIX timestamp (seconds, UTC).
pub fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[test]
fn test_unix_now() {
    // after 2023-01-01T00:00:00Z
    assert!(unix_now() > 1_672_531_200);
}
