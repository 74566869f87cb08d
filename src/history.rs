use crate::equipment::UploadSession;
use crate::saving::{EquipmentStore, StoreError};

/// Number of sessions a history listing shows by default
pub const DEFAULT_HISTORY_LIMIT: usize = 5;

/// List a user's most recent upload sessions, newest first
///
/// This is a read-only query: sessions beyond `limit` are not deleted and
/// remain retrievable by id.
///
/// # Arguments
/// * `store` - Store to read from
/// * `user` - Owner whose sessions are listed
/// * `limit` - Maximum number of entries returned
///
/// # Returns
/// * `Result<Vec<UploadSession>, StoreError>` - At most `limit` sessions
pub fn list_recent(
    store: &EquipmentStore,
    user: &str,
    limit: usize,
) -> Result<Vec<UploadSession>, StoreError> {
    Ok(order_recent(store.sessions_for(user)?, limit))
}

/// Sort sessions by recency and keep the first `limit`
///
/// Newer `uploaded_at` first; equal timestamps fall back to the higher id
/// (later insertion) first.
pub fn order_recent(mut sessions: Vec<UploadSession>, limit: usize) -> Vec<UploadSession> {
    sessions.sort_by(|a, b| {
        b.uploaded_at
            .cmp(&a.uploaded_at)
            .then_with(|| b.id.cmp(&a.id))
    });
    sessions.truncate(limit);
    sessions
}
