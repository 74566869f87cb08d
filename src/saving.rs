use bincode::{deserialize_from, serialize_into};
use chrono::Utc;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, create_dir_all};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::equipment::{EquipmentDraft, EquipmentRecord, UploadSession};
use crate::summary::summarize;

lazy_static! {
    static ref SAFE_USERNAME: Regex = Regex::new(r"^[A-Za-z0-9_.@+-]{1,150}$").unwrap();
}

const SESSIONS_DIR: &str = "sessions";
const SESSION_SUFFIX: &str = ".bin.gz";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session {0} not found")]
    NotFound(u64),

    #[error("invalid user name {0:?}")]
    InvalidUser(String),

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt session file {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("store lock poisoned")]
    Poisoned,
}

/// Which session a read refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionSelector {
    /// The user's most recently created session
    Latest,
    /// A specific session, which must belong to the requesting user
    Id(u64),
}

impl From<Option<u64>> for SessionSelector {
    fn from(id: Option<u64>) -> Self {
        match id {
            Some(id) => SessionSelector::Id(id),
            None => SessionSelector::Latest,
        }
    }
}

/// A session together with its records, in file order
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub session: UploadSession,
    pub records: Vec<EquipmentRecord>,
}

#[derive(Debug, Clone, Copy)]
struct IdCounters {
    next_session: u64,
    next_record: u64,
}

/// File-backed store of upload sessions
///
/// Each session is a single gzip-compressed bincode file holding the
/// metadata and every record, under `<root>/sessions/<user>/<id>.bin.gz`.
/// Files are written to a temporary name in the same directory and renamed
/// into place, so a reader sees either the whole session or nothing.
pub struct EquipmentStore {
    root: PathBuf,
    ids: Mutex<IdCounters>,
}

impl EquipmentStore {
    /// Open (or create) a store rooted at `root`
    ///
    /// Scans existing session files so that new ids continue after the
    /// highest ones on disk.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        create_dir_all(root.join(SESSIONS_DIR))?;

        let mut ids = IdCounters {
            next_session: 1,
            next_record: 1,
        };
        for user_dir in fs::read_dir(root.join(SESSIONS_DIR))? {
            let user_dir = user_dir?.path();
            if !user_dir.is_dir() {
                continue;
            }
            for path in session_files(&user_dir)? {
                let data = read_session_file(&path)?;
                ids.next_session = ids.next_session.max(data.session.id + 1);
                if let Some(max_record) = data.records.iter().map(|r| r.id).max() {
                    ids.next_record = ids.next_record.max(max_record + 1);
                }
            }
        }

        info!(
            "opened equipment store at {} (next session id {})",
            root.display(),
            ids.next_session
        );
        Ok(EquipmentStore {
            root,
            ids: Mutex::new(ids),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist a new session and all of its records as one unit
    ///
    /// # Arguments
    /// * `user` - Owner of the new session
    /// * `filename` - Name of the uploaded file
    /// * `drafts` - Validated rows, in file order
    ///
    /// # Returns
    /// * `Result<UploadSession, StoreError>` - The created session metadata
    pub fn create_session(
        &self,
        user: &str,
        filename: &str,
        drafts: Vec<EquipmentDraft>,
    ) -> Result<UploadSession, StoreError> {
        let dir = self.user_dir(user)?;
        create_dir_all(&dir)?;

        // Holding the lock across the write serializes session creation and
        // keeps ids in creation order.
        let mut ids = self.ids.lock().map_err(|_| StoreError::Poisoned)?;
        let session_id = ids.next_session;
        let first_record = ids.next_record;

        let records: Vec<EquipmentRecord> = drafts
            .into_iter()
            .zip(first_record..)
            .map(|(draft, id)| EquipmentRecord::from_draft(id, session_id, draft))
            .collect();

        let session = UploadSession {
            id: session_id,
            user_id: user.to_string(),
            filename: filename.to_string(),
            uploaded_at: Utc::now(),
            equipment_count: records.len(),
            summary: summarize(&records),
        };
        let record_count = records.len() as u64;
        let data = SessionData {
            session: session.clone(),
            records,
        };

        write_session_file(&dir, &data)?;
        ids.next_session = session_id + 1;
        ids.next_record = first_record + record_count;

        info!(
            "created session {} for {} ({} records from {})",
            session.id, user, session.equipment_count, session.filename
        );
        Ok(session)
    }

    /// All session metadata owned by `user`, in no particular order
    pub fn sessions_for(&self, user: &str) -> Result<Vec<UploadSession>, StoreError> {
        let dir = self.user_dir(user)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        session_files(&dir)?
            .iter()
            .map(|path| read_session_file(path).map(|data| data.session))
            .collect()
    }

    /// Resolve a selector to a session and its records
    ///
    /// `Latest` picks the most recently created session (ties broken by the
    /// higher id) and yields `None` when the user has no sessions. `Id`
    /// fails with `NotFound` when the id is unknown or owned by someone
    /// else.
    pub fn resolve(
        &self,
        user: &str,
        selector: SessionSelector,
    ) -> Result<Option<SessionData>, StoreError> {
        match selector {
            SessionSelector::Id(id) => self.load(user, id).map(Some),
            SessionSelector::Latest => {
                let latest = self
                    .sessions_for(user)?
                    .into_iter()
                    .max_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at).then(a.id.cmp(&b.id)));
                match latest {
                    Some(session) => self.load(user, session.id).map(Some),
                    None => Ok(None),
                }
            }
        }
    }

    /// Records for a selected session; empty when `Latest` finds nothing
    pub fn records(
        &self,
        user: &str,
        selector: SessionSelector,
    ) -> Result<Vec<EquipmentRecord>, StoreError> {
        Ok(self
            .resolve(user, selector)?
            .map(|data| data.records)
            .unwrap_or_default())
    }

    /// Load one session owned by `user`
    pub fn load(&self, user: &str, id: u64) -> Result<SessionData, StoreError> {
        let path = self.user_dir(user)?.join(format!("{id}{SESSION_SUFFIX}"));
        if !path.is_file() {
            return Err(StoreError::NotFound(id));
        }
        let data = read_session_file(&path)?;
        if data.session.user_id != user {
            warn!("session file {} is owned by another user", path.display());
            return Err(StoreError::NotFound(id));
        }
        Ok(data)
    }

    fn user_dir(&self, user: &str) -> Result<PathBuf, StoreError> {
        if !SAFE_USERNAME.is_match(user) || user.starts_with('.') {
            return Err(StoreError::InvalidUser(user.to_string()));
        }
        Ok(self.root.join(SESSIONS_DIR).join(user))
    }
}

fn session_files(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_session = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(SESSION_SUFFIX));
        if path.is_file() && is_session {
            files.push(path);
        }
    }
    Ok(files)
}

fn write_session_file(dir: &Path, data: &SessionData) -> Result<(), StoreError> {
    let final_path = dir.join(format!("{}{SESSION_SUFFIX}", data.session.id));
    let temp = NamedTempFile::new_in(dir)?;
    {
        let encoder = GzEncoder::new(temp.as_file(), Compression::default());
        let mut writer = BufWriter::new(encoder);
        serialize_into(&mut writer, data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let encoder = writer.into_inner().map_err(|e| e.into_error())?;
        let mut file = encoder.finish()?;
        file.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(&final_path).map_err(|e| e.error)?;
    Ok(())
}

fn read_session_file(path: &Path) -> Result<SessionData, StoreError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(GzDecoder::new(file));
    deserialize_from(&mut reader).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equipment::EquipmentType;

    fn draft(name: &str, kind: EquipmentType, flow: f64) -> EquipmentDraft {
        EquipmentDraft {
            name: name.to_string(),
            equipment_type: kind,
            flowrate: flow,
            pressure: 1.0,
            temperature: 20.0,
        }
    }

    #[test]
    fn create_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = EquipmentStore::open(dir.path()).unwrap();

        let session = store
            .create_session(
                "alice",
                "plant.csv",
                vec![
                    draft("Pump-1", EquipmentType::Pump, 120.0),
                    draft("Compressor-1", EquipmentType::Compressor, 95.0),
                ],
            )
            .unwrap();
        assert_eq!(session.equipment_count, 2);
        assert_eq!(session.summary.avg_flowrate, 107.5);

        let data = store.load("alice", session.id).unwrap();
        assert_eq!(data.session, session);
        assert_eq!(data.records.len(), 2);
        assert_eq!(data.records[0].name, "Pump-1");
        assert!(data.records.iter().all(|r| r.session_id == session.id));
        assert!(data.records[0].id < data.records[1].id);
    }

    #[test]
    fn foreign_sessions_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = EquipmentStore::open(dir.path()).unwrap();
        let session = store
            .create_session("alice", "a.csv", vec![draft("P", EquipmentType::Pump, 1.0)])
            .unwrap();

        assert!(matches!(
            store.resolve("bob", SessionSelector::Id(session.id)),
            Err(StoreError::NotFound(id)) if id == session.id
        ));
        assert!(matches!(
            store.load("alice", 9999),
            Err(StoreError::NotFound(9999))
        ));
    }

    #[test]
    fn latest_is_the_newest_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = EquipmentStore::open(dir.path()).unwrap();
        assert!(store.resolve("alice", SessionSelector::Latest).unwrap().is_none());
        assert!(store.records("alice", SessionSelector::Latest).unwrap().is_empty());

        store
            .create_session("alice", "first.csv", vec![draft("A", EquipmentType::Pump, 1.0)])
            .unwrap();
        let second = store
            .create_session("alice", "second.csv", vec![draft("B", EquipmentType::Valve, 2.0)])
            .unwrap();

        let latest = store.resolve("alice", SessionSelector::Latest).unwrap().unwrap();
        assert_eq!(latest.session.id, second.id);
        assert_eq!(latest.records[0].name, "B");
    }

    #[test]
    fn ids_continue_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let first = {
            let store = EquipmentStore::open(dir.path()).unwrap();
            store
                .create_session("alice", "a.csv", vec![draft("A", EquipmentType::Pump, 1.0)])
                .unwrap()
        };

        let store = EquipmentStore::open(dir.path()).unwrap();
        let second = store
            .create_session("alice", "b.csv", vec![draft("B", EquipmentType::Pump, 1.0)])
            .unwrap();
        assert!(second.id > first.id);
        let record_ids: Vec<u64> = store
            .records("alice", SessionSelector::Id(second.id))
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        let old_ids: Vec<u64> = store
            .records("alice", SessionSelector::Id(first.id))
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert!(record_ids.iter().all(|id| !old_ids.contains(id)));
    }

    #[test]
    fn empty_sessions_are_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let store = EquipmentStore::open(dir.path()).unwrap();
        let session = store.create_session("alice", "empty.csv", Vec::new()).unwrap();
        assert_eq!(session.equipment_count, 0);
        assert_eq!(session.summary.total_count, 0);
    }

    #[test]
    fn unsafe_user_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = EquipmentStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.sessions_for("../etc"),
            Err(StoreError::InvalidUser(_))
        ));
        assert!(matches!(
            store.create_session("a/b", "x.csv", Vec::new()),
            Err(StoreError::InvalidUser(_))
        ));
    }
}
