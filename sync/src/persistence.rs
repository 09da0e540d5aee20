//! Local persistence of room documents.
//!
//! A room is stored as its [`DocSnapshot`]. Loading replays the snapshot into
//! a live document, so it merges with whatever the document already holds.

use crate::error::{Error, Result};
use dashmap::DashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tandem_engine::{Doc, DocSnapshot};

/// Storage for room snapshots.
pub trait Persistence: Send + Sync {
    fn save(&self, room: &str, snapshot: &DocSnapshot) -> Result<()>;

    fn load(&self, room: &str) -> Result<Option<DocSnapshot>>;

    fn remove(&self, room: &str) -> Result<()>;

    /// Replay the stored snapshot into `doc`. Returns how many operations
    /// were new to it.
    fn load_into(&self, room: &str, doc: &Doc) -> Result<usize> {
        Ok(self
            .load(room)?
            .map(|snapshot| snapshot.load_into(doc))
            .unwrap_or(0))
    }
}

/// Snapshots kept in memory, as JSON.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    rooms: DashMap<String, String>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }
}

impl Persistence for MemoryPersistence {
    fn save(&self, room: &str, snapshot: &DocSnapshot) -> Result<()> {
        self.rooms.insert(room.to_string(), snapshot.to_json()?);
        Ok(())
    }

    fn load(&self, room: &str) -> Result<Option<DocSnapshot>> {
        match self.rooms.get(room) {
            Some(json) => Ok(Some(DocSnapshot::from_json(&json)?)),
            None => Ok(None),
        }
    }

    fn remove(&self, room: &str) -> Result<()> {
        self.rooms.remove(room);
        Ok(())
    }
}

/// One JSON file per room in a directory.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    dir: PathBuf,
}

impl FilePersistence {
    /// Use `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File for `room`. Characters outside `[A-Za-z0-9_-]` are hex-escaped
    /// so distinct keys never share a file.
    pub fn path_for(&self, room: &str) -> PathBuf {
        let mut name = String::with_capacity(room.len());
        for ch in room.chars() {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                name.push(ch);
            } else {
                let mut buf = [0u8; 4];
                for byte in ch.encode_utf8(&mut buf).bytes() {
                    name.push_str(&format!("%{byte:02x}"));
                }
            }
        }
        self.dir.join(format!("{name}.json"))
    }
}

impl Persistence for FilePersistence {
    fn save(&self, room: &str, snapshot: &DocSnapshot) -> Result<()> {
        let path = self.path_for(room);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, snapshot.to_json()?)?;
        fs::rename(&tmp, &path)?;
        tracing::trace!(room = %room, path = %path.display(), "Snapshot saved");
        Ok(())
    }

    fn load(&self, room: &str) -> Result<Option<DocSnapshot>> {
        let path = self.path_for(room);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };
        Ok(Some(DocSnapshot::from_json(&json)?))
    }

    fn remove(&self, room: &str) -> Result<()> {
        match fs::remove_file(self.path_for(room)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(Error::Io(e)),
            _ => Ok(()),
        }
    }
}
