//! Durable identity → feature-vector gallery, backed by SQLite.
//!
//! Each identity keeps a sliding window of its [`GALLERY_WINDOW`] most recent
//! vectors. All vectors in one gallery share a single dimensionality; the
//! first enrollment into an empty gallery establishes it.
//!
//! Every mutation runs inside one SQLite transaction while holding the
//! store's connection mutex, so concurrent enrollments cannot lose each
//! other's updates and a failed enrollment leaves the gallery untouched.

use crate::types::{FeatureVector, Gallery, IdentitySummary};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Vectors kept per identity; older ones are evicted first.
pub const GALLERY_WINDOW: usize = 5;

const SCHEMA_VERSION: i64 = 1;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS feature_vectors (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    identity    TEXT    NOT NULL,
    dimension   INTEGER NOT NULL,
    vector      BLOB    NOT NULL,
    enrolled_at TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_feature_vectors_identity ON feature_vectors(identity, id);
";

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("vector has {actual} dimensions, gallery uses {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("refusing to store an empty feature vector")]
    EmptyVector,
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),
    #[error("corrupt vector blob for '{identity}': {len} bytes")]
    CorruptVector { identity: String, len: usize },
    #[error("unsupported gallery schema version {0}")]
    UnsupportedSchema(i64),
    #[error("gallery lock poisoned")]
    LockPoisoned,
}

/// Canonical form of a caller-supplied identity.
///
/// Surrounding whitespace is trimmed; the rest is kept verbatim, so identities
/// are case-sensitive. Empty identities and control characters are rejected.
pub fn canonical_identity(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(StoreError::InvalidIdentity("identity is empty".into()));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(StoreError::InvalidIdentity(format!(
            "identity {trimmed:?} contains control characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// SQLite-backed gallery store.
pub struct GalleryStore {
    conn: Mutex<Connection>,
}

impl GalleryStore {
    /// Open or create the gallery database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "opened gallery database");
        Self::init(conn)
    }

    /// In-memory gallery, gone when dropped.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        match version {
            0 => {
                conn.execute_batch(SCHEMA_SQL)?;
                conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            }
            SCHEMA_VERSION => conn.execute_batch(SCHEMA_SQL)?,
            other => return Err(StoreError::UnsupportedSchema(other)),
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Append `vector` to `identity`, keep only its newest [`GALLERY_WINDOW`]
    /// vectors, and return how many it now has.
    pub fn enroll(&self, identity: &str, vector: &FeatureVector) -> Result<usize> {
        let identity = canonical_identity(identity)?;
        if vector.is_empty() {
            return Err(StoreError::EmptyVector);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        if let Some(expected) = established_dimension(&tx)? {
            if expected != vector.len() {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }

        tx.execute(
            "INSERT INTO feature_vectors (identity, dimension, vector, enrolled_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                identity,
                vector.len() as i64,
                encode_vector(vector),
                chrono::Utc::now().to_rfc3339()
            ],
        )?;

        let evicted = tx.execute(
            "DELETE FROM feature_vectors
             WHERE identity = ?1
               AND id NOT IN (
                   SELECT id FROM feature_vectors
                   WHERE identity = ?1
                   ORDER BY id DESC
                   LIMIT ?2
               )",
            params![identity, GALLERY_WINDOW as i64],
        )?;

        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM feature_vectors WHERE identity = ?1",
            params![identity],
            |row| row.get(0),
        )?;

        tx.commit()?;

        tracing::info!(identity = %identity, count, evicted, "enrolled feature vector");
        Ok(count as usize)
    }

    /// Every identity with its stored vector count, sorted by identity.
    pub fn list(&self) -> Result<Vec<IdentitySummary>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT identity, COUNT(*) FROM feature_vectors
             GROUP BY identity
             ORDER BY identity",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(IdentitySummary {
                identity: row.get(0)?,
                count: row.get::<_, i64>(1)? as usize,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }

    /// Remove every vector of `identity`. Returns `false` without writing
    /// anything if the identity is not enrolled. Malformed identities can
    /// never be enrolled, so they are reported the same way.
    pub fn delete(&self, identity: &str) -> Result<bool> {
        let identity = match canonical_identity(identity) {
            Ok(identity) => identity,
            Err(StoreError::InvalidIdentity(reason)) => {
                tracing::debug!(%reason, "delete: malformed identity is never enrolled");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        let mut conn = self.lock()?;

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM feature_vectors WHERE identity = ?1)",
            params![identity],
            |row| row.get(0),
        )?;
        if !exists {
            tracing::debug!(identity = %identity, "delete: identity not enrolled");
            return Ok(false);
        }

        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM feature_vectors WHERE identity = ?1",
            params![identity],
        )?;
        tx.commit()?;

        tracing::info!(identity = %identity, removed, "deleted identity");
        Ok(removed > 0)
    }

    /// Full snapshot: identities in lexicographic order, vectors oldest first.
    pub fn load_all(&self) -> Result<Gallery> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT identity, vector FROM feature_vectors ORDER BY identity, id",
        )?;
        let mut rows = stmt.query([])?;

        let mut gallery = Gallery::new();
        while let Some(row) = rows.next()? {
            let identity: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            let vector = decode_vector(&identity, &blob)?;
            gallery.entry(identity).or_default().push(vector);
        }
        Ok(gallery)
    }

    /// Dimensionality shared by every stored vector, or `None` when empty.
    pub fn dimension(&self) -> Result<Option<usize>> {
        let conn = self.lock()?;
        established_dimension(&conn)
    }
}

fn established_dimension(conn: &Connection) -> Result<Option<usize>> {
    let dim: Option<i64> = conn
        .query_row("SELECT dimension FROM feature_vectors LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(dim.map(|d| d as usize))
}

/// Little-endian `f32` sequence.
fn encode_vector(vector: &FeatureVector) -> Vec<u8> {
    vector
        .as_slice()
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect()
}

fn decode_vector(identity: &str, blob: &[u8]) -> Result<FeatureVector> {
    if blob.is_empty() || blob.len() % 4 != 0 {
        return Err(StoreError::CorruptVector {
            identity: identity.to_string(),
            len: blob.len(),
        });
    }
    let values = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(FeatureVector::new(values))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(values: &[f32]) -> FeatureVector {
        FeatureVector::new(values.to_vec())
    }

    #[test]
    fn test_enroll_creates_identity() {
        let store = GalleryStore::open_in_memory().unwrap();
        assert_eq!(store.enroll("alice", &v(&[1.0, 2.0])).unwrap(), 1);
        assert_eq!(store.enroll("alice", &v(&[3.0, 4.0])).unwrap(), 2);

        let gallery = store.load_all().unwrap();
        assert_eq!(gallery["alice"], vec![v(&[1.0, 2.0]), v(&[3.0, 4.0])]);
    }

    #[test]
    fn test_window_keeps_newest_five_in_order() {
        let store = GalleryStore::open_in_memory().unwrap();
        let vectors: Vec<FeatureVector> = (1..=8).map(|i| v(&[i as f32, 0.5])).collect();

        let mut counts = Vec::new();
        for vector in &vectors {
            counts.push(store.enroll("alice", vector).unwrap());
        }
        assert_eq!(counts, vec![1, 2, 3, 4, 5, 5, 5, 5]);

        let gallery = store.load_all().unwrap();
        assert_eq!(gallery["alice"], vectors[3..].to_vec());
    }

    #[test]
    fn test_window_is_per_identity() {
        let store = GalleryStore::open_in_memory().unwrap();
        for i in 0..6 {
            store.enroll("alice", &v(&[i as f32])).unwrap();
        }
        store.enroll("bob", &v(&[42.0])).unwrap();

        let gallery = store.load_all().unwrap();
        assert_eq!(gallery["alice"].len(), 5);
        assert_eq!(gallery["bob"], vec![v(&[42.0])]);
    }

    #[test]
    fn test_dimension_guard() {
        let store = GalleryStore::open_in_memory().unwrap();
        store.enroll("alice", &v(&[1.0, 2.0, 3.0])).unwrap();

        let err = store.enroll("bob", &v(&[1.0; 256])).unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch { expected: 3, actual: 256 }
        ));
        // Nothing from the failed enrollment was kept.
        assert_eq!(store.list().unwrap().len(), 1);
        assert_eq!(store.dimension().unwrap(), Some(3));
    }

    #[test]
    fn test_emptied_gallery_accepts_new_dimension() {
        let store = GalleryStore::open_in_memory().unwrap();
        store.enroll("alice", &v(&[1.0, 2.0])).unwrap();
        assert!(store.delete("alice").unwrap());
        assert_eq!(store.dimension().unwrap(), None);
        assert_eq!(store.enroll("alice", &v(&[1.0, 2.0, 3.0])).unwrap(), 1);
    }

    #[test]
    fn test_empty_vector_rejected() {
        let store = GalleryStore::open_in_memory().unwrap();
        assert!(matches!(
            store.enroll("alice", &v(&[])),
            Err(StoreError::EmptyVector)
        ));
    }

    #[test]
    fn test_list_counts_match_after_mixed_operations() {
        let store = GalleryStore::open_in_memory().unwrap();
        for i in 0..7 {
            store.enroll("carol", &v(&[i as f32])).unwrap();
        }
        store.enroll("alice", &v(&[1.0])).unwrap();
        store.enroll("bob", &v(&[1.0])).unwrap();
        store.enroll("bob", &v(&[2.0])).unwrap();
        store.delete("alice").unwrap();
        store.enroll("alice", &v(&[3.0])).unwrap();

        let listed = store.list().unwrap();
        let gallery = store.load_all().unwrap();
        assert_eq!(
            listed,
            vec![
                IdentitySummary { identity: "alice".into(), count: 1 },
                IdentitySummary { identity: "bob".into(), count: 2 },
                IdentitySummary { identity: "carol".into(), count: 5 },
            ]
        );
        for summary in &listed {
            assert_eq!(gallery[&summary.identity].len(), summary.count);
        }
    }

    #[test]
    fn test_delete_absent_returns_false() {
        let store = GalleryStore::open_in_memory().unwrap();
        store.enroll("alice", &v(&[1.0])).unwrap();
        assert!(!store.delete("bob").unwrap());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_delete_absent_leaves_file_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gallery.db");
        let store = GalleryStore::open(&path).unwrap();
        store.enroll("alice", &v(&[1.0, 2.0])).unwrap();

        let before = std::fs::read(&path).unwrap();
        assert!(!store.delete("mallory").unwrap());
        let after = std::fs::read(&path).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_identity_is_trimmed_and_case_sensitive() {
        let store = GalleryStore::open_in_memory().unwrap();
        store.enroll("  alice ", &v(&[1.0])).unwrap();
        store.enroll("Alice", &v(&[2.0])).unwrap();

        let gallery = store.load_all().unwrap();
        assert_eq!(gallery.keys().collect::<Vec<_>>(), vec!["Alice", "alice"]);
        assert!(store.delete("alice\t").unwrap());
    }

    #[test]
    fn test_invalid_identity() {
        assert!(canonical_identity("   ").is_err());
        assert!(canonical_identity("al\nice").is_err());
        assert_eq!(canonical_identity(" bob ").unwrap(), "bob");
    }

    #[test]
    fn test_delete_malformed_identity_returns_false() {
        let store = GalleryStore::open_in_memory().unwrap();
        store.enroll("alice", &v(&[1.0])).unwrap();
        assert!(!store.delete("   ").unwrap());
        assert!(!store.delete("").unwrap());
        assert!(!store.delete("al\nice").unwrap());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("gallery.db");
        {
            let store = GalleryStore::open(&path).unwrap();
            store.enroll("alice", &v(&[0.25, -1.5, 3.0e7])).unwrap();
            store.enroll("alice", &v(&[f32::MIN_POSITIVE, 0.0, -0.0])).unwrap();
        }
        let reopened = GalleryStore::open(&path).unwrap();
        let gallery = reopened.load_all().unwrap();
        assert_eq!(
            gallery["alice"],
            vec![v(&[0.25, -1.5, 3.0e7]), v(&[f32::MIN_POSITIVE, 0.0, -0.0])]
        );
    }

    #[test]
    fn test_concurrent_enrollments_are_not_lost() {
        let store = std::sync::Arc::new(GalleryStore::open_in_memory().unwrap());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.enroll(&format!("user{i}"), &v(&[i as f32, 1.0])).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.list().unwrap().len(), 8);
    }

    #[test]
    fn test_corrupt_blob_detected() {
        assert!(matches!(
            decode_vector("alice", &[1, 2, 3]),
            Err(StoreError::CorruptVector { len: 3, .. })
        ));
    }
}
