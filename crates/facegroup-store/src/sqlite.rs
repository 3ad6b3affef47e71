//! SQLite implementation of the repository traits.

use crate::codec::{decode_embedding, encode_embedding, format_timestamp, parse_timestamp, parse_uuid};
use crate::error::SqliteError;
use crate::schema::{PRAGMAS, SCHEMA};
use chrono::Utc;
use facegroup_core::{
    BoundingBox, ClusterStore, EmbeddingStore, FaceCluster, FaceEmbedding, ProfileFace, ProfileStore, StoreError,
};
use rusqlite::{params, Connection, OptionalExtension, Params, Row};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

const EMBEDDING_COLUMNS: &str =
    "id, user_id, photo_id, embedding, bbox_x, bbox_y, bbox_w, bbox_h, confidence, created_at";

/// Repository over one SQLite connection.
///
/// The connection sits behind a `Mutex`; multi-statement writes run in a
/// transaction, so cluster-set replacement is atomic for concurrent readers.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SqliteError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "opened face database");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, SqliteError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, SqliteError> {
        conn.execute_batch(PRAGMAS)?;
        conn.execute_batch(SCHEMA)?;
        tracing::debug!("face database schema ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T, SqliteError>) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().map_err(|_| SqliteError::Poisoned)?;
        Ok(f(&mut *conn)?)
    }
}

// --- row mapping ---

struct EmbeddingRow {
    id: String,
    user_id: String,
    photo_id: String,
    embedding: Vec<u8>,
    bbox: BoundingBox,
    confidence: f32,
    created_at: String,
}

impl EmbeddingRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            photo_id: row.get(2)?,
            embedding: row.get(3)?,
            bbox: BoundingBox {
                x: row.get(4)?,
                y: row.get(5)?,
                width: row.get(6)?,
                height: row.get(7)?,
            },
            confidence: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn decode(self) -> Result<FaceEmbedding, SqliteError> {
        let invalid = |detail: String| SqliteError::invalid(self.id.as_str(), detail);
        Ok(FaceEmbedding {
            id: parse_uuid(&self.id).map_err(invalid)?,
            user_id: parse_uuid(&self.user_id).map_err(invalid)?,
            photo_id: parse_uuid(&self.photo_id).map_err(invalid)?,
            embedding: decode_embedding(&self.embedding).map_err(invalid)?,
            bbox: self.bbox,
            confidence: self.confidence,
            created_at: parse_timestamp(&self.created_at).map_err(invalid)?,
        })
    }
}

fn query_embeddings<P: Params>(conn: &Connection, tail: &str, params: P) -> Result<Vec<FaceEmbedding>, SqliteError> {
    let sql = format!("SELECT {EMBEDDING_COLUMNS} FROM face_embeddings {tail}");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params, EmbeddingRow::read)?;
    let out: Result<Vec<FaceEmbedding>, SqliteError> = rows.map(|r| r?.decode()).collect();
    out
}

struct ClusterRow {
    id: String,
    user_id: String,
    label: String,
    created_at: String,
}

impl ClusterRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            label: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

fn load_cluster(conn: &Connection, row: ClusterRow) -> Result<FaceCluster, SqliteError> {
    let invalid = |detail: String| SqliteError::invalid(row.id.as_str(), detail);

    let mut stmt = conn.prepare("SELECT face_id FROM face_cluster_members WHERE cluster_id = ?1 ORDER BY position")?;
    let members: Vec<String> = stmt
        .query_map([row.id.as_str()], |r| r.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    let face_ids = members
        .iter()
        .map(|m| parse_uuid(m))
        .collect::<Result<Vec<Uuid>, String>>()
        .map_err(invalid)?;

    Ok(FaceCluster {
        id: parse_uuid(&row.id).map_err(invalid)?,
        user_id: parse_uuid(&row.user_id).map_err(invalid)?,
        face_ids,
        label: row.label.clone(),
        created_at: parse_timestamp(&row.created_at).map_err(invalid)?,
    })
}

fn query_clusters<P: Params>(conn: &Connection, tail: &str, params: P) -> Result<Vec<FaceCluster>, SqliteError> {
    let sql = format!("SELECT id, user_id, label, created_at FROM face_clusters {tail}");
    let mut stmt = conn.prepare(&sql)?;
    let rows: Vec<ClusterRow> = stmt
        .query_map(params, ClusterRow::read)?
        .collect::<rusqlite::Result<_>>()?;
    rows.into_iter().map(|row| load_cluster(conn, row)).collect()
}

fn insert_cluster_rows(conn: &Connection, cluster: &FaceCluster) -> Result<(), SqliteError> {
    let mut known = conn.prepare("SELECT 1 FROM face_embeddings WHERE id = ?1")?;
    for face_id in &cluster.face_ids {
        if !known.exists([face_id.to_string()])? {
            return Err(SqliteError::MissingMember {
                cluster: cluster.id,
                face: *face_id,
            });
        }
    }

    conn.execute(
        "INSERT INTO face_clusters (id, user_id, label, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            cluster.id.to_string(),
            cluster.user_id.to_string(),
            cluster.label,
            format_timestamp(&cluster.created_at),
        ],
    )?;
    let mut stmt =
        conn.prepare("INSERT INTO face_cluster_members (cluster_id, face_id, position) VALUES (?1, ?2, ?3)")?;
    for (position, face_id) in cluster.face_ids.iter().enumerate() {
        stmt.execute(params![cluster.id.to_string(), face_id.to_string(), position as i64])?;
    }
    Ok(())
}

/// Delete the given clusters if they no longer have members.
fn prune_emptied(conn: &Connection, cluster_ids: &[String]) -> Result<usize, SqliteError> {
    let mut pruned = 0;
    for id in cluster_ids {
        pruned += conn.execute(
            "DELETE FROM face_clusters WHERE id = ?1 \
             AND NOT EXISTS (SELECT 1 FROM face_cluster_members WHERE cluster_id = ?1)",
            [id],
        )?;
    }
    Ok(pruned)
}

fn strings<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<String>, SqliteError> {
    let mut stmt = conn.prepare(sql)?;
    let out = stmt
        .query_map(params, |r| r.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(out)
}

// --- trait impls ---

impl EmbeddingStore for SqliteStore {
    fn insert_embeddings(&self, records: &[FaceEmbedding]) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(&format!(
                    "INSERT INTO face_embeddings ({EMBEDDING_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ))?;
                for r in records {
                    stmt.execute(params![
                        r.id.to_string(),
                        r.user_id.to_string(),
                        r.photo_id.to_string(),
                        encode_embedding(&r.embedding),
                        r.bbox.x,
                        r.bbox.y,
                        r.bbox.width,
                        r.bbox.height,
                        r.confidence,
                        format_timestamp(&r.created_at),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn get_embedding(&self, id: Uuid) -> Result<Option<FaceEmbedding>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {EMBEDDING_COLUMNS} FROM face_embeddings WHERE id = ?1"),
                    [id.to_string()],
                    EmbeddingRow::read,
                )
                .optional()?;
            row.map(EmbeddingRow::decode).transpose()
        })
    }

    fn embeddings_for_user(&self, user_id: Uuid, limit: Option<usize>) -> Result<Vec<FaceEmbedding>, StoreError> {
        // LIMIT -1 means no limit in SQLite.
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        self.with_conn(|conn| {
            query_embeddings(
                conn,
                "WHERE user_id = ?1 ORDER BY created_at, rowid LIMIT ?2",
                params![user_id.to_string(), limit],
            )
        })
    }

    fn embeddings_for_photo(&self, photo_id: Uuid) -> Result<Vec<FaceEmbedding>, StoreError> {
        self.with_conn(|conn| {
            query_embeddings(conn, "WHERE photo_id = ?1 ORDER BY created_at, rowid", [photo_id.to_string()])
        })
    }

    fn scan_embeddings(&self, limit: usize) -> Result<Vec<FaceEmbedding>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(|conn| query_embeddings(conn, "ORDER BY created_at, rowid LIMIT ?1", [limit]))
    }

    fn delete_embedding(&self, id: Uuid) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let id = id.to_string();
            let affected = strings(
                &tx,
                "SELECT DISTINCT cluster_id FROM face_cluster_members WHERE face_id = ?1",
                [id.as_str()],
            )?;
            if tx.execute("DELETE FROM face_embeddings WHERE id = ?1", [id.as_str()])? == 0 {
                return Ok(false);
            }
            let pruned = prune_emptied(&tx, &affected)?;
            tx.commit()?;
            tracing::debug!(face = %id, pruned, "deleted face embedding");
            Ok(true)
        })
    }

    fn delete_photo_embeddings(&self, photo_id: Uuid) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let photo = photo_id.to_string();
            let affected = strings(
                &tx,
                "SELECT DISTINCT m.cluster_id FROM face_cluster_members m \
                 JOIN face_embeddings e ON e.id = m.face_id WHERE e.photo_id = ?1",
                [photo.as_str()],
            )?;
            let removed = tx.execute("DELETE FROM face_embeddings WHERE photo_id = ?1", [photo.as_str()])?;
            prune_emptied(&tx, &affected)?;
            tx.commit()?;
            Ok(removed)
        })
    }
}

impl ClusterStore for SqliteStore {
    fn replace_clusters(&self, user_id: Uuid, clusters: &[FaceCluster]) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let dropped = tx.execute("DELETE FROM face_clusters WHERE user_id = ?1", [user_id.to_string()])?;
            for cluster in clusters {
                insert_cluster_rows(&tx, cluster)?;
            }
            tx.commit()?;
            tracing::debug!(user = %user_id, dropped, inserted = clusters.len(), "replaced cluster set");
            Ok(())
        })
    }

    fn clusters_for_user(&self, user_id: Uuid) -> Result<Vec<FaceCluster>, StoreError> {
        self.with_conn(|conn| query_clusters(conn, "WHERE user_id = ?1 ORDER BY created_at, rowid", [user_id.to_string()]))
    }

    fn get_cluster(&self, id: Uuid) -> Result<Option<FaceCluster>, StoreError> {
        self.with_conn(|conn| Ok(query_clusters(conn, "WHERE id = ?1", [id.to_string()])?.pop()))
    }

    fn insert_cluster(&self, cluster: &FaceCluster) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            insert_cluster_rows(&tx, cluster)?;
            tx.commit()?;
            Ok(())
        })
    }

    fn rename_cluster(&self, id: Uuid, label: &str) -> Result<Option<FaceCluster>, StoreError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE face_clusters SET label = ?1 WHERE id = ?2",
                params![label, id.to_string()],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            Ok(query_clusters(conn, "WHERE id = ?1", [id.to_string()])?.pop())
        })
    }

    fn delete_cluster(&self, id: Uuid) -> Result<bool, StoreError> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM face_clusters WHERE id = ?1", [id.to_string()])? > 0))
    }
}

impl ProfileStore for SqliteStore {
    fn get_profile(&self, user_id: Uuid) -> Result<Option<ProfileFace>, StoreError> {
        self.with_conn(|conn| {
            let row: Option<(Vec<u8>, f32)> = conn
                .query_row(
                    "SELECT embedding, threshold FROM profile_faces WHERE user_id = ?1",
                    [user_id.to_string()],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;
            row.map(|(blob, threshold)| {
                let embedding = decode_embedding(&blob).map_err(|d| SqliteError::invalid(user_id.to_string(), d))?;
                Ok::<_, SqliteError>(ProfileFace { embedding, threshold })
            })
            .transpose()
        })
    }

    fn put_profile(&self, user_id: Uuid, profile: &ProfileFace) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profile_faces (user_id, embedding, threshold, updated_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(user_id) DO UPDATE SET \
                 embedding = excluded.embedding, threshold = excluded.threshold, updated_at = excluded.updated_at",
                params![
                    user_id.to_string(),
                    encode_embedding(&profile.embedding),
                    profile.threshold,
                    format_timestamp(&Utc::now()),
                ],
            )?;
            Ok(())
        })
    }

    fn delete_profile(&self, user_id: Uuid) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM profile_faces WHERE user_id = ?1", [user_id.to_string()])? > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use facegroup_core::{
        ClusterParams, Detection, DetectedFace, FaceService, ServiceConfig, ServiceError, EMBEDDING_DIM,
    };
    use std::sync::Arc;

    fn axis(i: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[i] = 1.0;
        v
    }

    fn near(base: usize, toward: usize, sim: f32) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[base] = sim;
        v[toward] = (1.0 - sim * sim).sqrt();
        v
    }

    fn record(user_id: Uuid, photo_id: Uuid, embedding: Vec<f32>, seq: i64) -> FaceEmbedding {
        let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        FaceEmbedding {
            id: Uuid::new_v4(),
            user_id,
            photo_id,
            embedding,
            bbox: BoundingBox { x: 1.5, y: 2.0, width: 40.0, height: 48.25 },
            confidence: 0.97,
            created_at: epoch + Duration::seconds(seq),
        }
    }

    fn cluster_of(user_id: Uuid, face_ids: Vec<Uuid>, label: &str, seq: i64) -> FaceCluster {
        FaceCluster {
            id: Uuid::new_v4(),
            user_id,
            face_ids,
            label: label.to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap() + Duration::seconds(seq),
        }
    }

    #[test]
    fn test_embedding_persistence() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let photo = Uuid::new_v4();
        let late = record(alice, photo, near(0, 1, 0.8), 10);
        let early = record(alice, Uuid::new_v4(), axis(1), 1);
        let other = record(bob, photo, axis(2), 5);
        store
            .insert_embeddings(&[late.clone(), early.clone(), other.clone()])
            .unwrap();

        assert_eq!(store.get_embedding(late.id).unwrap(), Some(late.clone()));
        assert!(store.get_embedding(Uuid::new_v4()).unwrap().is_none());
        assert_eq!(store.embeddings_for_user(alice, None).unwrap(), vec![early.clone(), late.clone()]);
        assert_eq!(store.embeddings_for_user(alice, Some(1)).unwrap(), vec![early.clone()]);
        assert_eq!(store.embeddings_for_photo(photo).unwrap(), vec![other.clone(), late]);
        assert_eq!(store.scan_embeddings(2).unwrap(), vec![early, other]);
    }

    #[test]
    fn test_insert_is_all_or_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        let user = Uuid::new_v4();
        let first = record(user, Uuid::new_v4(), axis(0), 0);
        store.insert_embeddings(&[first.clone()]).unwrap();

        let fresh = record(user, Uuid::new_v4(), axis(1), 1);
        assert!(matches!(
            store.insert_embeddings(&[fresh.clone(), first]),
            Err(StoreError::Backend(_))
        ));
        assert!(store.get_embedding(fresh.id).unwrap().is_none());
    }

    #[test]
    fn test_cluster_round_trip_keeps_member_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        let user = Uuid::new_v4();
        let faces: Vec<FaceEmbedding> = (0..3).map(|i| record(user, Uuid::new_v4(), axis(i), i as i64)).collect();
        store.insert_embeddings(&faces).unwrap();

        let cluster = cluster_of(user, vec![faces[2].id, faces[0].id, faces[1].id], "Person 1", 0);
        store.insert_cluster(&cluster).unwrap();
        assert_eq!(store.get_cluster(cluster.id).unwrap(), Some(cluster.clone()));
        assert_eq!(store.clusters_for_user(user).unwrap(), vec![cluster]);
    }

    #[test]
    fn test_replace_clusters_is_scoped_and_complete() {
        let store = SqliteStore::open_in_memory().unwrap();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let a = record(alice, Uuid::new_v4(), axis(0), 0);
        let b = record(bob, Uuid::new_v4(), axis(1), 1);
        store.insert_embeddings(&[a.clone(), b.clone()]).unwrap();

        store.replace_clusters(alice, &[cluster_of(alice, vec![a.id], "old", 0)]).unwrap();
        store.replace_clusters(bob, &[cluster_of(bob, vec![b.id], "bob", 1)]).unwrap();

        let new = vec![
            cluster_of(alice, vec![a.id], "Person 1", 2),
            cluster_of(alice, vec![], "Person 2", 2),
        ];
        store.replace_clusters(alice, &new).unwrap();
        assert_eq!(store.clusters_for_user(alice).unwrap(), new);
        assert_eq!(store.clusters_for_user(bob).unwrap().len(), 1);
    }

    #[test]
    fn test_failed_replace_keeps_old_set() {
        let store = SqliteStore::open_in_memory().unwrap();
        let user = Uuid::new_v4();
        let a = record(user, Uuid::new_v4(), axis(0), 0);
        store.insert_embeddings(&[a.clone()]).unwrap();
        let old = cluster_of(user, vec![a.id], "old", 0);
        store.replace_clusters(user, &[old.clone()]).unwrap();

        let ghost = Uuid::new_v4();
        let broken = cluster_of(user, vec![a.id, ghost], "broken", 1);
        assert!(matches!(
            store.replace_clusters(user, &[broken.clone()]),
            Err(StoreError::MissingMember { face, .. }) if face == ghost
        ));
        assert_eq!(store.clusters_for_user(user).unwrap(), vec![old]);
        assert!(matches!(store.insert_cluster(&broken), Err(StoreError::MissingMember { .. })));
    }

    #[test]
    fn test_deleting_faces_prunes_memberships() {
        let store = SqliteStore::open_in_memory().unwrap();
        let user = Uuid::new_v4();
        let photo = Uuid::new_v4();
        let a = record(user, photo, axis(0), 0);
        let b = record(user, Uuid::new_v4(), axis(1), 1);
        store.insert_embeddings(&[a.clone(), b.clone()]).unwrap();

        let shared = cluster_of(user, vec![a.id, b.id], "shared", 0);
        let solo = cluster_of(user, vec![a.id], "solo", 1);
        let manual = cluster_of(user, vec![], "manual", 2);
        store.replace_clusters(user, &[shared.clone(), solo.clone(), manual.clone()]).unwrap();

        assert_eq!(store.delete_photo_embeddings(photo).unwrap(), 1);
        assert_eq!(store.get_cluster(shared.id).unwrap().unwrap().face_ids, vec![b.id]);
        assert!(store.get_cluster(solo.id).unwrap().is_none());
        assert!(store.get_cluster(manual.id).unwrap().is_some());

        assert!(store.delete_embedding(b.id).unwrap());
        assert!(!store.delete_embedding(b.id).unwrap());
        assert!(store.get_cluster(shared.id).unwrap().is_none());
    }

    #[test]
    fn test_rename_and_delete_cluster() {
        let store = SqliteStore::open_in_memory().unwrap();
        let user = Uuid::new_v4();
        let cluster = cluster_of(user, vec![], "Person 1", 0);
        store.insert_cluster(&cluster).unwrap();

        let renamed = store.rename_cluster(cluster.id, "Aunt May").unwrap().unwrap();
        assert_eq!(renamed.label, "Aunt May");
        assert!(store.rename_cluster(Uuid::new_v4(), "x").unwrap().is_none());
        assert!(store.delete_cluster(cluster.id).unwrap());
        assert!(!store.delete_cluster(cluster.id).unwrap());
    }

    #[test]
    fn test_profile_upsert() {
        let store = SqliteStore::open_in_memory().unwrap();
        let user = Uuid::new_v4();
        assert!(store.get_profile(user).unwrap().is_none());

        let first = ProfileFace { embedding: axis(0), threshold: 0.45 };
        store.put_profile(user, &first).unwrap();
        assert_eq!(store.get_profile(user).unwrap(), Some(first));

        let mut mean = axis(0);
        mean[1] = 0.5;
        let second = ProfileFace { embedding: mean, threshold: 0.47 };
        store.put_profile(user, &second).unwrap();
        assert_eq!(store.get_profile(user).unwrap(), Some(second));

        assert!(store.delete_profile(user).unwrap());
        assert!(!store.delete_profile(user).unwrap());
    }

    #[test]
    fn test_corrupt_blob_surfaces_as_corrupt() {
        let store = SqliteStore::open_in_memory().unwrap();
        let user = Uuid::new_v4();
        let face = record(user, Uuid::new_v4(), axis(0), 0);
        store.insert_embeddings(&[face.clone()]).unwrap();
        store
            .conn
            .lock()
            .unwrap()
            .execute("UPDATE face_embeddings SET embedding = x'000000' WHERE id = ?1", [face.id.to_string()])
            .unwrap();

        let err = store.get_embedding(face.id).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { ref id, .. } if *id == face.id.to_string()));
    }

    #[test]
    fn test_open_creates_file() {
        let dir = std::env::temp_dir().join(format!("facegroup-store-{}", Uuid::new_v4()));
        let path = dir.join("nested").join("faces.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .put_profile(Uuid::nil(), &ProfileFace { embedding: axis(3), threshold: 0.5 })
                .unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.get_profile(Uuid::nil()).unwrap().unwrap().embedding, axis(3));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_service_over_sqlite() {
        let svc = FaceService::new(Arc::new(SqliteStore::open_in_memory().unwrap()), ServiceConfig::default());
        let user = Uuid::new_v4();
        let group = [axis(0), near(0, 1, 0.95), near(0, 2, 0.95)];
        for embedding in group.iter().cloned().chain([axis(3), axis(4)]) {
            let detection = Detection::with_faces(vec![DetectedFace {
                embedding,
                confidence: 0.99,
                bbox: BoundingBox { x: 0.0, y: 0.0, width: 10.0, height: 10.0 },
                landmarks: None,
            }]);
            svc.record_detections(user, Uuid::new_v4(), &detection).unwrap();
        }

        let report = svc.run_clustering(user, ClusterParams::default()).unwrap();
        assert_eq!(report.clusters_created, 1);
        assert_eq!(report.noise_faces, 2);
        assert_eq!(svc.list_clusters(user).unwrap()[0].face_ids.len(), 3);

        assert!(matches!(svc.match_profile(user, None, 10), Err(ServiceError::NoProfileSet(_))));
        svc.enroll_profile_from_embeddings(user, &[axis(0)]).unwrap();
        let matches = svc.match_profile(user, Some(0.45), 10).unwrap();
        assert_eq!(matches.photos.len(), 3);
        assert_eq!(matches.scanned, 5);
    }

    #[test]
    fn test_non_finite_faces_never_reach_the_database() {
        let svc = FaceService::new(Arc::new(SqliteStore::open_in_memory().unwrap()), ServiceConfig::default());
        let (me, mallory) = (Uuid::new_v4(), Uuid::new_v4());
        let mut bad = axis(0);
        bad[5] = f32::NAN;
        let detection = Detection::with_faces(vec![DetectedFace {
            embedding: bad,
            confidence: 0.9,
            bbox: BoundingBox { x: 0.0, y: 0.0, width: 10.0, height: 10.0 },
            landmarks: None,
        }]);
        assert!(matches!(
            svc.record_detections(mallory, Uuid::new_v4(), &detection),
            Err(ServiceError::Vector(_))
        ));
        assert!(svc.embeddings_for_user(mallory, None).unwrap().is_empty());

        // Corpus-wide matching for everyone else keeps working.
        svc.enroll_profile_from_embeddings(me, &[axis(0)]).unwrap();
        let matches = svc.match_profile(me, None, 10).unwrap();
        assert_eq!(matches.scanned, 0);
    }

    #[test]
    fn test_replace_clusters_atomic_for_concurrent_readers() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let user = Uuid::new_v4();
        let faces: Vec<FaceEmbedding> = (0..4).map(|i| record(user, Uuid::new_v4(), axis(i), i as i64)).collect();
        store.insert_embeddings(&faces).unwrap();

        let old = vec![
            cluster_of(user, vec![faces[0].id, faces[1].id], "old 1", 0),
            cluster_of(user, vec![faces[2].id, faces[3].id], "old 2", 1),
        ];
        let new = vec![
            cluster_of(user, vec![faces[0].id, faces[2].id], "new 1", 2),
            cluster_of(user, vec![faces[1].id], "new 2", 3),
            cluster_of(user, vec![faces[3].id], "new 3", 4),
        ];
        store.replace_clusters(user, &old).unwrap();

        let writer = {
            let (store, old, new) = (Arc::clone(&store), old.clone(), new.clone());
            std::thread::spawn(move || {
                for round in 0..200 {
                    let set = if round % 2 == 0 { &new } else { &old };
                    store.replace_clusters(user, set).unwrap();
                }
            })
        };

        for _ in 0..500 {
            let seen = store.clusters_for_user(user).unwrap();
            assert!(seen == old || seen == new, "reader saw a partial cluster set: {seen:?}");
        }
        writer.join().unwrap();
    }
}
