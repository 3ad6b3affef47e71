pub(crate) const PRAGMAS: &str = "PRAGMA foreign_keys = ON;";

/// Timestamps are RFC 3339 UTC with nanosecond precision, so text order is
/// time order. Embeddings are little-endian f32 blobs.
pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS face_embeddings (
    id          TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL,
    photo_id    TEXT NOT NULL,
    embedding   BLOB NOT NULL,
    bbox_x      REAL NOT NULL,
    bbox_y      REAL NOT NULL,
    bbox_w      REAL NOT NULL,
    bbox_h      REAL NOT NULL,
    confidence  REAL NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_face_embeddings_user
    ON face_embeddings(user_id, created_at);
CREATE INDEX IF NOT EXISTS idx_face_embeddings_photo
    ON face_embeddings(photo_id);
CREATE INDEX IF NOT EXISTS idx_face_embeddings_created
    ON face_embeddings(created_at);

CREATE TABLE IF NOT EXISTS face_clusters (
    id          TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL,
    label       TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_face_clusters_user
    ON face_clusters(user_id, created_at);

CREATE TABLE IF NOT EXISTS face_cluster_members (
    cluster_id  TEXT NOT NULL REFERENCES face_clusters(id) ON DELETE CASCADE,
    face_id     TEXT NOT NULL REFERENCES face_embeddings(id) ON DELETE CASCADE,
    position    INTEGER NOT NULL,
    PRIMARY KEY (cluster_id, face_id)
);

CREATE INDEX IF NOT EXISTS idx_face_cluster_members_face
    ON face_cluster_members(face_id);

CREATE TABLE IF NOT EXISTS profile_faces (
    user_id     TEXT PRIMARY KEY,
    embedding   BLOB NOT NULL,
    threshold   REAL NOT NULL,
    updated_at  TEXT NOT NULL
);
"#;
