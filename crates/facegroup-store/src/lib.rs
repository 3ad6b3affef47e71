//! facegroup-store: SQLite persistence for face embeddings, clusters and
//! profile faces.
//!
//! [`SqliteStore`] implements the `facegroup-core` repository traits over a
//! single connection.

mod codec;
mod error;
mod schema;
mod sqlite;

pub use error::SqliteError;
pub use sqlite::SqliteStore;
