use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facegroup_core::{normalize_user_id, ClusterParams, FaceService, ServiceError};
use facegroup_store::SqliteStore;
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod config;
mod engine;
mod sidecar;

use config::Config;
use engine::EngineError;
use sidecar::SidecarDetector;

#[derive(Parser)]
#[command(name = "facegroup", about = "Group photos by the people in them")]
struct Cli {
    /// SQLite database (overrides FACEGROUP_DB_PATH and the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store detector output for a batch of photos
    Import {
        #[arg(short, long)]
        user: String,
        /// JSON file mapping photo id (or file name) to detector output
        detections: PathBuf,
    },
    /// Inspect or remove stored face embeddings
    Embeddings {
        #[command(subcommand)]
        action: EmbeddingsCommand,
    },
    /// Identity clusters
    Cluster {
        #[command(subcommand)]
        action: ClusterCommand,
    },
    /// Find a user's faces similar to a face or an embedding
    Similar {
        #[arg(short, long)]
        user: String,
        /// Stored face to use as the query
        #[arg(long, required_unless_present = "embedding", conflicts_with = "embedding")]
        face: Option<Uuid>,
        /// JSON file holding a 512-float query embedding
        #[arg(long)]
        embedding: Option<PathBuf>,
        #[arg(long)]
        threshold: Option<f32>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Profile face enrollment and matching
    Profile {
        #[command(subcommand)]
        action: ProfileCommand,
    },
}

#[derive(Subcommand)]
enum EmbeddingsCommand {
    /// List a user's faces, oldest first
    List {
        #[arg(short, long)]
        user: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show one face
    Show { id: Uuid },
    /// Delete one face
    Delete { id: Uuid },
    /// Delete every face of a photo
    DeletePhoto { photo: String },
}

#[derive(Subcommand)]
enum ClusterCommand {
    /// Recluster a user's faces, replacing existing clusters
    Run {
        #[arg(short, long)]
        user: String,
        #[arg(long)]
        eps: Option<f32>,
        #[arg(long)]
        min_samples: Option<usize>,
    },
    /// Suggest clustering parameters from the user's faces
    Suggest {
        #[arg(short, long)]
        user: String,
    },
    /// Score how coherent a cluster is
    Validate {
        #[arg(short, long)]
        user: String,
        cluster: Uuid,
    },
    /// List a user's clusters
    List {
        #[arg(short, long)]
        user: String,
    },
    /// Create a cluster from chosen faces
    Create {
        #[arg(short, long)]
        user: String,
        #[arg(long)]
        label: Option<String>,
        #[arg(required = true)]
        faces: Vec<Uuid>,
    },
    /// Rename a cluster
    Rename { cluster: Uuid, label: String },
    /// Delete a cluster (faces are kept)
    Delete { cluster: Uuid },
}

#[derive(Subcommand)]
enum ProfileCommand {
    /// Enroll from images whose detections are in a sidecar file
    Enroll {
        #[arg(short, long)]
        user: String,
        /// JSON file mapping image file name to detector output
        #[arg(long)]
        detections: PathBuf,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Enroll from a JSON array of embeddings
    EnrollEmbeddings {
        #[arg(short, long)]
        user: String,
        file: PathBuf,
    },
    /// Show whether a profile face is set
    Status {
        #[arg(short, long)]
        user: String,
    },
    /// Remove the profile face
    Remove {
        #[arg(short, long)]
        user: String,
    },
    /// Find photos containing the profile face
    Match {
        #[arg(short, long)]
        user: String,
        /// Defaults to the profile's adaptive threshold
        #[arg(long)]
        threshold: Option<f32>,
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?;
    let service = FaceService::new(Arc::new(store), config.service_config());
    tracing::debug!(db = %config.db_path.display(), "facegroup ready");

    match cli.command {
        Commands::Import { user, detections } => {
            let user = normalize_user_id(&user);
            let batch = sidecar::load(&detections)?;
            let keyed: Vec<(&String, Uuid)> = batch.keys().map(|key| (key, photo_id(key))).collect();
            let entries: Vec<(Uuid, &facegroup_core::Detection)> =
                keyed.iter().map(|(key, photo)| (*photo, &batch[*key])).collect();

            let stored = service.record_detection_batch(user, &entries)?;
            let photos: Vec<_> = keyed
                .iter()
                .map(|(key, photo)| {
                    let face_ids: Vec<Uuid> = stored.iter().filter(|f| f.photo_id == *photo).map(|f| f.id).collect();
                    json!({
                        "source": key,
                        "photo_id": photo,
                        "faces_stored": face_ids.len(),
                        "face_ids": face_ids,
                    })
                })
                .collect();
            print_json(&json!({ "user_id": user, "faces_stored": stored.len(), "photos": photos }))?;
        }

        Commands::Embeddings { action } => match action {
            EmbeddingsCommand::List { user, limit } => {
                let faces = service.embeddings_for_user(normalize_user_id(&user), limit)?;
                let summary: Vec<_> = faces
                    .iter()
                    .map(|f| {
                        json!({
                            "id": f.id,
                            "photo_id": f.photo_id,
                            "confidence": f.confidence,
                            "bbox": f.bbox,
                            "created_at": f.created_at,
                        })
                    })
                    .collect();
                print_json(&summary)?;
            }
            EmbeddingsCommand::Show { id } => print_json(&service.get_embedding(id)?)?,
            EmbeddingsCommand::Delete { id } => {
                service.delete_embedding(id)?;
                print_json(&json!({ "deleted": id }))?;
            }
            EmbeddingsCommand::DeletePhoto { photo } => {
                let photo = photo_id(&photo);
                let removed = service.delete_photo_embeddings(photo)?;
                print_json(&json!({ "photo_id": photo, "deleted": removed }))?;
            }
        },

        Commands::Cluster { action } => match action {
            ClusterCommand::Run { user, eps, min_samples } => {
                let defaults = config.cluster_params();
                let params = ClusterParams {
                    eps: eps.unwrap_or(defaults.eps),
                    min_samples: min_samples.unwrap_or(defaults.min_samples),
                };
                let engine = engine::spawn_engine(service)?;
                print_json(&engine.cluster(normalize_user_id(&user), params).await?)?;
            }
            ClusterCommand::Suggest { user } => {
                let engine = engine::spawn_engine(service)?;
                print_json(&engine.suggest(normalize_user_id(&user)).await?)?;
            }
            ClusterCommand::Validate { user, cluster } => {
                print_json(&service.validate_cluster(normalize_user_id(&user), cluster)?)?;
            }
            ClusterCommand::List { user } => {
                print_json(&service.list_clusters(normalize_user_id(&user))?)?;
            }
            ClusterCommand::Create { user, label, faces } => {
                print_json(&service.create_cluster(normalize_user_id(&user), &faces, label)?)?;
            }
            ClusterCommand::Rename { cluster, label } => {
                print_json(&service.rename_cluster(cluster, &label)?)?;
            }
            ClusterCommand::Delete { cluster } => {
                service.delete_cluster(cluster)?;
                print_json(&json!({ "deleted": cluster }))?;
            }
        },

        Commands::Similar {
            user,
            face,
            embedding,
            threshold,
            limit,
        } => {
            let query = match (face, embedding) {
                (Some(id), _) => service.get_embedding(id)?.embedding,
                (None, Some(path)) => read_json::<Vec<f32>>(&path)?,
                (None, None) => bail!("either --face or --embedding is required"),
            };
            let engine = engine::spawn_engine(service)?;
            let hits = engine
                .similar(
                    normalize_user_id(&user),
                    query,
                    threshold.unwrap_or(config.similarity_threshold),
                    limit.unwrap_or(config.similar_limit),
                )
                .await?;
            print_json(&hits)?;
        }

        Commands::Profile { action } => match action {
            ProfileCommand::Enroll { user, detections, images } => {
                let mut detector = SidecarDetector::new(sidecar::load(&detections)?);
                let mut blobs = Vec::with_capacity(images.len());
                for path in &images {
                    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
                    detector.register(&file_name(path), &bytes);
                    blobs.push(bytes);
                }
                let engine = engine::spawn_engine(service)?;
                match engine.enroll(normalize_user_id(&user), blobs, detector).await {
                    Ok(result) => print_json(&result)?,
                    Err(EngineError::Service(ServiceError::Enrollment(err))) => {
                        print_enrollment_failure(&err, &images)?;
                        bail!("{err}");
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            ProfileCommand::EnrollEmbeddings { user, file } => {
                let vectors = read_json::<Vec<Vec<f32>>>(&file)?;
                let engine = engine::spawn_engine(service)?;
                match engine.enroll_embeddings(normalize_user_id(&user), vectors).await {
                    Ok(result) => print_json(&result)?,
                    Err(EngineError::Service(ServiceError::Enrollment(err))) => {
                        print_enrollment_failure(&err, &[])?;
                        bail!("{err}");
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            ProfileCommand::Status { user } => {
                print_json(&service.profile_status(normalize_user_id(&user))?)?;
            }
            ProfileCommand::Remove { user } => {
                let removed = service.remove_profile(normalize_user_id(&user))?;
                print_json(&json!({ "removed": removed }))?;
            }
            ProfileCommand::Match { user, threshold, limit } => {
                let engine = engine::spawn_engine(service)?;
                let matches = engine
                    .match_profile(
                        normalize_user_id(&user),
                        threshold,
                        limit.unwrap_or(config.match_limit),
                    )
                    .await?;
                print_json(&matches)?;
            }
        },
    }

    Ok(())
}

/// Photo ids come from import keys: a UUID is used as-is, anything else
/// (typically a file name) maps to a stable name-based UUID.
fn photo_id(key: &str) -> Uuid {
    Uuid::parse_str(key).unwrap_or_else(|_| Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Per-input diagnostics for a failed enrollment, so every rejected image
/// is explained even though nothing was stored.
fn print_enrollment_failure(err: &facegroup_core::EnrollmentError, images: &[PathBuf]) -> Result<()> {
    let facegroup_core::EnrollmentError::NoAcceptableSamples { diagnostics } = err else {
        return Ok(());
    };
    let rows: Vec<_> = diagnostics
        .iter()
        .map(|d| {
            json!({
                "input": images.get(d.index).map(|p| file_name(p)),
                "index": d.index,
                "reasons": d.reasons,
                "metrics": d.metrics,
            })
        })
        .collect();
    print_json(&json!({ "accepted": 0, "rejected": diagnostics.len(), "diagnostics": rows }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_photo_id() {
        let id = Uuid::new_v4();
        assert_eq!(photo_id(&id.to_string()), id);
        assert_eq!(photo_id("IMG_0001.jpg"), photo_id("IMG_0001.jpg"));
        assert_ne!(photo_id("IMG_0001.jpg"), photo_id("IMG_0002.jpg"));
    }

    #[test]
    fn test_similar_requires_a_query() {
        assert!(Cli::try_parse_from(["facegroup", "similar", "--user", "alice"]).is_err());
        let face = Uuid::new_v4().to_string();
        assert!(Cli::try_parse_from(["facegroup", "similar", "--user", "alice", "--face", face.as_str()]).is_ok());
    }

    #[test]
    fn test_cluster_create_parses_faces() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (sa, sb) = (a.to_string(), b.to_string());
        let cli = Cli::try_parse_from(["facegroup", "cluster", "create", "--user", "alice", sa.as_str(), sb.as_str()])
        .unwrap();
        let Commands::Cluster { action: ClusterCommand::Create { faces, label, .. } } = cli.command else {
            panic!("expected cluster create");
        };
        assert_eq!(faces, vec![a, b]);
        assert!(label.is_none());
    }
}
