use crate::sidecar::SidecarDetector;
use facegroup_core::{
    ClusterParams, ClusteringReport, EnrollmentResult, FaceRepository, FaceService, ParameterSuggestion,
    ProfileMatches, ServiceError, SimilarFace,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

type Reply<T> = oneshot::Sender<Result<T, ServiceError>>;

/// Messages sent from the CLI to the engine thread.
enum EngineRequest {
    Cluster {
        user: Uuid,
        params: ClusterParams,
        reply: Reply<ClusteringReport>,
    },
    Suggest {
        user: Uuid,
        reply: Reply<ParameterSuggestion>,
    },
    Similar {
        user: Uuid,
        query: Vec<f32>,
        threshold: f32,
        limit: usize,
        reply: Reply<Vec<SimilarFace>>,
    },
    Enroll {
        user: Uuid,
        images: Vec<Vec<u8>>,
        detector: Box<SidecarDetector>,
        reply: Reply<EnrollmentResult>,
    },
    EnrollEmbeddings {
        user: Uuid,
        vectors: Vec<Vec<f32>>,
        reply: Reply<EnrollmentResult>,
    },
    Match {
        user: Uuid,
        threshold: Option<f32>,
        limit: usize,
        reply: Reply<ProfileMatches>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> EngineRequest) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Cluster a user's faces and replace their cluster set.
    pub async fn cluster(&self, user: Uuid, params: ClusterParams) -> Result<ClusteringReport, EngineError> {
        self.call(|reply| EngineRequest::Cluster { user, params, reply }).await
    }

    pub async fn suggest(&self, user: Uuid) -> Result<ParameterSuggestion, EngineError> {
        self.call(|reply| EngineRequest::Suggest { user, reply }).await
    }

    pub async fn similar(
        &self,
        user: Uuid,
        query: Vec<f32>,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<SimilarFace>, EngineError> {
        self.call(|reply| EngineRequest::Similar {
            user,
            query,
            threshold,
            limit,
            reply,
        })
        .await
    }

    /// Enroll a profile from encoded images, detected through the sidecar.
    pub async fn enroll(
        &self,
        user: Uuid,
        images: Vec<Vec<u8>>,
        detector: SidecarDetector,
    ) -> Result<EnrollmentResult, EngineError> {
        self.call(|reply| EngineRequest::Enroll {
            user,
            images,
            detector: Box::new(detector),
            reply,
        })
        .await
    }

    pub async fn enroll_embeddings(&self, user: Uuid, vectors: Vec<Vec<f32>>) -> Result<EnrollmentResult, EngineError> {
        self.call(|reply| EngineRequest::EnrollEmbeddings { user, vectors, reply })
            .await
    }

    /// Scan the corpus for photos containing the user's profile face.
    pub async fn match_profile(
        &self,
        user: Uuid,
        threshold: Option<f32>,
        limit: usize,
    ) -> Result<ProfileMatches, EngineError> {
        self.call(|reply| EngineRequest::Match {
            user,
            threshold,
            limit,
            reply,
        })
        .await
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Clustering, enrollment and corpus scans are CPU-bound and run here, off
/// the async runtime, one request at a time.
pub fn spawn_engine<S>(service: FaceService<S>) -> Result<EngineHandle, EngineError>
where
    S: FaceRepository + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facegroup-engine".into())
        .spawn(move || {
            tracing::debug!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                handle(&service, req);
            }
            tracing::debug!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn handle<S: FaceRepository>(service: &FaceService<S>, req: EngineRequest) {
    match req {
        EngineRequest::Cluster { user, params, reply } => {
            let _ = reply.send(service.run_clustering(user, params));
        }
        EngineRequest::Suggest { user, reply } => {
            let _ = reply.send(service.suggest_parameters(user));
        }
        EngineRequest::Similar {
            user,
            query,
            threshold,
            limit,
            reply,
        } => {
            let _ = reply.send(service.find_similar(user, &query, threshold, limit));
        }
        EngineRequest::Enroll {
            user,
            images,
            mut detector,
            reply,
        } => {
            let _ = reply.send(service.enroll_profile(user, &images, detector.as_mut()));
        }
        EngineRequest::EnrollEmbeddings { user, vectors, reply } => {
            let _ = reply.send(service.enroll_profile_from_embeddings(user, &vectors));
        }
        EngineRequest::Match {
            user,
            threshold,
            limit,
            reply,
        } => {
            let _ = reply.send(service.match_profile(user, threshold, limit));
        }
    }
}
