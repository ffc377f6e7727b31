//! Network worker.
//!
//! Clone, pull and push block on the network, so they run on a dedicated OS
//! thread. The engine talks to it with closed request/response types over a
//! command channel; each request carries a one-shot sender for its single
//! response. The worker holds no state beyond the request it is executing.

use std::path::PathBuf;
use std::sync::Mutex;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info_span, warn};

use super::auth::{AuthCredentials, Author};
use super::error::{GitErrorCode, SyncError};

mod ops;

/// Where and how to reach the remote for one operation.
#[derive(Debug, Clone)]
pub struct RemoteSpec {
    pub work_dir: PathBuf,
    pub repo_url: String,
    pub auth: AuthCredentials,
}

/// Requests understood by the worker.
#[derive(Debug, Clone)]
pub enum WorkerRequest {
    /// Clone the remote into an empty working directory.
    Clone(RemoteSpec),
    /// Fetch and fast-forward the checked-out branch.
    Pull { remote: RemoteSpec, author: Author },
    /// Push the checked-out branch.
    Push(RemoteSpec),
}

/// Kind of a worker operation, echoed back on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerAction {
    Clone,
    Pull,
    Push,
}

impl WorkerRequest {
    pub fn action(&self) -> WorkerAction {
        match self {
            WorkerRequest::Clone(_) => WorkerAction::Clone,
            WorkerRequest::Pull { .. } => WorkerAction::Pull,
            WorkerRequest::Push(_) => WorkerAction::Push,
        }
    }
}

/// Exactly one response is produced per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerResponse {
    Ok(WorkerAction),
    Err { code: GitErrorCode, message: String },
}

struct WorkerJob {
    request: WorkerRequest,
    respond_to: oneshot::Sender<WorkerResponse>,
}

/// Handle to the network worker thread, spawned lazily on first use and
/// respawned if it has exited.
#[derive(Default)]
pub struct Worker {
    sender: Mutex<Option<mpsc::Sender<WorkerJob>>>,
}

impl Worker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a worker thread is currently alive.
    pub fn is_running(&self) -> bool {
        self.sender
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|tx| !tx.is_closed()))
            .unwrap_or(false)
    }

    fn sender(&self) -> Result<mpsc::Sender<WorkerJob>, SyncError> {
        let mut guard = self
            .sender
            .lock()
            .map_err(|_| SyncError::WorkerUnavailable("worker handle poisoned".into()))?;

        if let Some(tx) = guard.as_ref()
            && !tx.is_closed()
        {
            return Ok(tx.clone());
        }

        if guard.is_some() {
            warn!("Network worker exited, respawning");
        }
        let tx = spawn_worker_thread()?;
        *guard = Some(tx.clone());
        Ok(tx)
    }

    /// Send a request and wait for its response.
    pub async fn call(&self, request: WorkerRequest) -> Result<WorkerAction, SyncError> {
        let expected = request.action();
        let (respond_to, response) = oneshot::channel();
        let job = WorkerJob {
            request,
            respond_to,
        };

        if let Err(mpsc::error::SendError(job)) = self.sender()?.send(job).await {
            // The thread died between the liveness check and the send.
            self.terminate();
            self.sender()?
                .send(job)
                .await
                .map_err(|_| SyncError::WorkerUnavailable("worker refused request".into()))?;
        }

        match response.await {
            Ok(WorkerResponse::Ok(action)) if action == expected => Ok(action),
            Ok(WorkerResponse::Ok(action)) => Err(SyncError::WorkerUnavailable(format!(
                "worker answered {action:?} to a {expected:?} request"
            ))),
            Ok(WorkerResponse::Err { code, message }) => Err(SyncError::Git { code, message }),
            Err(_) => Err(SyncError::WorkerUnavailable(
                "worker dropped the request".into(),
            )),
        }
    }

    /// Stop the worker thread once it finishes its current request.
    pub fn terminate(&self) {
        if let Ok(mut guard) = self.sender.lock()
            && guard.take().is_some()
        {
            debug!("Terminating network worker");
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("running", &self.is_running())
            .finish()
    }
}

fn spawn_worker_thread() -> Result<mpsc::Sender<WorkerJob>, SyncError> {
    let (tx, mut rx) = mpsc::channel::<WorkerJob>(4);

    std::thread::Builder::new()
        .name("gitstore-worker".into())
        .spawn(move || {
            while let Some(job) = rx.blocking_recv() {
                let action = job.request.action();
                let _span = info_span!("worker", ?action).entered();
                let response = ops::execute(&job.request);
                if job.respond_to.send(response).is_err() {
                    debug!(?action, "Requester went away before the response");
                }
            }
            debug!("Network worker exiting");
        })
        .map_err(|e| SyncError::WorkerUnavailable(e.to_string()))?;

    Ok(tx)
}
