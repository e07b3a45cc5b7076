//! Worker Actor
//!
//! Runs a `ServiceWorker` on its own task. Lifecycle messages are handled in
//! arrival order; fetches are spawned so a slow origin never holds up
//! unrelated requests.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::FetchError;
use crate::fetch::{Fetcher, Request, Response};

use super::service::{CommandReply, InstallReport, ServiceWorker, WorkerCommand, WorkerStats};

const CHANNEL_CAPACITY: usize = 256;

// == Messages ==
#[derive(Debug)]
pub enum WorkerMessage {
    Install {
        reply: oneshot::Sender<InstallReport>,
    },
    Activate {
        reply: oneshot::Sender<usize>,
    },
    Fetch {
        request: Request,
        reply: oneshot::Sender<Result<Response, FetchError>>,
    },
    Message {
        command: WorkerCommand,
        reply: oneshot::Sender<CommandReply>,
    },
    VisibilityHidden,
    Sweep {
        reply: oneshot::Sender<usize>,
    },
    Stats {
        reply: oneshot::Sender<WorkerStats>,
    },
}

// == Spawn ==
/// Starts the worker task. It stops once every handle is dropped.
pub fn spawn_worker(worker: ServiceWorker) -> (WorkerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let task = tokio::spawn(run(Arc::new(worker), rx));
    (WorkerHandle { tx }, task)
}

async fn run(worker: Arc<ServiceWorker>, mut rx: mpsc::Receiver<WorkerMessage>) {
    while let Some(message) = rx.recv().await {
        match message {
            WorkerMessage::Install { reply } => {
                let _ = reply.send(worker.install().await);
            }
            WorkerMessage::Activate { reply } => {
                let _ = reply.send(worker.activate().await);
            }
            WorkerMessage::Fetch { request, reply } => {
                let worker = Arc::clone(&worker);
                tokio::spawn(async move {
                    let _ = reply.send(worker.handle_fetch(request).await);
                });
            }
            WorkerMessage::Message { command, reply } => {
                let _ = reply.send(worker.on_message(command).await);
            }
            WorkerMessage::VisibilityHidden => {
                worker.visibility_hidden().await;
            }
            WorkerMessage::Sweep { reply } => {
                let _ = reply.send(worker.sweep_expired().await);
            }
            WorkerMessage::Stats { reply } => {
                let _ = reply.send(worker.stats().await);
            }
        }
    }
    debug!("Interception worker stopped");
}

// == Handle ==
/// Cloneable client of the worker task.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<WorkerMessage>,
}

fn stopped() -> FetchError {
    FetchError::Unavailable("interception worker has stopped".to_string())
}

impl WorkerHandle {
    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> WorkerMessage,
    ) -> Result<T, FetchError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).await.map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    pub async fn install(&self) -> Result<InstallReport, FetchError> {
        self.call(|reply| WorkerMessage::Install { reply }).await
    }

    pub async fn activate(&self) -> Result<usize, FetchError> {
        self.call(|reply| WorkerMessage::Activate { reply }).await
    }

    /// Routes a request through the worker's strategies.
    pub async fn intercept(&self, request: Request) -> Result<Response, FetchError> {
        self.call(|reply| WorkerMessage::Fetch { request, reply })
            .await?
    }

    pub async fn post_message(&self, command: WorkerCommand) -> Result<CommandReply, FetchError> {
        self.call(|reply| WorkerMessage::Message { command, reply })
            .await
    }

    /// Fire-and-forget sweep triggered by the page going to the background.
    pub async fn visibility_hidden(&self) -> Result<(), FetchError> {
        self.tx
            .send(WorkerMessage::VisibilityHidden)
            .await
            .map_err(|_| stopped())
    }

    pub async fn sweep(&self) -> Result<usize, FetchError> {
        self.call(|reply| WorkerMessage::Sweep { reply }).await
    }

    pub async fn stats(&self) -> Result<WorkerStats, FetchError> {
        self.call(|reply| WorkerMessage::Stats { reply }).await
    }
}

/// Requests made through a handle are intercepted like page requests, so
/// their responses land in the worker's partitions.
#[async_trait]
impl Fetcher for WorkerHandle {
    async fn fetch(&self, request: Request) -> Result<Response, FetchError> {
        self.intercept(request).await
    }
}
