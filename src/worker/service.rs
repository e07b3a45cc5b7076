//! Interception Worker
//!
//! Lifecycle, request strategies and maintenance of the network interception
//! cache. Caching failures are logged and swallowed so they never change what
//! the wrapped request returns.

use std::fmt;
use std::str::FromStr;

use axum::http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::clock::SharedClock;
use crate::config::Config;
use crate::error::FetchError;
use crate::fetch::{Request, Response, SharedFetcher};

use super::classify::{classify, ClassifyRules, RequestClass};
use super::partition::{
    cached_at, PartitionKind, PartitionNames, PartitionStore, RequestKey, CACHED_AT_HEADER,
};

/// App shell entry points, in lookup order.
const SHELL_PATHS: [&str; 2] = ["/", "/index.html"];

// == Worker State ==
/// Lifecycle of the worker. Only an `Active` worker intercepts requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Installing,
    Activating,
    Active,
}

// == Commands ==
/// Command posted to the worker by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerCommand {
    /// Activate immediately
    #[serde(rename = "skipWaiting")]
    SkipWaiting,
    /// Delete every partition of the current namespace
    #[serde(rename = "clearCache")]
    ClearCache,
}

impl FromStr for WorkerCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skipWaiting" => Ok(WorkerCommand::SkipWaiting),
            "clearCache" => Ok(WorkerCommand::ClearCache),
            other => Err(format!("unknown worker command '{other}'")),
        }
    }
}

impl fmt::Display for WorkerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerCommand::SkipWaiting => f.write_str("skipWaiting"),
            WorkerCommand::ClearCache => f.write_str("clearCache"),
        }
    }
}

// == Reports ==
/// Outcome of precaching during install.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub cached: Vec<String>,
    pub failed: Vec<String>,
}

/// Reply to a posted command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandReply {
    pub command: WorkerCommand,
    pub partitions_removed: usize,
    pub state: WorkerState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionStats {
    pub name: String,
    pub entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub state: WorkerState,
    pub partitions: Vec<PartitionStats>,
}

// == Worker Config ==
/// Static configuration of one worker build.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Versioned build identifier, e.g. `wazhop-v1`
    pub namespace: String,
    /// Origin the app shell and precache manifest are served from
    pub origin: Url,
    /// Paths stored in the static partition at install time
    pub precache: Vec<String>,
    pub rules: ClassifyRules,
}

impl WorkerConfig {
    pub fn new(namespace: impl Into<String>, origin: Url) -> Self {
        Self {
            namespace: namespace.into(),
            origin,
            precache: default_precache(),
            rules: ClassifyRules::default(),
        }
    }
}

impl TryFrom<&Config> for WorkerConfig {
    type Error = url::ParseError;

    fn try_from(config: &Config) -> Result<Self, Self::Error> {
        Ok(Self::new(
            config.cache_namespace.clone(),
            Url::parse(&config.origin_url)?,
        ))
    }
}

fn default_precache() -> Vec<String> {
    [
        "/",
        "/index.html",
        "/manifest.json",
        "/icons/icon-192x192.png",
        "/icons/icon-512x512.png",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

// == Service Worker ==
/// The interception worker. Owns its partition storage exclusively.
pub struct ServiceWorker {
    config: WorkerConfig,
    names: PartitionNames,
    state: RwLock<WorkerState>,
    store: RwLock<Box<dyn PartitionStore>>,
    fetcher: SharedFetcher,
    clock: SharedClock,
}

impl fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("namespace", &self.config.namespace)
            .field("origin", &self.config.origin.as_str())
            .finish_non_exhaustive()
    }
}

impl ServiceWorker {
    pub fn new(
        config: WorkerConfig,
        store: Box<dyn PartitionStore>,
        fetcher: SharedFetcher,
        clock: SharedClock,
    ) -> Self {
        let names = PartitionNames::new(config.namespace.clone());
        Self {
            config,
            names,
            state: RwLock::new(WorkerState::Installing),
            store: RwLock::new(store),
            fetcher,
            clock,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    async fn set_state(&self, state: WorkerState) {
        *self.state.write().await = state;
    }

    // == Lifecycle ==
    /// Opens the static partition and precaches the manifest. Failing assets
    /// are skipped. Ends in `Activating` without waiting for older workers.
    pub async fn install(&self) -> InstallReport {
        self.set_state(WorkerState::Installing).await;
        let partition = self.names.name(PartitionKind::Static);
        self.store.write().await.open(&partition);

        let mut report = InstallReport::default();
        for path in &self.config.precache {
            let url = match self.config.origin.join(path) {
                Ok(url) => url,
                Err(e) => {
                    warn!("Skipping precache entry {}: {}", path, e);
                    report.failed.push(path.clone());
                    continue;
                }
            };
            let request = Request::new(Method::GET, url);
            let key = RequestKey::from(&request);

            match self.fetcher.fetch(request).await {
                Ok(response) if response.is_success() => {
                    if self.store_copy(&partition, key, &response).await {
                        report.cached.push(path.clone());
                    } else {
                        report.failed.push(path.clone());
                    }
                }
                Ok(response) => {
                    warn!("Precache of {} returned {}", path, response.status);
                    report.failed.push(path.clone());
                }
                Err(e) => {
                    warn!("Precache of {} failed: {}", path, e);
                    report.failed.push(path.clone());
                }
            }
        }

        self.set_state(WorkerState::Activating).await;
        info!(
            "Worker {} installed ({} precached, {} skipped)",
            self.names.namespace(),
            report.cached.len(),
            report.failed.len()
        );
        report
    }

    /// Deletes partitions left by older builds of this application, then
    /// starts intercepting. Returns the number of partitions removed.
    pub async fn activate(&self) -> usize {
        self.set_state(WorkerState::Activating).await;
        let prefix = self.names.app_prefix();

        let removed = {
            let mut store = self.store.write().await;
            let stale: Vec<String> = store
                .partition_names()
                .into_iter()
                .filter(|name| name.starts_with(&prefix) && !self.names.is_current(name))
                .collect();
            for name in &stale {
                store.delete_partition(name);
                info!("Deleted old partition {}", name);
            }
            stale.len()
        };

        self.set_state(WorkerState::Active).await;
        info!("Worker {} active", self.names.namespace());
        removed
    }

    // == Fetch Interception ==
    /// Answers an intercepted request.
    ///
    /// Returns `Err` only for bypassed requests whose network fetch failed;
    /// every cached strategy produces a response even when offline.
    pub async fn handle_fetch(&self, request: Request) -> Result<Response, FetchError> {
        if self.state().await != WorkerState::Active {
            return self.fetcher.fetch(request).await;
        }

        match classify(&request, &self.config.rules) {
            RequestClass::Bypass => self.fetcher.fetch(request).await,
            RequestClass::Api => Ok(self
                .network_first(PartitionKind::Api, request)
                .await
                .unwrap_or_else(offline_api_response)),
            RequestClass::Image => Ok(self.cache_first(PartitionKind::Images, request).await),
            RequestClass::Static => Ok(self.cache_first(PartitionKind::Static, request).await),
            RequestClass::Document => Ok(self.network_first_document(request).await),
        }
    }

    /// Live response if the network answers, else any cached copy.
    async fn network_first(&self, kind: PartitionKind, request: Request) -> Option<Response> {
        let partition = self.names.name(kind);
        let key = RequestKey::from(&request);

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    self.store_copy(&partition, key, &response).await;
                }
                Some(response)
            }
            Err(e) => {
                debug!("Network failed for {}: {}", key, e);
                let cached = self.store.read().await.match_any(&key);
                cached
            }
        }
    }

    async fn network_first_document(&self, request: Request) -> Response {
        let navigation = request.is_navigation();
        if let Some(response) = self.network_first(PartitionKind::Dynamic, request).await {
            return response;
        }
        if navigation {
            if let Some(shell) = self.app_shell().await {
                return shell;
            }
        }
        Response::text(StatusCode::SERVICE_UNAVAILABLE, "Offline")
    }

    async fn cache_first(&self, kind: PartitionKind, request: Request) -> Response {
        let partition = self.names.name(kind);
        let key = RequestKey::from(&request);

        let cached = self.store.read().await.get(&partition, &key);
        if let Some(hit) = cached {
            debug!("Cache hit in {} for {}", partition, key);
            return hit;
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    self.store_copy(&partition, key, &response).await;
                }
                response
            }
            Err(e) => {
                debug!("Cache-first miss and network failure for {}: {}", key, e);
                Response::empty(StatusCode::NOT_FOUND)
            }
        }
    }

    async fn app_shell(&self) -> Option<Response> {
        let store = self.store.read().await;
        SHELL_PATHS.iter().find_map(|path| {
            let url = self.config.origin.join(path).ok()?;
            store.match_any(&RequestKey::get(url.as_str()))
        })
    }

    /// Stores a clone of `response` stamped with the current time. Returns
    /// false (after logging) when the partition store refuses it.
    async fn store_copy(&self, partition: &str, key: RequestKey, response: &Response) -> bool {
        let mut copy = response.clone();
        copy.set_header(CACHED_AT_HEADER, &self.clock.now_ms().to_string());

        let result = self.store.write().await.put(partition, key.clone(), copy);
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not cache {} in {}: {}", key, partition, e);
                false
            }
        }
    }

    // == Maintenance ==
    /// Removes entries older than their partition's max age. Entries without
    /// a readable timestamp are treated as expired. Static is never swept.
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut store = self.store.write().await;
        let mut removed = 0;

        for kind in PartitionKind::SWEPT {
            let partition = self.names.name(kind);
            for key in store.keys(&partition) {
                let expired = store
                    .get(&partition, &key)
                    .map(|response| match cached_at(&response) {
                        Some(at) => now.saturating_sub(at) > kind.max_age_ms(),
                        None => true,
                    })
                    .unwrap_or(false);
                if !expired {
                    continue;
                }
                match store.delete(&partition, &key) {
                    Ok(true) => removed += 1,
                    Ok(false) => {}
                    Err(e) => warn!("Could not delete {} from {}: {}", key, partition, e),
                }
            }
        }

        if removed > 0 {
            info!("Swept {} expired responses", removed);
        }
        removed
    }

    /// The page went to the background: sweep now.
    pub async fn visibility_hidden(&self) -> usize {
        self.sweep_expired().await
    }

    /// Deletes every partition under the current namespace.
    pub async fn clear_cache(&self) -> usize {
        let mut store = self.store.write().await;
        let owned: Vec<String> = store
            .partition_names()
            .into_iter()
            .filter(|name| self.names.owns(name))
            .collect();
        for name in &owned {
            store.delete_partition(name);
        }
        info!("Cleared {} partitions", owned.len());
        owned.len()
    }

    /// Handles a posted command. Both commands are idempotent.
    pub async fn on_message(&self, command: WorkerCommand) -> CommandReply {
        let partitions_removed = match command {
            WorkerCommand::SkipWaiting => {
                if self.state().await == WorkerState::Active {
                    0
                } else {
                    self.activate().await
                }
            }
            WorkerCommand::ClearCache => self.clear_cache().await,
        };

        CommandReply {
            command,
            partitions_removed,
            state: self.state().await,
        }
    }

    pub async fn stats(&self) -> WorkerStats {
        let partitions = {
            let store = self.store.read().await;
            store
                .partition_names()
                .into_iter()
                .map(|name| PartitionStats {
                    entries: store.keys(&name).len(),
                    name,
                })
                .collect()
        };

        WorkerStats {
            state: self.state().await,
            partitions,
        }
    }
}

fn offline_api_response() -> Response {
    Response::json(
        StatusCode::SERVICE_UNAVAILABLE,
        &json!({
            "error": "Offline",
            "message": "You are offline and this data has not been cached yet"
        }),
    )
}
