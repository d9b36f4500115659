use crate::ServerContext;
use bytes::Bytes;
use ring::Endpoint;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use wire::{Message, Verb};

/// Durable, per-endpoint ordered hint queue: one directory per destination,
/// one fsynced sequence-numbered file per hint. Files are removed only after
/// the destination acknowledged the replayed mutation.
#[derive(Debug)]
pub struct HintStore {
    root: PathBuf,
    seq: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintBacklog {
    pub endpoint: Endpoint,
    pub hints: usize,
    pub oldest: Option<SystemTime>,
}

impl HintStore {
    pub fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        // Resume numbering past anything already on disk.
        let mut max_seq = 0u64;
        for entry in std::fs::read_dir(&root)? {
            let dir = entry?.path();
            if !dir.is_dir() {
                continue;
            }
            for hint in std::fs::read_dir(&dir)? {
                if let Some(seq) = parse_seq(&hint?.path()) {
                    max_seq = max_seq.max(seq + 1);
                }
            }
        }
        Ok(Self {
            root,
            seq: AtomicU64::new(max_seq),
        })
    }

    pub fn store(&self, endpoint: &Endpoint, body: &[u8]) -> std::io::Result<PathBuf> {
        let dir = self.root.join(endpoint.to_string());
        std::fs::create_dir_all(&dir)?;
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let path = dir.join(format!("{seq:020}.hint"));
        let mut file = std::fs::File::create(&path)?;
        file.write_all(body)?;
        file.sync_all()?;
        Ok(path)
    }

    /// Hint files for `endpoint`, oldest first.
    pub fn queued(&self, endpoint: &Endpoint) -> std::io::Result<Vec<PathBuf>> {
        let dir = self.root.join(endpoint.to_string());
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| parse_seq(path).is_some())
            .collect();
        paths.sort();
        Ok(paths)
    }

    pub fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    pub fn remove(&self, path: &Path) -> std::io::Result<()> {
        std::fs::remove_file(path)
    }

    /// Queue depth and oldest-hint age per destination, for operators
    /// watching handoff backlogs.
    pub fn backlog(&self) -> std::io::Result<Vec<HintBacklog>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let dir = entry?.path();
            let Some(endpoint) = dir
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.parse::<Endpoint>().ok())
            else {
                continue;
            };
            let paths = self.queued(&endpoint)?;
            if paths.is_empty() {
                continue;
            }
            let oldest = paths
                .first()
                .and_then(|path| std::fs::metadata(path).ok())
                .and_then(|meta| meta.modified().ok());
            out.push(HintBacklog {
                endpoint,
                hints: paths.len(),
                oldest,
            });
        }
        out.sort_by_key(|backlog| backlog.endpoint);
        Ok(out)
    }
}

fn parse_seq(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".hint")?;
    stem.parse().ok()
}

/// Replays stored hints when their destination returns to service. At most
/// one delivery task runs per endpoint.
pub struct HintedHandoff {
    ctx: Arc<ServerContext>,
    store: Arc<HintStore>,
    queued_deliveries: Mutex<HashSet<Endpoint>>,
}

impl HintedHandoff {
    pub fn new(ctx: Arc<ServerContext>) -> std::io::Result<Arc<Self>> {
        let store = Arc::new(HintStore::open(ctx.config.hints_dir())?);
        Ok(Arc::new(Self {
            ctx,
            store,
            queued_deliveries: Mutex::new(HashSet::new()),
        }))
    }

    pub fn hint_store(&self) -> &Arc<HintStore> {
        &self.store
    }

    /// Persist one hint. Failures are logged, never surfaced: the write has
    /// its own consistency accounting and repair paths.
    pub async fn store_hint(&self, endpoint: Endpoint, body: &Bytes) {
        let store = self.store.clone();
        let body = body.clone();
        match tokio::task::spawn_blocking(move || store.store(&endpoint, &body)).await {
            Ok(Ok(path)) => {
                tracing::debug!(%endpoint, path = %path.display(), "stored hint")
            }
            Ok(Err(err)) => tracing::warn!(%endpoint, %err, "failed to store hint"),
            Err(err) => tracing::warn!(%endpoint, %err, "hint store task failed"),
        }
    }

    /// Gossip reports `endpoint` alive: drain its queue, unless a delivery
    /// task already is.
    pub fn endpoint_alive(self: &Arc<Self>, endpoint: Endpoint) {
        {
            let mut queued = self.queued_deliveries.lock().unwrap();
            if !queued.insert(endpoint) {
                return;
            }
        }
        let this = self.clone();
        tokio::spawn(async move {
            this.deliver(endpoint).await;
            this.queued_deliveries.lock().unwrap().remove(&endpoint);
        });
    }

    async fn deliver(&self, endpoint: Endpoint) {
        let paths = match self.store.queued(&endpoint) {
            Ok(paths) => paths,
            Err(err) => {
                tracing::warn!(%endpoint, %err, "cannot list hint queue");
                return;
            }
        };
        if paths.is_empty() {
            return;
        }
        tracing::info!(%endpoint, hints = paths.len(), "draining hint queue");

        for path in paths {
            loop {
                if !self.ctx.failure_detector.is_alive(&endpoint) {
                    tracing::debug!(%endpoint, "endpoint died mid-replay, stopping");
                    return;
                }
                let body = match self.store.read(&path) {
                    Ok(body) => body,
                    Err(err) => {
                        tracing::warn!(path = %path.display(), %err, "unreadable hint, skipping");
                        break;
                    }
                };
                let message = Message::new(Verb::Mutation, self.ctx.local(), body);
                let outcome = tokio::time::timeout(
                    self.ctx.config.rpc_timeout,
                    self.ctx.transport.send_rr(endpoint, message),
                )
                .await;
                match outcome {
                    Ok(Ok(_ack)) => {
                        self.ctx.gossiper.update_timestamp(&endpoint);
                        if let Err(err) = self.store.remove(&path) {
                            tracing::warn!(path = %path.display(), %err, "failed to drop delivered hint");
                        }
                        break;
                    }
                    Ok(Err(err)) => {
                        tracing::debug!(%endpoint, %err, "hint delivery failed, backing off");
                        tokio::time::sleep(self.ctx.config.rpc_timeout).await;
                    }
                    Err(_elapsed) => {
                        tracing::debug!(%endpoint, "hint delivery timed out, backing off");
                        tokio::time::sleep(self.ctx.config.rpc_timeout).await;
                    }
                }
            }
            if let Some(throttle) = self.ctx.config.hint_throttle {
                tokio::time::sleep(throttle).await;
            }
        }
    }
}
