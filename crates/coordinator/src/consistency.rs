use crate::ServerContext;
use bytes::Bytes;
use ring::Endpoint;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use wire::{Message, Mutation, ReadCommand, ReadResponse, Row, Verb};

/// A deferred verification of a weak read: the row one replica answered
/// with, checked against the replicas that did not participate.
#[derive(Debug)]
pub struct ConsistencyCheck {
    pub table: String,
    pub key: Bytes,
    pub row: Row,
    pub origin: Endpoint,
    pub peers: Vec<Endpoint>,
}

/// A bounded pool draining weak-read consistency checks. Saturation drops
/// checks rather than slowing reads down; the client already has its answer.
pub struct ConsistencyManager {
    tx: mpsc::Sender<ConsistencyCheck>,
}

const QUEUE_DEPTH: usize = 64;

impl ConsistencyManager {
    pub fn start(ctx: Arc<ServerContext>) -> Arc<Self> {
        let (tx, mut rx) = mpsc::channel::<ConsistencyCheck>(QUEUE_DEPTH);
        let workers = ctx.config.consistency_workers.max(1);
        let slots = Arc::new(Semaphore::new(workers));

        tokio::spawn(async move {
            while let Some(check) = rx.recv().await {
                let Ok(permit) = slots.clone().acquire_owned().await else {
                    break;
                };
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    run_check(ctx, check).await;
                    drop(permit);
                });
            }
        });
        Arc::new(Self { tx })
    }

    pub fn submit(&self, check: ConsistencyCheck) {
        if self.tx.try_send(check).is_err() {
            tracing::warn!("consistency check queue full, dropping check");
        }
    }
}

async fn run_check(ctx: Arc<ServerContext>, check: ConsistencyCheck) {
    let reference = check.row.digest();

    for endpoint in &check.peers {
        if !ctx.failure_detector.is_alive(endpoint) {
            continue;
        }
        let digest = match fetch(&ctx, *endpoint, &check, true).await {
            Some(ReadResponse::Digest(digest)) => digest,
            Some(_) | None => continue,
        };
        if digest.as_ref() == reference {
            continue;
        }

        // The peer disagrees: fetch its version and repair both sides.
        tracing::debug!(table = %check.table, %endpoint, "weak read disagreement");
        let Some(ReadResponse::Data(theirs)) = fetch(&ctx, *endpoint, &check, false).await else {
            continue;
        };
        let resolved = Row::resolve([&check.row, &theirs]);
        for (target, version) in [(*endpoint, &theirs), (check.origin, &check.row)] {
            if let Some(diff) = version.diff(&resolved) {
                let mutation = Mutation {
                    table: check.table.clone(),
                    key: check.key.clone(),
                    row: diff,
                };
                let message = Message::new(Verb::ReadRepair, ctx.local(), mutation.encode());
                if let Err(err) = ctx.transport.send_one_way(target, message).await {
                    tracing::debug!(%target, %err, "consistency repair not delivered");
                }
            }
        }
    }
}

async fn fetch(
    ctx: &ServerContext,
    endpoint: Endpoint,
    check: &ConsistencyCheck,
    digest_only: bool,
) -> Option<ReadResponse> {
    let command = ReadCommand {
        table: check.table.clone(),
        key: check.key.clone(),
        digest_only,
    };
    let message = Message::new(Verb::Read, ctx.local(), command.encode());
    let reply = tokio::time::timeout(ctx.config.rpc_timeout, ctx.transport.send_rr(endpoint, message))
        .await
        .ok()?
        .ok()?;
    ReadResponse::decode(reply.body).ok()
}
