use crate::hints::HintedHandoff;
use crate::{ConsistencyLevel, CoordinatorError, ServerContext};
use futures::stream::{FuturesUnordered, StreamExt};
use ring::Endpoint;
use std::collections::HashSet;
use std::sync::Arc;
use wire::{Message, Mutation, Verb};

/// The per-key write path: dispatch to natural plus pending endpoints, block
/// for the consistency level's acknowledgement count, and hint whatever
/// could not be reached. Timeouts do not roll back; hinted handoff and
/// read-repair converge the stragglers.
pub struct WriteCoordinator {
    ctx: Arc<ServerContext>,
    hints: Arc<HintedHandoff>,
}

impl WriteCoordinator {
    pub fn new(ctx: Arc<ServerContext>, hints: Arc<HintedHandoff>) -> Self {
        Self { ctx, hints }
    }

    pub async fn write(
        &self,
        mutation: Mutation,
        consistency_level: ConsistencyLevel,
    ) -> Result<(), CoordinatorError> {
        let token = self.ctx.key_token(&mutation.key)?;
        let ring = self.ctx.metadata.snapshot();
        let strategy = self.ctx.strategy(&mutation.table)?;
        let required = consistency_level.block_for(strategy.replication_factor());

        let targets = self.ctx.write_endpoints(&mutation.table, &token, &ring)?;
        let (live, dead): (Vec<Endpoint>, Vec<Endpoint>) = targets
            .into_iter()
            .partition(|endpoint| self.ctx.failure_detector.is_alive(endpoint));
        if live.len() < required {
            return Err(CoordinatorError::Unavailable {
                required,
                alive: live.len(),
            });
        }

        // One serialization feeds both the wire and the hint log.
        let body = mutation.encode();

        for endpoint in dead {
            tracing::debug!(table = %mutation.table, %endpoint, "replica down, hinting");
            self.hints.store_hint(endpoint, &body).await;
        }

        let deadline = self.ctx.deadline();
        let mut dispatch = FuturesUnordered::new();
        for endpoint in live.iter().copied() {
            let message = Message::new(Verb::Mutation, self.ctx.local(), body.clone());
            let transport = self.ctx.transport.clone();
            dispatch.push(async move {
                let outcome = transport.send_rr(endpoint, message).await;
                (endpoint, outcome)
            });
        }

        let mut acked: HashSet<Endpoint> = HashSet::new();
        let mut failed: HashSet<Endpoint> = HashSet::new();
        while acked.len() < required {
            match tokio::time::timeout_at(deadline.into(), dispatch.next()).await {
                Err(_) | Ok(None) => break,
                Ok(Some((endpoint, Ok(_ack)))) => {
                    acked.insert(endpoint);
                }
                Ok(Some((endpoint, Err(err)))) => {
                    tracing::warn!(table = %mutation.table, %endpoint, %err, "replica write failed, hinting");
                    failed.insert(endpoint);
                    self.hints.store_hint(endpoint, &body).await;
                }
            }
        }

        if acked.len() >= required {
            return Ok(());
        }
        // Deadline expired: hint the replicas we never heard from and let
        // the client decide. Whatever already applied stays applied.
        for endpoint in live {
            if !acked.contains(&endpoint) && !failed.contains(&endpoint) {
                self.hints.store_hint(endpoint, &body).await;
            }
        }
        Err(CoordinatorError::Timeout {
            received: acked.len(),
            required,
        })
    }
}
