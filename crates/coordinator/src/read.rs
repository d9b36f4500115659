use crate::consistency::{ConsistencyCheck, ConsistencyManager};
use crate::{ConsistencyLevel, CoordinatorError, ServerContext};
use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use ring::Endpoint;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use wire::{Message, Mutation, ReadCommand, ReadResponse, Row, Verb};

/// The per-key read path: one full-data read to the closest replica, digest
/// reads to the rest of the quorum, digest verification, version merge, and
/// fire-and-forget repair of stale replicas.
pub struct ReadCoordinator {
    ctx: Arc<ServerContext>,
    consistency: Arc<ConsistencyManager>,
}

impl ReadCoordinator {
    pub fn new(ctx: Arc<ServerContext>, consistency: Arc<ConsistencyManager>) -> Self {
        Self { ctx, consistency }
    }

    pub async fn read(
        &self,
        table: &str,
        key: &str,
        consistency_level: ConsistencyLevel,
    ) -> Result<Row, CoordinatorError> {
        let token = self.ctx.partitioner.token(key);
        let ring = self.ctx.metadata.snapshot();
        let strategy = self.ctx.strategy(table)?;
        let required = consistency_level.block_for(strategy.replication_factor());

        let mut endpoints = strategy.natural_endpoints(&token, &ring)?.as_ref().clone();
        self.ctx
            .snitch
            .sort_by_proximity(&self.ctx.local(), &mut endpoints);
        let alive: Vec<Endpoint> = endpoints
            .into_iter()
            .filter(|endpoint| self.ctx.failure_detector.is_alive(endpoint))
            .collect();
        if alive.len() < required {
            return Err(CoordinatorError::Unavailable {
                required,
                alive: alive.len(),
            });
        }

        let participants = &alive[..required];
        let deadline = self.ctx.deadline();

        let resolved = match self
            .fetch_and_resolve(table, key, participants, deadline, false)
            .await
        {
            Err(CoordinatorError::DigestMismatch) => {
                // Expected disagreement: re-issue as full-data reads and let
                // the merge repair whoever was behind.
                tracing::debug!(table, key, "digest mismatch, re-reading with full data");
                self.fetch_and_resolve(table, key, participants, deadline, true)
                    .await?
            }
            outcome => outcome?,
        };

        // A weak read answers from one replica; verify against the rest in
        // the background.
        if consistency_level == ConsistencyLevel::One && alive.len() > required {
            self.consistency.submit(ConsistencyCheck {
                table: table.to_string(),
                key: Bytes::copy_from_slice(key.as_bytes()),
                row: resolved.clone(),
                origin: participants[0],
                peers: alive[required..].to_vec(),
            });
        }
        Ok(resolved)
    }

    async fn fetch_and_resolve(
        &self,
        table: &str,
        key: &str,
        participants: &[Endpoint],
        deadline: Instant,
        all_data: bool,
    ) -> Result<Row, CoordinatorError> {
        let mut dispatch = FuturesUnordered::new();
        for (index, endpoint) in participants.iter().copied().enumerate() {
            // The closest replica answers with data, the rest with digests.
            let digest_only = !all_data && index != 0;
            let command = ReadCommand {
                table: table.to_string(),
                key: Bytes::copy_from_slice(key.as_bytes()),
                digest_only,
            };
            let message = Message::new(Verb::Read, self.ctx.local(), command.encode());
            let transport = self.ctx.transport.clone();
            dispatch.push(async move {
                let reply = transport.send_rr(endpoint, message).await?;
                let response = ReadResponse::decode(reply.body)?;
                Ok::<_, CoordinatorError>((endpoint, response))
            });
        }

        // Keyed by responder: inserts are idempotent, and anything arriving
        // after this map drops has no external effect.
        let mut responses: HashMap<Endpoint, ReadResponse> = HashMap::new();
        while responses.len() < participants.len() {
            match tokio::time::timeout_at(deadline.into(), dispatch.next()).await {
                Err(_) | Ok(None) => break,
                Ok(Some(Ok((endpoint, response)))) => {
                    responses.entry(endpoint).or_insert(response);
                }
                Ok(Some(Err(err))) => {
                    tracing::warn!(table, key, %err, "replica read failed");
                }
            }
        }
        if responses.len() < participants.len() {
            return Err(CoordinatorError::Timeout {
                received: responses.len(),
                required: participants.len(),
            });
        }
        self.resolve(table, key, responses)
    }

    fn resolve(
        &self,
        table: &str,
        key: &str,
        responses: HashMap<Endpoint, ReadResponse>,
    ) -> Result<Row, CoordinatorError> {
        let mut versions: Vec<(Endpoint, Row)> = Vec::new();
        let mut digests: Vec<(Endpoint, Bytes)> = Vec::new();
        for (endpoint, response) in responses {
            match response {
                ReadResponse::Data(row) => versions.push((endpoint, row)),
                ReadResponse::Digest(digest) => digests.push((endpoint, digest)),
            }
        }

        let Some((_, reference)) = versions.first() else {
            // The data reader is always a participant, so a complete response
            // set without data cannot happen; treat it as a lost response.
            return Err(CoordinatorError::Timeout {
                received: digests.len(),
                required: digests.len() + 1,
            });
        };
        let reference_digest = reference.digest();
        for (endpoint, digest) in &digests {
            if digest.as_ref() != reference_digest {
                tracing::debug!(table, key, %endpoint, "digest disagrees with data read");
                return Err(CoordinatorError::DigestMismatch);
            }
        }

        let resolved = Row::resolve(versions.iter().map(|(_, row)| row));
        for (endpoint, row) in &versions {
            if let Some(diff) = row.diff(&resolved) {
                self.schedule_repair(table, key, *endpoint, diff);
            }
        }
        Ok(resolved)
    }

    /// Send the columns a replica is missing, without blocking the client.
    fn schedule_repair(&self, table: &str, key: &str, endpoint: Endpoint, diff: Row) {
        let mutation = Mutation {
            table: table.to_string(),
            key: Bytes::copy_from_slice(key.as_bytes()),
            row: diff,
        };
        let transport = self.ctx.transport.clone();
        let local = self.ctx.local();
        tracing::debug!(table, key, %endpoint, columns = mutation.row.len(), "scheduling read repair");
        tokio::spawn(async move {
            let message = Message::new(Verb::ReadRepair, local, mutation.encode());
            if let Err(err) = transport.send_one_way(endpoint, message).await {
                tracing::debug!(%endpoint, %err, "read repair not delivered");
            }
        });
    }
}
