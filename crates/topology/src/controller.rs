use crate::pending::compute_pending_ranges;
use crate::system::SystemRecord;
use crate::TopologyError;
use coordinator::{HintedHandoff, ServerContext};
use futures::stream::{FuturesUnordered, StreamExt};
use ring::{Endpoint, Range, RingSnapshot, Token};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use wire::{Message, MoveValue, Verb, MOVE_STATE_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    Starting,
    Joining,
    Normal,
    Leaving,
    Decommissioned,
    Draining,
    Drained,
}

impl std::fmt::Display for OperationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            OperationMode::Starting => "starting",
            OperationMode::Joining => "joining",
            OperationMode::Normal => "normal",
            OperationMode::Leaving => "leaving",
            OperationMode::Decommissioned => "decommissioned",
            OperationMode::Draining => "draining",
            OperationMode::Drained => "drained",
        };
        f.write_str(text)
    }
}

/// Ask a peer to stream the data of `ranges` for `table`; the reply is the
/// completion ack.
#[derive(Debug, Serialize, Deserialize)]
pub struct StreamRequest {
    pub table: String,
    pub ranges: Vec<Range>,
}

/// Drives ring state from gossip movement events and orchestrates the local
/// node's own transitions. Per-endpoint failures are logged and swallowed;
/// gossip re-asserts liveness on its own schedule.
pub struct RingController {
    ctx: Arc<ServerContext>,
    hints: Arc<HintedHandoff>,
    system: Mutex<SystemRecord>,
    mode: Mutex<OperationMode>,
    /// Latest observed gossip startup generation per endpoint; arbitrates
    /// token collisions.
    generations: Mutex<HashMap<Endpoint, u64>>,
    /// Endpoints held out of the ring while a replacement boots with the
    /// same token.
    hibernating: Mutex<HashSet<Endpoint>>,
    /// Endpoints that lost a token collision.
    replaced: Mutex<HashSet<Endpoint>>,
}

impl RingController {
    pub fn new(
        ctx: Arc<ServerContext>,
        hints: Arc<HintedHandoff>,
    ) -> Result<Arc<Self>, TopologyError> {
        let record = SystemRecord::initialize(
            &ctx.config.system_record_path(),
            &ctx.config.cluster_name,
        )?;
        tracing::info!(
            cluster = %record.cluster_name,
            generation = record.generation,
            "ring controller up"
        );
        Ok(Arc::new(Self {
            ctx,
            hints,
            system: Mutex::new(record),
            mode: Mutex::new(OperationMode::Starting),
            generations: Mutex::new(HashMap::new()),
            hibernating: Mutex::new(HashSet::new()),
            replaced: Mutex::new(HashSet::new()),
        }))
    }

    pub fn operation_mode(&self) -> OperationMode {
        *self.mode.lock().unwrap()
    }

    pub fn system_record(&self) -> SystemRecord {
        self.system.lock().unwrap().clone()
    }

    pub fn is_replaced(&self, endpoint: &Endpoint) -> bool {
        self.replaced.lock().unwrap().contains(endpoint)
    }

    fn set_mode(&self, mode: OperationMode) {
        tracing::info!(%mode, "operation mode");
        *self.mode.lock().unwrap() = mode;
    }

    /// Gossip reports an endpoint alive: refresh it and kick hint delivery.
    pub fn on_endpoint_alive(&self, endpoint: Endpoint) {
        self.ctx.gossiper.update_timestamp(&endpoint);
        self.hints.endpoint_alive(endpoint);
    }

    /// Gossip delivers an application-state tuple for a remote endpoint.
    pub fn apply_state_change(
        &self,
        endpoint: Endpoint,
        state_key: &str,
        value: &str,
        generation: u64,
    ) {
        if state_key != MOVE_STATE_KEY {
            return;
        }
        let value = match MoveValue::decode(value) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(%endpoint, %err, "undecodable MOVE state");
                return;
            }
        };
        self.generations.lock().unwrap().insert(endpoint, generation);

        match value {
            MoveValue::Bootstrapping { token } => self.remote_bootstrapping(endpoint, token),
            MoveValue::Normal { token, remove } => {
                self.remote_normal(endpoint, token, generation);
                if let Some(removed) = remove {
                    self.remote_removed_token(endpoint, removed);
                }
            }
            MoveValue::Leaving { token: _ } => {
                tracing::info!(%endpoint, "endpoint is leaving");
                self.ctx.metadata.add_leaving_endpoint(endpoint);
            }
            MoveValue::Left { token: _ } => {
                tracing::info!(%endpoint, "endpoint left");
                self.ctx.metadata.remove_endpoint(&endpoint);
            }
            MoveValue::Hibernate => {
                // Held out while a replacement boots with the same token.
                tracing::info!(%endpoint, "endpoint hibernating for replacement");
                self.hibernating.lock().unwrap().insert(endpoint);
                return;
            }
        }
        self.after_ring_change();
    }

    fn remote_bootstrapping(&self, endpoint: Endpoint, token: String) {
        let token = Token::new(token);
        tracing::info!(%endpoint, %token, "endpoint bootstrapping");
        if let Err(err) = self.ctx.metadata.add_bootstrap_token(token, endpoint) {
            tracing::warn!(%endpoint, %err, "rejected bootstrap token");
        }
    }

    fn remote_normal(&self, endpoint: Endpoint, token: String, generation: u64) {
        let token = Token::new(token);
        let ring = self.ctx.metadata.snapshot();

        if ring.bootstrap_tokens().get(&token) == Some(&endpoint) {
            tracing::info!(%endpoint, %token, "bootstrap complete");
        } else if !ring.is_member(&endpoint) {
            // BOOT was never seen; tolerated, the end state is the same.
            tracing::info!(%endpoint, %token, "state jump to normal");
        }

        if let Some(current) = ring.endpoint_for(&token) {
            if current != endpoint {
                // Two endpoints advertise one token: the younger gossip
                // generation wins, the loser is marked replaced.
                let current_generation = self
                    .generations
                    .lock()
                    .unwrap()
                    .get(&current)
                    .copied()
                    .unwrap_or(0);
                if generation <= current_generation {
                    tracing::warn!(
                        %endpoint, %token, %current,
                        "ignoring token claim from older generation"
                    );
                    return;
                }
                tracing::warn!(%current, %token, winner = %endpoint, "endpoint replaced");
                self.replaced.lock().unwrap().insert(current);
            }
        }
        self.hibernating.lock().unwrap().remove(&endpoint);
        self.ctx.metadata.remove_bootstrap_token(&token);
        self.ctx.metadata.update_normal_token(token, endpoint);
    }

    fn remote_removed_token(&self, reporter: Endpoint, token: String) {
        let token = Token::new(token);
        let ring = self.ctx.metadata.snapshot();
        let Some(owner) = ring.endpoint_for(&token) else {
            return;
        };
        tracing::info!(%reporter, %token, %owner, "token explicitly removed");
        self.ctx.metadata.remove_endpoint(&owner);
        self.after_ring_change();

        let restore = self.snapshot_for_restore(ring);
        tokio::spawn(async move {
            restore.restore_replica_count().await;
        });
    }

    fn snapshot_for_restore(&self, before: Arc<RingSnapshot>) -> RestoreTask {
        RestoreTask {
            ctx: self.ctx.clone(),
            before,
        }
    }

    /// Recompute every table's pending ranges and drop memoized placement.
    pub fn after_ring_change(&self) {
        self.ctx.clear_endpoint_caches();
        let ring = self.ctx.metadata.snapshot();
        for (table, strategy) in &self.ctx.strategies {
            let table = table.as_str();
            match compute_pending_ranges(strategy.as_ref(), &ring) {
                Ok(map) => self.ctx.metadata.set_pending_ranges(table, map),
                Err(err) => {
                    tracing::warn!(table, %err, "pending ranges not computable")
                }
            }
        }
    }

    /// Join the ring with `token`, streaming existing data in before serving.
    pub async fn bootstrap(&self, token: Token) -> Result<(), TopologyError> {
        let mode = self.operation_mode();
        if mode != OperationMode::Starting {
            return Err(TopologyError::BadMode(mode));
        }
        self.ctx.partitioner.validate_token(&token)?;
        self.set_mode(OperationMode::Joining);
        {
            let mut record = self.system.lock().unwrap();
            record.bootstrap_token = Some(token.clone());
            record.save(&self.ctx.config.system_record_path())?;
        }

        tracing::info!(%token, "bootstrapping");
        self.ctx.gossiper.announce(
            MOVE_STATE_KEY,
            MoveValue::Bootstrapping {
                token: token.as_str().to_string(),
            }
            .encode(),
        );
        self.ctx
            .metadata
            .add_bootstrap_token(token.clone(), self.ctx.local())?;
        self.after_ring_change();

        // Let the announcement settle across the ring.
        tokio::time::sleep(self.ctx.config.ring_delay).await;

        self.stream_in_bootstrap_ranges(&token).await?;
        self.finish_join(token)
    }

    /// Re-announce a bootstrap that crashed before completion.
    pub async fn resume_bootstrap(&self) -> Result<(), TopologyError> {
        let record = self.system_record();
        match record.bootstrap_token {
            Some(token) if !record.bootstrapped => self.bootstrap(token).await,
            _ => Err(TopologyError::Fatal(
                "no interrupted bootstrap to resume".to_string(),
            )),
        }
    }

    /// Rejoin with the persisted token after a clean restart.
    pub fn rejoin(&self) -> Result<(), TopologyError> {
        let record = self.system_record();
        let (true, Some(token)) = (record.bootstrapped, record.bootstrap_token) else {
            return Err(TopologyError::Fatal(
                "node has not bootstrapped; bootstrap or resume instead".to_string(),
            ));
        };
        self.announce_normal(&token);
        self.ctx
            .metadata
            .update_normal_token(token, self.ctx.local());
        self.set_mode(OperationMode::Normal);
        self.after_ring_change();
        Ok(())
    }

    fn finish_join(&self, token: Token) -> Result<(), TopologyError> {
        self.announce_normal(&token);
        self.ctx.metadata.remove_bootstrap_token(&token);
        self.ctx
            .metadata
            .update_normal_token(token.clone(), self.ctx.local());
        {
            let mut record = self.system.lock().unwrap();
            record.bootstrapped = true;
            record.save(&self.ctx.config.system_record_path())?;
        }
        self.set_mode(OperationMode::Normal);
        self.after_ring_change();
        tracing::info!(%token, "joined the ring");
        Ok(())
    }

    fn announce_normal(&self, token: &Token) {
        self.ctx.gossiper.announce(
            MOVE_STATE_KEY,
            MoveValue::Normal {
                token: token.as_str().to_string(),
                remove: None,
            }
            .encode(),
        );
    }

    /// Leave the ring, handing data off to the inheriting replicas.
    pub async fn decommission(&self) -> Result<(), TopologyError> {
        let mode = self.operation_mode();
        if mode != OperationMode::Normal {
            return Err(TopologyError::BadMode(mode));
        }
        let local = self.ctx.local();
        let ring = self.ctx.metadata.snapshot();
        let Some(token) = ring.token_for(&local).cloned() else {
            return Err(TopologyError::Fatal("local node is not a ring member".to_string()));
        };

        self.set_mode(OperationMode::Leaving);
        tracing::info!(%token, "decommissioning");
        self.ctx.gossiper.announce(
            MOVE_STATE_KEY,
            MoveValue::Leaving {
                token: token.as_str().to_string(),
            }
            .encode(),
        );
        self.ctx.metadata.add_leaving_endpoint(local);
        self.after_ring_change();

        tokio::time::sleep(self.ctx.config.ring_delay).await;
        self.stream_out_owned_ranges().await?;

        self.ctx.gossiper.announce(
            MOVE_STATE_KEY,
            MoveValue::Left {
                token: token.as_str().to_string(),
            }
            .encode(),
        );
        self.ctx.metadata.remove_endpoint(&local);
        self.set_mode(OperationMode::Decommissioned);
        self.after_ring_change();
        tracing::info!("decommissioned");
        Ok(())
    }

    /// Move to `target`, or without one, rebalance onto the midpoint of the
    /// most-loaded node's primary range.
    pub async fn move_token(&self, target: Option<Token>) -> Result<(), TopologyError> {
        let mode = self.operation_mode();
        if mode != OperationMode::Normal {
            return Err(TopologyError::BadMode(mode));
        }
        let local = self.ctx.local();
        let ring = self.ctx.metadata.snapshot();
        let Some(current) = ring.token_for(&local).cloned() else {
            return Err(TopologyError::Fatal("local node is not a ring member".to_string()));
        };
        let target = match target {
            Some(token) => token,
            None => self.balanced_token(&ring)?,
        };
        self.ctx.partitioner.validate_token(&target)?;

        self.set_mode(OperationMode::Leaving);
        tracing::info!(%current, %target, "moving token");
        self.ctx.gossiper.announce(
            MOVE_STATE_KEY,
            MoveValue::Leaving {
                token: current.as_str().to_string(),
            }
            .encode(),
        );
        self.ctx.metadata.add_leaving_endpoint(local);
        self.after_ring_change();

        tokio::time::sleep(self.ctx.config.ring_delay).await;
        self.stream_out_owned_ranges().await?;

        // Re-enter at the new position; update_normal_token clears the
        // leaving mark atomically with the move.
        {
            let mut record = self.system.lock().unwrap();
            record.bootstrap_token = Some(target.clone());
            record.save(&self.ctx.config.system_record_path())?;
        }
        self.announce_normal(&target);
        self.ctx.metadata.update_normal_token(target.clone(), local);
        self.set_mode(OperationMode::Normal);
        self.after_ring_change();
        tracing::info!(%target, "token moved");
        Ok(())
    }

    /// The midpoint of the most-loaded live node's primary range.
    fn balanced_token(&self, ring: &RingSnapshot) -> Result<Token, TopologyError> {
        let local = self.ctx.local();
        let mut candidates: Vec<(f64, Endpoint)> = Vec::new();
        for endpoint in self.ctx.gossiper.live_endpoints() {
            if endpoint == local || !ring.is_member(&endpoint) {
                continue;
            }
            let load = self.ctx.gossiper.load(&endpoint).unwrap_or_else(|| {
                // Fall back to sampled ownership when no load is gossiped.
                self.ctx
                    .partitioner
                    .describe_ownership(ring.sorted_tokens())
                    .get(ring.token_for(&endpoint).unwrap())
                    .copied()
                    .unwrap_or(0.0)
            });
            candidates.push((load, endpoint));
        }
        let Some((_, loaded)) = candidates
            .into_iter()
            .max_by(|a, b| a.0.total_cmp(&b.0))
        else {
            return Err(TopologyError::Fatal(
                "no live peers to balance against".to_string(),
            ));
        };
        let range = ring.primary_range(&loaded).unwrap();
        Ok(self.ctx.partitioner.midpoint(&range.left, &range.right))
    }

    /// Evict a dead endpoint's token and restore the replica count of the
    /// ranges it served.
    pub async fn remove_token(&self, token: Token) -> Result<(), TopologyError> {
        let ring = self.ctx.metadata.snapshot();
        let Some(owner) = ring.endpoint_for(&token) else {
            return Err(TopologyError::Fatal(format!("no endpoint owns token {token}")));
        };
        if owner == self.ctx.local() {
            return Err(TopologyError::Fatal(
                "removetoken cannot evict the local node; decommission instead".to_string(),
            ));
        }
        tracing::info!(%token, %owner, "removing token");

        let local_token = ring.token_for(&self.ctx.local()).cloned();
        self.ctx.metadata.remove_endpoint(&owner);
        self.after_ring_change();

        if let Some(local_token) = local_token {
            self.ctx.gossiper.announce(
                MOVE_STATE_KEY,
                MoveValue::Normal {
                    token: local_token.as_str().to_string(),
                    remove: Some(token.as_str().to_string()),
                }
                .encode(),
            );
        }
        self.snapshot_for_restore(ring).restore_replica_count().await;
        Ok(())
    }

    /// Quiesce mutations, flush every table, and roll write-ahead state.
    pub async fn drain(&self) -> Result<(), TopologyError> {
        let mode = self.operation_mode();
        if matches!(
            mode,
            OperationMode::Draining | OperationMode::Drained | OperationMode::Decommissioned
        ) {
            return Err(TopologyError::BadMode(mode));
        }
        self.set_mode(OperationMode::Draining);
        for table in self.ctx.tables() {
            self.ctx
                .store
                .flush(table)
                .await
                .map_err(coordinator::CoordinatorError::Storage)?;
        }
        self.set_mode(OperationMode::Drained);
        tracing::info!("drained");
        Ok(())
    }

    /// Pull the data for the ranges this node will newly serve during a
    /// bootstrap, one stream request per source.
    async fn stream_in_bootstrap_ranges(&self, token: &Token) -> Result<(), TopologyError> {
        let ring = self.ctx.metadata.snapshot();
        let local = self.ctx.local();

        let mut requests: Vec<(Endpoint, StreamRequest)> = Vec::new();
        for (table, strategy) in &self.ctx.strategies {
            // Project the ring as it will stand with us in it.
            let mut future = ring.clone_only_tokens();
            future.update_normal_token(token.clone(), local);
            let Some(owned) = strategy.address_ranges(&future)?.remove(&local) else {
                continue;
            };
            let sources = strategy.range_addresses(&ring)?;
            for range in owned {
                let Some(candidates) = sources.iter().find_map(|(source_range, endpoints)| {
                    source_range.contains_range(&range).then_some(endpoints)
                }) else {
                    continue;
                };
                let mut candidates: Vec<Endpoint> = candidates
                    .iter()
                    .copied()
                    .filter(|endpoint| self.ctx.failure_detector.is_alive(endpoint))
                    .collect();
                if candidates.is_empty() {
                    continue;
                }
                self.ctx.snitch.sort_by_proximity(&local, &mut candidates);
                requests.push((
                    candidates[0],
                    StreamRequest {
                        table: table.clone(),
                        ranges: vec![range],
                    },
                ));
            }
        }
        self.request_streams(requests).await;
        Ok(())
    }

    /// Push every owned range to whoever inherits it once we leave.
    async fn stream_out_owned_ranges(&self) -> Result<(), TopologyError> {
        let ring = self.ctx.metadata.snapshot();
        let all_left = ring.clone_after_all_left();
        let local = self.ctx.local();

        let mut handoffs: Vec<(Endpoint, StreamRequest)> = Vec::new();
        for (table, strategy) in &self.ctx.strategies {
            let Some(owned) = strategy.address_ranges(&ring)?.remove(&local) else {
                continue;
            };
            for range in owned {
                let current: HashSet<Endpoint> = strategy
                    .calculate_natural_endpoints(&range.right, &ring)?
                    .into_iter()
                    .collect();
                for inheritor in strategy.calculate_natural_endpoints(&range.right, &all_left)? {
                    if current.contains(&inheritor) {
                        continue;
                    }
                    handoffs.push((
                        inheritor,
                        StreamRequest {
                            table: table.clone(),
                            ranges: vec![range.clone()],
                        },
                    ));
                }
            }
        }
        self.initiate_streams(handoffs).await;
        Ok(())
    }

    /// Request inbound streams and block for the acks.
    async fn request_streams(&self, requests: Vec<(Endpoint, StreamRequest)>) {
        self.exchange(Verb::StreamRequest, requests).await;
    }

    /// Announce outbound streams and block for the acks.
    async fn initiate_streams(&self, requests: Vec<(Endpoint, StreamRequest)>) {
        self.exchange(Verb::StreamInitiate, requests).await;
    }

    async fn exchange(&self, verb: Verb, requests: Vec<(Endpoint, StreamRequest)>) {
        let local = self.ctx.local();
        let mut exchanges = FuturesUnordered::new();
        for (endpoint, request) in requests {
            let body = match serde_json::to_vec(&request) {
                Ok(body) => body,
                Err(err) => {
                    tracing::warn!(%err, "unencodable stream request");
                    continue;
                }
            };
            let transport = self.ctx.transport.clone();
            let timeout = self.ctx.config.rpc_timeout;
            exchanges.push(async move {
                let message = Message::new(verb, local, body);
                let outcome =
                    tokio::time::timeout(timeout, transport.send_rr(endpoint, message)).await;
                (endpoint, request, outcome)
            });
        }
        while let Some((endpoint, request, outcome)) = exchanges.next().await {
            match outcome {
                Ok(Ok(_ack)) => {
                    tracing::debug!(%endpoint, table = %request.table, "stream acknowledged")
                }
                Ok(Err(err)) => {
                    tracing::warn!(%endpoint, table = %request.table, %err, "stream failed")
                }
                Err(_elapsed) => {
                    tracing::warn!(%endpoint, table = %request.table, "stream timed out")
                }
            }
        }
    }
}

/// Replica restoration after an unexpected removal: stream each range the
/// local node newly serves from the nearest live replica.
struct RestoreTask {
    ctx: Arc<ServerContext>,
    before: Arc<RingSnapshot>,
}

impl RestoreTask {
    async fn restore_replica_count(self) {
        let after = self.ctx.metadata.snapshot();
        let local = self.ctx.local();

        for (table, strategy) in &self.ctx.strategies {
            let table = table.as_str();
            let owned_before: HashSet<Range> = match strategy.address_ranges(&self.before) {
                Ok(mut map) => map.remove(&local).unwrap_or_default().into_iter().collect(),
                Err(err) => {
                    tracing::warn!(table, %err, "skipping replica restoration");
                    continue;
                }
            };
            let owned_after = match strategy.address_ranges(&after) {
                Ok(mut map) => map.remove(&local).unwrap_or_default(),
                Err(err) => {
                    tracing::warn!(table, %err, "skipping replica restoration");
                    continue;
                }
            };
            let replicas_after = match strategy.range_addresses(&after) {
                Ok(map) => map,
                Err(err) => {
                    tracing::warn!(table, %err, "skipping replica restoration");
                    continue;
                }
            };

            for range in owned_after {
                if owned_before.contains(&range) {
                    continue;
                }
                let mut sources: Vec<Endpoint> = replicas_after
                    .get(&range)
                    .into_iter()
                    .flatten()
                    .copied()
                    .filter(|endpoint| {
                        *endpoint != local && self.ctx.failure_detector.is_alive(endpoint)
                    })
                    .collect();
                if sources.is_empty() {
                    tracing::warn!(table, %range, "no live source to restore from");
                    continue;
                }
                self.ctx.snitch.sort_by_proximity(&local, &mut sources);
                let source = sources[0];
                tracing::info!(table, %range, %source, "restoring replica");

                let request = StreamRequest {
                    table: table.to_string(),
                    ranges: vec![range],
                };
                let body = match serde_json::to_vec(&request) {
                    Ok(body) => body,
                    Err(err) => {
                        tracing::warn!(%err, "unencodable stream request");
                        continue;
                    }
                };
                let message = Message::new(Verb::StreamRequest, local, body);
                if let Err(err) = self.ctx.transport.send_one_way(source, message).await {
                    tracing::warn!(%source, %err, "restoration stream request failed");
                }
            }
        }
    }
}
