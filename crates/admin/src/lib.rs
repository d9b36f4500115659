//! The management surface operator tooling calls into. The CLI itself lives
//! elsewhere; this crate only exposes the operations and the views it renders.

use coordinator::{HintBacklog, HintedHandoff, ServerContext};
use ring::{Endpoint, Token};
use serde::Serialize;
use std::sync::Arc;
use topology::{OperationMode, RingController, TopologyError};

/// Process exit codes the CLI collaborator maps outcomes onto.
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USAGE: i32 = 1;
    /// Connection failures and refused operations on a draining node.
    pub const CONNECTION: i32 = 3;
}

/// One row of the operator `ring` view.
#[derive(Debug, Clone, Serialize)]
pub struct RingEntry {
    pub token: Token,
    pub endpoint: Endpoint,
    pub alive: bool,
    pub ownership: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub endpoint: Endpoint,
    pub token: Option<Token>,
    pub generation: u64,
    pub mode: String,
    pub hint_backlog: Vec<HintBacklogEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HintBacklogEntry {
    pub endpoint: Endpoint,
    pub hints: usize,
    pub oldest_age_secs: Option<u64>,
}

pub struct AdminService {
    ctx: Arc<ServerContext>,
    controller: Arc<RingController>,
    hints: Arc<HintedHandoff>,
}

impl AdminService {
    pub fn new(
        ctx: Arc<ServerContext>,
        controller: Arc<RingController>,
        hints: Arc<HintedHandoff>,
    ) -> Self {
        Self {
            ctx,
            controller,
            hints,
        }
    }

    /// The ring: every token, its owner, liveness, and ownership fraction.
    pub fn ring_view(&self) -> Vec<RingEntry> {
        let ring = self.ctx.metadata.snapshot();
        let ownership = self.ctx.partitioner.describe_ownership(ring.sorted_tokens());
        ring.sorted_tokens()
            .iter()
            .map(|token| {
                let endpoint = ring.endpoint_for(token).unwrap();
                RingEntry {
                    token: token.clone(),
                    endpoint,
                    alive: self.ctx.failure_detector.is_alive(&endpoint),
                    ownership: ownership.get(token).copied().unwrap_or(0.0),
                }
            })
            .collect()
    }

    pub fn node_info(&self) -> NodeInfo {
        let ring = self.ctx.metadata.snapshot();
        let record = self.controller.system_record();
        let backlog = self
            .hints
            .hint_store()
            .backlog()
            .unwrap_or_default()
            .into_iter()
            .map(|HintBacklog { endpoint, hints, oldest }| HintBacklogEntry {
                endpoint,
                hints,
                oldest_age_secs: oldest
                    .and_then(|at| at.elapsed().ok())
                    .map(|age| age.as_secs()),
            })
            .collect();
        NodeInfo {
            endpoint: self.ctx.local(),
            token: ring.token_for(&self.ctx.local()).cloned(),
            generation: record.generation,
            mode: self.controller.operation_mode().to_string(),
            hint_backlog: backlog,
        }
    }

    pub fn operation_mode(&self) -> OperationMode {
        self.controller.operation_mode()
    }

    pub async fn drain(&self) -> Result<(), TopologyError> {
        tracing::info!("operator requested drain");
        self.controller.drain().await
    }

    pub async fn decommission(&self) -> Result<(), TopologyError> {
        tracing::info!("operator requested decommission");
        self.controller.decommission().await
    }

    pub async fn move_token(&self, target: Token) -> Result<(), TopologyError> {
        tracing::info!(%target, "operator requested move");
        self.controller.move_token(Some(target)).await
    }

    pub async fn load_balance(&self) -> Result<(), TopologyError> {
        tracing::info!("operator requested loadbalance");
        self.controller.move_token(None).await
    }

    pub async fn remove_token(&self, token: Token) -> Result<(), TopologyError> {
        tracing::info!(%token, "operator requested removetoken");
        self.controller.remove_token(token).await
    }

    /// Flush one table's in-memory state.
    pub async fn flush(&self, table: &str) -> anyhow::Result<()> {
        self.ctx.strategy(table)?;
        self.ctx.store.flush(table).await?;
        Ok(())
    }

    /// Trigger a compaction cycle for one table. The storage engine compacts
    /// on flush pressure, so the trigger is a bracketed flush.
    pub async fn compact(&self, table: &str) -> anyhow::Result<()> {
        self.ctx.strategy(table)?;
        self.ctx.stats.compaction_started(table);
        let outcome = self.ctx.store.flush(table).await;
        self.ctx.stats.compaction_finished(table);
        outcome?;
        Ok(())
    }

    /// The per-minute statistics hook.
    pub fn stats_tick(&self) {
        self.ctx.stats.stats_tick();
    }
}
