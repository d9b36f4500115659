use crate::{LoopbackTransport, MemoryStore, RecordingGossiper, StaticSnitch, SwitchFailureDetector};
use bytes::Bytes;
use coordinator::{NodeConfig, NullStats, ServerContext};
use placement::{build_strategy, ReplicaConfig, Snitch};
use ring::{Endpoint, Partitioner, TokenMetadata};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wire::{Message, Verb};

/// One in-process endpoint: its address and backing store.
#[derive(Clone)]
pub struct TestNode {
    pub endpoint: Endpoint,
    pub store: Arc<MemoryStore>,
}

/// A small in-process cluster: nodes with memory stores behind a loopback
/// transport, plus shared gossip/failure/snitch doubles.
pub struct TestCluster {
    pub transport: Arc<LoopbackTransport>,
    pub failures: Arc<SwitchFailureDetector>,
    pub gossiper: Arc<RecordingGossiper>,
    pub snitch: Arc<StaticSnitch>,
    pub nodes: Vec<TestNode>,
    dirs: Mutex<Vec<tempfile::TempDir>>,
}

impl TestCluster {
    pub fn new(size: usize) -> Self {
        Self::with_snitch(size, StaticSnitch::single_rack())
    }

    pub fn with_snitch(size: usize, snitch: Arc<StaticSnitch>) -> Self {
        crate::init_tracing();
        let transport = LoopbackTransport::new();
        let failures = SwitchFailureDetector::new();
        let gossiper = RecordingGossiper::new();

        let mut nodes = Vec::with_capacity(size);
        for index in 0..size {
            let endpoint: Endpoint = format!("10.0.0.{}:7000", index + 1).parse().unwrap();
            let store = MemoryStore::new();
            register_store_handler(&transport, endpoint, store.clone());
            gossiper.add_member(endpoint);
            nodes.push(TestNode { endpoint, store });
        }
        Self {
            transport,
            failures,
            gossiper,
            snitch,
            nodes,
            dirs: Mutex::new(Vec::new()),
        }
    }

    pub fn endpoint(&self, index: usize) -> Endpoint {
        self.nodes[index].endpoint
    }

    pub fn store(&self, index: usize) -> &Arc<MemoryStore> {
        &self.nodes[index].store
    }

    /// A coordinator context for one node. Each context carries its own ring
    /// metadata; tests populate it to taste.
    pub fn context(
        &self,
        index: usize,
        partitioner: Arc<dyn Partitioner>,
        tables: &[ReplicaConfig],
    ) -> Arc<ServerContext> {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig {
            cluster_name: "meridian-test".to_string(),
            listen: self.endpoint(index),
            data_dir: dir.path().to_path_buf(),
            rpc_timeout: Duration::from_millis(250),
            ring_delay: Duration::from_millis(10),
            hint_throttle: None,
            consistency_workers: 2,
        };
        self.dirs.lock().unwrap().push(dir);

        let strategies = tables
            .iter()
            .map(|table| {
                let snitch: Arc<dyn Snitch> = self.snitch.clone();
                (table.table.clone(), build_strategy(table, snitch))
            })
            .collect::<HashMap<_, _>>();

        Arc::new(ServerContext {
            config,
            partitioner,
            metadata: Arc::new(TokenMetadata::new()),
            strategies,
            transport: self.transport.clone(),
            store: self.nodes[index].store.clone(),
            gossiper: self.gossiper.clone(),
            failure_detector: self.failures.clone(),
            snitch: self.snitch.clone(),
            stats: Arc::new(NullStats),
        })
    }
}

fn register_store_handler(
    transport: &Arc<LoopbackTransport>,
    endpoint: Endpoint,
    store: Arc<MemoryStore>,
) {
    let handler: crate::MessageHandler = Arc::new(move |message: Message| {
        let store = store.clone();
        Box::pin(async move {
            match message.verb {
                // Streaming is out of scope for the memory store; ack it so
                // lifecycle operations can block on completion.
                Verb::StreamRequest | Verb::StreamInitiate => {
                    Some(Message::new(message.verb, endpoint, Bytes::new()))
                }
                _ => match coordinator::handle_message(store.as_ref(), endpoint, message).await {
                    Ok(reply) => reply,
                    Err(err) => {
                        tracing::debug!(%endpoint, %err, "test handler error");
                        None
                    }
                },
            }
        })
    });
    transport.register(endpoint, handler);
}
