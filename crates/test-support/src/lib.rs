//! In-process cluster doubles for coordinator and topology tests: a loopback
//! transport routing messages between per-endpoint handlers, a Bloom-fronted
//! in-memory store, and static snitch / failure-detector / gossiper stands.

mod cluster;
mod gossip;
mod store;
mod transport;

pub use cluster::{TestCluster, TestNode};
pub use gossip::{RecordingGossiper, StaticSnitch, SwitchFailureDetector};
pub use store::MemoryStore;
pub use transport::{LoopbackTransport, MessageHandler};

use std::sync::Once;
use std::time::Duration;

/// Route test logs through `RUST_LOG`, once per process.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Poll `check` until it holds or a few seconds elapse. For asserting on
/// fire-and-forget effects (read repair, hint replay).
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}
