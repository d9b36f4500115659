use async_trait::async_trait;
use coordinator::Transport;
use futures::future::BoxFuture;
use ring::Endpoint;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use wire::{Message, TransportError};

pub type MessageHandler = Arc<dyn Fn(Message) -> BoxFuture<'static, Option<Message>> + Send + Sync>;

/// Routes messages between in-process endpoint handlers. Handlers run in
/// their own tasks, so replica-side effects complete even when the sender
/// stops waiting. Endpoints can be cut off to simulate partitions.
#[derive(Default)]
pub struct LoopbackTransport {
    handlers: Mutex<HashMap<Endpoint, MessageHandler>>,
    severed: Mutex<HashSet<Endpoint>>,
}

impl LoopbackTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, endpoint: Endpoint, handler: MessageHandler) {
        self.handlers.lock().unwrap().insert(endpoint, handler);
    }

    /// Cut (or restore) the wire to an endpoint.
    pub fn sever(&self, endpoint: Endpoint, cut: bool) {
        let mut severed = self.severed.lock().unwrap();
        if cut {
            severed.insert(endpoint);
        } else {
            severed.remove(&endpoint);
        }
    }

    fn handler_for(&self, endpoint: &Endpoint) -> Result<MessageHandler, TransportError> {
        if self.severed.lock().unwrap().contains(endpoint) {
            return Err(TransportError::Unreachable(*endpoint));
        }
        self.handlers
            .lock()
            .unwrap()
            .get(endpoint)
            .cloned()
            .ok_or(TransportError::Unreachable(*endpoint))
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send_one_way(&self, to: Endpoint, message: Message) -> Result<(), TransportError> {
        let Ok(handler) = self.handler_for(&to) else {
            // One-way sends into a partition vanish, like the network.
            return Ok(());
        };
        tokio::spawn(async move {
            let _ = handler(message).await;
        });
        Ok(())
    }

    async fn send_rr(&self, to: Endpoint, message: Message) -> Result<Message, TransportError> {
        let handler = self.handler_for(&to)?;
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(handler(message).await);
        });
        match rx.await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(TransportError::Send(to, "no reply".to_string())),
            Err(_) => Err(TransportError::Send(to, "handler dropped".to_string())),
        }
    }
}
