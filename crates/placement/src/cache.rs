use ring::{Endpoint, Token};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Memoized token -> replica list. Invalidated wholesale on ring change.
#[derive(Debug, Default)]
pub(crate) struct EndpointCache {
    map: Mutex<HashMap<Token, Arc<Vec<Endpoint>>>>,
}

impl EndpointCache {
    pub fn get(&self, token: &Token) -> Option<Arc<Vec<Endpoint>>> {
        self.map.lock().unwrap().get(token).cloned()
    }

    pub fn insert(&self, token: Token, endpoints: Vec<Endpoint>) -> Arc<Vec<Endpoint>> {
        let endpoints = Arc::new(endpoints);
        self.map.lock().unwrap().insert(token, endpoints.clone());
        endpoints
    }

    pub fn clear(&self) {
        self.map.lock().unwrap().clear();
    }
}
