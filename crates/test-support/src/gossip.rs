use coordinator::{FailureDetector, Gossiper};
use placement::Snitch;
use ring::Endpoint;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Liveness under test control. Everything is alive until switched off.
#[derive(Default)]
pub struct SwitchFailureDetector {
    down: Mutex<HashSet<Endpoint>>,
}

impl SwitchFailureDetector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_alive(&self, endpoint: Endpoint, alive: bool) {
        let mut down = self.down.lock().unwrap();
        if alive {
            down.remove(&endpoint);
        } else {
            down.insert(endpoint);
        }
    }
}

impl FailureDetector for SwitchFailureDetector {
    fn is_alive(&self, endpoint: &Endpoint) -> bool {
        !self.down.lock().unwrap().contains(endpoint)
    }
}

/// Fixed rack assignment, no proximity preference.
#[derive(Default)]
pub struct StaticSnitch {
    racks: HashMap<Endpoint, String>,
}

impl StaticSnitch {
    pub fn new(racks: HashMap<Endpoint, String>) -> Arc<Self> {
        Arc::new(Self { racks })
    }

    pub fn single_rack() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl Snitch for StaticSnitch {
    fn rack(&self, endpoint: &Endpoint) -> String {
        self.racks
            .get(endpoint)
            .cloned()
            .unwrap_or_else(|| "RACK1".to_string())
    }

    fn datacenter(&self, _endpoint: &Endpoint) -> String {
        "DC1".to_string()
    }

    fn sort_by_proximity(&self, _reference: &Endpoint, _endpoints: &mut Vec<Endpoint>) {}
}

/// Gossip stand-in: membership and per-endpoint attributes are set by the
/// test; announcements are recorded for assertions.
#[derive(Default)]
pub struct RecordingGossiper {
    members: Mutex<HashSet<Endpoint>>,
    down: Mutex<HashSet<Endpoint>>,
    generations: Mutex<HashMap<Endpoint, u64>>,
    loads: Mutex<HashMap<Endpoint, f64>>,
    announcements: Mutex<Vec<(String, String)>>,
    touched: Mutex<Vec<Endpoint>>,
}

impl RecordingGossiper {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_member(&self, endpoint: Endpoint) {
        self.members.lock().unwrap().insert(endpoint);
    }

    pub fn set_live(&self, endpoint: Endpoint, live: bool) {
        self.add_member(endpoint);
        let mut down = self.down.lock().unwrap();
        if live {
            down.remove(&endpoint);
        } else {
            down.insert(endpoint);
        }
    }

    pub fn set_generation(&self, endpoint: Endpoint, generation: u64) {
        self.generations.lock().unwrap().insert(endpoint, generation);
    }

    pub fn set_load(&self, endpoint: Endpoint, load: f64) {
        self.loads.lock().unwrap().insert(endpoint, load);
    }

    pub fn announcements(&self) -> Vec<(String, String)> {
        self.announcements.lock().unwrap().clone()
    }

    pub fn touched(&self) -> Vec<Endpoint> {
        self.touched.lock().unwrap().clone()
    }
}

impl Gossiper for RecordingGossiper {
    fn live_endpoints(&self) -> Vec<Endpoint> {
        let down = self.down.lock().unwrap();
        let mut live: Vec<Endpoint> = self
            .members
            .lock()
            .unwrap()
            .iter()
            .filter(|endpoint| !down.contains(endpoint))
            .copied()
            .collect();
        live.sort();
        live
    }

    fn dead_endpoints(&self) -> Vec<Endpoint> {
        let mut dead: Vec<Endpoint> = self.down.lock().unwrap().iter().copied().collect();
        dead.sort();
        dead
    }

    fn update_timestamp(&self, endpoint: &Endpoint) {
        self.touched.lock().unwrap().push(*endpoint);
    }

    fn generation(&self, endpoint: &Endpoint) -> Option<u64> {
        self.generations.lock().unwrap().get(endpoint).copied()
    }

    fn load(&self, endpoint: &Endpoint) -> Option<f64> {
        self.loads.lock().unwrap().get(endpoint).copied()
    }

    fn announce(&self, state_key: &str, value: String) {
        self.announcements
            .lock()
            .unwrap()
            .push((state_key.to_string(), value));
    }
}
