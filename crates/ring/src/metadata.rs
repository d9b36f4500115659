use crate::{Endpoint, Range, RingError, Token};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use superslice::Ext;

/// Where writes must additionally go while topology is in motion.
pub type PendingRanges = HashMap<Range, HashSet<Endpoint>>;

/// The index of the smallest token >= `token`, wrapping to the front past
/// the end. `sorted` must be non-empty.
pub fn first_token_index(sorted: &[Token], token: &Token) -> usize {
    debug_assert!(!sorted.is_empty());
    let index = sorted.lower_bound(token);
    if index == sorted.len() {
        0
    } else {
        index
    }
}

/// An immutable, internally consistent view of the ring. Snapshots are cheap
/// to clone; detached clones may be mutated freely for what-if projections
/// (pending-range math) without touching the live ring.
#[derive(Debug, Clone, Default)]
pub struct RingSnapshot {
    sorted: Arc<Vec<Token>>,
    normal: HashMap<Token, Endpoint>,
    by_endpoint: HashMap<Endpoint, Token>,
    bootstrap: HashMap<Token, Endpoint>,
    leaving: HashSet<Endpoint>,
    pending: HashMap<String, Arc<PendingRanges>>,
}

impl RingSnapshot {
    pub fn sorted_tokens(&self) -> &[Token] {
        &self.sorted
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    pub fn endpoint_for(&self, token: &Token) -> Option<Endpoint> {
        self.normal.get(token).copied()
    }

    pub fn token_for(&self, endpoint: &Endpoint) -> Option<&Token> {
        self.by_endpoint.get(endpoint)
    }

    pub fn is_member(&self, endpoint: &Endpoint) -> bool {
        self.by_endpoint.contains_key(endpoint)
    }

    pub fn normal_endpoints(&self) -> impl Iterator<Item = (&Token, Endpoint)> {
        self.normal.iter().map(|(token, ep)| (token, *ep))
    }

    pub fn bootstrap_tokens(&self) -> &HashMap<Token, Endpoint> {
        &self.bootstrap
    }

    pub fn leaving_endpoints(&self) -> &HashSet<Endpoint> {
        &self.leaving
    }

    pub fn first_token_index(&self, token: &Token) -> Option<usize> {
        if self.sorted.is_empty() {
            None
        } else {
            Some(first_token_index(&self.sorted, token))
        }
    }

    /// The smallest token >= `token`, wrapping at the end.
    pub fn first_token(&self, token: &Token) -> Option<&Token> {
        self.first_token_index(token).map(|i| &self.sorted[i])
    }

    pub fn predecessor(&self, token: &Token) -> Option<&Token> {
        let n = self.sorted.len();
        let index = self.index_of(token)?;
        Some(&self.sorted[(index + n - 1) % n])
    }

    pub fn successor(&self, token: &Token) -> Option<&Token> {
        let n = self.sorted.len();
        let index = self.index_of(token)?;
        Some(&self.sorted[(index + 1) % n])
    }

    fn index_of(&self, token: &Token) -> Option<usize> {
        let index = self.sorted.lower_bound(token);
        (index < self.sorted.len() && self.sorted[index] == *token).then_some(index)
    }

    /// Tokens in deterministic cyclic order, one full turn from `start`.
    pub fn ring_iter(&self, start: usize) -> impl Iterator<Item = &Token> {
        let n = self.sorted.len();
        (0..n).map(move |k| &self.sorted[(start + k) % n])
    }

    /// The arc a member endpoint is primarily responsible for:
    /// (predecessor, own token].
    pub fn primary_range(&self, endpoint: &Endpoint) -> Option<Range> {
        let token = self.by_endpoint.get(endpoint)?;
        let left = self.predecessor(token)?;
        Some(Range::new(left.clone(), token.clone()))
    }

    pub fn pending_range_map(&self, table: &str) -> Option<&Arc<PendingRanges>> {
        self.pending.get(table)
    }

    /// Ranges `endpoint` is becoming responsible for in `table`.
    pub fn pending_ranges(&self, table: &str, endpoint: &Endpoint) -> Vec<Range> {
        let Some(map) = self.pending.get(table) else {
            return Vec::new();
        };
        map.iter()
            .filter(|(_, endpoints)| endpoints.contains(endpoint))
            .map(|(range, _)| range.clone())
            .collect()
    }

    /// Endpoints owed writes for `token` in `table` beyond the natural set.
    pub fn pending_endpoints(&self, table: &str, token: &Token) -> Vec<Endpoint> {
        let Some(map) = self.pending.get(table) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for (range, endpoints) in map.iter() {
            if range.contains(token) {
                for ep in endpoints {
                    if !out.contains(ep) {
                        out.push(*ep);
                    }
                }
            }
        }
        out
    }

    pub fn update_normal_token(&mut self, token: Token, endpoint: Endpoint) {
        // Any prior binding of either the token or the endpoint goes away,
        // in whichever map it lives.
        self.bootstrap.retain(|t, ep| *t != token && *ep != endpoint);
        self.leaving.remove(&endpoint);
        if let Some(old_token) = self.by_endpoint.remove(&endpoint) {
            self.normal.remove(&old_token);
        }
        if let Some(old_endpoint) = self.normal.remove(&token) {
            self.by_endpoint.remove(&old_endpoint);
        }
        self.normal.insert(token.clone(), endpoint);
        self.by_endpoint.insert(endpoint, token);
        self.rebuild_sorted();
    }

    pub fn add_bootstrap_token(&mut self, token: Token, endpoint: Endpoint) -> Result<(), RingError> {
        if let Some(owner) = self.normal.get(&token) {
            return Err(RingError::TokenBound {
                token,
                endpoint: *owner,
            });
        }
        if let Some(owner) = self.bootstrap.get(&token) {
            if *owner != endpoint {
                return Err(RingError::TokenBound {
                    token,
                    endpoint: *owner,
                });
            }
        }
        self.bootstrap.retain(|_, ep| *ep != endpoint);
        self.bootstrap.insert(token, endpoint);
        Ok(())
    }

    pub fn remove_bootstrap_token(&mut self, token: &Token) {
        self.bootstrap.remove(token);
    }

    pub fn add_leaving_endpoint(&mut self, endpoint: Endpoint) {
        debug_assert!(self.is_member(&endpoint));
        self.leaving.insert(endpoint);
    }

    pub fn remove_endpoint(&mut self, endpoint: &Endpoint) {
        self.bootstrap.retain(|_, ep| ep != endpoint);
        self.leaving.remove(endpoint);
        if let Some(token) = self.by_endpoint.remove(endpoint) {
            self.normal.remove(&token);
            self.rebuild_sorted();
        }
    }

    pub fn set_pending_ranges(&mut self, table: &str, map: PendingRanges) {
        if map.is_empty() {
            self.pending.remove(table);
        } else {
            self.pending.insert(table.to_string(), Arc::new(map));
        }
    }

    /// A tokens-only projection: the normal ring without bootstrap, leaving,
    /// or pending state.
    pub fn clone_only_tokens(&self) -> RingSnapshot {
        RingSnapshot {
            sorted: self.sorted.clone(),
            normal: self.normal.clone(),
            by_endpoint: self.by_endpoint.clone(),
            ..Default::default()
        }
    }

    /// The ring as it will stand once every leaving endpoint has left.
    pub fn clone_after_all_left(&self) -> RingSnapshot {
        let mut projection = self.clone_only_tokens();
        for endpoint in &self.leaving {
            projection.remove_endpoint(endpoint);
        }
        projection
    }

    fn rebuild_sorted(&mut self) {
        let mut sorted: Vec<Token> = self.normal.keys().cloned().collect();
        sorted.sort();
        self.sorted = Arc::new(sorted);
    }
}

/// The authoritative in-memory ring. One write lock serializes mutators;
/// readers clone an `Arc` snapshot and never block. Holding a snapshot across
/// a ring mutation observes the pre-mutation ring, by design of the callers
/// that take explicit snapshots.
#[derive(Debug, Default)]
pub struct TokenMetadata {
    current: RwLock<Arc<RingSnapshot>>,
}

impl TokenMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<RingSnapshot> {
        self.current.read().unwrap().clone()
    }

    fn mutate<R>(&self, apply: impl FnOnce(&mut RingSnapshot) -> R) -> R {
        let mut guard = self.current.write().unwrap();
        let mut next = (**guard).clone();
        let out = apply(&mut next);
        *guard = Arc::new(next);
        out
    }

    pub fn update_normal_token(&self, token: Token, endpoint: Endpoint) {
        self.mutate(|ring| ring.update_normal_token(token, endpoint));
    }

    pub fn add_bootstrap_token(&self, token: Token, endpoint: Endpoint) -> Result<(), RingError> {
        self.mutate(|ring| ring.add_bootstrap_token(token, endpoint))
    }

    pub fn remove_bootstrap_token(&self, token: &Token) {
        self.mutate(|ring| ring.remove_bootstrap_token(token));
    }

    pub fn add_leaving_endpoint(&self, endpoint: Endpoint) {
        self.mutate(|ring| ring.add_leaving_endpoint(endpoint));
    }

    pub fn remove_endpoint(&self, endpoint: &Endpoint) {
        self.mutate(|ring| ring.remove_endpoint(endpoint));
    }

    pub fn set_pending_ranges(&self, table: &str, map: PendingRanges) {
        self.mutate(|ring| ring.set_pending_ranges(table, map));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(text: &str) -> Endpoint {
        text.parse().unwrap()
    }

    fn populated() -> TokenMetadata {
        let meta = TokenMetadata::new();
        meta.update_normal_token(Token::from("20"), ep("10.0.0.1:7000"));
        meta.update_normal_token(Token::from("80"), ep("10.0.0.2:7000"));
        meta.update_normal_token(Token::from("e0"), ep("10.0.0.3:7000"));
        meta
    }

    #[test]
    fn sorted_tokens_track_membership() {
        let meta = populated();
        let ring = meta.snapshot();
        let texts: Vec<&str> = ring.sorted_tokens().iter().map(Token::as_str).collect();
        assert_eq!(texts, vec!["20", "80", "e0"]);
    }

    #[test]
    fn update_replaces_both_bindings() {
        let meta = populated();

        // Moving an endpoint to a new token releases its old token.
        meta.update_normal_token(Token::from("40"), ep("10.0.0.1:7000"));
        let ring = meta.snapshot();
        assert_eq!(ring.endpoint_for(&Token::from("20")), None);
        assert_eq!(ring.endpoint_for(&Token::from("40")), Some(ep("10.0.0.1:7000")));

        // Rebinding a token to a new endpoint evicts the old owner entirely.
        meta.update_normal_token(Token::from("40"), ep("10.0.0.9:7000"));
        let ring = meta.snapshot();
        assert_eq!(ring.endpoint_for(&Token::from("40")), Some(ep("10.0.0.9:7000")));
        assert!(!ring.is_member(&ep("10.0.0.1:7000")));
    }

    #[test]
    fn first_token_wraps() {
        let meta = populated();
        let ring = meta.snapshot();
        assert_eq!(ring.first_token(&Token::from("21")).unwrap().as_str(), "80");
        assert_eq!(ring.first_token(&Token::from("80")).unwrap().as_str(), "80");
        assert_eq!(ring.first_token(&Token::from("ff")).unwrap().as_str(), "20");
    }

    #[test]
    fn neighbors_wrap() {
        let meta = populated();
        let ring = meta.snapshot();
        assert_eq!(ring.predecessor(&Token::from("20")).unwrap().as_str(), "e0");
        assert_eq!(ring.successor(&Token::from("e0")).unwrap().as_str(), "20");
        assert_eq!(ring.predecessor(&Token::from("21")), None);
    }

    #[test]
    fn bootstrap_tokens_stay_disjoint() {
        let meta = populated();
        let joiner = ep("10.0.0.4:7000");

        assert!(meta
            .add_bootstrap_token(Token::from("20"), joiner)
            .is_err());
        meta.add_bootstrap_token(Token::from("50"), joiner).unwrap();

        // A re-announcement with a different token supersedes the first.
        meta.add_bootstrap_token(Token::from("55"), joiner).unwrap();
        let ring = meta.snapshot();
        assert_eq!(ring.bootstrap_tokens().len(), 1);
        assert!(ring.bootstrap_tokens().contains_key(&Token::from("55")));

        // Completing the bootstrap promotes the binding.
        meta.remove_bootstrap_token(&Token::from("55"));
        meta.update_normal_token(Token::from("55"), joiner);
        let ring = meta.snapshot();
        assert!(ring.bootstrap_tokens().is_empty());
        assert_eq!(ring.endpoint_for(&Token::from("55")), Some(joiner));
    }

    #[test]
    fn snapshots_are_stable_across_mutations() {
        let meta = populated();
        let before = meta.snapshot();
        meta.remove_endpoint(&ep("10.0.0.2:7000"));

        assert_eq!(before.sorted_tokens().len(), 3);
        assert_eq!(meta.snapshot().sorted_tokens().len(), 2);
    }

    #[test]
    fn after_all_left_projection() {
        let meta = populated();
        meta.add_leaving_endpoint(ep("10.0.0.2:7000"));

        let ring = meta.snapshot();
        assert!(ring.leaving_endpoints().contains(&ep("10.0.0.2:7000")));

        let projection = ring.clone_after_all_left();
        assert!(!projection.is_member(&ep("10.0.0.2:7000")));
        assert!(projection.leaving_endpoints().is_empty());
        assert_eq!(projection.sorted_tokens().len(), 2);
        // The source ring is untouched.
        assert_eq!(ring.sorted_tokens().len(), 3);
    }

    #[test]
    fn pending_ranges_round_trip() {
        let meta = populated();
        let target = ep("10.0.0.4:7000");
        let range = Range::new(Token::from("20"), Token::from("80"));

        let mut map = PendingRanges::new();
        map.insert(range.clone(), HashSet::from([target]));
        meta.set_pending_ranges("events", map);

        let ring = meta.snapshot();
        assert_eq!(ring.pending_ranges("events", &target), vec![range]);
        assert_eq!(
            ring.pending_endpoints("events", &Token::from("30")),
            vec![target]
        );
        assert!(ring.pending_endpoints("events", &Token::from("90")).is_empty());
        assert!(ring.pending_ranges("other", &target).is_empty());

        meta.set_pending_ranges("events", PendingRanges::new());
        assert!(meta.snapshot().pending_range_map("events").is_none());
    }
}
