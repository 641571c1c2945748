//! Deterministic network simulator.
//!
//! Runs several [`Node`]s against a virtual clock over a lossy single-hop
//! broadcast medium. Every broadcast reaches each neighbour independently
//! and may be lost, duplicated or delayed (which reorders it). All
//! randomness comes from one seeded RNG, so a seed reproduces a run exactly.

use crate::key::Key;
use crate::message::Message;
use crate::node::{Node, NodeConfig};
use crate::registry::RegistryError;
use crate::store::StoreError;
use crate::trickle::TrickleParams;
use crate::version::Version;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Link behaviour of the simulated medium.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Probability a copy is lost (0.0 - 1.0)
    pub loss_rate: f64,
    /// Probability a copy is delivered twice (0.0 - 1.0)
    pub dup_rate: f64,
    /// Minimum delivery delay
    pub base_delay: Duration,
    /// Extra random delay, uniform in `[0, jitter]`
    pub jitter: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            dup_rate: 0.0,
            base_delay: Duration::from_millis(1),
            jitter: Duration::ZERO,
        }
    }
}

impl NetworkConfig {
    /// A medium losing `loss_rate` of all copies.
    #[must_use]
    pub fn lossy(loss_rate: f64) -> Self {
        Self {
            loss_rate,
            ..Default::default()
        }
    }

    /// Loss, duplication and heavy reordering at once.
    #[must_use]
    pub fn chaotic() -> Self {
        Self {
            loss_rate: 0.3,
            dup_rate: 0.2,
            base_delay: Duration::from_millis(1),
            jitter: Duration::from_millis(80),
        }
    }
}

/// Who hears whom.
#[derive(Debug, Clone)]
pub enum Topology {
    /// Every node hears every other node
    FullMesh,
    /// Node `i` hears `i - 1` and `i + 1`
    Line,
    /// Explicit undirected links
    Links(Vec<(usize, usize)>),
}

/// Traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Summary broadcasts
    pub summaries: u64,
    /// Data broadcasts
    pub data: u64,
    /// Copies delivered to a receiver
    pub delivered: u64,
    /// Copies lost on the medium or to a disconnected receiver
    pub dropped: u64,
}

#[derive(Debug)]
struct InFlight {
    deliver_at: Instant,
    seq: u64,
    to: usize,
    msg: Message,
}

impl PartialEq for InFlight {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for InFlight {}

impl PartialOrd for InFlight {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InFlight {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deliver_at, self.seq).cmp(&(other.deliver_at, other.seq))
    }
}

/// A simulated network of nodes.
#[derive(Debug)]
pub struct Cluster {
    nodes: Vec<Node>,
    neighbours: Vec<Vec<usize>>,
    connected: Vec<bool>,
    in_flight: BinaryHeap<Reverse<InFlight>>,
    config: NetworkConfig,
    rng: StdRng,
    start: Instant,
    now: Instant,
    seq: u64,
    stats: Stats,
}

impl Cluster {
    /// Create `size` nodes wired by `topology`.
    #[must_use]
    pub fn new(size: usize, topology: &Topology, config: NetworkConfig, seed: u64) -> Self {
        let nodes = (0..size)
            .map(|i| Node::with_seed(NodeConfig::default(), seed.wrapping_add(i as u64 + 1)))
            .collect();

        let mut neighbours = vec![Vec::new(); size];
        let mut link = |a: usize, b: usize| {
            if a != b && a < size && b < size {
                neighbours[a].push(b);
                neighbours[b].push(a);
            }
        };
        match topology {
            Topology::FullMesh => {
                for a in 0..size {
                    for b in a + 1..size {
                        link(a, b);
                    }
                }
            }
            Topology::Line => {
                for a in 1..size {
                    link(a - 1, a);
                }
            }
            Topology::Links(links) => {
                for &(a, b) in links {
                    link(a, b);
                }
            }
        }

        let start = Instant::now();
        Self {
            nodes,
            neighbours,
            connected: vec![true; size],
            in_flight: BinaryHeap::new(),
            config,
            rng: StdRng::seed_from_u64(seed),
            start,
            now: start,
            seq: 0,
            stats: Stats::default(),
        }
    }

    /// Register `key` on every node.
    ///
    /// # Errors
    ///
    /// Returns the first registration error.
    pub fn register_all(
        &mut self,
        key: Key,
        size: usize,
        params: TrickleParams,
    ) -> Result<(), RegistryError> {
        for node in &mut self.nodes {
            node.register(key, size, params, self.now)?;
        }
        Ok(())
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the cluster has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node `i`.
    #[must_use]
    pub fn node(&self, i: usize) -> &Node {
        &self.nodes[i]
    }

    /// Node `i`, mutably.
    pub fn node_mut(&mut self, i: usize) -> &mut Node {
        &mut self.nodes[i]
    }

    /// Current virtual time.
    #[must_use]
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Virtual time since the cluster was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.now - self.start
    }

    /// Traffic counters so far.
    #[must_use]
    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Local write on node `i` at the current virtual time.
    ///
    /// # Errors
    ///
    /// Returns the usage errors of [`Node::change`].
    pub fn change(&mut self, i: usize, key: Key, value: &[u8]) -> Result<Version, StoreError> {
        let now = self.now;
        self.nodes[i].change(key, value, now)
    }

    /// Cut node `i` off the medium. Its timers keep running.
    pub fn disconnect(&mut self, i: usize) {
        self.connected[i] = false;
    }

    /// Put node `i` back on the medium.
    pub fn reconnect(&mut self, i: usize) {
        self.connected[i] = true;
    }

    /// `(version, payload)` held by node `i` for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownKey`] if `key` is not registered.
    pub fn value(&self, i: usize, key: Key) -> Result<(Version, Vec<u8>), StoreError> {
        let view = self.nodes[i].get(key)?;
        Ok((view.version(), view.bytes().to_vec()))
    }

    /// Whether every connected node holds the same value for `key`.
    #[must_use]
    pub fn is_converged(&self, key: Key) -> bool {
        let mut held = (0..self.nodes.len())
            .filter(|&i| self.connected[i])
            .map(|i| self.value(i, key).ok());
        match held.next() {
            Some(first) => first.is_some() && held.all(|other| other == first),
            None => true,
        }
    }

    /// Process the next event. Returns `false` if nothing is scheduled.
    pub fn step(&mut self) -> bool {
        match self.next_event() {
            Some(at) => {
                self.process(at);
                true
            }
            None => false,
        }
    }

    /// Run events for `duration` of virtual time.
    pub fn run_for(&mut self, duration: Duration) {
        let end = self.now + duration;
        while let Some(at) = self.next_event() {
            if at > end {
                break;
            }
            self.process(at);
        }
        self.now = self.now.max(end);
    }

    /// Run until `done` holds or `limit` of virtual time passes.
    ///
    /// Returns whether `done` held.
    pub fn run_until<F>(&mut self, limit: Duration, mut done: F) -> bool
    where
        F: FnMut(&Self) -> bool,
    {
        let end = self.now + limit;
        loop {
            if done(self) {
                return true;
            }
            match self.next_event() {
                Some(at) if at <= end => self.process(at),
                _ => {
                    self.now = self.now.max(end);
                    return done(self);
                }
            }
        }
    }

    fn next_event(&self) -> Option<Instant> {
        let timers = self.nodes.iter().filter_map(Node::next_deadline).min();
        let delivery = self.in_flight.peek().map(|Reverse(f)| f.deliver_at);
        match (timers, delivery) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn process(&mut self, at: Instant) {
        self.now = self.now.max(at);
        let now = self.now;

        while self
            .in_flight
            .peek()
            .is_some_and(|Reverse(f)| f.deliver_at <= now)
        {
            let Some(Reverse(flight)) = self.in_flight.pop() else {
                break;
            };
            if self.connected[flight.to] {
                self.stats.delivered += 1;
                self.nodes[flight.to].handle_message(&flight.msg, now);
            } else {
                self.stats.dropped += 1;
            }
        }

        for from in 0..self.nodes.len() {
            for msg in self.nodes[from].poll(now) {
                self.broadcast(from, msg);
            }
        }
    }

    fn broadcast(&mut self, from: usize, msg: Message) {
        if msg.is_data() {
            self.stats.data += 1;
        } else {
            self.stats.summaries += 1;
        }
        if !self.connected[from] {
            self.stats.dropped += self.neighbours[from].len() as u64;
            return;
        }

        for idx in 0..self.neighbours[from].len() {
            let to = self.neighbours[from][idx];
            if self.rng.gen_bool(self.config.loss_rate) {
                self.stats.dropped += 1;
                continue;
            }
            let copies = if self.rng.gen_bool(self.config.dup_rate) { 2 } else { 1 };
            for _ in 0..copies {
                let delay = self.config.base_delay + self.jitter();
                self.seq += 1;
                self.in_flight.push(Reverse(InFlight {
                    deliver_at: self.now + delay,
                    seq: self.seq,
                    to,
                    msg: msg.clone(),
                }));
            }
        }
    }

    fn jitter(&mut self) -> Duration {
        let max = u64::try_from(self.config.jitter.as_nanos()).unwrap_or(u64::MAX);
        if max == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.rng.gen_range(0..=max))
        }
    }
}
