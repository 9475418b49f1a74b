//! The parallel evaluation broker: a bounded-queue handoff between the
//! driver and a worker pool, with generation-aware reception under partial
//! failure. This is the piece that lets the engine not care whether
//! evaluation happens on the next core over or across a network.

use crate::candidate::Candidate;
use crate::error::{OptimonError, Result};
use crossbeam_queue::ArrayQueue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::{Duration, Instant};

/// Distinguishes candidates that still need variation applied from ones
/// already adapted. Adaption is currently always performed driver-side
/// before submission (`EaAlgorithm::make_children` et al.), so every
/// `WorkItem` carries `AdaptThenEvaluate` and `run_worker_loop` only ever
/// evaluates; a worker-side adapt path would read this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    AdaptThenEvaluate,
    EvaluateOnly,
}

/// One candidate in flight, stamped with the iteration it was sent out on
/// and whether it occupied a parent slot (late parents are discarded on
/// return, late children are accepted as stragglers).
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub candidate: Candidate,
    pub assigned_iteration: u64,
    pub command: Command,
    pub is_parent: bool,
}

/// A bounded queue with blocking push and timed pop, polling at a fixed
/// granularity. `crossbeam_queue::ArrayQueue` gives us the lock-free ring
/// buffer; this wraps it with the wait semantics the broker needs.
pub struct BoundedQueue<T> {
    inner: ArrayQueue<T>,
    poll_interval: Duration,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize, poll_interval: Duration) -> Self {
        Self { inner: ArrayQueue::new(capacity.max(1)), poll_interval }
    }

    /// Blocks until there is room, then pushes. Returns immediately on
    /// success; this is the broker's only blocking submission point.
    pub fn push_blocking(&self, mut item: T, cancel: &AtomicBool) -> std::result::Result<(), T> {
        loop {
            match self.inner.push(item) {
                Ok(()) => return Ok(()),
                Err(rejected) => {
                    item = rejected;
                    if cancel.load(Ordering::Relaxed) {
                        return Err(item);
                    }
                    std::thread::sleep(self.poll_interval);
                }
            }
        }
    }

    pub fn push_nonblocking(&self, item: T) -> std::result::Result<(), T> {
        self.inner.push(item)
    }

    pub fn pop(&self) -> Option<T> {
        self.inner.pop()
    }

    /// Polls until an item is available or `timeout` elapses.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let start = Instant::now();
        loop {
            if let Some(item) = self.inner.pop() {
                return Some(item);
            }
            if start.elapsed() >= timeout {
                return None;
            }
            std::thread::sleep(self.poll_interval.min(timeout));
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn drain(&self) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(item) = self.inner.pop() {
            out.push(item);
        }
        out
    }
}

/// The per-algorithm-instance pair of bounded queues: outbound (unevaluated)
/// and inbound (evaluated). Workers pull from outbound and push to inbound;
/// neither side knows who the other is.
pub struct BufferPair {
    pub outbound: BoundedQueue<WorkItem>,
    pub inbound: BoundedQueue<WorkItem>,
}

impl BufferPair {
    pub fn new(capacity: usize, poll_interval: Duration) -> Self {
        Self {
            outbound: BoundedQueue::new(capacity, poll_interval),
            inbound: BoundedQueue::new(capacity, poll_interval),
        }
    }
}

/// Process-wide registry of buffer pairs, one per active algorithm
/// instance. Write-rare (enrol at init, release at finalize); many
/// concurrent readers (workers looking up their assigned pair).
#[derive(Default)]
pub struct BrokerRegistry {
    pairs: RwLock<HashMap<u64, Arc<BufferPair>>>,
    next_id: AtomicU64,
}

impl BrokerRegistry {
    pub fn global() -> &'static BrokerRegistry {
        static REGISTRY: OnceLock<BrokerRegistry> = OnceLock::new();
        REGISTRY.get_or_init(BrokerRegistry::default)
    }

    pub fn enroll(&self, capacity: usize, poll_interval: Duration) -> (u64, Arc<BufferPair>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pair = Arc::new(BufferPair::new(capacity, poll_interval));
        self.pairs.write().expect("registry lock poisoned").insert(id, pair.clone());
        (id, pair)
    }

    pub fn release(&self, id: u64) {
        self.pairs.write().expect("registry lock poisoned").remove(&id);
    }

    pub fn lookup(&self, id: u64) -> Option<Arc<BufferPair>> {
        self.pairs.read().expect("registry lock poisoned").get(&id).cloned()
    }
}

/// Outcome of one reception cycle: the collected candidates plus stats the
/// caller needs for population repair and wait-factor adaption.
pub struct ReceptionOutcome {
    pub returned: Vec<WorkItem>,
    pub stragglers: usize,
    pub timed_out: bool,
    pub t_first_ms: u64,
    pub t_max_ms: u64,
}

pub struct Broker {
    pair: Arc<BufferPair>,
    registry_id: u64,
    pub wait_factor: u32,
    pub max_wait_factor: u32,
    first_timeout: Duration,
    loop_time: Duration,
    pub arrival_log: Option<Vec<Vec<u64>>>,
}

impl Broker {
    pub fn new(config: &crate::config::BrokerConfig) -> Self {
        let loop_time = Duration::from_millis(config.loop_time_ms);
        let (registry_id, pair) =
            BrokerRegistry::global().enroll(config.outbound_capacity, loop_time);
        Self {
            pair,
            registry_id,
            wait_factor: config.wait_factor,
            max_wait_factor: config.max_wait_factor,
            first_timeout: Duration::from_millis(config.first_timeout_ms),
            loop_time,
            arrival_log: None,
        }
    }

    pub fn buffer_pair(&self) -> Arc<BufferPair> {
        self.pair.clone()
    }

    pub fn enable_logging(&mut self) {
        self.arrival_log = Some(Vec::new());
    }

    /// Pushes every item into the outbound queue, in order, blocking on a
    /// full queue until a worker consumes one.
    pub fn submit(&self, items: Vec<WorkItem>, cancel: &AtomicBool) {
        for item in items {
            let _ = self.pair.outbound.push_blocking(item, cancel);
        }
    }

    /// Runs the reception loop for iteration `g`, expecting `expected`
    /// returns. See the broker design notes for the generation discipline:
    /// late children are accepted as stragglers and re-stamped; late
    /// parents are discarded outright since their generation is already
    /// decided.
    pub fn receive(
        &mut self,
        iteration: u64,
        expected: usize,
        cancel: &AtomicBool,
    ) -> Result<ReceptionOutcome> {
        let cycle_start = Instant::now();
        let mut returned = Vec::new();
        let mut stragglers = 0usize;
        let mut arrivals_ms = Vec::new();

        let first = self.pair.inbound.pop_timeout(self.first_timeout);
        let first_item = match first {
            Some(item) => item,
            None => {
                return Err(OptimonError::FirstReturnTimeout {
                    iteration,
                    elapsed_ms: cycle_start.elapsed().as_millis() as u64,
                });
            }
        };
        let t_first = cycle_start.elapsed();
        let t_max = t_first * self.wait_factor.max(1);

        self.accept(first_item, iteration, &mut returned, &mut stragglers, &mut arrivals_ms, &cycle_start);

        let mut timed_out = false;
        while returned.len() < expected {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            let elapsed = cycle_start.elapsed();
            if elapsed >= t_max {
                timed_out = true;
                break;
            }
            match self.pair.inbound.pop_timeout(self.loop_time.min(t_max - elapsed)) {
                Some(item) => self.accept(
                    item,
                    iteration,
                    &mut returned,
                    &mut stragglers,
                    &mut arrivals_ms,
                    &cycle_start,
                ),
                None => {
                    if cycle_start.elapsed() >= t_max {
                        timed_out = true;
                        break;
                    }
                }
            }
        }

        if let Some(log) = &mut self.arrival_log {
            log.push(arrivals_ms);
        }

        self.adapt_wait_factor(timed_out, stragglers, returned.len(), t_first, t_max);

        Ok(ReceptionOutcome {
            returned,
            stragglers,
            timed_out,
            t_first_ms: t_first.as_millis() as u64,
            t_max_ms: t_max.as_millis() as u64,
        })
    }

    fn accept(
        &self,
        mut item: WorkItem,
        iteration: u64,
        returned: &mut Vec<WorkItem>,
        stragglers: &mut usize,
        arrivals_ms: &mut Vec<u64>,
        cycle_start: &Instant,
    ) {
        if item.assigned_iteration < iteration {
            if item.is_parent {
                return; // late parents: generation already decided, discard
            }
            *stragglers += 1;
            item.assigned_iteration = iteration;
        }
        arrivals_ms.push(cycle_start.elapsed().as_millis() as u64);
        returned.push(item);
    }

    /// Self-tunes `wait_factor` toward realistic worker latency: widen the
    /// budget when a meaningful fraction of returns were late, narrow it
    /// when the cycle finished with a lot of slack to spare.
    fn adapt_wait_factor(
        &mut self,
        timed_out: bool,
        stragglers: usize,
        total_returned: usize,
        t_first: Duration,
        t_max: Duration,
    ) {
        if self.max_wait_factor <= self.wait_factor {
            return;
        }
        let straggler_ratio = if total_returned > 0 {
            stragglers as f64 / total_returned as f64
        } else {
            0.0
        };
        if timed_out && straggler_ratio >= 0.10 {
            self.wait_factor = (self.wait_factor + 1).min(self.max_wait_factor);
        } else if !timed_out {
            let slack = t_max.saturating_sub(t_first);
            if slack.as_secs_f64() > t_max.as_secs_f64() * 0.10 {
                self.wait_factor = self.wait_factor.saturating_sub(1).max(1);
            }
        }
    }

    /// Cooperative cancellation: drains the outbound queue, gives in-flight
    /// items a brief grace period, then discards whatever is left.
    pub fn cancel_and_drain(&self, cancel: &AtomicBool) -> Vec<WorkItem> {
        cancel.store(true, Ordering::Relaxed);
        self.pair.outbound.drain();
        std::thread::sleep(self.loop_time * self.wait_factor.max(1));
        self.pair.inbound.drain()
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        BrokerRegistry::global().release(self.registry_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::Tree;

    fn work_item(iteration: u64, is_parent: bool) -> WorkItem {
        WorkItem {
            candidate: Candidate::new(Tree::new(), false),
            assigned_iteration: iteration,
            command: Command::AdaptThenEvaluate,
            is_parent,
        }
    }

    fn broker(wait_factor: u32, max_wait_factor: u32) -> Broker {
        Broker::new(&crate::config::BrokerConfig {
            wait_factor,
            max_wait_factor,
            first_timeout_ms: 2_000,
            loop_time_ms: 5,
            outbound_capacity: 64,
        })
    }

    #[test]
    fn receives_exact_iteration_matches() {
        let mut broker = broker(5, 0);
        let pair = broker.buffer_pair();
        for _ in 0..3 {
            pair.inbound.push_nonblocking(work_item(1, false)).unwrap();
        }
        let cancel = AtomicBool::new(false);
        let outcome = broker.receive(1, 3, &cancel).unwrap();
        assert_eq!(outcome.returned.len(), 3);
        assert_eq!(outcome.stragglers, 0);
    }

    #[test]
    fn straggler_children_are_restamped_and_counted() {
        let mut broker = broker(5, 0);
        let pair = broker.buffer_pair();
        pair.inbound.push_nonblocking(work_item(1, false)).unwrap();
        pair.inbound.push_nonblocking(work_item(0, false)).unwrap();
        let cancel = AtomicBool::new(false);
        let outcome = broker.receive(1, 2, &cancel).unwrap();
        assert_eq!(outcome.returned.len(), 2);
        assert_eq!(outcome.stragglers, 1);
        assert!(outcome.returned.iter().all(|item| item.assigned_iteration == 1));
    }

    #[test]
    fn late_parents_are_discarded_not_counted_as_stragglers() {
        let mut broker = broker(5, 0);
        let pair = broker.buffer_pair();
        pair.inbound.push_nonblocking(work_item(1, false)).unwrap();
        pair.inbound.push_nonblocking(work_item(0, true)).unwrap();
        let cancel = AtomicBool::new(false);
        let outcome = broker.receive(1, 2, &cancel).unwrap();
        assert_eq!(outcome.returned.len(), 1);
        assert_eq!(outcome.stragglers, 0);
    }

    #[test]
    fn missing_first_return_times_out_fatally() {
        let mut broker = Broker::new(&crate::config::BrokerConfig {
            wait_factor: 2,
            max_wait_factor: 0,
            first_timeout_ms: 30,
            loop_time_ms: 5,
            outbound_capacity: 8,
        });
        let cancel = AtomicBool::new(false);
        let result = broker.receive(1, 1, &cancel);
        assert!(matches!(result, Err(OptimonError::FirstReturnTimeout { .. })));
    }

    #[test]
    fn wait_factor_increases_after_timeout_with_many_stragglers() {
        let mut broker = broker(2, 5);
        let pair = broker.buffer_pair();
        pair.inbound.push_nonblocking(work_item(0, false)).unwrap();
        let cancel = AtomicBool::new(false);
        let before = broker.wait_factor;
        let outcome = broker.receive(1, 10, &cancel).unwrap();
        assert!(outcome.timed_out);
        assert!(broker.wait_factor >= before);
    }
}
