use crate::entities::item::Serial;
use crate::net::protocol::Protocol;
use crate::world::position::DropPoint;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const DEFAULT_DISPATCH_DELAY_MS: u64 = 800;

/// Which producer created a request. The consumer routes per-source
/// validation and bookkeeping through `DispatchHook`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestSource {
    AutoLoot,
    Selection,
    Organizer,
    Manual,
}

/// One pending pick-up + drop pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveRequest {
    pub serial: Serial,
    /// `Serial::NONE` drops onto the ground at `point`.
    pub destination: Serial,
    pub amount: u16,
    pub point: DropPoint,
    pub source: RequestSource,
}

impl MoveRequest {
    pub fn new(serial: Serial, destination: Serial, amount: u16, source: RequestSource) -> Self {
        Self {
            serial,
            destination,
            amount,
            point: DropPoint::DEFAULT,
            source,
        }
    }

    pub fn at(mut self, point: DropPoint) -> Self {
        self.point = point;
        self
    }
}

/// Consumer-side callbacks invoked for each popped request.
pub trait DispatchHook {
    /// Final check before the protocol sees the request. Returning `None`
    /// drops it silently; the consumer moves on to the next one.
    fn resolve(&self, request: MoveRequest) -> Option<MoveRequest> {
        Some(request)
    }

    /// Called exactly once per popped request, whether sent or dropped.
    fn finished(&self, _request: &MoveRequest, _dispatched: bool) {}
}

/// Hook that sends everything unchanged.
pub struct PassThrough;

impl DispatchHook for PassThrough {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Inside the inter-dispatch delay.
    Throttled,
    /// A manual drag is in progress.
    CursorBusy,
    /// Nothing was sent; `dropped` requests failed validation.
    Idle { dropped: usize },
    Dispatched { request: MoveRequest, dropped: usize },
}

impl TickOutcome {
    pub fn dispatched(&self) -> Option<MoveRequest> {
        match self {
            TickOutcome::Dispatched { request, .. } => Some(*request),
            _ => None,
        }
    }
}

/// Rate-limited FIFO shared by every automation producer.
///
/// Any number of threads may `enqueue`; exactly one consumer calls
/// `process_tick` once per frame. No deduplication happens here.
#[derive(Debug)]
pub struct DispatchQueue {
    pending: Mutex<VecDeque<MoveRequest>>,
    next_allowed: AtomicU64,
    delay_ms: AtomicU64,
    dispatched_total: AtomicU64,
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new(DEFAULT_DISPATCH_DELAY_MS)
    }
}

impl DispatchQueue {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            next_allowed: AtomicU64::new(0),
            delay_ms: AtomicU64::new(delay_ms),
            dispatched_total: AtomicU64::new(0),
        }
    }

    pub fn enqueue(&self, request: MoveRequest) {
        self.lock().push_back(request);
    }

    /// Appends several requests without interleaving other producers.
    pub fn enqueue_all(&self, requests: impl IntoIterator<Item = MoveRequest>) {
        self.lock().extend(requests);
    }

    /// Runs one consumer step: sends at most one request.
    pub fn process_tick(
        &self,
        now: u64,
        cursor_holding_item: bool,
        protocol: &dyn Protocol,
        hook: &dyn DispatchHook,
    ) -> TickOutcome {
        if now < self.next_allowed.load(Ordering::Acquire) {
            return TickOutcome::Throttled;
        }
        if cursor_holding_item {
            return TickOutcome::CursorBusy;
        }

        let mut dropped = 0;
        loop {
            // Lock only around the pop so producers are never blocked by
            // hook or protocol work.
            let Some(popped) = self.lock().pop_front() else {
                return TickOutcome::Idle { dropped };
            };
            let Some(request) = hook.resolve(popped) else {
                hook.finished(&popped, false);
                dropped += 1;
                continue;
            };

            protocol.pick_up(request.serial, request.amount);
            protocol.drop_item(request.serial, request.point, request.destination);

            let next = now.saturating_add(self.delay_ms.load(Ordering::Relaxed));
            self.next_allowed.fetch_max(next, Ordering::AcqRel);
            self.dispatched_total.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                target: "lootkit::dispatch",
                serial = %request.serial,
                destination = %request.destination,
                source = ?request.source,
                now,
                "dispatched move"
            );
            hook.finished(&popped, true);
            return TickOutcome::Dispatched { request, dropped };
        }
    }

    /// Drains every pending request. Already dispatched moves are not
    /// affected; tracking state belongs to the caller.
    pub fn clear(&self) -> Vec<MoveRequest> {
        self.lock().drain(..).collect()
    }

    /// Removes pending requests from one producer, keeping the rest in order.
    pub fn clear_source(&self, source: RequestSource) -> Vec<MoveRequest> {
        let mut pending = self.lock();
        let mut removed = Vec::new();
        pending.retain(|request| {
            if request.source == source {
                removed.push(*request);
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn pending_for(&self, source: RequestSource) -> usize {
        self.lock()
            .iter()
            .filter(|request| request.source == source)
            .count()
    }

    pub fn snapshot(&self) -> Vec<MoveRequest> {
        self.lock().iter().copied().collect()
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms.load(Ordering::Relaxed)
    }

    /// Takes effect from the next dispatch on.
    pub fn set_delay(&self, delay_ms: u64) {
        self.delay_ms.store(delay_ms, Ordering::Relaxed);
    }

    pub fn next_allowed(&self) -> u64 {
        self.next_allowed.load(Ordering::Acquire)
    }

    pub fn dispatched_total(&self) -> u64 {
        self.dispatched_total.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<MoveRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
