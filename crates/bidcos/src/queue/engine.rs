// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Queue engine: entry sequencing, resend and pop-wait timers, chaining.
//!
//! # Epochs
//!
//! Two counters invalidate timers that fire late:
//!
//! - `generation` advances on every structural step (pop, clear, chain
//!   swap). Both timers capture it and do nothing once it moved on.
//! - `pop_wait_generation` advances on every `pop_wait`, so a superseded
//!   delayed pop never runs even if the queue did not move.
//!
//! Transport calls happen outside the state lock. A resend re-checks the
//! generation right before it is handed to the transport, but one that is
//! already in flight when the acknowledgment arrives still goes out; the peer
//! sees it as a duplicate.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam::channel::RecvTimeoutError;
use parking_lot::Mutex;

use crate::config::{EngineConfig, TimingProfile};
use crate::frame::{Address, Frame};
use crate::message::MessageDefinition;

use super::entry::QueueEntry;
use super::pending::PendingQueues;
use super::timer::TimerHandle;
use super::{CallbackParameter, QueueContext, QueueType};

/// Retry budget of queues built without a configuration profile.
pub const DEFAULT_RETRIES: u32 = 4;

/// Completion callback, invoked once per terminal drain or retry exhaustion.
pub type QueueCallback = Arc<dyn Fn(CallbackParameter) + Send + Sync>;

type PendingCallback = Option<(QueueCallback, CallbackParameter)>;

struct QueueState {
    entries: VecDeque<QueueEntry>,
    queue_type: QueueType,
    retries: u32,
    /// Set through `set_retries`; otherwise a chain member takes the budget
    /// of its type's profile when it is swapped in.
    retries_pinned: bool,
    resend_counter: u32,
    pending: Option<PendingQueues>,
    generation: u64,
    pop_wait_generation: u64,
    last_action: Instant,
    last_sent: Option<Frame>,
    callback: Option<QueueCallback>,
    callback_parameter: CallbackParameter,
}

impl QueueState {
    fn new(queue_type: QueueType, retries: u32) -> Self {
        Self {
            entries: VecDeque::new(),
            queue_type,
            retries,
            retries_pinned: false,
            resend_counter: 0,
            pending: None,
            generation: 0,
            pop_wait_generation: 0,
            last_action: Instant::now(),
            last_sent: None,
            callback: None,
            callback_parameter: CallbackParameter::default(),
        }
    }

    fn pending_empty(&self) -> bool {
        self.pending.as_ref().map_or(true, PendingQueues::is_empty)
    }

    fn reset(&mut self) {
        self.entries.clear();
        self.pending = None;
        self.resend_counter = 0;
        self.last_sent = None;
        self.generation += 1;
        self.pop_wait_generation += 1;
    }

    /// Swap chain heads in while the local sequence is empty.
    ///
    /// The head's type, entries and retry budget replace ours; its callback
    /// replaces ours only if it has one. Id and peer stay. Unless pinned, the
    /// budget comes from `config` for the head's type.
    fn activate_pending(&mut self, config: Option<&EngineConfig>) -> bool {
        let mut swapped = false;
        while self.entries.is_empty() {
            let Some(head) = self.pending.as_mut().and_then(PendingQueues::pop) else {
                break;
            };
            let mut head_state = head.shared.state.lock();
            self.queue_type = head_state.queue_type;
            self.retries = match config {
                Some(config) if !head_state.retries_pinned => {
                    config.profile(head_state.queue_type).retries
                }
                _ => head_state.retries,
            };
            self.entries = std::mem::take(&mut head_state.entries);
            if let Some(callback) = head_state.callback.clone() {
                self.callback = Some(callback);
                self.callback_parameter = head_state.callback_parameter.clone();
            }
            if let Some(nested) = head_state.pending.take() {
                self.pending
                    .get_or_insert_with(PendingQueues::new)
                    .prepend(nested);
            }
            swapped = true;
        }

        if swapped {
            self.generation += 1;
            self.resend_counter = 0;
        }
        if self.pending_empty() {
            self.pending = None;
        }
        swapped
    }

    fn drained_callback(&self) -> PendingCallback {
        self.callback
            .clone()
            .map(|callback| (callback, self.callback_parameter.clone()))
    }
}

struct Shared {
    id: u32,
    peer: Address,
    /// None for detached (pending) queues: they never send.
    context: Option<Arc<QueueContext>>,
    state: Mutex<QueueState>,
    resend_timer: Mutex<Option<TimerHandle>>,
    pop_wait_timer: Mutex<Option<TimerHandle>>,
}

/// Plain copy of a queue's persistent state.
pub(super) struct Snapshot {
    pub(super) queue_type: QueueType,
    /// None for chain members that follow their type's profile.
    pub(super) retries: Option<u32>,
    pub(super) entries: Vec<QueueEntry>,
    pub(super) pending: Vec<Queue>,
}

enum Next {
    Front,
    Drained(PendingCallback),
}

enum Tick {
    Resend(Frame, u32),
    Exhausted(PendingCallback),
    Stale,
}

/// Ordered protocol steps for one peer.
///
/// Cheap to clone; all clones share the same queue.
#[derive(Clone)]
pub struct Queue {
    shared: Arc<Shared>,
}

impl Queue {
    /// Create an active queue for `peer`.
    ///
    /// The retry budget comes from the timing profile of `queue_type`.
    pub fn new(context: Arc<QueueContext>, queue_type: QueueType, peer: Address) -> Self {
        let id = context.next_queue_id();
        let retries = context.config().profile(queue_type).retries;
        Self::build(Some(context), id, peer, QueueState::new(queue_type, retries))
    }

    /// Create a detached queue for use as a pending chain member.
    ///
    /// Detached queues never send and never start timers; their entries are
    /// taken over by the queue they are chained onto.
    pub fn pending(queue_type: QueueType) -> Self {
        Self::build(
            None,
            0,
            Address::default(),
            QueueState::new(queue_type, DEFAULT_RETRIES),
        )
    }

    pub(super) fn restore(
        context: Option<Arc<QueueContext>>,
        id: u32,
        peer: Address,
        snapshot: Snapshot,
    ) -> Self {
        if let Some(context) = &context {
            context.reserve_queue_id(id);
        }
        let retries = snapshot.retries.unwrap_or_else(|| {
            context
                .as_ref()
                .map_or(DEFAULT_RETRIES, |c| c.config().profile(snapshot.queue_type).retries)
        });
        let mut state = QueueState::new(snapshot.queue_type, retries);
        state.retries_pinned = snapshot.retries.is_some();
        state.entries = snapshot.entries.into();
        if !snapshot.pending.is_empty() {
            state.pending = Some(snapshot.pending.into_iter().collect());
        }
        Self::build(context, id, peer, state)
    }

    fn build(
        context: Option<Arc<QueueContext>>,
        id: u32,
        peer: Address,
        state: QueueState,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                id,
                peer,
                context,
                state: Mutex::new(state),
                resend_timer: Mutex::new(None),
                pop_wait_timer: Mutex::new(None),
            }),
        }
    }

    pub(super) fn snapshot(&self) -> Snapshot {
        let state = self.shared.state.lock();
        Snapshot {
            queue_type: state.queue_type,
            retries: (state.retries_pinned || !self.is_detached()).then_some(state.retries),
            entries: state.entries.iter().cloned().collect(),
            pending: state
                .pending
                .as_ref()
                .map(|p| p.iter().cloned().collect())
                .unwrap_or_default(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> u32 {
        self.shared.id
    }

    pub fn peer(&self) -> Address {
        self.shared.peer
    }

    /// Owning device id, `None` for detached queues.
    pub fn device(&self) -> Option<u32> {
        self.shared.context.as_ref().map(|c| c.device())
    }

    pub fn is_detached(&self) -> bool {
        self.shared.context.is_none()
    }

    pub fn queue_type(&self) -> QueueType {
        self.shared.state.lock().queue_type
    }

    pub fn set_queue_type(&self, queue_type: QueueType) {
        self.shared.state.lock().queue_type = queue_type;
    }

    pub fn retries(&self) -> u32 {
        self.shared.state.lock().retries
    }

    pub fn set_retries(&self, retries: u32) {
        let mut state = self.shared.state.lock();
        state.retries = retries;
        state.retries_pinned = true;
    }

    /// Resends of the current front entry so far.
    pub fn resend_counter(&self) -> u32 {
        self.shared.state.lock().resend_counter
    }

    pub fn generation(&self) -> u64 {
        self.shared.state.lock().generation
    }

    pub fn last_action(&self) -> Instant {
        self.shared.state.lock().last_action
    }

    /// Local entries, not counting the pending chain.
    pub fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    /// Local sequence and pending chain are both empty.
    pub fn is_empty(&self) -> bool {
        let state = self.shared.state.lock();
        state.entries.is_empty() && state.pending_empty()
    }

    pub fn pending_queues_empty(&self) -> bool {
        self.shared.state.lock().pending_empty()
    }

    pub fn pending_queues_len(&self) -> usize {
        self.shared
            .state
            .lock()
            .pending
            .as_ref()
            .map_or(0, PendingQueues::len)
    }

    pub fn front(&self) -> Option<QueueEntry> {
        self.shared.state.lock().entries.front().cloned()
    }

    pub fn get(&self, index: usize) -> Option<QueueEntry> {
        self.shared.state.lock().entries.get(index).cloned()
    }

    /// Whether a resend timer is running: an acknowledgment is awaited or a
    /// failed send is being retried.
    pub fn awaiting_ack(&self) -> bool {
        self.shared
            .resend_timer
            .lock()
            .as_ref()
            .is_some_and(TimerHandle::is_running)
    }

    pub fn set_callback<F>(&self, callback: F, parameter: CallbackParameter)
    where
        F: Fn(CallbackParameter) + Send + Sync + 'static,
    {
        let mut state = self.shared.state.lock();
        state.callback = Some(Arc::new(callback));
        state.callback_parameter = parameter;
    }

    pub fn callback_parameter(&self) -> CallbackParameter {
        self.shared.state.lock().callback_parameter.clone()
    }

    /// Last activity older than `timeout`.
    pub fn is_idle(&self, timeout: Duration) -> bool {
        Instant::now().saturating_duration_since(self.last_action()) > timeout
    }

    fn config(&self) -> Option<&EngineConfig> {
        self.shared.context.as_deref().map(QueueContext::config)
    }

    fn profile(&self) -> TimingProfile {
        let queue_type = self.queue_type();
        self.shared
            .context
            .as_ref()
            .map(|c| c.config().profile(queue_type))
            .unwrap_or_default()
    }

    // ========================================================================
    // Push
    // ========================================================================

    /// Append a message. Processed immediately if the queue was empty.
    pub fn push(&self, definition: Arc<MessageDefinition>) {
        self.push_entry(QueueEntry::message(definition));
    }

    /// Append a message together with its pre-built frame.
    pub fn push_with_packet(&self, definition: Arc<MessageDefinition>, packet: Frame) {
        self.push_entry(QueueEntry::Message {
            definition,
            packet: Some(packet),
        });
    }

    /// Append a ready-to-send frame.
    pub fn push_packet(&self, packet: Frame) {
        self.push_entry(QueueEntry::Packet(packet));
    }

    /// Insert a frame ahead of everything else. Nothing is sent.
    pub fn push_front(&self, packet: Frame) {
        let mut state = self.shared.state.lock();
        state.entries.push_front(QueueEntry::Packet(packet));
        state.last_action = Instant::now();
    }

    fn push_entry(&self, entry: QueueEntry) {
        let was_empty = {
            let mut state = self.shared.state.lock();
            let was_empty = state.entries.is_empty();
            state.entries.push_back(entry);
            state.last_action = Instant::now();
            was_empty
        };
        if was_empty {
            self.process_front();
        }
    }

    /// Replace the pending chain. Members that lead back to this queue are
    /// dropped.
    pub fn set_pending_queues(&self, pending: PendingQueues) {
        let pending: PendingQueues = pending
            .iter()
            .filter(|member| {
                let cyclic = self.reachable_from(member);
                if cyclic {
                    log::warn!("[queue] #{} dropping chain member leading back to itself", self.id());
                }
                !cyclic
            })
            .cloned()
            .collect();
        let mut state = self.shared.state.lock();
        state.pending = if pending.is_empty() { None } else { Some(pending) };
    }

    /// Append `queue` to the pending chain.
    ///
    /// With `clear_pending` the chain is emptied first. With `pop_immediately`
    /// and an empty local sequence the chain is activated right away.
    pub fn push_queue(&self, queue: Queue, pop_immediately: bool, clear_pending: bool) {
        if self.reachable_from(&queue) {
            log::warn!("[queue] #{} cannot chain onto itself", self.id());
            return;
        }

        let activated = {
            let mut state = self.shared.state.lock();
            if clear_pending {
                state.pending = None;
            }
            state
                .pending
                .get_or_insert_with(PendingQueues::new)
                .push(queue);
            pop_immediately && state.entries.is_empty() && state.activate_pending(self.config())
        };

        if activated {
            self.stop_resend();
            self.process_front();
        }
    }

    /// Whether this queue is `queue` or sits somewhere in its chain.
    fn reachable_from(&self, queue: &Queue) -> bool {
        let mut visited: Vec<*const Shared> = Vec::new();
        let mut stack = vec![queue.clone()];
        while let Some(current) = stack.pop() {
            if Arc::ptr_eq(&current.shared, &self.shared) {
                return true;
            }
            let ptr = Arc::as_ptr(&current.shared);
            if visited.contains(&ptr) {
                continue;
            }
            visited.push(ptr);
            if let Some(pending) = current.shared.state.lock().pending.as_ref() {
                stack.extend(pending.iter().cloned());
            }
        }
        false
    }

    // ========================================================================
    // Pop
    // ========================================================================

    /// Remove the front entry and advance.
    ///
    /// The next local entry becomes active; if there is none the pending
    /// chain's head is swapped in; if that is empty too the completion
    /// callback fires and both timers stop.
    pub fn pop(&self) -> Option<QueueEntry> {
        self.pop_if(|_| true)
    }

    fn pop_if<P>(&self, precondition: P) -> Option<QueueEntry>
    where
        P: FnOnce(&QueueState) -> bool,
    {
        let (removed, next) = {
            let mut state = self.shared.state.lock();
            if !precondition(&state) {
                log::debug!("[queue] #{} stale pop ignored", self.id());
                return None;
            }

            let removed = state.entries.pop_front();
            if removed.is_none() && state.pending_empty() {
                log::warn!("[queue] #{} pop on empty queue ignored", self.id());
                return None;
            }
            state.generation += 1;
            state.resend_counter = 0;
            state.activate_pending(self.config());

            let next = if state.entries.is_empty() {
                state.pending = None;
                Next::Drained(state.drained_callback())
            } else {
                Next::Front
            };
            (removed, next)
        };

        self.stop_resend();
        match next {
            Next::Front => self.process_front(),
            Next::Drained(callback) => {
                self.stop_pop_wait();
                log::debug!("[queue] #{} to {} drained", self.id(), self.peer());
                if let Some((callback, parameter)) = callback {
                    callback(parameter);
                }
            }
        }
        removed
    }

    /// Pop after `waiting_time` unless the queue moves on first.
    pub fn pop_wait(&self, waiting_time: Duration) {
        self.stop_pop_wait();
        let (generation, pop_wait_generation) = {
            let mut state = self.shared.state.lock();
            state.pop_wait_generation += 1;
            (state.generation, state.pop_wait_generation)
        };

        let shared = Arc::downgrade(&self.shared);
        let timer = TimerHandle::spawn("bidcos-pop-wait", move |stop_rx| {
            if !matches!(stop_rx.recv_timeout(waiting_time), Err(RecvTimeoutError::Timeout)) {
                return;
            }
            if let Some(queue) = Queue::upgrade(&shared) {
                queue.pop_if(|state| {
                    state.generation == generation
                        && state.pop_wait_generation == pop_wait_generation
                });
            }
        });
        let previous = std::mem::replace(&mut *self.shared.pop_wait_timer.lock(), timer);
        self.retire(previous);
    }

    /// Drop all entries and the pending chain, stop both timers.
    ///
    /// The completion callback is not invoked.
    pub fn clear(&self) {
        self.shared.state.lock().reset();
        self.stop_resend();
        self.stop_pop_wait();
    }

    // ========================================================================
    // Send
    // ========================================================================

    /// Transmit `frame` and, if it asks for an acknowledgment or the
    /// transport failed, (re)start the resend timer.
    pub fn send(&self, frame: &Frame) {
        self.transmit(frame, None);
    }

    /// Re-process the front entry, e.g. after restoring a persisted queue.
    pub fn resume(&self) {
        self.process_front();
    }

    /// Hold the session open.
    pub fn keep_alive(&self) {
        self.hold_open(self.profile().keep_alive());
    }

    /// Hold the session open for peers with looser timing.
    pub fn long_keep_alive(&self) {
        self.hold_open(self.profile().long_keep_alive());
    }

    fn hold_open(&self, extension: Duration) {
        let awaiting_ack = self.awaiting_ack();
        let resend = {
            let mut state = self.shared.state.lock();
            state.last_action = Instant::now() + extension;
            if awaiting_ack || state.entries.is_empty() {
                None
            } else {
                state.last_sent.clone()
            }
        };

        if let (Some(frame), Some(context)) = (resend, &self.shared.context) {
            log::trace!("[queue] #{} keep-alive {}", self.id(), frame);
            if let Err(e) = context.transport().send(&frame) {
                log::warn!("[queue] #{} keep-alive to {} failed: {}", self.id(), self.peer(), e);
            }
        }
    }

    fn process_front(&self) {
        if self.is_detached() {
            return;
        }
        let (entry, generation) = {
            let state = self.shared.state.lock();
            match state.entries.front() {
                Some(entry) => (entry.clone(), state.generation),
                None => return,
            }
        };

        // Builders run outside the lock.
        let Some(frame) = entry.resolve(self.peer()) else {
            return;
        };
        {
            let mut state = self.shared.state.lock();
            if state.generation != generation {
                return;
            }
            if let Some(QueueEntry::Message { packet, .. }) = state.entries.front_mut() {
                if packet.is_none() {
                    *packet = Some(frame.clone());
                }
            }
        }
        self.transmit(&frame, Some(generation));
    }

    fn transmit(&self, frame: &Frame, expected_generation: Option<u64>) {
        let Some(context) = self.shared.context.as_ref() else {
            log::debug!("[queue] #{} is detached, not sending {}", self.id(), frame);
            return;
        };
        let generation = {
            let mut state = self.shared.state.lock();
            if expected_generation.is_some_and(|g| g != state.generation) {
                return;
            }
            state.last_action = Instant::now();
            state.last_sent = Some(frame.clone());
            state.generation
        };

        log::trace!("[queue] #{} -> {}", self.id(), frame);
        let failed = match context.transport().send(frame) {
            Ok(()) => false,
            Err(e) => {
                // Counts as an attempt; the resend timer takes it from here.
                log::warn!("[queue] #{} send to {} failed: {}", self.id(), self.peer(), e);
                true
            }
        };
        if frame.expects_ack() || failed {
            self.start_resend(generation, frame.is_burst());
        }
    }

    // ========================================================================
    // Timers
    // ========================================================================

    fn upgrade(shared: &Weak<Shared>) -> Option<Queue> {
        shared.upgrade().map(|shared| Queue { shared })
    }

    fn start_resend(&self, generation: u64, burst: bool) {
        self.stop_resend();
        let profile = self.profile();
        let interval = profile.resend_interval();
        // Burst frames get their first resend early.
        let first = if burst { profile.burst_interval() } else { interval };

        let shared = Arc::downgrade(&self.shared);
        let timer = TimerHandle::spawn("bidcos-resend", move |stop_rx| {
            let mut wait = first;
            loop {
                match stop_rx.recv_timeout(wait) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                match Queue::upgrade(&shared) {
                    Some(queue) if queue.resend_tick(generation) => {}
                    _ => break,
                }
                wait = interval;
            }
        });
        let previous = std::mem::replace(&mut *self.shared.resend_timer.lock(), timer);
        self.retire(previous);
    }

    /// One resend step. Returns false once the loop should end. A frame that
    /// expects no acknowledgment ends it as soon as it gets through.
    fn resend_tick(&self, generation: u64) -> bool {
        let tick = {
            let mut state = self.shared.state.lock();
            if state.generation != generation {
                Tick::Stale
            } else if state.resend_counter < state.retries {
                match state.entries.front().and_then(QueueEntry::frame).cloned() {
                    Some(frame) => {
                        state.resend_counter += 1;
                        state.last_action = Instant::now();
                        Tick::Resend(frame, state.resend_counter)
                    }
                    None => Tick::Stale,
                }
            } else {
                log::info!(
                    "[queue] #{} to {}: no answer after {} retries, giving up",
                    self.id(),
                    self.peer(),
                    state.retries
                );
                state.reset();
                Tick::Exhausted(state.drained_callback().map(|(callback, mut parameter)| {
                    parameter.failed = true;
                    (callback, parameter)
                }))
            }
        };

        match tick {
            Tick::Resend(frame, attempt) => {
                if self.generation() != generation {
                    return false;
                }
                log::debug!("[queue] #{} resend {} (attempt {})", self.id(), frame, attempt);
                let Some(context) = &self.shared.context else {
                    return false;
                };
                match context.transport().send(&frame) {
                    Ok(()) => frame.expects_ack(),
                    Err(e) => {
                        log::warn!("[queue] #{} resend to {} failed: {}", self.id(), self.peer(), e);
                        true
                    }
                }
            }
            Tick::Exhausted(callback) => {
                self.stop_pop_wait();
                if let Some((callback, parameter)) = callback {
                    callback(parameter);
                }
                false
            }
            Tick::Stale => false,
        }
    }

    fn stop_resend(&self) {
        let timer = self.shared.resend_timer.lock().take();
        self.retire(timer);
    }

    fn stop_pop_wait(&self) {
        let timer = self.shared.pop_wait_timer.lock().take();
        self.retire(timer);
    }

    /// Stop a timer taken out of its slot. A sibling timer of this queue only
    /// signals: joining each other from both timers would deadlock.
    fn retire(&self, timer: Option<TimerHandle>) {
        let Some(mut timer) = timer else {
            return;
        };
        if self.on_timer_thread() {
            timer.cancel();
        } else {
            timer.stop();
        }
    }

    fn on_timer_thread(&self) -> bool {
        let current = |slot: &Mutex<Option<TimerHandle>>| {
            slot.lock().as_ref().is_some_and(TimerHandle::is_current)
        };
        current(&self.shared.resend_timer) || current(&self.shared.pop_wait_timer)
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Queue");
        d.field("id", &self.shared.id).field("peer", &self.shared.peer);
        if let Some(state) = self.shared.state.try_lock() {
            d.field("queue_type", &state.queue_type)
                .field("len", &state.entries.len())
                .field("generation", &state.generation);
        }
        d.finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::message::AccessMask;
    use crate::transport::{Transport, TransportError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Frame>>,
    }

    impl Transport for RecordingTransport {
        fn send(&self, frame: &Frame) -> Result<(), TransportError> {
            self.sent.lock().push(frame.clone());
            Ok(())
        }
    }

    fn setup(resend_ms: u64) -> (Arc<RecordingTransport>, Arc<QueueContext>) {
        let transport = Arc::new(RecordingTransport::default());
        let config = EngineConfig {
            default: TimingProfile::default().with_resend_interval_ms(resend_ms),
            ..EngineConfig::default()
        };
        let context = Arc::new(QueueContext::new(1, transport.clone(), config));
        (transport, context)
    }

    fn packet(counter: u8, control: u8) -> Frame {
        Frame::new(counter, control, 0x01, Address::new(0x100), Address::new(0x200), vec![0x00])
    }

    fn counting_callback(queue: &Queue) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        queue.set_callback(
            move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            },
            CallbackParameter::new(),
        );
        calls
    }

    #[test]
    fn test_push_on_empty_sends_immediately() {
        let (transport, context) = setup(1000);
        let queue = Queue::new(context, QueueType::Default, Address::new(0x200));
        assert!(queue.is_empty());

        queue.push_packet(packet(1, 0x80));
        assert!(!queue.is_empty());
        assert_eq!(transport.sent.lock().len(), 1);

        // Second push waits its turn.
        queue.push_packet(packet(2, 0x80));
        assert_eq!(transport.sent.lock().len(), 1);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_push_front_does_not_send() {
        let (transport, context) = setup(1000);
        let queue = Queue::new(context, QueueType::Default, Address::new(0x200));
        queue.push_front(packet(9, 0x80));
        assert!(transport.sent.lock().is_empty());
        assert_eq!(queue.front().and_then(|e| e.frame().cloned()), Some(packet(9, 0x80)));
    }

    #[test]
    fn test_pop_advances_and_sends_next() {
        let (transport, context) = setup(1000);
        let queue = Queue::new(context, QueueType::Default, Address::new(0x200));
        queue.push_packet(packet(1, 0x80));
        queue.push_packet(packet(2, 0x80));
        let generation = queue.generation();

        let removed = queue.pop().unwrap();
        assert_eq!(removed.frame(), Some(&packet(1, 0x80)));
        assert_eq!(queue.generation(), generation + 1);
        assert_eq!(*transport.sent.lock(), vec![packet(1, 0x80), packet(2, 0x80)]);
    }

    #[test]
    fn test_pop_on_empty_is_noop() {
        let (_, context) = setup(1000);
        let queue = Queue::new(context, QueueType::Default, Address::new(0x200));
        let calls = counting_callback(&queue);
        let generation = queue.generation();

        assert!(queue.pop().is_none());
        assert_eq!(queue.generation(), generation);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_callback_fires_once_on_drain() {
        let (_, context) = setup(1000);
        let queue = Queue::new(context, QueueType::Config, Address::new(0x200));
        let calls = counting_callback(&queue);
        queue.push_packet(packet(1, 0x80));

        queue.pop();
        queue.pop();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clear_skips_callback() {
        let (_, context) = setup(1000);
        let queue = Queue::new(context, QueueType::Config, Address::new(0x200));
        let calls = counting_callback(&queue);
        queue.push_packet(packet(1, 0xA0));
        queue.push_queue(Queue::pending(QueueType::Peer), false, false);

        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.pending_queues_empty());
        assert!(!queue.awaiting_ack());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_detached_queue_never_sends() {
        let queue = Queue::pending(QueueType::Config);
        queue.push_packet(packet(1, 0xA0));
        queue.send(&packet(2, 0xA0));
        assert!(queue.is_detached());
        assert!(!queue.awaiting_ack());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.device(), None);
    }

    #[test]
    fn test_inbound_front_is_not_sent() {
        let (transport, context) = setup(1000);
        let queue = Queue::new(context, QueueType::Pairing, Address::new(0x200));
        let expected = Arc::new(MessageDefinition::incoming(0x02, AccessMask::FULL, |_: u8, _: &Frame| {}));
        queue.push(expected);
        assert!(transport.sent.lock().is_empty());
        assert!(queue.front().unwrap().is_expectation());
    }

    #[test]
    fn test_outgoing_message_resolved_once() {
        let (transport, context) = setup(20);
        let queue = Queue::new(context, QueueType::Config, Address::new(0x200));
        let builds = Arc::new(AtomicUsize::new(0));
        let builds_clone = Arc::clone(&builds);
        let definition = Arc::new(MessageDefinition::outgoing(
            0x01,
            0xA0,
            move |peer: Address, def: &MessageDefinition| {
                let n = builds_clone.fetch_add(1, Ordering::SeqCst) as u8;
                Some(Frame::new(n, def.control_byte(), def.message_type(), Address::new(0x100), peer, vec![]))
            },
        ));

        queue.push(definition);
        thread::sleep(Duration::from_millis(70));
        queue.clear();

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        let sent = transport.sent.lock();
        assert!(sent.len() >= 2);
        assert!(sent.iter().all(|f| f.message_counter == 0));
    }

    #[test]
    fn test_ack_stops_resend() {
        let (transport, context) = setup(30);
        let queue = Queue::new(context, QueueType::Config, Address::new(0x200));
        queue.push_packet(packet(1, 0xA0));
        assert!(queue.awaiting_ack());

        queue.pop();
        assert!(!queue.awaiting_ack());
        thread::sleep(Duration::from_millis(100));
        assert_eq!(transport.sent.lock().len(), 1);
    }

    #[test]
    fn test_pop_wait_pops_after_delay() {
        let (_, context) = setup(1000);
        let queue = Queue::new(context, QueueType::Default, Address::new(0x200));
        queue.push_packet(packet(1, 0x80));
        queue.push_packet(packet(2, 0x80));

        queue.pop_wait(Duration::from_millis(20));
        assert_eq!(queue.len(), 2);
        thread::sleep(Duration::from_millis(150));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_pop_wait_superseded_by_manual_pop() {
        let (_, context) = setup(1000);
        let queue = Queue::new(context, QueueType::Default, Address::new(0x200));
        for n in 1..=3 {
            queue.push_packet(packet(n, 0x80));
        }

        queue.pop_wait(Duration::from_millis(30));
        queue.pop();
        thread::sleep(Duration::from_millis(150));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_newer_pop_wait_replaces_older() {
        let (_, context) = setup(1000);
        let queue = Queue::new(context, QueueType::Default, Address::new(0x200));
        for n in 1..=3 {
            queue.push_packet(packet(n, 0x80));
        }

        queue.pop_wait(Duration::from_millis(20));
        queue.pop_wait(Duration::from_millis(40));
        thread::sleep(Duration::from_millis(200));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_long_keep_alive_extends_last_action() {
        let (_, context) = setup(1000);
        let queue = Queue::new(context, QueueType::Pairing, Address::new(0x200));
        queue.long_keep_alive();
        assert!(queue.last_action() > Instant::now() + Duration::from_millis(4000));
        assert!(!queue.is_idle(Duration::from_millis(100)));
    }

    #[test]
    fn test_keep_alive_resends_last_packet_while_idle() {
        let (transport, context) = setup(1000);
        let queue = Queue::new(context, QueueType::Pairing, Address::new(0x200));
        let expected = Arc::new(MessageDefinition::incoming(0x02, AccessMask::FULL, |_: u8, _: &Frame| {}));
        queue.push_packet(packet(1, 0x80));
        queue.push(expected);
        queue.pop();

        queue.keep_alive();
        assert_eq!(*transport.sent.lock(), vec![packet(1, 0x80), packet(1, 0x80)]);
    }

    #[test]
    fn test_retries_follow_profile() {
        let transport = Arc::new(RecordingTransport::default());
        let config = EngineConfig::default()
            .with_override(QueueType::Pairing, TimingProfile::default().with_retries(7));
        let context = Arc::new(QueueContext::new(1, transport, config));

        let pairing = Queue::new(context.clone(), QueueType::Pairing, Address::new(1));
        let config_queue = Queue::new(context, QueueType::Config, Address::new(2));
        assert_eq!(pairing.retries(), 7);
        assert_eq!(config_queue.retries(), DEFAULT_RETRIES);
        assert_ne!(pairing.id(), config_queue.id());
    }

    #[test]
    fn test_set_pending_queues_replaces_chain() {
        let (_, context) = setup(1000);
        let queue = Queue::new(context, QueueType::Pairing, Address::new(0x200));
        queue.push_queue(Queue::pending(QueueType::Config), false, false);

        let chain: PendingQueues = [QueueType::Peer, QueueType::Config]
            .into_iter()
            .map(Queue::pending)
            .collect();
        queue.set_pending_queues(chain);
        assert_eq!(queue.pending_queues_len(), 2);

        queue.set_pending_queues(PendingQueues::new());
        assert!(queue.pending_queues_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_cannot_chain_onto_itself() {
        let (_, context) = setup(1000);
        let queue = Queue::new(context, QueueType::Default, Address::new(0x200));
        queue.push_queue(queue.clone(), true, false);
        assert!(queue.pending_queues_empty());
    }

    #[test]
    fn test_indirect_chain_cycle_is_rejected() {
        let (_, context) = setup(1000);
        let queue = Queue::new(context, QueueType::Pairing, Address::new(0x200));
        let config = Queue::pending(QueueType::Config);
        let peer = Queue::pending(QueueType::Peer);
        queue.push_queue(config.clone(), false, false);
        peer.push_queue(queue.clone(), false, false);

        // config -> peer -> queue -> config
        config.push_queue(peer.clone(), false, false);
        assert!(config.pending_queues_empty());
        config.set_pending_queues([peer].into_iter().collect());
        assert!(config.pending_queues_empty());

        queue.pop();
        assert_eq!(queue.queue_type(), QueueType::Config);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_chained_member_takes_retries_from_its_profile() {
        let transport = Arc::new(RecordingTransport::default());
        let config = EngineConfig::default()
            .with_override(QueueType::Config, TimingProfile::default().with_retries(2));
        let context = Arc::new(QueueContext::new(1, transport, config));
        let queue = Queue::new(context, QueueType::Pairing, Address::new(0x200));
        assert_eq!(queue.retries(), DEFAULT_RETRIES);
        queue.push_packet(packet(1, 0x80));

        let config_member = Queue::pending(QueueType::Config);
        config_member.push_packet(packet(2, 0x80));
        let pinned = Queue::pending(QueueType::Config);
        pinned.push_packet(packet(3, 0x80));
        pinned.set_retries(6);
        queue.push_queue(config_member, false, false);
        queue.push_queue(pinned, false, false);

        queue.pop();
        assert_eq!(queue.queue_type(), QueueType::Config);
        assert_eq!(queue.retries(), 2);

        queue.pop();
        assert_eq!(queue.retries(), 6);
    }

    /// Fails the first `failures` sends.
    struct FlakyTransport {
        failures: AtomicUsize,
        sent: Mutex<Vec<Frame>>,
    }

    impl Transport for FlakyTransport {
        fn send(&self, frame: &Frame) -> Result<(), TransportError> {
            self.sent.lock().push(frame.clone());
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                Err(TransportError::NotOpen)
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_failed_send_without_ack_is_retried_once_through() {
        let transport = Arc::new(FlakyTransport {
            failures: AtomicUsize::new(1),
            sent: Mutex::new(Vec::new()),
        });
        let config = EngineConfig {
            default: TimingProfile::default().with_resend_interval_ms(20),
            ..EngineConfig::default()
        };
        let context = Arc::new(QueueContext::new(1, transport.clone(), config));
        let queue = Queue::new(context, QueueType::Default, Address::new(0x200));
        let calls = counting_callback(&queue);

        queue.push_packet(packet(1, 0x80));
        assert!(queue.awaiting_ack());
        thread::sleep(Duration::from_millis(150));

        // The retry got through; nothing is awaited from the peer.
        assert_eq!(transport.sent.lock().len(), 2);
        assert_eq!(queue.resend_counter(), 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!queue.awaiting_ack());
    }

    #[test]
    fn test_burst_first_resend_is_early_then_regular() {
        let (transport, context) = setup(200);
        let queue = Queue::new(context, QueueType::Config, Address::new(0x200));
        let calls = counting_callback(&queue);

        queue.push_packet(packet(1, 0xB0));
        thread::sleep(Duration::from_millis(60));

        assert_eq!(transport.sent.lock().len(), 2);
        assert_eq!(queue.resend_counter(), 1);
        assert!(!queue.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        queue.clear();
    }

    #[test]
    fn test_stale_resend_tick_sends_nothing() {
        let (transport, context) = setup(1000);
        let queue = Queue::new(context, QueueType::Config, Address::new(0x200));
        queue.push_packet(packet(1, 0xA0));
        queue.push_packet(packet(2, 0xA0));
        let generation = queue.generation();

        queue.pop();
        assert!(!queue.resend_tick(generation));
        assert_eq!(*transport.sent.lock(), vec![packet(1, 0xA0), packet(2, 0xA0)]);
        assert_eq!(queue.resend_counter(), 0);
        queue.clear();
    }
}
