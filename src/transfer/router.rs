//! Per-connection routing of transfer-control packets.
//!
//! Start, fragment, close and terminate packets may be processed out of
//! logical order relative to a transfer's lifecycle. The router owns the open
//! sessions and two bounded backlogs: fragments and close tokens that arrived
//! before a matching session could take them. Every fragment or close first
//! re-checks both backlogs, since resolving one entry may unblock another.

use std::{
    collections::{HashMap, VecDeque},
    num::NonZeroUsize,
    path::PathBuf,
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use super::{Acceptance, ReassembledFile, TransferError, TransferSession};
use crate::{
    metrics::{self, TransferOutcome},
    packet::{
        FileFragment,
        FileStreamClose,
        FileStreamStart,
        Packet,
        TerminateFileStream,
        TransferControl,
        TransferId,
    },
};

/// Bounds applied to sessions and backlogs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouterLimits {
    /// Idle time after which a session or backlog entry is evicted.
    pub session_timeout: Duration,
    /// Pending fragments kept per transfer before the oldest is evicted.
    pub max_backlog_per_transfer: NonZeroUsize,
    /// Pending fragments kept across all transfers; further ones are dropped.
    pub max_pending_fragments: NonZeroUsize,
    /// Pending close tokens kept before the oldest is evicted.
    pub max_pending_closes: NonZeroUsize,
}

impl Default for RouterLimits {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(300),
            max_backlog_per_transfer: NonZeroUsize::new(4096).unwrap_or(NonZeroUsize::MIN),
            max_pending_fragments: NonZeroUsize::new(16_384).unwrap_or(NonZeroUsize::MIN),
            max_pending_closes: NonZeroUsize::new(64).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

/// A transfer whose fragments have all been merged.
#[derive(Debug)]
pub struct CompletedTransfer {
    /// Start packet that opened the transfer.
    pub start: FileStreamStart,
    /// Reconstructed content.
    pub file: ReassembledFile,
}

/// Lifecycle changes produced while routing a packet.
#[derive(Debug)]
pub enum TransferEvent {
    /// A transfer closed with all fragments present.
    Completed(CompletedTransfer),
    /// The peer terminated a known transfer.
    Terminated {
        /// Transfer name.
        name: String,
        /// Transfer identifier.
        transfer_id: TransferId,
    },
    /// A transfer was dropped after a local I/O failure.
    Failed {
        /// Transfer name.
        name: String,
        /// Transfer identifier.
        transfer_id: TransferId,
        /// Failure cause.
        error: TransferError,
    },
}

/// Terminated transfers remembered so their stragglers can be dropped.
const RECENTLY_TERMINATED: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct TransferKey {
    name: String,
    transfer_id: TransferId,
}

impl TransferKey {
    fn of(control: &impl TransferControl) -> Self {
        Self {
            name: control.name().to_owned(),
            transfer_id: control.transfer_id(),
        }
    }
}

impl TransferControl for TransferKey {
    fn name(&self) -> &str { &self.name }

    fn transfer_id(&self) -> TransferId { self.transfer_id }
}

#[derive(Debug)]
struct Pending<T> {
    item: T,
    queued_at: Instant,
}

/// Router for one connection's inbound transfers.
#[derive(Debug)]
pub struct TransferRouter {
    spool_dir: PathBuf,
    limits: RouterLimits,
    sessions: Vec<TransferSession>,
    pending_fragments: HashMap<TransferKey, VecDeque<Pending<FileFragment>>>,
    pending_total: usize,
    pending_closes: VecDeque<Pending<FileStreamClose>>,
    terminated: VecDeque<TransferKey>,
}

impl TransferRouter {
    /// Create a router spooling into `spool_dir`.
    #[must_use]
    pub fn new(spool_dir: impl Into<PathBuf>, limits: RouterLimits) -> Self {
        Self {
            spool_dir: spool_dir.into(),
            limits,
            sessions: Vec::new(),
            pending_fragments: HashMap::new(),
            pending_total: 0,
            pending_closes: VecDeque::new(),
            terminated: VecDeque::new(),
        }
    }

    /// Number of open sessions.
    #[must_use]
    pub fn active_sessions(&self) -> usize { self.sessions.len() }

    /// Number of backlogged fragments.
    #[must_use]
    pub fn pending_fragments(&self) -> usize { self.pending_total }

    /// Number of backlogged close tokens.
    #[must_use]
    pub fn pending_closes(&self) -> usize { self.pending_closes.len() }

    /// Route a transfer-control packet using the current time.
    ///
    /// Packets that are not transfer-control are ignored.
    pub fn route(&mut self, packet: Packet) -> Vec<TransferEvent> { self.route_at(packet, Instant::now()) }

    /// Route a transfer-control packet using an explicit clock reading.
    pub fn route_at(&mut self, packet: Packet, now: Instant) -> Vec<TransferEvent> {
        let mut events = Vec::new();
        match packet {
            Packet::FileStreamStart(start) => self.on_start(start, now, &mut events),
            Packet::FileFragment(fragment) => self.on_fragment(fragment, now, &mut events),
            Packet::FileStreamClose(close) => self.on_close(close, now, &mut events),
            Packet::TerminateFileStream(terminate) => self.on_terminate(&terminate, &mut events),
            other => debug!(kind = %other.kind(), "router ignored non-transfer packet"),
        }
        events
    }

    fn on_start(&mut self, start: FileStreamStart, now: Instant, events: &mut Vec<TransferEvent>) {
        if self.session_index(&start).is_some() {
            warn!(
                name = %start.name,
                transfer_id = %start.transfer_id,
                "duplicate start for open transfer ignored"
            );
            return;
        }
        debug!(
            name = %start.name,
            transfer_id = %start.transfer_id,
            fragments = start.fragment_count,
            length = start.file_length,
            "transfer started"
        );
        self.sessions
            .push(TransferSession::new(start, self.spool_dir.clone(), now));
        self.reconcile(now, events);
    }

    fn on_fragment(&mut self, fragment: FileFragment, now: Instant, events: &mut Vec<TransferEvent>) {
        self.reconcile(now, events);
        match self.session_index(&fragment) {
            Some(index) => {
                if self.offer(index, &fragment, now, events) {
                    self.resolve_closes(events);
                }
            }
            None if self.was_terminated(&fragment) => debug!(
                name = %fragment.name,
                transfer_id = %fragment.transfer_id,
                index = fragment.index,
                "fragment of terminated transfer dropped"
            ),
            None => self.backlog_fragment(fragment, now),
        }
    }

    fn on_close(&mut self, close: FileStreamClose, now: Instant, events: &mut Vec<TransferEvent>) {
        self.reconcile(now, events);
        if self.try_close(&close, events) {
            return;
        }
        if self.was_terminated(&close) {
            debug!(name = %close.name, transfer_id = %close.transfer_id, "close of terminated transfer dropped");
            return;
        }
        self.backlog_close(close, now);
    }

    fn was_terminated(&self, control: &impl TransferControl) -> bool {
        self.terminated.iter().any(|key| control.same_transfer(key))
    }

    fn remember_terminated(&mut self, key: TransferKey) {
        if self.terminated.contains(&key) {
            return;
        }
        if self.terminated.len() >= RECENTLY_TERMINATED {
            self.terminated.pop_front();
        }
        self.terminated.push_back(key);
    }

    fn on_terminate(&mut self, terminate: &TerminateFileStream, events: &mut Vec<TransferEvent>) {
        let key = TransferKey::of(terminate);
        let sessions_before = self.sessions.len();
        let closes_before = self.pending_closes.len();
        self.sessions.retain(|s| !s.same_transfer(terminate));
        let fragments = self.pending_fragments.remove(&key).map_or(0, |queue| queue.len());
        self.pending_total -= fragments;
        self.pending_closes.retain(|p| !p.item.same_transfer(terminate));
        self.remember_terminated(key);

        let sessions = sessions_before - self.sessions.len();
        let purged = fragments + (closes_before - self.pending_closes.len());
        if sessions == 0 && purged == 0 {
            debug!(
                name = %terminate.name,
                transfer_id = %terminate.transfer_id,
                "terminate for unknown transfer"
            );
            return;
        }
        info!(
            name = %terminate.name,
            transfer_id = %terminate.transfer_id,
            sessions,
            purged,
            "transfer terminated by peer"
        );
        metrics::inc_transfers(TransferOutcome::Terminated);
        events.push(TransferEvent::Terminated {
            name: terminate.name.clone(),
            transfer_id: terminate.transfer_id,
        });
    }

    /// Drain backlogged fragments into sessions, then retry pending closes.
    fn reconcile(&mut self, now: Instant, events: &mut Vec<TransferEvent>) {
        if self.pending_total > 0 && !self.sessions.is_empty() {
            let open: Vec<TransferKey> = self
                .sessions
                .iter()
                .filter(|s| !s.is_finished())
                .map(TransferKey::of)
                .collect();
            for key in open {
                let Some(queue) = self.pending_fragments.remove(&key) else {
                    continue;
                };
                self.pending_total -= queue.len();
                for entry in queue {
                    // a spool failure removes the session; its remaining fragments go with it
                    let Some(index) = self.session_index(&entry.item) else {
                        break;
                    };
                    self.offer(index, &entry.item, now, events);
                }
            }
        }
        self.resolve_closes(events);
    }

    fn resolve_closes(&mut self, events: &mut Vec<TransferEvent>) {
        if self.pending_closes.is_empty() || self.sessions.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending_closes);
        for entry in pending {
            if !self.try_close(&entry.item, events) {
                self.pending_closes.push_back(entry);
            }
        }
    }

    /// Offer `fragment` to the session at `index`; returns true if accepted.
    fn offer(
        &mut self,
        index: usize,
        fragment: &FileFragment,
        now: Instant,
        events: &mut Vec<TransferEvent>,
    ) -> bool {
        match self.sessions[index].accept_fragment(fragment, now) {
            Ok(Acceptance::Accepted) => true,
            Ok(rejected @ (Acceptance::Duplicate | Acceptance::OutOfRange)) => {
                warn!(
                    name = %fragment.name,
                    transfer_id = %fragment.transfer_id,
                    index = fragment.index,
                    reason = ?rejected,
                    "fragment dropped"
                );
                false
            }
            Ok(Acceptance::Foreign) => false,
            Err(error) => {
                let session = self.sessions.remove(index);
                Self::fail(&session, error, events);
                false
            }
        }
    }

    /// Finish the session matching `close` if it is complete.
    fn try_close(&mut self, close: &FileStreamClose, events: &mut Vec<TransferEvent>) -> bool {
        let Some(index) = self.session_index(close) else {
            return false;
        };
        if !self.sessions[index].is_complete() {
            return false;
        }
        let mut session = self.sessions.remove(index);
        match session.finish(close) {
            Ok(Some(file)) => {
                info!(
                    name = %close.name,
                    transfer_id = %close.transfer_id,
                    bytes = file.len(),
                    "transfer completed"
                );
                metrics::inc_transfers(TransferOutcome::Completed);
                let start = session.start().clone();
                events.push(TransferEvent::Completed(CompletedTransfer { start, file }));
                true
            }
            Ok(None) => {
                self.sessions.insert(index, session);
                false
            }
            Err(error) => {
                Self::fail(&session, error, events);
                true
            }
        }
    }

    fn fail(session: &TransferSession, error: TransferError, events: &mut Vec<TransferEvent>) {
        warn!(
            name = %session.name(),
            transfer_id = %session.transfer_id(),
            error = %error,
            "transfer aborted after spool failure"
        );
        metrics::inc_transfers(TransferOutcome::Failed);
        events.push(TransferEvent::Failed {
            name: session.name().to_owned(),
            transfer_id: session.transfer_id(),
            error,
        });
    }

    fn session_index(&self, control: &impl TransferControl) -> Option<usize> {
        self.sessions
            .iter()
            .position(|s| !s.is_finished() && s.same_transfer(control))
    }

    fn backlog_fragment(&mut self, fragment: FileFragment, now: Instant) {
        let per_transfer = self.limits.max_backlog_per_transfer.get();
        let key = TransferKey::of(&fragment);
        let queued = self.pending_fragments.get(&key).map_or(0, VecDeque::len);
        if queued < per_transfer && self.pending_total >= self.limits.max_pending_fragments.get() {
            warn!(
                name = %fragment.name,
                transfer_id = %fragment.transfer_id,
                index = fragment.index,
                pending = self.pending_total,
                "fragment backlog at capacity; fragment dropped"
            );
            return;
        }
        let queue = self.pending_fragments.entry(key).or_default();
        if queue.len() >= per_transfer
            && let Some(evicted) = queue.pop_front()
        {
            self.pending_total -= 1;
            warn!(
                name = %evicted.item.name,
                transfer_id = %evicted.item.transfer_id,
                index = evicted.item.index,
                "fragment backlog full; oldest entry evicted"
            );
        }
        debug!(
            name = %fragment.name,
            transfer_id = %fragment.transfer_id,
            index = fragment.index,
            "fragment backlogged"
        );
        queue.push_back(Pending {
            item: fragment,
            queued_at: now,
        });
        self.pending_total += 1;
    }

    fn backlog_close(&mut self, close: FileStreamClose, now: Instant) {
        if self.pending_closes.len() >= self.limits.max_pending_closes.get()
            && let Some(evicted) = self.pending_closes.pop_front()
        {
            warn!(
                name = %evicted.item.name,
                transfer_id = %evicted.item.transfer_id,
                "close backlog full; oldest entry evicted"
            );
        }
        debug!(name = %close.name, transfer_id = %close.transfer_id, "close backlogged");
        self.pending_closes.push_back(Pending {
            item: close,
            queued_at: now,
        });
    }

    /// Evict sessions and backlog entries idle for longer than the timeout.
    ///
    /// Returns the number of sessions evicted. Their spool files are removed.
    pub fn purge_expired_at(&mut self, now: Instant) -> usize {
        let timeout = self.limits.session_timeout;
        let expired = |at: Instant| now.saturating_duration_since(at) >= timeout;

        let before = self.sessions.len();
        self.sessions.retain(|s| {
            let keep = !expired(s.last_activity());
            if !keep {
                warn!(
                    name = %s.name(),
                    transfer_id = %s.transfer_id(),
                    received = s.received_count(),
                    declared = s.declared_count(),
                    "stalled transfer evicted"
                );
            }
            keep
        });
        let evicted = before - self.sessions.len();
        for _ in 0..evicted {
            metrics::inc_transfers(TransferOutcome::Expired);
        }
        self.pending_fragments.retain(|_, queue| {
            queue.retain(|p| !expired(p.queued_at));
            !queue.is_empty()
        });
        self.pending_total = self.pending_fragments.values().map(VecDeque::len).sum();
        self.pending_closes.retain(|p| !expired(p.queued_at));
        evicted
    }

    /// Evict expired sessions using the current time.
    pub fn purge_expired(&mut self) -> usize { self.purge_expired_at(Instant::now()) }

    /// Release every session and backlog entry.
    pub fn clear(&mut self) {
        if !self.sessions.is_empty() || self.pending_total > 0 {
            debug!(
                sessions = self.sessions.len(),
                fragments = self.pending_total,
                closes = self.pending_closes.len(),
                "releasing unfinished transfers"
            );
        }
        self.sessions.clear();
        self.pending_fragments.clear();
        self.pending_total = 0;
        self.pending_closes.clear();
        self.terminated.clear();
    }
}

#[cfg(test)]
mod tests;
