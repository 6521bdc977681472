//! Client synchronization state machine.
//!
//! ```text
//!            mutate                 debounce fires
//!   Idle ─────────────► PendingLocal ─────────────► Flushing
//!    ▲                       ▲                        │  │
//!    │        ack, queue     │ ack, newer local edits │  │ submit failed
//!    └────── empty ──────────┴────────────────────────┘  ▼
//!                                   retry fires / online  Retrying
//!                          Flushing ◄──────────────────────┘
//! ```
//!
//! The engine does no I/O and reads no clock.  Callers feed it
//! [`SyncInput`]s and carry out the returned [`SyncEffect`]s: arming and
//! cancelling timers, running submissions, persisting the queue and
//! refreshing views.  At most one submission is in flight; local edits made
//! meanwhile extend the queue tail and go out with the next flush.

use std::time::Duration;

use chrono::{DateTime, Utc};
use riglog_core::{apply_mutation, CommandError, Mutation, MutationOutcome, Origin, StateEnvelope};

use super::context::SyncContext;
use super::queue::{PendingOperation, PendingQueue};
use super::timer::{delay_for, TimerKind, TimerSlots, TimerToken};

/// Sync timing configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Quiet period before a burst of edits is flushed (default: 300ms)
    pub debounce: Duration,
    /// Wait after a failed flush (default: 5s)
    pub retry_interval: Duration,
    /// Submissions slower than this count as failed (default: 10s)
    pub request_timeout: Duration,
    /// Pause between reconnect attempts (default: 2s)
    pub reconnect_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            retry_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            reconnect_interval: Duration::from_secs(2),
        }
    }
}

impl SyncConfig {
    pub fn for_testing() -> Self {
        Self {
            debounce: Duration::from_millis(30),
            retry_interval: Duration::from_millis(150),
            request_timeout: Duration::from_secs(2),
            reconnect_interval: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    PendingLocal,
    Flushing,
    Retrying,
}

/// What the presentation layer has to refresh.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewChange {
    /// The deck list was replaced by ledger data.
    DecksReplaced { version: u64 },
    /// The open deck still exists; reload its layout.
    DeckReloaded(String),
    /// The open deck vanished; back to deck selection.
    DeckClosed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEffect {
    Schedule { token: TimerToken, delay: Duration },
    Cancel(TimerToken),
    Submit { request: u64, candidate: StateEnvelope },
    /// The pending queue changed and must be written to durable storage.
    PersistQueue,
    View(ViewChange),
}

#[derive(Debug, Clone)]
pub enum SyncInput {
    TimerFired(TimerToken),
    SubmitSucceeded { request: u64, accepted: StateEnvelope },
    SubmitFailed { request: u64, reason: String },
    /// Pushed snapshot (initial or update).
    RemoteState(StateEnvelope),
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    request: u64,
    /// Local version of the submitted snapshot.
    version: u64,
}

pub struct SyncEngine {
    config: SyncConfig,
    context: SyncContext,
    state: SyncState,
    timers: TimerSlots,
    in_flight: Option<InFlight>,
    flush_requested: bool,
    online: bool,
    next_request: u64,
    /// Push received while edits were outstanding; adopted once they settle.
    deferred: Option<StateEnvelope>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig, snapshot: StateEnvelope) -> Self {
        Self {
            config,
            context: SyncContext::new(snapshot),
            state: SyncState::Idle,
            timers: TimerSlots::new(),
            in_flight: None,
            flush_requested: false,
            online: true,
            next_request: 1,
            deferred: None,
        }
    }

    /// Resume operations left over from an earlier session.
    ///
    /// Local decks become the newest entry's decks and that entry alone is
    /// flushed right away; older entries are superseded by it.
    pub fn restore(&mut self, ops: Vec<PendingOperation>) -> Vec<SyncEffect> {
        let mut effects = Vec::new();
        if ops.is_empty() {
            return effects;
        }

        let mut queue = PendingQueue::from_operations(ops);
        queue.renumber_above(self.context.ledger_version());
        if let Some(latest) = queue.latest() {
            self.context.replace_decks(latest.state.decks.clone());
        }
        log::info!("Resuming {} pending operations", queue.len());
        *self.context.pending_mut() = queue;

        self.state = SyncState::PendingLocal;
        effects.push(SyncEffect::PersistQueue);
        self.flush(&mut effects);
        effects
    }

    /// Apply a local mutation optimistically and queue the resulting state.
    pub fn mutate(
        &mut self,
        mutation: Mutation,
        origin: Origin,
        now: DateTime<Utc>,
    ) -> Result<(MutationOutcome, Vec<SyncEffect>), CommandError> {
        let outcome = apply_mutation(self.context.decks_mut(), mutation, origin, now)?;

        let version = self.context.next_local_version();
        let state = self.context.snapshot(version, now);
        self.context.pending_mut().push(PendingOperation {
            version,
            timestamp: now,
            state,
        });

        let mut effects = vec![SyncEffect::PersistQueue];
        match self.state {
            SyncState::Idle | SyncState::PendingLocal => {
                self.state = SyncState::PendingLocal;
                self.schedule(TimerKind::Debounce, &mut effects);
            }
            // Tail grows; the next flush after the ack picks it up.
            SyncState::Flushing => self.schedule(TimerKind::Debounce, &mut effects),
            // The retry timer owns the next flush.
            SyncState::Retrying => {}
        }

        log::debug!("Queued local version {version}: {}", outcome.summary);
        Ok((outcome, effects))
    }

    pub fn handle(&mut self, input: SyncInput) -> Vec<SyncEffect> {
        let mut effects = Vec::new();
        match input {
            SyncInput::TimerFired(token) => {
                if self.timers.fire(token) {
                    self.flush(&mut effects);
                } else {
                    log::debug!("Ignoring stale {:?} timer {}", token.kind, token.id);
                }
            }
            SyncInput::SubmitSucceeded { request, accepted } => {
                self.on_accepted(request, accepted, &mut effects);
            }
            SyncInput::SubmitFailed { request, reason } => {
                self.on_failed(request, &reason, &mut effects);
            }
            SyncInput::RemoteState(envelope) => self.on_remote(envelope, &mut effects),
            SyncInput::Online => {
                log::info!("Ledger reachable, flushing pending edits");
                self.online = true;
                if !self.context.pending().is_empty() && self.in_flight.is_none() {
                    self.flush(&mut effects);
                }
            }
            SyncInput::Offline => {
                log::info!("Ledger unreachable, edits stay queued");
                self.online = false;
            }
        }
        effects
    }

    fn schedule(&mut self, kind: TimerKind, effects: &mut Vec<SyncEffect>) {
        let (token, replaced) = self.timers.arm(kind);
        if let Some(old) = replaced {
            effects.push(SyncEffect::Cancel(old));
        }
        let delay = delay_for(kind, self.config.debounce, self.config.retry_interval);
        effects.push(SyncEffect::Schedule { token, delay });
    }

    fn cancel(&mut self, kind: TimerKind, effects: &mut Vec<SyncEffect>) {
        if let Some(token) = self.timers.disarm(kind) {
            effects.push(SyncEffect::Cancel(token));
        }
    }

    fn flush(&mut self, effects: &mut Vec<SyncEffect>) {
        if self.in_flight.is_some() {
            self.flush_requested = true;
            return;
        }
        self.cancel(TimerKind::Debounce, effects);
        self.cancel(TimerKind::Retry, effects);

        let (version, candidate) = match self.context.pending().latest() {
            Some(op) => (op.version, op.state.clone()),
            None => {
                self.state = SyncState::Idle;
                return;
            }
        };

        if !self.online {
            log::debug!("Offline, deferring flush of local version {version}");
            self.state = SyncState::Retrying;
            self.schedule(TimerKind::Retry, effects);
            return;
        }

        let request = self.next_request;
        self.next_request += 1;
        self.in_flight = Some(InFlight { request, version });
        self.flush_requested = false;
        self.state = SyncState::Flushing;
        effects.push(SyncEffect::Submit { request, candidate });
    }

    fn take_flight(&mut self, request: u64) -> Option<InFlight> {
        if self.in_flight.map(|flight| flight.request) == Some(request) {
            return self.in_flight.take();
        }
        log::debug!("Ignoring reply to unknown request {request}");
        None
    }

    fn on_accepted(&mut self, request: u64, accepted: StateEnvelope, effects: &mut Vec<SyncEffect>) {
        let Some(flight) = self.take_flight(request) else {
            return;
        };

        let known = self.context.ledger_version();
        let ledger_version = known.max(accepted.version);
        let dropped = self.context.pending_mut().drop_through(flight.version);
        self.context.set_ledger_version(ledger_version);
        self.context.pending_mut().renumber_above(ledger_version);
        effects.push(SyncEffect::PersistQueue);
        log::debug!(
            "Ledger accepted local version {} as {} ({dropped} entries settled)",
            flight.version,
            accepted.version
        );

        if self.context.pending().is_empty() {
            self.flush_requested = false;
            self.state = SyncState::Idle;
            let newest = match self.deferred.take() {
                Some(pushed) if pushed.version > accepted.version => pushed,
                _ => accepted,
            };
            // An older ack must not undo a push we already adopted.
            if newest.version >= known {
                self.adopt(newest, effects);
            }
            return;
        }

        self.state = SyncState::PendingLocal;
        if self.flush_requested || !self.timers.is_armed(TimerKind::Debounce) {
            self.flush(effects);
        }
    }

    fn on_failed(&mut self, request: u64, reason: &str, effects: &mut Vec<SyncEffect>) {
        if self.take_flight(request).is_none() {
            return;
        }
        self.flush_requested = false;
        if self.context.pending().is_empty() {
            self.state = SyncState::Idle;
            return;
        }

        log::warn!("Flush failed ({reason}), retrying in {:?}", self.config.retry_interval);
        self.state = SyncState::Retrying;
        self.cancel(TimerKind::Debounce, effects);
        self.schedule(TimerKind::Retry, effects);
    }

    fn on_remote(&mut self, envelope: StateEnvelope, effects: &mut Vec<SyncEffect>) {
        let known = self.context.ledger_version();
        let latest_pending = self.context.pending().latest_version().unwrap_or(0);
        if envelope.version <= known || envelope.version <= latest_pending {
            log::debug!(
                "Ignoring pushed version {} (ledger {known}, pending {latest_pending})",
                envelope.version
            );
            return;
        }

        let outstanding = self.in_flight.is_some() || self.state == SyncState::Retrying;
        if outstanding && !self.context.pending().is_empty() {
            self.defer(envelope, effects);
            return;
        }

        self.deferred = None;
        if !self.context.pending().is_empty() {
            self.context.pending_mut().clear();
            effects.push(SyncEffect::PersistQueue);
        }
        self.cancel(TimerKind::Debounce, effects);
        self.cancel(TimerKind::Retry, effects);
        self.flush_requested = false;
        self.state = if self.in_flight.is_some() {
            SyncState::Flushing
        } else {
            SyncState::Idle
        };
        self.adopt(envelope, effects);
    }

    /// Rebase outstanding edits on a pushed version without touching the
    /// local decks.  The in-flight entry keeps its place in the queue so
    /// its ack still settles exactly the entries it covered.
    fn defer(&mut self, envelope: StateEnvelope, effects: &mut Vec<SyncEffect>) {
        let version = envelope.version;
        let covered = match self.in_flight {
            Some(flight) => self
                .context
                .pending()
                .operations()
                .iter()
                .filter(|op| op.version <= flight.version)
                .count() as u64,
            None => 0,
        };

        self.context.set_ledger_version(version);
        self.context.pending_mut().renumber_above(version);
        if let Some(flight) = self.in_flight.as_mut() {
            flight.version = version + covered;
            // The tail must go out on top of the pushed state.
            self.flush_requested = true;
        }
        effects.push(SyncEffect::PersistQueue);
        log::debug!(
            "Pushed version {version} arrived with {} local edits outstanding, rebasing them",
            self.context.pending().len()
        );
        self.deferred = Some(envelope);
    }

    fn adopt(&mut self, envelope: StateEnvelope, effects: &mut Vec<SyncEffect>) {
        let version = envelope.version;
        self.context.set_ledger_version(version);
        self.context.replace_decks(envelope.decks);
        effects.push(SyncEffect::View(ViewChange::DecksReplaced { version }));

        if let Some(open) = self.context.open_deck().map(str::to_owned) {
            if self.context.deck(&open).is_some() {
                effects.push(SyncEffect::View(ViewChange::DeckReloaded(open)));
            } else {
                self.context.close();
                effects.push(SyncEffect::View(ViewChange::DeckClosed(open)));
            }
        }
        log::info!("Adopted ledger version {version}");
    }

    pub fn open_deck(&mut self, deck_id: &str) -> bool {
        self.context.open(deck_id)
    }

    pub fn close_deck(&mut self) -> Option<String> {
        self.context.close()
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn context(&self) -> &SyncContext {
        &self.context
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Request id of the submission in flight.
    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight.map(|flight| flight.request)
    }
}
