//! Tokio driver for [`SyncEngine`].
//!
//! One task owns the engine.  Application commands, timer fires,
//! submission results and link events all funnel into it, so the engine
//! only ever sees one input at a time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use riglog_core::{CommandError, Deck, Mutation, MutationOutcome, Origin, StateEnvelope};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::engine::{SyncConfig, SyncEffect, SyncEngine, SyncInput, SyncState, ViewChange};
use super::link::{LedgerLink, LinkError, LinkEvent};
use super::queue::QueueStore;
use super::timer::TimerToken;

/// Point-in-time view of a client.
#[derive(Debug, Clone)]
pub struct ClientSnapshot {
    pub state: SyncState,
    pub ledger_version: u64,
    pub pending: usize,
    pub online: bool,
    pub decks: Vec<Deck>,
    pub open_deck: Option<String>,
}

enum Command {
    Mutate {
        mutation: Mutation,
        origin: Origin,
        reply: oneshot::Sender<Result<MutationOutcome, CommandError>>,
    },
    Open {
        deck: String,
        reply: oneshot::Sender<bool>,
    },
    Close,
    Snapshot {
        reply: oneshot::Sender<ClientSnapshot>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientError {
    /// The driver task is gone.
    Stopped,
    Command(CommandError),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Stopped => write!(f, "Sync client stopped"),
            ClientError::Command(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ClientError {}

/// Cheap, cloneable access to a running client.
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
    views: broadcast::Sender<ViewChange>,
}

impl SyncHandle {
    pub async fn mutate(&self, mutation: Mutation, origin: Origin) -> Result<MutationOutcome, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Mutate { mutation, origin, reply })
            .await
            .map_err(|_| ClientError::Stopped)?;
        rx.await
            .map_err(|_| ClientError::Stopped)?
            .map_err(ClientError::Command)
    }

    pub async fn open_deck(&self, deck: impl Into<String>) -> Result<bool, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Open { deck: deck.into(), reply })
            .await
            .map_err(|_| ClientError::Stopped)?;
        rx.await.map_err(|_| ClientError::Stopped)
    }

    pub async fn close_deck(&self) -> Result<(), ClientError> {
        self.commands
            .send(Command::Close)
            .await
            .map_err(|_| ClientError::Stopped)
    }

    pub async fn snapshot(&self) -> Result<ClientSnapshot, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| ClientError::Stopped)?;
        rx.await.map_err(|_| ClientError::Stopped)
    }

    /// View refresh notifications.
    pub fn views(&self) -> broadcast::Receiver<ViewChange> {
        self.views.subscribe()
    }

    /// Poll until nothing is queued or in flight.  False on timeout.
    pub async fn settle(&self, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            match self.snapshot().await {
                Ok(snap) if snap.state == SyncState::Idle && snap.pending == 0 => return true,
                Ok(_) => {}
                Err(_) => return false,
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Owner of the driver task.  Dropping it stops the client.
pub struct SyncClient {
    handle: SyncHandle,
    task: JoinHandle<()>,
}

impl SyncClient {
    /// Start a client over `link`.
    ///
    /// The local state starts from a ledger fetch (or empty, when the
    /// ledger is unreachable) and any operations left in `queue` are
    /// resumed immediately.
    pub async fn start(
        config: SyncConfig,
        link: Arc<dyn LedgerLink>,
        queue: Arc<dyn QueueStore>,
    ) -> Self {
        let events = link.events();
        let (snapshot, online) = match link.fetch().await {
            Ok(snapshot) => (snapshot, true),
            Err(e) => {
                log::warn!("Starting offline, ledger fetch failed: {e}");
                (StateEnvelope::new(0, Vec::new()), false)
            }
        };

        let restored = queue.load().unwrap_or_else(|e| {
            log::warn!("Pending queue unreadable, starting empty: {e}");
            Vec::new()
        });

        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (views, _) = broadcast::channel(64);
        let (internal_tx, internal_rx) = mpsc::channel(64);

        let mut driver = Driver {
            engine: SyncEngine::new(config, snapshot),
            link,
            queue,
            views: views.clone(),
            internal: internal_tx,
            timers: HashMap::new(),
        };
        if !online {
            let effects = driver.engine.handle(SyncInput::Offline);
            driver.run_effects(effects);
        }
        let effects = driver.engine.restore(restored);
        driver.run_effects(effects);

        let task = tokio::spawn(driver.run(commands_rx, internal_rx, events));
        Self {
            handle: SyncHandle {
                commands: commands_tx,
                views,
            },
            task,
        }
    }

    pub fn handle(&self) -> SyncHandle {
        self.handle.clone()
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Driver {
    engine: SyncEngine,
    link: Arc<dyn LedgerLink>,
    queue: Arc<dyn QueueStore>,
    views: broadcast::Sender<ViewChange>,
    internal: mpsc::Sender<SyncInput>,
    timers: HashMap<TimerToken, JoinHandle<()>>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut internal: mpsc::Receiver<SyncInput>,
        mut events: broadcast::Receiver<LinkEvent>,
    ) {
        let mut link_open = true;
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    self.on_command(command);
                }

                Some(input) = internal.recv() => {
                    if let SyncInput::TimerFired(token) = &input {
                        self.timers.remove(token);
                    }
                    let effects = self.engine.handle(input);
                    self.run_effects(effects);
                }

                event = events.recv(), if link_open => {
                    let input = match event {
                        Ok(LinkEvent::Remote(envelope)) => Some(SyncInput::RemoteState(envelope)),
                        Ok(LinkEvent::Online) => Some(SyncInput::Online),
                        Ok(LinkEvent::Offline) => Some(SyncInput::Offline),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("Missed {n} ledger events, re-fetching");
                            self.refetch();
                            None
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            log::debug!("Ledger link closed its event stream");
                            link_open = false;
                            None
                        }
                    };
                    if let Some(input) = input {
                        let effects = self.engine.handle(input);
                        self.run_effects(effects);
                    }
                }
            }
        }

        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
        log::debug!("Sync client stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Mutate { mutation, origin, reply } => {
                let result = match self.engine.mutate(mutation, origin, Utc::now()) {
                    Ok((outcome, effects)) => {
                        self.run_effects(effects);
                        Ok(outcome)
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::Open { deck, reply } => {
                let _ = reply.send(self.engine.open_deck(&deck));
            }
            Command::Close => {
                self.engine.close_deck();
            }
            Command::Snapshot { reply } => {
                let context = self.engine.context();
                let _ = reply.send(ClientSnapshot {
                    state: self.engine.state(),
                    ledger_version: context.ledger_version(),
                    pending: context.pending().len(),
                    online: self.engine.is_online(),
                    decks: context.decks().to_vec(),
                    open_deck: context.open_deck().map(str::to_owned),
                });
            }
        }
    }

    fn run_effects(&mut self, effects: Vec<SyncEffect>) {
        for effect in effects {
            match effect {
                SyncEffect::Schedule { token, delay } => {
                    let internal = self.internal.clone();
                    let timer = tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = internal.send(SyncInput::TimerFired(token)).await;
                    });
                    if let Some(previous) = self.timers.insert(token, timer) {
                        previous.abort();
                    }
                }
                SyncEffect::Cancel(token) => {
                    if let Some(timer) = self.timers.remove(&token) {
                        timer.abort();
                    }
                }
                SyncEffect::Submit { request, candidate } => self.submit(request, candidate),
                SyncEffect::PersistQueue => {
                    let ops = self.engine.context().pending().operations();
                    if let Err(e) = self.queue.save(ops) {
                        log::warn!("Failed to persist {} pending operations: {e}", ops.len());
                    }
                }
                SyncEffect::View(change) => {
                    let _ = self.views.send(change);
                }
            }
        }
    }

    fn submit(&self, request: u64, candidate: StateEnvelope) {
        let link = self.link.clone();
        let internal = self.internal.clone();
        let timeout = self.engine.config().request_timeout;
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, link.submit(&candidate)).await {
                Ok(result) => result,
                Err(_) => Err(LinkError::Timeout),
            };
            let input = match result {
                Ok(accepted) => SyncInput::SubmitSucceeded { request, accepted },
                Err(e) => SyncInput::SubmitFailed {
                    request,
                    reason: e.to_string(),
                },
            };
            let _ = internal.send(input).await;
        });
    }

    fn refetch(&self) {
        let link = self.link.clone();
        let internal = self.internal.clone();
        tokio::spawn(async move {
            match link.fetch().await {
                Ok(envelope) => {
                    let _ = internal.send(SyncInput::RemoteState(envelope)).await;
                }
                Err(e) => log::warn!("Re-fetch after lag failed: {e}"),
            }
        });
    }
}
