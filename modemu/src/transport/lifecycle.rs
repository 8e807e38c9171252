use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::LifecycleError;
use crate::transport::TransportState;

const EVENT_CAPACITY: usize = 16;

/// Signals emitted by a carrier task
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum CarrierEvent {
    Ready(Option<SocketAddr>),
    Error(String),
    Closed,
}

/// Given to a carrier task so it can report readiness and observe shutdown
pub(crate) struct CarrierHandle {
    events: broadcast::Sender<CarrierEvent>,
    shutdown: mpsc::Receiver<()>,
    sessions: SessionGuard,
}

/// Held by every session a carrier accepts during one start cycle
///
/// `stop()` signals every guard of the cycle and then waits until all of them are dropped.
#[derive(Clone)]
pub(crate) struct SessionGuard {
    stopped: watch::Receiver<()>,
    _alive: mpsc::Sender<()>,
}

impl SessionGuard {
    /// resolves once the cycle that issued the guard is stopping
    pub(crate) fn stopped(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut stopped = self.stopped.clone();
        async move {
            // only ever closed, never sent to
            let _ = stopped.changed().await;
        }
    }
}

impl CarrierHandle {
    pub(crate) fn ready(&self, addr: Option<SocketAddr>) {
        let _ = self.events.send(CarrierEvent::Ready(addr));
    }

    /// guard for a session accepted by the carrier
    pub(crate) fn session_guard(&self) -> SessionGuard {
        self.sessions.clone()
    }

    /// resolves when the owning transport stops
    pub(crate) async fn shutdown_requested(&mut self) {
        // only ever closed, never sent to
        let _ = self.shutdown.recv().await;
    }
}

/// Listeners attached to the event channel during one start cycle
#[derive(Default)]
struct ListenerSet {
    tasks: Vec<JoinHandle<()>>,
}

impl ListenerSet {
    fn attach_monitor(&mut self, name: &'static str, mut rx: broadcast::Receiver<CarrierEvent>) {
        self.tasks.push(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(CarrierEvent::Ready(addr)) => {
                        tracing::debug!("{} carrier ready (addr: {:?})", name, addr)
                    }
                    Ok(CarrierEvent::Error(err)) => tracing::warn!("{} carrier error: {}", name, err),
                    Ok(CarrierEvent::Closed) => {
                        tracing::debug!("{} carrier closed", name);
                        return;
                    }
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        tracing::warn!("{} carrier monitor skipped {} events", name, count)
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }));
    }

    /// aborts every monitor and waits until each has dropped its receiver
    async fn release(self) {
        for task in self.tasks {
            task.abort();
            let _ = task.await;
        }
    }
}

struct Cycle {
    shutdown: mpsc::Sender<()>,
    stop_sessions: watch::Sender<()>,
    sessions: mpsc::Receiver<()>,
    server: JoinHandle<Result<(), String>>,
    listeners: ListenerSet,
}

/// Start/stop state machine shared by the listener based carriers
///
/// The event channel outlives every cycle, so its receiver count is the number of
/// listeners currently attached to the carrier.
pub(crate) struct CarrierLifecycle {
    name: &'static str,
    events: broadcast::Sender<CarrierEvent>,
    state: TransportState,
    init_timeout: Duration,
    local_addr: Option<SocketAddr>,
    cycle: Option<Cycle>,
}

impl CarrierLifecycle {
    pub(crate) fn new(name: &'static str, init_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            name,
            events,
            state: TransportState::Stopped,
            init_timeout,
            local_addr: None,
            cycle: None,
        }
    }

    pub(crate) fn state(&self) -> TransportState {
        self.state
    }

    pub(crate) fn set_init_timeout(&mut self, timeout: Duration) {
        self.init_timeout = timeout;
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Spawn the carrier task produced by `launch` and wait for it to signal readiness
    ///
    /// On failure every listener attached during this call is released before returning.
    pub(crate) async fn start<F, Fut>(&mut self, launch: F) -> Result<(), LifecycleError>
    where
        F: FnOnce(CarrierHandle) -> Fut,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        if self.state != TransportState::Stopped {
            return Err(LifecycleError::AlreadyStarted);
        }

        tracing::info!("{} transport starting", self.name);
        self.state = TransportState::Starting;

        let mut listeners = ListenerSet::default();
        let mut ready = self.events.subscribe();
        listeners.attach_monitor(self.name, self.events.subscribe());

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (stop_sessions, stopped) = watch::channel(());
        let (alive, sessions) = mpsc::channel(1);
        let carrier = launch(CarrierHandle {
            events: self.events.clone(),
            shutdown: shutdown_rx,
            sessions: SessionGuard {
                stopped,
                _alive: alive,
            },
        });
        let events = self.events.clone();
        let server = tokio::spawn(async move {
            let result = carrier.await;
            if let Err(err) = &result {
                let _ = events.send(CarrierEvent::Error(err.clone()));
            }
            result
        });

        let outcome = tokio::time::timeout(self.init_timeout, wait_for_ready(&mut ready)).await;
        drop(ready);

        let error = match outcome {
            Ok(Ok(addr)) => {
                self.local_addr = addr;
                self.cycle = Some(Cycle {
                    shutdown: shutdown_tx,
                    stop_sessions,
                    sessions,
                    server,
                    listeners,
                });
                self.state = TransportState::Started;
                tracing::info!("{} transport started", self.name);
                return Ok(());
            }
            Ok(Err(err)) => LifecycleError::InitFailure(err),
            Err(_) => LifecycleError::InitTimeout(self.init_timeout),
        };

        drop(shutdown_tx);
        drop(stop_sessions);
        server.abort();
        let _ = server.await;
        listeners.release().await;
        self.state = TransportState::Stopped;
        tracing::error!("{} transport failed to start: {}", self.name, error);
        Err(error)
    }

    /// Close the carrier and its sessions, then release the listeners of the current cycle
    ///
    /// Resolves only after every session accepted during the cycle has closed.
    pub(crate) async fn stop(&mut self) -> Result<(), LifecycleError> {
        let Cycle {
            shutdown,
            stop_sessions,
            mut sessions,
            server,
            listeners,
        } = match self.cycle.take() {
            Some(cycle) => cycle,
            None => {
                self.state = TransportState::Stopped;
                return Ok(());
            }
        };

        tracing::info!("{} transport stopping", self.name);
        self.state = TransportState::Stopping;

        drop(stop_sessions);
        drop(shutdown);
        let result = server.await;
        let drained = tokio::time::timeout(self.init_timeout, async {
            while sessions.recv().await.is_some() {}
        })
        .await;
        let _ = self.events.send(CarrierEvent::Closed);
        listeners.release().await;

        self.local_addr = None;
        self.state = TransportState::Stopped;

        match (result, drained) {
            (Ok(Ok(())), Ok(())) => {
                tracing::info!("{} transport stopped", self.name);
                Ok(())
            }
            (Ok(Err(err)), _) => Err(LifecycleError::CloseFailure(err)),
            (Err(err), _) => Err(LifecycleError::CloseFailure(err.to_string())),
            (Ok(Ok(())), Err(_)) => Err(LifecycleError::CloseFailure(format!(
                "sessions still open after {:?}",
                self.init_timeout
            ))),
        }
    }
}

async fn wait_for_ready(
    rx: &mut broadcast::Receiver<CarrierEvent>,
) -> Result<Option<SocketAddr>, String> {
    loop {
        match rx.recv().await {
            Ok(CarrierEvent::Ready(addr)) => return Ok(addr),
            Ok(CarrierEvent::Error(err)) => return Err(err),
            Ok(CarrierEvent::Closed) => return Err("carrier closed during initialization".to_string()),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => {
                return Err("carrier event channel closed".to_string())
            }
        }
    }
}
