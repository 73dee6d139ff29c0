use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use parley_types::api::Credential;
use parley_types::events::{EventKind, OutboundFrame, PushEvent};

use crate::backoff::Backoff;
use crate::dispatcher::HandlerRegistry;
use crate::error::GatewayError;
use crate::transport::{Link, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Lifecycle notifications broadcast to every observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusSignal {
    Connected,
    Disconnected,
    ConnectError,
    /// Emitted after `Connected` when a dropped link was re-established.
    /// Anything pushed while offline was missed and must be re-fetched.
    Resynced,
}

const SIGNAL_CAPACITY: usize = 64;

/// The one realtime connection shared by every open conversation.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    transport: Arc<dyn Transport>,
    backoff: Backoff,
    handlers: HandlerRegistry,
    state_tx: watch::Sender<ConnectionState>,
    signal_tx: broadcast::Sender<BusSignal>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    /// Serializes `connect` calls.
    connect_lock: tokio::sync::Mutex<()>,
    /// Bumped by `disconnect` so an in-flight `connect` does not resurrect the link.
    epoch: AtomicU64,
    /// A link dropped and automatic reconnection gave up. Whatever was pushed
    /// since is lost, so the next `connect` announces a resync.
    interrupted: AtomicBool,
}

impl EventBus {
    pub fn new(transport: Arc<dyn Transport>, backoff: Backoff) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (signal_tx, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                transport,
                backoff,
                handlers: HandlerRegistry::new(),
                state_tx,
                signal_tx,
                outbound: Mutex::new(None),
                supervisor: Mutex::new(None),
                connect_lock: tokio::sync::Mutex::new(()),
                epoch: AtomicU64::new(0),
                interrupted: AtomicBool::new(false),
            }),
        }
    }

    /// Establishes the connection, retrying with backoff. Returns immediately
    /// when already connected; waits for the outcome when a reconnect is
    /// already under way.
    pub async fn connect(&self, credential: Credential) -> Result<(), GatewayError> {
        let _guard = self.inner.connect_lock.lock().await;

        match self.state() {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Reconnecting => return self.wait_settled().await,
            ConnectionState::Disconnected | ConnectionState::Connecting => {}
        }

        self.set_state(ConnectionState::Connecting);
        let epoch = self.inner.epoch.load(Ordering::Acquire);

        let link = match self.open_link(&credential).await {
            Ok(link) => link,
            Err(e) => {
                warn!("Gateway connect failed: {}", e);
                self.set_state(ConnectionState::Disconnected);
                self.signal(BusSignal::ConnectError);
                return Err(e);
            }
        };

        if self.inner.epoch.load(Ordering::Acquire) != epoch {
            debug!("Gateway disconnected while connecting, dropping new link");
            self.set_state(ConnectionState::Disconnected);
            return Err(GatewayError::Shutdown);
        }

        self.attach(&link);
        self.set_state(ConnectionState::Connected);
        self.signal(BusSignal::Connected);
        if self.inner.interrupted.swap(false, Ordering::AcqRel) {
            info!("Gateway restored after an outage, requesting resync");
            self.signal(BusSignal::Resynced);
        }

        let bus = self.clone();
        let handle = tokio::spawn(async move { bus.supervise(credential, link).await });
        if let Some(previous) = self.inner.supervisor.lock().expect("supervisor lock poisoned").replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Tears down the connection and clears every subscription.
    pub fn disconnect(&self) {
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        if let Some(handle) = self.inner.supervisor.lock().expect("supervisor lock poisoned").take() {
            handle.abort();
        }
        self.detach();
        self.inner.handlers.clear();
        self.inner.interrupted.store(false, Ordering::Release);

        if self.set_state(ConnectionState::Disconnected) != ConnectionState::Disconnected {
            self.signal(BusSignal::Disconnected);
        }
        info!("Gateway disconnected");
    }

    /// Registers `handler` for one event kind. Handlers for the same kind run
    /// in registration order. Dropping the returned guard unsubscribes.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&PushEvent) + Send + Sync + 'static,
    {
        let id = self.inner.handlers.register(kind, Arc::new(handler));
        trace!("Subscribed handler {} to {}", id, kind);
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Fire-and-forget frame to the server. Logged and dropped when offline;
    /// use REST when delivery matters.
    pub fn send(&self, kind: &str, payload: serde_json::Value) {
        let text = match serde_json::to_string(&OutboundFrame {
            kind,
            data: &payload,
        }) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode {} frame: {}", kind, e);
                return;
            }
        };

        let outbound = self.inner.outbound.lock().expect("outbound lock poisoned");
        match outbound.as_ref() {
            Some(tx) if self.is_connected() => {
                if tx.send(text).is_err() {
                    warn!("Dropping {} frame: gateway link closed", kind);
                }
            }
            _ => warn!("Dropping {} frame: gateway not connected", kind),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Observe connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Observe lifecycle signals, including `Resynced`.
    pub fn signals(&self) -> broadcast::Receiver<BusSignal> {
        self.inner.signal_tx.subscribe()
    }

    pub fn handler_count(&self) -> usize {
        self.inner.handlers.len()
    }

    async fn open_link(&self, credential: &Credential) -> Result<Link, GatewayError> {
        let transport: &dyn Transport = &*self.inner.transport;
        self.inner
            .backoff
            .retry("Gateway connect", move || transport.open(credential))
            .await
    }

    /// Runs for the lifetime of a connection: dispatches inbound frames and,
    /// when the link drops, reconnects and announces the resync.
    async fn supervise(self, credential: Credential, mut link: Link) {
        loop {
            self.pump(&mut link.inbound).await;
            self.detach();

            warn!("Gateway link lost, reconnecting");
            self.set_state(ConnectionState::Reconnecting);
            self.signal(BusSignal::Disconnected);

            match self.open_link(&credential).await {
                Ok(next) => {
                    link = next;
                    self.attach(&link);
                    self.set_state(ConnectionState::Connected);
                    self.signal(BusSignal::Connected);
                    info!("Gateway reconnected, requesting resync");
                    self.signal(BusSignal::Resynced);
                }
                Err(e) => {
                    warn!("Gateway reconnection gave up: {}", e);
                    self.inner.interrupted.store(true, Ordering::Release);
                    self.set_state(ConnectionState::Disconnected);
                    self.signal(BusSignal::ConnectError);
                    return;
                }
            }
        }
    }

    async fn pump(&self, inbound: &mut mpsc::UnboundedReceiver<String>) {
        while let Some(frame) = inbound.recv().await {
            match PushEvent::from_frame(&frame) {
                Ok(event) => {
                    let delivered = self.inner.handlers.dispatch(&event);
                    trace!("Dispatched {} to {} handlers", event.kind(), delivered);
                }
                Err(e) => {
                    let preview: String = frame.chars().take(200).collect();
                    debug!("Ignoring gateway frame: {} -- raw: {}", e, preview);
                }
            }
        }
    }

    async fn wait_settled(&self) -> Result<(), GatewayError> {
        let mut changes = self.state_changes();
        let connected = {
            let settled = changes
                .wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Disconnected))
                .await
                .map_err(|_| GatewayError::Shutdown)?;
            *settled == ConnectionState::Connected
        };

        if connected {
            Ok(())
        } else {
            Err(GatewayError::Exhausted {
                attempts: self.inner.backoff.max_attempts,
                last: Box::new(GatewayError::Unavailable("reconnection gave up".into())),
            })
        }
    }

    fn attach(&self, link: &Link) {
        *self.inner.outbound.lock().expect("outbound lock poisoned") = Some(link.outbound.clone());
    }

    fn detach(&self) {
        self.inner.outbound.lock().expect("outbound lock poisoned").take();
    }

    /// Returns the previous state.
    fn set_state(&self, state: ConnectionState) -> ConnectionState {
        let previous = self.inner.state_tx.send_replace(state);
        if previous != state {
            debug!("Gateway state {:?} -> {:?}", previous, state);
        }
        previous
    }

    fn signal(&self, signal: BusSignal) {
        // No receivers is fine.
        let _ = self.inner.signal_tx.send(signal);
    }
}

/// Keeps a handler registered. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.handlers.unregister(self.id);
        }
    }
}
