//! Reconnecting event stream subscriber.
//!
//! # Tasks
//!
//! ```text
//!              connect()                      on()/off()
//!                 │                               │
//!                 v                               v
//!   ┌─────────── worker task ───────────┐   ListenerRegistry
//!   │ ensure_session                     │        ^
//!   │ GET /events/stream (signed)        │        │ dispatch (serial)
//!   │ bytes → FrameDecoder → StreamEvent ├──mpsc──> dispatcher thread
//!   │ EOF / error → sleep → retry        │
//!   └────────────────────────────────────┘
//! ```
//!
//! The worker owns the connection. Parsed events are queued to the
//! subscriber's dispatcher thread, named `palwire-stream-dispatch`. It lives
//! as long as the subscriber and is shared by every worker that
//! [`connect`](StreamSubscriber::connect) starts, so handlers never run
//! concurrently with each other, even across reconnects. Handlers may block
//! without stalling the async runtime, but a slow handler delays the events
//! queued behind it.
//!
//! # Cancellation
//!
//! [`StreamSubscriber::disconnect`] flips a `watch` signal that the worker
//! races against every await, both the open read and the reconnect delay.
//! Winning the race drops the in-flight response, which closes the
//! connection.

mod frame;
mod listeners;

pub use frame::{Action, FrameDecoder, StreamEvent};
pub use listeners::{Handler, ListenerId, ListenerRegistry, WILDCARD};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::crypto::SecureCodec;
use crate::error::{PalError, Result};
use crate::session::Session;
use crate::transport::{is_session_expired, SecureTransport};

/// Event stream endpoint
pub const STREAM_PATH: &str = "/events/stream";

/// Request path for the given domain filter, query included.
pub fn stream_path(domains: Option<&[String]>) -> String {
    match domains {
        Some(domains) if !domains.is_empty() => {
            let query: Vec<String> = domains.iter().map(|d| format!("domain={d}")).collect();
            format!("{STREAM_PATH}?{}", query.join("&"))
        },
        _ => STREAM_PATH.to_string(),
    }
}

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Long-lived event feed delivering [`StreamEvent`]s to listeners.
pub struct StreamSubscriber {
    reconnect_delay: Duration,
    session: Arc<Session>,
    transport: Arc<SecureTransport>,
    listeners: Arc<ListenerRegistry>,
    events: mpsc::UnboundedSender<StreamEvent>,
    worker: Mutex<Option<Worker>>,
    connected: AtomicBool,
    attempts: Arc<AtomicU64>,
}

impl StreamSubscriber {
    /// Create a subscriber and start its dispatcher thread.
    ///
    /// Nothing is opened until [`connect`](Self::connect). Fails only if the
    /// thread cannot be spawned. The thread exits once the subscriber and
    /// its workers are gone.
    pub fn new(config: &Config, session: Arc<Session>, transport: Arc<SecureTransport>) -> Result<Self> {
        let listeners = Arc::new(ListenerRegistry::new());
        let (events, queue) = mpsc::unbounded_channel();

        let registry = Arc::clone(&listeners);
        thread::Builder::new()
            .name("palwire-stream-dispatch".to_string())
            .spawn(move || dispatch_loop(&registry, queue))?;

        Ok(Self {
            reconnect_delay: config.stream.reconnect_delay(),
            session,
            transport,
            listeners,
            events,
            worker: Mutex::new(None),
            connected: AtomicBool::new(false),
            attempts: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Start streaming, replacing any running worker.
    ///
    /// `None` or an empty list subscribes to every domain.
    pub async fn connect(&self, domains: Option<Vec<String>>) {
        let mut slot = self.worker.lock().await;
        if let Some(previous) = slot.take() {
            tracing::debug!("Replacing running stream worker");
            stop(previous).await;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let loop_state = StreamLoop {
            path: stream_path(domains.as_deref()),
            reconnect_delay: self.reconnect_delay,
            session: Arc::clone(&self.session),
            transport: Arc::clone(&self.transport),
            events: self.events.clone(),
            attempts: Arc::clone(&self.attempts),
        };
        tracing::info!("Event stream starting on {}", loop_state.path);
        let handle = tokio::spawn(loop_state.run(shutdown_rx));

        self.connected.store(true, Ordering::SeqCst);
        *slot = Some(Worker {
            shutdown: shutdown_tx,
            handle,
        });
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// Safe to call when not connected. Events already queued are still
    /// delivered.
    pub async fn disconnect(&self) {
        let mut slot = self.worker.lock().await;
        self.connected.store(false, Ordering::SeqCst);
        if let Some(worker) = slot.take() {
            stop(worker).await;
            tracing::info!("Event stream disconnected");
        }
    }

    /// Whether a worker is running (it may be between reconnects).
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of stream requests attempted so far.
    pub fn connection_attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Register a handler for `domain` or [`WILDCARD`].
    pub fn on<F>(&self, domain: impl Into<String>, handler: F) -> ListenerId
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.listeners.on(domain, handler)
    }

    /// Remove all handlers for `domain`.
    pub fn off(&self, domain: &str) {
        self.listeners.off(domain);
    }

    /// Remove one handler.
    pub fn remove(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Remove every handler.
    pub fn off_all(&self) {
        self.listeners.off_all();
    }

    /// Listener table shared with the dispatcher.
    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }
}

impl std::fmt::Debug for StreamSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSubscriber")
            .field("connected", &self.is_connected())
            .field("attempts", &self.connection_attempts())
            .field("listeners", &self.listeners)
            .finish()
    }
}

async fn stop(worker: Worker) {
    let _ = worker.shutdown.send(true);
    if let Err(e) = worker.handle.await {
        if e.is_panic() {
            tracing::error!("Stream worker panicked: {}", e);
        }
    }
}

fn dispatch_loop(listeners: &ListenerRegistry, mut events: mpsc::UnboundedReceiver<StreamEvent>) {
    while let Some(event) = events.blocking_recv() {
        tracing::trace!("Dispatching {} {} {}", event.domain, event.action, event.resource_id);
        listeners.dispatch(&event);
    }
    tracing::debug!("Stream dispatcher exited");
}

struct StreamLoop {
    path: String,
    reconnect_delay: Duration,
    session: Arc<Session>,
    transport: Arc<SecureTransport>,
    events: mpsc::UnboundedSender<StreamEvent>,
    attempts: Arc<AtomicU64>,
}

impl StreamLoop {
    // A dropped sender also ends the loop: `changed()` then returns Err
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let outcome = tokio::select! {
                _ = shutdown.changed() => break,
                outcome = self.stream_once() => outcome,
            };

            match outcome {
                Ok(()) => tracing::info!("Event stream ended"),
                Err(e) if e.is_transient() => tracing::warn!("Event stream failed: {}", e),
                Err(e) => tracing::error!("Event stream failed: {}", e),
            }

            if *shutdown.borrow() || self.events.is_closed() {
                break;
            }

            tracing::info!("Reconnecting event stream in {:?}", self.reconnect_delay);
            tokio::select! {
                _ = shutdown.changed() => break,
                () = tokio::time::sleep(self.reconnect_delay) => {},
            }
        }
        tracing::debug!("Stream worker exited");
    }

    async fn stream_once(&self) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let keys = self.transport.ensure_session().await?;
        let response = self.transport.open_stream(&self.path, &keys).await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            let expired = SecureCodec::new(&keys.shared_key)
                .decrypt_to_string(&body)
                .is_ok_and(|plaintext| is_session_expired(&plaintext));
            if expired {
                self.session.drop_keys(keys.generation);
                return Err(PalError::SessionExpired);
            }
            return Err(PalError::Request {
                status: status.as_u16(),
                body,
            });
        }
        tracing::info!("Event stream connected");

        let mut decoder = FrameDecoder::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| PalError::Stream(e.to_string()))?;
            for payload in decoder.push_chunk(&chunk) {
                match StreamEvent::parse(&payload) {
                    Ok(event) => {
                        if self.events.send(event).is_err() {
                            return Ok(());
                        }
                    },
                    Err(e) => tracing::warn!("Dropping stream frame: {} (data={})", e, payload),
                }
            }
        }
        Ok(())
    }
}
