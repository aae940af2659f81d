use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel as channel;
use parking_lot::Mutex;
use tracing::warn;

use super::broker::{Broker, Command};
use super::engine::{Engine, ReceiverHandler, ReceiverOptions, SenderHandler, SenderOptions};
use super::error::{ErrorCondition, LinkError, Result};

/// Configuration for a [`LoopbackEngine`].
#[derive(Clone, Debug)]
pub struct LoopbackConfig {
    pub(crate) address_capacity: usize,
    pub(crate) thread_name: String,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            address_capacity: 1000,
            thread_name: "credit-link-engine".to_owned(),
        }
    }
}

impl LoopbackConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of undelivered messages an address holds.
    /// Senders on an address are granted its free capacity as credit.
    pub fn with_address_capacity(mut self, capacity: usize) -> Self {
        self.address_capacity = capacity;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

/// An in-process [`Engine`].
///
/// A single engine thread owns every address and link. Link callbacks and
/// scheduled work run on that thread only, in the order they were requested.
/// Addresses behave as queues: each message goes to one receiver with credit
/// whose group filter matches, round-robin across receivers. Every URL is
/// served from the same in-memory namespace.
///
/// Cloning yields another handle to the same engine. The engine thread stops
/// on [`shutdown`](Self::shutdown) or when the last handle is dropped; links
/// still open at that point are closed.
#[derive(Clone)]
pub struct LoopbackEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    tx: channel::Sender<Command>,
    next_link: AtomicU64,
    thread: Mutex<Option<JoinHandle<()>>>,
    config: LoopbackConfig,
}

impl LoopbackEngine {
    pub fn new() -> io::Result<Self> {
        Self::with_config(LoopbackConfig::default())
    }

    pub fn with_config(config: LoopbackConfig) -> io::Result<Self> {
        let (tx, rx) = channel::unbounded();
        let broker = Broker::new(config.address_capacity, tx.clone());
        let thread = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || broker.run(rx))?;

        Ok(Self {
            inner: Arc::new(EngineInner {
                tx,
                next_link: AtomicU64::new(1),
                thread: Mutex::new(Some(thread)),
                config,
            }),
        })
    }

    pub fn config(&self) -> &LoopbackConfig {
        &self.inner.config
    }

    fn submit(&self, command: Command) -> Result<()> {
        self.inner
            .tx
            .send(command)
            .map_err(|_| LinkError::EngineShutdown)
    }

    /// Change how many undelivered messages `address` may hold.
    /// Raising it grants the freed capacity to the address's senders.
    pub fn set_address_capacity(&self, address: &str, capacity: usize) -> Result<()> {
        self.submit(Command::SetCapacity {
            address: address.to_owned(),
            capacity,
        })
    }

    /// Fail every link on `address` with `condition`, as a transport
    /// failure would.
    pub fn inject_error(&self, address: &str, condition: ErrorCondition) -> Result<()> {
        self.submit(Command::InjectError {
            address: address.to_owned(),
            condition,
        })
    }

    /// Number of messages waiting at `address` for a receiver with credit.
    pub fn depth(&self, address: &str) -> Result<usize> {
        let (reply, rx) = channel::bounded(1);
        self.submit(Command::Depth {
            address: address.to_owned(),
            reply,
        })?;
        rx.recv().map_err(|_| LinkError::EngineShutdown)
    }

    /// Block until the engine has processed everything submitted before
    /// this call, including the callbacks it triggered.
    pub fn sync(&self) -> Result<()> {
        let (reply, rx) = channel::bounded(1);
        self.submit(Command::Barrier(reply))?;
        rx.recv().map_err(|_| LinkError::EngineShutdown)
    }

    /// Stop the engine thread, closing all links, and wait for it to exit.
    /// Idempotent.
    pub fn shutdown(&self) {
        let _ = self.inner.tx.send(Command::Shutdown);
        self.inner.join();
    }

    fn next_link(&self) -> u64 {
        self.inner.next_link.fetch_add(1, Ordering::Relaxed)
    }
}

impl EngineInner {
    fn join(&self) {
        let Some(handle) = self.thread.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!("loopback engine thread panicked");
        }
    }
}

impl fmt::Debug for LoopbackEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_loopback_engine(self, f)
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        self.join();
    }
}

fn check_url(url: &str) -> Result<()> {
    url::Url::parse(url)
        .map(|_| ())
        .map_err(|e| LinkError::InvalidArgument(format!("bad connection url {url:?}: {e}")))
}

impl Engine for LoopbackEngine {
    fn open_sender(
        &self,
        url: &str,
        address: &str,
        options: SenderOptions,
        handler: Arc<dyn SenderHandler>,
    ) -> Result<()> {
        check_url(url)?;
        self.submit(Command::OpenSender {
            id: self.next_link(),
            url: url.to_owned(),
            address: address.to_owned(),
            options,
            handler,
        })
    }

    fn open_receiver(
        &self,
        url: &str,
        address: &str,
        options: ReceiverOptions,
        handler: Arc<dyn ReceiverHandler>,
    ) -> Result<()> {
        check_url(url)?;
        self.submit(Command::OpenReceiver {
            id: self.next_link(),
            url: url.to_owned(),
            address: address.to_owned(),
            options,
            handler,
        })
    }
}
