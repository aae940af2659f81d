use super::{Receiver, Sender, DEFAULT_BUFFER_CAPACITY};
use crate::Core::engine::{Engine, ReceiverOptions, SenderOptions};
use crate::Core::error::{LinkError, Result};

/// Options for opening a [`Sender`] or [`Receiver`] on an engine.
///
/// ```no_run
/// use credit_link::{Core::LoopbackEngine, Link::LinkBuilder};
///
/// let engine = LoopbackEngine::new()?;
/// let receiver = LinkBuilder::new("amqp://localhost", "orders")
///     .with_buffer_capacity(16)
///     .with_group_filter("B")
///     .open_receiver(&engine)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone, Debug)]
pub struct LinkBuilder {
    url: String,
    address: String,
    name: Option<String>,
    buffer_capacity: usize,
    group_filter: Option<String>,
    durable: bool,
}

impl LinkBuilder {
    pub fn new(url: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            address: address.into(),
            name: None,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            group_filter: None,
            durable: false,
        }
    }

    /// Stable link name, e.g. to reattach to a durable subscription.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Receive buffer capacity, which is also the receiver's credit limit.
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Only receive messages belonging to group `group_id`.
    pub fn with_group_filter(mut self, group_id: impl Into<String>) -> Self {
        self.group_filter = Some(group_id.into());
        self
    }

    /// Ask the engine to keep the subscription named by
    /// [`with_name`](Self::with_name) across [`Receiver::detach`].
    /// Ignored for senders.
    pub fn with_durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn open_sender(self, engine: &dyn Engine) -> Result<Sender> {
        let shared = Sender::new_shared(&self.address);
        let options = SenderOptions { name: self.name };
        engine.open_sender(&self.url, &self.address, options, shared.clone())?;
        Ok(Sender::from_shared(shared))
    }

    pub fn open_receiver(self, engine: &dyn Engine) -> Result<Receiver> {
        if self.buffer_capacity == 0 || u32::try_from(self.buffer_capacity).is_err() {
            return Err(LinkError::InvalidArgument(format!(
                "buffer capacity must be between 1 and {}, got {}",
                u32::MAX,
                self.buffer_capacity
            )));
        }

        let shared = Receiver::new_shared(&self.address, self.buffer_capacity);
        // credit_window 0 disables automatic flow control;
        // credit follows buffer space instead.
        let options = ReceiverOptions {
            name: self.name,
            credit_window: 0,
            group_filter: self.group_filter,
            durable: self.durable,
        };
        engine.open_receiver(&self.url, &self.address, options, shared.clone())?;
        Ok(Receiver::from_shared(shared))
    }
}
