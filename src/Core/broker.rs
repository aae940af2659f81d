// Engine-thread state of the loopback engine: addresses, links and their credit.
// Everything in this file runs on the engine thread only.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use crossbeam_channel as channel;
use tracing::{debug, trace, warn};

use super::engine::{
    CloseMode, ReceiverHandler, ReceiverLink, ReceiverOptions, ReceiverWork, SenderHandler,
    SenderLink, SenderOptions, SenderWork, WorkQueue,
};
use super::error::{ErrorCondition, LinkError, Result, TRANSFER_LIMIT_EXCEEDED};
use crate::Link::Structs::Message;

pub(crate) type LinkId = u64;

/// Requests consumed by the engine thread, in arrival order.
pub(crate) enum Command {
    OpenSender {
        id: LinkId,
        url: String,
        address: String,
        options: SenderOptions,
        handler: Arc<dyn SenderHandler>,
    },
    OpenReceiver {
        id: LinkId,
        url: String,
        address: String,
        options: ReceiverOptions,
        handler: Arc<dyn ReceiverHandler>,
    },
    SenderWork(LinkId, SenderWork),
    ReceiverWork(LinkId, ReceiverWork),
    SetCapacity {
        address: String,
        capacity: usize,
    },
    InjectError {
        address: String,
        condition: ErrorCondition,
    },
    Depth {
        address: String,
        reply: channel::Sender<usize>,
    },
    Barrier(channel::Sender<()>),
    Shutdown,
}

/// Work queue handed to link handlers. Routes work to one link.
pub(crate) struct LinkQueue {
    id: LinkId,
    tx: channel::Sender<Command>,
}

impl WorkQueue<SenderWork> for LinkQueue {
    fn add(&self, work: SenderWork) -> Result<()> {
        self.tx
            .send(Command::SenderWork(self.id, work))
            .map_err(|_| LinkError::EngineShutdown)
    }
}

impl WorkQueue<ReceiverWork> for LinkQueue {
    fn add(&self, work: ReceiverWork) -> Result<()> {
        self.tx
            .send(Command::ReceiverWork(self.id, work))
            .map_err(|_| LinkError::EngineShutdown)
    }
}

struct Address {
    messages: VecDeque<Message>,
    capacity: usize,
    /// Round-robin position across competing receivers.
    cursor: usize,
    /// Round-robin position for the remainder when splitting sender credit.
    grant_cursor: usize,
}

impl Address {
    fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            capacity,
            cursor: 0,
            grant_cursor: 0,
        }
    }

    fn free(&self) -> u32 {
        let free = self.capacity.saturating_sub(self.messages.len());
        u32::try_from(free).unwrap_or(u32::MAX)
    }
}

struct SenderRecord {
    address: String,
    name: String,
    credit: u32,
    handler: Arc<dyn SenderHandler>,
}

struct ReceiverRecord {
    address: String,
    name: String,
    credit: u32,
    credit_window: u32,
    group_filter: Option<String>,
    durable: bool,
    handler: Arc<dyn ReceiverHandler>,
}

impl ReceiverRecord {
    fn accepts(&self, message: &Message) -> bool {
        match &self.group_filter {
            Some(group) => message.group_id() == Some(group.as_str()),
            None => true,
        }
    }
}

enum ClosedLink {
    Sender(Arc<dyn SenderHandler>),
    Receiver(Arc<dyn ReceiverHandler>),
    SenderFailed(Arc<dyn SenderHandler>, ErrorCondition),
}

pub(crate) struct Broker {
    default_capacity: usize,
    tx: channel::Sender<Command>,
    addresses: HashMap<String, Address>,
    senders: BTreeMap<LinkId, SenderRecord>,
    receivers: BTreeMap<LinkId, ReceiverRecord>,
    /// Links closed during the current command; notified once it completes.
    closed: Vec<ClosedLink>,
}

impl Broker {
    pub(crate) fn new(default_capacity: usize, tx: channel::Sender<Command>) -> Self {
        Self {
            default_capacity,
            tx,
            addresses: HashMap::new(),
            senders: BTreeMap::new(),
            receivers: BTreeMap::new(),
            closed: Vec::new(),
        }
    }

    /// The engine loop. Returns when a shutdown is requested or every
    /// handle to the engine is gone.
    pub(crate) fn run(mut self, rx: channel::Receiver<Command>) {
        debug!("loopback engine started");
        while let Ok(command) = rx.recv() {
            if !self.handle(command) {
                break;
            }
            self.pump();
        }
        self.close_all();
        debug!("loopback engine stopped");
    }

    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::OpenSender {
                id,
                url,
                address,
                options,
                handler,
            } => self.open_sender(id, &url, address, options, handler),
            Command::OpenReceiver {
                id,
                url,
                address,
                options,
                handler,
            } => self.open_receiver(id, &url, address, options, handler),
            Command::SenderWork(id, work) => match self.senders.get(&id) {
                Some(record) => {
                    let address = record.address.clone();
                    work(&mut SenderRef {
                        broker: self,
                        id,
                        address,
                    });
                }
                None => trace!(link = id, "dropping work for closed sender link"),
            },
            Command::ReceiverWork(id, work) => match self.receivers.get(&id) {
                Some(record) => {
                    let address = record.address.clone();
                    work(&mut ReceiverRef {
                        broker: self,
                        id,
                        address,
                    });
                }
                None => trace!(link = id, "dropping work for closed receiver link"),
            },
            Command::SetCapacity { address, capacity } => {
                debug!(%address, capacity, "address capacity changed");
                self.address_mut(&address).capacity = capacity;
            }
            Command::InjectError { address, condition } => self.fail_address(&address, &condition),
            Command::Depth { address, reply } => {
                let depth = self.addresses.get(&address).map_or(0, |a| a.messages.len());
                let _ = reply.send(depth);
            }
            Command::Barrier(reply) => {
                let _ = reply.send(());
            }
            Command::Shutdown => return false,
        }
        true
    }

    fn address_mut(&mut self, address: &str) -> &mut Address {
        let capacity = self.default_capacity;
        self.addresses
            .entry(address.to_owned())
            .or_insert_with(|| Address::new(capacity))
    }

    fn open_sender(
        &mut self,
        id: LinkId,
        url: &str,
        address: String,
        options: SenderOptions,
        handler: Arc<dyn SenderHandler>,
    ) {
        self.address_mut(&address);
        let name = options.name.unwrap_or_else(|| format!("sender-{id}"));
        debug!(link = id, %url, %address, %name, "sender link open");
        // Credit is granted from spare address capacity once the open settles
        self.senders.insert(
            id,
            SenderRecord {
                address: address.clone(),
                name,
                credit: 0,
                handler: handler.clone(),
            },
        );

        let queue: Arc<dyn WorkQueue<SenderWork>> = Arc::new(LinkQueue {
            id,
            tx: self.tx.clone(),
        });
        handler.on_sender_open(
            &mut SenderRef {
                broker: self,
                id,
                address,
            },
            queue,
        );
    }

    fn open_receiver(
        &mut self,
        id: LinkId,
        url: &str,
        address: String,
        options: ReceiverOptions,
        handler: Arc<dyn ReceiverHandler>,
    ) {
        self.address_mut(&address);
        let name = options.name.unwrap_or_else(|| format!("receiver-{id}"));
        debug!(
            link = id,
            %url,
            %address,
            %name,
            credit_window = options.credit_window,
            group_filter = ?options.group_filter,
            durable = options.durable,
            "receiver link open"
        );
        self.receivers.insert(
            id,
            ReceiverRecord {
                address: address.clone(),
                name,
                credit: options.credit_window,
                credit_window: options.credit_window,
                group_filter: options.group_filter,
                durable: options.durable,
                handler: handler.clone(),
            },
        );

        let queue: Arc<dyn WorkQueue<ReceiverWork>> = Arc::new(LinkQueue {
            id,
            tx: self.tx.clone(),
        });
        handler.on_receiver_open(
            &mut ReceiverRef {
                broker: self,
                id,
                address,
            },
            queue,
        );
    }

    /// Settle the effects of the last command: deliver what receivers have
    /// credit for, hand freed capacity to senders, report finished closes.
    fn pump(&mut self) {
        while let Some((id, message)) = self.next_delivery() {
            let Some(record) = self.receivers.get(&id) else {
                continue;
            };
            let handler = record.handler.clone();
            let address = record.address.clone();
            handler.on_message(
                &mut ReceiverRef {
                    broker: self,
                    id,
                    address,
                },
                message,
            );
        }
        self.refresh_sender_credit();
        self.finish_closed();
    }

    /// Pick the oldest message any receiver can take and charge that
    /// receiver one unit of credit.
    fn next_delivery(&mut self) -> Option<(LinkId, Message)> {
        for (name, address) in self.addresses.iter_mut() {
            if address.messages.is_empty() {
                continue;
            }
            let receivers = &self.receivers;
            let ready = |r: &ReceiverRecord| r.address == *name && r.credit > 0;
            if !receivers.values().any(ready) {
                continue;
            }

            for index in 0..address.messages.len() {
                let message = &address.messages[index];
                let eligible = |(_, r): &(&LinkId, &ReceiverRecord)| ready(*r) && r.accepts(message);
                let count = receivers.iter().filter(eligible).count();
                if count == 0 {
                    continue;
                }

                let pick = address.cursor % count;
                let Some((&id, _)) = receivers.iter().filter(eligible).nth(pick) else {
                    continue;
                };
                address.cursor = address.cursor.wrapping_add(1);
                let message = address.messages.remove(index)?;
                if let Some(record) = self.receivers.get_mut(&id) {
                    record.credit -= 1;
                    if record.credit_window > 0 {
                        record.credit = record.credit_window;
                    }
                }
                trace!(link = id, address = %name, "delivering message");
                return Some((id, message));
            }
        }
        None
    }

    /// Hand spare address capacity to the senders on that address, lowest
    /// credit first.
    ///
    /// Granted credit stays with its link until used, so the credit held on
    /// an address never exceeds its free capacity.
    fn refresh_sender_credit(&mut self) {
        let mut by_address: BTreeMap<String, Vec<LinkId>> = BTreeMap::new();
        for (id, record) in &self.senders {
            by_address.entry(record.address.clone()).or_default().push(*id);
        }

        let mut sendable = Vec::new();
        for (name, ids) in by_address {
            let credits: Vec<u64> = ids
                .iter()
                .map(|id| self.senders.get(id).map_or(0, |r| u64::from(r.credit)))
                .collect();
            let Some(address) = self.addresses.get_mut(&name) else {
                continue;
            };
            let spare = u64::from(address.free()).saturating_sub(credits.iter().sum());
            if spare == 0 {
                continue;
            }

            let levels = fill_levels(&credits, address.grant_cursor, spare);
            address.grant_cursor = address.grant_cursor.wrapping_add(1);
            for ((id, old), new) in ids.iter().zip(credits).zip(levels) {
                if new <= old {
                    continue;
                }
                if let Some(record) = self.senders.get_mut(id) {
                    record.credit = u32::try_from(new).unwrap_or(u32::MAX);
                    trace!(link = *id, address = %name, credit = record.credit, "sender credit granted");
                    sendable.push((*id, record.handler.clone(), name.clone()));
                }
            }
        }

        for (id, handler, address) in sendable {
            if !self.senders.contains_key(&id) {
                continue;
            }
            handler.on_sendable(&mut SenderRef {
                broker: self,
                id,
                address,
            });
        }
    }

    fn finish_closed(&mut self) {
        for closed in std::mem::take(&mut self.closed) {
            match closed {
                ClosedLink::Sender(handler) => handler.on_close(),
                ClosedLink::Receiver(handler) => handler.on_close(),
                ClosedLink::SenderFailed(handler, condition) => handler.on_error(&condition),
            }
        }
    }

    fn fail_address(&mut self, address: &str, condition: &ErrorCondition) {
        warn!(%address, %condition, "failing links on address");
        let senders: Vec<LinkId> = self
            .senders
            .iter()
            .filter(|(_, r)| r.address == address)
            .map(|(id, _)| *id)
            .collect();
        for id in senders {
            if let Some(record) = self.senders.remove(&id) {
                record.handler.on_error(condition);
            }
        }

        let receivers: Vec<LinkId> = self
            .receivers
            .iter()
            .filter(|(_, r)| r.address == address)
            .map(|(id, _)| *id)
            .collect();
        for id in receivers {
            if let Some(record) = self.receivers.remove(&id) {
                record.handler.on_error(condition);
            }
        }
    }

    fn close_all(&mut self) {
        for (_, record) in std::mem::take(&mut self.senders) {
            self.closed.push(ClosedLink::Sender(record.handler));
        }
        for (_, record) in std::mem::take(&mut self.receivers) {
            self.closed.push(ClosedLink::Receiver(record.handler));
        }
        self.finish_closed();
    }
}

/// Raise the lowest of `credits` first until `spare` is used up.
/// Ties are broken round-robin starting at position `start`.
fn fill_levels(credits: &[u64], start: usize, spare: u64) -> Vec<u64> {
    let mut levels = credits.to_vec();
    let n = credits.len();
    if n == 0 || spare == 0 {
        return levels;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&i| (credits[i], (i + n - start % n) % n));

    // The first `k` entries of `order` share `level`.
    let mut remaining = spare;
    let mut level = credits[order[0]];
    let mut k = 1;
    while k < n {
        let next = credits[order[k]];
        let cost = (next - level) * k as u64;
        if cost > remaining {
            break;
        }
        remaining -= cost;
        level = next;
        k += 1;
    }

    let (share, extra) = (remaining / k as u64, remaining % k as u64);
    for (rank, &i) in order[..k].iter().enumerate() {
        levels[i] = level + share + u64::from((rank as u64) < extra);
    }
    levels
}

/// [`SenderLink`] view of one sending link in the broker.
struct SenderRef<'a> {
    broker: &'a mut Broker,
    id: LinkId,
    address: String,
}

impl SenderLink for SenderRef<'_> {
    fn address(&self) -> &str {
        &self.address
    }

    fn credit(&self) -> u32 {
        self.broker.senders.get(&self.id).map_or(0, |r| r.credit)
    }

    fn send(&mut self, message: Message) {
        let Some(record) = self.broker.senders.get_mut(&self.id) else {
            warn!(link = self.id, "send on closed link dropped");
            return;
        };
        if record.credit == 0 {
            let condition = ErrorCondition::new(
                TRANSFER_LIMIT_EXCEEDED,
                format!("transfer on {} without credit", self.address),
            );
            warn!(link = self.id, address = %self.address, %condition, "sender link failed");
            if let Some(record) = self.broker.senders.remove(&self.id) {
                self.broker
                    .closed
                    .push(ClosedLink::SenderFailed(record.handler, condition));
            }
            return;
        }
        record.credit -= 1;
        trace!(link = self.id, address = %self.address, message_id = message.meta.message_id, "message sent");
        self.broker.address_mut(&self.address).messages.push_back(message);
    }

    fn close(&mut self, mode: CloseMode) {
        if let Some(record) = self.broker.senders.remove(&self.id) {
            debug!(link = self.id, name = %record.name, ?mode, "sender link closed");
            self.broker.closed.push(ClosedLink::Sender(record.handler));
        }
    }
}

/// [`ReceiverLink`] view of one receiving link in the broker.
struct ReceiverRef<'a> {
    broker: &'a mut Broker,
    id: LinkId,
    address: String,
}

impl ReceiverLink for ReceiverRef<'_> {
    fn address(&self) -> &str {
        &self.address
    }

    fn credit(&self) -> u32 {
        self.broker.receivers.get(&self.id).map_or(0, |r| r.credit)
    }

    fn add_credit(&mut self, credit: u32) {
        if let Some(record) = self.broker.receivers.get_mut(&self.id) {
            record.credit = record.credit.saturating_add(credit);
            trace!(link = self.id, credit = record.credit, "receiver credit added");
        }
    }

    fn close(&mut self, mode: CloseMode) {
        if let Some(record) = self.broker.receivers.remove(&self.id) {
            debug!(
                link = self.id,
                name = %record.name,
                ?mode,
                durable = record.durable,
                "receiver link closed"
            );
            self.broker.closed.push(ClosedLink::Receiver(record.handler));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fill_levels;

    #[test]
    fn fill_levels_raises_lowest_first() {
        assert_eq!(fill_levels(&[2, 0], 0, 1), [2, 1]);
        assert_eq!(fill_levels(&[2, 0], 0, 3), [2, 3]);
        assert_eq!(fill_levels(&[0, 0, 5], 0, 4), [2, 2, 5]);
        assert_eq!(fill_levels(&[7], 0, 3), [10]);
    }

    #[test]
    fn fill_levels_rotates_ties() {
        assert_eq!(fill_levels(&[0, 0], 0, 1), [1, 0]);
        assert_eq!(fill_levels(&[0, 0], 1, 1), [0, 1]);
        assert_eq!(fill_levels(&[0, 0, 0], 2, 2), [1, 0, 1]);
    }
}
