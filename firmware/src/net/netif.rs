/// The network interface and its command mailbox.
///
/// `Netif` is owned by `NetStack` and only ever mutated from the stack
/// task. Anything else that wants the interface to change (today, the link
/// monitor) posts a `NetifCommand` through a `NetifSender`. The stack
/// drains the mailbox at the top of every poll and applies the commands in
/// order.
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::future::Future;
use core::pin::Pin;
use core::sync::atomic::{AtomicBool, Ordering};
use core::task::{Context, Poll};

use smoltcp::wire::{Ipv4Address, Ipv4Cidr};
use spin::Mutex;

use crate::board::{Duplex, Speed};
use crate::config::{AddrMode, NETIF_MAILBOX_DEPTH};
use crate::sched::yield_now;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Down,
    Up { speed: Speed, duplex: Duplex },
}

impl LinkState {
    pub fn is_up(&self) -> bool {
        matches!(self, LinkState::Up { .. })
    }
}

/// Interface-level change requested from outside the stack task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetifCommand {
    LinkUp { speed: Speed, duplex: Duplex },
    LinkDown,
}

impl From<LinkState> for NetifCommand {
    fn from(state: LinkState) -> Self {
        match state {
            LinkState::Up { speed, duplex } => NetifCommand::LinkUp { speed, duplex },
            LinkState::Down => NetifCommand::LinkDown,
        }
    }
}

/// Interface configuration and link metadata.
pub struct Netif {
    mode: AddrMode,
    cidr: Option<Ipv4Cidr>,
    gateway: Option<Ipv4Address>,
    link: LinkState,
    link_transitions: u32,
}

impl Netif {
    pub(crate) fn new(mode: AddrMode) -> Self {
        Self {
            mode,
            cidr: None,
            gateway: None,
            link: LinkState::Down,
            link_transitions: 0,
        }
    }

    pub fn mode(&self) -> AddrMode {
        self.mode
    }

    pub fn link(&self) -> LinkState {
        self.link
    }

    pub fn cidr(&self) -> Option<Ipv4Cidr> {
        self.cidr
    }

    pub fn gateway(&self) -> Option<Ipv4Address> {
        self.gateway
    }

    /// Times the link actually flipped between up and down (or changed
    /// speed/duplex while up).
    pub fn link_transitions(&self) -> u32 {
        self.link_transitions
    }

    /// Negotiated speed in bit/s, zero while down.
    pub fn link_speed(&self) -> u32 {
        match self.link {
            LinkState::Up { speed, .. } => speed.bits_per_sec(),
            LinkState::Down => 0,
        }
    }

    /// Compare-and-set. Returns false when `state` is already current.
    pub(crate) fn set_link(&mut self, state: LinkState) -> bool {
        if self.link == state {
            return false;
        }
        self.link = state;
        self.link_transitions += 1;
        true
    }

    pub(crate) fn set_addr(&mut self, cidr: Option<Ipv4Cidr>, gateway: Option<Ipv4Address>) {
        self.cidr = cidr;
        self.gateway = gateway;
    }
}

struct Envelope {
    command: NetifCommand,
    applied: Option<Arc<AtomicBool>>,
}

/// Bounded single-consumer command queue. Create with `mailbox()`.
struct Mailbox {
    queue: Mutex<VecDeque<Envelope>>,
}

/// Create a mailbox; the receiver goes to `NetStack`, senders to whoever
/// needs to change interface state.
pub fn mailbox() -> (NetifSender, NetifReceiver) {
    let shared = Arc::new(Mailbox {
        queue: Mutex::new(VecDeque::with_capacity(NETIF_MAILBOX_DEPTH)),
    });
    (
        NetifSender { shared: shared.clone() },
        NetifReceiver { shared },
    )
}

/// Posting side. Cheap to clone.
#[derive(Clone)]
pub struct NetifSender {
    shared: Arc<Mailbox>,
}

impl NetifSender {
    /// Post without waiting. Hands the command back if the mailbox is full.
    pub fn try_send(&self, command: NetifCommand) -> Result<(), NetifCommand> {
        self.push(Envelope { command, applied: None })
            .map_err(|e| e.command)
    }

    /// Post, waiting only for mailbox room, not for the command to be applied.
    pub async fn send(&self, command: NetifCommand) {
        let mut envelope = Envelope { command, applied: None };
        loop {
            match self.push(envelope) {
                Ok(()) => return,
                Err(e) => envelope = e,
            }
            yield_now().await;
        }
    }

    /// Post and get a future that resolves once the stack has applied it.
    pub async fn send_tracked(&self, command: NetifCommand) -> Applied {
        let flag = Arc::new(AtomicBool::new(false));
        let mut envelope = Envelope {
            command,
            applied: Some(flag.clone()),
        };
        loop {
            match self.push(envelope) {
                Ok(()) => return Applied { flag },
                Err(e) => envelope = e,
            }
            yield_now().await;
        }
    }

    fn push(&self, envelope: Envelope) -> Result<(), Envelope> {
        let mut queue = self.shared.queue.lock();
        if queue.len() >= NETIF_MAILBOX_DEPTH {
            return Err(envelope);
        }
        queue.push_back(envelope);
        Ok(())
    }
}

/// Draining side, owned by the stack. Not `Clone`: there is exactly one.
pub struct NetifReceiver {
    shared: Arc<Mailbox>,
}

impl NetifReceiver {
    /// Apply every queued command in posting order through `apply`.
    pub(crate) fn drain(&mut self, mut apply: impl FnMut(NetifCommand)) -> usize {
        let mut count = 0;
        loop {
            // Pop under the lock, apply outside it, so posters never wait
            // on the stack's own work.
            let envelope = self.shared.queue.lock().pop_front();
            let Some(envelope) = envelope else { break };
            apply(envelope.command);
            if let Some(flag) = envelope.applied {
                flag.store(true, Ordering::Release);
            }
            count += 1;
        }
        count
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }
}

/// Resolves once the stack has applied a tracked command.
pub struct Applied {
    flag: Arc<AtomicBool>,
}

impl Applied {
    pub fn is_done(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

impl Future for Applied {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.is_done() {
            Poll::Ready(())
        } else {
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}
