/// smoltcp PHY device adapter for the Ethernet MAC.
///
/// Receive path: the MAC interrupt handler moves each frame into a bounded
/// lock-free SPSC queue (`RxProducer`); the stack task drains it through
/// `EmacDevice`. Once enqueued, a frame belongs to the stack; the driver
/// keeps no reference to it.
///
/// Transmit path: smoltcp builds the frame in a scratch buffer and the
/// `TxToken` hands it to the `MacDriver`.
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use heapless::spsc::{Consumer, Producer, Queue};
use smoltcp::phy::{self, Device, DeviceCapabilities, Medium};
use smoltcp::time::Instant;

use crate::board::MacDriver;
use crate::config::{ETHERNET_MTU, RX_QUEUE_SLOTS};

/// One received Ethernet frame.
#[derive(Debug, PartialEq, Eq)]
pub struct InboundPacket(Vec<u8>);

impl InboundPacket {
    pub fn new(frame: Vec<u8>) -> Self {
        Self(frame)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

type RxQueue = Queue<InboundPacket, RX_QUEUE_SLOTS>;

/// Interrupt-side half of the receive queue.
pub struct RxProducer {
    inner: Producer<'static, InboundPacket, RX_QUEUE_SLOTS>,
    dropped: Arc<AtomicU32>,
}

/// Stack-side half of the receive queue.
pub struct RxConsumer {
    inner: Consumer<'static, InboundPacket, RX_QUEUE_SLOTS>,
    dropped: Arc<AtomicU32>,
}

/// Allocate the receive queue and split it. Called once per MAC during
/// hardware setup; the queue lives for the rest of the program.
pub fn rx_queue() -> (RxProducer, RxConsumer) {
    let queue: &'static mut RxQueue = Box::leak(Box::new(Queue::new()));
    let (producer, consumer) = queue.split();
    let dropped = Arc::new(AtomicU32::new(0));
    (
        RxProducer {
            inner: producer,
            dropped: dropped.clone(),
        },
        RxConsumer {
            inner: consumer,
            dropped,
        },
    )
}

impl RxProducer {
    /// Hand a frame to the stack. When the queue is full the frame is
    /// dropped and counted; the caller gets nothing back to reuse.
    pub fn push(&mut self, frame: Vec<u8>) -> bool {
        match self.inner.enqueue(InboundPacket::new(frame)) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

impl RxConsumer {
    pub fn pop(&mut self) -> Option<InboundPacket> {
        self.inner.dequeue()
    }

    pub fn pending(&self) -> usize {
        self.inner.len()
    }

    /// Frames lost to a full queue since boot.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Adapter that implements smoltcp's Device trait on top of the MAC.
pub struct EmacDevice {
    mac: Box<dyn MacDriver + Send>,
    rx: RxConsumer,
    /// Mirrors the interface link state; no traffic while down.
    link_up: bool,
    tx_errors: u32,
}

impl EmacDevice {
    pub fn new(mac: Box<dyn MacDriver + Send>, rx: RxConsumer) -> Self {
        Self {
            mac,
            rx,
            link_up: false,
            tx_errors: 0,
        }
    }

    pub fn mac(&self) -> [u8; 6] {
        self.mac.mac_address()
    }

    pub fn enable_rx_interrupt(&mut self) {
        self.mac.enable_rx_interrupt();
    }

    pub(crate) fn set_link(&mut self, up: bool) {
        self.link_up = up;
    }

    /// Discard whatever the MAC received while the link was down.
    pub(crate) fn flush_rx(&mut self) -> usize {
        let mut flushed = 0;
        while self.rx.pop().is_some() {
            flushed += 1;
        }
        flushed
    }

    pub fn rx_pending(&self) -> usize {
        self.rx.pending()
    }

    pub fn rx_dropped(&self) -> u32 {
        self.rx.dropped()
    }

    pub fn tx_errors(&self) -> u32 {
        self.tx_errors
    }
}

impl Device for EmacDevice {
    type RxToken<'a> = RxToken;
    type TxToken<'a> = TxToken<'a>;

    fn receive(&mut self, _timestamp: Instant) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        if !self.link_up {
            return None;
        }
        let packet = self.rx.pop()?;
        Some((
            RxToken { frame: packet.into_bytes() },
            TxToken {
                mac: &mut *self.mac,
                tx_errors: &mut self.tx_errors,
            },
        ))
    }

    fn transmit(&mut self, _timestamp: Instant) -> Option<Self::TxToken<'_>> {
        if !self.link_up {
            return None;
        }
        Some(TxToken {
            mac: &mut *self.mac,
            tx_errors: &mut self.tx_errors,
        })
    }

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.medium = Medium::Ethernet;
        caps.max_transmission_unit = ETHERNET_MTU;
        caps.max_burst_size = Some(1);
        caps
    }
}

/// Holds one received Ethernet frame.
pub struct RxToken {
    frame: Vec<u8>,
}

impl phy::RxToken for RxToken {
    fn consume<R, F>(mut self, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        f(&mut self.frame)
    }
}

/// Scratch buffer for one outgoing frame.
pub struct TxToken<'a> {
    mac: &'a mut (dyn MacDriver + Send),
    tx_errors: &'a mut u32,
}

impl phy::TxToken for TxToken<'_> {
    fn consume<R, F>(self, len: usize, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let mut buf = alloc::vec![0u8; len];
        let result = f(&mut buf);

        if self.mac.transmit(&buf).is_err() {
            *self.tx_errors += 1;
        }

        result
    }
}
