/// Board boundary: what the firmware consumes from the board support package.
///
/// The PHY, the Ethernet MAC, the status LEDs and the entropy source are
/// driven by board code. The firmware only calls through these traits, so
/// the same core runs against the scripted mocks in `mock` during tests.
use alloc::boxed::Box;
use core::fmt;

use bitflags::bitflags;
use rand_core::RngCore;

use crate::net::device::RxConsumer;
use crate::sched::SysTick;

pub mod mock;

bitflags! {
    /// PHY status flags, as reported by one `poll_link_status` call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PhyStatus: u32 {
        /// Link state differs from the previous poll.
        const CHANGED     = 1 << 0;
        /// Cable detected and autonegotiation done.
        const CONNECTED   = 1 << 1;
        /// 100 Mbit/s (10 Mbit/s when clear).
        const SPEED_100   = 1 << 2;
        /// Full duplex (half duplex when clear).
        const FULL_DUPLEX = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    Mbps10,
    Mbps100,
}

impl Speed {
    pub fn bits_per_sec(self) -> u32 {
        match self {
            Speed::Mbps10 => 10_000_000,
            Speed::Mbps100 => 100_000_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duplex {
    Half,
    Full,
}

/// Ethernet PHY plus the MAC speed/duplex knobs that follow it.
pub trait PhyDriver {
    /// Read the PHY status registers. Cheap; called in a tight loop.
    fn poll_link_status(&mut self) -> PhyStatus;

    /// Reprogram the MAC for the negotiated speed.
    fn set_speed(&mut self, speed: Speed);

    /// Reprogram the MAC for the negotiated duplex mode.
    fn set_duplex(&mut self, duplex: Duplex);
}

/// Board status LEDs.
pub trait StatusLed {
    fn set_led(&mut self, index: u8, on: bool);
}

/// Transmit side of the Ethernet MAC. Receive goes through `RxProducer`
/// from the MAC interrupt handler.
pub trait MacDriver {
    fn mac_address(&self) -> [u8; 6];

    /// Queue one frame (no FCS) for transmission.
    fn transmit(&mut self, frame: &[u8]) -> Result<(), MacError>;

    /// Unmask the receive interrupt. Called once the interface is registered.
    fn enable_rx_interrupt(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacError {
    /// All transmit descriptors are owned by the DMA engine.
    TxBusy,
    /// Frame exceeds what the MAC can send.
    FrameTooLarge,
}

impl fmt::Display for MacError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacError::TxBusy => write!(f, "transmit descriptors exhausted"),
            MacError::FrameTooLarge => write!(f, "frame too large"),
        }
    }
}

/// Everything the board hands over after one-time hardware setup.
pub struct Peripherals<P, M, L, R> {
    pub phy: P,
    pub mac: M,
    pub led: L,
    pub rng: R,
    /// Millisecond tick; the board's SysTick handler keeps a clone.
    pub tick: SysTick,
    /// Consumer half of the receive queue; the MAC ISR owns the producer.
    pub rx: RxConsumer,
    /// Debug UART, if the board has one.
    pub console: Option<Box<dyn fmt::Write + Send>>,
    /// Called by the scheduler when no task is runnable (e.g. `wfi`).
    pub idle: fn(),
}

/// A board support package.
pub trait Board {
    type Phy: PhyDriver + 'static;
    type Mac: MacDriver + Send + 'static;
    type Led: StatusLed + 'static;
    type Rng: RngCore;

    /// Clocks, pins, LEDs, tick and MAC/PHY bring-up. Called exactly once,
    /// before the scheduler starts.
    fn setup_hardware(self) -> Peripherals<Self::Phy, Self::Mac, Self::Led, Self::Rng>;
}
