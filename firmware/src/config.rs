/// Build-time configuration.
///
/// Everything here is fixed when the firmware is compiled. The addressing
/// mode is picked with the `dhcp` cargo feature; there is no runtime switch.
use smoltcp::wire::Ipv4Address;

use crate::sched::Priority;

// ---- Echo service ----

/// TCP port the echo service listens on.
pub const SERVICE_PORT: u16 = 6001;

/// Lines sent to every freshly accepted client, in order.
pub const GREETING: [&[u8]; 2] = [
    b"Hello! You have connected to LPC1769! \n",
    b"Please type in message: \n",
];

/// Label prepended to every echoed buffer.
pub const REPLY_PREFIX: &[u8] = b"You typed: ";

/// Largest chunk handed out by a single `recv`.
pub const RECV_CHUNK: usize = 1024;

// ---- Addressing ----

pub const STATIC_ADDRESS: Ipv4Address = Ipv4Address::new(192, 168, 0, 3);
pub const STATIC_NETMASK: Ipv4Address = Ipv4Address::new(255, 255, 255, 0);
pub const STATIC_GATEWAY: Ipv4Address = Ipv4Address::new(192, 168, 0, 1);

/// How the interface gets its IPv4 configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMode {
    /// Fixed address, netmask and gateway.
    Static {
        address: Ipv4Address,
        netmask: Ipv4Address,
        gateway: Ipv4Address,
    },
    /// All-zero until a DHCP lease is bound.
    Dhcp,
}

impl AddrMode {
    pub const fn static_default() -> Self {
        AddrMode::Static {
            address: STATIC_ADDRESS,
            netmask: STATIC_NETMASK,
            gateway: STATIC_GATEWAY,
        }
    }

    pub fn is_dhcp(&self) -> bool {
        matches!(self, AddrMode::Dhcp)
    }
}

#[cfg(feature = "dhcp")]
pub const ADDR_MODE: AddrMode = AddrMode::Dhcp;

#[cfg(not(feature = "dhcp"))]
pub const ADDR_MODE: AddrMode = AddrMode::static_default();

// ---- Link monitor ----

/// Settle time after the PHY reports a link change.
pub const LINK_DEBOUNCE_MS: u32 = 250;

/// Status LED that mirrors the cable state.
pub const LINK_LED: u8 = 0;

// ---- Stack sizing ----

/// Slots in the interrupt → stack receive queue (one is kept empty).
pub const RX_QUEUE_SLOTS: usize = 16;

/// Pending interface commands before `NetifSender::send` has to wait.
pub const NETIF_MAILBOX_DEPTH: usize = 8;

pub const TCP_RX_BUFFER: usize = 2048;
pub const TCP_TX_BUFFER: usize = 2048;

/// How long a closed connection may wait for the peer to finish teardown
/// before it is aborted and its buffers freed.
pub const CLOSE_LINGER_MS: u32 = 10_000;

/// Largest Ethernet frame the MAC accepts, without FCS.
pub const ETHERNET_MTU: usize = 1514;

// ---- Tasks ----

pub const SETUP_IF_STACK: usize = 4096;
pub const SETUP_IF_PRIORITY: Priority = Priority::IDLE.raised(1);

pub const TCPIP_STACK: usize = 2048;
pub const TCPIP_PRIORITY: Priority = Priority::IDLE.raised(3);

pub const SERVER_STACK: usize = 4096;
pub const SERVER_PRIORITY: Priority = Priority::IDLE.raised(2);

/// Upper bound on concurrently live tasks.
pub const MAX_TASKS: usize = 8;

static_assertions::const_assert!(RX_QUEUE_SLOTS > 1);
static_assertions::const_assert!(NETIF_MAILBOX_DEPTH > 0);
static_assertions::const_assert!(RECV_CHUNK <= TCP_RX_BUFFER);
static_assertions::const_assert!(GREETING[0].len() + GREETING[1].len() <= TCP_TX_BUFFER);
static_assertions::const_assert!(REPLY_PREFIX.len() < TCP_TX_BUFFER);
