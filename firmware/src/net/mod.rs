/// Network stack: bridges the Ethernet MAC to TCP/IP via smoltcp.
///
/// Architecture:
///   MAC receive ISR (raw Ethernet frames)
///       ↓ RxProducer / RxConsumer (lock-free SPSC)
///   EmacDevice (implements smoltcp::phy::Device)
///       ↓ ↑
///   NetStack: smoltcp Interface (ARP, IPv4, DHCP, TCP) + Netif
///       ↓ ↑                          ↑
///   Listener / Connection          NetifCommand mailbox
///   (echo service)                 (link monitor)
pub mod device;
pub mod link;
pub mod netif;
pub mod socket;
pub mod stack;


pub use device::{rx_queue, InboundPacket, RxConsumer, RxProducer};
pub use link::{LinkMonitor, LinkPoll};
pub use netif::{mailbox, LinkState, NetifCommand, NetifReceiver, NetifSender};
pub use socket::{Connection, Listener};
pub use stack::{NetError, NetStack, NetifStatus, StackHandle};
