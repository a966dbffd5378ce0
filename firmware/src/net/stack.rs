/// TCP/IP network stack built on smoltcp.
///
/// Provides:
/// - static or DHCP IPv4 configuration of the single interface
/// - link state applied from the interface mailbox
/// - TCP socket creation and I/O for `net::socket`
///
/// All interface mutation happens in `poll`, which only the stack task
/// calls.
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use smoltcp::iface::{Config, Interface, SocketHandle, SocketSet};
use smoltcp::socket::dhcpv4;
use smoltcp::socket::tcp::{self, Socket as TcpSocket, State};
use smoltcp::time::Instant;
use smoltcp::wire::{EthernetAddress, IpCidr, Ipv4Address, Ipv4Cidr};
use spin::{Mutex, MutexGuard};

use super::device::EmacDevice;
use super::netif::{LinkState, Netif, NetifCommand, NetifReceiver};
use crate::config::{AddrMode, CLOSE_LINGER_MS, TCP_RX_BUFFER, TCP_TX_BUFFER};
use crate::debug_println;
use crate::sched::{SysTick, Uptime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    /// MAC address is multicast or all zeros.
    InvalidMac,
    /// Static address, netmask or gateway is unusable.
    InvalidAddress,
    /// A blocking call ran past its timeout.
    Timeout,
    /// Peer finished sending (orderly shutdown).
    Closed,
    /// Connection reset or aborted.
    Reset,
    /// Socket is not in a state that allows the operation.
    NotConnected,
    /// The listening socket has been closed.
    ListenerClosed,
    /// smoltcp rejected the socket operation.
    SocketError,
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetError::InvalidMac => write!(f, "invalid MAC address"),
            NetError::InvalidAddress => write!(f, "invalid IPv4 configuration"),
            NetError::Timeout => write!(f, "timed out"),
            NetError::Closed => write!(f, "connection closed by peer"),
            NetError::Reset => write!(f, "connection reset"),
            NetError::NotConnected => write!(f, "not connected"),
            NetError::ListenerClosed => write!(f, "listener closed"),
            NetError::SocketError => write!(f, "socket error"),
        }
    }
}

/// Snapshot of the interface, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetifStatus {
    pub address: Ipv4Address,
    pub netmask: Ipv4Address,
    pub gateway: Ipv4Address,
    pub link: LinkState,
    /// Negotiated speed in bit/s, zero while down.
    pub link_speed: u32,
    pub rx_pending: usize,
    pub rx_dropped: u32,
    pub tx_errors: u32,
}

impl NetifStatus {
    /// Whether the interface has an address yet.
    pub fn is_addressed(&self) -> bool {
        !self.address.is_unspecified()
    }
}

/// Network stack state.
pub struct NetStack {
    device: EmacDevice,
    iface: Interface,
    sockets: SocketSet<'static>,
    netif: Netif,
    dhcp: Option<SocketHandle>,
    commands: NetifReceiver,
    /// Closed connections waiting for TCP teardown before removal, with
    /// the tick at which the close started.
    closing: Vec<(SocketHandle, u32)>,
    tick: SysTick,
    uptime: Uptime,
}

impl NetStack {
    /// Register the interface: validate the hardware address and the
    /// addressing mode, then bring smoltcp up with the link down.
    pub fn new(
        mode: &AddrMode,
        mut device: EmacDevice,
        seed: u64,
        commands: NetifReceiver,
        tick: SysTick,
    ) -> Result<Self, NetError> {
        let mac = EthernetAddress(device.mac());
        if !mac.is_unicast() || mac.0 == [0; 6] {
            return Err(NetError::InvalidMac);
        }

        // Validate before touching smoltcp so a bad config leaves nothing
        // half-registered.
        let static_cfg = match *mode {
            AddrMode::Static {
                address,
                netmask,
                gateway,
            } => Some(validate_static(address, netmask, gateway)?),
            AddrMode::Dhcp => None,
        };

        let mut uptime = Uptime::new(tick.now_ms());
        let now = Instant::from_millis(uptime.update(tick.now_ms()) as i64);

        let mut config = Config::new(mac.into());
        config.random_seed = seed;
        let iface = Interface::new(config, &mut device, now);

        let mut stack = Self {
            device,
            iface,
            sockets: SocketSet::new(vec![]),
            netif: Netif::new(*mode),
            dhcp: None,
            commands,
            closing: Vec::new(),
            tick,
            uptime,
        };

        match static_cfg {
            Some((cidr, gateway)) => stack.set_ipv4(Some(cidr), Some(gateway)),
            None => {
                let handle = stack.sockets.add(dhcpv4::Socket::new());
                stack.dhcp = Some(handle);
            }
        }

        debug_println!(
            "[net] interface {} registered ({})",
            mac,
            if mode.is_dhcp() { "dhcp" } else { "static" }
        );
        Ok(stack)
    }

    fn now(&mut self) -> Instant {
        Instant::from_millis(self.uptime.update(self.tick.now_ms()) as i64)
    }

    /// Apply pending interface commands, then move packets and advance the
    /// TCP state machines. Must be called regularly, from one task only.
    /// Returns true if smoltcp did any work.
    pub fn poll(&mut self) -> bool {
        let Self {
            commands,
            netif,
            device,
            sockets,
            dhcp,
            ..
        } = self;
        commands.drain(|cmd| apply_command(cmd, netif, device, sockets, *dhcp));

        let timestamp = self.now();
        let activity = self
            .iface
            .poll(timestamp, &mut self.device, &mut self.sockets);

        self.poll_dhcp();
        self.reap_closing();
        activity
    }

    fn poll_dhcp(&mut self) {
        let Some(handle) = self.dhcp else { return };
        let lease = match self.sockets.get_mut::<dhcpv4::Socket>(handle).poll() {
            None => return,
            Some(dhcpv4::Event::Configured(config)) => Some((config.address, config.router)),
            Some(dhcpv4::Event::Deconfigured) => None,
        };

        match lease {
            Some((cidr, router)) => {
                debug_println!("[net] dhcp lease {}", cidr);
                self.set_ipv4(Some(cidr), router);
            }
            None => {
                debug_println!("[net] dhcp lease lost");
                self.set_ipv4(None, None);
            }
        }
    }

    fn set_ipv4(&mut self, cidr: Option<Ipv4Cidr>, gateway: Option<Ipv4Address>) {
        self.iface.update_ip_addrs(|addrs| {
            addrs.clear();
            if let Some(cidr) = cidr {
                addrs.push(IpCidr::Ipv4(cidr)).ok();
            }
        });
        match gateway {
            Some(gw) => {
                self.iface.routes_mut().add_default_ipv4_route(gw).ok();
            }
            None => {
                self.iface.routes_mut().remove_default_ipv4_route();
            }
        }
        self.netif.set_addr(cidr, gateway);
    }

    /// Remove closing sockets once teardown is done, or once they have
    /// lingered past `CLOSE_LINGER_MS` (peer gone, FIN never acknowledged).
    fn reap_closing(&mut self) {
        let now = self.tick.now_ms();
        let sockets = &mut self.sockets;
        self.closing.retain(|&(handle, since)| {
            let socket = sockets.get_mut::<TcpSocket>(handle);
            if matches!(socket.state(), State::Closed | State::TimeWait) {
                sockets.remove(handle);
                return false;
            }
            if now.wrapping_sub(since) >= CLOSE_LINGER_MS {
                debug_println!("[net] dropping socket stuck in {}", socket.state());
                socket.abort();
                sockets.remove(handle);
                return false;
            }
            true
        });
    }

    /// Connections closed but not yet torn down.
    pub fn closing_sockets(&self) -> usize {
        self.closing.len()
    }

    pub fn status(&self) -> NetifStatus {
        let (address, netmask) = match self.netif.cidr() {
            Some(cidr) => (cidr.address(), cidr.netmask()),
            None => (Ipv4Address::UNSPECIFIED, Ipv4Address::UNSPECIFIED),
        };
        NetifStatus {
            address,
            netmask,
            gateway: self.netif.gateway().unwrap_or(Ipv4Address::UNSPECIFIED),
            link: self.netif.link(),
            link_speed: self.netif.link_speed(),
            rx_pending: self.device.rx_pending(),
            rx_dropped: self.device.rx_dropped(),
            tx_errors: self.device.tx_errors(),
        }
    }

    pub fn netif(&self) -> &Netif {
        &self.netif
    }

    /// Unmask MAC receive interrupts. Done once, after registration.
    pub fn enable_rx_interrupts(&mut self) {
        self.device.enable_rx_interrupt();
    }

    /// Interface commands posted but not yet applied.
    pub fn pending_commands(&self) -> usize {
        self.commands.pending()
    }

    /// Sockets of any kind currently held by smoltcp.
    pub fn socket_count(&self) -> usize {
        self.sockets.iter().count()
    }

    // ---- TCP primitives for `net::socket` ----

    /// Open a listening TCP socket on `port`.
    pub fn tcp_listen(&mut self, port: u16) -> Result<SocketHandle, NetError> {
        let rx_buf = tcp::SocketBuffer::new(vec![0u8; TCP_RX_BUFFER]);
        let tx_buf = tcp::SocketBuffer::new(vec![0u8; TCP_TX_BUFFER]);
        let mut socket = TcpSocket::new(rx_buf, tx_buf);
        socket.listen(port).map_err(|_| NetError::SocketError)?;
        Ok(self.sockets.add(socket))
    }

    pub fn tcp_state(&self, handle: SocketHandle) -> State {
        self.sockets.get::<TcpSocket>(handle).state()
    }

    /// Put a socket that fell back to `Closed` into `Listen` again.
    pub fn tcp_relisten(&mut self, handle: SocketHandle, port: u16) -> Result<(), NetError> {
        let socket = self.sockets.get_mut::<TcpSocket>(handle);
        if socket.is_open() {
            return Ok(());
        }
        socket.listen(port).map_err(|_| NetError::SocketError)
    }

    /// Read up to `max` bytes. `Ok(None)` means nothing buffered yet.
    pub fn tcp_recv(&mut self, handle: SocketHandle, max: usize) -> Result<Option<Vec<u8>>, NetError> {
        let socket = self.sockets.get_mut::<TcpSocket>(handle);
        if socket.can_recv() {
            let data = socket
                .recv(|buf| {
                    let n = buf.len().min(max);
                    (n, buf[..n].to_vec())
                })
                .map_err(|_| NetError::SocketError)?;
            return Ok(Some(data));
        }
        if !socket.may_recv() {
            return Err(end_of_stream(socket.state()));
        }
        Ok(None)
    }

    /// Copy as much of `data` as fits into the transmit buffer.
    pub fn tcp_send(&mut self, handle: SocketHandle, data: &[u8]) -> Result<usize, NetError> {
        let socket = self.sockets.get_mut::<TcpSocket>(handle);
        if !socket.may_send() {
            return Err(match socket.state() {
                State::Closed => NetError::Reset,
                _ => NetError::NotConnected,
            });
        }
        if !socket.can_send() {
            return Ok(0);
        }
        socket.send_slice(data).map_err(|_| NetError::SocketError)
    }

    /// Start an orderly close. The socket is removed once teardown is done.
    pub fn tcp_close(&mut self, handle: SocketHandle) {
        self.sockets.get_mut::<TcpSocket>(handle).close();
        self.closing.push((handle, self.tick.now_ms()));
    }

    /// Drop the connection (RST if one exists) and remove the socket.
    pub fn tcp_abort(&mut self, handle: SocketHandle) {
        let socket = self.sockets.get_mut::<TcpSocket>(handle);
        if matches!(socket.state(), State::Listen | State::Closed) {
            self.sockets.remove(handle);
        } else {
            socket.abort();
            // RST goes out on the next poll, removal right after.
            self.closing.push((handle, self.tick.now_ms()));
        }
    }
}

/// `recv` found no data and no more can arrive.
fn end_of_stream(state: State) -> NetError {
    match state {
        State::Closed => NetError::Reset,
        _ => NetError::Closed,
    }
}

fn validate_static(
    address: Ipv4Address,
    netmask: Ipv4Address,
    gateway: Ipv4Address,
) -> Result<(Ipv4Cidr, Ipv4Address), NetError> {
    if !address.is_unicast() {
        return Err(NetError::InvalidAddress);
    }
    let cidr = Ipv4Cidr::from_netmask(address, netmask).map_err(|_| NetError::InvalidAddress)?;
    if !cidr.contains_addr(&gateway) || gateway == address {
        return Err(NetError::InvalidAddress);
    }
    Ok((cidr, gateway))
}

fn apply_command(
    cmd: NetifCommand,
    netif: &mut Netif,
    device: &mut EmacDevice,
    sockets: &mut SocketSet<'static>,
    dhcp: Option<SocketHandle>,
) {
    let state = match cmd {
        NetifCommand::LinkUp { speed, duplex } => LinkState::Up { speed, duplex },
        NetifCommand::LinkDown => LinkState::Down,
    };
    let was_up = netif.link().is_up();
    if !netif.set_link(state) {
        return;
    }

    match state {
        LinkState::Up { duplex, .. } => {
            device.set_link(true);
            if !was_up {
                if let Some(handle) = dhcp {
                    sockets.get_mut::<dhcpv4::Socket>(handle).reset();
                }
            }
            debug_println!(
                "[net] link up, {} Mbit/s {:?} duplex",
                netif.link_speed() / 1_000_000,
                duplex
            );
        }
        LinkState::Down => {
            device.set_link(false);
            let flushed = device.flush_rx();
            debug_println!("[net] link down, {} frame(s) discarded", flushed);
        }
    }
}

/// Shared handle to the stack. Tasks lock it only between suspension points.
#[derive(Clone)]
pub struct StackHandle {
    stack: Arc<Mutex<NetStack>>,
    tick: SysTick,
}

impl StackHandle {
    pub fn new(stack: NetStack) -> Self {
        let tick = stack.tick.clone();
        Self {
            stack: Arc::new(Mutex::new(stack)),
            tick,
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, NetStack> {
        self.stack.lock()
    }

    pub fn tick(&self) -> &SysTick {
        &self.tick
    }

    pub fn poll(&self) -> bool {
        self.stack.lock().poll()
    }

    pub fn status(&self) -> NetifStatus {
        self.stack.lock().status()
    }
}
