/// Task-facing TCP sockets.
///
/// `Listener` and `Connection` wrap smoltcp socket handles held inside the
/// shared `NetStack`. Their blocking calls are async: each attempt locks the
/// stack, checks the socket, unlocks, and yields until the stack task has
/// moved things along. The lock is never held across an `.await`.
use alloc::vec::Vec;

use smoltcp::iface::SocketHandle;
use smoltcp::socket::tcp::State;

use super::stack::{NetError, StackHandle};
use crate::config::RECV_CHUNK;
use crate::sched::yield_now;

impl StackHandle {
    /// Open a listening socket on `port`.
    pub fn listen(&self, port: u16) -> Result<Listener, NetError> {
        let handle = self.lock().tcp_listen(port)?;
        Ok(Listener {
            stack: self.clone(),
            handle: Some(handle),
            port,
            timeout: None,
        })
    }
}

/// Passive TCP socket. Each accepted connection takes over the socket that
/// saw the handshake and a fresh one starts listening in its place.
pub struct Listener {
    stack: StackHandle,
    handle: Option<SocketHandle>,
    port: u16,
    timeout: Option<u32>,
}

impl Listener {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bound `accept` to `ms` milliseconds (`None` waits forever).
    pub fn with_timeout(mut self, ms: Option<u32>) -> Self {
        self.timeout = ms;
        self
    }

    /// Wait for a peer to complete the handshake.
    pub async fn accept(&mut self) -> Result<Connection, NetError> {
        let deadline = self.stack.tick().deadline(self.timeout);
        loop {
            let handle = self.handle.ok_or(NetError::ListenerClosed)?;
            {
                let mut stack = self.stack.lock();
                match stack.tcp_state(handle) {
                    State::Listen | State::SynReceived => {}
                    // Handshake aborted before we got to it.
                    State::Closed | State::TimeWait => stack.tcp_relisten(handle, self.port)?,
                    _ => {
                        let next = stack.tcp_listen(self.port)?;
                        self.handle = Some(next);
                        drop(stack);
                        return Ok(Connection {
                            stack: self.stack.clone(),
                            handle: Some(handle),
                            timeout: None,
                        });
                    }
                }
            }
            if deadline.expired(self.stack.tick()) {
                return Err(NetError::Timeout);
            }
            yield_now().await;
        }
    }

    /// Stop listening. Peers connecting afterwards are refused.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.stack.lock().tcp_abort(handle);
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.release();
    }
}

/// One established TCP connection.
pub struct Connection {
    stack: StackHandle,
    handle: Option<SocketHandle>,
    timeout: Option<u32>,
}

impl Connection {
    /// Bound each `recv` to `ms` milliseconds (`None` waits forever).
    pub fn set_timeout(&mut self, ms: Option<u32>) {
        self.timeout = ms;
    }

    /// Wait for data. Returns at most `RECV_CHUNK` bytes, never an empty
    /// buffer; the end of the stream is reported as an error.
    pub async fn recv(&mut self) -> Result<Vec<u8>, NetError> {
        let handle = self.handle.ok_or(NetError::NotConnected)?;
        let deadline = self.stack.tick().deadline(self.timeout);
        loop {
            if let Some(data) = self.stack.lock().tcp_recv(handle, RECV_CHUNK)? {
                return Ok(data);
            }
            if deadline.expired(self.stack.tick()) {
                return Err(NetError::Timeout);
            }
            yield_now().await;
        }
    }

    /// Queue all of `data` for transmission, waiting for room as needed.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), NetError> {
        let handle = self.handle.ok_or(NetError::NotConnected)?;
        let mut sent = 0;
        while sent < data.len() {
            let n = self.stack.lock().tcp_send(handle, &data[sent..])?;
            sent += n;
            if sent < data.len() {
                yield_now().await;
            }
        }
        Ok(())
    }

    /// Orderly close; the stack finishes the teardown.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.stack.lock().tcp_close(handle);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.release();
    }
}
