/// Line echo service.
///
/// Greets a client, then answers every received buffer with
/// `REPLY_PREFIX` followed by exactly the bytes received. By default a single
/// client is served for the life of the firmware; `AcceptPolicy::Repeat`
/// goes back to accepting after each session.
use alloc::vec::Vec;
use core::fmt;

use crate::config::{GREETING, REPLY_PREFIX, SERVICE_PORT};
use crate::debug_println;
use crate::net::{Connection, Listener, NetError, StackHandle};

/// Source of client sessions.
#[allow(async_fn_in_trait)]
pub trait Acceptor {
    type Conn: Session;

    async fn accept(&mut self) -> Result<Self::Conn, NetError>;

    fn close(self);
}

/// One client byte stream.
#[allow(async_fn_in_trait)]
pub trait Session {
    async fn recv(&mut self) -> Result<Vec<u8>, NetError>;

    async fn send(&mut self, data: &[u8]) -> Result<(), NetError>;

    fn set_recv_timeout(&mut self, _ms: Option<u32>) {}

    fn close(self);
}

impl Acceptor for Listener {
    type Conn = Connection;

    async fn accept(&mut self) -> Result<Connection, NetError> {
        Listener::accept(self).await
    }

    fn close(self) {
        Listener::close(self)
    }
}

impl Session for Connection {
    async fn recv(&mut self) -> Result<Vec<u8>, NetError> {
        Connection::recv(self).await
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), NetError> {
        Connection::send(self, data).await
    }

    fn set_recv_timeout(&mut self, ms: Option<u32>) {
        self.set_timeout(ms)
    }

    fn close(self) {
        Connection::close(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcceptPolicy {
    /// Serve one client, then close the listener for good.
    #[default]
    SingleShot,
    /// Accept again after every session.
    Repeat,
}

#[derive(Debug, Clone, Copy)]
pub struct EchoConfig {
    pub port: u16,
    pub policy: AcceptPolicy,
    /// Milliseconds to wait for a client; `None` waits forever.
    pub accept_timeout: Option<u32>,
    /// Milliseconds to wait for each message; `None` waits forever.
    pub recv_timeout: Option<u32>,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            port: SERVICE_PORT,
            policy: AcceptPolicy::SingleShot,
            accept_timeout: None,
            recv_timeout: None,
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Client shut down its side.
    PeerClosed,
    Reset,
    TimedOut,
    RecvFailed(NetError),
    SendFailed(NetError),
}

impl SessionEnd {
    fn from_recv(err: NetError) -> Self {
        match err {
            NetError::Closed => SessionEnd::PeerClosed,
            NetError::Reset => SessionEnd::Reset,
            NetError::Timeout => SessionEnd::TimedOut,
            other => SessionEnd::RecvFailed(other),
        }
    }
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::PeerClosed => write!(f, "closed by client"),
            SessionEnd::Reset => write!(f, "connection reset"),
            SessionEnd::TimedOut => write!(f, "receive timed out"),
            SessionEnd::RecvFailed(e) => write!(f, "receive failed: {}", e),
            SessionEnd::SendFailed(e) => write!(f, "send failed: {}", e),
        }
    }
}

/// Reply for one received buffer.
pub fn echo_reply(data: &[u8]) -> Vec<u8> {
    let mut reply = Vec::with_capacity(REPLY_PREFIX.len() + data.len());
    reply.extend_from_slice(REPLY_PREFIX);
    reply.extend_from_slice(data);
    reply
}

/// Greet, then echo until the connection fails.
pub async fn run_session<S: Session>(conn: &mut S) -> SessionEnd {
    for line in GREETING {
        if let Err(e) = conn.send(line).await {
            return SessionEnd::SendFailed(e);
        }
    }

    loop {
        let data = match conn.recv().await {
            Ok(data) => data,
            Err(e) => return SessionEnd::from_recv(e),
        };
        if let Err(e) = conn.send(&echo_reply(&data)).await {
            return SessionEnd::SendFailed(e);
        }
    }
}

/// Accept and serve clients according to `cfg.policy`, then close the
/// listener. Returns the number of sessions served.
pub async fn serve<A: Acceptor>(mut listener: A, cfg: &EchoConfig) -> usize {
    let mut served = 0;
    loop {
        let mut conn = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                debug_println!("[echo] accept failed: {}", e);
                break;
            }
        };
        debug_println!("[echo] client connected");
        conn.set_recv_timeout(cfg.recv_timeout);

        let end = run_session(&mut conn).await;
        conn.close();
        served += 1;
        debug_println!("[echo] session ended: {}", end);

        if cfg.policy == AcceptPolicy::SingleShot {
            break;
        }
    }
    listener.close();
    served
}

/// Body of the "server_netconn" task.
pub async fn echo_task(stack: StackHandle, cfg: EchoConfig) {
    let listener = match stack.listen(cfg.port) {
        Ok(listener) => listener.with_timeout(cfg.accept_timeout),
        Err(e) => {
            debug_println!("[echo] cannot listen on port {}: {}", cfg.port, e);
            return;
        }
    };
    debug_println!("[echo] listening on port {}", cfg.port);

    let served = serve(listener, &cfg).await;
    debug_println!("[echo] stopped after {} session(s)", served);
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::VecDeque;
    use alloc::rc::Rc;
    use alloc::sync::Arc;
    use alloc::task::Wake;
    use alloc::vec;
    use core::cell::RefCell;
    use core::future::Future;
    use core::pin::pin;
    use core::task::{Context, Poll, Waker};

    struct Noop;

    impl Wake for Noop {
        fn wake(self: Arc<Self>) {}
    }

    /// The mocks below never suspend, so one poll finishes any future.
    fn block_on<F: Future>(fut: F) -> F::Output {
        let waker = Waker::from(Arc::new(Noop));
        let mut cx = Context::from_waker(&waker);
        match pin!(fut).poll(&mut cx) {
            Poll::Ready(out) => out,
            Poll::Pending => panic!("mock future suspended"),
        }
    }

    #[derive(Debug, PartialEq, Eq)]
    enum Event {
        Sent(Vec<u8>),
        SessionClosed,
        ListenerClosed,
    }

    type Log = Rc<RefCell<Vec<Event>>>;

    struct ScriptedSession {
        inbound: VecDeque<Result<Vec<u8>, NetError>>,
        fail_send_after: Option<usize>,
        log: Log,
    }

    impl ScriptedSession {
        fn new(log: &Log, inbound: Vec<Result<Vec<u8>, NetError>>) -> Self {
            Self {
                inbound: inbound.into(),
                fail_send_after: None,
                log: log.clone(),
            }
        }
    }

    impl Session for ScriptedSession {
        async fn recv(&mut self) -> Result<Vec<u8>, NetError> {
            self.inbound.pop_front().unwrap_or(Err(NetError::Closed))
        }

        async fn send(&mut self, data: &[u8]) -> Result<(), NetError> {
            if let Some(left) = self.fail_send_after.as_mut() {
                if *left == 0 {
                    return Err(NetError::Reset);
                }
                *left -= 1;
            }
            self.log.borrow_mut().push(Event::Sent(data.to_vec()));
            Ok(())
        }

        fn close(self) {
            self.log.borrow_mut().push(Event::SessionClosed);
        }
    }

    struct ScriptedAcceptor {
        pending: VecDeque<ScriptedSession>,
        log: Log,
    }

    impl Acceptor for ScriptedAcceptor {
        type Conn = ScriptedSession;

        async fn accept(&mut self) -> Result<ScriptedSession, NetError> {
            self.pending.pop_front().ok_or(NetError::Timeout)
        }

        fn close(self) {
            self.log.borrow_mut().push(Event::ListenerClosed);
        }
    }

    fn sent(data: &[u8]) -> Event {
        Event::Sent(data.to_vec())
    }

    #[test]
    fn empty_buffer_echoes_bare_prefix() {
        assert_eq!(echo_reply(b""), b"You typed: ".to_vec());
        assert_eq!(echo_reply(b"hi\r\n"), b"You typed: hi\r\n".to_vec());
    }

    #[test]
    fn greets_once_then_echoes_in_order() {
        let log = Log::default();
        let mut session = ScriptedSession::new(&log, vec![Ok(b"abc".to_vec()), Ok(b"xyz".to_vec())]);

        assert_eq!(block_on(run_session(&mut session)), SessionEnd::PeerClosed);
        assert_eq!(
            *log.borrow(),
            [
                sent(b"Hello! You have connected to LPC1769! \n"),
                sent(b"Please type in message: \n"),
                sent(b"You typed: abc"),
                sent(b"You typed: xyz"),
            ]
        );
    }

    #[test]
    fn reset_and_timeout_are_reported_distinctly() {
        let log = Log::default();
        let mut reset = ScriptedSession::new(&log, vec![Err(NetError::Reset)]);
        let mut idle = ScriptedSession::new(&log, vec![Err(NetError::Timeout)]);
        assert_eq!(block_on(run_session(&mut reset)), SessionEnd::Reset);
        assert_eq!(block_on(run_session(&mut idle)), SessionEnd::TimedOut);
    }

    #[test]
    fn send_failure_ends_session() {
        let log = Log::default();
        let mut session = ScriptedSession::new(&log, vec![Ok(b"abc".to_vec())]);
        session.fail_send_after = Some(2);

        assert_eq!(
            block_on(run_session(&mut session)),
            SessionEnd::SendFailed(NetError::Reset)
        );
        // Greeting went out, the echo did not.
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn single_shot_serves_one_client_then_closes_listener() {
        let log = Log::default();
        let acceptor = ScriptedAcceptor {
            pending: vec![
                ScriptedSession::new(&log, vec![Ok(b"1".to_vec())]),
                ScriptedSession::new(&log, vec![Ok(b"2".to_vec())]),
            ]
            .into(),
            log: log.clone(),
        };

        assert_eq!(block_on(serve(acceptor, &EchoConfig::default())), 1);
        let log = log.borrow();
        assert_eq!(log[2], sent(b"You typed: 1"));
        assert_eq!(log[3..], [Event::SessionClosed, Event::ListenerClosed]);
        assert!(!log.contains(&sent(b"You typed: 2")));
    }

    #[test]
    fn repeat_policy_serves_until_accept_fails() {
        let log = Log::default();
        let acceptor = ScriptedAcceptor {
            pending: vec![
                ScriptedSession::new(&log, vec![Ok(b"1".to_vec())]),
                ScriptedSession::new(&log, vec![Ok(b"2".to_vec())]),
            ]
            .into(),
            log: log.clone(),
        };
        let cfg = EchoConfig {
            policy: AcceptPolicy::Repeat,
            ..EchoConfig::default()
        };

        assert_eq!(block_on(serve(acceptor, &cfg)), 2);
        let log = log.borrow();
        assert!(log.contains(&sent(b"You typed: 2")));
        assert_eq!(log.last(), Some(&Event::ListenerClosed));
        assert_eq!(log.iter().filter(|e| **e == Event::SessionClosed).count(), 2);
    }
}
