use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};

use crate::Error;

/// The waiter of the current command.
///
/// Every arming starts a new generation. A connection belongs to the
/// generation current when it was accepted.
#[derive(Debug, Default)]
struct Waiter {
    generation: u64,
    sender: Option<oneshot::Sender<Vec<u8>>>,
}

type Slot = Arc<Mutex<Waiter>>;

/// The loopback endpoint workers post their results to.
///
/// A worker connects, writes its whole result and closes the connection. The
/// result is handed to whoever [armed](ResultListener::arm) the listener, as
/// long as the connection was accepted after that arming. Results nobody waits
/// for are dropped.
#[derive(Debug)]
pub struct ResultListener {
    port: u16,
    slot: Slot,
    task: JoinHandle<()>,
}

impl ResultListener {
    /// Binds to `preferred_port`, moving on to the following ports if it is taken.
    ///
    /// At most `attempts` ports are tried.
    pub async fn bind(preferred_port: u16, attempts: u16) -> Result<Self, Error> {
        let mut last_error = None;

        for offset in 0..attempts {
            let Some(port) = preferred_port.checked_add(offset) else {
                break;
            };

            match TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).await {
                Ok(listener) => {
                    let port = listener.local_addr()?.port();
                    tracing::debug!("Listening for results on port {port}");
                    return Ok(Self::start(listener, port));
                }
                Err(error) => {
                    tracing::debug!("Port {port} is not available: {error}");
                    last_error = Some(error);
                }
            }
        }

        Err(Error::SessionStart(match last_error {
            Some(error) => format!(
                "no free port for the result listener in {preferred_port}..{}: {error}",
                u32::from(preferred_port) + u32::from(attempts)
            ),
            None => "no port to bind the result listener to".to_string(),
        }))
    }

    fn start(listener: TcpListener, port: u16) -> Self {
        let slot: Slot = Arc::default();
        let task = tokio::spawn(accept_loop(listener, slot.clone()));
        Self { port, slot, task }
    }

    /// The port the listener is bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Waits for the next result. Arming again replaces the previous waiter.
    ///
    /// Connections accepted before this call are never handed to the new waiter.
    pub fn arm(&self) -> oneshot::Receiver<Vec<u8>> {
        let (sender, receiver) = oneshot::channel();
        let mut waiter = self.slot.lock();
        waiter.generation += 1;
        waiter.sender = Some(sender);
        receiver
    }

    /// Stops waiting; a result arriving later is dropped.
    pub fn disarm(&self) {
        self.slot.lock().sender.take();
    }
}

impl Drop for ResultListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(listener: TcpListener, slot: Slot) {
    // Dropped with the loop, which aborts readers still waiting on idle peers.
    let mut readers = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(connection) => connection,
                    Err(error) => {
                        tracing::warn!("Failed to accept a result connection: {error}");
                        continue;
                    }
                };
                let generation = slot.lock().generation;
                tracing::trace!("Result connection from {peer} for command {generation}");
                readers.spawn(deliver(stream, peer, slot.clone(), generation));
            }
            Some(_) = readers.join_next() => {}
        }
    }
}

async fn deliver(stream: TcpStream, peer: SocketAddr, slot: Slot, generation: u64) {
    let payload = match read_payload(stream).await {
        Ok(payload) => payload,
        Err(error) => {
            tracing::warn!("Failed to read a result from {peer}: {error}");
            return;
        }
    };

    let mut waiter = slot.lock();
    if waiter.generation != generation {
        tracing::warn!(
            "Dropping a result of {} bytes posted for an earlier command",
            payload.len()
        );
        return;
    }

    match waiter.sender.take() {
        Some(sender) => {
            tracing::debug!("Received a result of {} bytes", payload.len());
            // The waiter may have given up in the meantime.
            let _ = sender.send(payload);
        }
        None => tracing::warn!(
            "Dropping a result of {} bytes nobody is waiting for",
            payload.len()
        ),
    }
}

async fn read_payload(mut stream: TcpStream) -> std::io::Result<Vec<u8>> {
    let mut payload = Vec::new();
    stream.read_to_end(&mut payload).await?;

    let end = payload
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    payload.truncate(end);
    let start = payload
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(payload.len());
    payload.drain(..start);

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    async fn post(port: u16, payload: &[u8]) {
        let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.unwrap();
        stream.write_all(payload).await.unwrap();
        stream.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn armed_listener_receives_the_trimmed_result() {
        let listener = ResultListener::bind(0, 1).await.unwrap();
        let result = listener.arm();

        post(listener.port(), b"  0x1234\r\n").await;

        assert_eq!(result.await.unwrap(), b"0x1234");
    }

    #[tokio::test]
    async fn unarmed_results_are_dropped() {
        let listener = ResultListener::bind(0, 1).await.unwrap();

        post(listener.port(), b"stale").await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        let result = listener.arm();
        post(listener.port(), b"fresh").await;

        assert_eq!(result.await.unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn results_of_earlier_armings_are_dropped() {
        let listener = ResultListener::bind(0, 1).await.unwrap();
        let first = listener.arm();

        let mut late = TcpStream::connect((Ipv4Addr::LOCALHOST, listener.port())).await.unwrap();
        late.write_all(b"first").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(first);
        let second = listener.arm();
        late.shutdown().await.unwrap();
        drop(late);
        tokio::time::sleep(Duration::from_millis(200)).await;
        post(listener.port(), b"second").await;

        assert_eq!(second.await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn idle_connections_do_not_hold_up_results() {
        let listener = ResultListener::bind(0, 1).await.unwrap();
        let _idle = TcpStream::connect((Ipv4Addr::LOCALHOST, listener.port())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let result = listener.arm();

        post(listener.port(), b"real").await;

        let payload = tokio::time::timeout(Duration::from_secs(2), result)
            .await
            .expect("The idle connection blocked the listener.")
            .unwrap();
        assert_eq!(payload, b"real");
    }

    #[tokio::test]
    async fn disarmed_waiter_sees_a_closed_channel() {
        let listener = ResultListener::bind(0, 1).await.unwrap();
        let result = listener.arm();

        listener.disarm();

        assert!(result.await.is_err());
    }

    #[tokio::test]
    async fn taken_ports_are_skipped() {
        let first = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = first.local_addr().unwrap().port();
        let Ok(_second) = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, port + 1)) else {
            // Someone else holds the neighbouring port; nothing to test.
            return;
        };

        match ResultListener::bind(port, 3).await {
            Ok(listener) => assert_eq!(listener.port(), port + 2),
            Err(error) => panic!("port {} should have been used: {error}", port + 2),
        }
        assert!(matches!(
            ResultListener::bind(port, 2).await,
            Err(Error::SessionStart(_))
        ));
    }
}
