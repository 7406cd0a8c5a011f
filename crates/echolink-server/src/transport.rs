//! Line-delimited JSON TCP front-end.
//!
//! One socket per session: a reader loop parses inbound `ClientEvent` lines
//! and a writer task drains the session's outbound channel as `ServerEvent`
//! lines. The core only ever sees [`SessionHandle`]s, so swapping this
//! front-end for another duplex transport touches nothing else.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{
    tcp::{OwnedReadHalf, OwnedWriteHalf},
    TcpListener, TcpStream,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use echolink_shared::protocol::{ClientEvent, ServerEvent};

use crate::router::EventRouter;
use crate::session::SessionHandle;

/// Accept connections forever, spawning one task per socket.
pub async fn serve(addr: SocketAddr, router: Arc<EventRouter>) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Transport listening");

    loop {
        let (socket, peer) = listener.accept().await?;
        debug!(%peer, "Session opened");
        let router = Arc::clone(&router);
        tokio::spawn(async move {
            if let Err(e) = handle_socket(socket, router).await {
                debug!(%peer, error = %e, "Session closed with error");
            } else {
                debug!(%peer, "Session closed");
            }
        });
    }
}

async fn handle_socket(socket: TcpStream, router: Arc<EventRouter>) -> io::Result<()> {
    let (read_half, write_half) = socket.into_split();
    let (session, outbound) = SessionHandle::new();
    let session_id = session.id();

    let writer = tokio::spawn(write_loop(write_half, outbound));
    let result = read_loop(read_half, &session, &router).await;

    // EOF and read errors both mean the channel is gone; presence decides
    // whether this becomes an eviction.
    router.on_disconnect(session_id).await;
    writer.abort();
    result
}

async fn read_loop(
    read_half: OwnedReadHalf,
    session: &SessionHandle,
    router: &EventRouter,
) -> io::Result<()> {
    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ClientEvent>(&line) {
            Ok(event) => router.handle_event(session, event).await,
            Err(e) => {
                debug!(session = %session.id(), error = %e, "Malformed event line");
                session.send(ServerEvent::Error {
                    message: format!("malformed event: {e}"),
                });
            }
        }
    }
    Ok(())
}

async fn write_loop(write_half: OwnedWriteHalf, mut outbound: mpsc::Receiver<ServerEvent>) {
    let mut writer = BufWriter::new(write_half);
    while let Some(event) = outbound.recv().await {
        let mut line = match serde_json::to_vec(&event) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Outbound event failed to serialize");
                continue;
            }
        };
        line.push(b'\n');
        if writer.write_all(&line).await.is_err() || writer.flush().await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use echolink_store::Store;

    async fn start_server() -> (SocketAddr, Arc<EventRouter>) {
        let store = Store::open_in_memory().unwrap();
        let router = EventRouter::new(store, ServerConfig::default()).await.unwrap();

        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept_router = Arc::clone(&router);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let router = Arc::clone(&accept_router);
                tokio::spawn(async move {
                    let _ = handle_socket(socket, router).await;
                });
            }
        });
        (addr, router)
    }

    #[tokio::test]
    async fn register_over_tcp_yields_contacts_and_history() {
        let (addr, _router) = start_server().await;

        let socket = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = socket.into_split();
        write_half
            .write_all(b"{\"event\":\"register-user\",\"data\":{\"userEmail\":\"a@x.com\"}}\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(read_half).lines();
        let first = lines.next_line().await.unwrap().unwrap();
        let second = lines.next_line().await.unwrap().unwrap();

        let first: serde_json::Value = serde_json::from_str(&first).unwrap();
        let second: serde_json::Value = serde_json::from_str(&second).unwrap();
        assert_eq!(first["event"], "contacts-updated");
        assert_eq!(second["event"], "call-history-updated");
    }

    #[tokio::test]
    async fn malformed_line_reports_an_error_event() {
        let (addr, _router) = start_server().await;

        let socket = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = socket.into_split();
        write_half.write_all(b"{not json}\n").await.unwrap();

        let mut lines = BufReader::new(read_half).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["event"], "error");
    }

    #[tokio::test]
    async fn disconnect_reaches_presence() {
        let (addr, router) = start_server().await;

        let socket = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = socket.into_split();
        write_half
            .write_all(b"{\"event\":\"register-user\",\"data\":{\"userEmail\":\"a@x.com\"}}\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(read_half).lines();
        lines.next_line().await.unwrap();
        assert!(router.presence().is_online(&"a@x.com".into()).await);

        drop(write_half);
        drop(lines);
        // The reader task observes EOF and marks the session disconnected.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!router.presence().is_online(&"a@x.com".into()).await);
    }
}
