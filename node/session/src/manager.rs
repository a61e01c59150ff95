//! Connection managers: an accept loop for inbound peers and a
//! reconnecting dialer for outbound peers.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use weft_registry::Node;

use crate::session::{Session, SessionConfig};
use crate::transport::{connect_tcp, listen_tcp};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Accepts inbound connections and runs a session for each.
pub struct Server {
    node: Arc<Node>,
    listen: String,
    /// Name we ask peers to register us under.
    local_name: Option<String>,
    timing: Option<(Duration, Duration)>,
}

impl Server {
    /// Build a server accepting on `listen` for `node`.
    pub fn new(node: Arc<Node>, listen: impl Into<String>) -> Self {
        Server {
            node,
            listen: listen.into(),
            local_name: None,
            timing: None,
        }
    }

    /// Set the name peers are asked to register this node's link under.
    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }

    /// Override the keepalive interval and disconnect timeout for every
    /// accepted session.
    pub fn with_timing(mut self, keepalive: Duration, timeout: Duration) -> Self {
        self.timing = Some((keepalive, timeout));
        self
    }

    /// Accept forever. Each connection gets a fallback link name of
    /// `tcp_<n>`, used only when the peer offers no hint of its own.
    pub async fn run(self) -> std::io::Result<()> {
        let listener = listen_tcp(&self.listen).await?;
        info!(addr = %self.listen, "accepting connections");
        let mut counter: u64 = 0;
        loop {
            let (stream, peer) = listener.accept().await?;
            counter += 1;
            let mut config = SessionConfig::new(format!("tcp_{counter}"));
            if let Some(name) = &self.local_name {
                config = config.with_remote_hint(name.clone());
            }
            if let Some((keepalive, timeout)) = self.timing {
                config.keepalive_interval = keepalive;
                config.disconnect_timeout = timeout;
            }
            let node = self.node.clone();
            tokio::spawn(async move {
                if let Err(err) = Session::run(stream, node, config).await {
                    warn!(%peer, %err, "session failed");
                }
            });
        }
    }
}

/// Dials a remote peer and keeps the connection alive, reconnecting
/// with exponential backoff after any failure.
pub struct Client {
    node: Arc<Node>,
    remote: String,
    link_name: String,
    local_name: Option<String>,
    timing: Option<(Duration, Duration)>,
}

impl Client {
    /// Build a client dialing `remote`, registering the link as `link_name`
    /// when the peer sends no hint of its own.
    pub fn new(node: Arc<Node>, remote: impl Into<String>, link_name: impl Into<String>) -> Self {
        Client {
            node,
            remote: remote.into(),
            link_name: link_name.into(),
            local_name: None,
            timing: None,
        }
    }

    /// Set the name peers are asked to register this node's link under.
    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }

    /// Override the keepalive interval and disconnect timeout for every
    /// dialed session.
    pub fn with_timing(mut self, keepalive: Duration, timeout: Duration) -> Self {
        self.timing = Some((keepalive, timeout));
        self
    }

    /// Dial and redial forever. Backoff starts at one second, doubles
    /// on repeated failure, caps at thirty seconds, and resets after
    /// any successful connection.
    pub async fn run(self) {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match connect_tcp(&self.remote).await {
                Ok(stream) => {
                    backoff = INITIAL_BACKOFF;
                    let mut config = SessionConfig::new(self.link_name.clone());
                    if let Some(name) = &self.local_name {
                        config = config.with_remote_hint(name.clone());
                    }
                    if let Some((keepalive, timeout)) = self.timing {
                        config.keepalive_interval = keepalive;
                        config.disconnect_timeout = timeout;
                    }
                    if let Err(err) = Session::run(stream, self.node.clone(), config).await {
                        warn!(remote = %self.remote, %err, "session ended with error");
                    }
                    // Brief pause so a crash loop on the far side does
                    // not turn into a tight dial loop here.
                    tokio::time::sleep(INITIAL_BACKOFF).await;
                }
                Err(err) => {
                    error!(remote = %self.remote, %err, "connect failed, retrying in {:?}", backoff);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use weft_registry::FnHandler;

    #[tokio::test]
    async fn test_client_connects_and_delivers() {
        let server_node = Arc::new(Node::new());
        let client_node = Arc::new(Node::new());

        let seen = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
        let record = seen.clone();
        server_node
            .publish(
                "sink",
                Arc::new(FnHandler(move |_source: Option<&str>, payload: &[u8]| {
                    record.lock().unwrap().push(payload.to_vec());
                })),
            )
            .unwrap();

        let listener = listen_tcp("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept_node = server_node.clone();
        let server = tokio::spawn(async move {
            let mut counter = 0u64;
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                counter += 1;
                let node = accept_node.clone();
                tokio::spawn(Session::run(
                    stream,
                    node,
                    SessionConfig::new(format!("tcp_{counter}")).with_remote_hint("server"),
                ));
            }
        });

        let client = tokio::spawn(
            Client::new(client_node.clone(), addr.to_string(), "server").run(),
        );

        for _ in 0..100 {
            if client_node.has_link("server") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        client_node.transmit(Some("server/sink"), None, b"one", None);
        for _ in 0..100 {
            if !seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(seen.lock().unwrap().as_slice(), &[b"one".to_vec()]);

        server.abort();
        client.abort();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delivery_resumes_after_session_death() {
        let server_node = Arc::new(Node::new());
        let client_node = Arc::new(Node::new());

        let seen = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
        let record = seen.clone();
        server_node
            .publish(
                "sink",
                Arc::new(FnHandler(move |_source: Option<&str>, payload: &[u8]| {
                    record.lock().unwrap().push(payload.to_vec());
                })),
            )
            .unwrap();

        let listener = listen_tcp("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (session_tx, mut session_rx) = tokio::sync::mpsc::unbounded_channel();
        let accept_node = server_node.clone();
        let server = tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let node = accept_node.clone();
                let _ = session_tx.send(tokio::spawn(Session::run(
                    stream,
                    node,
                    SessionConfig::new("inbound").with_remote_hint("server"),
                )));
            }
        });

        let client = tokio::spawn(
            Client::new(client_node.clone(), addr.to_string(), "server").run(),
        );

        for _ in 0..100 {
            if client_node.has_link("server") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        client_node.transmit(Some("server/sink"), None, b"before", None);
        for _ in 0..100 {
            if !seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(seen.lock().unwrap().as_slice(), &[b"before".to_vec()]);

        // Tear the live session down from the server side. Removing
        // the link closes the sender's queue, which closes the socket
        // under the client and ends its session.
        let first = session_rx.recv().await.unwrap();
        first.abort();
        server_node.remove_link("inbound");

        // The client notices, redials, and the replacement session
        // registers under the same link name.
        let _second = session_rx.recv().await.unwrap();
        let mut delivered = false;
        for _ in 0..200 {
            client_node.transmit(Some("server/sink"), None, b"after", None);
            if seen.lock().unwrap().iter().any(|p| p == b"after") {
                delivered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert!(delivered, "no delivery over the replacement session");

        server.abort();
        client.abort();
    }
}
