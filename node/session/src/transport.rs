//! TCP listen and connect helpers.

use std::io;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::debug;

/// Bind a TCP listener on the given address.
pub async fn listen_tcp<A: ToSocketAddrs>(addr: A) -> io::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    debug!(addr = %listener.local_addr()?, "listening");
    Ok(listener)
}

/// Open a TCP connection to the given address.
pub async fn connect_tcp<A: ToSocketAddrs>(addr: A) -> io::Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    debug!(peer = %stream.peer_addr()?, "connected");
    Ok(stream)
}
