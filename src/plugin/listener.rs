use crate::error::{Result, TransportError};
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};

/// Loopback listener that hands out exactly one connection.
pub struct PluginListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl PluginListener {
    /// Binds `addr`. There is no retry: a bind failure is fatal to startup.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        if !addr.ip().is_loopback() {
            return Err(TransportError::Bind {
                addr,
                source: io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "plugins only listen on loopback addresses",
                ),
            }
            .into());
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind { addr, source })?;

        tracing::info!(%local_addr, "Plugin listening");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts the single host connection and closes the listening socket.
    pub async fn accept_one(self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::Call(format!("accept failed: {e}")))?;
        stream.set_nodelay(true)?;
        tracing::info!(%peer, "Host connected");
        Ok((stream, peer))
    }
}
