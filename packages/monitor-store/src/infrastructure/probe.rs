//! Replay target reachability probe
//!
//! Resolves the host, then opens (and immediately drops) a TCP connection to
//! the first resolved address. Each step runs under the probe deadline; when
//! it expires the pending future is dropped and the server counts as
//! unreachable. Only a lookup that fails outright means an unknown host.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use crate::domain::HostProbe;
use crate::{Result, StoreError};

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpHostProbe;

#[async_trait]
impl HostProbe for TcpHostProbe {
    async fn probe(&self, host: &str, port: u16, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        let addr = match timeout_at(deadline, lookup_host((host, port))).await {
            Ok(Ok(mut addrs)) => addrs.next().ok_or_else(|| StoreError::unknown_host(host))?,
            Ok(Err(e)) => {
                debug!("Host lookup for {} failed: {}", host, e);
                return Err(StoreError::unknown_host(host).with_source(e));
            }
            Err(_) => {
                debug!("Host lookup for {} timed out after {:?}", host, timeout);
                return Err(StoreError::server_unreachable(host, port));
            }
        };

        match timeout_at(deadline, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => {
                debug!("Connect to {} failed: {}", addr, e);
                Err(StoreError::server_unreachable(host, port).with_source(e))
            }
            Err(_) => {
                debug!("Probe of {}:{} timed out after {:?}", host, port, timeout);
                Err(StoreError::server_unreachable(host, port))
            }
        }
    }
}
