//! TCP connect probe.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;

use super::ping::resolve_address;
use super::ProbeError;

/// Time a TCP handshake to `address:port`. Returns milliseconds.
pub async fn run_tcp_probe(address: &str, port: u16, timeout: Duration) -> Result<f64, ProbeError> {
    if port == 0 {
        return Err(ProbeError::Config("TCP ping needs a port".to_string()));
    }
    let ip = resolve_address(address).await?;
    let target = SocketAddr::new(ip, port);

    let start = Instant::now();
    match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
        Ok(Ok(_stream)) => Ok(start.elapsed().as_secs_f64() * 1000.0),
        Ok(Err(e)) => Err(ProbeError::Network(format!("connect to {} failed: {}", target, e))),
        Err(_) => Err(ProbeError::Timeout(timeout)),
    }
}
