//! ICMP echo probe with native sockets and a `ping` command fallback.
//!
//! Native echo runs on a blocking socket inside `spawn_blocking` so the
//! round trip is timed without scheduler noise.

use std::io::Read;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use super::ProbeError;

static NATIVE_ICMP: OnceLock<bool> = OnceLock::new();

static ECHO_SEQUENCE: AtomicU16 = AtomicU16::new(0);

/// Per-family ICMP constants.
struct EchoFamily {
    domain: Domain,
    protocol: Protocol,
    request_type: u8,
    reply_type: u8,
    /// Whether the kernel fills in the checksum (ICMPv6 does).
    kernel_checksum: bool,
}

const ECHO_V4: EchoFamily = EchoFamily {
    domain: Domain::IPV4,
    protocol: Protocol::ICMPV4,
    request_type: 8,
    reply_type: 0,
    kernel_checksum: false,
};

const ECHO_V6: EchoFamily = EchoFamily {
    domain: Domain::IPV6,
    protocol: Protocol::ICMPV6,
    request_type: 128,
    reply_type: 129,
    kernel_checksum: true,
};

fn detect_native_icmp() -> bool {
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (RAW socket, privileged)");
        return true;
    }
    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (DGRAM socket, unprivileged)");
        return true;
    }
    tracing::info!("Ping probe: native ICMP unavailable, using command fallback");
    false
}

/// Ping `address` once. Returns the round trip in milliseconds.
pub async fn run_ping_probe(address: &str, timeout: Duration) -> Result<f64, ProbeError> {
    if !*NATIVE_ICMP.get_or_init(detect_native_icmp) {
        return run_ping_command(address, timeout).await;
    }

    let ip = resolve_address(address).await?;
    let result = tokio::task::spawn_blocking(move || echo_blocking(ip, timeout))
        .await
        .map_err(|e| ProbeError::Network(format!("spawn_blocking failed: {}", e)))?;

    match result {
        Err(ProbeError::Network(msg)) if is_permission_error(&msg) => {
            tracing::warn!(
                "Native ping to {} not permitted, falling back to command: {}",
                address,
                msg
            );
            run_ping_command(address, timeout).await
        }
        other => other,
    }
}

fn is_permission_error(msg: &str) -> bool {
    msg.contains("Permission") || msg.contains("not permitted") || msg.contains("denied")
}

/// Resolve a hostname or literal address.
pub(crate) async fn resolve_address(address: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    let mut addrs = tokio::net::lookup_host(format!("{}:0", address))
        .await
        .map_err(|e| ProbeError::Network(format!("DNS resolution failed: {}", e)))?;

    addrs
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ProbeError::Network(format!("No addresses found for {}", address)))
}

fn echo_blocking(ip: IpAddr, timeout: Duration) -> Result<f64, ProbeError> {
    let family = match ip {
        IpAddr::V4(_) => &ECHO_V4,
        IpAddr::V6(_) => &ECHO_V6,
    };

    let (socket, raw) = match Socket::new(family.domain, Type::RAW, Some(family.protocol)) {
        Ok(socket) => (socket, true),
        Err(_) => {
            let socket = Socket::new(family.domain, Type::DGRAM, Some(family.protocol))
                .map_err(|e| ProbeError::Network(format!("Failed to create ICMP socket: {}", e)))?;
            (socket, false)
        }
    };
    socket
        .set_read_timeout(Some(timeout))
        .and_then(|_| socket.set_write_timeout(Some(timeout)))
        .map_err(|e| ProbeError::Network(format!("Failed to set timeout: {}", e)))?;
    socket
        .connect(&SocketAddr::new(ip, 0).into())
        .map_err(|e| ProbeError::Network(format!("Failed to connect: {}", e)))?;

    let identifier: u16 = rand::random();
    let sequence = ECHO_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let packet = build_echo_request(family, identifier, sequence);

    let start = Instant::now();
    socket.send(&packet).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            ProbeError::Network(format!("Permission denied: {}", e))
        } else {
            ProbeError::Network(format!("Failed to send: {}", e))
        }
    })?;

    let mut buf = [0u8; 1500];
    loop {
        let len = (&socket).read(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                ProbeError::Timeout(timeout)
            }
            _ => ProbeError::Network(format!("Failed to receive: {}", e)),
        })?;
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(ProbeError::Timeout(timeout));
        }

        // DGRAM sockets rewrite the identifier and only see their own replies
        let expected_id = raw.then_some(identifier);
        if is_echo_reply(family, &buf[..len], expected_id, sequence) {
            return Ok(elapsed.as_secs_f64() * 1000.0);
        }
        // someone else's packet, keep waiting
    }
}

/// Build an echo request with an 8 byte header and 56 byte payload.
fn build_echo_request(family: &EchoFamily, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64];
    packet[0] = family.request_type;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let stamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    packet[8..16].copy_from_slice(&stamp.to_be_bytes());

    if !family.kernel_checksum {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }
    packet
}

/// Match a received datagram against our request. RAW IPv4 sockets
/// deliver the IP header too, so skip it when present. `identifier` is
/// `None` when the kernel owns it.
fn is_echo_reply(
    family: &EchoFamily,
    buf: &[u8],
    identifier: Option<u16>,
    sequence: u16,
) -> bool {
    let offset = if family.reply_type == 0 && buf.first().map(|b| b >> 4) == Some(4) {
        usize::from(buf[0] & 0x0f) * 4
    } else {
        0
    };
    let Some(icmp) = buf.get(offset..offset + 8) else {
        return false;
    };

    icmp[0] == family.reply_type
        && identifier.map_or(true, |id| u16::from_be_bytes([icmp[4], icmp[5]]) == id)
        && u16::from_be_bytes([icmp[6], icmp[7]]) == sequence
}

/// Compute ICMP checksum (RFC 1071).
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u32::from(u16::from_be_bytes([*hi, *lo])),
            [hi] => u32::from(*hi) << 8,
            _ => 0,
        })
        .sum();

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Run ping via the system `ping` command.
async fn run_ping_command(address: &str, timeout: Duration) -> Result<f64, ProbeError> {
    let timeout_secs = timeout.as_secs().max(1);

    let output = Command::new("ping")
        .args(["-c", "1", "-W", &timeout_secs.to_string(), address])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("timeout") || stdout.contains("100% packet loss") || stdout.contains("100.0% packet loss") {
            return Err(ProbeError::Timeout(timeout));
        }
        return Err(ProbeError::Command(format!("ping failed: {}", stdout.trim())));
    }

    parse_ping_output(&stdout)
}

/// Pull the round trip in milliseconds out of `ping` output.
fn parse_ping_output(output: &str) -> Result<f64, ProbeError> {
    static PATTERNS: OnceLock<Vec<(Regex, usize)>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            // per-packet line, "time=12.3 ms"
            (r"time[=<]([0-9.]+)\s*ms", 1),
            // BSD/macOS summary, use the average
            (r"round-trip\s+min/avg/max/stddev\s*=\s*([0-9.]+)/([0-9.]+)/([0-9.]+)", 2),
            // Linux summary
            (r"rtt\s+min/avg/max/mdev\s*=\s*([0-9.]+)/([0-9.]+)/([0-9.]+)", 2),
        ]
        .into_iter()
        .filter_map(|(re, group)| Regex::new(re).ok().map(|re| (re, group)))
        .collect()
    });

    patterns
        .iter()
        .find_map(|(re, group)| {
            re.captures(output)
                .and_then(|caps| caps.get(*group))
                .and_then(|m| m.as_str().parse::<f64>().ok())
        })
        .ok_or_else(|| ProbeError::Command(format!("failed to parse ping output: {}", output)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icmp_checksum_verifies() {
        let packet = build_echo_request(&ECHO_V4, 0x1234, 0x0001);
        // a packet with a valid checksum sums to zero
        assert_eq!(icmp_checksum(&packet), 0);
    }

    #[test]
    fn test_icmp_checksum_odd_length() {
        assert_eq!(icmp_checksum(&[0x08]), !0x0800);
    }

    #[test]
    fn test_build_echo_request() {
        let packet = build_echo_request(&ECHO_V4, 0x1234, 0x0001);
        assert_eq!(packet.len(), 64);
        assert_eq!(packet[0], 8);
        assert_eq!(packet[1], 0);
        assert_eq!(packet[4..6], [0x12, 0x34]);
        assert_eq!(packet[6..8], [0x00, 0x01]);

        let v6 = build_echo_request(&ECHO_V6, 0x1234, 0x0001);
        assert_eq!(v6[0], 128);
        assert_eq!(v6[2..4], [0, 0]);
    }

    #[test]
    fn test_is_echo_reply() {
        let mut reply = vec![0u8; 8];
        reply[4..6].copy_from_slice(&0xBEEFu16.to_be_bytes());
        reply[6..8].copy_from_slice(&7u16.to_be_bytes());
        assert!(is_echo_reply(&ECHO_V4, &reply, Some(0xBEEF), 7));
        assert!(!is_echo_reply(&ECHO_V4, &reply, Some(0xBEEF), 8));
        assert!(!is_echo_reply(&ECHO_V4, &reply, Some(0xBEEE), 7));
        assert!(is_echo_reply(&ECHO_V4, &reply, None, 7));

        // same reply behind a 20 byte IPv4 header
        let mut with_header = vec![0u8; 20];
        with_header[0] = 0x45;
        with_header.extend_from_slice(&reply);
        assert!(is_echo_reply(&ECHO_V4, &with_header, Some(0xBEEF), 7));

        assert!(!is_echo_reply(&ECHO_V4, &reply[..4], Some(0xBEEF), 7));
    }

    #[test]
    fn test_parse_ping_output_linux() {
        let output = "64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=12.345 ms";
        let latency = parse_ping_output(output).unwrap();
        assert!((latency - 12.345).abs() < 1e-9);
    }

    #[test]
    fn test_parse_ping_output_macos_summary() {
        let output = r#"PING google.com (142.250.69.174): 56 data bytes

--- google.com ping statistics ---
1 packets transmitted, 1 packets received, 0.0% packet loss
round-trip min/avg/max/stddev = 17.906/17.906/17.906/0.000 ms"#;
        let latency = parse_ping_output(output).unwrap();
        assert!((latency - 17.906).abs() < 1e-9);
    }

    #[test]
    fn test_parse_ping_output_garbage() {
        assert!(parse_ping_output("ping: unknown host").is_err());
    }
}
