//! SNMP v1/v2c reachability probe.
//!
//! Sends a GET for `sysUpTime.0` over UDP and times the reply. Any
//! well-formed response carrying our request id means the agent is alive,
//! even if it reports an error for the OID.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;

use super::ping::resolve_address;
use super::ProbeError;

/// 1.3.6.1.2.1.1.3.0
pub const SYS_UPTIME_OID: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 3, 0];

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_TIMETICKS: u8 = 0x43;
pub const PDU_GET_REQUEST: u8 = 0xA0;
pub const PDU_GET_RESPONSE: u8 = 0xA2;

/// Where and how to query an SNMP agent.
#[derive(Debug, Clone)]
pub struct SnmpTarget {
    pub host: String,
    pub port: u16,
    pub community: String,
    /// 1, 2 (v2c) or 3.
    pub version: u8,
    pub timeout: Duration,
}

/// A decoded SNMP message.
#[derive(Debug, Clone, PartialEq)]
pub struct SnmpPdu {
    pub pdu_type: u8,
    pub request_id: i32,
    pub error_status: i64,
    /// First varbind value, when it is a TimeTicks.
    pub uptime_ticks: Option<u64>,
}

/// Successful probe outcome.
#[derive(Debug, Clone)]
pub struct SnmpReply {
    pub pdu: SnmpPdu,
    pub latency_ms: f64,
}

/// Query `sysUpTime.0` and return the round trip.
pub async fn run_snmp_probe(target: &SnmpTarget) -> Result<SnmpReply, ProbeError> {
    let version = wire_version(target.version)?;
    let ip = resolve_address(&target.host).await?;
    let agent = SocketAddr::new(ip, target.port);

    let bind_addr = if ip.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind_addr)
        .await
        .map_err(|e| ProbeError::Network(format!("failed to bind socket: {}", e)))?;
    socket
        .connect(agent)
        .await
        .map_err(|e| ProbeError::Network(format!("failed to connect: {}", e)))?;

    let request_id = rand::random::<i32>() & i32::MAX;
    let packet = encode_message(
        version,
        &target.community,
        PDU_GET_REQUEST,
        request_id,
        SYS_UPTIME_OID,
        &tlv(TAG_NULL, &[]),
    );

    let start = Instant::now();
    let deadline = tokio::time::Instant::now() + target.timeout;
    socket
        .send(&packet)
        .await
        .map_err(|e| ProbeError::Network(format!("failed to send: {}", e)))?;

    let mut buf = [0u8; 1500];
    loop {
        let n = match tokio::time::timeout_at(deadline, socket.recv(&mut buf)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(ProbeError::Network(format!("failed to recv: {}", e))),
            Err(_) => return Err(ProbeError::Timeout(target.timeout)),
        };
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        match decode_message(&buf[..n]) {
            Ok(pdu) if pdu.pdu_type == PDU_GET_RESPONSE && pdu.request_id == request_id => {
                return Ok(SnmpReply { pdu, latency_ms });
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!("Ignoring undecodable SNMP datagram from {}: {}", agent, e);
                continue;
            }
        }
    }
}

/// Version field value on the wire.
fn wire_version(version: u8) -> Result<i64, ProbeError> {
    match version {
        1 => Ok(0),
        2 => Ok(1),
        3 => Err(ProbeError::Config("SNMPv3 is not supported".to_string())),
        other => Err(ProbeError::Config(format!("unknown SNMP version {}", other))),
    }
}

/// Encode a single-varbind SNMP message.
pub fn encode_message(
    version: i64,
    community: &str,
    pdu_type: u8,
    request_id: i32,
    oid: &[u32],
    value_tlv: &[u8],
) -> Vec<u8> {
    let varbind = tlv(TAG_SEQUENCE, &[tlv(TAG_OID, &encode_oid(oid)), value_tlv.to_vec()].concat());
    let varbinds = tlv(TAG_SEQUENCE, &varbind);

    let pdu = tlv(
        pdu_type,
        &[
            tlv(TAG_INTEGER, &encode_integer(i64::from(request_id))),
            tlv(TAG_INTEGER, &encode_integer(0)),
            tlv(TAG_INTEGER, &encode_integer(0)),
            varbinds,
        ]
        .concat(),
    );

    tlv(
        TAG_SEQUENCE,
        &[
            tlv(TAG_INTEGER, &encode_integer(version)),
            tlv(TAG_OCTET_STRING, community.as_bytes()),
            pdu,
        ]
        .concat(),
    )
}

/// Decode the header fields of an SNMP v1/v2c message.
pub fn decode_message(buf: &[u8]) -> Result<SnmpPdu, ProbeError> {
    let (message, _) = expect(buf, TAG_SEQUENCE)?;
    let (_version, rest) = expect(message, TAG_INTEGER)?;
    let (_community, rest) = expect(rest, TAG_OCTET_STRING)?;

    let (pdu_type, pdu, _) = read_tlv(rest)?;
    let (request_id, rest) = expect(pdu, TAG_INTEGER)?;
    let (error_status, rest) = expect(rest, TAG_INTEGER)?;
    let (_error_index, rest) = expect(rest, TAG_INTEGER)?;

    let request_id = i32::try_from(decode_integer(request_id)?)
        .map_err(|_| ProbeError::Protocol("request id out of range".to_string()))?;

    Ok(SnmpPdu {
        pdu_type,
        request_id,
        error_status: decode_integer(error_status)?,
        uptime_ticks: first_timeticks(rest),
    })
}

fn first_timeticks(varbinds: &[u8]) -> Option<u64> {
    let (list, _) = expect(varbinds, TAG_SEQUENCE).ok()?;
    let (varbind, _) = expect(list, TAG_SEQUENCE).ok()?;
    let (_oid, rest) = expect(varbind, TAG_OID).ok()?;
    match read_tlv(rest).ok()? {
        (TAG_TIMETICKS, value, _) if !value.is_empty() && value.len() <= 8 => {
            Some(value.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
        }
        _ => None,
    }
}

fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 4);
    out.push(tag);
    if content.len() < 0x80 {
        out.push(content.len() as u8);
    } else {
        let len = content.len().to_be_bytes();
        let skip = len.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (len.len() - skip) as u8);
        out.extend_from_slice(&len[skip..]);
    }
    out.extend_from_slice(content);
    out
}

/// Minimal two's complement encoding.
fn encode_integer(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

fn encode_oid(oid: &[u32]) -> Vec<u8> {
    let mut out = Vec::new();
    if let [first, second, rest @ ..] = oid {
        push_base128(&mut out, first * 40 + second);
        for arc in rest {
            push_base128(&mut out, *arc);
        }
    }
    out
}

fn push_base128(out: &mut Vec<u8>, value: u32) {
    let mut groups = vec![(value & 0x7f) as u8];
    let mut v = value >> 7;
    while v > 0 {
        groups.push((v & 0x7f) as u8 | 0x80);
        v >>= 7;
    }
    out.extend(groups.iter().rev());
}

fn read_tlv(buf: &[u8]) -> Result<(u8, &[u8], &[u8]), ProbeError> {
    let short = || ProbeError::Protocol("truncated message".to_string());
    let (&tag, rest) = buf.split_first().ok_or_else(short)?;
    let (&first, rest) = rest.split_first().ok_or_else(short)?;

    let (len, rest) = if first < 0x80 {
        (usize::from(first), rest)
    } else {
        let count = usize::from(first & 0x7f);
        if count == 0 || count > 4 || rest.len() < count {
            return Err(ProbeError::Protocol(format!("bad length encoding 0x{:02x}", first)));
        }
        let len = rest[..count]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
        (len, &rest[count..])
    };

    if rest.len() < len {
        return Err(short());
    }
    Ok((tag, &rest[..len], &rest[len..]))
}

fn expect(buf: &[u8], tag: u8) -> Result<(&[u8], &[u8]), ProbeError> {
    let (found, content, rest) = read_tlv(buf)?;
    if found != tag {
        return Err(ProbeError::Protocol(format!(
            "expected tag 0x{:02x}, found 0x{:02x}",
            tag, found
        )));
    }
    Ok((content, rest))
}

fn decode_integer(content: &[u8]) -> Result<i64, ProbeError> {
    if content.is_empty() || content.len() > 8 {
        return Err(ProbeError::Protocol(format!(
            "integer of {} bytes",
            content.len()
        )));
    }
    let negative = content[0] & 0x80 != 0;
    let init: i64 = if negative { -1 } else { 0 };
    Ok(content
        .iter()
        .fold(init, |acc, b| (acc << 8) | i64::from(*b)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeticks(value: u32) -> Vec<u8> {
        let bytes = value.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count().min(3);
        tlv(TAG_TIMETICKS, &bytes[skip..])
    }

    #[test]
    fn test_encode_integer() {
        assert_eq!(encode_integer(0), vec![0x00]);
        assert_eq!(encode_integer(127), vec![0x7f]);
        assert_eq!(encode_integer(128), vec![0x00, 0x80]);
        assert_eq!(encode_integer(256), vec![0x01, 0x00]);
        assert_eq!(encode_integer(-1), vec![0xff]);
        assert_eq!(encode_integer(-129), vec![0xff, 0x7f]);
    }

    #[test]
    fn test_decode_integer_sign() {
        assert_eq!(decode_integer(&[0xff, 0x7f]).unwrap(), -129);
        assert_eq!(decode_integer(&[0x00, 0x80]).unwrap(), 128);
        assert!(decode_integer(&[]).is_err());
    }

    #[test]
    fn test_encode_oid() {
        assert_eq!(encode_oid(SYS_UPTIME_OID), vec![0x2b, 6, 1, 2, 1, 1, 3, 0]);
        assert_eq!(encode_oid(&[1, 3, 6, 1, 4, 1, 2021]), vec![0x2b, 6, 1, 4, 1, 0x8f, 0x65]);
    }

    #[test]
    fn test_long_form_length() {
        let content = vec![0u8; 300];
        let encoded = tlv(TAG_OCTET_STRING, &content);
        assert_eq!(&encoded[..4], &[0x04, 0x82, 0x01, 0x2c]);

        let (tag, body, rest) = read_tlv(&encoded).unwrap();
        assert_eq!(tag, TAG_OCTET_STRING);
        assert_eq!(body.len(), 300);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_get_request_layout() {
        let packet = encode_message(1, "public", PDU_GET_REQUEST, 1, SYS_UPTIME_OID, &tlv(TAG_NULL, &[]));
        assert_eq!(packet.len(), 40);
        assert_eq!(&packet[..5], &[0x30, 0x26, 0x02, 0x01, 0x01]);
        assert_eq!(&packet[5..13], b"\x04\x06public");
    }

    #[test]
    fn test_decode_response_with_uptime() {
        let packet = encode_message(
            1,
            "public",
            PDU_GET_RESPONSE,
            0x1234_5678,
            SYS_UPTIME_OID,
            &timeticks(987_654),
        );
        let pdu = decode_message(&packet).unwrap();
        assert_eq!(
            pdu,
            SnmpPdu {
                pdu_type: PDU_GET_RESPONSE,
                request_id: 0x1234_5678,
                error_status: 0,
                uptime_ticks: Some(987_654),
            }
        );
    }

    #[test]
    fn test_decode_truncated() {
        let packet = encode_message(0, "public", PDU_GET_RESPONSE, 9, SYS_UPTIME_OID, &timeticks(1));
        assert!(decode_message(&packet[..packet.len() - 3]).is_err());
        assert!(decode_message(&[]).is_err());
    }

    #[test]
    fn test_wire_version() {
        assert_eq!(wire_version(1).unwrap(), 0);
        assert_eq!(wire_version(2).unwrap(), 1);
        assert!(matches!(wire_version(3), Err(ProbeError::Config(_))));
    }

    #[tokio::test]
    async fn test_snmp_probe_against_local_agent() {
        let agent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = agent.local_addr().unwrap().port();

        tokio::spawn(async move {
            let mut buf = [0u8; 1500];
            let (n, peer) = agent.recv_from(&mut buf).await.unwrap();
            let request = decode_message(&buf[..n]).unwrap();
            assert_eq!(request.pdu_type, PDU_GET_REQUEST);

            let response = encode_message(
                1,
                "public",
                PDU_GET_RESPONSE,
                request.request_id,
                SYS_UPTIME_OID,
                &timeticks(4242),
            );
            agent.send_to(&response, peer).await.unwrap();
        });

        let target = SnmpTarget {
            host: "127.0.0.1".to_string(),
            port,
            community: "public".to_string(),
            version: 2,
            timeout: Duration::from_secs(2),
        };
        let reply = run_snmp_probe(&target).await.unwrap();
        assert_eq!(reply.pdu.uptime_ticks, Some(4242));
        assert!(reply.latency_ms >= 0.0);
    }

    #[tokio::test]
    async fn test_snmp_probe_times_out() {
        // bound but never answers
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = SnmpTarget {
            host: "127.0.0.1".to_string(),
            port: silent.local_addr().unwrap().port(),
            community: "public".to_string(),
            version: 1,
            timeout: Duration::from_millis(100),
        };
        let result = run_snmp_probe(&target).await;
        assert!(matches!(result, Err(ProbeError::Timeout(_))));
    }
}
