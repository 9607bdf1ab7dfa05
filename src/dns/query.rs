//! Wire-format DNS queries over plain UDP sockets, with a TCP retry when the
//! answer is truncated.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use hickory_proto::op::{Edns, Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use log::debug;

use super::error::DnsError;

/// EDNS0 advertised UDP payload size. Larger answers fall back to TCP.
const EDNS_MAX_PAYLOAD: u16 = 4096;

/// Stateless query client. Server rotation state is the only thing it holds,
/// so one instance can be shared freely.
#[derive(Debug)]
pub struct WireClient {
    timeout: Duration,
    rotation: AtomicUsize,
}

impl WireClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            rotation: AtomicUsize::new(0),
        }
    }

    /// Sends the query to the configured servers in round-robin order,
    /// allowing one extra attempt so every server gets tried even when the
    /// rotation starts on a dead one. The first parsed response wins,
    /// whatever its response code; interpreting the rcode is the caller's
    /// business.
    pub fn query(
        &self,
        servers: &[String],
        name: &Name,
        record_type: RecordType,
        recursion_desired: bool,
    ) -> Result<Message, DnsError> {
        if servers.is_empty() {
            return Err(DnsError::NoNameserversConfigured);
        }
        let start = self.rotation.fetch_add(1, Ordering::Relaxed);
        let mut last: Option<DnsError> = None;
        for step in 0..=servers.len() {
            let server = &servers[(start + step) % servers.len()];
            match self.query_one(server, name, record_type, recursion_desired) {
                Ok(response) => return Ok(response),
                Err(err) => {
                    debug!("[dns] {server} failed for {name} {record_type}: {err}");
                    last = Some(err);
                }
            }
        }
        Err(DnsError::AllNameserversFailed {
            last: last.map(|err| err.to_string()).unwrap_or_default(),
        })
    }

    /// One query against one server: UDP first, TCP when truncated.
    pub fn query_one(
        &self,
        server: &str,
        name: &Name,
        record_type: RecordType,
        recursion_desired: bool,
    ) -> Result<Message, DnsError> {
        let addr = resolve_server(server)?;
        let request = build_query(name, record_type, recursion_desired);
        let bytes = request.to_vec()?;

        let response = self.exchange_udp(addr, &bytes, request.id())?;
        if response.truncated() {
            debug!("[dns] truncated answer from {server}, retrying over tcp");
            return self.exchange_tcp(addr, &bytes);
        }
        Ok(response)
    }

    fn exchange_udp(
        &self,
        addr: SocketAddr,
        bytes: &[u8],
        id: u16,
    ) -> Result<Message, DnsError> {
        let bind_addr: SocketAddr = if addr.is_ipv6() {
            "[::]:0".parse().unwrap()
        } else {
            "0.0.0.0:0".parse().unwrap()
        };
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_read_timeout(Some(self.timeout))?;
        socket.set_write_timeout(Some(self.timeout))?;
        socket.connect(addr)?;
        socket.send(bytes)?;

        // Datagrams with the wrong transaction id are skipped until the
        // socket read timeout fires.
        let deadline = Instant::now() + self.timeout;
        let mut buf = [0u8; EDNS_MAX_PAYLOAD as usize];
        loop {
            let len = socket.recv(&mut buf)?;
            if let Ok(message) = Message::from_vec(&buf[..len])
                && message.id() == id
            {
                return Ok(message);
            }
            if Instant::now() >= deadline {
                return Err(std::io::Error::from(std::io::ErrorKind::TimedOut).into());
            }
        }
    }

    fn exchange_tcp(&self, addr: SocketAddr, bytes: &[u8]) -> Result<Message, DnsError> {
        use std::io::{Read, Write};

        let mut stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        // RFC 1035 §4.2.2 framing: two-byte big-endian length prefix.
        let len = u16::try_from(bytes.len())
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
        stream.write_all(&len.to_be_bytes())?;
        stream.write_all(bytes)?;

        let mut len_buf = [0u8; 2];
        stream.read_exact(&mut len_buf)?;
        let mut body = vec![0u8; u16::from_be_bytes(len_buf) as usize];
        stream.read_exact(&mut body)?;
        Ok(Message::from_vec(&body)?)
    }
}

fn build_query(name: &Name, record_type: RecordType, recursion_desired: bool) -> Message {
    let mut message = Message::new();
    message.set_id(rand::random());
    message.set_message_type(MessageType::Query);
    message.set_op_code(OpCode::Query);
    message.set_recursion_desired(recursion_desired);

    let mut query = Query::query(name.clone(), record_type);
    query.set_query_class(DNSClass::IN);
    message.add_query(query);

    let mut edns = Edns::new();
    edns.set_version(0);
    edns.set_max_payload(EDNS_MAX_PAYLOAD);
    *message.extensions_mut() = Some(edns);
    message
}

fn resolve_server(server: &str) -> Result<SocketAddr, DnsError> {
    server
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::AddrNotAvailable).into())
}

/// Appends `port` to a nameserver host unless it already carries one.
/// Handles bare IPv6 literals, which need brackets before a port can follow.
pub fn ensure_port(server: &str, port: u16) -> String {
    let host = server.trim_end_matches('.');
    if host.parse::<std::net::Ipv6Addr>().is_ok() {
        return format!("[{host}]:{port}");
    }
    if host.parse::<SocketAddr>().is_ok() {
        return host.to_string();
    }
    // "[v6]:port" parses above; what remains is host / host:port / v4.
    match host.rsplit_once(':') {
        Some((_, tail)) if tail.parse::<u16>().is_ok() => host.to_string(),
        _ => format!("{host}:{port}"),
    }
}

/// Joins a TXT record's character-strings into one value.
pub(crate) fn txt_value(data: &RData) -> Option<String> {
    match data {
        RData::TXT(txt) => Some(
            txt.txt_data()
                .iter()
                .map(|part| String::from_utf8_lossy(part))
                .collect(),
        ),
        _ => None,
    }
}

/// True when the response carries a CNAME owned by the queried name, meaning
/// the name is an alias rather than a zone cut candidate.
pub(crate) fn has_cname_at(message: &Message, owner: &Name) -> bool {
    message
        .answers()
        .iter()
        .any(|record| record.record_type() == RecordType::CNAME && record.name() == owner)
}

pub(crate) fn rcode_name(code: ResponseCode) -> String {
    code.to_string()
}
