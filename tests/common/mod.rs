//! Shared test infrastructure: a scriptable DNS server and a minimal ACME
//! CA, both bound to loopback ports picked by the OS.

// Each test target compiles its own copy, so not every helper is used
// everywhere.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use base64::Engine;
use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::rdata::{CNAME, NS, SOA, TXT};
use hickory_proto::rr::{Name, RData, Record, RecordType};

pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .is_test(true)
        .try_init();
}

pub const LEAF_PEM: &str = "-----BEGIN CERTIFICATE-----\nbGVhZg==\n-----END CERTIFICATE-----\n";
pub const ISSUER_PEM: &str =
    "-----BEGIN CERTIFICATE-----\naXNzdWVy\n-----END CERTIFICATE-----\n";

// --- Mock DNS server ---

#[derive(Debug, Clone)]
struct Reply {
    rcode: ResponseCode,
    answers: Vec<Record>,
}

#[derive(Debug, Default)]
struct DnsState {
    replies: Mutex<HashMap<(String, RecordType), Reply>>,
    log: Mutex<Vec<(String, RecordType, bool)>>,
    truncate_udp: AtomicBool,
    tcp_queries: AtomicUsize,
    stop: AtomicBool,
}

/// A DNS responder scripted per (owner, record type), listening on the same
/// port over UDP and TCP. Unscripted names answer NXDOMAIN. Every query is
/// logged with its recursion-desired flag.
pub struct MockDnsServer {
    addr: SocketAddr,
    state: Arc<DnsState>,
}

impl MockDnsServer {
    pub fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(Duration::from_millis(50)))?;
        let state = Arc::new(DnsState::default());

        let udp_state = Arc::clone(&state);
        std::thread::spawn(move || serve_dns_udp(socket, udp_state));
        let tcp_state = Arc::clone(&state);
        std::thread::spawn(move || serve_dns_tcp(listener, tcp_state));
        Ok(Self { addr, state })
    }

    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    /// Every query seen so far, as (owner, type, recursion desired).
    pub fn queries(&self) -> Vec<(String, RecordType, bool)> {
        self.state.log.lock().unwrap().clone()
    }

    /// Answer UDP queries with the truncation bit set and no answers,
    /// forcing clients onto TCP for the real data.
    pub fn truncate_udp(&self, enabled: bool) {
        self.state.truncate_udp.store(enabled, Ordering::SeqCst);
    }

    pub fn tcp_query_count(&self) -> usize {
        self.state.tcp_queries.load(Ordering::SeqCst)
    }

    pub fn set_soa(&self, owner: &str, zone: &str) {
        let zone_name = Name::from_ascii(zone).unwrap();
        let soa = SOA::new(
            Name::from_ascii(&format!("ns1.{zone}")).unwrap(),
            Name::from_ascii(&format!("hostmaster.{zone}")).unwrap(),
            2024010101,
            3600,
            600,
            86400,
            300,
        );
        let record = Record::from_rdata(zone_name, 300, RData::SOA(soa));
        self.script(owner, RecordType::SOA, ResponseCode::NoError, vec![record]);
    }

    /// A CNAME at the owner of a SOA query, which the zone walk must treat
    /// as "not the apex".
    pub fn set_cname_at_soa(&self, owner: &str, target: &str) {
        let record = Record::from_rdata(
            Name::from_ascii(owner).unwrap(),
            300,
            RData::CNAME(CNAME(Name::from_ascii(target).unwrap())),
        );
        self.script(owner, RecordType::SOA, ResponseCode::NoError, vec![record]);
    }

    pub fn set_cname(&self, owner: &str, target: &str) {
        let record = Record::from_rdata(
            Name::from_ascii(owner).unwrap(),
            300,
            RData::CNAME(CNAME(Name::from_ascii(target).unwrap())),
        );
        self.script(owner, RecordType::CNAME, ResponseCode::NoError, vec![record]);
    }

    pub fn set_ns(&self, zone: &str, hosts: &[&str]) {
        let answers = hosts
            .iter()
            .map(|host| {
                Record::from_rdata(
                    Name::from_ascii(zone).unwrap(),
                    300,
                    RData::NS(NS(Name::from_ascii(host).unwrap())),
                )
            })
            .collect();
        self.script(zone, RecordType::NS, ResponseCode::NoError, answers);
    }

    pub fn set_txt(&self, owner: &str, values: &[&str]) {
        let answers = values
            .iter()
            .map(|value| {
                Record::from_rdata(
                    Name::from_ascii(owner).unwrap(),
                    60,
                    RData::TXT(TXT::new(vec![value.to_string()])),
                )
            })
            .collect();
        self.script(owner, RecordType::TXT, ResponseCode::NoError, answers);
    }

    pub fn clear_txt(&self, owner: &str) {
        self.state
            .replies
            .lock()
            .unwrap()
            .remove(&(normalize(owner), RecordType::TXT));
    }

    pub fn set_rcode(&self, owner: &str, record_type: RecordType, rcode: ResponseCode) {
        self.script(owner, record_type, rcode, Vec::new());
    }

    fn script(&self, owner: &str, record_type: RecordType, rcode: ResponseCode, answers: Vec<Record>) {
        self.state
            .replies
            .lock()
            .unwrap()
            .insert((normalize(owner), record_type), Reply { rcode, answers });
    }
}

impl Drop for MockDnsServer {
    fn drop(&mut self) {
        self.state.stop.store(true, Ordering::SeqCst);
    }
}

fn normalize(owner: &str) -> String {
    let lower = owner.to_ascii_lowercase();
    if lower.ends_with('.') { lower } else { format!("{lower}.") }
}

/// Builds the scripted reply for one request, logging the query. With
/// `truncate` the response carries the TC bit and no answers.
fn scripted_response(state: &DnsState, request: &Message, truncate: bool) -> Option<Message> {
    let query = request.queries().first().cloned()?;
    let owner = normalize(&query.name().to_ascii());
    let record_type = query.query_type();
    state
        .log
        .lock()
        .unwrap()
        .push((owner.clone(), record_type, request.recursion_desired()));

    let reply = state
        .replies
        .lock()
        .unwrap()
        .get(&(owner, record_type))
        .cloned()
        .unwrap_or(Reply {
            rcode: ResponseCode::NXDomain,
            answers: Vec::new(),
        });

    let mut response = Message::new();
    response.set_id(request.id());
    response.set_message_type(MessageType::Response);
    response.set_recursion_desired(request.recursion_desired());
    response.set_recursion_available(true);
    response.set_authoritative(true);
    response.set_truncated(truncate);
    response.set_response_code(reply.rcode);
    response.add_query(query);
    if !truncate {
        for answer in reply.answers {
            response.add_answer(answer);
        }
    }
    Some(response)
}

fn serve_dns_udp(socket: UdpSocket, state: Arc<DnsState>) {
    let mut buf = [0u8; 4096];
    while !state.stop.load(Ordering::SeqCst) {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(_) => continue,
        };
        let Ok(request) = Message::from_vec(&buf[..len]) else {
            continue;
        };
        let truncate = state.truncate_udp.load(Ordering::SeqCst);
        let Some(response) = scripted_response(&state, &request, truncate) else {
            continue;
        };
        if let Ok(bytes) = response.to_vec() {
            let _ = socket.send_to(&bytes, src);
        }
    }
}

fn serve_dns_tcp(listener: TcpListener, state: Arc<DnsState>) {
    while !state.stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                let _ = serve_dns_tcp_stream(stream, &state);
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(_) => break,
        }
    }
}

fn serve_dns_tcp_stream(mut stream: TcpStream, state: &DnsState) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_millis(200)))?;

    // RFC 1035 framing: two-byte big-endian length prefix both ways.
    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf)?;
    let mut body = vec![0u8; u16::from_be_bytes(len_buf) as usize];
    stream.read_exact(&mut body)?;
    let Ok(request) = Message::from_vec(&body) else {
        return Ok(());
    };
    state.tcp_queries.fetch_add(1, Ordering::SeqCst);
    let Some(response) = scripted_response(state, &request, false) else {
        return Ok(());
    };
    let Ok(bytes) = response.to_vec() else {
        return Ok(());
    };
    stream.write_all(&(bytes.len() as u16).to_be_bytes())?;
    stream.write_all(&bytes)?;
    stream.flush()
}

// --- Mock ACME CA ---

#[derive(Debug)]
struct AcmeState {
    nonce_counter: AtomicUsize,
    post_count: AtomicUsize,
    /// Number of POSTs still to be rejected with a badNonce problem.
    bad_nonce_failures: AtomicUsize,
    finalized: AtomicBool,
    identifiers: Vec<String>,
    /// Per-challenge accepted flags, indexed like `identifiers`.
    accepted: Mutex<Vec<bool>>,
}

/// A single-account, single-order ACME CA speaking just enough HTTP for the
/// client under test, with one authorization and challenge per identifier.
/// Signatures are not verified; the state machine is.
pub struct MockAcmeServer {
    addr: SocketAddr,
    state: Arc<AcmeState>,
}

impl MockAcmeServer {
    pub fn start() -> Result<Self> {
        Self::start_with_identifiers(&["example.com"])
    }

    pub fn start_with_identifiers(identifiers: &[&str]) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let state = Arc::new(AcmeState {
            nonce_counter: AtomicUsize::new(0),
            post_count: AtomicUsize::new(0),
            bad_nonce_failures: AtomicUsize::new(0),
            finalized: AtomicBool::new(false),
            identifiers: identifiers.iter().map(|value| value.to_string()).collect(),
            accepted: Mutex::new(vec![false; identifiers.len()]),
        });

        let thread_state = Arc::clone(&state);
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let state = Arc::clone(&thread_state);
                let base = format!("http://{addr}");
                std::thread::spawn(move || {
                    let _ = serve_acme(stream, &state, &base);
                });
            }
        });
        Ok(Self { addr, state })
    }

    pub fn directory_url(&self) -> String {
        format!("http://{}/dir", self.addr)
    }

    /// Reject the next `count` POSTs with a badNonce problem document.
    pub fn fail_with_bad_nonce(&self, count: usize) {
        self.state.bad_nonce_failures.store(count, Ordering::SeqCst);
    }

    pub fn post_count(&self) -> usize {
        self.state.post_count.load(Ordering::SeqCst)
    }

    /// True once every challenge of the order has been accepted.
    pub fn challenge_accepted(&self) -> bool {
        let accepted = self.state.accepted.lock().unwrap();
        !accepted.is_empty() && accepted.iter().all(|flag| *flag)
    }

    pub fn accepted_count(&self) -> usize {
        self.state
            .accepted
            .lock()
            .unwrap()
            .iter()
            .filter(|flag| **flag)
            .count()
    }
}

fn serve_acme(stream: TcpStream, state: &Arc<AcmeState>, base: &str) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut stream = stream;
    loop {
        let mut request_line = String::new();
        if reader.read_line(&mut request_line)? == 0 {
            return Ok(());
        }
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default().to_string();
        let path = parts.next().unwrap_or_default().to_string();

        let mut content_length = 0usize;
        loop {
            let mut header = String::new();
            reader.read_line(&mut header)?;
            let header = header.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some(value) = header
                .to_ascii_lowercase()
                .strip_prefix("content-length:")
                .map(str::trim)
            {
                content_length = value.parse().unwrap_or(0);
            }
        }
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body)?;
        let body = String::from_utf8_lossy(&body).to_string();

        respond(&mut stream, state, base, &method, &path, &body)?;
    }
}

fn respond(
    stream: &mut TcpStream,
    state: &Arc<AcmeState>,
    base: &str,
    method: &str,
    path: &str,
    body: &str,
) -> std::io::Result<()> {
    let nonce = format!("nonce-{}", state.nonce_counter.fetch_add(1, Ordering::SeqCst));
    if method == "POST" {
        state.post_count.fetch_add(1, Ordering::SeqCst);
        let failures = &state.bad_nonce_failures;
        if failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok()
        {
            let problem =
                r#"{"type":"urn:ietf:params:acme:error:badNonce","detail":"stale nonce"}"#;
            return write_response(stream, 400, &nonce, &[], problem, method);
        }
    }

    let identifiers = &state.identifiers;
    let accepted = state.accepted.lock().unwrap().clone();
    let finalized = state.finalized.load(Ordering::SeqCst);

    match (method, path) {
        ("GET", "/dir") => {
            let dir = serde_json::json!({
                "newNonce": format!("{base}/new-nonce"),
                "newAccount": format!("{base}/new-account"),
                "newOrder": format!("{base}/new-order"),
                "revokeCert": format!("{base}/revoke-cert"),
                "meta": {"termsOfService": format!("{base}/tos")}
            });
            write_response(stream, 200, &nonce, &[], &dir.to_string(), method)
        }
        ("HEAD", "/new-nonce") => write_response(stream, 200, &nonce, &[], "", method),
        ("POST", "/new-account") => {
            let account = r#"{"status":"valid","contact":[]}"#;
            let location = format!("Location: {base}/acct/1");
            write_response(stream, 201, &nonce, &[&location], account, method)
        }
        ("POST", "/new-order") => {
            let order = order_json(base, identifiers, &accepted, finalized);
            let location = format!("Location: {base}/order/1");
            write_response(stream, 201, &nonce, &[&location], &order, method)
        }
        ("POST", "/order/1") => {
            let order = order_json(base, identifiers, &accepted, finalized);
            write_response(stream, 200, &nonce, &[], &order, method)
        }
        ("POST", "/order/1/finalize") => {
            state.finalized.store(true, Ordering::SeqCst);
            let order = order_json(base, identifiers, &accepted, true);
            write_response(stream, 200, &nonce, &[], &order, method)
        }
        ("POST", path) if resource_index(path, "/authz/", identifiers.len()).is_some() => {
            let index = resource_index(path, "/authz/", identifiers.len()).unwrap();
            let authz = serde_json::json!({
                "identifier": {"type": "dns", "value": identifiers[index - 1]},
                "status": if accepted[index - 1] { "valid" } else { "pending" },
                "challenges": [challenge_json(base, index, accepted[index - 1])]
            });
            write_response(stream, 200, &nonce, &[], &authz.to_string(), method)
        }
        ("POST", path) if resource_index(path, "/chall/", identifiers.len()).is_some() => {
            let index = resource_index(path, "/chall/", identifiers.len()).unwrap();
            // A non-empty JWS payload is the "I am ready" signal.
            let has_payload = serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|jose| jose.get("payload").and_then(|p| p.as_str().map(String::from)))
                .is_some_and(|payload| !payload.is_empty());
            if has_payload {
                state.accepted.lock().unwrap()[index - 1] = true;
            }
            let accepted = state.accepted.lock().unwrap()[index - 1];
            write_response(
                stream,
                200,
                &nonce,
                &[],
                &challenge_json(base, index, accepted).to_string(),
                method,
            )
        }
        ("POST", "/cert/1") => {
            let bundle = format!("{LEAF_PEM}{ISSUER_PEM}");
            write_response(stream, 200, &nonce, &[], &bundle, method)
        }
        ("POST", "/revoke-cert") => write_response(stream, 200, &nonce, &[], "{}", method),
        _ => {
            let problem = r#"{"type":"urn:ietf:params:acme:error:malformed","detail":"no such resource"}"#;
            write_response(stream, 404, &nonce, &[], problem, method)
        }
    }
}

/// Parses a 1-based resource index out of `/authz/{n}`-style paths.
fn resource_index(path: &str, prefix: &str, count: usize) -> Option<usize> {
    let index: usize = path.strip_prefix(prefix)?.parse().ok()?;
    (1..=count).contains(&index).then_some(index)
}

fn order_json(base: &str, identifiers: &[String], accepted: &[bool], finalized: bool) -> String {
    let status = if finalized {
        "valid"
    } else if !accepted.is_empty() && accepted.iter().all(|flag| *flag) {
        "ready"
    } else {
        "pending"
    };
    let identifier_objects: Vec<serde_json::Value> = identifiers
        .iter()
        .map(|value| serde_json::json!({"type": "dns", "value": value}))
        .collect();
    let authorizations: Vec<String> = (1..=identifiers.len())
        .map(|index| format!("{base}/authz/{index}"))
        .collect();
    let mut order = serde_json::json!({
        "status": status,
        "identifiers": identifier_objects,
        "authorizations": authorizations,
        "finalize": format!("{base}/order/1/finalize")
    });
    if finalized {
        order["certificate"] = serde_json::json!(format!("{base}/cert/1"));
    }
    order.to_string()
}

fn challenge_json(base: &str, index: usize, accepted: bool) -> serde_json::Value {
    serde_json::json!({
        "type": "dns-01",
        "url": format!("{base}/chall/{index}"),
        "status": if accepted { "valid" } else { "pending" },
        "token": format!("test-token-{index}")
    })
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    nonce: &str,
    extra_headers: &[&str],
    body: &str,
    method: &str,
) -> std::io::Result<()> {
    let reason = match status {
        200 => "OK",
        201 => "Created",
        400 => "Bad Request",
        _ => "Not Found",
    };
    let mut response = format!(
        "HTTP/1.1 {status} {reason}\r\nReplay-Nonce: {nonce}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n",
        body.len()
    );
    for header in extra_headers {
        response.push_str(header);
        response.push_str("\r\n");
    }
    response.push_str("\r\n");
    if method != "HEAD" {
        response.push_str(body);
    }
    stream.write_all(response.as_bytes())?;
    stream.flush()
}

/// The TXT value the CA would expect for a token and account thumbprint.
pub fn expected_txt_value(token: &str, thumbprint: &str) -> String {
    use sha2::{Digest, Sha256};
    BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(format!("{token}.{thumbprint}").as_bytes()))
}
