//! HTTP ingestion endpoint for camera alerts.
//!
//! Cameras POST `camera` and `time` as form fields, either urlencoded or
//! multipart. Each request becomes one `AlertRecord` appended verbatim; the
//! timestamp is not validated here. Every accepted connection is served on its
//! own thread, so producers only serialize on the buffer's lock.

use crate::{AlertBuffer, AlertRecord};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_REQUEST_BYTES: usize = 8192;

pub const DEFAULT_INGEST_ADDR: &str = "0.0.0.0:8888";
pub const DEFAULT_INGEST_PATH: &str = "/detection/alert";

#[derive(Clone, Debug)]
pub struct IngestConfig {
    pub addr: String,
    pub path: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_INGEST_ADDR.to_string(),
            path: DEFAULT_INGEST_PATH.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct IngestHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl IngestHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("ingest server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct IngestServer {
    cfg: IngestConfig,
    buffer: Arc<AlertBuffer>,
}

impl IngestServer {
    pub fn new(cfg: IngestConfig, buffer: Arc<AlertBuffer>) -> Self {
        Self { cfg, buffer }
    }

    pub fn spawn(self) -> Result<IngestHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid ingest address '{}': {}", self.cfg.addr, e))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = Arc::new(self.cfg);
        let buffer = self.buffer;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_ingest(listener, cfg, buffer, shutdown_thread) {
                log::error!("ingest endpoint stopped: {}", err);
            }
        });

        Ok(IngestHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_ingest(
    listener: TcpListener,
    cfg: Arc<IngestConfig>,
    buffer: Arc<AlertBuffer>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let cfg = Arc::clone(&cfg);
                let buffer = Arc::clone(&buffer);
                let spawned = std::thread::Builder::new()
                    .name("ingest-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &cfg, &buffer) {
                            log::warn!("ingest request from {} rejected: {}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::error!("failed to spawn ingest connection thread: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(20));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    cfg: &IngestConfig,
    buffer: &AlertBuffer,
) -> Result<()> {
    // Accepted sockets may inherit non-blocking mode from the listener.
    stream.set_nonblocking(false)?;
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            write_json_response(&mut stream, 400, r#"{"error":"bad_request"}"#)?;
            return Err(err);
        }
    };

    if request.path == "/health" {
        if request.method != "GET" {
            write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
            return Ok(());
        }
        let body = serde_json::json!({ "status": "ok", "pending": buffer.len() });
        write_response(&mut stream, 200, "application/json", &serde_json::to_vec(&body)?)?;
        return Ok(());
    }

    if request.path != cfg.path {
        write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)?;
        return Ok(());
    }
    if request.method != "POST" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }

    let fields = match request.form_fields() {
        Ok(fields) => fields,
        Err(err) => {
            write_json_response(&mut stream, 400, r#"{"error":"bad_request"}"#)?;
            return Err(err);
        }
    };
    let record = AlertRecord::new(
        fields.get("camera").cloned().unwrap_or_default(),
        fields.get("time").cloned().unwrap_or_default(),
    );
    log::debug!(
        "alert received camera={:?} time={:?}",
        record.source(),
        record.observed_at()
    );
    buffer.append(record);

    write_json_response(&mut stream, 200, r#"{"status":"ok"}"#)?;
    Ok(())
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of headers"));
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length '{}'", value))?,
        None => 0,
    };
    if content_length > MAX_REQUEST_BYTES.saturating_sub(header_end) {
        return Err(anyhow!("request too large"));
    }
    let mut body = data[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of body"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path);
    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        headers,
        body,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n",
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpRequest {
    /// Form fields from the body only; the first value of a repeated key wins.
    ///
    /// Bodies that are neither urlencoded nor multipart carry no fields, so
    /// `camera` and `time` fall back to empty strings.
    fn form_fields(&self) -> Result<HashMap<String, String>> {
        let Some(content_type) = self.headers.get("content-type") else {
            return Ok(HashMap::new());
        };
        let mut params = content_type.split(';');
        let mime = params.next().unwrap_or("").trim();

        if mime.eq_ignore_ascii_case("application/x-www-form-urlencoded") {
            return Ok(first_values(
                url::form_urlencoded::parse(&self.body)
                    .map(|(k, v)| (k.into_owned(), v.into_owned())),
            ));
        }
        if mime.eq_ignore_ascii_case("multipart/form-data") {
            let boundary = params
                .filter_map(|param| param.split_once('='))
                .find(|(k, _)| k.trim().eq_ignore_ascii_case("boundary"))
                .map(|(_, v)| v.trim().trim_matches('"'))
                .filter(|v| !v.is_empty())
                .ok_or_else(|| anyhow!("multipart body without boundary"))?;
            return Ok(first_values(multipart_fields(&self.body, boundary)?));
        }
        Ok(HashMap::new())
    }
}

fn first_values(pairs: impl IntoIterator<Item = (String, String)>) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for (k, v) in pairs {
        out.entry(k).or_insert(v);
    }
    out
}

/// Text fields of a `multipart/form-data` body. File parts are skipped.
fn multipart_fields(body: &[u8], boundary: &str) -> Result<Vec<(String, String)>> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let start = find_bytes(body, delimiter).ok_or_else(|| anyhow!("multipart boundary not found"))?;
    let mut rest = &body[start + delimiter.len()..];
    let mut fields = Vec::new();

    while !rest.starts_with(b"--") {
        let part_start = rest
            .strip_prefix(b"\r\n")
            .ok_or_else(|| anyhow!("malformed multipart delimiter"))?;
        let end = find_bytes(part_start, delimiter)
            .ok_or_else(|| anyhow!("unterminated multipart body"))?;
        let part = &part_start[..end];
        let part = part.strip_suffix(b"\r\n").unwrap_or(part);

        if let Some(header_end) = find_bytes(part, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&part[..header_end]);
            if let Some(name) = form_data_name(&head) {
                let value = String::from_utf8_lossy(&part[header_end + 4..]).into_owned();
                fields.push((name, value));
            }
        }
        rest = &part_start[end + delimiter.len()..];
    }
    Ok(fields)
}

/// `name` from a part's `Content-Disposition: form-data`, unless it is a file upload.
fn form_data_name(head: &str) -> Option<String> {
    let disposition = head.split("\r\n").find_map(|line| {
        let (k, v) = line.split_once(':')?;
        k.trim()
            .eq_ignore_ascii_case("content-disposition")
            .then_some(v)
    })?;
    let mut params = disposition.split(';');
    if !params.next()?.trim().eq_ignore_ascii_case("form-data") {
        return None;
    }
    let mut name = None;
    for param in params {
        let Some((k, v)) = param.split_once('=') else {
            continue;
        };
        match k.trim().to_ascii_lowercase().as_str() {
            "filename" => return None,
            "name" => name = Some(v.trim().trim_matches('"').to_string()),
            _ => {}
        }
    }
    name
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
