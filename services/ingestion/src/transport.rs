use std::{
    collections::HashMap,
    io::{BufRead, BufReader, Read, Write},
    net::{TcpListener, TcpStream},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
        mpsc,
    },
    time::{Duration, Instant},
};

use serde::Serialize;
use store::{PlacementStore, StoreError};
use tracing::{error, warn};

use crate::{
    IngestError,
    api::{ErrorResponse, LocationAdsResponse, UploadApiResponse},
    ingest_payload, query_location,
};

pub struct IngestionRuntime {
    store: PlacementStore,
    upload_success_total: AtomicU64,
    upload_failed_total: AtomicU64,
    lookup_total: AtomicU64,
    started_at: Instant,
}

impl IngestionRuntime {
    pub fn new(store: PlacementStore) -> Self {
        Self {
            store,
            upload_success_total: AtomicU64::new(0),
            upload_failed_total: AtomicU64::new(0),
            lookup_total: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn store(&self) -> &PlacementStore {
        &self.store
    }

    pub fn upload(&self, body: &[u8]) -> Result<UploadApiResponse, IngestError> {
        match ingest_payload(&self.store, body) {
            Ok(stats) => {
                self.upload_success_total.fetch_add(1, Ordering::Relaxed);
                Ok(UploadApiResponse::from_stats(&stats))
            }
            Err(err) => {
                self.upload_failed_total.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    pub fn query(&self, location: &str) -> LocationAdsResponse {
        self.lookup_total.fetch_add(1, Ordering::Relaxed);
        LocationAdsResponse {
            location: location.to_string(),
            ads: query_location(&self.store, location),
        }
    }

    pub(crate) fn metrics_text(&self) -> String {
        let stats = self.store.stats();
        format!(
            "# TYPE ads_upload_success_total counter\n\
ads_upload_success_total {}\n\
# TYPE ads_upload_failed_total counter\n\
ads_upload_failed_total {}\n\
# TYPE ads_lookup_total counter\n\
ads_lookup_total {}\n\
# TYPE ads_cache_hits_total counter\n\
ads_cache_hits_total {}\n\
# TYPE ads_cache_misses_total counter\n\
ads_cache_misses_total {}\n\
# TYPE ads_cache_evictions_total counter\n\
ads_cache_evictions_total {}\n\
# TYPE ads_cache_flushes_total counter\n\
ads_cache_flushes_total {}\n\
# TYPE ads_cache_stale_inserts_skipped_total counter\n\
ads_cache_stale_inserts_skipped_total {}\n\
# TYPE ads_cache_entries gauge\n\
ads_cache_entries {}\n\
# TYPE ads_cache_capacity gauge\n\
ads_cache_capacity {}\n\
# TYPE ads_registry_records gauge\n\
ads_registry_records {}\n\
# TYPE ads_registry_locations gauge\n\
ads_registry_locations {}\n\
# TYPE ads_registry_generation gauge\n\
ads_registry_generation {}\n\
# TYPE ads_uptime_seconds gauge\n\
ads_uptime_seconds {:.4}\n",
            self.upload_success_total.load(Ordering::Relaxed),
            self.upload_failed_total.load(Ordering::Relaxed),
            self.lookup_total.load(Ordering::Relaxed),
            stats.cache.hits,
            stats.cache.misses,
            stats.cache.evictions,
            stats.cache.flushes,
            stats.cache.stale_inserts_skipped,
            stats.cache.entries,
            stats.cache.capacity,
            stats.registry.record_count,
            stats.registry.location_count,
            stats.registry.generation,
            self.started_at.elapsed().as_secs_f64()
        )
    }
}

pub type SharedRuntime = Arc<IngestionRuntime>;
pub(crate) const MAX_HTTP_BODY_BYTES: usize = 16 * 1024 * 1024;
const SOCKET_TIMEOUT_SECS: u64 = 5;
const DEFAULT_HTTP_WORKERS: usize = 4;

pub fn serve_http(runtime: IngestionRuntime, bind_addr: &str) -> std::io::Result<()> {
    serve_http_with_workers(runtime, bind_addr, DEFAULT_HTTP_WORKERS)
}

pub fn serve_http_with_workers(
    runtime: IngestionRuntime,
    bind_addr: &str,
    worker_count: usize,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr)?;
    let worker_count = worker_count.max(1);
    let runtime: SharedRuntime = Arc::new(runtime);
    let (tx, rx) = mpsc::channel::<TcpStream>();
    let rx = Arc::new(Mutex::new(rx));

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            let runtime = Arc::clone(&runtime);
            let rx = Arc::clone(&rx);
            scope.spawn(move || {
                loop {
                    let stream = {
                        let guard = match rx.lock() {
                            Ok(guard) => guard,
                            Err(_) => break,
                        };
                        match guard.recv() {
                            Ok(stream) => stream,
                            Err(_) => break,
                        }
                    };
                    if let Err(err) = handle_connection(&runtime, stream) {
                        error!("ads transport error: {err}");
                    }
                }
            });
        }

        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    if tx.send(stream).is_err() {
                        error!("ads transport worker queue closed");
                        break;
                    }
                }
                Err(err) => error!("ads transport accept error: {err}"),
            }
        }
        drop(tx);
    });

    Ok(())
}

pub fn handle_http_request_bytes(
    runtime: &SharedRuntime,
    raw_request: &[u8],
) -> Result<Vec<u8>, String> {
    let header_end = raw_request
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .ok_or_else(|| "missing HTTP header terminator".to_string())?;
    let header_block = std::str::from_utf8(&raw_request[..header_end])
        .map_err(|_| "request headers must be valid UTF-8".to_string())?;
    let body = &raw_request[header_end + 4..];

    let mut lines = header_block.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| "missing request line".to_string())?;
    let (method, target) = parse_request_line(request_line)?;

    let mut headers = HashMap::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| "invalid HTTP header".to_string())?;
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    let content_length = parse_content_length(&headers)?;
    if content_length != body.len() {
        return Err("content-length does not match body size".to_string());
    }

    let request = HttpRequest {
        method,
        target,
        headers,
        body: body.to_vec(),
    };
    let response = handle_request(runtime, &request);
    Ok(render_response_text(&response).into_bytes())
}

fn handle_connection(runtime: &SharedRuntime, mut stream: TcpStream) -> std::io::Result<()> {
    stream.set_read_timeout(Some(Duration::from_secs(SOCKET_TIMEOUT_SECS)))?;
    stream.set_write_timeout(Some(Duration::from_secs(SOCKET_TIMEOUT_SECS)))?;

    let request = match read_http_request(&mut stream) {
        Ok(Some(request)) => request,
        Ok(None) => return Ok(()),
        Err(err) => return write_response(&mut stream, HttpResponse::bad_request(&err)),
    };

    let response = handle_request(runtime, &request);
    write_response(&mut stream, response)
}

fn read_http_request(stream: &mut TcpStream) -> Result<Option<HttpRequest>, String> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    let bytes = reader
        .read_line(&mut request_line)
        .map_err(|e| e.to_string())?;
    if bytes == 0 {
        return Ok(None);
    }

    let (method, target) = parse_request_line(&request_line)?;

    let mut headers = HashMap::new();
    loop {
        let mut header_line = String::new();
        let bytes = reader
            .read_line(&mut header_line)
            .map_err(|e| e.to_string())?;
        if bytes == 0 || header_line == "\r\n" {
            break;
        }
        let (name, value) = header_line
            .split_once(':')
            .ok_or_else(|| "invalid HTTP header".to_string())?;
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    let content_length = parse_content_length(&headers)?;
    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body).map_err(|e| e.to_string())?;
    }

    Ok(Some(HttpRequest {
        method,
        target,
        headers,
        body,
    }))
}

fn parse_content_length(headers: &HashMap<String, String>) -> Result<usize, String> {
    let content_length = match headers.get("content-length") {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| "invalid content-length header".to_string())?,
        None => 0,
    };
    if content_length > MAX_HTTP_BODY_BYTES {
        return Err(format!(
            "content-length exceeds max body size ({MAX_HTTP_BODY_BYTES} bytes)"
        ));
    }
    Ok(content_length)
}

fn parse_request_line(line: &str) -> Result<(String, String), String> {
    let line = line.trim();
    let mut parts = line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| "missing HTTP method".to_string())?;
    let target = parts
        .next()
        .ok_or_else(|| "missing HTTP target".to_string())?;
    let version = parts
        .next()
        .ok_or_else(|| "missing HTTP version".to_string())?;
    if !version.starts_with("HTTP/1.") {
        return Err("unsupported HTTP version".to_string());
    }
    Ok((method.to_string(), target.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Route<'a> {
    Health,
    Metrics,
    Upload,
    LocationAds(&'a str),
    Unknown,
}

fn route_for_path(path: &str) -> Route<'_> {
    match path {
        "/health" => Route::Health,
        "/metrics" => Route::Metrics,
        "/upload" | "/upload/" => Route::Upload,
        _ => match path.strip_prefix("/ads/") {
            Some(rest) => {
                let location = rest.strip_suffix('/').unwrap_or(rest);
                if location.is_empty() || location.contains('/') {
                    Route::Unknown
                } else {
                    Route::LocationAds(location)
                }
            }
            None => Route::Unknown,
        },
    }
}

pub(crate) fn handle_request(runtime: &SharedRuntime, request: &HttpRequest) -> HttpResponse {
    let path = request
        .target
        .split_once('?')
        .map_or(request.target.as_str(), |(path, _)| path);
    match (request.method.as_str(), route_for_path(path)) {
        ("GET", Route::Health) => health_response(),
        ("GET", Route::Metrics) => metrics_response(runtime),
        ("POST", Route::Upload) => upload_response(
            runtime,
            request.headers.get("content-type").map(String::as_str),
            &request.body,
        ),
        ("GET", Route::LocationAds(raw_location)) => match percent_decode(raw_location) {
            Ok(location) => location_ads_response(runtime, &location),
            Err(err) => HttpResponse::bad_request(&format!("invalid location: {err}")),
        },
        (_, Route::Upload) => HttpResponse::method_not_allowed("only POST is supported"),
        (_, Route::Health | Route::Metrics | Route::LocationAds(_)) => {
            HttpResponse::method_not_allowed("only GET is supported")
        }
        (_, Route::Unknown) => HttpResponse::not_found("unknown path"),
    }
}

pub(crate) fn health_response() -> HttpResponse {
    HttpResponse::ok_json("{\"status\":\"ok\"}".to_string())
}

pub(crate) fn metrics_response(runtime: &IngestionRuntime) -> HttpResponse {
    HttpResponse::ok_text(runtime.metrics_text())
}

/// Replaces the registry with an upload body. A missing content type is
/// accepted; any other content type must be JSON.
pub(crate) fn upload_response(
    runtime: &IngestionRuntime,
    content_type: Option<&str>,
    body: &[u8],
) -> HttpResponse {
    if let Some(content_type) = content_type
        && !content_type
            .to_ascii_lowercase()
            .contains("application/json")
    {
        return HttpResponse::bad_request(
            "content-type must include application/json for POST /upload",
        );
    }
    match runtime.upload(body) {
        Ok(resp) => HttpResponse::json(200, &resp),
        Err(err) => {
            warn!("ads upload rejected: {err}");
            HttpResponse::from_ingest_error(&err)
        }
    }
}

pub(crate) fn location_ads_response(runtime: &IngestionRuntime, location: &str) -> HttpResponse {
    HttpResponse::json(200, &runtime.query(location))
}

fn percent_decode(raw: &str) -> Result<String, String> {
    let bytes = raw.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len() {
                return Err("incomplete percent escape".to_string());
            }
            let hi = decode_hex(bytes[i + 1])?;
            let lo = decode_hex(bytes[i + 2])?;
            out.push((hi << 4) | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(out).map_err(|_| "invalid UTF-8 in location".to_string())
}

fn decode_hex(byte: u8) -> Result<u8, String> {
    match byte {
        b'0'..=b'9' => Ok(byte - b'0'),
        b'a'..=b'f' => Ok(byte - b'a' + 10),
        b'A'..=b'F' => Ok(byte - b'A' + 10),
        _ => Err("invalid hex digit".to_string()),
    }
}

fn write_response(stream: &mut TcpStream, response: HttpResponse) -> std::io::Result<()> {
    stream.write_all(render_response_text(&response).as_bytes())?;
    stream.flush()
}

fn render_response_text(response: &HttpResponse) -> String {
    let status_text = match response.status {
        200 => "200 OK",
        400 => "400 Bad Request",
        404 => "404 Not Found",
        405 => "405 Method Not Allowed",
        _ => "500 Internal Server Error",
    };
    let body_len = response.body.len();
    format!(
        "HTTP/1.1 {status_text}\r\nContent-Type: {}\r\nContent-Length: {body_len}\r\nConnection: close\r\n\r\n{}",
        response.content_type, response.body
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpRequest {
    pub(crate) method: String,
    pub(crate) target: String,
    pub(crate) headers: HashMap<String, String>,
    pub(crate) body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpResponse {
    pub(crate) status: u16,
    pub(crate) content_type: &'static str,
    pub(crate) body: String,
}

impl HttpResponse {
    fn ok_json(body: String) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            body,
        }
    }

    fn ok_text(body: String) -> Self {
        Self {
            status: 200,
            content_type: "text/plain; version=0.0.4; charset=utf-8",
            body,
        }
    }

    fn json<T: Serialize>(status: u16, payload: &T) -> Self {
        match serde_json::to_string(payload) {
            Ok(body) => Self {
                status,
                content_type: "application/json",
                body,
            },
            Err(err) => Self::internal_server_error(&format!("response encoding failed: {err}")),
        }
    }

    pub(crate) fn bad_request(message: &str) -> Self {
        Self::error_with_status(400, ErrorResponse::new(message))
    }

    pub(crate) fn not_found(message: &str) -> Self {
        Self::error_with_status(404, ErrorResponse::new(message))
    }

    pub(crate) fn method_not_allowed(message: &str) -> Self {
        Self::error_with_status(405, ErrorResponse::new(message))
    }

    fn internal_server_error(message: &str) -> Self {
        Self {
            status: 500,
            content_type: "application/json",
            body: format!(
                "{{\"status\":\"error\",\"message\":{}}}",
                serde_json::Value::String(message.to_string())
            ),
        }
    }

    fn error_with_status(status: u16, error: ErrorResponse) -> Self {
        Self::json(status, &error)
    }

    pub(crate) fn from_ingest_error(err: &IngestError) -> Self {
        let mut body = ErrorResponse::new(err.to_string());
        match err {
            IngestError::InvalidJson(_) => body.code = Some("invalid_json".to_string()),
            IngestError::Store(StoreError::Validation(validation)) => {
                body.code = Some(validation.code().to_string());
                body.index = validation.index();
            }
            IngestError::Store(StoreError::Internal(_)) => {}
        }
        let status = if err.is_client_error() { 400 } else { 500 };
        Self::error_with_status(status, body)
    }
}
