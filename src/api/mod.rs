//! Detection store HTTP API.
//!
//! Minimal HTTP/1.1 server on a std `TcpListener`, one connection at a time:
//!
//! - `POST /api/detections` with `{"objects": [...]}` → `201` stored snapshot
//! - `GET /api/detections` → `200` every snapshot, newest first
//! - `GET /health` → `200 {"status":"ok"}`
//! - `OPTIONS *` → `204` CORS preflight
//!
//! Every response allows any origin and closes the connection.

use crate::store::DetectionStore;
use crate::{ErrorBody, NewDetection};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_REQUEST_BYTES: usize = 64 * 1024;
const DETECTIONS_PATH: &str = "/api/detections";
const INTERNAL_ERROR: &str = r#"{"error":"Internal server error"}"#;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub read_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:4000".to_string(),
            read_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Base URL clients should use, e.g. `http://127.0.0.1:4000/api`.
    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub fn stop(mut self) -> Result<()> {
        self.shutdown_and_join()
    }

    fn shutdown_and_join(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for ApiHandle {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown_and_join() {
            log::error!("{}", err);
        }
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    store: Box<dyn DetectionStore>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, store: Box<dyn DetectionStore>) -> Self {
        Self { cfg, store }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid server address '{}': {}", self.cfg.addr, e))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg;
        let mut store = self.store;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, &cfg, store.as_mut(), shutdown_thread) {
                log::error!("detections api stopped: {}", err);
            }
        });

        log::info!("detections api listening on {}", addr);
        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: &ApiConfig,
    store: &mut dyn DetectionStore,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, cfg, store) {
                    log::warn!("detections api request failed: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    cfg: &ApiConfig,
    store: &mut dyn DetectionStore,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(cfg.read_timeout))?;
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            let response = Response::error(400, &err.to_string());
            response.write_to(&mut stream)?;
            return Err(err);
        }
    };
    let response = route(&request, store);
    response.write_to(&mut stream)
}

fn route(request: &HttpRequest, store: &mut dyn DetectionStore) -> Response {
    if request.method == "OPTIONS" {
        return Response::empty(204);
    }
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => Response::json(200, br#"{"status":"ok"}"#.to_vec()),
        ("GET", DETECTIONS_PATH) => match store.list() {
            Ok(entries) => to_json(200, &entries),
            Err(err) => {
                log::warn!("error fetching detections: {:#}", err);
                Response::json(500, INTERNAL_ERROR.as_bytes().to_vec())
            }
        },
        ("POST", DETECTIONS_PATH) => {
            let body: NewDetection = match serde_json::from_slice(&request.body) {
                Ok(body) => body,
                Err(err) => return Response::error(400, &format!("invalid request body: {}", err)),
            };
            match store.insert(body.objects) {
                Ok(snapshot) => to_json(201, &snapshot),
                Err(err) => {
                    log::warn!("error saving detection: {:#}", err);
                    Response::json(500, INTERNAL_ERROR.as_bytes().to_vec())
                }
            }
        }
        (_, "/health") | (_, DETECTIONS_PATH) => Response::error(405, "method not allowed"),
        _ => Response::error(404, "not found"),
    }
}

fn to_json<T: serde::Serialize>(status: u16, value: &T) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) => Response::json(status, body),
        Err(err) => {
            log::warn!("failed to encode response: {}", err);
            Response::json(500, INTERNAL_ERROR.as_bytes().to_vec())
        }
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of headers"));
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
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
            .map_err(|_| anyhow!("invalid content-length"))?,
        None => 0,
    };
    if header_end + content_length > MAX_REQUEST_BYTES {
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

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        body,
    })
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

#[derive(Debug, PartialEq, Eq)]
struct Response {
    status: u16,
    body: Vec<u8>,
}

impl Response {
    fn json(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    fn empty(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        let body = serde_json::to_vec(&ErrorBody {
            error: message.to_string(),
        })
        .unwrap_or_else(|_| INTERNAL_ERROR.as_bytes().to_vec());
        Self { status, body }
    }

    fn write_to(&self, stream: &mut TcpStream) -> Result<()> {
        let status_line = match self.status {
            200 => "HTTP/1.1 200 OK",
            201 => "HTTP/1.1 201 Created",
            204 => "HTTP/1.1 204 No Content",
            400 => "HTTP/1.1 400 Bad Request",
            404 => "HTTP/1.1 404 Not Found",
            405 => "HTTP/1.1 405 Method Not Allowed",
            _ => "HTTP/1.1 500 Internal Server Error",
        };
        let mut header = format!(
            "{status_line}\r\nAccess-Control-Allow-Origin: *\r\nCache-Control: no-store\r\nConnection: close\r\nContent-Length: {len}\r\n",
            status_line = status_line,
            len = self.body.len()
        );
        if self.status == 204 {
            header.push_str("Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n");
            header.push_str("Access-Control-Allow-Headers: Content-Type\r\n");
        } else {
            header.push_str("Content-Type: application/json\r\n");
        }
        header.push_str("\r\n");
        stream.write_all(header.as_bytes())?;
        stream.write_all(&self.body)?;
        stream.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDetectionStore;
    use crate::DetectionSnapshot;

    fn request(method: &str, path: &str, body: &str) -> HttpRequest {
        HttpRequest {
            method: method.to_string(),
            path: path.to_string(),
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn post_then_get_returns_saved_snapshot() {
        let mut store = InMemoryDetectionStore::new();
        let created = route(
            &request("POST", DETECTIONS_PATH, r#"{"objects":["person","cup"]}"#),
            &mut store,
        );
        assert_eq!(created.status, 201);
        let snapshot: DetectionSnapshot = serde_json::from_slice(&created.body).unwrap();
        assert_eq!(snapshot.objects, vec!["person", "cup"]);

        let listed = route(&request("GET", DETECTIONS_PATH, ""), &mut store);
        assert_eq!(listed.status, 200);
        let entries: Vec<DetectionSnapshot> = serde_json::from_slice(&listed.body).unwrap();
        assert_eq!(entries, vec![snapshot]);
    }

    #[test]
    fn wire_shape_uses_camel_case_created_at() {
        let mut store = InMemoryDetectionStore::new();
        let created = route(
            &request("POST", DETECTIONS_PATH, r#"{"objects":["dog"]}"#),
            &mut store,
        );
        let value: serde_json::Value = serde_json::from_slice(&created.body).unwrap();
        assert!(value.get("id").and_then(|v| v.as_str()).is_some());
        assert!(value.get("createdAt").and_then(|v| v.as_str()).is_some());
        assert_eq!(value["objects"], serde_json::json!(["dog"]));
    }

    #[test]
    fn malformed_body_is_rejected() {
        let mut store = InMemoryDetectionStore::new();
        for body in ["", "{", r#"{"objects":"person"}"#, r#"{"objects":[1,2]}"#] {
            let response = route(&request("POST", DETECTIONS_PATH, body), &mut store);
            assert_eq!(response.status, 400, "body {:?}", body);
        }
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn unknown_routes_and_methods() {
        let mut store = InMemoryDetectionStore::new();
        assert_eq!(route(&request("GET", "/nope", ""), &mut store).status, 404);
        assert_eq!(
            route(&request("DELETE", DETECTIONS_PATH, ""), &mut store).status,
            405
        );
        assert_eq!(
            route(&request("OPTIONS", DETECTIONS_PATH, ""), &mut store),
            Response::empty(204)
        );
        assert_eq!(route(&request("GET", "/health", ""), &mut store).status, 200);
    }
}
