//! HTTP API for the text-to-SQL engine
//! Minimal HTTP/1.1 server on tokio: /health, /schemas, /metrics, /ask

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use text2sql_engine::config::{resolve_config_path, AppConfig};
use text2sql_engine::{AskRequest, Orchestrator};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const MAX_REQUEST_BYTES: usize = 1024 * 1024;

#[derive(Parser)]
#[command(name = "server")]
struct Args {
    /// Listen address
    #[arg(long, env = "TEXT2SQL_ADDR", default_value = "0.0.0.0:8080")]
    addr: String,

    /// Path to the YAML config (default: $TEXT2SQL_CONFIG or ./config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config_path = match args.config {
        Some(path) => path,
        None => resolve_config_path()?,
    };
    let config = AppConfig::load(&config_path)?;
    let orchestrator = Arc::new(Orchestrator::from_config(&config)?);

    let listener = TcpListener::bind(&args.addr).await?;
    info!("Listening on http://{}", args.addr);

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("Connection from {}", addr);
        tokio::spawn(handle_connection(stream, orchestrator.clone()));
    }
}

async fn handle_connection(mut stream: TcpStream, orchestrator: Arc<Orchestrator>) {
    let response = match read_request(&mut stream).await {
        Ok(Some(request)) => handle_request(&request, &orchestrator).await,
        Ok(None) => return,
        Err(e) => {
            warn!("Failed to read request: {}", e);
            create_response(400, "Bad Request", r#"{"detail":"Malformed request"}"#)
        }
    };

    if let Err(e) = stream.write_all(response.as_bytes()).await {
        error!("Failed to write response: {}", e);
    }
}

struct HttpRequest {
    method: String,
    path: String,
    body: String,
}

/// Read headers, then as many body bytes as `Content-Length` announces.
async fn read_request(stream: &mut TcpStream) -> std::io::Result<Option<HttpRequest>> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buffer.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_header_end(&buffer) {
            break pos;
        }
        if buffer.len() > MAX_REQUEST_BYTES {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "headers too large"));
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let raw_path = parts.next().unwrap_or("/");

    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0)
        .min(MAX_REQUEST_BYTES);

    let body_start = header_end + 4;
    while buffer.len() < body_start + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
    let body_end = buffer.len().min(body_start + content_length);
    let body = String::from_utf8_lossy(&buffer[body_start.min(body_end)..body_end]).to_string();

    // Drop query string and trailing slash
    let path = raw_path.split('?').next().unwrap_or("/").trim_end_matches('/');
    let path = if path.is_empty() { "/" } else { path }.to_string();

    Ok(Some(HttpRequest { method, path, body }))
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

async fn handle_request(request: &HttpRequest, orchestrator: &Orchestrator) -> String {
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => create_response(200, "OK", r#"{"ok":true}"#),
        ("GET", "/schemas") => json_response(
            200,
            &serde_json::json!({ "databases": orchestrator.databases() }),
        ),
        ("GET", "/metrics") => match orchestrator.stats().await {
            Ok(stats) => json_response(200, &serde_json::json!(stats)),
            Err(e) => {
                error!("Failed to read interaction stats: {}", e);
                json_response(500, &serde_json::json!({ "detail": e.to_string() }))
            }
        },
        ("POST", "/ask") => {
            let ask: AskRequest = match serde_json::from_str(&request.body) {
                Ok(ask) => ask,
                Err(e) => {
                    return json_response(
                        422,
                        &serde_json::json!({ "detail": format!("Invalid request body: {}", e) }),
                    )
                }
            };
            match orchestrator.handle(&ask).await {
                Ok(answer) => json_response(200, &serde_json::json!(answer)),
                Err(e) => json_response(
                    e.status_code(),
                    &serde_json::json!({ "detail": e.to_string(), "stage": e.stage() }),
                ),
            }
        }
        _ => create_response(404, "Not Found", r#"{"detail":"Not Found"}"#),
    }
}

fn json_response(status: u16, body: &serde_json::Value) -> String {
    let status_text = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        422 => "Unprocessable Entity",
        _ => "Internal Server Error",
    };
    let body = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    create_response(status, status_text, &body)
}

fn create_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        status_text,
        body.len(),
        body
    )
}
