//! repowatch daemon entrypoint.
//!
//! A small local service that answers "what is the status of this working
//! copy?" from a warm cache: a socket listener, strict request validation,
//! and a status cache kept fresh by filesystem-event invalidation and
//! debounced background re-priming.

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use repowatch_core::{GitStatusProvider, StatusService};
use repowatch_daemon_protocol::{
    parse_path_params, CacheStatisticsReport, ErrorInfo, Method, Request, Response,
    MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};

mod config;
mod timing;

use timing::RequestTimings;

const SOCKET_NAME: &str = "daemon.sock";
const SOCKET_ENV: &str = "REPOWATCH_DAEMON_SOCKET";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

fn main() {
    init_logging();

    let config = config::load_daemon_config();

    let socket_path = match daemon_socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    let service = match StatusService::new(Arc::new(GitStatusProvider), config.primer_config()) {
        Ok(service) => Arc::new(service),
        Err(err) => {
            error!(error = %err, "Failed to start status service");
            std::process::exit(1);
        }
    };
    let timings = Arc::new(RequestTimings::new());
    let started_at = chrono::Utc::now();

    info!(path = %socket_path.display(), "repowatch daemon started");

    let shutdown = service.shutdown_signal();
    let accept_service = Arc::clone(&service);
    let accept_timings = Arc::clone(&timings);
    thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let service = Arc::clone(&accept_service);
                    let timings = Arc::clone(&accept_timings);
                    thread::spawn(move || handle_connection(stream, service, timings, started_at));
                }
                Err(err) => {
                    warn!(error = %err, "Failed to accept daemon connection");
                }
            }
        }
    });

    shutdown.wait();
    info!("Shutdown requested; stopping background workers");
    service.stop_background_workers();
    if let Err(err) = fs::remove_file(&socket_path) {
        warn!(error = %err, "Failed to remove daemon socket");
    }
    info!("repowatch daemon stopped");
}

fn init_logging() {
    let debug_enabled = env::var("REPOWATCH_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn daemon_socket_path() -> Result<PathBuf, String> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".repowatch").join(SOCKET_NAME))
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(
    mut stream: UnixStream,
    service: Arc<StatusService>,
    timings: Arc<RequestTimings>,
    started_at: chrono::DateTime<chrono::Utc>,
) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let is_shutdown = matches!(request.method, Method::Shutdown);
    let response = handle_request(request, &service, &timings, started_at);
    let shutdown_accepted = is_shutdown && response.ok;
    let _ = write_response(&mut stream, response);

    // The acknowledgment is flushed before the main thread is woken, so the
    // client always sees the response.
    if shutdown_accepted {
        service.shutdown_signal().request();
    }
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    if buffer.is_empty() {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let request_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(
    request: Request,
    service: &StatusService,
    timings: &RequestTimings,
    started_at: chrono::DateTime<chrono::Utc>,
) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => Response::ok(
            request.id,
            serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
                "started_at": started_at.to_rfc3339(),
            }),
        ),
        Method::GetStatus => {
            let params = match require_path_params(request.params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(request.id, err),
            };

            let started = Instant::now();
            let result = service.get_status(Path::new(&params.path));
            timings.record(started.elapsed());

            match result {
                Ok(snapshot) => match serde_json::to_value(&snapshot) {
                    Ok(value) => Response::ok(request.id, value),
                    Err(err) => Response::error(
                        request.id,
                        "serialization_error",
                        format!("Failed to serialize status: {}", err),
                    ),
                },
                Err(err) => Response::error(request.id, err.code(), err.to_string()),
            }
        }
        Method::GetCacheStatistics => {
            let report = statistics_report(service, timings);
            match serde_json::to_value(&report) {
                Ok(value) => Response::ok(request.id, value),
                Err(err) => Response::error(
                    request.id,
                    "serialization_error",
                    format!("Failed to serialize statistics: {}", err),
                ),
            }
        }
        Method::InvalidateCacheEntry => {
            let params = match require_path_params(request.params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            match service.invalidate(Path::new(&params.path)) {
                Ok(invalidated) => Response::ok(
                    request.id,
                    serde_json::json!({ "invalidated": invalidated }),
                ),
                Err(err) => Response::error(request.id, err.code(), err.to_string()),
            }
        }
        Method::InvalidateAllCacheEntries => {
            service.invalidate_all();
            Response::ok(request.id, serde_json::json!({ "invalidated": true }))
        }
        Method::Shutdown => {
            info!("Shutting down due to client request");
            Response::ok(request.id, serde_json::json!({ "result": "shutting down" }))
        }
    }
}

fn require_path_params(
    params: Option<serde_json::Value>,
) -> Result<repowatch_daemon_protocol::PathParams, ErrorInfo> {
    match params {
        Some(params) => parse_path_params(params),
        None => Err(ErrorInfo::new("invalid_params", "path is required")),
    }
}

fn statistics_report(service: &StatusService, timings: &RequestTimings) -> CacheStatisticsReport {
    let stats = service.statistics();
    let timing = timings.snapshot();
    CacheStatisticsReport {
        total_get_status_requests: timing.total_calls,
        average_milliseconds_in_get_status: timing.average_ms,
        minimum_milliseconds_in_get_status: timing.min_ms,
        maximum_milliseconds_in_get_status: timing.max_ms,
        cache_hits: stats.hits,
        cache_misses: stats.misses,
        effective_cache_primes: stats.effective_prime_requests,
        total_cache_primes: stats.total_prime_requests,
        effective_cache_invalidations: stats.effective_invalidation_requests,
        total_cache_invalidations: stats.total_invalidation_requests,
        full_cache_invalidations: stats.invalidate_all_requests,
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
