//! HTTP endpoint accepting rate changes
//!
//! Every request, whatever its method or path, is a rate change: the body holds one number of
//! at most [`MAX_BODY_BYTES`] bytes, e.g.
//!
//! ```text
//! curl -d 2.5 http://localhost:8080/
//! ```
//!
//! | Outcome                         | Status | Body                  |
//! |---------------------------------|--------|-----------------------|
//! | rate applied                    | 200    | `Rate changed`        |
//! | body unreadable or too long     | 400    | `Error reading rate`  |
//! | not a finite, non-negative rate | 400    | `Error parsing rate`  |
//! | rate gate no longer running     | 503    | `Rate gate stopped`   |
//!
//! A successful response is sent only after the gate applied the new rate.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::{Request, Response, StatusCode};
use tracing::instrument;

pub const MAX_BODY_BYTES: usize = 10;

/// Pause after a failed `accept` before listening again.
pub const ACCEPT_BACKOFF: std::time::Duration = std::time::Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Error reading rate")]
    Read(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Error parsing rate")]
    Parse(#[from] throttle::RateError),
    #[error("Rate gate stopped")]
    GateClosed(#[from] throttle::GateClosed),
}

impl ControlError {
    pub fn status(&self) -> StatusCode {
        match self {
            ControlError::Read(_) | ControlError::Parse(_) => StatusCode::BAD_REQUEST,
            ControlError::GateClosed(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Parses a request body into a rate. Surrounding whitespace is ignored.
pub fn parse_rate(body: &[u8]) -> Result<throttle::Rate, ControlError> {
    let text = std::str::from_utf8(body).map_err(|_| {
        throttle::RateError::Parse(String::from_utf8_lossy(body).into_owned())
    })?;
    Ok(text.parse::<throttle::Rate>()?)
}

async fn read_body<B>(body: B) -> Result<Bytes, ControlError>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let collected = Limited::new(body, MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(ControlError::Read)?;
    Ok(collected.to_bytes())
}

fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

/// Handles one rate-change request.
pub async fn update_rate<B>(
    request: Request<B>,
    handle: throttle::RateHandle,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible>
where
    B: hyper::body::Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let outcome = async {
        let body = read_body(request.into_body()).await?;
        let rate = parse_rate(&body)?;
        handle.set_rate(rate).await?;
        Ok::<_, ControlError>(rate)
    }
    .await;
    let response = match outcome {
        Ok(rate) => {
            tracing::info!("rate change to {} accepted", rate);
            respond(StatusCode::OK, "Rate changed")
        }
        Err(error) => {
            tracing::warn!("rejected rate change: {}", error);
            tracing::debug!("rate change failure: {:?}", error);
            respond(error.status(), format!("{error}\n"))
        }
    };
    Ok(response)
}

/// Listener for rate-change requests.
#[derive(Debug)]
pub struct ControlEndpoint {
    listener: tokio::net::TcpListener,
}

impl ControlEndpoint {
    pub async fn bind(addr: std::net::SocketAddr) -> std::io::Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until cancelled, serving each one on its own task.
    ///
    /// Requests are independent of each other; the gate applies their rates one at a time.
    /// Failing to accept a connection (e.g. out of file descriptors) only delays the next one.
    #[instrument(skip_all)]
    pub async fn serve(
        self,
        handle: throttle::RateHandle,
        cancel: tokio_util::sync::CancellationToken,
    ) {
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("control endpoint cancelled");
                    return;
                }
                accepted = self.listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(connection) => connection,
                Err(error) => {
                    if !back_off(&error, &cancel).await {
                        return;
                    }
                    continue;
                }
            };
            tracing::debug!("control connection from {}", peer);
            let io = hyper_util::rt::TokioIo::new(stream);
            let handle = handle.clone();
            tokio::spawn(async move {
                let service = hyper::service::service_fn(
                    move |request: Request<hyper::body::Incoming>| {
                        update_rate(request, handle.clone())
                    },
                );
                if let Err(error) = hyper::server::conn::http1::Builder::new()
                    .serve_connection(io, service)
                    .await
                {
                    tracing::debug!("control connection from {} failed: {}", peer, error);
                }
            });
        }
    }
}

/// Waits out [`ACCEPT_BACKOFF`] after `error`. Returns `false` if cancelled meanwhile.
async fn back_off(error: &std::io::Error, cancel: &tokio_util::sync::CancellationToken) -> bool {
    tracing::warn!("failed accepting control connection: {}", error);
    tokio::select! {
        _ = cancel.cancelled() => {
            tracing::debug!("control endpoint cancelled during back-off");
            false
        }
        _ = tokio::time::sleep(ACCEPT_BACKOFF) => true,
    }
}
