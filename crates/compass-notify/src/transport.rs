//! Webhook delivery.
//!
//! [`WebhookTransport`] is the seam between the dispatcher and the network.
//! [`HttpTransport`] speaks HTTP/1.1 over a fresh TCP (or TLS) connection per
//! request; [`deliver`] wraps any transport with exponential-backoff retries
//! for transport failures and 5xx responses.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use tracing::{debug, warn};

use crate::error::{NotifyError, NotifyResult};
use crate::request::{WebhookRequest, WebhookResponse};

/// Boxed future returned by transports.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Sends a rendered webhook request and returns the raw response.
pub trait WebhookTransport: Send + Sync {
    fn send<'a>(&'a self, request: &'a WebhookRequest) -> BoxFuture<'a, NotifyResult<WebhookResponse>>;
}

/// HTTP/1.1 transport with a per-request timeout. `https` targets are
/// reached over rustls.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    timeout: Duration,
    tls: Arc<rustls::ClientConfig>,
}

impl HttpTransport {
    /// Transport trusting the Mozilla root certificate store.
    pub fn new(timeout: Duration) -> NotifyResult<Self> {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = rustls::ClientConfig::builder_with_provider(rustls::crypto::ring::default_provider().into())
            .with_safe_default_protocol_versions()
            .map_err(|e| NotifyError::TlsConfig(e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(Self::with_tls_config(timeout, Arc::new(config)))
    }

    /// Transport using a pre-built client configuration, e.g. one trusting
    /// a private CA.
    pub fn with_tls_config(timeout: Duration, tls: Arc<rustls::ClientConfig>) -> Self {
        Self { timeout, tls }
    }
}

impl WebhookTransport for HttpTransport {
    fn send<'a>(&'a self, request: &'a WebhookRequest) -> BoxFuture<'a, NotifyResult<WebhookResponse>> {
        Box::pin(http_send(self, request))
    }
}

async fn http_send(transport: &HttpTransport, request: &WebhookRequest) -> NotifyResult<WebhookResponse> {
    let uri: http::Uri = request
        .url
        .parse()
        .map_err(|e| NotifyError::InvalidRequest(format!("url {}: {e}", request.url)))?;
    let (secure, default_port) = match uri.scheme_str() {
        Some("http") => (false, 80),
        Some("https") => (true, 443),
        other => {
            return Err(NotifyError::InvalidRequest(format!(
                "unsupported url scheme {other:?} in {}",
                request.url
            )));
        }
    };
    let host = uri
        .host()
        .ok_or_else(|| NotifyError::InvalidRequest(format!("url {} has no host", request.url)))?;
    let address = format!("{host}:{}", uri.port_u16().unwrap_or(default_port));
    let authority = uri
        .authority()
        .map(|a| a.as_str().to_string())
        .unwrap_or_else(|| address.clone());
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let server_name = if secure {
        // IPv6 literals keep their brackets in the URI host.
        let name = host.trim_start_matches('[').trim_end_matches(']').to_string();
        Some(
            ServerName::try_from(name)
                .map_err(|e| NotifyError::InvalidRequest(format!("tls server name {host}: {e}")))?,
        )
    } else {
        None
    };

    let exchange = async {
        let stream = tokio::net::TcpStream::connect(&address)
            .await
            .map_err(|e| NotifyError::Transport(format!("connect {address}: {e}")))?;

        match server_name {
            Some(server_name) => {
                let stream = tokio_rustls::TlsConnector::from(transport.tls.clone())
                    .connect(server_name, stream)
                    .await
                    .map_err(|e| NotifyError::Transport(format!("tls handshake {address}: {e}")))?;
                round_trip(TokioIo::new(stream), request, &authority, path).await
            }
            None => round_trip(TokioIo::new(stream), request, &authority, path).await,
        }
    };

    match tokio::time::timeout(transport.timeout, exchange).await {
        Ok(result) => result,
        Err(_) => {
            debug!(url = %request.url, "webhook request timed out");
            Err(NotifyError::Timeout(transport.timeout))
        }
    }
}

/// One request/response exchange over an established connection.
async fn round_trip<I>(io: I, request: &WebhookRequest, authority: &str, path: &str) -> NotifyResult<WebhookResponse>
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| NotifyError::Transport(format!("handshake {authority}: {e}")))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "webhook connection closed with error");
        }
    });

    let mut builder = http::Request::builder()
        .method(request.method.clone())
        .uri(path)
        .header(http::header::HOST, authority);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    let req = builder
        .body(Full::new(Bytes::from(request.body.clone())))
        .map_err(|e| NotifyError::InvalidRequest(e.to_string()))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| NotifyError::Transport(format!("request {}: {e}", request.url)))?;

    let status = resp.status().as_u16();
    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in resp.headers() {
        let value = value.to_str().unwrap_or_default();
        headers
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| NotifyError::Transport(format!("read body {}: {e}", request.url)))?
        .to_bytes();

    Ok(WebhookResponse {
        status,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

// ── Retries ────────────────────────────────────────────────────────

/// How often and how patiently to retry a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Longest a [`deliver`] call can run when every attempt takes the full
    /// `request_timeout`: all attempts plus every backoff between them.
    pub fn worst_case_delay(&self, request_timeout: Duration) -> Duration {
        let attempts = self.max_attempts.max(1);
        let mut backoff = Backoff::new(self);
        let mut waits = Duration::ZERO;
        for retry in 1..attempts {
            let delay = backoff.next_delay();
            if delay == self.max_backoff {
                // Capped from here on.
                waits = waits.saturating_add(delay.saturating_mul(attempts - retry));
                break;
            }
            waits = waits.saturating_add(delay);
        }
        request_timeout.saturating_mul(attempts).saturating_add(waits)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Exponential backoff: doubles after every failure up to the cap.
#[derive(Debug)]
pub struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            current: policy.base_backoff,
            max: policy.max_backoff,
        }
    }

    /// The delay to wait now; the following one is doubled.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.max);
        self.current = self.current.checked_mul(2).unwrap_or(self.max).min(self.max);
        delay
    }
}

/// Send `request`, retrying transport failures and 5xx responses.
///
/// After the last attempt the final response (even a 5xx) or error is
/// returned to the caller.
pub async fn deliver(
    transport: &dyn WebhookTransport,
    request: &WebhookRequest,
    policy: &RetryPolicy,
) -> NotifyResult<WebhookResponse> {
    let mut backoff = Backoff::new(policy);
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let retry_reason = match transport.send(request).await {
            Ok(resp) if resp.status >= 500 && attempt < max_attempts => {
                format!("status {}", resp.status)
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => e.to_string(),
            other => return other,
        };

        let delay = backoff.next_delay();
        warn!(
            url = %request.url,
            attempt,
            max_attempts,
            reason = %retry_reason,
            delay_ms = delay.as_millis() as u64,
            "webhook delivery failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;

    /// Replays a scripted sequence of outcomes.
    struct Scripted {
        outcomes: Mutex<Vec<NotifyResult<WebhookResponse>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(mut outcomes: Vec<NotifyResult<WebhookResponse>>) -> Self {
            outcomes.reverse();
            Self {
                outcomes: Mutex::new(outcomes),
                calls: AtomicU32::new(0),
            }
        }
    }

    impl WebhookTransport for Scripted {
        fn send<'a>(&'a self, _request: &'a WebhookRequest) -> BoxFuture<'a, NotifyResult<WebhookResponse>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.outcomes.lock().unwrap().pop().unwrap();
            Box::pin(async move { next })
        }
    }

    fn response(status: u16) -> NotifyResult<WebhookResponse> {
        Ok(WebhookResponse {
            status,
            headers: BTreeMap::new(),
            body: String::new(),
        })
    }

    fn request(url: &str) -> WebhookRequest {
        WebhookRequest {
            method: http::Method::POST,
            url: url.to_string(),
            headers: vec![("Idempotency-Key".into(), "abc".into())],
            body: r#"{"hello":"world"}"#.into(),
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(&RetryPolicy {
            max_attempts: 10,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
        });
        let delays: Vec<u64> = (0..5).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let mut backoff = Backoff::new(&RetryPolicy {
            max_attempts: 4,
            base_backoff: Duration::MAX / 2 + Duration::from_secs(1),
            max_backoff: Duration::MAX,
        });
        backoff.next_delay();
        assert_eq!(backoff.next_delay(), Duration::MAX);
        assert_eq!(backoff.next_delay(), Duration::MAX);
    }

    #[test]
    fn worst_case_delay_sums_every_backoff() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(3),
        };
        // Four attempts of 10s, then waits of 1s, 2s and 3s.
        assert_eq!(policy.worst_case_delay(Duration::from_secs(10)), Duration::from_secs(46));
        assert_eq!(RetryPolicy::none().worst_case_delay(Duration::from_secs(10)), Duration::from_secs(10));
        let huge = RetryPolicy {
            max_attempts: u32::MAX,
            base_backoff: Duration::MAX,
            max_backoff: Duration::MAX,
        };
        assert_eq!(huge.worst_case_delay(Duration::from_secs(1)), Duration::MAX);
    }

    #[tokio::test]
    async fn retries_server_errors_until_success() {
        let transport = Scripted::new(vec![response(503), response(500), response(200)]);
        let resp = deliver(&transport, &request("http://x/"), &fast_policy(3)).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn returns_last_failure_after_exhausting_attempts() {
        let transport = Scripted::new(vec![
            Err(NotifyError::Transport("refused".into())),
            Err(NotifyError::Transport("refused".into())),
        ]);
        let err = deliver(&transport, &request("http://x/"), &fast_policy(2))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Transport(_)));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let transport = Scripted::new(vec![response(400)]);
        let resp = deliver(&transport, &request("http://x/"), &fast_policy(5)).await.unwrap();
        assert_eq!(resp.status, 400);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn http_transport_round_trip() {
        async fn echo(headers: HeaderMap, body: String) -> (StatusCode, [(&'static str, String); 1], String) {
            let key = headers
                .get("idempotency-key")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            (StatusCode::ACCEPTED, [("x-key", key)], body)
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/hook", post(echo));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let resp = transport
            .send(&request(&format!("http://{addr}/hook")))
            .await
            .unwrap();
        assert_eq!(resp.status, 202);
        assert_eq!(resp.headers.get("x-key").map(String::as_str), Some("abc"));
        assert_eq!(resp.body, r#"{"hello":"world"}"#);
    }

    #[tokio::test]
    async fn http_transport_rejects_unknown_schemes() {
        let transport = HttpTransport::new(Duration::from_secs(1)).unwrap();
        let err = transport.send(&request("ftp://example.com/")).await.unwrap_err();
        assert!(matches!(err, NotifyError::InvalidRequest(_)));
    }

    /// Self-signed certificate for `localhost` and a client trusting only it.
    fn localhost_tls() -> (Arc<rustls::ServerConfig>, Arc<rustls::ClientConfig>) {
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec!["localhost".to_string()])
            .unwrap()
            .self_signed(&key_pair)
            .unwrap();
        let cert_der = rustls::pki_types::CertificateDer::from(cert.der().to_vec());
        let key_der = rustls::pki_types::PrivateKeyDer::try_from(key_pair.serialize_der()).unwrap();

        let server = rustls::ServerConfig::builder_with_provider(rustls::crypto::ring::default_provider().into())
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der.clone()], key_der)
            .unwrap();

        let mut roots = rustls::RootCertStore::empty();
        roots.add(cert_der).unwrap();
        let client = rustls::ClientConfig::builder_with_provider(rustls::crypto::ring::default_provider().into())
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();
        (Arc::new(server), Arc::new(client))
    }

    #[tokio::test]
    async fn http_transport_speaks_https() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (server_config, client_config) = localhost_tls();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut tls = tokio_rustls::TlsAcceptor::from(server_config).accept(tcp).await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 1024];
            while !String::from_utf8_lossy(&received).contains(r#"{"hello":"world"}"#) {
                let n = tls.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
            }
            tls.write_all(b"HTTP/1.1 202 Accepted\r\ncontent-length: 6\r\nconnection: close\r\n\r\nsecure")
                .await
                .unwrap();
            tls.shutdown().await.unwrap();
        });

        let transport = HttpTransport::with_tls_config(Duration::from_secs(5), client_config);
        let resp = transport
            .send(&request(&format!("https://localhost:{port}/hook")))
            .await
            .unwrap();
        assert_eq!(resp.status, 202);
        assert_eq!(resp.body, "secure");
    }

    #[tokio::test]
    async fn https_to_untrusted_server_is_transport_error() {
        let (server_config, _) = localhost_tls();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let _ = tokio_rustls::TlsAcceptor::from(server_config).accept(tcp).await;
        });

        // The Mozilla roots do not vouch for a self-signed certificate.
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let err = transport
            .send(&request(&format!("https://localhost:{port}/hook")))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Transport(ref msg) if msg.contains("tls handshake")));
    }

    #[tokio::test]
    async fn http_transport_connection_refused_is_transport_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new(Duration::from_secs(2)).unwrap();
        let err = transport
            .send(&request(&format!("http://{addr}/")))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
