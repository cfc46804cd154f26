//! Contains the HTTP server which exposes the outputs.
//!
//! Each `http` service of the config opens a server socket on its `listen` address and serves
//! either all outputs or the ones it names. If a certificate and a private key are given, all
//! connections are secured via TLS.
//!
//! The socket is bound while the system starts, so that a port which is already in use is
//! reported right away. Connections are then accepted by [Server::event_loop] which runs until
//! the platform is terminated.
//!
//! Requests are handled by the outputs, which read files and are therefore blocking. Each
//! request is moved to a blocking thread which streams the response back in chunks via a
//! bounded channel (see [ChannelResponse]). If the client goes away, the channel is closed and
//! the output stops reading records.
//!
//! # Example
//!
//! ```no_run
//! # use rods::config::services::HttpConfig;
//! # use rods::config::Config;
//! # use rods::platform::Platform;
//! # use rods::registry::Registry;
//! # use rods::server::Server;
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("rods.yaml").await?;
//!     let registry = Registry::new(&config)?;
//!     let platform = Platform::new();
//!
//!     let http = HttpConfig {
//!         listen: "127.0.0.1:8080".to_owned(),
//!         tls: None,
//!         outputs: None,
//!     };
//!     let server = Server::bind("api", &http, &registry, &platform).await?;
//!     server.event_loop().await;
//!
//!     Ok(())
//! }
//! ```
use crate::config::services::{HttpConfig, TlsConfig};
use crate::fmt::format_short_duration;
use crate::outputs::{dispatch, Output};
use crate::platform::Platform;
use crate::registry::Registry;
use crate::request::Request;
use crate::response::ChannelResponse;
use crate::spawn;
use anyhow::Context;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::Http;
use hyper::service::service_fn;
use hyper::{Body, Method, StatusCode};
use std::convert::Infallible;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_rustls::TlsAcceptor;
use tokio_stream::wrappers::ReceiverStream;

/// Specifies the timeout when waiting for a new incoming connection.
///
/// When waiting for a new connection we need to interrupt this every once in a while so that
/// we can check if the platform has been shut down.
const CONNECT_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Determines how many chunks of a response may be buffered before the output has to wait for
/// the client.
const RESPONSE_CHUNKS: usize = 16;

/// Represents a server socket which serves a set of outputs via HTTP or HTTPS.
pub struct Server {
    name: String,
    address: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    tls: Option<TlsAcceptor>,
    outputs: Vec<Arc<dyn Output>>,
    platform: Arc<Platform>,
}

/// Contains all servers of the platform.
pub struct Servers {
    servers: Vec<Arc<Server>>,
}

impl Servers {
    /// Creates a new list of servers.
    pub fn new(servers: Vec<Arc<Server>>) -> Self {
        Servers { servers }
    }

    /// Returns all servers.
    pub fn servers(&self) -> &[Arc<Server>] {
        &self.servers
    }

    /// Returns the server of the service with the given name.
    pub fn find(&self, name: &str) -> Option<&Arc<Server>> {
        self.servers.iter().find(|server| server.name == name)
    }
}

impl Server {
    /// Verifies the given service and binds its server socket.
    ///
    /// Note that this doesn't accept any connections yet. This is done by
    /// [event_loop](Server::event_loop) or [fork](Server::fork).
    pub async fn bind(
        name: &str,
        config: &HttpConfig,
        registry: &Registry,
        platform: &Arc<Platform>,
    ) -> anyhow::Result<Arc<Server>> {
        let path = format!("services.{}", name);
        let outputs = select_outputs(config, registry, &path)?;
        let tls = match &config.tls {
            Some(tls) => Some(load_tls(tls, &path)?),
            None => None,
        };

        let listener = TcpListener::bind(&config.listen).await.with_context(|| {
            format!(
                "{}.listen: Cannot open server socket on {}",
                path, config.listen
            )
        })?;
        let address = listener.local_addr()?;
        log::info!(
            "Opened server socket for '{}' on {}://{} serving {} output(s)...",
            name,
            if tls.is_some() { "https" } else { "http" },
            address,
            outputs.len()
        );

        Ok(Arc::new(Server {
            name: name.to_owned(),
            address,
            listener: Mutex::new(Some(listener)),
            tls,
            outputs,
            platform: platform.clone(),
        }))
    }

    /// Returns the name of the service.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the address the server socket is bound to.
    ///
    /// If the config specifies port 0, this contains the port chosen by the operating system.
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Determines if the server uses TLS.
    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }

    /// Starts the event loop in a separate task.
    pub fn fork(server: &Arc<Server>) {
        let cloned_server = server.clone();
        spawn!(async move {
            cloned_server.event_loop().await;
        });
    }

    /// Accepts incoming connections until the platform is terminated.
    pub async fn event_loop(self: Arc<Self>) {
        let listener = match self.listener.lock().map(|mut listener| listener.take()) {
            Ok(Some(listener)) => listener,
            Ok(None) => {
                log::error!("The event loop of '{}' is already running.", self.name);
                return;
            }
            Err(error) => {
                log::error!("Cannot start the event loop of '{}': {}", self.name, error);
                return;
            }
        };

        while self.platform.is_running() {
            // We use a timeout here so that the while condition (esp. platform.is_running())
            // is checked every once in a while...
            if let Ok(stream) = tokio::time::timeout(CONNECT_WAIT_TIMEOUT, listener.accept()).await
            {
                match stream {
                    Ok((stream, _)) => self.handle_new_connection(stream),
                    Err(error) => log::error!(
                        "Failed to accept a connection on {}: {}",
                        self.address,
                        error
                    ),
                }
            }
        }

        log::info!("Closing server socket on {}.", self.address);
    }

    /// Handles a new incoming connection by forking a task which serves it.
    fn handle_new_connection(self: &Arc<Self>, stream: TcpStream) {
        let server = self.clone();
        spawn!(async move {
            let _ = stream.set_nodelay(true);
            let peer_address = stream
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "<unknown>".to_owned());

            let service_server = server.clone();
            let service = service_fn(move |request| service_server.clone().serve(request));
            let result = match &server.tls {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(stream) => Http::new().serve_connection(stream, service).await,
                    Err(error) => {
                        log::debug!("TLS handshake with {} failed: {}", peer_address, error);
                        return;
                    }
                },
                None => Http::new().serve_connection(stream, service).await,
            };

            if let Err(error) = result {
                log::debug!(
                    "An IO error occurred in connection {}: {}",
                    peer_address,
                    error
                );
            }
        });
    }

    fn route(&self, path: &str) -> Option<&Arc<dyn Output>> {
        self.outputs.iter().find(|output| output.matches(path))
    }

    async fn serve(
        self: Arc<Self>,
        request: hyper::Request<Body>,
    ) -> Result<hyper::Response<Body>, Infallible> {
        let watch = Instant::now();
        let method = request.method().clone();
        let uri = request.uri().clone();

        let response = if method != Method::GET {
            error_response(
                StatusCode::METHOD_NOT_ALLOWED,
                format!("The method {} is not supported.", method),
            )
        } else {
            let request = Request::new(uri.path(), uri.query());
            match self.route(request.path()) {
                Some(output) => respond(output.clone(), request).await,
                None => error_response(
                    StatusCode::NOT_FOUND,
                    format!("Unknown endpoint: {}", request.path()),
                ),
            }
        };

        log::debug!(
            "{} {} -> {} ({})",
            method,
            uri,
            response.status().as_u16(),
            format_short_duration(watch.elapsed())
        );

        Ok(response)
    }
}

/// Lets the output handle the request in a blocking thread and streams its response.
async fn respond(output: Arc<dyn Output>, request: Request) -> hyper::Response<Body> {
    let (head_sender, head) = oneshot::channel();
    let (body_sender, body) = mpsc::channel(RESPONSE_CHUNKS);
    let content_type = HeaderValue::from_str(output.response_type())
        .unwrap_or_else(|_| HeaderValue::from_static("application/json"));

    let _ = tokio::task::spawn_blocking(move || {
        let mut sink = ChannelResponse::new(head_sender, body_sender);
        dispatch(output.as_ref(), &request, &mut sink);
    });

    match head.await {
        Ok(status) => {
            let mut response = hyper::Response::new(Body::wrap_stream(ReceiverStream::new(body)));
            *response.status_mut() = status;
            let _ = response.headers_mut().insert(CONTENT_TYPE, content_type);
            response
        }
        Err(_) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "The output didn't produce a response.".to_owned(),
        ),
    }
}

fn error_response(status: StatusCode, message: String) -> hyper::Response<Body> {
    let body = serde_json::json!({ "error": message }).to_string();
    let mut response = hyper::Response::new(Body::from(body));
    *response.status_mut() = status;
    let _ = response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    response
}

/// Determines the outputs served by a service and ensures that their endpoints are unique.
fn select_outputs(
    config: &HttpConfig,
    registry: &Registry,
    path: &str,
) -> anyhow::Result<Vec<Arc<dyn Output>>> {
    let outputs = match &config.outputs {
        Some(names) => names
            .iter()
            .enumerate()
            .map(|(index, name)| {
                registry.output(name).cloned().ok_or_else(|| {
                    anyhow::anyhow!("{}.outputs[{}]: Unknown output '{}'", path, index, name)
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?,
        None => registry.outputs().cloned().collect(),
    };

    for (index, output) in outputs.iter().enumerate() {
        if let Some(other) = outputs[..index]
            .iter()
            .find(|other| other.endpoint() == output.endpoint())
        {
            return Err(anyhow::anyhow!(
                "{}.outputs: The endpoint {} is served by both '{}' and '{}'",
                path,
                output.endpoint(),
                other.name(),
                output.name()
            ));
        }
    }

    Ok(outputs)
}

/// Loads the certificate chain and the private key used to accept TLS connections.
fn load_tls(config: &TlsConfig, path: &str) -> anyhow::Result<TlsAcceptor> {
    let mut reader = BufReader::new(
        std::fs::File::open(&config.certificate).with_context(|| {
            format!(
                "{}.certificate: Cannot open {}",
                path,
                config.certificate.display()
            )
        })?,
    );
    let certificates = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("{}.certificate: Cannot parse the certificates", path))?;
    if certificates.is_empty() {
        return Err(anyhow::anyhow!(
            "{}.certificate: {} contains no certificate",
            path,
            config.certificate.display()
        ));
    }

    let mut reader = BufReader::new(
        std::fs::File::open(&config.private_key).with_context(|| {
            format!(
                "{}.privateKey: Cannot open {}",
                path,
                config.private_key.display()
            )
        })?,
    );
    let key = rustls_pemfile::private_key(&mut reader)
        .with_context(|| format!("{}.privateKey: Cannot parse the private key", path))?
        .ok_or_else(|| {
            anyhow::anyhow!(
                "{}.privateKey: {} contains no private key",
                path,
                config.private_key.display()
            )
        })?;

    let tls_config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .with_context(|| format!("{}: Cannot set up TLS", path))?
    .with_no_client_auth()
    .with_single_cert(certificates, key)
    .with_context(|| format!("{}: The certificate doesn't match the private key", path))?;

    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}
