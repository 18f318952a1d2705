//! TCP server for handling HTTP connections.
//!
//! Each accepted connection carries exactly one request. The connection task
//! reads until the head and the declared body have arrived, routes the
//! request, writes the response and closes. Malformed or truncated requests
//! are dropped without a response.

use crate::compress;
use crate::config::Config;
use crate::protocol::{parse_request, ParseError, ParseResult, Parser, Request, Response};
use crate::router::Router;
use crate::storage::FileStore;
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, trace, warn};

/// Maximum number of concurrent connections
const MAX_CONNECTIONS: usize = 10000;

/// Initial read buffer size
const BUFFER_SIZE: usize = 1024;

/// Per-connection settings
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
    pub max_request_size: usize,
    pub compression: bool,
}

impl From<&Config> for ConnectionOptions {
    fn from(config: &Config) -> Self {
        ConnectionOptions {
            max_request_size: config.max_request_size,
            compression: config.compression,
        }
    }
}

/// Errors that end a connection without a response
#[derive(Debug)]
pub enum ConnectionError {
    /// Socket read or write failed
    Io(io::Error),
    /// Request could not be framed or parsed
    Parse(ParseError),
    /// Peer closed the connection before sending anything
    Closed,
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::Io(e) => write!(f, "I/O error: {}", e),
            ConnectionError::Parse(e) => write!(f, "{}", e),
            ConnectionError::Closed => write!(f, "Connection closed by peer"),
        }
    }
}

impl std::error::Error for ConnectionError {}

impl From<io::Error> for ConnectionError {
    fn from(e: io::Error) -> Self {
        ConnectionError::Io(e)
    }
}

impl From<ParseError> for ConnectionError {
    fn from(e: ParseError) -> Self {
        ConnectionError::Parse(e)
    }
}

/// Server instance
pub struct Server {
    config: Config,
    router: Arc<Router>,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        let router = Router::new(FileStore::new(config.directory.clone()));

        Server {
            config,
            router: Arc::new(router),
            connection_limit: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
        }
    }

    /// Bind the configured address and begin accepting connections
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr: SocketAddr = self.config.listen.parse()?;
        let listener = TcpListener::from_std(create_listener(addr)?)?;
        info!(
            address = %self.config.listen,
            root = %self.router.store().root().display(),
            "Server listening"
        );

        self.serve(listener).await
    }

    /// Accept connections from an already bound listener
    pub async fn serve(
        &self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let options = ConnectionOptions::from(&self.config);

        loop {
            // Wait for a connection slot
            let permit = self.connection_limit.clone().acquire_owned().await?;

            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "New connection");

                    let router = Arc::clone(&self.router);

                    tokio::spawn(async move {
                        match handle_connection(stream, &router, options).await {
                            Ok(()) => trace!(peer = %addr, "Connection finished"),
                            Err(ConnectionError::Closed) => {
                                trace!(peer = %addr, "Connection closed by client")
                            }
                            Err(ConnectionError::Parse(e)) => {
                                warn!(peer = %addr, error = %e, "Dropping request")
                            }
                            Err(e) => debug!(peer = %addr, error = %e, "Connection error"),
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Handle a single client connection: one request, one response
pub async fn handle_connection<S>(
    mut stream: S,
    router: &Router,
    options: ConnectionOptions,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = read_request(&mut stream, options.max_request_size).await?;
    debug!(
        method = %request.method,
        uri = %request.target,
        version = %request.version,
        body_bytes = request.body.len(),
        "Processing request"
    );

    let mut response = router.route(&request).await;
    if options.compression {
        response = negotiate_encoding(&request, response);
    }

    trace!(
        status = response.status.code(),
        body_bytes = response.body.len(),
        "Sending response"
    );
    stream.write_all(&response.serialize()).await?;
    stream.shutdown().await?;

    Ok(())
}

/// Read until a complete request is buffered.
///
/// Reads continue until the header terminator is seen, then until the
/// declared `Content-Length` bytes of body are available.
async fn read_request<S>(stream: &mut S, max_request_size: usize) -> Result<Request, ConnectionError>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

    loop {
        let needed = match Parser::parse(&buffer) {
            ParseResult::Complete(request, consumed) => {
                if consumed < buffer.len() {
                    trace!(
                        trailing_bytes = buffer.len() - consumed,
                        "Ignoring bytes past the request"
                    );
                }
                return Ok(request);
            }
            ParseResult::Error(e) => return Err(e.into()),
            ParseResult::Incomplete => {
                if buffer.len() >= max_request_size {
                    return Err(ParseError::TooLarge(max_request_size).into());
                }
                buffer.len() + 1
            }
            ParseResult::NeedData {
                head_bytes,
                body_bytes,
            } => {
                let total = head_bytes.saturating_add(body_bytes);
                if total > max_request_size {
                    return Err(ParseError::TooLarge(max_request_size).into());
                }
                buffer.reserve(total - buffer.len());
                total
            }
        };

        while buffer.len() < needed {
            let n = stream.read_buf(&mut buffer).await?;
            if n == 0 {
                return Err(eof_error(&buffer));
            }
        }
    }
}

/// Classify an early end of stream
fn eof_error(buffer: &[u8]) -> ConnectionError {
    if buffer.is_empty() {
        return ConnectionError::Closed;
    }
    match parse_request(buffer) {
        Err(e) => ConnectionError::Parse(e),
        Ok(_) => ConnectionError::Closed,
    }
}

/// Gzip the body when the client accepts it
fn negotiate_encoding(request: &Request, response: Response) -> Response {
    let accepted = request
        .headers
        .get("accept-encoding")
        .is_some_and(compress::accepts_gzip);
    if !accepted || response.body.is_empty() {
        return response;
    }

    match compress::gzip(&response.body) {
        Ok(encoded) => response.with_encoded_body("gzip", encoded),
        Err(e) => {
            warn!(error = %e, "Compression failed, sending identity body");
            response
        }
    }
}

/// Create a TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}
