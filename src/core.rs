use std::pin::Pin;
use std::task::Poll;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::core::auth::AuthMach;
use crate::core::error::Error;
use crate::core::tls::{TlsConfig, TlsMode, TlsState};

pub mod address;
pub mod auth;
pub mod codes;
pub mod command;
pub mod envelope;
pub mod error;
pub mod hooks;
pub mod received;
pub mod session;
pub mod stream;
pub mod tls;

/// Per-session attempt, size and time limits.
///
/// The four durations bound the individual suspension points of a
/// session: command reads, message input, reply writes and the STARTTLS
/// handshake.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Deadline for reading the next command line.
    pub cmd_input: Duration,
    /// Deadline for receiving a whole message body or BDAT chunk.
    pub msg_input: Duration,
    /// Deadline for writing a reply batch.
    pub reply_out: Duration,
    /// Deadline for completing the STARTTLS handshake.
    pub tls_setup: Duration,
    /// Maximum message size in octets.
    pub msg_size: u64,
    /// Number of bad commands tolerated before the session is dropped.
    pub bad_cmds: usize,
    /// Maximum number of recipients per message.
    pub max_rcpt_count: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            cmd_input: Duration::from_secs(2 * 60),
            msg_input: Duration::from_secs(10 * 60),
            reply_out: Duration::from_secs(2 * 60),
            tls_setup: Duration::from_secs(4 * 60),
            msg_size: 5 * 1024 * 1024,
            bad_cmds: 5,
            max_rcpt_count: 200,
        }
    }
}

/// SMTP server configuration.
///
/// One value is shared read-only by every session; it carries the server
/// identity announced on the wire, the TLS and authentication setup and
/// the session [`Limits`].
///
/// # Example
///
/// ```no_run
/// use mailgate::{AuthMach, SmtpConfig};
///
/// let config = SmtpConfig {
///     hostname: "mx.example.org".to_string(),
///     bind_addr: "0.0.0.0:25".to_string(),
///     auth_machs: vec![AuthMach::Plain, AuthMach::Login],
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// Hostname announced in the banner and HELO/EHLO replies. Defaults
    /// to the system hostname.
    pub hostname: String,

    /// Software name announced in the banner and trace headers.
    pub appname: String,

    /// Software version announced next to `appname`.
    pub version: String,

    /// Free-text suffix of the welcome banner.
    pub announce: String,

    /// Append an RFC 1123 timestamp to the welcome banner.
    pub advertise_time: bool,

    /// TCP address `listen_and_serve` binds to.
    pub bind_addr: String,

    /// TLS behavior, see [`TlsMode`].
    pub tls_mode: TlsMode,

    /// Offered authentication mechanisms. Leave empty to disable AUTH;
    /// when non-empty, mail transactions require authentication.
    pub auth_machs: Vec<AuthMach>,

    /// Verify that MAIL FROM domains resolve to an MX or A record.
    pub check_sender_fqn: bool,

    /// Skip reverse DNS lookups; peers then appear as "unknown" in trace
    /// headers.
    pub disable_reverse_dns: bool,

    /// Session limits.
    pub limits: Limits,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        let hostname = hostname::get()
            .map(|s| s.into_string().unwrap_or_default())
            .unwrap_or_else(|_| "localhost".to_string());

        SmtpConfig {
            hostname,
            appname: "mailgate".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            announce: "ready".to_string(),
            advertise_time: false,
            bind_addr: "127.0.0.1:25".to_string(),
            tls_mode: TlsMode::Disabled,
            auth_machs: Vec::new(),
            check_sender_fqn: false,
            disable_reverse_dns: false,
            limits: Limits::default(),
        }
    }
}

/// A unified network stream, plain TCP or one of the TLS backends, so
/// the session can keep a single type across a STARTTLS upgrade.
pub(crate) enum ConnectionStream {
    Tcp(TcpStream),
    #[cfg(feature = "native-tls-backend")]
    NativeTls(Box<tokio_native_tls::TlsStream<TcpStream>>),
    #[cfg(feature = "rustls-backend")]
    Rustls(Box<tokio_rustls::server::TlsStream<TcpStream>>),
}

impl AsyncRead for ConnectionStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut *self {
            ConnectionStream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(feature = "native-tls-backend")]
            ConnectionStream::NativeTls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
            #[cfg(feature = "rustls-backend")]
            ConnectionStream::Rustls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ConnectionStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match &mut *self {
            ConnectionStream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(feature = "native-tls-backend")]
            ConnectionStream::NativeTls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
            #[cfg(feature = "rustls-backend")]
            ConnectionStream::Rustls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut *self {
            ConnectionStream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(feature = "native-tls-backend")]
            ConnectionStream::NativeTls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
            #[cfg(feature = "rustls-backend")]
            ConnectionStream::Rustls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut *self {
            ConnectionStream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(feature = "native-tls-backend")]
            ConnectionStream::NativeTls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
            #[cfg(feature = "rustls-backend")]
            ConnectionStream::Rustls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

impl Unpin for ConnectionStream {}

impl ConnectionStream {
    pub(crate) fn is_tls(&self) -> bool {
        !matches!(self, Self::Tcp(_))
    }

    /// The negotiated TLS parameters, if the stream is encrypted.
    pub(crate) fn tls_state(&self) -> Option<TlsState> {
        match self {
            Self::Tcp(_) => None,
            #[cfg(feature = "native-tls-backend")]
            Self::NativeTls(_) => Some(TlsState {
                version: "TLS".to_string(),
                cipher: "unknown".to_string(),
            }),
            #[cfg(feature = "rustls-backend")]
            Self::Rustls(stream) => {
                let (_, conn) = stream.get_ref();
                Some(TlsState {
                    version: conn
                        .protocol_version()
                        .map(|v| format!("{v:?}"))
                        .unwrap_or_else(|| "unknown".to_string()),
                    cipher: conn
                        .negotiated_cipher_suite()
                        .map(|c| format!("{:?}", c.suite()))
                        .unwrap_or_else(|| "unknown".to_string()),
                })
            }
        }
    }

    /// Runs the server-side handshake over a plain stream.
    ///
    /// On a rustls failure the plaintext stream is handed back so a final
    /// reply can still be written before closing; the native backend
    /// consumes the stream on failure.
    pub(crate) async fn upgrade_to_tls(
        self,
        config: &TlsConfig,
    ) -> Result<ConnectionStream, (Error, Option<ConnectionStream>)> {
        let stream = match self {
            ConnectionStream::Tcp(stream) => stream,
            other => return Err((Error::AlreadyTls, Some(other))),
        };

        match config {
            #[cfg(feature = "rustls-backend")]
            TlsConfig::Rustls(server_config) => {
                let acceptor = tokio_rustls::TlsAcceptor::from(std::sync::Arc::clone(server_config));
                match acceptor.accept(stream).into_fallible().await {
                    Ok(secure) => Ok(ConnectionStream::Rustls(Box::new(secure))),
                    Err((e, stream)) => {
                        Err((Error::Io(e), Some(ConnectionStream::Tcp(stream))))
                    }
                }
            }
            #[cfg(feature = "native-tls-backend")]
            TlsConfig::NativeTls(identity) => {
                let acceptor = native_tls::TlsAcceptor::new(identity.clone())
                    .map_err(|e| (Error::Tls(e.to_string()), None))?;
                let acceptor = tokio_native_tls::TlsAcceptor::from(acceptor);
                match acceptor.accept(stream).await {
                    Ok(secure) => Ok(ConnectionStream::NativeTls(Box::new(secure))),
                    Err(e) => Err((Error::Tls(e.to_string()), None)),
                }
            }
        }
    }
}
