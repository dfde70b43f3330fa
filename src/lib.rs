//! An embeddable SMTP/ESMTP receiving server.
//!
//! The crate drives the RFC 5321 command/response dialogue with the
//! STARTTLS, AUTH, SIZE, PIPELINING, CHUNKING, 8BITMIME, BINARYMIME and
//! SMTPUTF8 extensions, assembles a message [`Envelope`] per transaction
//! and hands every accepted message to an [`SmtpHandler`] you provide.
//! Queueing, storage and policy stay on your side of that trait.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mailgate::{Envelope, HookError, Peer, SmtpConfig, SmtpHandler, SmtpServer};
//!
//! struct Printer;
//!
//! impl SmtpHandler for Printer {
//!     fn check_recipient(
//!         &self,
//!         _peer: &Peer,
//!         _addr: &mailgate::Address,
//!     ) -> Result<(), HookError> {
//!         Ok(())
//!     }
//!
//!     fn handle_mail(&self, _peer: &Peer, envelope: &Envelope) -> Result<String, HookError> {
//!         println!("{} bytes received", envelope.len());
//!         Ok("demo-1".to_string())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SmtpConfig {
//!         bind_addr: "127.0.0.1:2525".to_string(),
//!         ..Default::default()
//!     };
//!     SmtpServer::new(config, Arc::new(Printer)).listen_and_serve().await
//! }
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::time::timeout;

use crate::core::session::Session;
use crate::core::ConnectionStream;

pub use crate::core::address::{is_fqn, parse_address, Address, AddressError, FqnError};
pub use crate::core::auth::AuthMach;
pub use crate::core::codes::{Class, Responses, CODES};
pub use crate::core::command::{Command, CommandCode, CommandError};
pub use crate::core::envelope::Envelope;
pub use crate::core::error::Error;
pub use crate::core::hooks::{HookError, SmtpHandler};
pub use crate::core::session::{HeloType, Peer, Protocol};
pub use crate::core::tls::{TlsConfig, TlsMode, TlsState};
pub use crate::core::{Limits, SmtpConfig};

mod constants;
mod core;
mod utils;

/// The SMTP server: one shared configuration and handler, one accept
/// loop, one concurrent task per connection.
pub struct SmtpServer {
    config: Arc<SmtpConfig>,
    handler: Arc<dyn SmtpHandler>,
    shutdown: Arc<Notify>,
    shutting_down: Arc<AtomicBool>,
}

impl SmtpServer {
    pub fn new(config: SmtpConfig, handler: Arc<dyn SmtpHandler>) -> Self {
        SmtpServer {
            config: Arc::new(config),
            handler,
            shutdown: Arc::new(Notify::new()),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Asks the accept loop to exit. Sessions already running keep their
    /// connections until they finish.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    /// Binds `config.bind_addr` and serves until shutdown or a fatal
    /// accept error.
    pub async fn listen_and_serve(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("smtp server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serves connections from a listener the caller has bound.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                info!("accept loop exiting, server is shutting down");
                return Ok(());
            }

            let (stream, peer_addr) = tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("accept loop exiting, server is shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) if is_transient_accept_error(&e) => {
                        warn!("transient accept error: {e}");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                },
            };

            debug!("accepted connection from {peer_addr}");
            let config = Arc::clone(&self.config);
            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                match handle_client(stream, peer_addr, config, handler).await {
                    Ok(()) => debug!("session with {peer_addr} finished"),
                    Err(e) => warn!("session with {peer_addr} ended with error: {e}"),
                }
            });
        }
    }
}

/// Runs one session over a fresh connection, performing the implicit
/// handshake first when the server runs in SMTPS mode. The connection is
/// released when the session future completes or is dropped.
async fn handle_client(
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<SmtpConfig>,
    handler: Arc<dyn SmtpHandler>,
) -> std::result::Result<(), Error> {
    let local_addr = stream.local_addr()?;
    let mut stream = ConnectionStream::Tcp(stream);

    if config.tls_mode.is_direct_tls() {
        let Some(tls_config) = config.tls_mode.config().cloned() else {
            return Err(Error::Tls("implicit tls without credentials".to_string()));
        };
        stream = match timeout(config.limits.tls_setup, stream.upgrade_to_tls(&tls_config)).await
        {
            Ok(Ok(secure)) => secure,
            Ok(Err((e, _))) => return Err(e),
            Err(e) => return Err(e.into()),
        };
    }

    let session = Session::new(peer_addr, local_addr, config, handler);
    session.serve(stream).await
}

fn is_transient_accept_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
    )
}

/// Convenience wrapper constructing a server and serving immediately.
pub async fn start_server(config: SmtpConfig, handler: Arc<dyn SmtpHandler>) -> Result<()> {
    let server = SmtpServer::new(config, handler);
    server.listen_and_serve().await
}
