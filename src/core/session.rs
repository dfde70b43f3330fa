use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use log::{debug, info, warn};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::time::timeout;

use crate::constants::{MAIL_FROM_RE, RCPT_TO_RE};
use crate::core::address::{is_fqn, parse_address, reverse_lookup, AddressError, FqnError};
use crate::core::codes::CODES;
use crate::core::command::{Command, CommandCode};
use crate::core::envelope::Envelope;
use crate::core::error::Error;
use crate::core::hooks::{HookError, SmtpHandler};
use crate::core::received::{received_header, ReceivedContext};
use crate::core::stream::{ReadCommand, StreamController};
use crate::core::tls::TlsState;
use crate::core::{ConnectionStream, SmtpConfig};
use crate::utils::parser::parse_ext_param;

/// The protocol level negotiated with the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Smtp,
    Esmtp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Smtp => write!(f, "SMTP"),
            Protocol::Esmtp => write!(f, "ESMTP"),
        }
    }
}

/// Which greeting form the peer used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeloType {
    Helo,
    Ehlo,
}

/// The client side of a session: its identity as established on the
/// wire, plus authentication state once AUTH succeeds.
#[derive(Debug)]
pub struct Peer {
    /// Remote socket address of the connection.
    pub remote_addr: SocketAddr,
    /// Local hostname this server answers as.
    pub server_name: String,
    /// Name presented in HELO/EHLO, once seen.
    pub helo_name: Option<String>,
    pub helo_type: Option<HeloType>,
    pub protocol: Protocol,
    /// Negotiated TLS parameters, absent on plaintext connections.
    pub tls_state: Option<TlsState>,
    /// Username accepted by the authenticator.
    pub username: Option<String>,
    pub authenticated: bool,
    /// Reserved for embedder extensions; the core never writes it.
    pub additional: HashMap<String, String>,
}

/// Session states and the transitions of the mail transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Init,
    GotMail,
    GotRcpt,
    ReadyForData,
    GettingData,
    DataDone,
    WaitingForQuit,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyType {
    SevenBit,
    EightBitMime,
    BinaryMime,
}

impl BodyType {
    fn from_param(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "7BIT" => Some(BodyType::SevenBit),
            "8BITMIME" => Some(BodyType::EightBitMime),
            "BINARYMIME" => Some(BodyType::BinaryMime),
            _ => None,
        }
    }
}

/// One SMTP session, owning the connection and the envelope being built
/// for the lifetime of the TCP connection.
pub(crate) struct Session {
    pub(crate) id: String,
    pub(crate) config: Arc<SmtpConfig>,
    pub(crate) handler: Arc<dyn SmtpHandler>,
    pub(crate) envelope: Envelope,
    pub(crate) peer: Peer,
    pub(crate) local_addr: SocketAddr,
    state: SessionState,
    pub(crate) bad_commands: usize,
    vrfy_count: usize,
    body_type: Option<BodyType>,
    helo_seen: bool,
    start: Instant,
}

impl Session {
    pub(crate) fn new(
        remote_addr: SocketAddr,
        local_addr: SocketAddr,
        config: Arc<SmtpConfig>,
        handler: Arc<dyn SmtpHandler>,
    ) -> Self {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(char::from)
            .collect();

        let peer = Peer {
            remote_addr,
            server_name: config.hostname.clone(),
            helo_name: None,
            helo_type: None,
            protocol: Protocol::Smtp,
            tls_state: None,
            username: None,
            authenticated: false,
            additional: HashMap::new(),
        };

        Session {
            id,
            envelope: Envelope::new(config.limits.max_rcpt_count),
            config,
            handler,
            peer,
            local_addr,
            state: SessionState::Init,
            bad_commands: 0,
            vrfy_count: 0,
            body_type: None,
            helo_seen: false,
            start: Instant::now(),
        }
    }

    /// Drives the command/response loop until QUIT, a fatal error or the
    /// bad-command threshold. The connection closes when the stream is
    /// dropped on return, on every exit path.
    pub(crate) async fn serve(mut self, stream: ConnectionStream) -> Result<(), Error> {
        self.peer.tls_state = stream.tls_state();
        let mut io = StreamController::new(stream);

        self.handle_welcome(&mut io).await?;

        while self.state != SessionState::Aborted {
            let line = match timeout(self.config.limits.cmd_input, io.read_command_line()).await {
                Ok(Ok(ReadCommand::Line(line))) => line,
                Ok(Ok(ReadCommand::TooLong)) => {
                    self.bad_command(&mut io, &CODES.fail_line_too_long).await?;
                    continue;
                }
                Ok(Err(Error::ConnectionClosed)) => {
                    debug!("{} connection closed by {}", self.id, self.peer.remote_addr);
                    break;
                }
                Ok(Err(e)) => {
                    warn!("{} read error: {}", self.id, e);
                    break;
                }
                Err(_) => {
                    warn!("{} command input timed out", self.id);
                    break;
                }
            };

            let Ok(text) = std::str::from_utf8(&line) else {
                warn!("{} received a non-UTF-8 command line", self.id);
                self.bad_command(&mut io, &CODES.fail_unrecognized_cmd)
                    .await?;
                continue;
            };

            let cmd = match text.trim_end().parse::<Command>() {
                Ok(cmd) => cmd,
                Err(e) => {
                    debug!("{} unrecognized command {:?}: {}", self.id, text, e);
                    self.bad_command(&mut io, &CODES.fail_unrecognized_cmd)
                        .await?;
                    continue;
                }
            };

            if self.state == SessionState::WaitingForQuit && cmd.code != CommandCode::Quit {
                self.bad_command(&mut io, &CODES.fail_bad_sequence).await?;
                continue;
            }

            debug!("{} received command '{}'", self.id, cmd);
            match cmd.code {
                CommandCode::Helo => self.cmd_helo(&mut io, &cmd).await?,
                CommandCode::Ehlo => self.cmd_ehlo(&mut io, &cmd).await?,
                CommandCode::Mail => self.cmd_mail(&mut io, &cmd).await?,
                CommandCode::Rcpt => self.cmd_rcpt(&mut io, &cmd).await?,
                CommandCode::Data => self.cmd_data(&mut io).await?,
                CommandCode::Bdat => self.cmd_bdat(&mut io, &cmd).await?,
                CommandCode::Rset => self.cmd_rset(&mut io).await?,
                CommandCode::Noop => self.out(&mut io, &CODES.success_noop_cmd).await?,
                CommandCode::Vrfy => self.cmd_vrfy(&mut io).await?,
                CommandCode::Expn => self.out(&mut io, &CODES.success_expn_cmd).await?,
                CommandCode::Help => self.out(&mut io, &CODES.success_help_cmd).await?,
                CommandCode::Auth => self.cmd_auth(&mut io, &cmd).await?,
                CommandCode::Quit => self.cmd_quit(&mut io).await?,
                CommandCode::StartTls => {
                    if self.cmd_starttls(&mut io).await? {
                        match self.negotiate_tls(io).await? {
                            Some(upgraded) => io = upgraded,
                            None => break,
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Greets the peer, or rejects the whole session with a 554 when the
    /// connection check vetoes it.
    async fn handle_welcome(&mut self, io: &mut StreamController) -> Result<(), Error> {
        if let Err(err) = self.handler.check_connection(&self.peer) {
            warn!(
                "{} connection from {} refused: {}",
                self.id, self.peer.remote_addr, err
            );
            self.state = SessionState::WaitingForQuit;
            return self.out(io, &format!("554 {err}")).await;
        }

        let proto = if self.config.tls_mode.has_tls() {
            Protocol::Esmtp
        } else {
            Protocol::Smtp
        };
        let mut banner = format!(
            "220 {} {} {}({})",
            self.config.hostname, proto, self.config.appname, self.config.version
        );
        if !self.config.announce.is_empty() {
            banner.push(' ');
            banner.push_str(&self.config.announce);
        }
        if self.config.advertise_time {
            banner.push_str(&format!(
                "; {}",
                Utc::now().format("%a, %d %b %Y %H:%M:%S GMT")
            ));
        }
        self.out(io, &banner).await
    }

    async fn cmd_helo(&mut self, io: &mut StreamController, cmd: &Command) -> Result<(), Error> {
        let Some(name) = cmd.arguments.first().cloned() else {
            return self.bad_command(io, &CODES.fail_missing_argument).await;
        };

        self.reset_transaction();
        self.helo_seen = true;
        self.peer.helo_name = Some(name.clone());
        self.peer.helo_type = Some(HeloType::Helo);
        self.peer.protocol = Protocol::Smtp;

        if let Err(err) = self.handler.check_helo(&self.peer, &name) {
            return self.out(io, &format!("550 {err}")).await;
        }

        let reply = format!(
            "250 {} hello {}",
            self.config.hostname, self.peer.remote_addr
        );
        self.out(io, &reply).await
    }

    async fn cmd_ehlo(&mut self, io: &mut StreamController, cmd: &Command) -> Result<(), Error> {
        let Some(name) = cmd.arguments.first().cloned() else {
            return self.bad_command(io, &CODES.fail_missing_argument).await;
        };

        self.reset_transaction();
        self.helo_seen = true;
        self.peer.helo_name = Some(name.clone());
        self.peer.helo_type = Some(HeloType::Ehlo);
        self.peer.protocol = Protocol::Esmtp;

        if let Err(err) = self.handler.check_helo(&self.peer, &name) {
            return self.out(io, &format!("550 {err}")).await;
        }

        let mut lines = Vec::with_capacity(10);
        lines.push(format!(
            "250-{} hello {}",
            self.config.hostname, self.peer.remote_addr
        ));
        lines.push("250-8BITMIME".to_string());
        lines.push("250-CHUNKING".to_string());
        lines.push("250-BINARYMIME".to_string());
        lines.push("250-SMTPUTF8".to_string());
        lines.push("250-PIPELINING".to_string());
        if self.config.tls_mode.allows_starttls() && !io.is_tls {
            lines.push("250-STARTTLS".to_string());
        }
        // RFC 4954: plaintext password mechanisms must not be offered on
        // a channel that cannot be upgraded to TLS.
        if !self.config.auth_machs.is_empty() && self.config.tls_mode.has_tls() {
            let machs = self
                .config
                .auth_machs
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            lines.push(format!("250-AUTH {machs}"));
        }
        lines.push("250-HELP".to_string());
        lines.push(format!("250 SIZE {}", self.config.limits.msg_size));

        self.out_many(io, &lines).await
    }

    async fn cmd_mail(&mut self, io: &mut StreamController, cmd: &Command) -> Result<(), Error> {
        if self.config.tls_mode.tls_mandatory() && !io.is_tls {
            return self.out(io, &CODES.fail_encryption_needed).await;
        }
        if !self.config.auth_machs.is_empty() && !self.peer.authenticated {
            return self.out(io, &CODES.fail_access_denied).await;
        }
        if self.envelope.is_set() {
            return self.bad_command(io, &CODES.fail_nested_mail_cmd).await;
        }

        let Some(caps) = MAIL_FROM_RE.captures(cmd.data.trim()) else {
            return self.bad_command(io, &CODES.fail_invalid_address).await;
        };
        let Some(addr_src) = caps.get(1).map(|m| m.as_str()) else {
            return self.bad_command(io, &CODES.fail_invalid_address).await;
        };

        let mail_from = match parse_address(addr_src) {
            Ok(addr) => addr,
            Err(e) => return self.bad_command(io, address_error_reply(&e)).await,
        };

        if let Err(err) = self.handler.check_sender(&self.peer, &mail_from) {
            return self
                .out(io, &format!("{} {}", CODES.fail_access_denied, err))
                .await;
        }

        let mut body_type = None;
        if let Some(params) = caps.get(2).map(|m| m.as_str()) {
            for param in params.split_whitespace() {
                let Some((key, value)) = parse_ext_param(param) else {
                    return self.bad_command(io, &CODES.fail_invalid_address).await;
                };
                match key.to_ascii_uppercase().as_str() {
                    "SIZE" => {
                        let Ok(declared) = value.parse::<u64>() else {
                            return self.bad_command(io, &CODES.fail_invalid_extension).await;
                        };
                        if declared > self.config.limits.msg_size {
                            return self.out(io, &CODES.fail_too_big).await;
                        }
                    }
                    "BODY" => match BodyType::from_param(value) {
                        Some(bt) => body_type = Some(bt),
                        None => {
                            return self.bad_command(io, &CODES.fail_invalid_extension).await
                        }
                    },
                    // ALT-ADDRESS (RFC 6531) is accepted but not
                    // interpreted; the primary address is kept.
                    "ALT-ADDRESS" => {}
                    _ => return self.out(io, &CODES.fail_unsupported_parameter).await,
                }
            }
        }

        if self.config.check_sender_fqn {
            match is_fqn(&mail_from.domain).await {
                Ok(()) => {}
                Err(FqnError::Unresolvable) => {
                    return self.out(io, &CODES.error_unable_to_resolve_host).await
                }
                Err(FqnError::Unqualified) => {
                    return self.out(io, &CODES.fail_unqualified_host_name).await
                }
            }
        }

        info!("{} mail from <{}>", self.id, mail_from);
        if let Some(bt) = body_type {
            self.body_type = Some(bt);
        }
        self.envelope.mail_from = Some(mail_from);

        match self.state {
            SessionState::Init => self.state = SessionState::GotMail,
            SessionState::GotRcpt => self.state = SessionState::ReadyForData,
            _ => {
                self.state = SessionState::Aborted;
                return self.out(io, &CODES.fail_bad_sequence).await;
            }
        }
        self.out(io, &CODES.success_mail_cmd).await
    }

    async fn cmd_rcpt(&mut self, io: &mut StreamController, cmd: &Command) -> Result<(), Error> {
        if self.config.tls_mode.tls_mandatory() && !io.is_tls {
            return self.out(io, &CODES.fail_encryption_needed).await;
        }
        if !self.config.auth_machs.is_empty() && !self.peer.authenticated {
            return self.out(io, &CODES.fail_access_denied).await;
        }
        if !self.helo_seen {
            return self.bad_command(io, &CODES.fail_bad_sequence).await;
        }

        let Some(caps) = RCPT_TO_RE.captures(cmd.data.trim()) else {
            return self.bad_command(io, &CODES.fail_invalid_recipient).await;
        };
        let Some(addr_src) = caps.get(1).map(|m| m.as_str().trim()) else {
            return self.bad_command(io, &CODES.fail_invalid_recipient).await;
        };

        // RFC 5321 section 4.5.1: the postmaster mailbox must be
        // reachable without a domain.
        let postmaster;
        let addr_src = if addr_src.eq_ignore_ascii_case("<postmaster>")
            || addr_src.eq_ignore_ascii_case("postmaster")
        {
            postmaster = format!("<postmaster@{}>", self.peer.server_name);
            postmaster.as_str()
        } else {
            addr_src
        };

        let rcpt = match parse_address(addr_src) {
            Ok(addr) => addr,
            Err(e) => return self.bad_command(io, address_error_reply(&e)).await,
        };

        // Authenticated peers relay; everyone else has to name a
        // recipient this deployment accepts.
        if !self.peer.authenticated {
            if let Err(err) = self.handler.check_recipient(&self.peer, &rcpt) {
                let reply = match err {
                    HookError::RecipientNotFound => CODES.fail_mailbox_doesnt_exist.clone(),
                    HookError::MailboxFull => CODES.fail_mailbox_full.clone(),
                    HookError::Reject(reason) => {
                        format!("{} {}", CODES.fail_access_denied, reason)
                    }
                };
                return self.out(io, &reply).await;
            }
        }

        if self.envelope.add_recipient(rcpt).is_err() {
            return self.out(io, &CODES.error_too_many_recipients).await;
        }

        match self.state {
            SessionState::GotMail => self.state = SessionState::ReadyForData,
            SessionState::Init => self.state = SessionState::GotRcpt,
            SessionState::GotRcpt | SessionState::ReadyForData => {}
            _ => {
                self.state = SessionState::Aborted;
                return self.out(io, &CODES.fail_bad_sequence).await;
            }
        }
        self.out(io, &CODES.success_rcpt_cmd).await
    }

    async fn cmd_data(&mut self, io: &mut StreamController) -> Result<(), Error> {
        // RFC 3030: DATA cannot carry a BINARYMIME body; the transaction
        // state is indeterminate afterwards.
        if self.body_type == Some(BodyType::BinaryMime) {
            self.state = SessionState::Aborted;
            return self.out(io, &CODES.fail_bad_sequence).await;
        }

        if self.envelope.begin_data().is_err() {
            return self.out(io, &CODES.fail_no_recipients_data_cmd).await;
        }

        if self.state != SessionState::ReadyForData {
            self.state = SessionState::Aborted;
            return self.out(io, &CODES.fail_bad_sequence).await;
        }

        self.state = SessionState::GettingData;
        self.out(io, &CODES.success_data_cmd).await?;

        let body = match timeout(
            self.config.limits.msg_input,
            io.read_mail_data(self.config.limits.msg_size),
        )
        .await
        {
            Ok(Ok(body)) => body,
            Ok(Err(Error::MaxSizeExceeded { limit })) => {
                warn!("{} message exceeded {} bytes", self.id, limit);
                self.out(io, &CODES.fail_too_big).await?;
                self.reset_transaction();
                return Ok(());
            }
            Ok(Err(e)) => {
                warn!("{} data read error: {}", self.id, e);
                self.state = SessionState::Aborted;
                return self.out(io, &CODES.error_read_data_cmd).await;
            }
            Err(_) => {
                warn!("{} message input timed out", self.id);
                self.state = SessionState::Aborted;
                return self.out(io, &CODES.error_read_data_cmd).await;
            }
        };
        self.envelope.write(&body);

        self.inject_trace_headers().await;
        self.envelope.finalize();

        match self.handler.handle_mail(&self.peer, &self.envelope) {
            Ok(queue_id) => {
                info!(
                    "{} message of {} bytes queued as {}",
                    self.id,
                    self.envelope.len(),
                    queue_id
                );
                self.out(io, &format!("{} {}", CODES.success_message_queued, queue_id))
                    .await?;
            }
            Err(err) => {
                warn!("{} handler refused message: {}", self.id, err);
                self.out(io, &CODES.error_queue).await?;
            }
        }

        self.state = SessionState::WaitingForQuit;
        self.envelope.reset();
        self.body_type = None;
        Ok(())
    }

    async fn cmd_bdat(&mut self, io: &mut StreamController, cmd: &Command) -> Result<(), Error> {
        // RFC 3030: any BDAT after BDAT LAST is illegal until RSET.
        if self.state == SessionState::DataDone {
            return self.out(io, &CODES.fail_bad_sequence).await;
        }

        let Some(size_arg) = cmd.arguments.first() else {
            return self.bad_command(io, &CODES.fail_unrecognized_cmd).await;
        };
        let Ok(chunk_size) = size_arg.parse::<u64>() else {
            return self.bad_command(io, &CODES.fail_unrecognized_cmd).await;
        };
        let last = chunk_size == 0
            || cmd
                .arguments
                .get(1)
                .is_some_and(|arg| arg.eq_ignore_ascii_case("LAST"));

        debug!(
            "{} received BDAT chunk, last: {}, length: {}",
            self.id, last, chunk_size
        );

        // A refused chunk still has to be consumed before replying.
        if self.envelope.len() as u64 + chunk_size > self.config.limits.msg_size {
            match timeout(self.config.limits.msg_input, io.discard_chunk(chunk_size)).await {
                Ok(Ok(())) => return self.out(io, &CODES.fail_too_big).await,
                _ => {
                    self.state = SessionState::Aborted;
                    return self.out(io, &CODES.error_read_data_cmd).await;
                }
            }
        }

        let chunk = match timeout(self.config.limits.msg_input, io.read_chunk(chunk_size)).await {
            Ok(Ok(chunk)) => chunk,
            _ => {
                self.state = SessionState::Aborted;
                return self.out(io, &CODES.error_read_data_cmd).await;
            }
        };
        self.envelope.write(&chunk);

        if last {
            let total = self.envelope.len();
            self.inject_trace_headers().await;
            self.envelope.finalize();

            match self.handler.handle_mail(&self.peer, &self.envelope) {
                Ok(queue_id) => {
                    info!("{} message of {} bytes queued as {}", self.id, total, queue_id);
                    self.out(
                        io,
                        &format!("250 2.0.0 OK BDAT finished, {total} octets received"),
                    )
                    .await?;
                }
                Err(err) => {
                    warn!("{} handler refused message: {}", self.id, err);
                    self.out(io, &CODES.error_queue).await?;
                }
            }
            self.state = SessionState::DataDone;
        } else {
            self.out(io, &format!("250 {chunk_size} octets received"))
                .await?;
        }
        Ok(())
    }

    async fn cmd_rset(&mut self, io: &mut StreamController) -> Result<(), Error> {
        self.reset_transaction();
        self.out(io, &CODES.success_reset_cmd).await
    }

    async fn cmd_vrfy(&mut self, io: &mut StreamController) -> Result<(), Error> {
        self.vrfy_count += 1;
        self.out(io, &CODES.success_verify_cmd).await
    }

    async fn cmd_quit(&mut self, io: &mut StreamController) -> Result<(), Error> {
        self.out(io, &CODES.success_quit_cmd).await?;
        self.state = SessionState::Aborted;
        info!(
            "{} quit from {} after {:?} ({} vrfy)",
            self.id,
            self.peer.remote_addr,
            self.start.elapsed(),
            self.vrfy_count
        );
        Ok(())
    }

    /// Validates STARTTLS and sends the go-ahead; the handshake itself
    /// runs in [`Session::negotiate_tls`] which takes the stream over.
    async fn cmd_starttls(&mut self, io: &mut StreamController) -> Result<bool, Error> {
        if io.is_tls {
            self.bad_command(io, &CODES.fail_bad_sequence).await?;
            return Ok(false);
        }
        if !self.config.tls_mode.allows_starttls() {
            self.out(io, &CODES.fail_cmd_not_supported).await?;
            return Ok(false);
        }
        self.out(io, &CODES.success_start_tls_cmd).await?;
        Ok(true)
    }

    /// Runs the handshake and rebuilds the buffered pair around the
    /// secured stream, discarding anything the client pipelined before
    /// the upgrade. Returns `None` when the session is over.
    async fn negotiate_tls(
        &mut self,
        io: StreamController,
    ) -> Result<Option<StreamController>, Error> {
        let Some(tls_config) = self.config.tls_mode.config().cloned() else {
            self.state = SessionState::Aborted;
            return Ok(None);
        };

        let stream = io.into_stream();
        match timeout(
            self.config.limits.tls_setup,
            stream.upgrade_to_tls(&tls_config),
        )
        .await
        {
            Ok(Ok(secure)) => {
                info!(
                    "{} tls established with {}",
                    self.id, self.peer.remote_addr
                );
                self.peer.tls_state = secure.tls_state();
                self.reset_transaction();
                Ok(Some(StreamController::new(secure)))
            }
            Ok(Err((err, leftover))) => {
                warn!("{} tls handshake failed: {}", self.id, err);
                if let Some(plain) = leftover {
                    let mut io = StreamController::new(plain);
                    let _ = io
                        .write_line(&CODES.error_start_tls, self.config.limits.reply_out)
                        .await;
                }
                self.state = SessionState::Aborted;
                Ok(None)
            }
            Err(_) => {
                warn!("{} tls handshake timed out", self.id);
                self.state = SessionState::Aborted;
                Ok(None)
            }
        }
    }

    /// Builds the trace headers for the message being finalized.
    async fn inject_trace_headers(&mut self) {
        let remote_host = if self.config.disable_reverse_dns {
            None
        } else {
            reverse_lookup(self.peer.remote_addr.ip()).await
        };
        let remote_host = remote_host.unwrap_or_else(|| "unknown".to_string());

        let local_host = if self.config.disable_reverse_dns {
            None
        } else {
            reverse_lookup(self.local_addr.ip()).await
        };
        let local_host = local_host.unwrap_or_else(|| self.config.hostname.clone());

        let value = received_header(&ReceivedContext {
            remote_host: &remote_host,
            remote_addr: self.peer.remote_addr,
            username: if self.peer.authenticated {
                self.peer.username.as_deref()
            } else {
                None
            },
            tls: self.peer.tls_state.as_ref(),
            local_addr: self.local_addr,
            local_host: &local_host,
            appname: &self.config.appname,
            version: &self.config.version,
            session_id: &self.id,
        });
        self.envelope.add_header("Received", &value);

        if self.peer.authenticated {
            let message_id = format!(
                "<{}.{}@{}>",
                Utc::now().timestamp(),
                self.id,
                self.peer.server_name
            );
            self.envelope.add_header("Message-ID", &message_id);
        }
    }

    /// Clears the mail transaction; connection-level state such as the
    /// greeting and authentication survives.
    pub(crate) fn reset_transaction(&mut self) {
        self.envelope.reset();
        self.body_type = None;
        self.state = SessionState::Init;
    }

    pub(crate) async fn out(
        &self,
        io: &mut StreamController,
        reply: &str,
    ) -> Result<(), Error> {
        debug!("{} replying '{}'", self.id, reply);
        io.write_line(reply, self.config.limits.reply_out).await
    }

    async fn out_many(&self, io: &mut StreamController, replies: &[String]) -> Result<(), Error> {
        debug!("{} replying {:?}", self.id, replies);
        io.write_lines(replies, self.config.limits.reply_out).await
    }

    /// Registers a protocol violation. Once the threshold is reached the
    /// planned reply is replaced by the final refusal and the session
    /// aborts.
    pub(crate) async fn bad_command(
        &mut self,
        io: &mut StreamController,
        reply: &str,
    ) -> Result<(), Error> {
        self.bad_commands += 1;
        if self.bad_commands >= self.config.limits.bad_cmds {
            warn!(
                "{} dropping {} after {} bad commands",
                self.id, self.peer.remote_addr, self.bad_commands
            );
            self.out(io, &CODES.fail_max_unrecognized_cmd).await?;
            self.state = SessionState::Aborted;
            return Ok(());
        }
        self.out(io, reply).await
    }

    pub(crate) fn abort(&mut self) {
        self.state = SessionState::Aborted;
    }
}

fn address_error_reply(err: &AddressError) -> &'static str {
    match err {
        AddressError::Malformed(_) => &CODES.fail_invalid_address,
        AddressError::LocalPartTooLong => &CODES.fail_local_part_too_long,
        AddressError::DomainTooLong => &CODES.fail_domain_too_long,
        AddressError::PathTooLong => &CODES.fail_path_too_long,
    }
}
