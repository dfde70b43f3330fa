//! Live-socket tests: a real server on an ephemeral port, driven by a
//! scripted TCP client.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use mailgate::{
    Address, AuthMach, Envelope, HookError, Limits, Peer, SmtpConfig, SmtpHandler, SmtpServer,
};

struct RecordedMail {
    mail_from: String,
    mail_to: Vec<String>,
    data: Vec<u8>,
}

#[derive(Default)]
struct CollectingHandler {
    mails: Mutex<Vec<RecordedMail>>,
    recipients: Mutex<Vec<String>>,
}

impl SmtpHandler for CollectingHandler {
    fn check_recipient(&self, _peer: &Peer, addr: &Address) -> Result<(), HookError> {
        self.recipients.lock().unwrap().push(addr.email());
        match addr.local.as_str() {
            "unknown" => Err(HookError::RecipientNotFound),
            "full" => Err(HookError::MailboxFull),
            _ => Ok(()),
        }
    }

    fn handle_mail(&self, _peer: &Peer, envelope: &Envelope) -> Result<String, HookError> {
        self.mails.lock().unwrap().push(RecordedMail {
            mail_from: envelope
                .mail_from
                .as_ref()
                .map(Address::email)
                .unwrap_or_default(),
            mail_to: envelope.mail_to.iter().map(Address::email).collect(),
            data: envelope.data().to_vec(),
        });
        Ok("TESTQUEUE1".to_string())
    }
}

fn test_config() -> SmtpConfig {
    SmtpConfig {
        hostname: "mx.test.local".to_string(),
        disable_reverse_dns: true,
        ..Default::default()
    }
}

fn start_server(config: SmtpConfig, handler: Arc<dyn SmtpHandler>) -> SocketAddr {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            tx.send(listener.local_addr().unwrap()).unwrap();
            let server = SmtpServer::new(config, handler);
            let _ = server.serve(listener).await;
        });
    });
    rx.recv().unwrap()
}

struct Client {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Client {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        let reader = BufReader::new(stream.try_clone().unwrap());
        let mut client = Client { stream, reader };
        let greeting = client.read_line();
        assert!(greeting.starts_with("220 "), "greeting: {greeting}");
        client
    }

    fn send(&mut self, line: &str) {
        write!(self.stream, "{line}\r\n").unwrap();
        self.stream.flush().unwrap();
    }

    fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
        self.stream.flush().unwrap();
    }

    fn read_line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).unwrap();
        line.trim_end().to_string()
    }

    fn cmd(&mut self, line: &str) -> String {
        self.send(line);
        self.read_line()
    }

    /// Sends a command and collects a multi-line reply, stopping at the
    /// `<code><space>` line.
    fn cmd_multiline(&mut self, line: &str) -> Vec<String> {
        self.send(line);
        let mut lines = Vec::new();
        loop {
            let line = self.read_line();
            let done = line.len() == 3 || line.as_bytes().get(3) == Some(&b' ');
            lines.push(line);
            if done {
                break;
            }
        }
        lines
    }
}

#[test]
fn ehlo_advertises_extensions_in_order() {
    let addr = start_server(test_config(), Arc::new(CollectingHandler::default()));
    let mut client = Client::connect(addr);

    let lines = client.cmd_multiline("EHLO client.example");
    assert!(lines[0].starts_with("250-mx.test.local hello "));

    let extensions: Vec<&str> = lines[1..].iter().map(String::as_str).collect();
    assert_eq!(
        extensions,
        vec![
            "250-8BITMIME",
            "250-CHUNKING",
            "250-BINARYMIME",
            "250-SMTPUTF8",
            "250-PIPELINING",
            "250-HELP",
            "250 SIZE 5242880",
        ]
    );

    // exactly one final line, all others are continuations
    let finals = lines
        .iter()
        .filter(|l| l.as_bytes().get(3) == Some(&b' '))
        .count();
    assert_eq!(finals, 1);
    assert!(lines.last().unwrap().starts_with("250 "));
}

#[test]
fn submits_a_message_end_to_end() {
    let handler = Arc::new(CollectingHandler::default());
    let addr = start_server(test_config(), handler.clone());
    let mut client = Client::connect(addr);

    client.cmd_multiline("EHLO client.example");
    assert!(client.cmd("MAIL FROM:<a@example.com>").starts_with("250 2.1.0"));
    assert!(client.cmd("RCPT TO:<b@example.com>").starts_with("250 2.1.5"));
    assert!(client.cmd("DATA").starts_with("354"));

    client.send("Subject: hi");
    client.send("");
    client.send("hello");
    let reply = client.cmd(".");
    assert!(
        reply.starts_with("250 2.0.0 OK Queued as TESTQUEUE1"),
        "reply: {reply}"
    );

    assert!(client.cmd("QUIT").starts_with("221"));

    let mails = handler.mails.lock().unwrap();
    assert_eq!(mails.len(), 1);
    assert_eq!(mails[0].mail_from, "a@example.com");
    assert_eq!(mails[0].mail_to, vec!["b@example.com"]);

    let text = String::from_utf8(mails[0].data.clone()).unwrap();
    assert!(text.starts_with("Received: from "), "data: {text}");
    assert!(text.contains("Subject: hi\r\n"));
    assert!(text.contains("\r\n\r\nhello\r\n"));
    // unauthenticated sessions get no Message-ID
    assert!(!text.contains("Message-ID:"));
}

#[test]
fn data_strips_dot_stuffing() {
    let handler = Arc::new(CollectingHandler::default());
    let addr = start_server(test_config(), handler.clone());
    let mut client = Client::connect(addr);

    client.cmd_multiline("EHLO client.example");
    client.cmd("MAIL FROM:<a@example.com>");
    client.cmd("RCPT TO:<b@example.com>");
    client.cmd("DATA");

    client.send("Subject: dots");
    client.send("");
    client.send("..one leading dot survives");
    client.send(".also this line");
    assert!(client.cmd(".").starts_with("250"));

    let mails = handler.mails.lock().unwrap();
    let text = String::from_utf8(mails[0].data.clone()).unwrap();
    assert!(text.contains("\r\n.one leading dot survives\r\n"));
    assert!(text.contains("\r\nalso this line\r\n"));
}

#[test]
fn rejects_oversized_declared_size() {
    let handler = Arc::new(CollectingHandler::default());
    let addr = start_server(test_config(), handler.clone());
    let mut client = Client::connect(addr);

    client.cmd_multiline("EHLO client.example");
    let reply = client.cmd("MAIL FROM:<a@example.com> SIZE=99999999");
    assert!(reply.starts_with("552"), "reply: {reply}");

    // the sender was not recorded, so a fresh MAIL is not nested
    assert!(client.cmd("MAIL FROM:<a@example.com>").starts_with("250"));
}

#[test]
fn unknown_mail_parameter_clears_the_sender() {
    let addr = start_server(test_config(), Arc::new(CollectingHandler::default()));
    let mut client = Client::connect(addr);

    client.cmd_multiline("EHLO client.example");
    assert!(client
        .cmd("MAIL FROM:<a@example.com> FOO=bar")
        .starts_with("555"));
    assert!(client.cmd("MAIL FROM:<a@example.com>").starts_with("250"));
}

#[test]
fn out_of_order_rcpt_is_refused() {
    let addr = start_server(test_config(), Arc::new(CollectingHandler::default()));
    let mut client = Client::connect(addr);

    // no HELO/EHLO yet
    assert!(client.cmd("RCPT TO:<b@example.com>").starts_with("503"));
    // non-fatal: the session keeps going
    assert!(client.cmd("NOOP").starts_with("250"));
}

#[test]
fn nested_mail_is_refused() {
    let addr = start_server(test_config(), Arc::new(CollectingHandler::default()));
    let mut client = Client::connect(addr);

    client.cmd_multiline("EHLO client.example");
    client.cmd("MAIL FROM:<a@example.com>");
    let reply = client.cmd("MAIL FROM:<other@example.com>");
    assert!(reply.starts_with("503"), "reply: {reply}");
}

#[test]
fn bdat_two_chunks() {
    let handler = Arc::new(CollectingHandler::default());
    let addr = start_server(test_config(), handler.clone());
    let mut client = Client::connect(addr);

    client.cmd_multiline("EHLO client.example");
    client.cmd("MAIL FROM:<a@example.com>");
    client.cmd("RCPT TO:<b@example.com>");

    client.send_raw(b"BDAT 6\r\nhello!");
    assert_eq!(client.read_line(), "250 6 octets received");

    let reply = client.cmd("BDAT 0 LAST");
    assert!(
        reply.contains("BDAT finished, 6 octets received"),
        "reply: {reply}"
    );

    {
        let mails = handler.mails.lock().unwrap();
        assert_eq!(mails.len(), 1);
        let text = String::from_utf8(mails[0].data.clone()).unwrap();
        assert!(text.starts_with("Received: from "));
        assert!(text.ends_with("hello!"));
    }

    // chunks after LAST are illegal until RSET
    assert!(client.cmd("BDAT 1").starts_with("503"));
    assert!(client.cmd("QUIT").starts_with("221"));
}

#[test]
fn bad_command_threshold_closes_the_session() {
    let addr = start_server(test_config(), Arc::new(CollectingHandler::default()));
    let mut client = Client::connect(addr);

    for _ in 0..4 {
        let reply = client.cmd("FOO");
        assert!(reply.contains("Unrecognized command"), "reply: {reply}");
    }
    let last = client.cmd("FOO");
    assert!(
        last.contains("Too many unrecognized commands"),
        "reply: {last}"
    );

    // the server hangs up; the next read sees EOF
    assert_eq!(client.read_line(), "");
}

#[test]
fn overlong_command_line_gets_one_reply() {
    let addr = start_server(test_config(), Arc::new(CollectingHandler::default()));
    let mut client = Client::connect(addr);

    let long = format!("HELO {}", "a".repeat(600));
    let reply = client.cmd(&long);
    assert!(reply.contains("Line too long"), "reply: {reply}");

    // exactly one reply per overlong line, and the session recovers
    assert!(client.cmd("NOOP").starts_with("250"));
}

#[test]
fn pipelined_commands_reply_in_order() {
    let addr = start_server(test_config(), Arc::new(CollectingHandler::default()));
    let mut client = Client::connect(addr);

    client.cmd_multiline("EHLO client.example");
    client.send_raw(
        b"MAIL FROM:<a@example.com>\r\nRCPT TO:<b@example.com>\r\nRCPT TO:<c@example.com>\r\n",
    );
    assert!(client.read_line().starts_with("250 2.1.0"));
    assert!(client.read_line().starts_with("250 2.1.5"));
    assert!(client.read_line().starts_with("250 2.1.5"));
}

#[test]
fn postmaster_is_rewritten_to_the_local_domain() {
    let handler = Arc::new(CollectingHandler::default());
    let addr = start_server(test_config(), handler.clone());
    let mut client = Client::connect(addr);

    client.cmd_multiline("EHLO client.example");
    client.cmd("MAIL FROM:<a@example.com>");
    assert!(client.cmd("RCPT TO:<postmaster>").starts_with("250"));

    let recipients = handler.recipients.lock().unwrap();
    assert_eq!(recipients.as_slice(), ["postmaster@mx.test.local"]);
}

#[test]
fn recipient_checker_sentinels_map_to_codes() {
    let addr = start_server(test_config(), Arc::new(CollectingHandler::default()));
    let mut client = Client::connect(addr);

    client.cmd_multiline("EHLO client.example");
    client.cmd("MAIL FROM:<a@example.com>");
    assert!(client.cmd("RCPT TO:<unknown@example.com>").starts_with("550"));
    assert!(client.cmd("RCPT TO:<full@example.com>").starts_with("522"));
    assert!(client.cmd("RCPT TO:<b@example.com>").starts_with("250"));
}

#[test]
fn rset_is_idempotent_and_clears_the_envelope() {
    let addr = start_server(test_config(), Arc::new(CollectingHandler::default()));
    let mut client = Client::connect(addr);

    client.cmd_multiline("EHLO client.example");
    client.cmd("MAIL FROM:<a@example.com>");
    assert!(client.cmd("RSET").starts_with("250"));
    assert!(client.cmd("RSET").starts_with("250"));

    // no recipients survive the reset
    assert!(client.cmd("DATA").starts_with("554"));
    // and no sender either
    assert!(client.cmd("MAIL FROM:<a@example.com>").starts_with("250"));
}

#[test]
fn data_requires_recipients() {
    let addr = start_server(test_config(), Arc::new(CollectingHandler::default()));
    let mut client = Client::connect(addr);

    client.cmd_multiline("EHLO client.example");
    client.cmd("MAIL FROM:<a@example.com>");
    assert!(client.cmd("DATA").starts_with("554"));
    // non-fatal
    assert!(client.cmd("NOOP").starts_with("250"));
}

#[test]
fn only_quit_is_accepted_after_a_delivery() {
    let addr = start_server(test_config(), Arc::new(CollectingHandler::default()));
    let mut client = Client::connect(addr);

    client.cmd_multiline("EHLO client.example");
    client.cmd("MAIL FROM:<a@example.com>");
    client.cmd("RCPT TO:<b@example.com>");
    client.cmd("DATA");
    client.send("Subject: x");
    client.send("");
    client.send("body");
    assert!(client.cmd(".").starts_with("250"));

    assert!(client.cmd("MAIL FROM:<a@example.com>").starts_with("503"));
    assert!(client.cmd("QUIT").starts_with("221"));
}

#[test]
fn oversized_body_is_refused_and_drained() {
    let handler = Arc::new(CollectingHandler::default());
    let mut config = test_config();
    config.limits = Limits {
        msg_size: 64,
        ..Limits::default()
    };
    let addr = start_server(config, handler.clone());
    let mut client = Client::connect(addr);

    client.cmd_multiline("EHLO client.example");
    client.cmd("MAIL FROM:<a@example.com>");
    client.cmd("RCPT TO:<b@example.com>");
    client.cmd("DATA");
    for _ in 0..8 {
        client.send(&"x".repeat(32));
    }
    let reply = client.cmd(".");
    assert!(reply.starts_with("552"), "reply: {reply}");

    // the body was consumed through the dot, the session is usable
    assert!(client.cmd("NOOP").starts_with("250"));
    assert!(handler.mails.lock().unwrap().is_empty());
}

#[test]
fn auth_is_refused_without_tls() {
    let mut config = test_config();
    config.auth_machs = vec![AuthMach::Plain, AuthMach::Login];
    let addr = start_server(config, Arc::new(CollectingHandler::default()));
    let mut client = Client::connect(addr);

    let lines = client.cmd_multiline("EHLO client.example");
    assert!(
        !lines.iter().any(|l| l.contains("AUTH")),
        "AUTH advertised without TLS: {lines:?}"
    );

    assert!(client.cmd("AUTH LOGIN").starts_with("530"));

    // mail transactions require authentication once mechanisms are set
    assert!(client.cmd("MAIL FROM:<a@example.com>").starts_with("554"));
}

#[test]
fn helo_answers_with_the_local_name() {
    let addr = start_server(test_config(), Arc::new(CollectingHandler::default()));
    let mut client = Client::connect(addr);

    let reply = client.cmd("HELO client.example");
    assert!(reply.starts_with("250 mx.test.local hello "), "reply: {reply}");
}

#[test]
fn courtesy_commands_answer_without_state_changes() {
    let addr = start_server(test_config(), Arc::new(CollectingHandler::default()));
    let mut client = Client::connect(addr);

    client.cmd_multiline("EHLO client.example");
    assert!(client.cmd("VRFY b@example.com").starts_with("252"));
    assert!(client.cmd("EXPN staff").starts_with("252"));
    assert!(client.cmd("HELP").starts_with("214"));
    assert!(client.cmd("NOOP").starts_with("250"));

    // the dialogue state is untouched
    assert!(client.cmd("MAIL FROM:<a@example.com>").starts_with("250"));
}

#[test]
fn argument_free_verbs_reject_arguments() {
    let addr = start_server(test_config(), Arc::new(CollectingHandler::default()));
    let mut client = Client::connect(addr);

    assert!(client.cmd("RSET now").starts_with("554"));
    assert!(client.cmd("DATA x").starts_with("554"));
}

#[test]
fn starttls_is_refused_when_not_configured() {
    let addr = start_server(test_config(), Arc::new(CollectingHandler::default()));
    let mut client = Client::connect(addr);

    client.cmd_multiline("EHLO client.example");
    assert!(client.cmd("STARTTLS").starts_with("502"));
}

#[test]
fn connection_check_rejects_with_554() {
    struct RefuseAll;
    impl SmtpHandler for RefuseAll {
        fn check_connection(&self, _peer: &Peer) -> Result<(), HookError> {
            Err(HookError::reject("go away"))
        }
        fn check_recipient(&self, _peer: &Peer, _addr: &Address) -> Result<(), HookError> {
            Ok(())
        }
        fn handle_mail(&self, _peer: &Peer, _envelope: &Envelope) -> Result<String, HookError> {
            Ok("never".to_string())
        }
    }

    let addr = start_server(test_config(), Arc::new(RefuseAll));
    let stream = TcpStream::connect(addr).unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    assert!(line.starts_with("554 go away"), "greeting: {line}");

    // everything but QUIT is a bad sequence now
    let mut client = Client {
        stream,
        reader,
    };
    assert!(client.cmd("EHLO client.example").starts_with("503"));
    assert!(client.cmd("QUIT").starts_with("221"));
}
