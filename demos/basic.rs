use std::sync::Arc;

use mailgate::{Address, Envelope, HookError, Peer, SmtpConfig, SmtpHandler, SmtpServer};

struct PrintingMailStore;

impl SmtpHandler for PrintingMailStore {
    fn check_recipient(&self, _peer: &Peer, addr: &Address) -> Result<(), HookError> {
        if addr.domain == "example.org" {
            Ok(())
        } else {
            Err(HookError::RecipientNotFound)
        }
    }

    fn handle_mail(&self, peer: &Peer, envelope: &Envelope) -> Result<String, HookError> {
        println!(
            "mail from {:?} to {:?} ({} bytes, peer {})",
            envelope.mail_from,
            envelope.mail_to.iter().map(Address::email).collect::<Vec<_>>(),
            envelope.len(),
            peer.remote_addr,
        );
        println!("{}", String::from_utf8_lossy(envelope.data()));
        Ok("demo-queue-1".to_string())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = SmtpConfig {
        hostname: "mx.example.org".to_string(),
        bind_addr: "127.0.0.1:2525".to_string(),
        announce: "at your service".to_string(),
        ..Default::default()
    };

    println!("starting smtp server on {}", config.bind_addr);
    let server = SmtpServer::new(config, Arc::new(PrintingMailStore));
    server.listen_and_serve().await
}
