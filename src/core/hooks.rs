use thiserror::Error;

use crate::core::address::Address;
use crate::core::envelope::Envelope;
use crate::core::session::Peer;

/// Rejection raised by a [`SmtpHandler`] hook.
///
/// The message of a `Reject` is shown to the client; the two sentinel
/// variants let a recipient check distinguish an unknown mailbox from a
/// full one, which map to different reply codes.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("{0}")]
    Reject(String),

    #[error("couldn't find recipient with given email address")]
    RecipientNotFound,

    #[error("recipients mailbox is full")]
    MailboxFull,
}

impl HookError {
    pub fn reject(message: impl Into<String>) -> Self {
        HookError::Reject(message.into())
    }
}

/// The mail-acceptance collaborator of a server.
///
/// One handler instance is shared read-only across every session; it is
/// consulted at fixed points of the dialogue and may veto each step.
/// `check_recipient` and `handle_mail` carry the policy every deployment
/// must define; the remaining hooks default to silent acceptance.
///
/// Hooks are called synchronously from the session's point of view.
///
/// # Example
///
/// ```no_run
/// use mailgate::{Envelope, HookError, Peer, SmtpHandler};
///
/// struct Printer;
///
/// impl SmtpHandler for Printer {
///     fn check_recipient(
///         &self,
///         _peer: &Peer,
///         _addr: &mailgate::Address,
///     ) -> Result<(), HookError> {
///         Ok(())
///     }
///
///     fn handle_mail(&self, peer: &Peer, envelope: &Envelope) -> Result<String, HookError> {
///         println!("mail from {:?} ({} bytes)", envelope.mail_from, envelope.len());
///         let _ = peer;
///         Ok("queue-id-1".to_string())
///     }
/// }
/// ```
pub trait SmtpHandler: Send + Sync + 'static {
    /// Called once per connection before the welcome banner. An error
    /// turns the banner into a 554 rejection and the session will only
    /// accept QUIT from then on.
    fn check_connection(&self, peer: &Peer) -> Result<(), HookError> {
        let _ = peer;
        Ok(())
    }

    /// Called after HELO/EHLO with the name the client presented.
    fn check_helo(&self, peer: &Peer, name: &str) -> Result<(), HookError> {
        let _ = (peer, name);
        Ok(())
    }

    /// Called after MAIL FROM with the parsed reverse-path.
    fn check_sender(&self, peer: &Peer, addr: &Address) -> Result<(), HookError> {
        let _ = (peer, addr);
        Ok(())
    }

    /// Called for each RCPT TO of an unauthenticated peer.
    fn check_recipient(&self, peer: &Peer, addr: &Address) -> Result<(), HookError>;

    /// Verifies the credentials of an AUTH exchange. The username under
    /// test is on `peer.username`; returning `Ok(false)` rejects the
    /// credentials, an `Err` aborts the session with a transient code.
    fn authenticate(&self, peer: &Peer, password: &[u8]) -> Result<bool, HookError> {
        let _ = (peer, password);
        Ok(false)
    }

    /// Accepts a finalized envelope, returning the queue id reported to
    /// the client. Invoked exactly once per accepted message.
    fn handle_mail(&self, peer: &Peer, envelope: &Envelope) -> Result<String, HookError>;
}
