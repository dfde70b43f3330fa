use std::fmt;

use log::{info, warn};
use tokio::time::timeout;

use crate::core::codes::CODES;
use crate::core::command::Command;
use crate::core::error::Error;
use crate::core::session::Session;
use crate::core::stream::StreamController;
use crate::utils::parser::parse_b64_line;

/// Base64 of "Username:" and "Password:", the LOGIN prompts fixed by
/// draft-murchison-sasl-login.
const USERNAME_CHALLENGE: &str = "334 VXNlcm5hbWU6";
const PASSWORD_CHALLENGE: &str = "334 UGFzc3dvcmQ6";

/// The offered SASL mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMach {
    Plain,
    Login,
}

impl fmt::Display for AuthMach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => write!(f, "PLAIN"),
            Self::Login => write!(f, "LOGIN"),
        }
    }
}

impl AuthMach {
    pub fn from_arg(arg: &str) -> Option<Self> {
        match arg.to_ascii_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            _ => None,
        }
    }
}

/// Splits a decoded PLAIN response into authzid, authcid and password
/// (RFC 4616: `authzid NUL authcid NUL passwd`).
pub(crate) fn split_plain(data: &[u8]) -> Option<(String, String, Vec<u8>)> {
    let mut parts = data.splitn(3, |&b| b == 0);
    let authzid = parts.next()?;
    let authcid = parts.next()?;
    let password = parts.next()?;
    Some((
        String::from_utf8_lossy(authzid).into_owned(),
        String::from_utf8_lossy(authcid).into_owned(),
        password.to_vec(),
    ))
}

impl Session {
    pub(crate) async fn cmd_auth(
        &mut self,
        io: &mut StreamController,
        cmd: &Command,
    ) -> Result<(), Error> {
        // RFC 4954: no plaintext credentials without an encrypted channel.
        if !io.is_tls {
            return self.out(io, &CODES.fail_encryption_needed).await;
        }
        if self.config.auth_machs.is_empty() {
            // AUTH against a server that never offered it is a favorite
            // of credential-spraying bots; let the threshold deal with
            // them.
            return self.bad_command(io, &CODES.fail_cmd_not_supported).await;
        }
        // RFC 4954 section 4: one successful AUTH per session.
        if self.peer.authenticated {
            return self.bad_command(io, &CODES.fail_bad_sequence).await;
        }

        let Some(mech_arg) = cmd.arguments.first() else {
            return self.bad_command(io, &CODES.fail_missing_argument).await;
        };
        let mech = match AuthMach::from_arg(mech_arg) {
            Some(mech) if self.config.auth_machs.contains(&mech) => mech,
            _ => return self.out(io, &CODES.fail_cmd_param_not_implemented).await,
        };

        let initial = cmd.arguments.get(1).cloned();
        match mech {
            AuthMach::Login => self.auth_login(io, initial).await,
            AuthMach::Plain => self.auth_plain(io, initial).await,
        }
    }

    /// The LOGIN sub-dialogue: prompt for whichever of username and
    /// password was not carried on the AUTH line, both base64.
    async fn auth_login(
        &mut self,
        io: &mut StreamController,
        initial: Option<String>,
    ) -> Result<(), Error> {
        let username_b64 = match initial {
            Some(value) => value,
            None => {
                self.out(io, USERNAME_CHALLENGE).await?;
                timeout(self.config.limits.cmd_input, io.read_line()).await??
            }
        };
        let Ok(username) = parse_b64_line(&username_b64) else {
            return self.auth_malformed(io).await;
        };

        self.out(io, PASSWORD_CHALLENGE).await?;
        let password_b64 = timeout(self.config.limits.cmd_input, io.read_line()).await??;
        let Ok(password) = parse_b64_line(&password_b64) else {
            return self.auth_malformed(io).await;
        };

        let username = String::from_utf8_lossy(&username).into_owned();
        self.verify_credentials(io, username, &password).await
    }

    /// The PLAIN sub-dialogue: one base64 blob, inline or after an empty
    /// challenge, split on NUL.
    async fn auth_plain(
        &mut self,
        io: &mut StreamController,
        initial: Option<String>,
    ) -> Result<(), Error> {
        let payload = match initial {
            Some(value) => value,
            None => {
                self.out(io, "334 ").await?;
                timeout(self.config.limits.cmd_input, io.read_line()).await??
            }
        };
        let Ok(decoded) = parse_b64_line(&payload) else {
            return self.auth_malformed(io).await;
        };
        let Some((_authzid, authcid, password)) = split_plain(&decoded) else {
            return self.auth_malformed(io).await;
        };

        self.verify_credentials(io, authcid, &password).await
    }

    async fn verify_credentials(
        &mut self,
        io: &mut StreamController,
        username: String,
        password: &[u8],
    ) -> Result<(), Error> {
        self.peer.username = Some(username);
        match self.handler.authenticate(&self.peer, password) {
            Err(err) => {
                warn!("{} authenticator failed: {}", self.id, err);
                self.out(io, &CODES.error_auth).await?;
                self.abort();
            }
            Ok(false) => {
                info!(
                    "{} rejected credentials for {:?}",
                    self.id, self.peer.username
                );
                self.out(io, &CODES.fail_authentication).await?;
            }
            Ok(true) => {
                self.peer.authenticated = true;
                info!(
                    "{} authenticated as {:?}",
                    self.id, self.peer.username
                );
                self.out(io, &CODES.success_authentication).await?;
            }
        }
        Ok(())
    }

    async fn auth_malformed(&mut self, io: &mut StreamController) -> Result<(), Error> {
        self.out(io, &CODES.fail_malformed_auth_input).await?;
        self.abort();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose;
    use base64::Engine as _;

    #[test]
    fn login_challenges_decode_to_prompts() {
        let username = general_purpose::STANDARD
            .decode(USERNAME_CHALLENGE.trim_start_matches("334 "))
            .unwrap();
        assert_eq!(username, b"Username:");

        let password = general_purpose::STANDARD
            .decode(PASSWORD_CHALLENGE.trim_start_matches("334 "))
            .unwrap();
        assert_eq!(password, b"Password:");
    }

    #[test]
    fn plain_response_splits_on_nul() {
        let (authzid, authcid, password) = split_plain(b"\0alice\0secret").unwrap();
        assert_eq!(authzid, "");
        assert_eq!(authcid, "alice");
        assert_eq!(password, b"secret");

        let (authzid, _, _) = split_plain(b"admin\0alice\0secret").unwrap();
        assert_eq!(authzid, "admin");
    }

    #[test]
    fn plain_response_needs_three_parts() {
        assert!(split_plain(b"alice\0secret").is_none());
        assert!(split_plain(b"no separators").is_none());
    }

    #[test]
    fn mechanism_names_round_trip() {
        for mech in [AuthMach::Plain, AuthMach::Login] {
            assert_eq!(AuthMach::from_arg(&mech.to_string()), Some(mech));
        }
        assert_eq!(AuthMach::from_arg("login"), Some(AuthMach::Login));
        assert_eq!(AuthMach::from_arg("CRAM-MD5"), None);
    }
}
