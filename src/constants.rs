use lazy_static::lazy_static;
use regex::Regex;

/// Maximum length of a command line in octets, including CRLF (RFC 5321
/// section 4.5.3.1.4).
pub const MAX_COMMAND_LINE: usize = 512;

lazy_static! {
    pub static ref MAIL_FROM_RE: Regex = Regex::new(
        r"(?i)^FROM:\s*(.+?)(?:\s+([A-Za-z][A-Za-z0-9-]*=\S+(?:\s+[A-Za-z][A-Za-z0-9-]*=\S+)*))?$"
    )
    .unwrap();
    pub static ref RCPT_TO_RE: Regex = Regex::new(r"(?i)^TO:\s*(.+)$").unwrap();
}
