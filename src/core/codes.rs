//! Pre-rendered SMTP reply catalogue.
//!
//! Each reply combines an RFC 5321 basic code with an RFC 3463 enhanced
//! status code and a short comment, rendered once at startup as
//! `"<basic> <class>.<subject>.<detail> <comment>"`. CRLF is appended at
//! write time, never here.

use std::fmt;

use lazy_static::lazy_static;

/// Reply class per RFC 3463: success, transient failure or permanent
/// failure. The class is both the first digit of the enhanced code and,
/// when no basic code is mapped, the hundreds digit of the fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    Success = 2,
    TransientFailure = 4,
    PermanentFailure = 5,
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

// RFC 3463 subject/detail fragments, written as ".subject.detail" so that
// prefixing the class digit yields the full enhanced code.
pub const OTHER_STATUS: &str = ".0.0";
pub const OTHER_ADDRESS_STATUS: &str = ".1.0";
pub const BAD_DESTINATION_MAILBOX_ADDRESS: &str = ".1.1";
pub const DESTINATION_MAILBOX_ADDRESS_VALID: &str = ".1.5";
pub const BAD_SENDERS_MAILBOX_ADDRESS_SYNTAX: &str = ".1.7";
pub const MAILBOX_FULL: &str = ".2.2";
pub const MESSAGE_LENGTH_EXCEEDS_LIMIT: &str = ".2.3";
pub const OTHER_MAIL_SYSTEM_STATUS: &str = ".3.0";
pub const OTHER_NETWORK_STATUS: &str = ".4.0";
pub const OTHER_PROTOCOL_STATUS: &str = ".5.0";
pub const INVALID_COMMAND: &str = ".5.1";
pub const SYNTAX_ERROR: &str = ".5.2";
pub const TOO_MANY_RECIPIENTS: &str = ".5.3";
pub const INVALID_COMMAND_ARGUMENTS: &str = ".5.4";
pub const SECURITY_STATUS: &str = ".7.0";
pub const DELIVERY_NOT_AUTHORIZED: &str = ".7.1";

/// Maps an enhanced status code to its conventional basic code, following
/// the IANA enhanced-status-codes registry. Codes without a mapping fall
/// back to `class * 100`.
fn basic_code_for(class: Class, enhanced: &str) -> u16 {
    use Class::*;
    match (class, enhanced) {
        (Success, OTHER_STATUS) => 250,
        (Success, OTHER_ADDRESS_STATUS) => 250,
        (Success, DESTINATION_MAILBOX_ADDRESS_VALID) => 250,
        (Success, OTHER_MAIL_SYSTEM_STATUS) => 250,
        (Success, OTHER_PROTOCOL_STATUS) => 250,
        (Success, SECURITY_STATUS) => 220,

        (TransientFailure, OTHER_MAIL_SYSTEM_STATUS) => 421,
        (TransientFailure, OTHER_NETWORK_STATUS) => 451,
        (TransientFailure, OTHER_PROTOCOL_STATUS) => 451,
        (TransientFailure, INVALID_COMMAND) => 430,
        (TransientFailure, TOO_MANY_RECIPIENTS) => 452,
        (TransientFailure, INVALID_COMMAND_ARGUMENTS) => 451,

        (PermanentFailure, BAD_DESTINATION_MAILBOX_ADDRESS) => 550,
        (PermanentFailure, BAD_SENDERS_MAILBOX_ADDRESS_SYNTAX) => 501,
        (PermanentFailure, MAILBOX_FULL) => 552,
        (PermanentFailure, MESSAGE_LENGTH_EXCEEDS_LIMIT) => 552,
        (PermanentFailure, OTHER_MAIL_SYSTEM_STATUS) => 550,
        (PermanentFailure, OTHER_PROTOCOL_STATUS) => 501,
        (PermanentFailure, INVALID_COMMAND) => 500,
        (PermanentFailure, SYNTAX_ERROR) => 500,
        (PermanentFailure, INVALID_COMMAND_ARGUMENTS) => 501,
        (PermanentFailure, DELIVERY_NOT_AUTHORIZED) => 551,

        (class, _) => class as u16 * 100,
    }
}

fn default_text(class: Class) -> &'static str {
    match class {
        Class::Success => "OK",
        Class::TransientFailure => "Temporary failure.",
        Class::PermanentFailure => "Permanent failure.",
    }
}

/// One catalogue entry before rendering. When `basic` is absent the code
/// is resolved from the enhanced status; when `comment` is empty a class
/// default is substituted.
struct Reply {
    basic: Option<u16>,
    class: Class,
    enhanced: &'static str,
    comment: &'static str,
}

impl Reply {
    fn render(&self) -> String {
        let basic = self
            .basic
            .unwrap_or_else(|| basic_code_for(self.class, self.enhanced));
        let comment = if self.comment.is_empty() {
            default_text(self.class)
        } else {
            self.comment
        };
        format!("{} {}{} {}", basic, self.class, self.enhanced, comment)
    }
}

/// Pre-rendered reply strings, grouped the way the reply codes group.
pub struct Responses {
    // The 500's
    pub fail_line_too_long: String,
    pub fail_nested_mail_cmd: String,
    pub fail_no_recipients_data_cmd: String,
    pub fail_unrecognized_cmd: String,
    pub fail_max_unrecognized_cmd: String,
    pub fail_invalid_address: String,
    pub fail_invalid_recipient: String,
    pub fail_local_part_too_long: String,
    pub fail_domain_too_long: String,
    pub fail_path_too_long: String,
    pub fail_invalid_extension: String,
    pub fail_unsupported_parameter: String,
    pub fail_authentication: String,
    pub fail_malformed_auth_input: String,
    pub fail_unqualified_host_name: String,
    pub fail_too_big: String,
    pub fail_cmd_not_supported: String,
    pub fail_cmd_param_not_implemented: String,
    pub fail_mailbox_doesnt_exist: String,
    pub fail_mailbox_full: String,
    pub fail_access_denied: String,
    pub fail_bad_sequence: String,
    pub fail_missing_argument: String,
    pub fail_encryption_needed: String,

    // The 400's
    pub error_too_many_recipients: String,
    pub error_auth: String,
    pub error_unable_to_resolve_host: String,
    pub error_start_tls: String,
    pub error_queue: String,
    pub error_read_data_cmd: String,

    // The 200's and 300's
    pub success_authentication: String,
    pub success_mail_cmd: String,
    pub success_rcpt_cmd: String,
    pub success_reset_cmd: String,
    pub success_verify_cmd: String,
    pub success_expn_cmd: String,
    pub success_noop_cmd: String,
    pub success_quit_cmd: String,
    pub success_data_cmd: String,
    pub success_help_cmd: String,
    pub success_start_tls_cmd: String,
    pub success_message_queued: String,
}

impl Responses {
    fn build() -> Self {
        use Class::*;

        let success_mail_cmd = Reply {
            basic: None,
            class: Success,
            enhanced: OTHER_ADDRESS_STATUS,
            comment: "",
        }
        .render();

        Responses {
            fail_line_too_long: Reply {
                basic: Some(554),
                class: PermanentFailure,
                enhanced: INVALID_COMMAND,
                comment: "Line too long!",
            }
            .render(),
            fail_nested_mail_cmd: Reply {
                basic: Some(503),
                class: PermanentFailure,
                enhanced: INVALID_COMMAND,
                comment: "Nested mail command!",
            }
            .render(),
            fail_no_recipients_data_cmd: Reply {
                basic: Some(554),
                class: PermanentFailure,
                enhanced: INVALID_COMMAND,
                comment: "No valid recipients!",
            }
            .render(),
            fail_unrecognized_cmd: Reply {
                basic: Some(554),
                class: PermanentFailure,
                enhanced: INVALID_COMMAND,
                comment: "Unrecognized command!",
            }
            .render(),
            fail_max_unrecognized_cmd: Reply {
                basic: Some(554),
                class: PermanentFailure,
                enhanced: INVALID_COMMAND,
                comment: "Too many unrecognized commands!",
            }
            .render(),
            fail_invalid_address: Reply {
                basic: Some(501),
                class: PermanentFailure,
                enhanced: INVALID_COMMAND_ARGUMENTS,
                comment: "Syntax: MAIL FROM:<address> [EXT]",
            }
            .render(),
            fail_invalid_recipient: Reply {
                basic: Some(501),
                class: PermanentFailure,
                enhanced: INVALID_COMMAND_ARGUMENTS,
                comment: "Syntax: RCPT TO:<address>",
            }
            .render(),
            fail_local_part_too_long: Reply {
                basic: Some(550),
                class: PermanentFailure,
                enhanced: INVALID_COMMAND_ARGUMENTS,
                comment: "Local part too long, cannot exceed 64 characters",
            }
            .render(),
            fail_domain_too_long: Reply {
                basic: Some(550),
                class: PermanentFailure,
                enhanced: INVALID_COMMAND_ARGUMENTS,
                comment: "Domain cannot exceed 255 characters",
            }
            .render(),
            fail_path_too_long: Reply {
                basic: Some(550),
                class: PermanentFailure,
                enhanced: INVALID_COMMAND_ARGUMENTS,
                comment: "Path too long",
            }
            .render(),
            fail_invalid_extension: Reply {
                basic: Some(501),
                class: PermanentFailure,
                enhanced: INVALID_COMMAND_ARGUMENTS,
                comment: "Invalid arguments",
            }
            .render(),
            fail_unsupported_parameter: Reply {
                basic: Some(555),
                class: PermanentFailure,
                enhanced: INVALID_COMMAND_ARGUMENTS,
                comment: "Unsupported parameter!",
            }
            .render(),
            fail_authentication: Reply {
                basic: Some(535),
                class: PermanentFailure,
                enhanced: OTHER_PROTOCOL_STATUS,
                comment: "Authentication failed!",
            }
            .render(),
            fail_malformed_auth_input: Reply {
                basic: Some(501),
                class: PermanentFailure,
                enhanced: SYNTAX_ERROR,
                comment: "Malformed auth input!",
            }
            .render(),
            fail_unqualified_host_name: Reply {
                basic: Some(550),
                class: PermanentFailure,
                enhanced: SYNTAX_ERROR,
                comment: "Need fully-qualified hostname for domain part",
            }
            .render(),
            fail_too_big: Reply {
                basic: Some(552),
                class: PermanentFailure,
                enhanced: MESSAGE_LENGTH_EXCEEDS_LIMIT,
                comment: "Message exceeds maximum size!",
            }
            .render(),
            fail_cmd_not_supported: Reply {
                basic: Some(502),
                class: PermanentFailure,
                enhanced: INVALID_COMMAND,
                comment: "Command not supported!",
            }
            .render(),
            fail_cmd_param_not_implemented: Reply {
                basic: Some(504),
                class: PermanentFailure,
                enhanced: INVALID_COMMAND_ARGUMENTS,
                comment: "Command parameter not implemented!",
            }
            .render(),
            fail_mailbox_doesnt_exist: Reply {
                basic: Some(550),
                class: PermanentFailure,
                enhanced: BAD_DESTINATION_MAILBOX_ADDRESS,
                comment: "Sorry, no mailbox here by that name!",
            }
            .render(),
            fail_mailbox_full: Reply {
                basic: Some(522),
                class: PermanentFailure,
                enhanced: MAILBOX_FULL,
                comment: "Users mailbox is full!",
            }
            .render(),
            fail_access_denied: Reply {
                basic: Some(554),
                class: PermanentFailure,
                enhanced: DELIVERY_NOT_AUTHORIZED,
                comment: "Relay access denied!",
            }
            .render(),
            fail_bad_sequence: Reply {
                basic: Some(503),
                class: PermanentFailure,
                enhanced: INVALID_COMMAND,
                comment: "Bad sequence of commands!",
            }
            .render(),
            fail_missing_argument: Reply {
                basic: Some(501),
                class: PermanentFailure,
                enhanced: INVALID_COMMAND_ARGUMENTS,
                comment: "Missing argument!",
            }
            .render(),
            fail_encryption_needed: Reply {
                basic: Some(530),
                class: PermanentFailure,
                enhanced: SECURITY_STATUS,
                comment: "Must issue a STARTTLS command first!",
            }
            .render(),

            error_too_many_recipients: Reply {
                basic: Some(452),
                class: TransientFailure,
                enhanced: TOO_MANY_RECIPIENTS,
                comment: "Too many recipients!",
            }
            .render(),
            error_auth: Reply {
                basic: Some(454),
                class: TransientFailure,
                enhanced: OTHER_MAIL_SYSTEM_STATUS,
                comment: "Problem with auth!",
            }
            .render(),
            error_unable_to_resolve_host: Reply {
                basic: Some(451),
                class: TransientFailure,
                enhanced: OTHER_NETWORK_STATUS,
                comment: "Unable to resolve host!",
            }
            .render(),
            error_start_tls: Reply {
                basic: Some(454),
                class: TransientFailure,
                enhanced: SECURITY_STATUS,
                comment: "TLS negotiation failed!",
            }
            .render(),
            error_queue: Reply {
                basic: Some(451),
                class: TransientFailure,
                enhanced: OTHER_MAIL_SYSTEM_STATUS,
                comment: "Temporary queue error!",
            }
            .render(),
            error_read_data_cmd: Reply {
                basic: Some(451),
                class: TransientFailure,
                enhanced: OTHER_MAIL_SYSTEM_STATUS,
                comment: "Read error!",
            }
            .render(),

            success_authentication: Reply {
                basic: Some(235),
                class: Success,
                enhanced: SECURITY_STATUS,
                comment: "Authentication successful!",
            }
            .render(),
            success_reset_cmd: success_mail_cmd.clone(),
            success_mail_cmd,
            success_rcpt_cmd: Reply {
                basic: None,
                class: Success,
                enhanced: DESTINATION_MAILBOX_ADDRESS_VALID,
                comment: "",
            }
            .render(),
            success_verify_cmd: Reply {
                basic: Some(252),
                class: Success,
                enhanced: OTHER_PROTOCOL_STATUS,
                comment: "Cannot verify user!",
            }
            .render(),
            success_expn_cmd: Reply {
                basic: Some(252),
                class: Success,
                enhanced: OTHER_PROTOCOL_STATUS,
                comment: "Cannot expand list!",
            }
            .render(),
            success_noop_cmd: Reply {
                basic: None,
                class: Success,
                enhanced: OTHER_STATUS,
                comment: "",
            }
            .render(),
            success_quit_cmd: Reply {
                basic: Some(221),
                class: Success,
                enhanced: OTHER_STATUS,
                comment: "Bye!",
            }
            .render(),
            success_data_cmd: "354 Go ahead!".to_string(),
            success_help_cmd: Reply {
                basic: Some(214),
                class: Success,
                enhanced: OTHER_STATUS,
                comment: "Commands: HELO EHLO MAIL RCPT DATA BDAT RSET NOOP VRFY HELP QUIT",
            }
            .render(),
            success_start_tls_cmd: Reply {
                basic: Some(220),
                class: Success,
                enhanced: OTHER_STATUS,
                comment: "Ready to start TLS!",
            }
            .render(),
            success_message_queued: Reply {
                basic: Some(250),
                class: Success,
                enhanced: OTHER_STATUS,
                comment: "OK Queued as",
            }
            .render(),
        }
    }
}

lazy_static! {
    /// The process-wide reply catalogue, read-only after initialization.
    pub static ref CODES: Responses = Responses::build();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_basic_enhanced_and_comment() {
        assert_eq!(CODES.success_mail_cmd, "250 2.1.0 OK");
        assert_eq!(CODES.success_rcpt_cmd, "250 2.1.5 OK");
        assert_eq!(CODES.success_noop_cmd, "250 2.0.0 OK");
        assert_eq!(CODES.success_message_queued, "250 2.0.0 OK Queued as");
        assert_eq!(CODES.success_data_cmd, "354 Go ahead!");
    }

    #[test]
    fn resolves_basic_code_from_registry() {
        let rendered = Reply {
            basic: None,
            class: Class::TransientFailure,
            enhanced: TOO_MANY_RECIPIENTS,
            comment: "Too many recipients",
        }
        .render();
        assert_eq!(rendered, "452 4.5.3 Too many recipients");
    }

    #[test]
    fn falls_back_to_class_hundreds() {
        let rendered = Reply {
            basic: None,
            class: Class::PermanentFailure,
            enhanced: MAILBOX_FULL,
            comment: "",
        }
        .render();
        assert_eq!(rendered, "552 5.2.2 Permanent failure.");

        let unmapped = Reply {
            basic: None,
            class: Class::TransientFailure,
            enhanced: MAILBOX_FULL,
            comment: "full",
        }
        .render();
        assert_eq!(unmapped, "400 4.2.2 full");
    }

    #[test]
    fn every_reply_matches_the_wire_shape() {
        let shape = regex::Regex::new(r"^\d{3} ([245]\.\d{1,3}\.\d{1,3} )?\S.*$").unwrap();
        let all = [
            &CODES.fail_line_too_long,
            &CODES.fail_nested_mail_cmd,
            &CODES.fail_no_recipients_data_cmd,
            &CODES.fail_unrecognized_cmd,
            &CODES.fail_max_unrecognized_cmd,
            &CODES.fail_invalid_address,
            &CODES.fail_invalid_recipient,
            &CODES.fail_local_part_too_long,
            &CODES.fail_domain_too_long,
            &CODES.fail_path_too_long,
            &CODES.fail_invalid_extension,
            &CODES.fail_unsupported_parameter,
            &CODES.fail_authentication,
            &CODES.fail_malformed_auth_input,
            &CODES.fail_unqualified_host_name,
            &CODES.fail_too_big,
            &CODES.fail_cmd_not_supported,
            &CODES.fail_cmd_param_not_implemented,
            &CODES.fail_mailbox_doesnt_exist,
            &CODES.fail_mailbox_full,
            &CODES.fail_access_denied,
            &CODES.fail_bad_sequence,
            &CODES.fail_missing_argument,
            &CODES.fail_encryption_needed,
            &CODES.error_too_many_recipients,
            &CODES.error_auth,
            &CODES.error_unable_to_resolve_host,
            &CODES.error_start_tls,
            &CODES.error_queue,
            &CODES.error_read_data_cmd,
            &CODES.success_authentication,
            &CODES.success_mail_cmd,
            &CODES.success_rcpt_cmd,
            &CODES.success_reset_cmd,
            &CODES.success_verify_cmd,
            &CODES.success_expn_cmd,
            &CODES.success_noop_cmd,
            &CODES.success_quit_cmd,
            &CODES.success_data_cmd,
            &CODES.success_help_cmd,
            &CODES.success_start_tls_cmd,
            &CODES.success_message_queued,
        ];
        for reply in all {
            assert!(shape.is_match(reply), "bad reply shape: {reply:?}");
            let first = reply.as_bytes()[0];
            assert!(matches!(first, b'2' | b'3' | b'4' | b'5'));
        }
    }
}
