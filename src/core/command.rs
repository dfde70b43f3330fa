use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// The fixed SMTP command vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCode {
    Helo,
    Ehlo,
    Quit,
    Rset,
    Noop,
    Mail,
    Rcpt,
    Data,
    StartTls,
    Vrfy,
    Expn,
    Help,
    Auth,
    Bdat,
}

/// One parsed command line: the verb as received, its code, the raw tail
/// after the verb, and the tail split into space-separated arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub code: CommandCode,
    pub verb: String,
    pub data: String,
    pub arguments: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("command empty")]
    Empty,
    #[error("command contains non 7-bit ASCII")]
    NotAscii,
    #[error("unrecognized command")]
    Unrecognized,
    #[error("unexpected argument")]
    UnexpectedArgument,
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (verb, data) = match line.split_once(' ') {
            Some((verb, data)) => (verb, data),
            None => (line, ""),
        };

        if verb.is_empty() {
            return Err(CommandError::Empty);
        }
        if !verb.is_ascii() {
            return Err(CommandError::NotAscii);
        }

        let code = match verb.to_ascii_uppercase().as_str() {
            "HELO" => CommandCode::Helo,
            "EHLO" => CommandCode::Ehlo,
            "QUIT" => CommandCode::Quit,
            "RSET" => CommandCode::Rset,
            "NOOP" => CommandCode::Noop,
            "MAIL" => CommandCode::Mail,
            "RCPT" => CommandCode::Rcpt,
            "DATA" => CommandCode::Data,
            "STARTTLS" => CommandCode::StartTls,
            "VRFY" => CommandCode::Vrfy,
            "EXPN" => CommandCode::Expn,
            "HELP" => CommandCode::Help,
            "AUTH" => CommandCode::Auth,
            "BDAT" => CommandCode::Bdat,
            _ => return Err(CommandError::Unrecognized),
        };

        // RFC 5321 section 4.1.1 defines these verbs as argument-free.
        if matches!(
            code,
            CommandCode::Rset | CommandCode::Data | CommandCode::Quit
        ) && !data.is_empty()
        {
            return Err(CommandError::UnexpectedArgument);
        }

        Ok(Command {
            code,
            verb: verb.to_string(),
            data: data.to_string(),
            arguments: data.split_whitespace().map(str::to_string).collect(),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.data.is_empty() {
            write!(f, "{}", self.verb)
        } else {
            write!(f, "{} {}", self.verb, self.data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_arguments() {
        let cmd: Command = "MAIL".parse().unwrap();
        assert!(cmd.arguments.is_empty());

        let cmd: Command = "MAIL arg1".parse().unwrap();
        assert_eq!(cmd.arguments, vec!["arg1"]);

        let cmd: Command = "MAIL arg1 arg2 arg3".parse().unwrap();
        assert_eq!(cmd.arguments, vec!["arg1", "arg2", "arg3"]);
    }

    #[test]
    fn rejects_non_ascii_and_empty_verbs() {
        assert_eq!(
            "čšěř test@test.te -d".parse::<Command>(),
            Err(CommandError::NotAscii)
        );
        assert_eq!("".parse::<Command>(), Err(CommandError::Empty));
        assert_eq!("FOO bar".parse::<Command>(), Err(CommandError::Unrecognized));
    }

    #[test]
    fn parses_verb_code_and_tail() {
        let cmd: Command = "MAIL FROM:<test@test.te> 8BITMIME".parse().unwrap();
        assert_eq!(cmd.code, CommandCode::Mail);
        assert_eq!(cmd.verb, "MAIL");
        assert_eq!(cmd.data, "FROM:<test@test.te> 8BITMIME");
        assert_eq!(cmd.arguments, vec!["FROM:<test@test.te>", "8BITMIME"]);

        let cmd: Command = "rset".parse().unwrap();
        assert_eq!(cmd.code, CommandCode::Rset);
        assert_eq!(cmd.verb, "rset");
        assert!(cmd.data.is_empty());
        assert!(cmd.arguments.is_empty());
    }

    #[test]
    fn forbids_arguments_where_rfc_does() {
        assert_eq!(
            "RSET x".parse::<Command>(),
            Err(CommandError::UnexpectedArgument)
        );
        assert_eq!(
            "DATA now".parse::<Command>(),
            Err(CommandError::UnexpectedArgument)
        );
        assert_eq!(
            "QUIT please".parse::<Command>(),
            Err(CommandError::UnexpectedArgument)
        );
    }

    #[test]
    fn round_trips_through_display() {
        for original in ["MAIL FROM:<test@test.te> 8BITMIME", "RSET", "EHLO mx.example"] {
            let cmd: Command = original.parse().unwrap();
            assert_eq!(cmd.to_string(), original);
            assert_eq!(cmd.to_string().parse::<Command>().unwrap(), cmd);
        }
    }
}
