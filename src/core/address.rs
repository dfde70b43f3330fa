use std::fmt;
use std::net::IpAddr;

use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use thiserror::Error;

/// Maximum total length of an address, local part and domain included.
pub const MAX_EMAIL_LENGTH: usize = 256;
/// Maximum length of the local part (RFC 5321 section 4.5.3.1.1).
pub const MAX_LOCAL_LENGTH: usize = 64;
/// Maximum length of the domain (RFC 5321 section 4.5.3.1.2).
pub const MAX_DOMAIN_LENGTH: usize = 255;

/// An envelope address split into local part and domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub local: String,
    pub domain: String,
}

impl Address {
    pub fn email(&self) -> String {
        format!("{}@{}", self.local, self.domain)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("malformed e-mail address: {0}")]
    Malformed(String),
    #[error("local part exceeds {MAX_LOCAL_LENGTH} characters")]
    LocalPartTooLong,
    #[error("domain exceeds {MAX_DOMAIN_LENGTH} characters")]
    DomainTooLong,
    #[error("address exceeds {MAX_EMAIL_LENGTH} characters")]
    PathTooLong,
}

/// Parses a reverse-path or forward-path mailbox.
///
/// A strict RFC 5321 mailbox is angle-bracketed with no display name, but
/// badly behaving MTAs and MUAs routinely send the RFC 5322 forms instead,
/// so `Name <user@domain>`, `<user@domain>` and the bare `user@domain` are
/// all accepted and reduced to the actual address.
pub fn parse_address(src: &str) -> Result<Address, AddressError> {
    let src = src.trim();

    let candidate = match (src.rfind('<'), src.ends_with('>')) {
        (Some(open), true) => src[open + 1..src.len() - 1].trim(),
        _ => src,
    };

    if candidate.is_empty()
        || candidate.contains(['<', '>'])
        || candidate.contains(char::is_whitespace)
    {
        return Err(AddressError::Malformed(src.to_string()));
    }

    let at = candidate
        .rfind('@')
        .ok_or_else(|| AddressError::Malformed(src.to_string()))?;
    let (local, domain) = (&candidate[..at], &candidate[at + 1..]);
    if local.is_empty() || domain.is_empty() {
        return Err(AddressError::Malformed(src.to_string()));
    }

    if local.len() > MAX_LOCAL_LENGTH {
        return Err(AddressError::LocalPartTooLong);
    }
    if domain.len() > MAX_DOMAIN_LENGTH {
        return Err(AddressError::DomainTooLong);
    }
    if candidate.len() > MAX_EMAIL_LENGTH {
        return Err(AddressError::PathTooLong);
    }

    Ok(Address {
        local: local.to_string(),
        domain: domain.to_string(),
    })
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FqnError {
    #[error("unable to resolve host")]
    Unresolvable,
    #[error("host is not a fully-qualified name")]
    Unqualified,
}

/// Checks that a domain is fully qualified: it must have an MX record or,
/// failing that, an A/AAAA record. A resolver failure is reported apart
/// from a definitive negative so the caller can answer with a transient
/// code.
pub async fn is_fqn(domain: &str) -> Result<(), FqnError> {
    let resolver =
        TokioAsyncResolver::tokio_from_system_conf().map_err(|_| FqnError::Unresolvable)?;

    match resolver.mx_lookup(domain).await {
        Ok(_) => Ok(()),
        Err(e) => match e.kind() {
            ResolveErrorKind::NoRecordsFound { .. } => {
                match resolver.lookup_ip(domain).await {
                    Ok(_) => Ok(()),
                    Err(e) => match e.kind() {
                        ResolveErrorKind::NoRecordsFound { .. } => Err(FqnError::Unqualified),
                        _ => Err(FqnError::Unresolvable),
                    },
                }
            }
            _ => Err(FqnError::Unresolvable),
        },
    }
}

/// Best-effort reverse lookup for trace headers; `None` when the address
/// has no PTR record or the resolver is unavailable.
pub(crate) async fn reverse_lookup(ip: IpAddr) -> Option<String> {
    let resolver = TokioAsyncResolver::tokio_from_system_conf().ok()?;
    let names = resolver.reverse_lookup(ip).await.ok()?;
    names
        .iter()
        .next()
        .map(|name| name.to_string().trim_end_matches('.').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bare_bracketed_and_display_name_forms() {
        for src in [
            "hello@example.com",
            "<hello@example.com>",
            " <hello@example.com> ",
            "Hello There <hello@example.com>",
        ] {
            let addr = parse_address(src).unwrap();
            assert_eq!(addr.local, "hello");
            assert_eq!(addr.domain, "example.com");
            assert_eq!(addr.email(), "hello@example.com");
        }
    }

    #[test]
    fn accepts_utf8_mailboxes() {
        let addr = parse_address("<测试@测试.example>").unwrap();
        assert_eq!(addr.local, "测试");
    }

    #[test]
    fn rejects_malformed_addresses() {
        for src in ["", "<>", "no-at-sign", "<a@>", "<@b>", "a b@c.d", "<a@b> junk"] {
            assert!(
                matches!(parse_address(src), Err(AddressError::Malformed(_))),
                "accepted {src:?}"
            );
        }
    }

    #[test]
    fn enforces_length_limits() {
        let long_local = format!("{}@example.com", "a".repeat(MAX_LOCAL_LENGTH + 1));
        assert_eq!(
            parse_address(&long_local),
            Err(AddressError::LocalPartTooLong)
        );

        let long_domain = format!("user@{}", "d".repeat(MAX_DOMAIN_LENGTH + 1));
        assert_eq!(parse_address(&long_domain), Err(AddressError::DomainTooLong));

        let long_path = format!("{}@{}", "a".repeat(MAX_LOCAL_LENGTH), "d".repeat(MAX_DOMAIN_LENGTH));
        assert_eq!(parse_address(&long_path), Err(AddressError::PathTooLong));
    }
}
