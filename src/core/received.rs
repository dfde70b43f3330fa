use std::net::SocketAddr;

use chrono::Utc;

use crate::core::tls::TlsState;

/// Soft wrap target for trace headers; the hard ceiling of RFC 5322 is
/// 998 octets and is never approached by these fields.
const SOFT_LINE_LIMIT: usize = 78;

pub(crate) struct ReceivedContext<'a> {
    pub remote_host: &'a str,
    pub remote_addr: SocketAddr,
    pub username: Option<&'a str>,
    pub tls: Option<&'a TlsState>,
    pub local_addr: SocketAddr,
    pub local_host: &'a str,
    pub appname: &'a str,
    pub version: &'a str,
    pub session_id: &'a str,
}

/// Renders the value of the `Received:` header for one accepted message,
/// folded so no line exceeds the soft limit.
pub(crate) fn received_header(ctx: &ReceivedContext<'_>) -> String {
    let mut value = format!(
        "from {} ({}:{}",
        ctx.remote_host,
        ctx.remote_host,
        ctx.remote_addr.port()
    );
    if let Some(user) = ctx.username {
        value.push_str(" authenticated as ");
        value.push_str(user);
    }
    value.push(')');

    if let Some(tls) = ctx.tls {
        value.push_str(&format!(
            " using {} with cipher {}",
            tls.version, tls.cipher
        ));
    }

    let with = if ctx.tls.is_some() { "ESMTPS" } else { "SMTP" };
    value.push_str(&format!(
        " by {} ({}) with {}; {} {}; id {}; {}",
        ctx.local_addr.ip(),
        ctx.local_host,
        with,
        ctx.appname,
        ctx.version,
        ctx.session_id,
        // RFC 1123 timestamp, zero-padded day, named zone
        Utc::now().format("%a, %d %b %Y %H:%M:%S GMT"),
    ));

    fold_header_value(&value, "Received: ".len())
}

/// Word-wraps a header value on spaces. Continuation lines start with
/// CRLF plus two spaces; `name_len` accounts for the header name already
/// occupying the first line.
pub(crate) fn fold_header_value(value: &str, name_len: usize) -> String {
    let mut out = String::with_capacity(value.len() + 16);
    let mut line_len = name_len;

    for (i, word) in value.split(' ').enumerate() {
        if i == 0 {
            out.push_str(word);
            line_len += word.len();
        } else if line_len + 1 + word.len() > SOFT_LINE_LIMIT {
            out.push_str("\r\n  ");
            out.push_str(word);
            line_len = 2 + word.len();
        } else {
            out.push(' ');
            out.push_str(word);
            line_len += 1 + word.len();
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context<'a>(tls: Option<&'a TlsState>) -> ReceivedContext<'a> {
        ReceivedContext {
            remote_host: "client.example",
            remote_addr: "192.0.2.7:52311".parse().unwrap(),
            username: None,
            tls,
            local_addr: "198.51.100.1:25".parse().unwrap(),
            local_host: "mx.example",
            appname: "mailgate",
            version: "0.1.0",
            session_id: "a1b2c3d4e5f6",
        }
    }

    #[test]
    fn plain_session_header() {
        let value = received_header(&context(None));
        assert!(value.starts_with("from client.example (client.example:52311)"));
        assert!(value.contains("by 198.51.100.1 (mx.example) with SMTP;"));
        assert!(value.contains("id a1b2c3d4e5f6;"));
        assert!(!value.contains("authenticated as"));
    }

    #[test]
    fn tls_and_auth_are_recorded() {
        let tls = TlsState {
            version: "TLSv1_3".to_string(),
            cipher: "TLS13_AES_256_GCM_SHA384".to_string(),
        };
        let mut ctx = context(Some(&tls));
        ctx.username = Some("alice");
        let value = received_header(&ctx);
        assert!(value.contains("authenticated as alice"));
        assert!(value.contains("using TLSv1_3 with cipher TLS13_AES_256_GCM_SHA384"));
        assert!(value.contains("with ESMTPS;"));
    }

    #[test]
    fn folded_lines_stay_under_the_soft_limit() {
        let value = received_header(&context(None));
        let full = format!("Received: {value}");
        for line in full.split("\r\n") {
            assert!(line.len() <= SOFT_LINE_LIMIT, "line too long: {line:?}");
        }
        assert!(full.split("\r\n").count() >= 2);
    }

    #[test]
    fn folding_keeps_every_word() {
        let value = "one two three four five six seven eight nine ten".repeat(4);
        let folded = fold_header_value(&value, 10);
        let unfolded = folded.replace("\r\n  ", " ");
        assert_eq!(unfolded, value);
    }
}
