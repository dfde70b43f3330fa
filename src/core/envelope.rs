use crate::core::address::Address;
use crate::core::error::Error;

/// A message envelope: the transport-layer sender and recipients plus the
/// accumulated message bytes, kept apart from the RFC 5322 headers inside
/// the body.
///
/// Trace headers injected by the server are collected separately and only
/// folded into the data when the envelope is finalized, so a reset always
/// returns the envelope to a clean slate.
#[derive(Debug)]
pub struct Envelope {
    pub mail_from: Option<Address>,
    pub mail_to: Vec<Address>,
    data: Vec<u8>,
    headers: Vec<(String, String)>,
    max_rcpt_count: usize,
}

impl Envelope {
    pub fn new(max_rcpt_count: usize) -> Self {
        Envelope {
            mail_from: None,
            mail_to: Vec::new(),
            data: Vec::new(),
            headers: Vec::new(),
            max_rcpt_count,
        }
    }

    /// An envelope counts as set once a sender has been recorded.
    pub fn is_set(&self) -> bool {
        self.mail_from.is_some()
    }

    /// Returns the envelope to its initial state.
    pub fn reset(&mut self) {
        self.mail_from = None;
        self.mail_to.clear();
        self.data.clear();
        self.headers.clear();
    }

    pub fn add_recipient(&mut self, rcpt: Address) -> Result<(), Error> {
        if self.mail_to.len() >= self.max_rcpt_count {
            return Err(Error::TooManyRecipients(self.max_rcpt_count));
        }
        self.mail_to.push(rcpt);
        Ok(())
    }

    /// Prepares the envelope for message content; fails when no recipient
    /// has been accepted yet.
    pub fn begin_data(&mut self) -> Result<(), Error> {
        if self.mail_to.is_empty() {
            return Err(Error::NoRecipients);
        }
        self.data.clear();
        Ok(())
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn write_line(&mut self, line: &[u8]) {
        self.data.extend_from_slice(line);
        self.data.extend_from_slice(b"\r\n");
    }

    /// Queues a header for injection. Duplicate names are allowed; trace
    /// fields such as `Received` accumulate one entry per hop.
    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    /// Closes the envelope before handing it on: the queued headers are
    /// prepended to the message data in insertion order, so the delivered
    /// bytes start with the newest trace header.
    pub fn finalize(&mut self) {
        if self.headers.is_empty() {
            return;
        }
        let mut prefix = String::new();
        for (name, value) in &self.headers {
            prefix.push_str(name);
            prefix.push_str(": ");
            prefix.push_str(value);
            prefix.push_str("\r\n");
        }
        self.headers.clear();
        let mut merged = prefix.into_bytes();
        merged.append(&mut self.data);
        self.data = merged;
    }

    /// The message bytes, headers and body concatenated with CRLF line
    /// terminators.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::address::parse_address;

    fn addr(src: &str) -> Address {
        parse_address(src).unwrap()
    }

    #[test]
    fn add_recipient_appends_until_cap() {
        let mut env = Envelope::new(2);
        env.add_recipient(addr("hello@example.com")).unwrap();
        assert_eq!(env.mail_to.len(), 1);

        env.add_recipient(addr("again@example.com")).unwrap();
        assert!(matches!(
            env.add_recipient(addr("third@example.com")),
            Err(Error::TooManyRecipients(2))
        ));
        assert_eq!(env.mail_to.len(), 2);
    }

    #[test]
    fn is_set_follows_mail_from() {
        let mut env = Envelope::new(10);
        assert!(!env.is_set());
        env.mail_from = Some(addr("hello@example.com"));
        assert!(env.is_set());
    }

    #[test]
    fn begin_data_requires_a_recipient() {
        let mut env = Envelope::new(10);
        assert!(matches!(env.begin_data(), Err(Error::NoRecipients)));
        env.add_recipient(addr("hello@example.com")).unwrap();
        assert!(env.begin_data().is_ok());
    }

    #[test]
    fn reset_clears_every_field() {
        let mut env = Envelope::new(10);
        env.mail_from = Some(addr("hello@example.com"));
        env.add_recipient(addr("other@example.com")).unwrap();
        env.write(b"hello there");
        env.add_header("Received", "from somewhere");

        env.reset();
        assert!(env.mail_from.is_none());
        assert!(env.mail_to.is_empty());
        assert!(env.is_empty());
        assert!(!env.is_set());

        env.finalize();
        assert!(env.is_empty());
    }

    #[test]
    fn finalize_prepends_injected_headers_in_order() {
        let mut env = Envelope::new(10);
        env.add_recipient(addr("hello@example.com")).unwrap();
        env.begin_data().unwrap();
        env.write_line(b"Subject: hi");
        env.write_line(b"");
        env.write_line(b"body");

        env.add_header("Received", "from a.example by b.example");
        env.add_header("Message-ID", "<1.x@b.example>");
        env.finalize();

        let text = String::from_utf8(env.data().to_vec()).unwrap();
        assert!(text.starts_with("Received: from a.example by b.example\r\n"));
        assert!(text.contains("Message-ID: <1.x@b.example>\r\nSubject: hi\r\n"));
    }
}
