//! Minimal blocking IMAP4rev1 client over rustls.
//!
//! Speaks just enough of the protocol for the proposal listener: LOGIN,
//! SELECT, `UID SEARCH UNSEEN`, `UID FETCH BODY.PEEK[]`, `UID STORE` and
//! LOGOUT. Every session is short-lived and runs inside `spawn_blocking`.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tracing::{debug, warn};

use crate::config::ImapConfig;
use crate::error::MailError;
use crate::mail::source::{MailSource, RawMail};

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// IMAP mailbox polled by the listener.
pub struct ImapMailbox {
    config: ImapConfig,
}

impl ImapMailbox {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }

    /// Run `f` against a logged-in session with the mailbox selected.
    async fn with_session<T, F>(&self, f: F) -> Result<T, MailError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapSession<TlsStream>) -> Result<T, MailError> + Send + 'static,
    {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let mut session = connect(&config)?;
            session.login(&config.username, config.password.expose_secret())?;
            session.select(&config.mailbox)?;
            let result = f(&mut session);
            session.logout();
            result
        })
        .await
        .map_err(|e| MailError::Task(e.to_string()))?
    }
}

#[async_trait]
impl MailSource for ImapMailbox {
    fn mailbox(&self) -> &str {
        &self.config.mailbox
    }

    async fn fetch_unseen(&self) -> Result<Vec<RawMail>, MailError> {
        self.with_session(|session| {
            let uids = session.uid_search_unseen()?;
            let mut mails = Vec::with_capacity(uids.len());
            for uid in uids {
                match session.uid_fetch(uid)? {
                    Some(bytes) => mails.push(RawMail { uid, bytes }),
                    None => warn!(uid, "FETCH returned no message body"),
                }
            }
            Ok(mails)
        })
        .await
    }

    async fn mark_seen(&self, uids: &[u32]) -> Result<(), MailError> {
        if uids.is_empty() {
            return Ok(());
        }
        let uids = uids.to_vec();
        self.with_session(move |session| session.uid_store_seen(&uids))
            .await
    }
}

/// Open a TLS connection and consume the server greeting.
fn connect(config: &ImapConfig) -> Result<ImapSession<TlsStream>, MailError> {
    let tcp = TcpStream::connect((config.host.as_str(), config.port)).map_err(|e| {
        MailError::Connect {
            host: config.host.clone(),
            port: config.port,
            reason: e.to_string(),
        }
    })?;
    tcp.set_read_timeout(Some(config.timeout))?;
    tcp.set_write_timeout(Some(config.timeout))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls_pki_types::ServerName::try_from(config.host.clone())
        .map_err(|e| MailError::Tls(format!("invalid server name {}: {e}", config.host)))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| MailError::Tls(e.to_string()))?;

    let mut session = ImapSession::new(rustls::StreamOwned::new(conn, tcp));
    session.greeting()?;
    debug!(host = %config.host, port = config.port, "IMAP connected");
    Ok(session)
}

/// Untagged data returned by one command.
#[derive(Debug, Default)]
struct Response {
    lines: Vec<String>,
    literals: Vec<Vec<u8>>,
}

/// One IMAP conversation over any byte stream.
struct ImapSession<S: Read + Write> {
    stream: BufReader<S>,
    next_tag: u32,
}

impl<S: Read + Write> ImapSession<S> {
    fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            next_tag: 1,
        }
    }

    fn read_line(&mut self) -> Result<Vec<u8>, MailError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(MailError::Closed);
        }
        Ok(buf)
    }

    fn greeting(&mut self) -> Result<(), MailError> {
        let line = String::from_utf8_lossy(&self.read_line()?).trim_end().to_string();
        if line.starts_with("* OK") || line.starts_with("* PREAUTH") {
            Ok(())
        } else if line.starts_with("* BYE") {
            Err(MailError::Closed)
        } else {
            Err(MailError::Protocol(format!("unexpected greeting: {line}")))
        }
    }

    /// Send a tagged command and collect its untagged lines and literals.
    ///
    /// `label` names the command in errors so credentials never end up in
    /// logs.
    fn command(&mut self, label: &str, command: &str) -> Result<Response, MailError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let writer = self.stream.get_mut();
        writer.write_all(format!("{tag} {command}\r\n").as_bytes())?;
        writer.flush()?;

        let tag_prefix = format!("{tag} ");
        let mut response = Response::default();
        loop {
            let line = self.read_line()?;

            if let Some(len) = literal_len(&line) {
                let mut literal = vec![0u8; len];
                self.stream.read_exact(&mut literal)?;
                response.literals.push(literal);
                response
                    .lines
                    .push(String::from_utf8_lossy(&line).trim_end().to_string());
                continue;
            }

            let text = String::from_utf8_lossy(&line).trim_end().to_string();
            if let Some(status) = text.strip_prefix(&tag_prefix) {
                if status.starts_with("OK") {
                    return Ok(response);
                }
                return Err(MailError::Command {
                    command: label.to_string(),
                    response: status.to_string(),
                });
            }
            response.lines.push(text);
        }
    }

    fn login(&mut self, user: &str, password: &str) -> Result<(), MailError> {
        let command = format!("LOGIN {} {}", quote(user), quote(password));
        match self.command("LOGIN", &command) {
            Ok(_) => Ok(()),
            Err(MailError::Command { .. }) => Err(MailError::AuthFailed {
                user: user.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    fn select(&mut self, mailbox: &str) -> Result<(), MailError> {
        self.command("SELECT", &format!("SELECT {}", quote(mailbox)))?;
        Ok(())
    }

    fn uid_search_unseen(&mut self) -> Result<Vec<u32>, MailError> {
        let response = self.command("UID SEARCH", "UID SEARCH UNSEEN")?;
        let mut uids = Vec::new();
        for line in &response.lines {
            if let Some(rest) = line.strip_prefix("* SEARCH") {
                for token in rest.split_whitespace() {
                    let uid = token
                        .parse()
                        .map_err(|_| MailError::Protocol(format!("bad SEARCH uid: {token}")))?;
                    uids.push(uid);
                }
            }
        }
        Ok(uids)
    }

    /// Fetch the full message without setting `\Seen`.
    fn uid_fetch(&mut self, uid: u32) -> Result<Option<Vec<u8>>, MailError> {
        let mut response = self.command("UID FETCH", &format!("UID FETCH {uid} BODY.PEEK[]"))?;
        if response.literals.is_empty() {
            return Ok(None);
        }
        Ok(Some(response.literals.swap_remove(0)))
    }

    fn uid_store_seen(&mut self, uids: &[u32]) -> Result<(), MailError> {
        if uids.is_empty() {
            return Ok(());
        }
        let set = uids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        self.command("UID STORE", &format!("UID STORE {set} +FLAGS (\\Seen)"))?;
        Ok(())
    }

    /// Best effort; the session is dropped either way.
    fn logout(&mut self) {
        if let Err(e) = self.command("LOGOUT", "LOGOUT") {
            debug!(error = %e, "IMAP logout failed");
        }
    }
}

/// Length of a `{N}` literal announced at the end of a response line.
fn literal_len(line: &[u8]) -> Option<usize> {
    let line = std::str::from_utf8(line).ok()?.trim_end();
    let body = line.strip_suffix('}')?;
    let open = body.rfind('{')?;
    body[open + 1..].parse().ok()
}

/// Quote a string argument per RFC 3501.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Replays canned server output and records what the client wrote.
    struct Scripted {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Scripted {
        fn new(server: &str) -> Self {
            Self {
                input: Cursor::new(server.as_bytes().to_vec()),
                output: Vec::new(),
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn sent(session: &ImapSession<Scripted>) -> String {
        String::from_utf8_lossy(&session.stream.get_ref().output).to_string()
    }

    #[test]
    fn literal_len_parses_trailing_count() {
        assert_eq!(literal_len(b"* 1 FETCH (UID 7 BODY[] {342}\r\n"), Some(342));
        assert_eq!(literal_len(b"* 1 FETCH (FLAGS (\\Seen))\r\n"), None);
        assert_eq!(literal_len(b"A1 OK done\r\n"), None);
    }

    #[test]
    fn quote_escapes_specials() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote("pa\"ss\\word"), "\"pa\\\"ss\\\\word\"");
    }

    #[test]
    fn full_session_reads_literal_bodies() {
        let body = "Subject: RFP: Chairs\r\n\r\nline one\r\nline two\r\n";
        let server = format!(
            "* OK IMAP ready\r\n\
             A1 OK LOGIN completed\r\n\
             * 3 EXISTS\r\n\
             A2 OK [READ-WRITE] SELECT completed\r\n\
             * SEARCH 12 15\r\n\
             A3 OK SEARCH completed\r\n\
             * 1 FETCH (UID 12 BODY[] {{{}}}\r\n{})\r\n\
             A4 OK FETCH completed\r\n",
            body.len(),
            body
        );
        let mut session = ImapSession::new(Scripted::new(&server));
        session.greeting().unwrap();
        session.login("buyer@example.com", "secret").unwrap();
        session.select("INBOX").unwrap();
        assert_eq!(session.uid_search_unseen().unwrap(), vec![12, 15]);

        let fetched = session.uid_fetch(12).unwrap().unwrap();
        assert_eq!(fetched, body.as_bytes());

        let written = sent(&session);
        assert!(written.contains("A1 LOGIN \"buyer@example.com\" \"secret\"\r\n"));
        assert!(written.contains("A2 SELECT \"INBOX\"\r\n"));
        assert!(written.contains("A3 UID SEARCH UNSEEN\r\n"));
        assert!(written.contains("A4 UID FETCH 12 BODY.PEEK[]\r\n"));
    }

    #[test]
    fn empty_search_yields_no_uids() {
        let server = "* SEARCH\r\nA1 OK SEARCH completed\r\n";
        let mut session = ImapSession::new(Scripted::new(server));
        assert!(session.uid_search_unseen().unwrap().is_empty());
    }

    #[test]
    fn rejected_login_is_auth_failed() {
        let server = "* OK ready\r\nA1 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n";
        let mut session = ImapSession::new(Scripted::new(server));
        session.greeting().unwrap();
        let err = session.login("buyer", "wrong").unwrap_err();
        assert!(matches!(err, MailError::AuthFailed { .. }));
    }

    #[test]
    fn store_sends_uid_set() {
        let server = "A1 OK STORE completed\r\n";
        let mut session = ImapSession::new(Scripted::new(server));
        session.uid_store_seen(&[3, 9]).unwrap();
        assert_eq!(sent(&session), "A1 UID STORE 3,9 +FLAGS (\\Seen)\r\n");
    }

    #[test]
    fn closed_connection_is_reported() {
        let mut session = ImapSession::new(Scripted::new(""));
        assert!(matches!(session.greeting(), Err(MailError::Closed)));
    }

    #[test]
    fn bye_greeting_is_closed() {
        let mut session = ImapSession::new(Scripted::new("* BYE overloaded\r\n"));
        assert!(matches!(session.greeting(), Err(MailError::Closed)));
    }
}
