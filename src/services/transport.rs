use async_native_tls::TlsConnector;
use lettre::{
    message::{header::ContentType, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use mailparse::MailHeaderMap;

use crate::error::WarmupError;

/// Cap on how many unread messages a single poll fetches (spec §4.4 step 1).
const MAX_UNSEEN_FETCH: usize = 50;

/// Outbound message ready to hand to SMTP (spec §4.1 / C1). `tracking_pixel`
/// is an `<img>` tag injected before `</body>` when present.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub from: String,
    pub from_name: Option<String>,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    pub tracking_pixel_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SmtpCredentials {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub use_tls: bool,
}

#[derive(Debug, Clone)]
pub struct ImapCredentials {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub use_ssl: bool,
}

/// A message pulled from an IMAP inbox, parsed enough to drive the
/// conversation engine and bounce detector.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub uid: u32,
    pub message_id: Option<String>,
    pub from: String,
    pub subject: String,
    pub body: String,
    pub references: Option<String>,
}

pub struct MailTransport;

impl MailTransport {
    /// Sends a message over SMTP, returning the server-assigned message id.
    pub async fn send(creds: &SmtpCredentials, message: &OutboundMessage) -> Result<String, WarmupError> {
        let from = match &message.from_name {
            Some(name) => format!("{name} <{}>", message.from),
            None => message.from.clone(),
        };

        let mut builder = Message::builder()
            .from(from.parse().map_err(|e| WarmupError::InvalidInput(format!("invalid from address: {e}")))?)
            .to(message
                .to
                .parse()
                .map_err(|e| WarmupError::InvalidInput(format!("invalid to address: {e}")))?)
            .subject(&message.subject);

        if let Some(in_reply_to) = &message.in_reply_to {
            builder = builder.in_reply_to(in_reply_to.clone());
        }
        if let Some(references) = &message.references {
            builder = builder.references(references.clone());
        }

        let body_html = render_html_body(&message.body, message.tracking_pixel_url.as_deref());

        let email = builder
            .multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::builder().header(ContentType::TEXT_PLAIN).body(message.body.clone()))
                    .singlepart(SinglePart::builder().header(ContentType::TEXT_HTML).body(body_html)),
            )
            .map_err(|e| WarmupError::InvalidInput(format!("failed to build message: {e}")))?;

        let creds_auth = Credentials::new(creds.username.clone(), creds.password.clone());

        let transport: AsyncSmtpTransport<Tokio1Executor> = if creds.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&creds.host)
                .map_err(|e| WarmupError::InvalidState(format!("failed to build SMTP transport: {e}")))?
                .credentials(creds_auth)
                .port(creds.port)
                .build()
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&creds.host)
                .credentials(creds_auth)
                .port(creds.port)
                .build()
        };

        let response = transport
            .send(email)
            .await
            .map_err(|e| WarmupError::InvalidState(format!("SMTP send failed: {e}")))?;

        Ok(response.message().collect::<Vec<_>>().join(""))
    }

    /// Fetches unseen messages from INBOX, marking each `\Seen` as a side
    /// effect of the RFC822 fetch (mirrors the reference implementation's
    /// `fetch_unread_emails`; callers that decide not to act on a message
    /// are responsible for restoring `\Seen` via [`Self::mark_unseen`]).
    pub async fn fetch_unseen(creds: &ImapCredentials) -> Result<Vec<InboundMessage>, WarmupError> {
        let tcp = tokio::net::TcpStream::connect((creds.host.as_str(), creds.port))
            .await
            .map_err(|e| WarmupError::InvalidState(format!("IMAP connect failed: {e}")))?;

        let tls = TlsConnector::new();
        let tls_stream = tls
            .connect(&creds.host, tcp)
            .await
            .map_err(|e| WarmupError::InvalidState(format!("IMAP TLS handshake failed: {e}")))?;

        let client = async_imap::Client::new(tls_stream);
        let mut session = client
            .login(&creds.username, &creds.password)
            .await
            .map_err(|(e, _)| WarmupError::InvalidState(format!("IMAP login failed: {e}")))?;

        session
            .select("INBOX")
            .await
            .map_err(|e| WarmupError::InvalidState(format!("IMAP SELECT failed: {e}")))?;

        let mut unseen_uids: Vec<u32> = {
            use futures_util::TryStreamExt;
            session
                .uid_search("UNSEEN")
                .await
                .map_err(|e| WarmupError::InvalidState(format!("IMAP SEARCH failed: {e}")))?
                .into_iter()
                .collect()
        };
        unseen_uids.truncate(MAX_UNSEEN_FETCH);

        let mut messages = Vec::new();
        if !unseen_uids.is_empty() {
            let uid_set = unseen_uids.iter().map(u32::to_string).collect::<Vec<_>>().join(",");

            use futures_util::StreamExt;
            let mut fetch_stream = session
                .uid_fetch(&uid_set, "RFC822")
                .await
                .map_err(|e| WarmupError::InvalidState(format!("IMAP FETCH failed: {e}")))?;

            while let Some(fetch) = fetch_stream.next().await {
                let fetch = fetch.map_err(|e| WarmupError::InvalidState(format!("IMAP FETCH error: {e}")))?;
                let Some(uid) = fetch.uid else { continue };
                let Some(raw) = fetch.body() else { continue };

                if let Ok(parsed) = mailparse::parse_mail(raw) {
                    let from = parsed.headers.get_first_value("From").unwrap_or_default();
                    let subject = parsed.headers.get_first_value("Subject").unwrap_or_default();
                    let message_id = parsed.headers.get_first_value("Message-ID");
                    let references = parsed.headers.get_first_value("References");
                    let body = extract_text_body(&parsed);

                    messages.push(InboundMessage {
                        uid,
                        message_id,
                        from,
                        subject,
                        body,
                        references,
                    });
                }
            }
            drop(fetch_stream);
        }

        session
            .logout()
            .await
            .map_err(|e| WarmupError::InvalidState(format!("IMAP logout failed: {e}")))?;

        Ok(messages)
    }

    /// Clears `\Seen` on the given UIDs (two-phase reopen pattern: connect
    /// fresh, select INBOX, `STORE -FLAGS (\Seen)`), restoring messages the
    /// caller decided not to act on back to unread.
    pub async fn mark_unseen(creds: &ImapCredentials, uids: &[u32]) -> Result<(), WarmupError> {
        if uids.is_empty() {
            return Ok(());
        }

        let tcp = tokio::net::TcpStream::connect((creds.host.as_str(), creds.port))
            .await
            .map_err(|e| WarmupError::InvalidState(format!("IMAP connect failed: {e}")))?;
        let tls = TlsConnector::new();
        let tls_stream = tls
            .connect(&creds.host, tcp)
            .await
            .map_err(|e| WarmupError::InvalidState(format!("IMAP TLS handshake failed: {e}")))?;

        let client = async_imap::Client::new(tls_stream);
        let mut session = client
            .login(&creds.username, &creds.password)
            .await
            .map_err(|(e, _)| WarmupError::InvalidState(format!("IMAP login failed: {e}")))?;

        session
            .select("INBOX")
            .await
            .map_err(|e| WarmupError::InvalidState(format!("IMAP SELECT failed: {e}")))?;

        let uid_set = uids.iter().map(u32::to_string).collect::<Vec<_>>().join(",");

        use futures_util::StreamExt;
        let mut stream = session
            .uid_store(&uid_set, "-FLAGS (\\Seen)")
            .await
            .map_err(|e| WarmupError::InvalidState(format!("IMAP STORE failed: {e}")))?;
        while stream.next().await.is_some() {}
        drop(stream);

        session
            .logout()
            .await
            .map_err(|e| WarmupError::InvalidState(format!("IMAP logout failed: {e}")))?;

        Ok(())
    }
}

fn render_html_body(plain: &str, tracking_pixel_url: Option<&str>) -> String {
    let escaped = plain.replace('\n', "<br>\n");
    match tracking_pixel_url {
        Some(url) => format!(
            "<html><body><p>{escaped}</p><img src=\"{url}\" width=\"1\" height=\"1\" alt=\"\"></body></html>"
        ),
        None => format!("<html><body><p>{escaped}</p></body></html>"),
    }
}

fn extract_text_body(parsed: &mailparse::ParsedMail) -> String {
    if parsed.subparts.is_empty() {
        return parsed.get_body().unwrap_or_default();
    }
    for part in &parsed.subparts {
        if part.ctype.mimetype == "text/plain" {
            if let Ok(body) = part.get_body() {
                return body;
            }
        }
    }
    parsed.get_body().unwrap_or_default()
}

/// From-header address extraction shared by the conversation engine and
/// bounce detector (`"Name <addr@host>"` or a bare address).
pub fn extract_address(from_header: &str) -> String {
    if let (Some(start), Some(end)) = (from_header.find('<'), from_header.find('>')) {
        if start < end {
            return from_header[start + 1..end].trim().to_lowercase();
        }
    }
    from_header.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_address_from_display_name() {
        assert_eq!(extract_address("Jane Doe <jane@example.com>"), "jane@example.com");
    }

    #[test]
    fn extracts_bare_address() {
        assert_eq!(extract_address("Jane@Example.com"), "jane@example.com");
    }

    #[test]
    fn renders_tracking_pixel_when_present() {
        let html = render_html_body("hi", Some("http://x/track"));
        assert!(html.contains("http://x/track"));
        assert!(html.contains("width=\"1\""));
    }
}
