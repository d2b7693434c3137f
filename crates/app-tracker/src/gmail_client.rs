//! Gmail API client implementing [`Mailbox`].

use crate::auth::{https_connector, GoogleAuth, SCOPES};
use crate::error::{TrackerError, TrackerResult};
use crate::fetcher::Mailbox;
use crate::retry::with_timeout;
use chrono::{DateTime, Utc};
use google_gmail1::api::{Message, MessagePart};
use google_gmail1::hyper_rustls::HttpsConnector;
use google_gmail1::Gmail;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracker_types::EmailRecord;

/// Characters of snippet plus body kept per message
const MAX_BODY_CHARS: usize = 3000;

/// Gmail caps `maxResults` per page
const PAGE_SIZE: u32 = 500;

pub struct GmailClient {
    hub: Gmail<HttpsConnector<HttpConnector>>,
    timeout: Duration,
}

impl GmailClient {
    pub fn new(auth: GoogleAuth, timeout: Duration) -> TrackerResult<Self> {
        let client = Client::builder(TokioExecutor::new()).build(https_connector()?);
        let hub = Gmail::new(client, auth);
        Ok(Self { hub, timeout })
    }

    fn parse_message(message: Message) -> TrackerResult<EmailRecord> {
        let message_id = message
            .id
            .clone()
            .ok_or_else(|| TrackerError::fetch("Message without id"))?;
        let thread_id = message.thread_id.clone().unwrap_or_default();
        let snippet = message.snippet.clone().unwrap_or_default();

        let mut subject = String::new();
        let mut sender = String::new();
        let mut date_header = None;

        if let Some(headers) = message.payload.as_ref().and_then(|p| p.headers.as_ref()) {
            for header in headers {
                match header.name.as_deref() {
                    Some("Subject") => subject = header.value.clone().unwrap_or_default(),
                    Some("From") => sender = header.value.clone().unwrap_or_default(),
                    Some("Date") => date_header = header.value.as_deref().and_then(parse_date),
                    _ => {}
                }
            }
        }

        let received_at = date_header
            .or_else(|| message.internal_date.and_then(DateTime::from_timestamp_millis))
            .and_then(|ts| DateTime::from_timestamp(ts.timestamp(), 0))
            .ok_or_else(|| {
                TrackerError::fetch(format!("Message {} has no usable date", message_id))
            })?;

        let (text, html) = extract_bodies(&message);
        let body = text
            .or_else(|| html.map(|h| html_to_text(&h)))
            .unwrap_or_default();

        let combined = format!("{}\n{}", decode_entities(&snippet), body);
        let body_snippet: String = combined.trim().chars().take(MAX_BODY_CHARS).collect();

        Ok(EmailRecord {
            message_id,
            thread_id,
            sender,
            subject,
            body_snippet,
            received_at,
            detection_reason: String::new(),
        })
    }
}

impl Mailbox for GmailClient {
    async fn list_message_ids(&self, query: &str) -> TrackerResult<Vec<String>> {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut call = self
                .hub
                .users()
                .messages_list("me")
                .q(query)
                .max_results(PAGE_SIZE)
                .add_scopes(SCOPES);
            if let Some(token) = &page_token {
                call = call.page_token(token);
            }

            let (_, response) = with_timeout(
                self.timeout,
                async { call.doit().await.map_err(|e| api_error("List messages", e)) },
                || TrackerError::fetch("List messages timed out"),
            )
            .await?;

            ids.extend(
                response
                    .messages
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| m.id),
            );

            match response.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        tracing::debug!("Listed {} message ids", ids.len());
        Ok(ids)
    }

    async fn get_message(&self, message_id: &str) -> TrackerResult<EmailRecord> {
        let call = self
            .hub
            .users()
            .messages_get("me", message_id)
            .format("full")
            .add_scopes(SCOPES);

        let (_, message) = with_timeout(
            self.timeout,
            async { call.doit().await.map_err(|e| api_error("Get message", e)) },
            || TrackerError::fetch(format!("Get message {} timed out", message_id)),
        )
        .await?;

        Self::parse_message(message)
    }
}

/// Expired or revoked credentials are fatal; everything else is a fetch error
fn api_error(what: &str, err: google_gmail1::Error) -> TrackerError {
    match &err {
        google_gmail1::Error::MissingToken(_) => {
            TrackerError::auth(format!("{}: {}", what, err))
        }
        google_gmail1::Error::Failure(response) if response.status().as_u16() == 401 => {
            TrackerError::auth(format!("{}: unauthorized", what))
        }
        google_gmail1::Error::BadRequest(body) if body["error"]["code"] == 401 => {
            TrackerError::auth(format!("{}: {}", what, body["error"]["message"]))
        }
        _ => TrackerError::fetch(format!("{}: {}", what, err)),
    }
}

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    // Some senders append a zone comment, e.g. "+0000 (UTC)"
    let value = match value.find(" (") {
        Some(idx) => &value[..idx],
        None => value,
    };
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn extract_bodies(message: &Message) -> (Option<String>, Option<String>) {
    let payload = match message.payload.as_ref() {
        Some(p) => p,
        None => return (None, None),
    };

    let mut text_body = None;
    let mut html_body = None;

    if let Some(decoded) = part_data(payload) {
        match payload.mime_type.as_deref() {
            Some("text/html") => html_body = Some(decoded),
            _ => text_body = Some(decoded),
        }
    }

    if let Some(parts) = &payload.parts {
        extract_bodies_from_parts(parts, &mut text_body, &mut html_body);
    }

    (text_body, html_body)
}

fn extract_bodies_from_parts(
    parts: &[MessagePart],
    text_body: &mut Option<String>,
    html_body: &mut Option<String>,
) {
    for part in parts {
        match part.mime_type.as_deref() {
            Some("text/plain") if text_body.is_none() => *text_body = part_data(part),
            Some("text/html") if html_body.is_none() => *html_body = part_data(part),
            Some(mime) if mime.starts_with("multipart/") => {
                if let Some(nested) = &part.parts {
                    extract_bodies_from_parts(nested, text_body, html_body);
                }
            }
            _ => {}
        }
    }
}

fn part_data(part: &MessagePart) -> Option<String> {
    let data = part.body.as_ref()?.data.as_ref()?;
    let text = String::from_utf8_lossy(data).trim().to_string();
    (!text.is_empty()).then_some(text)
}

static SCRIPT_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:script|style|head)\b[^>]*>.*?</(?:script|style|head)>")
        .expect("invalid script pattern")
});
static LINE_BREAK_TAGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</(?:p|div|tr|li|h[1-6])>").expect("invalid break pattern")
});
static TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("invalid tag pattern"));
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").expect("invalid space pattern"));
static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n+").expect("invalid line pattern"));

/// Plain text from an HTML body: markup dropped, block ends become newlines
fn html_to_text(html: &str) -> String {
    let text = SCRIPT_STYLE.replace_all(html, "");
    let text = LINE_BREAK_TAGS.replace_all(&text, "\n");
    let text = TAGS.replace_all(&text, "");
    let text = decode_entities(&text);
    let text = SPACES.replace_all(&text, " ");
    let text = BLANK_LINES.replace_all(&text, "\n");
    text.lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}
