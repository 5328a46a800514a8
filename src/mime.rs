use chrono::{DateTime, TimeZone, Utc};
use mailparse::{DispositionType, MailAddr, MailHeaderMap, ParsedMail};

use crate::attachments::extract_attachments;
use crate::error::ParseError;
use crate::models::ParsedMessage;

/// Plain and HTML bodies found in a message. Either may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedBody {
    pub plain: Option<String>,
    pub html: Option<String>,
}

impl ExtractedBody {
    /// Plain text for consumers that need it: the text/plain part when present,
    /// otherwise text derived from the HTML part, otherwise empty.
    pub fn text(&self) -> String {
        match (&self.plain, &self.html) {
            (Some(plain), _) => plain.clone(),
            (None, Some(html)) => html_to_text(html),
            (None, None) => String::new(),
        }
    }
}

/// Reverse RFC 2047 encoded words (`=?charset?B|Q?...?=`).
///
/// Unencoded input passes through unchanged and folded lines are joined.
/// If the value cannot be parsed as a header, the input is returned as-is
/// rather than failing.
pub fn decode_header_words(raw: &str) -> String {
    let unfolded = raw
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let composed = format!("X-Decode: {unfolded}");
    match mailparse::parse_header(composed.as_bytes()) {
        Ok((header, _)) => header.get_value().trim().to_string(),
        Err(e) => {
            log::debug!("header word decode failed, keeping raw value: {e}");
            String::from_utf8_lossy(raw.as_bytes()).into_owned()
        }
    }
}

/// Strip tags from an HTML body and collapse whitespace.
pub fn html_to_text(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }
    let rendered = html_safe_md::render_email_plain(None, Some(html));
    rendered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Find the body parts of a message.
///
/// Multipart messages are walked in native part order; the first
/// non-attachment text/plain and text/html parts win. A single-part message
/// is taken at its declared type.
pub fn extract_body(mail: &ParsedMail<'_>) -> ExtractedBody {
    let mut body = ExtractedBody::default();

    if !is_multipart(mail) {
        match mail.ctype.mimetype.to_ascii_lowercase().as_str() {
            "text/plain" => body.plain = Some(decode_text(mail)),
            "text/html" => body.html = Some(decode_text(mail)),
            other => log::debug!("single-part message of type {other} has no text body"),
        }
        return body;
    }

    for part in leaf_parts(mail) {
        if is_attachment_disposition(part) {
            continue;
        }
        match part.ctype.mimetype.to_ascii_lowercase().as_str() {
            "text/plain" if body.plain.is_none() => body.plain = Some(decode_text(part)),
            "text/html" if body.html.is_none() => body.html = Some(decode_text(part)),
            _ => {}
        }
        if body.plain.is_some() && body.html.is_some() {
            break;
        }
    }
    body
}

/// Parse one raw RFC 822 message into its normalized form.
///
/// A message with no header section at all is an error; every missing or
/// malformed field degrades to a default.
pub fn parse_message(raw: &[u8], handle: u32) -> Result<ParsedMessage, ParseError> {
    let mail = mailparse::parse_mail(raw).map_err(|e| ParseError {
        handle,
        reason: format!("malformed MIME: {e}"),
    })?;
    if mail.headers.is_empty() {
        return Err(ParseError {
            handle,
            reason: "no header section".into(),
        });
    }

    let headers = &mail.headers;
    let subject = headers
        .get_first_value("Subject")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "No Subject".into());
    let from = headers
        .get_first_value("From")
        .unwrap_or_else(|| "Unknown".into());
    let (sender, sender_name) = split_sender(&from);
    let recipient = headers
        .get_first_value("To")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "Unknown".into());
    let received_at = parse_date(headers.get_first_value("Date").as_deref());
    let message_id = headers
        .get_first_value("Message-ID")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| synthetic_message_id(raw));

    let body = extract_body(&mail);

    Ok(ParsedMessage {
        message_id,
        subject,
        sender,
        sender_name,
        recipient,
        received_at,
        body_text: body.text(),
        body_html: body.html,
        attachments: extract_attachments(&mail),
    })
}

/// Split a `From` value into (address, display name).
pub fn split_sender(from: &str) -> (String, String) {
    if let Ok(list) = mailparse::addrparse(from) {
        for addr in list.into_inner() {
            let single = match addr {
                MailAddr::Single(single) => Some(single),
                MailAddr::Group(group) => group.addrs.into_iter().next(),
            };
            if let Some(single) = single {
                return (single.addr, single.display_name.unwrap_or_default());
            }
        }
    }

    // addrparse rejects some real-world headers; fall back to angle brackets.
    match (from.find('<'), from.rfind('>')) {
        (Some(open), Some(close)) if open < close => {
            let name = from[..open].trim().trim_matches('"').to_string();
            (from[open + 1..close].trim().to_string(), name)
        }
        _ => (from.trim().to_string(), String::new()),
    }
}

/// Parse an RFC 2822 date; malformed or missing dates become "now".
pub fn parse_date(value: Option<&str>) -> DateTime<Utc> {
    value
        .and_then(|v| mailparse::dateparse(v).ok())
        // dateparse yields 0 for input it cannot read.
        .filter(|&ts| ts != 0)
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .unwrap_or_else(|| {
            log::debug!("unparseable Date header {value:?}, using current time");
            Utc::now()
        })
}

/// Deterministic stand-in for a missing `Message-ID`, so re-fetching the same
/// bytes still deduplicates.
fn synthetic_message_id(raw: &[u8]) -> String {
    let id = uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, raw);
    format!("<generated-{id}@inbox-triage>")
}

pub(crate) fn is_multipart(part: &ParsedMail<'_>) -> bool {
    part.ctype.mimetype.to_ascii_lowercase().starts_with("multipart/")
}

pub(crate) fn is_attachment_disposition(part: &ParsedMail<'_>) -> bool {
    part.get_content_disposition().disposition == DispositionType::Attachment
}

/// Every non-multipart part of the tree, depth first in native order.
pub(crate) fn leaf_parts<'m, 'a>(mail: &'m ParsedMail<'a>) -> Vec<&'m ParsedMail<'a>> {
    let mut out = Vec::new();
    collect_leaves(mail, &mut out);
    out
}

fn collect_leaves<'m, 'a>(part: &'m ParsedMail<'a>, out: &mut Vec<&'m ParsedMail<'a>>) {
    if is_multipart(part) {
        for sub in &part.subparts {
            collect_leaves(sub, out);
        }
    } else {
        out.push(part);
    }
}

fn decode_text(part: &ParsedMail<'_>) -> String {
    part.get_body().unwrap_or_else(|e| {
        log::debug!("failed to decode {} part: {e}", part.ctype.mimetype);
        String::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── decode_header_words ──────────────────────────────────────

    #[test]
    fn plain_header_passes_through() {
        assert_eq!(decode_header_words("Quarterly budget"), "Quarterly budget");
    }

    #[test]
    fn base64_encoded_word_decoded() {
        assert_eq!(
            decode_header_words("=?UTF-8?B?SGVsbG8gV29ybGQ=?="),
            "Hello World"
        );
    }

    #[test]
    fn quoted_printable_latin1_decoded() {
        assert_eq!(decode_header_words("=?ISO-8859-1?Q?caf=E9?="), "café");
    }

    #[test]
    fn folded_value_keeps_every_line() {
        assert_eq!(decode_header_words("a\r\nX: b"), "a X: b");
        assert_eq!(
            decode_header_words("Quarterly\r\n\tbudget"),
            "Quarterly budget"
        );
    }

    // ── extract_body ─────────────────────────────────────────────

    #[test]
    fn multipart_alternative_prefers_plain() {
        let raw = b"From: a@example.com\r\n\
Content-Type: multipart/alternative; boundary=\"b\"\r\n\
\r\n\
--b\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Plain version\r\n\
--b\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>HTML version</p>\r\n\
--b--\r\n";
        let mail = mailparse::parse_mail(raw).unwrap();
        let body = extract_body(&mail);
        assert_eq!(body.plain.as_deref().map(str::trim), Some("Plain version"));
        assert!(body.html.unwrap().contains("HTML version"));
    }

    #[test]
    fn first_plain_part_wins() {
        let raw = b"Content-Type: multipart/mixed; boundary=\"b\"\r\n\
\r\n\
--b\r\n\
Content-Type: text/plain\r\n\
\r\n\
first\r\n\
--b\r\n\
Content-Type: text/plain\r\n\
\r\n\
second\r\n\
--b--\r\n";
        let mail = mailparse::parse_mail(raw).unwrap();
        assert_eq!(extract_body(&mail).plain.as_deref().map(str::trim), Some("first"));
    }

    #[test]
    fn attached_text_file_is_not_body() {
        let raw = b"Content-Type: multipart/mixed; boundary=\"b\"\r\n\
\r\n\
--b\r\n\
Content-Type: text/plain\r\n\
Content-Disposition: attachment; filename=\"notes.txt\"\r\n\
\r\n\
attached notes\r\n\
--b\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>Real <b>body</b></p>\r\n\
--b--\r\n";
        let mail = mailparse::parse_mail(raw).unwrap();
        let body = extract_body(&mail);
        assert!(body.plain.is_none());
        let text = body.text();
        assert!(text.contains("Real"));
        assert!(text.contains("body"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn nested_multipart_walked() {
        let raw = b"Content-Type: multipart/mixed; boundary=\"outer\"\r\n\
\r\n\
--outer\r\n\
Content-Type: multipart/alternative; boundary=\"inner\"\r\n\
\r\n\
--inner\r\n\
Content-Type: text/plain\r\n\
\r\n\
deep text\r\n\
--inner--\r\n\
--outer--\r\n";
        let mail = mailparse::parse_mail(raw).unwrap();
        assert_eq!(extract_body(&mail).text().trim(), "deep text");
    }

    #[test]
    fn single_part_html_derives_text() {
        let raw = b"Content-Type: text/html\r\n\r\n<div>Hello\n\n   <em>there</em></div>";
        let mail = mailparse::parse_mail(raw).unwrap();
        let body = extract_body(&mail);
        assert!(body.plain.is_none());
        let text = body.text();
        assert!(text.contains("Hello"));
        assert!(text.contains("there"));
        assert!(!text.contains("  "));
        assert!(!text.contains('\n'));
    }

    #[test]
    fn single_part_non_text_has_no_body() {
        let raw = b"Content-Type: image/png\r\n\r\nnot really a png";
        let mail = mailparse::parse_mail(raw).unwrap();
        assert_eq!(extract_body(&mail), ExtractedBody::default());
        assert_eq!(extract_body(&mail).text(), "");
    }

    #[test]
    fn quoted_printable_body_decoded() {
        let raw = b"Content-Type: text/plain; charset=utf-8\r\n\
Content-Transfer-Encoding: quoted-printable\r\n\
\r\n\
Caf=C3=A9 at noon";
        let mail = mailparse::parse_mail(raw).unwrap();
        assert_eq!(extract_body(&mail).text().trim(), "Café at noon");
    }

    // ── parse_message ────────────────────────────────────────────

    #[test]
    fn headers_normalized() {
        let raw = b"From: \"The Boss\" <boss@company.com>\r\n\
To: me@company.com\r\n\
Subject: =?UTF-8?Q?Budget_review?=\r\n\
Date: Tue, 1 Jul 2025 10:00:00 +0000\r\n\
Message-ID: <abc@company.com>\r\n\
\r\n\
Body";
        let msg = parse_message(raw, 1).unwrap();
        assert_eq!(msg.sender, "boss@company.com");
        assert_eq!(msg.sender_name, "The Boss");
        assert_eq!(msg.recipient, "me@company.com");
        assert_eq!(msg.subject, "Budget review");
        assert_eq!(msg.message_id, "<abc@company.com>");
        assert_eq!(msg.received_at.timestamp(), 1_751_364_000);
    }

    #[test]
    fn missing_headers_get_defaults() {
        let before = Utc::now();
        let msg = parse_message(b"Date: not a date\r\n\r\nhi", 7).unwrap();
        assert_eq!(msg.subject, "No Subject");
        assert_eq!(msg.sender, "Unknown");
        assert!(msg.received_at >= before);
        assert!(msg.message_id.starts_with("<generated-"));
    }

    #[test]
    fn unreadable_dates_fall_back_to_now() {
        for value in ["not a date", "garbage", ""] {
            let before = Utc::now();
            assert!(parse_date(Some(value)) >= before, "{value:?}");
        }
        assert!(parse_date(None) >= Utc::now() - chrono::Duration::seconds(1));
    }

    #[test]
    fn synthetic_id_is_stable_for_same_bytes() {
        let raw = b"Subject: no id\r\n\r\nsame bytes";
        let a = parse_message(raw, 1).unwrap();
        let b = parse_message(raw, 2).unwrap();
        assert_eq!(a.message_id, b.message_id);
        assert_eq!(
            a.message_id,
            "<generated-88028f3a-03a2-5308-a60e-e91671aa998d@inbox-triage>"
        );
    }

    #[test]
    fn headerless_input_is_a_parse_error() {
        for raw in [&b""[..], b"\r\n\r\nbody only"] {
            let err = parse_message(raw, 9).unwrap_err();
            assert_eq!(err.handle, 9);
            assert_eq!(err.reason, "no header section");
        }
    }

    #[test]
    fn sender_without_display_name() {
        assert_eq!(
            split_sender("hr@company.com"),
            ("hr@company.com".to_string(), String::new())
        );
    }
}
