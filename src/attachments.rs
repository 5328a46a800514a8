use mailparse::ParsedMail;

use crate::mime::{decode_header_words, is_attachment_disposition, is_multipart, leaf_parts};
use crate::models::ExtractedAttachment;

/// Characters that are unsafe in a stored filename.
const RESERVED: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Pull attachment payloads out of a message, in part traversal order.
///
/// A part qualifies when it is marked `Content-Disposition: attachment` or
/// carries a filename. Parts whose payload cannot be decoded are skipped.
pub fn extract_attachments(mail: &ParsedMail<'_>) -> Vec<ExtractedAttachment> {
    if !is_multipart(mail) {
        return match attachment_from_part(mail) {
            Some(att) => vec![att],
            None => Vec::new(),
        };
    }
    leaf_parts(mail)
        .into_iter()
        .filter_map(attachment_from_part)
        .collect()
}

fn attachment_from_part(part: &ParsedMail<'_>) -> Option<ExtractedAttachment> {
    let filename = raw_filename(part);
    if filename.is_none() && !is_attachment_disposition(part) {
        return None;
    }

    let data = match part.get_body_raw() {
        Ok(data) => data,
        Err(e) => {
            log::warn!(
                "skipping undecodable attachment {:?}: {e}",
                filename.as_deref().unwrap_or("unnamed")
            );
            return None;
        }
    };

    let filename = filename
        .map(|name| sanitize_filename(&decode_header_words(&name)))
        .unwrap_or_else(|| "unnamed".into());

    Some(ExtractedAttachment {
        filename,
        content_type: part.ctype.mimetype.to_ascii_lowercase(),
        data,
    })
}

/// Filename from the disposition, falling back to the content-type `name`.
fn raw_filename(part: &ParsedMail<'_>) -> Option<String> {
    part.get_content_disposition()
        .params
        .get("filename")
        .cloned()
        .or_else(|| part.ctype.params.get("name").cloned())
        .filter(|name| !name.trim().is_empty())
}

/// Replace path separators and reserved filesystem characters with `_`.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if RESERVED.contains(&c) || c.is_control() { '_' } else { c })
        .collect();
    if cleaned.is_empty() {
        "unnamed".into()
    } else {
        cleaned
    }
}
