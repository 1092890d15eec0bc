//! MIME part walk, body decode. Carried over from the source codebase's
//! `adapters/imap/historical.rs` (`find_mime_part`, `encoding_to_string`,
//! `part_to_section_path`, `decode_body`), generalized per §4.3.5: the
//! source's version only ever picked one part; this walk recurses across
//! every eligible inline-text part up to a 10-part hard cap, in
//! declaration order, so the preview pipeline can split the byte budget
//! across more than a single attachment-free multipart/alternative leaf.

use imap_proto::types::{BodyStructure, ContentEncoding, SectionPath};

/// Maximum number of MIME parts the preview pipeline will retrieve for a
/// single message (§4.3.5).
pub const MAX_ELIGIBLE_PARTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligiblePart {
    pub path: Vec<u32>,
    pub encoding: String,
    pub is_html: bool,
}

/// Walk a `BODYSTRUCTURE`, collecting inline `text/plain` and `text/html`
/// leaves (skipping attachments) in declaration order, up to
/// `MAX_ELIGIBLE_PARTS`.
pub fn find_eligible_parts<'a>(body: &'a BodyStructure<'a>) -> Vec<EligiblePart> {
    let mut out = Vec::new();
    walk(body, &[], &mut out);
    out
}

fn walk<'a>(body: &'a BodyStructure<'a>, prefix: &[u32], out: &mut Vec<EligiblePart>) {
    if out.len() >= MAX_ELIGIBLE_PARTS {
        return;
    }
    match body {
        BodyStructure::Text { common, other, .. } => {
            let subtype = common.ty.subtype.to_lowercase();
            if (subtype == "plain" || subtype == "html") && !is_attachment(common) {
                let path = if prefix.is_empty() { vec![1] } else { prefix.to_vec() };
                out.push(EligiblePart {
                    path,
                    encoding: encoding_to_string(&other.transfer_encoding),
                    is_html: subtype == "html",
                });
            }
        }
        BodyStructure::Basic { common, other, .. } => {
            let mime = format!(
                "{}/{}",
                common.ty.ty.to_lowercase(),
                common.ty.subtype.to_lowercase()
            );
            if (mime == "text/plain" || mime == "text/html") && !is_attachment(common) {
                let path = if prefix.is_empty() { vec![1] } else { prefix.to_vec() };
                out.push(EligiblePart {
                    path,
                    encoding: encoding_to_string(&other.transfer_encoding),
                    is_html: mime == "text/html",
                });
            }
        }
        BodyStructure::Multipart { bodies, .. } => {
            for (i, part) in bodies.iter().enumerate() {
                if out.len() >= MAX_ELIGIBLE_PARTS {
                    break;
                }
                let mut part_path = prefix.to_vec();
                part_path.push((i + 1) as u32);
                walk(part, &part_path, out);
            }
        }
        BodyStructure::Message { body, .. } => {
            let inner = if prefix.is_empty() { vec![1] } else { prefix.to_vec() };
            walk(body, &inner, out);
        }
    }
}

fn is_attachment(common: &imap_proto::types::BodyContentCommon) -> bool {
    common
        .disposition
        .as_ref()
        .map(|d| d.ty.eq_ignore_ascii_case("attachment"))
        .unwrap_or(false)
}

pub fn encoding_to_string(enc: &ContentEncoding) -> String {
    match enc {
        ContentEncoding::SevenBit => "7bit".to_string(),
        ContentEncoding::EightBit => "8bit".to_string(),
        ContentEncoding::Binary => "binary".to_string(),
        ContentEncoding::Base64 => "base64".to_string(),
        ContentEncoding::QuotedPrintable => "quoted-printable".to_string(),
        ContentEncoding::Other(s) => s.to_lowercase(),
    }
}

pub fn part_to_string(part: &[u32]) -> String {
    part.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(".")
}

pub fn part_to_section_path(part: &[u32]) -> SectionPath {
    SectionPath::Part(part.to_vec(), None)
}

/// Decode a fetched body section given its transfer encoding. Falls back
/// to the raw bytes, lossily interpreted as UTF-8, on decode failure.
pub fn decode_body(raw: &[u8], encoding: &str) -> String {
    let bytes = match encoding {
        "quoted-printable" => quoted_printable::decode(raw, quoted_printable::ParseMode::Robust)
            .unwrap_or_else(|_| raw.to_vec()),
        "base64" => {
            let cleaned: Vec<u8> = raw.iter().filter(|b| !b.is_ascii_whitespace()).copied().collect();
            use base64::Engine;
            base64::engine::general_purpose::STANDARD
                .decode(&cleaned)
                .unwrap_or_else(|_| raw.to_vec())
        }
        _ => raw.to_vec(),
    };
    String::from_utf8_lossy(&bytes).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_path_renders_dotted() {
        assert_eq!(part_to_string(&[1, 2, 3]), "1.2.3");
    }

    #[test]
    fn decode_body_quoted_printable() {
        let raw = b"Hello=2C world!";
        assert_eq!(decode_body(raw, "quoted-printable"), "Hello, world!");
    }

    #[test]
    fn decode_body_base64() {
        let raw = b"aGVsbG8=";
        assert_eq!(decode_body(raw, "base64"), "hello");
    }

    #[test]
    fn decode_body_unknown_encoding_passes_through() {
        let raw = b"plain text";
        assert_eq!(decode_body(raw, "7bit"), "plain text");
    }
}
