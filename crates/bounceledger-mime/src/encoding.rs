//! MIME decoding utilities.
//!
//! Supports Base64, Quoted-Printable, and RFC 2047 header decoding. Bounce
//! messages are produced by a zoo of mailers, so everything here leans
//! towards lenient decoding: input that cannot be decoded is either reported
//! through [`Error`](crate::Error) or passed through unchanged, never panicked on.

use crate::error::Result;
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

/// Base64 engine that accepts missing padding and stray trailing bits.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Decodes Base64 data, ignoring embedded whitespace and line breaks.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &[u8]) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    LENIENT_BASE64.decode(cleaned).map_err(Into::into)
}

/// Decodes Quoted-Printable data (RFC 2045).
///
/// Soft line breaks (`=` at end of line, optionally followed by trailing
/// whitespace) are removed. Malformed escape sequences are kept verbatim.
#[must_use]
pub fn decode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let byte = data[i];
        if byte != b'=' {
            result.push(byte);
            i += 1;
            continue;
        }

        // Soft line break, possibly padded with whitespace by a sloppy mailer
        let mut j = i + 1;
        while j < data.len() && (data[j] == b' ' || data[j] == b'\t') {
            j += 1;
        }
        if data.get(j) == Some(&b'\r') && data.get(j + 1) == Some(&b'\n') {
            i = j + 2;
            continue;
        }
        if data.get(j) == Some(&b'\n') {
            i = j + 1;
            continue;
        }

        match (data.get(i + 1), data.get(i + 2)) {
            (Some(&hi), Some(&lo)) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                result.push((hex_value(hi) << 4) | hex_value(lo));
                i += 3;
            }
            _ => {
                result.push(b'=');
                i += 1;
            }
        }
    }

    result
}

const fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        b'A'..=b'F' => digit - b'A' + 10,
        _ => 0,
    }
}

/// Windows-1252 code points for bytes `0x80..=0x9F`. Unassigned bytes map
/// to the C1 control of the same value.
const WINDOWS_1252_HIGH: [char; 32] = [
    '\u{20AC}', '\u{0081}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{008D}', '\u{017D}', '\u{008F}',
    '\u{0090}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}', '\u{0153}', '\u{009D}', '\u{017E}', '\u{0178}',
];

/// Decodes bytes in the given charset into a string.
///
/// ISO-8859-1 and Windows-1252 are mapped byte by byte. Everything else,
/// including US-ASCII and a missing charset, is decoded as lossy UTF-8.
#[must_use]
pub fn decode_charset(bytes: &[u8], charset: Option<&str>) -> String {
    let charset = charset.map(str::to_ascii_lowercase);
    match charset.as_deref() {
        Some("iso-8859-1" | "iso8859-1" | "iso_8859-1" | "latin1" | "latin-1") => {
            bytes.iter().map(|&b| char::from(b)).collect()
        }
        Some("windows-1252" | "cp1252") => bytes
            .iter()
            .map(|&b| match b {
                0x80..=0x9F => WINDOWS_1252_HIGH[usize::from(b - 0x80)],
                _ => char::from(b),
            })
            .collect(),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Decodes RFC 2047 encoded-words embedded in a header value.
///
/// Format of an encoded word: `=?charset?encoding?encoded-text?=`. Whitespace
/// between two adjacent encoded words is dropped, as the RFC requires.
/// Encoded words that cannot be decoded are left as they are.
#[must_use]
pub fn decode_rfc2047(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    let mut pending_space = String::new();
    let mut previous_was_word = false;

    while let Some(start) = rest.find("=?") {
        let (before, candidate) = rest.split_at(start);
        let Some((decoded, consumed)) = decode_encoded_word(candidate) else {
            result.push_str(&pending_space);
            pending_space.clear();
            result.push_str(before);
            result.push_str("=?");
            rest = &candidate[2..];
            previous_was_word = false;
            continue;
        };

        if previous_was_word && before.chars().all(char::is_whitespace) {
            // Adjacent encoded words are joined without the separator
        } else {
            result.push_str(&pending_space);
            result.push_str(before);
        }
        pending_space.clear();
        result.push_str(&decoded);
        rest = &candidate[consumed..];
        previous_was_word = true;

        let trimmed = rest.trim_start();
        if trimmed.starts_with("=?") {
            pending_space = rest[..rest.len() - trimmed.len()].to_string();
            rest = trimmed;
        }
    }

    result.push_str(&pending_space);
    result.push_str(rest);
    result
}

/// Decodes a single encoded word at the start of `input`, returning the text
/// and the number of bytes consumed.
fn decode_encoded_word(input: &str) -> Option<(String, usize)> {
    let inner = input.strip_prefix("=?")?;
    let (charset, after_charset) = inner.split_once('?')?;
    let (encoding, after_encoding) = after_charset.split_once('?')?;
    let end = after_encoding.find("?=")?;
    let payload = &after_encoding[..end];
    if payload.contains(char::is_whitespace) {
        return None;
    }

    let bytes = match encoding.to_ascii_uppercase().as_str() {
        "B" => decode_base64(payload.as_bytes()).ok()?,
        "Q" => decode_quoted_printable(payload.replace('_', " ").as_bytes()),
        _ => return None,
    };

    // Strip an RFC 2231 language suffix such as "utf-8*en"
    let charset = charset.split('*').next().unwrap_or(charset);
    let consumed = input.len() - after_encoding.len() + end + 2;
    Some((decode_charset(&bytes, Some(charset)), consumed))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_decode() {
        let decoded = decode_base64(b"SGVsbG8sIFdvcmxkIQ==").unwrap();
        assert_eq!(decoded, b"Hello, World!");
    }

    #[test]
    fn test_base64_decode_wrapped_and_unpadded() {
        let decoded = decode_base64(b"SGVsbG8s\r\nIFdvcmxkIQ").unwrap();
        assert_eq!(decoded, b"Hello, World!");
    }

    #[test]
    fn test_base64_decode_invalid() {
        assert!(decode_base64(b"not*base64!").is_err());
    }

    #[test]
    fn test_quoted_printable_decode() {
        assert_eq!(decode_quoted_printable(b"Hello, World!"), b"Hello, World!");
        assert_eq!(
            String::from_utf8(decode_quoted_printable(b"H=C3=A9llo")).unwrap(),
            "Héllo"
        );
    }

    #[test]
    fn test_quoted_printable_soft_line_break() {
        assert_eq!(decode_quoted_printable(b"Hello=\r\nWorld"), b"HelloWorld");
        assert_eq!(decode_quoted_printable(b"Hello=  \nWorld"), b"HelloWorld");
    }

    #[test]
    fn test_quoted_printable_malformed_escape_kept() {
        assert_eq!(decode_quoted_printable(b"a=ZZb="), b"a=ZZb=");
    }

    #[test]
    fn test_rfc2047_plain_passthrough() {
        assert_eq!(decode_rfc2047("Hello"), "Hello");
    }

    #[test]
    fn test_rfc2047_base64() {
        assert_eq!(decode_rfc2047("=?utf-8?B?SMOpbGxv?="), "Héllo");
    }

    #[test]
    fn test_rfc2047_quoted_printable() {
        assert_eq!(decode_rfc2047("=?utf-8?Q?H=C3=A9llo_there?="), "Héllo there");
    }

    #[test]
    fn test_rfc2047_embedded_and_adjacent_words() {
        assert_eq!(
            decode_rfc2047("Re: =?utf-8?Q?a?= =?utf-8?Q?b?= end"),
            "Re: ab end"
        );
    }

    #[test]
    fn test_charset_latin1_and_windows_1252() {
        assert_eq!(decode_charset(b"Empf\xe4nger", Some("ISO-8859-1")), "Empfänger");
        assert_eq!(
            decode_charset(b"\x93quoted\x94 \x80 5 \x96 ok\x81", Some("windows-1252")),
            "\u{201C}quoted\u{201D} \u{20AC} 5 \u{2013} ok\u{0081}"
        );
        assert_eq!(decode_charset(b"\xe9t\xe9", Some("cp1252")), "été");
    }

    #[test]
    fn test_charset_us_ascii_is_read_as_utf8() {
        let utf8 = "Empfänger unbekannt".as_bytes();
        assert_eq!(decode_charset(utf8, Some("us-ascii")), "Empfänger unbekannt");
        assert_eq!(decode_charset(utf8, None), "Empfänger unbekannt");
        assert_eq!(decode_charset(b"bad \xff byte", Some("us-ascii")), "bad \u{FFFD} byte");
    }

    #[test]
    fn test_rfc2047_latin1() {
        assert_eq!(decode_rfc2047("=?iso-8859-1?Q?caf=E9?="), "café");
    }

    #[test]
    fn test_rfc2047_broken_word_left_alone() {
        assert_eq!(decode_rfc2047("=?utf-8?X?abc?= tail"), "=?utf-8?X?abc?= tail");
    }
}
