//! Property tests for the lenient parser.

use bounceledger_mime::{Message, encoding::decode_quoted_printable};
use proptest::prelude::*;

proptest! {
    #[test]
    fn parse_never_panics(raw in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let message = Message::parse(&raw);
        prop_assert_eq!(message.raw(), raw.as_slice());
        let _ = message.decoded_text();
        let _ = message.walk().count();
    }

    #[test]
    fn parse_never_panics_on_mime_like_text(
        boundary in "[a-zA-Z0-9]{1,12}",
        body in "[ -~\r\n]{0,512}",
    ) {
        let raw = format!(
            "Content-Type: multipart/mixed; boundary={boundary}\r\n\r\n--{boundary}\r\n{body}\r\n--{boundary}--\r\n"
        );
        let message = Message::parse(raw);
        let delimiter = format!("--{boundary}");
        prop_assert!(message.parts().len() <= 1 + body.matches(&delimiter).count());
    }

    #[test]
    fn quoted_printable_plain_ascii_is_identity(text in "[a-zA-Z0-9 .,:;!?]{0,256}") {
        prop_assert_eq!(decode_quoted_printable(text.as_bytes()), text.as_bytes());
    }

    #[test]
    fn header_lookup_is_case_insensitive(value in "[a-zA-Z0-9 ]{0,40}") {
        let message = Message::parse(format!("X-Test: {value}\r\n\r\nbody"));
        prop_assert_eq!(message.header("x-test"), Some(value.trim()));
        prop_assert_eq!(message.header("X-TEST"), Some(value.trim()));
    }
}
