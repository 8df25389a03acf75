//! # bounceledger-mime
//!
//! Lenient RFC 5322 / MIME message parsing for bounce analysis.
//!
//! ## Features
//!
//! - **Infallible parsing**: malformed input yields an emptier [`Message`],
//!   never an error
//! - **MIME tree**: multipart containers and embedded `message/rfc822`
//!   entities are parsed into nested [`Part`]s
//! - **Decoding**: Base64, Quoted-Printable, RFC 2047 header words
//! - **Ordered headers**: case-insensitive lookup, first occurrence wins
//!
//! ## Quick Start
//!
//! ```
//! use bounceledger_mime::Message;
//!
//! let raw = "From: MAILER-DAEMON@example.com\r\n\
//!            Subject: Undelivered Mail\r\n\
//!            Content-Type: text/plain\r\n\
//!            \r\n\
//!            Delivery failed.";
//!
//! let message = Message::parse(raw);
//! assert_eq!(message.subject(), Some("Undelivered Mail"));
//! assert_eq!(message.decoded_text(), "Delivery failed.");
//! ```
//!
//! ### Walking a delivery report
//!
//! ```ignore
//! use bounceledger_mime::Message;
//!
//! let message = Message::parse(std::fs::read("bounce.eml")?);
//! for part in message.walk() {
//!     if part.content_type().is("message", "delivery-status") {
//!         println!("{}", part.decoded_text());
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod content_type;
mod error;
mod header;
mod message;

pub mod encoding;

pub use content_type::ContentType;
pub use error::{Error, Result};
pub use header::Headers;
pub use message::{Message, Part, TransferEncoding};
