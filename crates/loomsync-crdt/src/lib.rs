#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

mod document;

pub use document::{ApplyOrigin, CrdtDocument, MAX_ENCODED_BYTES};

// vim: ts=4
