//! Transport-level content decoding for buffered bodies
//!
//! Reverses the compression declared by a response's `content-encoding`
//! header before the body decoder runs. Only gzip is understood; every other
//! value (including `br` and `deflate`) passes through untouched.

use bytes::Bytes;
use flate2::read::GzDecoder;
use std::io::Read;
use tracing::warn;

use crate::proxy::headers::content_encodings;

/// Decompress `body` according to the declared `content-encoding`.
///
/// A malformed gzip stream is recovered locally: the diagnostic is logged and
/// the original compressed bytes are returned unmodified. This function never
/// fails past its boundary.
pub fn decompress(encoding: Option<&str>, body: Bytes) -> Bytes {
    match encoding {
        Some(value) if value.trim().eq_ignore_ascii_case(content_encodings::GZIP) => {
            let mut decoder = GzDecoder::new(body.as_ref());
            let mut decompressed = Vec::new();
            match decoder.read_to_end(&mut decompressed) {
                Ok(_) => Bytes::from(decompressed),
                Err(error) => {
                    warn!(%error, "Failed to decompress gzip body, passing bytes through");
                    body
                }
            }
        }
        // Unrecognized encodings are explicitly unhandled: pass-through
        _ => body,
    }
}
