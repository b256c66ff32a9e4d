//! Best-effort body decoding keyed by declared content type
//!
//! Turns an already-buffered body into a structured representation for the
//! exchange record. The declared `content-type` header decides the decoding
//! branch; content is never sniffed. Decoding failures degrade the payload to
//! raw bytes with a local diagnostic instead of failing the exchange.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tracing::warn;

use crate::proxy::headers::content_types;

/// Structured interpretation of a raw body, tagged by declared content type
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DecodedPayload {
    /// `text/plain` bodies, lossily decoded as UTF-8
    Text(String),
    /// `application/json` bodies
    Json(serde_json::Value),
    /// `application/x-www-form-urlencoded` bodies; repeated keys collect
    /// into the value list in order of appearance
    Form(Vec<(String, Vec<String>)>),
    /// `multipart/form-data` bodies parsed against the declared boundary
    Multipart(Vec<MultipartPart>),
    /// Fallback for bodies whose declared type failed to parse
    Raw(Vec<u8>),
}

/// One named part of a multipart body
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MultipartPart {
    pub name: Option<String>,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub value: PartValue,
}

/// Part content: text when valid UTF-8, otherwise the raw bytes untouched
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PartValue {
    Text(String),
    Binary(Vec<u8>),
}

/// Decode a fully-buffered body according to its declared content type.
///
/// Returns `None` for empty bodies and for absent or unrecognized content
/// types (no parsing is attempted, no intent is guessed). Callers skip this
/// entirely for `GET` requests. Matching is containment, so parameterized
/// types such as `application/json; charset=utf-8` still decode.
pub async fn decode(content_type: Option<&str>, body: &Bytes) -> Option<DecodedPayload> {
    if body.is_empty() {
        return None;
    }
    let content_type = content_type?;

    if content_type.contains(content_types::TEXT_PLAIN) {
        Some(DecodedPayload::Text(
            String::from_utf8_lossy(body).into_owned(),
        ))
    } else if content_type.contains(content_types::JSON) {
        Some(decode_json(body))
    } else if content_type.contains(content_types::FORM_URLENCODED) {
        Some(decode_form(body))
    } else if content_type.contains(content_types::MULTIPART_FORM_DATA) {
        Some(decode_multipart(content_type, body).await)
    } else {
        None
    }
}

fn decode_json(body: &Bytes) -> DecodedPayload {
    match serde_json::from_slice(body) {
        Ok(value) => DecodedPayload::Json(value),
        Err(error) => {
            warn!(%error, "Failed to parse declared JSON body, keeping raw bytes");
            DecodedPayload::Raw(body.to_vec())
        }
    }
}

fn decode_form(body: &Bytes) -> DecodedPayload {
    let mut fields: Vec<(String, Vec<String>)> = Vec::new();
    for (key, value) in form_urlencoded::parse(body) {
        match fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value.into_owned()),
            None => fields.push((key.into_owned(), vec![value.into_owned()])),
        }
    }
    DecodedPayload::Form(fields)
}

async fn decode_multipart(content_type: &str, body: &Bytes) -> DecodedPayload {
    let boundary = match multer::parse_boundary(content_type) {
        Ok(boundary) => boundary,
        Err(error) => {
            warn!(%error, "Multipart body without usable boundary, keeping raw bytes");
            return DecodedPayload::Raw(body.to_vec());
        }
    };

    let buffered = body.clone();
    let stream = futures_util::stream::once(async move { Ok::<Bytes, Infallible>(buffered) });
    let mut multipart = multer::Multipart::new(stream, boundary);
    let mut parts = Vec::new();

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                let name = field.name().map(str::to_owned);
                let file_name = field.file_name().map(str::to_owned);
                let content_type = field.content_type().map(|mime| mime.to_string());
                match field.bytes().await {
                    Ok(data) => {
                        let value = match String::from_utf8(data.to_vec()) {
                            Ok(text) => PartValue::Text(text),
                            Err(error) => PartValue::Binary(error.into_bytes()),
                        };
                        parts.push(MultipartPart {
                            name,
                            file_name,
                            content_type,
                            value,
                        });
                    }
                    Err(error) => {
                        warn!(%error, "Failed to read multipart field, keeping raw bytes");
                        return DecodedPayload::Raw(body.to_vec());
                    }
                }
            }
            Ok(None) => break,
            Err(error) => {
                warn!(%error, "Failed to parse multipart body, keeping raw bytes");
                return DecodedPayload::Raw(body.to_vec());
            }
        }
    }

    DecodedPayload::Multipart(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[tokio::test]
    async fn test_empty_body_decodes_to_none() {
        let body = Bytes::new();
        assert_eq!(decode(Some("application/json"), &body).await, None);
        assert_eq!(decode(None, &body).await, None);
    }

    #[tokio::test]
    async fn test_absent_or_unrecognized_content_type() {
        let body = Bytes::from_static(b"some bytes");
        assert_eq!(decode(None, &body).await, None);
        assert_eq!(decode(Some("application/octet-stream"), &body).await, None);
        assert_eq!(decode(Some("image/png"), &body).await, None);
    }

    #[rstest]
    #[case("text/plain")]
    #[case("text/plain; charset=utf-8")]
    #[tokio::test]
    async fn test_plain_text(#[case] content_type: &str) {
        let body = Bytes::from_static(b"hello");
        assert_eq!(
            decode(Some(content_type), &body).await,
            Some(DecodedPayload::Text("hello".to_string()))
        );
    }

    #[rstest]
    #[case("application/json")]
    #[case("application/json; charset=utf-8")]
    #[tokio::test]
    async fn test_json(#[case] content_type: &str) {
        let body = Bytes::from_static(br#"{"a":1}"#);
        assert_eq!(
            decode(Some(content_type), &body).await,
            Some(DecodedPayload::Json(json!({"a": 1})))
        );
    }

    #[tokio::test]
    async fn test_malformed_json_degrades_to_raw() {
        let body = Bytes::from_static(b"{not json");
        assert_eq!(
            decode(Some("application/json"), &body).await,
            Some(DecodedPayload::Raw(b"{not json".to_vec()))
        );
    }

    #[tokio::test]
    async fn test_form_urlencoded_collects_repeated_keys() {
        let body = Bytes::from_static(b"a=1&b=2&a=3");
        assert_eq!(
            decode(Some("application/x-www-form-urlencoded"), &body).await,
            Some(DecodedPayload::Form(vec![
                ("a".to_string(), vec!["1".to_string(), "3".to_string()]),
                ("b".to_string(), vec!["2".to_string()]),
            ]))
        );
    }

    #[tokio::test]
    async fn test_form_urlencoded_percent_decoding() {
        let body = Bytes::from_static(b"name=hello+world&note=a%26b");
        assert_eq!(
            decode(Some("application/x-www-form-urlencoded"), &body).await,
            Some(DecodedPayload::Form(vec![
                ("name".to_string(), vec!["hello world".to_string()]),
                ("note".to_string(), vec!["a&b".to_string()]),
            ]))
        );
    }

    #[tokio::test]
    async fn test_multipart_fields() {
        let body = Bytes::from_static(
            b"--boundary\r\n\
              Content-Disposition: form-data; name=\"field1\"\r\n\r\n\
              value1\r\n\
              --boundary\r\n\
              Content-Disposition: form-data; name=\"file1\"; filename=\"blob.bin\"\r\n\
              Content-Type: application/octet-stream\r\n\r\n\
              \xff\xfe\xfd\r\n\
              --boundary--\r\n",
        );

        let decoded = decode(Some("multipart/form-data; boundary=boundary"), &body)
            .await
            .unwrap();

        let DecodedPayload::Multipart(parts) = decoded else {
            panic!("expected multipart payload");
        };
        assert_eq!(parts.len(), 2);

        assert_eq!(parts[0].name.as_deref(), Some("field1"));
        assert_eq!(parts[0].value, PartValue::Text("value1".to_string()));

        assert_eq!(parts[1].name.as_deref(), Some("file1"));
        assert_eq!(parts[1].file_name.as_deref(), Some("blob.bin"));
        // Binary content passes through as raw bytes, not re-encoded
        assert_eq!(parts[1].value, PartValue::Binary(vec![0xff, 0xfe, 0xfd]));
    }

    #[tokio::test]
    async fn test_multipart_without_boundary_degrades_to_raw() {
        let body = Bytes::from_static(b"--x\r\ncontent\r\n--x--");
        assert_eq!(
            decode(Some("multipart/form-data"), &body).await,
            Some(DecodedPayload::Raw(body.to_vec()))
        );
    }

    #[tokio::test]
    async fn test_json_round_trip() {
        let value = json!({"nested": {"list": [1, 2, 3]}, "ok": true});
        let body = Bytes::from(serde_json::to_vec(&value).unwrap());
        assert_eq!(
            decode(Some("application/json"), &body).await,
            Some(DecodedPayload::Json(value))
        );
    }
}
