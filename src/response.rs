//! The response sink shared by every handler in a chain.
//!
//! A [`ResponseWriter`] is created fresh for each request, passed by `&mut`
//! down the chain, and turned into a hyper response once the chain returns.
//! The chain itself never reads or writes it.

use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;
use tracing::warn;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`ResponseWriter::content_type`].
pub enum ContentType {
    Csv,          // text/csv
    EventStream,  // text/event-stream  (SSE)
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml
}

impl ContentType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Csv         => "text/csv",
            Self::EventStream => "text/event-stream",
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml",
        }
    }
}

// ── ResponseWriter ────────────────────────────────────────────────────────────

/// Mutable output target for one request.
///
/// The status starts at `200 OK` and may be changed with
/// [`write_header`](Self::write_header) until the first body byte is written.
/// After that the status is committed and further `write_header` calls are
/// ignored.
///
/// ```rust
/// use weave::ResponseWriter;
/// use http::StatusCode;
///
/// let mut rw = ResponseWriter::new();
/// rw.write_header(StatusCode::CREATED);
/// rw.write_str("made it");
///
/// assert_eq!(rw.status(), StatusCode::CREATED);
/// assert_eq!(rw.body(), b"made it");
/// ```
#[derive(Debug, Default)]
pub struct ResponseWriter {
    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,
    written: bool,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the response status. Ignored once the body has been written.
    pub fn write_header(&mut self, status: StatusCode) {
        if self.written {
            warn!(current = %self.status, ignored = %status, "superfluous write_header call");
            return;
        }
        self.status = status;
    }

    /// Appends `data` to the body and commits the status.
    pub fn write(&mut self, data: &[u8]) {
        self.written = true;
        self.body.extend_from_slice(data);
    }

    pub fn write_str(&mut self, data: &str) {
        self.write(data.as_bytes());
    }

    /// Sets the `content-type` header.
    pub fn content_type(&mut self, content_type: ContentType) {
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
    }

    pub fn status(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Whether any body bytes have been written.
    pub fn written(&self) -> bool { self.written }

    /// Number of body bytes written so far.
    pub fn size(&self) -> usize { self.body.len() }

    pub(crate) fn into_response(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body.freeze()));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_ok_and_empty() {
        let rw = ResponseWriter::new();
        assert_eq!(rw.status(), StatusCode::OK);
        assert!(!rw.written());
        assert_eq!(rw.size(), 0);
        assert!(rw.headers().is_empty());
    }

    #[test]
    fn status_is_committed_by_first_write() {
        let mut rw = ResponseWriter::new();
        rw.write_header(StatusCode::BAD_REQUEST);
        rw.write_str("nope");
        rw.write_header(StatusCode::OK);

        assert_eq!(rw.status(), StatusCode::BAD_REQUEST);
        assert!(rw.written());
        assert_eq!(rw.size(), 4);
    }

    #[test]
    fn converts_into_hyper_response() {
        let mut rw = ResponseWriter::new();
        rw.write_header(StatusCode::ACCEPTED);
        rw.content_type(ContentType::Json);
        rw.write(br#"{"ok":true}"#);

        let res = rw.into_response();
        assert_eq!(res.status(), StatusCode::ACCEPTED);
        assert_eq!(res.headers()[CONTENT_TYPE], "application/json");
    }
}
