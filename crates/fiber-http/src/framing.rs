//! HTTP/1.1 response framing
//!
//! [`ResponseFramer`] is an incremental state machine over the raw bytes of
//! one response. It is fed the whole response buffer after every read and
//! resumes where it stopped, so each byte is scanned a bounded number of
//! times. The buffer is never modified: a [`Response`] only records offsets
//! into it, and the bytes the caller sees are exactly the wire bytes.
//!
//! ```text
//!  Headers ──204/304/HEAD──────────────────────────────┐
//!     │                                                ▼
//!     ├──Content-Length──▶ Length ────────────────▶ complete
//!     ├──chunked─────────▶ ChunkSize ⇄ ChunkData       ▲
//!     │                        └──0──▶ Trailers ───────┤
//!     └──neither─────────▶ UntilClose ──(eof)──────────┘
//! ```

use crate::error::{HttpError, HttpResult};

use std::borrow::Cow;
use std::ops::Range;

const HEADER_END: &[u8] = b"\r\n\r\n";
const CRLF: &[u8] = b"\r\n";

/// How the body of a response is delimited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// No body: 204, 304 or a response to HEAD.
    Empty,
    /// `Content-Length: n`
    Length(usize),
    /// `Transfer-Encoding: chunked`
    Chunked,
    /// Body runs until the peer closes.
    CloseDelimited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Body {
    Contiguous(Range<usize>),
    Chunks(Vec<Range<usize>>),
}

/// A fully framed response: offsets into the response buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    /// Connection may be returned to the idle pool.
    pub persistent: bool,
    /// Offset just past the `\r\n\r\n` ending the headers
    pub header_len: usize,
    pub framing: Framing,
    /// Offset just past the last byte of this response
    pub end: usize,
    body: Body,
}

impl Response {
    /// Status line and header fields, without the terminating blank line.
    pub fn headers<'a>(&self, wire: &'a [u8]) -> &'a [u8] {
        &wire[..self.header_len - HEADER_END.len()]
    }

    /// First value of header `name` (case-insensitive), trimmed.
    pub fn header<'a>(&self, wire: &'a [u8], name: &str) -> Option<&'a [u8]> {
        header_fields(self.headers(wire))
            .find(|(n, _)| n.eq_ignore_ascii_case(name.as_bytes()))
            .map(|(_, v)| v)
    }

    /// The body; chunked bodies are assembled from their chunks.
    pub fn body<'a>(&self, wire: &'a [u8]) -> Cow<'a, [u8]> {
        match &self.body {
            Body::Contiguous(r) => Cow::Borrowed(&wire[r.clone()]),
            Body::Chunks(chunks) if chunks.len() == 1 => Cow::Borrowed(&wire[chunks[0].clone()]),
            Body::Chunks(chunks) => {
                let mut out = Vec::with_capacity(self.body_len());
                for r in chunks {
                    out.extend_from_slice(&wire[r.clone()]);
                }
                Cow::Owned(out)
            }
        }
    }

    pub fn body_len(&self) -> usize {
        match &self.body {
            Body::Contiguous(r) => r.len(),
            Body::Chunks(chunks) => chunks.iter().map(|r| r.len()).sum(),
        }
    }

    /// Offsets of each chunk's data (a single range for non-chunked bodies)
    pub fn body_ranges(&self) -> Vec<Range<usize>> {
        match &self.body {
            Body::Contiguous(r) => vec![r.clone()],
            Body::Chunks(chunks) => chunks.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Headers,
    NoBody,
    Length { len: usize },
    ChunkSize,
    ChunkData { size: usize },
    Trailers,
    UntilClose,
}

/// Values taken from the header block
#[derive(Debug, Clone, Copy, Default)]
struct Head {
    status: u16,
    persistent: bool,
    content_length: Option<usize>,
    chunked: bool,
}

/// Incremental HTTP/1.1 response parser for one response.
#[derive(Debug)]
pub struct ResponseFramer {
    head_request: bool,
    phase: Phase,
    /// Next offset to examine
    cursor: usize,
    status: u16,
    persistent: bool,
    header_len: usize,
    framing: Framing,
    chunks: Vec<Range<usize>>,
    done: Option<Response>,
}

impl ResponseFramer {
    /// `head_request`: the request was `HEAD`, so the response has no body
    /// whatever its headers say.
    pub fn new(head_request: bool) -> Self {
        Self {
            head_request,
            phase: Phase::Headers,
            cursor: 0,
            status: 0,
            persistent: false,
            header_len: 0,
            framing: Framing::Empty,
            chunks: Vec::new(),
            done: None,
        }
    }

    /// Headers have been parsed
    pub fn has_headers(&self) -> bool {
        self.phase != Phase::Headers
    }

    /// Feed the response bytes received so far (the peer is still open).
    ///
    /// Returns `Ok(None)` until a complete response is present.
    pub fn advance(&mut self, wire: &[u8]) -> HttpResult<Option<Response>> {
        if let Some(resp) = &self.done {
            return Ok(Some(resp.clone()));
        }

        loop {
            match self.phase {
                Phase::Headers => {
                    let from = self.cursor.saturating_sub(HEADER_END.len() - 1);
                    let Some(at) = find(&wire[from..], HEADER_END) else {
                        self.cursor = wire.len();
                        return Ok(None);
                    };
                    self.header_len = from + at + HEADER_END.len();
                    self.on_headers(&wire[..from + at])?;
                    self.cursor = self.header_len;
                }
                Phase::NoBody => {
                    let at = self.header_len;
                    return Ok(Some(self.complete(Body::Contiguous(at..at), at)));
                }
                Phase::Length { len } => {
                    let end = self.header_len.checked_add(len).ok_or(HttpError::InvalidContentLength)?;
                    if wire.len() < end {
                        return Ok(None);
                    }
                    return Ok(Some(self.complete(Body::Contiguous(self.header_len..end), end)));
                }
                Phase::ChunkSize => {
                    let Some(at) = find(&wire[self.cursor..], CRLF) else {
                        return Ok(None);
                    };
                    let size = parse_chunk_size(&wire[self.cursor..self.cursor + at])?;
                    self.cursor += at + CRLF.len();
                    self.phase = if size == 0 { Phase::Trailers } else { Phase::ChunkData { size } };
                }
                Phase::ChunkData { size } => {
                    let data_end = self.cursor.checked_add(size).ok_or(HttpError::InvalidChunk)?;
                    if wire.len().saturating_sub(CRLF.len()) < data_end {
                        return Ok(None);
                    }
                    if &wire[data_end..data_end + CRLF.len()] != CRLF {
                        return Err(HttpError::InvalidChunk);
                    }
                    self.chunks.push(self.cursor..data_end);
                    self.cursor = data_end + CRLF.len();
                    self.phase = Phase::ChunkSize;
                }
                Phase::Trailers => {
                    let Some(at) = find(&wire[self.cursor..], CRLF) else {
                        return Ok(None);
                    };
                    let line_end = self.cursor + at + CRLF.len();
                    if at == 0 {
                        let chunks = std::mem::take(&mut self.chunks);
                        return Ok(Some(self.complete(Body::Chunks(chunks), line_end)));
                    }
                    // trailer field, discarded
                    self.cursor = line_end;
                }
                Phase::UntilClose => return Ok(None),
            }
        }
    }

    /// The peer closed: frame whatever arrived, or fail if that is not a
    /// complete response.
    pub fn finish(&mut self, wire: &[u8]) -> HttpResult<Response> {
        if let Some(resp) = self.advance(wire)? {
            return Ok(resp);
        }

        match self.phase {
            Phase::Headers => Err(HttpError::PartialHeaders),
            Phase::NoBody => {
                let at = self.header_len;
                Ok(self.complete(Body::Contiguous(at..at), at))
            }
            Phase::Length { len } => Err(HttpError::TruncatedBody {
                expected: len,
                received: wire.len().saturating_sub(self.header_len),
            }),
            Phase::ChunkSize | Phase::ChunkData { .. } | Phase::Trailers => {
                Err(HttpError::TruncatedChunked)
            }
            Phase::UntilClose => {
                let end = wire.len();
                Ok(self.complete(Body::Contiguous(self.header_len..end), end))
            }
        }
    }

    fn on_headers(&mut self, block: &[u8]) -> HttpResult<()> {
        let head = parse_head(block)?;
        self.status = head.status;
        self.persistent = head.persistent;

        let no_body = self.head_request || head.status == 204 || head.status == 304;
        (self.framing, self.phase) = if no_body {
            (Framing::Empty, Phase::NoBody)
        } else if let Some(len) = head.content_length {
            (Framing::Length(len), Phase::Length { len })
        } else if head.chunked {
            (Framing::Chunked, Phase::ChunkSize)
        } else {
            // The peer will close after the body, so nothing to keep.
            self.persistent = false;
            (Framing::CloseDelimited, Phase::UntilClose)
        };
        Ok(())
    }

    fn complete(&mut self, body: Body, end: usize) -> Response {
        let resp = Response {
            status: self.status,
            persistent: self.persistent,
            header_len: self.header_len,
            framing: self.framing,
            end,
            body,
        };
        self.done = Some(resp.clone());
        resp
    }
}

/// Parse the status line and the header fields the framer cares about.
fn parse_head(block: &[u8]) -> HttpResult<Head> {
    if !block.starts_with(b"HTTP/") {
        return Err(HttpError::MalformedStatusLine);
    }

    let line_end = find(block, CRLF).unwrap_or(block.len());
    let status_line = &block[..line_end];

    let mut head = Head {
        status: parse_status(status_line)?,
        ..Head::default()
    };

    // Absent Connection header: do not keep the connection.
    let mut connection: Option<bool> = None;
    for (name, value) in header_fields(block) {
        if name.eq_ignore_ascii_case(b"connection") {
            if connection.is_none() {
                connection = Some(!has_token(value, b"close"));
            }
        } else if name.eq_ignore_ascii_case(b"content-length") {
            if head.content_length.is_none() {
                head.content_length = Some(parse_decimal(value).ok_or(HttpError::InvalidContentLength)?);
            }
        } else if name.eq_ignore_ascii_case(b"transfer-encoding") {
            head.chunked |= has_token(value, b"chunked");
        }
    }
    head.persistent = connection.unwrap_or(false);
    Ok(head)
}

/// Status code: leading digits of the token after the first space.
fn parse_status(line: &[u8]) -> HttpResult<u16> {
    let sp = line.iter().position(|&b| b == b' ').ok_or(HttpError::MissingStatus)?;
    let rest = &line[sp + 1..];
    let digits = rest.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 || digits > 3 {
        return Err(HttpError::MissingStatus);
    }
    match parse_decimal(&rest[..digits]) {
        Some(code) if code > 0 => Ok(code as u16),
        _ => Err(HttpError::MissingStatus),
    }
}

/// `name: value` pairs of every line after the status line. Lines without
/// a colon are skipped.
fn header_fields(block: &[u8]) -> impl Iterator<Item = (&[u8], &[u8])> {
    block
        .split(|&b| b == b'\n')
        .skip(1)
        .filter_map(|line| {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            let colon = line.iter().position(|&b| b == b':')?;
            Some((trim(&line[..colon]), trim(&line[colon + 1..])))
        })
}

fn has_token(value: &[u8], token: &[u8]) -> bool {
    value.split(|&b| b == b',').any(|t| trim(t).eq_ignore_ascii_case(token))
}

fn parse_chunk_size(line: &[u8]) -> HttpResult<usize> {
    // chunk extensions after ';' are ignored
    let size = line.split(|&b| b == b';').next().map(trim).unwrap_or_default();
    if size.is_empty() || size.len() > 16 {
        return Err(HttpError::InvalidChunk);
    }
    let mut n: usize = 0;
    for &b in size {
        let d = (b as char).to_digit(16).ok_or(HttpError::InvalidChunk)? as usize;
        n = n.checked_mul(16).and_then(|n| n.checked_add(d)).ok_or(HttpError::InvalidChunk)?;
    }
    Ok(n)
}

fn parse_decimal(s: &[u8]) -> Option<usize> {
    if s.is_empty() || !s.iter().all(u8::is_ascii_digit) {
        return None;
    }
    s.iter().try_fold(0usize, |n, &b| n.checked_mul(10)?.checked_add((b - b'0') as usize))
}

fn trim(s: &[u8]) -> &[u8] {
    let is_ws = |b: &u8| *b == b' ' || *b == b'\t';
    let start = s.iter().position(|b| !is_ws(b)).unwrap_or(s.len());
    let end = s.iter().rposition(|b| !is_ws(b)).map_or(start, |e| e + 1);
    &s[start..end]
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
