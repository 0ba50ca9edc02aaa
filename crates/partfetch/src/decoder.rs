//! # Response Decoder
//!
//! Turns the response to a multi-range request into one ordered stream of
//! block bytes. Servers answer such requests in one of three ways:
//!
//! - ignore the ranges and send the whole resource (`200 OK`)
//! - honour only one range per request (`206` with a plain body)
//! - send every range in a `multipart/byteranges` body
//!
//! The shape is detected once from the response headers and each shape
//! produces its chunks through the same stream interface.

use std::sync::{Arc, LazyLock};

use async_stream::try_stream;
use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, HeaderMap};
use tracing::{debug, info};
use url::Url;

use crate::DownloadError;
use crate::heuristics::Block;
use crate::request::RangeRequest;
use crate::transport::{BoxByteStream, RangeResponse, RangeTransport};

const MAX_SEGMENT_HEADER: usize = 16 * 1024;
const CRLF: &[u8] = b"\r\n";
const END_OF_HEADER: &[u8] = b"\r\n\r\n";

/// Wire shape of a response to a range request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseShape {
    /// The server ignored the ranges; the body is the whole resource
    NoRanges,
    /// One range per request; blocks after the first are fetched one by one
    SingleRangePerRequest,
    /// All ranges in one boundary-delimited body
    MultiRangeBody { boundary: String },
}

impl ResponseShape {
    /// Select the shape from the status and content type of a ranged response
    pub fn detect(response: &RangeResponse) -> Result<Self, DownloadError> {
        match response.status {
            StatusCode::OK => Ok(ResponseShape::NoRanges),
            StatusCode::PARTIAL_CONTENT => {
                let boundary = response.content_type().and_then(multipart_boundary);
                Ok(match boundary {
                    Some(boundary) => ResponseShape::MultiRangeBody { boundary },
                    None => ResponseShape::SingleRangePerRequest,
                })
            }
            status => Err(DownloadError::StatusCode {
                url: response.url.clone(),
                status,
            }),
        }
    }

    /// Stream the bytes of `blocks`, in order, out of `response`.
    ///
    /// For [`ResponseShape::NoRanges`] the body is passed through as is.
    pub fn decode(
        self,
        response: RangeResponse,
        blocks: Vec<Block>,
        context: DecodeContext,
    ) -> BoxByteStream {
        match self {
            ResponseShape::NoRanges => response.body,
            ResponseShape::SingleRangePerRequest => {
                info!(url = %context.url, blocks = blocks.len(), "Server does not support multi-range responses");
                single_range_stream(response, blocks, context).boxed()
            }
            ResponseShape::MultiRangeBody { boundary } => {
                debug!(url = %context.url, boundary = %boundary, "Multi-range response");
                multipart_stream(response, blocks, boundary).boxed()
            }
        }
    }
}

/// What the decoder needs to issue follow-up requests
#[derive(Clone)]
pub struct DecodeContext {
    pub transport: Arc<dyn RangeTransport>,
    pub url: Url,
    /// Request headers without the `Range` header
    pub headers: HeaderMap,
}

/// Extract the boundary token of a `multipart/byteranges` content type
pub fn multipart_boundary(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let media_type = params.next()?.trim();
    if !media_type.eq_ignore_ascii_case("multipart/byteranges") {
        return None;
    }

    params.find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// A parsed `Content-Range: bytes start-end/total` value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

// Some servers append a stray 'd' to the numbers
static CONTENT_RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^bytes (\d+)d?-(\d+)d?/(\d+)d?$").unwrap());

impl ContentRange {
    pub fn parse(value: &str) -> Option<Self> {
        let caps = CONTENT_RANGE_RE.captures(value.trim())?;
        Some(Self {
            start: caps[1].parse().ok()?,
            end: caps[2].parse().ok()?,
            total: caps[3].parse().ok()?,
        })
    }

    /// Number of bytes in the segment
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Check the range the server sent against the block that was asked for.
    ///
    /// `end + 1 == total` is accepted for a shorter segment: the block was
    /// rounded past the end of the resource and the server clipped it.
    pub fn validate(&self, block: &Block) -> bool {
        self.end >= self.start
            && self.start < self.total
            && self.end < self.total
            && self.start == block.offset
            && (self.end == block.last_byte() || self.end + 1 == self.total)
    }
}

fn expected(block: &Block) -> String {
    format!("bytes {}-{}/*", block.offset, block.last_byte())
}

/// Parse and validate a `Content-Range` value for `block`
pub fn check_content_range(
    url: &str,
    value: Option<&str>,
    block: &Block,
) -> Result<ContentRange, DownloadError> {
    let Some(value) = value else {
        return Err(DownloadError::malformed(url, "<missing Content-Range>", expected(block)));
    };

    match ContentRange::parse(value) {
        Some(range) if range.validate(block) => Ok(range),
        _ => Err(DownloadError::malformed(url, value, expected(block))),
    }
}

fn single_range_stream(
    first: RangeResponse,
    blocks: Vec<Block>,
    context: DecodeContext,
) -> impl Stream<Item = Result<Bytes, DownloadError>> + Send + 'static {
    try_stream! {
        let mut pending = Some(first);

        for block in blocks {
            let response = match pending.take() {
                Some(response) => response,
                None => {
                    let request = RangeRequest::blocks(
                        context.url.clone(),
                        context.headers.clone(),
                        std::slice::from_ref(&block),
                    )?;
                    expect_partial(request.send(context.transport.as_ref()).await?, &block)?
                }
            };

            check_content_range(&response.url, response.header(CONTENT_RANGE), &block)?;

            let mut body = response.body;
            while let Some(chunk) = body.next().await {
                yield chunk?;
            }
        }
    }
}

fn expect_partial(response: RangeResponse, block: &Block) -> Result<RangeResponse, DownloadError> {
    if response.status != StatusCode::PARTIAL_CONTENT {
        return Err(DownloadError::malformed(
            response.url.clone(),
            format!("status {}", response.status),
            expected(block),
        ));
    }
    Ok(response)
}

/// Buffered access to a body stream for the multipart parser
struct BodyReader {
    body: BoxByteStream,
    buffer: BytesMut,
}

impl BodyReader {
    fn new(body: BoxByteStream) -> Self {
        Self {
            body,
            buffer: BytesMut::new(),
        }
    }

    /// Buffer at least `n` bytes; false if the body ended first
    async fn fill(&mut self, n: usize) -> Result<bool, DownloadError> {
        while self.buffer.len() < n {
            match self.body.next().await {
                Some(chunk) => self.buffer.extend_from_slice(&chunk?),
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Consume `prefix` if the buffered data starts with it
    async fn consume(&mut self, prefix: &[u8]) -> Result<bool, DownloadError> {
        self.fill(prefix.len()).await?;
        if self.buffer.starts_with(prefix) {
            self.buffer.advance(prefix.len());
            return Ok(true);
        }
        Ok(false)
    }

    /// Consume everything up to and including `delimiter`, at most `limit` bytes
    async fn read_until(
        &mut self,
        delimiter: &[u8],
        limit: usize,
    ) -> Result<Option<Bytes>, DownloadError> {
        let mut searched = 0;
        loop {
            // Never look past what `limit` allows, however much is buffered
            let window = self.buffer.len().min(limit + delimiter.len());
            if let Some(pos) = self.buffer[searched..window]
                .windows(delimiter.len())
                .position(|w| w == delimiter)
            {
                let end = searched + pos + delimiter.len();
                return Ok(Some(self.buffer.split_to(end).freeze()));
            }
            if self.buffer.len() > limit {
                return Ok(None);
            }
            searched = self.buffer.len().saturating_sub(delimiter.len() - 1);
            if !self.fill(self.buffer.len() + 1).await? {
                return Ok(None);
            }
        }
    }

    /// Next piece of at most `max` bytes, buffered data first
    async fn take(&mut self, max: usize) -> Result<Option<Bytes>, DownloadError> {
        if self.buffer.is_empty() {
            let Some(chunk) = self.body.next().await else {
                return Ok(None);
            };
            let mut chunk = chunk?;
            if chunk.len() > max {
                self.buffer.extend_from_slice(&chunk.split_off(max));
            }
            return Ok(Some(chunk));
        }
        let n = self.buffer.len().min(max);
        Ok(Some(self.buffer.split_to(n).freeze()))
    }

    async fn drain(&mut self) -> Result<(), DownloadError> {
        self.buffer.clear();
        while let Some(chunk) = self.body.next().await {
            chunk?;
        }
        Ok(())
    }
}

fn segment_content_range(header: &str) -> Option<&str> {
    header.split("\r\n").find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case(CONTENT_RANGE.as_str())
            .then(|| value.trim())
    })
}

fn multipart_stream(
    response: RangeResponse,
    blocks: Vec<Block>,
    boundary: String,
) -> impl Stream<Item = Result<Bytes, DownloadError>> + Send + 'static {
    let url = response.url;
    let marker = format!("--{boundary}\r\n").into_bytes();
    let end_of_input = format!("--{boundary}--").into_bytes();

    try_stream! {
        let mut reader = BodyReader::new(response.body);
        let malformed = |header: &str, expected: String| {
            DownloadError::malformed(url.clone(), header, expected)
        };

        // Some servers start the body with an empty line
        reader.consume(CRLF).await?;

        let mut segment = 0;
        while !reader.consume(&end_of_input).await? {
            let block = match blocks.get(segment) {
                Some(block) => block,
                None => {
                    let header = if reader.consume(&marker).await? {
                        "more segments than requested"
                    } else {
                        "missing closing boundary"
                    };
                    Err::<&Block, _>(malformed(header, format!("--{boundary}--")))?
                }
            };

            reader
                .consume(&marker)
                .await?
                .then_some(())
                .ok_or_else(|| malformed("missing multipart boundary", format!("--{boundary}")))?;

            let header = reader
                .read_until(END_OF_HEADER, MAX_SEGMENT_HEADER)
                .await?
                .ok_or_else(|| malformed("unterminated segment header", expected(block)))?;
            let header = String::from_utf8_lossy(&header).into_owned();
            debug!(segment, header = %header.trim(), "Multipart segment");

            let range = check_content_range(&url, segment_content_range(&header), block)?;

            let mut remaining = range.len();
            while remaining > 0 {
                let max = usize::try_from(remaining).unwrap_or(usize::MAX);
                let chunk = reader
                    .take(max)
                    .await?
                    .ok_or_else(|| malformed("truncated segment", expected(block)))?;
                remaining -= chunk.len() as u64;
                yield chunk;
            }

            reader
                .consume(CRLF)
                .await?
                .then_some(())
                .ok_or_else(|| malformed("missing CRLF after segment data", expected(block)))?;
            segment += 1;
        }

        if segment != blocks.len() {
            Err::<(), _>(malformed(
                &format!("{segment} segments"),
                format!("{} segments", blocks.len()),
            ))?;
        }

        // Epilogue, if any
        reader.drain().await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristics::Part;
    use crate::transport::testing::{BOUNDARY, MockServer, ServerMode, synthetic};

    fn context(server: Arc<MockServer>) -> DecodeContext {
        DecodeContext {
            transport: server,
            url: Url::parse("http://example.com/resource.bin").unwrap(),
            headers: HeaderMap::new(),
        }
    }

    async fn fetch(
        server: Arc<MockServer>,
        blocks: Vec<Block>,
    ) -> Result<(ResponseShape, Vec<u8>), DownloadError> {
        let ctx = context(server.clone());
        let request = RangeRequest::blocks(ctx.url.clone(), HeaderMap::new(), &blocks)?;
        let response = request.send(server.as_ref()).await?;
        let shape = ResponseShape::detect(&response)?;
        let mut stream = shape.clone().decode(response, blocks, ctx);
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok((shape, out))
    }

    fn segment(range: &str, data: &[u8]) -> Vec<u8> {
        let mut out = format!(
            "--{BOUNDARY}\r\nContent-Type: application/octet-stream\r\nContent-Range: {range}\r\n\r\n"
        )
        .into_bytes();
        out.extend_from_slice(data);
        out.extend_from_slice(b"\r\n");
        out
    }

    fn closing() -> Vec<u8> {
        format!("--{BOUNDARY}--\r\n").into_bytes()
    }

    /// Decode a hand-written multipart body delivered in `chunk` sized pieces
    async fn decode_raw(
        body: Vec<u8>,
        chunk: usize,
        blocks: Vec<Block>,
    ) -> Result<Vec<u8>, DownloadError> {
        let chunks: Vec<Result<Bytes, DownloadError>> = body
            .chunks(chunk)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let response = RangeResponse {
            url: "http://example.com/resource.bin".to_string(),
            status: StatusCode::PARTIAL_CONTENT,
            headers: HeaderMap::new(),
            body: futures::stream::iter(chunks).boxed(),
        };

        let mut stream = multipart_stream(response, blocks, BOUNDARY.to_string()).boxed();
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    fn malformed_header(err: DownloadError) -> String {
        match err {
            DownloadError::MalformedResponse { header, .. } => header,
            other => panic!("unexpected error: {other}"),
        }
    }

    fn block_bytes(content: &Bytes, blocks: &[Block]) -> Vec<u8> {
        blocks
            .iter()
            .flat_map(|b| content[b.offset as usize..b.end() as usize].to_vec())
            .collect()
    }

    #[test]
    fn test_parse_content_range() {
        assert_eq!(
            ContentRange::parse("bytes 0-49/1000"),
            Some(ContentRange { start: 0, end: 49, total: 1000 })
        );
        assert_eq!(
            ContentRange::parse(" bytes 5d-7d/8d "),
            Some(ContentRange { start: 5, end: 7, total: 8 })
        );
        assert_eq!(ContentRange::parse("bytes */1000"), None);
        assert_eq!(ContentRange::parse("items 0-1/2"), None);
    }

    #[test]
    fn test_validate_segment() {
        let block = Part::new(5, 3);
        assert!(ContentRange { start: 5, end: 7, total: 8 }.validate(&block));
        assert!(ContentRange { start: 5, end: 7, total: 100 }.validate(&block));
        // Clipped at end of resource
        let rounded = Part::new(64, 64);
        assert!(ContentRange { start: 64, end: 99, total: 100 }.validate(&rounded));

        assert!(!ContentRange { start: 6, end: 7, total: 8 }.validate(&block));
        assert!(!ContentRange { start: 5, end: 6, total: 100 }.validate(&block));
        assert!(!ContentRange { start: 5, end: 7, total: 7 }.validate(&block));
        assert!(!ContentRange { start: 7, end: 5, total: 100 }.validate(&Part::new(7, 1)));
    }

    #[test]
    fn test_multipart_boundary() {
        assert_eq!(
            multipart_boundary("multipart/byteranges; boundary=THIS_STRING"),
            Some("THIS_STRING".to_string())
        );
        assert_eq!(
            multipart_boundary("Multipart/ByteRanges; charset=x; Boundary=\"quoted\""),
            Some("quoted".to_string())
        );
        assert_eq!(multipart_boundary("application/octet-stream"), None);
        assert_eq!(multipart_boundary("multipart/byteranges"), None);
    }

    #[tokio::test]
    async fn test_multipart_body() {
        let content = synthetic(1000);
        let server = Arc::new(MockServer::new(content.clone(), ServerMode::Multipart));
        let blocks = vec![Part::new(0, 50), Part::new(100, 50), Part::new(990, 10)];

        let (shape, out) = fetch(server, blocks.clone()).await.unwrap();
        assert_eq!(
            shape,
            ResponseShape::MultiRangeBody { boundary: BOUNDARY.to_string() }
        );
        assert_eq!(out, block_bytes(&content, &blocks));
    }

    #[tokio::test]
    async fn test_multipart_without_leading_crlf_and_large_chunks() {
        let content = synthetic(300);
        let mut server = MockServer::new(content.clone(), ServerMode::Multipart);
        server.leading_crlf = false;
        server.chunk_size = 4096;
        let blocks = vec![Part::new(10, 20), Part::new(200, 5)];

        let (_, out) = fetch(Arc::new(server), blocks.clone()).await.unwrap();
        assert_eq!(out, block_bytes(&content, &blocks));
    }

    #[tokio::test]
    async fn test_multipart_rejects_wrong_segment_range() {
        let mut server = MockServer::new(synthetic(300), ServerMode::Multipart);
        server.content_range_override = Some("bytes 1-20/300".to_string());
        let blocks = vec![Part::new(10, 20), Part::new(200, 5)];

        let err = fetch(Arc::new(server), blocks).await.unwrap_err();
        match err {
            DownloadError::MalformedResponse { header, .. } => assert_eq!(header, "bytes 1-20/300"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_multipart_hand_written_body() {
        let mut body = segment("bytes 0-4/100", b"hello");
        body.extend(segment("bytes 10-14/100", b"world"));
        body.extend(closing());

        let out = decode_raw(body, 3, vec![Part::new(0, 5), Part::new(10, 5)])
            .await
            .unwrap();
        assert_eq!(out, b"helloworld");
    }

    #[tokio::test]
    async fn test_multipart_fewer_segments_than_blocks() {
        let mut body = segment("bytes 0-4/100", b"hello");
        body.extend(closing());

        let err = decode_raw(body, 64, vec![Part::new(0, 5), Part::new(10, 5)])
            .await
            .unwrap_err();
        match err {
            DownloadError::MalformedResponse { header, expected, .. } => {
                assert_eq!(header, "1 segments");
                assert_eq!(expected, "2 segments");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_multipart_missing_closing_boundary() {
        let body = segment("bytes 0-4/100", b"hello");

        let err = decode_raw(body, 64, vec![Part::new(0, 5)]).await.unwrap_err();
        assert_eq!(malformed_header(err), "missing closing boundary");
    }

    #[tokio::test]
    async fn test_multipart_more_segments_than_blocks() {
        let mut body = segment("bytes 0-4/100", b"hello");
        body.extend(segment("bytes 10-14/100", b"world"));
        body.extend(closing());

        let err = decode_raw(body, 64, vec![Part::new(0, 5)]).await.unwrap_err();
        assert_eq!(malformed_header(err), "more segments than requested");
    }

    #[tokio::test]
    async fn test_multipart_truncated_segment() {
        let mut body = segment("bytes 0-9/100", b"0123456789");
        // Cut inside the segment data
        body.truncate(body.len() - 8);

        let err = decode_raw(body, 5, vec![Part::new(0, 10)]).await.unwrap_err();
        assert_eq!(malformed_header(err), "truncated segment");
    }

    #[tokio::test]
    async fn test_multipart_oversized_header_in_one_chunk() {
        let padding = "a".repeat(MAX_SEGMENT_HEADER + 100);
        let mut body = format!(
            "--{BOUNDARY}\r\nX-Padding: {padding}\r\nContent-Range: bytes 0-4/100\r\n\r\nhello\r\n"
        )
        .into_bytes();
        body.extend(closing());

        // The whole body arrives at once, the delimiter is buffered but beyond the limit
        let len = body.len();
        let err = decode_raw(body, len, vec![Part::new(0, 5)]).await.unwrap_err();
        assert_eq!(malformed_header(err), "unterminated segment header");
    }

    #[tokio::test]
    async fn test_single_range_per_request() {
        let content = synthetic(500);
        let server = Arc::new(MockServer::new(content.clone(), ServerMode::SingleRange));
        let blocks = vec![Part::new(0, 10), Part::new(100, 20), Part::new(400, 100)];

        let (shape, out) = fetch(server.clone(), blocks.clone()).await.unwrap();
        assert_eq!(shape, ResponseShape::SingleRangePerRequest);
        assert_eq!(out, block_bytes(&content, &blocks));
        assert_eq!(
            server.ranges_seen(),
            vec![
                Some("bytes=0-9,100-119,400-499".to_string()),
                Some("bytes=100-119".to_string()),
                Some("bytes=400-499".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_single_range_missing_content_range() {
        let mut server = MockServer::new(synthetic(100), ServerMode::SingleRange);
        server.content_range_override = Some("garbage".to_string());

        let err = fetch(Arc::new(server), vec![Part::new(0, 10)]).await.unwrap_err();
        assert!(matches!(err, DownloadError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn test_overshoot_at_end_of_resource_is_accepted() {
        // Block rounded past the end; the server clips it to the last byte
        let content = synthetic(100);
        let server = Arc::new(MockServer::new(content.clone(), ServerMode::SingleRange));

        let (_, out) = fetch(server, vec![Part::new(64, 64)]).await.unwrap();
        assert_eq!(out, content[64..].to_vec());
    }

    #[tokio::test]
    async fn test_ignored_ranges_pass_through() {
        let content = synthetic(120);
        let server = Arc::new(MockServer::new(content.clone(), ServerMode::IgnoreRanges));

        let (shape, out) = fetch(server, vec![Part::new(10, 5), Part::new(50, 5)])
            .await
            .unwrap();
        assert_eq!(shape, ResponseShape::NoRanges);
        assert_eq!(out, content.to_vec());
    }
}
