//! # Part Filter
//!
//! Cuts the requested parts out of the decoded block stream. Blocks are
//! usually larger than the parts they cover, so the filter skips the
//! padding and forwards only the bytes that were asked for, in order.

use std::io;

use async_stream::try_stream;
use bytes::{Buf, Bytes};
use futures::{Stream, StreamExt};
use tracing::trace;

use crate::DownloadError;
use crate::heuristics::Part;
use crate::transport::BoxByteStream;

/// Forward the `length` bytes found at each position of `upstream`.
///
/// `positions[i]` is the offset of `parts[i]` in the upstream stream and
/// must not go backwards. Whatever follows the last part is read and
/// discarded so the connection ends cleanly.
pub fn filter_parts(
    mut upstream: BoxByteStream,
    parts: Vec<Part>,
    positions: Vec<u64>,
) -> impl Stream<Item = Result<Bytes, DownloadError>> + Send + 'static {
    try_stream! {
        if parts.len() != positions.len() {
            Err::<(), _>(DownloadError::InvalidParts(format!(
                "{} parts but {} positions",
                parts.len(),
                positions.len()
            )))?;
        }

        // Offset of the first byte of `pending` in the upstream stream
        let mut cursor = 0u64;
        let mut pending = Bytes::new();

        for (part, position) in parts.into_iter().zip(positions) {
            if position < cursor {
                Err::<(), _>(DownloadError::ProtocolMismatch {
                    part,
                    detail: format!("position {position} is behind the stream at {cursor}"),
                })?;
            }

            let mut skip = position - cursor;
            let mut remaining = part.length;
            trace!(%part, position, skip, "Filtering part");

            while skip > 0 || remaining > 0 {
                if pending.is_empty() {
                    pending = upstream.next().await.ok_or_else(|| truncated(&part))??;
                    continue;
                }

                let available = pending.len() as u64;
                if skip > 0 {
                    let n = skip.min(available);
                    pending.advance(n as usize);
                    skip -= n;
                    cursor += n;
                } else {
                    let n = remaining.min(available);
                    let chunk = pending.split_to(n as usize);
                    remaining -= n;
                    cursor += n;
                    yield chunk;
                }
            }
        }

        while let Some(chunk) = upstream.next().await {
            chunk?;
        }
    }
}

fn truncated(part: &Part) -> DownloadError {
    DownloadError::IoError(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("stream ended before part {part} was complete"),
    ))
}

/// Boxed [`filter_parts`]
pub fn filtered(upstream: BoxByteStream, parts: Vec<Part>, positions: Vec<u64>) -> BoxByteStream {
    filter_parts(upstream, parts, positions).boxed()
}
