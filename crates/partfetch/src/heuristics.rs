//! # Range Heuristics
//!
//! Turns a caller's list of byte ranges ("parts") into the list of ranges that
//! is actually requested from the server ("blocks"), plus a position map that
//! locates every part inside the concatenation of all blocks.
//!
//! Coalescing trades wasted bytes for fewer ranges in the request:
//!
//! - [`RangeMethod::Blocked`] rounds parts out to a fixed block size and merges
//!   blocks that touch.
//! - [`RangeMethod::Cluster`] merges the closest neighbours until a target
//!   number of clusters is reached.
//! - [`RangeMethod::Auto`] tries decreasing block sizes and keeps the finest.
//! - [`RangeMethod::None`] requests the parts as they are.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::DownloadError;

/// A contiguous byte range of the remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Part {
    pub offset: u64,
    pub length: u64,
}

impl Part {
    pub const fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// Exclusive end offset
    pub const fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Inclusive last byte, as used in `Range` and `Content-Range` headers
    pub const fn last_byte(&self) -> u64 {
        self.offset + self.length - 1
    }
}

impl From<(u64, u64)> for Part {
    fn from((offset, length): (u64, u64)) -> Self {
        Self::new(offset, length)
    }
}

impl fmt::Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.offset, self.length)
    }
}

/// A range actually requested over the network. Always covers one or more parts.
pub type Block = Part;

/// Blocks to request and where each original part lands in their concatenation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteRanges {
    pub blocks: Vec<Block>,
    pub positions: Vec<u64>,
}

impl ByteRanges {
    /// Total number of bytes that will be transferred
    pub fn transfer_size(&self) -> u64 {
        self.blocks.iter().map(|b| b.length).sum()
    }
}

/// Strategy used to coalesce parts into blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RangeMethodRepr", into = "String")]
pub enum RangeMethod {
    /// Request every part as is
    None,
    /// Finest fixed-size grouping between the largest and smallest part length
    #[default]
    Auto,
    /// Hierarchical clustering down to a minimum number of clusters
    Cluster(usize),
    /// Fixed block grouping
    Blocked(u64),
}

const DEFAULT_MIN_CLUSTERS: usize = 5;
const AUTO_ROUNDING: u64 = 1024;

impl RangeMethod {
    /// Coalesce `parts` into blocks and compute the position of every part.
    ///
    /// Parts must be sorted by offset and must not overlap.
    pub fn coalesce(&self, parts: &[Part]) -> Result<(Vec<Block>, Vec<u64>), DownloadError> {
        let blocks = self.blocks(parts)?;
        let positions = positions(parts, &blocks)?;
        Ok((blocks, positions))
    }

    fn blocks(&self, parts: &[Part]) -> Result<Vec<Block>, DownloadError> {
        match *self {
            RangeMethod::None => compress_parts(parts),
            RangeMethod::Auto => automatic(parts),
            RangeMethod::Cluster(min_clusters) => hierarchical_clustering(parts, min_clusters),
            RangeMethod::Blocked(block_size) => block_grouping(parts, block_size),
        }
    }
}

impl From<u64> for RangeMethod {
    fn from(block_size: u64) -> Self {
        RangeMethod::Blocked(block_size)
    }
}

impl fmt::Display for RangeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeMethod::None => write!(f, "none"),
            RangeMethod::Auto => write!(f, "auto"),
            RangeMethod::Cluster(n) => write!(f, "cluster({n})"),
            RangeMethod::Blocked(size) => write!(f, "blocked({size})"),
        }
    }
}

static METHOD_WITH_ARGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\w+)\s*\((.*)\)\s*$").unwrap());

impl FromStr for RangeMethod {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DownloadError::InvalidRangeMethod(s.to_string());

        if let Ok(block_size) = s.trim().parse::<u64>() {
            if block_size == 0 {
                return Err(invalid());
            }
            return Ok(RangeMethod::Blocked(block_size));
        }

        let (name, args) = match METHOD_WITH_ARGS.captures(s) {
            Some(caps) => {
                let args = caps[2]
                    .split(',')
                    .map(|a| a.trim().parse::<u64>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| invalid())?;
                (caps[1].to_lowercase(), args)
            }
            None => (s.trim().to_lowercase(), Vec::new()),
        };

        match (name.as_str(), args.as_slice()) {
            ("none", []) => Ok(RangeMethod::None),
            ("auto", []) => Ok(RangeMethod::Auto),
            ("cluster", []) => Ok(RangeMethod::Cluster(DEFAULT_MIN_CLUSTERS)),
            ("cluster", [n]) => Ok(RangeMethod::Cluster(*n as usize)),
            ("blocked", [size]) if *size > 0 => Ok(RangeMethod::Blocked(*size)),
            _ => Err(invalid()),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RangeMethodRepr {
    BlockSize(u64),
    Name(String),
}

impl TryFrom<RangeMethodRepr> for RangeMethod {
    type Error = DownloadError;

    fn try_from(repr: RangeMethodRepr) -> Result<Self, Self::Error> {
        match repr {
            RangeMethodRepr::BlockSize(0) => Err(DownloadError::InvalidRangeMethod("0".into())),
            RangeMethodRepr::BlockSize(size) => Ok(RangeMethod::Blocked(size)),
            RangeMethodRepr::Name(name) => name.parse(),
        }
    }
}

impl From<RangeMethod> for String {
    fn from(method: RangeMethod) -> Self {
        method.to_string()
    }
}

fn round_down(a: u64, b: u64) -> u64 {
    (a / b) * b
}

fn round_up(a: u64, b: u64) -> Option<u64> {
    Some(a.checked_add(b - 1)? / b * b)
}

/// Validate that parts are in order, non-empty and non-overlapping, and merge
/// adjacent ones. Running it on its own output is a no-op.
pub fn compress_parts(parts: &[Part]) -> Result<Vec<Part>, DownloadError> {
    let mut result: Vec<Part> = Vec::with_capacity(parts.len());
    let mut last_end: Option<u64> = None;

    for part in parts {
        if part.length == 0 {
            return Err(DownloadError::InvalidParts(format!(
                "part at offset {} has zero length",
                part.offset
            )));
        }
        if part.offset.checked_add(part.length).is_none() {
            return Err(DownloadError::InvalidParts(format!("part {part} overflows")));
        }

        match (last_end, result.last_mut()) {
            (Some(last), _) if part.offset < last => {
                return Err(DownloadError::InvalidParts(format!(
                    "offsets and lengths must be in order, and not overlapping: offset={}, end of previous part={last}",
                    part.offset
                )));
            }
            (Some(last), Some(prev)) if part.offset == last => prev.length += part.length,
            _ => result.push(*part),
        }

        last_end = Some(part.end());
    }

    Ok(result)
}

fn block_grouping(parts: &[Part], block_size: u64) -> Result<Vec<Block>, DownloadError> {
    if block_size == 0 {
        return Err(DownloadError::InvalidRangeMethod("blocked(0)".to_string()));
    }

    let mut blocks: Vec<Block> = Vec::new();
    let mut last_end = 0;

    for (i, part) in parts.iter().enumerate() {
        if i > 0 && part.offset < last_end {
            return Err(DownloadError::InvalidParts(format!(
                "part {part} starts before the end of the previous part ({last_end})"
            )));
        }

        let start = round_down(part.offset, block_size);
        let end = round_up(part.end(), block_size)
            .ok_or_else(|| DownloadError::InvalidParts(format!("part {part} overflows")))?;
        let mut block = Block::new(start, end - start);

        // A grown block may now reach back over several earlier blocks
        while let Some(prev) = blocks.last() {
            if block.offset > prev.end() {
                break;
            }
            let start = prev.offset.min(block.offset);
            let end = prev.end().max(block.end());
            block = Block::new(start, end - start);
            blocks.pop();
        }

        blocks.push(block);
        last_end = part.end();
    }

    Ok(blocks)
}

fn hierarchical_clustering(
    parts: &[Part],
    min_clusters: usize,
) -> Result<Vec<Block>, DownloadError> {
    let mut clusters = compress_parts(parts)?;

    while clusters.len() > min_clusters {
        let Some(min_gap) = clusters.windows(2).map(|w| w[1].offset - w[0].end()).min() else {
            break;
        };

        // Merge every pair separated by the minimum gap in a single pass
        let mut merged: Vec<Block> = Vec::with_capacity(clusters.len());
        for cluster in clusters {
            match merged.last_mut() {
                Some(last) if cluster.offset - last.end() <= min_gap => {
                    last.length = cluster.end() - last.offset;
                }
                _ => merged.push(cluster),
            }
        }
        clusters = merged;
    }

    Ok(clusters)
}

// Every iteration but the last is discarded; the finest grouping wins.
fn automatic(parts: &[Part]) -> Result<Vec<Block>, DownloadError> {
    let (Some(smallest), Some(largest)) = (
        parts.iter().map(|p| p.length).min(),
        parts.iter().map(|p| p.length).max(),
    ) else {
        return Ok(Vec::new());
    };

    let mut transfer_size = round_up(largest, AUTO_ROUNDING)
        .ok_or_else(|| DownloadError::InvalidParts(format!("part length {largest} overflows")))?;

    let mut blocks = block_grouping(parts, transfer_size)?;
    transfer_size /= 2;

    while transfer_size >= smallest && transfer_size > 0 {
        blocks = block_grouping(parts, transfer_size)?;
        transfer_size /= 2;
    }

    Ok(blocks)
}

/// Locate every part inside the concatenation of `blocks`.
///
/// Both lists must be sorted by offset. A part that is not contained in
/// exactly one block is a [`DownloadError::ProtocolMismatch`].
pub fn positions(parts: &[Part], blocks: &[Block]) -> Result<Vec<u64>, DownloadError> {
    let mut positions = Vec::with_capacity(parts.len());
    let mut i = 0;
    let mut preceding = 0;

    for part in parts {
        while i < blocks.len() && part.offset >= blocks[i].end() {
            preceding += blocks[i].length;
            i += 1;
        }

        let Some(block) = blocks.get(i) else {
            return Err(DownloadError::ProtocolMismatch {
                part: *part,
                detail: "part lies beyond the last block".to_string(),
            });
        };

        if part.offset < block.offset || part.end() > block.end() {
            return Err(DownloadError::ProtocolMismatch {
                part: *part,
                detail: format!("part is not contained in block {block}"),
            });
        }

        positions.push(part.offset - block.offset + preceding);
    }

    Ok(positions)
}

/// Coalesce `parts` with `method`, merge adjacent blocks and map positions.
pub fn compute_byte_ranges(
    parts: &[Part],
    method: RangeMethod,
) -> Result<ByteRanges, DownloadError> {
    compress_parts(parts)?;
    let blocks = compress_parts(&method.blocks(parts)?)?;

    if blocks.is_empty() {
        return Err(DownloadError::InvalidParts("no parts requested".to_string()));
    }
    if blocks.len() > parts.len() {
        return Err(DownloadError::InvalidRangeMethod(format!(
            "{method} produced {} blocks for {} parts",
            blocks.len(),
            parts.len()
        )));
    }

    let positions = positions(parts, &blocks)?;
    let ranges = ByteRanges { blocks, positions };

    let requested: u64 = parts.iter().map(|p| p.length).sum();
    debug!(
        method = %method,
        parts = parts.len(),
        blocks = ranges.blocks.len(),
        requested,
        padding = ranges.transfer_size() - requested,
        "Computed byte ranges"
    );

    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(list: &[(u64, u64)]) -> Vec<Part> {
        list.iter().copied().map(Part::from).collect()
    }

    // Small deterministic family of valid part lists with varied gaps and sizes
    fn sample_part_lists() -> Vec<Vec<Part>> {
        let mut lists = Vec::new();
        for seed in 1u64..40 {
            let mut offset = (seed * 7) % 13;
            let mut list = Vec::new();
            for i in 0..(seed % 9 + 1) {
                let length = (seed * 31 + i * 17) % 97 + 1;
                list.push(Part::new(offset, length));
                let gap = (seed * i * 11) % 300;
                offset += length + if i % 4 == 3 { 0 } else { gap };
            }
            lists.push(list);
        }
        lists
    }

    fn methods() -> Vec<RangeMethod> {
        vec![
            RangeMethod::None,
            RangeMethod::Auto,
            RangeMethod::Cluster(1),
            RangeMethod::Cluster(3),
            RangeMethod::Cluster(5),
            RangeMethod::Blocked(1),
            RangeMethod::Blocked(16),
            RangeMethod::Blocked(50),
            RangeMethod::Blocked(4096),
        ]
    }

    #[test]
    fn test_blocked_merges_touching_blocks() {
        let input = parts(&[(0, 10), (10, 10), (100, 10)]);
        let ranges = compute_byte_ranges(&input, RangeMethod::Blocked(50)).unwrap();
        assert_eq!(ranges.blocks, parts(&[(0, 50), (100, 50)]));
        assert_eq!(ranges.positions, vec![0, 10, 50]);
    }

    #[test]
    fn test_blocked_rounding_and_merge() {
        let input = parts(&[(0, 2), (6, 2), (12, 2), (15, 20)]);
        // Every rounded block touches its predecessor
        assert_eq!(block_grouping(&input, 5).unwrap(), parts(&[(0, 35)]));
        // (0,4) and (4,4) touch; (12,4) is absorbed by the last part's (12,24)
        assert_eq!(
            block_grouping(&input, 4).unwrap(),
            parts(&[(0, 8), (12, 24)])
        );
    }

    #[test]
    fn test_blocked_rejects_unordered_parts() {
        let input = parts(&[(100, 10), (0, 10)]);
        assert!(matches!(
            block_grouping(&input, 16),
            Err(DownloadError::InvalidParts(_))
        ));

        let overlapping = parts(&[(0, 10), (5, 10)]);
        assert!(matches!(
            compute_byte_ranges(&overlapping, RangeMethod::Blocked(16)),
            Err(DownloadError::InvalidParts(_))
        ));
    }

    #[test]
    fn test_cluster_merges_all_ties_in_one_pass() {
        // Gaps: 10, 10, 50 -> both 10-gaps merge in the same pass
        let input = parts(&[(0, 5), (15, 5), (30, 5), (85, 5)]);
        let blocks = hierarchical_clustering(&input, 3).unwrap();
        assert_eq!(blocks, parts(&[(0, 35), (85, 5)]));
    }

    #[test]
    fn test_cluster_stops_at_min_clusters() {
        let input = parts(&[(0, 5), (10, 5), (100, 5), (1000, 5)]);
        assert_eq!(hierarchical_clustering(&input, 4).unwrap(), input);
        assert_eq!(
            hierarchical_clustering(&input, 3).unwrap(),
            parts(&[(0, 15), (100, 5), (1000, 5)])
        );
        assert_eq!(hierarchical_clustering(&input, 0).unwrap(), parts(&[(0, 1005)]));
    }

    #[test]
    fn test_auto_keeps_finest_grouping() {
        let input = parts(&[(0, 100), (300, 100), (5000, 600)]);
        // 600 rounds up to 1024, then 512, 256, 128 are tried; 128 is the last size >= 100
        let expected = block_grouping(&input, 128).unwrap();
        assert_eq!(automatic(&input).unwrap(), expected);
    }

    #[test]
    fn test_positions_reject_straddling_part() {
        let blocks = parts(&[(0, 10), (20, 10)]);
        let input = parts(&[(5, 20)]);
        assert!(matches!(
            positions(&input, &blocks),
            Err(DownloadError::ProtocolMismatch { .. })
        ));

        let beyond = parts(&[(40, 2)]);
        assert!(matches!(
            positions(&beyond, &blocks),
            Err(DownloadError::ProtocolMismatch { .. })
        ));
    }

    #[test]
    fn test_compress_parts_is_idempotent() {
        for list in sample_part_lists() {
            let once = compress_parts(&list).unwrap();
            let twice = compress_parts(&once).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_compress_parts_merges_adjacent() {
        let input = parts(&[(0, 10), (10, 5), (20, 1)]);
        assert_eq!(compress_parts(&input).unwrap(), parts(&[(0, 15), (20, 1)]));
        assert!(compress_parts(&parts(&[(0, 0)])).is_err());
    }

    #[test]
    fn test_coalescing_soundness() {
        for list in sample_part_lists() {
            for method in methods() {
                let ranges = compute_byte_ranges(&list, method).unwrap();
                assert!(!ranges.blocks.is_empty());
                assert!(ranges.blocks.len() <= list.len(), "{method} on {list:?}");

                for pair in ranges.blocks.windows(2) {
                    assert!(pair[0].end() < pair[1].offset, "{method} on {list:?}");
                }
                for block in &ranges.blocks {
                    assert!(
                        list.iter()
                            .any(|p| p.offset >= block.offset && p.end() <= block.end()),
                        "{method}: block {block} covers no part"
                    );
                }
            }
        }
    }

    #[test]
    fn test_positions_address_part_bytes() {
        // Synthetic resource where byte i has value i % 251
        let byte_at = |i: u64| (i % 251) as u8;

        for list in sample_part_lists() {
            for method in methods() {
                let ranges = compute_byte_ranges(&list, method).unwrap();
                let stream: Vec<u8> = ranges
                    .blocks
                    .iter()
                    .flat_map(|b| (b.offset..b.end()).map(byte_at))
                    .collect();

                for (part, &pos) in list.iter().zip(&ranges.positions) {
                    assert!(pos + part.length <= ranges.transfer_size());
                    let slice = &stream[pos as usize..(pos + part.length) as usize];
                    let expected: Vec<u8> = (part.offset..part.end()).map(byte_at).collect();
                    assert_eq!(slice, expected.as_slice(), "{method} part {part}");
                }
            }
        }
    }

    #[test]
    fn test_parse_range_method() {
        assert_eq!("auto".parse::<RangeMethod>().unwrap(), RangeMethod::Auto);
        assert_eq!("none".parse::<RangeMethod>().unwrap(), RangeMethod::None);
        assert_eq!("cluster".parse::<RangeMethod>().unwrap(), RangeMethod::Cluster(5));
        assert_eq!("cluster(8)".parse::<RangeMethod>().unwrap(), RangeMethod::Cluster(8));
        assert_eq!(
            "blocked(4096)".parse::<RangeMethod>().unwrap(),
            RangeMethod::Blocked(4096)
        );
        assert_eq!("1024".parse::<RangeMethod>().unwrap(), RangeMethod::Blocked(1024));
        assert!("blocked".parse::<RangeMethod>().is_err());
        assert!("blocked(0)".parse::<RangeMethod>().is_err());
        assert!("fastest".parse::<RangeMethod>().is_err());
        assert!("cluster(a)".parse::<RangeMethod>().is_err());
    }

    #[test]
    fn test_range_method_serde() {
        let m: RangeMethod = serde_json::from_str("65536").unwrap();
        assert_eq!(m, RangeMethod::Blocked(65536));
        let m: RangeMethod = serde_json::from_str("\"cluster(3)\"").unwrap();
        assert_eq!(m, RangeMethod::Cluster(3));
        assert_eq!(
            serde_json::to_string(&RangeMethod::Blocked(16)).unwrap(),
            "\"blocked(16)\""
        );
    }
}
