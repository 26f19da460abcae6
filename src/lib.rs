//! Merge operator and segment codecs for a parameter archive stored in an
//! embedded log-structured key-value engine.
//!
//! The engine coalesces concurrently written per-key update records into a
//! single stored value during flush and compaction. Every record is a
//! *segment*: a compact columnar batch of values of one homogeneous type,
//! led by a one-byte format id. [`ParchiveMergeOperator`] decodes the
//! existing segment, appends each operand's values in order, and re-encodes
//! the result; the per-format codecs live under [`segment`].
#![forbid(unsafe_code)]

pub mod bits;
pub mod fastpfor;
pub mod float_xor;
pub mod segment;
pub mod wire;


use anyhow::{anyhow, ensure, Result};
use tracing::{debug, error};

pub use segment::{CompactionTooLarge, FormatId, Segment};
use wire::SliceReader;

/// The merge operator plugged into the host engine. Stateless; every call
/// works on borrowed input slices and returns an owned buffer.
#[derive(Clone, Copy, Debug, Default)]
pub struct ParchiveMergeOperator;

impl ParchiveMergeOperator {
    pub const NAME: &'static str = "ParchiveMergeOperator";

    /// A run of one operand is a valid (identity) merge.
    pub const ALLOW_SINGLE_OPERAND: bool = true;

    pub fn new() -> Self {
        Self
    }

    /// Recomputes the stored value from the existing segment plus the
    /// ordered operands. Without an existing value the first operand seeds
    /// the merge; with neither, the call fails.
    pub fn full_merge(
        &self,
        key: &[u8],
        existing: Option<&[u8]>,
        operands: &[&[u8]],
    ) -> Result<Vec<u8>> {
        match existing {
            Some(first) => self.merge_slices(key, first, operands),
            None => match operands.split_first() {
                Some((first, rest)) => self.merge_slices(key, first, rest),
                None => Err(anyhow!(
                    "merge with neither an existing value nor operands"
                )),
            },
        }
    }

    /// Combines a run of operands without an existing value, using the
    /// first operand as the initial segment.
    pub fn partial_merge(
        &self,
        key: &[u8],
        operands: &[&[u8]],
    ) -> Result<Vec<u8>> {
        let (first, rest) = operands
            .split_first()
            .ok_or_else(|| anyhow!("partial merge without operands"))?;
        self.merge_slices(key, first, rest)
    }

    fn merge_slices(
        &self,
        key: &[u8],
        first: &[u8],
        rest: &[&[u8]],
    ) -> Result<Vec<u8>> {
        merge_slices(first, rest).map_err(|err| {
            error!(key = ?key, "segment merge failed: {err:#}");
            err
        })
    }
}

fn merge_slices(first: &[u8], rest: &[&[u8]]) -> Result<Vec<u8>> {
    ensure!(
        first.len() >= 2,
        "short value received in merge: {} bytes",
        first.len()
    );
    let format = FormatId::try_from(first[0])
        .map_err(|_| anyhow!("unknown format id {}", first[0]))?;
    debug!(format = first[0], operands = rest.len() + 1, "merging segments");

    let mut segment =
        Segment::parse(format, &mut SliceReader::new(&first[1..]))?;
    for operand in rest {
        ensure!(
            operand.len() >= 2,
            "short operand received in merge: {} bytes",
            operand.len()
        );
        ensure!(
            operand[0] == u8::from(format),
            "operand format id {} does not match the merged format id {}",
            operand[0],
            u8::from(format)
        );
        segment.merge_from(&mut SliceReader::new(&operand[1..]))?;
    }

    let mut out = Vec::with_capacity(1 + segment.max_serialized_size());
    out.push(u8::from(format));
    segment.write_to(&mut out);
    Ok(out)
}
