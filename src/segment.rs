use anyhow::{anyhow, Result};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::wire::SliceReader;

pub mod boolean;
pub mod double;
pub mod float;
pub mod gap;
pub mod int;
pub mod long;
pub mod object;

pub use boolean::BooleanSegment;
pub use double::DoubleSegment;
pub use float::FloatSegment;
pub use gap::GapSegment;
pub use int::IntSegment;
pub use long::{LongSegment, LongType};
pub use object::{ObjectSegment, ObjectSubformat};

/// The one-byte type tag leading every stored segment.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u8)]
pub enum FormatId {
    ParameterStatus = 2,
    IntValue = 11,
    StringValue = 13,
    FloatValue = 16,
    DoubleValue = 17,
    LongValue = 18,
    BinaryValue = 19,
    BooleanValue = 20,
    SortedTimeValueV2 = 21,
    Gap = 22,
}

/// Merging two segments would push the value count past `i32::MAX`. The
/// host should skip the compaction rather than treat the data as corrupt.
#[derive(Debug)]
pub struct CompactionTooLarge;

impl std::fmt::Display for CompactionTooLarge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "resulting segment would be too large")
    }
}

impl std::error::Error for CompactionTooLarge {}

pub(crate) fn check_merged_len(existing: usize, incoming: u64) -> Result<()> {
    if existing as u64 + incoming > i32::MAX as u64 {
        Err(anyhow!(CompactionTooLarge))
    } else {
        Ok(())
    }
}

/// One in-memory segment of any format. Born by decoding an existing
/// stored slice, grown by merging operand slices of the same format,
/// written out exactly once.
pub enum Segment {
    Int(IntSegment),
    Float(FloatSegment),
    Double(DoubleSegment),
    Long(LongSegment),
    Boolean(BooleanSegment),
    Object(ObjectSegment),
    Gap(GapSegment),
}

impl Segment {
    /// Decodes the payload following an already-consumed format id.
    pub fn parse(fmt: FormatId, r: &mut SliceReader) -> Result<Self> {
        use FormatId::*;
        Ok(match fmt {
            ParameterStatus | StringValue | BinaryValue => {
                Segment::Object(ObjectSegment::parse(r)?)
            }
            IntValue | SortedTimeValueV2 => {
                Segment::Int(IntSegment::parse(r)?)
            }
            FloatValue => Segment::Float(FloatSegment::parse(r)?),
            DoubleValue => Segment::Double(DoubleSegment::parse(r)?),
            LongValue => Segment::Long(LongSegment::parse(r)?),
            BooleanValue => Segment::Boolean(BooleanSegment::parse(r)?),
            Gap => Segment::Gap(GapSegment::parse(r)?),
        })
    }

    /// Decodes one operand (positioned after its format id) and appends
    /// its values.
    pub fn merge_from(&mut self, r: &mut SliceReader) -> Result<()> {
        match self {
            Segment::Int(s) => s.merge_from(r),
            Segment::Float(s) => s.merge_from(r),
            Segment::Double(s) => s.merge_from(r),
            Segment::Long(s) => s.merge_from(r),
            Segment::Boolean(s) => s.merge_from(r),
            Segment::Object(s) => s.merge_from(r),
            Segment::Gap(s) => s.merge_from(r),
        }
    }

    /// Serializes the merged state, not including the format id.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            Segment::Int(s) => s.write_to(out),
            Segment::Float(s) => s.write_to(out),
            Segment::Double(s) => s.write_to(out),
            Segment::Long(s) => s.write_to(out),
            Segment::Boolean(s) => s.write_to(out),
            Segment::Object(s) => s.write_to(out),
            Segment::Gap(s) => s.write_to(out),
        }
    }

    /// Upper bound on the `write_to` output, used to pre-reserve.
    pub fn max_serialized_size(&self) -> usize {
        match self {
            Segment::Int(s) => s.max_serialized_size(),
            Segment::Float(s) => s.max_serialized_size(),
            Segment::Double(s) => s.max_serialized_size(),
            Segment::Long(s) => s.max_serialized_size(),
            Segment::Boolean(s) => s.max_serialized_size(),
            Segment::Object(s) => s.max_serialized_size(),
            Segment::Gap(s) => s.max_serialized_size(),
        }
    }

    /// Logical value count.
    pub fn len(&self) -> usize {
        match self {
            Segment::Int(s) => s.len(),
            Segment::Float(s) => s.len(),
            Segment::Double(s) => s.len(),
            Segment::Long(s) => s.len(),
            Segment::Boolean(s) => s.len(),
            Segment::Object(s) => s.len(),
            Segment::Gap(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
