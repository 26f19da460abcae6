use anyhow::{anyhow, ensure, Result};

use super::check_merged_len;
use crate::wire::{write_u64_be, write_var_u32, SliceReader};

pub const SUBFORMAT_ID_RAW: u8 = 0;

/// How the 64-bit payload of a [`LongSegment`] is to be interpreted.
/// Stored in bits 4..6 of the header byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LongType {
    Uint64,
    Sint64,
    Timestamp,
}

impl LongType {
    fn from_raw(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Uint64),
            1 => Some(Self::Sint64),
            2 => Some(Self::Timestamp),
            _ => None,
        }
    }

    fn into_raw(self) -> u8 {
        match self {
            Self::Uint64 => 0,
            Self::Sint64 => 1,
            Self::Timestamp => 2,
        }
    }
}

/// A batch of 64-bit integers with a logical subtype tag. Raw is the only
/// subformat; every operand must carry the same subtype.
///
/// Header byte: `subtype << 4 | subformat`.
pub struct LongSegment {
    subtype: LongType,
    values: Vec<i64>,
}

impl LongSegment {
    pub fn new(subtype: LongType) -> Self {
        Self { subtype, values: Vec::new() }
    }

    pub fn parse(r: &mut SliceReader) -> Result<Self> {
        let subtype = Self::decode_header(r)?;
        let mut segment = Self::new(subtype);
        segment.decode_values(r)?;
        Ok(segment)
    }

    pub fn merge_from(&mut self, r: &mut SliceReader) -> Result<()> {
        let subtype = Self::decode_header(r)?;
        ensure!(
            subtype == self.subtype,
            "long segment operand subtype {:?} does not match the existing {:?}",
            subtype,
            self.subtype
        );
        self.decode_values(r)
    }

    fn decode_header(r: &mut SliceReader) -> Result<LongType> {
        let x = r.read_u8()?;
        ensure!(
            x & 0x0f == SUBFORMAT_ID_RAW,
            "unknown subformat {} for long segment",
            x & 0x0f
        );
        LongType::from_raw((x >> 4) & 3)
            .ok_or_else(|| anyhow!("invalid long segment subtype {}", (x >> 4) & 3))
    }

    fn decode_values(&mut self, r: &mut SliceReader) -> Result<()> {
        let n = r.read_var_u32()? as usize;
        check_merged_len(self.values.len(), n as u64)?;
        ensure!(
            r.remaining() >= 8 * n,
            "cannot decode long segment: expected {} bytes and only {} available",
            8 * n,
            r.remaining()
        );
        self.values.reserve(n);
        for _ in 0..n {
            self.values.push(r.read_u64_be()? as i64);
        }
        Ok(())
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.push(self.subtype.into_raw() << 4 | SUBFORMAT_ID_RAW);
        write_var_u32(out, self.values.len() as u32);
        for &v in &self.values {
            write_u64_be(out, v as u64);
        }
    }

    pub fn max_serialized_size(&self) -> usize {
        1 + 5 + 8 * self.values.len()
    }

    pub fn subtype(&self) -> LongType {
        self.subtype
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn encode(subtype: LongType, values: &[i64]) -> Vec<u8> {
        let mut segment = LongSegment::new(subtype);
        segment.values.extend_from_slice(values);
        let mut out = vec![];
        segment.write_to(&mut out);
        out
    }

    #[test]
    fn round_trip() {
        let values = [0, -1, i64::MIN, i64::MAX, 1 << 40];
        let buf = encode(LongType::Sint64, &values);
        assert_eq!(buf[0], 1 << 4);
        let mut r = SliceReader::new(&buf);
        let segment = LongSegment::parse(&mut r).unwrap();
        assert!(r.is_empty());
        assert_eq!(segment.subtype(), LongType::Sint64);
        assert_eq!(segment.values(), values);
    }

    #[test]
    fn merge_appends() {
        let mut segment = LongSegment::parse(&mut SliceReader::new(&encode(
            LongType::Timestamp,
            &[1_700_000_000_000, 1_700_000_001_000],
        )))
        .unwrap();
        segment
            .merge_from(&mut SliceReader::new(&encode(
                LongType::Timestamp,
                &[1_700_000_002_000],
            )))
            .unwrap();
        assert_eq!(
            segment.values(),
            [1_700_000_000_000, 1_700_000_001_000, 1_700_000_002_000]
        );
    }

    #[test]
    fn subtype_mismatch_is_an_error() {
        let mut segment = LongSegment::parse(&mut SliceReader::new(&encode(
            LongType::Uint64,
            &[1],
        )))
        .unwrap();
        let operand = encode(LongType::Sint64, &[2]);
        let err =
            segment.merge_from(&mut SliceReader::new(&operand)).unwrap_err();
        assert!(err.to_string().contains("subtype"), "{err}");
    }

    #[test]
    fn invalid_subtype_is_an_error() {
        // subtype bits 0b11 name no type
        let mut r = SliceReader::new(&[0x30, 0x00]);
        assert!(LongSegment::parse(&mut r).is_err());
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let buf = encode(LongType::Uint64, &[7, 8]);
        let mut r = SliceReader::new(&buf[..10]);
        assert!(LongSegment::parse(&mut r).is_err());
    }
}
