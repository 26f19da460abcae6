use anyhow::{ensure, Result};

use super::check_merged_len;
use crate::wire::{write_f64_be, write_var_u32, SliceReader};

pub const SUBFORMAT_ID_RAW: u8 = 0;

/// A batch of 64-bit floats. Raw is the only subformat.
pub struct DoubleSegment {
    values: Vec<f64>,
}

impl DoubleSegment {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    pub fn parse(r: &mut SliceReader) -> Result<Self> {
        let mut segment = Self::new();
        segment.merge_from(r)?;
        Ok(segment)
    }

    pub fn merge_from(&mut self, r: &mut SliceReader) -> Result<()> {
        let x = r.read_u8()?;
        ensure!(
            x & 0x0f == SUBFORMAT_ID_RAW,
            "unknown subformat {} for double segment",
            x & 0x0f
        );
        let n = r.read_var_u32()? as usize;
        check_merged_len(self.values.len(), n as u64)?;
        ensure!(
            r.remaining() >= 8 * n,
            "cannot decode double segment: expected {} bytes and only {} available",
            8 * n,
            r.remaining()
        );
        self.values.reserve(n);
        for _ in 0..n {
            self.values.push(r.read_f64_be()?);
        }
        Ok(())
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.push(SUBFORMAT_ID_RAW);
        write_var_u32(out, self.values.len() as u32);
        for &v in &self.values {
            write_f64_be(out, v);
        }
    }

    pub fn max_serialized_size(&self) -> usize {
        1 + 5 + 8 * self.values.len()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Default for DoubleSegment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn encode(values: &[f64]) -> Vec<u8> {
        let mut segment = DoubleSegment::new();
        segment.values.extend_from_slice(values);
        let mut out = vec![];
        segment.write_to(&mut out);
        out
    }

    #[test]
    fn round_trip() {
        let values = [0.0, -0.0, 1.5, f64::NAN, f64::INFINITY, -1e300];
        let buf = encode(&values);
        assert_eq!(buf.len(), 2 + 8 * values.len());
        let mut r = SliceReader::new(&buf);
        let segment = DoubleSegment::parse(&mut r).unwrap();
        assert!(r.is_empty());
        for (a, b) in values.iter().zip(segment.values()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn merge_appends() {
        let mut segment =
            DoubleSegment::parse(&mut SliceReader::new(&encode(&[1.0, 2.0])))
                .unwrap();
        segment
            .merge_from(&mut SliceReader::new(&encode(&[3.0])))
            .unwrap();
        assert_eq!(segment.values(), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let buf = encode(&[1.0, 2.0]);
        let mut r = SliceReader::new(&buf[..buf.len() - 1]);
        assert!(DoubleSegment::parse(&mut r).is_err());
    }

    #[test]
    fn unknown_subformat_is_an_error() {
        let mut r = SliceReader::new(&[0x02, 0x00]);
        assert!(DoubleSegment::parse(&mut r).is_err());
    }
}
