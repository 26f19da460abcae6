use anyhow::{bail, ensure, Result};

use super::check_merged_len;
use crate::float_xor;
use crate::wire::{var_u32_len, write_f32_be, write_var_u32, SliceReader};

pub const SUBFORMAT_ID_RAW: u8 = 0;
pub const SUBFORMAT_ID_COMPRESSED: u8 = 1;

/// A batch of 32-bit floats: raw big-endian values or the XOR-compressed
/// bit stream, whichever serializes smaller.
pub struct FloatSegment {
    values: Vec<f32>,
}

impl FloatSegment {
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
        let n = r.read_var_u32()? as usize;
        check_merged_len(self.values.len(), n as u64)?;
        match x & 0x0f {
            SUBFORMAT_ID_RAW => {
                ensure!(
                    r.remaining() >= 4 * n,
                    "cannot decode float segment: expected {} bytes and only {} available",
                    4 * n,
                    r.remaining()
                );
                self.values.reserve(n);
                for _ in 0..n {
                    self.values.push(r.read_f32_be()?);
                }
            }
            SUBFORMAT_ID_COMPRESSED => {
                float_xor::decompress(r, n, &mut self.values)?;
            }
            other => bail!("unknown subformat {} for float segment", other),
        }
        Ok(())
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.push(SUBFORMAT_ID_COMPRESSED);
        write_var_u32(out, self.values.len() as u32);
        float_xor::compress(&self.values, out);
        let raw_size =
            1 + var_u32_len(self.values.len() as u32) + 4 * self.values.len();
        if out.len() - start > raw_size {
            out.truncate(start);
            out.push(SUBFORMAT_ID_RAW);
            write_var_u32(out, self.values.len() as u32);
            for &v in &self.values {
                write_f32_be(out, v);
            }
        }
    }

    pub fn max_serialized_size(&self) -> usize {
        1 + 5 + 4 * self.values.len()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Default for FloatSegment {
    fn default() -> Self {
        Self::new()
    }
}
