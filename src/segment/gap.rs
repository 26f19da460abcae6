use anyhow::{bail, Result};

use super::check_merged_len;
use crate::fastpfor::{read_u32s_compressed, write_u32s_compressed};
use crate::wire::{
    decode_delta_delta, encode_delta_delta, write_var_u32, SliceReader,
};

pub const SUBFORMAT_ID_DELTADZ_FPF128_VB: u8 = 1;
pub const SUBFORMAT_ID_DELTADZ_VB: u8 = 2;

/// Sparse integer indices relative to an interval origin. Each stored
/// segment carries its own interval offset; merging makes the values
/// absolute, so the merged segment is always written with offset 0.
#[derive(Default)]
pub struct GapSegment {
    values: Vec<i32>,
}

impl GapSegment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(r: &mut SliceReader) -> Result<Self> {
        let mut segment = Self::new();
        segment.merge_from(r)?;
        Ok(segment)
    }

    pub fn merge_from(&mut self, r: &mut SliceReader) -> Result<()> {
        let interval_offset = r.read_var_u32()?;
        let x = r.read_u8()?;
        let with_fastpfor = match x & 0x0f {
            SUBFORMAT_ID_DELTADZ_FPF128_VB => true,
            SUBFORMAT_ID_DELTADZ_VB => false,
            other => bail!("unknown subformat {} for gap segment", other),
        };
        let mut ddz = Vec::new();
        read_u32s_compressed(with_fastpfor, r, &mut ddz)?;
        check_merged_len(self.values.len(), ddz.len() as u64)?;
        let start = self.values.len();
        decode_delta_delta(&ddz, &mut self.values);
        if interval_offset > 0 {
            for value in &mut self.values[start..] {
                *value = value.wrapping_add(interval_offset as i32);
            }
        }
        Ok(())
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        // always absolute after a merge
        write_var_u32(out, 0);
        let subformat_pos = out.len();
        out.push(SUBFORMAT_ID_DELTADZ_FPF128_VB);
        let ddz = encode_delta_delta(&self.values);
        if !write_u32s_compressed(out, &ddz) {
            out[subformat_pos] = SUBFORMAT_ID_DELTADZ_VB;
        }
    }

    pub fn max_serialized_size(&self) -> usize {
        1 + 1 + 5 + 5 + 5 * self.values.len()
    }

    pub fn values(&self) -> &[i32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
