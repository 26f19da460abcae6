use anyhow::{bail, ensure, Result};

use super::check_merged_len;
use crate::fastpfor::{read_u32s_body, write_u32s_body};
use crate::wire::{
    decode_delta_delta, encode_delta_delta, var_u32_len, write_u32_be,
    write_var_u32, SliceReader,
};

pub const SUBFORMAT_ID_RAW: u8 = 0;
pub const SUBFORMAT_ID_DELTADZ_FPF128_VB: u8 = 1;
pub const SUBFORMAT_ID_DELTADZ_VB: u8 = 2;

/// A batch of 32-bit integers, signed or unsigned. The signedness only
/// affects interpretation, not the wire image; every operand must agree
/// with it. Also carries the SortedTimeValueV2 format, whose payload is
/// identical.
///
/// Header byte: `signed << 4 | subformat`.
pub struct IntSegment {
    signed: bool,
    values: Vec<i32>,
}

impl IntSegment {
    pub fn new(signed: bool) -> Self {
        Self { signed, values: Vec::new() }
    }

    pub fn parse(r: &mut SliceReader) -> Result<Self> {
        let x = r.read_u8()?;
        let mut segment = Self::new((x >> 4) & 1 == 1);
        segment.decode_body(x & 0x0f, r)?;
        Ok(segment)
    }

    pub fn merge_from(&mut self, r: &mut SliceReader) -> Result<()> {
        let x = r.read_u8()?;
        ensure!(
            ((x >> 4) & 1 == 1) == self.signed,
            "int segment operand signedness does not match the existing segment"
        );
        self.decode_body(x & 0x0f, r)
    }

    fn decode_body(&mut self, subformat: u8, r: &mut SliceReader) -> Result<()> {
        let n = r.read_var_u32()? as usize;
        check_merged_len(self.values.len(), n as u64)?;
        match subformat {
            SUBFORMAT_ID_RAW => {
                ensure!(
                    r.remaining() >= 4 * n,
                    "cannot decode int segment: expected {} bytes and only {} available",
                    4 * n,
                    r.remaining()
                );
                self.values.reserve(n);
                for _ in 0..n {
                    self.values.push(r.read_u32_be()? as i32);
                }
            }
            SUBFORMAT_ID_DELTADZ_FPF128_VB | SUBFORMAT_ID_DELTADZ_VB => {
                let mut ddz = Vec::new();
                read_u32s_body(
                    subformat == SUBFORMAT_ID_DELTADZ_FPF128_VB,
                    n,
                    r,
                    &mut ddz,
                )?;
                decode_delta_delta(&ddz, &mut self.values);
            }
            other => bail!("unknown subformat {} for int segment", other),
        }
        Ok(())
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        let start = out.len();
        self.write_compressed(out);
        let raw_size =
            1 + var_u32_len(self.values.len() as u32) + 4 * self.values.len();
        if out.len() - start > raw_size {
            out.truncate(start);
            self.write_raw(out);
        }
    }

    fn write_compressed(&self, out: &mut Vec<u8>) {
        let header_pos = out.len();
        out.push(0);
        write_var_u32(out, self.values.len() as u32);
        let ddz = encode_delta_delta(&self.values);
        let with_fastpfor = write_u32s_body(out, &ddz);
        out[header_pos] = self.header(if with_fastpfor {
            SUBFORMAT_ID_DELTADZ_FPF128_VB
        } else {
            SUBFORMAT_ID_DELTADZ_VB
        });
    }

    fn write_raw(&self, out: &mut Vec<u8>) {
        out.push(self.header(SUBFORMAT_ID_RAW));
        write_var_u32(out, self.values.len() as u32);
        for &v in &self.values {
            write_u32_be(out, v as u32);
        }
    }

    fn header(&self, subformat: u8) -> u8 {
        u8::from(self.signed) << 4 | subformat
    }

    pub fn max_serialized_size(&self) -> usize {
        1 + 5 + 4 * self.values.len()
    }

    pub fn is_signed(&self) -> bool {
        self.signed
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
