use std::collections::HashMap;

use anyhow::{anyhow, ensure, Result};

use super::check_merged_len;
use crate::fastpfor::{read_u32s_compressed, write_u32s_compressed};
use crate::wire::{
    decode_delta_delta, encode_delta_delta, write_var_u32, SliceReader,
};

/// Encoding variant of an [`ObjectSegment`]. The existing segment's
/// subformat fixes the in-memory shape; operands of any subformat are
/// translated into it on merge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectSubformat {
    /// The values themselves, in order.
    Raw,
    /// A dictionary plus (count, dictionary index) runs.
    EnumRle,
    /// A dictionary plus the index sequence as delta-delta varints.
    EnumVb,
    /// As [`ObjectSubformat::EnumVb`] with a FastPFor-packed prefix.
    EnumFpf128,
}

impl ObjectSubformat {
    fn from_raw(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Raw),
            1 => Some(Self::EnumRle),
            2 => Some(Self::EnumVb),
            3 => Some(Self::EnumFpf128),
            _ => None,
        }
    }

    fn into_raw(self) -> u8 {
        match self {
            Self::Raw => 0,
            Self::EnumRle => 1,
            Self::EnumVb => 2,
            Self::EnumFpf128 => 3,
        }
    }
}

/// A batch of variable-length byte strings: string values, binary values
/// or parameter status objects. Dictionary entries are owned copies; the
/// input slices only live for the duration of one merge call.
#[derive(Debug)]
pub struct ObjectSegment {
    subformat: ObjectSubformat,
    /// The flat value sequence for [`ObjectSubformat::Raw`]; the unique
    /// values (dictionary) for the enum subformats.
    values: Vec<Vec<u8>>,
    /// Dictionary position by value, enum subformats only.
    index: HashMap<Vec<u8>, u32>,
    rle_counts: Vec<u32>,
    rle_values: Vec<u32>,
    /// Logical length of the RLE runs.
    rle_len: usize,
    values_idx: Vec<u32>,
}

impl ObjectSegment {
    pub fn new(subformat: ObjectSubformat) -> Self {
        Self {
            subformat,
            values: Vec::new(),
            index: HashMap::new(),
            rle_counts: Vec::new(),
            rle_values: Vec::new(),
            rle_len: 0,
            values_idx: Vec::new(),
        }
    }

    pub fn parse(r: &mut SliceReader) -> Result<Self> {
        let x = r
            .peek_u8()
            .ok_or_else(|| anyhow!("missing object segment subformat"))?;
        let subformat = ObjectSubformat::from_raw(x & 0x0f).ok_or_else(|| {
            anyhow!("unknown subformat {} for object segment", x & 0x0f)
        })?;
        let mut segment = Self::new(subformat);
        segment.merge_from(r)?;
        Ok(segment)
    }

    pub fn merge_from(&mut self, r: &mut SliceReader) -> Result<()> {
        let x = r.read_u8()?;
        match ObjectSubformat::from_raw(x & 0x0f) {
            Some(ObjectSubformat::Raw) => self.merge_raw(r),
            Some(ObjectSubformat::EnumRle) => self.merge_rle_enum(r),
            Some(sub) => self.merge_non_rle_enum(sub, r),
            None => Err(anyhow!(
                "unknown subformat {} for object segment",
                x & 0x0f
            )),
        }
    }

    // the operand is the flat value sequence
    fn merge_raw(&mut self, r: &mut SliceReader) -> Result<()> {
        let tmp = parse_values(r)?;
        check_merged_len(self.len(), tmp.len() as u64)?;
        match self.subformat {
            ObjectSubformat::Raw => self.values.extend(tmp),
            ObjectSubformat::EnumRle => {
                for value in &tmp {
                    let idx = self.intern(value);
                    self.push_run(idx);
                }
                self.rle_len += tmp.len();
            }
            _ => {
                for value in &tmp {
                    let idx = self.intern(value);
                    self.values_idx.push(idx);
                }
            }
        }
        Ok(())
    }

    // the operand is a dictionary plus runs
    fn merge_rle_enum(&mut self, r: &mut SliceReader) -> Result<()> {
        let tmp = parse_values(r)?;
        let (counts, indices) = parse_rles(r)?;
        for &idx in &indices {
            ensure!(
                (idx as usize) < tmp.len(),
                "enum RLE refers to inexistent value with index {}",
                idx
            );
        }
        let incoming: u64 = counts.iter().map(|&c| u64::from(c)).sum();
        check_merged_len(self.len(), incoming)?;
        match self.subformat {
            ObjectSubformat::Raw => {
                for (&count, &idx) in counts.iter().zip(&indices) {
                    let value = &tmp[idx as usize];
                    for _ in 0..count {
                        self.values.push(value.clone());
                    }
                }
            }
            ObjectSubformat::EnumRle => {
                let mappings = self.add_enum_values(&tmp);
                self.rle_counts.extend_from_slice(&counts);
                self.rle_values
                    .extend(indices.iter().map(|&idx| mappings[idx as usize]));
                self.rle_len += incoming as usize;
            }
            _ => {
                let mappings = self.add_enum_values(&tmp);
                for (&count, &idx) in counts.iter().zip(&indices) {
                    let mapped = mappings[idx as usize];
                    for _ in 0..count {
                        self.values_idx.push(mapped);
                    }
                }
            }
        }
        Ok(())
    }

    // the operand is a dictionary plus a compressed index sequence
    fn merge_non_rle_enum(
        &mut self,
        subformat: ObjectSubformat,
        r: &mut SliceReader,
    ) -> Result<()> {
        let tmp = parse_values(r)?;
        let tmp_idx = parse_values_idx(subformat, r, tmp.len())?;
        check_merged_len(self.len(), tmp_idx.len() as u64)?;
        match self.subformat {
            ObjectSubformat::Raw => {
                for &idx in &tmp_idx {
                    self.values.push(tmp[idx as usize].clone());
                }
            }
            ObjectSubformat::EnumRle => {
                let mappings = self.add_enum_values(&tmp);
                for &idx in &tmp_idx {
                    self.push_run(mappings[idx as usize]);
                }
                self.rle_len += tmp_idx.len();
            }
            _ => {
                let mappings = self.add_enum_values(&tmp);
                self.values_idx
                    .extend(tmp_idx.iter().map(|&idx| mappings[idx as usize]));
            }
        }
        Ok(())
    }

    /// Looks the value up in the dictionary, inserting it at the next
    /// position when new.
    fn intern(&mut self, value: &[u8]) -> u32 {
        if let Some(&idx) = self.index.get(value) {
            return idx;
        }
        let idx = self.values.len() as u32;
        self.values.push(value.to_vec());
        self.index.insert(value.to_vec(), idx);
        idx
    }

    /// Interns every operand dictionary entry and returns the mapping from
    /// operand positions to merged positions.
    fn add_enum_values(&mut self, tmp: &[Vec<u8>]) -> Vec<u32> {
        tmp.iter().map(|value| self.intern(value)).collect()
    }

    // extends the last run or starts a new one
    fn push_run(&mut self, idx: u32) {
        match (self.rle_values.last(), self.rle_counts.last_mut()) {
            (Some(&last), Some(count)) if last == idx => *count += 1,
            _ => {
                self.rle_values.push(idx);
                self.rle_counts.push(1);
            }
        }
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        let subformat_pos = out.len();
        out.push(self.subformat.into_raw());
        write_var_u32(out, self.values.len() as u32);
        for value in &self.values {
            write_var_u32(out, value.len() as u32);
            out.extend_from_slice(value);
        }
        match self.subformat {
            ObjectSubformat::Raw => {}
            ObjectSubformat::EnumRle => {
                write_var_u32(out, self.rle_counts.len() as u32);
                for &count in &self.rle_counts {
                    write_var_u32(out, count);
                }
                for &idx in &self.rle_values {
                    write_var_u32(out, idx);
                }
            }
            _ => {
                let signed: Vec<i32> =
                    self.values_idx.iter().map(|&idx| idx as i32).collect();
                let ddz = encode_delta_delta(&signed);
                let with_fastpfor = write_u32s_compressed(out, &ddz);
                out[subformat_pos] = if with_fastpfor {
                    ObjectSubformat::EnumFpf128
                } else {
                    ObjectSubformat::EnumVb
                }
                .into_raw();
            }
        }
    }

    pub fn max_serialized_size(&self) -> usize {
        let values: usize = self.values.iter().map(|v| 5 + v.len()).sum();
        let stream = match self.subformat {
            ObjectSubformat::Raw => 0,
            ObjectSubformat::EnumRle => 5 + 10 * self.rle_counts.len(),
            _ => 10 + 5 * self.values_idx.len(),
        };
        1 + 5 + values + stream
    }

    pub fn subformat(&self) -> ObjectSubformat {
        self.subformat
    }

    /// The stored byte strings: the flat sequence for
    /// [`ObjectSubformat::Raw`], the dictionary otherwise.
    pub fn dictionary(&self) -> &[Vec<u8>] {
        &self.values
    }

    /// The logical value sequence, runs and indices resolved.
    pub fn logical_values(&self) -> Vec<&[u8]> {
        match self.subformat {
            ObjectSubformat::Raw => {
                self.values.iter().map(Vec::as_slice).collect()
            }
            ObjectSubformat::EnumRle => {
                let mut out = Vec::with_capacity(self.rle_len);
                for (&count, &idx) in self.rle_counts.iter().zip(&self.rle_values)
                {
                    let value = self.values[idx as usize].as_slice();
                    for _ in 0..count {
                        out.push(value);
                    }
                }
                out
            }
            _ => self
                .values_idx
                .iter()
                .map(|&idx| self.values[idx as usize].as_slice())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self.subformat {
            ObjectSubformat::Raw => self.values.len(),
            ObjectSubformat::EnumRle => self.rle_len,
            _ => self.values_idx.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parse_values(r: &mut SliceReader) -> Result<Vec<Vec<u8>>> {
    let count = r.read_var_u32()? as usize;
    ensure!(
        count <= r.remaining(),
        "object segment declares {} values in {} bytes",
        count,
        r.remaining()
    );
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let len = r.read_var_u32()? as usize;
        values.push(r.read_bytes(len)?.to_vec());
    }
    Ok(values)
}

fn parse_rles(r: &mut SliceReader) -> Result<(Vec<u32>, Vec<u32>)> {
    let count = r.read_var_u32()? as usize;
    ensure!(
        count <= r.remaining() / 2,
        "object segment declares {} runs in {} bytes",
        count,
        r.remaining()
    );
    let mut counts = Vec::with_capacity(count);
    for _ in 0..count {
        counts.push(r.read_var_u32()?);
    }
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(r.read_var_u32()?);
    }
    Ok((counts, values))
}

fn parse_values_idx(
    subformat: ObjectSubformat,
    r: &mut SliceReader,
    max_idx: usize,
) -> Result<Vec<u32>> {
    let mut ddz = Vec::new();
    read_u32s_compressed(
        subformat == ObjectSubformat::EnumFpf128,
        r,
        &mut ddz,
    )?;
    let mut decoded = Vec::new();
    decode_delta_delta(&ddz, &mut decoded);
    let mut values_idx = Vec::with_capacity(decoded.len());
    for v in decoded {
        let idx = v as u32;
        ensure!(
            (idx as usize) < max_idx,
            "enum index {} larger than the maximum number of values {}",
            idx,
            max_idx
        );
        values_idx.push(idx);
    }
    Ok(values_idx)
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    pub(crate) fn encode_raw(values: &[&[u8]]) -> Vec<u8> {
        let mut buf = vec![ObjectSubformat::Raw.into_raw()];
        write_var_u32(&mut buf, values.len() as u32);
        for v in values {
            write_var_u32(&mut buf, v.len() as u32);
            buf.extend_from_slice(v);
        }
        buf
    }

    pub(crate) fn encode_rle(
        dict: &[&[u8]],
        runs: &[(u32, u32)],
    ) -> Vec<u8> {
        let mut buf = vec![ObjectSubformat::EnumRle.into_raw()];
        write_var_u32(&mut buf, dict.len() as u32);
        for v in dict {
            write_var_u32(&mut buf, v.len() as u32);
            buf.extend_from_slice(v);
        }
        write_var_u32(&mut buf, runs.len() as u32);
        for &(count, _) in runs {
            write_var_u32(&mut buf, count);
        }
        for &(_, idx) in runs {
            write_var_u32(&mut buf, idx);
        }
        buf
    }

    pub(crate) fn encode_enum(dict: &[&[u8]], indices: &[u32]) -> Vec<u8> {
        let mut buf = vec![0];
        write_var_u32(&mut buf, dict.len() as u32);
        for v in dict {
            write_var_u32(&mut buf, v.len() as u32);
            buf.extend_from_slice(v);
        }
        let signed: Vec<i32> = indices.iter().map(|&i| i as i32).collect();
        let with_fastpfor =
            write_u32s_compressed(&mut buf, &encode_delta_delta(&signed));
        buf[0] = if with_fastpfor {
            ObjectSubformat::EnumFpf128
        } else {
            ObjectSubformat::EnumVb
        }
        .into_raw();
        buf
    }

    fn decode(buf: &[u8]) -> ObjectSegment {
        let mut r = SliceReader::new(buf);
        let segment = ObjectSegment::parse(&mut r).unwrap();
        assert!(r.is_empty());
        segment
    }

    fn rewrite(segment: &ObjectSegment) -> Vec<u8> {
        let mut out = vec![];
        segment.write_to(&mut out);
        out
    }

    #[test]
    fn raw_round_trip() {
        let buf = encode_raw(&[b"alpha", b"", b"alpha", b"beta"]);
        let segment = decode(&buf);
        assert_eq!(segment.subformat(), ObjectSubformat::Raw);
        assert_eq!(
            segment.logical_values(),
            [&b"alpha"[..], b"", b"alpha", b"beta"]
        );
        assert_eq!(rewrite(&segment), buf);
    }

    #[test]
    fn rle_round_trip() {
        let buf = encode_rle(&[b"a", b"b"], &[(3, 0), (2, 1)]);
        let segment = decode(&buf);
        assert_eq!(segment.len(), 5);
        assert_eq!(
            segment.logical_values(),
            [&b"a"[..], b"a", b"a", b"b", b"b"]
        );
        assert_eq!(rewrite(&segment), buf);
    }

    #[test]
    fn enum_round_trip() {
        let indices = [0u32, 1, 0, 2, 2, 1];
        let buf = encode_enum(&[b"x", b"y", b"z"], &indices);
        let segment = decode(&buf);
        assert_eq!(segment.subformat(), ObjectSubformat::EnumVb);
        assert_eq!(
            segment.logical_values(),
            [&b"x"[..], b"y", b"x", b"z", b"z", b"y"]
        );
        assert_eq!(rewrite(&segment), buf);
    }

    #[test]
    fn long_enum_uses_fastpfor() {
        let indices: Vec<u32> = (0..400).map(|i| i % 3).collect();
        let dict: &[&[u8]] = &[b"one", b"two", b"three"];
        let buf = encode_enum(dict, &indices);
        assert_eq!(buf[0], ObjectSubformat::EnumFpf128.into_raw());
        let segment = decode(&buf);
        assert_eq!(segment.len(), 400);
        assert_eq!(segment.logical_values()[5], b"three");
        // shape survives a rewrite
        let again = decode(&rewrite(&segment));
        assert_eq!(again.logical_values(), segment.logical_values());
    }

    #[test]
    fn merge_raw_into_rle_coalesces() {
        // "aaabb" ++ raw ["a", "c", "a"]
        let mut segment = decode(&encode_rle(&[b"a", b"b"], &[(3, 0), (2, 1)]));
        let operand = encode_raw(&[b"a", b"c", b"a"]);
        segment.merge_from(&mut SliceReader::new(&operand)).unwrap();
        assert_eq!(
            segment.logical_values(),
            [&b"a"[..], b"a", b"a", b"b", b"b", b"a", b"c", b"a"]
        );
        assert_eq!(
            segment.dictionary(),
            [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );
    }

    #[test]
    fn merge_rle_into_raw_expands() {
        let mut segment = decode(&encode_raw(&[b"x"]));
        let operand = encode_rle(&[b"p", b"q"], &[(2, 1), (1, 0)]);
        segment.merge_from(&mut SliceReader::new(&operand)).unwrap();
        assert_eq!(
            segment.logical_values(),
            [&b"x"[..], b"q", b"q", b"p"]
        );
    }

    #[test]
    fn merge_rle_into_rle_remaps_the_dictionary() {
        let mut segment = decode(&encode_rle(&[b"a", b"b"], &[(1, 0), (1, 1)]));
        // operand dictionary order differs: "b" is index 0 there
        let operand = encode_rle(&[b"b", b"c"], &[(2, 0), (3, 1)]);
        segment.merge_from(&mut SliceReader::new(&operand)).unwrap();
        assert_eq!(
            segment.dictionary(),
            [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );
        assert_eq!(
            segment.logical_values(),
            [&b"a"[..], b"b", b"b", b"b", b"c", b"c", b"c"]
        );
    }

    #[test]
    fn merge_enum_into_enum_remaps_indices() {
        let mut segment = decode(&encode_enum(&[b"a", b"b"], &[0, 1]));
        let operand = encode_enum(&[b"c", b"a"], &[0, 1, 0]);
        segment.merge_from(&mut SliceReader::new(&operand)).unwrap();
        assert_eq!(
            segment.dictionary(),
            [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );
        assert_eq!(
            segment.logical_values(),
            [&b"a"[..], b"b", b"c", b"a", b"c"]
        );
    }

    #[test]
    fn merge_enum_into_rle_coalesces_runs() {
        let mut segment = decode(&encode_rle(&[b"a"], &[(2, 0)]));
        let operand = encode_enum(&[b"a", b"b"], &[0, 0, 1]);
        segment.merge_from(&mut SliceReader::new(&operand)).unwrap();
        // the leading "a"s extend the existing run
        assert_eq!(segment.rle_counts, [4, 1]);
        assert_eq!(segment.rle_values, [0, 1]);
    }

    #[test]
    fn rle_index_out_of_range_is_an_error() {
        let operand = encode_rle(&[b"a"], &[(1, 1)]);
        let err = decode_err(&operand);
        assert!(err.to_string().contains("inexistent"), "{err}");
    }

    #[test]
    fn enum_index_out_of_range_is_an_error() {
        let operand = encode_enum(&[b"a", b"b"], &[0, 2]);
        let err = decode_err(&operand);
        assert!(err.to_string().contains("larger than"), "{err}");
    }

    #[test]
    fn value_length_beyond_slice_is_an_error() {
        // one value claiming 200 bytes in a 3-byte payload
        let buf = [0x00, 0x01, 0xc8];
        let err = decode_err(&buf);
        assert!(err.to_string().contains("underflow"), "{err}");
    }

    fn decode_err(buf: &[u8]) -> anyhow::Error {
        let mut r = SliceReader::new(buf);
        ObjectSegment::parse(&mut r).unwrap_err()
    }

    #[test]
    fn empty_dictionary_entry_is_preserved() {
        let buf = encode_enum(&[b"", b"v"], &[0, 1, 0]);
        let segment = decode(&buf);
        assert_eq!(segment.logical_values(), [&b""[..], b"v", b""]);
    }
}
