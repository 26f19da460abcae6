use anyhow::{ensure, Result};

use super::check_merged_len;
use crate::bits::BitArray;
use crate::wire::{write_u64_be, write_var_u32, SliceReader};

/// A bit-packed boolean vector. The wire carries the exact value count
/// separately from the 64-bit words, so trailing bits of the last word are
/// undefined and masked away on read. No subformat byte.
#[derive(Default)]
pub struct BooleanSegment {
    bits: BitArray,
}

impl BooleanSegment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(r: &mut SliceReader) -> Result<Self> {
        let mut segment = Self::new();
        segment.merge_from(r)?;
        Ok(segment)
    }

    pub fn merge_from(&mut self, r: &mut SliceReader) -> Result<()> {
        let count = r.read_var_u32()?;
        let words = r.read_var_u32()? as usize;
        ensure!(
            words == (count as usize).div_ceil(64),
            "boolean segment declares {} words for {} bits",
            words,
            count
        );
        check_merged_len(self.bits.len(), u64::from(count))?;
        ensure!(
            r.remaining() >= 8 * words,
            "cannot decode boolean segment: expected {} bytes and only {} available",
            8 * words,
            r.remaining()
        );
        let mut remaining = count;
        for _ in 0..words {
            let word = r.read_u64_be()?;
            let width = remaining.min(64);
            self.bits.push_bits(word, width);
            remaining -= width;
        }
        Ok(())
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        write_var_u32(out, self.bits.len() as u32);
        write_var_u32(out, self.bits.words().len() as u32);
        for &word in self.bits.words() {
            write_u64_be(out, word);
        }
    }

    pub fn max_serialized_size(&self) -> usize {
        5 + 5 + 8 * self.bits.words().len()
    }

    pub fn get(&self, pos: usize) -> bool {
        self.bits.get(pos)
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn encode(bits: &[bool]) -> Vec<u8> {
        let mut segment = BooleanSegment::new();
        for &b in bits {
            segment.bits.push(b);
        }
        let mut out = vec![];
        segment.write_to(&mut out);
        out
    }

    fn bools(segment: &BooleanSegment) -> Vec<bool> {
        (0..segment.len()).map(|i| segment.get(i)).collect()
    }

    #[test]
    fn round_trip_partial_word() {
        let bits: Vec<bool> = (0..67).map(|i| i % 5 == 0).collect();
        let buf = encode(&bits);
        // count, word count, then 2 words
        assert_eq!(buf.len(), 1 + 1 + 16);
        let mut r = SliceReader::new(&buf);
        let segment = BooleanSegment::parse(&mut r).unwrap();
        assert!(r.is_empty());
        assert_eq!(bools(&segment), bits);
    }

    #[test]
    fn merge_concatenates_across_word_boundaries() {
        let a = [true, false, true];
        let b: Vec<bool> = (0..65).map(|i| i % 2 == 1).collect();
        let mut segment =
            BooleanSegment::parse(&mut SliceReader::new(&encode(&a))).unwrap();
        segment.merge_from(&mut SliceReader::new(&encode(&b))).unwrap();
        assert_eq!(segment.len(), 68);
        let mut expect = a.to_vec();
        expect.extend(&b);
        assert_eq!(bools(&segment), expect);
    }

    #[test]
    fn empty_segment() {
        let buf = encode(&[]);
        assert_eq!(buf, [0, 0]);
        let segment =
            BooleanSegment::parse(&mut SliceReader::new(&buf)).unwrap();
        assert!(segment.is_empty());
    }

    #[test]
    fn word_count_mismatch_is_an_error() {
        // 3 bits cannot need 2 words
        let mut buf = vec![3, 2];
        buf.extend_from_slice(&[0u8; 16]);
        assert!(BooleanSegment::parse(&mut SliceReader::new(&buf)).is_err());
    }

    #[test]
    fn truncated_words_are_an_error() {
        let buf = encode(&[true; 70]);
        let mut r = SliceReader::new(&buf[..buf.len() - 3]);
        assert!(BooleanSegment::parse(&mut r).is_err());
    }
}
