//! FastPFor128: block-of-128 integer bit-packing with a per-page exception
//! stream, bit-exact with the public FastPFOR128 codec. Only whole blocks
//! are encoded; callers emit the remaining tail as varints through the
//! framing helpers at the bottom of this module.
//!
//! Stream layout: a leading word with the number of encoded values (a
//! positive multiple of 128), then one or more pages. Each page starts with
//! a word holding the offset to its metadata area, followed by the
//! bit-packed block payloads. The metadata area is: the byte-area length,
//! the byte area itself (4 bytes per word, zero-padded), a bitmap of the
//! exception widths in use, and for each width a count plus the exception
//! high bits packed at that width. The byte area carries, per block, the
//! packing width, the exception count, and when exceptions exist the
//! maximum width plus one position byte per exception.

use anyhow::{anyhow, ensure, Result};

use crate::wire::{write_u32_be, write_var_u32, SliceReader};

pub const BLOCK_SIZE: usize = 128;
const PAGE_SIZE: usize = 65536;
const OVERHEAD_OF_EACH_EXCEPT: u32 = 8;

/// Encoder/decoder state. The vectors are scratch space reused across
/// pages; a value of this type is cheap to create per merge call.
pub struct FastPFor128 {
    exceptions: Vec<Vec<u32>>,
    byte_area: Vec<u8>,
}

impl Default for FastPFor128 {
    fn default() -> Self {
        Self::new()
    }
}

impl FastPFor128 {
    pub fn new() -> Self {
        Self { exceptions: vec![Vec::new(); 33], byte_area: Vec::new() }
    }

    /// Encodes the whole-block prefix of `input` into `out` (32-bit words)
    /// and returns how many input values were consumed: `input.len()`
    /// rounded down to a multiple of 128. Nothing is written when no whole
    /// block exists.
    pub fn encode(&mut self, input: &[u32], out: &mut Vec<u32>) -> usize {
        let consumed = input.len() / BLOCK_SIZE * BLOCK_SIZE;
        if consumed == 0 {
            return 0;
        }
        out.push(consumed as u32);
        for page in input[..consumed].chunks(PAGE_SIZE) {
            self.encode_page(page, out);
        }
        consumed
    }

    /// Decodes one stream from `input`, appending the values to `out`.
    /// Returns `(words consumed, values written)`. `expected` bounds the
    /// value count: a stream advertising more is corrupt.
    pub fn decode(
        &mut self,
        input: &[u32],
        expected: usize,
        out: &mut Vec<u32>,
    ) -> Result<(usize, usize)> {
        ensure!(!input.is_empty(), "truncated FastPFor stream");
        let count = input[0] as usize;
        ensure!(
            count > 0 && count % BLOCK_SIZE == 0,
            "invalid FastPFor value count {}",
            count
        );
        ensure!(count <= expected, "encoded data longer than expected");
        let mut pos = 1;
        let mut done = 0;
        while done < count {
            let thissize = PAGE_SIZE.min(count - done);
            self.decode_page(input, &mut pos, out, thissize)?;
            done += thissize;
        }
        Ok((pos, count))
    }

    fn encode_page(&mut self, page: &[u32], out: &mut Vec<u32>) {
        let headerpos = out.len();
        out.push(0);
        self.byte_area.clear();
        for e in &mut self.exceptions {
            e.clear();
        }

        for block in page.chunks_exact(BLOCK_SIZE) {
            let (bestb, cexcept, maxb) = best_width(block);
            self.byte_area.push(bestb as u8);
            self.byte_area.push(cexcept as u8);
            if cexcept > 0 {
                self.byte_area.push(maxb as u8);
                let index = (maxb - bestb) as usize;
                for (k, &v) in block.iter().enumerate() {
                    if v >> bestb != 0 {
                        self.byte_area.push(k as u8);
                        // width-1 high parts are implicitly 1
                        if index >= 2 {
                            self.exceptions[index].push(v >> bestb);
                        }
                    }
                }
            }
            for group in block.chunks_exact(32) {
                pack32(group, out, bestb);
            }
        }

        out[headerpos] = (out.len() - headerpos) as u32;
        out.push(self.byte_area.len() as u32);
        for chunk in self.byte_area.chunks(4) {
            let mut w = [0u8; 4];
            w[..chunk.len()].copy_from_slice(chunk);
            out.push(u32::from_le_bytes(w));
        }

        let mut bitmap = 0u32;
        for k in 2..=32 {
            if !self.exceptions[k].is_empty() {
                bitmap |= 1 << (k - 1);
            }
        }
        out.push(bitmap);
        for k in 2..=32 {
            if !self.exceptions[k].is_empty() {
                out.push(self.exceptions[k].len() as u32);
                for group in self.exceptions[k].chunks(32) {
                    let mut padded = [0u32; 32];
                    padded[..group.len()].copy_from_slice(group);
                    pack32(&padded, out, k as u32);
                }
            }
        }
    }

    fn decode_page(
        &mut self,
        input: &[u32],
        pos: &mut usize,
        out: &mut Vec<u32>,
        thissize: usize,
    ) -> Result<()> {
        let initpos = *pos;
        ensure!(initpos < input.len(), "truncated FastPFor page");
        let wheremeta = input[initpos] as usize;
        let mut mpos = initpos
            .checked_add(wheremeta)
            .filter(|&p| p > initpos && p < input.len())
            .ok_or_else(|| anyhow!("corrupt FastPFor page header"))?;

        // metadata: byte area, bitmap, exception arrays
        let bytesize = input[mpos] as usize;
        mpos += 1;
        let bwords = bytesize.div_ceil(4);
        ensure!(bwords < input.len() - mpos, "truncated FastPFor page");
        self.byte_area.clear();
        for &w in &input[mpos..mpos + bwords] {
            self.byte_area.extend_from_slice(&w.to_le_bytes());
        }
        self.byte_area.truncate(bytesize);
        mpos += bwords;
        let bitmap = input[mpos];
        mpos += 1;
        for k in 2..=32usize {
            self.exceptions[k].clear();
            if bitmap & (1 << (k - 1)) != 0 {
                ensure!(mpos < input.len(), "truncated FastPFor page");
                let size = input[mpos] as usize;
                mpos += 1;
                let groups = size.div_ceil(32);
                ensure!(
                    groups * k <= input.len() - mpos,
                    "truncated FastPFor exception array"
                );
                self.exceptions[k].clear();
                for _ in 0..groups {
                    let mut tmp = [0u32; 32];
                    unpack32(&input[mpos..mpos + k], &mut tmp, k as u32);
                    mpos += k;
                    self.exceptions[k].extend_from_slice(&tmp);
                }
                self.exceptions[k].truncate(size);
            }
        }

        // block payloads, patched with the exception high bits
        let meta_start = initpos + wheremeta;
        let mut dpos = initpos + 1;
        let mut bytep = 0;
        let mut used = [0usize; 33];
        for _ in 0..thissize / BLOCK_SIZE {
            let [b, cexcept] = *read_bytes::<2>(&self.byte_area, &mut bytep)?;
            let b = u32::from(b);
            ensure!(b <= 32, "invalid FastPFor bit width {}", b);
            let base = out.len();
            for _ in 0..4 {
                ensure!(
                    dpos + b as usize <= meta_start,
                    "FastPFor block data overruns its page"
                );
                let mut tmp = [0u32; 32];
                unpack32(&input[dpos..dpos + b as usize], &mut tmp, b);
                dpos += b as usize;
                out.extend_from_slice(&tmp);
            }
            if cexcept > 0 {
                let [maxb] = *read_bytes::<1>(&self.byte_area, &mut bytep)?;
                let maxb = u32::from(maxb);
                ensure!(
                    b < maxb && maxb <= 32,
                    "invalid FastPFor exception width {} (base {})",
                    maxb,
                    b
                );
                let index = (maxb - b) as usize;
                for _ in 0..cexcept {
                    let [p] = *read_bytes::<1>(&self.byte_area, &mut bytep)?;
                    let p = p as usize;
                    ensure!(p < BLOCK_SIZE, "exception position {} out of range", p);
                    let high = if index == 1 {
                        1
                    } else {
                        let e = self.exceptions[index]
                            .get(used[index])
                            .copied()
                            .ok_or_else(|| {
                                anyhow!("FastPFor exception array exhausted")
                            })?;
                        used[index] += 1;
                        e
                    };
                    out[base + p] |= high << b;
                }
            }
        }
        ensure!(
            dpos == meta_start,
            "FastPFor page consumed {} payload words, header declared {}",
            dpos - initpos - 1,
            wheremeta - 1
        );
        *pos = mpos;
        Ok(())
    }
}

fn read_bytes<'a, const N: usize>(
    area: &'a [u8],
    pos: &mut usize,
) -> Result<&'a [u8; N]> {
    let bytes = area
        .get(*pos..*pos + N)
        .ok_or_else(|| anyhow!("truncated FastPFor block descriptor"))?;
    *pos += N;
    Ok(bytes.try_into().unwrap())
}

/// Chooses the packing width for one block: the width minimizing the cost
/// of the packed payload plus the per-exception overhead. Returns
/// `(width, exception count, max width)`.
fn best_width(block: &[u32]) -> (u32, usize, u32) {
    let mut freqs = [0u32; 33];
    for &v in block {
        freqs[(32 - v.leading_zeros()) as usize] += 1;
    }
    let mut bestb = 32;
    while freqs[bestb] == 0 && bestb > 0 {
        bestb -= 1;
    }
    let maxb = bestb;
    let mut bestcost = (bestb * BLOCK_SIZE) as u32;
    let mut bestc = 0usize;
    let mut cexcept = 0u32;
    let mut b = bestb;
    while b > 0 {
        b -= 1;
        cexcept += freqs[b + 1];
        if cexcept as usize == BLOCK_SIZE {
            break;
        }
        // the extra 8 is the cost of storing maxb
        let mut cost = cexcept * OVERHEAD_OF_EACH_EXCEPT
            + cexcept * (maxb - b) as u32
            + (b * BLOCK_SIZE) as u32
            + 8;
        if maxb - b == 1 {
            cost -= cexcept;
        }
        if cost < bestcost {
            bestcost = cost;
            bestb = b;
            bestc = cexcept as usize;
        }
    }
    (bestb as u32, bestc, maxb as u32)
}

/// Packs 32 values at the given width, low positions in low bits.
fn pack32(input: &[u32], out: &mut Vec<u32>, bit: u32) {
    debug_assert_eq!(input.len(), 32);
    if bit == 0 {
        return;
    }
    let mask = mask32(bit);
    let start = out.len();
    out.resize(start + bit as usize, 0);
    let words = &mut out[start..];
    let mut bitpos = 0usize;
    for &v in input {
        let v = v & mask;
        let word = bitpos >> 5;
        let off = (bitpos & 31) as u32;
        words[word] |= v << off;
        if off + bit > 32 {
            words[word + 1] |= v >> (32 - off);
        }
        bitpos += bit as usize;
    }
}

fn unpack32(words: &[u32], out: &mut [u32; 32], bit: u32) {
    if bit == 0 {
        out.fill(0);
        return;
    }
    let mask = mask32(bit);
    let mut bitpos = 0usize;
    for o in out.iter_mut() {
        let word = bitpos >> 5;
        let off = (bitpos & 31) as u32;
        let mut v = words[word] >> off;
        if off + bit > 32 {
            v |= words[word + 1] << (32 - off);
        }
        *o = v & mask;
        bitpos += bit as usize;
    }
}

fn mask32(bit: u32) -> u32 {
    if bit >= 32 {
        u32::MAX
    } else {
        (1 << bit) - 1
    }
}

/// Writes `values` as FastPFor words (big-endian u32 each) over the
/// whole-block prefix followed by plain varints for the tail. Returns
/// whether FastPFor was used: it is skipped when no whole block of 128
/// exists or when its output is not smaller than the values it covers.
pub fn write_u32s_body(buf: &mut Vec<u8>, values: &[u32]) -> bool {
    let mut codec = FastPFor128::new();
    let mut words = Vec::new();
    let consumed = codec.encode(values, &mut words);
    let with_fastpfor = consumed > 0 && words.len() < consumed;
    let tail_start = if with_fastpfor {
        for &w in &words {
            write_u32_be(buf, w);
        }
        consumed
    } else {
        0
    };
    for &v in &values[tail_start..] {
        write_var_u32(buf, v);
    }
    with_fastpfor
}

/// Reads `n` values written by [`write_u32s_body`], appending to `out`.
pub fn read_u32s_body(
    with_fastpfor: bool,
    n: usize,
    r: &mut SliceReader,
    out: &mut Vec<u32>,
) -> Result<()> {
    let mut decoded = 0;
    if with_fastpfor {
        let words: Vec<u32> = r
            .remaining_slice()
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes(c.try_into().unwrap()))
            .collect();
        let mut codec = FastPFor128::new();
        let (words_used, values) = codec.decode(&words, n, out)?;
        r.advance(4 * words_used);
        decoded = values;
    }
    ensure!(
        n - decoded <= r.remaining(),
        "buffer underflow: {} values left, {} bytes available",
        n - decoded,
        r.remaining()
    );
    out.reserve(n - decoded);
    for _ in decoded..n {
        out.push(r.read_var_u32()?);
    }
    Ok(())
}

/// The compressed-u32-vec framing shared by the object index stream and
/// the gap segment: a varint count followed by the
/// [`write_u32s_body`] layout.
pub fn write_u32s_compressed(buf: &mut Vec<u8>, values: &[u32]) -> bool {
    write_var_u32(buf, values.len() as u32);
    write_u32s_body(buf, values)
}

pub fn read_u32s_compressed(
    with_fastpfor: bool,
    r: &mut SliceReader,
    out: &mut Vec<u32>,
) -> Result<()> {
    let n = r.read_var_u32()? as usize;
    read_u32s_body(with_fastpfor, n, r, out)
}
