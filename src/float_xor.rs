//! Floating point compression after the scheme described in
//! <http://www.vldb.org/pvldb/vol8/p1816-teller.pdf>, for 32-bit floats.
//!
//! The first value is stored as its raw bit pattern. Every later value is
//! XORed with its predecessor: a zero XOR is a single `0` bit; otherwise a
//! `1` bit is followed by either `0` and the meaningful bits inside the
//! previous leading/trailing-zero window, or `1`, a 5-bit leading-zero
//! count, a 5-bit meaningful-bit count (`0` encodes 32) and the meaningful
//! bits at their own position.

use anyhow::{ensure, Result};

use crate::bits::{BitReader, BitWriter};
use crate::wire::SliceReader;

pub fn compress(values: &[f32], buf: &mut Vec<u8>) {
    let Some(&first) = values.first() else {
        return;
    };
    let mut bw = BitWriter::new(buf);
    let mut prev = first.to_bits();
    bw.write(prev, 32);

    // so that the first window-reuse comparison fails
    let mut prev_lz = 100u32;
    let mut prev_tz = 0u32;

    for &value in &values[1..] {
        let v = value.to_bits();
        let xor = v ^ prev;
        if xor == 0 {
            bw.write(0, 1);
        } else {
            bw.write(1, 1);
            let lz = xor.leading_zeros();
            let tz = xor.trailing_zeros();
            if lz >= prev_lz && tz >= prev_tz && lz < prev_lz + 7 {
                // meaningful bits fall inside the previous window
                bw.write(0, 1);
                bw.write(xor >> prev_tz, 32 - prev_lz - prev_tz);
            } else {
                let mb = 32 - lz - tz;
                bw.write(1, 1);
                bw.write(lz, 5);
                bw.write(mb, 5);
                bw.write(xor >> tz, mb);
                prev_lz = lz;
                prev_tz = tz;
            }
        }
        prev = v;
    }
    bw.flush();
}

/// Decompresses `n` floats, appending them to `out`. The reader is left
/// just past the whole 64-bit words the stream occupies.
pub fn decompress(
    r: &mut SliceReader,
    n: usize,
    out: &mut Vec<f32>,
) -> Result<()> {
    if n == 0 {
        return Ok(());
    }
    ensure!(n <= 1 + r.remaining() * 8, "float stream shorter than its count");
    out.reserve(n);
    let mut br = BitReader::new(r);
    let mut v = br.read(32)?;
    out.push(f32::from_bits(v));

    let mut lz = 0u32;
    let mut tz = 0u32;
    let mut mb = 0u32;

    for _ in 1..n {
        if br.read(1)? == 0 {
            // same as the previous value
            out.push(f32::from_bits(v));
            continue;
        }
        if br.read(1)? == 1 {
            lz = br.read(5)?;
            mb = br.read(5)?;
            if mb == 0 {
                mb = 32;
            }
            ensure!(lz + mb <= 32, "invalid float window ({} lz, {} bits)", lz, mb);
            tz = 32 - lz - mb;
        }
        v ^= br.read(mb)? << tz;
        out.push(f32::from_bits(v));
    }
    Ok(())
}
