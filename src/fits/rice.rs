//! Rice decompression of tile-compressed images (`RICE_1`).
//!
//! Each tile starts with the first pixel verbatim, followed by blocks of
//! `block_size` pixel differences. Every block opens with a code selecting
//! its split: all-zero differences, raw differences, or a Rice code with
//! `fs` low bits.

use super::FitsError;

struct Params {
    fs_bits: i32,
    fs_max: i32,
    bits: i32,
}

impl Params {
    fn for_bytepix(bytepix: usize) -> Result<Self, FitsError> {
        match bytepix {
            1 => Ok(Params { fs_bits: 3, fs_max: 6, bits: 8 }),
            2 => Ok(Params { fs_bits: 4, fs_max: 14, bits: 16 }),
            4 => Ok(Params { fs_bits: 5, fs_max: 25, bits: 32 }),
            other => Err(FitsError::Unsupported(format!("Rice BYTEPIX {}", other))),
        }
    }
}

struct Bytes<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Bytes<'_> {
    fn next(&mut self) -> Result<u32, FitsError> {
        let byte = self
            .input
            .get(self.pos)
            .ok_or_else(|| FitsError::Decompress("Rice stream ended early".to_string()))?;
        self.pos += 1;
        Ok(*byte as u32)
    }
}

/// Decodes `count` pixels of `bytepix` bytes each.
///
/// 8-bit pixels are unsigned, 16- and 32-bit pixels signed.
pub fn decompress(
    input: &[u8],
    count: usize,
    block_size: usize,
    bytepix: usize,
) -> Result<Vec<i64>, FitsError> {
    let params = Params::for_bytepix(bytepix)?;
    if block_size == 0 {
        return Err(FitsError::Decompress("Rice block size is zero".to_string()));
    }

    let mut bytes = Bytes { input, pos: 0 };
    let mut last: u32 = 0;
    for _ in 0..bytepix {
        last = (last << 8) | bytes.next()?;
    }

    let mut out = Vec::with_capacity(count);
    if count == 0 {
        return Ok(out);
    }

    let mut b = bytes.next()?;
    let mut nbits: i32 = 8;

    while out.len() < count {
        nbits -= params.fs_bits;
        while nbits < 0 {
            b = (b << 8) | bytes.next()?;
            nbits += 8;
        }
        let fs = (b >> nbits) as i32 - 1;
        b &= low_mask(nbits);

        let block_end = (out.len() + block_size).min(count);

        if fs < 0 {
            // Low entropy: every difference in the block is zero
            while out.len() < block_end {
                out.push(extend(last, bytepix));
            }
        } else if fs == params.fs_max {
            // High entropy: differences stored raw
            while out.len() < block_end {
                let mut k = params.bits - nbits;
                let mut diff = (b as u64) << k;
                k -= 8;
                while k >= 0 {
                    b = bytes.next()?;
                    diff |= (b as u64) << k;
                    k -= 8;
                }
                if nbits > 0 {
                    b = bytes.next()?;
                    diff |= (b as u64) >> (-k);
                    b &= low_mask(nbits);
                } else {
                    b = 0;
                }

                last = next_pixel(last, diff as u32, params.bits);
                out.push(extend(last, bytepix));
            }
        } else {
            while out.len() < block_end {
                while b == 0 {
                    nbits += 8;
                    b = bytes.next()?;
                }
                let nzero = nbits - (32 - b.leading_zeros()) as i32;
                nbits -= nzero + 1;
                b ^= 1 << nbits;
                nbits -= fs;
                while nbits < 0 {
                    b = (b << 8) | bytes.next()?;
                    nbits += 8;
                }
                let diff = ((nzero as u32) << fs) | (b >> nbits);
                b &= low_mask(nbits);

                last = next_pixel(last, diff, params.bits);
                out.push(extend(last, bytepix));
            }
        }
    }

    Ok(out)
}

fn low_mask(nbits: i32) -> u32 {
    if nbits >= 32 {
        u32::MAX
    } else {
        (1u32 << nbits) - 1
    }
}

// Undo the zig-zag mapping of a difference and add it to the previous pixel
fn next_pixel(last: u32, diff: u32, bits: i32) -> u32 {
    let delta = if diff & 1 == 0 { diff >> 1 } else { !(diff >> 1) };
    delta.wrapping_add(last) & low_mask(bits)
}

fn extend(value: u32, bytepix: usize) -> i64 {
    match bytepix {
        1 => value as u8 as i64,
        2 => value as u16 as i16 as i64,
        _ => value as i32 as i64,
    }
}

// -- Tests -------------------------------------------------------------------
