//! Tile-compressed images stored in binary tables (`ZIMAGE = T`).
//!
//! Each table row holds one compressed tile in the heap, addressed by a
//! variable-length array descriptor. Quantized float images carry per-tile
//! `ZSCALE`/`ZZERO` columns and may be dithered.

use std::{io::Read, sync::OnceLock};

use byteorder::{BigEndian, ByteOrder};
use flate2::read::GzDecoder;

use super::{header::Header, rice, FitsError};

const N_RANDOM: usize = 10_000;
/// Upper bound on decoded pixels per stored byte; no tile codec compresses further.
const MAX_PIXELS_PER_BYTE: usize = 1024;
/// Quantized value standing for an exact zero under `SUBTRACTIVE_DITHER_2`.
const ZERO_VALUE: i64 = -2_147_483_646;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Quantize {
    None,
    Dither1,
    Dither2,
}

#[derive(Debug, Clone, Copy)]
struct Column {
    offset: usize,
    width: usize,
    kind: char,
}

struct Table<'a> {
    rows: &'a [u8],
    heap: &'a [u8],
    row_len: usize,
}

impl Table<'_> {
    fn row(&self, index: usize) -> Result<&[u8], FitsError> {
        self.rows
            .get(index * self.row_len..(index + 1) * self.row_len)
            .ok_or_else(|| FitsError::InvalidFormat(format!("missing table row {}", index)))
    }

    // Heap bytes addressed by a P or Q descriptor
    fn heap_array(&self, row: &[u8], column: Column) -> Result<&[u8], FitsError> {
        let (count, offset) = match column.kind {
            'P' => (
                BigEndian::read_u32(&row[column.offset..]) as usize,
                BigEndian::read_u32(&row[column.offset + 4..]) as usize,
            ),
            _ => (
                BigEndian::read_u64(&row[column.offset..]) as usize,
                BigEndian::read_u64(&row[column.offset + 8..]) as usize,
            ),
        };

        offset
            .checked_add(count)
            .and_then(|end| self.heap.get(offset..end))
            .ok_or_else(|| FitsError::InvalidFormat("tile descriptor outside heap".to_string()))
    }

    fn double(&self, row: &[u8], column: Column) -> f64 {
        BigEndian::read_f64(&row[column.offset..])
    }

    fn int(&self, row: &[u8], column: Column) -> i64 {
        BigEndian::read_i32(&row[column.offset..]) as i64
    }
}

pub fn is_compressed(header: &Header) -> bool {
    header.text("XTENSION").as_deref() == Some("BINTABLE")
        && header.logical("ZIMAGE") == Some(true)
}

/// Decodes a compressed image HDU into `(rows, cols, pixels)` in row-major order.
pub fn decode(header: &Header, data: &[u8]) -> Result<(usize, usize, Vec<f64>), FitsError> {
    let zbitpix = header.required_int("ZBITPIX")?;
    let znaxis = header.required_int("ZNAXIS")?;
    if znaxis != 2 {
        return Err(FitsError::Unsupported(format!("{}-dimensional image", znaxis)));
    }
    let width = positive(header, "ZNAXIS1")?;
    let height = positive(header, "ZNAXIS2")?;
    let total = width
        .checked_mul(height)
        .filter(|n| *n <= data.len().saturating_mul(MAX_PIXELS_PER_BYTE))
        .ok_or_else(|| {
            FitsError::InvalidFormat(format!(
                "{}x{} image cannot fit in {} bytes of tiles",
                width,
                height,
                data.len()
            ))
        })?;
    let tile_w = header.int("ZTILE1").map(|v| v as usize).unwrap_or(width).max(1);
    let tile_h = header.int("ZTILE2").map(|v| v as usize).unwrap_or(1).max(1);

    let cmptype = header
        .text("ZCMPTYPE")
        .ok_or_else(|| FitsError::MissingKeyword("ZCMPTYPE".to_string()))?;
    let block_size = compression_param(header, "BLOCKSIZE").unwrap_or(32) as usize;
    let bytepix = compression_param(header, "BYTEPIX")
        .map(|v| v as usize)
        .unwrap_or(match zbitpix {
            8 => 1,
            16 => 2,
            _ => 4,
        });

    let row_len = header.required_int("NAXIS1")? as usize;
    let nrows = header.required_int("NAXIS2")? as usize;
    let heap_start = header
        .int("THEAP")
        .map(|v| v as usize)
        .unwrap_or(row_len * nrows);
    let table = Table {
        rows: data
            .get(..row_len * nrows)
            .ok_or_else(|| FitsError::InvalidFormat("truncated table".to_string()))?,
        heap: data.get(heap_start..).unwrap_or(&[]),
        row_len,
    };

    let columns = columns(header)?;
    if columns.iter().any(|(_, c)| c.offset + c.width > row_len) {
        return Err(FitsError::InvalidFormat("columns wider than table row".to_string()));
    }
    let find = |name: &str| columns.iter().find(|(n, _)| n == name).map(|(_, c)| *c);
    let compressed = find("COMPRESSED_DATA");
    let gzip = find("GZIP_COMPRESSED_DATA");
    let zscale = find("ZSCALE");
    let zzero = find("ZZERO");
    let zblank_col = find("ZBLANK");

    let quantized = zbitpix < 0 && zscale.is_some() && zzero.is_some();
    let quantize = match header.text("ZQUANTIZ").as_deref() {
        None | Some("NO_DITHER") => Quantize::None,
        Some("SUBTRACTIVE_DITHER_1") => Quantize::Dither1,
        Some("SUBTRACTIVE_DITHER_2") => Quantize::Dither2,
        Some(other) => return Err(FitsError::Unsupported(format!("ZQUANTIZ {}", other))),
    };
    let zdither0 = header.int("ZDITHER0").unwrap_or(1);
    let zblank = header.int("ZBLANK").or_else(|| header.int("BLANK"));
    let bscale = header.real("BSCALE").unwrap_or(1.0);
    let bzero = header.real("BZERO").unwrap_or(0.0);

    let tiles_x = width.div_ceil(tile_w);
    let tiles_y = height.div_ceil(tile_h);
    if tiles_x * tiles_y != nrows {
        return Err(FitsError::InvalidFormat(format!(
            "expected {} tiles, table has {} rows",
            tiles_x * tiles_y,
            nrows
        )));
    }

    let mut pixels = Vec::new();
    pixels
        .try_reserve_exact(total)
        .map_err(|e| FitsError::InvalidFormat(format!("{}x{} image: {}", width, height, e)))?;
    pixels.resize(total, f64::NAN);

    for tile in 0..nrows {
        let x0 = (tile % tiles_x) * tile_w;
        let y0 = (tile / tiles_x) * tile_h;
        let tw = tile_w.min(width - x0);
        let th = tile_h.min(height - y0);
        let count = tw * th;
        let row = table.row(tile)?;

        let rice_bytes = match compressed {
            Some(column) => table.heap_array(row, column)?,
            None => &[],
        };

        let values: Vec<f64> = if !rice_bytes.is_empty() {
            let raw = match cmptype.as_str() {
                "RICE_1" | "RICE_ONE" => rice::decompress(rice_bytes, count, block_size, bytepix)?,
                "GZIP_1" | "GZIP_2" => {
                    let pixel_width = if quantized {
                        4
                    } else {
                        (zbitpix.unsigned_abs() / 8) as usize
                    };
                    let bytes = gunzip(rice_bytes, cmptype == "GZIP_2", pixel_width, count)?;
                    integers(&bytes, pixel_width, count)?
                }
                other => return Err(FitsError::Unsupported(format!("compression {}", other))),
            };

            let null = zblank_col.map(|c| table.int(row, c)).or(zblank);

            if quantized {
                let scale = zscale.map(|c| table.double(row, c)).unwrap_or(1.0);
                let zero = zzero.map(|c| table.double(row, c)).unwrap_or(0.0);
                unquantize(&raw, scale, zero, quantize, seed(tile, zdither0), null)
            } else {
                raw.iter()
                    .map(|&v| match null {
                        Some(n) if v == n => f64::NAN,
                        _ => v as f64 * bscale + bzero,
                    })
                    .collect()
            }
        } else if let Some(column) = gzip {
            // Tiles that could not be quantized are stored losslessly
            let bytes = gunzip(table.heap_array(row, column)?, false, 0, count)?;
            floats(&bytes, zbitpix, count)?
        } else {
            return Err(FitsError::InvalidFormat(format!("tile {} has no data", tile)));
        };

        if values.len() != count {
            return Err(FitsError::Decompress(format!(
                "tile {} decoded to {} pixels, expected {}",
                tile,
                values.len(),
                count
            )));
        }

        for (dy, line) in values.chunks(tw).enumerate() {
            let start = (y0 + dy) * width + x0;
            pixels[start..start + tw].copy_from_slice(line);
        }
    }

    Ok((height, width, pixels))
}

fn positive(header: &Header, keyword: &str) -> Result<usize, FitsError> {
    match header.required_int(keyword)? {
        v if v > 0 => Ok(v as usize),
        v => Err(FitsError::InvalidFormat(format!("{} = {}", keyword, v))),
    }
}

// ZNAMEi/ZVALi pairs
fn compression_param(header: &Header, name: &str) -> Option<i64> {
    (1..)
        .map_while(|i| header.text(&format!("ZNAME{}", i)).map(|n| (i, n)))
        .find(|(_, n)| n.eq_ignore_ascii_case(name))
        .and_then(|(i, _)| header.int(&format!("ZVAL{}", i)))
}

// Name and byte offset of every table column
fn columns(header: &Header) -> Result<Vec<(String, Column)>, FitsError> {
    let fields = header.required_int("TFIELDS")?;
    let mut offset = 0;
    let mut columns = Vec::new();

    for i in 1..=fields {
        let tform = header
            .text(&format!("TFORM{}", i))
            .ok_or_else(|| FitsError::MissingKeyword(format!("TFORM{}", i)))?;
        let name = header.text(&format!("TTYPE{}", i)).unwrap_or_default();

        let digits: String = tform.chars().take_while(|c| c.is_ascii_digit()).collect();
        let repeat: usize = if digits.is_empty() { 1 } else { digits.parse().unwrap_or(1) };
        let kind = tform[digits.len()..]
            .chars()
            .next()
            .ok_or_else(|| FitsError::InvalidFormat(format!("TFORM{} = '{}'", i, tform)))?;

        let width = match kind {
            'L' | 'B' | 'A' => repeat,
            'X' => repeat.div_ceil(8),
            'I' => 2 * repeat,
            'J' | 'E' => 4 * repeat,
            'K' | 'D' | 'C' | 'P' => 8 * repeat,
            'M' | 'Q' => 16 * repeat,
            other => {
                return Err(FitsError::InvalidFormat(format!("column type '{}'", other)));
            }
        };

        columns.push((name.trim().to_uppercase(), Column { offset, width, kind }));
        offset += width;
    }

    Ok(columns)
}

// At most `count` pixels of up to 8 bytes are read from the stream
fn gunzip(
    bytes: &[u8],
    shuffled: bool,
    width: usize,
    count: usize,
) -> Result<Vec<u8>, FitsError> {
    let mut out = Vec::new();
    GzDecoder::new(bytes)
        .take((count * 8) as u64)
        .read_to_end(&mut out)
        .map_err(|e| FitsError::Decompress(format!("gzip tile: {}", e)))?;

    if shuffled && width > 1 {
        let n = out.len() / width;
        let mut plain = vec![0u8; out.len()];
        for (i, value) in plain.chunks_exact_mut(width).enumerate() {
            for (j, byte) in value.iter_mut().enumerate() {
                *byte = out[j * n + i];
            }
        }
        out = plain;
    }

    Ok(out)
}

fn integers(bytes: &[u8], width: usize, count: usize) -> Result<Vec<i64>, FitsError> {
    if bytes.len() < width * count {
        return Err(FitsError::Decompress("gzip tile too short".to_string()));
    }

    let values = bytes[..width * count].chunks_exact(width).map(|b| match width {
        1 => b[0] as i64,
        2 => BigEndian::read_i16(b) as i64,
        8 => BigEndian::read_i64(b),
        _ => BigEndian::read_i32(b) as i64,
    });

    Ok(values.collect())
}

fn floats(bytes: &[u8], zbitpix: i64, count: usize) -> Result<Vec<f64>, FitsError> {
    let width = if zbitpix == -64 { 8 } else { 4 };
    if bytes.len() < width * count {
        return Err(FitsError::Decompress("gzip tile too short".to_string()));
    }

    let values = bytes[..width * count].chunks_exact(width).map(|b| {
        if width == 8 {
            BigEndian::read_f64(b)
        } else {
            BigEndian::read_f32(b) as f64
        }
    });

    Ok(values.collect())
}

fn seed(tile: usize, zdither0: i64) -> usize {
    (tile as i64 + zdither0 - 1).rem_euclid(N_RANDOM as i64) as usize
}

// Park-Miller sequence shared by every FITS tile compressor for dithering
fn random_values() -> &'static [f32] {
    static VALUES: OnceLock<Vec<f32>> = OnceLock::new();
    VALUES.get_or_init(|| {
        let a = 16807.0_f64;
        let m = 2147483647.0_f64;
        let mut seed = 1.0_f64;

        (0..N_RANDOM)
            .map(|_| {
                let temp = a * seed;
                seed = temp - m * (temp / m).floor();
                (seed / m) as f32
            })
            .collect()
    })
}

fn unquantize(
    raw: &[i64],
    scale: f64,
    zero: f64,
    quantize: Quantize,
    mut iseed: usize,
    null: Option<i64>,
) -> Vec<f64> {
    if quantize == Quantize::None {
        return raw
            .iter()
            .map(|&v| match null {
                Some(n) if v == n => f64::NAN,
                _ => v as f64 * scale + zero,
            })
            .collect();
    }

    let random = random_values();
    let mut next = (random[iseed] * 500.0) as usize;
    let mut out = Vec::with_capacity(raw.len());

    for &v in raw {
        let value = if quantize == Quantize::Dither2 && v == ZERO_VALUE {
            0.0
        } else if null == Some(v) {
            f64::NAN
        } else {
            (v as f64 - random[next] as f64 + 0.5) * scale + zero
        };
        out.push(value);

        next += 1;
        if next == N_RANDOM {
            iseed = (iseed + 1) % N_RANDOM;
            next = (random[iseed] * 500.0) as usize;
        }
    }

    out
}

// -- Tests -------------------------------------------------------------------
