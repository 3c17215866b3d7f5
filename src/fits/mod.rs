//! Minimal FITS reader/writer for single-image archive files.
//!
//! Reads the image HDU of a file (plain or tile-compressed), and writes it
//! back as an uncompressed 32-bit float image. Every other HDU, and every
//! non-structural header card, is written back unchanged.

pub mod header;
mod rice;
mod tiled;

use std::{fs, io::Write, path::Path};

use byteorder::{BigEndian, ByteOrder};
use ndarray::Array2;
use tempfile::NamedTempFile;
use thiserror::Error;

use header::{padded, Card, Header, Value};

pub const BLOCK_SIZE: usize = 2880;

/// Logical card set on HDUs whose pixels have been normalized.
pub const MARKER_KEYWORD: &str = "NORMALIZ";

#[derive(Debug, Error)]
pub enum FitsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a valid FITS file: {0}")]
    InvalidFormat(String),

    #[error("missing header keyword {0}")]
    MissingKeyword(String),

    #[error("unsupported BITPIX {0}")]
    UnsupportedBitpix(i64),

    #[error("unsupported {0}")]
    Unsupported(String),

    #[error("decompression failed: {0}")]
    Decompress(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hdu {
    pub header: Header,
    /// Data unit without its block padding.
    pub data: Vec<u8>,
}

impl Hdu {
    fn is_image(&self) -> bool {
        if tiled::is_compressed(&self.header) {
            return true;
        }

        let extension = self.header.text("XTENSION");
        let image_kind = extension.is_none() || extension.as_deref() == Some("IMAGE");
        image_kind && self.header.int("NAXIS") == Some(2) && !self.data.is_empty()
    }
}

/// The image of one HDU, decoded to physical values, and the header it came from.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub index: usize,
    pub header: Header,
    pub data: Array2<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitsFile {
    hdus: Vec<Hdu>,
    /// Bytes after the last HDU, kept as-is.
    trailer: Vec<u8>,
}

impl FitsFile {
    pub fn read(path: &Path) -> Result<Self, FitsError> {
        let bytes = fs::read(path)?;
        FitsFile::parse(&bytes)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, FitsError> {
        if !bytes.starts_with(b"SIMPLE  =") {
            return Err(FitsError::InvalidFormat("missing SIMPLE card".to_string()));
        }

        let mut hdus = Vec::new();
        let mut offset = 0;

        while offset < bytes.len() {
            let rest = &bytes[offset..];
            if !hdus.is_empty() && !rest.starts_with(b"XTENSION=") {
                break;
            }

            let (header, header_len) = Header::parse(rest)?;
            if hdus.is_empty() && header.logical("SIMPLE") != Some(true) {
                return Err(FitsError::InvalidFormat("SIMPLE is not T".to_string()));
            }

            let size = data_size(&header)?;
            let start = header_len;
            let data = rest
                .get(start..start + size)
                .ok_or_else(|| FitsError::InvalidFormat("data unit is truncated".to_string()))?
                .to_vec();

            offset += (start + padded(size)).min(rest.len());
            hdus.push(Hdu { header, data });
        }

        Ok(FitsFile {
            hdus,
            trailer: bytes[offset.min(bytes.len())..].to_vec(),
        })
    }

    pub fn hdus(&self) -> &[Hdu] {
        &self.hdus
    }

    /// Index of the first HDU carrying a two-dimensional image.
    pub fn image_hdu_index(&self) -> Option<usize> {
        self.hdus.iter().position(Hdu::is_image)
    }

    /// Whether any HDU carries the normalization marker.
    pub fn is_normalized(&self) -> bool {
        self.hdus
            .iter()
            .any(|hdu| hdu.header.logical(MARKER_KEYWORD) == Some(true))
    }

    /// Decodes the first image HDU of the file.
    pub fn payload(&self) -> Result<ImagePayload, FitsError> {
        let index = self
            .image_hdu_index()
            .ok_or_else(|| FitsError::InvalidFormat("no image HDU".to_string()))?;

        Ok(ImagePayload {
            index,
            header: self.hdus[index].header.clone(),
            data: self.image(index)?,
        })
    }

    /// Decodes the image of HDU `index` to physical values; blanks become NaN.
    pub fn image(&self, index: usize) -> Result<Array2<f64>, FitsError> {
        let hdu = self
            .hdus
            .get(index)
            .ok_or_else(|| FitsError::InvalidFormat(format!("no HDU {}", index)))?;

        let (rows, cols, pixels) = if tiled::is_compressed(&hdu.header) {
            tiled::decode(&hdu.header, &hdu.data)?
        } else {
            decode_image(&hdu.header, &hdu.data)?
        };

        Array2::from_shape_vec((rows, cols), pixels)
            .map_err(|e| FitsError::InvalidFormat(e.to_string()))
    }

    /// Replaces HDU `index` with an uncompressed 32-bit float image of `pixels`.
    pub fn replace_image(&mut self, index: usize, pixels: &Array2<f64>) -> Result<(), FitsError> {
        let extended = self.hdus.len() > 1;
        let hdu = self
            .hdus
            .get_mut(index)
            .ok_or_else(|| FitsError::InvalidFormat(format!("no HDU {}", index)))?;
        let (rows, cols) = pixels.dim();

        let mut header = Header::default();
        if index == 0 {
            header.push(Card::new("SIMPLE", &Value::Logical(true), None));
        } else {
            header.push(Card::new("XTENSION", &Value::Text("IMAGE".to_string()), None));
        }
        header.push(Card::new("BITPIX", &Value::Integer(-32), None));
        header.push(Card::new("NAXIS", &Value::Integer(2), None));
        header.push(Card::new("NAXIS1", &Value::Integer(cols as i64), None));
        header.push(Card::new("NAXIS2", &Value::Integer(rows as i64), None));
        if index == 0 {
            if extended || hdu.header.contains("EXTEND") {
                header.push(Card::new("EXTEND", &Value::Logical(true), None));
            }
        } else {
            header.push(Card::new("PCOUNT", &Value::Integer(0), None));
            header.push(Card::new("GCOUNT", &Value::Integer(1), None));
        }

        for card in hdu.header.cards() {
            if !is_structural(card.keyword()) {
                header.push(card.clone());
            }
        }
        header.set(
            MARKER_KEYWORD,
            Value::Logical(true),
            Some("pixel values normalized"),
        );

        let mut data = vec![0u8; rows * cols * 4];
        for (chunk, value) in data.chunks_exact_mut(4).zip(pixels.iter()) {
            BigEndian::write_f32(chunk, *value as f32);
        }

        *hdu = Hdu { header, data };
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();

        for hdu in &self.hdus {
            bytes.extend_from_slice(&hdu.header.encode());
            bytes.extend_from_slice(&hdu.data);
            bytes.resize(padded(bytes.len()), 0);
        }
        bytes.extend_from_slice(&self.trailer);

        bytes
    }

    /// Writes the file through a temporary sibling renamed onto `path`.
    pub fn write_atomic(&self, path: &Path) -> Result<(), FitsError> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&self.to_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;

        Ok(())
    }
}

// Size in bytes of the data unit described by `header`, without padding
fn data_size(header: &Header) -> Result<usize, FitsError> {
    let bitpix = header.required_int("BITPIX")?;
    if ![8, 16, 32, 64, -32, -64].contains(&bitpix) {
        return Err(FitsError::UnsupportedBitpix(bitpix));
    }

    let naxis = header.required_int("NAXIS")?;
    if naxis == 0 {
        return Ok(0);
    }

    let mut elements: usize = 1;
    for i in 1..=naxis {
        let len = header.required_int(&format!("NAXIS{}", i))?;
        elements = usize::try_from(len)
            .ok()
            .and_then(|len| elements.checked_mul(len))
            .ok_or_else(|| FitsError::InvalidFormat(format!("NAXIS{} = {}", i, len)))?;
    }

    let pcount = header.int("PCOUNT").unwrap_or(0).max(0) as usize;
    let gcount = header.int("GCOUNT").unwrap_or(1).max(1) as usize;

    elements
        .checked_add(pcount)
        .and_then(|n| n.checked_mul(gcount))
        .and_then(|n| n.checked_mul(bitpix.unsigned_abs() as usize / 8))
        .ok_or_else(|| FitsError::InvalidFormat("data unit too large".to_string()))
}

fn decode_image(header: &Header, data: &[u8]) -> Result<(usize, usize, Vec<f64>), FitsError> {
    if header.int("NAXIS") != Some(2) {
        return Err(FitsError::Unsupported("image that is not two-dimensional".to_string()));
    }
    let cols = header.required_int("NAXIS1")? as usize;
    let rows = header.required_int("NAXIS2")? as usize;
    let bitpix = header.required_int("BITPIX")?;

    let bscale = header.real("BSCALE").unwrap_or(1.0);
    let bzero = header.real("BZERO").unwrap_or(0.0);
    let blank = header.int("BLANK");

    let width = bitpix.unsigned_abs() as usize / 8;
    let scaled = |raw: i64| match blank {
        Some(b) if raw == b => f64::NAN,
        _ => raw as f64 * bscale + bzero,
    };

    let pixels = data
        .chunks_exact(width)
        .take(rows * cols)
        .map(|b| match bitpix {
            8 => scaled(b[0] as i64),
            16 => scaled(BigEndian::read_i16(b) as i64),
            32 => scaled(BigEndian::read_i32(b) as i64),
            64 => scaled(BigEndian::read_i64(b)),
            -32 => BigEndian::read_f32(b) as f64 * bscale + bzero,
            _ => BigEndian::read_f64(b) * bscale + bzero,
        })
        .collect();

    Ok((rows, cols, pixels))
}

// Cards describing layout, scaling, compression or checksums of the old data unit
fn is_structural(keyword: &str) -> bool {
    const EXACT: &[&str] = &[
        "SIMPLE", "XTENSION", "BITPIX", "NAXIS", "PCOUNT", "GCOUNT", "EXTEND", "TFIELDS",
        "THEAP", "BSCALE", "BZERO", "BLANK", "CHECKSUM", "DATASUM", "END", MARKER_KEYWORD,
    ];
    const INDEXED: &[&str] = &[
        "NAXIS", "TTYPE", "TFORM", "TUNIT", "TSCAL", "TZERO", "TNULL", "TDISP", "TDIM",
    ];

    if EXACT.contains(&keyword) {
        return true;
    }

    let indexed = INDEXED.iter().any(|prefix| {
        keyword
            .strip_prefix(prefix)
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
    });

    indexed || is_compression_keyword(keyword)
}

fn is_compression_keyword(keyword: &str) -> bool {
    const EXACT: &[&str] = &[
        "ZIMAGE", "ZCMPTYPE", "ZBITPIX", "ZNAXIS", "ZQUANTIZ", "ZDITHER0", "ZSIMPLE",
        "ZEXTEND", "ZBLOCKED", "ZTENSION", "ZPCOUNT", "ZGCOUNT", "ZHECKSUM", "ZDATASUM",
        "ZBLANK", "ZMASKCMP",
    ];
    const INDEXED: &[&str] = &["ZNAXIS", "ZTILE", "ZNAME", "ZVAL"];

    EXACT.contains(&keyword)
        || INDEXED.iter().any(|prefix| {
            keyword
                .strip_prefix(prefix)
                .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        })
}

// -- Tests -------------------------------------------------------------------
