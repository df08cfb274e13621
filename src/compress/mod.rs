//! # Entry Codec Provider
//!
//! Maps a ZIP compression method id to a decompressing reader or an
//! in-memory compressor. The codecs themselves are delegated: `flate2` for
//! DEFLATE, `bzip2` for BZIP2 and `xz2` for LZMA; this module only does the
//! dispatch and the LZMA framing glue.

use std::io::{self, Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Result, ZipError};

/// Compression methods this crate can read and write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// Plain storage without any compression.
    Stored,
    /// DEFLATE, the ZIP default.
    Deflated,
    /// BZIP2 (method 12).
    Bzip2,
    /// LZMA (method 14), stored with the entry-level props header.
    Lzma,
    /// Anything else; listed but refused by the codec provider.
    Unsupported(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflated,
            12 => CompressionMethod::Bzip2,
            14 => CompressionMethod::Lzma,
            other => CompressionMethod::Unsupported(other),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflated => 8,
            CompressionMethod::Bzip2 => 12,
            CompressionMethod::Lzma => 14,
            CompressionMethod::Unsupported(v) => *v,
        }
    }

    pub fn name(&self) -> String {
        match self {
            CompressionMethod::Stored => "stored".into(),
            CompressionMethod::Deflated => "deflate".into(),
            CompressionMethod::Bzip2 => "bzip2".into(),
            CompressionMethod::Lzma => "lzma".into(),
            CompressionMethod::Unsupported(v) => format!("unknown({v})"),
        }
    }
}

/// Options for newly written entries.
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    pub method: CompressionMethod,
    /// Codec-specific level; `None` picks each codec's default.
    pub level: Option<u32>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            method: CompressionMethod::Deflated,
            level: None,
        }
    }
}

/// Compress a whole entry in memory. Entries are buffered because the local
/// file header needs the CRC and both sizes before the data is written.
pub fn compress(method: CompressionMethod, level: Option<u32>, data: &[u8]) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::Stored => Ok(data.to_vec()),
        CompressionMethod::Deflated => {
            let level = flate2::Compression::new(level.unwrap_or(6).min(9));
            let mut encoder = flate2::write::DeflateEncoder::new(Vec::new(), level);
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        CompressionMethod::Bzip2 => {
            let level = bzip2::Compression::new(level.unwrap_or(6).clamp(1, 9));
            let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), level);
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        CompressionMethod::Lzma => compress_lzma(level.unwrap_or(6).min(9), data),
        CompressionMethod::Unsupported(id) => {
            Err(ZipError::Unsupported(format!("compression method {id}")))
        }
    }
}

/// Wrap a raw-data reader in the decompressor for `method`.
///
/// `uncompressed_size` is only needed by the LZMA bridge, which synthesizes
/// the size field of an lzma-alone stream from it.
pub fn decoder<'a, R: Read + 'a>(
    method: CompressionMethod,
    mut reader: R,
    uncompressed_size: u64,
) -> Result<Box<dyn Read + 'a>> {
    match method {
        CompressionMethod::Stored => Ok(Box::new(reader)),
        CompressionMethod::Deflated => Ok(Box::new(flate2::read::DeflateDecoder::new(reader))),
        CompressionMethod::Bzip2 => Ok(Box::new(bzip2::read::BzDecoder::new(reader))),
        CompressionMethod::Lzma => {
            // Entry layout: version(2) + props-size(2) + props, then the raw
            // LZMA1 stream. Rebuild the lzma-alone header liblzma expects:
            // props(5) + uncompressed size(8).
            let _version = reader.read_u16::<LittleEndian>()?;
            let props_size = reader.read_u16::<LittleEndian>()? as usize;
            let mut props = vec![0u8; props_size];
            reader.read_exact(&mut props)?;
            if props_size != 5 {
                return Err(ZipError::Format(format!(
                    "unexpected LZMA properties length {props_size}"
                )));
            }

            let mut alone_header = props;
            alone_header.extend_from_slice(&uncompressed_size.to_le_bytes());

            let stream = xz2::stream::Stream::new_lzma_decoder(u64::MAX)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            let chained = Cursor::new(alone_header).chain(reader);
            Ok(Box::new(xz2::read::XzDecoder::new_stream(chained, stream)))
        }
        CompressionMethod::Unsupported(id) => {
            Err(ZipError::Unsupported(format!("compression method {id}")))
        }
    }
}

/// Compress with LZMA and reframe the lzma-alone output (props + size) into
/// the ZIP entry layout (version + props-size + props).
fn compress_lzma(preset: u32, data: &[u8]) -> Result<Vec<u8>> {
    let options = xz2::stream::LzmaOptions::new_preset(preset)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    let stream = xz2::stream::Stream::new_lzma_encoder(&options)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    let mut encoder = xz2::write::XzEncoder::new_stream(Vec::new(), stream);
    encoder.write_all(data)?;
    let alone = encoder.finish()?;

    if alone.len() < 13 {
        return Err(ZipError::Format("short LZMA stream".into()));
    }

    // 9 and 4 mimic the liblzma version tag other writers emit here.
    let mut out = Vec::with_capacity(alone.len() - 4);
    out.write_u8(9)?;
    out.write_u8(4)?;
    out.write_u16::<LittleEndian>(5)?;
    out.extend_from_slice(&alone[..5]);
    out.extend_from_slice(&alone[13..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(method: CompressionMethod, data: &[u8]) -> Vec<u8> {
        let packed = compress(method, None, data).unwrap();
        let mut out = Vec::new();
        decoder(method, Cursor::new(packed), data.len() as u64)
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn deflate_round_trip() {
        let data = b"the same phrase over and over and over again".repeat(20);
        assert_eq!(round_trip(CompressionMethod::Deflated, &data), data);
    }

    #[test]
    fn lzma_zip_framing_round_trip() {
        let data = b"lzma needs its alone header rebuilt from the entry header".repeat(10);
        let packed = compress(CompressionMethod::Lzma, None, &data).unwrap();
        // version + props-size + 5 props bytes
        assert_eq!(&packed[2..4], &[5, 0]);
        let mut out = Vec::new();
        decoder(CompressionMethod::Lzma, Cursor::new(packed), data.len() as u64)
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn unsupported_method_is_refused() {
        assert!(matches!(
            compress(CompressionMethod::Unsupported(97), None, b""),
            Err(ZipError::Unsupported(_))
        ));
        assert!(decoder(CompressionMethod::Unsupported(97), Cursor::new(vec![]), 0).is_err());
    }
}
