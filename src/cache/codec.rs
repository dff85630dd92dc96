//! L2 value encoding: values above a size threshold are gzip-compressed
//!
//! Encoded layout: one marker byte followed by the payload.

use anyhow::{Context, Result, bail};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};

const RAW: u8 = 0;
const GZIP: u8 = 1;

/// Encode `data`, compressing when it exceeds `threshold` bytes
pub fn encode(data: &[u8], threshold: usize) -> Result<Vec<u8>> {
    if data.len() <= threshold {
        let mut out = Vec::with_capacity(data.len() + 1);
        out.push(RAW);
        out.extend_from_slice(data);
        return Ok(out);
    }

    let mut encoder = GzEncoder::new(vec![GZIP], Compression::fast());
    encoder
        .write_all(data)
        .context("Failed to compress cache value")?;
    let out = encoder.finish().context("Failed to finish gzip stream")?;
    Ok(out)
}

/// Reverse of [`encode`]
pub fn decode(encoded: &[u8]) -> Result<Vec<u8>> {
    match encoded.split_first() {
        Some((&RAW, rest)) => Ok(rest.to_vec()),
        Some((&GZIP, rest)) => {
            let mut out = Vec::with_capacity(rest.len() * 4);
            GzDecoder::new(rest)
                .read_to_end(&mut out)
                .context("Failed to decompress cache value")?;
            Ok(out)
        }
        Some((marker, _)) => bail!("unknown cache encoding marker {marker}"),
        None => bail!("empty cache value"),
    }
}

/// Whether an encoded value was stored compressed
#[must_use]
pub fn is_compressed(encoded: &[u8]) -> bool {
    encoded.first() == Some(&GZIP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_values_stay_raw() {
        let encoded = encode(b"{\"a\":1}", 64).expect("encode");
        assert!(!is_compressed(&encoded));
        assert_eq!(decode(&encoded).expect("decode"), b"{\"a\":1}");
    }

    #[test]
    fn large_values_are_compressed() {
        let data = "x".repeat(10_000);
        let encoded = encode(data.as_bytes(), 4096).expect("encode");
        assert!(is_compressed(&encoded));
        assert!(encoded.len() < data.len() / 10);
        assert_eq!(decode(&encoded).expect("decode"), data.as_bytes());
    }

    #[test]
    fn unknown_marker_is_an_error() {
        assert!(decode(&[9, 1, 2]).is_err());
        assert!(decode(&[]).is_err());
    }
}
