// ========================================================================================
//
//                     Container and per-variant header parsing
//
// ========================================================================================
//
// The container header fixes, once per file, which of the two block layouts every
// variant uses. Nothing is re-detected per variant.

use crate::bits::ByteCursor;
use crate::error::{BgenError, Result};
use std::io::{self, Read};
use std::path::Path;

/// Size of the fixed part of the header block (length, variant count, sample count,
/// magic and flags).
const FIXED_HEADER_BYTES: u32 = 20;
const COMPRESSION_MASK: u32 = 0b11;
const LAYOUT_SHIFT: u32 = 2;
const LAYOUT_MASK: u32 = 0b1111;
const SAMPLE_IDENTIFIERS_FLAG: u32 = 1 << 31;

/// Stored probabilities per sample in the fixed layout: all three, 16 bits each.
pub const FIXED_LAYOUT_CATEGORIES: usize = 3;
pub const FIXED_LAYOUT_BYTES_PER_SAMPLE: usize = FIXED_LAYOUT_CATEGORIES * 2;
/// Converts a fixed-layout 16-bit integer to a probability.
pub const FIXED_LAYOUT_SCALE: f64 = 32767.0;

const PLOIDY_MASK: u8 = 0x3F;
const SAMPLE_MISSING_FLAG: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionKind {
    None,
    /// zlib-wrapped deflate.
    Zlib,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockLayout {
    /// Layouts 0 and 1: three 16-bit probabilities per sample, no block header.
    Fixed,
    /// Layout 2: block header, per-sample ploidy and a variable bit depth.
    Variable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub variant_count: u32,
    pub sample_count: u32,
    pub layout_version: u32,
    pub layout: BlockLayout,
    pub compression: CompressionKind,
    pub has_sample_identifier_block: bool,
    /// Offset of the first variant block, relative to byte 4 of the file.
    pub data_offset: u32,
    pub header_length: u32,
}

impl ContainerHeader {
    /// Reads the header from the start of a container.
    pub fn read<R: Read>(reader: &mut R, path: &Path) -> Result<Self> {
        let data_offset = read_u32(reader, path, "data offset")?;
        let header_length = read_u32(reader, path, "header length")?;
        if header_length < FIXED_HEADER_BYTES {
            return Err(BgenError::container(
                path,
                format!("header length {header_length} is shorter than the {FIXED_HEADER_BYTES} fixed header bytes"),
            ));
        }
        if data_offset < header_length {
            return Err(BgenError::container(
                path,
                format!("data offset {data_offset} points inside the {header_length}-byte header"),
            ));
        }
        let variant_count = read_u32(reader, path, "variant count")?;
        let sample_count = read_u32(reader, path, "sample count")?;

        let mut magic = [0u8; 4];
        read_exact(reader, &mut magic, path, "magic number")?;
        if &magic != b"bgen" && magic != [0u8; 4] {
            return Err(BgenError::container(
                path,
                format!("incorrect magic number {magic:?}; expected \"bgen\" or four zero bytes"),
            ));
        }

        let mut free_data = vec![0u8; (header_length - FIXED_HEADER_BYTES) as usize];
        read_exact(reader, &mut free_data, path, "free header data")?;
        let flags = read_u32(reader, path, "flags")?;

        Self::from_parts(path, data_offset, header_length, variant_count, sample_count, flags)
    }

    fn from_parts(
        path: &Path,
        data_offset: u32,
        header_length: u32,
        variant_count: u32,
        sample_count: u32,
        flags: u32,
    ) -> Result<Self> {
        let compression = match flags & COMPRESSION_MASK {
            0 => CompressionKind::None,
            1 => CompressionKind::Zlib,
            2 => {
                return Err(BgenError::container(
                    path,
                    "zstd-compressed variant blocks (compression flag 2) are not supported",
                ));
            }
            other => {
                return Err(BgenError::container(
                    path,
                    format!("unknown compression flag {other}"),
                ));
            }
        };
        let layout_version = (flags >> LAYOUT_SHIFT) & LAYOUT_MASK;
        let layout = match layout_version {
            0 | 1 => BlockLayout::Fixed,
            2 => BlockLayout::Variable,
            other => {
                return Err(BgenError::container(
                    path,
                    format!("unknown block layout {other}"),
                ));
            }
        };
        Ok(Self {
            variant_count,
            sample_count,
            layout_version,
            layout,
            compression,
            has_sample_identifier_block: flags & SAMPLE_IDENTIFIERS_FLAG != 0,
            data_offset,
            header_length,
        })
    }

    /// File offset of the first variant's identifying data.
    #[inline]
    pub fn first_variant_offset(&self) -> u64 {
        u64::from(self.data_offset) + 4
    }

    /// File offset of the sample identifier block, when present.
    #[inline]
    pub fn sample_block_offset(&self) -> u64 {
        u64::from(self.header_length) + 4
    }
}

/// Reads the sample identifier block. The reader must be positioned at
/// [`ContainerHeader::sample_block_offset`].
pub fn read_sample_identifiers<R: Read>(
    reader: &mut R,
    header: &ContainerHeader,
    path: &Path,
) -> Result<Vec<String>> {
    let block_size = read_u32(reader, path, "sample block size")?;
    let declared = read_u32(reader, path, "sample block count")?;
    if declared != header.sample_count {
        return Err(BgenError::container(
            path,
            format!(
                "sample block lists {declared} samples but the header declares {}",
                header.sample_count
            ),
        ));
    }
    let mut consumed: u64 = 8;
    let mut identifiers = Vec::with_capacity(declared as usize);
    let mut len_buf = [0u8; 2];
    for _ in 0..declared {
        read_exact(reader, &mut len_buf, path, "sample identifier length")?;
        let len = u16::from_le_bytes(len_buf) as usize;
        let mut raw = vec![0u8; len];
        read_exact(reader, &mut raw, path, "sample identifier")?;
        consumed += 2 + len as u64;
        identifiers.push(String::from_utf8_lossy(&raw).into_owned());
    }
    if consumed != u64::from(block_size) {
        return Err(BgenError::container(
            path,
            format!("sample block declares {block_size} bytes but {consumed} were consumed"),
        ));
    }
    Ok(identifiers)
}

/// The preamble of a layout-2 genotype block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantBlockHeader {
    pub sample_count: u32,
    pub allele_count: u16,
    pub ploidy_min: u8,
    pub ploidy_max: u8,
    pub phased: bool,
    pub bits_per_probability: u8,
}

/// A parsed layout-2 block: the header, the per-sample ploidy bytes and the packed
/// probability stream that follows them.
#[derive(Debug)]
pub struct VariableBlock<'a> {
    pub header: VariantBlockHeader,
    pub ploidy: &'a [u8],
    pub probabilities: &'a [u8],
}

impl<'a> VariableBlock<'a> {
    pub fn parse(payload: &'a [u8], expected_samples: u32) -> Result<Self> {
        let mut cursor = ByteCursor::new(payload);
        cursor.require(8, "block header")?;
        let sample_count = cursor.read_u32("sample count")?;
        if sample_count != expected_samples {
            return Err(BgenError::variant(format!(
                "block declares {sample_count} samples but the container has {expected_samples}"
            )));
        }
        let allele_count = cursor.read_u16("allele count")?;
        let ploidy_min = cursor.read_u8("minimum ploidy")?;
        let ploidy_max = cursor.read_u8("maximum ploidy")?;
        let ploidy = cursor.take(sample_count as usize, "per-sample ploidy")?;
        let phased = cursor.read_u8("phased flag")? & 0x1 != 0;
        let bits_per_probability = cursor.read_u8("bit depth")?;

        if allele_count == 0 {
            return Err(BgenError::variant("block declares zero alleles"));
        }
        if ploidy_min > ploidy_max || ploidy_max > PLOIDY_MASK {
            return Err(BgenError::variant(format!(
                "invalid ploidy bounds [{ploidy_min}, {ploidy_max}]"
            )));
        }
        if bits_per_probability == 0 || bits_per_probability > 32 {
            return Err(BgenError::variant(format!(
                "bit depth {bits_per_probability} is outside 1..=32"
            )));
        }
        if phased {
            return Err(BgenError::UnsupportedFeature(
                "phased genotype probabilities".to_string(),
            ));
        }

        Ok(Self {
            header: VariantBlockHeader {
                sample_count,
                allele_count,
                ploidy_min,
                ploidy_max,
                phased,
                bits_per_probability,
            },
            ploidy,
            probabilities: cursor.rest(),
        })
    }

    /// Splits a sample's ploidy byte into (ploidy, missing), checking the bounds.
    #[inline]
    pub fn sample_ploidy(&self, sample_idx: usize) -> Result<(u8, bool)> {
        let raw = self.ploidy[sample_idx];
        let ploidy = raw & PLOIDY_MASK;
        if ploidy < self.header.ploidy_min || ploidy > self.header.ploidy_max {
            return Err(BgenError::variant(format!(
                "sample {sample_idx} has ploidy {ploidy} outside [{}, {}]",
                self.header.ploidy_min, self.header.ploidy_max
            )));
        }
        Ok((ploidy, raw & SAMPLE_MISSING_FLAG != 0))
    }
}

/// Number of probabilities written per unphased sample: one per unordered genotype,
/// minus the last, which is implied.
pub fn stored_value_count(ploidy: u8, allele_count: u16) -> Result<usize> {
    let n = u64::from(ploidy) + u64::from(allele_count) - 1;
    let k = u64::from(allele_count) - 1;
    let total = n_choose_k(n, k).ok_or_else(|| {
        BgenError::variant(format!(
            "genotype count overflows for ploidy {ploidy} with {allele_count} alleles"
        ))
    })?;
    Ok((total - 1) as usize)
}

fn n_choose_k(n: u64, k: u64) -> Option<u64> {
    let k = k.min(n - k);
    let mut result: u64 = 1;
    for i in 0..k {
        result = result.checked_mul(n - i)? / (i + 1);
    }
    Some(result)
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], path: &Path, what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            BgenError::container(path, format!("truncated header while reading {what}"))
        } else {
            BgenError::io(path, err)
        }
    })
}

fn read_u32<R: Read>(reader: &mut R, path: &Path, what: &str) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf, path, what)?;
    Ok(u32::from_le_bytes(buf))
}
