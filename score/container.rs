// ========================================================================================
//
//                          Container file access and inflation
//
// ========================================================================================
//
// A `BgenContainer` owns one file handle, the parsed header and two reusable byte
// buffers. Workers never share one: each scoring task builds its own `ContainerSet`.

use crate::error::{BgenError, Result};
use crate::header::{
    BlockLayout, CompressionKind, ContainerHeader, FIXED_LAYOUT_BYTES_PER_SAMPLE,
    read_sample_identifiers,
};
use crate::types::VariantIdentity;
use ahash::AHashMap;
use flate2::read::ZlibDecoder;
use log::debug;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug)]
pub struct BgenContainer {
    path: Arc<Path>,
    header: ContainerHeader,
    sample_identifiers: Option<Vec<String>>,
    reader: BufReader<File>,
    raw: Vec<u8>,
    inflated: Vec<u8>,
}

impl BgenContainer {
    pub fn open(path: impl Into<Arc<Path>>) -> Result<Self> {
        let path: Arc<Path> = path.into();
        let file = File::open(&path).map_err(|e| BgenError::io(&*path, e))?;
        let mut reader = BufReader::new(file);
        let header = ContainerHeader::read(&mut reader, &path)?;

        let sample_identifiers = if header.has_sample_identifier_block {
            reader
                .seek(SeekFrom::Start(header.sample_block_offset()))
                .map_err(|e| BgenError::io(&*path, e))?;
            Some(read_sample_identifiers(&mut reader, &header, &path)?)
        } else {
            None
        };

        debug!(
            "opened '{}': {} variants, {} samples, layout {}, {:?} compression",
            path.display(),
            header.variant_count,
            header.sample_count,
            header.layout_version,
            header.compression
        );

        Ok(Self {
            path,
            header,
            sample_identifiers,
            reader,
            raw: Vec::new(),
            inflated: Vec::new(),
        })
    }

    pub fn path(&self) -> &Arc<Path> {
        &self.path
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    #[inline]
    pub fn layout(&self) -> BlockLayout {
        self.header.layout
    }

    pub fn sample_count(&self) -> usize {
        self.header.sample_count as usize
    }

    pub fn sample_identifiers(&self) -> Option<&[String]> {
        self.sample_identifiers.as_deref()
    }

    /// Positions the file at the first variant's identifying data.
    pub fn rewind(&mut self) -> Result<()> {
        let offset = self.header.first_variant_offset();
        self.seek(offset)
    }

    /// Reads the identifying data at the current position and returns it together
    /// with the offset of the genotype block that follows.
    pub fn next_identity(&mut self) -> Result<(VariantIdentity, u64)> {
        if self.header.layout == BlockLayout::Fixed {
            let declared = self.read_u32("per-variant sample count")?;
            if declared != self.header.sample_count {
                return Err(BgenError::variant(format!(
                    "variant declares {declared} samples but '{}' has {}",
                    self.path.display(),
                    self.header.sample_count
                )));
            }
        }
        self.read_short_string("variant identifier")?;
        let rsid = self.read_short_string("rsid")?;
        let chromosome = self.read_short_string("chromosome")?;
        let position = self.read_u32("position")?;
        let allele_count = match self.header.layout {
            BlockLayout::Fixed => 2,
            BlockLayout::Variable => self.read_u16("allele count")?,
        };
        let mut alleles = Vec::with_capacity(usize::from(allele_count));
        for _ in 0..allele_count {
            let len = self.read_u32("allele length")? as usize;
            alleles.push(self.read_string(len, "allele")?);
        }
        let id = if rsid == "." {
            format!("{chromosome}:{position}")
        } else {
            rsid
        };
        let block_offset = self
            .reader
            .stream_position()
            .map_err(|e| BgenError::io(&*self.path, e))?;
        Ok((
            VariantIdentity {
                id,
                chromosome,
                position,
                alleles,
            },
            block_offset,
        ))
    }

    /// Skips the genotype block at the current position without reading it.
    pub fn skip_genotype_block(&mut self) -> Result<()> {
        let len = match (self.header.layout, self.header.compression) {
            (BlockLayout::Fixed, CompressionKind::None) => self.fixed_block_len() as u64,
            _ => u64::from(self.read_u32("genotype block length")?),
        };
        let offset = i64::try_from(len)
            .map_err(|_| BgenError::variant(format!("genotype block length {len} is too large")))?;
        self.reader
            .seek_relative(offset)
            .map_err(|e| BgenError::io(&*self.path, e))
    }

    /// Reads and, if needed, inflates the genotype block at `offset`. The file is left
    /// positioned just past the block.
    pub fn genotype_block(&mut self, offset: u64) -> Result<&[u8]> {
        self.seek(offset)?;
        match (self.header.layout, self.header.compression) {
            (BlockLayout::Fixed, CompressionKind::None) => {
                let len = self.fixed_block_len();
                self.read_raw(len)?;
                Ok(self.raw.as_slice())
            }
            (BlockLayout::Fixed, CompressionKind::Zlib) => {
                let len = self.read_u32("compressed block length")? as usize;
                self.read_raw(len)?;
                let expected = self.fixed_block_len();
                self.inflate(expected)?;
                Ok(self.inflated.as_slice())
            }
            (BlockLayout::Variable, CompressionKind::None) => {
                let len = self.read_u32("genotype block length")? as usize;
                self.read_raw(len)?;
                Ok(self.raw.as_slice())
            }
            (BlockLayout::Variable, CompressionKind::Zlib) => {
                let total = self.read_u32("genotype block length")? as usize;
                if total < 4 {
                    return Err(BgenError::variant(format!(
                        "compressed block length {total} cannot hold its decompressed size"
                    )));
                }
                let expected = self.read_u32("decompressed block length")? as usize;
                self.read_raw(total - 4)?;
                self.inflate(expected)?;
                Ok(self.inflated.as_slice())
            }
        }
    }

    fn fixed_block_len(&self) -> usize {
        self.sample_count() * FIXED_LAYOUT_BYTES_PER_SAMPLE
    }

    /// Inflates `raw`, stopping one byte past `expected` so a block that claims less
    /// than it holds cannot grow the buffer without bound.
    fn inflate(&mut self, expected: usize) -> Result<()> {
        self.inflated.clear();
        ZlibDecoder::new(self.raw.as_slice())
            .take(expected as u64 + 1)
            .read_to_end(&mut self.inflated)
            .map_err(|e| BgenError::variant(format!("zlib inflation failed: {e}")))?;
        if self.inflated.len() != expected {
            return Err(BgenError::variant(format!(
                "block inflated to {} bytes, expected {expected}",
                self.inflated.len()
            )));
        }
        Ok(())
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.reader
            .seek(SeekFrom::Start(offset))
            .map(|_| ())
            .map_err(|e| BgenError::io(&*self.path, e))
    }

    fn read_raw(&mut self, len: usize) -> Result<()> {
        let Self { reader, raw, path, .. } = self;
        read_bounded(reader, raw, len, path, "genotype block")
    }

    fn read_u16(&mut self, what: &str) -> Result<u16> {
        let mut buf = [0u8; 2];
        read_exact(&mut self.reader, &mut buf, &self.path, what)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32(&mut self, what: &str) -> Result<u32> {
        let mut buf = [0u8; 4];
        read_exact(&mut self.reader, &mut buf, &self.path, what)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_short_string(&mut self, what: &str) -> Result<String> {
        let len = usize::from(self.read_u16(what)?);
        self.read_string(len, what)
    }

    fn read_string(&mut self, len: usize, what: &str) -> Result<String> {
        let mut buf = Vec::new();
        read_bounded(&mut self.reader, &mut buf, len, &self.path, what)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

fn read_exact(reader: &mut impl Read, buf: &mut [u8], path: &Path, what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            BgenError::variant(format!(
                "'{}' ended while reading {what} ({} bytes)",
                path.display(),
                buf.len()
            ))
        } else {
            BgenError::io(path, e)
        }
    })
}

/// Reads exactly `len` bytes into `buf`, which is cleared first. Declared lengths come
/// from the file, so the buffer grows with the bytes actually present rather than
/// being sized up front.
fn read_bounded(
    reader: &mut impl Read,
    buf: &mut Vec<u8>,
    len: usize,
    path: &Path,
    what: &str,
) -> Result<()> {
    buf.clear();
    let read = reader
        .take(len as u64)
        .read_to_end(buf)
        .map_err(|e| BgenError::io(path, e))?;
    if read != len {
        return Err(BgenError::variant(format!(
            "'{}' ended while reading {what} ({read} of {len} bytes)",
            path.display()
        )));
    }
    Ok(())
}

/// Lazily opened containers keyed by path. Not shared across threads.
#[derive(Debug, Default)]
pub struct ContainerSet {
    open: AHashMap<Arc<Path>, BgenContainer>,
}

impl ContainerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn container(&mut self, path: &Arc<Path>) -> Result<&mut BgenContainer> {
        if !self.open.contains_key(path) {
            let container = BgenContainer::open(Arc::clone(path))?;
            self.open.insert(Arc::clone(path), container);
        }
        self.open
            .get_mut(path)
            .ok_or_else(|| BgenError::container(&**path, "container vanished from the open set"))
    }
}
