// Writes small BGEN containers for the integration tests. Both block layouts and
// both supported compression kinds are covered.

use flate2::Compression;
use flate2::write::ZlibEncoder;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;

#[derive(Clone, Copy, Debug)]
pub enum Layout {
    /// Three 16-bit probabilities per sample.
    Fixed,
    /// Block header, ploidy bytes and `bits`-wide probabilities.
    Variable { bits: u8 },
}

#[derive(Clone, Debug)]
pub struct TestVariant {
    pub rsid: String,
    pub chromosome: String,
    pub position: u32,
    pub alleles: (String, String),
    /// Probabilities of categories 0, 1, 2 per sample; `None` writes a missing sample.
    pub samples: Vec<Option<[f64; 3]>>,
}

pub fn variant(rsid: &str, chromosome: &str, position: u32, samples: Vec<Option<[f64; 3]>>) -> TestVariant {
    TestVariant {
        rsid: rsid.to_string(),
        chromosome: chromosome.to_string(),
        position,
        alleles: ("A".to_string(), "G".to_string()),
        samples,
    }
}

pub const HOM_FIRST: Option<[f64; 3]> = Some([1.0, 0.0, 0.0]);
pub const HET: Option<[f64; 3]> = Some([0.0, 1.0, 0.0]);
pub const HOM_SECOND: Option<[f64; 3]> = Some([0.0, 0.0, 1.0]);

#[derive(Clone, Debug)]
pub struct ContainerSpec {
    pub layout: Layout,
    pub compressed: bool,
    pub sample_ids: Option<Vec<String>>,
}

impl ContainerSpec {
    pub fn new(layout: Layout, compressed: bool) -> Self {
        Self {
            layout,
            compressed,
            sample_ids: None,
        }
    }

    pub fn with_sample_ids(mut self, ids: &[&str]) -> Self {
        self.sample_ids = Some(ids.iter().map(|s| s.to_string()).collect());
        self
    }
}

fn zlib(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

fn push_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn push_short_string(out: &mut Vec<u8>, value: &str) {
    push_u16(out, value.len() as u16);
    out.extend_from_slice(value.as_bytes());
}

fn push_long_string(out: &mut Vec<u8>, value: &str) {
    push_u32(out, value.len() as u32);
    out.extend_from_slice(value.as_bytes());
}

fn fixed_payload(samples: &[Option<[f64; 3]>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 6);
    for sample in samples {
        for p in sample.unwrap_or([0.0; 3]) {
            push_u16(&mut out, (p * 32767.0).round() as u16);
        }
    }
    out
}

fn variable_payload(samples: &[Option<[f64; 3]>], bits: u8) -> Vec<u8> {
    let mut out = Vec::new();
    push_u32(&mut out, samples.len() as u32);
    push_u16(&mut out, 2);
    out.push(2);
    out.push(2);
    for sample in samples {
        out.push(if sample.is_some() { 2 } else { 0x82 });
    }
    out.push(0);
    out.push(bits);

    let max = ((1u64 << bits) - 1) as f64;
    let mut acc: u128 = 0;
    let mut filled = 0u32;
    for sample in samples {
        let [p0, p1, _] = sample.unwrap_or([0.0; 3]);
        for p in [p0, p1] {
            acc |= u128::from((p * max).round() as u64) << filled;
            filled += u32::from(bits);
            while filled >= 8 {
                out.push((acc & 0xFF) as u8);
                acc >>= 8;
                filled -= 8;
            }
        }
    }
    if filled > 0 {
        out.push((acc & 0xFF) as u8);
    }
    out
}

/// Serializes a whole container.
pub fn container_bytes(spec: &ContainerSpec, sample_count: usize, variants: &[TestVariant]) -> Vec<u8> {
    let header_length = 20u32;
    let mut sample_block = Vec::new();
    if let Some(ids) = &spec.sample_ids {
        assert_eq!(ids.len(), sample_count);
        let body: usize = ids.iter().map(|id| 2 + id.len()).sum();
        push_u32(&mut sample_block, (8 + body) as u32);
        push_u32(&mut sample_block, sample_count as u32);
        for id in ids {
            push_short_string(&mut sample_block, id);
        }
    }

    let layout_bits = match spec.layout {
        Layout::Fixed => 1u32,
        Layout::Variable { .. } => 2,
    };
    let mut flags = u32::from(spec.compressed) | (layout_bits << 2);
    if spec.sample_ids.is_some() {
        flags |= 1 << 31;
    }

    let mut out = Vec::new();
    push_u32(&mut out, header_length + sample_block.len() as u32);
    push_u32(&mut out, header_length);
    push_u32(&mut out, variants.len() as u32);
    push_u32(&mut out, sample_count as u32);
    out.extend_from_slice(b"bgen");
    push_u32(&mut out, flags);
    out.extend_from_slice(&sample_block);

    for v in variants {
        assert_eq!(v.samples.len(), sample_count);
        if let Layout::Fixed = spec.layout {
            push_u32(&mut out, sample_count as u32);
        }
        push_short_string(&mut out, &format!("{}:{}", v.chromosome, v.position));
        push_short_string(&mut out, &v.rsid);
        push_short_string(&mut out, &v.chromosome);
        push_u32(&mut out, v.position);
        if let Layout::Variable { .. } = spec.layout {
            push_u16(&mut out, 2);
        }
        push_long_string(&mut out, &v.alleles.0);
        push_long_string(&mut out, &v.alleles.1);

        match (spec.layout, spec.compressed) {
            (Layout::Fixed, false) => out.extend_from_slice(&fixed_payload(&v.samples)),
            (Layout::Fixed, true) => {
                let packed = zlib(&fixed_payload(&v.samples));
                push_u32(&mut out, packed.len() as u32);
                out.extend_from_slice(&packed);
            }
            (Layout::Variable { bits }, false) => {
                let payload = variable_payload(&v.samples, bits);
                push_u32(&mut out, payload.len() as u32);
                out.extend_from_slice(&payload);
            }
            (Layout::Variable { bits }, true) => {
                let payload = variable_payload(&v.samples, bits);
                let packed = zlib(&payload);
                push_u32(&mut out, packed.len() as u32 + 4);
                push_u32(&mut out, payload.len() as u32);
                out.extend_from_slice(&packed);
            }
        }
    }
    out
}

/// A temporary directory that removes itself, with helpers to drop containers in it.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write_bgen(
        &self,
        name: &str,
        spec: &ContainerSpec,
        sample_count: usize,
        variants: &[TestVariant],
    ) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, container_bytes(spec, sample_count, variants)).unwrap();
        path
    }

    pub fn write_text(&self, name: &str, text: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, text).unwrap();
        path
    }
}
