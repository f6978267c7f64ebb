// ========================================================================================
//
//                         Genotype probability decoding
//
// ========================================================================================
//
// Turns one decompressed genotype block into per-sample probabilities, an expected
// dosage and a thresholded hard call. Both layouts share the visitor contract below so
// the filter engine and the scorer never care which layout a container uses.

use crate::bits::{BitReader, ByteCursor};
use crate::error::{BgenError, Result};
use crate::header::{
    BlockLayout, FIXED_LAYOUT_BYTES_PER_SAMPLE, FIXED_LAYOUT_CATEGORIES, FIXED_LAYOUT_SCALE,
    VariableBlock, stored_value_count,
};
use crate::types::SampleMask;
use log::warn;

/// Slack allowed on the sum of stored probabilities before it is reported.
pub const PROBABILITY_SUM_TOLERANCE: f64 = 1e-8;

/// One decoded, included sample. Borrowed from the decoder's scratch buffer and only
/// valid for the duration of the visitor call.
#[derive(Debug)]
pub struct DecodedSample<'a> {
    /// Position in the container's sample order.
    pub sample_idx: usize,
    /// Position among included samples.
    pub ordinal: usize,
    pub ploidy: u8,
    pub missing: bool,
    /// Every genotype category, the implied last one included. Empty when missing.
    pub probabilities: &'a [f64],
    /// Expected copies of the first allele.
    pub dosage: f64,
    /// Category index of the most likely genotype, if it clears the threshold.
    pub hard_call: Option<u8>,
}

/// Shape of the block that was decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockShape {
    pub allele_count: u16,
    pub bits_per_probability: u32,
    pub samples_over_unit_sum: usize,
}

#[derive(Debug)]
pub struct ProbabilityDecoder {
    hard_call_threshold: f64,
    scratch: Vec<f64>,
}

impl ProbabilityDecoder {
    pub fn new(hard_call_threshold: f64) -> Self {
        Self {
            hard_call_threshold,
            scratch: Vec::with_capacity(FIXED_LAYOUT_CATEGORIES),
        }
    }

    /// Decodes every sample of `payload`, calling `visit` for each included one in
    /// container order. Excluded samples are consumed from the stream but never
    /// reach the visitor.
    pub fn decode<F>(
        &mut self,
        layout: BlockLayout,
        payload: &[u8],
        mask: &SampleMask,
        visit: F,
    ) -> Result<BlockShape>
    where
        F: FnMut(&DecodedSample<'_>) -> Result<()>,
    {
        let shape = match layout {
            BlockLayout::Fixed => self.decode_fixed(payload, mask, visit)?,
            BlockLayout::Variable => self.decode_variable(payload, mask, visit)?,
        };
        if shape.samples_over_unit_sum > 0 {
            warn!(
                "{} samples carry stored probabilities summing above 1 + {PROBABILITY_SUM_TOLERANCE:e}; using a clamped complement",
                shape.samples_over_unit_sum
            );
        }
        Ok(shape)
    }

    fn decode_fixed<F>(&mut self, payload: &[u8], mask: &SampleMask, mut visit: F) -> Result<BlockShape>
    where
        F: FnMut(&DecodedSample<'_>) -> Result<()>,
    {
        let sample_count = mask.len();
        let needed = sample_count * FIXED_LAYOUT_BYTES_PER_SAMPLE;
        if payload.len() < needed {
            return Err(BgenError::variant(format!(
                "fixed-layout block holds {} bytes but {sample_count} samples need {needed}",
                payload.len()
            )));
        }
        let mut cursor = ByteCursor::new(payload);
        let mut ordinal = 0usize;
        let mut over_unit = 0usize;
        for sample_idx in 0..sample_count {
            let raw = cursor.take(FIXED_LAYOUT_BYTES_PER_SAMPLE, "fixed-layout probabilities")?;
            if !mask.is_included(sample_idx) {
                continue;
            }
            self.scratch.clear();
            for pair in raw.chunks_exact(2) {
                let value = f64::from(u16::from_le_bytes([pair[0], pair[1]])) / FIXED_LAYOUT_SCALE;
                self.scratch.push(value);
            }
            let sum: f64 = self.scratch.iter().sum();
            if sum > 1.0 + PROBABILITY_SUM_TOLERANCE {
                over_unit += 1;
            }
            let missing = sum <= 0.0;
            let sample = if missing {
                missing_sample(sample_idx, ordinal, 2)
            } else {
                DecodedSample {
                    sample_idx,
                    ordinal,
                    ploidy: 2,
                    missing: false,
                    probabilities: &self.scratch,
                    dosage: expected_dosage(&self.scratch),
                    hard_call: best_call(&self.scratch, self.hard_call_threshold),
                }
            };
            visit(&sample)?;
            ordinal += 1;
        }
        Ok(BlockShape {
            allele_count: 2,
            bits_per_probability: 16,
            samples_over_unit_sum: over_unit,
        })
    }

    fn decode_variable<F>(
        &mut self,
        payload: &[u8],
        mask: &SampleMask,
        mut visit: F,
    ) -> Result<BlockShape>
    where
        F: FnMut(&DecodedSample<'_>) -> Result<()>,
    {
        let block = VariableBlock::parse(payload, mask.len() as u32)?;
        let width = u32::from(block.header.bits_per_probability);
        let allele_count = block.header.allele_count;
        // Dosage and hard calls count copies of one of two alleles.
        if allele_count != 2 {
            return Err(BgenError::UnsupportedFeature(format!(
                "dosage of a variant with {allele_count} alleles"
            )));
        }
        let mut reader = BitReader::new(block.probabilities);

        let mut cached_ploidy = u8::MAX;
        let mut stored = 0usize;
        let mut ordinal = 0usize;
        let mut over_unit = 0usize;

        for sample_idx in 0..mask.len() {
            let (ploidy, flagged_missing) = block.sample_ploidy(sample_idx)?;
            if ploidy != cached_ploidy {
                stored = stored_value_count(ploidy, allele_count)?;
                cached_ploidy = ploidy;
            }
            if flagged_missing || !mask.is_included(sample_idx) {
                for _ in 0..stored {
                    reader.read(width)?;
                }
                if flagged_missing && mask.is_included(sample_idx) {
                    visit(&missing_sample(sample_idx, ordinal, ploidy))?;
                    ordinal += 1;
                }
                continue;
            }
            if ploidy != 2 {
                return Err(BgenError::UnsupportedFeature(format!(
                    "sample {sample_idx} has ploidy {ploidy}; only diploid genotypes are decoded"
                )));
            }

            self.scratch.clear();
            let mut sum = 0.0;
            for _ in 0..stored {
                let value = reader.read_probability(width)?;
                sum += value;
                self.scratch.push(value);
            }
            if sum > 1.0 + PROBABILITY_SUM_TOLERANCE {
                over_unit += 1;
            }
            self.scratch.push((1.0 - sum).clamp(0.0, 1.0));

            let sample = DecodedSample {
                sample_idx,
                ordinal,
                ploidy,
                missing: false,
                probabilities: &self.scratch,
                dosage: expected_dosage(&self.scratch),
                hard_call: best_call(&self.scratch, self.hard_call_threshold),
            };
            visit(&sample)?;
            ordinal += 1;
        }

        Ok(BlockShape {
            allele_count,
            bits_per_probability: width,
            samples_over_unit_sum: over_unit,
        })
    }
}

fn missing_sample(sample_idx: usize, ordinal: usize, ploidy: u8) -> DecodedSample<'static> {
    DecodedSample {
        sample_idx,
        ordinal,
        ploidy,
        missing: true,
        probabilities: &[],
        dosage: 0.0,
        hard_call: None,
    }
}

/// Category `h` contributes `2 - h` copies of the first allele.
#[inline]
fn expected_dosage(probabilities: &[f64]) -> f64 {
    probabilities
        .iter()
        .enumerate()
        .map(|(h, &p)| p * (2.0 - h as f64))
        .sum()
}

/// Highest-probability category, provided it reaches `threshold`. Ties keep the
/// lower category.
#[inline]
fn best_call(probabilities: &[f64], threshold: f64) -> Option<u8> {
    let mut best: Option<(usize, f64)> = None;
    for (h, &p) in probabilities.iter().enumerate() {
        if best.is_none_or(|(_, top)| p > top) {
            best = Some((h, p));
        }
    }
    best.filter(|&(_, p)| p >= threshold)
        .and_then(|(h, _)| u8::try_from(h).ok())
}
