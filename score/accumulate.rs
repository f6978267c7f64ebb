// ========================================================================================
//
//                       Per-sample score accumulation, both strategies
//
// ========================================================================================
//
// A variant is turned into one `GenotypeValue` per included sample (or `None` when
// the sample has no usable call), and a single routine applies the inheritance model,
// the missing-data policy and the effect size. The hard-call and dosage paths differ
// only in how those values are produced, so a dosage that equals an exact genotype
// scores exactly like the hard call.

use crate::container::ContainerSet;
use crate::error::{BgenError, Result};
use crate::materialize::PackedGenotypes;
use crate::probability::ProbabilityDecoder;
use crate::types::{InheritanceModel, MissingPolicy, SampleMask, SampleScore, VariantRecord};
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringOptions {
    pub model: InheritanceModel,
    pub missing_policy: MissingPolicy,
    /// Score thresholded hard calls instead of expected dosages.
    pub hard_coded: bool,
    pub hard_call_threshold: f64,
}

impl Default for ScoringOptions {
    fn default() -> Self {
        Self {
            model: InheritanceModel::default(),
            missing_policy: MissingPolicy::default(),
            hard_coded: false,
            hard_call_threshold: 0.9,
        }
    }
}

/// A sample's raw genotype information for one variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GenotypeValue {
    /// Copies of the first allele, 0 to 2.
    Hard(u8),
    /// Probabilities of categories 0, 1 and 2, where category `h` carries `2 - h`
    /// copies of the first allele.
    Probabilities([f64; 3]),
}

impl GenotypeValue {
    /// Model-transformed allele count, with `0 <-> 2` swapped for flipped variants.
    #[inline]
    pub fn transformed(&self, model: InheritanceModel, is_flipped: bool) -> f64 {
        match *self {
            Self::Hard(copies) => {
                let genotype = if is_flipped { 2 - copies.min(2) } else { copies };
                f64::from(model.apply(genotype))
            }
            Self::Probabilities(probabilities) => probabilities
                .iter()
                .zip(0u8..)
                .map(|(&p, h)| {
                    let genotype = if is_flipped { h } else { 2 - h };
                    p * f64::from(model.apply(genotype))
                })
                .sum(),
        }
    }
}

/// Adds one variant's contribution to `scores`, which is indexed by the same
/// ordinal as `values`. Returns `false`, touching nothing, when every sample is
/// missing.
pub fn accumulate_variant(
    values: &[Option<GenotypeValue>],
    effect_size: f64,
    is_flipped: bool,
    options: &ScoringOptions,
    scores: &mut [SampleScore],
) -> bool {
    let mut called = 0usize;
    let mut total = 0.0;
    for value in values.iter().flatten() {
        called += 1;
        total += value.transformed(options.model, is_flipped);
    }
    if called == 0 {
        return false;
    }
    // effect size times the mean transformed value, halved like every other term
    let center_score = effect_size * total / (called as f64 * 2.0);

    for (value, score) in values.iter().zip(scores.iter_mut()) {
        match value {
            None => match options.missing_policy {
                MissingPolicy::MeanImpute => {
                    score.score_sum += center_score;
                    score.variants_counted += 1;
                }
                MissingPolicy::Center => score.variants_counted += 1,
                MissingPolicy::SetZero => {}
            },
            Some(value) => {
                if options.missing_policy == MissingPolicy::Center {
                    score.score_sum -= center_score;
                }
                score.score_sum +=
                    value.transformed(options.model, is_flipped) * effect_size * 0.5;
                score.variants_counted += 1;
            }
        }
    }
    true
}

/// One worker's scoring state: its own file handles, decoder and scratch buffers.
#[derive(Debug)]
pub struct ScoringRun<'a> {
    options: ScoringOptions,
    mask: &'a SampleMask,
    containers: ContainerSet,
    decoder: ProbabilityDecoder,
    packed: PackedGenotypes,
    values: Vec<Option<GenotypeValue>>,
}

impl<'a> ScoringRun<'a> {
    pub fn new(options: ScoringOptions, mask: &'a SampleMask) -> Self {
        Self {
            options,
            mask,
            containers: ContainerSet::new(),
            decoder: ProbabilityDecoder::new(options.hard_call_threshold),
            packed: PackedGenotypes::with_capacity(mask.len()),
            values: Vec::with_capacity(mask.included_count()),
        }
    }

    /// Scores the non-invalidated variants in `range` that belong to `region`.
    /// Variants whose included samples are all missing are invalidated for good.
    /// Returns how many variants contributed.
    pub fn score_range(
        &mut self,
        records: &mut [VariantRecord],
        range: Range<usize>,
        region: usize,
        scores: &mut [SampleScore],
    ) -> Result<usize> {
        if scores.len() != self.mask.included_count() {
            return Err(BgenError::Config(format!(
                "accumulator holds {} samples but {} are included",
                scores.len(),
                self.mask.included_count()
            )));
        }
        let end = range.end.min(records.len());
        let mut contributed = 0usize;
        for record in &mut records[range.start.min(end)..end] {
            if record.is_invalidated() || !record.in_region(region) {
                continue;
            }
            self.load_values(record)?;
            if accumulate_variant(
                &self.values,
                record.effect_size,
                record.is_flipped,
                &self.options,
                scores,
            ) {
                contributed += 1;
            } else {
                debug!("{} has no called samples; invalidated", record.identity.id);
                record.invalidate();
            }
        }
        Ok(contributed)
    }

    fn load_values(&mut self, record: &VariantRecord) -> Result<()> {
        let Self {
            options,
            mask,
            containers,
            decoder,
            packed,
            values,
        } = self;
        values.clear();
        let container = containers.container(&record.source_file)?;
        let layout = container.layout();
        let payload = container.genotype_block(record.byte_offset)?;

        if options.hard_coded {
            packed.materialize(decoder, layout, payload, mask)?;
            values.extend(
                mask.included_indices()
                    .map(|idx| packed.first_allele_copies(idx).map(GenotypeValue::Hard)),
            );
            return Ok(());
        }

        decoder.decode(layout, payload, mask, |sample| {
            if sample.missing {
                values.push(None);
                return Ok(());
            }
            match *sample.probabilities {
                [p0, p1, p2] => values.push(Some(GenotypeValue::Probabilities([p0, p1, p2]))),
                _ => {
                    return Err(BgenError::UnsupportedFeature(format!(
                        "dosage scoring needs exactly 3 genotype categories; sample {} has {}",
                        sample.sample_idx,
                        sample.probabilities.len()
                    )));
                }
            }
            Ok(())
        })?;
        Ok(())
    }
}

/// Scores `region` across the whole catalogue on the current rayon pool. Each task
/// takes a disjoint contiguous chunk of records, opens its own containers and fills a
/// private accumulator; the accumulators are summed at the end.
pub fn score_parallel(
    records: &mut [VariantRecord],
    region: usize,
    options: &ScoringOptions,
    mask: &SampleMask,
) -> Result<Vec<SampleScore>> {
    let sample_count = mask.included_count();
    if records.is_empty() {
        return Ok(vec![SampleScore::default(); sample_count]);
    }
    let tasks = rayon::current_num_threads().max(1);
    let chunk_len = records.len().div_ceil(tasks);

    records
        .par_chunks_mut(chunk_len)
        .map(|chunk| -> Result<Vec<SampleScore>> {
            let mut run = ScoringRun::new(*options, mask);
            let mut scores = vec![SampleScore::default(); sample_count];
            let len = chunk.len();
            run.score_range(chunk, 0..len, region, &mut scores)?;
            Ok(scores)
        })
        .try_reduce(
            || vec![SampleScore::default(); sample_count],
            |mut left, right| {
                left.iter_mut().zip(&right).for_each(|(l, r)| l.merge(r));
                Ok(left)
            },
        )
}
