// ========================================================================================
//
//                             Variant quality filtering
//
// ========================================================================================
//
// Streams one variant's samples through the probability decoder and decides whether
// the variant survives genotype missingness, allele frequency and INFO thresholds.
// Rejection counts are returned per pass in a `FilterReport` and merged by the caller.

use crate::container::ContainerSet;
use crate::error::Result;
use crate::header::BlockLayout;
use crate::probability::ProbabilityDecoder;
use crate::stats::RunningStatistic;
use crate::types::{SampleMask, VariantRecord};
use log::debug;
use serde::{Deserialize, Serialize};
use std::ops::{AddAssign, Range};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterThresholds {
    /// Largest tolerated fraction of missing samples. `>= 1` disables the filter.
    pub max_missingness: f64,
    /// `<= 0` disables the filter.
    pub min_minor_allele_frequency: f64,
    /// `<= 0` disables the filter.
    pub min_info_score: f64,
    pub hard_call_probability_threshold: f64,
    /// Count samples without a confident hard call as missing.
    pub hard_call_mode: bool,
}

impl Default for FilterThresholds {
    fn default() -> Self {
        Self {
            max_missingness: 1.0,
            min_minor_allele_frequency: 0.0,
            min_info_score: 0.0,
            hard_call_probability_threshold: 0.9,
            hard_call_mode: false,
        }
    }
}

impl FilterThresholds {
    /// True when no threshold can exclude anything; blocks need not be decoded.
    pub fn is_disabled(&self) -> bool {
        self.max_missingness >= 1.0
            && self.min_minor_allele_frequency <= 0.0
            && self.min_info_score <= 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Retained,
    ExcludedMissingness,
    ExcludedAlleleFrequency,
    ExcludedInfo,
}

impl FilterDecision {
    pub fn is_retained(self) -> bool {
        self == FilterDecision::Retained
    }
}

/// Per-pass rejection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterReport {
    pub examined: usize,
    pub retained: usize,
    pub missingness: usize,
    pub allele_frequency: usize,
    pub info: usize,
}

impl FilterReport {
    pub fn record(&mut self, decision: FilterDecision) {
        self.examined += 1;
        match decision {
            FilterDecision::Retained => self.retained += 1,
            FilterDecision::ExcludedMissingness => self.missingness += 1,
            FilterDecision::ExcludedAlleleFrequency => self.allele_frequency += 1,
            FilterDecision::ExcludedInfo => self.info += 1,
        }
    }

    pub fn excluded(&self) -> usize {
        self.missingness + self.allele_frequency + self.info
    }
}

impl AddAssign for FilterReport {
    fn add_assign(&mut self, other: Self) {
        self.examined += other.examined;
        self.retained += other.retained;
        self.missingness += other.missingness;
        self.allele_frequency += other.allele_frequency;
        self.info += other.info;
    }
}

/// What one decode pass over a variant's included samples observed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariantSummary {
    pub included_count: usize,
    /// Samples that count against the missingness threshold.
    pub missing_count: usize,
    /// Samples without a hard call, which cannot contribute to the allele frequency.
    pub maf_missing_count: usize,
    /// Second-allele copies over the hard-called samples.
    pub hard_call_allele_sum: u64,
    /// Dosage over every sample that was not counted missing.
    pub dosage: RunningStatistic,
}

impl VariantSummary {
    pub fn allele_frequency(&self) -> Option<f64> {
        let called = self.included_count - self.maf_missing_count;
        (called > 0).then(|| self.hard_call_allele_sum as f64 / (called as f64 * 2.0))
    }

    /// Ratio of observed dosage variance to its Hardy-Weinberg expectation.
    pub fn info_score(&self) -> Option<f64> {
        let p = self.dosage.mean()? / 2.0;
        let expected = 2.0 * p * (1.0 - p);
        (expected > 0.0).then(|| self.dosage.variance() / expected)
    }

    /// Applies the thresholds in order; the first failing check wins.
    pub fn decide(&self, thresholds: &FilterThresholds) -> FilterDecision {
        if thresholds.max_missingness < 1.0
            && self.included_count > 0
            && self.missing_count as f64 / self.included_count as f64 > thresholds.max_missingness
        {
            return FilterDecision::ExcludedMissingness;
        }
        if thresholds.min_minor_allele_frequency > 0.0 {
            match self.allele_frequency() {
                None => return FilterDecision::ExcludedAlleleFrequency,
                Some(maf) if maf < thresholds.min_minor_allele_frequency => {
                    return FilterDecision::ExcludedAlleleFrequency;
                }
                Some(_) => {}
            }
        }
        if thresholds.min_info_score > 0.0 {
            match self.info_score() {
                Some(info) if info >= thresholds.min_info_score => {}
                _ => return FilterDecision::ExcludedInfo,
            }
        }
        FilterDecision::Retained
    }
}

/// Surviving indices of one range pass, in catalogue order, and its counters.
#[derive(Debug, Default)]
pub struct FilterPass {
    pub retained: Vec<usize>,
    pub report: FilterReport,
}

#[derive(Debug)]
pub struct FilterEngine {
    thresholds: FilterThresholds,
    decoder: ProbabilityDecoder,
}

impl FilterEngine {
    pub fn new(thresholds: FilterThresholds) -> Self {
        Self {
            decoder: ProbabilityDecoder::new(thresholds.hard_call_probability_threshold),
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &FilterThresholds {
        &self.thresholds
    }

    pub fn summarize(
        &mut self,
        layout: BlockLayout,
        payload: &[u8],
        mask: &SampleMask,
    ) -> Result<VariantSummary> {
        let hard_call_mode = self.thresholds.hard_call_mode;
        let mut summary = VariantSummary::default();
        self.decoder.decode(layout, payload, mask, |sample| {
            summary.included_count += 1;
            if sample.missing || (hard_call_mode && sample.hard_call.is_none()) {
                summary.missing_count += 1;
                summary.maf_missing_count += 1;
                return Ok(());
            }
            summary.dosage.push(sample.dosage);
            match sample.hard_call {
                Some(call) => summary.hard_call_allele_sum += u64::from(call),
                None => summary.maf_missing_count += 1,
            }
            Ok(())
        })?;
        Ok(summary)
    }

    /// Decodes and judges one variant. Disabled thresholds accept without decoding.
    pub fn evaluate(
        &mut self,
        layout: BlockLayout,
        payload: &[u8],
        mask: &SampleMask,
    ) -> Result<FilterDecision> {
        if self.thresholds.is_disabled() {
            return Ok(FilterDecision::Retained);
        }
        let summary = self.summarize(layout, payload, mask)?;
        let decision = summary.decide(&self.thresholds);
        debug!(
            "filter: included={} missing={} maf={:?} info={:?} -> {decision:?}",
            summary.included_count,
            summary.missing_count,
            summary.allele_frequency(),
            summary.info_score()
        );
        Ok(decision)
    }

    /// Filters the catalogued variants in `range` that belong to `region`.
    pub fn filter_records(
        &mut self,
        containers: &mut ContainerSet,
        records: &[VariantRecord],
        range: Range<usize>,
        region: usize,
        mask: &SampleMask,
    ) -> Result<FilterPass> {
        let mut pass = FilterPass::default();
        for idx in range {
            let Some(record) = records.get(idx) else { break };
            if !record.in_region(region) {
                continue;
            }
            let decision = if self.thresholds.is_disabled() {
                FilterDecision::Retained
            } else {
                let container = containers.container(&record.source_file)?;
                let layout = container.layout();
                let payload = container.genotype_block(record.byte_offset)?;
                self.evaluate(layout, payload, mask)?
            };
            pass.report.record(decision);
            if decision.is_retained() {
                pass.retained.push(idx);
            }
        }
        Ok(pass)
    }
}
