// ========================================================================================
//                         Contracts shared across the pipeline
// ========================================================================================

// Only types used by more than one module belong here. Everything else stays beside
// the code that uses it.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Which container samples take part in statistics and scoring.
///
/// Excluded samples are still decoded (the bit stream has no random access) but
/// never touch a statistic or an accumulator. Accumulator arrays are indexed by the
/// compact ordinal of a sample among the included ones, in container order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleMask {
    included: Vec<bool>,
    included_count: usize,
}

impl SampleMask {
    pub fn all(sample_count: usize) -> Self {
        Self {
            included: vec![true; sample_count],
            included_count: sample_count,
        }
    }

    pub fn from_flags(included: Vec<bool>) -> Self {
        let included_count = included.iter().filter(|&&flag| flag).count();
        Self {
            included,
            included_count,
        }
    }

    /// Builds a mask over `sample_count` samples that keeps only `indices`.
    /// Out-of-range indices are ignored.
    pub fn from_indices(sample_count: usize, indices: &[usize]) -> Self {
        let mut included = vec![false; sample_count];
        for &idx in indices {
            if let Some(slot) = included.get_mut(idx) {
                *slot = true;
            }
        }
        Self::from_flags(included)
    }

    #[inline(always)]
    pub fn is_included(&self, sample_idx: usize) -> bool {
        self.included.get(sample_idx).copied().unwrap_or(false)
    }

    /// Total number of samples in the container, included or not.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.included.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.included.is_empty()
    }

    #[inline(always)]
    pub fn included_count(&self) -> usize {
        self.included_count
    }

    /// Container indices of the included samples, in ordinal order.
    pub fn included_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.included
            .iter()
            .enumerate()
            .filter_map(|(idx, &flag)| flag.then_some(idx))
    }
}

/// Chromosome, position, identifier and alleles of a variant as read from its
/// identifying data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariantIdentity {
    pub id: String,
    pub chromosome: String,
    pub position: u32,
    pub alleles: Vec<String>,
}

impl VariantIdentity {
    pub fn first_allele(&self) -> &str {
        self.alleles.first().map(String::as_str).unwrap_or("")
    }

    pub fn last_allele(&self) -> &str {
        self.alleles.last().map(String::as_str).unwrap_or("")
    }
}

impl fmt::Display for VariantIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}",
            self.id,
            self.chromosome,
            self.position,
            self.first_allele(),
            self.last_allele()
        )
    }
}

/// A word-packed set of region indices a variant belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionMembership {
    words: Vec<u64>,
}

impl RegionMembership {
    pub fn single(region: usize) -> Self {
        let mut membership = Self::default();
        membership.insert(region);
        membership
    }

    pub fn insert(&mut self, region: usize) {
        let word = region / 64;
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (region % 64);
    }

    #[inline(always)]
    pub fn contains(&self, region: usize) -> bool {
        self.words
            .get(region / 64)
            .is_some_and(|word| word & (1u64 << (region % 64)) != 0)
    }
}

/// One catalogued variant. The scorer reads everything here and only ever writes
/// `invalidated`.
#[derive(Debug, Clone)]
pub struct VariantRecord {
    pub identity: VariantIdentity,
    pub source_file: Arc<Path>,
    /// Absolute file offset of the genotype data block.
    pub byte_offset: u64,
    pub is_flipped: bool,
    pub effect_size: f64,
    pub regions: RegionMembership,
    invalidated: bool,
}

impl VariantRecord {
    pub fn new(identity: VariantIdentity, source_file: Arc<Path>, byte_offset: u64) -> Self {
        Self {
            identity,
            source_file,
            byte_offset,
            is_flipped: false,
            effect_size: 0.0,
            regions: RegionMembership::single(0),
            invalidated: false,
        }
    }

    #[inline(always)]
    pub fn in_region(&self, region: usize) -> bool {
        self.regions.contains(region)
    }

    #[inline(always)]
    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }
}

/// Transform applied to a raw 0/1/2 genotype before it is weighted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum InheritanceModel {
    #[default]
    #[value(alias = "add")]
    Additive,
    #[value(alias = "dom")]
    Dominant,
    #[value(alias = "rec")]
    Recessive,
    #[value(alias = "het")]
    Heterozygous,
}

impl InheritanceModel {
    #[inline(always)]
    pub fn apply(self, genotype: u8) -> u8 {
        match self {
            Self::Additive => genotype,
            Self::Heterozygous => {
                if genotype == 2 {
                    0
                } else {
                    genotype
                }
            }
            Self::Dominant => {
                if genotype == 2 {
                    1
                } else {
                    genotype
                }
            }
            Self::Recessive => genotype.saturating_sub(1),
        }
    }
}


/// How a sample without a usable call contributes to its running score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum MissingPolicy {
    #[default]
    #[value(alias = "impute")]
    MeanImpute,
    #[value(alias = "centre")]
    Center,
    #[value(alias = "zero")]
    SetZero,
}


/// Running score of one included sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SampleScore {
    pub score_sum: f64,
    pub variants_counted: u32,
}

impl SampleScore {
    pub fn merge(&mut self, other: &SampleScore) {
        self.score_sum += other.score_sum;
        self.variants_counted += other.variants_counted;
    }
}
