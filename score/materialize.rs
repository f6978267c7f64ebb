// ========================================================================================
//
//                        Hard calls as 2-bit packed genotype words
//
// ========================================================================================
//
// Codes, per sample, low slot first within each native word:
//
//   00  homozygous first allele     (category 0)
//   10  heterozygous                (category 1)
//   11  homozygous second allele    (category 2)
//   01  missing / no call
//
// This is the same layout natively hard-called binary genotype files use, so the
// hard-call scorer never needs to know where the words came from.

use crate::error::{BgenError, Result};
use crate::header::BlockLayout;
use crate::probability::ProbabilityDecoder;
use crate::types::SampleMask;

pub const SAMPLES_PER_WORD: usize = usize::BITS as usize / 2;
pub const MISSING_CODE: usize = 0b01;
const SLOT_MASK: usize = 0b11;

#[inline(always)]
fn code_for(call: Option<u8>) -> usize {
    match call {
        Some(0) => 0b00,
        Some(1) => 0b10,
        Some(2) => 0b11,
        _ => MISSING_CODE,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackedGenotypes {
    words: Vec<usize>,
    sample_count: usize,
}

impl PackedGenotypes {
    pub fn with_capacity(sample_count: usize) -> Self {
        Self {
            words: Vec::with_capacity(sample_count.div_ceil(SAMPLES_PER_WORD)),
            sample_count: 0,
        }
    }

    pub fn from_calls(calls: &[Option<u8>]) -> Self {
        let mut packed = Self::with_capacity(calls.len());
        calls.iter().for_each(|&call| packed.push(call));
        packed
    }

    /// Forgets every sample but keeps the allocation. Stale words are zeroed as the
    /// next push reaches them.
    pub fn clear(&mut self) {
        self.sample_count = 0;
    }

    /// Appends one hard call given as a genotype category index.
    #[inline]
    pub fn push(&mut self, call: Option<u8>) {
        let index = self.sample_count / SAMPLES_PER_WORD;
        let shift = (self.sample_count % SAMPLES_PER_WORD) * 2;
        if shift == 0 {
            if index == self.words.len() {
                self.words.push(0);
            } else {
                self.words[index] = 0;
            }
        }
        self.words[index] |= code_for(call) << shift;
        self.sample_count += 1;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.sample_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    /// Words in use, the last possibly partial.
    pub fn words(&self) -> &[usize] {
        &self.words[..self.sample_count.div_ceil(SAMPLES_PER_WORD)]
    }

    #[inline(always)]
    pub fn code(&self, sample_idx: usize) -> usize {
        let word = self.words[sample_idx / SAMPLES_PER_WORD];
        (word >> ((sample_idx % SAMPLES_PER_WORD) * 2)) & SLOT_MASK
    }

    /// Copies of the first allele, or `None` for the missing code.
    #[inline(always)]
    pub fn first_allele_copies(&self, sample_idx: usize) -> Option<u8> {
        match self.code(sample_idx) {
            0b00 => Some(2),
            0b10 => Some(1),
            0b11 => Some(0),
            _ => None,
        }
    }

    /// Genotype category index, the inverse of [`push`](Self::push).
    #[inline]
    pub fn category(&self, sample_idx: usize) -> Option<u8> {
        self.first_allele_copies(sample_idx).map(|copies| 2 - copies)
    }

    /// Re-fills the words from one genotype block. Every container sample gets a
    /// slot; excluded samples are written as missing.
    pub fn materialize(
        &mut self,
        decoder: &mut ProbabilityDecoder,
        layout: BlockLayout,
        payload: &[u8],
        mask: &SampleMask,
    ) -> Result<()> {
        self.clear();
        decoder.decode(layout, payload, mask, |sample| {
            while self.sample_count < sample.sample_idx {
                self.push(None);
            }
            if !sample.missing && sample.probabilities.len() != 3 {
                return Err(BgenError::UnsupportedFeature(format!(
                    "hard calls need exactly 3 genotype categories; sample {} has {}",
                    sample.sample_idx,
                    sample.probabilities.len()
                )));
            }
            self.push(if sample.missing { None } else { sample.hard_call });
            Ok(())
        })?;
        while self.sample_count < mask.len() {
            self.push(None);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_samples_round_trip_with_reserved_missing_code() {
        let calls = [Some(0), Some(1), Some(2), None, Some(0)];
        let packed = PackedGenotypes::from_calls(&calls);
        assert_eq!(packed.len(), 5);
        assert_eq!(packed.words().len(), 1);
        assert_eq!(packed.words()[0], 0b00_01_11_10_00);
        let unpacked: Vec<_> = (0..5).map(|i| packed.category(i)).collect();
        assert_eq!(unpacked, calls);
        assert_eq!(packed.code(3), MISSING_CODE);
        assert_eq!(packed.first_allele_copies(0), Some(2));
        assert_eq!(packed.first_allele_copies(2), Some(0));
    }

    #[test]
    fn words_are_zeroed_when_their_first_slot_is_written() {
        let mut packed = PackedGenotypes::from_calls(&vec![Some(2); SAMPLES_PER_WORD + 3]);
        assert_eq!(packed.words()[0], usize::MAX);
        packed.clear();
        for _ in 0..SAMPLES_PER_WORD + 1 {
            packed.push(Some(0));
        }
        assert_eq!(packed.words(), &[0, 0]);
    }

    #[test]
    fn out_of_range_categories_pack_as_missing() {
        let packed = PackedGenotypes::from_calls(&[Some(3), Some(1)]);
        assert_eq!(packed.category(0), None);
        assert_eq!(packed.category(1), Some(1));
    }

    #[test]
    fn materialize_keeps_excluded_samples_in_position() {
        // Fixed layout: hom-first, het, hom-second, all-zero (missing).
        let mut payload = Vec::new();
        for triple in [[32767u16, 0, 0], [0, 32767, 0], [0, 0, 32767], [0, 0, 0]] {
            triple.iter().for_each(|v| payload.extend_from_slice(&v.to_le_bytes()));
        }
        let mask = SampleMask::from_indices(4, &[1, 3]);
        let mut decoder = ProbabilityDecoder::new(0.9);
        let mut packed = PackedGenotypes::default();
        packed
            .materialize(&mut decoder, BlockLayout::Fixed, &payload, &mask)
            .unwrap();
        assert_eq!(packed.len(), 4);
        assert_eq!(packed.category(1), Some(1));
        assert_eq!(packed.category(3), None);
    }
}
