// ========================================================================================
//                           Effect-size file and allele matching
// ========================================================================================

use crate::error::{BgenError, Result};
use crate::types::VariantRecord;
use ahash::AHashMap;
use log::{info, warn};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct EffectWeight {
    pub effect_allele: String,
    pub effect_size: f64,
}

/// Effect sizes keyed by variant identifier.
#[derive(Debug, Clone, Default)]
pub struct EffectWeights {
    by_id: AHashMap<String, EffectWeight>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeightReport {
    pub matched: usize,
    pub flipped: usize,
    pub allele_mismatch: usize,
    pub unweighted: usize,
}

impl EffectWeights {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| BgenError::io(path, e))?;
        Self::parse(&text).map_err(|message| {
            BgenError::Config(format!("{}: {message}", path.display()))
        })
    }

    /// Whitespace-separated `id  effect_allele  effect_size` lines. Blank lines and
    /// `#` comments are ignored, and so is a first line whose effect column is not a
    /// number.
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let mut by_id = AHashMap::new();
        for (line_idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [id, allele, effect, ..] = fields[..] else {
                return Err(format!(
                    "line {} has {} columns; expected id, effect allele and effect size",
                    line_idx + 1,
                    fields.len()
                ));
            };
            let effect_size = match effect.parse::<f64>() {
                Ok(value) if value.is_finite() => value,
                _ if line_idx == 0 => continue,
                _ => {
                    return Err(format!(
                        "line {}: effect size '{effect}' is not a finite number",
                        line_idx + 1
                    ));
                }
            };
            let previous = by_id.insert(
                id.to_string(),
                EffectWeight {
                    effect_allele: allele.to_string(),
                    effect_size,
                },
            );
            if previous.is_some() {
                return Err(format!("line {}: '{id}' appears twice", line_idx + 1));
            }
        }
        Ok(Self { by_id })
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&EffectWeight> {
        self.by_id.get(id)
    }

    /// Keeps only the records with a weight whose effect allele is one of their two
    /// alleles, setting `effect_size` and `is_flipped`. Genotypes count copies of the
    /// first allele, so an effect on the last allele flips the variant.
    pub fn attach(&self, records: Vec<VariantRecord>) -> (Vec<VariantRecord>, WeightReport) {
        let mut report = WeightReport::default();
        let mut kept = Vec::with_capacity(records.len().min(self.by_id.len()));
        for mut record in records {
            let Some(weight) = self.by_id.get(&record.identity.id) else {
                report.unweighted += 1;
                continue;
            };
            let allele = weight.effect_allele.as_str();
            if allele.eq_ignore_ascii_case(record.identity.first_allele()) {
                record.is_flipped = false;
            } else if allele.eq_ignore_ascii_case(record.identity.last_allele()) {
                record.is_flipped = true;
                report.flipped += 1;
            } else {
                report.allele_mismatch += 1;
                continue;
            }
            record.effect_size = weight.effect_size;
            report.matched += 1;
            kept.push(record);
        }
        if report.allele_mismatch > 0 {
            warn!(
                "{} weighted variants carry an effect allele matching neither allele; skipped",
                report.allele_mismatch
            );
        }
        info!(
            "{} of {} weights matched catalogued variants ({} flipped)",
            report.matched,
            self.by_id.len(),
            report.flipped
        );
        (kept, report)
    }
}
