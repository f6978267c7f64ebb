// ========================================================================================
//                                  Run configuration
// ========================================================================================
//
// Optional TOML file holding the same settings as the command line. Every table and
// key may be omitted; the binary applies its flags on top of whatever is loaded here.
//
//     [thresholds]
//     max_missingness = 0.1
//     min_minor_allele_frequency = 0.01
//     min_info_score = 0.8
//     hard_call_probability_threshold = 0.9
//     hard_call_mode = false
//
//     [scoring]
//     model = "additive"
//     missing_policy = "mean-impute"

use crate::accumulate::ScoringOptions;
use crate::error::{BgenError, Result};
use crate::filter::FilterThresholds;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub thresholds: FilterThresholds,
    pub scoring: ScoringOptions,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| BgenError::io(path, e))?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| BgenError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        let probability_like = [
            ("max_missingness", t.max_missingness),
            ("min_minor_allele_frequency", t.min_minor_allele_frequency),
            ("hard_call_probability_threshold", t.hard_call_probability_threshold),
            ("hard_call_threshold", self.scoring.hard_call_threshold),
        ];
        for (name, value) in probability_like {
            if !(0.0..=1.0).contains(&value) {
                return Err(BgenError::Config(format!("{name} = {value} is outside [0, 1]")));
            }
        }
        if t.min_info_score.is_nan() || t.min_info_score < 0.0 {
            return Err(BgenError::Config(format!(
                "min_info_score = {} must be non-negative",
                t.min_info_score
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InheritanceModel, MissingPolicy};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_file_gives_disabled_defaults() {
        let config: RunConfig = toml::from_str("").unwrap();
        assert!(config.thresholds.is_disabled());
        assert_eq!(config.scoring.model, InheritanceModel::Additive);
        assert_eq!(config.scoring.missing_policy, MissingPolicy::MeanImpute);
    }

    #[test]
    fn loads_partial_tables() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[thresholds]\nmax_missingness = 0.1\n\n[scoring]\nmodel = \"dominant\"\nmissing_policy = \"set-zero\"\nhard_coded = true"
        )
        .unwrap();
        let config = RunConfig::load(file.path()).unwrap();
        assert_eq!(config.thresholds.max_missingness, 0.1);
        assert_eq!(config.thresholds.hard_call_probability_threshold, 0.9);
        assert_eq!(config.scoring.model, InheritanceModel::Dominant);
        assert_eq!(config.scoring.missing_policy, MissingPolicy::SetZero);
        assert!(config.scoring.hard_coded);
    }

    #[test]
    fn rejects_unknown_keys_and_out_of_range_values() {
        assert!(toml::from_str::<RunConfig>("[filters]\ngeno = 0.1").is_err());
        let config: RunConfig = toml::from_str("[thresholds]\nmax_missingness = 1.5").unwrap();
        assert!(config.validate().is_err());
    }
}
