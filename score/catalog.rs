// ========================================================================================
//
//                        The build pass: scan, select, filter, catalogue
//
// ========================================================================================
//
// Walks every container once, in order, reading each variant's identifying data and
// deciding whether it enters the catalogue. Genotype blocks are only decompressed for
// variants that survive selection and only when a filter threshold is active.
//
// Duplicate identities do not abort the scan. They are collected and reported once,
// after every container has been read, together with the identities that remain
// usable.

use crate::container::BgenContainer;
use crate::error::{BgenError, Result};
use crate::filter::{FilterEngine, FilterReport, FilterThresholds};
use crate::types::{SampleMask, VariantIdentity, VariantRecord};
use ahash::{AHashMap, AHashSet};
use log::{debug, info, warn};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Which identities the caller wants to see.
#[derive(Debug, Clone, Default)]
pub enum VariantSelection {
    #[default]
    All,
    Extract(AHashSet<String>),
    Exclude(AHashSet<String>),
}

impl VariantSelection {
    pub fn admits(&self, id: &str) -> bool {
        match self {
            Self::All => true,
            Self::Extract(ids) => ids.contains(id),
            Self::Exclude(ids) => !ids.contains(id),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CatalogOptions {
    pub thresholds: FilterThresholds,
    pub selection: VariantSelection,
    pub keep_ambiguous: bool,
    /// Keep sex, mitochondrial and unplaced chromosomes.
    pub keep_non_autosomal: bool,
    /// Sample identifiers the containers must carry, in order.
    pub expected_samples: Option<Vec<String>>,
}

/// Reasons a scanned variant did not reach the catalogue, plus the filter counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub scanned: usize,
    pub unselected: usize,
    pub ambiguous: usize,
    pub non_autosomal: usize,
    /// Variants with more or fewer than two alleles.
    pub multi_allelic: usize,
    pub filter: FilterReport,
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} variants scanned; {} not selected, {} multi-allelic, {} ambiguous, {} non-autosomal, {} failed missingness, {} failed allele frequency, {} failed INFO",
            self.scanned,
            self.unselected,
            self.multi_allelic,
            self.ambiguous,
            self.non_autosomal,
            self.filter.missingness,
            self.filter.allele_frequency,
            self.filter.info
        )
    }
}

#[derive(Debug)]
pub struct Catalog {
    pub records: Vec<VariantRecord>,
    /// Container sample identifiers, or generated ones when no container has them.
    pub sample_names: Vec<String>,
    pub report: BuildReport,
}

/// Lets a front end follow the scan without the library knowing how it is shown.
pub trait BuildProgressObserver {
    fn on_container_start(&mut self, path: &Path, variant_count: u32) {
        let _ = (path, variant_count);
    }
    fn on_variant(&mut self) {}
    fn on_container_finish(&mut self, path: &Path) {
        let _ = path;
    }
}

#[derive(Default)]
pub struct NoopBuildProgress;

impl BuildProgressObserver for NoopBuildProgress {}

/// Strand-ambiguous biallelic pairs: A/T and C/G in either order.
pub fn is_ambiguous(first: &str, second: &str) -> bool {
    let pair = (first.to_ascii_uppercase(), second.to_ascii_uppercase());
    matches!(
        (pair.0.as_str(), pair.1.as_str()),
        ("A", "T") | ("T", "A") | ("C", "G") | ("G", "C")
    )
}

/// 1 to 22 after an optional `chr` prefix.
pub fn is_autosome(chromosome: &str) -> bool {
    let trimmed = chromosome
        .strip_prefix("chr")
        .or_else(|| chromosome.strip_prefix("CHR"))
        .unwrap_or(chromosome);
    trimmed.parse::<u32>().is_ok_and(|code| (1..=22).contains(&code))
}

/// Runs the build pass over `paths`, in order.
pub fn build_catalog(
    paths: &[PathBuf],
    options: &CatalogOptions,
    mask: &SampleMask,
    progress: &mut dyn BuildProgressObserver,
) -> Result<Catalog> {
    let mut engine = FilterEngine::new(options.thresholds);
    let mut report = BuildReport::default();
    let mut records: Vec<VariantRecord> = Vec::new();
    let mut sample_names: Option<Vec<String>> = None;
    let mut sample_count: Option<u32> = None;

    let mut seen: AHashMap<String, usize> = AHashMap::new();
    let mut duplicates: Vec<String> = Vec::new();
    let mut finished_chromosomes: AHashSet<String> = AHashSet::new();
    let mut current_chromosome: Option<String> = None;
    let mut warned_chromosomes: AHashSet<String> = AHashSet::new();

    for path in paths {
        let source: Arc<Path> = Arc::from(path.as_path());
        let mut container = BgenContainer::open(Arc::clone(&source))?;
        check_samples(&container, options, mask, &mut sample_count, &mut sample_names)?;
        let variant_count = container.header().variant_count;
        progress.on_container_start(path, variant_count);
        container.rewind()?;

        for _ in 0..variant_count {
            let (identity, block_offset) = container.next_identity()?;
            report.scanned += 1;
            progress.on_variant();

            if current_chromosome.as_deref() != Some(identity.chromosome.as_str()) {
                if finished_chromosomes.contains(&identity.chromosome) {
                    return Err(BgenError::container(
                        path,
                        format!(
                            "variants on chromosome {} are not contiguous; sort the input so each chromosome forms one block",
                            identity.chromosome
                        ),
                    ));
                }
                if let Some(previous) = current_chromosome.take() {
                    finished_chromosomes.insert(previous);
                }
                current_chromosome = Some(identity.chromosome.clone());
            }

            // Identities the caller deselected take no part in duplicate detection, so
            // a re-run restricted to the valid list succeeds.
            if options.selection.admits(&identity.id) {
                let occurrences = seen.entry(identity.id.clone()).or_insert(0);
                *occurrences += 1;
                if *occurrences == 2 {
                    duplicates.push(identity.id.clone());
                }
            }

            if let Some(reason) = exclusion_reason(&identity, options) {
                match reason {
                    Exclusion::Unselected => report.unselected += 1,
                    Exclusion::MultiAllelic => report.multi_allelic += 1,
                    Exclusion::Ambiguous => report.ambiguous += 1,
                    Exclusion::NonAutosomal => {
                        report.non_autosomal += 1;
                        if warned_chromosomes.insert(identity.chromosome.clone()) {
                            warn!(
                                "variants on chromosome {} are skipped; only autosomes are scored",
                                identity.chromosome
                            );
                        }
                    }
                }
                container.skip_genotype_block()?;
                continue;
            }

            if engine.thresholds().is_disabled() {
                container.skip_genotype_block()?;
            } else {
                let layout = container.layout();
                let payload = container.genotype_block(block_offset)?;
                let decision = engine.evaluate(layout, payload, mask)?;
                report.filter.record(decision);
                if !decision.is_retained() {
                    debug!("{} excluded: {decision:?}", identity.id);
                    continue;
                }
            }
            records.push(VariantRecord::new(identity, Arc::clone(&source), block_offset));
        }
        progress.on_container_finish(path);
        info!(
            "'{}': {} variants read, {} catalogued so far",
            path.display(),
            variant_count,
            records.len()
        );
    }

    info!("{report}");
    if report.ambiguous > 0 {
        warn!(
            "{} strand-ambiguous (A/T or C/G) variants were skipped; pass keep_ambiguous to retain them",
            report.ambiguous
        );
    }
    if report.multi_allelic > 0 {
        warn!(
            "{} variants without exactly two alleles were skipped; dosages are only defined for biallelic variants",
            report.multi_allelic
        );
    }

    if !duplicates.is_empty() {
        warn!(
            "{} identities occur more than once, starting with {}",
            duplicates.len(),
            duplicates[0]
        );
        let duplicated: AHashSet<&str> = duplicates.iter().map(String::as_str).collect();
        let valid = records
            .iter()
            .filter(|record| !duplicated.contains(record.identity.id.as_str()))
            .map(|record| record.identity.clone())
            .collect();
        return Err(BgenError::DuplicateIdentity { duplicates, valid });
    }

    let total_samples = sample_count.unwrap_or(0) as usize;
    let sample_names = sample_names
        .unwrap_or_else(|| (0..total_samples).map(|idx| format!("sample_{idx}")).collect());
    Ok(Catalog {
        records,
        sample_names,
        report,
    })
}

#[derive(Debug, PartialEq, Eq)]
enum Exclusion {
    Unselected,
    MultiAllelic,
    Ambiguous,
    NonAutosomal,
}

fn exclusion_reason(identity: &VariantIdentity, options: &CatalogOptions) -> Option<Exclusion> {
    if !options.selection.admits(&identity.id) {
        return Some(Exclusion::Unselected);
    }
    if identity.alleles.len() != 2 {
        return Some(Exclusion::MultiAllelic);
    }
    if !options.keep_non_autosomal && !is_autosome(&identity.chromosome) {
        return Some(Exclusion::NonAutosomal);
    }
    if !options.keep_ambiguous && is_ambiguous(identity.first_allele(), identity.last_allele()) {
        return Some(Exclusion::Ambiguous);
    }
    None
}

/// Every container must agree on the sample set; the first one with identifiers
/// names the samples.
fn check_samples(
    container: &BgenContainer,
    options: &CatalogOptions,
    mask: &SampleMask,
    sample_count: &mut Option<u32>,
    sample_names: &mut Option<Vec<String>>,
) -> Result<()> {
    let path = container.path();
    let count = container.header().sample_count;
    match *sample_count {
        Some(expected) if expected != count => {
            return Err(BgenError::container(
                &**path,
                format!("has {count} samples but earlier containers have {expected}"),
            ));
        }
        _ => *sample_count = Some(count),
    }
    if mask.len() != count as usize {
        return Err(BgenError::container(
            &**path,
            format!(
                "has {count} samples but the sample mask covers {}",
                mask.len()
            ),
        ));
    }
    if let Some(identifiers) = container.sample_identifiers() {
        if let Some(expected) = &options.expected_samples {
            if let Some(idx) = (0..identifiers.len().max(expected.len()))
                .find(|&i| identifiers.get(i) != expected.get(i))
            {
                return Err(BgenError::container(
                    &**path,
                    format!(
                        "sample {idx} is '{}' in the container but '{}' in the sample list",
                        identifiers.get(idx).map(String::as_str).unwrap_or("<none>"),
                        expected.get(idx).map(String::as_str).unwrap_or("<none>")
                    ),
                ));
            }
        }
        if sample_names.is_none() {
            *sample_names = Some(identifiers.to_vec());
        }
    } else if sample_names.is_none() {
        *sample_names = options.expected_samples.clone();
    }
    Ok(())
}

/// One line per identity: `id  chromosome  position  first  last`.
pub fn write_identity_list<W: std::io::Write>(
    out: &mut W,
    identities: &[VariantIdentity],
) -> std::io::Result<()> {
    for identity in identities {
        writeln!(out, "{identity}")?;
    }
    Ok(())
}
