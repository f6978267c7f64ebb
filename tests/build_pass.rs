mod common;

use ahash::AHashSet;
use common::{ContainerSpec, HET, HOM_FIRST, HOM_SECOND, Layout, TestVariant, Workspace, variant};
use gnomon_bgen::BgenError;
use gnomon_bgen::catalog::{CatalogOptions, NoopBuildProgress, VariantSelection, build_catalog};
use gnomon_bgen::container::ContainerSet;
use gnomon_bgen::filter::{FilterEngine, FilterThresholds};
use gnomon_bgen::types::{RegionMembership, SampleMask};

fn ids(records: &[gnomon_bgen::types::VariantRecord]) -> Vec<&str> {
    records.iter().map(|r| r.identity.id.as_str()).collect()
}

fn with_alleles(mut v: TestVariant, first: &str, second: &str) -> TestVariant {
    v.alleles = (first.to_string(), second.to_string());
    v
}

#[test]
fn missingness_threshold_is_strict() {
    let ws = Workspace::new();
    let mut one_missing = vec![HET; 10];
    one_missing[3] = None;
    let mut two_missing = vec![HOM_FIRST; 10];
    two_missing[0] = None;
    two_missing[9] = None;
    let variants = vec![
        variant("at_limit", "1", 10, one_missing),
        variant("over_limit", "1", 20, two_missing),
    ];

    for (idx, layout) in [Layout::Fixed, Layout::Variable { bits: 8 }].into_iter().enumerate() {
        let path = ws.write_bgen(&format!("m{idx}.bgen"), &ContainerSpec::new(layout, true), 10, &variants);
        let options = CatalogOptions {
            thresholds: FilterThresholds {
                max_missingness: 0.1,
                ..FilterThresholds::default()
            },
            ..CatalogOptions::default()
        };
        let catalog =
            build_catalog(&[path], &options, &SampleMask::all(10), &mut NoopBuildProgress).unwrap();

        assert_eq!(ids(&catalog.records), ["at_limit"]);
        assert_eq!(catalog.report.scanned, 2);
        assert_eq!(catalog.report.filter.missingness, 1);
        assert_eq!(catalog.report.filter.retained, 1);
    }
}

#[test]
fn excluded_samples_do_not_count_towards_missingness() {
    let ws = Workspace::new();
    let samples = vec![None, None, HET, HET];
    let path = ws.write_bgen(
        "mask.bgen",
        &ContainerSpec::new(Layout::Variable { bits: 8 }, false),
        4,
        &[variant("rs1", "1", 1, samples)],
    );
    let options = CatalogOptions {
        thresholds: FilterThresholds {
            max_missingness: 0.0,
            ..FilterThresholds::default()
        },
        ..CatalogOptions::default()
    };

    let everyone = build_catalog(&[path.clone()], &options, &SampleMask::all(4), &mut NoopBuildProgress)
        .unwrap();
    assert!(everyone.records.is_empty());

    let called_only = SampleMask::from_indices(4, &[2, 3]);
    let subset = build_catalog(&[path], &options, &called_only, &mut NoopBuildProgress).unwrap();
    assert_eq!(ids(&subset.records), ["rs1"]);
}

#[test]
fn allele_frequency_threshold_uses_hard_calls() {
    let ws = Workspace::new();
    let variants = vec![
        variant("monomorphic", "1", 1, vec![HOM_FIRST; 4]),
        variant("common", "1", 2, vec![HOM_FIRST, HET, HOM_SECOND, HET]),
        variant("uncalled", "1", 3, vec![Some([0.4, 0.3, 0.3]); 4]),
    ];
    let path = ws.write_bgen("maf.bgen", &ContainerSpec::new(Layout::Fixed, false), 4, &variants);

    for hard_call_mode in [false, true] {
        let options = CatalogOptions {
            thresholds: FilterThresholds {
                min_minor_allele_frequency: 0.05,
                hard_call_mode,
                ..FilterThresholds::default()
            },
            ..CatalogOptions::default()
        };
        let catalog =
            build_catalog(&[path.clone()], &options, &SampleMask::all(4), &mut NoopBuildProgress)
                .unwrap();
        assert_eq!(ids(&catalog.records), ["common"], "hard_call_mode = {hard_call_mode}");
        assert_eq!(catalog.report.filter.allele_frequency, 2);
    }
}

#[test]
fn duplicate_identities_fail_with_the_usable_list() {
    let ws = Workspace::new();
    let spec = ContainerSpec::new(Layout::Variable { bits: 8 }, true);
    let first = ws.write_bgen(
        "a.bgen",
        &spec,
        2,
        &[
            variant("rs1", "1", 10, vec![HET, HET]),
            variant("rs2", "1", 20, vec![HET, HET]),
        ],
    );
    let second = ws.write_bgen(
        "b.bgen",
        &spec,
        2,
        &[
            variant("rs3", "2", 5, vec![HET, HET]),
            variant("rs1", "2", 30, vec![HET, HET]),
            variant("rs4", "2", 40, vec![HET, HET]),
        ],
    );

    let err = build_catalog(
        &[first, second],
        &CatalogOptions::default(),
        &SampleMask::all(2),
        &mut NoopBuildProgress,
    )
    .unwrap_err();

    match err {
        BgenError::DuplicateIdentity { duplicates, valid } => {
            assert_eq!(duplicates, ["rs1"]);
            let valid: Vec<&str> = valid.iter().map(|v| v.id.as_str()).collect();
            assert_eq!(valid, ["rs2", "rs3", "rs4"]);
        }
        other => panic!("expected a duplicate error, got {other}"),
    }
}

#[test]
fn chromosomes_must_be_contiguous() {
    let ws = Workspace::new();
    let path = ws.write_bgen(
        "order.bgen",
        &ContainerSpec::new(Layout::Fixed, false),
        1,
        &[
            variant("rs1", "1", 10, vec![HET]),
            variant("rs2", "2", 10, vec![HET]),
            variant("rs3", "1", 20, vec![HET]),
        ],
    );
    let err = build_catalog(
        &[path],
        &CatalogOptions::default(),
        &SampleMask::all(1),
        &mut NoopBuildProgress,
    )
    .unwrap_err();
    assert!(
        matches!(err, BgenError::ContainerFormat { .. }),
        "unexpected error: {err}"
    );
}

#[test]
fn selection_ambiguity_and_autosome_rules() {
    let ws = Workspace::new();
    let variants = vec![
        variant("rs1", "1", 10, vec![HET, HOM_FIRST]),
        with_alleles(variant("rs2", "1", 20, vec![HET, HOM_FIRST]), "A", "T"),
        variant("rs3", "chr2", 5, vec![HET, HOM_FIRST]),
        variant("rs4", "X", 5, vec![HET, HOM_FIRST]),
    ];
    let path = ws.write_bgen("sel.bgen", &ContainerSpec::new(Layout::Fixed, true), 2, &variants);
    let mask = SampleMask::all(2);
    let run = |options: CatalogOptions| {
        build_catalog(&[path.clone()], &options, &mask, &mut NoopBuildProgress).unwrap()
    };

    let defaults = run(CatalogOptions::default());
    assert_eq!(ids(&defaults.records), ["rs1", "rs3"]);
    assert_eq!(defaults.report.ambiguous, 1);
    assert_eq!(defaults.report.non_autosomal, 1);

    let permissive = run(CatalogOptions {
        keep_ambiguous: true,
        keep_non_autosomal: true,
        ..CatalogOptions::default()
    });
    assert_eq!(ids(&permissive.records), ["rs1", "rs2", "rs3", "rs4"]);

    let extract: AHashSet<String> = ["rs3".to_string(), "rs9".to_string()].into_iter().collect();
    let extracted = run(CatalogOptions {
        selection: VariantSelection::Extract(extract),
        ..CatalogOptions::default()
    });
    assert_eq!(ids(&extracted.records), ["rs3"]);
    assert_eq!(extracted.report.unselected, 3);

    let exclude: AHashSet<String> = ["rs1".to_string()].into_iter().collect();
    let excluded = run(CatalogOptions {
        selection: VariantSelection::Exclude(exclude),
        ..CatalogOptions::default()
    });
    assert_eq!(ids(&excluded.records), ["rs3"]);
}

#[test]
fn containers_must_agree_on_samples() {
    let ws = Workspace::new();
    let first = ws.write_bgen(
        "a.bgen",
        &ContainerSpec::new(Layout::Fixed, false).with_sample_ids(&["s1", "s2"]),
        2,
        &[variant("rs1", "1", 1, vec![HET, HET])],
    );
    let renamed = ws.write_bgen(
        "b.bgen",
        &ContainerSpec::new(Layout::Fixed, false).with_sample_ids(&["s1", "zz"]),
        2,
        &[variant("rs2", "2", 1, vec![HET, HET])],
    );
    let larger = ws.write_bgen(
        "c.bgen",
        &ContainerSpec::new(Layout::Fixed, false),
        3,
        &[variant("rs3", "3", 1, vec![HET, HET, HET])],
    );
    let options = CatalogOptions {
        expected_samples: Some(vec!["s1".to_string(), "s2".to_string()]),
        ..CatalogOptions::default()
    };
    let mask = SampleMask::all(2);

    let catalog =
        build_catalog(&[first.clone()], &options, &mask, &mut NoopBuildProgress).unwrap();
    assert_eq!(catalog.sample_names, ["s1", "s2"]);

    for other in [renamed, larger] {
        let err = build_catalog(&[first.clone(), other], &options, &mask, &mut NoopBuildProgress)
            .unwrap_err();
        assert!(matches!(err, BgenError::ContainerFormat { .. }), "unexpected error: {err}");
    }
}

#[test]
fn unnamed_samples_get_positional_names() {
    let ws = Workspace::new();
    let path = ws.write_bgen(
        "anon.bgen",
        &ContainerSpec::new(Layout::Variable { bits: 8 }, false),
        3,
        &[variant("rs1", "1", 1, vec![HET, HET, HET])],
    );
    let catalog = build_catalog(
        &[path],
        &CatalogOptions::default(),
        &SampleMask::all(3),
        &mut NoopBuildProgress,
    )
    .unwrap();
    assert_eq!(catalog.sample_names, ["sample_0", "sample_1", "sample_2"]);
}

#[test]
fn filter_pass_over_a_catalogue_region() {
    let ws = Workspace::new();
    let variants = vec![
        variant("flat", "1", 1, vec![HOM_FIRST; 4]),
        variant("varied", "1", 2, vec![HOM_FIRST, HET, HOM_SECOND, HET]),
        variant("elsewhere", "1", 3, vec![HOM_FIRST, HET, HOM_SECOND, HET]),
    ];
    let path = ws.write_bgen("region.bgen", &ContainerSpec::new(Layout::Variable { bits: 16 }, true), 4, &variants);
    let mask = SampleMask::all(4);
    let mut catalog = build_catalog(
        &[path],
        &CatalogOptions::default(),
        &mask,
        &mut NoopBuildProgress,
    )
    .unwrap();
    assert_eq!(catalog.records.len(), 3);
    catalog.records[2].regions = RegionMembership::single(1);

    let mut engine = FilterEngine::new(FilterThresholds {
        min_minor_allele_frequency: 0.1,
        ..FilterThresholds::default()
    });
    let mut containers = ContainerSet::new();

    let pass = engine
        .filter_records(&mut containers, &catalog.records, 0..3, 0, &mask)
        .unwrap();
    assert_eq!(pass.retained, [1]);
    assert_eq!(pass.report.examined, 2);
    assert_eq!(pass.report.allele_frequency, 1);

    let other = engine
        .filter_records(&mut containers, &catalog.records, 0..3, 1, &mask)
        .unwrap();
    assert_eq!(other.retained, [2]);

    let mut total = pass.report;
    total += other.report;
    assert_eq!(total.examined, 3);
    assert_eq!(total.excluded(), 1);
}
