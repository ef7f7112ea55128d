//! End-to-end calling scenarios over in-memory reads
//!

use std::sync::Arc;

use crate::caller::{
    CancerCaller, CancerCallerSettings, IndividualCaller, IndividualCallerSettings,
    PopulationCaller, PopulationCallerSettings, PriorSettings, TrioCaller, TrioCallerSettings,
    VariantCall, VariantCaller,
};
use crate::errors::RegionError;
use crate::genome_region::GenomeRegion;
use crate::haplotype::HaplotypeArena;
use crate::haplotype_gen::{HaplotypeGenerator, HaplotypeGeneratorSettings};
use crate::likelihood::{HaplotypeLikelihoodCache, PairHmmSettings};
use crate::phaser::{Phaser, PhaserSettings};
use crate::read::test_utils::make_test_read;
use crate::read_pipeline::ReadMap;
use crate::variant::Variant;

fn test_reference() -> Vec<u8> {
    // 80bp with no repeat structure near the variant sites
    b"TGCATGGATCCGAATCGGCATTGACGTAGCATGGATTCGTACTGGCATCAGTTACGGATCCATGCAATCGTAGCTAGCTA".to_vec()
}

/// Assemble a read map from (sample, read sequences at positions) specs, with alternating
/// strands and sequential read ids
///
fn build_read_map(specs: &[(&str, Vec<(i64, Vec<u8>)>)]) -> ReadMap {
    let mut next_id = 0;
    let mut result = ReadMap::new();
    for (sample, reads) in specs {
        let mut sample_reads = Vec::new();
        for (index, (pos, seq)) in reads.iter().enumerate() {
            let mut read = make_test_read(0, *pos, seq, 30);
            read.id = next_id;
            read.is_reverse = index % 2 == 1;
            next_id += 1;
            sample_reads.push(Arc::new(read));
        }
        result.insert(sample.to_string(), sample_reads);
    }
    result
}

fn snv_candidate(pos: i64, ref_base: u8, alt_base: u8) -> Variant {
    Variant::new(GenomeRegion::new(0, pos, pos + 1), &[ref_base], &[alt_base])
}

fn generator_settings(max_haplotypes: usize) -> HaplotypeGeneratorSettings {
    HaplotypeGeneratorSettings {
        max_haplotypes,
        region_padding: 10,
        ..Default::default()
    }
}

/// Drive the generator/inference loop over one window, mirroring the production driver
///
fn call_window(
    caller: &VariantCaller,
    window_ref: &[u8],
    reads: &ReadMap,
    candidates: &[Variant],
    max_haplotypes: usize,
) -> (Vec<VariantCall>, usize) {
    let window = GenomeRegion::new(0, 0, window_ref.len() as i64);
    let mut generator =
        HaplotypeGenerator::new(generator_settings(max_haplotypes), window, window_ref, candidates);

    let mut calls = Vec::new();
    let mut skipped = 0;
    let mut watermark = 0i64;
    while !generator.done() {
        let (haplotypes, active_region) = match generator.progress() {
            Ok(x) => x,
            Err(RegionError::HaplotypeOverflow { .. }) => {
                skipped += 1;
                generator.skip_active_region();
                continue;
            }
        };

        // Invariant: returned haplotypes are pairwise distinct by materialised sequence
        for (i, a) in haplotypes.iter().enumerate() {
            for b in haplotypes.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }

        let mut arena = HaplotypeArena::default();
        for haplotype in haplotypes.iter() {
            arena.insert(haplotype.clone());
        }
        let region_ref = &window_ref[active_region.range.start as usize
            ..active_region.range.end as usize];
        let mut cache = HaplotypeLikelihoodCache::new(PairHmmSettings::default());
        let latents = caller.infer_latents(&active_region, region_ref, reads, &arena, &mut cache);

        // Per-sample genotype posteriors are normalized
        let (_, sample_posteriors) = caller.genotype_posteriors(&latents);
        for (_, posteriors) in sample_posteriors {
            let total: f64 = posteriors.iter().sum();
            assert!((total - 1.0).abs() < 1e-6);
        }

        let survivors = {
            let posteriors = latents.haplotype_posteriors();
            let kept = haplotypes
                .iter()
                .enumerate()
                .filter(|(id, _)| posteriors[*id] >= 0.01)
                .map(|(_, h)| h.clone())
                .collect::<Vec<_>>();
            if kept.is_empty() {
                haplotypes.clone()
            } else {
                kept
            }
        };
        if generator.keep_haplotypes(&survivors) {
            continue;
        }

        let callable = candidates
            .iter()
            .filter(|v| v.region.range.start >= watermark && active_region.contains(&v.region))
            .cloned()
            .collect::<Vec<_>>();
        let new_calls = caller.call_variants(&callable, &latents, &arena, reads);

        // Invariant: every call's alt allele is in some sample's called genotype
        for call in new_calls.iter() {
            assert!(call.sample_calls.values().any(|sc| sc.alt_count > 0));
        }
        calls.extend(new_calls);

        watermark = std::cmp::max(watermark, active_region.range.end);
        generator.force_forward(&active_region);
    }
    (calls, skipped)
}

fn individual_caller(sample: &str, ploidy: usize) -> VariantCaller {
    VariantCaller::Individual(IndividualCaller {
        settings: IndividualCallerSettings {
            sample: sample.to_string(),
            ploidy,
            prior: PriorSettings::default(),
            min_variant_posterior: 10.0,
            min_refcall_posterior: 2.0,
            refcalls: false,
        },
    })
}

#[test]
fn test_heterozygous_snv_diploid() {
    let reference = test_reference();
    let mut alt_seq = reference.clone();
    assert_eq!(reference[30], b'A');
    alt_seq[30] = b'C';

    let mut read_specs = Vec::new();
    for i in 0..40 {
        let seq = if i % 2 == 0 {
            reference.clone()
        } else {
            alt_seq.clone()
        };
        read_specs.push((0i64, seq));
    }
    let reads = build_read_map(&[("sample1", read_specs)]);
    let candidates = vec![snv_candidate(30, b'A', b'C')];

    let caller = individual_caller("sample1", 2);
    let (calls, skipped) = call_window(&caller, &reference, &reads, &candidates, 64);

    assert_eq!(skipped, 0);
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(call.variant, candidates[0]);
    let sample_call = &call.sample_calls["sample1"];
    assert_eq!(sample_call.ploidy, 2);
    assert_eq!(sample_call.alt_count, 1);
    assert!(sample_call.genotype_quality >= 20.0);
    assert!(call.posterior >= 20.0);
}

#[test]
fn test_deterministic_reruns() {
    let reference = test_reference();
    let mut alt_seq = reference.clone();
    alt_seq[30] = b'T';

    let run = || {
        let read_specs = (0..40)
            .map(|i| {
                (
                    0i64,
                    if i % 2 == 0 {
                        reference.clone()
                    } else {
                        alt_seq.clone()
                    },
                )
            })
            .collect::<Vec<_>>();
        let reads = build_read_map(&[("sample1", read_specs)]);
        let candidates = vec![snv_candidate(30, b'A', b'T')];
        let caller = individual_caller("sample1", 2);
        call_window(&caller, &reference, &reads, &candidates, 64).0
    };

    let first = run();
    let second = run();
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.posterior.to_bits(), b.posterior.to_bits());
        assert_eq!(a.variant, b.variant);
    }
}

#[test]
fn test_homozygous_deletion_diploid() {
    let reference = test_reference();
    // Delete [30,34) from every read
    let deleted = [&reference[..30], &reference[34..]].concat();

    let mut read_specs = Vec::new();
    for _ in 0..30 {
        read_specs.push((0i64, deleted.clone()));
    }
    let reads = {
        use rust_htslib::bam::record::Cigar;
        let mut reads = build_read_map(&[("sample1", read_specs)]);
        for read in reads.get_mut("sample1").unwrap().iter_mut() {
            let read = Arc::get_mut(read).unwrap();
            read.cigar = vec![
                Cigar::Match(30),
                Cigar::Del(4),
                Cigar::Match(deleted.len() as u32 - 30),
            ];
        }
        reads
    };
    let candidates = vec![Variant::new(
        GenomeRegion::new(0, 30, 34),
        &reference[30..34],
        b"",
    )];

    let caller = individual_caller("sample1", 2);
    let (calls, _) = call_window(&caller, &reference, &reads, &candidates, 64);

    assert_eq!(calls.len(), 1);
    let sample_call = &calls[0].sample_calls["sample1"];
    assert_eq!(sample_call.alt_count, 2);
}

#[test]
fn test_haploid_homozygous_variant() {
    let reference = test_reference();
    let mut alt_seq = reference.clone();
    alt_seq[30] = b'T';

    let read_specs = (0..20).map(|_| (0i64, alt_seq.clone())).collect();
    let reads = build_read_map(&[("sample1", read_specs)]);
    let candidates = vec![snv_candidate(30, b'A', b'T')];

    let caller = individual_caller("sample1", 1);
    let (calls, _) = call_window(&caller, &reference, &reads, &candidates, 64);

    assert_eq!(calls.len(), 1);
    let sample_call = &calls[0].sample_calls["sample1"];
    assert_eq!(sample_call.ploidy, 1);
    assert_eq!(sample_call.alt_count, 1);
}

#[test]
fn test_population_joint_calling() {
    let reference = test_reference();
    let mut alt_seq = reference.clone();
    alt_seq[30] = b'T';

    let het_specs = || {
        (0..20)
            .map(|i| {
                (
                    0i64,
                    if i % 2 == 0 {
                        reference.clone()
                    } else {
                        alt_seq.clone()
                    },
                )
            })
            .collect::<Vec<_>>()
    };
    let reads = build_read_map(&[("sampleA", het_specs()), ("sampleB", het_specs())]);
    let candidates = vec![snv_candidate(30, b'A', b'T')];

    let caller = VariantCaller::Population(PopulationCaller {
        settings: PopulationCallerSettings {
            samples: vec!["sampleA".to_string(), "sampleB".to_string()],
            ploidy: 2,
            prior: PriorSettings::default(),
            uniform_population_prior: false,
            min_variant_posterior: 10.0,
            min_refcall_posterior: 2.0,
            refcalls: false,
        },
    });
    let (calls, _) = call_window(&caller, &reference, &reads, &candidates, 64);

    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].sample_calls["sampleA"].alt_count, 1);
    assert_eq!(calls[0].sample_calls["sampleB"].alt_count, 1);
    assert!(calls[0].posterior >= 20.0);
}

#[test]
fn test_somatic_snv_tumour_normal() {
    let reference = test_reference();
    let mut alt_seq = reference.clone();
    alt_seq[30] = b'T';

    let normal_specs = (0..30).map(|_| (0i64, reference.clone())).collect();
    let tumour_specs = (0..30)
        .map(|i| {
            (
                0i64,
                if i < 6 {
                    alt_seq.clone()
                } else {
                    reference.clone()
                },
            )
        })
        .collect();
    let reads = build_read_map(&[("normal", normal_specs), ("tumour", tumour_specs)]);
    let candidates = vec![snv_candidate(30, b'A', b'T')];

    let caller = VariantCaller::Cancer(CancerCaller {
        settings: CancerCallerSettings {
            samples: vec!["normal".to_string(), "tumour".to_string()],
            normal: Some("normal".to_string()),
            ploidy: 2,
            prior: PriorSettings::default(),
            somatic_mutation_rate: 1e-4,
            min_somatic_frequency: 0.01,
            credible_mass: 0.99,
            min_variant_posterior: 10.0,
            min_somatic_posterior: 10.0,
            min_refcall_posterior: 2.0,
            refcalls: false,
        },
    });
    let (calls, _) = call_window(&caller, &reference, &reads, &candidates, 64);

    assert_eq!(calls.len(), 1);
    let somatic = calls[0].somatic.as_ref().expect("expected a somatic call");
    assert!(somatic.posterior >= 10.0);
    let (lower, upper) = somatic.vaf_credible["tumour"];
    assert!(lower > 0.0);
    assert!(upper >= lower);
    assert!(somatic.vaf["tumour"] > 0.05);

    // A somatic call's alt allele is absent from the normal sample's called genotype
    assert_eq!(calls[0].sample_calls["normal"].alt_count, 0);
}

#[test]
fn test_denovo_snv_trio() {
    let reference = test_reference();
    let mut alt_seq = reference.clone();
    alt_seq[30] = b'T';

    let parent_specs = |_: ()| (0..30).map(|_| (0i64, reference.clone())).collect::<Vec<_>>();
    let child_specs = (0..30)
        .map(|i| {
            (
                0i64,
                if i % 2 == 0 {
                    alt_seq.clone()
                } else {
                    reference.clone()
                },
            )
        })
        .collect();
    let reads = build_read_map(&[
        ("mother", parent_specs(())),
        ("father", parent_specs(())),
        ("child", child_specs),
    ]);
    let candidates = vec![snv_candidate(30, b'A', b'T')];

    let caller = VariantCaller::Trio(TrioCaller {
        settings: TrioCallerSettings {
            maternal_sample: "mother".to_string(),
            paternal_sample: "father".to_string(),
            child_sample: "child".to_string(),
            maternal_ploidy: 2,
            paternal_ploidy: 2,
            child_ploidy: 2,
            prior: PriorSettings::default(),
            denovo_mutation_rate: 1e-7,
            max_joint_genotypes: 1_000_000,
            min_variant_posterior: 10.0,
            min_denovo_posterior: 10.0,
            min_refcall_posterior: 2.0,
            refcalls: false,
        },
    });
    let (calls, _) = call_window(&caller, &reference, &reads, &candidates, 64);

    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert!(call.denovo_posterior.expect("expected a de novo call") >= 10.0);

    // A de novo call's alt allele is absent from both parents' called genotypes
    assert_eq!(call.sample_calls["mother"].alt_count, 0);
    assert_eq!(call.sample_calls["father"].alt_count, 0);
    assert!(call.sample_calls["child"].alt_count > 0);
}

#[test]
fn test_haplotype_overflow_skips_subregion() {
    let reference = test_reference();

    // A long deletion overlapping nine SNV sites forces a joint segment whose haplotype count
    // cannot be reduced below budget within the holdout depth
    let mut candidates = vec![Variant::new(
        GenomeRegion::new(0, 10, 40),
        &reference[10..40],
        b"",
    )];
    for i in 0..9 {
        let pos = 12 + 3 * i;
        let ref_base = reference[pos as usize];
        let alt_base = if ref_base == b'A' { b'C' } else { b'A' };
        candidates.push(snv_candidate(pos, ref_base, alt_base));
    }
    // An independent trailing site past the tangle still gets called
    let trailing_pos = 50;
    assert_eq!(reference[trailing_pos as usize], b'G');
    candidates.push(snv_candidate(trailing_pos, b'G', b'T'));
    candidates.sort();

    let mut alt_seq = reference.clone();
    alt_seq[trailing_pos as usize] = b'T';
    let read_specs = (0..40)
        .map(|i| {
            (
                0i64,
                if i % 2 == 0 {
                    reference.clone()
                } else {
                    alt_seq.clone()
                },
            )
        })
        .collect();
    let reads = build_read_map(&[("sample1", read_specs)]);

    let caller = individual_caller("sample1", 2);
    let (calls, skipped) = call_window(&caller, &reference, &reads, &candidates, 8);

    assert_eq!(skipped, 1);
    assert!(calls.iter().all(|call| call.variant.region.range.start >= 40));
    assert!(calls
        .iter()
        .any(|call| call.variant.region.range.start == trailing_pos));
}

#[test]
fn test_phase_set_from_spanning_reads() {
    let reference = test_reference();
    let (pos1, pos2) = (20usize, 61usize);
    let mut cis_seq = reference.clone();
    assert_eq!(reference[pos1], b'T');
    cis_seq[pos1] = b'A';
    assert_eq!(reference[pos2], b'A');
    cis_seq[pos2] = b'T';

    // 20 spanning reads, all ref-ref or alt-alt
    let read_specs = (0..40)
        .map(|i| {
            (
                0i64,
                if i % 2 == 0 {
                    reference.clone()
                } else {
                    cis_seq.clone()
                },
            )
        })
        .collect();
    let reads = build_read_map(&[("sample1", read_specs)]);
    let candidates = vec![
        snv_candidate(pos1 as i64, b'T', b'A'),
        snv_candidate(pos2 as i64, b'A', b'T'),
    ];

    let caller = individual_caller("sample1", 2);
    let window = GenomeRegion::new(0, 0, reference.len() as i64);
    let mut generator = HaplotypeGenerator::new(
        generator_settings(64),
        window,
        &reference,
        &candidates,
    );

    let (haplotypes, active_region) = generator.progress().unwrap();
    let mut arena = HaplotypeArena::default();
    for haplotype in haplotypes.iter() {
        arena.insert(haplotype.clone());
    }
    let region_ref =
        &reference[active_region.range.start as usize..active_region.range.end as usize];
    let mut cache = HaplotypeLikelihoodCache::new(PairHmmSettings::default());
    let latents = caller.infer_latents(&active_region, region_ref, &reads, &arena, &mut cache);
    let calls = caller.call_variants(&candidates, &latents, &arena, &reads);
    assert_eq!(calls.len(), 2);

    let phaser = Phaser {
        settings: PhaserSettings::default(),
    };
    let score = phaser.phase_score(&calls[0], &calls[1], &caller, &latents, &arena, &reads);
    assert!(score >= 20.0);

    let phase_map = phaser.phase(&calls, &caller, &latents, &arena, &reads);
    assert_eq!(phase_map[&0], phase_map[&1]);
}
