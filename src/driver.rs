use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::channel;

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info, warn};
use unwrap::unwrap;

use crate::allele::Allele;
use crate::caller::{
    CancerCaller, CancerCallerSettings, IndividualCaller, IndividualCallerSettings,
    PopulationCaller, PopulationCallerSettings, PriorSettings, RefCall, TrioCaller,
    TrioCallerSettings, VariantCall, VariantCaller,
};
use crate::candidate::{
    merge_candidates, AssemblerSettings, CandidateSource, CigarScanner, CigarScannerSettings,
    InclusionPolicy, LocalAssembler, SourceMask, VcfCandidateSource,
};
use crate::chrom_list::ChromList;
use crate::cli::{CallerMode, Settings};
use crate::errors::{MorayError, MorayResult};
use crate::genome_region::{merge_regions, GenomeRegion, IntRange};
use crate::haplotype::HaplotypeArena;
use crate::haplotype_gen::{HaplotypeGenerator, HaplotypeGeneratorSettings};
use crate::likelihood::{HaplotypeLikelihoodCache, PairHmmSettings};
use crate::phaser::{Phaser, PhaserSettings};
use crate::read::SampleName;
use crate::read_manager::ReadManager;
use crate::read_pipeline::{
    DownsampleSettings, ReadFilter, ReadPipeline, ReadTransformer, StandardFilterSettings,
};
use crate::reference::ReferenceCache;
use crate::run_stats::{write_run_stats, RunStats};
use crate::vcf_output::{concatenate_chrom_vcfs, VcfChromWriter};

/// Size of the calling windows a target region is split into
const WINDOW_SIZE: i64 = 100_000;

/// Extra reference and read context fetched on each side of a calling window
const WINDOW_MARGIN: i64 = 300;

/// Haplotypes below this marginal posterior are pruned between generator rounds
const MIN_HAPLOTYPE_POSTERIOR: f64 = 0.01;

/// Run the full calling pipeline over all configured regions
///
pub fn run_calling(settings: &Settings) -> MorayResult<()> {
    let read_filenames = settings
        .all_read_filenames()
        .map_err(|e| MorayError::usage(e.to_string()))?;
    let (read_manager, chrom_list) =
        ReadManager::new(&read_filenames, settings.max_open_read_files)?;
    let samples = read_manager.samples();
    info!(
        "Found {} sample(s) in {} alignment file(s)",
        samples.len(),
        read_filenames.len()
    );

    validate_sample_roles(settings, &samples)?;

    // The read buffer target is advisory; the downsampler is the only enforcement mechanism
    debug!(
        "Read buffer memory target {} GB",
        settings.target_read_buffer_memory
    );

    let reference =
        ReferenceCache::from_fasta(&settings.reference, settings.max_reference_cache_memory);

    let contig_ploidies = settings
        .parse_contig_ploidies()
        .map_err(|e| MorayError::usage(e.to_string()))?;

    let target_regions = get_target_regions(settings, &chrom_list)?;

    // Persist the frozen settings next to the VCF output before any processing starts, so the
    // run configuration survives for follow-on steps
    let output_path = settings.output_path();
    if let Some(output_path) = &output_path {
        write_settings_json(settings, output_path);
    }

    let temp_dir = create_temp_dir()?;
    info!("Using temporary directory {temp_dir}");

    let external_source = match &settings.regenotype {
        Some(filename) => Some(VcfCandidateSource::new(filename)?),
        None => None,
    };

    let worker_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(settings.threads)
        .build()
        .unwrap();

    let mut run_stats = RunStats::new(samples.len());
    let start_time = std::time::Instant::now();

    // One job per contig; contigs share no mutable state so this is embarrassingly parallel
    let mut chrom_paths = vec![None; chrom_list.data.len()];
    {
        let (tx, rx) = channel();
        let read_manager = &read_manager;
        let reference = &reference;
        let chrom_list_ref = &chrom_list;
        let samples_ref = &samples;
        let contig_ploidies = &contig_ploidies;
        let external_source = &external_source;
        let temp_dir_ref = &temp_dir;

        worker_pool.scope(|scope| {
            for (chrom_index, chrom_regions) in target_regions.into_iter() {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let chrom_label = &chrom_list_ref.data[chrom_index].label;
                    let vcf_path = temp_dir_ref.join(format!("{chrom_label}.vcf"));
                    let contig_ploidy = contig_ploidies
                        .get(chrom_label)
                        .copied()
                        .unwrap_or(settings.organism_ploidy);

                    let contig_stats = process_contig(
                        settings,
                        read_manager,
                        reference,
                        chrom_list_ref,
                        samples_ref,
                        external_source.as_ref(),
                        chrom_index,
                        contig_ploidy,
                        &chrom_regions,
                        &vcf_path,
                    );
                    tx.send((chrom_index, vcf_path, contig_stats)).unwrap();
                });
            }
            drop(tx);
        });

        for (chrom_index, vcf_path, contig_stats) in rx {
            chrom_paths[chrom_index] = Some(vcf_path);
            run_stats.merge(&contig_stats);
        }
    }

    // Contig output order is fixed by the chromosome list
    let ordered_paths = chrom_paths.into_iter().flatten().collect::<Vec<_>>();
    let record_count = concatenate_chrom_vcfs(
        &ordered_paths,
        output_path.as_deref(),
        &settings.reference,
        &chrom_list,
        &samples,
    );
    info!("Wrote {record_count} VCF records");

    run_stats.runtime_seconds = start_time.elapsed().as_secs_f64();
    if let Some(output_path) = &output_path {
        write_run_stats(&run_stats, output_path);
    }
    if run_stats.skipped_region_count > 0 {
        warn!(
            "Skipped {} sub-region(s) due to haplotype overflow",
            run_stats.skipped_region_count
        );
    }

    unwrap!(
        std::fs::remove_dir_all(&temp_dir),
        "Unable to remove temporary directory '{}'",
        temp_dir
    );
    Ok(())
}

fn validate_sample_roles(settings: &Settings, samples: &[SampleName]) -> MorayResult<()> {
    match settings.caller {
        CallerMode::Individual => {
            if samples.len() != 1 {
                return Err(MorayError::usage(format!(
                    "The individual caller requires exactly one sample, found {}",
                    samples.len()
                )));
            }
        }
        CallerMode::Cancer => {
            if let Some(normal) = &settings.normal_sample {
                if !samples.contains(normal) {
                    return Err(MorayError::usage(format!(
                        "Normal sample '{normal}' is not present in the read alignment files"
                    )));
                }
            }
        }
        CallerMode::Trio => {
            let maternal = settings.maternal_sample.as_ref().unwrap();
            let paternal = settings.paternal_sample.as_ref().unwrap();
            for (role, sample) in [("maternal", maternal), ("paternal", paternal)] {
                if !samples.contains(sample) {
                    return Err(MorayError::usage(format!(
                        "The {role} sample '{sample}' is not present in the read alignment files"
                    )));
                }
            }
            if samples.len() != 3 {
                return Err(MorayError::usage(format!(
                    "The trio caller requires exactly three samples, found {}",
                    samples.len()
                )));
            }
        }
        CallerMode::Population => {}
    }
    Ok(())
}

/// Resolve the configured target regions minus skip regions, grouped per contig
///
fn get_target_regions(
    settings: &Settings,
    chrom_list: &ChromList,
) -> MorayResult<Vec<(usize, Vec<IntRange>)>> {
    let region_strings = settings
        .all_region_strings(false)
        .map_err(|e| MorayError::usage(e.to_string()))?;
    let skip_strings = settings
        .all_region_strings(true)
        .map_err(|e| MorayError::usage(e.to_string()))?;

    let mut targets = if region_strings.is_empty() {
        chrom_list
            .data
            .iter()
            .enumerate()
            .map(|(chrom_index, info)| GenomeRegion::new(chrom_index, 0, info.length as i64))
            .collect()
    } else {
        let mut targets = Vec::new();
        for region_string in region_strings.iter() {
            targets.push(
                GenomeRegion::from_region_str(chrom_list, region_string)
                    .map_err(|e| MorayError::usage(e.to_string()))?,
            );
        }
        merge_regions(targets)
    };

    if !skip_strings.is_empty() {
        let mut skips = Vec::new();
        for skip_string in skip_strings.iter() {
            skips.push(
                GenomeRegion::from_region_str(chrom_list, skip_string)
                    .map_err(|e| MorayError::usage(e.to_string()))?,
            );
        }
        let skips = merge_regions(skips);
        targets = subtract_regions(targets, &skips);
    }

    let mut by_chrom: BTreeMap<usize, Vec<IntRange>> = BTreeMap::new();
    for target in targets {
        by_chrom
            .entry(target.chrom_index)
            .or_default()
            .push(target.range);
    }
    Ok(by_chrom.into_iter().collect())
}

fn subtract_regions(targets: Vec<GenomeRegion>, skips: &[GenomeRegion]) -> Vec<GenomeRegion> {
    let mut result = Vec::new();
    for target in targets {
        let mut pieces = vec![target];
        for skip in skips {
            let mut next_pieces = Vec::new();
            for piece in pieces {
                if !piece.intersect(skip) {
                    next_pieces.push(piece);
                    continue;
                }
                if skip.range.start > piece.range.start {
                    next_pieces.push(GenomeRegion::new(
                        piece.chrom_index,
                        piece.range.start,
                        skip.range.start,
                    ));
                }
                if skip.range.end < piece.range.end {
                    next_pieces.push(GenomeRegion::new(
                        piece.chrom_index,
                        skip.range.end,
                        piece.range.end,
                    ));
                }
            }
            pieces = next_pieces;
        }
        result.extend(pieces);
    }
    result
}

/// Find an unused moray-temp[-N] directory under the working directory and create it
///
fn create_temp_dir() -> MorayResult<Utf8PathBuf> {
    const TEMP_DIR_BASE: &str = const_format::concatcp!(env!("CARGO_PKG_NAME"), "-temp");
    for attempt in 0..1000 {
        let candidate = if attempt == 0 {
            Utf8PathBuf::from(TEMP_DIR_BASE)
        } else {
            Utf8PathBuf::from(format!("{TEMP_DIR_BASE}-{attempt}"))
        };
        if !candidate.exists() {
            std::fs::create_dir(&candidate).map_err(|e| {
                MorayError::input(format!("Can't create temporary directory '{candidate}': {e}"))
            })?;
            return Ok(candidate);
        }
    }
    Err(MorayError::internal(
        "Exhausted temporary directory name candidates".to_string(),
    ))
}

/// Serialize the validated settings next to the VCF output
///
fn write_settings_json(settings: &Settings, output_path: &Utf8Path) {
    let path = {
        let mut path = output_path.to_owned();
        path.set_extension("settings.json");
        path
    };
    let file = unwrap!(
        std::fs::File::create(&path),
        "Unable to create settings file: '{}'",
        path
    );
    unwrap!(
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), settings),
        "Failed to serialize settings"
    );
    info!("Wrote run settings to {path}");
}

/// Build the configured caller for one contig ploidy
///
fn build_caller(settings: &Settings, samples: &[SampleName], ploidy: usize) -> VariantCaller {
    let prior = PriorSettings {
        snp_heterozygosity: settings.snp_heterozygosity,
        indel_heterozygosity: settings.indel_heterozygosity,
    };
    match settings.caller {
        CallerMode::Individual => VariantCaller::Individual(IndividualCaller {
            settings: IndividualCallerSettings {
                sample: samples[0].clone(),
                ploidy,
                prior,
                min_variant_posterior: settings.min_variant_posterior,
                min_refcall_posterior: settings.min_refcall_posterior,
                refcalls: settings.refcalls,
            },
        }),
        CallerMode::Population => VariantCaller::Population(PopulationCaller {
            settings: PopulationCallerSettings {
                samples: samples.to_vec(),
                ploidy,
                prior,
                uniform_population_prior: settings.uniform_population_prior,
                min_variant_posterior: settings.min_variant_posterior,
                min_refcall_posterior: settings.min_refcall_posterior,
                refcalls: settings.refcalls,
            },
        }),
        CallerMode::Cancer => VariantCaller::Cancer(CancerCaller {
            settings: CancerCallerSettings {
                samples: samples.to_vec(),
                normal: settings.normal_sample.clone(),
                ploidy,
                prior,
                somatic_mutation_rate: settings.somatic_mutation_rate,
                min_somatic_frequency: settings.min_somatic_frequency,
                credible_mass: settings.credible_mass,
                min_variant_posterior: settings.min_variant_posterior,
                min_somatic_posterior: settings.min_somatic_posterior,
                min_refcall_posterior: settings.min_refcall_posterior,
                refcalls: settings.refcalls,
            },
        }),
        CallerMode::Trio => {
            let maternal = settings.maternal_sample.clone().unwrap();
            let paternal = settings.paternal_sample.clone().unwrap();
            let child = samples
                .iter()
                .find(|sample| **sample != maternal && **sample != paternal)
                .unwrap()
                .clone();
            VariantCaller::Trio(TrioCaller {
                settings: TrioCallerSettings {
                    maternal_sample: maternal,
                    paternal_sample: paternal,
                    child_sample: child,
                    maternal_ploidy: ploidy,
                    paternal_ploidy: ploidy,
                    child_ploidy: ploidy,
                    prior,
                    denovo_mutation_rate: settings.denovo_mutation_rate,
                    max_joint_genotypes: settings.max_joint_genotypes,
                    min_variant_posterior: settings.min_variant_posterior,
                    min_denovo_posterior: settings.min_denovo_posterior,
                    min_refcall_posterior: settings.min_refcall_posterior,
                    refcalls: settings.refcalls,
                },
            })
        }
    }
}

fn build_read_pipeline(settings: &Settings) -> ReadPipeline {
    let filter = ReadFilter::standard(&StandardFilterSettings {
        min_mapping_quality: settings.min_mapping_quality,
        good_base_quality: settings.good_base_quality,
        ..Default::default()
    });
    ReadPipeline {
        filter,
        transformer: ReadTransformer::default(),
        downsample: DownsampleSettings {
            max_coverage: settings.downsample_above,
            target_coverage: settings.downsample_target,
        },
    }
}

/// Process all target windows of one contig, writing calls to a per-contig VCF
///
#[allow(clippy::too_many_arguments)]
fn process_contig(
    settings: &Settings,
    read_manager: &ReadManager,
    reference: &ReferenceCache,
    chrom_list: &ChromList,
    samples: &[SampleName],
    external_source: Option<&VcfCandidateSource>,
    chrom_index: usize,
    contig_ploidy: usize,
    chrom_regions: &[IntRange],
    vcf_path: &Utf8Path,
) -> RunStats {
    let chrom_label = &chrom_list.data[chrom_index].label;
    info!("Processing contig {chrom_label}");

    let caller = build_caller(settings, samples, contig_ploidy);
    let pipeline = build_read_pipeline(settings);
    let phaser = Phaser {
        settings: PhaserSettings {
            min_phase_score: settings.min_phase_score,
            use_unconditional_phase_score: settings.use_unconditional_phase_score,
            disable_read_guided_phasing: settings.disable_read_guided_phasing,
        },
    };

    let mut writer = VcfChromWriter::new(vcf_path, &settings.reference, chrom_list, samples);
    let mut stats = RunStats::new(samples.len());

    for target in chrom_regions {
        let mut window_start = target.start;
        while window_start < target.end {
            let window_end = std::cmp::min(window_start + WINDOW_SIZE, target.end);
            process_window(
                settings,
                read_manager,
                reference,
                chrom_list,
                samples,
                external_source,
                &caller,
                &pipeline,
                &phaser,
                GenomeRegion::new(chrom_index, window_start, window_end),
                &mut writer,
                &mut stats,
            );
            window_start = window_end;
        }
    }
    stats
}

struct WindowRecord {
    sort_pos: i64,
    kind: WindowRecordKind,
}

enum WindowRecordKind {
    Variant {
        call: VariantCall,
        phase_set: Option<i64>,
        sources: SourceMask,
    },
    Reference(RefCall),
}

/// Run the staged pipeline over one calling window
///
#[allow(clippy::too_many_arguments)]
fn process_window(
    settings: &Settings,
    read_manager: &ReadManager,
    reference: &ReferenceCache,
    chrom_list: &ChromList,
    samples: &[SampleName],
    external_source: Option<&VcfCandidateSource>,
    caller: &VariantCaller,
    pipeline: &ReadPipeline,
    phaser: &Phaser,
    window: GenomeRegion,
    writer: &mut VcfChromWriter,
    stats: &mut RunStats,
) {
    // Fetch with margin so boundary-spanning evidence is visible to the window
    let mut fetch_region = window.clone();
    fetch_region.expand_by(chrom_list, WINDOW_MARGIN);
    let fetch_ref = reference.fetch(chrom_list, &fetch_region);

    let raw_reads = samples
        .iter()
        .map(|sample| (sample.clone(), read_manager.fetch_reads(sample, &fetch_region)))
        .collect();
    let reads = pipeline.process(raw_reads);
    if reads.values().all(|sample_reads| sample_reads.is_empty()) {
        return;
    }

    // Candidate generation over all enabled sources
    let mut source_lists: Vec<(CandidateSource, Vec<crate::variant::Variant>)> = Vec::new();
    {
        let inclusion = match settings.caller {
            CallerMode::Cancer => InclusionPolicy::Somatic {
                normal: settings.normal_sample.clone(),
                min_expected_vaf: settings.min_somatic_frequency,
            },
            _ => InclusionPolicy::Germline,
        };
        let mut scanner = CigarScanner::new(
            CigarScannerSettings {
                inclusion,
                ..Default::default()
            },
            fetch_region.clone(),
            &fetch_ref,
        );
        for (sample, sample_reads) in reads.iter() {
            for read in sample_reads {
                scanner.add_read(sample, read);
            }
        }
        source_lists.push((CandidateSource::Cigar, scanner.generate()));

        let assembler = LocalAssembler::new(
            AssemblerSettings {
                kmer_sizes: settings.kmer_sizes.clone(),
                ..Default::default()
            },
            fetch_region.clone(),
            &fetch_ref,
        );
        let all_reads = reads.values().flatten().cloned().collect::<Vec<_>>();
        source_lists.push((CandidateSource::Assembly, assembler.generate(&all_reads)));

        if let Some(external) = external_source {
            source_lists.push((
                CandidateSource::External,
                external.generate(chrom_list, &fetch_region, &fetch_ref),
            ));
        }
    }

    let mut source_masks: HashMap<crate::variant::Variant, SourceMask> = HashMap::new();
    for (source, variants) in source_lists.iter() {
        for variant in variants {
            source_masks.entry(variant.clone()).or_default().set(*source);
        }
    }
    let candidates = merge_candidates(
        source_lists.into_iter().map(|(_, list)| list).collect(),
        &fetch_region,
    );
    // This window only owns candidates starting inside it; neighbours own the rest
    let candidates = candidates
        .into_iter()
        .filter(|variant| {
            variant.region.range.start >= window.range.start
                && variant.region.range.start < window.range.end
        })
        .collect::<Vec<_>>();
    if candidates.is_empty() {
        return;
    }
    stats.candidate_count += candidates.len() as u64;

    let mut generator = HaplotypeGenerator::new(
        HaplotypeGeneratorSettings {
            max_haplotypes: settings.max_haplotypes,
            lagging: settings.phasing_level.to_lagging_policy(),
            ..Default::default()
        },
        fetch_region.clone(),
        &fetch_ref,
        &candidates,
    );

    let mut window_records: Vec<WindowRecord> = Vec::new();
    let mut call_watermark = window.range.start;

    while !generator.done() {
        let (haplotypes, active_region) = match generator.progress() {
            Ok(x) => x,
            Err(region_error) => {
                warn!("{region_error}; skipping sub-region");
                stats.skipped_region_count += 1;
                generator.skip_active_region();
                continue;
            }
        };

        let mut arena = HaplotypeArena::default();
        for haplotype in haplotypes.iter() {
            arena.insert(haplotype.clone());
        }

        let region_ref_begin = (active_region.range.start - fetch_region.range.start) as usize;
        let region_ref_end = (active_region.range.end - fetch_region.range.start) as usize;
        let region_ref = &fetch_ref[region_ref_begin..region_ref_end];

        let mut likelihood_cache = HaplotypeLikelihoodCache::new(PairHmmSettings {
            disable_inactive_flank_scoring: settings.disable_inactive_flank_scoring,
            ..Default::default()
        });

        let latents = caller.infer_latents(
            &active_region,
            region_ref,
            &reads,
            &arena,
            &mut likelihood_cache,
        );

        // Posterior-driven haplotype filtering and holdout feedback
        let haplotype_posteriors = latents.haplotype_posteriors();
        let survivors = {
            let mut survivors = haplotypes
                .iter()
                .enumerate()
                .filter(|(id, _)| haplotype_posteriors[*id] >= MIN_HAPLOTYPE_POSTERIOR)
                .map(|(_, haplotype)| haplotype.clone())
                .collect::<Vec<_>>();
            if survivors.is_empty() {
                survivors = haplotypes.clone();
            }
            survivors
        };
        for (id, haplotype) in haplotypes.iter().enumerate() {
            let posterior = haplotype_posteriors[id];
            if posterior > 0.05 && posterior < 0.95 {
                for allele in haplotype.alleles.iter() {
                    generator.set_allele_ambiguity(allele.clone(), 4.0 * posterior * (1.0 - posterior));
                }
            }
        }

        if generator.keep_haplotypes(&survivors) {
            // Held-out alleles re-entered the tree; rerun inference on the same sub-region
            continue;
        }

        // Candidates owned by this sub-region and not yet called
        let callable = candidates
            .iter()
            .filter(|variant| {
                variant.region.range.start >= call_watermark
                    && active_region.contains(&variant.region)
            })
            .cloned()
            .collect::<Vec<_>>();

        if !callable.is_empty() {
            let calls = caller.call_variants(&callable, &latents, &arena, &reads);

            let called_alleles = calls
                .iter()
                .map(|call| call.variant.alt_allele())
                .collect::<Vec<Allele>>();
            let uncalled = callable
                .iter()
                .filter(|variant| !called_alleles.contains(&variant.alt_allele()))
                .cloned()
                .collect::<Vec<_>>();
            let refcalls = caller.call_reference(&uncalled, &latents, &arena, &reads);

            let phase_map = phaser.phase(&calls, caller, &latents, &arena, &reads);
            let mut set_sizes: HashMap<usize, usize> = HashMap::new();
            for representative in phase_map.values() {
                *set_sizes.entry(*representative).or_insert(0) += 1;
            }
            // The PS value is the position of the set's first call
            let representative_pos: HashMap<usize, i64> = phase_map
                .values()
                .map(|&rep| (rep, calls[rep].variant.region.range.start))
                .collect();

            for (call_index, call) in calls.into_iter().enumerate() {
                let representative = phase_map[&call_index];
                let phase_set = if set_sizes[&representative] > 1 {
                    stats.phased_call_count += 1;
                    Some(representative_pos[&representative])
                } else {
                    None
                };
                let sources = source_masks
                    .get(&call.variant)
                    .copied()
                    .unwrap_or_default();
                window_records.push(WindowRecord {
                    sort_pos: call.variant.region.range.start,
                    kind: WindowRecordKind::Variant {
                        call,
                        phase_set,
                        sources,
                    },
                });
            }
            for refcall in refcalls {
                window_records.push(WindowRecord {
                    sort_pos: refcall.region.range.start,
                    kind: WindowRecordKind::Reference(refcall),
                });
            }

            call_watermark = std::cmp::max(call_watermark, active_region.range.end);
        }

        generator.force_forward(&active_region);
    }

    // Calls within one sub-region are emitted atomically after phasing; the per-window sort
    // keeps the whole contig stream in ascending order
    window_records.sort_by_key(|record| record.sort_pos);
    for record in window_records {
        match record.kind {
            WindowRecordKind::Variant {
                call,
                phase_set,
                sources,
            } => {
                writer.write_variant_call(
                    &call,
                    phase_set,
                    sources,
                    &fetch_ref,
                    fetch_region.range.start,
                );
                stats.emitted_record_count += 1;
            }
            WindowRecordKind::Reference(refcall) => {
                writer.write_ref_call(&refcall);
                stats.refcall_record_count += 1;
                stats.emitted_record_count += 1;
            }
        }
    }
}
