use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use simple_error::{bail, SimpleResult};
use std::collections::BTreeMap;

use crate::errors::MorayError;
use crate::haplotype_gen::LaggingPolicy;

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum, Deserialize, Serialize)]
pub enum CallerMode {
    Individual,
    Population,
    Cancer,
    Trio,
}

#[derive(Parser, Deserialize, Serialize)]
#[command(
    author,
    version,
    about = "Haplotype-based germline, somatic and trio small variant caller",
    help_template = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}"
)]
#[clap(rename_all = "kebab_case")]
pub struct Settings {
    /// Genome reference in indexed FASTA format
    #[arg(long, value_name = "FILE")]
    pub reference: String,

    /// Alignment file in BAM or CRAM format, one or many
    #[arg(long = "reads", value_name = "FILE", num_args = 1..)]
    pub reads: Vec<String>,

    /// File listing alignment file paths, one per line
    #[arg(long = "reads-file", value_name = "FILE")]
    pub reads_file: Option<String>,

    /// Restrict calling to these regions (samtools format, e.g. chr1:1,000-2,000)
    #[arg(long = "regions", value_name = "REGION", num_args = 1..)]
    pub regions: Vec<String>,

    /// File listing calling regions, one per line
    #[arg(long = "regions-file", value_name = "FILE")]
    pub regions_file: Option<String>,

    /// Regions to exclude from calling
    #[arg(long = "skip-regions", value_name = "REGION", num_args = 1..)]
    pub skip_regions: Vec<String>,

    /// File listing regions to exclude, one per line
    #[arg(long = "skip-regions-file", value_name = "FILE")]
    pub skip_regions_file: Option<String>,

    /// Calling model
    #[arg(long, value_enum, default_value = "individual")]
    pub caller: CallerMode,

    /// Default ploidy for all contigs
    #[arg(long = "organism-ploidy", default_value_t = 2)]
    pub organism_ploidy: usize,

    /// Contig-specific ploidy overrides in the form contig=ploidy
    #[arg(long = "contig-ploidies", value_name = "CONTIG=PLOIDY", num_args = 1..)]
    pub contig_ploidies: Vec<String>,

    /// Name of the normal sample for the cancer caller
    #[arg(long = "normal-sample", value_name = "SAMPLE")]
    pub normal_sample: Option<String>,

    /// Name of the mother sample for the trio caller
    #[arg(long = "maternal-sample", value_name = "SAMPLE")]
    pub maternal_sample: Option<String>,

    /// Name of the father sample for the trio caller
    #[arg(long = "paternal-sample", value_name = "SAMPLE")]
    pub paternal_sample: Option<String>,

    /// Hard bound on the explanatory haplotype count per active sub-region
    #[arg(long = "max-haplotypes", default_value_t = 200)]
    pub max_haplotypes: usize,

    /// How aggressively already-called sites lag into the next active sub-region to extend
    /// phase context
    #[arg(long = "phasing-level", value_enum, default_value = "conservative")]
    pub phasing_level: PhasingLevel,

    /// Minimum phred posterior to emit a variant call
    #[arg(long = "min-variant-posterior", default_value_t = 10.0)]
    pub min_variant_posterior: f64,

    /// Minimum phred posterior to annotate a somatic call
    #[arg(long = "min-somatic-posterior", default_value_t = 10.0)]
    pub min_somatic_posterior: f64,

    /// Minimum phred posterior to annotate a de novo call
    #[arg(long = "min-denovo-posterior", default_value_t = 10.0)]
    pub min_denovo_posterior: f64,

    /// Minimum phred phase score joining two calls into one phase set
    #[arg(long = "min-phase-score", default_value_t = 10.0)]
    pub min_phase_score: f64,

    /// Minimum phred posterior to emit a reference call
    #[arg(long = "min-refcall-posterior", default_value_t = 2.0)]
    pub min_refcall_posterior: f64,

    /// Emit homozygous reference calls at uncalled candidate sites
    #[arg(long)]
    pub refcalls: bool,

    /// Worker threads; 0 selects one per logical cpu, 1 runs fully serial
    #[arg(long, default_value_t = 0)]
    pub threads: usize,

    /// VCF output destination; '-' writes to stdout
    #[arg(long, value_name = "FILE", default_value = "-")]
    pub output: String,

    /// Variant file whose records are regenotyped in addition to discovered candidates
    #[arg(long, value_name = "FILE")]
    pub regenotype: Option<String>,

    /// Expected SNV heterozygosity of the organism
    #[arg(hide = true, long = "snp-heterozygosity", default_value_t = 1e-3)]
    pub snp_heterozygosity: f64,

    /// Expected indel heterozygosity of the organism
    #[arg(hide = true, long = "indel-heterozygosity", default_value_t = 1e-4)]
    pub indel_heterozygosity: f64,

    /// Expected somatic mutation rate per base for the cancer caller
    #[arg(hide = true, long = "somatic-mutation-rate", default_value_t = 1e-4)]
    pub somatic_mutation_rate: f64,

    /// Smallest somatic allele frequency the cancer caller will consider
    #[arg(long = "min-somatic-frequency", default_value_t = 0.01)]
    pub min_somatic_frequency: f64,

    /// Credible mass used for somatic allele frequency intervals
    #[arg(long = "credible-mass", default_value_t = 0.99)]
    pub credible_mass: f64,

    /// Expected de novo mutation rate per base for the trio caller
    #[arg(hide = true, long = "denovo-mutation-rate", default_value_t = 1e-7)]
    pub denovo_mutation_rate: f64,

    /// Bound on the trio caller's joint genotype enumeration
    #[arg(hide = true, long = "max-joint-genotypes", default_value_t = 1_000_000)]
    pub max_joint_genotypes: usize,

    /// Use a flat population haplotype frequency prior instead of the coalescent prior
    #[arg(hide = true, long = "uniform-population-prior")]
    pub uniform_population_prior: bool,

    /// Minimum read mapping quality
    #[arg(long = "min-mapping-quality", default_value_t = 20)]
    pub min_mapping_quality: u8,

    /// Base quality counted as good for the read quality filter
    #[arg(hide = true, long = "good-base-quality", default_value_t = 20)]
    pub good_base_quality: u8,

    /// Downsampling triggers where per-position coverage exceeds this value
    #[arg(long = "downsample-above", default_value_t = 1000)]
    pub downsample_above: u32,

    /// Downsampling reduces coverage to this value in triggered windows
    #[arg(long = "downsample-target", default_value_t = 500)]
    pub downsample_target: u32,

    /// K-mer sizes used by the local re-assembler
    #[arg(hide = true, long = "kmer-sizes", num_args = 1.., default_values_t = vec![10, 25])]
    pub kmer_sizes: Vec<usize>,

    /// Read bases outside the active haplotype region contribute nothing to likelihoods
    #[arg(hide = true, long = "disable-inactive-flank-scoring")]
    pub disable_inactive_flank_scoring: bool,

    /// Compute phase scores without conditioning on the MAP genotype configuration
    #[arg(hide = true, long = "use-unconditional-phase-score")]
    pub use_unconditional_phase_score: bool,

    /// Use genotype posteriors only for phasing, ignoring spanning reads
    #[arg(hide = true, long = "disable-read-guided-phasing")]
    pub disable_read_guided_phasing: bool,

    /// Bound on simultaneously open read file handles
    #[arg(hide = true, long = "max-open-read-files", default_value_t = 250)]
    pub max_open_read_files: usize,

    /// Reference cache memory bound in megabytes
    #[arg(hide = true, long = "max-reference-cache-memory", default_value_t = 500)]
    pub max_reference_cache_memory: usize,

    /// Requested read buffer footprint in gigabytes (advisory)
    #[arg(hide = true, long = "target-read-buffer-memory", default_value_t = 6.0)]
    pub target_read_buffer_memory: f64,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

/// Lagging policy selection exposed on the command line
///
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum, Deserialize, Serialize)]
pub enum PhasingLevel {
    Minimal,
    Conservative,
    Aggressive,
}

impl PhasingLevel {
    pub fn to_lagging_policy(self) -> LaggingPolicy {
        match self {
            PhasingLevel::Minimal => LaggingPolicy::None,
            PhasingLevel::Conservative => LaggingPolicy::Conservative,
            PhasingLevel::Aggressive => LaggingPolicy::Aggressive,
        }
    }
}

impl Settings {
    /// All read alignment file paths, merging --reads with the --reads-file listing
    ///
    pub fn all_read_filenames(&self) -> SimpleResult<Vec<String>> {
        let mut filenames = self.reads.clone();
        if let Some(reads_file) = &self.reads_file {
            let content = match std::fs::read_to_string(reads_file) {
                Ok(x) => x,
                Err(e) => bail!("Can't read reads file list '{reads_file}': {e}"),
            };
            filenames.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string),
            );
        }
        Ok(filenames)
    }

    /// Region strings merged from --regions and --regions-file
    ///
    pub fn all_region_strings(&self, skip: bool) -> SimpleResult<Vec<String>> {
        let (inline, file) = if skip {
            (&self.skip_regions, &self.skip_regions_file)
        } else {
            (&self.regions, &self.regions_file)
        };
        let mut regions = inline.clone();
        if let Some(filename) = file {
            let content = match std::fs::read_to_string(filename) {
                Ok(x) => x,
                Err(e) => bail!("Can't read region file list '{filename}': {e}"),
            };
            regions.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string),
            );
        }
        Ok(regions)
    }

    /// Contig ploidy overrides, rejecting any contig listed more than once
    ///
    pub fn parse_contig_ploidies(&self) -> SimpleResult<BTreeMap<String, usize>> {
        let mut result = BTreeMap::new();
        for entry in self.contig_ploidies.iter() {
            let parts = entry.split('=').collect::<Vec<_>>();
            if parts.len() != 2 {
                bail!("Contig ploidy must have the form contig=ploidy, got '{entry}'");
            }
            let ploidy = match parts[1].parse::<usize>() {
                Ok(x) if (1..=8).contains(&x) => x,
                _ => bail!("Contig ploidy must be an integer in [1,8], got '{entry}'"),
            };
            if result.insert(parts[0].to_string(), ploidy).is_some() {
                bail!("Contig '{}' has multiple ploidy overrides", parts[0]);
            }
        }
        Ok(result)
    }

    pub fn output_path(&self) -> Option<Utf8PathBuf> {
        if self.output == "-" {
            None
        } else {
            Some(Utf8PathBuf::from(&self.output))
        }
    }
}

/// Validate settings and update parameters that can't be processed by clap
///
fn validate_and_fix_settings_impl(settings: Settings) -> SimpleResult<Settings> {
    fn check_required_filename(filename: &str, label: &str) -> SimpleResult<()> {
        if filename.is_empty() {
            bail!("Must specify {label} file");
        }
        if !std::path::Path::new(&filename).exists() {
            bail!("Can't find specified {label} file: '{filename}'");
        }
        Ok(())
    }

    check_required_filename(&settings.reference, "reference fasta")?;

    let read_filenames = settings.all_read_filenames()?;
    if read_filenames.is_empty() {
        bail!("Must specify at least one read alignment file");
    }
    for filename in read_filenames.iter() {
        check_required_filename(filename, "read alignment")?;
    }
    if let Some(filename) = &settings.regenotype {
        check_required_filename(filename, "regenotype variant")?;
    }

    if !(1..=8).contains(&settings.organism_ploidy) {
        bail!("Organism ploidy must be in [1,8]");
    }
    settings.parse_contig_ploidies()?;

    match settings.caller {
        CallerMode::Trio => {
            if settings.maternal_sample.is_none() || settings.paternal_sample.is_none() {
                bail!("The trio caller requires --maternal-sample and --paternal-sample");
            }
        }
        CallerMode::Cancer => {
            if settings.normal_sample.is_none() {
                log::warn!(
                    "No --normal-sample given; all samples are treated as tumour, which reduces somatic classification power"
                );
            }
        }
        _ => {}
    }

    if settings.downsample_target > settings.downsample_above {
        bail!("--downsample-target cannot exceed --downsample-above");
    }
    if !(0.0..1.0).contains(&settings.min_somatic_frequency)
        || settings.min_somatic_frequency <= 0.0
    {
        bail!("--min-somatic-frequency must be in (0,1)");
    }
    if !(0.0..=1.0).contains(&settings.credible_mass) {
        bail!("--credible-mass must be in [0,1]");
    }
    if settings.max_haplotypes < 2 {
        bail!("--max-haplotypes must be at least 2");
    }

    Ok(settings)
}

/// Validate settings and convert failures to the usage error class
///
pub fn validate_and_fix_settings(settings: Settings) -> Result<Settings, MorayError> {
    validate_and_fix_settings_impl(settings).map_err(|e| MorayError::usage(e.to_string()))
}

pub fn parse_settings() -> Settings {
    Settings::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_settings(args: &[&str]) -> Settings {
        let mut full = vec!["moray", "--reference", "ref.fa", "--reads", "a.bam"];
        full.extend_from_slice(args);
        Settings::parse_from(full)
    }

    #[test]
    fn test_contig_ploidy_parsing() {
        let settings = minimal_settings(&["--contig-ploidies", "chrX=1", "chrM=1"]);
        let ploidies = settings.parse_contig_ploidies().unwrap();
        assert_eq!(ploidies["chrX"], 1);
        assert_eq!(ploidies.len(), 2);
    }

    #[test]
    fn test_duplicate_contig_ploidy_rejected() {
        // Repeating a contig is a usage error even when the values agree
        let settings = minimal_settings(&["--contig-ploidies", "chrX=1", "chrX=1"]);
        assert!(settings.parse_contig_ploidies().is_err());
    }

    #[test]
    fn test_invalid_ploidy_rejected() {
        let settings = minimal_settings(&["--contig-ploidies", "chrX=0"]);
        assert!(settings.parse_contig_ploidies().is_err());
        let settings = minimal_settings(&["--contig-ploidies", "chrX=9"]);
        assert!(settings.parse_contig_ploidies().is_err());
    }

    #[test]
    fn test_output_path_stdout() {
        let settings = minimal_settings(&[]);
        assert!(settings.output_path().is_none());
        let settings = minimal_settings(&["--output", "calls.vcf"]);
        assert_eq!(settings.output_path().unwrap(), "calls.vcf");
    }
}
