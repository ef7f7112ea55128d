use camino::Utf8Path;
use rust_htslib::bcf::{self, Read};
use unwrap::unwrap;

use crate::caller::{RefCall, VariantCall};
use crate::candidate::SourceMask;
use crate::chrom_list::ChromList;
use crate::globals::{PROGRAM_NAME, PROGRAM_VERSION};
use crate::read::SampleName;
use crate::variant::{Variant, VariantClass};

// Imported non-public constant from rust-htslib
pub const VECTOR_END_INTEGER: i32 = i32::MIN + 1;

/// Builds common fields into a VCF header, upon which the caller-specific details are added
///
pub fn get_vcf_header(
    ref_filename: &str,
    chrom_list: &ChromList,
    sample_names: &[SampleName],
) -> bcf::header::Header {
    let mut header = bcf::header::Header::new();

    let date_string = chrono::Local::now().format("%Y%m%d").to_string();
    header.push_record(format!("##fileDate={date_string}").as_bytes());
    header.push_record(format!("##reference=file://{ref_filename}").as_bytes());
    header.push_record(format!("##source=\"{PROGRAM_NAME} {PROGRAM_VERSION}\"").as_bytes());
    let cmdline = std::env::args().collect::<Vec<_>>().join(" ");
    header.push_record(format!("##{PROGRAM_NAME}_cmdline=\"{cmdline}\"").as_bytes());

    for chrom_info in chrom_list.data.iter() {
        let header_contig_line = format!(
            "##contig=<ID={},length={}>",
            chrom_info.label, chrom_info.length
        );
        header.push_record(header_contig_line.as_bytes());
    }

    header.push_record(
        b"##INFO=<ID=VT,Number=1,Type=String,Description=\"Variant class: snv, mnv, insertion, deletion or complex\">",
    );
    header.push_record(
        b"##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Combined read depth over all samples\">",
    );
    header.push_record(
        b"##INFO=<ID=SRC,Number=.,Type=String,Description=\"Candidate sources proposing this variant\">",
    );
    header.push_record(b"##INFO=<ID=SOMATIC,Number=0,Type=Flag,Description=\"Somatic mutation\">");
    header.push_record(
        b"##INFO=<ID=SOMATICQ,Number=1,Type=Float,Description=\"Phred somatic posterior\">",
    );
    header.push_record(b"##INFO=<ID=DENOVO,Number=0,Type=Flag,Description=\"De novo mutation\">");
    header.push_record(
        b"##INFO=<ID=DENOVOQ,Number=1,Type=Float,Description=\"Phred de novo posterior\">",
    );
    header.push_record(b"##FILTER=<ID=REFCALL,Description=\"Homozygous reference call\">");
    header.push_record(b"##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">");
    header.push_record(
        b"##FORMAT=<ID=GQ,Number=1,Type=Integer,Description=\"Phred genotype quality\">",
    );
    header.push_record(b"##FORMAT=<ID=DP,Number=1,Type=Integer,Description=\"Read depth\">");
    header.push_record(b"##FORMAT=<ID=PS,Number=1,Type=Integer,Description=\"Phase set\">");
    header.push_record(
        b"##FORMAT=<ID=VAF,Number=1,Type=Float,Description=\"Somatic variant allele frequency\">",
    );
    header.push_record(
        b"##FORMAT=<ID=SCR,Number=2,Type=Float,Description=\"Somatic allele frequency credible region\">",
    );

    for sample_name in sample_names {
        header.push_sample(sample_name.as_bytes());
    }

    header
}

/// The VCF (pos, ref, alt) triple for an internal variant, anchored per VCF convention
///
/// Internal insertions have an empty region and deletions an empty alt, so both take the
/// preceding reference base as anchor; a variant at contig position zero anchors on the
/// following base instead.
///
fn vcf_alleles(variant: &Variant, window_ref: &[u8], window_start: i64) -> (i64, Vec<u8>, Vec<u8>) {
    match variant.classify() {
        VariantClass::Snv | VariantClass::Mnv => (
            variant.region.range.start,
            variant.ref_seq.clone(),
            variant.alt_seq.clone(),
        ),
        _ => {
            let start = variant.region.range.start;
            if start > 0 {
                let anchor = window_ref[(start - 1 - window_start) as usize];
                let mut ref_seq = vec![anchor];
                ref_seq.extend_from_slice(&variant.ref_seq);
                let mut alt_seq = vec![anchor];
                alt_seq.extend_from_slice(&variant.alt_seq);
                (start - 1, ref_seq, alt_seq)
            } else {
                let anchor = window_ref[(variant.region.range.end - window_start) as usize];
                let mut ref_seq = variant.ref_seq.clone();
                ref_seq.push(anchor);
                let mut alt_seq = variant.alt_seq.clone();
                alt_seq.push(anchor);
                (0, ref_seq, alt_seq)
            }
        }
    }
}

fn variant_class_label(class: VariantClass) -> &'static [u8] {
    match class {
        VariantClass::Snv => b"snv",
        VariantClass::Mnv => b"mnv",
        VariantClass::Insertion => b"insertion",
        VariantClass::Deletion => b"deletion",
        VariantClass::Complex => b"complex",
    }
}

/// Writer for the record stream of one chromosome
///
pub struct VcfChromWriter {
    writer: bcf::Writer,
    samples: Vec<SampleName>,
}

impl VcfChromWriter {
    pub fn new(
        path: &Utf8Path,
        ref_filename: &str,
        chrom_list: &ChromList,
        samples: &[SampleName],
    ) -> Self {
        let header = get_vcf_header(ref_filename, chrom_list, samples);
        let writer = unwrap!(
            bcf::Writer::from_path(path, &header, true, bcf::Format::Vcf),
            "Unable to create VCF output file: '{}'",
            path
        );
        Self {
            writer,
            samples: samples.to_vec(),
        }
    }

    /// Write one variant call record
    ///
    /// # Arguments
    ///
    /// * `phase_set` - 0-based position of the phase set's first call, when the call is in a
    ///   multi-call phase set; emitted 1-based in the PS field
    ///
    pub fn write_variant_call(
        &mut self,
        call: &VariantCall,
        phase_set: Option<i64>,
        sources: SourceMask,
        window_ref: &[u8],
        window_start: i64,
    ) {
        let (pos, ref_seq, alt_seq) = vcf_alleles(&call.variant, window_ref, window_start);

        let mut record = self.writer.empty_record();
        record.set_rid(Some(call.variant.region.chrom_index as u32));
        record.set_pos(pos);
        record
            .set_alleles(&[ref_seq.as_slice(), alt_seq.as_slice()])
            .unwrap();
        record.set_qual(call.posterior as f32);
        record.push_filter("PASS".as_bytes()).unwrap();

        record
            .push_info_string(b"VT", &[variant_class_label(call.variant.classify())])
            .unwrap();
        let total_depth: i32 = call
            .sample_calls
            .values()
            .map(|sample_call| sample_call.depth as i32)
            .sum();
        record.push_info_integer(b"DP", &[total_depth]).unwrap();
        record.push_info_string(b"SRC", &sources.labels()).unwrap();

        if let Some(somatic) = &call.somatic {
            record.push_info_flag(b"SOMATIC").unwrap();
            record
                .push_info_float(b"SOMATICQ", &[somatic.posterior as f32])
                .unwrap();
        }
        if let Some(denovo_posterior) = call.denovo_posterior {
            record.push_info_flag(b"DENOVO").unwrap();
            record
                .push_info_float(b"DENOVOQ", &[denovo_posterior as f32])
                .unwrap();
        }

        // Per-sample FORMAT columns, padded to the widest ploidy
        let max_ploidy = call
            .sample_calls
            .values()
            .map(|sample_call| sample_call.ploidy)
            .max()
            .unwrap_or(2);
        let mut gts = Vec::new();
        let mut gqs = Vec::new();
        let mut dps = Vec::new();
        for sample in self.samples.iter() {
            let sample_call = call.sample_calls.get(sample);
            match sample_call {
                Some(sample_call) => {
                    let phased = phase_set.is_some();
                    for slot in 0..max_ploidy {
                        if slot >= sample_call.ploidy {
                            gts.push(VECTOR_END_INTEGER);
                            continue;
                        }
                        let allele_index =
                            if slot < sample_call.ploidy - sample_call.alt_count {
                                0
                            } else {
                                1
                            };
                        gts.push(((allele_index + 1) << 1) | phased as i32);
                    }
                    gqs.push(sample_call.genotype_quality.round() as i32);
                    dps.push(sample_call.depth as i32);
                }
                None => {
                    gts.push(0);
                    for _ in 1..max_ploidy {
                        gts.push(VECTOR_END_INTEGER);
                    }
                    gqs.push(0);
                    dps.push(0);
                }
            }
        }
        record.push_format_integer(b"GT", &gts).unwrap();
        record.push_format_integer(b"GQ", &gqs).unwrap();
        record.push_format_integer(b"DP", &dps).unwrap();

        if let Some(phase_set) = phase_set {
            let pss = vec![(phase_set + 1) as i32; self.samples.len()];
            record.push_format_integer(b"PS", &pss).unwrap();
        }

        if let Some(somatic) = &call.somatic {
            let mut vafs = Vec::new();
            let mut credible = Vec::new();
            for sample in self.samples.iter() {
                match somatic.vaf.get(sample) {
                    Some(&vaf) => {
                        vafs.push(vaf as f32);
                        let (lower, upper) = somatic.vaf_credible[sample];
                        credible.push(lower as f32);
                        credible.push(upper as f32);
                    }
                    None => {
                        vafs.push(0.0);
                        credible.push(0.0);
                        credible.push(0.0);
                    }
                }
            }
            record.push_format_float(b"VAF", &vafs).unwrap();
            record.push_format_float(b"SCR", &credible).unwrap();
        }

        self.writer.write(&record).unwrap();
    }

    /// Write one homozygous-reference call record
    ///
    pub fn write_ref_call(&mut self, refcall: &RefCall) {
        let mut record = self.writer.empty_record();
        record.set_rid(Some(refcall.region.chrom_index as u32));
        record.set_pos(refcall.region.range.start);
        record.set_alleles(&[refcall.ref_seq.as_slice()]).unwrap();
        record.set_qual(refcall.posterior as f32);
        record.push_filter("REFCALL".as_bytes()).unwrap();

        let total_depth: i32 = refcall.sample_depths.values().map(|&d| d as i32).sum();
        record.push_info_integer(b"DP", &[total_depth]).unwrap();

        let mut dps = Vec::new();
        for sample in self.samples.iter() {
            dps.push(refcall.sample_depths.get(sample).copied().unwrap_or(0) as i32);
        }
        record.push_format_integer(b"DP", &dps).unwrap();

        self.writer.write(&record).unwrap();
    }
}

/// Concatenate per-chromosome intermediate VCFs into the final output, in chromosome order
///
pub fn concatenate_chrom_vcfs(
    chrom_paths: &[camino::Utf8PathBuf],
    output: Option<&Utf8Path>,
    ref_filename: &str,
    chrom_list: &ChromList,
    samples: &[SampleName],
) -> usize {
    let header = get_vcf_header(ref_filename, chrom_list, samples);
    let mut writer = match output {
        Some(path) => unwrap!(
            bcf::Writer::from_path(path, &header, true, bcf::Format::Vcf),
            "Unable to create VCF output file: '{}'",
            path
        ),
        None => unwrap!(
            bcf::Writer::from_stdout(&header, true, bcf::Format::Vcf),
            "Unable to write VCF to stdout"
        ),
    };

    let mut record_count = 0;
    for path in chrom_paths {
        if !path.exists() {
            continue;
        }
        let mut reader = unwrap!(
            bcf::Reader::from_path(path),
            "Unable to reopen intermediate VCF: '{}'",
            path
        );
        let mut record = reader.empty_record();
        while let Some(result) = reader.read(&mut record) {
            unwrap!(result, "Failed to parse intermediate VCF record");
            writer.translate(&mut record);
            writer.write(&record).unwrap();
            record_count += 1;
        }
    }
    record_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome_region::GenomeRegion;

    #[test]
    fn test_vcf_alleles_snv() {
        let variant = Variant::new(GenomeRegion::new(0, 5, 6), b"A", b"G");
        let (pos, ref_seq, alt_seq) = vcf_alleles(&variant, b"ACGTACGTAC", 0);
        assert_eq!(pos, 5);
        assert_eq!(ref_seq, b"A".to_vec());
        assert_eq!(alt_seq, b"G".to_vec());
    }

    #[test]
    fn test_vcf_alleles_deletion_anchored() {
        //                              0123456789
        let variant = Variant::new(GenomeRegion::new(0, 3, 6), b"TAC", b"");
        let (pos, ref_seq, alt_seq) = vcf_alleles(&variant, b"ACGTACGTAC", 0);
        assert_eq!(pos, 2);
        assert_eq!(ref_seq, b"GTAC".to_vec());
        assert_eq!(alt_seq, b"G".to_vec());
    }

    #[test]
    fn test_vcf_alleles_insertion_at_contig_start() {
        let variant = Variant::new(GenomeRegion::new(0, 0, 0), b"", b"TT");
        let (pos, ref_seq, alt_seq) = vcf_alleles(&variant, b"ACGTACGTAC", 0);
        assert_eq!(pos, 0);
        assert_eq!(ref_seq, b"A".to_vec());
        assert_eq!(alt_seq, b"TTA".to_vec());
    }
}
