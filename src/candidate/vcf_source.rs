use rust_htslib::bcf::{self, Read};
use unwrap::unwrap;

use crate::chrom_list::ChromList;
use crate::errors::{MorayError, MorayResult};
use crate::genome_region::GenomeRegion;
use crate::variant::{normalize_variant, Variant};

/// Candidate variants parsed from an external VCF file, admitted verbatim
///
/// This source backs regenotyping: every site listed in the input file re-enters the candidate
/// set, so the caller revisits it regardless of read evidence.
///
pub struct VcfCandidateSource {
    pub filename: String,
}

impl VcfCandidateSource {
    pub fn new(filename: &str) -> MorayResult<Self> {
        // Open once up front so a bad path fails before processing starts
        bcf::IndexedReader::from_path(filename).map_err(|e| {
            MorayError::input(format!(
                "Unable to open candidate variant file '{filename}': {e}"
            ))
        })?;
        Ok(Self {
            filename: filename.to_string(),
        })
    }

    /// Read all normalised variants overlapping the region
    ///
    /// Records with symbolic or breakend alleles are skipped. The VCF padding base convention is
    /// undone by normalization, which converts anchored indels to the internal empty-region
    /// insertion and empty-sequence deletion forms.
    ///
    pub fn generate(
        &self,
        chrom_list: &ChromList,
        region: &GenomeRegion,
        region_ref: &[u8],
    ) -> Vec<Variant> {
        let mut reader = unwrap!(
            bcf::IndexedReader::from_path(&self.filename),
            "Unable to open candidate variant file: '{}'",
            self.filename
        );

        let chrom_label = &chrom_list.data[region.chrom_index].label;
        let rid = match reader.header().name2rid(chrom_label.as_bytes()) {
            Ok(rid) => rid,
            Err(_) => return Vec::new(),
        };
        if reader
            .fetch(rid, region.range.start as u64, Some(region.range.end as u64))
            .is_err()
        {
            return Vec::new();
        }

        let mut result = Vec::new();
        let mut record = reader.empty_record();
        while let Some(r) = reader.read(&mut record) {
            unwrap!(r, "Failed to parse record in '{}'", self.filename);
            let alleles = record.alleles();
            if alleles.len() < 2 {
                continue;
            }
            let ref_seq = alleles[0].to_vec();
            let pos = record.pos();
            for alt in alleles[1..].iter() {
                if alt.iter().any(|&b| b == b'<' || b == b'[' || b == b']') || *alt == b"*" {
                    continue;
                }
                let raw = Variant::new(
                    GenomeRegion::new(region.chrom_index, pos, pos + ref_seq.len() as i64),
                    &ref_seq,
                    alt,
                );
                let region_start = region.range.start;
                let variant = normalize_variant(raw, |p| {
                    if p < region_start || p >= region_start + region_ref.len() as i64 {
                        0
                    } else {
                        region_ref[(p - region_start) as usize]
                    }
                });
                result.push(variant);
            }
        }
        result.sort();
        result.dedup();
        result
    }
}
