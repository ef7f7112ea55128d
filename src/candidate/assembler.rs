use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::genome_region::GenomeRegion;
use crate::read::AlignedRead;
use crate::variant::{normalize_variant, Variant};

#[derive(Clone)]
pub struct AssemblerSettings {
    /// K-mer sizes to assemble with; a graph is built per size and results are merged
    pub kmer_sizes: Vec<usize>,
    /// Minimum read k-mer support for every edge of a reported bubble path
    pub min_bubble_support: u32,
    /// Bound on the bubble alternate path length, in graph nodes
    pub max_bubble_path: usize,
}

impl Default for AssemblerSettings {
    fn default() -> Self {
        Self {
            kmer_sizes: vec![10, 25],
            min_bubble_support: 2,
            max_bubble_path: 200,
        }
    }
}

/// Candidate variant generation by local re-assembly
///
/// A de Bruijn graph is built per configured k-mer size over the reference sequence of the
/// assembly region plus all overlapping reads. Simple bubbles whose alternate path is read
/// supported and terminates on the reference backbone on both sides are reported as variants.
///
pub struct LocalAssembler {
    settings: AssemblerSettings,
    region: GenomeRegion,
    region_ref: Vec<u8>,
}

type Kmer = Vec<u8>;

struct DeBruijnGraph {
    k: usize,
    /// Edge read support: (source kmer, extension base) -> supporting read count
    read_edges: HashMap<(Kmer, u8), u32>,
}

impl DeBruijnGraph {
    fn new(k: usize) -> Self {
        Self {
            k,
            read_edges: HashMap::new(),
        }
    }

    fn add_read_seq(&mut self, seq: &[u8]) {
        if seq.len() <= self.k {
            return;
        }
        for window in seq.windows(self.k + 1) {
            if window.iter().any(|&b| b == b'N') {
                continue;
            }
            let source = window[..self.k].to_vec();
            let base = window[self.k];
            *self.read_edges.entry((source, base)).or_insert(0) += 1;
        }
    }

    fn supported_extensions(&self, node: &[u8], min_support: u32) -> Vec<u8> {
        b"ACGT"
            .iter()
            .copied()
            .filter(|&base| {
                self.read_edges
                    .get(&(node.to_vec(), base))
                    .map(|&count| count >= min_support)
                    .unwrap_or(false)
            })
            .collect()
    }
}

impl LocalAssembler {
    pub fn new(settings: AssemblerSettings, region: GenomeRegion, region_ref: &[u8]) -> Self {
        assert_eq!(region.size(), region_ref.len() as i64);
        Self {
            settings,
            region,
            region_ref: region_ref.to_vec(),
        }
    }

    /// Assemble all overlapping reads and report bubble variants
    ///
    pub fn generate(&self, reads: &[Arc<AlignedRead>]) -> Vec<Variant> {
        let mut result = Vec::new();
        for &k in self.settings.kmer_sizes.iter() {
            if self.region_ref.len() <= k {
                continue;
            }
            result.extend(self.generate_for_kmer_size(k, reads));
        }
        result.sort();
        result.dedup();
        result
    }

    fn generate_for_kmer_size(&self, k: usize, reads: &[Arc<AlignedRead>]) -> Vec<Variant> {
        let mut graph = DeBruijnGraph::new(k);
        for read in reads {
            graph.add_read_seq(&read.seq);
        }

        // Map each reference k-mer to its position, dropping repeated k-mers so bubble anchor
        // positions stay unambiguous
        let mut ref_kmer_pos: HashMap<&[u8], Option<usize>> = HashMap::new();
        for (pos, kmer) in self.region_ref.windows(k).enumerate() {
            ref_kmer_pos
                .entry(kmer)
                .and_modify(|entry| *entry = None)
                .or_insert(Some(pos));
        }

        let mut result = Vec::new();
        let num_anchors = self.region_ref.len() - k;
        for anchor_pos in 0..num_anchors {
            let anchor = &self.region_ref[anchor_pos..anchor_pos + k];
            if ref_kmer_pos.get(anchor) != Some(&Some(anchor_pos)) {
                continue;
            }
            let ref_next_base = self.region_ref[anchor_pos + k];
            for branch_base in graph.supported_extensions(anchor, self.settings.min_bubble_support)
            {
                if branch_base == ref_next_base {
                    continue;
                }
                if let Some(variant) =
                    self.trace_bubble(&graph, &ref_kmer_pos, anchor_pos, branch_base)
                {
                    debug!("Assembly k={k} bubble variant {variant:?}");
                    result.push(variant);
                }
            }
        }
        result
    }

    /// Follow a read-supported branch until it rejoins the reference backbone
    ///
    /// The path is abandoned when it branches again (not a simple bubble), loses read support,
    /// exceeds the path length bound, or lands on an ambiguous reference k-mer.
    ///
    fn trace_bubble(
        &self,
        graph: &DeBruijnGraph,
        ref_kmer_pos: &HashMap<&[u8], Option<usize>>,
        anchor_pos: usize,
        branch_base: u8,
    ) -> Option<Variant> {
        let k = graph.k;
        let mut spelled = self.region_ref[anchor_pos..anchor_pos + k].to_vec();
        spelled.push(branch_base);

        let mut node = spelled[spelled.len() - k..].to_vec();
        for _ in 0..self.settings.max_bubble_path {
            if let Some(&Some(landing_pos)) = ref_kmer_pos.get(node.as_slice()) {
                if landing_pos > anchor_pos {
                    return self.make_bubble_variant(anchor_pos, landing_pos, k, &spelled);
                }
            }
            let extensions = graph.supported_extensions(&node, self.settings.min_bubble_support);
            if extensions.len() != 1 {
                return None;
            }
            spelled.push(extensions[0]);
            node = spelled[spelled.len() - k..].to_vec();
        }
        None
    }

    fn make_bubble_variant(
        &self,
        anchor_pos: usize,
        landing_pos: usize,
        k: usize,
        spelled: &[u8],
    ) -> Option<Variant> {
        // The spelled alternate path and the reference both start with the anchor k-mer and end
        // with the landing k-mer; normalization trims the shared context down to the minimal
        // variant representation.
        let ref_begin = self.region.range.start + anchor_pos as i64;
        let ref_end = self.region.range.start + (landing_pos + k) as i64;
        let ref_seq = &self.region_ref[anchor_pos..landing_pos + k];
        if ref_seq == spelled {
            return None;
        }
        let raw = Variant::new(
            GenomeRegion::new(self.region.chrom_index, ref_begin, ref_end),
            ref_seq,
            spelled,
        );
        let region_start = self.region.range.start;
        let region_ref = &self.region_ref;
        let normalized = normalize_variant(raw, |pos| {
            if pos < region_start || pos >= region_start + region_ref.len() as i64 {
                0
            } else {
                region_ref[(pos - region_start) as usize]
            }
        });
        Some(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read::test_utils::make_test_read;

    fn assemble(ref_seq: &[u8], read_seq: &[u8], read_count: usize, k: usize) -> Vec<Variant> {
        let settings = AssemblerSettings {
            kmer_sizes: vec![k],
            min_bubble_support: 2,
            max_bubble_path: 200,
        };
        let region = GenomeRegion::new(0, 0, ref_seq.len() as i64);
        let assembler = LocalAssembler::new(settings, region, ref_seq);
        let reads = (0..read_count)
            .map(|_| Arc::new(make_test_read(0, 0, read_seq, 30)))
            .collect::<Vec<_>>();
        assembler.generate(&reads)
    }

    #[test]
    fn test_snv_bubble() {
        let ref_seq = b"TGCATGGATTCGAATCGGCA";
        //                        v
        let alt_seq = b"TGCATGGATTGGAATCGGCA";
        let variants = assemble(ref_seq, alt_seq, 3, 5);
        assert_eq!(
            variants,
            vec![Variant::new(GenomeRegion::new(0, 10, 11), b"C", b"G")]
        );
    }

    #[test]
    fn test_deletion_bubble() {
        let ref_seq = b"TGCATGGATTCGAATCGGCA";
        // drop "CGA" at [10,13)
        let alt_seq = b"TGCATGGATTATCGGCA";
        let variants = assemble(ref_seq, alt_seq, 3, 5);
        assert_eq!(
            variants,
            vec![Variant::new(GenomeRegion::new(0, 10, 13), b"CGA", b"")]
        );
    }

    #[test]
    fn test_unsupported_bubble_not_reported() {
        let ref_seq = b"TGCATGGATTCGAATCGGCA";
        let alt_seq = b"TGCATGGATTGGAATCGGCA";
        // One read of support is below the bubble support threshold
        let variants = assemble(ref_seq, alt_seq, 1, 5);
        assert!(variants.is_empty());
    }
}
