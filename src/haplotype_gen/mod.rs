mod tree;
mod walker;

use std::collections::HashMap;

use log::debug;

pub use self::tree::HaplotypeTree;
pub use self::walker::{GenomeWalker, LaggingPolicy};
use crate::allele::Allele;
use crate::errors::RegionError;
use crate::genome_region::GenomeRegion;
use crate::haplotype::Haplotype;
use crate::variant::Variant;

/// One candidate site: a region and all its alternative alleles, the reference allele first
///
#[derive(Clone, Debug)]
pub struct Site {
    pub region: GenomeRegion,
    pub alleles: Vec<Allele>,
}

#[derive(Clone)]
pub struct HaplotypeGeneratorSettings {
    pub max_haplotypes: usize,
    pub max_holdout_depth: usize,
    pub overflow_limit: usize,
    pub lagging: LaggingPolicy,
    /// Reference padding added to each side of the active sub-region
    pub region_padding: i64,
    pub max_site_gap: i64,
}

impl Default for HaplotypeGeneratorSettings {
    fn default() -> Self {
        Self {
            max_haplotypes: 200,
            max_holdout_depth: 3,
            overflow_limit: 16384,
            lagging: LaggingPolicy::Conservative,
            region_padding: 25,
            max_site_gap: 100,
        }
    }
}

struct SegmentState {
    active_region: GenomeRegion,
    /// Pending site range included in this segment
    site_range: std::ops::Range<usize>,
    tree: HaplotypeTree,
    /// Sites moved out of the tree to keep the haplotype count within budget
    holdout: Vec<Site>,
}

/// Produces the bounded explanatory haplotype set for each active sub-region of one window
///
/// The generator walks the window's candidate sites left to right. Each `progress` call plans
/// the next active sub-region, extends the haplotype tree with its alleles, and materialises
/// the leaves. When the tree outgrows the budget, whole sites are moved into a holdout set and
/// re-introduced one layer at a time after the caller reports which haplotypes survived
/// posterior filtering.
///
pub struct HaplotypeGenerator {
    settings: HaplotypeGeneratorSettings,
    window: GenomeRegion,
    window_ref: Vec<u8>,
    sites: Vec<Site>,
    next_site: usize,
    indicator_sites: Vec<Site>,
    /// The previous segment's surviving paths trimmed to the indicator span, seeding the next
    /// segment's tree so phase linkage carries across segments
    indicator_tree: Option<HaplotypeTree>,
    segment: Option<SegmentState>,
    ambiguity: HashMap<Allele, f64>,
}

impl HaplotypeGenerator {
    pub fn new(
        settings: HaplotypeGeneratorSettings,
        window: GenomeRegion,
        window_ref: &[u8],
        candidates: &[Variant],
    ) -> Self {
        assert_eq!(window.size(), window_ref.len() as i64);
        let sites = build_sites(&window, window_ref, candidates);
        Self {
            settings,
            window,
            window_ref: window_ref.to_vec(),
            sites,
            next_site: 0,
            indicator_sites: Vec::new(),
            indicator_tree: None,
            segment: None,
            ambiguity: HashMap::new(),
        }
    }

    pub fn done(&self) -> bool {
        self.next_site >= self.sites.len() && self.segment.is_none()
    }

    /// Record posterior-derived ambiguity for an allele, used to rank holdout choices
    ///
    pub fn set_allele_ambiguity(&mut self, allele: Allele, score: f64) {
        self.ambiguity.insert(allele, score);
    }

    /// Produce the haplotype set for the next (or current, mid-holdout) active sub-region
    ///
    pub fn progress(&mut self) -> Result<(Vec<Haplotype>, GenomeRegion), RegionError> {
        if self.segment.is_none() {
            self.start_segment()?;
        }
        let segment = self.segment.as_ref().unwrap();
        let haplotypes = self.materialise_leaves(segment);
        Ok((haplotypes, segment.active_region.clone()))
    }

    fn start_segment(&mut self) -> Result<(), RegionError> {
        assert!(self.next_site < self.sites.len());
        let walker = GenomeWalker {
            max_haplotypes: self.settings.max_haplotypes,
            lagging: self.settings.lagging,
            max_site_gap: self.settings.max_site_gap,
        };
        let pending = &self.sites[self.next_site..];
        let num_included = walker.plan_segment(&self.indicator_sites, pending);
        let site_range = self.next_site..self.next_site + num_included;

        let mut active_region = self.segment_span(&site_range, true);

        let mut included = self.sites[site_range.clone()].to_vec();
        let mut holdout: Vec<Site> = Vec::new();
        let mut use_indicators = true;
        let mut round = 0;

        loop {
            match self.build_tree(use_indicators, &included) {
                Some(tree) if tree.num_leaves() <= self.settings.max_haplotypes => {
                    if !use_indicators {
                        self.indicator_sites.clear();
                        self.indicator_tree = None;
                    }
                    self.segment = Some(SegmentState {
                        active_region,
                        site_range,
                        tree,
                        holdout,
                    });
                    return Ok(());
                }
                built => {
                    if use_indicators && !self.indicator_sites.is_empty() {
                        // Sacrifice phase context before sacrificing candidate sites
                        use_indicators = false;
                        active_region = self.segment_span(&site_range, false);
                        continue;
                    }
                    if round == self.settings.max_holdout_depth || included.len() <= 1 {
                        let leaf_count = built.map(|t| t.num_leaves()).unwrap_or(usize::MAX);
                        debug!(
                            "Haplotype overflow in {active_region:?}: {leaf_count} leaves after {round} holdout rounds"
                        );
                        // Leave the generator positioned past the failed segment
                        self.next_site = site_range.end;
                        self.segment = None;
                        return Err(RegionError::HaplotypeOverflow {
                            region: active_region,
                            limit: self.settings.overflow_limit,
                            holdout_depth: round,
                        });
                    }
                    let holdout_index = self.select_holdout_site(&included);
                    let site = included.remove(holdout_index);
                    debug!("Holding out site {:?} in {active_region:?}", site.region);
                    holdout.push(site);
                    round += 1;
                }
            }
        }
    }

    /// Extend the included pending sites onto the carried indicator tree, or onto a fresh root
    ///
    /// Returns None when the leaf count passes the hard overflow limit mid-extension.
    ///
    fn build_tree(&self, use_indicators: bool, included: &[Site]) -> Option<HaplotypeTree> {
        let mut tree = match (&self.indicator_tree, use_indicators) {
            (Some(indicator_tree), true) => indicator_tree.clone(),
            _ => HaplotypeTree::default(),
        };
        for site in included.iter() {
            for allele in site.alleles.iter() {
                tree.extend(allele);
            }
            if tree.num_leaves() > self.settings.overflow_limit {
                return None;
            }
        }
        Some(tree)
    }

    /// Pick the included site to hold out: highest posterior ambiguity, then most alleles
    ///
    fn select_holdout_site(&self, included: &[Site]) -> usize {
        let site_score = |site: &Site| {
            site.alleles
                .iter()
                .map(|allele| self.ambiguity.get(allele).copied().unwrap_or(0.0))
                .sum::<f64>()
        };
        included
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                site_score(a)
                    .partial_cmp(&site_score(b))
                    .unwrap()
                    .then(a.alleles.len().cmp(&b.alleles.len()))
            })
            .map(|(index, _)| index)
            .unwrap()
    }

    fn segment_span(
        &self,
        site_range: &std::ops::Range<usize>,
        include_indicators: bool,
    ) -> GenomeRegion {
        let indicator_sites: &[Site] = if include_indicators {
            &self.indicator_sites
        } else {
            &[]
        };
        let mut span: Option<GenomeRegion> = None;
        for site in indicator_sites
            .iter()
            .chain(self.sites[site_range.clone()].iter())
        {
            match &mut span {
                Some(span) => span.range.merge(&site.region.range),
                None => span = Some(site.region.clone()),
            }
        }
        let mut span = span.unwrap();
        span.range.start = std::cmp::max(
            span.range.start - self.settings.region_padding,
            self.window.range.start,
        );
        span.range.end = std::cmp::min(
            span.range.end + self.settings.region_padding,
            self.window.range.end,
        );
        span
    }

    fn materialise_leaves(&self, segment: &SegmentState) -> Vec<Haplotype> {
        let region = &segment.active_region;
        let ref_begin = (region.range.start - self.window.range.start) as usize;
        let ref_end = (region.range.end - self.window.range.start) as usize;
        let region_ref = &self.window_ref[ref_begin..ref_end];

        let mut haplotypes: Vec<Haplotype> = Vec::new();
        for path in segment.tree.leaf_paths() {
            let haplotype = Haplotype::new(region.clone(), path, region_ref);
            if !haplotypes.contains(&haplotype) {
                haplotypes.push(haplotype);
            }
        }
        haplotypes
    }

    /// Prune all leaves except the surviving haplotypes, then re-introduce held-out sites one
    /// layer at a time while the budget allows
    ///
    /// Returns true when holdout alleles were re-added, in which case the caller must run
    /// another inference round over the same active sub-region before advancing.
    ///
    pub fn keep_haplotypes(&mut self, survivors: &[Haplotype]) -> bool {
        let segment = match self.segment.as_mut() {
            Some(x) => x,
            None => return false,
        };
        segment.tree.retain_leaves(|path| {
            survivors
                .iter()
                .any(|survivor| survivor.alleles == path)
        });

        let mut readded = false;
        while let Some(site) = segment.holdout.first().cloned() {
            let projected = segment.tree.num_leaves() * site.alleles.len();
            if projected > self.settings.max_haplotypes {
                // This layer no longer fits; drop it for the remainder of the active region
                debug!(
                    "Dropping held-out site {:?}: {projected} projected haplotypes",
                    site.region
                );
                segment.holdout.remove(0);
                continue;
            }
            segment.holdout.remove(0);
            for allele in site.alleles.iter() {
                segment.tree.extend(allele);
            }
            readded = true;
            break;
        }
        readded
    }

    /// Advance past the called region and install indicator sites per the lagging policy
    ///
    pub fn force_forward(&mut self, called_region: &GenomeRegion) {
        let segment = self.segment.take();
        let covered_end = match &segment {
            Some(segment) => segment.site_range.end,
            None => {
                // Skip all sites covered by the called region
                let mut end = self.next_site;
                while end < self.sites.len()
                    && self.sites[end].region.range.end <= called_region.range.end
                {
                    end += 1;
                }
                end
            }
        };

        // Indicators are the trailing called sites, restricted to alleles still on a surviving
        // haplotype; the surviving combinations themselves carry over as the indicator tree
        self.indicator_sites.clear();
        self.indicator_tree = None;
        let max_indicators = self.settings.lagging.max_indicator_sites();
        if max_indicators > 0 {
            if let Some(segment) = segment {
                let surviving_paths = segment.tree.leaf_paths();
                let first_indicator = covered_end
                    .saturating_sub(max_indicators)
                    .max(self.next_site);
                for site in self.sites[first_indicator..covered_end].iter() {
                    let alleles = site
                        .alleles
                        .iter()
                        .filter(|allele| {
                            surviving_paths
                                .iter()
                                .any(|path| path.contains(allele))
                        })
                        .cloned()
                        .collect::<Vec<_>>();
                    if !alleles.is_empty() {
                        self.indicator_sites.push(Site {
                            region: site.region.clone(),
                            alleles,
                        });
                    }
                }

                if let Some(indicator_region) = self.indicator_span() {
                    let mut tree = segment.tree;
                    tree.remove_non_overlapping(&indicator_region);
                    self.indicator_tree = Some(tree);
                }
            }
        }

        self.next_site = covered_end;
    }

    fn indicator_span(&self) -> Option<GenomeRegion> {
        let mut span: Option<GenomeRegion> = None;
        for site in self.indicator_sites.iter() {
            match &mut span {
                Some(span) => span.range.merge(&site.region.range),
                None => span = Some(site.region.clone()),
            }
        }
        span
    }

    /// Abandon the active sub-region after an overflow failure
    ///
    pub fn skip_active_region(&mut self) {
        self.segment = None;
        self.indicator_sites.clear();
        self.indicator_tree = None;
    }
}

/// Group candidate variants into sites, adding the reference allele to each site
///
fn build_sites(window: &GenomeRegion, window_ref: &[u8], candidates: &[Variant]) -> Vec<Site> {
    let mut sites: Vec<Site> = Vec::new();
    for variant in candidates {
        if !window.contains(&variant.region) {
            continue;
        }
        let alt = variant.alt_allele();
        match sites.last_mut() {
            Some(site) if site.region == variant.region => {
                if !site.alleles.contains(&alt) {
                    site.alleles.push(alt);
                }
            }
            _ => {
                let ref_begin = (variant.region.range.start - window.range.start) as usize;
                let ref_end = (variant.region.range.end - window.range.start) as usize;
                let ref_allele =
                    Allele::new(variant.region.clone(), &window_ref[ref_begin..ref_end]);
                sites.push(Site {
                    region: variant.region.clone(),
                    alleles: vec![ref_allele, alt],
                });
            }
        }
    }
    sites
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_generator(
        window_ref: &[u8],
        candidates: &[Variant],
        max_haplotypes: usize,
    ) -> HaplotypeGenerator {
        let settings = HaplotypeGeneratorSettings {
            max_haplotypes,
            region_padding: 2,
            ..Default::default()
        };
        let window = GenomeRegion::new(0, 0, window_ref.len() as i64);
        HaplotypeGenerator::new(settings, window, window_ref, candidates)
    }

    fn snv(pos: i64, ref_base: u8, alt_base: u8) -> Variant {
        Variant::new(GenomeRegion::new(0, pos, pos + 1), &[ref_base], &[alt_base])
    }

    #[test]
    fn test_progress_materialises_all_combinations() {
        let window_ref = b"ACGTACGTACGTACGT";
        let candidates = vec![snv(4, b'A', b'T'), snv(8, b'A', b'C')];
        let mut generator = make_generator(window_ref, &candidates, 16);

        let (haplotypes, region) = generator.progress().unwrap();
        assert_eq!(haplotypes.len(), 4);
        assert_eq!(region, GenomeRegion::new(0, 2, 11));

        // All haplotypes span exactly the active sub-region and are pairwise distinct
        for pair in haplotypes.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
        assert!(haplotypes.iter().all(|h| h.region == region));
    }

    #[test]
    fn test_budget_splits_into_multiple_segments() {
        let window_ref = b"ACGTACGTACGTACGT".repeat(4);
        let candidates = vec![
            snv(4, b'A', b'T'),
            snv(8, b'A', b'C'),
            snv(12, b'A', b'C'),
            snv(16, b'A', b'T'),
        ];
        let mut generator = make_generator(&window_ref, &candidates, 4);

        let (haplotypes, region) = generator.progress().unwrap();
        assert_eq!(haplotypes.len(), 4);
        generator.keep_haplotypes(&haplotypes);
        generator.force_forward(&region);
        assert!(!generator.done());
    }

    #[test]
    fn test_overflow_fails_explicitly() {
        // A single site with many alternatives cannot be reduced below budget by holdout
        let window_ref = b"ACGTACGTACGTACGT";
        let region = GenomeRegion::new(0, 4, 5);
        let candidates = (0..3)
            .map(|i| {
                Variant::new(
                    region.clone(),
                    b"A",
                    &[b"C", b"G", b"T"][i][..],
                )
            })
            .collect::<Vec<_>>();
        let mut generator = make_generator(window_ref, &candidates, 2);

        let result = generator.progress();
        assert!(matches!(
            result,
            Err(RegionError::HaplotypeOverflow { .. })
        ));

        // The failed segment is skipped and the generator finishes
        generator.skip_active_region();
        assert!(generator.done());
    }

    #[test]
    fn test_holdout_readd_round() {
        let window_ref = b"ACGTACGTACGTACGTACGT";
        // A deletion spanning two SNV sites forces all three sites into one segment; with a
        // budget of 4 one site lands in holdout.
        let deletion = Variant::new(GenomeRegion::new(0, 4, 14), b"ACGTACGTAC", b"");
        let candidates = vec![deletion, snv(6, b'G', b'C'), snv(8, b'A', b'C')];
        let settings = HaplotypeGeneratorSettings {
            max_haplotypes: 4,
            region_padding: 2,
            ..Default::default()
        };
        let window = GenomeRegion::new(0, 0, window_ref.len() as i64);
        let mut generator = HaplotypeGenerator::new(settings, window, window_ref, &candidates);

        let (haplotypes, _region) = generator.progress().unwrap();
        assert!(haplotypes.len() <= 4);
        let held_out_alt = Allele::new(GenomeRegion::new(0, 8, 9), b"C");
        assert!(!haplotypes.iter().any(|h| h.carries(&held_out_alt)));

        // Posterior filtering keeps two haplotypes; the held-out site then fits the budget and
        // is re-added for another inference round.
        let survivors = haplotypes.into_iter().take(2).collect::<Vec<_>>();
        let readded = generator.keep_haplotypes(&survivors);
        assert!(readded);

        let (haplotypes, _region) = generator.progress().unwrap();
        assert!(haplotypes.iter().any(|h| h.carries(&held_out_alt)));
    }
}
