use crate::allele::Allele;
use crate::genome_region::GenomeRegion;

const ROOT: usize = 0;

#[derive(Clone)]
struct Node {
    /// None only for the root
    allele: Option<Allele>,
    parent: usize,
    children: Vec<usize>,
    removed: bool,
}

/// A tree of allele sequences rooted at the reference
///
/// Each root-to-leaf path is one candidate haplotype for the active sub-region. The tree grows
/// monotonically through `extend` and shrinks only through the prune operations, so node storage
/// is a simple arena with tombstones.
///
#[derive(Clone)]
pub struct HaplotypeTree {
    nodes: Vec<Node>,
}

impl Default for HaplotypeTree {
    fn default() -> Self {
        Self {
            nodes: vec![Node {
                allele: None,
                parent: ROOT,
                children: Vec::new(),
                removed: false,
            }],
        }
    }
}

impl HaplotypeTree {
    /// Extend every compatible leaf with the allele
    ///
    /// A leaf whose covered region lies before the allele's region is extended directly. A leaf
    /// holding an overlapping or same-region allele is treated as an alternative at that site:
    /// the new allele is attached to the nearest ancestor it is consistent with, forming a
    /// sibling branch. Duplicate children are never created.
    ///
    pub fn extend(&mut self, allele: &Allele) {
        let leaves = self.leaf_indices();
        for leaf in leaves {
            let mut attach = leaf;
            loop {
                if attach == ROOT {
                    break;
                }
                let node_allele = self.nodes[attach].allele.as_ref().unwrap();
                let compatible = node_allele.region != allele.region
                    && !node_allele.region.intersect(&allele.region)
                    && node_allele.region.is_before(&allele.region);
                if compatible {
                    break;
                }
                attach = self.nodes[attach].parent;
            }
            self.add_child(attach, allele);
        }
    }

    fn add_child(&mut self, parent: usize, allele: &Allele) {
        let duplicate = self.nodes[parent].children.iter().any(|&child| {
            !self.nodes[child].removed && self.nodes[child].allele.as_ref() == Some(allele)
        });
        if duplicate {
            return;
        }
        let index = self.nodes.len();
        self.nodes.push(Node {
            allele: Some(allele.clone()),
            parent,
            children: Vec::new(),
            removed: false,
        });
        self.nodes[parent].children.push(index);
    }

    fn is_leaf(&self, index: usize) -> bool {
        !self.nodes[index].removed
            && self.nodes[index]
                .children
                .iter()
                .all(|&child| self.nodes[child].removed)
    }

    fn leaf_indices(&self) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|&index| self.is_leaf(index))
            .collect()
    }

    pub fn num_leaves(&self) -> usize {
        self.leaf_indices().len()
    }

    /// The allele path from the root to each leaf, in leaf discovery order
    ///
    pub fn leaf_paths(&self) -> Vec<Vec<Allele>> {
        self.leaf_indices()
            .into_iter()
            .map(|leaf| self.path_to(leaf))
            .collect()
    }

    fn path_to(&self, mut index: usize) -> Vec<Allele> {
        let mut path = Vec::new();
        while index != ROOT {
            path.push(self.nodes[index].allele.clone().unwrap());
            index = self.nodes[index].parent;
        }
        path.reverse();
        path
    }

    /// Remove every leaf whose path fails the predicate, trimming non-branching chains
    ///
    pub fn retain_leaves(&mut self, mut keep: impl FnMut(&[Allele]) -> bool) {
        for leaf in self.leaf_indices() {
            let path = self.path_to(leaf);
            if !keep(&path) {
                self.remove_chain(leaf);
            }
        }
    }

    /// Remove every leaf whose path equals the given allele path
    ///
    #[allow(dead_code)]
    pub fn prune_all(&mut self, path: &[Allele]) {
        self.retain_leaves(|leaf_path| leaf_path != path);
    }

    /// Remove the first leaf whose path equals the given allele path
    ///
    #[allow(dead_code)]
    pub fn prune_unique(&mut self, path: &[Allele]) {
        for leaf in self.leaf_indices() {
            if self.path_to(leaf) == path {
                self.remove_chain(leaf);
                return;
            }
        }
    }

    /// Drop every allele outside the region, collapsing the surviving paths
    ///
    /// Paths that become identical after trimming merge, so the leaf count never grows. This is
    /// how already-called phase context is trimmed down to the indicator span when the walk
    /// advances.
    ///
    pub fn remove_non_overlapping(&mut self, region: &GenomeRegion) {
        let paths = self.leaf_paths();
        let mut rebuilt = Self::default();
        for path in paths {
            let kept = path
                .into_iter()
                .filter(|allele| {
                    allele.region.intersect(region) || region.contains(&allele.region)
                })
                .collect::<Vec<_>>();
            rebuilt.add_path(&kept);
        }
        *self = rebuilt;
    }

    /// Graft a whole allele path below the root, sharing existing prefix nodes
    ///
    fn add_path(&mut self, path: &[Allele]) {
        let mut node = ROOT;
        for allele in path {
            let existing = self.nodes[node].children.iter().copied().find(|&child| {
                !self.nodes[child].removed && self.nodes[child].allele.as_ref() == Some(allele)
            });
            node = match existing {
                Some(child) => child,
                None => {
                    let index = self.nodes.len();
                    self.nodes.push(Node {
                        allele: Some(allele.clone()),
                        parent: node,
                        children: Vec::new(),
                        removed: false,
                    });
                    self.nodes[node].children.push(index);
                    index
                }
            };
        }
    }

    /// Remove all nodes holding alleles overlapping the region, with their subtrees
    ///
    #[allow(dead_code)]
    pub fn clear(&mut self, region: &GenomeRegion) {
        for index in 1..self.nodes.len() {
            if self.nodes[index].removed {
                continue;
            }
            let allele_region = &self.nodes[index].allele.as_ref().unwrap().region;
            if allele_region.intersect(region)
                || (allele_region.range.is_empty()
                    && region.range.intersect_pos(allele_region.range.start))
                || region.contains(allele_region)
            {
                self.remove_subtree(index);
            }
        }
    }

    fn remove_subtree(&mut self, index: usize) {
        self.nodes[index].removed = true;
        let children = self.nodes[index].children.clone();
        for child in children {
            if !self.nodes[child].removed {
                self.remove_subtree(child);
            }
        }
    }

    /// Remove a leaf and the non-branching ancestor chain above it
    ///
    fn remove_chain(&mut self, leaf: usize) {
        let mut index = leaf;
        loop {
            self.nodes[index].removed = true;
            let parent = self.nodes[index].parent;
            if parent == ROOT || !self.is_leaf(parent) {
                break;
            }
            index = parent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snv(pos: i64, base: u8) -> Allele {
        Allele::new(GenomeRegion::new(0, pos, pos + 1), &[base])
    }

    #[test]
    fn test_extend_builds_alternatives_per_site() {
        let mut tree = HaplotypeTree::default();
        tree.extend(&snv(5, b'A'));
        tree.extend(&snv(5, b'G'));
        assert_eq!(tree.num_leaves(), 2);

        tree.extend(&snv(9, b'C'));
        tree.extend(&snv(9, b'T'));
        assert_eq!(tree.num_leaves(), 4);

        let paths = tree.leaf_paths();
        assert!(paths.iter().all(|p| p.len() == 2));
    }

    #[test]
    fn test_extend_no_duplicate_children() {
        let mut tree = HaplotypeTree::default();
        tree.extend(&snv(5, b'A'));
        tree.extend(&snv(5, b'A'));
        assert_eq!(tree.num_leaves(), 1);
    }

    #[test]
    fn test_overlapping_alleles_form_siblings() {
        let mut tree = HaplotypeTree::default();
        // A deletion spanning [4,8) and an SNV at 5 are incompatible on one haplotype
        let deletion = Allele::new(GenomeRegion::new(0, 4, 8), b"");
        tree.extend(&deletion);
        tree.extend(&snv(5, b'G'));
        assert_eq!(tree.num_leaves(), 2);
        let paths = tree.leaf_paths();
        assert!(paths.iter().all(|p| p.len() == 1));
    }

    #[test]
    fn test_prune_all() {
        let mut tree = HaplotypeTree::default();
        tree.extend(&snv(5, b'A'));
        tree.extend(&snv(5, b'G'));
        tree.extend(&snv(9, b'T'));
        assert_eq!(tree.num_leaves(), 2);

        tree.prune_all(&[snv(5, b'A'), snv(9, b'T')]);
        assert_eq!(tree.num_leaves(), 1);
        assert_eq!(tree.leaf_paths()[0], vec![snv(5, b'G'), snv(9, b'T')]);
    }

    #[test]
    fn test_remove_non_overlapping_trims_and_merges() {
        let mut tree = HaplotypeTree::default();
        tree.extend(&snv(5, b'A'));
        tree.extend(&snv(5, b'G'));
        tree.extend(&snv(9, b'T'));
        tree.extend(&snv(9, b'C'));
        assert_eq!(tree.num_leaves(), 4);

        // Trimming to the second site collapses the four paths onto its two alleles
        tree.remove_non_overlapping(&GenomeRegion::new(0, 9, 10));
        assert_eq!(tree.num_leaves(), 2);
        let paths = tree.leaf_paths();
        assert!(paths.iter().all(|p| p.len() == 1));
        assert!(paths.iter().all(|p| p[0].region.range.start == 9));
    }

    #[test]
    fn test_clear_region() {
        let mut tree = HaplotypeTree::default();
        tree.extend(&snv(5, b'A'));
        tree.extend(&snv(5, b'G'));
        tree.extend(&snv(9, b'T'));
        tree.extend(&snv(9, b'C'));
        assert_eq!(tree.num_leaves(), 4);

        tree.clear(&GenomeRegion::new(0, 9, 10));
        assert_eq!(tree.num_leaves(), 2);
        assert!(tree.leaf_paths().iter().all(|p| p.len() == 1));
    }
}
