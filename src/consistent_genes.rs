//! Resolving equivalence classes (ECs) into genes.
//!
//! A [`crate::io::BusRecord`] only tells us its EC, i.e. the set of transcripts the read is
//! compatible with. [`Ec2GeneMapper`] turns that into a set of genes, and [`find_consistent`]
//! decides which genes a whole molecule (all records of one CB/UMI) is consistent with.
//!
//! Internally genes are represented as [`GeneId`]s (integers) rather than Strings, which makes
//! the set operations much cheaper. The ids are handed out in sorted order of the gene names,
//! so ordering by [`GeneId`] is the same as ordering by [`Genename`].
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::{BusMatrixError, Result};

/// Equivalence class identifier, as listed in `matrix.ec`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EC(pub u32);

/// Integer handle of a gene, only meaningful together with the [`Ec2GeneMapper`] that created it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeneId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Genename(pub String);

impl From<&str> for Genename {
    fn from(s: &str) -> Self {
        Genename(s.to_string())
    }
}

/// What to do with a molecule whose ECs have no gene in common
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyIntersectionPolicy {
    /// fall back to the union of all genes the molecule was observed with
    #[default]
    Union,
    /// discard the molecule
    Drop,
}

/// The genes a molecule is consistent with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistentGenes {
    /// the genes shared by all ECs of the molecule
    Intersection(BTreeSet<GeneId>),
    /// the ECs did not overlap, these are all genes seen across them
    Union(BTreeSet<GeneId>),
    /// no gene could be assigned
    Empty,
}

impl ConsistentGenes {
    pub fn genes(&self) -> Option<&BTreeSet<GeneId>> {
        match self {
            ConsistentGenes::Intersection(g) | ConsistentGenes::Union(g) => Some(g),
            ConsistentGenes::Empty => None,
        }
    }
}

/// Maps ECs to the genes they are compatible with
#[derive(Debug)]
pub struct Ec2GeneMapper {
    ec2geneid: HashMap<EC, HashSet<GeneId>>,
    int_to_gene: Vec<Genename>,
}

impl Ec2GeneMapper {
    pub fn new(ec2gene: HashMap<EC, HashSet<Genename>>) -> Self {
        // sorted, such that GeneId order == Genename order
        let all_genes: BTreeSet<&Genename> = ec2gene.values().flatten().collect();
        let int_to_gene: Vec<Genename> = all_genes.into_iter().cloned().collect();

        let gene_to_int: HashMap<&Genename, GeneId> = int_to_gene
            .iter()
            .enumerate()
            .map(|(i, g)| (g, GeneId(i as u32)))
            .collect();

        let ec2geneid = ec2gene
            .iter()
            .map(|(ec, genes)| {
                let ids: HashSet<GeneId> = genes.iter().map(|g| gene_to_int[g]).collect();
                (*ec, ids)
            })
            .collect();

        Ec2GeneMapper { ec2geneid, int_to_gene }
    }

    /// The genes of an EC, `None` if the EC is unknown
    pub fn get_genes(&self, ec: EC) -> Option<&HashSet<GeneId>> {
        self.ec2geneid.get(&ec)
    }

    pub fn get_genenames(&self, ec: EC) -> Option<HashSet<Genename>> {
        self.get_genes(ec)
            .map(|ids| ids.iter().map(|g| self.resolve_gene_id(*g).clone()).collect())
    }

    /// # Panics
    /// if the id was not created by this mapper
    pub fn resolve_gene_id(&self, gene_id: GeneId) -> &Genename {
        &self.int_to_gene[gene_id.0 as usize]
    }

    pub fn ngenes(&self) -> usize {
        self.int_to_gene.len()
    }

    pub fn n_ecs(&self) -> usize {
        self.ec2geneid.len()
    }
}

/// Finds the genes consistent with all the ECs a molecule (CB/UMI) was observed with.
///
/// This is the intersection of the ECs' gene sets. If the ECs do not share any gene,
/// `policy` decides between reporting the union and giving up on the molecule.
pub fn find_consistent(ecs: &[EC], ec2gene: &Ec2GeneMapper, policy: EmptyIntersectionPolicy) -> Result<ConsistentGenes> {
    let mut setlist = Vec::with_capacity(ecs.len());
    for ec in ecs {
        let genes = ec2gene.get_genes(*ec).ok_or(BusMatrixError::UnknownEc(ec.0))?;
        setlist.push(genes);
    }

    let Some((first, rest)) = setlist.split_first() else {
        return Ok(ConsistentGenes::Empty);
    };

    let mut shared_genes: BTreeSet<GeneId> = first.iter().copied().collect();
    for current_set in rest {
        shared_genes.retain(|g| current_set.contains(g));
        // stays empty from here on
        if shared_genes.is_empty() {
            break;
        }
    }

    if !shared_genes.is_empty() {
        return Ok(ConsistentGenes::Intersection(shared_genes));
    }

    match policy {
        EmptyIntersectionPolicy::Drop => Ok(ConsistentGenes::Empty),
        EmptyIntersectionPolicy::Union => {
            let union: BTreeSet<GeneId> = setlist.iter().flat_map(|s| s.iter().copied()).collect();
            if union.is_empty() {
                Ok(ConsistentGenes::Empty)
            } else {
                Ok(ConsistentGenes::Union(union))
            }
        }
    }
}
