//! Building a gene-by-cell count matrix from a sorted record stream, analogous to `bustools count`.
//!
//! For each whitelisted cell, records are grouped by UMI. Each UMI (molecule) is assigned to
//! the genes that all of its ECs agree on ([`find_consistent`]), and its count is split evenly
//! across those genes. Molecules mapping to several genes thus end up as fractional counts,
//! unlike `bustools count` without `--multimapping`, which discards them.
//!
//! ```rust, no_run
//! # use busmatrix::io::BusFolder;
//! # use busmatrix::whitelist::Whitelist;
//! # use busmatrix::count::{count_file, CountParams};
//! let bfolder = BusFolder::new("/path/to/busfolder");
//! let mapper = bfolder.make_mapper("/path/to/transcripts_to_genes.txt").unwrap();
//! let whitelist = Whitelist::from_file("/path/to/whitelist.txt").unwrap();
//! let (countmatrix, stats) = count_file(bfolder.get_busfile(), &mapper, &whitelist, &CountParams::default()).unwrap();
//! ```
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::Path;

use indicatif::ProgressBar;
use itertools::Itertools;
use log::{debug, info, warn};

use crate::consistent_genes::{find_consistent, ConsistentGenes, Ec2GeneMapper, EmptyIntersectionPolicy, GeneId, EC};
use crate::countmatrix::CountMatrix;
use crate::error::{BusMatrixError, Result};
use crate::io::{BusRecord, BusTextReader};
use crate::iterators::CellGroupIterator;
use crate::utils::get_spinner;
use crate::whitelist::Whitelist;

/// the progress bar is advanced every that many records
pub const PROGRESS_INTERVAL: u64 = 100_000;

/// What a single molecule contributes to the matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountMode {
    /// every UMI counts as one molecule
    #[default]
    Umi,
    /// every UMI counts with its number of reads (sum of COUNT over its records)
    Reads,
}

#[derive(Debug, Clone)]
pub struct CountParams {
    /// expected number of (whitelisted) cells; only used to preallocate
    pub estimated_cells: usize,
    /// expected number of genes; only used to preallocate
    pub estimated_genes: usize,
    pub policy: EmptyIntersectionPolicy,
    pub mode: CountMode,
    /// skip (and count) malformed lines and unknown ECs instead of failing
    pub lenient: bool,
}

impl Default for CountParams {
    fn default() -> Self {
        CountParams {
            estimated_cells: 10_000,
            estimated_genes: 30_000,
            policy: EmptyIntersectionPolicy::default(),
            mode: CountMode::default(),
            lenient: false,
        }
    }
}

/// Bookkeeping of a single [`build`] run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountStats {
    pub records: usize,
    pub malformed_skipped: usize,
    pub unknown_ec_skipped: usize,
    pub barcodes: usize,
    pub barcodes_whitelisted: usize,
    /// UMIs that contributed to the matrix
    pub umis_assigned: usize,
    /// UMIs split across more than one gene
    pub umis_multimapped: usize,
    /// UMIs whose ECs shared no gene and fell back to the union
    pub umis_union_fallback: usize,
    /// UMIs whose ECs shared no gene and got discarded
    pub umis_dropped: usize,
}

impl fmt::Display for CountStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} records, {}/{} barcodes whitelisted, {} UMIs assigned ({} multimapped, {} union fallback), {} UMIs dropped",
            self.records,
            self.barcodes_whitelisted,
            self.barcodes,
            self.umis_assigned,
            self.umis_multimapped,
            self.umis_union_fallback,
            self.umis_dropped
        )?;
        if self.malformed_skipped > 0 || self.unknown_ec_skipped > 0 {
            write!(f, ", skipped {} malformed lines and {} unknown ECs", self.malformed_skipped, self.unknown_ec_skipped)?;
        }
        Ok(())
    }
}

/// Sits between the raw records and the grouping: ticks the progress bar,
/// and in lenient mode swallows malformed lines
struct RecordSource<I> {
    inner: I,
    lenient: bool,
    bar: ProgressBar,
    records: u64,
    malformed: usize,
}

impl<I: Iterator<Item = Result<BusRecord>>> Iterator for RecordSource<I> {
    type Item = Result<BusRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(r) => {
                    self.records += 1;
                    if self.records % PROGRESS_INTERVAL == 0 {
                        self.bar.inc(PROGRESS_INTERVAL);
                    }
                    return Some(Ok(r));
                }
                Err(e) if self.lenient && e.is_record_level() => {
                    debug!("skipping: {e}");
                    self.malformed += 1;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Builds the gene x cell matrix from a stream of records **sorted** by CB.
///
/// * only cells in the `whitelist` are counted
/// * rows: genes with a non-zero count, sorted by name
/// * columns: whitelisted cells with a non-zero count, in the order of the input
pub fn build<I>(records: I, ec2gene: &Ec2GeneMapper, whitelist: &Whitelist, params: &CountParams) -> Result<CountMatrix>
where
    I: Iterator<Item = Result<BusRecord>>,
{
    build_with_stats(records, ec2gene, whitelist, params).map(|(cmat, _stats)| cmat)
}

/// Same as [`build`], also reporting what happened to the records
pub fn build_with_stats<I>(
    records: I,
    ec2gene: &Ec2GeneMapper,
    whitelist: &Whitelist,
    params: &CountParams,
) -> Result<(CountMatrix, CountStats)>
where
    I: Iterator<Item = Result<BusRecord>>,
{
    let mut stats = CountStats::default();
    let bar = get_spinner();
    let mut source = RecordSource { inner: records, lenient: params.lenient, bar: bar.clone(), records: 0, malformed: 0 };

    // sparse matrix entries: gene, cell-index, value
    let mut ii: Vec<GeneId> = Vec::with_capacity(params.estimated_cells);
    let mut jj: Vec<usize> = Vec::with_capacity(params.estimated_cells);
    let mut vv: Vec<f64> = Vec::with_capacity(params.estimated_cells);
    let mut cbs: Vec<String> = Vec::with_capacity(params.estimated_cells);
    let mut observed_genes: HashSet<GeneId> = HashSet::with_capacity(params.estimated_genes);

    for group in (&mut source).groupby_cb() {
        let (cb, record_list) = group?;
        stats.barcodes += 1;
        if !whitelist.contains(&cb) {
            continue;
        }
        stats.barcodes_whitelisted += 1;

        let expression_vector = records_to_expression_vector(&record_list, ec2gene, params, &mut stats)?;
        if expression_vector.is_empty() {
            continue;
        }

        let cell_ix = cbs.len();
        cbs.push(cb);
        for (gene, count) in expression_vector {
            ii.push(gene);
            jj.push(cell_ix);
            vv.push(count);
            observed_genes.insert(gene);
        }
    }
    bar.finish_and_clear();
    stats.records = source.records as usize;
    stats.malformed_skipped = source.malformed;

    // only the genes we've seen, GeneId order == name order
    let gene_vector: Vec<GeneId> = observed_genes.into_iter().sorted().collect();
    let gene_ix: HashMap<GeneId, usize> = gene_vector.iter().enumerate().map(|(ix, g)| (*g, ix)).collect();
    let rows: Vec<usize> = ii.iter().map(|g| gene_ix[g]).collect();

    let c: sprs::TriMat<f64> = sprs::TriMat::from_triplets((gene_vector.len(), cbs.len()), rows, jj, vv);
    let genes: Vec<String> = gene_vector.iter().map(|g| ec2gene.resolve_gene_id(*g).0.clone()).collect();
    let countmatrix = CountMatrix::new(c.to_csr(), genes, cbs)?;

    info!("{stats}");
    if stats.malformed_skipped > 0 || stats.unknown_ec_skipped > 0 {
        warn!(
            "lenient mode skipped {} malformed lines and {} records with unknown ECs",
            stats.malformed_skipped, stats.unknown_ec_skipped
        );
    }
    info!("{:?} nnz {}", countmatrix.shape(), countmatrix.matrix.nnz());
    Ok((countmatrix, stats))
}

/// Opens the text busfile and runs [`build_with_stats`] on it.
/// A missing file is reported before anything else happens.
pub fn count_file(
    bustext: impl AsRef<Path>,
    ec2gene: &Ec2GeneMapper,
    whitelist: &Whitelist,
    params: &CountParams,
) -> Result<(CountMatrix, CountStats)> {
    let reader = BusTextReader::new(bustext)?;
    build_with_stats(reader, ec2gene, whitelist, params)
}

/// Turns the records of a single cell into its expression vector: gene -> (fractional) count
fn records_to_expression_vector(
    record_list: &[BusRecord],
    ec2gene: &Ec2GeneMapper,
    params: &CountParams,
    stats: &mut CountStats,
) -> Result<BTreeMap<GeneId, f64>> {
    // UMI -> (ECs, reads); ordered, so the float sums come out the same every time
    let mut molecules: BTreeMap<&str, (Vec<EC>, u64)> = BTreeMap::new();
    for r in record_list {
        if ec2gene.get_genes(EC(r.EC)).is_none() {
            if params.lenient {
                debug!("skipping record with unknown EC {} ({}/{})", r.EC, r.CB, r.UMI);
                stats.unknown_ec_skipped += 1;
                continue;
            }
            return Err(BusMatrixError::UnknownEc(r.EC));
        }
        let (ecs, reads) = molecules.entry(r.UMI.as_str()).or_insert_with(|| (Vec::new(), 0));
        ecs.push(EC(r.EC));
        *reads += r.COUNT as u64;
    }

    let mut expression_vector: BTreeMap<GeneId, f64> = BTreeMap::new();
    for (_umi, (ecs, reads)) in molecules {
        let consistent_genes = find_consistent(&ecs, ec2gene, params.policy)?;
        let genes: &BTreeSet<GeneId> = match &consistent_genes {
            ConsistentGenes::Intersection(g) => g,
            ConsistentGenes::Union(g) => {
                stats.umis_union_fallback += 1;
                g
            }
            ConsistentGenes::Empty => {
                stats.umis_dropped += 1;
                continue;
            }
        };

        let weight = match params.mode {
            CountMode::Umi => 1.0,
            CountMode::Reads => reads as f64,
        };
        if weight == 0.0 {
            continue;
        }
        let share = weight / genes.len() as f64;
        for g in genes {
            *expression_vector.entry(*g).or_insert(0.0) += share;
        }

        stats.umis_assigned += 1;
        if genes.len() > 1 {
            stats.umis_multimapped += 1;
        }
    }
    Ok(expression_vector)
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use super::{build, build_with_stats, count_file, records_to_expression_vector, CountMode, CountParams, CountStats};
    use crate::consistent_genes::{Ec2GeneMapper, EmptyIntersectionPolicy, GeneId, Genename, EC};
    use crate::error::{BusMatrixError, Result};
    use crate::io::BusRecord;
    use crate::whitelist::Whitelist;

    fn mapper() -> Ec2GeneMapper {
        let g = |names: &[&str]| names.iter().map(|x| Genename::from(*x)).collect::<HashSet<_>>();
        Ec2GeneMapper::new(HashMap::from([
            (EC(0), g(&["A", "B"])),
            (EC(1), g(&["B", "C"])),
            (EC(2), g(&["A"])),
            (EC(3), g(&["C"])),
            (EC(4), g(&["D"])),
        ]))
    }

    fn rec(cb: &str, umi: &str, ec: u32, count: u32) -> BusRecord {
        BusRecord { CB: cb.to_string(), UMI: umi.to_string(), EC: ec, COUNT: count }
    }

    fn ok(records: Vec<BusRecord>) -> impl Iterator<Item = Result<BusRecord>> {
        records.into_iter().map(Ok)
    }

    fn wl(cbs: &[&str]) -> Whitelist {
        cbs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_multimapped_umi_is_split(){
        let m = mapper();
        let records = vec![rec("AAAA", "U1", 0, 3)];
        let cmat = build(ok(records), &m, &wl(&["AAAA"]), &CountParams::default()).unwrap();

        assert_eq!(cmat.genes, vec!["A", "B"]);
        assert_eq!(cmat.cbs, vec!["AAAA"]);
        assert_eq!(cmat.get("A", "AAAA"), Some(0.5));
        assert_eq!(cmat.get("B", "AAAA"), Some(0.5));
    }

    #[test]
    fn test_intersection_gets_full_count(){
        let m = mapper();
        let records = vec![rec("AAAA", "U1", 0, 1), rec("AAAA", "U1", 1, 1)];
        let cmat = build(ok(records), &m, &wl(&["AAAA"]), &CountParams::default()).unwrap();

        assert_eq!(cmat.genes, vec!["B"]);
        assert_eq!(cmat.get("B", "AAAA"), Some(1.0));
        assert_eq!(cmat.get("A", "AAAA"), None);
        assert_eq!(cmat.get("C", "AAAA"), None);
    }

    #[test]
    fn test_no_whitelisted_cells(){
        let m = mapper();
        let records = vec![rec("AAAA", "U1", 0, 1), rec("CCCC", "U1", 2, 1)];
        let cmat = build(ok(records), &m, &wl(&["GGGG"]), &CountParams::default()).unwrap();
        assert_eq!(cmat.shape(), (0, 0));
        assert!(cmat.cbs.is_empty());
    }

    #[test]
    fn test_only_whitelisted_columns(){
        let m = mapper();
        let records = vec![
            rec("AAAA", "U1", 2, 1),
            rec("CCCC", "U1", 3, 1),
            rec("GGGG", "U1", 2, 1),
            rec("GGGG", "U2", 4, 1),
        ];
        let (cmat, stats) = build_with_stats(ok(records), &m, &wl(&["AAAA", "GGGG"]), &CountParams::default()).unwrap();
        assert_eq!(cmat.cbs, vec!["AAAA", "GGGG"]);
        // C only came from the non-whitelisted cell
        assert_eq!(cmat.genes, vec!["A", "D"]);
        assert_eq!(cmat.get("A", "GGGG"), Some(1.0));
        assert_eq!(cmat.get("D", "GGGG"), Some(1.0));
        assert_eq!(stats.barcodes, 3);
        assert_eq!(stats.barcodes_whitelisted, 2);
        assert_eq!(stats.records, 4);
        assert!(cmat.row_sums().iter().all(|s| *s > 0.0));
    }

    #[test]
    fn test_umis_need_not_be_sorted_within_cell(){
        let m = mapper();
        let records = vec![rec("AAAA", "U2", 0, 1), rec("AAAA", "U1", 2, 1), rec("AAAA", "U2", 1, 1)];
        let cmat = build(ok(records), &m, &wl(&["AAAA"]), &CountParams::default()).unwrap();
        assert_eq!(cmat.get("A", "AAAA"), Some(1.0));
        assert_eq!(cmat.get("B", "AAAA"), Some(1.0));
    }

    #[test]
    fn test_empty_intersection_policy(){
        let m = mapper();
        let records = vec![rec("AAAA", "U1", 2, 1), rec("AAAA", "U1", 3, 1), rec("AAAA", "U2", 4, 1)];

        let (cmat, stats) = build_with_stats(ok(records.clone()), &m, &wl(&["AAAA"]), &CountParams::default()).unwrap();
        assert_eq!(cmat.get("A", "AAAA"), Some(0.5));
        assert_eq!(cmat.get("C", "AAAA"), Some(0.5));
        assert_eq!(cmat.get("D", "AAAA"), Some(1.0));
        assert_eq!(stats.umis_union_fallback, 1);
        assert_eq!(stats.umis_assigned, 2);

        let params = CountParams { policy: EmptyIntersectionPolicy::Drop, ..Default::default() };
        let (cmat, stats) = build_with_stats(ok(records), &m, &wl(&["AAAA"]), &params).unwrap();
        assert_eq!(cmat.genes, vec!["D"]);
        assert_eq!(stats.umis_dropped, 1);
        assert_eq!(stats.umis_assigned, 1);
    }

    #[test]
    fn test_dropped_only_cell_has_no_column(){
        let m = mapper();
        let records = vec![rec("AAAA", "U1", 2, 1), rec("AAAA", "U1", 3, 1), rec("CCCC", "U1", 4, 1)];
        let params = CountParams { policy: EmptyIntersectionPolicy::Drop, ..Default::default() };
        let cmat = build(ok(records), &m, &wl(&["AAAA", "CCCC"]), &params).unwrap();
        assert_eq!(cmat.cbs, vec!["CCCC"]);
    }

    #[test]
    fn test_count_reads(){
        let m = mapper();
        let records = vec![rec("AAAA", "U1", 0, 3), rec("AAAA", "U1", 0, 1), rec("AAAA", "U2", 2, 2)];
        let params = CountParams { mode: CountMode::Reads, ..Default::default() };
        let cmat = build(ok(records), &m, &wl(&["AAAA"]), &params).unwrap();
        assert_eq!(cmat.get("A", "AAAA"), Some(4.0));
        assert_eq!(cmat.get("B", "AAAA"), Some(2.0));
    }

    #[test]
    fn test_unsorted_input(){
        let m = mapper();
        let records = vec![rec("CCCC", "U1", 0, 1), rec("AAAA", "U1", 0, 1)];
        let r = build(ok(records), &m, &wl(&["AAAA", "CCCC"]), &CountParams::default());
        assert!(matches!(r, Err(BusMatrixError::UnsortedInput { .. })));
    }

    #[test]
    fn test_unknown_ec(){
        let m = mapper();
        let records = vec![rec("AAAA", "U1", 2, 1), rec("AAAA", "U2", 99, 1)];
        let r = build(ok(records.clone()), &m, &wl(&["AAAA"]), &CountParams::default());
        assert!(matches!(r, Err(BusMatrixError::UnknownEc(99))));

        let params = CountParams { lenient: true, ..Default::default() };
        let (cmat, stats) = build_with_stats(ok(records), &m, &wl(&["AAAA"]), &params).unwrap();
        assert_eq!(cmat.get("A", "AAAA"), Some(1.0));
        assert_eq!(stats.unknown_ec_skipped, 1);
    }

    #[test]
    fn test_unknown_ec_in_skipped_cell_is_fine(){
        let m = mapper();
        let records = vec![rec("AAAA", "U1", 2, 1), rec("TTTT", "U2", 99, 1)];
        let cmat = build(ok(records), &m, &wl(&["AAAA"]), &CountParams::default()).unwrap();
        assert_eq!(cmat.cbs, vec!["AAAA"]);
    }

    #[test]
    fn test_lenient_parse_errors(){
        let m = mapper();
        let parse_error = BusMatrixError::Parse {
            path: "bus.txt".into(),
            line_number: 2,
            line: "garbage".to_string(),
            reason: "expected 4 fields".to_string(),
        };
        let records: Vec<Result<BusRecord>> = vec![Ok(rec("AAAA", "U1", 2, 1)), Err(parse_error), Ok(rec("AAAA", "U2", 2, 1))];

        let params = CountParams { lenient: true, ..Default::default() };
        let (cmat, stats) = build_with_stats(records.into_iter(), &m, &wl(&["AAAA"]), &params).unwrap();
        assert_eq!(cmat.get("A", "AAAA"), Some(2.0));
        assert_eq!(stats.malformed_skipped, 1);
        assert_eq!(stats.records, 2);
    }

    #[test]
    fn test_lenient_skips_invalid_utf8_line(){
        let m = mapper();
        let dir = tempfile::tempdir().unwrap();
        let fname = dir.path().join("bus.txt");
        std::fs::write(&fname, b"AAAA\tU1\t2\t1\nAAAA\tU\xff\xfe\t2\t1\nAAAA\tU3\t2\t1\n").unwrap();

        let r = count_file(&fname, &m, &wl(&["AAAA"]), &CountParams::default());
        assert!(matches!(r, Err(BusMatrixError::Parse { line_number: 2, .. })));

        let params = CountParams { lenient: true, ..Default::default() };
        let (cmat, stats) = count_file(&fname, &m, &wl(&["AAAA"]), &params).unwrap();
        assert_eq!(cmat.get("A", "AAAA"), Some(2.0));
        assert_eq!(stats.malformed_skipped, 1);
    }

    #[test]
    fn test_strict_parse_errors(){
        let m = mapper();
        let parse_error = BusMatrixError::Parse {
            path: "bus.txt".into(),
            line_number: 2,
            line: "garbage".to_string(),
            reason: "expected 4 fields".to_string(),
        };
        let records: Vec<Result<BusRecord>> = vec![Ok(rec("AAAA", "U1", 2, 1)), Err(parse_error)];
        let r = build(records.into_iter(), &m, &wl(&["AAAA"]), &CountParams::default());
        assert!(matches!(r, Err(BusMatrixError::Parse { line_number: 2, .. })));
    }

    #[test]
    fn test_capacity_hints_are_only_hints(){
        let m = mapper();
        let records: Vec<BusRecord> = (0..50)
            .map(|i| rec(&format!("CB{i:03}"), "U1", i % 5, 1))
            .collect();
        let whitelist: Whitelist = (0..50).map(|i| format!("CB{i:03}")).collect();
        let params = CountParams { estimated_cells: 1, estimated_genes: 1, ..Default::default() };
        let cmat = build(ok(records.clone()), &m, &whitelist, &params).unwrap();
        let cmat2 = build(ok(records), &m, &whitelist, &CountParams::default()).unwrap();
        assert_eq!(cmat.shape(), (4, 50));
        assert!(cmat.is_equal(&cmat2));
        assert_eq!(cmat.matrix.data(), cmat2.matrix.data());
        assert_eq!(cmat.matrix.indices(), cmat2.matrix.indices());
    }

    #[test]
    fn test_records_to_expression_vector(){
        let m = mapper();
        let records = vec![
            rec("AAAA", "U1", 0, 1),
            rec("AAAA", "U1", 1, 1),
            rec("AAAA", "U2", 0, 1),
            rec("AAAA", "U3", 3, 1),
        ];
        let mut stats = CountStats::default();
        let ev = records_to_expression_vector(&records, &m, &CountParams::default(), &mut stats).unwrap();
        // A=0, B=1, C=2
        assert_eq!(ev.get(&GeneId(0)), Some(&0.5));
        assert_eq!(ev.get(&GeneId(1)), Some(&1.5));
        assert_eq!(ev.get(&GeneId(2)), Some(&1.0));
        assert_eq!(stats.umis_assigned, 3);
        assert_eq!(stats.umis_multimapped, 1);
    }
}
