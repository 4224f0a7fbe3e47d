use std::fmt;
use std::path::Path;

use crate::error::Result;
use crate::io::BusTextReader;
use crate::iterators::CbUmiGroupIterator;

/// Summary of a (sorted) text busfile
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusSummary {
    pub nrecords: usize,
    pub nreads: u64,
    pub ncells: usize,
    pub ncbumi: usize,
}

impl fmt::Display for BusSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} BUS records", self.nrecords)?;
        writeln!(f, "{} reads", self.nreads)?;
        writeln!(f, "{} cell-barcodes", self.ncells)?;
        write!(f, "{} CB-UMIs", self.ncbumi)
    }
}

/// Counts records, reads, cells and molecules in a single pass
pub fn inspect(busfile: impl AsRef<Path>) -> Result<BusSummary> {
    let mut summary = BusSummary::default();
    let mut last_cb: Option<String> = None;

    for group in BusTextReader::new(busfile)?.groupby_cbumi() {
        let ((cb, _umi), records) = group?;
        summary.ncbumi += 1;
        summary.nrecords += records.len();
        summary.nreads += records.iter().map(|r| r.COUNT as u64).sum::<u64>();
        // sorted input, so the CBs of consecutive molecules are contiguous
        if last_cb.as_ref() != Some(&cb) {
            summary.ncells += 1;
            last_cb = Some(cb);
        }
    }
    Ok(summary)
}
