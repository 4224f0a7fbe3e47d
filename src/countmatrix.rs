use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;

use sprs::io::{read_matrix_market, write_matrix_market};
use sprs::TriMat;

use crate::error::{BusMatrixError, Result};
use crate::utils::open_buffered;

/// Represents a count matrix of Genes vs Cells.
///
/// Rows are genes, columns are cell barcodes, stored as CSR.
/// Entries are (possibly fractional) UMI counts.
#[derive(Debug, Clone)]
pub struct CountMatrix {
    pub matrix: sprs::CsMat<f64>,
    pub genes: Vec<String>,
    pub cbs: Vec<String>,
}

impl CountMatrix {
    /// Fails if the matrix shape doesnt match the number of gene/cell labels
    pub fn new(matrix: sprs::CsMat<f64>, genes: Vec<String>, cbs: Vec<String>) -> Result<CountMatrix> {
        if matrix.shape() != (genes.len(), cbs.len()) {
            return Err(BusMatrixError::ShapeMismatch { shape: matrix.shape(), ngenes: genes.len(), ncells: cbs.len() });
        }
        Ok(CountMatrix { matrix, genes, cbs })
    }

    /// (number of genes, number of cells)
    pub fn shape(&self) -> (usize, usize) {
        self.matrix.shape()
    }

    pub fn to_map(&self) -> HashMap<(String, String), f64> {
        let mut h1: HashMap<(String, String), f64> = HashMap::new();
        for (value, (i, j)) in self.matrix.iter() {
            h1.insert((self.genes[i].clone(), self.cbs[j].clone()), *value);
        }
        h1
    }

    /// Same entries, regardless of the row/column order
    pub fn is_equal(&self, other: &Self) -> bool {
        self.to_map() == other.to_map()
    }

    /// The count of a single gene in a single cell; `None` if either is not in the matrix.
    /// Genes/cells present in the matrix but without an entry give `Some(0.0)`.
    pub fn get(&self, gene: &str, cb: &str) -> Option<f64> {
        let i = self.genes.iter().position(|g| g == gene)?;
        let j = self.cbs.iter().position(|c| c == cb)?;
        Some(self.matrix.get(i, j).copied().unwrap_or(0.0))
    }

    /// Total counts per gene, in row order
    pub fn row_sums(&self) -> Vec<f64> {
        self.matrix
            .outer_iterator()
            .map(|row| row.iter().map(|(_j, v)| *v).sum())
            .collect()
    }

    /// Total counts per cell, in column order
    pub fn col_sums(&self) -> Vec<f64> {
        let mut sums = vec![0.0; self.cbs.len()];
        for (value, (_i, j)) in self.matrix.iter() {
            sums[j] += *value;
        }
        sums
    }

    pub fn from_disk(mtx_file: impl AsRef<Path>, genefile: impl AsRef<Path>, cbfile: impl AsRef<Path>) -> Result<CountMatrix> {
        let mtx_file = mtx_file.as_ref();
        // to tell a missing file apart from a broken one
        std::fs::metadata(mtx_file).map_err(|e| BusMatrixError::from_io(mtx_file, e))?;
        let mat: TriMat<f64> = read_matrix_market(mtx_file)
            .map_err(|e| BusMatrixError::parse(mtx_file, 0, "", format!("not a valid MatrixMarket file: {e:?}")))?;
        let matrix: sprs::CsMat<f64> = mat.to_csr();

        let genes = read_labels(genefile.as_ref())?;
        let cbs = read_labels(cbfile.as_ref())?;

        if matrix.shape() != (genes.len(), cbs.len()) {
            return Err(BusMatrixError::parse(
                mtx_file,
                0,
                "",
                format!("shape {:?} doesnt match {} genes x {} cells", matrix.shape(), genes.len(), cbs.len()),
            ));
        }
        Ok(CountMatrix { matrix, genes, cbs })
    }

    /// Writes `gene.mtx`, `gene.genes.txt` and `gene.barcodes.txt` into the folder
    pub fn write(&self, foldername: impl AsRef<Path>) -> Result<()> {
        let folder = foldername.as_ref();
        let mfile = folder.join("gene.mtx");
        let cbfile = folder.join("gene.barcodes.txt");
        let genefile = folder.join("gene.genes.txt");

        write_matrix_market(&mfile, &self.matrix).map_err(|e| BusMatrixError::from_io(&mfile, e))?;
        write_labels(&cbfile, &self.cbs)?;
        write_labels(&genefile, &self.genes)?;
        Ok(())
    }
}

fn read_labels(path: &Path) -> Result<Vec<String>> {
    open_buffered(path)?
        .lines()
        .collect::<std::io::Result<Vec<String>>>()
        .map_err(|e| BusMatrixError::from_io(path, e))
}

fn write_labels(path: &Path, labels: &[String]) -> Result<()> {
    let fh = File::create(path).map_err(|e| BusMatrixError::from_io(path, e))?;
    let mut writer = BufWriter::new(fh);
    for l in labels {
        writeln!(writer, "{}", l).map_err(|e| BusMatrixError::from_io(path, e))?;
    }
    writer.flush().map_err(|e| BusMatrixError::from_io(path, e))
}
