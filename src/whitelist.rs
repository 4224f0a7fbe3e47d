//! Cell barcode whitelists, one barcode per line (e.g. 10x's `3M-february-2018.txt`)
use std::collections::HashSet;
use std::io::BufRead;
use std::path::Path;

use crate::error::{BusMatrixError, Result};
use crate::utils::open_buffered;

#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    barcodes: HashSet<String>,
}

impl Whitelist {
    /// Parse the whitelist-file into a set; blank lines are ignored
    pub fn from_file(whitelist_filename: impl AsRef<Path>) -> Result<Whitelist> {
        let path = whitelist_filename.as_ref();
        let reader = open_buffered(path)?;
        let mut barcodes = HashSet::new();
        for line in reader.lines() {
            let line = line.map_err(|e| BusMatrixError::from_io(path, e))?;
            let cb = line.trim();
            if !cb.is_empty() {
                barcodes.insert(cb.to_string());
            }
        }
        Ok(Whitelist { barcodes })
    }

    pub fn contains(&self, cb: &str) -> bool {
        self.barcodes.contains(cb)
    }

    pub fn len(&self) -> usize {
        self.barcodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.barcodes.is_empty()
    }
}

impl FromIterator<String> for Whitelist {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        Whitelist { barcodes: iter.into_iter().collect() }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::Whitelist;
    use crate::error::BusMatrixError;

    #[test]
    fn test_load_whitelist(){
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"AAAA\nCCCC\n\n  GGGG \nAAAA\n").unwrap();
        f.flush().unwrap();

        let wl = Whitelist::from_file(f.path()).unwrap();
        assert_eq!(wl.len(), 3);
        assert!(wl.contains("AAAA"));
        assert!(wl.contains("GGGG"));
        assert!(!wl.contains("TTTT"));
        assert!(!wl.contains(""));
    }

    #[test]
    fn test_missing_whitelist(){
        let r = Whitelist::from_file("/nonexistent/busmatrix/whitelist.txt");
        assert!(matches!(r, Err(BusMatrixError::FileNotFound(_))));
    }

    #[test]
    fn test_from_iter(){
        let wl: Whitelist = vec!["AAAA".to_string(), "CCCC".to_string()].into_iter().collect();
        assert_eq!(wl.len(), 2);
        assert!(!wl.is_empty());
        assert!(Whitelist::default().is_empty());
    }
}
