use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};

use crate::error::{BusMatrixError, Result};

/// Opens a file for buffered reading, reporting a missing file as
/// [`BusMatrixError::FileNotFound`]
pub fn open_buffered(path: &Path) -> Result<BufReader<File>> {
    let fh = File::open(path).map_err(|e| BusMatrixError::from_io(path, e))?;
    Ok(BufReader::new(fh))
}

/// Progress indicator for streams of unknown length
pub fn get_spinner() -> ProgressBar{
    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::default_spinner()
        .template("[{elapsed_precise}] {spinner} {pos} records {per_sec}")
        .unwrap());
    bar
}

/// Splits a line on whitespace and/or commas, dropping empty fields
pub(crate) fn split_fields(line: &str) -> impl Iterator<Item = &str> {
    line.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
}
