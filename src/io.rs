//! Reading the text representation of busfiles, and the kallisto files needed to interpret them.
//!
//! The record stream is what `bustools text` produces: one record per line with the fields
//! CB, UMI, EC, COUNT, separated by whitespace (tabs usually) or commas.
//!
//! [`BusFolder`] wraps a kallisto output folder (`matrix.ec`, `transcripts.txt` and the records)
//! and builds the [`Ec2GeneMapper`] from it.
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::info;

use crate::consistent_genes::{Ec2GeneMapper, Genename, EC};
use crate::error::{BusMatrixError, Result};
use crate::utils::{open_buffered, split_fields};

/// A single entry of the busfile: a read (or several identical ones) from cell `CB`,
/// molecule `UMI`, compatible with equivalence class `EC`
#[allow(non_snake_case)]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BusRecord {
    pub CB: String,
    pub UMI: String,
    pub EC: u32,
    pub COUNT: u32,
}

impl BusRecord {
    /// Parses a single line; `None` for blank lines
    fn from_line(line: &str) -> std::result::Result<Option<BusRecord>, String> {
        let fields: Vec<&str> = split_fields(line).collect();
        match fields.as_slice() {
            [] => Ok(None),
            [cb, umi, ec, count] => {
                let ec = ec.parse::<u32>().map_err(|_| format!("EC {ec:?} is not an integer"))?;
                let count = count.parse::<u32>().map_err(|_| format!("COUNT {count:?} is not an integer"))?;
                Ok(Some(BusRecord { CB: cb.to_string(), UMI: umi.to_string(), EC: ec, COUNT: count }))
            }
            _ => Err(format!("expected 4 fields (CB UMI EC COUNT), found {}", fields.len())),
        }
    }
}

/// Iterates over the records of a busfile in text format.
///
/// Malformed lines are reported as [`BusMatrixError::Parse`] items; iteration continues
/// after them, so the consumer decides whether to abort.
/// ```rust, no_run
/// # use busmatrix::io::BusTextReader;
/// let reader = BusTextReader::new("/path/to/output.txt").unwrap();
/// for record in reader {
///     let record = record.unwrap();
///     // record.CB == ...
/// }
/// ```
#[derive(Debug)]
pub struct BusTextReader {
    path: PathBuf,
    reader: BufReader<File>,
    buf: Vec<u8>,
    line_number: usize,
    failed: bool,
}

impl BusTextReader {
    /// Opens the file; fails right away if it doesnt exist
    pub fn new(path: impl AsRef<Path>) -> Result<BusTextReader> {
        let path = path.as_ref().to_path_buf();
        let reader = open_buffered(&path)?;
        Ok(BusTextReader { path, reader, buf: Vec::new(), line_number: 0, failed: false })
    }

    /// Number of lines consumed so far
    pub fn line_number(&self) -> usize {
        self.line_number
    }
}

impl Iterator for BusTextReader {
    type Item = Result<BusRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            // raw bytes, so that a non-UTF-8 line is a parse error of that line only
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => {
                    // an unreadable file wont get better
                    self.failed = true;
                    return Some(Err(BusMatrixError::from_io(&self.path, e)));
                }
            }
            self.line_number += 1;

            let raw = trim_newline(&self.buf);
            let line = match std::str::from_utf8(raw) {
                Ok(l) => l,
                Err(_) => {
                    let lossy = String::from_utf8_lossy(raw);
                    return Some(Err(BusMatrixError::parse(&self.path, self.line_number, &lossy, "not valid UTF-8")));
                }
            };

            match BusRecord::from_line(line) {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => continue,
                Err(reason) => {
                    return Some(Err(BusMatrixError::parse(&self.path, self.line_number, line, reason)))
                }
            }
        }
    }
}

/// strips a trailing `\n` or `\r\n`
fn trim_newline(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}

/// Parses a `matrix.ec` into a HashMap EC -> list of transcript ids
pub fn parse_ecmatrix(filename: &Path) -> Result<HashMap<EC, Vec<u32>>> {
    let reader = open_buffered(filename)?;
    let mut ec_dict: HashMap<EC, Vec<u32>> = HashMap::new();

    for (i, line) in reader.lines().enumerate() {
        let l = line.map_err(|e| BusMatrixError::from_io(filename, e))?;
        let fields: Vec<&str> = l.split_whitespace().collect();
        match fields.as_slice() {
            [] => continue,
            [ec, transcripts] => {
                let ec = ec
                    .parse::<u32>()
                    .map_err(|_| BusMatrixError::parse(filename, i + 1, &l, "EC is not an integer"))?;
                let transcript_list = transcripts
                    .split(',')
                    .map(|x| x.parse::<u32>())
                    .collect::<std::result::Result<Vec<u32>, _>>()
                    .map_err(|_| BusMatrixError::parse(filename, i + 1, &l, "transcript ids must be integers"))?;
                ec_dict.insert(EC(ec), transcript_list);
            }
            _ => return Err(BusMatrixError::parse(filename, i + 1, &l, "expected 2 columns (EC transcripts)")),
        }
    }
    Ok(ec_dict)
}

/// Parses `transcripts.txt`; the line index is the transcript id used in `matrix.ec`
pub fn parse_transcripts(filename: &Path) -> Result<Vec<String>> {
    let reader = open_buffered(filename)?;
    reader
        .lines()
        .map(|l| l.map(|s| s.trim().to_string()).map_err(|e| BusMatrixError::from_io(filename, e)))
        .collect()
}

/// Parses a transcript-to-gene file: `transcript gene [whatever else]` per line.
///
/// A transcript listed twice with different genes is an error.
pub fn parse_t2g(t2g_file: &Path) -> Result<HashMap<String, Genename>> {
    let reader = open_buffered(t2g_file)?;
    let mut t2g_dict: HashMap<String, Genename> = HashMap::new();

    for (i, line) in reader.lines().enumerate() {
        let l = line.map_err(|e| BusMatrixError::from_io(t2g_file, e))?;
        let mut s = split_fields(&l);
        let Some(transcript_id) = s.next() else {
            continue;
        };
        let gene = s
            .next()
            .ok_or_else(|| BusMatrixError::parse(t2g_file, i + 1, &l, "expected at least 2 columns (transcript gene)"))?;

        if let Some(previous) = t2g_dict.insert(transcript_id.to_string(), Genename::from(gene)) {
            if previous.0 != gene {
                return Err(BusMatrixError::parse(
                    t2g_file,
                    i + 1,
                    &l,
                    format!("transcript {transcript_id} already mapped to {}", previous.0),
                ));
            }
        }
    }
    Ok(t2g_dict)
}

/// Combines EC->transcripts, transcript names and transcript->gene into EC->genes.
///
/// Transcripts without an entry in the t2g are kept under their own name.
pub fn build_ec2gene(
    ec_dict: &HashMap<EC, Vec<u32>>,
    transcripts: &[String],
    t2g_dict: &HashMap<String, Genename>,
) -> Result<HashMap<EC, HashSet<Genename>>> {
    let mut ec2gene: HashMap<EC, HashSet<Genename>> = HashMap::with_capacity(ec_dict.len());

    for (ec, transcript_ints) in ec_dict.iter() {
        let mut genes: HashSet<Genename> = HashSet::new();
        for t_int in transcript_ints {
            let t_name = transcripts.get(*t_int as usize).ok_or(BusMatrixError::UnknownTranscript {
                ec: ec.0,
                transcript: *t_int,
                ntranscripts: transcripts.len(),
            })?;

            match t2g_dict.get(t_name) {
                Some(genename) => genes.insert(genename.clone()),
                None => genes.insert(Genename(t_name.clone())),
            };
        }
        ec2gene.insert(*ec, genes);
    }
    Ok(ec2gene)
}

/// Default name of the text-converted, corrected and sorted busfile inside a [`BusFolder`]
pub const DEFAULT_BUSTEXT: &str = "output.corrected.sort.txt";

/// A kallisto output folder: `matrix.ec`, `transcripts.txt` and the records in text format
#[derive(Debug, Clone)]
pub struct BusFolder {
    pub foldername: PathBuf,
    pub bustext: String,
}

impl BusFolder {
    pub fn new(foldername: impl AsRef<Path>) -> BusFolder {
        BusFolder { foldername: foldername.as_ref().to_path_buf(), bustext: DEFAULT_BUSTEXT.to_string() }
    }

    /// Use a differently named record file inside the folder
    pub fn with_bustext(mut self, bustext: &str) -> BusFolder {
        self.bustext = bustext.to_string();
        self
    }

    pub fn get_busfile(&self) -> PathBuf {
        self.foldername.join(&self.bustext)
    }

    pub fn get_ecmatrix_file(&self) -> PathBuf {
        self.foldername.join("matrix.ec")
    }

    pub fn get_transcript_file(&self) -> PathBuf {
        self.foldername.join("transcripts.txt")
    }

    /// Reads the EC matrix, the transcripts and the t2g file into an [`Ec2GeneMapper`]
    pub fn make_mapper(&self, t2g_file: impl AsRef<Path>) -> Result<Ec2GeneMapper> {
        info!("Reading EC.matrix");
        let ec_dict = parse_ecmatrix(&self.get_ecmatrix_file())?;

        info!("Reading transcripts.txt");
        let transcripts = parse_transcripts(&self.get_transcript_file())?;

        info!("Reading t2g");
        let t2g_dict = parse_t2g(t2g_file.as_ref())?;

        info!("building EC->gene");
        let ec2gene = build_ec2gene(&ec_dict, &transcripts, &t2g_dict)?;
        let mapper = Ec2GeneMapper::new(ec2gene);
        info!("{} ECs, {} genes", mapper.n_ecs(), mapper.ngenes());
        Ok(mapper)
    }
}

/// Writes records as `bustools text` would, one tab separated record per line
pub fn write_bustext(records: &[BusRecord], path: &Path) -> Result<()> {
    use std::io::Write;
    let fh = File::create(path).map_err(|e| BusMatrixError::from_io(path, e))?;
    let mut writer = std::io::BufWriter::new(fh);
    for r in records {
        writeln!(writer, "{}\t{}\t{}\t{}", r.CB, r.UMI, r.EC, r.COUNT).map_err(|e| BusMatrixError::from_io(path, e))?;
    }
    writer.flush().map_err(|e| BusMatrixError::from_io(path, e))
}
