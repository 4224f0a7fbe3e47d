//! # busmatrix
//!
//! Turns the output of a `kallisto bus` run into a gene-by-cell UMI count matrix.
//! The records are read from the text representation of a sorted busfile
//! (as written by `bustools text`), restricted to a cell barcode whitelist,
//! and multimapping molecules are split fractionally across their genes.
//!
//! # Basics of the library
//! The basic unit is the [`io::BusRecord`], which represents a single line of the text busfile,
//! consisting of CB, UMI, EC and COUNT.
//! [`io::BusTextReader`] iterates over the records of such a file.
//!
//! ## Iterate over cells
//! To iterate over a *sorted* busfile, grouping all records by CB:
//! ```rust, no_run
//! # use busmatrix::io::BusTextReader;
//! use busmatrix::iterators::CellGroupIterator; //need to bring that trait into scope
//!
//! let reader = BusTextReader::new("/path/to/output.txt").unwrap();
//! for group in reader.groupby_cb() {
//!     let (cb, vector_of_records) = group.unwrap();
//!     // Example: the number of records in that cell
//!     let n_records: usize = vector_of_records.len();
//! }
//! ```
//!
//! ## EC to gene mapping
//! [`io::BusFolder`] wraps around the `matrix.ec` and `transcripts.txt` created by the `kallisto bus`
//! command. Together with a transcript-to-gene file, this constructs a
//! [`consistent_genes::Ec2GeneMapper`] which resolves ECs to genes.
//!
//! ```rust, no_run
//! # use busmatrix::io::BusFolder;
//! # use busmatrix::consistent_genes::EC;
//! let bfolder = BusFolder::new("/path/to/busfolder");
//! let ec_mapper = bfolder.make_mapper("/path/to/transcripts_to_genes.txt").unwrap();
//! let gene_names = ec_mapper.get_genenames(EC(1));
//! ```
//!
//! ## Count matrix
//! [`count::build`] does the actual work, see the [`count`] module.

pub mod consistent_genes;
pub mod count;
pub mod countmatrix;
pub mod error;
pub mod inspect;
pub mod io;
pub mod iterators;
pub mod utils;
pub mod whitelist;
