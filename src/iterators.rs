//! Grouping a **sorted** stream of [`BusRecord`]s by CB or by CB/UMI.
//!
//! The groups are formed by a single contiguous scan, so the input has to be sorted
//! (as `bustools sort` does). If a key smaller than the current one shows up, the iterator
//! yields [`BusMatrixError::UnsortedInput`] rather than silently emitting the same cell twice.
//!
//! ```rust, no_run
//! # use busmatrix::io::BusTextReader;
//! use busmatrix::iterators::CellGroupIterator; //need to bring that trait into scope
//!
//! let reader = BusTextReader::new("/path/to/output.txt").unwrap();
//! for group in reader.groupby_cb() {
//!     let (cb, records) = group.unwrap();
//!     let n_records = records.len();
//! }
//! ```
use std::fmt::Debug;

use crate::error::{BusMatrixError, Result};
use crate::io::BusRecord;

/// Groups consecutive records with the same key
pub struct SortedGroups<I, K> {
    iter: I,
    key: fn(&BusRecord) -> K,
    last_record: Option<BusRecord>, // first record of the next group
}

impl<I, K> SortedGroups<I, K>
where
    I: Iterator<Item = Result<BusRecord>>,
{
    pub fn new(iter: I, key: fn(&BusRecord) -> K) -> Self {
        SortedGroups { iter, key, last_record: None }
    }
}

impl<I, K> Iterator for SortedGroups<I, K>
where
    I: Iterator<Item = Result<BusRecord>>,
    K: Ord + Debug,
{
    type Item = Result<(K, Vec<BusRecord>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = match self.last_record.take() {
            Some(r) => r,
            None => match self.iter.next()? {
                Ok(r) => r,
                Err(e) => return Some(Err(e)),
            },
        };
        let current_key = (self.key)(&first);
        let mut busrecords = vec![first];

        loop {
            match self.iter.next() {
                // ran past the last entry: emit what we have
                None => return Some(Ok((current_key, busrecords))),
                Some(Err(e)) => return Some(Err(e)),
                Some(Ok(new_record)) => {
                    let new_key = (self.key)(&new_record);
                    match new_key.cmp(&current_key) {
                        std::cmp::Ordering::Equal => busrecords.push(new_record),
                        std::cmp::Ordering::Greater => {
                            self.last_record = Some(new_record);
                            return Some(Ok((current_key, busrecords)));
                        }
                        std::cmp::Ordering::Less => {
                            return Some(Err(BusMatrixError::UnsortedInput {
                                current: format!("{current_key:?}"),
                                next: format!("{new_key:?}"),
                            }))
                        }
                    }
                }
            }
        }
    }
}

/// Groups records by cell barcode
pub trait CellGroupIterator: Iterator<Item = Result<BusRecord>> + Sized {
    fn groupby_cb(self) -> SortedGroups<Self, String> {
        SortedGroups::new(self, |r| r.CB.clone())
    }
}
impl<I: Iterator<Item = Result<BusRecord>>> CellGroupIterator for I {}

/// Groups records by molecule (CB and UMI); requires sorting by CB, then UMI
pub trait CbUmiGroupIterator: Iterator<Item = Result<BusRecord>> + Sized {
    fn groupby_cbumi(self) -> SortedGroups<Self, (String, String)> {
        SortedGroups::new(self, |r| (r.CB.clone(), r.UMI.clone()))
    }
}
impl<I: Iterator<Item = Result<BusRecord>>> CbUmiGroupIterator for I {}
