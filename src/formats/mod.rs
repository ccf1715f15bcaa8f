//! Flat-file dialects.
//!
//! Every dialect has a reader, a lazy one-pass [`Iterator`] over
//! [`Record`]s, and a writer that renders records back to text. Readers
//! never touch the store. To retry, reopen the source and build a new
//! reader.

pub mod fasta;
pub mod gaf;
pub mod gff;

use std::fmt;
use std::io::{BufRead, Lines};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Gff,
    Fasta,
    Gaf,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gff => "gff",
            Self::Fasta => "fasta",
            Self::Gaf => "gaf",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gff => "GFF3",
            Self::Fasta => "FASTA",
            Self::Gaf => "GAF",
        })
    }
}

/// Reader for `dialect` over `input`.
pub fn records<'a, R: BufRead + 'a>(
    dialect: Dialect,
    input: R,
) -> Box<dyn Iterator<Item = Result<Record>> + 'a> {
    match dialect {
        Dialect::Gff => Box::new(gff::GffReader::new(input)),
        Dialect::Fasta => Box::new(fasta::FastaReader::new(input).map(|r| r.map(Record::Sequence))),
        Dialect::Gaf => Box::new(gaf::GafReader::new(input)),
    }
}

/// Lines with their 1-based numbers and without trailing `\r`.
pub(crate) struct NumberedLines<R> {
    lines: Lines<R>,
    line: usize,
}

impl<R: BufRead> NumberedLines<R> {
    pub(crate) fn new(input: R) -> Self {
        Self {
            lines: input.lines(),
            line: 0,
        }
    }
}

impl<R: BufRead> Iterator for NumberedLines<R> {
    type Item = std::io::Result<(usize, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.lines.next()?;
        self.line += 1;
        Some(next.map(|mut text| {
            if text.ends_with('\r') {
                text.pop();
            }
            (self.line, text)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn numbers_lines_and_strips_carriage_returns() {
        let lines: Vec<(usize, String)> = NumberedLines::new(Cursor::new("a\r\nb\n"))
            .collect::<std::io::Result<_>>()
            .unwrap();
        assert_eq!(lines, vec![(1, "a".to_string()), (2, "b".to_string())]);
    }
}
