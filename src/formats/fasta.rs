use std::io::{self, BufRead, Write};

use crate::error::{ChadoError, Result};
use crate::formats::{Dialect, NumberedLines};
use crate::models::SequenceRecord;

/// Streams `>id description` entries one at a time.
pub struct FastaReader<R> {
    lines: NumberedLines<R>,
    pending: Option<(usize, String)>,
    done: bool,
}

impl<R: BufRead> FastaReader<R> {
    pub fn new(input: R) -> Self {
        Self::from_lines(NumberedLines::new(input))
    }

    /// Continues on lines already partly consumed, as after `##FASTA`.
    pub(crate) fn from_lines(lines: NumberedLines<R>) -> Self {
        Self {
            lines,
            pending: None,
            done: false,
        }
    }

    fn next_header(&mut self) -> Option<Result<(usize, String)>> {
        if let Some(pending) = self.pending.take() {
            return Some(Ok(pending));
        }
        for next in self.lines.by_ref() {
            let (line, text) = match next {
                Ok(numbered) => numbered,
                Err(err) => return Some(Err(err.into())),
            };
            if text.trim().is_empty() {
                continue;
            }
            if text.starts_with('>') {
                return Some(Ok((line, text)));
            }
            return Some(Err(syntax(line, "sequence data before the first header")));
        }
        None
    }

    fn read_entry(&mut self, line: usize, header: &str) -> Result<SequenceRecord> {
        let header = header[1..].trim();
        let (uniquename, description) = match header.split_once(char::is_whitespace) {
            Some((id, rest)) => (id, Some(rest.trim()).filter(|d| !d.is_empty())),
            None => (header, None),
        };
        if uniquename.is_empty() {
            return Err(syntax(line, "header has no identifier"));
        }

        let mut residues = String::new();
        while let Some(next) = self.lines.next() {
            let (number, text) = next?;
            if text.starts_with('>') {
                self.pending = Some((number, text));
                break;
            }
            let chunk = text.trim();
            if let Some(bad) = chunk
                .chars()
                .find(|c| !(c.is_ascii_alphabetic() || *c == '*' || *c == '-'))
            {
                return Err(syntax(number, format!("invalid residue {bad:?}")));
            }
            residues.push_str(chunk);
        }

        if residues.is_empty() {
            return Err(syntax(line, format!("sequence {uniquename} has no residues")));
        }

        let record = SequenceRecord {
            line,
            uniquename: uniquename.to_string(),
            description: description.map(str::to_string),
            residues,
        };

        if let Some(declared) = record.declared_length() {
            let declared: usize = declared
                .parse()
                .map_err(|_| syntax(line, format!("invalid length '{declared}'")))?;
            if declared != record.residues.len() {
                return Err(syntax(
                    line,
                    format!(
                        "declared length {declared} but found {} residues",
                        record.residues.len()
                    ),
                ));
            }
        }

        Ok(record)
    }
}

impl<R: BufRead> Iterator for FastaReader<R> {
    type Item = Result<SequenceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let header = match self.next_header() {
            Some(Ok(header)) => header,
            Some(Err(err)) => {
                self.done = true;
                return Some(Err(err));
            }
            None => {
                self.done = true;
                return None;
            }
        };
        let entry = self.read_entry(header.0, &header.1);
        if entry.is_err() {
            self.done = true;
        }
        Some(entry)
    }
}

fn syntax(line: usize, message: impl Into<String>) -> ChadoError {
    ChadoError::syntax(Dialect::Fasta, line, message)
}

/// Writes one entry with residues wrapped at `width` (0 disables wrapping).
pub fn write_record<W: Write>(out: &mut W, record: &SequenceRecord, width: usize) -> io::Result<()> {
    match &record.description {
        Some(description) => writeln!(out, ">{} {}", record.uniquename, description)?,
        None => writeln!(out, ">{}", record.uniquename)?,
    }
    let residues = record.residues.as_bytes();
    if width == 0 {
        out.write_all(residues)?;
        return out.write_all(b"\n");
    }
    for chunk in residues.chunks(width) {
        out.write_all(chunk)?;
        out.write_all(b"\n")?;
    }
    Ok(())
}

pub fn write_records<'a, W, I>(out: &mut W, records: I, width: usize) -> io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a SequenceRecord>,
{
    for record in records {
        write_record(out, record, width)?;
    }
    Ok(())
}
