use std::io::{self, BufRead, Write};

use chrono::NaiveDate;

use crate::error::{ChadoError, Result};
use crate::formats::{Dialect, NumberedLines};
use crate::models::{AssociationRecord, Aspect, DbxrefKey, HeaderKind, HeaderRecord, Record};

const NOT_QUALIFIER: &str = "NOT";
const VERSION_HEADER: &str = "gaf-version:";

/// Streams GO annotation lines as [`Record::Association`]s, and `!` lines
/// other than the version as [`Record::Header`]s.
pub struct GafReader<R> {
    lines: NumberedLines<R>,
    done: bool,
}

impl<R: BufRead> GafReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            lines: NumberedLines::new(input),
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for GafReader<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        while let Some(next) = self.lines.next() {
            let (line, text) = match next {
                Ok(numbered) => numbered,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err.into()));
                }
            };
            if text.trim().is_empty() {
                continue;
            }
            if let Some(comment) = text.strip_prefix('!') {
                let Some(version) = comment.trim().strip_prefix(VERSION_HEADER) else {
                    return Some(Ok(Record::Header(HeaderRecord {
                        line,
                        kind: HeaderKind::GafComment,
                        text,
                    })));
                };
                let version = version.trim();
                if !(version.starts_with('1') || version.starts_with('2')) {
                    self.done = true;
                    return Some(Err(syntax(line, format!("unsupported version '{version}'"))));
                }
                tracing::debug!(version, "Reading GAF");
                continue;
            }
            let parsed = parse_line(line, &text).map(Record::Association);
            if parsed.is_err() {
                self.done = true;
            }
            return Some(parsed);
        }
        self.done = true;
        None
    }
}

fn syntax(line: usize, message: impl Into<String>) -> ChadoError {
    ChadoError::syntax(Dialect::Gaf, line, message)
}

fn required<'a>(line: usize, columns: &[&'a str], index: usize, name: &str) -> Result<&'a str> {
    match columns[index].trim() {
        "" => Err(syntax(line, format!("column {} ({name}) is empty", index + 1))),
        value => Ok(value),
    }
}

fn optional(columns: &[&str], index: usize) -> Option<String> {
    columns
        .get(index)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn piped(value: &str) -> Vec<String> {
    value
        .split('|')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses one annotation line of 15 to 17 columns.
pub fn parse_line(line: usize, text: &str) -> Result<AssociationRecord> {
    let columns: Vec<&str> = text.split('\t').collect();
    if !(15..=17).contains(&columns.len()) {
        return Err(syntax(
            line,
            format!("expected 15 to 17 tab-separated columns, found {}", columns.len()),
        ));
    }

    let db = required(line, &columns, 0, "DB")?;
    let object_id = required(line, &columns, 1, "DB Object ID")?;
    let symbol = required(line, &columns, 2, "DB Object Symbol")?;

    let mut is_not = false;
    let mut qualifiers = Vec::new();
    for qualifier in piped(columns[3]) {
        if qualifier.eq_ignore_ascii_case(NOT_QUALIFIER) {
            is_not = true;
        } else {
            qualifiers.push(qualifier);
        }
    }

    let term_id = required(line, &columns, 4, "GO ID")?;
    let term = DbxrefKey::parse(term_id)
        .ok_or_else(|| syntax(line, format!("GO ID '{term_id}' is not DB:ACCESSION")))?;

    let references = piped(columns[5]);
    if references.is_empty() {
        return Err(syntax(line, "column 6 (DB:Reference) is empty"));
    }
    let evidence = required(line, &columns, 6, "Evidence Code")?;
    let aspect_code = required(line, &columns, 8, "Aspect")?;
    let aspect = Aspect::from_str(aspect_code)
        .ok_or_else(|| syntax(line, format!("invalid aspect '{aspect_code}'")))?;
    let object_type = required(line, &columns, 11, "DB Object Type")?;
    let taxon = required(line, &columns, 12, "Taxon")?;
    let date = required(line, &columns, 13, "Date")?;
    NaiveDate::parse_from_str(date, "%Y%m%d")
        .map_err(|_| syntax(line, format!("invalid date '{date}', expected YYYYMMDD")))?;
    let assigned_by = required(line, &columns, 14, "Assigned By")?;

    Ok(AssociationRecord {
        line,
        db: db.to_string(),
        object_id: object_id.to_string(),
        symbol: symbol.to_string(),
        is_not,
        qualifiers,
        term,
        references,
        evidence: evidence.to_string(),
        with_from: piped(columns[7]),
        aspect,
        object_name: optional(&columns, 9),
        synonyms: piped(columns[10]),
        object_type: object_type.to_string(),
        taxon: taxon.to_string(),
        date: date.to_string(),
        assigned_by: assigned_by.to_string(),
        annotation_extension: optional(&columns, 15),
        gene_product_form_id: optional(&columns, 16),
    })
}

pub fn write_header<W: Write>(out: &mut W, version: &str) -> io::Result<()> {
    writeln!(out, "!gaf-version: {version}")
}

/// Writes one line: 15 columns for GAF 1.0, 17 otherwise.
pub fn write_record<W: Write>(out: &mut W, record: &AssociationRecord, version: &str) -> io::Result<()> {
    let mut qualifiers = Vec::with_capacity(record.qualifiers.len() + 1);
    if record.is_not {
        qualifiers.push(NOT_QUALIFIER.to_string());
    }
    qualifiers.extend(record.qualifiers.iter().cloned());

    let mut columns = vec![
        record.db.clone(),
        record.object_id.clone(),
        record.symbol.clone(),
        qualifiers.join("|"),
        record.term.to_string(),
        record.references.join("|"),
        record.evidence.clone(),
        record.with_from.join("|"),
        record.aspect.as_str().to_string(),
        record.object_name.clone().unwrap_or_default(),
        record.synonyms.join("|"),
        record.object_type.clone(),
        record.taxon.clone(),
        record.date.clone(),
        record.assigned_by.clone(),
    ];
    if !version.starts_with('1') {
        columns.push(record.annotation_extension.clone().unwrap_or_default());
        columns.push(record.gene_product_form_id.clone().unwrap_or_default());
    }
    writeln!(out, "{}", columns.join("\t"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    const LINE: &str = "GeneDB\tPF3D7_0100100\tVAR\tNOT|colocalizes_with\tGO:0020002\tPMID:1234|GO_REF:0000002\tIDA\tUniProtKB:Q8I1Y2\tC\terythrocyte membrane protein 1\tPfEMP1|var1\tgene\ttaxon:36329\t20210311\tGeneDB\t\t";

    #[test]
    fn parses_an_annotation_line() {
        let record = parse_line(2, LINE).unwrap();

        assert_eq!(record.object_id, "PF3D7_0100100");
        assert!(record.is_not);
        assert_eq!(record.qualifiers, vec!["colocalizes_with"]);
        assert_eq!(record.term, DbxrefKey::new("GO", "0020002"));
        assert_eq!(record.references, vec!["PMID:1234", "GO_REF:0000002"]);
        assert_eq!(record.aspect, Aspect::Component);
        assert_eq!(record.object_name.as_deref(), Some("erythrocyte membrane protein 1"));
        assert_eq!(record.synonyms, vec!["PfEMP1", "var1"]);
        assert_eq!(record.annotation_extension, None);
    }

    #[test]
    fn writes_the_line_back() {
        let record = parse_line(2, LINE).unwrap();
        let mut out = Vec::new();
        write_record(&mut out, &record, "2.2").unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), format!("{LINE}\n"));
    }

    #[test]
    fn gaf_one_has_fifteen_columns() {
        let record = parse_line(2, LINE).unwrap();
        let mut out = Vec::new();
        write_record(&mut out, &record, "1.0").unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.trim_end_matches('\n').split('\t').count(), 15);
    }

    #[test]
    fn rejects_bad_aspect_and_date() {
        let bad_aspect = LINE.replace("\tC\t", "\tX\t");
        assert!(parse_line(1, &bad_aspect).is_err());

        let bad_date = LINE.replace("20210311", "2021-03-11");
        let err = parse_line(9, &bad_date).unwrap_err();
        assert_eq!(err.line(), Some(9));
    }

    #[test]
    fn rejects_short_lines() {
        assert!(parse_line(1, "GeneDB\tPF3D7_0100100\tVAR").is_err());
    }

    #[test]
    fn reader_keeps_header_comments() {
        let input = format!("!gaf-version: 2.2\n!generated-by: GeneDB\n{LINE}\n");
        let records: Vec<Record> = GafReader::new(Cursor::new(input))
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0],
            Record::Header(HeaderRecord {
                line: 2,
                kind: HeaderKind::GafComment,
                text: "!generated-by: GeneDB".into(),
            })
        );
        assert_eq!(records[1].line(), 3);
        assert!(matches!(&records[1], Record::Association(a) if a.object_id == "PF3D7_0100100"));
    }

    #[test]
    fn reader_rejects_unknown_versions() {
        let input = format!("!gaf-version: 3.0\n{LINE}\n");
        let mut reader = GafReader::new(Cursor::new(input));
        let err = reader.next().unwrap().unwrap_err();
        assert_eq!(err.line(), Some(1));
        assert!(reader.next().is_none());
    }
}
