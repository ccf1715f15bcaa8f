//! GFF3 reading and writing.
//!
//! Reserved attributes map onto dedicated fields of [`FeatureRecord`]:
//!
//! | attribute       | field                         |
//! |-----------------|-------------------------------|
//! | `ID`            | `uniquename`                  |
//! | `Name`          | `name`                        |
//! | `Parent`        | `parents` (`part_of`)         |
//! | `Derives_from`  | `parents` (`derives_from`)    |
//! | `Dbxref`        | `dbxrefs`                     |
//! | `Ontology_term` | `ontology_terms`              |
//! | `Alias`, `synonym`, `previous_systematic_id` | `synonyms` |
//! | `literature`    | `publications`                |
//! | `is_obsolete`   | `is_obsolete`                 |
//!
//! Every other attribute becomes a property ranked by value position.
//! Directives other than the version come out as [`HeaderRecord`]s; `#`
//! comments and `###` are dropped. A `##FASTA` directive hands the rest of
//! the stream to the FASTA reader.

use std::borrow::Cow;
use std::io::{self, BufRead, Write};

use indexmap::IndexMap;

use crate::error::{ChadoError, Result};
use crate::formats::fasta::{self, FastaReader};
use crate::formats::{Dialect, NumberedLines};
use crate::models::*;

pub const VERSION_DIRECTIVE: &str = "##gff-version 3";
const FASTA_DIRECTIVE: &str = "##FASTA";
const RESOLUTION_DIRECTIVE: &str = "###";

/// Attributes written first, in this order.
const CANONICAL_ORDER: &[&str] = &[
    "ID",
    "Name",
    "Alias",
    "Parent",
    "Target",
    "Gap",
    "Derives_from",
    "Note",
    "Dbxref",
    "Ontology_term",
    "Is_circular",
];

const OBSOLETE_ATTRIBUTE: &str = "is_obsolete";

/// Property keys owned by columns or by the FASTA section.
const COLUMN_PROPERTIES: &[&str] = &[
    SOURCE_PROPERTY,
    SCORE_PROPERTY,
    SEQUENCE_DESCRIPTION_PROPERTY,
];

const ATTRIBUTE_RESERVED: &[char] = &[';', '=', '&', ',', '%'];
const COLUMN_RESERVED: &[char] = &['%'];

enum State<R> {
    Features(NumberedLines<R>),
    Sequences(FastaReader<R>),
    Done,
}

pub struct GffReader<R> {
    state: State<R>,
}

impl<R: BufRead> GffReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            state: State::Features(NumberedLines::new(input)),
        }
    }

    fn start_sequences(&mut self) {
        if let State::Features(lines) = std::mem::replace(&mut self.state, State::Done) {
            self.state = State::Sequences(FastaReader::from_lines(lines));
        }
    }

    fn fail(&mut self, err: ChadoError) -> Option<Result<Record>> {
        self.state = State::Done;
        Some(Err(err))
    }
}

impl<R: BufRead> Iterator for GffReader<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let next = match &mut self.state {
                State::Done => return None,
                State::Sequences(reader) => match reader.next() {
                    Some(Ok(sequence)) => return Some(Ok(Record::Sequence(sequence))),
                    Some(Err(err)) => return self.fail(err),
                    None => {
                        self.state = State::Done;
                        return None;
                    }
                },
                State::Features(lines) => lines.next(),
            };

            let (line, text) = match next {
                Some(Ok(numbered)) => numbered,
                Some(Err(err)) => return self.fail(err.into()),
                None => {
                    self.state = State::Done;
                    return None;
                }
            };

            if text.trim().is_empty() {
                continue;
            }
            if text.starts_with(FASTA_DIRECTIVE) {
                self.start_sequences();
                continue;
            }
            if let Some(version) = text.strip_prefix("##gff-version") {
                if !version.trim().starts_with('3') {
                    return self.fail(syntax(
                        line,
                        format!("unsupported version '{}'", version.trim()),
                    ));
                }
                continue;
            }
            if text.starts_with("##") && text.trim_end() != RESOLUTION_DIRECTIVE {
                return Some(Ok(Record::Header(HeaderRecord {
                    line,
                    kind: HeaderKind::GffDirective,
                    text,
                })));
            }
            if text.starts_with('#') {
                continue;
            }

            return match parse_line(line, &text) {
                Ok(record) => Some(Ok(Record::Feature(record))),
                Err(err) => self.fail(err),
            };
        }
    }
}

fn syntax(line: usize, message: impl Into<String>) -> ChadoError {
    ChadoError::syntax(Dialect::Gff, line, message)
}

/// Parses one tab-separated feature line.
pub fn parse_line(line: usize, text: &str) -> Result<FeatureRecord> {
    let columns: Vec<&str> = text.split('\t').collect();
    if columns.len() != 9 {
        return Err(syntax(
            line,
            format!("expected 9 tab-separated columns, found {}", columns.len()),
        ));
    }

    let seqid = unescape(line, columns[0])?;
    let source = match columns[1] {
        "." => None,
        value => Some(unescape(line, value)?),
    };
    let feature_type = match columns[2] {
        "." | "" => return Err(syntax(line, "missing feature type")),
        value => unescape(line, value)?,
    };

    let start = parse_coordinate(line, "start", columns[3])?;
    let end = parse_coordinate(line, "end", columns[4])?;
    if start < 1 {
        return Err(syntax(line, format!("start {start} is before 1")));
    }
    if start > end {
        return Err(syntax(line, format!("start {start} is after end {end}")));
    }

    let score = match columns[5] {
        "." => None,
        value if value.parse::<f64>().is_ok() => Some(value.to_string()),
        value => return Err(syntax(line, format!("invalid score '{value}'"))),
    };
    let strand = match columns[6] {
        "+" => Some(1),
        "-" => Some(-1),
        "?" => Some(0),
        "." => None,
        value => return Err(syntax(line, format!("invalid strand '{value}'"))),
    };
    let phase = match columns[7] {
        "." => None,
        "0" => Some(0),
        "1" => Some(1),
        "2" => Some(2),
        value => return Err(syntax(line, format!("invalid phase '{value}'"))),
    };

    let mut record = FeatureRecord {
        line,
        feature_type,
        source,
        score,
        location: Some(Location {
            srcfeature: seqid,
            fmin: start - 1,
            fmax: end,
            strand,
            phase,
        }),
        ..FeatureRecord::default()
    };
    apply_attributes(&mut record, parse_attributes(line, columns[8])?)?;
    Ok(record)
}

fn parse_coordinate(line: usize, column: &str, value: &str) -> Result<i64> {
    value
        .parse()
        .map_err(|_| syntax(line, format!("invalid {column} '{value}'")))
}

fn parse_attributes(line: usize, column: &str) -> Result<IndexMap<String, Vec<String>>> {
    let mut attributes: IndexMap<String, Vec<String>> = IndexMap::new();
    if column == "." {
        return Ok(attributes);
    }
    for pair in column.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((key, values)) = pair.split_once('=') else {
            return Err(syntax(line, format!("attribute '{pair}' has no value")));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(syntax(line, format!("attribute '{pair}' has no key")));
        }
        let entry = attributes.entry(key.to_string()).or_default();
        for value in values.split(',') {
            if value.is_empty() {
                return Err(syntax(line, format!("attribute '{key}' has an empty value")));
            }
            entry.push(unescape(line, value)?);
        }
    }
    Ok(attributes)
}

fn single(line: usize, key: &str, mut values: Vec<String>) -> Result<String> {
    if values.len() != 1 {
        return Err(syntax(line, format!("attribute '{key}' takes exactly one value")));
    }
    Ok(values.remove(0))
}

fn apply_attributes(
    record: &mut FeatureRecord,
    attributes: IndexMap<String, Vec<String>>,
) -> Result<()> {
    let line = record.line;
    for (key, values) in attributes {
        match key.as_str() {
            "ID" => record.uniquename = single(line, &key, values)?,
            "Name" => record.name = Some(single(line, &key, values)?),
            "Parent" | "Derives_from" => {
                let relationship = if key == "Parent" {
                    RelationshipType::PartOf
                } else {
                    RelationshipType::DerivesFrom
                };
                record
                    .parents
                    .extend(values.into_iter().map(|uniquename| ParentRef {
                        relationship,
                        uniquename,
                    }));
            }
            "Dbxref" | "Ontology_term" => {
                let keys = values
                    .iter()
                    .map(|value| {
                        DbxrefKey::parse(value).ok_or_else(|| {
                            syntax(line, format!("{key} '{value}' is not DB:ACCESSION"))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                if key == "Dbxref" {
                    record.dbxrefs.extend(keys);
                } else {
                    record.ontology_terms.extend(keys);
                }
            }
            LITERATURE_ATTRIBUTE => record.publications.extend(values),
            OBSOLETE_ATTRIBUTE => {
                record.is_obsolete = match single(line, &key, values)?.as_str() {
                    "true" => true,
                    "false" => false,
                    other => {
                        return Err(syntax(line, format!("invalid is_obsolete '{other}'")))
                    }
                }
            }
            reserved if COLUMN_PROPERTIES.contains(&reserved) => {
                return Err(syntax(
                    line,
                    format!("attribute '{reserved}' collides with a column property"),
                ));
            }
            _ => match SynonymKind::from_gff_attribute(&key) {
                Some(kind) => record
                    .synonyms
                    .extend(values.into_iter().map(|name| SynonymRecord { kind, name })),
                None => {
                    for (rank, value) in values.into_iter().enumerate() {
                        record.properties.push(PropertyRecord {
                            key: key.clone(),
                            value,
                            rank: rank as u32,
                        });
                    }
                }
            },
        }
    }
    if record.uniquename.is_empty() {
        return Err(syntax(line, "record has no ID attribute"));
    }
    Ok(())
}

fn unescape(line: usize, value: &str) -> Result<String> {
    urlencoding::decode(value)
        .map(Cow::into_owned)
        .map_err(|_| syntax(line, format!("'{value}' is not valid percent-encoded UTF-8")))
}

fn escape<'a>(value: &'a str, reserved: &[char]) -> Cow<'a, str> {
    let needs_escape = |c: char| c.is_control() || reserved.contains(&c);
    if !value.chars().any(needs_escape) {
        return Cow::Borrowed(value);
    }
    let mut escaped = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        if needs_escape(c) {
            let mut buffer = [0u8; 4];
            for byte in c.encode_utf8(&mut buffer).bytes() {
                escaped.push_str(&format!("%{byte:02X}"));
            }
        } else {
            escaped.push(c);
        }
    }
    Cow::Owned(escaped)
}

// ============================================================
// Writing
// ============================================================

/// Everything one GFF3 file holds for an export.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GffDocument {
    /// Directive lines written after the version.
    pub directives: Vec<String>,
    pub features: Vec<FeatureRecord>,
    pub sequences: Vec<SequenceRecord>,
}

pub fn write_document<W: Write>(out: &mut W, document: &GffDocument, width: usize) -> io::Result<()> {
    writeln!(out, "{VERSION_DIRECTIVE}")?;
    for directive in &document.directives {
        writeln!(out, "{directive}")?;
    }
    for record in &document.features {
        write_feature(out, record)?;
    }
    if !document.sequences.is_empty() {
        writeln!(out, "{FASTA_DIRECTIVE}")?;
        fasta::write_records(out, &document.sequences, width)?;
    }
    Ok(())
}

/// Writes one feature line. Records without a location have no GFF3 form
/// and are left out.
pub fn write_feature<W: Write>(out: &mut W, record: &FeatureRecord) -> io::Result<()> {
    let Some(location) = &record.location else {
        return Ok(());
    };
    let strand = match location.strand {
        Some(1) => "+",
        Some(-1) => "-",
        Some(_) => "?",
        None => ".",
    };
    let phase = location
        .phase
        .map(|p| p.to_string())
        .unwrap_or_else(|| ".".into());
    writeln!(
        out,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        escape(&location.srcfeature, COLUMN_RESERVED),
        record
            .source
            .as_deref()
            .map(|s| escape(s, COLUMN_RESERVED))
            .unwrap_or(Cow::Borrowed(".")),
        escape(&record.feature_type, COLUMN_RESERVED),
        location.fmin + 1,
        location.fmax,
        record.score.as_deref().unwrap_or("."),
        strand,
        phase,
        format_attributes(record),
    )
}

/// Column 9 in canonical attribute order.
pub fn format_attributes(record: &FeatureRecord) -> String {
    let mut attributes: Vec<(&str, Vec<String>)> = vec![("ID", vec![record.uniquename.clone()])];

    if let Some(name) = &record.name {
        attributes.push(("Name", vec![name.clone()]));
    }
    for relationship in [RelationshipType::PartOf, RelationshipType::DerivesFrom] {
        let Some(key) = relationship.gff_attribute() else {
            continue;
        };
        let mut parents: Vec<String> = record
            .parents
            .iter()
            .filter(|p| p.relationship == relationship)
            .map(|p| p.uniquename.clone())
            .collect();
        if !parents.is_empty() {
            parents.sort();
            attributes.push((key, parents));
        }
    }
    for kind in SynonymKind::ALL {
        let names: Vec<String> = record
            .synonyms
            .iter()
            .filter(|synonym| synonym.kind == kind)
            .map(|synonym| synonym.name.clone())
            .collect();
        if !names.is_empty() {
            attributes.push((kind.gff_attribute(), names));
        }
    }
    if !record.publications.is_empty() {
        attributes.push((LITERATURE_ATTRIBUTE, record.publications.clone()));
    }
    if !record.dbxrefs.is_empty() {
        attributes.push(("Dbxref", record.dbxrefs.iter().map(|k| k.to_string()).collect()));
    }
    if !record.ontology_terms.is_empty() {
        attributes.push((
            "Ontology_term",
            record.ontology_terms.iter().map(|k| k.to_string()).collect(),
        ));
    }
    for (key, values) in record.properties_by_key() {
        if COLUMN_PROPERTIES.contains(&key) {
            continue;
        }
        attributes.push((key, values.into_iter().map(str::to_string).collect()));
    }
    if record.is_obsolete {
        attributes.push((OBSOLETE_ATTRIBUTE, vec!["true".into()]));
    }

    attributes.sort_by(|(a, _), (b, _)| attribute_position(a).cmp(&attribute_position(b)));

    if attributes.is_empty() {
        return ".".into();
    }
    attributes
        .iter()
        .map(|(key, values)| {
            let values: Vec<Cow<str>> = values
                .iter()
                .map(|v| escape(v, ATTRIBUTE_RESERVED))
                .collect();
            format!("{key}={}", values.join(","))
        })
        .collect::<Vec<_>>()
        .join(";")
}

fn attribute_position(key: &str) -> (usize, &str) {
    if key == OBSOLETE_ATTRIBUTE {
        return (CANONICAL_ORDER.len() + 1, key);
    }
    match CANONICAL_ORDER.iter().position(|k| *k == key) {
        Some(position) => (position, ""),
        None => (CANONICAL_ORDER.len(), key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn read(input: &str) -> Vec<Result<Record>> {
        GffReader::new(Cursor::new(input.to_string())).collect()
    }

    fn feature(text: &str) -> FeatureRecord {
        parse_line(7, text).unwrap()
    }

    #[test]
    fn parses_a_feature_line() {
        let record = feature(
            "chr1\tchado\tmRNA\t10\t90\t0.5\t-\t.\tID=gene1.1;Parent=gene1;Note=first,second",
        );

        assert_eq!(record.uniquename, "gene1.1");
        assert_eq!(record.feature_type, "mRNA");
        assert_eq!(record.source.as_deref(), Some("chado"));
        assert_eq!(record.score.as_deref(), Some("0.5"));
        assert_eq!(
            record.location,
            Some(Location {
                srcfeature: "chr1".into(),
                fmin: 9,
                fmax: 90,
                strand: Some(-1),
                phase: None,
            })
        );
        assert_eq!(
            record.parents,
            vec![ParentRef {
                relationship: RelationshipType::PartOf,
                uniquename: "gene1".into(),
            }]
        );
        assert_eq!(record.properties.len(), 2);
        assert_eq!(record.properties[1].value, "second");
        assert_eq!(record.properties[1].rank, 1);
    }

    #[test]
    fn decodes_escaped_values() {
        let record = feature("chr1\t.\tgene\t1\t9\t.\t+\t.\tID=g1;description=kinase%2C putative%3B x");
        assert_eq!(record.properties[0].value, "kinase, putative; x");
    }

    #[test]
    fn reads_cross_references() {
        let record = feature(
            "chr1\t.\tgene\t1\t9\t.\t+\t.\tID=g1;Dbxref=UniProtKB:Q8I1Y2;Ontology_term=GO:0005515,GO:0016301",
        );
        assert_eq!(record.dbxrefs, vec![DbxrefKey::new("UniProtKB", "Q8I1Y2")]);
        assert_eq!(record.ontology_terms.len(), 2);
    }

    #[test]
    fn reports_column_errors_with_line() {
        let err = parse_line(3, "chr1\t.\tgene\t1\t9\t.\t+\tID=g1").unwrap_err();
        assert_eq!(
            err.to_string(),
            "malformed GFF3 record at line 3: expected 9 tab-separated columns, found 8"
        );

        let err = parse_line(4, "chr1\t.\tgene\t20\t9\t.\t+\t.\tID=g1").unwrap_err();
        assert_eq!(err.line(), Some(4));

        assert!(parse_line(5, "chr1\t.\tgene\t1\t9\t.\tx\t.\tID=g1").is_err());
        assert!(parse_line(6, "chr1\t.\tgene\t1\t9\t.\t+\t3\tID=g1").is_err());
    }

    #[test]
    fn requires_an_id() {
        assert!(parse_line(1, "chr1\t.\tgene\t1\t9\t.\t+\t.\tName=x").is_err());
    }

    #[test]
    fn rejects_attributes_owned_by_columns() {
        assert!(parse_line(1, "chr1\t.\tgene\t1\t9\t.\t+\t.\tID=g1;score=4").is_err());
    }

    #[test]
    fn switches_to_sequences_after_fasta_directive() {
        let records = read(
            "##gff-version 3\nchr1\t.\tchromosome\t1\t8\t.\t.\t.\tID=chr1\n##FASTA\n>chr1\nACGT\nACGT\n",
        );
        let records: Vec<Record> = records.into_iter().map(|r| r.unwrap()).collect();

        assert_eq!(records.len(), 2);
        assert!(matches!(&records[0], Record::Feature(f) if f.line == 2));
        match &records[1] {
            Record::Sequence(sequence) => {
                assert_eq!(sequence.residues, "ACGTACGT");
                assert_eq!(sequence.line, 4);
            }
            other => panic!("expected a sequence, got {other:?}"),
        }
    }

    #[test]
    fn keeps_directives_and_drops_comments() {
        let records = read(
            "##gff-version 3\n##sequence-region chr1 1 8\n# a comment\n###\nchr1\t.\tchromosome\t1\t8\t.\t.\t.\tID=chr1\n",
        );
        let records: Vec<Record> = records.into_iter().map(|r| r.unwrap()).collect();

        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0],
            Record::Header(HeaderRecord {
                line: 2,
                kind: HeaderKind::GffDirective,
                text: "##sequence-region chr1 1 8".into(),
            })
        );
        assert!(matches!(&records[1], Record::Feature(f) if f.line == 5));
    }

    #[test]
    fn reads_synonyms_and_literature() {
        let record = feature(
            "chr1\t.\tgene\t1\t9\t.\t+\t.\tID=g1;Alias=VAR1,PfEMP1;previous_systematic_id=PFA0005w;literature=PMID:1234",
        );
        assert_eq!(
            record.synonyms,
            vec![
                SynonymRecord { kind: SynonymKind::Alias, name: "VAR1".into() },
                SynonymRecord { kind: SynonymKind::Alias, name: "PfEMP1".into() },
                SynonymRecord { kind: SynonymKind::PreviousSystematicId, name: "PFA0005w".into() },
            ]
        );
        assert_eq!(record.publications, vec!["PMID:1234"]);
        assert!(record.properties.is_empty());
        assert_eq!(
            format_attributes(&record),
            "ID=g1;Alias=VAR1,PfEMP1;literature=PMID:1234;previous_systematic_id=PFA0005w"
        );
    }

    #[test]
    fn rejects_other_versions() {
        let records = read("##gff-version 2\n");
        assert!(records[0].is_err());
    }

    #[test]
    fn stops_after_the_first_malformed_line() {
        let records = read("chr1\t.\tgene\n chr1\t.\tgene\t1\t9\t.\t+\t.\tID=g1\n");
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn writes_attributes_in_canonical_order() {
        let record = FeatureRecord {
            line: 0,
            uniquename: "gene1".into(),
            name: Some("PF3D7_0100100".into()),
            feature_type: "gene".into(),
            location: Some(Location {
                srcfeature: "chr1".into(),
                fmin: 9,
                fmax: 90,
                strand: Some(1),
                phase: None,
            }),
            properties: vec![
                PropertyRecord { key: "description".into(), value: "kinase, putative".into(), rank: 0 },
                PropertyRecord { key: "Note".into(), value: "b".into(), rank: 1 },
                PropertyRecord { key: "Note".into(), value: "a".into(), rank: 0 },
                PropertyRecord { key: "source".into(), value: "chado".into(), rank: 0 },
            ],
            source: Some("chado".into()),
            ontology_terms: vec![DbxrefKey::new("GO", "0005515")],
            is_obsolete: true,
            ..FeatureRecord::default()
        };

        let mut out = Vec::new();
        write_feature(&mut out, &record).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "chr1\tchado\tgene\t10\t90\t.\t+\t.\tID=gene1;Name=PF3D7_0100100;Note=a,b;\
             Ontology_term=GO:0005515;description=kinase%2C putative;is_obsolete=true\n"
        );
    }

    #[test]
    fn sorts_parents_by_uniquename() {
        let record = FeatureRecord {
            uniquename: "exon1".into(),
            parents: vec![
                ParentRef { relationship: RelationshipType::PartOf, uniquename: "tx2".into() },
                ParentRef { relationship: RelationshipType::PartOf, uniquename: "tx1".into() },
            ],
            ..FeatureRecord::default()
        };
        assert_eq!(format_attributes(&record), "ID=exon1;Parent=tx1,tx2");
    }

    #[test]
    fn escaping_round_trips() {
        let value = "a;b=c&d,e%f\tg";
        let escaped = escape(value, ATTRIBUTE_RESERVED);
        assert_eq!(escaped, "a%3Bb%3Dc%26d%2Ce%25f%09g");
        assert_eq!(unescape(1, &escaped).unwrap(), value);
    }
}
