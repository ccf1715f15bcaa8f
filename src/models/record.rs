use std::collections::BTreeMap;

use super::{Aspect, DbxrefKey, RelationshipType, SynonymKind};

/// One dialect-neutral unit produced by a parser or by the exporter.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Feature(FeatureRecord),
    Sequence(SequenceRecord),
    Association(AssociationRecord),
    Header(HeaderRecord),
}

impl Record {
    /// Line that started the record in its source file.
    pub fn line(&self) -> usize {
        match self {
            Self::Feature(record) => record.line,
            Self::Sequence(record) => record.line,
            Self::Association(record) => record.line,
            Self::Header(record) => record.line,
        }
    }
}

/// A located, typed feature with its attributes.
///
/// A feature with several locations yields one record per location, all
/// sharing the same `uniquename`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureRecord {
    pub line: usize,
    pub uniquename: String,
    pub name: Option<String>,
    pub feature_type: String,
    pub source: Option<String>,
    /// Raw score text, kept verbatim.
    pub score: Option<String>,
    pub location: Option<Location>,
    pub parents: Vec<ParentRef>,
    pub properties: Vec<PropertyRecord>,
    pub dbxrefs: Vec<DbxrefKey>,
    pub ontology_terms: Vec<DbxrefKey>,
    pub synonyms: Vec<SynonymRecord>,
    /// Publication uniquenames from `literature`.
    pub publications: Vec<String>,
    pub is_obsolete: bool,
}

/// Interbase coordinates on a source feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub srcfeature: String,
    pub fmin: i64,
    pub fmax: i64,
    /// `Some(0)` is a strand known to be unknown.
    pub strand: Option<i8>,
    pub phase: Option<u8>,
}

impl Location {
    pub fn span(&self) -> i64 {
        self.fmax - self.fmin
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    pub relationship: RelationshipType,
    pub uniquename: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynonymRecord {
    pub kind: SynonymKind,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyRecord {
    pub key: String,
    pub value: String,
    pub rank: u32,
}

impl FeatureRecord {
    /// Properties grouped by key with values in rank order.
    pub fn properties_by_key(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut sorted: Vec<&PropertyRecord> = self.properties.iter().collect();
        sorted.sort_by_key(|p| p.rank);
        let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for property in sorted {
            grouped
                .entry(property.key.as_str())
                .or_default()
                .push(property.value.as_str());
        }
        grouped
    }
}

/// Residues for one feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRecord {
    pub line: usize,
    pub uniquename: String,
    pub description: Option<String>,
    pub residues: String,
}

impl SequenceRecord {
    /// Feature type named by a `sequence_type=` or `SO=` token.
    pub fn declared_type(&self) -> Option<String> {
        self.description_value(&["sequence_type", "SO"])
    }

    /// Residue count named by a `length=` token.
    pub fn declared_length(&self) -> Option<&str> {
        let description = self.description.as_deref()?;
        description_tokens(description).find_map(|(key, value)| (key == "length").then_some(value))
    }

    fn description_value(&self, keys: &[&str]) -> Option<String> {
        let description = self.description.as_deref()?;
        description_tokens(description)
            .find(|(key, _)| keys.contains(key))
            .map(|(_, value)| {
                urlencoding::decode(value)
                    .map(|decoded| decoded.into_owned())
                    .unwrap_or_else(|_| value.to_string())
            })
    }
}

fn description_tokens(description: &str) -> impl Iterator<Item = (&str, &str)> {
    description
        .split(|c: char| c == '|' || c.is_whitespace())
        .filter_map(|token| token.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim()))
}

/// File-level header lines an export writes back verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderKind {
    /// `##` directives of GFF3 other than the version and `##FASTA`.
    GffDirective,
    /// `!` lines of GAF other than the version.
    GafComment,
}

impl HeaderKind {
    /// Organism property type the lines are stored under.
    pub fn property(&self) -> &'static str {
        match self {
            Self::GffDirective => "gff_directive",
            Self::GafComment => "gaf_header",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRecord {
    pub line: usize,
    pub kind: HeaderKind,
    /// The line as written.
    pub text: String,
}

/// One GAF line: a feature annotated with an ontology term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationRecord {
    pub line: usize,
    pub db: String,
    pub object_id: String,
    pub symbol: String,
    pub is_not: bool,
    /// Qualifiers other than `NOT`, in file order.
    pub qualifiers: Vec<String>,
    pub term: DbxrefKey,
    pub references: Vec<String>,
    pub evidence: String,
    pub with_from: Vec<String>,
    pub aspect: Aspect,
    pub object_name: Option<String>,
    pub synonyms: Vec<String>,
    pub object_type: String,
    pub taxon: String,
    /// `YYYYMMDD`, validated on parse.
    pub date: String,
    pub assigned_by: String,
    pub annotation_extension: Option<String>,
    pub gene_product_form_id: Option<String>,
}
