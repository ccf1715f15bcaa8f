use std::collections::BTreeMap;

use serde::Serialize;
use uuid::Uuid;

/// Tables written by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Organism,
    Feature,
    Featureloc,
    FeatureRelationship,
    Featureprop,
    FeatureDbxref,
    FeatureCvterm,
    FeatureCvtermprop,
    Synonym,
    FeatureSynonym,
    Pub,
    FeaturePub,
    Organismprop,
}

impl Table {
    pub const ALL: [Table; 13] = [
        Self::Organism,
        Self::Feature,
        Self::Featureloc,
        Self::FeatureRelationship,
        Self::Featureprop,
        Self::FeatureDbxref,
        Self::FeatureCvterm,
        Self::FeatureCvtermprop,
        Self::Synonym,
        Self::FeatureSynonym,
        Self::Pub,
        Self::FeaturePub,
        Self::Organismprop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Organism => "organism",
            Self::Feature => "feature",
            Self::Featureloc => "featureloc",
            Self::FeatureRelationship => "feature_relationship",
            Self::Featureprop => "featureprop",
            Self::FeatureDbxref => "feature_dbxref",
            Self::FeatureCvterm => "feature_cvterm",
            Self::FeatureCvtermprop => "feature_cvtermprop",
            Self::Synonym => "synonym",
            Self::FeatureSynonym => "feature_synonym",
            Self::Pub => "pub",
            Self::FeaturePub => "feature_pub",
            Self::Organismprop => "organismprop",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowCounts {
    pub created: u64,
    pub updated: u64,
    /// Rows of an updated feature that the new input no longer has.
    pub removed: u64,
}

/// Outcome of one committed import unit.
///
/// A row matched by its natural key counts as `updated` whether or not any
/// value changed.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub session: Uuid,
    pub organism: String,
    pub tables: BTreeMap<Table, RowCounts>,
    /// Terms and dbxrefs created by the resolver.
    pub vocabulary_created: u64,
    /// Values replaced by a later record for the same feature.
    pub superseded: u64,
}

impl LoadReport {
    pub fn new(session: Uuid, organism: impl Into<String>) -> Self {
        Self {
            session,
            organism: organism.into(),
            tables: BTreeMap::new(),
            vocabulary_created: 0,
            superseded: 0,
        }
    }

    pub fn created(&mut self, table: Table) {
        self.tables.entry(table).or_default().created += 1;
    }

    pub fn updated(&mut self, table: Table) {
        self.tables.entry(table).or_default().updated += 1;
    }

    pub fn removed(&mut self, table: Table, rows: usize) {
        if rows > 0 {
            self.tables.entry(table).or_default().removed += rows as u64;
        }
    }

    pub fn counts(&self, table: Table) -> RowCounts {
        self.tables.get(&table).copied().unwrap_or_default()
    }
}

/// Outcome of one export.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportSummary {
    pub records: u64,
    /// Features left out, such as sequences without residues.
    pub skipped: u64,
}
