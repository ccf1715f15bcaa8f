//! Exporter.
//!
//! Reads stored features back into dialect records. Output order is
//! organism abbreviation, then uniquename, then rank, so two exports of the
//! same store are byte-identical. Header lines kept from imports are
//! written back once each, in organism order.

use std::collections::BTreeMap;

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{ChadoError, ReferenceKey, Result};
use crate::formats::gff::GffDocument;
use crate::models::*;

/// Assigning database written for associations stored without one.
const DEFAULT_GAF_DB: &str = "GeneDB";

/// Properties rendered as GFF3 columns or FASTA headers, never as attributes.
const COLUMN_PROPERTIES: [&str; 3] = [SOURCE_PROPERTY, SCORE_PROPERTY, SEQUENCE_DESCRIPTION_PROPERTY];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganismSelector {
    One(String),
    All,
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub organism: OrganismSelector,
    pub include_obsolete: bool,
    /// FASTA only: export every feature of this type.
    pub sequence_type: Option<String>,
}

impl ExportOptions {
    pub fn organism(abbreviation: impl Into<String>) -> Self {
        Self {
            organism: OrganismSelector::One(abbreviation.into()),
            include_obsolete: false,
            sequence_type: None,
        }
    }

    pub fn all() -> Self {
        Self {
            organism: OrganismSelector::All,
            include_obsolete: false,
            sequence_type: None,
        }
    }
}

/// A stored feature as selected for export.
#[derive(Debug, Clone)]
struct StoredFeature {
    id: FeatureId,
    uniquename: String,
    name: Option<String>,
    type_name: String,
    residues: Option<String>,
    is_obsolete: bool,
}

pub struct Exporter<'c> {
    conn: &'c Connection,
    summary: ExportSummary,
}

impl<'c> Exporter<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            summary: ExportSummary::default(),
        }
    }

    pub fn summary(&self) -> &ExportSummary {
        &self.summary
    }

    /// Organisms matching `selector`, by abbreviation.
    pub fn organisms(&self, selector: &OrganismSelector) -> Result<Vec<Organism>> {
        let map_row = |row: &rusqlite::Row<'_>| {
            Ok(Organism {
                id: row.get(0)?,
                abbreviation: row.get(1)?,
                genus: row.get(2)?,
                species: row.get(3)?,
                infraspecific_name: row.get(4)?,
            })
        };
        match selector {
            OrganismSelector::One(abbreviation) => {
                let organism = self
                    .conn
                    .query_row(
                        "SELECT organism_id, abbreviation, genus, species, infraspecific_name
                         FROM organism WHERE abbreviation = ?",
                        [abbreviation],
                        map_row,
                    )
                    .optional()?;
                match organism {
                    Some(organism) => Ok(vec![organism]),
                    None => Err(ChadoError::ReferenceNotFound {
                        line: None,
                        key: ReferenceKey::Organism(abbreviation.clone()),
                    }),
                }
            }
            OrganismSelector::All => {
                let mut stmt = self.conn.prepare(
                    "SELECT organism_id, abbreviation, genus, species, infraspecific_name
                     FROM organism ORDER BY abbreviation",
                )?;
                let organisms = stmt
                    .query_map([], map_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(organisms)
            }
        }
    }

    fn features(&self, organism: OrganismId, include_obsolete: bool) -> Result<Vec<StoredFeature>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT feature.feature_id, feature.uniquename, feature.name, cvterm.name,
                    feature.residues, feature.is_obsolete
             FROM feature
             JOIN cvterm ON cvterm.cvterm_id = feature.type_id
             WHERE feature.organism_id = ?1 AND (?2 = 1 OR feature.is_obsolete = 0)
             ORDER BY feature.uniquename",
        )?;
        let features = stmt
            .query_map((organism, include_obsolete), |row| {
                Ok(StoredFeature {
                    id: row.get(0)?,
                    uniquename: row.get(1)?,
                    name: row.get(2)?,
                    type_name: row.get(3)?,
                    residues: row.get(4)?,
                    is_obsolete: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(features)
    }

    // ============================================================
    // GFF3
    // ============================================================

    /// Feature lines of every located feature plus the residues for the
    /// `##FASTA` section.
    pub fn gff_document(&mut self, options: &ExportOptions) -> Result<GffDocument> {
        let organisms = self.organisms(&options.organism)?;
        let mut document = GffDocument {
            directives: self.header_lines(&organisms, HeaderKind::GffDirective)?,
            ..GffDocument::default()
        };
        for organism in organisms {
            for feature in self.features(organism.id, options.include_obsolete)? {
                let records = self.feature_records(&feature)?;
                if !records.is_empty() {
                    self.summary.records += 1;
                }
                document.features.extend(records);

                if let Some(residues) = feature.residues.as_ref().filter(|r| !r.is_empty()) {
                    document.sequences.push(SequenceRecord {
                        line: 0,
                        uniquename: feature.uniquename.clone(),
                        description: self.sequence_description(feature.id)?,
                        residues: residues.clone(),
                    });
                }
            }
        }
        Ok(document)
    }

    /// One record per location rank, each carrying the full attribute set.
    fn feature_records(&self, feature: &StoredFeature) -> Result<Vec<FeatureRecord>> {
        let locations = self.locations(feature.id)?;
        if locations.is_empty() {
            return Ok(Vec::new());
        }

        let mut source = None;
        let mut score = None;
        let mut properties = Vec::new();
        for (key, value, rank) in self.properties(feature.id)? {
            if key == SOURCE_PROPERTY && rank == 0 {
                source = Some(value);
            } else if key == SCORE_PROPERTY && rank == 0 {
                score = Some(value);
            } else if !COLUMN_PROPERTIES.contains(&key.as_str()) {
                properties.push(PropertyRecord { key, value, rank });
            }
        }

        let template = FeatureRecord {
            line: 0,
            uniquename: feature.uniquename.clone(),
            name: feature.name.clone(),
            feature_type: feature.type_name.clone(),
            source,
            score,
            location: None,
            parents: self.parents(feature.id)?,
            properties,
            dbxrefs: self.dbxrefs(feature.id)?,
            ontology_terms: self.ontology_terms(feature.id)?,
            synonyms: self.synonyms(feature.id)?,
            publications: self.publications(feature.id)?,
            is_obsolete: feature.is_obsolete,
        };

        Ok(locations
            .into_iter()
            .map(|location| FeatureRecord {
                location: Some(location),
                ..template.clone()
            })
            .collect())
    }

    fn locations(&self, feature: FeatureId) -> Result<Vec<Location>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT src.uniquename, featureloc.fmin, featureloc.fmax, featureloc.strand, featureloc.phase
             FROM featureloc
             JOIN feature src ON src.feature_id = featureloc.srcfeature_id
             WHERE featureloc.feature_id = ? AND featureloc.locgroup = 0
             ORDER BY featureloc.rank",
        )?;
        let locations = stmt
            .query_map([feature], |row| {
                Ok(Location {
                    srcfeature: row.get(0)?,
                    fmin: row.get(1)?,
                    fmax: row.get(2)?,
                    strand: row.get(3)?,
                    phase: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(locations)
    }

    /// `(type name, value, rank)` in type then rank order.
    fn properties(&self, feature: FeatureId) -> Result<Vec<(String, String, u32)>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT cvterm.name, featureprop.value, featureprop.rank
             FROM featureprop
             JOIN cvterm ON cvterm.cvterm_id = featureprop.type_id
             WHERE featureprop.feature_id = ?
             ORDER BY cvterm.name, featureprop.rank",
        )?;
        let properties = stmt
            .query_map([feature], |row| {
                Ok((row.get(0)?, row.get::<_, Option<String>>(1)?.unwrap_or_default(), row.get(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(properties)
    }

    fn parents(&self, feature: FeatureId) -> Result<Vec<ParentRef>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT cvterm.name, object.uniquename
             FROM feature_relationship
             JOIN cvterm ON cvterm.cvterm_id = feature_relationship.type_id
             JOIN feature object ON object.feature_id = feature_relationship.object_id
             WHERE feature_relationship.subject_id = ?
             ORDER BY object.uniquename",
        )?;
        let rows = stmt
            .query_map([feature], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(type_name, uniquename)| {
                RelationshipType::from_str(&type_name).map(|relationship| ParentRef {
                    relationship,
                    uniquename,
                })
            })
            .collect())
    }

    fn dbxrefs(&self, feature: FeatureId) -> Result<Vec<DbxrefKey>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT db.name, dbxref.accession, dbxref.version
             FROM feature_dbxref
             JOIN dbxref ON dbxref.dbxref_id = feature_dbxref.dbxref_id
             JOIN db ON db.db_id = dbxref.db_id
             WHERE feature_dbxref.feature_id = ?
             ORDER BY feature_dbxref.feature_dbxref_id",
        )?;
        let keys = stmt
            .query_map([feature], dbxref_key)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    /// Distinct positive term associations outside the product vocabulary.
    fn ontology_terms(&self, feature: FeatureId) -> Result<Vec<DbxrefKey>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT db.name, dbxref.accession, dbxref.version
             FROM feature_cvterm
             JOIN cvterm ON cvterm.cvterm_id = feature_cvterm.cvterm_id
             JOIN cv ON cv.cv_id = cvterm.cv_id
             JOIN dbxref ON dbxref.dbxref_id = cvterm.dbxref_id
             JOIN db ON db.db_id = dbxref.db_id
             WHERE feature_cvterm.feature_id = ? AND feature_cvterm.is_not = 0 AND cv.name <> ?
             GROUP BY feature_cvterm.cvterm_id
             ORDER BY MIN(feature_cvterm.rank), MIN(feature_cvterm.feature_cvterm_id)",
        )?;
        let keys = stmt
            .query_map((feature, PRODUCT_CV), dbxref_key)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn synonyms(&self, feature: FeatureId) -> Result<Vec<SynonymRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT cvterm.name, synonym.name
             FROM feature_synonym
             JOIN synonym ON synonym.synonym_id = feature_synonym.synonym_id
             JOIN cvterm ON cvterm.cvterm_id = synonym.type_id
             WHERE feature_synonym.feature_id = ?
             ORDER BY feature_synonym.feature_synonym_id",
        )?;
        let rows = stmt
            .query_map([feature], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(type_name, name)| {
                SynonymKind::from_str(&type_name).map(|kind| SynonymRecord { kind, name })
            })
            .collect())
    }

    fn publications(&self, feature: FeatureId) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT pub.uniquename
             FROM feature_pub
             JOIN pub ON pub.pub_id = feature_pub.pub_id
             WHERE feature_pub.feature_id = ?
             ORDER BY feature_pub.feature_pub_id",
        )?;
        let publications = stmt
            .query_map([feature], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(publications)
    }

    fn sequence_description(&self, feature: FeatureId) -> Result<Option<String>> {
        let description = self
            .conn
            .prepare_cached(
                "SELECT featureprop.value
                 FROM featureprop
                 JOIN cvterm ON cvterm.cvterm_id = featureprop.type_id
                 JOIN cv ON cv.cv_id = cvterm.cv_id
                 WHERE featureprop.feature_id = ? AND cvterm.name = ? AND cv.name = ?
                 ORDER BY featureprop.rank
                 LIMIT 1",
            )?
            .query_row(
                (feature, SEQUENCE_DESCRIPTION_PROPERTY, FEATURE_PROPERTY_CV),
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(description.flatten())
    }

    /// Stored header lines of `kind`, skipping lines an earlier organism
    /// already contributed.
    pub fn header_lines(&self, organisms: &[Organism], kind: HeaderKind) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT organismprop.value
             FROM organismprop
             JOIN cvterm ON cvterm.cvterm_id = organismprop.type_id
             JOIN cv ON cv.cv_id = cvterm.cv_id
             WHERE organismprop.organism_id = ? AND cvterm.name = ? AND cv.name = ?
             ORDER BY organismprop.rank",
        )?;
        let mut lines: Vec<String> = Vec::new();
        for organism in organisms {
            let rows = stmt.query_map(
                (organism.id, kind.property(), ORGANISM_PROPERTY_CV),
                |row| row.get::<_, Option<String>>(0),
            )?;
            for row in rows {
                let Some(line) = row? else {
                    continue;
                };
                if !lines.contains(&line) {
                    lines.push(line);
                }
            }
        }
        Ok(lines)
    }

    // ============================================================
    // FASTA
    // ============================================================

    /// Features with residues, or every feature of `options.sequence_type`.
    /// Features lacking residues are skipped with a warning.
    pub fn sequence_records(&mut self, options: &ExportOptions) -> Result<Vec<SequenceRecord>> {
        let mut records = Vec::new();
        for organism in self.organisms(&options.organism)? {
            for feature in self.features(organism.id, options.include_obsolete)? {
                let selected = match &options.sequence_type {
                    Some(sequence_type) => &feature.type_name == sequence_type,
                    None => feature.residues.is_some(),
                };
                if !selected {
                    continue;
                }
                match feature.residues.filter(|residues| !residues.is_empty()) {
                    Some(residues) => {
                        records.push(SequenceRecord {
                            line: 0,
                            uniquename: feature.uniquename,
                            description: self.sequence_description(feature.id)?,
                            residues,
                        });
                        self.summary.records += 1;
                    }
                    None => {
                        tracing::warn!(
                            organism = %organism.abbreviation,
                            feature = %feature.uniquename,
                            "Skipping feature without residues"
                        );
                        self.summary.skipped += 1;
                    }
                }
            }
        }
        Ok(records)
    }

    // ============================================================
    // GAF
    // ============================================================

    /// `!` lines kept from GAF imports of the selected organisms.
    pub fn gaf_comments(&self, options: &ExportOptions) -> Result<Vec<String>> {
        let organisms = self.organisms(&options.organism)?;
        self.header_lines(&organisms, HeaderKind::GafComment)
    }

    /// Evidence-bearing associations, by feature then rank.
    pub fn association_records(&mut self, options: &ExportOptions) -> Result<Vec<AssociationRecord>> {
        let mut records = Vec::new();
        for organism in self.organisms(&options.organism)? {
            for feature in self.features(organism.id, options.include_obsolete)? {
                let product = self.product(feature.id)?;
                for association in self.evidenced_associations(feature.id)? {
                    let properties = self.association_properties(association.id)?;
                    match build_association(&feature, &association, properties, product.clone()) {
                        Some(record) => {
                            records.push(record);
                            self.summary.records += 1;
                        }
                        None => {
                            tracing::warn!(
                                feature = %feature.uniquename,
                                term = %association.term,
                                "Skipping association without an aspect"
                            );
                            self.summary.skipped += 1;
                        }
                    }
                }
            }
        }
        Ok(records)
    }

    fn evidenced_associations(&self, feature: FeatureId) -> Result<Vec<StoredAssociation>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT feature_cvterm.feature_cvterm_id, feature_cvterm.is_not,
                    db.name, dbxref.accession, dbxref.version, cv.name
             FROM feature_cvterm
             JOIN cvterm ON cvterm.cvterm_id = feature_cvterm.cvterm_id
             JOIN cv ON cv.cv_id = cvterm.cv_id
             JOIN dbxref ON dbxref.dbxref_id = cvterm.dbxref_id
             JOIN db ON db.db_id = dbxref.db_id
             WHERE feature_cvterm.feature_id = ?1
               AND EXISTS (
                   SELECT 1 FROM feature_cvtermprop
                   JOIN cvterm prop_type ON prop_type.cvterm_id = feature_cvtermprop.type_id
                   JOIN cv prop_cv ON prop_cv.cv_id = prop_type.cv_id
                   WHERE feature_cvtermprop.feature_cvterm_id = feature_cvterm.feature_cvterm_id
                     AND prop_type.name = 'evidence' AND prop_cv.name = ?2)
             ORDER BY feature_cvterm.rank, feature_cvterm.feature_cvterm_id",
        )?;
        let associations = stmt
            .query_map((feature, ASSOCIATION_PROPERTY_CV), |row| {
                Ok(StoredAssociation {
                    id: row.get(0)?,
                    is_not: row.get(1)?,
                    term: DbxrefKey {
                        db: row.get(2)?,
                        accession: row.get(3)?,
                        version: row.get(4)?,
                    },
                    namespace: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(associations)
    }

    /// Qualifier values keyed by property name, each list in rank order.
    fn association_properties(&self, association: FeatureCvtermId) -> Result<BTreeMap<String, Vec<String>>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT cvterm.name, feature_cvtermprop.value
             FROM feature_cvtermprop
             JOIN cvterm ON cvterm.cvterm_id = feature_cvtermprop.type_id
             WHERE feature_cvtermprop.feature_cvterm_id = ?
             ORDER BY cvterm.name, feature_cvtermprop.rank",
        )?;
        let mut properties: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let rows = stmt.query_map([association], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;
        for row in rows {
            let (key, value) = row?;
            properties.entry(key).or_default().push(value.unwrap_or_default());
        }
        Ok(properties)
    }

    fn product(&self, feature: FeatureId) -> Result<Option<String>> {
        let product = self
            .conn
            .prepare_cached(
                "SELECT cvterm.name
                 FROM feature_cvterm
                 JOIN cvterm ON cvterm.cvterm_id = feature_cvterm.cvterm_id
                 JOIN cv ON cv.cv_id = cvterm.cv_id
                 WHERE feature_cvterm.feature_id = ? AND cv.name = ?
                 ORDER BY feature_cvterm.rank, feature_cvterm.feature_cvterm_id
                 LIMIT 1",
            )?
            .query_row((feature, PRODUCT_CV), |row| row.get(0))
            .optional()?;
        Ok(product)
    }
}

#[derive(Debug)]
struct StoredAssociation {
    id: FeatureCvtermId,
    is_not: bool,
    term: DbxrefKey,
    namespace: String,
}

fn dbxref_key(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbxrefKey> {
    Ok(DbxrefKey {
        db: row.get(0)?,
        accession: row.get(1)?,
        version: row.get(2)?,
    })
}

fn build_association(
    feature: &StoredFeature,
    association: &StoredAssociation,
    mut properties: BTreeMap<String, Vec<String>>,
    product: Option<String>,
) -> Option<AssociationRecord> {
    let mut single = |key: &str| {
        properties
            .get_mut(key)
            .and_then(|values| (!values.is_empty()).then(|| values.remove(0)))
    };

    let aspect = single("aspect")
        .and_then(|code| Aspect::from_str(&code))
        .or_else(|| Aspect::from_namespace(&association.namespace))?;
    let db = single("db").unwrap_or_else(|| DEFAULT_GAF_DB.to_string());
    let symbol = single("symbol")
        .or_else(|| feature.name.clone())
        .unwrap_or_else(|| feature.uniquename.clone());
    let evidence = single("evidence")
        .map(|description| {
            abbreviate_evidence(&description)
                .map(str::to_string)
                .unwrap_or(description)
        })
        .unwrap_or_default();
    let object_type = single("object_type").unwrap_or_else(|| feature.type_name.clone());
    let taxon = single("taxon").unwrap_or_default();
    let date = single("date").unwrap_or_default();
    let assigned_by = single("assigned_by").unwrap_or_else(|| db.clone());
    let annotation_extension = single("annotation_extension");
    let gene_product_form_id = single("gene_product_form_id");

    let mut list = |key: &str| properties.remove(key).unwrap_or_default();

    Some(AssociationRecord {
        line: 0,
        db,
        object_id: feature.uniquename.clone(),
        symbol,
        is_not: association.is_not,
        qualifiers: list("qualifier"),
        term: association.term.clone(),
        references: list("reference"),
        evidence,
        with_from: list("with"),
        aspect,
        object_name: product,
        synonyms: list("synonym"),
        object_type,
        taxon,
        date,
        assigned_by,
        annotation_extension,
        gene_product_form_id,
    })
}
