//! Transactional Loader.
//!
//! Writes a validated [`FeatureGraph`] through a connection that the caller
//! has already placed inside a transaction. Every row is matched on its
//! natural key first. A stored feature that the unit annotates again loses
//! the locations, properties, cross-references, ontology terms, synonyms and
//! publications the unit no longer lists; nothing else is deleted beyond
//! replaced association qualifiers and header lines.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::{ChadoError, ReferenceKey, Result};
use crate::graph::{FeatureGraph, FeatureNode, FeatureRef, HeaderBlock, NodeOrigin};
use crate::models::*;
use crate::pipeline::CancelToken;

pub struct Loader<'c> {
    conn: &'c Connection,
    report: LoadReport,
    now: String,
    ids: HashMap<String, FeatureId>,
}

/// Upserts `graph` and reports what was created and what matched.
pub fn load(
    conn: &Connection,
    graph: &FeatureGraph,
    session: Uuid,
    cancel: &CancelToken,
) -> Result<LoadReport> {
    let mut loader = Loader {
        conn,
        report: LoadReport::new(session, &graph.organism.abbreviation),
        now: Utc::now().to_rfc3339(),
        ids: HashMap::with_capacity(graph.nodes.len()),
    };

    let organism_id = loader.upsert_organism(graph)?;
    if let Some(headers) = &graph.headers {
        loader.replace_headers(organism_id, headers)?;
    }

    for node in graph.nodes.values() {
        cancel.check()?;
        let id = loader.upsert_feature(organism_id, node)?;
        loader.ids.insert(node.uniquename.clone(), id);
    }

    for node in graph.nodes.values() {
        cancel.check()?;
        let feature_id = loader.batch_id(&node.uniquename)?;
        loader.upsert_locations(feature_id, node)?;
        for ((_, rank), property) in &node.properties {
            loader.upsert_featureprop(feature_id, property.type_id, &property.value, *rank)?;
        }
        for dbxref_id in &node.dbxrefs {
            loader.upsert_feature_dbxref(feature_id, *dbxref_id)?;
        }
        for (rank, cvterm_id) in node.ontology_terms.iter().enumerate() {
            loader.upsert_ontology_term(feature_id, *cvterm_id, rank as u32)?;
        }
        for synonym in &node.synonyms {
            let synonym_id = loader.upsert_synonym(&synonym.name, synonym.type_id)?;
            loader.upsert_feature_synonym(
                feature_id,
                synonym_id,
                graph.terms.null_pub,
                synonym.kind.is_current(),
            )?;
        }
        for uniquename in &node.publications {
            let pub_id = loader.upsert_pub(uniquename, graph.terms.pub_type)?;
            loader.upsert_feature_pub(feature_id, pub_id)?;
        }
        if node.origin == NodeOrigin::Annotation && node.persisted.is_some() {
            loader.prune_annotation(feature_id, node, graph)?;
        }
    }

    for edge in &graph.edges {
        let subject = loader.batch_id(&edge.subject)?;
        let object = loader.resolve(&edge.object)?;
        loader.upsert_relationship(subject, object, edge.type_id)?;
    }

    for association in &graph.associations {
        cancel.check()?;
        let feature_id = loader.resolve(&association.feature)?;
        let association_id = loader.upsert_feature_cvterm(
            feature_id,
            association.cvterm_id,
            association.rank,
            association.is_not,
        )?;
        loader.replace_qualifiers(association_id, &association.properties)?;
    }

    for product in graph.products.values() {
        let feature_id = loader.resolve(&product.feature)?;
        loader.upsert_product(feature_id, product.cvterm_id)?;
    }

    loader.report.superseded = graph.superseded;
    Ok(loader.report)
}

impl<'c> Loader<'c> {
    fn batch_id(&self, uniquename: &str) -> Result<FeatureId> {
        self.ids.get(uniquename).copied().ok_or_else(|| ChadoError::ReferenceNotFound {
            line: None,
            key: ReferenceKey::Feature {
                organism: self.report.organism.clone(),
                uniquename: uniquename.to_string(),
            },
        })
    }

    fn resolve(&self, target: &FeatureRef) -> Result<FeatureId> {
        match target {
            FeatureRef::Batch(uniquename) => self.batch_id(uniquename),
            FeatureRef::Persisted(id) => Ok(*id),
        }
    }

    // ============================================================
    // Organism and feature rows
    // ============================================================

    fn upsert_organism(&mut self, graph: &FeatureGraph) -> Result<OrganismId> {
        let declared = graph.organism.declared.as_ref();
        match (graph.organism_id, declared) {
            (Some(id), None) => Ok(id),
            (Some(id), Some(names)) => {
                let (genus, species): (String, String) = self.conn.query_row(
                    "SELECT genus, species FROM organism WHERE organism_id = ?",
                    [id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                if genus != names.genus || species != names.species {
                    return Err(ChadoError::conflict(
                        None,
                        format!(
                            "organism '{}' is stored as {genus} {species}, not {} {}",
                            graph.organism.abbreviation, names.genus, names.species
                        ),
                    ));
                }
                if names.strain.is_some() {
                    self.conn.execute(
                        "UPDATE organism SET infraspecific_name = ? WHERE organism_id = ?",
                        (&names.strain, id),
                    )?;
                }
                self.report.updated(Table::Organism);
                Ok(id)
            }
            (None, Some(names)) => {
                let clash: Option<String> = self
                    .conn
                    .query_row(
                        "SELECT abbreviation FROM organism
                         WHERE genus = ? AND species = ?
                           AND COALESCE(infraspecific_name, '') = COALESCE(?, '')",
                        (&names.genus, &names.species, &names.strain),
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(existing) = clash {
                    return Err(ChadoError::conflict(
                        None,
                        format!(
                            "{} {} is already stored under abbreviation '{existing}'",
                            names.genus, names.species
                        ),
                    ));
                }
                self.conn.execute(
                    "INSERT INTO organism (abbreviation, genus, species, infraspecific_name)
                     VALUES (?, ?, ?, ?)",
                    (
                        &graph.organism.abbreviation,
                        &names.genus,
                        &names.species,
                        &names.strain,
                    ),
                )?;
                self.report.created(Table::Organism);
                tracing::info!(organism = %graph.organism.abbreviation, "Created organism");
                Ok(OrganismId(self.conn.last_insert_rowid()))
            }
            (None, None) => Err(ChadoError::ReferenceNotFound {
                line: None,
                key: ReferenceKey::Organism(graph.organism.abbreviation.clone()),
            }),
        }
    }

    fn upsert_feature(&mut self, organism_id: OrganismId, node: &FeatureNode) -> Result<FeatureId> {
        let checksum = node
            .residues
            .as_ref()
            .map(|residues| format!("{:x}", md5::compute(residues.as_bytes())));
        let seqlen = node.residues.as_ref().map(|residues| residues.len() as i64);

        let Some(id) = node.persisted else {
            self.conn.execute(
                "INSERT INTO feature (organism_id, name, uniquename, residues, seqlen, md5checksum,
                                      type_id, is_obsolete, timeaccessioned, timelastmodified)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    organism_id,
                    &node.name,
                    &node.uniquename,
                    &node.residues,
                    seqlen,
                    &checksum,
                    node.type_id,
                    node.is_obsolete,
                    &self.now,
                    &self.now,
                ),
            )?;
            self.report.created(Table::Feature);
            return Ok(FeatureId(self.conn.last_insert_rowid()));
        };

        match node.origin {
            NodeOrigin::Annotation => {
                self.conn.execute(
                    "UPDATE feature SET name = ?, type_id = ?, is_obsolete = ?, timelastmodified = ?
                     WHERE feature_id = ?",
                    (&node.name, node.type_id, node.is_obsolete, &self.now, id),
                )?;
            }
            NodeOrigin::Sequence => {
                self.conn.execute(
                    "UPDATE feature SET type_id = ?, timelastmodified = ? WHERE feature_id = ?",
                    (node.type_id, &self.now, id),
                )?;
            }
        }
        if let Some(residues) = &node.residues {
            self.conn.execute(
                "UPDATE feature SET residues = ?, seqlen = ?, md5checksum = ? WHERE feature_id = ?",
                (residues, seqlen, &checksum, id),
            )?;
        }
        self.report.updated(Table::Feature);
        Ok(id)
    }

    fn upsert_locations(&mut self, feature_id: FeatureId, node: &FeatureNode) -> Result<()> {
        for (rank, location) in node.locations.iter().enumerate() {
            let srcfeature_id = self.resolve(&location.srcfeature)?;
            let rank = rank as i64;
            let existing: Option<i64> = self
                .conn
                .prepare_cached(
                    "SELECT featureloc_id FROM featureloc
                     WHERE feature_id = ? AND locgroup = 0 AND rank = ?",
                )?
                .query_row((feature_id, rank), |row| row.get(0))
                .optional()?;
            match existing {
                Some(featureloc_id) => {
                    self.conn.execute(
                        "UPDATE featureloc SET srcfeature_id = ?, fmin = ?, fmax = ?, strand = ?, phase = ?
                         WHERE featureloc_id = ?",
                        (
                            srcfeature_id,
                            location.fmin,
                            location.fmax,
                            location.strand,
                            location.phase,
                            featureloc_id,
                        ),
                    )?;
                    self.report.updated(Table::Featureloc);
                }
                None => {
                    self.conn.execute(
                        "INSERT INTO featureloc (feature_id, srcfeature_id, fmin, fmax, strand, phase, locgroup, rank)
                         VALUES (?, ?, ?, ?, ?, ?, 0, ?)",
                        (
                            feature_id,
                            srcfeature_id,
                            location.fmin,
                            location.fmax,
                            location.strand,
                            location.phase,
                            rank,
                        ),
                    )?;
                    self.report.created(Table::Featureloc);
                }
            }
        }

        if node.origin == NodeOrigin::Annotation && node.persisted.is_some() {
            let removed = self.conn.execute(
                "DELETE FROM featureloc WHERE feature_id = ? AND locgroup = 0 AND rank >= ?",
                (feature_id, node.locations.len() as i64),
            )?;
            if removed > 0 {
                tracing::debug!(feature = %node.uniquename, removed, "Removed stale location ranks");
            }
            self.report.removed(Table::Featureloc, removed);
        }
        Ok(())
    }

    // ============================================================
    // Properties, cross-references and relationships
    // ============================================================

    fn upsert_featureprop(
        &mut self,
        feature_id: FeatureId,
        type_id: CvtermId,
        value: &str,
        rank: u32,
    ) -> Result<()> {
        let existing: Option<i64> = self
            .conn
            .prepare_cached(
                "SELECT featureprop_id FROM featureprop WHERE feature_id = ? AND type_id = ? AND rank = ?",
            )?
            .query_row((feature_id, type_id, rank), |row| row.get(0))
            .optional()?;
        match existing {
            Some(featureprop_id) => {
                self.conn.execute(
                    "UPDATE featureprop SET value = ? WHERE featureprop_id = ?",
                    (value, featureprop_id),
                )?;
                self.report.updated(Table::Featureprop);
            }
            None => {
                self.conn.execute(
                    "INSERT INTO featureprop (feature_id, type_id, value, rank) VALUES (?, ?, ?, ?)",
                    (feature_id, type_id, value, rank),
                )?;
                self.report.created(Table::Featureprop);
            }
        }
        Ok(())
    }

    fn upsert_feature_dbxref(&mut self, feature_id: FeatureId, dbxref_id: DbxrefId) -> Result<()> {
        let existing: Option<i64> = self
            .conn
            .prepare_cached(
                "SELECT feature_dbxref_id FROM feature_dbxref WHERE feature_id = ? AND dbxref_id = ?",
            )?
            .query_row((feature_id, dbxref_id), |row| row.get(0))
            .optional()?;
        if existing.is_some() {
            self.report.updated(Table::FeatureDbxref);
        } else {
            self.conn.execute(
                "INSERT INTO feature_dbxref (feature_id, dbxref_id) VALUES (?, ?)",
                (feature_id, dbxref_id),
            )?;
            self.report.created(Table::FeatureDbxref);
        }
        Ok(())
    }

    /// Matched on (subject, object, type); an existing edge is left as is.
    fn upsert_relationship(
        &mut self,
        subject: FeatureId,
        object: FeatureId,
        type_id: CvtermId,
    ) -> Result<()> {
        let existing: Option<i64> = self
            .conn
            .prepare_cached(
                "SELECT feature_relationship_id FROM feature_relationship
                 WHERE subject_id = ? AND object_id = ? AND type_id = ?
                 LIMIT 1",
            )?
            .query_row((subject, object, type_id), |row| row.get(0))
            .optional()?;
        if existing.is_some() {
            self.report.updated(Table::FeatureRelationship);
        } else {
            self.conn.execute(
                "INSERT INTO feature_relationship (subject_id, object_id, type_id, rank)
                 VALUES (?, ?, ?, 0)",
                (subject, object, type_id),
            )?;
            self.report.created(Table::FeatureRelationship);
        }
        Ok(())
    }

    // ============================================================
    // Ontology associations
    // ============================================================

    fn upsert_feature_cvterm(
        &mut self,
        feature_id: FeatureId,
        cvterm_id: CvtermId,
        rank: u32,
        is_not: bool,
    ) -> Result<FeatureCvtermId> {
        let existing: Option<FeatureCvtermId> = self
            .conn
            .prepare_cached(
                "SELECT feature_cvterm_id FROM feature_cvterm
                 WHERE feature_id = ? AND cvterm_id = ? AND rank = ?",
            )?
            .query_row((feature_id, cvterm_id, rank), |row| row.get(0))
            .optional()?;
        match existing {
            Some(id) => {
                self.conn.execute(
                    "UPDATE feature_cvterm SET is_not = ? WHERE feature_cvterm_id = ?",
                    (is_not, id),
                )?;
                self.report.updated(Table::FeatureCvterm);
                Ok(id)
            }
            None => {
                self.conn.execute(
                    "INSERT INTO feature_cvterm (feature_id, cvterm_id, is_not, rank) VALUES (?, ?, ?, ?)",
                    (feature_id, cvterm_id, is_not, rank),
                )?;
                self.report.created(Table::FeatureCvterm);
                Ok(FeatureCvtermId(self.conn.last_insert_rowid()))
            }
        }
    }

    /// An `Ontology_term` at `rank`. The NOT flag of a row shared with a GO
    /// association is left alone.
    fn upsert_ontology_term(
        &mut self,
        feature_id: FeatureId,
        cvterm_id: CvtermId,
        rank: u32,
    ) -> Result<()> {
        let existing: Option<FeatureCvtermId> = self
            .conn
            .prepare_cached(
                "SELECT feature_cvterm_id FROM feature_cvterm
                 WHERE feature_id = ? AND cvterm_id = ? AND rank = ?",
            )?
            .query_row((feature_id, cvterm_id, rank), |row| row.get(0))
            .optional()?;
        if existing.is_some() {
            self.report.updated(Table::FeatureCvterm);
        } else {
            self.conn.execute(
                "INSERT INTO feature_cvterm (feature_id, cvterm_id, is_not, rank) VALUES (?, ?, 0, ?)",
                (feature_id, cvterm_id, rank),
            )?;
            self.report.created(Table::FeatureCvterm);
        }
        Ok(())
    }

    /// Makes `properties` the complete qualifier set of the association.
    fn replace_qualifiers(
        &mut self,
        association: FeatureCvtermId,
        properties: &[(CvtermId, u32, String)],
    ) -> Result<()> {
        let stored: Vec<(i64, CvtermId, u32)> = self
            .conn
            .prepare_cached(
                "SELECT feature_cvtermprop_id, type_id, rank FROM feature_cvtermprop
                 WHERE feature_cvterm_id = ?",
            )?
            .query_map([association], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for (type_id, rank, value) in properties {
            let existing = stored
                .iter()
                .find(|(_, stored_type, stored_rank)| stored_type == type_id && stored_rank == rank);
            match existing {
                Some((prop_id, _, _)) => {
                    self.conn.execute(
                        "UPDATE feature_cvtermprop SET value = ? WHERE feature_cvtermprop_id = ?",
                        (value, prop_id),
                    )?;
                    self.report.updated(Table::FeatureCvtermprop);
                }
                None => {
                    self.conn.execute(
                        "INSERT INTO feature_cvtermprop (feature_cvterm_id, type_id, value, rank)
                         VALUES (?, ?, ?, ?)",
                        (association, type_id, value, rank),
                    )?;
                    self.report.created(Table::FeatureCvtermprop);
                }
            }
        }

        for (prop_id, stored_type, stored_rank) in &stored {
            let kept = properties
                .iter()
                .any(|(type_id, rank, _)| type_id == stored_type && rank == stored_rank);
            if !kept {
                let removed = self.conn.execute(
                    "DELETE FROM feature_cvtermprop WHERE feature_cvtermprop_id = ?",
                    [prop_id],
                )?;
                self.report.removed(Table::FeatureCvtermprop, removed);
            }
        }
        Ok(())
    }

    /// One product per feature; a new product replaces the old term.
    fn upsert_product(&mut self, feature_id: FeatureId, cvterm_id: CvtermId) -> Result<()> {
        let existing: Option<(FeatureCvtermId, CvtermId)> = self
            .conn
            .prepare_cached(
                "SELECT feature_cvterm.feature_cvterm_id, feature_cvterm.cvterm_id
                 FROM feature_cvterm
                 JOIN cvterm ON cvterm.cvterm_id = feature_cvterm.cvterm_id
                 JOIN cv ON cv.cv_id = cvterm.cv_id
                 WHERE feature_cvterm.feature_id = ? AND cv.name = ? AND feature_cvterm.rank = 0
                 ORDER BY feature_cvterm.feature_cvterm_id
                 LIMIT 1",
            )?
            .query_row((feature_id, PRODUCT_CV), |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;
        match existing {
            Some((id, current)) => {
                if current != cvterm_id {
                    self.conn.execute(
                        "UPDATE feature_cvterm SET cvterm_id = ? WHERE feature_cvterm_id = ?",
                        (cvterm_id, id),
                    )?;
                }
                self.report.updated(Table::FeatureCvterm);
            }
            None => {
                self.conn.execute(
                    "INSERT INTO feature_cvterm (feature_id, cvterm_id, is_not, rank) VALUES (?, ?, 0, 0)",
                    (feature_id, cvterm_id),
                )?;
                self.report.created(Table::FeatureCvterm);
            }
        }
        Ok(())
    }

    // ============================================================
    // Synonyms and publications
    // ============================================================

    fn upsert_synonym(&mut self, name: &str, type_id: CvtermId) -> Result<SynonymId> {
        let existing: Option<SynonymId> = self
            .conn
            .prepare_cached("SELECT synonym_id FROM synonym WHERE name = ? AND type_id = ?")?
            .query_row((name, type_id), |row| row.get(0))
            .optional()?;
        if let Some(id) = existing {
            self.report.updated(Table::Synonym);
            return Ok(id);
        }
        self.conn.execute(
            "INSERT INTO synonym (name, type_id, synonym_sgml) VALUES (?, ?, ?)",
            (name, type_id, name),
        )?;
        self.report.created(Table::Synonym);
        Ok(SynonymId(self.conn.last_insert_rowid()))
    }

    fn upsert_feature_synonym(
        &mut self,
        feature_id: FeatureId,
        synonym_id: SynonymId,
        pub_id: PubId,
        is_current: bool,
    ) -> Result<()> {
        let existing: Option<i64> = self
            .conn
            .prepare_cached(
                "SELECT feature_synonym_id FROM feature_synonym
                 WHERE synonym_id = ? AND feature_id = ? AND pub_id = ?",
            )?
            .query_row((synonym_id, feature_id, pub_id), |row| row.get(0))
            .optional()?;
        match existing {
            Some(feature_synonym_id) => {
                self.conn.execute(
                    "UPDATE feature_synonym SET is_current = ? WHERE feature_synonym_id = ?",
                    (is_current, feature_synonym_id),
                )?;
                self.report.updated(Table::FeatureSynonym);
            }
            None => {
                self.conn.execute(
                    "INSERT INTO feature_synonym (synonym_id, feature_id, pub_id, is_current, is_internal)
                     VALUES (?, ?, ?, ?, 0)",
                    (synonym_id, feature_id, pub_id, is_current),
                )?;
                self.report.created(Table::FeatureSynonym);
            }
        }
        Ok(())
    }

    /// Publications are matched on uniquename; a new one gets `type_id`.
    fn upsert_pub(&mut self, uniquename: &str, type_id: CvtermId) -> Result<PubId> {
        let existing: Option<PubId> = self
            .conn
            .prepare_cached("SELECT pub_id FROM pub WHERE uniquename = ?")?
            .query_row([uniquename], |row| row.get(0))
            .optional()?;
        if let Some(id) = existing {
            self.report.updated(Table::Pub);
            return Ok(id);
        }
        self.conn.execute(
            "INSERT INTO pub (uniquename, type_id) VALUES (?, ?)",
            (uniquename, type_id),
        )?;
        self.report.created(Table::Pub);
        Ok(PubId(self.conn.last_insert_rowid()))
    }

    fn upsert_feature_pub(&mut self, feature_id: FeatureId, pub_id: PubId) -> Result<()> {
        let existing: Option<i64> = self
            .conn
            .prepare_cached("SELECT feature_pub_id FROM feature_pub WHERE feature_id = ? AND pub_id = ?")?
            .query_row((feature_id, pub_id), |row| row.get(0))
            .optional()?;
        if existing.is_some() {
            self.report.updated(Table::FeaturePub);
        } else {
            self.conn.execute(
                "INSERT INTO feature_pub (feature_id, pub_id) VALUES (?, ?)",
                (feature_id, pub_id),
            )?;
            self.report.created(Table::FeaturePub);
        }
        Ok(())
    }

    // ============================================================
    // Stale annotation
    // ============================================================

    /// Deletes what a stored feature carried that `node` no longer lists.
    ///
    /// A sequence description only goes when the unit supplied residues.
    /// Ontology rows qualified by a GO association, negated, or holding the
    /// product are kept.
    fn prune_annotation(
        &mut self,
        feature_id: FeatureId,
        node: &FeatureNode,
        graph: &FeatureGraph,
    ) -> Result<()> {
        let properties: HashSet<(CvtermId, u32)> = node
            .properties
            .iter()
            .map(|((_, rank), property)| (property.type_id, *rank))
            .collect();
        let description = graph.terms.sequence_description;
        let stored: Vec<(i64, CvtermId, u32)> = self
            .conn
            .prepare_cached("SELECT featureprop_id, type_id, rank FROM featureprop WHERE feature_id = ?")?
            .query_map([feature_id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (featureprop_id, type_id, rank) in stored {
            if properties.contains(&(type_id, rank)) {
                continue;
            }
            if type_id == description && node.residues.is_none() {
                continue;
            }
            let removed = self
                .conn
                .execute("DELETE FROM featureprop WHERE featureprop_id = ?", [featureprop_id])?;
            self.report.removed(Table::Featureprop, removed);
        }

        let stored: Vec<(i64, DbxrefId)> = self
            .conn
            .prepare_cached("SELECT feature_dbxref_id, dbxref_id FROM feature_dbxref WHERE feature_id = ?")?
            .query_map([feature_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (feature_dbxref_id, dbxref_id) in stored {
            if node.dbxrefs.contains(&dbxref_id) {
                continue;
            }
            let removed = self.conn.execute(
                "DELETE FROM feature_dbxref WHERE feature_dbxref_id = ?",
                [feature_dbxref_id],
            )?;
            self.report.removed(Table::FeatureDbxref, removed);
        }

        let terms: HashSet<(CvtermId, u32)> = node
            .ontology_terms
            .iter()
            .enumerate()
            .map(|(rank, cvterm_id)| (*cvterm_id, rank as u32))
            .collect();
        let stored: Vec<(FeatureCvtermId, CvtermId, u32)> = self
            .conn
            .prepare_cached(
                "SELECT feature_cvterm.feature_cvterm_id, feature_cvterm.cvterm_id, feature_cvterm.rank
                 FROM feature_cvterm
                 JOIN cvterm ON cvterm.cvterm_id = feature_cvterm.cvterm_id
                 JOIN cv ON cv.cv_id = cvterm.cv_id
                 WHERE feature_cvterm.feature_id = ? AND feature_cvterm.is_not = 0 AND cv.name <> ?
                   AND NOT EXISTS (SELECT 1 FROM feature_cvtermprop
                                   WHERE feature_cvtermprop.feature_cvterm_id = feature_cvterm.feature_cvterm_id)",
            )?
            .query_map((feature_id, PRODUCT_CV), |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (feature_cvterm_id, cvterm_id, rank) in stored {
            if terms.contains(&(cvterm_id, rank)) {
                continue;
            }
            let removed = self.conn.execute(
                "DELETE FROM feature_cvterm WHERE feature_cvterm_id = ?",
                [feature_cvterm_id],
            )?;
            self.report.removed(Table::FeatureCvterm, removed);
        }

        let synonyms: Vec<(String, CvtermId)> = node
            .synonyms
            .iter()
            .map(|synonym| (synonym.name.clone(), synonym.type_id))
            .collect();
        let stored: Vec<(i64, String, CvtermId)> = self
            .conn
            .prepare_cached(
                "SELECT feature_synonym.feature_synonym_id, synonym.name, synonym.type_id
                 FROM feature_synonym
                 JOIN synonym ON synonym.synonym_id = feature_synonym.synonym_id
                 WHERE feature_synonym.feature_id = ? AND feature_synonym.pub_id = ?",
            )?
            .query_map((feature_id, graph.terms.null_pub), |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (feature_synonym_id, name, type_id) in stored {
            if synonyms.contains(&(name, type_id)) {
                continue;
            }
            let removed = self.conn.execute(
                "DELETE FROM feature_synonym WHERE feature_synonym_id = ?",
                [feature_synonym_id],
            )?;
            self.report.removed(Table::FeatureSynonym, removed);
        }

        let stored: Vec<(i64, String)> = self
            .conn
            .prepare_cached(
                "SELECT feature_pub.feature_pub_id, pub.uniquename FROM feature_pub
                 JOIN pub ON pub.pub_id = feature_pub.pub_id
                 WHERE feature_pub.feature_id = ?",
            )?
            .query_map([feature_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for (feature_pub_id, uniquename) in stored {
            if node.publications.contains(&uniquename) {
                continue;
            }
            let removed = self
                .conn
                .execute("DELETE FROM feature_pub WHERE feature_pub_id = ?", [feature_pub_id])?;
            self.report.removed(Table::FeaturePub, removed);
        }
        Ok(())
    }

    // ============================================================
    // Organism headers
    // ============================================================

    /// Stores `headers` as the organism's complete set of that kind.
    fn replace_headers(&mut self, organism_id: OrganismId, headers: &HeaderBlock) -> Result<()> {
        for (rank, line) in headers.lines.iter().enumerate() {
            let rank = rank as i64;
            let existing: Option<i64> = self
                .conn
                .prepare_cached(
                    "SELECT organismprop_id FROM organismprop
                     WHERE organism_id = ? AND type_id = ? AND rank = ?",
                )?
                .query_row((organism_id, headers.type_id, rank), |row| row.get(0))
                .optional()?;
            match existing {
                Some(organismprop_id) => {
                    self.conn.execute(
                        "UPDATE organismprop SET value = ? WHERE organismprop_id = ?",
                        (line, organismprop_id),
                    )?;
                    self.report.updated(Table::Organismprop);
                }
                None => {
                    self.conn.execute(
                        "INSERT INTO organismprop (organism_id, type_id, value, rank) VALUES (?, ?, ?, ?)",
                        (organism_id, headers.type_id, line, rank),
                    )?;
                    self.report.created(Table::Organismprop);
                }
            }
        }
        let removed = self.conn.execute(
            "DELETE FROM organismprop WHERE organism_id = ? AND type_id = ? AND rank >= ?",
            (organism_id, headers.type_id, headers.lines.len() as i64),
        )?;
        self.report.removed(Table::Organismprop, removed);
        Ok(())
    }
}
