//! Feature Graph Builder.
//!
//! Folds the records of one import unit into a [`FeatureGraph`]:
//! nodes keyed by uniquename, typed edges, and ontology associations.
//! Records repeating a uniquename merge into one node. [`GraphBuilder::finish`]
//! then checks that every reference resolves, that typed edges form no
//! cycle, and that residues agree with located length.
//! Header lines of the unit's dialect are kept for the organism.

use std::collections::{BTreeMap, HashMap, HashSet};

use indexmap::IndexMap;

use crate::error::{ChadoError, ReferenceKey, Result, StructuralError};
use crate::models::*;
use crate::pipeline::CancelToken;
use crate::resolver::{EssentialTerms, PersistedFeature, Resolution, Resolver};

#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Type of FASTA entries that neither declare one nor exist yet.
    pub default_sequence_type: String,
    /// Header lines this unit replaces for its organism; `None` leaves
    /// stored headers untouched.
    pub header: Option<HeaderKind>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            default_sequence_type: "region".into(),
            header: None,
        }
    }
}

/// Which kind of record introduced a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOrigin {
    /// A located feature line; authoritative for name, type and obsolescence.
    Annotation,
    /// A sequence entry; only supplies residues.
    Sequence,
}

/// Endpoint of a location or edge.
///
/// While building, `Batch` only carries the name as written. After
/// [`GraphBuilder::finish`] it means the feature is part of this batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureRef {
    Batch(String),
    Persisted(FeatureId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLocation {
    pub srcfeature: FeatureRef,
    pub srcfeature_name: String,
    pub fmin: i64,
    pub fmax: i64,
    pub strand: Option<i8>,
    pub phase: Option<u8>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeProperty {
    pub type_id: CvtermId,
    pub value: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSynonym {
    pub kind: SynonymKind,
    pub type_id: CvtermId,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct FeatureNode {
    pub uniquename: String,
    pub origin: NodeOrigin,
    pub type_id: CvtermId,
    pub type_name: String,
    pub name: Option<String>,
    pub residues: Option<String>,
    pub locations: Vec<NodeLocation>,
    /// Keyed by property name and rank.
    pub properties: BTreeMap<(String, u32), NodeProperty>,
    pub dbxrefs: Vec<DbxrefId>,
    /// In file order; the position is the stored rank.
    pub ontology_terms: Vec<CvtermId>,
    pub synonyms: Vec<NodeSynonym>,
    /// Publication uniquenames from `literature`.
    pub publications: Vec<String>,
    pub is_obsolete: bool,
    /// Set when the store already holds this uniquename.
    pub persisted: Option<FeatureId>,
    pub line: usize,
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub subject: String,
    pub object: FeatureRef,
    pub object_name: String,
    pub relationship: RelationshipType,
    pub type_id: CvtermId,
    pub line: usize,
}

/// A GO association with its qualifier properties.
#[derive(Debug, Clone)]
pub struct AssociationNode {
    pub feature: FeatureRef,
    pub uniquename: String,
    pub cvterm_id: CvtermId,
    pub rank: u32,
    pub is_not: bool,
    /// `(type, rank, value)`
    pub properties: Vec<(CvtermId, u32, String)>,
    pub line: usize,
}

/// The single product description of a feature.
#[derive(Debug, Clone)]
pub struct ProductNode {
    pub feature: FeatureRef,
    pub cvterm_id: CvtermId,
    pub name: String,
    pub line: usize,
}

/// Header lines replacing the organism's stored ones of the same kind.
#[derive(Debug, Clone)]
pub struct HeaderBlock {
    pub kind: HeaderKind,
    pub type_id: CvtermId,
    pub lines: Vec<String>,
}

/// A validated import unit, ready for the loader.
#[derive(Debug)]
pub struct FeatureGraph {
    pub organism: OrganismSpec,
    /// `None` when the organism is declared and does not exist yet.
    pub organism_id: Option<OrganismId>,
    pub nodes: IndexMap<String, FeatureNode>,
    pub edges: Vec<Edge>,
    pub associations: Vec<AssociationNode>,
    pub products: IndexMap<String, ProductNode>,
    pub headers: Option<HeaderBlock>,
    pub terms: EssentialTerms,
    pub superseded: u64,
}

impl FeatureGraph {
    pub fn node(&self, uniquename: &str) -> Option<&FeatureNode> {
        self.nodes.get(uniquename)
    }
}

pub struct GraphBuilder<'r, 'c> {
    resolver: &'r mut Resolver<'c>,
    terms: EssentialTerms,
    options: BuildOptions,
    organism: OrganismSpec,
    organism_id: Option<OrganismId>,
    nodes: IndexMap<String, FeatureNode>,
    edges: IndexMap<(String, String, RelationshipType), Edge>,
    associations: Vec<AssociationNode>,
    products: IndexMap<String, ProductNode>,
    /// Next rank per (feature, term).
    association_ranks: HashMap<(String, CvtermId), u32>,
    headers: Vec<HeaderRecord>,
    superseded: u64,
}

impl<'r, 'c> GraphBuilder<'r, 'c> {
    pub fn new(
        resolver: &'r mut Resolver<'c>,
        organism: OrganismSpec,
        options: BuildOptions,
    ) -> Result<Self> {
        let organism_id = match resolver.organism(&organism.abbreviation)? {
            Resolution::Resolved(id) => Some(id),
            Resolution::NotFound(_) if organism.declared.is_some() => None,
            Resolution::NotFound(key) => {
                return Err(ChadoError::ReferenceNotFound { line: None, key })
            }
        };
        let terms = resolver.essential_terms()?;
        Ok(Self {
            resolver,
            terms,
            options,
            organism,
            organism_id,
            nodes: IndexMap::new(),
            edges: IndexMap::new(),
            associations: Vec::new(),
            products: IndexMap::new(),
            association_ranks: HashMap::new(),
            headers: Vec::new(),
            superseded: 0,
        })
    }

    pub fn add(&mut self, record: Record) -> Result<()> {
        match record {
            Record::Feature(feature) => self.add_feature(feature),
            Record::Sequence(sequence) => self.add_sequence(sequence),
            Record::Association(association) => self.add_association(association),
            Record::Header(header) => {
                self.headers.push(header);
                Ok(())
            }
        }
    }

    fn add_feature(&mut self, record: FeatureRecord) -> Result<()> {
        let line = record.line;
        let type_id = self
            .resolver
            .cvterm(SEQUENCE_CV, &record.feature_type)?
            .require(Some(line))?;

        let mut properties = Vec::with_capacity(record.properties.len() + 2);
        if let Some(source) = record.source {
            properties.push((SOURCE_PROPERTY.to_string(), 0, self.terms.source, source));
        }
        if let Some(score) = record.score {
            properties.push((SCORE_PROPERTY.to_string(), 0, self.terms.score, score));
        }
        for property in record.properties {
            let type_id = self
                .resolver
                .cvterm(FEATURE_PROPERTY_CV, &property.key)?
                .require(Some(line))?;
            properties.push((property.key, property.rank, type_id, property.value));
        }
        let dbxrefs = record
            .dbxrefs
            .iter()
            .map(|key| self.resolver.dbxref(key)?.require(Some(line)))
            .collect::<Result<Vec<_>>>()?;
        let ontology_terms = record
            .ontology_terms
            .iter()
            .map(|key| {
                Ok(self
                    .resolver
                    .cvterm_by_accession(key)?
                    .require(Some(line))?
                    .id)
            })
            .collect::<Result<Vec<_>>>()?;
        let synonyms = record
            .synonyms
            .into_iter()
            .map(|synonym| {
                let type_id = self
                    .resolver
                    .cvterm(SYNONYM_TYPE_CV, synonym.kind.as_str())?
                    .require(Some(line))?;
                Ok(NodeSynonym {
                    kind: synonym.kind,
                    type_id,
                    name: synonym.name,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let uniquename = record.uniquename;
        self.ensure_node(&uniquename, line, NodeOrigin::Annotation, type_id, &record.feature_type)?;

        for parent in record.parents {
            let key = (
                uniquename.clone(),
                parent.uniquename.clone(),
                parent.relationship,
            );
            self.edges.entry(key).or_insert_with(|| Edge {
                subject: uniquename.clone(),
                object: FeatureRef::Batch(parent.uniquename.clone()),
                object_name: parent.uniquename,
                relationship: parent.relationship,
                type_id: self.terms.relationship(parent.relationship),
                line,
            });
        }

        let mut superseded = 0;
        let Some(node) = self.nodes.get_mut(&uniquename) else {
            return Ok(());
        };
        if let Some(name) = record.name {
            if let Some(previous) = node.name.as_ref().filter(|previous| **previous != name) {
                log_superseded(&uniquename, "Name", 0, previous, &name, node.line, line);
                superseded += 1;
            }
            node.name = Some(name);
        }
        if let Some(location) = record.location {
            let location = NodeLocation {
                srcfeature: FeatureRef::Batch(location.srcfeature.clone()),
                srcfeature_name: location.srcfeature,
                fmin: location.fmin,
                fmax: location.fmax,
                strand: location.strand,
                phase: location.phase,
                line,
            };
            if !node.locations.iter().any(|l| same_location(l, &location)) {
                node.locations.push(location);
            }
        }
        for (key, rank, type_id, value) in properties {
            superseded += merge_property(node, key, rank, type_id, value, line);
        }
        for dbxref in dbxrefs {
            if !node.dbxrefs.contains(&dbxref) {
                node.dbxrefs.push(dbxref);
            }
        }
        for term in ontology_terms {
            if !node.ontology_terms.contains(&term) {
                node.ontology_terms.push(term);
            }
        }
        for synonym in synonyms {
            if !node.synonyms.contains(&synonym) {
                node.synonyms.push(synonym);
            }
        }
        for publication in record.publications {
            if !node.publications.contains(&publication) {
                node.publications.push(publication);
            }
        }
        node.is_obsolete |= record.is_obsolete;
        self.superseded += superseded;
        Ok(())
    }

    fn add_sequence(&mut self, record: SequenceRecord) -> Result<()> {
        let line = record.line;
        let declared = match record.declared_type() {
            Some(type_name) => {
                let type_id = self
                    .resolver
                    .cvterm(SEQUENCE_CV, &type_name)?
                    .require(Some(line))?;
                Some((type_id, type_name))
            }
            None => None,
        };

        if !self.nodes.contains_key(&record.uniquename) {
            let persisted = self.persisted(&record.uniquename)?;
            let (type_id, type_name) = match (&declared, persisted) {
                (Some(declared), _) => declared.clone(),
                (None, Some(persisted)) => (persisted.type_id, persisted.type_name),
                (None, None) => {
                    let type_name = self.options.default_sequence_type.clone();
                    let type_id = self
                        .resolver
                        .cvterm(SEQUENCE_CV, &type_name)?
                        .require(Some(line))?;
                    (type_id, type_name)
                }
            };
            self.ensure_node(&record.uniquename, line, NodeOrigin::Sequence, type_id, &type_name)?;
        }

        let description_type = self.terms.sequence_description;
        let Some(node) = self.nodes.get_mut(&record.uniquename) else {
            return Ok(());
        };
        if let Some((type_id, type_name)) = declared {
            if node.type_id != type_id {
                if node.origin == NodeOrigin::Annotation {
                    return Err(ChadoError::conflict(
                        Some(line),
                        format!(
                            "sequence {} declares type '{}' but line {} types it '{}'",
                            node.uniquename, type_name, node.line, node.type_name
                        ),
                    ));
                }
                node.type_id = type_id;
                node.type_name = type_name;
            }
        }
        let mut superseded = 0;
        if let Some(previous) = node.residues.as_ref().filter(|r| **r != record.residues) {
            log_superseded(
                &record.uniquename,
                "residues",
                0,
                &format!("{} residues", previous.len()),
                &format!("{} residues", record.residues.len()),
                node.line,
                line,
            );
            superseded += 1;
        }
        node.residues = Some(record.residues);
        if let Some(description) = record.description {
            superseded += merge_property(
                node,
                SEQUENCE_DESCRIPTION_PROPERTY.to_string(),
                0,
                description_type,
                description,
                line,
            );
        }
        self.superseded += superseded;
        Ok(())
    }

    fn add_association(&mut self, record: AssociationRecord) -> Result<()> {
        let line = record.line;
        let feature = self.target(&record.object_id, line)?;
        let term = self
            .resolver
            .cvterm_by_accession(&record.term)?
            .require(Some(line))?;

        let rank = self
            .association_ranks
            .entry((record.object_id.clone(), term.id))
            .or_insert(0);
        let association_rank = *rank;
        *rank += 1;

        let evidence = expand_evidence_code(&record.evidence)
            .map(str::to_string)
            .unwrap_or_else(|| record.evidence.clone());

        let mut values: Vec<(&str, u32, String)> = vec![
            ("db", 0, record.db.clone()),
            ("symbol", 0, record.symbol.clone()),
            ("evidence", 0, evidence),
            ("aspect", 0, record.aspect.as_str().to_string()),
            ("object_type", 0, record.object_type.clone()),
            ("taxon", 0, record.taxon.clone()),
            ("date", 0, record.date.clone()),
            ("assigned_by", 0, record.assigned_by.clone()),
        ];
        for (key, list) in [
            ("qualifier", &record.qualifiers),
            ("reference", &record.references),
            ("with", &record.with_from),
            ("synonym", &record.synonyms),
        ] {
            values.extend(
                list.iter()
                    .enumerate()
                    .map(|(rank, value)| (key, rank as u32, value.clone())),
            );
        }
        if let Some(extension) = &record.annotation_extension {
            values.push(("annotation_extension", 0, extension.clone()));
        }
        if let Some(form) = &record.gene_product_form_id {
            values.push(("gene_product_form_id", 0, form.clone()));
        }

        let mut properties = Vec::with_capacity(values.len());
        for (key, rank, value) in values {
            let type_id = self
                .resolver
                .cvterm(ASSOCIATION_PROPERTY_CV, key)?
                .require(Some(line))?;
            properties.push((type_id, rank, value));
        }

        if let Some(product) = &record.object_name {
            let cvterm_id = self.resolver.cvterm(PRODUCT_CV, product)?.require(Some(line))?;
            if let Some(previous) = self
                .products
                .get(&record.object_id)
                .filter(|p| p.cvterm_id != cvterm_id)
            {
                log_superseded(&record.object_id, "product", 0, &previous.name, product, previous.line, line);
                self.superseded += 1;
            }
            self.products.insert(
                record.object_id.clone(),
                ProductNode {
                    feature: feature.clone(),
                    cvterm_id,
                    name: product.clone(),
                    line,
                },
            );
        }

        self.associations.push(AssociationNode {
            feature,
            uniquename: record.object_id,
            cvterm_id: term.id,
            rank: association_rank,
            is_not: record.is_not,
            properties,
            line,
        });
        Ok(())
    }

    fn ensure_node(
        &mut self,
        uniquename: &str,
        line: usize,
        origin: NodeOrigin,
        type_id: CvtermId,
        type_name: &str,
    ) -> Result<()> {
        if let Some(node) = self.nodes.get_mut(uniquename) {
            if origin == NodeOrigin::Sequence || node.type_id == type_id {
                return Ok(());
            }
            if node.origin == NodeOrigin::Annotation {
                return Err(ChadoError::conflict(
                    Some(line),
                    format!(
                        "feature {uniquename} is typed '{type_name}' but line {} types it '{}'",
                        node.line, node.type_name
                    ),
                ));
            }
            node.origin = NodeOrigin::Annotation;
            node.type_id = type_id;
            node.type_name = type_name.to_string();
            return Ok(());
        }

        let persisted = self.persisted(uniquename)?.map(|feature| feature.id);
        self.nodes.insert(
            uniquename.to_string(),
            FeatureNode {
                uniquename: uniquename.to_string(),
                origin,
                type_id,
                type_name: type_name.to_string(),
                name: None,
                residues: None,
                locations: Vec::new(),
                properties: BTreeMap::new(),
                dbxrefs: Vec::new(),
                ontology_terms: Vec::new(),
                synonyms: Vec::new(),
                publications: Vec::new(),
                is_obsolete: false,
                persisted,
                line,
            },
        );
        Ok(())
    }

    fn persisted(&mut self, uniquename: &str) -> Result<Option<PersistedFeature>> {
        match self.organism_id {
            Some(organism) => self.resolver.feature(organism, uniquename),
            None => Ok(None),
        }
    }

    /// A feature named by a record: in this batch, or already stored.
    fn target(&mut self, uniquename: &str, line: usize) -> Result<FeatureRef> {
        if self.nodes.contains_key(uniquename) {
            return Ok(FeatureRef::Batch(uniquename.to_string()));
        }
        match self.persisted(uniquename)? {
            Some(feature) => Ok(FeatureRef::Persisted(feature.id)),
            None => Err(ChadoError::ReferenceNotFound {
                line: Some(line),
                key: ReferenceKey::Feature {
                    organism: self.organism.abbreviation.clone(),
                    uniquename: uniquename.to_string(),
                },
            }),
        }
    }

    /// Validates the batch and hands it over.
    pub fn finish(mut self) -> Result<FeatureGraph> {
        let names: Vec<String> = self.nodes.keys().cloned().collect();
        for name in &names {
            let pending: Vec<(usize, String, usize)> = self.nodes[name.as_str()]
                .locations
                .iter()
                .enumerate()
                .map(|(index, l)| (index, l.srcfeature_name.clone(), l.line))
                .collect();
            for (index, srcfeature, line) in pending {
                let target = self.target(&srcfeature, line)?;
                if let Some(node) = self.nodes.get_mut(name.as_str()) {
                    node.locations[index].srcfeature = target;
                }
            }
        }

        let mut edges: Vec<Edge> = self.edges.values().cloned().collect();
        for edge in &mut edges {
            if edge.subject == edge.object_name {
                return Err(StructuralError::SelfParent {
                    uniquename: edge.subject.clone(),
                    line: edge.line,
                }
                .into());
            }
            edge.object = self.target(&edge.object_name, edge.line)?;
        }

        self.check_residue_lengths()?;
        self.check_acyclic()?;
        let headers = self.header_block()?;

        Ok(FeatureGraph {
            organism: self.organism,
            organism_id: self.organism_id,
            nodes: self.nodes,
            edges,
            associations: self.associations,
            products: self.products,
            headers,
            terms: self.terms,
            superseded: self.superseded,
        })
    }

    fn header_block(&mut self) -> Result<Option<HeaderBlock>> {
        let Some(kind) = self.options.header else {
            return Ok(None);
        };
        let type_id = self
            .resolver
            .cvterm(ORGANISM_PROPERTY_CV, kind.property())?
            .require(None)?;
        let lines = self
            .headers
            .drain(..)
            .filter(|header| header.kind == kind)
            .map(|header| header.text)
            .collect();
        Ok(Some(HeaderBlock {
            kind,
            type_id,
            lines,
        }))
    }

    fn check_residue_lengths(&self) -> Result<()> {
        for node in self.nodes.values() {
            let Some(residues) = &node.residues else {
                continue;
            };
            if node.locations.is_empty() {
                continue;
            }
            let span: i64 = node.locations.iter().map(|l| l.fmax - l.fmin).sum();
            let residue_count = residues.chars().count();
            if !FeatureKind::classify(&node.type_name).residues_fit_span(residue_count, span) {
                return Err(StructuralError::LengthMismatch {
                    uniquename: node.uniquename.clone(),
                    residues: residue_count,
                    span,
                    line: node.line,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Parents of `uniquename` in the graph as it will be once loaded.
    fn parents_of(
        &mut self,
        batch_parents: &HashMap<String, Vec<String>>,
        uniquename: &str,
    ) -> Result<Vec<String>> {
        let mut parents = batch_parents.get(uniquename).cloned().unwrap_or_default();
        let in_batch = self.nodes.get(uniquename).map(|node| node.persisted);
        let persisted = match in_batch {
            Some(persisted) => persisted,
            None => self.persisted(uniquename)?.map(|feature| feature.id),
        };
        if let Some(id) = persisted {
            for parent in self.resolver.persisted_parents(id)? {
                if !parents.contains(&parent) {
                    parents.push(parent);
                }
            }
        }
        Ok(parents)
    }

    fn check_acyclic(&mut self) -> Result<()> {
        struct Frame {
            name: String,
            parents: Vec<String>,
            next: usize,
        }

        let mut batch_parents: HashMap<String, Vec<String>> = HashMap::new();
        for edge in self.edges.values() {
            batch_parents
                .entry(edge.subject.clone())
                .or_default()
                .push(edge.object_name.clone());
        }

        let mut finished: HashSet<String> = HashSet::new();
        let mut on_stack: HashSet<String> = HashSet::new();
        let starts: Vec<String> = self.nodes.keys().cloned().collect();
        for start in starts {
            if finished.contains(&start) {
                continue;
            }
            let parents = self.parents_of(&batch_parents, &start)?;
            on_stack.insert(start.clone());
            let mut stack = vec![Frame {
                name: start,
                parents,
                next: 0,
            }];
            while let Some(frame) = stack.last_mut() {
                if frame.next == frame.parents.len() {
                    if let Some(done) = stack.pop() {
                        on_stack.remove(&done.name);
                        finished.insert(done.name);
                    }
                    continue;
                }
                let parent = frame.parents[frame.next].clone();
                frame.next += 1;

                if on_stack.contains(&parent) {
                    let position = stack.iter().position(|f| f.name == parent).unwrap_or(0);
                    let mut path: Vec<String> =
                        stack[position..].iter().map(|f| f.name.clone()).collect();
                    path.push(parent);
                    return Err(StructuralError::Cycle { path }.into());
                }
                if finished.contains(&parent) {
                    continue;
                }
                let parents = self.parents_of(&batch_parents, &parent)?;
                on_stack.insert(parent.clone());
                stack.push(Frame {
                    name: parent,
                    parents,
                    next: 0,
                });
            }
        }
        Ok(())
    }
}

/// Builds the graph of one import unit from a record stream.
pub fn build_graph<I>(
    resolver: &mut Resolver<'_>,
    organism: OrganismSpec,
    options: BuildOptions,
    records: I,
    cancel: &CancelToken,
) -> Result<FeatureGraph>
where
    I: IntoIterator<Item = Result<Record>>,
{
    let mut builder = GraphBuilder::new(resolver, organism, options)?;
    for record in records {
        cancel.check()?;
        builder.add(record?)?;
    }
    builder.finish()
}

fn same_location(a: &NodeLocation, b: &NodeLocation) -> bool {
    a.srcfeature_name == b.srcfeature_name
        && a.fmin == b.fmin
        && a.fmax == b.fmax
        && a.strand == b.strand
        && a.phase == b.phase
}

/// Stores one property value; returns 1 when it replaced a different value.
fn merge_property(
    node: &mut FeatureNode,
    key: String,
    rank: u32,
    type_id: CvtermId,
    value: String,
    line: usize,
) -> u64 {
    let replaced = match node.properties.get(&(key.clone(), rank)) {
        Some(previous) if previous.value != value => {
            log_superseded(&node.uniquename, &key, rank, &previous.value, &value, previous.line, line);
            1
        }
        _ => 0,
    };
    node.properties.insert(
        (key, rank),
        NodeProperty {
            type_id,
            value,
            line,
        },
    );
    replaced
}

fn log_superseded(
    feature: &str,
    property: &str,
    rank: u32,
    old: &str,
    new: &str,
    old_line: usize,
    new_line: usize,
) {
    tracing::warn!(
        feature,
        property,
        rank,
        old,
        new,
        old_line,
        new_line,
        "Superseded value replaced by a later record"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::formats::gaf;
    use crate::formats::gff::parse_line;
    use rusqlite::Connection;

    const GAF_GENE: &str = "chr1\t.\tgene\t1\t10\t.\t+\t.\tID=PF3D7_0100100";

    fn with_resolver(f: impl FnOnce(&mut Resolver<'_>, &Connection)) {
        let db = Database::open_memory().unwrap();
        db.migrate().unwrap();
        db.with_connection(|conn| {
            conn.execute(
                "INSERT INTO organism (abbreviation, genus, species) VALUES ('Pfalciparum', 'Plasmodium', 'falciparum')",
                [],
            )?;
            let mut resolver = Resolver::new(conn, [FEATURE_PROPERTY_CV, ASSOCIATION_PROPERTY_CV]);
            f(&mut resolver, conn);
            Ok(())
        })
        .unwrap();
    }

    fn gff(lines: &[&str]) -> Vec<Result<Record>> {
        lines
            .iter()
            .enumerate()
            .map(|(index, text)| parse_line(index + 1, text).map(Record::Feature))
            .collect()
    }

    fn build(resolver: &mut Resolver<'_>, records: Vec<Result<Record>>) -> Result<FeatureGraph> {
        build_with(resolver, BuildOptions::default(), records)
    }

    fn build_with(
        resolver: &mut Resolver<'_>,
        options: BuildOptions,
        records: Vec<Result<Record>>,
    ) -> Result<FeatureGraph> {
        build_graph(
            resolver,
            OrganismSpec::existing("Pfalciparum"),
            options,
            records,
            &CancelToken::new(),
        )
    }

    fn seed_go_terms(conn: &Connection) {
        conn.execute_batch(
            "INSERT INTO cv (name) VALUES ('cellular_component');
             INSERT INTO dbxref (db_id, accession) SELECT db_id, '0020002' FROM db WHERE name = 'GO';
             INSERT INTO dbxref (db_id, accession) SELECT db_id, '0005515' FROM db WHERE name = 'GO';
             INSERT INTO cvterm (cv_id, name, dbxref_id)
                 SELECT cv.cv_id, 'host cell plasma membrane', dbxref.dbxref_id FROM cv, dbxref
                 WHERE cv.name = 'cellular_component' AND dbxref.accession = '0020002';
             INSERT INTO cvterm (cv_id, name, dbxref_id)
                 SELECT cv.cv_id, 'protein binding', dbxref.dbxref_id FROM cv, dbxref
                 WHERE cv.name = 'cellular_component' AND dbxref.accession = '0005515';",
        )
        .unwrap();
    }

    fn gaf_line(line: usize, term: &str, evidence: &str) -> Result<Record> {
        let text = format!(
            "GeneDB\tPF3D7_0100100\tVAR\t\t{term}\tPMID:1\t{evidence}\t\tC\t\t\tgene\ttaxon:36329\t20210311\tGeneDB"
        );
        gaf::parse_line(line, &text).map(Record::Association)
    }

    #[test]
    fn merges_records_sharing_a_uniquename() {
        with_resolver(|resolver, _| {
            let graph = build(
                resolver,
                gff(&[
                    "chr1\t.\tchromosome\t1\t100\t.\t.\t.\tID=chr1",
                    "chr1\t.\tCDS\t1\t10\t.\t+\t0\tID=cds1;Note=first",
                    "chr1\t.\tCDS\t21\t30\t.\t+\t0\tID=cds1;Note=second",
                ]),
            )
            .unwrap();

            let cds = graph.node("cds1").unwrap();
            assert_eq!(cds.locations.len(), 2);
            assert_eq!(cds.properties[&("Note".to_string(), 0)].value, "second");
            assert_eq!(graph.superseded, 1);
            assert_eq!(graph.nodes.len(), 2);
        });
    }

    #[test]
    fn rejects_a_feature_that_is_its_own_parent() {
        with_resolver(|resolver, _| {
            let err = build(
                resolver,
                gff(&["chr1\t.\tgene\t1\t10\t.\t+\t.\tID=chr1;Parent=chr1"]),
            )
            .unwrap_err();
            assert!(matches!(
                err,
                ChadoError::Structural(StructuralError::SelfParent { .. })
            ));
        });
    }

    #[test]
    fn rejects_a_transitive_cycle() {
        with_resolver(|resolver, _| {
            let err = build(
                resolver,
                gff(&[
                    "chr1\t.\tgene\t1\t10\t.\t+\t.\tID=a;Parent=c",
                    "chr1\t.\tmRNA\t1\t10\t.\t+\t.\tID=b;Parent=a",
                    "chr1\t.\texon\t1\t10\t.\t+\t.\tID=c;Parent=b",
                    "chr1\t.\tchromosome\t1\t10\t.\t.\t.\tID=chr1",
                ]),
            )
            .unwrap_err();
            match err {
                ChadoError::Structural(StructuralError::Cycle { path }) => {
                    assert_eq!(path, vec!["a", "c", "b", "a"]);
                }
                other => panic!("expected a cycle, got {other}"),
            }
        });
    }

    #[test]
    fn detects_cycles_through_stored_edges() {
        with_resolver(|resolver, conn| {
            conn.execute_batch(
                "INSERT INTO feature (organism_id, uniquename, type_id, timeaccessioned, timelastmodified)
                 VALUES (1, 'stored_gene', (SELECT cvterm_id FROM cvterm WHERE name = 'gene'), 'now', 'now');
                 INSERT INTO feature (organism_id, uniquename, type_id, timeaccessioned, timelastmodified)
                 VALUES (1, 'stored_tx', (SELECT cvterm_id FROM cvterm WHERE name = 'mRNA'), 'now', 'now');
                 INSERT INTO feature_relationship (subject_id, object_id, type_id) VALUES (
                     (SELECT feature_id FROM feature WHERE uniquename = 'stored_tx'),
                     (SELECT feature_id FROM feature WHERE uniquename = 'stored_gene'),
                     (SELECT cvterm_id FROM cvterm WHERE name = 'part_of'));",
            )
            .unwrap();

            let err = build(
                resolver,
                gff(&[
                    "chr1\t.\tchromosome\t1\t10\t.\t.\t.\tID=chr1",
                    "chr1\t.\tgene\t1\t10\t.\t+\t.\tID=stored_gene;Parent=stored_tx",
                ]),
            )
            .unwrap_err();
            assert!(matches!(
                err,
                ChadoError::Structural(StructuralError::Cycle { .. })
            ));
        });
    }

    #[test]
    fn unresolved_parent_names_the_line() {
        with_resolver(|resolver, _| {
            let err = build(
                resolver,
                gff(&[
                    "chr1\t.\tchromosome\t1\t10\t.\t.\t.\tID=chr1",
                    "chr1\t.\tmRNA\t1\t10\t.\t+\t.\tID=tx1;Parent=missing_gene",
                ]),
            )
            .unwrap_err();
            assert_eq!(
                err.to_string(),
                "line 2: reference not found: feature 'missing_gene' of organism 'Pfalciparum'"
            );
        });
    }

    #[test]
    fn parents_may_appear_later_in_the_batch() {
        with_resolver(|resolver, _| {
            let graph = build(
                resolver,
                gff(&[
                    "chr1\t.\texon\t1\t10\t.\t+\t.\tID=exon1;Parent=tx1",
                    "chr1\t.\tmRNA\t1\t10\t.\t+\t.\tID=tx1",
                    "chr1\t.\tchromosome\t1\t10\t.\t.\t.\tID=chr1",
                ]),
            )
            .unwrap();
            assert_eq!(graph.edges.len(), 1);
            assert_eq!(graph.edges[0].object, FeatureRef::Batch("tx1".into()));
        });
    }

    #[test]
    fn conflicting_types_are_rejected() {
        with_resolver(|resolver, _| {
            let err = build(
                resolver,
                gff(&[
                    "chr1\t.\tchromosome\t1\t10\t.\t.\t.\tID=chr1",
                    "chr1\t.\tgene\t1\t10\t.\t+\t.\tID=g1",
                    "chr1\t.\tmRNA\t1\t10\t.\t+\t.\tID=g1",
                ]),
            )
            .unwrap_err();
            assert!(matches!(err, ChadoError::Conflict { line: Some(3), .. }));
        });
    }

    #[test]
    fn residues_must_fit_the_location() {
        with_resolver(|resolver, _| {
            let mut records = gff(&["chr1\t.\tchromosome\t1\t8\t.\t.\t.\tID=chr1"]);
            records.push(Ok(Record::Sequence(SequenceRecord {
                line: 3,
                uniquename: "chr1".into(),
                description: None,
                residues: "ACGT".into(),
            })));
            let err = build(resolver, records).unwrap_err();
            assert!(matches!(
                err,
                ChadoError::Structural(StructuralError::LengthMismatch { residues: 4, span: 8, .. })
            ));
        });
    }

    #[test]
    fn obsolete_features_stay_in_the_graph() {
        with_resolver(|resolver, _| {
            let graph = build(
                resolver,
                gff(&["chr1\t.\tchromosome\t1\t10\t.\t.\t.\tID=chr1;is_obsolete=true"]),
            )
            .unwrap();
            assert!(graph.node("chr1").unwrap().is_obsolete);
        });
    }

    #[test]
    fn association_ranks_count_per_feature_and_term() {
        with_resolver(|resolver, conn| {
            seed_go_terms(conn);
            let mut records = gff(&[GAF_GENE]);
            records.push(gaf_line(2, "GO:0005515", "IPI"));
            records.push(gaf_line(3, "GO:0020002", "IDA"));
            records.push(gaf_line(4, "GO:0005515", "IDA"));

            let graph = build(resolver, records).unwrap();
            let ranks: Vec<(usize, u32)> = graph
                .associations
                .iter()
                .map(|association| (association.line, association.rank))
                .collect();
            assert_eq!(ranks, vec![(2, 0), (3, 0), (4, 1)]);
        });
    }

    #[test]
    fn unknown_go_term_names_the_line() {
        with_resolver(|resolver, conn| {
            seed_go_terms(conn);
            let mut records = gff(&[GAF_GENE]);
            records.push(gaf_line(2, "GO:9999999", "IDA"));

            let err = build(resolver, records).unwrap_err();
            match err {
                ChadoError::ReferenceNotFound {
                    line: Some(2),
                    key: ReferenceKey::Accession { db, accession },
                } => {
                    assert_eq!(db, "GO");
                    assert_eq!(accession, "9999999");
                }
                other => panic!("expected a missing accession, got {other}"),
            }
        });
    }

    #[test]
    fn long_parent_chains_are_checked() {
        with_resolver(|resolver, _| {
            let mut lines = vec!["chr1\t.\tchromosome\t1\t10\t.\t.\t.\tID=chr1".to_string()];
            lines.push("chr1\t.\tregion\t1\t10\t.\t+\t.\tID=f0".to_string());
            for index in 1..20_000 {
                lines.push(format!(
                    "chr1\t.\tregion\t1\t10\t.\t+\t.\tID=f{index};Parent=f{}",
                    index - 1
                ));
            }
            let texts: Vec<&str> = lines.iter().map(String::as_str).collect();

            let graph = build(resolver, gff(&texts)).unwrap();
            assert_eq!(graph.nodes.len(), 20_001);
            assert_eq!(graph.edges.len(), 19_999);
        });
    }

    #[test]
    fn long_cycles_are_reported() {
        with_resolver(|resolver, _| {
            let mut lines = vec!["chr1\t.\tchromosome\t1\t10\t.\t.\t.\tID=chr1".to_string()];
            for index in 0..5_000 {
                lines.push(format!(
                    "chr1\t.\tregion\t1\t10\t.\t+\t.\tID=f{index};Parent=f{}",
                    (index + 1) % 5_000
                ));
            }
            let texts: Vec<&str> = lines.iter().map(String::as_str).collect();

            let err = build(resolver, gff(&texts)).unwrap_err();
            match err {
                ChadoError::Structural(StructuralError::Cycle { path }) => {
                    assert_eq!(path.len(), 5_001);
                    assert_eq!(path.first(), path.last());
                }
                other => panic!("expected a cycle, got {other}"),
            }
        });
    }

    #[test]
    fn keeps_headers_only_when_asked() {
        with_resolver(|resolver, _| {
            let header = || {
                Ok(Record::Header(HeaderRecord {
                    line: 1,
                    kind: HeaderKind::GffDirective,
                    text: "##sequence-region chr1 1 10".into(),
                }))
            };
            let mut records = vec![header()];
            records.extend(gff(&["chr1\t.\tchromosome\t1\t10\t.\t.\t.\tID=chr1"]));
            let options = BuildOptions {
                header: Some(HeaderKind::GffDirective),
                ..BuildOptions::default()
            };
            let graph = build_with(resolver, options, records).unwrap();
            let headers = graph.headers.unwrap();
            assert_eq!(headers.kind, HeaderKind::GffDirective);
            assert_eq!(headers.lines, vec!["##sequence-region chr1 1 10".to_string()]);

            let graph = build(resolver, vec![header()]).unwrap();
            assert!(graph.headers.is_none());
        });
    }

    #[test]
    fn merges_synonyms_and_literature() {
        with_resolver(|resolver, _| {
            let graph = build(
                resolver,
                gff(&[
                    "chr1\t.\tchromosome\t1\t10\t.\t.\t.\tID=chr1",
                    "chr1\t.\tCDS\t1\t4\t.\t+\t0\tID=cds1;Alias=VAR1;literature=PMID:1",
                    "chr1\t.\tCDS\t7\t10\t.\t+\t0\tID=cds1;Alias=VAR1,VAR2;previous_systematic_id=PFA0005w;literature=PMID:1",
                ]),
            )
            .unwrap();

            let cds = graph.node("cds1").unwrap();
            let synonyms: Vec<(SynonymKind, &str)> = cds
                .synonyms
                .iter()
                .map(|synonym| (synonym.kind, synonym.name.as_str()))
                .collect();
            assert_eq!(
                synonyms,
                vec![
                    (SynonymKind::Alias, "VAR1"),
                    (SynonymKind::Alias, "VAR2"),
                    (SynonymKind::PreviousSystematicId, "PFA0005w"),
                ]
            );
            assert_eq!(cds.publications, vec!["PMID:1".to_string()]);
        });
    }

    #[test]
    fn unknown_organism_without_names_is_a_reference_error() {
        with_resolver(|resolver, _| {
            let err = build_graph(
                resolver,
                OrganismSpec::existing("Pvivax"),
                BuildOptions::default(),
                Vec::new(),
                &CancelToken::new(),
            )
            .unwrap_err();
            assert!(matches!(err, ChadoError::ReferenceNotFound { line: None, .. }));
        });
    }
}
