//! Identity Resolver: natural keys to surrogate keys.
//!
//! A [`Resolver`] lives for one import or export session and caches every
//! key it resolves. Only vocabularies marked extensible get rows created on
//! first use; organisms, dbs, features and every other vocabulary are
//! looked up or reported as [`Resolution::NotFound`].

use std::collections::{HashMap, HashSet};

use rusqlite::{Connection, OptionalExtension};

use crate::error::{ChadoError, ReferenceKey, Result};
use crate::models::*;

/// Outcome of a lookup that may legitimately miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<T> {
    Resolved(T),
    NotFound(ReferenceKey),
}

impl<T> Resolution<T> {
    /// Turns a miss into a reference error pointing at `line`.
    pub fn require(self, line: Option<usize>) -> Result<T> {
        match self {
            Self::Resolved(value) => Ok(value),
            Self::NotFound(key) => Err(ChadoError::ReferenceNotFound { line, key }),
        }
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Self::Resolved(value) => Some(value),
            Self::NotFound(_) => None,
        }
    }
}

/// A feature already in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedFeature {
    pub id: FeatureId,
    pub type_id: CvtermId,
    pub type_name: String,
}

/// A cv term reached through its accession.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermRef {
    pub id: CvtermId,
    pub name: String,
    pub cv: String,
}

/// Terms every import needs, resolved once per session.
#[derive(Debug, Clone, Copy)]
pub struct EssentialTerms {
    pub part_of: CvtermId,
    pub derives_from: CvtermId,
    pub is_a: CvtermId,
    pub source: CvtermId,
    pub score: CvtermId,
    pub sequence_description: CvtermId,
    /// Publication synonyms are filed under.
    pub null_pub: PubId,
    /// Type given to publications created from `literature`.
    pub pub_type: CvtermId,
}

impl EssentialTerms {
    pub fn relationship(&self, relationship: RelationshipType) -> CvtermId {
        match relationship {
            RelationshipType::PartOf => self.part_of,
            RelationshipType::DerivesFrom => self.derives_from,
            RelationshipType::IsA => self.is_a,
        }
    }
}

pub struct Resolver<'c> {
    conn: &'c Connection,
    extensible: HashSet<String>,
    organisms: HashMap<String, OrganismId>,
    dbs: HashMap<String, DbId>,
    cvs: HashMap<String, CvId>,
    cvterms: HashMap<(String, String), CvtermId>,
    accessions: HashMap<(String, String), TermRef>,
    dbxrefs: HashMap<DbxrefKey, DbxrefId>,
    features: HashMap<(OrganismId, String), Option<PersistedFeature>>,
    parents: HashMap<FeatureId, Vec<String>>,
    created: u64,
}

impl<'c> Resolver<'c> {
    pub fn new<I, S>(conn: &'c Connection, extensible: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            conn,
            extensible: extensible.into_iter().map(Into::into).collect(),
            organisms: HashMap::new(),
            dbs: HashMap::new(),
            cvs: HashMap::new(),
            cvterms: HashMap::new(),
            accessions: HashMap::new(),
            dbxrefs: HashMap::new(),
            features: HashMap::new(),
            parents: HashMap::new(),
            created: 0,
        }
    }

    pub fn is_extensible(&self, cv: &str) -> bool {
        self.extensible.contains(cv)
    }

    /// Rows created so far in this session.
    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn essential_terms(&mut self) -> Result<EssentialTerms> {
        Ok(EssentialTerms {
            part_of: self.relationship(RelationshipType::PartOf)?,
            derives_from: self.relationship(RelationshipType::DerivesFrom)?,
            is_a: self.relationship(RelationshipType::IsA)?,
            source: self.cvterm(FEATURE_PROPERTY_CV, SOURCE_PROPERTY)?.require(None)?,
            score: self.cvterm(FEATURE_PROPERTY_CV, SCORE_PROPERTY)?.require(None)?,
            sequence_description: self
                .cvterm(FEATURE_PROPERTY_CV, SEQUENCE_DESCRIPTION_PROPERTY)?
                .require(None)?,
            null_pub: self.null_pub()?,
            pub_type: self.cvterm(PUB_TYPE_CV, "unfetched")?.require(None)?,
        })
    }

    fn null_pub(&self) -> Result<PubId> {
        self.conn
            .query_row("SELECT pub_id FROM pub WHERE uniquename = ?", [NULL_PUB], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or_else(|| ChadoError::ReferenceNotFound {
                line: None,
                key: ReferenceKey::Pub(NULL_PUB.to_string()),
            })
    }

    fn relationship(&mut self, relationship: RelationshipType) -> Result<CvtermId> {
        self.cvterm(RELATIONSHIP_CV, relationship.as_str())?
            .require(None)
    }

    // ============================================================
    // Reference data
    // ============================================================

    pub fn organism(&mut self, abbreviation: &str) -> Result<Resolution<OrganismId>> {
        if let Some(id) = self.organisms.get(abbreviation) {
            return Ok(Resolution::Resolved(*id));
        }
        let found: Option<OrganismId> = self
            .conn
            .query_row(
                "SELECT organism_id FROM organism WHERE abbreviation = ?",
                [abbreviation],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match found {
            Some(id) => {
                self.organisms.insert(abbreviation.to_string(), id);
                Resolution::Resolved(id)
            }
            None => Resolution::NotFound(ReferenceKey::Organism(abbreviation.to_string())),
        })
    }

    pub fn db(&mut self, name: &str) -> Result<Resolution<DbId>> {
        if let Some(id) = self.dbs.get(name) {
            return Ok(Resolution::Resolved(*id));
        }
        let found: Option<DbId> = self
            .conn
            .query_row("SELECT db_id FROM db WHERE name = ?", [name], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(match found {
            Some(id) => {
                self.dbs.insert(name.to_string(), id);
                Resolution::Resolved(id)
            }
            None => Resolution::NotFound(ReferenceKey::Db(name.to_string())),
        })
    }

    pub fn cv(&mut self, name: &str) -> Result<Resolution<CvId>> {
        if let Some(id) = self.cvs.get(name) {
            return Ok(Resolution::Resolved(*id));
        }
        let found: Option<CvId> = self
            .conn
            .query_row("SELECT cv_id FROM cv WHERE name = ?", [name], |row| {
                row.get(0)
            })
            .optional()?;
        let id = match found {
            Some(id) => id,
            None if self.is_extensible(name) => {
                self.conn
                    .execute("INSERT INTO cv (name) VALUES (?)", [name])?;
                self.created += 1;
                tracing::debug!(cv = name, "Created extensible cv");
                CvId(self.conn.last_insert_rowid())
            }
            None => return Ok(Resolution::NotFound(ReferenceKey::Cv(name.to_string()))),
        };
        self.cvs.insert(name.to_string(), id);
        Ok(Resolution::Resolved(id))
    }

    /// Term by vocabulary and name, created when the vocabulary is extensible.
    pub fn cvterm(&mut self, cv: &str, name: &str) -> Result<Resolution<CvtermId>> {
        let key = (cv.to_string(), name.to_string());
        if let Some(id) = self.cvterms.get(&key) {
            return Ok(Resolution::Resolved(*id));
        }
        let not_found = || {
            Resolution::NotFound(ReferenceKey::CvTerm {
                cv: cv.to_string(),
                name: name.to_string(),
            })
        };

        let found: Option<CvtermId> = self
            .conn
            .prepare_cached(
                "SELECT cvterm.cvterm_id FROM cvterm JOIN cv ON cv.cv_id = cvterm.cv_id
                 WHERE cv.name = ? AND cvterm.name = ? AND cvterm.is_obsolete = 0",
            )?
            .query_row([cv, name], |row| row.get(0))
            .optional()?;

        let id = match found {
            Some(id) => id,
            None if self.is_extensible(cv) => self.create_cvterm(cv, name)?,
            None => return Ok(not_found()),
        };
        self.cvterms.insert(key, id);
        Ok(Resolution::Resolved(id))
    }

    fn create_cvterm(&mut self, cv: &str, name: &str) -> Result<CvtermId> {
        let cv_id = self.cv(cv)?.require(None)?;
        let dbxref = DbxrefKey::new(INTERNAL_DB, format!("{cv}:{name}"));
        let dbxref_id = self.dbxref(&dbxref)?.require(None)?;
        self.conn.execute(
            "INSERT INTO cvterm (cv_id, name, dbxref_id) VALUES (?, ?, ?)",
            (cv_id, name, dbxref_id),
        )?;
        self.created += 1;
        tracing::debug!(cv, term = name, "Created extensible cv term");
        Ok(CvtermId(self.conn.last_insert_rowid()))
    }

    /// Term whose dbxref is `key`, for instance `GO:0005515`. Never created.
    pub fn cvterm_by_accession(&mut self, key: &DbxrefKey) -> Result<Resolution<TermRef>> {
        let cache_key = (key.db.clone(), key.accession.clone());
        if let Some(term) = self.accessions.get(&cache_key) {
            return Ok(Resolution::Resolved(term.clone()));
        }
        let found = self
            .conn
            .prepare_cached(
                "SELECT cvterm.cvterm_id, cvterm.name, cv.name
                 FROM cvterm
                 JOIN cv ON cv.cv_id = cvterm.cv_id
                 JOIN dbxref ON dbxref.dbxref_id = cvterm.dbxref_id
                 JOIN db ON db.db_id = dbxref.db_id
                 WHERE db.name = ? AND dbxref.accession = ?
                 ORDER BY cvterm.is_obsolete, cvterm.cvterm_id
                 LIMIT 1",
            )?
            .query_row([&key.db, &key.accession], |row| {
                Ok(TermRef {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    cv: row.get(2)?,
                })
            })
            .optional()?;
        Ok(match found {
            Some(term) => {
                self.accessions.insert(cache_key, term.clone());
                Resolution::Resolved(term)
            }
            None => Resolution::NotFound(ReferenceKey::Accession {
                db: key.db.clone(),
                accession: key.accession.clone(),
            }),
        })
    }

    /// Accession under an existing db, created when new.
    pub fn dbxref(&mut self, key: &DbxrefKey) -> Result<Resolution<DbxrefId>> {
        if let Some(id) = self.dbxrefs.get(key) {
            return Ok(Resolution::Resolved(*id));
        }
        let db_id = match self.db(&key.db)? {
            Resolution::Resolved(id) => id,
            Resolution::NotFound(missing) => return Ok(Resolution::NotFound(missing)),
        };
        let found: Option<DbxrefId> = self
            .conn
            .prepare_cached(
                "SELECT dbxref_id FROM dbxref WHERE db_id = ? AND accession = ? AND version = ?",
            )?
            .query_row((db_id, &key.accession, &key.version), |row| row.get(0))
            .optional()?;
        let id = match found {
            Some(id) => id,
            None => {
                self.conn.execute(
                    "INSERT INTO dbxref (db_id, accession, version) VALUES (?, ?, ?)",
                    (db_id, &key.accession, &key.version),
                )?;
                self.created += 1;
                DbxrefId(self.conn.last_insert_rowid())
            }
        };
        self.dbxrefs.insert(key.clone(), id);
        Ok(Resolution::Resolved(id))
    }

    // ============================================================
    // Persisted features
    // ============================================================

    /// Feature of `organism` stored under `uniquename`. Misses are cached too.
    pub fn feature(
        &mut self,
        organism: OrganismId,
        uniquename: &str,
    ) -> Result<Option<PersistedFeature>> {
        let key = (organism, uniquename.to_string());
        if let Some(cached) = self.features.get(&key) {
            return Ok(cached.clone());
        }
        let found = self
            .conn
            .prepare_cached(
                "SELECT feature.feature_id, feature.type_id, cvterm.name
                 FROM feature JOIN cvterm ON cvterm.cvterm_id = feature.type_id
                 WHERE feature.organism_id = ? AND feature.uniquename = ?",
            )?
            .query_row((organism, uniquename), |row| {
                Ok(PersistedFeature {
                    id: row.get(0)?,
                    type_id: row.get(1)?,
                    type_name: row.get(2)?,
                })
            })
            .optional()?;
        self.features.insert(key, found.clone());
        Ok(found)
    }

    /// Uniquenames of the objects of every stored edge leaving `feature`.
    pub fn persisted_parents(&mut self, feature: FeatureId) -> Result<Vec<String>> {
        if let Some(parents) = self.parents.get(&feature) {
            return Ok(parents.clone());
        }
        let parents = self
            .conn
            .prepare_cached(
                "SELECT object.uniquename
                 FROM feature_relationship
                 JOIN feature object ON object.feature_id = feature_relationship.object_id
                 WHERE feature_relationship.subject_id = ?
                 ORDER BY object.uniquename",
            )?
            .query_map([feature], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        self.parents.insert(feature, parents.clone());
        Ok(parents)
    }
}
