//! Domain models for chado-io.
//!
//! # Core Concepts
//!
//! ## Persisted Identities
//!
//! Rows of the Chado store are referred to through typed surrogate keys
//! ([`FeatureId`], [`CvtermId`], ...). They only ever come out of the store,
//! never out of a file.
//!
//! ## Intermediate Records
//!
//! Parsers turn each dialect into [`Record`]s and the exporter turns the
//! store back into the same records. A record knows nothing about surrogate
//! keys; it names everything by its natural key.
//!
//! ## Vocabulary
//!
//! Fixed vocabulary names and the closed sets of relationship types and
//! feature kinds live in [`RelationshipType`] and [`FeatureKind`].

mod cv;
mod dbxref;
mod ids;
mod organism;
mod record;
mod report;

pub use cv::*;
pub use dbxref::*;
pub use ids::*;
pub use organism::*;
pub use record::*;
pub use report::*;
