use std::fmt;

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::Serialize;

macro_rules! surrogate_id {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {$(
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                self.0.to_sql()
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    )*};
}

surrogate_id!(
    /// `organism.organism_id`
    OrganismId,
    /// `db.db_id`
    DbId,
    /// `dbxref.dbxref_id`
    DbxrefId,
    /// `cv.cv_id`
    CvId,
    /// `cvterm.cvterm_id`
    CvtermId,
    /// `feature.feature_id`
    FeatureId,
    /// `feature_cvterm.feature_cvterm_id`
    FeatureCvtermId,
    /// `pub.pub_id`
    PubId,
    /// `synonym.synonym_id`
    SynonymId,
);
