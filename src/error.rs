use std::fmt;

use thiserror::Error;

use crate::formats::Dialect;

pub type Result<T> = std::result::Result<T, ChadoError>;

/// Every way an import or export unit can fail.
///
/// The variants follow the order in which failures surface: the parser
/// raises `Syntax`, the resolver and builder raise `ReferenceNotFound`,
/// `Structural` and `Conflict`, and the loader surfaces `Store`. Any of
/// them aborts the unit and rolls the transaction back.
#[derive(Debug, Error)]
pub enum ChadoError {
    #[error("malformed {dialect} record at line {line}: {message}")]
    Syntax {
        dialect: Dialect,
        line: usize,
        message: String,
    },

    #[error("{}reference not found: {key}", line_prefix(.line))]
    ReferenceNotFound {
        line: Option<usize>,
        key: ReferenceKey,
    },

    #[error("structural error: {0}")]
    Structural(#[from] StructuralError),

    #[error("{}conflict: {message}", line_prefix(.line))]
    Conflict {
        line: Option<usize>,
        message: String,
    },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("import cancelled, transaction rolled back")]
    Cancelled,

    #[error("database lock poisoned")]
    LockPoisoned,
}

impl ChadoError {
    pub fn syntax(dialect: Dialect, line: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            dialect,
            line,
            message: message.into(),
        }
    }

    pub fn conflict(line: Option<usize>, message: impl Into<String>) -> Self {
        Self::Conflict {
            line,
            message: message.into(),
        }
    }

    /// Source line the failure points at, when there is one.
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Syntax { line, .. } => Some(*line),
            Self::ReferenceNotFound { line, .. } | Self::Conflict { line, .. } => *line,
            Self::Structural(err) => err.line(),
            _ => None,
        }
    }
}

fn line_prefix(line: &Option<usize>) -> String {
    line.map(|l| format!("line {l}: ")).unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum StructuralError {
    #[error("relationship cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("line {line}: feature {uniquename} is declared as its own parent")]
    SelfParent { uniquename: String, line: usize },

    #[error(
        "feature {uniquename} has {residues} residues but its locations span {span} bases"
    )]
    LengthMismatch {
        uniquename: String,
        residues: usize,
        span: i64,
        line: usize,
    },
}

impl StructuralError {
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Cycle { .. } => None,
            Self::SelfParent { line, .. } | Self::LengthMismatch { line, .. } => Some(*line),
        }
    }
}

/// The natural key of a lookup that did not resolve.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReferenceKey {
    Organism(String),
    Db(String),
    Cv(String),
    CvTerm { cv: String, name: String },
    Accession { db: String, accession: String },
    Feature { organism: String, uniquename: String },
    Pub(String),
}

impl fmt::Display for ReferenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Organism(abbreviation) => write!(f, "organism '{abbreviation}'"),
            Self::Db(name) => write!(f, "db '{name}'"),
            Self::Cv(name) => write!(f, "cv '{name}'"),
            Self::CvTerm { cv, name } => write!(f, "cv term '{name}' in cv '{cv}'"),
            Self::Accession { db, accession } => write!(f, "term accession '{db}:{accession}'"),
            Self::Feature {
                organism,
                uniquename,
            } => write!(f, "feature '{uniquename}' of organism '{organism}'"),
            Self::Pub(uniquename) => write!(f, "publication '{uniquename}'"),
        }
    }
}
