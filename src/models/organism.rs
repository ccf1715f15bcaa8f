use serde::{Deserialize, Serialize};

use super::OrganismId;

/// A persisted organism row.
#[derive(Debug, Clone, Serialize)]
pub struct Organism {
    pub id: OrganismId,
    pub abbreviation: String,
    pub genus: String,
    pub species: String,
    /// Strain or other infraspecific name.
    pub infraspecific_name: Option<String>,
}

/// The organism an import unit targets.
///
/// Without `declared` names the organism must already exist. With them the
/// loader creates it when the abbreviation is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganismSpec {
    pub abbreviation: String,
    pub declared: Option<OrganismNames>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganismNames {
    pub genus: String,
    pub species: String,
    pub strain: Option<String>,
}

impl OrganismSpec {
    pub fn existing(abbreviation: impl Into<String>) -> Self {
        Self {
            abbreviation: abbreviation.into(),
            declared: None,
        }
    }

    pub fn declared(
        abbreviation: impl Into<String>,
        genus: impl Into<String>,
        species: impl Into<String>,
        strain: Option<String>,
    ) -> Self {
        Self {
            abbreviation: abbreviation.into(),
            declared: Some(OrganismNames {
                genus: genus.into(),
                species: species.into(),
                strain,
            }),
        }
    }
}
