use serde::{Deserialize, Serialize};

/// Feature types. Looked up, never created.
pub const SEQUENCE_CV: &str = "sequence";
/// Relationship types. Looked up, never created.
pub const RELATIONSHIP_CV: &str = "relationship";
/// Types of `featureprop` rows.
pub const FEATURE_PROPERTY_CV: &str = "feature_property";
/// Types of `feature_cvtermprop` rows.
pub const ASSOCIATION_PROPERTY_CV: &str = "feature_cvtermprop";
/// Gene product descriptions attached through `feature_cvterm`.
pub const PRODUCT_CV: &str = "genedb_products";

/// Kinds of feature synonym. Looked up, never created.
pub const SYNONYM_TYPE_CV: &str = "genedb_synonym_type";
/// Publication types.
pub const PUB_TYPE_CV: &str = "genedb_literature";
/// Types of `organismprop` rows.
pub const ORGANISM_PROPERTY_CV: &str = "organism_property";

/// Placeholder publication that synonyms are filed under.
pub const NULL_PUB: &str = "null";
/// GFF3 attribute listing publications of a feature.
pub const LITERATURE_ATTRIBUTE: &str = "literature";

/// Db that owns the dbxrefs of locally created terms.
pub const INTERNAL_DB: &str = "internal";

/// Property keys filled from GFF columns 2 and 6.
pub const SOURCE_PROPERTY: &str = "source";
pub const SCORE_PROPERTY: &str = "score";
/// Property key holding a FASTA header description.
pub const SEQUENCE_DESCRIPTION_PROPERTY: &str = "sequence_description";

/// Typed edges between features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    PartOf,
    DerivesFrom,
    IsA,
}

impl RelationshipType {
    pub const ALL: [RelationshipType; 3] = [Self::PartOf, Self::DerivesFrom, Self::IsA];

    /// Term name in the relationship vocabulary.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PartOf => "part_of",
            Self::DerivesFrom => "derives_from",
            Self::IsA => "is_a",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "part_of" => Some(Self::PartOf),
            "derives_from" => Some(Self::DerivesFrom),
            "is_a" => Some(Self::IsA),
            _ => None,
        }
    }

    /// GFF3 attribute carrying this edge, if the dialect has one.
    pub fn gff_attribute(&self) -> Option<&'static str> {
        match self {
            Self::PartOf => Some("Parent"),
            Self::DerivesFrom => Some("Derives_from"),
            Self::IsA => None,
        }
    }
}

/// Kinds of alternative feature names, each with its own GFF3 attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynonymKind {
    Alias,
    Synonym,
    PreviousSystematicId,
}

impl SynonymKind {
    pub const ALL: [SynonymKind; 3] = [Self::Alias, Self::Synonym, Self::PreviousSystematicId];

    /// Term name in the synonym type vocabulary.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alias => "alias",
            Self::Synonym => "synonym",
            Self::PreviousSystematicId => "previous_systematic_id",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }

    pub fn gff_attribute(&self) -> &'static str {
        match self {
            Self::Alias => "Alias",
            Self::Synonym => "synonym",
            Self::PreviousSystematicId => "previous_systematic_id",
        }
    }

    pub fn from_gff_attribute(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.gff_attribute() == key)
    }

    /// Retired identifiers are kept but not current.
    pub fn is_current(&self) -> bool {
        *self != Self::PreviousSystematicId
    }
}

/// Coarse classification of feature type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Gene,
    Transcript,
    Polypeptide,
    Other,
}

impl FeatureKind {
    pub fn classify(type_name: &str) -> Self {
        match type_name {
            "gene" | "pseudogene" | "ncRNA_gene" => Self::Gene,
            "mRNA" | "transcript" | "pseudogenic_transcript" | "tRNA" | "rRNA" | "ncRNA"
            | "snRNA" | "snoRNA" => Self::Transcript,
            "polypeptide" => Self::Polypeptide,
            _ => Self::Other,
        }
    }

    /// Whether `residues` residues are consistent with `span` located bases.
    ///
    /// Polypeptides may or may not include the stop codon.
    pub fn residues_fit_span(&self, residues: usize, span: i64) -> bool {
        let residues = residues as i64;
        match self {
            Self::Polypeptide => span == 3 * residues || span == 3 * (residues + 1),
            _ => span == residues,
        }
    }
}

/// GO aspect, column 9 of GAF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aspect {
    Process,
    Function,
    Component,
}

impl Aspect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Process => "P",
            Self::Function => "F",
            Self::Component => "C",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "P" => Some(Self::Process),
            "F" => Some(Self::Function),
            "C" => Some(Self::Component),
            _ => None,
        }
    }

    /// Aspect implied by the cv a GO term lives in.
    pub fn from_namespace(cv_name: &str) -> Option<Self> {
        match cv_name {
            "biological_process" => Some(Self::Process),
            "molecular_function" => Some(Self::Function),
            "cellular_component" => Some(Self::Component),
            _ => None,
        }
    }
}

const EVIDENCE_CODES: &[(&str, &str)] = &[
    ("EXP", "Inferred from Experiment"),
    ("IDA", "Inferred from Direct Assay"),
    ("IPI", "Inferred from Physical Interaction"),
    ("IMP", "Inferred from Mutant Phenotype"),
    ("IGI", "Inferred from Genetic Interaction"),
    ("IEP", "Inferred from Expression Pattern"),
    ("HTP", "Inferred from High Throughput Experiment"),
    ("HDA", "Inferred from High Throughput Direct Assay"),
    ("HMP", "Inferred from High Throughput Mutant Phenotype"),
    ("HGI", "Inferred from High Throughput Genetic Interaction"),
    ("HEP", "Inferred from High Throughput Expression Pattern"),
    ("ISS", "Inferred from Sequence or structural Similarity"),
    ("ISO", "Inferred from Sequence Orthology"),
    ("ISA", "Inferred from Sequence Alignment"),
    ("ISM", "Inferred from Sequence Model"),
    ("IGC", "Inferred from Genomic Context"),
    ("IBA", "Inferred from Biological aspect of Ancestor"),
    ("IBD", "Inferred from Biological aspect of Descendant"),
    ("IKR", "Inferred from Key Residues"),
    ("IRD", "Inferred from Rapid Divergence"),
    ("RCA", "Inferred from Reviewed Computational Analysis"),
    ("TAS", "Traceable Author Statement"),
    ("NAS", "Non-traceable Author Statement"),
    ("IC", "Inferred by Curator"),
    ("ND", "No biological Data available"),
    ("IEA", "Inferred from Electronic Annotation"),
];

/// Spelled-out form of a GO evidence code, as stored.
pub fn expand_evidence_code(code: &str) -> Option<&'static str> {
    EVIDENCE_CODES
        .iter()
        .find(|(abbreviation, _)| *abbreviation == code)
        .map(|(_, spelled)| *spelled)
}

/// Evidence code for a stored evidence description.
pub fn abbreviate_evidence(description: &str) -> Option<&'static str> {
    EVIDENCE_CODES
        .iter()
        .find(|(_, spelled)| spelled.eq_ignore_ascii_case(description))
        .map(|(abbreviation, _)| *abbreviation)
}
