use std::fmt;

/// A cross-reference written `DB:ACCESSION[:VERSION]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DbxrefKey {
    pub db: String,
    pub accession: String,
    pub version: String,
}

impl DbxrefKey {
    pub fn new(db: impl Into<String>, accession: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            accession: accession.into(),
            version: String::new(),
        }
    }

    /// Splits on the first colon; a non-empty third segment is the version.
    pub fn parse(s: &str) -> Option<Self> {
        let (db, rest) = s.split_once(':')?;
        if db.is_empty() || rest.is_empty() {
            return None;
        }
        let (accession, version) = match rest.split_once(':') {
            Some((accession, version)) if !accession.is_empty() && !version.is_empty() => {
                (accession, version)
            }
            _ => (rest, ""),
        };
        Some(Self {
            db: db.to_string(),
            accession: accession.to_string(),
            version: version.to_string(),
        })
    }
}

impl fmt::Display for DbxrefKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.db, self.accession)?;
        if !self.version.is_empty() {
            write!(f, ":{}", self.version)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_accession_with_version() {
        let key = DbxrefKey::parse("UniProtKB:Q8I1Y2:2").unwrap();
        assert_eq!(key.db, "UniProtKB");
        assert_eq!(key.accession, "Q8I1Y2");
        assert_eq!(key.version, "2");
        assert_eq!(key.to_string(), "UniProtKB:Q8I1Y2:2");
    }

    #[test]
    fn rejects_missing_namespace() {
        assert!(DbxrefKey::parse("Q8I1Y2").is_none());
        assert!(DbxrefKey::parse(":Q8I1Y2").is_none());
        assert_eq!(DbxrefKey::parse("GO:0005515").unwrap().to_string(), "GO:0005515");
    }
}
