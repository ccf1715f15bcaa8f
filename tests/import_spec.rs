use std::io::{BufReader, Cursor, Read};

use chado_io::config::Config;
use chado_io::db::Database;
use chado_io::error::{ChadoError, ReferenceKey, StructuralError};
use chado_io::exporter::{ExportOptions, Exporter};
use chado_io::formats::Dialect;
use chado_io::models::*;
use chado_io::pipeline::{self, CancelToken, ImportRequest};
use speculate2::speculate;

const CHR1: &str = ">chr1\nACGTACGTACACGTACGTACACGTACGTACACGTACGTAC\n";

const GENE_AND_MRNA: &str = "##gff-version 3
chr1\tGeneDB\tgene\t3\t20\t.\t+\t.\tID=PF3D7_0100100;Name=VAR
chr1\tGeneDB\tmRNA\t3\t20\t.\t+\t.\tID=PF3D7_0100100.1;Parent=PF3D7_0100100;Note=var gene transcript
";

fn falciparum() -> OrganismSpec {
    OrganismSpec::declared("Pfalciparum", "Plasmodium", "falciparum", None)
}

fn import(db: &Database, dialect: Dialect, organism: OrganismSpec, text: &str) -> chado_io::Result<LoadReport> {
    pipeline::import_reader(
        db,
        &Config::default(),
        &ImportRequest::new(dialect, organism),
        Cursor::new(text.to_string()),
        &CancelToken::new(),
    )
}

fn seed_chromosome(db: &Database) {
    import(db, Dialect::Fasta, falciparum(), CHR1).expect("Failed to seed chromosome");
}

fn feature_names(db: &Database) -> Vec<String> {
    db.with_connection(|conn| {
        let mut stmt = conn.prepare("SELECT uniquename FROM feature ORDER BY uniquename")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    })
    .expect("Query failed")
}

/// A reader that trips `cancel` once the input is exhausted.
struct CancelAtEnd {
    inner: Cursor<Vec<u8>>,
    cancel: CancelToken,
}

impl Read for CancelAtEnd {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let read = self.inner.read(buf)?;
        if read == 0 {
            self.cancel.cancel();
        }
        Ok(read)
    }
}

speculate! {
    before {
        let db = Database::open_memory().expect("Failed to create in-memory database");
        db.migrate().expect("Failed to run migrations");
    }

    describe "gff import" {
        it "loads a gene and its mRNA for Pfalciparum" {
            seed_chromosome(&db);
            let report = import(&db, Dialect::Gff, falciparum(), GENE_AND_MRNA).expect("Import failed");

            assert_eq!(db.row_count(Table::Organism).unwrap(), 1);
            assert_eq!(report.counts(Table::Feature).created, 2);
            assert_eq!(report.counts(Table::FeatureRelationship).created, 1);
            assert_eq!(db.row_count(Table::FeatureRelationship).unwrap(), 1);

            let relationship: (String, String, String) = db.with_connection(|conn| {
                Ok(conn.query_row(
                    "SELECT subject.uniquename, object.uniquename, cvterm.name
                     FROM feature_relationship
                     JOIN feature subject ON subject.feature_id = feature_relationship.subject_id
                     JOIN feature object ON object.feature_id = feature_relationship.object_id
                     JOIN cvterm ON cvterm.cvterm_id = feature_relationship.type_id",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?)
            }).unwrap();
            assert_eq!(relationship, (
                "PF3D7_0100100.1".to_string(),
                "PF3D7_0100100".to_string(),
                "part_of".to_string(),
            ));

            let document = db.with_connection(|conn| {
                Exporter::new(conn).gff_document(&ExportOptions::organism("Pfalciparum"))
            }).unwrap();
            let exported: Vec<&str> = document.features.iter().map(|f| f.uniquename.as_str()).collect();
            assert_eq!(exported, vec!["PF3D7_0100100", "PF3D7_0100100.1"]);
        }

        it "reports every matched row as updated on re-import" {
            seed_chromosome(&db);
            let first = import(&db, Dialect::Gff, falciparum(), GENE_AND_MRNA).expect("First import failed");
            let second = import(&db, Dialect::Gff, falciparum(), GENE_AND_MRNA).expect("Second import failed");

            for table in Table::ALL {
                if table == Table::Organism {
                    continue;
                }
                assert_eq!(second.counts(table).created, 0, "{} created", table.as_str());
                assert_eq!(second.counts(table).removed, 0, "{} removed", table.as_str());
                assert_eq!(
                    second.counts(table).updated,
                    first.counts(table).created,
                    "{} updated",
                    table.as_str()
                );
            }
            assert!(first.vocabulary_created > 0);
            assert_eq!(second.vocabulary_created, 0);
            assert_eq!(db.row_count(Table::Feature).unwrap(), 3);
            assert_eq!(db.row_count(Table::FeatureRelationship).unwrap(), 1);
        }

        it "stores nothing when one record has an unresolvable parent" {
            seed_chromosome(&db);
            let mut text = String::from("##gff-version 3\n");
            for i in 1..=10 {
                text.push_str(&format!(
                    "chr1\tGeneDB\tgene\t{i}\t{}\t.\t+\t.\tID=gene{i}\n",
                    i + 10
                ));
            }
            text.push_str("chr1\tGeneDB\tmRNA\t1\t5\t.\t+\t.\tID=orphan.1;Parent=orphan\n");

            let err = import(&db, Dialect::Gff, falciparum(), &text).unwrap_err();

            match err {
                ChadoError::ReferenceNotFound { line, key } => {
                    assert_eq!(line, Some(12));
                    assert_eq!(key, ReferenceKey::Feature {
                        organism: "Pfalciparum".into(),
                        uniquename: "orphan".into(),
                    });
                }
                other => panic!("unexpected error: {other}"),
            }
            assert_eq!(feature_names(&db), vec!["chr1"]);
            assert_eq!(db.row_count(Table::Featureloc).unwrap(), 0);
        }

        it "rejects a feature declared as its own transitive parent" {
            seed_chromosome(&db);
            let text = "chr1\t.\tgene\t1\t10\t.\t+\t.\tID=a;Parent=b
chr1\t.\tgene\t1\t10\t.\t+\t.\tID=b;Parent=a
";
            let err = import(&db, Dialect::Gff, falciparum(), text).unwrap_err();
            assert!(matches!(err, ChadoError::Structural(StructuralError::Cycle { .. })));
            assert_eq!(feature_names(&db), vec!["chr1"]);
        }

        it "fails the unit on a malformed line with its number" {
            seed_chromosome(&db);
            let text = "##gff-version 3
chr1\t.\tgene\t1\t10\t.\t+\t.\tID=ok
chr1\t.\tgene\t10\t1\t.\t+\t.\tID=backwards
";
            let err = import(&db, Dialect::Gff, falciparum(), text).unwrap_err();
            assert!(matches!(err, ChadoError::Syntax { line: 3, .. }));
            assert_eq!(feature_names(&db), vec!["chr1"]);
        }

        it "stores obsolete features with the flag set" {
            seed_chromosome(&db);
            let text = "chr1\t.\tgene\t1\t10\t.\t+\t.\tID=retired;is_obsolete=true\n";
            import(&db, Dialect::Gff, falciparum(), text).expect("Import failed");

            let obsolete: bool = db.with_connection(|conn| {
                Ok(conn.query_row(
                    "SELECT is_obsolete FROM feature WHERE uniquename = 'retired'",
                    [],
                    |row| row.get(0),
                )?)
            }).unwrap();
            assert!(obsolete);
        }

        it "keeps stored residues when the feature line is re-imported" {
            seed_chromosome(&db);
            let text = "chr1\tGeneDB\tchromosome\t1\t40\t.\t.\t.\tID=chr1\n";
            let report = import(&db, Dialect::Gff, falciparum(), text).expect("Import failed");
            assert_eq!(report.counts(Table::Feature).updated, 1);

            let (type_name, seqlen, residues): (String, i64, String) = db.with_connection(|conn| {
                Ok(conn.query_row(
                    "SELECT cvterm.name, feature.seqlen, feature.residues
                     FROM feature JOIN cvterm ON cvterm.cvterm_id = feature.type_id
                     WHERE feature.uniquename = 'chr1'",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?)
            }).unwrap();
            assert_eq!(type_name, "chromosome");
            assert_eq!(seqlen, 40);
            assert_eq!(residues.len(), 40);
        }

        it "counts superseded values from repeated records" {
            seed_chromosome(&db);
            let text = "chr1\t.\tgene\t1\t10\t.\t+\t.\tID=g1;Name=first
chr1\t.\tgene\t1\t10\t.\t+\t.\tID=g1;Name=second
";
            let report = import(&db, Dialect::Gff, falciparum(), text).expect("Import failed");
            assert_eq!(report.superseded, 1);
            assert_eq!(report.counts(Table::Feature).created, 1);

            let name: String = db.with_connection(|conn| {
                Ok(conn.query_row("SELECT name FROM feature WHERE uniquename = 'g1'", [], |row| row.get(0))?)
            }).unwrap();
            assert_eq!(name, "second");
        }
    }

    describe "organisms" {
        it "requires an unknown organism to be declared" {
            let err = import(&db, Dialect::Fasta, OrganismSpec::existing("Pberghei"), CHR1).unwrap_err();
            assert!(matches!(
                err,
                ChadoError::ReferenceNotFound { key: ReferenceKey::Organism(_), .. }
            ));
            assert_eq!(db.row_count(Table::Organism).unwrap(), 0);
        }

        it "rejects a second abbreviation for the same species" {
            seed_chromosome(&db);
            let clash = OrganismSpec::declared("Pf3D7", "Plasmodium", "falciparum", None);
            let err = import(&db, Dialect::Fasta, clash, ">chr2\nACGT\n").unwrap_err();
            assert!(matches!(err, ChadoError::Conflict { .. }));
            assert_eq!(db.row_count(Table::Organism).unwrap(), 1);
        }
    }

    describe "cancellation" {
        it "rolls back rows the loader already wrote" {
            let cancel = CancelToken::new();
            let text = "chr1\tGeneDB\tchromosome\t1\t40\t.\t.\t.\tID=chr1\n";
            let reader = BufReader::new(CancelAtEnd {
                inner: Cursor::new(text.as_bytes().to_vec()),
                cancel: cancel.clone(),
            });

            let result = pipeline::import_reader(
                &db,
                &Config::default(),
                &ImportRequest::new(Dialect::Gff, falciparum()),
                reader,
                &cancel,
            );

            assert!(matches!(result, Err(ChadoError::Cancelled)));
            assert_eq!(db.row_count(Table::Organism).unwrap(), 0);
            assert_eq!(db.row_count(Table::Feature).unwrap(), 0);
        }

        it "refuses to start once cancelled" {
            let cancel = CancelToken::new();
            cancel.cancel();
            let result = pipeline::import_reader(
                &db,
                &Config::default(),
                &ImportRequest::new(Dialect::Fasta, falciparum()),
                Cursor::new(CHR1.to_string()),
                &cancel,
            );
            assert!(matches!(result, Err(ChadoError::Cancelled)));
        }
    }

    describe "gaf import" {
        it "needs the annotated feature to exist" {
            seed_chromosome(&db);
            let line = "GeneDB\tPF3D7_9999999\tVAR\t\tGO:0020002\tPMID:1\tIDA\t\tC\t\t\tgene\ttaxon:36329\t20210311\tGeneDB\n";
            let err = import(&db, Dialect::Gaf, falciparum(), line).unwrap_err();
            assert!(matches!(
                err,
                ChadoError::ReferenceNotFound { line: Some(1), key: ReferenceKey::Feature { .. } }
            ));
            assert_eq!(db.row_count(Table::FeatureCvterm).unwrap(), 0);
        }

        it "needs the GO term to exist" {
            seed_chromosome(&db);
            import(&db, Dialect::Gff, falciparum(), GENE_AND_MRNA).expect("Import failed");
            let line = "GeneDB\tPF3D7_0100100\tVAR\t\tGO:9999999\tPMID:1\tIDA\t\tC\t\t\tgene\ttaxon:36329\t20210311\tGeneDB\n";
            let err = import(&db, Dialect::Gaf, falciparum(), line).unwrap_err();
            match err {
                ChadoError::ReferenceNotFound { line: Some(1), key: ReferenceKey::Accession { db: namespace, accession } } => {
                    assert_eq!(namespace, "GO");
                    assert_eq!(accession, "9999999");
                }
                other => panic!("expected a missing accession, got {other}"),
            }
            assert_eq!(db.row_count(Table::FeatureCvterm).unwrap(), 0);
            assert_eq!(db.row_count(Table::FeatureCvtermprop).unwrap(), 0);
        }
    }

    describe "large units" {
        it "loads thousands of genes in one transaction" {
            seed_chromosome(&db);
            let mut text = String::from("##gff-version 3\n");
            for index in 0..3_000 {
                text.push_str(&format!(
                    "chr1\tGeneDB\tgene\t3\t20\t.\t+\t.\tID=g{index}\n\
                     chr1\tGeneDB\tmRNA\t3\t20\t.\t+\t.\tID=g{index}.1;Parent=g{index}\n"
                ));
            }
            let report = import(&db, Dialect::Gff, falciparum(), &text).expect("Import failed");

            assert_eq!(report.counts(Table::Feature).created, 6_000);
            assert_eq!(db.row_count(Table::Feature).unwrap(), 6_001);
            assert_eq!(db.row_count(Table::FeatureRelationship).unwrap(), 3_000);
        }
    }
}
