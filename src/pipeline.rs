//! Import and export sessions.
//!
//! One import is one transaction: the resolver, graph builder and loader
//! all run on the same connection, and nothing is visible until commit.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::db::Database;
use crate::error::{ChadoError, Result};
use crate::exporter::{ExportOptions, Exporter, OrganismSelector};
use crate::formats::{self, fasta, gaf, gff, Dialect};
use crate::graph::{build_graph, BuildOptions};
use crate::loader;
use crate::models::{ExportSummary, HeaderKind, LoadReport, OrganismSpec, Table};
use crate::resolver::Resolver;

/// Shared interrupt flag, checked between records and between features.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ChadoError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRequest {
    pub dialect: Dialect,
    pub organism: OrganismSpec,
    /// Overrides `Config::default_sequence_type` for this unit.
    pub default_sequence_type: Option<String>,
}

impl ImportRequest {
    pub fn new(dialect: Dialect, organism: OrganismSpec) -> Self {
        Self {
            dialect,
            organism,
            default_sequence_type: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub dialect: Dialect,
    pub options: ExportOptions,
}

/// Imports one unit from `input`. Any error rolls the whole unit back.
pub fn import_reader<R: BufRead>(
    db: &Database,
    config: &Config,
    request: &ImportRequest,
    input: R,
    cancel: &CancelToken,
) -> Result<LoadReport> {
    let session = Uuid::new_v4();
    let span = tracing::info_span!(
        "import",
        session = %session,
        organism = %request.organism.abbreviation,
        dialect = %request.dialect,
    );
    let _enter = span.enter();

    let options = BuildOptions {
        default_sequence_type: request
            .default_sequence_type
            .clone()
            .unwrap_or_else(|| config.default_sequence_type.clone()),
        header: match request.dialect {
            Dialect::Gff => Some(HeaderKind::GffDirective),
            Dialect::Gaf => Some(HeaderKind::GafComment),
            Dialect::Fasta => None,
        },
    };

    let result = db.with_transaction(|conn| {
        let mut resolver = Resolver::new(conn, config.extensible_vocabularies.iter().cloned());
        let graph = build_graph(
            &mut resolver,
            request.organism.clone(),
            options,
            formats::records(request.dialect, input),
            cancel,
        )?;
        tracing::debug!(
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            associations = graph.associations.len(),
            "Validated feature graph"
        );

        let mut report = loader::load(conn, &graph, session, cancel)?;
        report.vocabulary_created = resolver.created();
        cancel.check()?;
        Ok(report)
    });

    match &result {
        Ok(report) => {
            let features = report.counts(Table::Feature);
            tracing::info!(
                created = features.created,
                updated = features.updated,
                vocabulary_created = report.vocabulary_created,
                superseded = report.superseded,
                "Import committed"
            );
        }
        Err(e) => tracing::warn!("Import rolled back: {}", e),
    }
    result
}

pub fn import_file(
    db: &Database,
    config: &Config,
    request: &ImportRequest,
    path: &Path,
    cancel: &CancelToken,
) -> Result<LoadReport> {
    let file = File::open(path)?;
    import_reader(db, config, request, BufReader::new(file), cancel)
}

/// Renders the export for `request` to `out`.
pub fn export_to_writer<W: Write>(
    db: &Database,
    config: &Config,
    request: &ExportRequest,
    out: &mut W,
) -> Result<ExportSummary> {
    let organism = match &request.options.organism {
        OrganismSelector::One(abbreviation) => abbreviation.as_str(),
        OrganismSelector::All => "*",
    };
    let span = tracing::info_span!(
        "export",
        session = %Uuid::new_v4(),
        organism,
        dialect = %request.dialect,
    );
    let _enter = span.enter();

    let summary = db.with_connection(|conn| {
        let mut exporter = Exporter::new(conn);
        match request.dialect {
            Dialect::Gff => {
                let document = exporter.gff_document(&request.options)?;
                gff::write_document(out, &document, config.fasta_line_width)?;
            }
            Dialect::Fasta => {
                let records = exporter.sequence_records(&request.options)?;
                fasta::write_records(out, &records, config.fasta_line_width)?;
            }
            Dialect::Gaf => {
                let comments = exporter.gaf_comments(&request.options)?;
                let records = exporter.association_records(&request.options)?;
                gaf::write_header(out, &config.gaf_version)?;
                for comment in &comments {
                    writeln!(out, "{comment}")?;
                }
                for record in &records {
                    gaf::write_record(out, record, &config.gaf_version)?;
                }
            }
        }
        Ok(exporter.summary().clone())
    })?;
    out.flush()?;

    tracing::info!(records = summary.records, skipped = summary.skipped, "Export finished");
    Ok(summary)
}

pub fn export_file(
    db: &Database,
    config: &Config,
    request: &ExportRequest,
    path: &Path,
) -> Result<ExportSummary> {
    let mut out = BufWriter::new(File::create(path)?);
    export_to_writer(db, config, request, &mut out)
}
