//! services/api/src/jobs/summary_task.rs
//!
//! The unit of work behind a document summary job.

use std::time::Duration;

use chrono::Utc;
use proscientia_core::domain::{ArtifactType, CatalogStream, Document, DocumentSource, Job, NewArtifact};
use proscientia_core::ports::{PortError, PortResult, SummarizeOptions};
use serde_json::json;
use tracing::{debug, info};

use crate::jobs::dispatcher::{generate, JobContext, WorkOutcome};

const NO_FILE: &str = "Document has no file attached.";

/// Resolves the owner and the document, summarizes the document text and prepares the
/// `summary` artifact for the dispatcher to store.
///
/// A missing owner, a missing document or a document without content ends the job as
/// `Rejected` before anything is generated. Mock documents without stored bytes are
/// read from the catalog; a catalog failure fails the job.
pub(crate) async fn summary_process(
    ctx: &JobContext,
    generation_timeout: Duration,
    job: &Job,
) -> PortResult<WorkOutcome> {
    let owner = match ctx.directory.get_user(job.owner_id).await {
        Ok(user) => user,
        Err(PortError::NotFound(_)) => {
            return Ok(WorkOutcome::Rejected("User does not exist.".to_string()))
        }
        Err(e) => return Err(e),
    };

    let Some(document_id) = job.subject_id else {
        return Ok(WorkOutcome::Rejected("Document does not exist.".to_string()));
    };
    let document = match ctx.directory.get_document(document_id).await {
        Ok(document) => document,
        Err(PortError::NotFound(_)) => {
            return Ok(WorkOutcome::Rejected("Document does not exist.".to_string()))
        }
        Err(e) => return Err(e),
    };

    let bytes = match &document.content {
        Some(bytes) if !bytes.is_empty() => bytes.clone(),
        _ => match fetch_mock_file(ctx, &document).await? {
            Some(bytes) if !bytes.is_empty() => bytes,
            _ => return Ok(WorkOutcome::Rejected(NO_FILE.to_string())),
        },
    };
    let content = String::from_utf8_lossy(&bytes);

    let display_title = document.display_title();
    let context = format!("{}\n\n{}", display_title, content);
    let options = SummarizeOptions {
        system_prompt: None,
        scope: job.scope.clone(),
    };
    let summary = generate(ctx, generation_timeout, &context, &options).await?;

    let filename = format!(
        "summary_doc{}_user{}_{}.txt",
        document.id,
        owner.id,
        Utc::now().format("%Y%m%d%H%M%S")
    );
    info!(job_id = %job.id, document_id, chars = summary.text.chars().count(), "Summary generated");
    Ok(WorkOutcome::Ready {
        artifact: NewArtifact {
            artifact_type: ArtifactType::Summary,
            owner_id: owner.id,
            subject_id: Some(document.id),
            title: format!("Streszczenie: {}", display_title),
            payload: summary.text.as_bytes().to_vec(),
            filename,
            metadata: json!({
                "scope": job.scope,
                "summary_meta": summary.metadata,
                "source": document.source.as_str(),
                "mock_stream": document.mock_stream,
                "mock_version_date": document.mock_version_date.map(|d| d.to_string()),
            }),
        },
        text: summary.text,
    })
}

/// Reads a mock document's file from the catalog. `None` when the document is a user
/// upload or lacks the filename or version date needed to locate its file.
async fn fetch_mock_file(ctx: &JobContext, document: &Document) -> PortResult<Option<Vec<u8>>> {
    let Some(name) = document.mock_filename.as_deref() else {
        return Ok(None);
    };
    let (stream, date) = match document.source {
        DocumentSource::UserUpload => return Ok(None),
        DocumentSource::MockDocs => (CatalogStream::Docs, None),
        DocumentSource::MockErp | DocumentSource::MockMes => {
            let fallback = if document.source == DocumentSource::MockErp {
                CatalogStream::Erp
            } else {
                CatalogStream::Mes
            };
            let stream = document
                .mock_stream
                .as_deref()
                .and_then(|raw| raw.parse::<CatalogStream>().ok())
                .filter(CatalogStream::is_versioned)
                .unwrap_or(fallback);
            match document.mock_version_date {
                Some(date) => (stream, Some(date)),
                None => return Ok(None),
            }
        }
    };

    debug!(document_id = document.id, %stream, file = name, "Fetching document file from catalog");
    ctx.catalog.get_file_bytes(stream, name, date).await.map(Some)
}
