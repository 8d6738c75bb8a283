//! services/api/src/jobs/report_task.rs
//!
//! The unit of work behind an ERP/MES report job: the JSON files of the latest
//! snapshots are fetched, trimmed and handed to the summarizer as one text. Every
//! snapshot contributes a header even when it lists no JSON files.

use std::time::Duration;

use proscientia_core::domain::{ArtifactType, CatalogStream, Job, NewArtifact};
use proscientia_core::ports::{PortError, PortResult, SummarizeOptions};
use serde_json::json;
use tracing::{info, warn};

use crate::jobs::dispatcher::{generate, JobContext, WorkOutcome};

/// Characters kept from each file so one large export cannot crowd out the rest.
const FILE_CHAR_LIMIT: usize = 2000;

const REPORT_TITLE: &str = "Raport ERP/MES – najnowsze snapshoty";
const REPORT_FILENAME: &str = "report_erp_mes_latest.txt";

const REPORT_SYSTEM_PROMPT: &str = "You are a production engineer. Based on the ERP and MES \
data from the latest snapshots, write a short report in Polish as bullet points. Focus on \
the most important information: the number and kinds of orders, production states, and \
potential problems or alerts. Do not copy the data verbatim; summarize it.";

pub(crate) async fn report_process(
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

    let snapshots = ctx
        .snapshots
        .latest_snapshots(&CatalogStream::SNAPSHOT_STREAMS)
        .await?;
    if snapshots.is_empty() {
        return Ok(WorkOutcome::Rejected(
            "No latest ERP/MES snapshots.".to_string(),
        ));
    }

    let mut sections = Vec::new();
    let mut files_read = 0usize;
    let mut fetch_errors = 0usize;
    for snapshot in &snapshots {
        sections.push(format!(
            "\n=== SNAPSHOT {} {} ===\n",
            snapshot.stream.as_str().to_uppercase(),
            snapshot.version_date
        ));

        for file in snapshot.files.iter().filter(|f| f.name.ends_with(".json")) {
            let text = match ctx
                .catalog
                .get_file_bytes(snapshot.stream, &file.name, Some(snapshot.version_date))
                .await
            {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    fetch_errors += 1;
                    warn!(job_id = %job.id, stream = %snapshot.stream, file = %file.name, error = %e, "Report input unavailable");
                    format!("<<Failed to fetch file {}: {}>>", file.name, e)
                }
            };
            let text: String = text.chars().take(FILE_CHAR_LIMIT).collect();
            sections.push(format!("\n--- FILE: {} ---\n{}\n", file.name, text));
            files_read += 1;
        }
    }

    let full_text = sections.join("\n").trim().to_string();
    if full_text.is_empty() {
        return Ok(WorkOutcome::Rejected(
            "No data in the latest ERP/MES snapshots.".to_string(),
        ));
    }

    let options = SummarizeOptions {
        system_prompt: Some(REPORT_SYSTEM_PROMPT.to_string()),
        scope: job.scope.clone(),
    };
    let summary = generate(ctx, generation_timeout, &full_text, &options).await?;

    let snapshot_info: Vec<_> = snapshots
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "stream": s.stream,
                "version_date": s.version_date.to_string(),
                "files_count": s.files.len(),
            })
        })
        .collect();

    info!(job_id = %job.id, files_read, fetch_errors, "Report generated");
    Ok(WorkOutcome::Ready {
        artifact: NewArtifact {
            artifact_type: ArtifactType::Summary,
            owner_id: owner.id,
            subject_id: None,
            title: REPORT_TITLE.to_string(),
            payload: summary.text.as_bytes().to_vec(),
            filename: REPORT_FILENAME.to_string(),
            metadata: json!({
                "scope": job.scope,
                "llm": summary.metadata,
                "report_type": "erp_mes_latest",
                "snapshots": snapshot_info,
                "fetch_errors": fetch_errors,
                "files_read": files_read,
            }),
        },
        text: summary.text,
    })
}
