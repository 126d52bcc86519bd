//! Scan orchestration.
//!
//! One scan is one task walking the state machine
//! `Idle → FetchingMessages → ProcessingMessages → Finalizing → Complete`,
//! with `Failed` reserved for fatal errors before processing begins.
//! Mid-scan per-item failures are logged and skipped; they never abort the
//! scan and never reach the caller as errors.
//!
//! The same state machine serves both delivery modes: callers either await
//! [`run_scan`] for the report (synchronous), or [`spawn_scan`] the work and
//! observe every later state through the progress channel (asynchronous).

use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;

use crate::classify::ClassificationPipeline;
use crate::mailbox::{self, MailboxClient};
use crate::mime;
use crate::models::{CandidateAttachment, CandidateMessage, DocumentSummary, ScanReport, ScanRequest};
use crate::progress::{ProgressEvent, ProgressSink, STATUS_PHRASES};
use crate::store::{DocumentStore, UpsertOutcome};

/// Lifecycle states of one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Idle,
    FetchingMessages,
    ProcessingMessages,
    Finalizing,
    Complete,
    Failed,
}

/// Everything a scan needs, bundled so both delivery modes share one entry
/// point. The verdict cache inside the pipeline is the only state shared
/// across concurrent scans.
pub struct ScanContext {
    pub mailbox: Arc<dyn MailboxClient>,
    pub pipeline: Arc<ClassificationPipeline>,
    pub store: DocumentStore,
    pub sink: Arc<dyn ProgressSink>,
    /// Cap on concurrently in-flight attachment work.
    pub concurrency: usize,
    /// Idle pause inserted after each batch of `concurrency` messages.
    pub batch_pause: Duration,
    /// Mailbox search page size.
    pub page_size: u32,
}

/// Run one scan to completion and return the report.
///
/// Returns `Err` only for fatal pre-processing failures (invalid request,
/// unreachable mailbox); those also emit an `Error` event so asynchronous
/// observers see the same outcome.
pub async fn run_scan(ctx: &ScanContext, request: ScanRequest) -> Result<ScanReport> {
    let mut phase = ScanPhase::Idle;

    let request = request.normalized();
    if let Err(e) = request.validate() {
        advance(&mut phase, ScanPhase::Failed);
        ctx.sink.emit(ProgressEvent::Error {
            error: e.to_string(),
        });
        return Err(e);
    }

    advance(&mut phase, ScanPhase::FetchingMessages);
    ctx.sink.emit(ProgressEvent::Status {
        message: "Connecting to mailbox...".to_string(),
        step: 1,
        total: 3,
    });

    let ids = match mailbox::fetch_candidate_messages(
        ctx.mailbox.as_ref(),
        &request,
        ctx.page_size,
    )
    .await
    {
        Ok(ids) => ids,
        Err(e) => {
            advance(&mut phase, ScanPhase::Failed);
            ctx.sink.emit(ProgressEvent::Error {
                error: e.to_string(),
            });
            return Err(e);
        }
    };

    let total = ids.len() as u32;
    ctx.sink.emit(ProgressEvent::Status {
        message: format!("Found {} messages with attachments", total),
        step: 2,
        total: 3,
    });

    advance(&mut phase, ScanPhase::ProcessingMessages);
    let mut accepted: Vec<DocumentSummary> = Vec::new();

    for (index, message_id) in ids.iter().enumerate() {
        match process_message(ctx, &request.owner_id, message_id).await {
            Ok(mut docs) => accepted.append(&mut docs),
            Err(e) => {
                tracing::warn!(
                    message_id = %message_id,
                    error = %e,
                    "message processing failed; skipping"
                );
            }
        }

        let current = index as u32 + 1;
        ctx.sink.emit(ProgressEvent::Progress {
            current,
            total,
            message: STATUS_PHRASES[index % STATUS_PHRASES.len()].to_string(),
        });

        // Self-throttle between batches, independent of upstream signals.
        let batch = ctx.concurrency.max(1);
        if (index + 1) % batch == 0 && index + 1 < ids.len() {
            tokio::time::sleep(ctx.batch_pause).await;
        }
    }

    advance(&mut phase, ScanPhase::Finalizing);
    ctx.sink.emit(ProgressEvent::Status {
        message: "Finalizing scan...".to_string(),
        step: 3,
        total: 3,
    });

    let report = ScanReport {
        total_accepted: accepted.len(),
        documents: accepted,
    };

    advance(&mut phase, ScanPhase::Complete);
    ctx.sink.emit(ProgressEvent::Complete {
        total: report.total_accepted as u32,
        documents: report.documents.clone(),
    });

    tracing::info!(
        owner_id = %request.owner_id,
        messages = total,
        accepted = report.total_accepted,
        "scan complete"
    );

    Ok(report)
}

/// Run a scan on a background task. The caller must already hold a progress
/// subscription; everything after this call is observable only through it.
pub fn spawn_scan(ctx: Arc<ScanContext>, request: ScanRequest) {
    tokio::spawn(async move {
        if let Err(e) = run_scan(&ctx, request).await {
            tracing::warn!(error = %e, "background scan failed");
        }
    });
}

fn advance(phase: &mut ScanPhase, next: ScanPhase) {
    tracing::debug!(from = ?phase, to = ?next, "scan phase");
    *phase = next;
}

/// Process one message: fetch detail, walk the MIME tree, then classify and
/// store each candidate attachment. Attachment work runs concurrently up to
/// the context's cap; excess work queues.
async fn process_message(
    ctx: &ScanContext,
    owner_id: &str,
    message_id: &str,
) -> Result<Vec<DocumentSummary>> {
    let detail = ctx.mailbox.fetch_message(message_id).await?;
    let candidates = mime::collect_attachments(&detail.payload);
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let message = &detail.message;
    let results: Vec<Option<DocumentSummary>> = stream::iter(candidates)
        .map(|attachment| async move {
            match process_attachment(ctx, owner_id, message, &attachment).await {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::warn!(
                        message_id = %message.id,
                        attachment_id = %attachment.attachment_id,
                        error = %e,
                        "attachment processing failed; skipping"
                    );
                    None
                }
            }
        })
        .buffer_unordered(ctx.concurrency.max(1))
        .collect()
        .await;

    Ok(results.into_iter().flatten().collect())
}

async fn process_attachment(
    ctx: &ScanContext,
    owner_id: &str,
    message: &CandidateMessage,
    attachment: &CandidateAttachment,
) -> Result<Option<DocumentSummary>> {
    let bytes = ctx
        .mailbox
        .fetch_attachment(&message.id, &attachment.attachment_id)
        .await?;

    let classification = ctx.pipeline.classify_bytes(&bytes).await;
    if !classification.verdict.is_warranty {
        tracing::debug!(
            message_id = %message.id,
            attachment_id = %attachment.attachment_id,
            reason = %classification.verdict.reason,
            "attachment rejected"
        );
    }

    let outcome = ctx
        .store
        .upsert(owner_id, message, attachment, &classification, &bytes)
        .await?;

    Ok(match outcome {
        UpsertOutcome::Stored(summary) | UpsertOutcome::Refreshed(summary) => Some(summary),
        UpsertOutcome::Skipped => None,
    })
}
