//! Deferred invoice rendering and delivery
//!
//! Jobs are queued only after the order transaction commits. A failing job is
//! logged with its order and invoice number and never reaches the order or the
//! HTTP response that created it.

use crate::invoice::{invoice_file_name, DocumentError, InvoiceDocument, InvoiceRenderer};
use crate::services::notification::NotificationDispatcher;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum InvoiceTaskError {
    /// Rendering panicked or the blocking task was cancelled
    #[error("invoice rendering failed: {0}")]
    Render(String),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("could not write invoice to {path}: {message}")]
    Io { path: String, message: String },
}

/// Snapshot of everything needed to render and send one invoice
#[derive(Debug, Clone)]
pub struct InvoiceJob {
    pub order_id: i64,
    pub recipient: String,
    pub document: InvoiceDocument,
}

/// Sending half handed to the order service
#[derive(Clone)]
pub struct InvoiceQueue {
    sender: mpsc::UnboundedSender<InvoiceJob>,
}

impl InvoiceQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<InvoiceJob>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Queue a job; returns false when the worker is gone
    pub fn enqueue(&self, job: InvoiceJob) -> bool {
        let order_id = job.order_id;
        let invoice_number = job.document.invoice_number.clone();
        match self.sender.send(job) {
            Ok(()) => true,
            Err(_) => {
                error!(
                    order_id,
                    invoice_number = %invoice_number,
                    "Invoice worker is not running, invoice not scheduled"
                );
                false
            }
        }
    }
}

/// Result of one processed job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub path: PathBuf,
    pub emailed: bool,
}

pub struct InvoiceDeliveryWorker {
    receiver: mpsc::UnboundedReceiver<InvoiceJob>,
    renderer: InvoiceRenderer,
    dispatcher: NotificationDispatcher,
    output_dir: PathBuf,
}

impl InvoiceDeliveryWorker {
    pub fn new(
        receiver: mpsc::UnboundedReceiver<InvoiceJob>,
        renderer: InvoiceRenderer,
        dispatcher: NotificationDispatcher,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            receiver,
            renderer,
            dispatcher,
            output_dir: output_dir.into(),
        }
    }

    /// Process jobs until shutdown, then drain whatever is already queued
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(output_dir = %self.output_dir.display(), "🧾 Invoice delivery worker started");

        loop {
            tokio::select! {
                job = self.receiver.recv() => {
                    match job {
                        Some(job) => self.handle(job).await,
                        None => {
                            info!("Invoice queue closed, worker stopping");
                            return;
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Invoice delivery worker received shutdown signal");
                        break;
                    }
                }
            }
        }

        let mut drained = 0usize;
        while let Ok(job) = self.receiver.try_recv() {
            self.handle(job).await;
            drained += 1;
        }
        info!(drained, "Invoice delivery worker stopped");
    }

    async fn handle(&self, job: InvoiceJob) {
        let order_id = job.order_id;
        let invoice_number = job.document.invoice_number.clone();

        match deliver(&self.renderer, &self.dispatcher, &self.output_dir, job).await {
            Ok(report) if report.emailed => {
                info!(order_id, invoice_number = %invoice_number, "Invoice delivered");
            }
            Ok(report) => {
                warn!(
                    order_id,
                    invoice_number = %invoice_number,
                    path = %report.path.display(),
                    "Invoice stored but not emailed"
                );
            }
            Err(e) => {
                error!(
                    order_id,
                    invoice_number = %invoice_number,
                    error = %e,
                    "Invoice task failed"
                );
            }
        }
    }
}

/// Render, store and email one invoice
pub async fn deliver(
    renderer: &InvoiceRenderer,
    dispatcher: &NotificationDispatcher,
    output_dir: &Path,
    job: InvoiceJob,
) -> Result<DeliveryReport, InvoiceTaskError> {
    let path = output_dir.join(invoice_file_name(&job.document.invoice_number));

    let renderer = renderer.clone();
    let document = job.document.clone();
    let bytes = tokio::task::spawn_blocking(move || renderer.render(&document))
        .await
        .map_err(|e| InvoiceTaskError::Render(e.to_string()))??;

    write_atomically(&path, &bytes).await?;

    let emailed = dispatcher
        .send(&job.recipient, &job.document.invoice_number, &path)
        .await;

    Ok(DeliveryReport { path, emailed })
}

/// Write through a temporary file so a reader never sees a partial PDF
async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), InvoiceTaskError> {
    let io_error = |e: std::io::Error| InvoiceTaskError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
    }

    let tmp = path.with_extension("pdf.tmp");
    tokio::fs::write(&tmp, bytes).await.map_err(io_error)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_error)?;
    Ok(())
}
