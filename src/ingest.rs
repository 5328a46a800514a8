use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::blob::BlobStore;
use crate::config::AccountId;
use crate::error::{Error, ParseError, Result};
use crate::imap::{recent_handles, ImapSession, MailboxSession, Timeouts};
use crate::mime::parse_message;
use crate::models::{InsertOutcome, MailboxAccount, NewAttachment, ParsedMessage};
use crate::store::StoreHandle;

/// Mailbox the pipeline reads from.
pub const INBOX: &str = "INBOX";

/// Default number of most recent messages pulled per run.
pub const DEFAULT_LIMIT: usize = 20;

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Newly persisted messages.
    pub stored: usize,
    /// Messages whose `Message-ID` was already stored.
    pub duplicates: usize,
    /// Handles the server could not deliver.
    pub fetch_failures: usize,
    /// Messages that could not be parsed.
    pub errors: Vec<ParseError>,
    /// Set when the run stopped early. Everything counted above is kept.
    pub interrupted: Option<String>,
}

impl BatchReport {
    pub fn skipped(&self) -> usize {
        self.duplicates + self.fetch_failures + self.errors.len()
    }

    pub fn is_complete(&self) -> bool {
        self.interrupted.is_none()
    }
}

/// Pulls recent messages from a mailbox into the store.
///
/// Runs for the same account are serialized; different accounts proceed
/// independently.
pub struct IngestionPipeline {
    store: StoreHandle,
    blobs: Arc<dyn BlobStore>,
    locks: Mutex<HashMap<AccountId, Arc<Mutex<()>>>>,
}

impl IngestionPipeline {
    pub fn new(store: StoreHandle, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            blobs,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn account_lock(&self, account_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Ingest over a fresh TLS IMAP session.
    pub async fn ingest_imap(
        &self,
        account: &MailboxAccount,
        limit: usize,
        timeouts: Timeouts,
    ) -> Result<BatchReport> {
        let mut session = ImapSession::new(timeouts);
        self.ingest(&mut session, account, limit).await
    }

    /// Pull the `limit` most recent messages of the account's inbox.
    ///
    /// Session setup failures (connect, login, select, search) are returned
    /// as errors. Once the mailbox is selected the run is fail-soft per
    /// message and the outcome is reported in the [`BatchReport`]. The
    /// session is closed exactly once on every path.
    pub async fn ingest(
        &self,
        session: &mut dyn MailboxSession,
        account: &MailboxAccount,
        limit: usize,
    ) -> Result<BatchReport> {
        let lock = self.account_lock(&account.id).await;
        let _guard = lock.lock().await;

        let result = self.run(session, account, limit).await;
        session.close().await;

        match &result {
            Ok(report) => log::info!(
                "Ingested account {}: {} stored, {} duplicate, {} fetch failures, {} parse errors{}",
                account.id,
                report.stored,
                report.duplicates,
                report.fetch_failures,
                report.errors.len(),
                report
                    .interrupted
                    .as_deref()
                    .map(|r| format!(" (interrupted: {r})"))
                    .unwrap_or_default(),
            ),
            Err(e) => log::warn!("Ingestion for account {} failed: {e}", account.id),
        }
        result
    }

    async fn run(
        &self,
        session: &mut dyn MailboxSession,
        account: &MailboxAccount,
        limit: usize,
    ) -> Result<BatchReport> {
        session.connect(&account.host, account.port).await?;
        session
            .authenticate(&account.username, &account.password)
            .await?;
        let exists = session.select_mailbox(INBOX).await?;
        let handles = session.search_all().await?;
        log::debug!(
            "{INBOX} for {} has {exists} messages, {} handles",
            account.id,
            handles.len()
        );

        let mut report = BatchReport::default();
        for handle in recent_handles(&handles, limit) {
            let raw = match session.fetch(handle).await {
                Ok(raw) => raw,
                Err(Error::Protocol(reason)) => {
                    log::warn!("Skipping message {}: {reason}", handle.0);
                    report.fetch_failures += 1;
                    continue;
                }
                Err(e) => {
                    log::warn!("Session lost during fetch of {}: {e}", handle.0);
                    report.interrupted = Some(e.to_string());
                    break;
                }
            };

            let parsed = match parse_message(&raw, handle.0) {
                Ok(parsed) => parsed,
                Err(e) => {
                    log::warn!("Skipping unparseable {e}");
                    report.errors.push(e);
                    continue;
                }
            };

            match self.persist(&account.id, parsed).await {
                Ok(InsertOutcome::Inserted(_)) => report.stored += 1,
                Ok(InsertOutcome::Duplicate) => report.duplicates += 1,
                Err(e) => {
                    log::warn!("Storage failed, stopping batch: {e}");
                    report.interrupted = Some(e.to_string());
                    break;
                }
            }
        }
        Ok(report)
    }

    /// Dedup, write attachment blobs, then insert atomically. Blobs of a
    /// message that ends up not stored are removed again.
    async fn persist(&self, account_id: &str, mut parsed: ParsedMessage) -> Result<InsertOutcome> {
        if self.store.message_exists(&parsed.message_id).await? {
            return Ok(InsertOutcome::Duplicate);
        }

        let extracted = std::mem::take(&mut parsed.attachments);
        let mut attachments = Vec::with_capacity(extracted.len());
        for att in &extracted {
            match self.blobs.write(&att.filename, &att.data).await {
                Ok(blob_ref) => attachments.push(NewAttachment {
                    filename: att.filename.clone(),
                    content_type: att.content_type.clone(),
                    size: att.size() as u64,
                    blob_ref,
                }),
                Err(e) => {
                    self.discard(attachments.iter().map(|a| a.blob_ref.as_str())).await;
                    return Err(e);
                }
            }
        }

        let refs: Vec<String> = attachments.iter().map(|a| a.blob_ref.clone()).collect();
        let outcome = self
            .store
            .insert_message(account_id, parsed, attachments)
            .await;
        match outcome {
            Ok(InsertOutcome::Inserted(id)) => Ok(InsertOutcome::Inserted(id)),
            Ok(InsertOutcome::Duplicate) => {
                // Lost the race to a concurrent insert of the same id.
                self.discard(refs.iter().map(String::as_str)).await;
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => {
                self.discard(refs.iter().map(String::as_str)).await;
                Err(e)
            }
        }
    }

    async fn discard<'a>(&self, refs: impl Iterator<Item = &'a str>) {
        for blob_ref in refs {
            if let Err(e) = self.blobs.delete(blob_ref).await {
                log::warn!("Failed to remove orphaned blob {blob_ref}: {e}");
            }
        }
    }
}
