pub mod attachments;
pub mod blob;
pub mod config;
pub mod error;
pub mod imap;
pub mod ingest;
pub mod jobs;
pub mod keyring;
pub mod mime;
pub mod models;
pub mod notify;
pub mod schedule;
pub mod smtp;
pub mod store;
pub mod triage;

#[cfg(test)]
mod testing;

pub use error::{DeliveryError, Error, ParseError, Result};
pub use ingest::{BatchReport, IngestionPipeline};
pub use jobs::{Job, JobQueue, JobRunner, StoreJobQueue};
pub use notify::{NotificationSender, Notifier};
pub use schedule::RecurringNotifier;
pub use store::StoreHandle;
