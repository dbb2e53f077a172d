//! Append-only record of what each job run did.

pub mod journal;

pub use journal::{JournalEntry, RunJournal, StageTimer};
