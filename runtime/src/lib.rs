//! Batch harvesters for public records and a mail-archive pipeline.
//!
//! The jobs (CIA reading room, FBI Vault, State Department allowances,
//! FRED series and the mail stages) share no state; they share the HTTP
//! and browser page sources, the PDF toolkit, external-tool discovery and
//! the run journal.

pub mod acquisition;
pub mod audit;
pub mod cli;
pub mod config;
pub mod mail;
pub mod pdf;
pub mod sources;
pub mod storage;
pub mod tools;
