//! Admission statistics crawler.
//!
//! Enumerates every combination of the cascading filters on a university
//! admission statistics page, stores them, and keeps a per-combination copy of
//! the applicant tables up to date. A bounded pool of browser sessions serves
//! step-by-step filter selection for interactive use.

pub mod automation;
pub mod cli;
pub mod config;
pub mod crawl;
pub mod models;
pub mod repository;
pub mod schema;
pub mod scrapers;
