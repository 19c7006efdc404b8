//! # API Route Modules
//!
//! - `companies` — company profile creation and lookup.
//! - `documents` — multipart ingestion and web auto-discovery, both feeding
//!   the deterministic store→extract→chunk→index chain.
//! - `runs` — run lifecycle: create, execute, cancel, status, diagnostics,
//!   report, evidence pack, compiled plan.

pub mod companies;
pub mod documents;
pub mod runs;
