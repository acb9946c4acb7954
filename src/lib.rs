//! RFP Intake: AI-assisted procurement with email-driven proposal ingestion.

pub mod assist;
pub mod config;
pub mod error;
pub mod llm;
pub mod mail;
pub mod model;
pub mod pipeline;
pub mod procurement;
pub mod seed;
pub mod store;
