//! Bulk-update helpers for DHIS2 / HNQIS servers: CSV input, the HTTP client,
//! attribute-value and org-unit transforms, and one orchestrator per command.

pub mod api;
pub mod attribute_setter;
pub mod attribute_values;
pub mod backup;
pub mod config;
pub mod csv_input;
pub mod error;
pub mod event_scores;
pub mod health_areas;
pub mod program_orgunits;
pub mod progress;
pub mod uid;
pub mod user_message;
pub mod usergroup_export;
pub mod validation;
