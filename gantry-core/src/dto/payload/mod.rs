//! Typed submission payloads
//!
//! One struct per remote workflow category, validated at the boundary. The
//! client refuses to send a payload whose `validate` reports problems, and
//! the returned list names every offending field, not just the first.

use serde::{Deserialize, Serialize};

/// A payload that can be submitted to the remote runner
pub trait JobPayload: Serialize {
    /// Returns one message per missing or invalid field; empty means valid
    fn validate(&self) -> Vec<String>;
}

/// Credentials and filter for an invoice download run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadPayload {
    pub login: String,
    pub password: String,
    /// Which documents to fetch from the portal (e.g. "monthly_invoice")
    pub filter: String,
    pub tax_id: String,
}

impl JobPayload for DownloadPayload {
    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.login.is_empty() {
            errors.push("login is required".to_string());
        }
        if self.password.is_empty() {
            errors.push("password is required".to_string());
        }
        if self.filter.is_empty() {
            errors.push("filter is required".to_string());
        }
        if self.tax_id.is_empty() {
            errors.push("tax_id is required".to_string());
        }
        errors
    }
}

/// Everything the runner needs to push a downloaded invoice into the
/// target system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadPayload {
    pub tax_id: String,
    pub legal_name: String,
    pub carrier: String,
    pub filter_name: String,
    pub unit: String,
    pub service: String,
    /// Locator of the record in the target system
    pub target_record: String,
    pub file_name: String,
    pub due_date: String,
}

impl JobPayload for UploadPayload {
    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let required = [
            ("tax_id", &self.tax_id),
            ("legal_name", &self.legal_name),
            ("carrier", &self.carrier),
            ("filter_name", &self.filter_name),
            ("unit", &self.unit),
            ("service", &self.service),
            ("target_record", &self.target_record),
            ("file_name", &self.file_name),
            ("due_date", &self.due_date),
        ];
        for (name, value) in required {
            if value.is_empty() {
                errors.push(format!("{} is required", name));
            }
        }
        errors
    }
}
