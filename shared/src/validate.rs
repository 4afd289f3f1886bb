use thiserror::Error;
use crate::types::{SrvRecord, TargetFields, TargetInput};

/// Rejected target fields. Raised before any store or provider call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Empty { field: &'static str },

    #[error("port {0} is out of range (1-65535)")]
    PortOutOfRange(i64),
}

fn optional(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

fn require(field: &'static str, value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    Ok(trimmed.to_string())
}

/// Check that a port lies in 1..=65535
pub fn validate_port(port: i64) -> Result<u16, ValidationError> {
    match u16::try_from(port) {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(ValidationError::PortOutOfRange(port)),
    }
}

impl TargetInput {
    /// Validate and normalize client-supplied fields
    pub fn validate(&self) -> Result<TargetFields, ValidationError> {
        Ok(TargetFields {
            name: require("name", &self.name)?,
            dns_record: require("dnsRecord", &self.dns_record)?,
            target_host: require("targetHost", &self.target_host)?,
            target_port: validate_port(self.target_port)?,
            poll_host: optional(self.poll_host.as_deref()),
        })
    }
}

impl SrvRecord {
    /// Records from the provider go through the same checks and
    /// normalization as client input
    pub fn validate(&self) -> Result<SrvRecord, ValidationError> {
        Ok(SrvRecord {
            external_key: require("externalKey", &self.external_key)?,
            domain: require("domain", &self.domain)?,
            target_host: require("targetHost", &self.target_host)?,
            target_port: validate_port(i64::from(self.target_port))?,
        })
    }
}
