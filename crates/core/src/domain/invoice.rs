// Invoice Record Domain Model
//
// The core never looks inside the invoice payload: building the document the
// tax authority expects is the Submitter's job.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Invoice identifier
pub type InvoiceId = String;

/// Tenant identifier (multi-tenant ERP)
pub type TenantId = String;

/// Delivery status of an invoice towards the invoicing API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    /// Not yet submitted
    Draft,
    /// Immediate submission failed transiently; a queue item will re-attempt it
    Queued,
    /// Accepted by the invoicing API
    Submitted,
    /// Refused by the invoicing API (permanent failure)
    Rejected,
    /// Automated retry exhausted; needs a human
    ManualIntervention,
}

impl InvoiceStatus {
    /// Terminal for the automated pipeline (no further submission attempts)
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            InvoiceStatus::Submitted | InvoiceStatus::Rejected | InvoiceStatus::ManualIntervention
        )
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvoiceStatus::Draft => write!(f, "DRAFT"),
            InvoiceStatus::Queued => write!(f, "QUEUED"),
            InvoiceStatus::Submitted => write!(f, "SUBMITTED"),
            InvoiceStatus::Rejected => write!(f, "REJECTED"),
            InvoiceStatus::ManualIntervention => write!(f, "MANUAL_INTERVENTION"),
        }
    }
}

impl FromStr for InvoiceStatus {
    type Err = crate::domain::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(InvoiceStatus::Draft),
            "QUEUED" => Ok(InvoiceStatus::Queued),
            "SUBMITTED" => Ok(InvoiceStatus::Submitted),
            "REJECTED" => Ok(InvoiceStatus::Rejected),
            "MANUAL_INTERVENTION" => Ok(InvoiceStatus::ManualIntervention),
            other => Err(crate::domain::DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// Invoice as seen by the delivery pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub id: InvoiceId,
    pub tenant_id: TenantId,
    pub status: InvoiceStatus,

    /// Opaque document handed to the Submitter
    pub payload: serde_json::Value,

    /// Set once the invoicing API accepted the document
    pub transaction_id: Option<String>,
    /// Last status change details (error code/message, API status, ...)
    pub status_details: Option<serde_json::Value>,

    pub created_at: i64, // epoch ms
    pub updated_at: i64, // epoch ms
}

impl InvoiceRecord {
    /// Create a new draft invoice
    ///
    /// `created_at` is injected (epoch ms), never read from the system clock here.
    pub fn new(
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        payload: serde_json::Value,
        created_at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            status: InvoiceStatus::Draft,
            payload,
            transaction_id: None,
            status_details: None,
            created_at,
            updated_at: created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_display() {
        for status in [
            InvoiceStatus::Draft,
            InvoiceStatus::Queued,
            InvoiceStatus::Submitted,
            InvoiceStatus::Rejected,
            InvoiceStatus::ManualIntervention,
        ] {
            assert_eq!(status.to_string().parse::<InvoiceStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        assert!("ARCHIVED".parse::<InvoiceStatus>().is_err());
    }

    #[test]
    fn test_settled_statuses() {
        assert!(!InvoiceStatus::Draft.is_settled());
        assert!(!InvoiceStatus::Queued.is_settled());
        assert!(InvoiceStatus::Submitted.is_settled());
        assert!(InvoiceStatus::ManualIntervention.is_settled());
    }

    #[test]
    fn test_new_invoice_is_draft() {
        let invoice = InvoiceRecord::new("inv-1", "tenant-a", serde_json::json!({}), 1000);
        assert_eq!(invoice.status, InvoiceStatus::Draft);
        assert_eq!(invoice.updated_at, 1000);
        assert!(invoice.transaction_id.is_none());
    }
}
