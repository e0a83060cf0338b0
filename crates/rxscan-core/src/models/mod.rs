//! Data models for the prescription analysis service.
//!
//! This module contains the payloads exchanged with the service:
//!
//! - `Account`, `TokenPair`, `AccessToken`: registration and login
//! - `Prescription`: one analysis record (history entry or detail)
//! - `PrescriptionData`, `PatientDetails`, `Medication`: structured data
//!   extracted from the prescription image
//! - `StructuredRecord`: machine-readable view used by dispensing machines

pub mod account;
pub mod prescription;
mod timestamp;

pub use account::{AccessToken, Account, Credentials, PasswordStrength, RefreshRequest, TokenPair};
pub use prescription::{
    FrequencyCode, Medication, PatientDetails, Prescription, PrescriptionData, StructuredRecord,
};
