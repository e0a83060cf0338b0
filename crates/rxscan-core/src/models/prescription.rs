use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

/// One analysis record, as returned by `/prescriptions/analyze`,
/// `/prescriptions/history` and `/prescriptions/{id}`.
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prescription {
    pub id: i64,
    #[serde(default)]
    pub filename: Option<String>,
    /// Raw analysis text produced by the service
    #[serde(default)]
    pub analysis: String,
    #[serde(default, deserialize_with = "lenient_structured")]
    pub structured_data: Option<PrescriptionData>,
    #[serde(deserialize_with = "super::timestamp::deserialize")]
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub created_at: DateTime<Utc>,
}

impl Prescription {
    pub fn display_name(&self) -> &str {
        self.filename.as_deref().unwrap_or("(unnamed upload)")
    }

    pub fn medications(&self) -> &[Medication] {
        self.structured_data
            .as_ref()
            .map(|d| d.medications.as_slice())
            .unwrap_or(&[])
    }
}

/// Response of `/prescriptions/{id}/structured`.
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredRecord {
    pub prescription_id: i64,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(deserialize_with = "super::timestamp::deserialize")]
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub created_at: DateTime<Utc>,
    pub data: PrescriptionData,
}

#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrescriptionData {
    #[serde(default)]
    pub prescription_id: Option<String>,
    /// ISO date, `YYYY-MM-DD`
    #[serde(default)]
    pub prescription_date: Option<String>,
    #[serde(default)]
    pub doctor_name: Option<String>,
    #[serde(default)]
    pub doctor_registration: Option<String>,
    #[serde(default)]
    pub hospital_clinic: Option<String>,
    #[serde(default)]
    pub patient: PatientDetails,
    #[serde(default)]
    pub medications: Vec<Medication>,
    #[serde(default)]
    pub diagnosis: Option<String>,
    #[serde(default)]
    pub allergies: Option<Vec<String>>,
    #[serde(default)]
    pub warnings: Option<Vec<String>>,
    #[serde(default)]
    pub follow_up_date: Option<String>,
    #[serde(default)]
    pub emergency_contact: Option<String>,
}

impl PrescriptionData {
    pub fn allergies(&self) -> &[String] {
        self.allergies.as_deref().unwrap_or(&[])
    }

    pub fn warnings(&self) -> &[String] {
        self.warnings.as_deref().unwrap_or(&[])
    }
}

#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientDetails {
    #[serde(default)]
    pub patient_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub patient_age: Option<u32>,
    #[serde(default)]
    pub patient_gender: Option<String>,
    #[serde(default)]
    pub patient_id: Option<String>,
}

impl PatientDetails {
    pub fn is_empty(&self) -> bool {
        self.patient_name.is_none()
            && self.patient_age.is_none()
            && self.patient_gender.is_none()
            && self.patient_id.is_none()
    }
}

/// One medication line, shaped for automatic dispensing.
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Medication {
    #[serde(default)]
    pub medicine_name: Option<String>,
    #[serde(default)]
    pub generic_name: Option<String>,
    /// e.g. "500mg", "10ml"
    #[serde(default)]
    pub strength: Option<String>,
    /// tablet, capsule, syrup, injection
    #[serde(default)]
    pub dosage_form: Option<String>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub quantity_per_dose: Option<u32>,
    /// e.g. "3 times daily"
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub frequency_code: Option<String>,
    /// Dose times in 24-hour `HH:MM`
    #[serde(default)]
    pub timing: Vec<String>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub duration_days: Option<u32>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub total_quantity: Option<u32>,
    /// before, after, with, empty stomach
    #[serde(default)]
    pub before_after_food: Option<String>,
    #[serde(default)]
    pub special_instructions: Option<String>,
}

impl Medication {
    pub fn display_name(&self) -> &str {
        self.medicine_name
            .as_deref()
            .or(self.generic_name.as_deref())
            .unwrap_or("Unknown medication")
    }

    pub fn frequency_code(&self) -> Option<FrequencyCode> {
        self.frequency_code.as_deref().and_then(FrequencyCode::parse)
    }

    /// quantity_per_dose × doses per day × duration_days, when all are known
    /// and the product fits in a `u32`.
    pub fn expected_total_quantity(&self) -> Option<u32> {
        let per_day = self.frequency_code()?.doses_per_day();
        self.quantity_per_dose?
            .checked_mul(per_day)?
            .checked_mul(self.duration_days?)
    }

    /// True when the stated total disagrees with the dosing schedule.
    pub fn has_inconsistent_total(&self) -> bool {
        match (self.total_quantity, self.expected_total_quantity()) {
            (Some(stated), Some(expected)) => stated != expected,
            _ => false,
        }
    }
}

/// Machine-readable dosing frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrequencyCode {
    /// Once daily
    Qd,
    /// Twice daily
    Bid,
    /// Three times daily
    Tid,
    /// Four times daily
    Qid,
    /// Every 8 hours
    Q8h,
    /// Every 12 hours
    Q12h,
}

impl FrequencyCode {
    pub fn parse(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "QD" | "OD" => Some(FrequencyCode::Qd),
            "BID" => Some(FrequencyCode::Bid),
            "TID" => Some(FrequencyCode::Tid),
            "QID" => Some(FrequencyCode::Qid),
            "Q8H" => Some(FrequencyCode::Q8h),
            "Q12H" => Some(FrequencyCode::Q12h),
            _ => None,
        }
    }

    pub fn doses_per_day(&self) -> u32 {
        match self {
            FrequencyCode::Qd => 1,
            FrequencyCode::Bid | FrequencyCode::Q12h => 2,
            FrequencyCode::Tid | FrequencyCode::Q8h => 3,
            FrequencyCode::Qid => 4,
        }
    }
}

impl std::fmt::Display for FrequencyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrequencyCode::Qd => write!(f, "Once daily"),
            FrequencyCode::Bid => write!(f, "Twice daily"),
            FrequencyCode::Tid => write!(f, "3 times daily"),
            FrequencyCode::Qid => write!(f, "4 times daily"),
            FrequencyCode::Q8h => write!(f, "Every 8 hours"),
            FrequencyCode::Q12h => write!(f, "Every 12 hours"),
        }
    }
}

/// Structured data comes from a model, not a schema-checked source. A shape
/// mismatch drops the structured view instead of failing the whole record.
fn lenient_structured<'de, D>(deserializer: D) -> Result<Option<PrescriptionData>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match serde_json::from_value(v) {
        Ok(data) => Some(data),
        Err(e) => {
            debug!(error = %e, "Discarding malformed structured data");
            None
        }
    }))
}

/// Accept integers, floats (rounded) and numeric strings; anything else is `None`.
fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
            .and_then(|n| u32::try_from(n).ok()),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| *f >= 0.0)
            .map(|f| f.round() as u32),
        _ => None,
    })
}
