//! Plain-text views of accounts and analysis results.

use std::fmt::Write;

use rxscan_core::models::{Account, Medication, PasswordStrength, Prescription, PrescriptionData};
use rxscan_core::utils::{format_date, format_optional, format_timestamp, join_or, truncate_string};

/// Number of medications listed per history entry before "+N more".
const HISTORY_MEDICATION_PREVIEW: usize = 3;

/// Width of the analysis excerpt shown when there is no structured data.
const ANALYSIS_EXCERPT_LEN: usize = 120;

pub fn password_checklist(strength: &PasswordStrength) -> String {
    let mut out = String::new();
    for (label, ok) in strength.checklist() {
        let _ = writeln!(out, "  [{}] {}", if ok { "x" } else { " " }, label);
    }
    if !strength.is_strong() {
        let _ = writeln!(out, "  (weak password - consider meeting every rule)");
    }
    out
}

pub fn account(account: &Account) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Username:      {}", account.username);
    let _ = writeln!(out, "Account ID:    {}", account.id);
    let _ = writeln!(out, "Member since:  {}", format_timestamp(&account.created_at));
    out
}

/// History list: one block per record, newest first as the service sends it.
pub fn history(records: &[Prescription]) -> String {
    if records.is_empty() {
        return "No prescriptions yet. Run `rxscan scan <image>` to analyze one.\n".to_string();
    }

    let mut out = String::new();
    for record in records {
        let _ = writeln!(
            out,
            "#{:<5} {}  {}",
            record.id,
            format_timestamp(&record.created_at),
            record.display_name()
        );

        let meds = record.medications();
        if meds.is_empty() {
            if record.structured_data.is_none() {
                let _ = writeln!(
                    out,
                    "       {}",
                    truncate_string(record.analysis.trim(), ANALYSIS_EXCERPT_LEN)
                );
            }
        } else {
            let _ = writeln!(out, "       Medications ({}):", meds.len());
            for med in meds.iter().take(HISTORY_MEDICATION_PREVIEW) {
                let _ = writeln!(out, "         - {}", medication_summary(med));
            }
            if meds.len() > HISTORY_MEDICATION_PREVIEW {
                let _ = writeln!(
                    out,
                    "         +{} more",
                    meds.len() - HISTORY_MEDICATION_PREVIEW
                );
            }
        }
    }
    out
}

/// Detail view of one analysis.
pub fn prescription(record: &Prescription) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Prescription #{} - {}", record.id, record.display_name());
    let _ = writeln!(out, "Analyzed: {}", format_timestamp(&record.created_at));

    match &record.structured_data {
        Some(data) => structured(&mut out, data),
        None => {
            let _ = writeln!(out, "\nAnalysis:\n{}", record.analysis.trim());
        }
    }
    out
}

fn structured(out: &mut String, data: &PrescriptionData) {
    if data.prescription_date.is_some() || data.doctor_name.is_some() || data.hospital_clinic.is_some() {
        let _ = writeln!(out, "\nPrescription");
        if let Some(ref date) = data.prescription_date {
            let _ = writeln!(out, "  Date:          {}", format_date(date));
        }
        let _ = writeln!(out, "  Doctor:        {}", format_optional(&data.doctor_name, "Not specified"));
        if let Some(ref reg) = data.doctor_registration {
            let _ = writeln!(out, "  Registration:  {}", reg);
        }
        if let Some(ref clinic) = data.hospital_clinic {
            let _ = writeln!(out, "  Clinic:        {}", clinic);
        }
    }

    let patient = &data.patient;
    if !patient.is_empty() {
        let _ = writeln!(out, "\nPatient");
        let _ = writeln!(out, "  Name:          {}", format_optional(&patient.patient_name, "Not specified"));
        if let Some(age) = patient.patient_age {
            let _ = writeln!(out, "  Age:           {}", age);
        }
        if let Some(ref gender) = patient.patient_gender {
            let _ = writeln!(out, "  Gender:        {}", gender);
        }
        if let Some(ref id) = patient.patient_id {
            let _ = writeln!(out, "  Patient ID:    {}", id);
        }
    }

    if let Some(ref diagnosis) = data.diagnosis {
        let _ = writeln!(out, "\nDiagnosis: {}", diagnosis);
    }

    let _ = writeln!(out, "\nMedications ({})", data.medications.len());
    if data.medications.is_empty() {
        let _ = writeln!(out, "  None found");
    }
    for (i, med) in data.medications.iter().enumerate() {
        medication(out, i + 1, med);
    }

    let _ = writeln!(out, "\nAllergies: {}", join_or(data.allergies(), "None reported"));
    if !data.warnings().is_empty() {
        let _ = writeln!(out, "\nWarnings");
        for warning in data.warnings() {
            let _ = writeln!(out, "  ! {}", warning);
        }
    }
    if let Some(ref follow_up) = data.follow_up_date {
        let _ = writeln!(out, "\nFollow-up: {}", format_date(follow_up));
    }
    if let Some(ref contact) = data.emergency_contact {
        let _ = writeln!(out, "Emergency contact: {}", contact);
    }
}

fn medication(out: &mut String, index: usize, med: &Medication) {
    let _ = writeln!(out, "  {}. {}", index, medication_summary(med));
    if let Some(ref generic) = med.generic_name {
        let _ = writeln!(out, "     Generic:   {}", generic);
    }

    let schedule = match (med.frequency_code(), &med.frequency) {
        (Some(code), _) => Some(code.to_string()),
        (None, Some(freq)) => Some(freq.clone()),
        (None, None) => None,
    };
    if let Some(schedule) = schedule {
        let dose = med
            .quantity_per_dose
            .map(|q| format!("{} x ", q))
            .unwrap_or_default();
        let _ = writeln!(out, "     Dose:      {}{}", dose, schedule);
    }
    if !med.timing.is_empty() {
        let _ = writeln!(out, "     Times:     {}", med.timing.join(", "));
    }
    if let Some(days) = med.duration_days {
        let _ = writeln!(out, "     Duration:  {} days", days);
    }
    if let Some(total) = med.total_quantity {
        let _ = write!(out, "     Total:     {}", total);
        if med.has_inconsistent_total() {
            if let Some(expected) = med.expected_total_quantity() {
                let _ = write!(out, " (schedule implies {})", expected);
            }
        }
        let _ = writeln!(out);
    }
    if let Some(ref food) = med.before_after_food {
        let _ = writeln!(out, "     Food:      {}", food);
    }
    if let Some(ref notes) = med.special_instructions {
        let _ = writeln!(out, "     Notes:     {}", notes);
    }
}

/// "Amoxicillin 500mg capsule"
fn medication_summary(med: &Medication) -> String {
    let mut parts = vec![med.display_name().to_string()];
    parts.extend(med.strength.clone());
    parts.extend(med.dosage_form.clone());
    parts.join(" ")
}
