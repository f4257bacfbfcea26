use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::biomarkers::{AcousticBiomarkers, InferenceResult, Label};

/// Role chosen at sign-in. Only `Researcher` is restricted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Doctor,
    Patient,
    Researcher,
}

impl UserRole {
    pub fn can_write(&self) -> bool {
        !matches!(self, UserRole::Researcher)
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UserRole::Doctor => "doctor",
            UserRole::Patient => "patient",
            UserRole::Researcher => "researcher",
        })
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "doctor" => Ok(UserRole::Doctor),
            "patient" => Ok(UserRole::Patient),
            "researcher" => Ok(UserRole::Researcher),
            other => Err(format!("unknown role '{other}' (doctor, patient, researcher)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosisStatus {
    Healthy,
    Stroke,
    Pending,
    #[serde(rename = "At Risk")]
    AtRisk,
}

impl From<Label> for DiagnosisStatus {
    fn from(label: Label) -> Self {
        match label {
            Label::Stroke => DiagnosisStatus::Stroke,
            Label::Healthy => DiagnosisStatus::Healthy,
        }
    }
}

impl fmt::Display for DiagnosisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiagnosisStatus::Healthy => "Healthy",
            DiagnosisStatus::Stroke => "Stroke",
            DiagnosisStatus::Pending => "Pending",
            DiagnosisStatus::AtRisk => "At Risk",
        })
    }
}

impl FromStr for DiagnosisStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm: String = s
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match norm.as_str() {
            "healthy" => Ok(DiagnosisStatus::Healthy),
            "stroke" => Ok(DiagnosisStatus::Stroke),
            "pending" => Ok(DiagnosisStatus::Pending),
            "atrisk" => Ok(DiagnosisStatus::AtRisk),
            _ => Err(format!(
                "unknown status '{s}' (Healthy, Stroke, Pending, At Risk)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: String,
    pub name: String,
    pub age: u32,
    pub gender: String,
    pub diagnosis_status: DiagnosisStatus,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when registering a patient.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPatient {
    pub name: String,
    pub age: u32,
    pub gender: String,
    pub diagnosis_status: DiagnosisStatus,
}

/// Where a test was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Web,
    Mobile,
    Cli,
}

/// A recorded classification. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTest {
    pub id: String,
    pub user_id: String,
    pub patient_id: String,
    pub audio_url: String,
    pub stroke_probability: f64,
    pub predicted_label: Label,
    pub biomarkers: AcousticBiomarkers,
    pub reasoning: String,
    pub model_version: String,
    pub device_type: DeviceType,
    pub created_at: DateTime<Utc>,
}

impl AudioTest {
    pub fn result(&self) -> InferenceResult {
        InferenceResult {
            stroke_probability: self.stroke_probability,
            predicted_label: self.predicted_label,
            biomarkers: self.biomarkers,
            reasoning: self.reasoning.clone(),
        }
    }
}

/// Demo patients present in a fresh store.
pub fn seed_patients() -> Vec<Patient> {
    let date = |y: i32, m: u32, d: u32| {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    };
    vec![
        Patient {
            id: "p1".into(),
            name: "John Doe".into(),
            age: 65,
            gender: "Male".into(),
            diagnosis_status: DiagnosisStatus::Stroke,
            created_at: date(2024, 1, 10),
        },
        Patient {
            id: "p2".into(),
            name: "Jane Smith".into(),
            age: 72,
            gender: "Female".into(),
            diagnosis_status: DiagnosisStatus::Healthy,
            created_at: date(2024, 1, 15),
        },
        Patient {
            id: "p3".into(),
            name: "Michael Chen".into(),
            age: 58,
            gender: "Male".into(),
            diagnosis_status: DiagnosisStatus::Pending,
            created_at: date(2024, 2, 1),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_loosely() {
        assert_eq!("at risk".parse::<DiagnosisStatus>(), Ok(DiagnosisStatus::AtRisk));
        assert_eq!("At-Risk".parse::<DiagnosisStatus>(), Ok(DiagnosisStatus::AtRisk));
        assert_eq!("STROKE".parse::<DiagnosisStatus>(), Ok(DiagnosisStatus::Stroke));
        assert!("unknown".parse::<DiagnosisStatus>().is_err());
    }

    #[test]
    fn status_serializes_with_space() {
        assert_eq!(
            serde_json::to_string(&DiagnosisStatus::AtRisk).unwrap(),
            "\"At Risk\""
        );
    }

    #[test]
    fn label_maps_to_status() {
        assert_eq!(DiagnosisStatus::from(Label::Stroke), DiagnosisStatus::Stroke);
        assert_eq!(DiagnosisStatus::from(Label::Healthy), DiagnosisStatus::Healthy);
    }

    #[test]
    fn roles() {
        assert_eq!("Researcher".parse::<UserRole>(), Ok(UserRole::Researcher));
        assert!(!UserRole::Researcher.can_write());
        assert!(UserRole::Doctor.can_write());
        assert!(UserRole::Patient.can_write());
        assert!("admin".parse::<UserRole>().is_err());
    }

    #[test]
    fn seeds_are_stable() {
        let seeds = seed_patients();
        let ids: Vec<_> = seeds.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["p1", "p2", "p3"]);
        assert_eq!(seeds[2].diagnosis_status, DiagnosisStatus::Pending);
        assert_eq!(seeds[0].created_at.to_rfc3339(), "2024-01-10T00:00:00+00:00");
    }
}
