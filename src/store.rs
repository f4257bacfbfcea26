use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::audio::AudioPayload;
use crate::biomarkers::{InferenceResult, Label};
use crate::records::{
    seed_patients, AudioTest, DeviceType, DiagnosisStatus, NewPatient, Patient, UserProfile,
    UserRole,
};

const USER_FILE: &str = "user.json";
const PATIENTS_FILE: &str = "patients.json";
const TESTS_FILE: &str = "tests.json";
const AUDIO_DIR: &str = "audio";

/// Number of tests shown as recent activity.
pub const RECENT_LIMIT: usize = 5;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The signed-in role may not create records.
    #[error("Unauthorized")]
    Unauthorized,

    #[error("patient {0} not found")]
    PatientNotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Dashboard figures.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub total_patients: usize,
    pub tests_conducted: usize,
    pub stroke_detected: usize,
    pub mean_probability: Option<f64>,
    pub recent: Vec<AudioTest>,
}

/// Patients, tests and the signed-in user, mirrored to JSON files in one
/// directory. Lists are kept newest first.
#[derive(Debug)]
pub struct RecordStore {
    dir: PathBuf,
    current_user: Option<UserProfile>,
    patients: Vec<Patient>,
    tests: Vec<AudioTest>,
}

impl RecordStore {
    /// Load the store from `dir`, creating the directory if needed.
    /// Missing or unreadable files load as empty.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let current_user: Option<UserProfile> = load_json(&dir.join(USER_FILE));
        let mut patients: Vec<Patient> = load_json(&dir.join(PATIENTS_FILE));
        let tests: Vec<AudioTest> = load_json(&dir.join(TESTS_FILE));

        if patients.is_empty() {
            patients = seed_patients();
        }

        log::info!(
            "Record store opened at {} ({} patients, {} tests)",
            dir.display(),
            patients.len(),
            tests.len()
        );

        Ok(Self {
            dir,
            current_user,
            patients,
            tests,
        })
    }

    /// Flush everything and release the store.
    pub fn close(self) -> Result<(), StoreError> {
        self.save_user(self.current_user.as_ref())?;
        self.save_patients(&self.patients)?;
        self.save_tests(&self.tests)?;
        log::debug!("Record store at {} closed", self.dir.display());
        Ok(())
    }

    pub fn sign_in(&mut self, email: &str, role: UserRole) -> Result<UserProfile, StoreError> {
        let email = email.trim();
        let name = email.split('@').next().unwrap_or(email).to_string();
        let user = UserProfile {
            id: format!("u_{}", random_id(5).to_ascii_lowercase()),
            name,
            email: email.to_string(),
            role,
            created_at: Utc::now(),
        };
        self.save_user(Some(&user))?;
        self.current_user = Some(user.clone());
        log::info!("Signed in {} as {role}", user.email);
        Ok(user)
    }

    pub fn sign_out(&mut self) -> Result<(), StoreError> {
        self.save_user(None)?;
        self.current_user = None;
        Ok(())
    }

    pub fn current_user(&self) -> Option<&UserProfile> {
        self.current_user.as_ref()
    }

    /// Reject writes from a researcher. Anonymous callers are allowed.
    pub fn authorize_write(&self) -> Result<(), StoreError> {
        match &self.current_user {
            Some(user) if !user.role.can_write() => Err(StoreError::Unauthorized),
            _ => Ok(()),
        }
    }

    pub fn list_patients(&self) -> &[Patient] {
        &self.patients
    }

    /// Patients whose name contains `filter`, ignoring case.
    pub fn search_patients(&self, filter: &str) -> Vec<&Patient> {
        let needle = filter.trim().to_lowercase();
        self.patients
            .iter()
            .filter(|p| p.name.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn find_patient(&self, id: &str) -> Option<&Patient> {
        self.patients.iter().find(|p| p.id == id)
    }

    pub fn add_patient(&mut self, new: NewPatient) -> Result<Patient, StoreError> {
        self.authorize_write()?;
        let patient = Patient {
            id: format!("PAT-{}", random_id(6)),
            name: new.name.trim().to_string(),
            age: new.age,
            gender: new.gender,
            diagnosis_status: new.diagnosis_status,
            created_at: Utc::now(),
        };
        let mut patients = Vec::with_capacity(self.patients.len() + 1);
        patients.push(patient.clone());
        patients.extend(self.patients.iter().cloned());
        self.save_patients(&patients)?;
        self.patients = patients;
        log::info!("Registered patient {} ({})", patient.id, patient.name);
        Ok(patient)
    }

    pub fn list_tests(&self) -> &[AudioTest] {
        &self.tests
    }

    pub fn tests_for_patient(&self, patient_id: &str) -> Vec<&AudioTest> {
        self.tests
            .iter()
            .filter(|t| t.patient_id == patient_id)
            .collect()
    }

    pub fn find_test(&self, id: &str) -> Option<&AudioTest> {
        self.tests.iter().find(|t| t.id == id)
    }

    /// Append a test built from `result`, keeping a copy of the audio.
    pub fn record_test(
        &mut self,
        result: InferenceResult,
        patient_id: &str,
        audio: &AudioPayload,
        model_version: &str,
    ) -> Result<AudioTest, StoreError> {
        self.authorize_write()?;
        if self.find_patient(patient_id).is_none() {
            return Err(StoreError::PatientNotFound(patient_id.to_string()));
        }

        let id = format!("TEST-{}", random_id(8));
        let audio_dir = self.dir.join(AUDIO_DIR);
        fs::create_dir_all(&audio_dir)?;
        let audio_path = audio_dir.join(format!("{id}.{}", audio.extension()));
        fs::write(&audio_path, &audio.bytes)?;

        let test = AudioTest {
            id,
            user_id: self
                .current_user
                .as_ref()
                .map(|u| u.id.clone())
                .unwrap_or_else(|| "anon".to_string()),
            patient_id: patient_id.to_string(),
            audio_url: audio_path.to_string_lossy().into_owned(),
            stroke_probability: result.stroke_probability,
            predicted_label: result.predicted_label,
            biomarkers: result.biomarkers,
            reasoning: result.reasoning,
            model_version: model_version.to_string(),
            device_type: DeviceType::Cli,
            created_at: Utc::now(),
        };
        let mut tests = Vec::with_capacity(self.tests.len() + 1);
        tests.push(test.clone());
        tests.extend(self.tests.iter().cloned());
        if let Err(e) = self.save_tests(&tests) {
            if let Err(rm) = fs::remove_file(&audio_path) {
                log::warn!("Could not remove {}: {rm}", audio_path.display());
            }
            return Err(e);
        }
        self.tests = tests;
        log::info!(
            "Recorded {} for {} ({}, p={:.2})",
            test.id,
            test.patient_id,
            test.predicted_label,
            test.stroke_probability
        );
        Ok(test)
    }

    /// Set a patient's status. Unknown ids are ignored.
    pub fn update_patient_status(
        &mut self,
        patient_id: &str,
        status: DiagnosisStatus,
    ) -> Result<(), StoreError> {
        let Some(index) = self.patients.iter().position(|p| p.id == patient_id) else {
            log::debug!("Status update for unknown patient {patient_id} ignored");
            return Ok(());
        };
        let mut patients = self.patients.clone();
        patients[index].diagnosis_status = status;
        self.save_patients(&patients)?;
        self.patients = patients;
        Ok(())
    }

    pub fn summary(&self) -> Summary {
        let tests_conducted = self.tests.len();
        let mean_probability = if tests_conducted == 0 {
            None
        } else {
            let total: f64 = self.tests.iter().map(|t| t.stroke_probability).sum();
            Some(total / tests_conducted as f64)
        };
        Summary {
            total_patients: self.patients.len(),
            tests_conducted,
            stroke_detected: self
                .tests
                .iter()
                .filter(|t| t.predicted_label == Label::Stroke)
                .count(),
            mean_probability,
            recent: self.tests.iter().take(RECENT_LIMIT).cloned().collect(),
        }
    }

    fn save_user(&self, user: Option<&UserProfile>) -> Result<(), StoreError> {
        let path = self.dir.join(USER_FILE);
        match user {
            Some(user) => save_json(&path, user),
            None => match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
        }
    }

    // Mutations write the new list first and adopt it only once it is on disk.
    fn save_patients(&self, patients: &[Patient]) -> Result<(), StoreError> {
        save_json(&self.dir.join(PATIENTS_FILE), patients)
    }

    fn save_tests(&self, tests: &[AudioTest]) -> Result<(), StoreError> {
        save_json(&self.dir.join(TESTS_FILE), tests)
    }
}

fn load_json<T: DeserializeOwned + Default>(path: &Path) -> T {
    match fs::read_to_string(path) {
        Ok(data) => serde_json::from_str(&data).unwrap_or_else(|e| {
            log::warn!("Ignoring unreadable {}: {e}", path.display());
            T::default()
        }),
        Err(_) => T::default(),
    }
}

fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let data = serde_json::to_string_pretty(value)?;
    fs::write(path, data)?;
    Ok(())
}

/// Upper-case alphanumeric id fragment of `len` characters (max 32).
fn random_id(len: usize) -> String {
    let simple = uuid::Uuid::new_v4().simple().to_string();
    simple[..len.min(simple.len())].to_ascii_uppercase()
}
