use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use super::state::Session;
use crate::audio::{AudioPayload, WavInfo};
use crate::classifier::Classification;
use crate::records::AudioTest;
use crate::store::StoreError;

/// Progress events sent to the front-end while an analysis runs.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    AudioLoaded {
        bytes: usize,
        mime_type: String,
        wav: Option<WavInfo>,
    },
    Classifying,
    FallbackUsed(String),
    Recorded(AudioTest),
}

impl fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineEvent::AudioLoaded {
                bytes,
                mime_type,
                wav: Some(info),
            } => write!(
                f,
                "Loaded {bytes} bytes ({mime_type}, {:.1}s, {}Hz, {} ch, {}-bit)",
                info.duration_secs, info.sample_rate, info.channels, info.bits_per_sample
            ),
            PipelineEvent::AudioLoaded {
                bytes, mime_type, ..
            } => write!(f, "Loaded {bytes} bytes ({mime_type})"),
            PipelineEvent::Classifying => write!(f, "Analyzing speech..."),
            PipelineEvent::FallbackUsed(cause) => {
                write!(f, "Inference unavailable ({cause}); recorded the safe default")
            }
            PipelineEvent::Recorded(test) => write!(
                f,
                "Recorded {}: {} ({:.0}%)",
                test.id,
                test.predicted_label,
                test.stroke_probability * 100.0
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cannot read audio: {0}")]
    Audio(#[from] std::io::Error),
}

/// One audio file to analyze for one patient.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub patient_id: String,
    pub audio: PathBuf,
    pub mime_type: Option<String>,
}

async fn emit(events: &async_channel::Sender<PipelineEvent>, event: PipelineEvent) {
    let _ = events.send(event).await;
}

/// Classify the audio, record the test and update the patient's status.
///
/// Permission and the patient id are checked before any audio is sent.
pub async fn run_analysis(
    session: &mut Session,
    request: &AnalysisRequest,
    events: &async_channel::Sender<PipelineEvent>,
) -> Result<AudioTest, AppError> {
    session.store.authorize_write()?;
    if session.store.find_patient(&request.patient_id).is_none() {
        return Err(StoreError::PatientNotFound(request.patient_id.clone()).into());
    }

    let payload = AudioPayload::from_file(&request.audio, request.mime_type.as_deref()).await?;
    emit(
        events,
        PipelineEvent::AudioLoaded {
            bytes: payload.bytes.len(),
            mime_type: payload.mime_type.clone(),
            wav: payload.probe_wav(),
        },
    )
    .await;

    emit(events, PipelineEvent::Classifying).await;
    let outcome = session.classifier.classify(&payload).await;
    if let Classification::Fallback { cause, .. } = &outcome {
        emit(events, PipelineEvent::FallbackUsed(cause.to_string())).await;
    }
    log::debug!(
        "Classification for {}: {:?}",
        request.patient_id,
        outcome.result()
    );

    let test = session.store.record_test(
        outcome.into_result(),
        &request.patient_id,
        &payload,
        &session.config.model_version,
    )?;
    session
        .store
        .update_patient_status(&test.patient_id, test.predicted_label.into())?;

    emit(events, PipelineEvent::Recorded(test.clone())).await;
    Ok(test)
}
