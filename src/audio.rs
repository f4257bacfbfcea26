use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::io::Cursor;
use std::path::Path;

/// MIME type assumed when neither the caller nor the content says otherwise.
pub const DEFAULT_MIME: &str = "audio/mp3";

const EXTENSION_MIME: &[(&str, &str)] = &[
    ("wav", "audio/wav"),
    ("mp3", "audio/mp3"),
    ("ogg", "audio/ogg"),
    ("oga", "audio/ogg"),
    ("webm", "audio/webm"),
    ("flac", "audio/flac"),
    ("aac", "audio/aac"),
    ("m4a", "audio/mp4"),
    ("aiff", "audio/aiff"),
];

/// Raw audio handed to the classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Header facts read from a WAV payload, for operator logs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavInfo {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub duration_secs: f32,
}

impl AudioPayload {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        let mime_type = mime_type.into();
        let mime_type = if mime_type.trim().is_empty() {
            DEFAULT_MIME.to_string()
        } else {
            mime_type
        };
        Self { bytes, mime_type }
    }

    /// Read an audio file, inferring its MIME type unless one is given.
    pub async fn from_file(path: &Path, mime_override: Option<&str>) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let mime = match mime_override {
            Some(m) => m.to_string(),
            None => guess_mime(path, &bytes).to_string(),
        };
        log::info!(
            "Loaded {} ({} bytes, {mime})",
            path.display(),
            bytes.len()
        );
        Ok(Self::new(bytes, mime))
    }

    /// Standard base64 of the payload, as the generateContent API expects.
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    /// File extension used when the payload is stored.
    pub fn extension(&self) -> &'static str {
        EXTENSION_MIME
            .iter()
            .find(|(_, mime)| *mime == self.mime_type)
            .map(|(ext, _)| *ext)
            .unwrap_or("bin")
    }

    /// Parse the WAV header if the payload is a WAV file.
    pub fn probe_wav(&self) -> Option<WavInfo> {
        let reader = hound::WavReader::new(Cursor::new(&self.bytes)).ok()?;
        let spec = reader.spec();
        let frames = reader.duration();
        Some(WavInfo {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: spec.bits_per_sample,
            duration_secs: frames as f32 / spec.sample_rate.max(1) as f32,
        })
    }
}

/// Pick a MIME type from the file extension, then from magic bytes.
pub fn guess_mime(path: &Path, bytes: &[u8]) -> &'static str {
    let by_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .and_then(|ext| {
            EXTENSION_MIME
                .iter()
                .find(|(known, _)| *known == ext)
                .map(|(_, mime)| *mime)
        });
    if let Some(mime) = by_ext {
        return mime;
    }

    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
        "audio/wav"
    } else if bytes.starts_with(b"OggS") {
        "audio/ogg"
    } else if bytes.starts_with(b"fLaC") {
        "audio/flac"
    } else if bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        "audio/webm"
    } else {
        DEFAULT_MIME
    }
}
