use serde::{Deserialize, Serialize};
use std::path::Path;

/// Coarse category of a library file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Audio,
    Video,
    Text,
    Image,
    Other,
}

impl FileKind {
    /// Video containers carry an audio track the encoder can extract
    pub fn has_audio(self) -> bool {
        matches!(self, FileKind::Audio | FileKind::Video)
    }
}

// Formats common in audio libraries that the MIME table does not know
const EXTRA_AUDIO_EXTENSIONS: &[&str] = &["flac", "ape", "tta", "dsf", "dff", "wv", "tak", "alac", "mka", "opus"];
const EXTRA_TEXT_EXTENSIONS: &[&str] = &["lrc", "vtt", "srt", "ass", "cue", "md"];

pub fn classify(filename: &str) -> FileKind {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    if EXTRA_AUDIO_EXTENSIONS.contains(&extension.as_str()) {
        return FileKind::Audio;
    }
    if EXTRA_TEXT_EXTENSIONS.contains(&extension.as_str()) {
        return FileKind::Text;
    }

    match mime_guess::from_ext(&extension).first() {
        Some(mime) => match mime.type_().as_str() {
            "audio" => FileKind::Audio,
            "video" => FileKind::Video,
            "text" => FileKind::Text,
            "image" => FileKind::Image,
            _ => FileKind::Other,
        },
        None => FileKind::Other,
    }
}
