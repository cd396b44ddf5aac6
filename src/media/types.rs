//! Media data model.
//!
//! A [`MediaResolution`] is what one source-link lookup produces; each of its
//! [`MediaVariant`]s is one downloadable rendition the user can pick.

use serde::{Deserialize, Serialize};

/// Natural kind of a media rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    /// Parse the resolver's `type` field. Anything other than video/audio is not media.
    pub fn from_type_field(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            _ => None,
        }
    }

    /// Quality label used when the resolver omits one.
    pub fn default_quality(self) -> &'static str {
        match self {
            Self::Video => "Unknown",
            Self::Audio => "Audio",
        }
    }

    /// File extension used when the resolver omits one.
    pub fn default_extension(self) -> &'static str {
        match self {
            Self::Video => "mp4",
            Self::Audio => "mp3",
        }
    }

    /// MIME type announced for an upload of this kind.
    pub fn mime_for_extension(self, extension: &str) -> String {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        match (self, ext.as_str()) {
            (Self::Video, "webm") => "video/webm".to_string(),
            (Self::Video, "mov") => "video/quicktime".to_string(),
            (Self::Video, "mkv") => "video/x-matroska".to_string(),
            (Self::Video, _) => "video/mp4".to_string(),
            (Self::Audio, "m4a") | (Self::Audio, "mp4") => "audio/mp4".to_string(),
            (Self::Audio, "ogg") | (Self::Audio, "opus") => "audio/ogg".to_string(),
            (Self::Audio, "wav") => "audio/wav".to_string(),
            (Self::Audio, _) => "audio/mpeg".to_string(),
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// One concrete downloadable rendition of a resolved media item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaVariant {
    pub kind: MediaKind,
    pub quality_label: String,
    pub file_extension: String,
    pub source_url: String,
    /// Byte length, 0 when unknown.
    pub byte_size: u64,
    pub size_label: String,
}

impl MediaVariant {
    /// Create a variant whose size is not known yet.
    pub fn new(
        kind: MediaKind,
        quality_label: impl Into<String>,
        file_extension: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            quality_label: quality_label.into(),
            file_extension: file_extension.into(),
            source_url: source_url.into(),
            byte_size: 0,
            size_label: format_size(0),
        }
    }

    /// Builder-style size, used by tests and by callers that already know it.
    pub fn with_size(mut self, byte_size: u64) -> Self {
        self.byte_size = byte_size;
        self.size_label = format_size(byte_size);
        self
    }

    /// Whether the byte length has been learned.
    pub fn size_known(&self) -> bool {
        self.byte_size > 0
    }

    /// Record a probed size. Only the first known value sticks.
    ///
    /// Returns `true` when the size was applied.
    pub fn refine_size(&mut self, byte_size: u64) -> bool {
        if self.size_known() || byte_size == 0 {
            return false;
        }
        self.byte_size = byte_size;
        self.size_label = format_size(byte_size);
        true
    }

    /// Button / status label, e.g. `HD (MP4) · 12.4 MB`.
    pub fn display_label(&self) -> String {
        let base = format!(
            "{} ({})",
            self.quality_label,
            self.file_extension.to_ascii_uppercase()
        );
        if self.size_known() {
            format!("{} · {}", base, self.size_label)
        } else {
            base
        }
    }
}

/// Result of one source-link lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaResolution {
    /// Short random id, embedded in inline buttons to detect stale selections.
    pub id: String,
    pub title: String,
    pub author: String,
    pub duration_millis: u64,
    pub thumbnail_url: Option<String>,
    pub variants: Vec<MediaVariant>,
}

impl MediaResolution {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: id[..10].to_string(),
            title: title.into(),
            author: author.into(),
            duration_millis: 0,
            thumbnail_url: None,
            variants: Vec::new(),
        }
    }

    pub fn with_variants(mut self, variants: Vec<MediaVariant>) -> Self {
        self.variants = variants;
        self
    }

    pub fn variant(&self, index: usize) -> Option<&MediaVariant> {
        self.variants.get(index)
    }

    pub fn has_media(&self) -> bool {
        !self.variants.is_empty()
    }

    pub fn duration_label(&self) -> String {
        format_duration(self.duration_millis)
    }
}

/// Human-readable byte size. `0` means unknown.
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    if bytes == 0 {
        return "unknown size".to_string();
    }
    let b = bytes as f64;
    if b >= GB {
        format!("{:.1} GB", b / GB)
    } else if b >= MB {
        format!("{:.1} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

/// `m:ss` from milliseconds, `Unknown` for 0.
pub fn format_duration(millis: u64) -> String {
    if millis == 0 {
        return "Unknown".to_string();
    }
    let seconds = millis / 1000;
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_from_type_field() {
        assert_eq!(MediaKind::from_type_field("video"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_type_field(" Audio "), Some(MediaKind::Audio));
        assert_eq!(MediaKind::from_type_field("image"), None);
        assert_eq!(MediaKind::from_type_field(""), None);
    }

    #[test]
    fn test_mime_for_extension() {
        assert_eq!(MediaKind::Video.mime_for_extension("mp4"), "video/mp4");
        assert_eq!(MediaKind::Video.mime_for_extension(".WEBM"), "video/webm");
        assert_eq!(MediaKind::Audio.mime_for_extension("mp3"), "audio/mpeg");
        assert_eq!(MediaKind::Audio.mime_for_extension("m4a"), "audio/mp4");
    }

    #[test]
    fn test_refine_size_applies_once() {
        let mut variant = MediaVariant::new(MediaKind::Video, "HD", "mp4", "https://cdn/v.mp4");
        assert!(!variant.size_known());
        assert_eq!(variant.size_label, "unknown size");

        assert!(variant.refine_size(10 * 1024 * 1024));
        assert_eq!(variant.byte_size, 10 * 1024 * 1024);
        assert_eq!(variant.size_label, "10.0 MB");

        assert!(!variant.refine_size(1));
        assert_eq!(variant.byte_size, 10 * 1024 * 1024);
    }

    #[test]
    fn test_refine_size_ignores_zero() {
        let mut variant = MediaVariant::new(MediaKind::Audio, "Audio", "mp3", "https://cdn/a.mp3");
        assert!(!variant.refine_size(0));
        assert!(variant.refine_size(2048));
        assert_eq!(variant.size_label, "2.0 KB");
    }

    #[test]
    fn test_display_label() {
        let variant = MediaVariant::new(MediaKind::Video, "HD", "mp4", "u");
        assert_eq!(variant.display_label(), "HD (MP4)");
        let sized = variant.with_size(3 * 1024 * 1024);
        assert_eq!(sized.display_label(), "HD (MP4) · 3.0 MB");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "unknown size");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(80 * 1024 * 1024), "80.0 MB");
        assert_eq!(format_size(2 * 1024 * 1024 * 1024), "2.0 GB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "Unknown");
        assert_eq!(format_duration(5_000), "0:05");
        assert_eq!(format_duration(65_400), "1:05");
        assert_eq!(format_duration(3_600_000), "60:00");
    }

    #[test]
    fn test_resolution_ids_are_distinct() {
        let a = MediaResolution::new("a", "x");
        let b = MediaResolution::new("b", "y");
        assert_eq!(a.id.len(), 10);
        assert_ne!(a.id, b.id);
        assert!(!a.has_media());
    }
}
