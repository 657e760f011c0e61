//! Format & codec registry
//!
//! An immutable, insertion-ordered catalog of supported formats and quality
//! presets. Built once from configuration and shared read-only afterwards.
//! Container parsing is done elsewhere; this only validates and describes
//! metadata an external extractor supplies.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, FormatError};

/// Built-in extension to codec table, used when a descriptor omits its codec
const DEFAULT_CODECS: &[(&str, &str)] = &[
    ("mp3", "mp3"),
    ("wav", "pcm_s16le"),
    ("flac", "flac"),
    ("ogg", "vorbis"),
    ("opus", "opus"),
    ("m4a", "aac"),
    ("aac", "aac"),
    ("aiff", "pcm_s16be"),
];

/// Maximum channel count accepted by quality presets
const MAX_PRESET_CHANNELS: u16 = 8;

/// Normalize an extension into its lookup key.
///
/// Trims whitespace, strips a single leading dot and lowercases. Returns
/// `None` for blank input.
pub fn normalize_extension(extension: &str) -> Option<String> {
    let trimmed = extension.trim();
    let trimmed = trimmed.strip_prefix('.').unwrap_or(trimmed).trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_ascii_lowercase())
    }
}

/// Description of one supported format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    /// File extension (unique, case-insensitive key)
    pub extension: String,
    /// MIME type reported to upload collaborators
    pub mime_type: String,
    /// Codec name; derived from the extension when absent
    #[serde(default)]
    pub codec: Option<String>,
    /// Bitrate in bits per second
    #[serde(default)]
    pub bitrate: Option<u32>,
    /// Required sample rate in Hz
    #[serde(default)]
    pub sample_rate: Option<u32>,
    /// Required channel count
    #[serde(default)]
    pub channels: Option<u16>,
}

impl FormatDescriptor {
    /// Create a descriptor with no stream constraints
    pub fn new(extension: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            mime_type: mime_type.into(),
            codec: None,
            bitrate: None,
            sample_rate: None,
            channels: None,
        }
    }

    /// Resolved codec name
    pub fn codec(&self) -> String {
        if let Some(codec) = &self.codec {
            return codec.clone();
        }
        DEFAULT_CODECS
            .iter()
            .find(|(ext, _)| *ext == self.extension)
            .map(|(_, codec)| (*codec).to_string())
            .unwrap_or_else(|| self.extension.clone())
    }
}

/// MIME type and codec of a supported format
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatDescription {
    pub mime_type: String,
    pub codec: String,
}

/// Immutable registry of supported formats
#[derive(Debug, Clone)]
pub struct FormatRegistry {
    formats: Vec<FormatDescriptor>,
}

impl FormatRegistry {
    /// Build a registry, normalizing keys and rejecting duplicates
    pub fn new(descriptors: Vec<FormatDescriptor>) -> Result<Self, ConfigError> {
        let mut formats: Vec<FormatDescriptor> = Vec::with_capacity(descriptors.len());
        for mut descriptor in descriptors {
            let key = normalize_extension(&descriptor.extension).ok_or_else(|| {
                ConfigError::InvalidFormat {
                    extension: descriptor.extension.clone(),
                    reason: "extension is blank".to_string(),
                }
            })?;
            if descriptor.mime_type.trim().is_empty() {
                return Err(ConfigError::InvalidFormat {
                    extension: key,
                    reason: "MIME type is blank".to_string(),
                });
            }
            if descriptor.sample_rate == Some(0) || descriptor.channels == Some(0) {
                return Err(ConfigError::InvalidFormat {
                    extension: key,
                    reason: "sample rate and channel count must be positive".to_string(),
                });
            }
            if formats.iter().any(|f| f.extension == key) {
                return Err(ConfigError::DuplicateFormat { extension: key });
            }
            descriptor.extension = key;
            formats.push(descriptor);
        }
        Ok(Self { formats })
    }

    /// Look up a format by extension (case-insensitive)
    pub fn lookup_format(&self, extension: &str) -> Option<&FormatDescriptor> {
        let key = normalize_extension(extension)?;
        self.formats.iter().find(|f| f.extension == key)
    }

    /// Check whether an extension is supported. Blank input is unsupported.
    pub fn is_format_supported(&self, extension: &str) -> bool {
        self.lookup_format(extension).is_some()
    }

    /// Get the MIME type and codec of a supported format
    pub fn describe_format(&self, extension: &str) -> Result<FormatDescription, FormatError> {
        let descriptor =
            self.lookup_format(extension)
                .ok_or_else(|| FormatError::UnsupportedFormat {
                    extension: extension.trim().to_string(),
                })?;
        Ok(FormatDescription {
            mime_type: descriptor.mime_type.clone(),
            codec: descriptor.codec(),
        })
    }

    /// Request-path boundary check: blank extensions are rejected before the
    /// registry is consulted.
    pub fn check_request_extension(
        &self,
        extension: &str,
    ) -> Result<&FormatDescriptor, FormatError> {
        if normalize_extension(extension).is_none() {
            return Err(FormatError::InvalidExtension {
                extension: extension.to_string(),
            });
        }
        self.lookup_format(extension)
            .ok_or_else(|| FormatError::UnsupportedFormat {
                extension: extension.trim().to_string(),
            })
    }

    /// Check externally extracted stream parameters against a format's constraints
    pub fn validate_stream_format(
        &self,
        extension: &str,
        sample_rate: u32,
        channels: u16,
    ) -> Result<(), FormatError> {
        let descriptor = self.check_request_extension(extension)?;
        if let Some(expected) = descriptor.sample_rate {
            if expected != sample_rate {
                return Err(FormatError::IncompatibleStream {
                    extension: descriptor.extension.clone(),
                    reason: format!("sample rate {} Hz, expected {} Hz", sample_rate, expected),
                });
            }
        }
        if let Some(expected) = descriptor.channels {
            if expected != channels {
                return Err(FormatError::IncompatibleStream {
                    extension: descriptor.extension.clone(),
                    reason: format!("{} channels, expected {}", channels, expected),
                });
            }
        }
        Ok(())
    }

    /// All formats in insertion order
    pub fn formats(&self) -> &[FormatDescriptor] {
        &self.formats
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self {
            formats: default_formats(),
        }
    }
}

/// Formats supported out of the box
pub fn default_formats() -> Vec<FormatDescriptor> {
    vec![
        FormatDescriptor::new("mp3", "audio/mpeg"),
        FormatDescriptor::new("wav", "audio/wav"),
        FormatDescriptor::new("flac", "audio/flac"),
        FormatDescriptor::new("ogg", "audio/ogg"),
        FormatDescriptor::new("m4a", "audio/mp4"),
        FormatDescriptor::new("aac", "audio/aac"),
    ]
}

/// Transcoding quality settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityPreset {
    /// Bitrate in bits per second
    pub bitrate: u32,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u16,
}

/// A quality preset with its lookup name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedQualityPreset {
    pub name: String,
    #[serde(flatten)]
    pub preset: QualityPreset,
}

/// Insertion-ordered table of quality presets
#[derive(Debug, Clone)]
pub struct QualityPresets {
    presets: Vec<NamedQualityPreset>,
}

impl QualityPresets {
    /// Build the table, validating each preset and rejecting duplicate names
    pub fn new(presets: Vec<NamedQualityPreset>) -> Result<Self, ConfigError> {
        let mut table: Vec<NamedQualityPreset> = Vec::with_capacity(presets.len());
        for named in presets {
            let invalid = |reason: &str| ConfigError::InvalidQualityPreset {
                name: named.name.clone(),
                reason: reason.to_string(),
            };
            if named.name.trim().is_empty() {
                return Err(invalid("name is blank"));
            }
            if named.preset.bitrate == 0 {
                return Err(invalid("bitrate must be positive"));
            }
            if named.preset.sample_rate == 0 {
                return Err(invalid("sample rate must be positive"));
            }
            if named.preset.channels == 0 || named.preset.channels > MAX_PRESET_CHANNELS {
                return Err(invalid("channel count must be between 1 and 8"));
            }
            if table.iter().any(|p| p.name == named.name) {
                return Err(ConfigError::DuplicateQualityPreset { name: named.name });
            }
            table.push(named);
        }
        Ok(Self { presets: table })
    }

    /// Look up a preset by name
    pub fn get(&self, name: &str) -> Option<&QualityPreset> {
        self.presets
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.preset)
    }

    /// All presets in insertion order
    pub fn list(&self) -> &[NamedQualityPreset] {
        &self.presets
    }
}

impl Default for QualityPresets {
    fn default() -> Self {
        Self {
            presets: default_quality_presets(),
        }
    }
}

/// Quality presets supported out of the box
pub fn default_quality_presets() -> Vec<NamedQualityPreset> {
    let preset = |name: &str, bitrate, sample_rate, channels| NamedQualityPreset {
        name: name.to_string(),
        preset: QualityPreset {
            bitrate,
            sample_rate,
            channels,
        },
    };
    vec![
        preset("low", 96_000, 22_050, 1),
        preset("medium", 192_000, 44_100, 2),
        preset("high", 320_000, 48_000, 2),
    ]
}
