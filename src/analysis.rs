//! Buffer analysis
//!
//! Pure, stateless numeric functions over read-only sample views. Nothing
//! here depends on configuration beyond the waveform presentation width.

use serde::{Deserialize, Serialize};

use crate::engine::SampleBuffer;
use crate::error::AnalysisError;

/// Longest accepted metadata string, in characters
const MAX_METADATA_LEN: usize = 256;

/// Root mean square: `sqrt(sum(sample^2) / n)`. Zero for an empty view.
pub fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt()
}

/// Maximum absolute sample value
pub fn peak(samples: &[f32]) -> f64 {
    samples
        .iter()
        .map(|&s| (s as f64).abs())
        .fold(0.0, f64::max)
}

/// Population variance of the raw (signed) sample values
pub fn variance(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&s| s as f64).sum::<f64>() / n;
    samples
        .iter()
        .map(|&s| {
            let d = s as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n
}

/// Mean sample value
pub fn dc_offset(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|&s| s as f64).sum::<f64>() / samples.len() as f64
}

/// Fraction of samples at or beyond full scale
pub fn clipping_ratio(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let clipped = samples.iter().filter(|s| s.abs() >= 1.0).count();
    clipped as f64 / samples.len() as f64
}

/// Downsample to `width` points, each the mean absolute value of one chunk.
///
/// Chunks are `floor(n / width)` samples long; trailing samples beyond
/// `width * chunk` are dropped.
pub fn waveform(samples: &[f32], width: usize) -> Result<Vec<f64>, AnalysisError> {
    if width == 0 || width > samples.len() {
        return Err(AnalysisError::InvalidWidth {
            width,
            len: samples.len(),
        });
    }
    let chunk = samples.len() / width;
    Ok(samples
        .chunks_exact(chunk)
        .take(width)
        .map(|c| c.iter().map(|&s| (s as f64).abs()).sum::<f64>() / chunk as f64)
        .collect())
}

/// Scale every sample by `1 / peak`. Silence is returned unchanged.
pub fn normalize(samples: &[f32]) -> Vec<f32> {
    let p = peak(samples);
    if p == 0.0 {
        return samples.to_vec();
    }
    samples.iter().map(|&s| (s as f64 / p) as f32).collect()
}

/// Convert decibels to linear amplitude
#[inline]
pub fn decibel_to_linear(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}

/// Convert linear amplitude to decibels. Defined for strictly positive input.
pub fn linear_to_decibel(linear: f64) -> Result<f64, AnalysisError> {
    if linear > 0.0 && linear.is_finite() {
        Ok(20.0 * linear.log10())
    } else {
        Err(AnalysisError::InvalidGain { linear })
    }
}

/// Loudness and shape summary of a buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferSummary {
    pub rms: f64,
    pub peak: f64,
    pub variance: f64,
    /// `None` for silence
    pub rms_db: Option<f64>,
    /// `None` for silence
    pub peak_db: Option<f64>,
    pub dc_offset: f64,
    pub clipping_ratio: f64,
    pub duration_secs: f64,
    pub frames: usize,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Summarize interleaved samples. Duration is `frames / sample_rate`.
pub fn extract_summary(
    samples: &[f32],
    sample_rate: u32,
    channels: u16,
) -> Result<BufferSummary, AnalysisError> {
    if sample_rate == 0 {
        return Err(AnalysisError::InvalidSampleRate { sample_rate });
    }
    if channels == 0 {
        return Err(AnalysisError::InvalidChannelCount { channels });
    }
    let rms = rms(samples);
    let peak = peak(samples);
    let frames = samples.len() / channels as usize;
    Ok(BufferSummary {
        rms,
        peak,
        variance: variance(samples),
        rms_db: linear_to_decibel(rms).ok(),
        peak_db: linear_to_decibel(peak).ok(),
        dc_offset: dc_offset(samples),
        clipping_ratio: clipping_ratio(samples),
        duration_secs: frames as f64 / sample_rate as f64,
        frames,
        sample_rate,
        channels,
    })
}

/// Summarize a buffer whose shape was validated at construction
pub fn summarize(buffer: &SampleBuffer) -> BufferSummary {
    let samples = buffer.samples();
    let rms = rms(samples);
    let peak = peak(samples);
    BufferSummary {
        rms,
        peak,
        variance: variance(samples),
        rms_db: linear_to_decibel(rms).ok(),
        peak_db: linear_to_decibel(peak).ok(),
        dc_offset: dc_offset(samples),
        clipping_ratio: clipping_ratio(samples),
        duration_secs: buffer.duration_secs(),
        frames: buffer.frames(),
        sample_rate: buffer.sample_rate(),
        channels: buffer.channels(),
    }
}

/// Summary plus waveform, as consumed by upload/preview collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub summary: BufferSummary,
    pub waveform: Vec<f64>,
}

/// Compute the summary and waveform of a buffer concurrently.
///
/// Both computations only read the buffer, so they share the view.
pub fn preview(buffer: &SampleBuffer, width: usize) -> Result<AnalysisReport, AnalysisError> {
    let (summary, waveform) = std::thread::scope(|scope| {
        let waveform = scope.spawn(|| waveform(buffer.samples(), width));
        let summary = summarize(buffer);
        let waveform = waveform.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic));
        (summary, waveform)
    });
    Ok(AnalysisReport {
        summary,
        waveform: waveform?,
    })
}

/// Track metadata supplied by an external extractor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub year: Option<u32>,
    #[serde(default)]
    pub track_number: Option<u32>,
}

impl TrackMetadata {
    /// Check the shape of externally supplied metadata
    pub fn validate(&self) -> Result<(), AnalysisError> {
        let text_fields = [
            ("title", &self.title),
            ("artist", &self.artist),
            ("album", &self.album),
            ("genre", &self.genre),
        ];
        for (field, value) in text_fields {
            if let Some(value) = value {
                if value.trim().is_empty() {
                    return Err(AnalysisError::InvalidMetadata {
                        field,
                        reason: "must not be blank".to_string(),
                    });
                }
                if value.chars().count() > MAX_METADATA_LEN {
                    return Err(AnalysisError::InvalidMetadata {
                        field,
                        reason: format!("longer than {} characters", MAX_METADATA_LEN),
                    });
                }
            }
        }
        if let Some(year) = self.year {
            if !(1000..=9999).contains(&year) {
                return Err(AnalysisError::InvalidMetadata {
                    field: "year",
                    reason: format!("{} is not a four-digit year", year),
                });
            }
        }
        if self.track_number == Some(0) {
            return Err(AnalysisError::InvalidMetadata {
                field: "track_number",
                reason: "track numbers start at 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use test_case::test_case;

    #[test_case(0.25 ; "quiet")]
    #[test_case(0.5 ; "half scale")]
    #[test_case(1.0 ; "full scale")]
    fn test_rms_of_alternating_constant_amplitude(amplitude: f32) {
        let samples: Vec<f32> = (0..64)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .collect();
        assert_relative_eq!(rms(&samples), amplitude as f64, epsilon = 1e-9);
    }

    #[test]
    fn test_rms_of_silence_is_zero() {
        assert_eq!(rms(&[0.0, 0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_peak_and_variance() {
        let samples = [0.5, -0.75, 0.25, 0.0];
        assert_eq!(peak(&samples), 0.75);
        // mean 0.0, squares sum to 0.875
        assert_relative_eq!(variance(&samples), 0.875 / 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_variance_uses_signed_values() {
        // |x| is constant, but the signed values vary around zero
        assert_relative_eq!(variance(&[1.0, -1.0]), 1.0, epsilon = 1e-12);
        assert_eq!(variance(&[0.5, 0.5]), 0.0);
    }

    #[test]
    fn test_waveform() {
        assert_eq!(waveform(&[1.0, 0.0, 1.0, 0.0], 2).unwrap(), vec![0.5, 0.5]);
    }

    #[test]
    fn test_waveform_drops_trailing_samples() {
        let result = waveform(&[1.0, 1.0, 0.0, 0.0, 1.0], 2).unwrap();
        assert_eq!(result, vec![1.0, 0.0]);
    }

    #[test]
    fn test_waveform_rejects_bad_width() {
        assert_eq!(
            waveform(&[1.0, 0.0], 3),
            Err(AnalysisError::InvalidWidth { width: 3, len: 2 })
        );
        assert!(waveform(&[1.0, 0.0], 0).is_err());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(&[2.0, 4.0, 8.0]), vec![0.25, 0.5, 1.0]);
        assert_eq!(normalize(&[0.0, 0.0, 0.0]), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize(&[0.1, -0.3, 0.2, 0.05]);
        let twice = normalize(&once);
        for (a, b) in once.iter().zip(&twice) {
            assert_relative_eq!(*a, *b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_decibel_conversion() {
        assert_eq!(decibel_to_linear(0.0), 1.0);
        assert_relative_eq!(decibel_to_linear(20.0), 10.0, epsilon = 1e-12);
        assert_relative_eq!(linear_to_decibel(10.0).unwrap(), 20.0, epsilon = 1e-12);
        assert_eq!(
            linear_to_decibel(0.0),
            Err(AnalysisError::InvalidGain { linear: 0.0 })
        );
        assert!(linear_to_decibel(-1.0).is_err());
    }

    #[test]
    fn test_extract_summary_duration() {
        let samples = vec![0.5f32; 96_000];
        let summary = extract_summary(&samples, 48_000, 2).unwrap();
        assert_eq!(summary.frames, 48_000);
        assert_relative_eq!(summary.duration_secs, 1.0);
        assert_relative_eq!(summary.rms, 0.5, epsilon = 1e-9);
        assert!(extract_summary(&samples, 0, 2).is_err());
    }

    #[test]
    fn test_summary_of_silence_has_no_db() {
        let summary = extract_summary(&[0.0; 16], 44_100, 1).unwrap();
        assert_eq!(summary.rms_db, None);
        assert_eq!(summary.peak_db, None);
    }

    #[test]
    fn test_preview_matches_sequential() {
        let buffer =
            SampleBuffer::mono((0..1000).map(|i| (i as f32 * 0.01).sin()).collect(), 44_100)
                .unwrap();
        let report = preview(&buffer, 10).unwrap();
        assert_eq!(report.summary, summarize(&buffer));
        assert_eq!(report.waveform, waveform(buffer.samples(), 10).unwrap());
    }

    #[test]
    fn test_metadata_validation() {
        let mut metadata = TrackMetadata {
            title: Some("Song".to_string()),
            year: Some(2024),
            ..Default::default()
        };
        assert!(metadata.validate().is_ok());

        metadata.artist = Some("  ".to_string());
        assert!(matches!(
            metadata.validate(),
            Err(AnalysisError::InvalidMetadata { field: "artist", .. })
        ));

        metadata.artist = None;
        metadata.year = Some(99);
        assert!(metadata.validate().is_err());
    }
}
