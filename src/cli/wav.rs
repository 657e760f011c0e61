//! WAV file I/O for the CLI
//!
//! Container decoding lives here, outside the library: samples are read
//! into an interleaved `SampleBuffer` and written back with `hound`.

use std::path::Path;

use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use waveline::SampleBuffer;

/// Read a WAV file into an interleaved buffer
pub fn read_wav(path: &Path) -> Result<SampleBuffer> {
    let reader = WavReader::open(path)
        .with_context(|| format!("failed to open WAV file {}", path.display()))?;
    let spec = reader.spec();

    let samples = read_samples(reader, spec)
        .with_context(|| format!("failed to decode samples from {}", path.display()))?;

    SampleBuffer::new(samples, spec.sample_rate, spec.channels)
        .with_context(|| format!("invalid audio layout in {}", path.display()))
}

fn read_samples<R: std::io::Read>(mut reader: WavReader<R>, spec: WavSpec) -> Result<Vec<f32>> {
    let samples = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        (SampleFormat::Int, 8) => reader
            .samples::<i8>()
            .map(|s| s.map(|v| v as f32 / 128.0))
            .collect::<Result<Vec<_>, _>>()?,
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32_768.0))
            .collect::<Result<Vec<_>, _>>()?,
        // 24-bit is stored as i32 by hound
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 8_388_608.0))
            .collect::<Result<Vec<_>, _>>()?,
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 2_147_483_648.0))
            .collect::<Result<Vec<_>, _>>()?,
        (format, bits) => bail!("unsupported WAV encoding: {bits}-bit {format:?}"),
    };
    Ok(samples)
}

/// Write a buffer as 16-, 24- or 32-bit (float) WAV
pub fn write_wav(path: &Path, buffer: &SampleBuffer, bit_depth: u16) -> Result<()> {
    let spec = WavSpec {
        channels: buffer.channels(),
        sample_rate: buffer.sample_rate(),
        bits_per_sample: bit_depth,
        sample_format: if bit_depth == 32 {
            SampleFormat::Float
        } else {
            SampleFormat::Int
        },
    };

    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("failed to create {}", path.display()))?;

    match bit_depth {
        16 => {
            for &sample in buffer.samples() {
                writer.write_sample((sample * 32_767.0).clamp(-32_768.0, 32_767.0) as i16)?;
            }
        }
        24 => {
            for &sample in buffer.samples() {
                writer.write_sample((sample * 8_388_607.0).clamp(-8_388_608.0, 8_388_607.0) as i32)?;
            }
        }
        32 => {
            for &sample in buffer.samples() {
                writer.write_sample(sample)?;
            }
        }
        other => bail!("unsupported bit depth {other} (expected 16, 24 or 32)"),
    }

    writer
        .finalize()
        .with_context(|| format!("failed to finalize {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tempfile::tempdir;

    #[test]
    fn test_wav_round_trip_float() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let buffer = SampleBuffer::new(vec![0.5, -0.5, 0.25, -0.25], 22_050, 2).unwrap();

        write_wav(&path, &buffer, 32).unwrap();
        let read = read_wav(&path).unwrap();
        assert_eq!(read, buffer);
    }

    #[test]
    fn test_wav_round_trip_16_bit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tone16.wav");
        let buffer = SampleBuffer::mono(vec![0.5, -0.5, 0.0], 8_000).unwrap();

        write_wav(&path, &buffer, 16).unwrap();
        let read = read_wav(&path).unwrap();
        for (a, b) in read.samples().iter().zip(buffer.samples()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        assert!(read_wav(&dir.path().join("absent.wav")).is_err());
    }

    #[test]
    fn test_unsupported_bit_depth() {
        let dir = tempdir().unwrap();
        let buffer = SampleBuffer::mono(vec![0.1], 8_000).unwrap();
        assert!(write_wav(&dir.path().join("x.wav"), &buffer, 12).is_err());
    }
}
