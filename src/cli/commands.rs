//! CLI command implementations

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use waveline::pipeline::StageMetric;
use waveline::{AudioEngine, CoreConfig, EffectKind, PipelineWarning, SampleBuffer};

use super::wav::{read_wav, write_wav};

/// Load a configuration snapshot, or the defaults when no path is given
pub fn load_config(path: Option<&Path>) -> Result<CoreConfig> {
    let Some(path) = path else {
        return Ok(CoreConfig::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config = CoreConfig::from_json_str(&json)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    debug!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

fn engine(config: Option<&Path>) -> Result<AudioEngine> {
    let config = load_config(config)?;
    AudioEngine::new(config).context("invalid configuration")
}

/// Print loudness summary and waveform of a WAV file
pub fn analyze(input: &Path, config: Option<&Path>, json: bool) -> Result<()> {
    let engine = engine(config)?;
    let buffer = read_wav(input)?;
    let report = engine.analyze(&buffer)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let summary = &report.summary;
    println!("File:        {}", input.display());
    println!(
        "Format:      {} Hz, {} channel(s), {} frames ({:.3} s)",
        summary.sample_rate, summary.channels, summary.frames, summary.duration_secs
    );
    println!("RMS:         {:.6} ({})", summary.rms, db_label(summary.rms_db));
    println!("Peak:        {:.6} ({})", summary.peak, db_label(summary.peak_db));
    println!("Variance:    {:.6}", summary.variance);
    println!("DC offset:   {:.6}", summary.dc_offset);
    println!("Clipping:    {:.4}%", summary.clipping_ratio * 100.0);
    println!("Waveform:    {} points", report.waveform.len());
    Ok(())
}

fn db_label(db: Option<f64>) -> String {
    match db {
        Some(db) => format!("{db:.2} dBFS"),
        None => "silent".to_string(),
    }
}

/// Totals across all chunks of a file
#[derive(Debug, Default)]
struct ProcessTotals {
    chunks: usize,
    stage_micros: Vec<(EffectKind, bool, u64)>,
    warnings: Vec<PipelineWarning>,
}

impl ProcessTotals {
    fn add(&mut self, metrics: &[StageMetric], warnings: Vec<PipelineWarning>) {
        if self.stage_micros.is_empty() {
            self.stage_micros = metrics
                .iter()
                .map(|m| (m.stage, m.enabled, 0))
                .collect();
        }
        for (total, metric) in self.stage_micros.iter_mut().zip(metrics) {
            total.2 += metric.duration_micros;
        }
        self.warnings.extend(warnings);
        self.chunks += 1;
    }
}

/// Split a buffer into chunks the batch path accepts
fn chunk(buffer: &SampleBuffer, max_len: usize) -> Result<Vec<SampleBuffer>> {
    let channels = buffer.channels() as usize;
    let frames_per_chunk = max_len / channels;
    anyhow::ensure!(
        frames_per_chunk > 0,
        "buffer_size {max_len} is smaller than one frame of {channels} channels"
    );
    buffer
        .samples()
        .chunks(frames_per_chunk * channels)
        .map(|samples| Ok(buffer.with_samples(samples.to_vec())?))
        .collect()
}

/// Run a WAV file through the configured chain, chunk by chunk.
///
/// Every chunk starts from fresh stage state; tails do not cross chunk
/// boundaries.
pub fn process(input: &Path, output: &Path, config: Option<&Path>, bit_depth: u16) -> Result<()> {
    let engine = engine(config)?;
    let buffer = read_wav(input)?;
    let max_len = engine.config().performance.buffer_size;

    let mut totals = ProcessTotals::default();
    let mut processed = Vec::with_capacity(buffer.len());
    for piece in chunk(&buffer, max_len)? {
        let result = engine.process(piece, None)?;
        totals.add(&result.stage_metrics, result.warnings);
        processed.extend_from_slice(result.output.samples());
    }

    let output_buffer = buffer.with_samples(processed)?;
    write_wav(output, &output_buffer, bit_depth)?;
    info!(chunks = totals.chunks, output = %output.display(), "Processing complete");

    println!("Processed {} chunk(s) -> {}", totals.chunks, output.display());
    for (stage, enabled, micros) in &totals.stage_micros {
        let state = if *enabled { "on " } else { "off" };
        println!("  [{state}] {stage:<20} {micros:>10} us");
    }
    if !totals.warnings.is_empty() {
        println!("Warnings ({}):", totals.warnings.len());
        for warning in totals.warnings.iter().take(10) {
            println!("  - {warning}");
        }
    }
    Ok(())
}

/// List supported formats
pub fn formats(config: Option<&Path>) -> Result<()> {
    let engine = engine(config)?;
    println!("{:<6} {:<14} {:<10}", "EXT", "MIME", "CODEC");
    for format in engine.formats().formats() {
        println!(
            "{:<6} {:<14} {:<10}",
            format.extension,
            format.mime_type,
            format.codec()
        );
    }
    Ok(())
}

/// List quality and reverb presets
pub fn presets(config: Option<&Path>) -> Result<()> {
    let engine = engine(config)?;
    println!("Quality presets:");
    for named in engine.list_quality_presets() {
        let p = &named.preset;
        println!(
            "  {:<8} {:>4} kbps  {:>6} Hz  {} ch",
            named.name,
            p.bitrate / 1000,
            p.sample_rate,
            p.channels
        );
    }
    println!("Reverb presets:");
    for named in engine.reverb_presets().list() {
        let p = &named.preset;
        println!(
            "  {:<12} room {:.2}  damping {:.2}  width {:.2}  pre-delay {:.1} ms",
            named.name, p.room_size, p.damping, p.width, p.pre_delay_ms
        );
    }
    Ok(())
}

/// Validate a configuration file and summarize it
pub fn check_config(path: &Path) -> Result<()> {
    let config = load_config(Some(path))?;
    config.validate().context("configuration is invalid")?;
    let pipeline = config.pipeline_config()?;

    println!("Configuration OK: {}", path.display());
    for params in pipeline.stages() {
        let state = if params.is_enabled() { "on " } else { "off" };
        println!("  [{state}] {}", params.kind());
    }
    println!(
        "  threads {}, buffer {} samples, latency target {} ms",
        config.performance.thread_pool_size,
        config.performance.buffer_size,
        config.streaming.latency_target_ms
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_process_round_trip() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        let config_path = dir.path().join("config.json");

        let samples: Vec<f32> = (0..10_000).map(|i| 0.2 * (i as f32 * 0.03).sin()).collect();
        let buffer = SampleBuffer::mono(samples, 16_000).unwrap();
        write_wav(&input, &buffer, 32).unwrap();
        std::fs::write(
            &config_path,
            r#"{"effects": [{"kind": "amplification", "gain_db": -6.0}]}"#,
        )
        .unwrap();

        process(&input, &output, Some(&config_path), 32).unwrap();

        let result = read_wav(&output).unwrap();
        assert_eq!(result.len(), buffer.len());
        assert!(waveline::analysis::peak(result.samples()) < 0.11);
    }

    #[test]
    fn test_chunking_respects_frames() {
        let buffer = SampleBuffer::new(vec![0.0; 10], 8_000, 2).unwrap();
        let chunks = chunk(&buffer, 4).unwrap();
        let lens: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(lens, vec![4, 4, 2]);
        assert!(chunk(&buffer, 1).is_err());
    }

    #[test]
    fn test_check_config_rejects_bad_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"performance": {"thread_pool_size": 0}}"#).unwrap();
        assert!(check_config(&path).is_err());
    }

    #[test]
    fn test_default_config_without_path() {
        let config = load_config(None).unwrap();
        assert_eq!(config, CoreConfig::default());
    }
}
