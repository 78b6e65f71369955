use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Context as _;

use crate::error::PipelineError;
use crate::formats::Segment;

pub const MANIFEST_FILE_NAME: &str = "files.txt";
pub const TARGET_BITRATE: &str = "128k";

/// Finds an `ffmpeg` executable on `PATH`.
pub fn locate_ffmpeg() -> Option<PathBuf> {
    let name = if cfg!(windows) { "ffmpeg.exe" } else { "ffmpeg" };
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Resolves the encoder from an explicit setting, else from `PATH`.
pub fn resolve_encoder(explicit: Option<&Path>) -> Result<PathBuf, PipelineError> {
    match explicit {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(path) => Err(PipelineError::EncoderNotConfigured(format!(
            "{} does not exist",
            path.display()
        ))),
        None => locate_ffmpeg().ok_or_else(|| {
            PipelineError::EncoderNotConfigured(
                "ffmpeg was not found on PATH; pass --ffmpeg".to_string(),
            )
        }),
    }
}

/// One concat-demuxer line per segment, forward slashes, quotes escaped.
pub fn render_manifest(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        let path = segment.path.to_string_lossy().replace('\\', "/");
        let path = path.replace('\'', r"'\''");
        out.push_str(&format!("file '{path}'\n"));
    }
    out
}

/// Concatenates `segments` (already in playback order) into `output` with a
/// single encoder run. The manifest is written into `work_dir`.
///
/// On a non-zero exit the diagnostics are returned and any partial output
/// is removed.
pub async fn assemble(
    encoder: &Path,
    segments: &[Segment],
    work_dir: &Path,
    output: &Path,
) -> anyhow::Result<()> {
    let manifest_path = work_dir.join(MANIFEST_FILE_NAME);
    tokio::fs::write(&manifest_path, render_manifest(segments))
        .await
        .with_context(|| format!("write concat manifest: {}", manifest_path.display()))?;

    tracing::info!(
        encoder = %encoder.display(),
        segments = segments.len(),
        output = %output.display(),
        "merge segments"
    );

    // `output()` drains stdout and stderr before the exit status is read.
    let result = tokio::process::Command::new(encoder)
        .arg("-f")
        .arg("concat")
        .arg("-safe")
        .arg("0")
        .arg("-i")
        .arg(&manifest_path)
        .arg("-c:a")
        .arg("aac")
        .arg("-b:a")
        .arg(TARGET_BITRATE)
        .arg("-y")
        .arg(output)
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("spawn encoder: {}", encoder.display()))?;

    if !result.status.success() {
        let diagnostics = String::from_utf8_lossy(&result.stderr).into_owned();
        tracing::error!(status = %result.status, "encoder output:\n{diagnostics}");
        remove_partial_output(output);
        return Err(PipelineError::EncodingFailure {
            status: result.status.to_string(),
            diagnostics,
        }
        .into());
    }

    Ok(())
}

fn remove_partial_output(output: &Path) {
    if !output.exists() {
        return;
    }
    if let Err(err) = fs::remove_file(output) {
        tracing::warn!(output = %output.display(), error = %err, "remove partial output");
    }
}

/// Copies every segment into `export_dir`, creating it if needed.
pub fn export_segments(segments: &[Segment], export_dir: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(export_dir)
        .with_context(|| format!("create segment export dir: {}", export_dir.display()))?;
    for segment in segments {
        let name = segment
            .path
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("segment has no file name: {}", segment.path.display()))?;
        let dest = export_dir.join(name);
        fs::copy(&segment.path, &dest).with_context(|| {
            format!(
                "copy segment {} -> {}",
                segment.path.display(),
                dest.display()
            )
        })?;
    }
    tracing::info!(dir = %export_dir.display(), segments = segments.len(), "segments exported");
    Ok(())
}
