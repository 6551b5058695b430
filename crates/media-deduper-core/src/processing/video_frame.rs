//! Representative frame of a video, decoded through an external `ffmpeg`.
use image::DynamicImage;
use log::debug;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Command;

use crate::error::{Error, Result};

/// Seconds into the clip the frame is taken from, past any fade-in
const FRAME_OFFSET_SECS: f64 = 1.0;

/// Decode one frame of the video at `path`
///
/// Clips shorter than the offset fall back to their first frame. A missing
/// `ffmpeg` binary or a file it can not read fails with
/// [`Error::UnsupportedFormat`], so the item is kept without a histogram.
pub fn extract_frame(path: &Path) -> Result<DynamicImage> {
    let png = match frame_png(path, FRAME_OFFSET_SECS)? {
        Some(png) => png,
        None => frame_png(path, 0.0)?.ok_or_else(|| {
            Error::UnsupportedFormat(format!("no video frame in {}", path.display()))
        })?,
    };
    Ok(image::load_from_memory(&png)?)
}

/// PNG bytes of the frame at `offset`, `None` if the clip ends before it
fn frame_png(path: &Path, offset: f64) -> Result<Option<Vec<u8>>> {
    let output = Command::new("ffmpeg")
        .args(["-v", "error", "-nostdin", "-ss"])
        .arg(format!("{:.3}", offset))
        .arg("-i")
        .arg(path)
        .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"])
        .output()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                Error::UnsupportedFormat("ffmpeg is not installed".to_string())
            }
            _ => Error::Io(e),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = stderr.lines().next().unwrap_or("unknown error");
        return Err(Error::UnsupportedFormat(format!(
            "ffmpeg could not read {}: {}",
            path.display(),
            reason
        )));
    }

    if output.stdout.is_empty() {
        debug!("No frame at {:.1}s in {}", offset, path.display());
        return Ok(None);
    }
    Ok(Some(output.stdout))
}
