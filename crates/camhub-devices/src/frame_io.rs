//! Writing captured frames to disk.

use std::path::{Path, PathBuf};

use image::RgbImage;

use camhub_core::{CameraError, ColorOrder, Frame, Result};

/// Persist `frame` at `path`, creating the parent directory if needed.
///
/// The format follows the file extension. Encoding runs on the blocking pool.
pub async fn save_frame(frame: &Frame, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let image = to_rgb_image(frame)?;
    let target: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || image.save(&target))
        .await
        .map_err(|e| CameraError::Unexpected(format!("Image encoder task failed: {}", e)))?
        .map_err(|e| {
            CameraError::Capture(format!("Failed to save image to {}: {}", path.display(), e))
        })
}

fn to_rgb_image(frame: &Frame) -> Result<RgbImage> {
    if frame.data.len() != frame.expected_len() {
        return Err(CameraError::Capture(format!(
            "Frame buffer holds {} bytes, expected {} for {}x{}x3",
            frame.data.len(),
            frame.expected_len(),
            frame.width,
            frame.height
        )));
    }

    let data = match frame.color_order {
        ColorOrder::Rgb => frame.data.clone(),
        ColorOrder::Bgr => frame
            .data
            .chunks_exact(Frame::CHANNELS)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect(),
    };

    RgbImage::from_raw(frame.width, frame.height, data)
        .ok_or_else(|| CameraError::Capture("Frame dimensions do not match buffer".to_string()))
}
