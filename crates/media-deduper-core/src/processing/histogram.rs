//! # Colour Histogram Module
//!
//! A [`Histogram`] is a cheap perceptual fingerprint: for each of the alpha, red,
//! green and blue channels it records how the pixel values of an image are
//! distributed across [`BIN_SIZE`] equally wide bins. Each channel is normalised so
//! its bins sum to 1.
//!
//! ## Similarity
//!
//! Two histograms are compared with a channel-wise intersection: for every bin the
//! smaller of the two frequencies is taken, the sums are averaged across the four
//! channels. Identical distributions score `1.0`, disjoint ones `0.0`. `min` is
//! symmetric, so `a.similarity(&b) == b.similarity(&a)` holds bit for bit.
//!
//! ## Colour predicates
//!
//! The colour spread is the mean, over all bins, of the difference between the
//! largest and smallest of the red/green/blue frequencies in that bin. A greyscale
//! image has identical channels and a spread of zero.
//!
//! - `is_black_and_white`: spread below [`BLACK_AND_WHITE_THRESHOLD`]
//! - `is_colorful`: spread above [`COLORFUL_THRESHOLD`]
//!
//! Images in between are neither.
use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::video_frame::extract_frame;
use crate::error::{Error, Result};
use crate::types::MediaFormat;

/// Number of bins per channel
pub const BIN_SIZE: usize = 32;

/// Images larger than this (on either side) are downsampled before counting
const SAMPLE_DIMENSION: u32 = 512;

/// Allowed deviation of a channel sum from 1
const NORMALIZATION_EPSILON: f64 = 1e-6;

/// Colour spread at or below which an image counts as black and white
pub const BLACK_AND_WHITE_THRESHOLD: f64 = 0.002;

/// Colour spread at or above which an image counts as colourful
pub const COLORFUL_THRESHOLD: f64 = 0.015;

/// Normalised per-channel colour distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    alpha: [f64; BIN_SIZE],
    red: [f64; BIN_SIZE],
    green: [f64; BIN_SIZE],
    blue: [f64; BIN_SIZE],
}

impl Histogram {
    /// Build a histogram from already normalised channels
    pub fn from_channels(
        alpha: [f64; BIN_SIZE],
        red: [f64; BIN_SIZE],
        green: [f64; BIN_SIZE],
        blue: [f64; BIN_SIZE],
    ) -> Result<Self> {
        let histogram = Self {
            alpha,
            red,
            green,
            blue,
        };
        histogram.validate()?;
        Ok(histogram)
    }

    /// Count the pixels of a decoded image
    pub fn from_image(img: &DynamicImage) -> Result<Self> {
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Err(Error::UnsupportedFormat("image has no pixels".to_string()));
        }

        let sampled;
        let img = if width > SAMPLE_DIMENSION || height > SAMPLE_DIMENSION {
            sampled = img.thumbnail(SAMPLE_DIMENSION, SAMPLE_DIMENSION);
            &sampled
        } else {
            img
        };

        let rgba = img.to_rgba8();
        let mut counts = [[0u64; BIN_SIZE]; 4];
        for pixel in rgba.pixels() {
            let [r, g, b, a] = pixel.0;
            counts[0][bin_of(a)] += 1;
            counts[1][bin_of(r)] += 1;
            counts[2][bin_of(g)] += 1;
            counts[3][bin_of(b)] += 1;
        }

        let total = (rgba.width() as u64 * rgba.height() as u64) as f64;
        let normalise = |channel: &[u64; BIN_SIZE]| {
            let mut out = [0.0; BIN_SIZE];
            for (slot, count) in out.iter_mut().zip(channel.iter()) {
                *slot = *count as f64 / total;
            }
            out
        };

        Self::from_channels(
            normalise(&counts[0]),
            normalise(&counts[1]),
            normalise(&counts[2]),
            normalise(&counts[3]),
        )
    }

    pub fn alpha(&self) -> &[f64; BIN_SIZE] {
        &self.alpha
    }

    pub fn red(&self) -> &[f64; BIN_SIZE] {
        &self.red
    }

    pub fn green(&self) -> &[f64; BIN_SIZE] {
        &self.green
    }

    pub fn blue(&self) -> &[f64; BIN_SIZE] {
        &self.blue
    }

    /// Check the channel invariant: finite, non-negative, summing to 1
    pub fn validate(&self) -> Result<()> {
        for (name, channel) in self.channels() {
            if channel.iter().any(|v| !v.is_finite() || *v < 0.0) {
                return Err(Error::InvalidHistogram(format!(
                    "{} channel holds a negative or non-finite frequency",
                    name
                )));
            }
            let sum: f64 = channel.iter().sum();
            if (sum - 1.0).abs() > NORMALIZATION_EPSILON {
                return Err(Error::InvalidHistogram(format!(
                    "{} channel sums to {}",
                    name, sum
                )));
            }
        }
        Ok(())
    }

    /// Channel-wise intersection in `[0, 1]`
    pub fn similarity(&self, other: &Histogram) -> f64 {
        let overlap: f64 = self
            .channels()
            .iter()
            .zip(other.channels().iter())
            .map(|((_, a), (_, b))| intersection(a, b))
            .sum();

        (overlap / 4.0).clamp(0.0, 1.0)
    }

    /// Mean per-bin spread between the colour channels
    pub fn color_spread(&self) -> f64 {
        let mut spread = 0.0;
        for i in 0..BIN_SIZE {
            let max = self.red[i].max(self.green[i]).max(self.blue[i]);
            let min = self.red[i].min(self.green[i]).min(self.blue[i]);
            spread += max - min;
        }
        spread / BIN_SIZE as f64
    }

    pub fn is_colorful(&self) -> bool {
        self.color_spread() >= COLORFUL_THRESHOLD
    }

    pub fn is_black_and_white(&self) -> bool {
        self.color_spread() <= BLACK_AND_WHITE_THRESHOLD
    }

    fn channels(&self) -> [(&'static str, &[f64; BIN_SIZE]); 4] {
        [
            ("alpha", &self.alpha),
            ("red", &self.red),
            ("green", &self.green),
            ("blue", &self.blue),
        ]
    }
}

#[inline]
fn bin_of(value: u8) -> usize {
    value as usize * BIN_SIZE / 256
}

#[inline]
fn intersection(a: &[f64; BIN_SIZE], b: &[f64; BIN_SIZE]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x.min(*y)).sum()
}

/// Extract a histogram from a media file
///
/// Videos are sampled through a representative frame (see
/// [`super::video_frame`]). Unknown extensions, and videos `ffmpeg` can not
/// read, fail with [`Error::UnsupportedFormat`]; callers treat that as "no
/// histogram".
pub fn extract<P: AsRef<Path>>(path: P) -> Result<Histogram> {
    let path = path.as_ref();
    let format = MediaFormat::from_path(path);
    if !format.has_histogram_decoder() {
        return Err(Error::UnsupportedFormat(format!(
            "no histogram decoder for {}",
            path.display()
        )));
    }

    let img = match format {
        MediaFormat::Video(_) => extract_frame(path)?,
        _ => image::open(path).map_err(|e| match e {
            image::ImageError::Unsupported(inner) => Error::UnsupportedFormat(inner.to_string()),
            image::ImageError::IoError(io) => Error::Io(io),
            other => Error::Image(other),
        })?,
    };

    Histogram::from_image(&img)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use image::{Rgba, RgbaImage};
    use tempfile::tempdir;

    #[test]
    fn test_from_image_is_normalised() {
        let img = RgbaImage::from_fn(40, 30, |x, y| Rgba([(x * 6) as u8, (y * 8) as u8, 90, 255]));
        let histogram = Histogram::from_image(&DynamicImage::ImageRgba8(img)).unwrap();

        for channel in [
            histogram.alpha(),
            histogram.red(),
            histogram.green(),
            histogram.blue(),
        ] {
            let sum: f64 = channel.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9);
        }
        assert_eq!(histogram.alpha()[BIN_SIZE - 1], 1.0);
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let a = rgb(&[(3, 0.5), (9, 0.5)], &[(4, 1.0)], &[(20, 0.25), (21, 0.75)]);
        let b = rgb(&[(3, 0.2), (10, 0.8)], &[(4, 0.6), (5, 0.4)], &[(21, 1.0)]);

        assert_eq!(a.similarity(&b), b.similarity(&a));
        assert_eq!(a.similarity(&a), 1.0);
    }

    #[test]
    fn test_similarity_range() {
        let a = grey(&[(0, 1.0)]);
        let b = grey(&[(31, 1.0)]);
        // Only the alpha channel overlaps
        assert!((a.similarity(&b) - 0.25).abs() < 1e-12);

        let c = grey(&[(0, 0.9), (1, 0.1)]);
        let expected = (1.0 + 0.9 * 3.0) / 4.0;
        assert!((a.similarity(&c) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_colour_predicates() {
        let grey_hist = grey(&[(5, 0.5), (25, 0.5)]);
        assert!(grey_hist.is_black_and_white());
        assert!(!grey_hist.is_colorful());

        let red_hist = rgb(&[(31, 1.0)], &[(0, 1.0)], &[(0, 1.0)]);
        assert!(red_hist.is_colorful());
        assert!(!red_hist.is_black_and_white());
    }

    #[test]
    fn test_from_channels_rejects_unnormalised() {
        let bad = channel(&[(0, 0.5)]);
        let good = channel(&[(0, 1.0)]);
        assert!(matches!(
            Histogram::from_channels(good, bad, good, good),
            Err(Error::InvalidHistogram(_))
        ));
    }

    #[test]
    fn test_extract_from_png() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gradient.png");
        let img = image::RgbImage::from_fn(64, 64, |x, _| image::Rgb([(x * 4) as u8, 0, 200]));
        img.save(&path).unwrap();

        let histogram = extract(&path).unwrap();
        assert!(histogram.is_colorful());
        assert_eq!(histogram.blue()[bin_of(200)], 1.0);
    }

    #[test]
    fn test_unreadable_video_is_unsupported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"not really a video").unwrap();

        assert!(matches!(extract(&path), Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn test_extract_from_video_frame() {
        let ffmpeg = std::process::Command::new("ffmpeg").arg("-version").output();
        if !ffmpeg.map(|out| out.status.success()).unwrap_or(false) {
            return;
        }
        let dir = tempdir().unwrap();
        let path = dir.path().join("red.mkv");
        let status = std::process::Command::new("ffmpeg")
            .args(["-v", "error", "-f", "lavfi", "-i", "color=c=red:s=64x48:d=2"])
            .args(["-c:v", "ffv1"])
            .arg(&path)
            .status()
            .unwrap();
        assert!(status.success());

        let histogram = extract(&path).unwrap();
        assert!(histogram.is_colorful());
        assert!(histogram.red()[BIN_SIZE - 2..].iter().sum::<f64>() > 0.9);
    }
}
