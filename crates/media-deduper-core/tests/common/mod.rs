#![allow(dead_code)]
use image::{Rgba, RgbaImage};
use std::fs;
use std::path::{Path, PathBuf};

/// Write a solid-colour PNG with every `stride`-th pixel tinted by `tint`
pub fn create_test_png(dir: &Path, name: &str, colour: [u8; 3], tint: u8, stride: u32) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    let [r, g, b] = colour;
    let img = RgbaImage::from_fn(48, 48, |x, y| {
        if stride > 0 && (x * 48 + y) % stride == 0 {
            Rgba([r.saturating_add(tint), g, b, 255])
        } else {
            Rgba([r, g, b, 255])
        }
    });
    img.save(&path).unwrap();
    path
}

/// Solid PNG with no tint
pub fn create_plain_png(dir: &Path, name: &str, colour: [u8; 3]) -> PathBuf {
    create_test_png(dir, name, colour, 0, 0)
}

/// Horizontal grey gradient PNG
pub fn create_grey_png(dir: &Path, name: &str, offset: u8) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    let img = RgbaImage::from_fn(64, 4, |x, _| {
        let v = (x as u8).saturating_mul(2).saturating_add(offset);
        Rgba([v, v, v, 255])
    });
    img.save(&path).unwrap();
    path
}

/// Byte-identical copy of `source` under a new name
pub fn copy_file(source: &Path, dir: &Path, name: &str) -> PathBuf {
    let target = dir.join(name);
    fs::copy(source, &target).unwrap();
    target
}
