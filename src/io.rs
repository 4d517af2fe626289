use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, Rgba, RgbaImage};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::OnceLock;

use crate::canvas::{BACKGROUND, ClassBuffer, ClassId, MAX_CLASS, RasterStore};
use crate::error::{EngineError, Result};

/// Side of the square mask the training server accepts.
pub const EXPORT_SIZE: u32 = 512;

/// RGB of classes 1..=8: red, orange, yellow, green, cyan, blue, purple, pink.
pub const PALETTE: [[u8; 3]; 8] = [
    [255, 0, 0],
    [255, 140, 0],
    [255, 230, 0],
    [0, 200, 0],
    [0, 255, 255],
    [0, 0, 255],
    [150, 0, 255],
    [255, 105, 180],
];

const STORAGE_BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);
const EXPORT_FOREGROUND: Rgba<u8> = Rgba([255, 0, 0, 255]);
const EXPORT_BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Opaque storage colour for a class id. Background is white.
pub fn class_color(class: ClassId) -> Rgba<u8> {
    match class {
        1..=MAX_CLASS => {
            let [r, g, b] = PALETTE[class as usize - 1];
            Rgba([r, g, b, 255])
        }
        _ => STORAGE_BACKGROUND,
    }
}

#[inline]
fn pack_rgb(r: u8, g: u8, b: u8) -> u32 {
    (r as u32) << 16 | (g as u32) << 8 | b as u32
}

fn palette_table() -> &'static HashMap<u32, ClassId> {
    static TABLE: OnceLock<HashMap<u32, ClassId>> = OnceLock::new();
    TABLE.get_or_init(|| {
        PALETTE
            .iter()
            .enumerate()
            .map(|(i, &[r, g, b])| (pack_rgb(r, g, b), i as ClassId + 1))
            .collect()
    })
}

/// How a decoded pixel was classified.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelMatch {
    Background,
    Exact(ClassId),
    Nearest(ClassId),
}

impl PixelMatch {
    pub fn class(self) -> ClassId {
        match self {
            PixelMatch::Background => BACKGROUND,
            PixelMatch::Exact(c) | PixelMatch::Nearest(c) => c,
        }
    }
}

/// Classify one storage pixel: translucent or near-white is background,
/// palette colours match exactly, anything else (anti-aliased edges) goes to
/// the closest palette entry by Manhattan distance.
pub fn classify_pixel(px: Rgba<u8>) -> PixelMatch {
    let [r, g, b, a] = px.0;
    if a < 128 || (r > 250 && g > 250 && b > 250) {
        return PixelMatch::Background;
    }
    match palette_table().get(&pack_rgb(r, g, b)) {
        Some(&class) => PixelMatch::Exact(class),
        None => PixelMatch::Nearest(nearest_class([r, g, b])),
    }
}

/// Palette class with the smallest Manhattan RGB distance. Ties go to the
/// lower class id.
pub fn nearest_class(rgb: [u8; 3]) -> ClassId {
    let mut best = 1;
    let mut best_dist = u32::MAX;
    for (i, entry) in PALETTE.iter().enumerate() {
        let dist: u32 = rgb
            .iter()
            .zip(entry)
            .map(|(&a, &b)| (a as i32 - b as i32).unsigned_abs())
            .sum();
        if dist < best_dist {
            best_dist = dist;
            best = i as ClassId + 1;
        }
    }
    best
}

// ============================================================================
// ENCODE
// ============================================================================

/// Persisted annotation: palette colour per class, opaque white background.
pub fn encode_for_storage(buffer: &ClassBuffer) -> RgbaImage {
    let (w, h) = (buffer.width(), buffer.height());
    let mut raw = vec![0u8; w as usize * h as usize * 4];
    raw.par_chunks_mut(4)
        .zip(buffer.as_raw().par_iter())
        .for_each(|(px, &class)| px.copy_from_slice(&class_color(class).0));
    RgbaImage::from_raw(w, h, raw).unwrap_or_else(|| RgbaImage::new(w, h))
}

/// Server export: any class is opaque red, background transparent,
/// nearest-neighbour resampled to `size` × `size`.
pub fn encode_for_export(buffer: &ClassBuffer, size: u32) -> RgbaImage {
    let resampled = buffer.resampled(size, size);
    let mut raw = vec![0u8; size as usize * size as usize * 4];
    raw.par_chunks_mut(4)
        .zip(resampled.as_raw().par_iter())
        .for_each(|(px, &class)| {
            let color = if class == BACKGROUND {
                EXPORT_BACKGROUND
            } else {
                EXPORT_FOREGROUND
            };
            px.copy_from_slice(&color.0);
        });
    RgbaImage::from_raw(size, size, raw).unwrap_or_else(|| RgbaImage::new(size, size))
}

// ============================================================================
// DECODE
// ============================================================================

/// Counts of how pixels were classified during a decode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub background: usize,
    pub exact: usize,
    pub nearest: usize,
}

impl DecodeStats {
    fn merge(mut self, other: DecodeStats) -> DecodeStats {
        self.background += other.background;
        self.exact += other.exact;
        self.nearest += other.nearest;
        self
    }
}

/// Decode a persisted annotation into a `width` × `height` buffer.
/// Mismatched image sizes are resampled nearest-neighbour.
pub fn decode(image: &RgbaImage, width: u32, height: u32) -> ClassBuffer {
    decode_with_stats(image, width, height).0
}

pub fn decode_with_stats(image: &RgbaImage, width: u32, height: u32) -> (ClassBuffer, DecodeStats) {
    let (iw, ih) = image.dimensions();
    let mut classes = vec![BACKGROUND; iw as usize * ih as usize];
    let stats = classes
        .par_chunks_mut(iw.max(1) as usize)
        .zip(image.as_raw().par_chunks(iw.max(1) as usize * 4))
        .map(|(row, src)| {
            let mut stats = DecodeStats::default();
            for (dst, px) in row.iter_mut().zip(src.chunks_exact(4)) {
                let m = classify_pixel(Rgba([px[0], px[1], px[2], px[3]]));
                match m {
                    PixelMatch::Background => stats.background += 1,
                    PixelMatch::Exact(_) => stats.exact += 1,
                    PixelMatch::Nearest(_) => stats.nearest += 1,
                }
                *dst = m.class();
            }
            stats
        })
        .reduce(DecodeStats::default, DecodeStats::merge);

    let native = ClassBuffer::from_raw(iw, ih, classes).unwrap_or_else(|| ClassBuffer::new(iw, ih));
    if (iw, ih) != (width, height) {
        tracing::debug!("annotation is {}x{}, resampling to {}x{}", iw, ih, width, height);
    }
    (native.resampled(width, height), stats)
}

/// Decode a red-on-transparent export or server prediction. Pixels with
/// R>128, G<128 and A>128 become `class`, everything else background.
pub fn decode_export(image: &RgbaImage, width: u32, height: u32, class: ClassId) -> ClassBuffer {
    let (iw, ih) = image.dimensions();
    let classes: Vec<ClassId> = image
        .as_raw()
        .par_chunks_exact(4)
        .map(|px| {
            if px[0] > 128 && px[1] < 128 && px[3] > 128 {
                class
            } else {
                BACKGROUND
            }
        })
        .collect();
    ClassBuffer::from_raw(iw, ih, classes)
        .unwrap_or_else(|| ClassBuffer::new(iw, ih))
        .resampled(width, height)
}

// ============================================================================
// FILES
// ============================================================================

/// PNG-encode an RGBA image in memory.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    PngEncoder::new(&mut out).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ColorType::Rgba8,
    )?;
    Ok(out)
}

/// Write `image` as PNG via a temporary sibling file and a rename, so a
/// reader never sees a half-written annotation.
pub fn write_png(image: &RgbaImage, path: &Path) -> Result<()> {
    // unique per write so concurrent writers never share a temp file
    let tmp = path.with_extension(format!("png.{}.tmp", uuid::Uuid::new_v4().simple()));
    let write = || -> std::result::Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            PngEncoder::new(&mut writer).write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                ColorType::Rgba8,
            )?;
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    };
    write().map_err(|e| {
        let _ = fs::remove_file(&tmp);
        EngineError::Write(format!("{}: {}", path.display(), e))
    })
}

/// Decode any supported image file to RGBA.
pub fn load_image(path: &Path) -> Result<RgbaImage> {
    let img = image::open(path).map_err(|e| EngineError::Decode(format!("{}: {}", path.display(), e)))?;
    Ok(img.to_rgba8())
}

/// Read a persisted annotation and decode it to `width` × `height`.
pub fn load_annotation(path: &Path, width: u32, height: u32) -> Result<ClassBuffer> {
    let image = load_image(path)?;
    let (buffer, stats) = decode_with_stats(&image, width, height);
    if stats.nearest > 0 {
        tracing::debug!(
            "{}: {} pixels classified by nearest palette colour",
            path.display(),
            stats.nearest
        );
    }
    Ok(buffer)
}

/// Decode an annotation held in memory (e.g. received from the server).
pub fn load_annotation_bytes(bytes: &[u8], width: u32, height: u32) -> Result<ClassBuffer> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| EngineError::Decode(e.to_string()))?
        .to_rgba8();
    Ok(decode(&image, width, height))
}

pub fn save_annotation(buffer: &ClassBuffer, path: &Path) -> Result<()> {
    write_png(&encode_for_storage(buffer), path)
}

pub fn save_export(buffer: &ClassBuffer, size: u32, path: &Path) -> Result<()> {
    write_png(&encode_for_export(buffer, size), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_buffer() -> ClassBuffer {
        let mut buf = ClassBuffer::new(10, 10);
        for y in 0..5 {
            for x in 0..5 {
                buf.set(x, y, 1);
            }
        }
        buf
    }

    #[test]
    fn storage_roundtrip_uses_exact_matches() {
        let buf = square_buffer();
        let encoded = encode_for_storage(&buf);
        assert_eq!(*encoded.get_pixel(0, 0), Rgba([255, 0, 0, 255]));
        assert_eq!(*encoded.get_pixel(9, 9), Rgba([255, 255, 255, 255]));

        let (decoded, stats) = decode_with_stats(&encoded, 10, 10);
        assert_eq!(decoded, buf);
        assert_eq!(stats.nearest, 0);
        assert_eq!(stats.exact, 25);
    }

    #[test]
    fn every_class_survives_roundtrip() {
        let raw: Vec<ClassId> = (0..36).map(|i| (i % 9) as ClassId).collect();
        let buf = ClassBuffer::from_raw(6, 6, raw).unwrap();
        assert_eq!(decode(&encode_for_storage(&buf), 6, 6), buf);
    }

    #[test]
    fn anti_aliased_pixels_snap_to_nearest() {
        // halfway between red and white, still opaque
        assert_eq!(classify_pixel(Rgba([250, 20, 10, 255])), PixelMatch::Nearest(1));
        assert_eq!(classify_pixel(Rgba([10, 10, 240, 200])).class(), 6);
        assert_eq!(classify_pixel(Rgba([255, 0, 0, 100])), PixelMatch::Background);
        assert_eq!(classify_pixel(Rgba([252, 251, 253, 255])), PixelMatch::Background);
    }

    #[test]
    fn export_is_red_on_transparent_at_fixed_size() {
        let buf = square_buffer();
        let out = encode_for_export(&buf, EXPORT_SIZE);
        assert_eq!(out.dimensions(), (512, 512));
        assert_eq!(*out.get_pixel(10, 10), Rgba([255, 0, 0, 255]));
        assert_eq!(*out.get_pixel(400, 400), Rgba([0, 0, 0, 0]));

        let back = decode_export(&out, 10, 10, 1);
        assert_eq!(back, buf);
    }

    #[test]
    fn decode_resamples_mismatched_sizes() {
        let buf = square_buffer();
        let encoded = encode_for_storage(&buf);
        let half = decode(&encoded, 5, 5);
        assert_eq!(half.width(), 5);
        assert_eq!(half.get(0, 0), 1);
        assert_eq!(half.get(4, 4), BACKGROUND);
    }

    #[test]
    fn png_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("mask.png");
        let buf = square_buffer();
        save_annotation(&buf, &path).unwrap();
        let names: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("mask.png")]);
        assert_eq!(load_annotation(&path, 10, 10).unwrap(), buf);

        let bytes = encode_png(&encode_for_storage(&buf)).unwrap();
        assert_eq!(load_annotation_bytes(&bytes, 10, 10).unwrap(), buf);
    }

    #[test]
    fn corrupt_file_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        fs::write(&path, b"not a png").unwrap();
        assert!(matches!(load_annotation(&path, 4, 4), Err(EngineError::Decode(_))));
        assert!(matches!(
            load_annotation_bytes(b"garbage", 4, 4),
            Err(EngineError::Decode(_))
        ));
    }
}
