//! Vertical concatenation of an episode's images into one long PNG.

use crate::assemble::AssembleError;
use crate::download::write_via_part;
use image::{imageops, ImageFormat, Rgba, RgbaImage};
use std::path::{Path, PathBuf};

pub(crate) const MERGED_FILE_NAME: &str = "merged.png";

/// What the merge produced.
#[derive(Debug)]
pub(crate) struct Merged {
    pub path: PathBuf,
    pub included: usize,
    /// Positions that could not be decoded, with the reason.
    pub unreadable: Vec<(u32, String)>,
}

/// Stack `files` (already in position order) top to bottom. Canvas width is the widest
/// image; narrower ones are centered on white. Returns `Ok(None)` when nothing decodes.
pub(crate) fn merge_vertical(
    files: &[(u32, PathBuf)],
    out: &Path,
) -> Result<Option<Merged>, AssembleError> {
    // Header-only pass to size the canvas without holding every image in memory.
    let mut readable = Vec::with_capacity(files.len());
    let mut unreadable = Vec::new();
    for (position, path) in files {
        match image::image_dimensions(path) {
            Ok((w, h)) => readable.push((*position, path, w, h)),
            Err(e) => unreadable.push((*position, e.to_string())),
        }
    }
    if readable.is_empty() {
        return Ok(None);
    }

    let width = readable.iter().map(|(_, _, w, _)| *w).max().unwrap_or(0);
    let height: u64 = readable.iter().map(|(_, _, _, h)| u64::from(*h)).sum();
    let height = u32::try_from(height).map_err(|_| AssembleError::TooLarge { height })?;

    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    let mut y: i64 = 0;
    let mut included = 0;
    for (position, path, w, h) in readable {
        match image::open(path) {
            Ok(img) => {
                let x = i64::from((width - w) / 2);
                imageops::overlay(&mut canvas, &img.to_rgba8(), x, y);
                y += i64::from(h);
                included += 1;
            }
            Err(e) => unreadable.push((position, e.to_string())),
        }
    }
    if included == 0 {
        return Ok(None);
    }
    // Images whose header parsed but body did not leave blank rows; crop them off.
    let used = u32::try_from(y).unwrap_or(height);
    if used < height {
        canvas = imageops::crop_imm(&canvas, 0, 0, width, used).to_image();
    }

    write_via_part(
        out,
        |tmp| {
            canvas
                .save_with_format(tmp, ImageFormat::Png)
                .map_err(AssembleError::Image)
        },
        |source| AssembleError::Io {
            path: out.to_path_buf(),
            source,
        },
    )?;
    unreadable.sort_by_key(|(p, _)| *p);
    Ok(Some(Merged {
        path: out.to_path_buf(),
        included,
        unreadable,
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Write a solid-color PNG of the given size.
    pub(crate) fn write_png(path: &Path, w: u32, h: u32, rgb: [u8; 3]) {
        let img = RgbaImage::from_pixel(w, h, Rgba([rgb[0], rgb[1], rgb[2], 255]));
        img.save_with_format(path, ImageFormat::Png).unwrap();
    }

    #[test]
    fn stacks_in_given_order_and_centers_narrow_images() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("001.png");
        let b = dir.path().join("002.png");
        write_png(&a, 4, 2, [255, 0, 0]);
        write_png(&b, 2, 3, [0, 0, 255]);
        let out = dir.path().join(MERGED_FILE_NAME);
        let merged = merge_vertical(&[(1, a), (2, b)], &out).unwrap().unwrap();
        assert_eq!(merged.included, 2);
        assert!(merged.unreadable.is_empty());

        let img = image::open(&out).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (4, 5));
        assert_eq!(img.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
        // Second image is centered: columns 1..3, rows 2..5.
        assert_eq!(img.get_pixel(1, 2), &Rgba([0, 0, 255, 255]));
        assert_eq!(img.get_pixel(0, 4), &Rgba([255, 255, 255, 255]));
        assert!(!dir.path().join("merged.png.part").exists());
    }

    #[test]
    fn unreadable_files_are_reported_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("001.png");
        let bad = dir.path().join("002.jpg");
        write_png(&good, 3, 3, [0, 255, 0]);
        std::fs::write(&bad, b"not an image").unwrap();
        let out = dir.path().join(MERGED_FILE_NAME);
        let merged = merge_vertical(&[(1, good), (2, bad)], &out).unwrap().unwrap();
        assert_eq!(merged.included, 1);
        assert_eq!(merged.unreadable.len(), 1);
        assert_eq!(merged.unreadable[0].0, 2);
        assert_eq!(image::open(&out).unwrap().to_rgba8().dimensions(), (3, 3));
    }

    #[test]
    fn nothing_readable_creates_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("001.jpg");
        std::fs::write(&bad, b"junk").unwrap();
        let out = dir.path().join(MERGED_FILE_NAME);
        assert!(merge_vertical(&[(1, bad)], &out).unwrap().is_none());
        assert!(!out.exists());
    }
}
