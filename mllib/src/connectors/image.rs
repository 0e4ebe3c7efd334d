use std::{fs, path::Path};

use log::debug;
use serde::Deserialize;

use super::{Dataset, assemble};
use crate::{MlError, Result};

/// Parameters understood by the image connector.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ImageParams {
    pub width: Option<usize>,
    pub height: Option<usize>,
    pub test_split: f64,
    pub shuffle: bool,
}

impl ImageParams {
    /// The fixed input size every image is resized to.
    ///
    /// # Returns
    /// An `InvalidParams` error if either dimension is missing or their product overflows.
    pub fn dims(&self) -> Result<(usize, usize)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 && w.checked_mul(h).is_some() => Ok((w, h)),
            _ => Err(MlError::InvalidParams(
                "the image connector requires a non zero, addressable width and height".to_string(),
            )),
        }
    }
}

/// Loads every class directory under each of `uris`.
///
/// Each uri must be a directory holding one sub-directory per class, named after it.
pub(super) fn load_dirs(params: &ImageParams, uris: Vec<String>) -> Result<Dataset> {
    let (width, height) = params.dims()?;
    let mut classes: Vec<String> = Vec::new();
    let mut rows = Vec::new();
    let mut labels = Vec::new();

    for uri in &uris {
        let mut class_dirs: Vec<_> = read_dir(Path::new(uri))?
            .into_iter()
            .filter(|p| p.is_dir())
            .collect();
        class_dirs.sort();

        for dir in class_dirs {
            let name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let label = match classes.iter().position(|c| *c == name) {
                Some(label) => label,
                None => {
                    classes.push(name);
                    classes.len() - 1
                }
            };

            let mut files = read_dir(&dir)?;
            files.sort();

            for file in files.into_iter().filter(|p| is_pgm(p)) {
                rows.push(load_resized(&file, width, height)?);
                labels.push(label);
            }
        }
    }

    debug!(samples = labels.len(), classes = classes.len(); "loaded image dataset");

    if labels.is_empty() {
        return Err(MlError::Data {
            uri: uris.join(","),
            msg: "no images found".to_string(),
        });
    }

    assemble(rows, labels, classes, &uris.join(","))
}

/// Loads a single image to predict.
pub(super) fn load_file(params: &ImageParams, path: &Path) -> Result<Vec<f32>> {
    let (width, height) = params.dims()?;
    load_resized(path, width, height)
}

fn load_resized(path: &Path, width: usize, height: usize) -> Result<Vec<f32>> {
    let bytes = fs::read(path).map_err(|e| data_err(path, e.to_string()))?;
    let (w, h, pixels) = decode_pgm(&bytes).map_err(|msg| data_err(path, msg))?;
    Ok(resize(&pixels, w, h, width, height))
}

fn read_dir(path: &Path) -> Result<Vec<std::path::PathBuf>> {
    let entries = fs::read_dir(path).map_err(|e| data_err(path, e.to_string()))?;
    entries
        .map(|e| e.map(|e| e.path()).map_err(MlError::from))
        .collect()
}

fn is_pgm(path: &Path) -> bool {
    path.extension().is_some_and(|e| e.eq_ignore_ascii_case("pgm"))
}

fn data_err(path: &Path, msg: String) -> MlError {
    MlError::Data {
        uri: path.display().to_string(),
        msg,
    }
}

/// Decodes a binary (`P5`) or ascii (`P2`) greyscale PGM image.
///
/// # Returns
/// The `(width, height, pixels)` triple, pixels scaled to `[0, 1]` in row-major order.
pub fn decode_pgm(bytes: &[u8]) -> std::result::Result<(usize, usize, Vec<f32>), String> {
    let mut pos = 0;
    let magic = next_token(bytes, &mut pos).ok_or("missing magic number")?;
    let width = next_number(bytes, &mut pos, "width")?;
    let height = next_number(bytes, &mut pos, "height")?;
    let maxval = next_number(bytes, &mut pos, "maxval")?;

    if width == 0 || height == 0 || maxval == 0 || maxval > u16::MAX as usize {
        return Err(format!("bad header {width}x{height} maxval {maxval}"));
    }

    let npixels = width
        .checked_mul(height)
        .ok_or_else(|| format!("bad header {width}x{height}"))?;
    let scale = maxval as f32;

    let pixels = match magic {
        b"P5" => {
            // A single whitespace byte separates the header from the raster.
            let raster = bytes.get(pos + 1..).ok_or("truncated raster")?;
            let depth = if maxval < 256 { 1 } else { 2 };
            let expected = npixels
                .checked_mul(depth)
                .ok_or_else(|| format!("bad header {width}x{height}"))?;
            if raster.len() < expected {
                return Err(format!("expected {expected} raster bytes, got {}", raster.len()));
            }

            raster
                .chunks_exact(depth)
                .take(npixels)
                .map(|px| match px {
                    [v] => *v as f32 / scale,
                    [hi, lo] => u16::from_be_bytes([*hi, *lo]) as f32 / scale,
                    _ => 0.0,
                })
                .collect()
        }
        b"P2" => (0..npixels)
            .map(|_| next_number(bytes, &mut pos, "pixel").map(|v| v as f32 / scale))
            .collect::<std::result::Result<Vec<_>, _>>()?,
        other => return Err(format!("unsupported format {}", String::from_utf8_lossy(other))),
    };

    Ok((width, height, pixels))
}

fn next_token<'a>(bytes: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    loop {
        while *pos < bytes.len() && bytes[*pos].is_ascii_whitespace() {
            *pos += 1;
        }

        if bytes.get(*pos) == Some(&b'#') {
            while *pos < bytes.len() && bytes[*pos] != b'\n' {
                *pos += 1;
            }
            continue;
        }

        break;
    }

    let start = *pos;
    while *pos < bytes.len() && !bytes[*pos].is_ascii_whitespace() {
        *pos += 1;
    }

    (start < *pos).then(|| &bytes[start..*pos])
}

fn next_number(bytes: &[u8], pos: &mut usize, what: &str) -> std::result::Result<usize, String> {
    next_token(bytes, pos)
        .and_then(|t| std::str::from_utf8(t).ok())
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| format!("bad or missing {what}"))
}

/// Nearest neighbour resampling.
fn resize(src: &[f32], w: usize, h: usize, width: usize, height: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(width * height);

    for y in 0..height {
        let sy = y * h / height;
        for x in 0..width {
            let sx = x * w / width;
            out.push(src[sy * w + sx]);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_binary_pgm() {
        let mut bytes = b"P5\n# comment\n2 2\n255\n".to_vec();
        bytes.extend_from_slice(&[0, 255, 51, 102]);

        let (w, h, px) = decode_pgm(&bytes).unwrap();
        assert_eq!((w, h), (2, 2));
        assert_eq!(px, vec![0.0, 1.0, 0.2, 0.4]);
    }

    #[test]
    fn test_decode_ascii_pgm() {
        let (w, h, px) = decode_pgm(b"P2 3 1 4\n0 2 4\n").unwrap();
        assert_eq!((w, h), (3, 1));
        assert_eq!(px, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_truncated_raster() {
        assert!(decode_pgm(b"P5 4 4 255\n\x00\x01").is_err());
        assert!(decode_pgm(b"P6 1 1 255\n\x00").is_err());
    }

    #[test]
    fn test_oversized_header_is_rejected() {
        assert!(decode_pgm(b"P5 9223372036854775808 2 255\n\x00\x01").is_err());
        assert!(decode_pgm(b"P2 9223372036854775808 4 255\n0").is_err());
    }

    #[test]
    fn test_oversized_dims_are_rejected() {
        let params = ImageParams {
            width: Some(usize::MAX),
            height: Some(2),
            ..Default::default()
        };
        assert!(matches!(params.dims(), Err(MlError::InvalidParams(_))));
    }

    #[test]
    fn test_resize_nearest() {
        let src = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(resize(&src, 2, 2, 4, 1), vec![1.0, 1.0, 2.0, 2.0]);
        assert_eq!(resize(&src, 2, 2, 1, 1), vec![1.0]);
    }

    #[test]
    fn test_dims_are_required() {
        let params = ImageParams {
            width: Some(28),
            ..Default::default()
        };
        assert!(matches!(params.dims(), Err(MlError::InvalidParams(_))));
    }
}
