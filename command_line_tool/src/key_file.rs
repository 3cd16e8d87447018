//! Loading of Lowe ASCII key files and image dimensions.
//!
//! A key file starts with a `count length` header, followed per keypoint by
//! `y x scale orientation` and `length` descriptor values. Line breaks inside
//! a record carry no meaning.

use anyhow::{anyhow, bail, Context, Result};
use epimatch::descriptor_buffer::{DescriptorBuffer, DESCRIPTOR_LEN};
use epimatch::keypoint::Keypoint;
use epimatch::ImageFeatures;
use std::fs;
use std::path::Path;

fn next_token<'a, I: Iterator<Item = &'a str>>(tokens: &mut I, what: &str) -> Result<&'a str> {
    tokens
        .next()
        .ok_or_else(|| anyhow!("unexpected end of file while reading {what}"))
}

/// Parses the text of a key file into keypoints and descriptors.
pub fn parse_keys(text: &str) -> Result<(Vec<Keypoint>, DescriptorBuffer)> {
    let mut tokens = text.split_whitespace();
    let count: usize = next_token(&mut tokens, "the keypoint count")?
        .parse()
        .context("invalid keypoint count")?;
    let length: usize = next_token(&mut tokens, "the descriptor length")?
        .parse()
        .context("invalid descriptor length")?;
    if length != DESCRIPTOR_LEN {
        bail!("descriptor length {length}, expected {DESCRIPTOR_LEN}");
    }

    let mut keypoints = Vec::with_capacity(count);
    let mut bytes = Vec::with_capacity(count * DESCRIPTOR_LEN);
    for k in 0..count {
        let mut header = [0f32; 4];
        for value in header.iter_mut() {
            *value = next_token(&mut tokens, "a keypoint")?
                .parse()
                .with_context(|| format!("invalid geometry for keypoint {k}"))?;
        }
        let [y, x, scale, orientation] = header;
        keypoints.push(Keypoint {
            x,
            y,
            scale,
            orientation,
        });
        for _ in 0..DESCRIPTOR_LEN {
            let value: u8 = next_token(&mut tokens, "a descriptor")?
                .parse()
                .with_context(|| format!("invalid descriptor value for keypoint {k}"))?;
            bytes.push(value);
        }
    }
    Ok((keypoints, DescriptorBuffer::from_bytes(bytes)?))
}

/// Reads a key file and attaches the image dimensions.
pub fn load_features(path: &Path, width: u32, height: u32) -> Result<ImageFeatures> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("could not read {}", path.display()))?;
    let (keypoints, descriptors) = parse_keys(&text)
        .with_context(|| format!("malformed key file {}", path.display()))?;
    log::info!("{}: {} keypoints", path.display(), keypoints.len());
    Ok(ImageFeatures::new(width, height, keypoints, descriptors)?)
}

/// Parses a `WIDTHxHEIGHT` string.
pub fn parse_dimensions(text: &str) -> Result<(u32, u32)> {
    let (w, h) = text
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("expected WIDTHxHEIGHT, got {text:?}"))?;
    Ok((
        w.trim().parse().context("invalid width")?,
        h.trim().parse().context("invalid height")?,
    ))
}

/// Dimensions from an explicit `WIDTHxHEIGHT` string, or else from the image
/// header.
pub fn resolve_dimensions(dim: Option<&str>, image: Option<&Path>) -> Result<(u32, u32)> {
    match (dim, image) {
        (Some(dim), _) => parse_dimensions(dim),
        (None, Some(image)) => image::image_dimensions(image)
            .with_context(|| format!("could not read dimensions of {}", image.display())),
        (None, None) => bail!("either a dimension or an image is required"),
    }
}

/// Reads the key file list of a collection. Relative paths are taken
/// relative to the list itself.
pub fn read_key_list(path: &Path) -> Result<Vec<std::path::PathBuf>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("could not read {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| base.join(line))
        .collect())
}

/// Reads one `height width` line per image.
pub fn read_dimension_list(path: &Path) -> Result<Vec<(u32, u32)>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("could not read {}", path.display()))?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            let mut fields = line.split_whitespace();
            let mut field = |name: &str| -> Result<u32> {
                fields
                    .next()
                    .ok_or_else(|| anyhow!("line {}: missing {name}", i + 1))?
                    .parse()
                    .with_context(|| format!("line {}: invalid {name}", i + 1))
            };
            let height = field("height")?;
            let width = field("width")?;
            Ok((width, height))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_text(points: &[(f32, f32)]) -> String {
        let mut text = format!("{} 128\n", points.len());
        for (k, &(x, y)) in points.iter().enumerate() {
            text.push_str(&format!("{y} {x} 1.5 0.25\n"));
            let values: Vec<String> = (0..128).map(|i| ((i + k) % 256).to_string()).collect();
            // Lowe files wrap descriptors over several lines.
            for chunk in values.chunks(20) {
                text.push_str(&chunk.join(" "));
                text.push('\n');
            }
        }
        text
    }

    #[test]
    fn reads_rows_before_columns() {
        let (keypoints, descriptors) = parse_keys(&key_text(&[(10.0, 20.0), (3.0, 4.0)])).unwrap();
        assert_eq!(keypoints.len(), 2);
        assert_eq!((keypoints[0].x, keypoints[0].y), (10.0, 20.0));
        assert_eq!(keypoints[1].scale, 1.5);
        assert_eq!(descriptors[1][0], 1);
        assert_eq!(descriptors[1][127], 128);
    }

    #[test]
    fn rejects_truncated_and_foreign_files() {
        let text = key_text(&[(1.0, 2.0)]);
        let truncated = &text[..text.len() - 10];
        assert!(parse_keys(truncated).is_err());
        assert!(parse_keys("1 64\n").is_err());
    }

    #[test]
    fn parses_dimension_strings() {
        assert_eq!(parse_dimensions("640x480").unwrap(), (640, 480));
        assert!(parse_dimensions("640").is_err());
        assert!(resolve_dimensions(None, None).is_err());
    }
}
