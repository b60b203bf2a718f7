//! Immutable RGBA images and their loading.

use std::path::{Path, PathBuf};

use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader, Rgba, RgbaImage};

use crate::error::{ExtractError, Result};

/// A decoded raster image, always held as 8-bit RGBA.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pixels: RgbaImage,
}

impl Image {
    pub fn from_rgba(pixels: RgbaImage) -> Self {
        Self { pixels }
    }

    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self {
            pixels: image.to_rgba8(),
        }
    }

    /// Build an opaque image from row-major RGB triples.
    ///
    /// Returns `InvalidArgument` when `rgb.len() != width * height`.
    pub fn from_rgb(width: u32, height: u32, rgb: &[[u8; 3]]) -> Result<Self> {
        let expected = width as usize * height as usize;
        if rgb.len() != expected {
            return Err(ExtractError::invalid(format!(
                "expected {expected} pixels for a {width}x{height} image, got {}",
                rgb.len()
            )));
        }
        let raw: Vec<u8> = rgb.iter().flat_map(|&[r, g, b]| [r, g, b, 255]).collect();
        RgbaImage::from_raw(width, height, raw)
            .map(Self::from_rgba)
            .ok_or_else(|| ExtractError::invalid("failed to build image buffer"))
    }

    /// Decode an encoded image held in memory, format sniffed from its bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        image::load_from_memory(bytes)
            .map(Self::from_dynamic)
            .map_err(|e| ExtractError::from_image("<memory>", e))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn pixel_count(&self) -> usize {
        self.pixels.width() as usize * self.pixels.height() as usize
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.pixels.get_pixel(x, y).0
    }

    /// Pixels in row-major order.
    pub fn pixels(&self) -> impl Iterator<Item = [u8; 4]> + '_ {
        self.pixels.pixels().map(|p: &Rgba<u8>| p.0)
    }

    pub fn as_rgba(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_rgba(self) -> RgbaImage {
        self.pixels
    }

    /// Write the image to disk, format chosen from the extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.pixels
            .save(path)
            .map_err(|e| ExtractError::from_image(path, e))
    }
}

/// Read and decode an image file.
///
/// A missing file or an extension that maps to no readable format is an
/// `Io` error; both are detected before the decoder runs.
pub fn load(path: impl AsRef<Path>) -> Result<Image> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ExtractError::not_found(path));
    }

    let format = ImageFormat::from_path(path).map_err(|e| ExtractError::from_image(path, e))?;
    if !format.reading_enabled() {
        return Err(unsupported(path, format));
    }

    let reader = ImageReader::open(path).map_err(|source| ExtractError::Io {
        path: PathBuf::from(path),
        source,
    })?;
    // After a successful open every failure is a decode failure, truncation
    // included.
    let decoded = reader.decode().map_err(|source| ExtractError::Decode {
        path: path.to_path_buf(),
        source,
    })?;

    let (width, height) = decoded.dimensions();
    tracing::debug!(path = %path.display(), width, height, ?format, "image decoded");
    Ok(Image::from_dynamic(decoded))
}

fn unsupported(path: &Path, format: ImageFormat) -> ExtractError {
    ExtractError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("{format:?} decoding is not enabled"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn checker() -> Image {
        Image::from_rgb(2, 1, &[[10, 20, 30], [200, 100, 0]]).expect("valid dimensions")
    }

    #[test]
    fn from_rgb_rejects_wrong_pixel_count() {
        let err = Image::from_rgb(2, 2, &[[0, 0, 0]]).unwrap_err();
        assert!(matches!(err, ExtractError::InvalidArgument(_)));
    }

    #[test]
    fn rgb_input_becomes_opaque_rgba() {
        let image = checker();
        assert_eq!(image.pixel(0, 0), [10, 20, 30, 255]);
        assert_eq!(image.pixel(1, 0), [200, 100, 0, 255]);
        assert_eq!(image.pixel_count(), 2);
    }

    #[test]
    fn saved_png_loads_back_identically() {
        let dir = tempdir().expect("failed to create temp dir");
        let path = dir.path().join("checker.png");
        let image = checker();
        image.save(&path).expect("png should encode");

        let loaded = load(&path).expect("png should decode");
        assert_eq!(loaded, image);
    }

    #[test]
    fn missing_file_is_io_not_found() {
        let dir = tempdir().expect("failed to create temp dir");
        match load(dir.path().join("nope.png")) {
            Err(ExtractError::Io { source, .. }) => {
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound)
            }
            other => panic!("expected Io error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_extension_is_io_error() {
        let dir = tempdir().expect("failed to create temp dir");
        let path = dir.path().join("notes.txt");
        fs::write(&path, "hello").expect("failed to write file");
        assert!(matches!(load(&path), Err(ExtractError::Io { .. })));
    }

    #[test]
    fn corrupt_png_is_decode_error() {
        let dir = tempdir().expect("failed to create temp dir");
        let path = dir.path().join("broken.png");
        fs::write(&path, "definitely not a png file").expect("failed to write file");
        assert!(matches!(load(&path), Err(ExtractError::Decode { .. })));
    }

    #[test]
    fn truncated_png_is_decode_error() {
        let gradient = RgbaImage::from_fn(64, 64, |x, y| Rgba([x as u8 * 4, y as u8 * 4, 90, 255]));
        let mut bytes = Vec::new();
        gradient
            .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("png should encode");

        let dir = tempdir().expect("failed to create temp dir");
        let path = dir.path().join("truncated.png");
        fs::write(&path, &bytes[..bytes.len() / 2]).expect("failed to write file");
        assert!(matches!(load(&path), Err(ExtractError::Decode { .. })));
    }

    #[test]
    fn decode_reads_encoded_bytes() {
        let mut bytes = Vec::new();
        checker()
            .as_rgba()
            .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("png should encode");
        assert_eq!(Image::decode(&bytes).expect("bytes should decode"), checker());
    }
}
