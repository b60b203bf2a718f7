//! Recoloring images with an extracted palette and comparing the result.

use std::collections::HashMap;

use image::{GrayImage, Rgba};

use crate::error::{ExtractError, Result};
use crate::extract::DominantColorSet;
use crate::image::Image;
use crate::kmeans::{self, Point};

/// Replace every pixel by the nearest color of `set`, keeping its alpha.
/// Fully transparent pixels are left untouched.
pub fn reduce(image: &Image, set: &DominantColorSet) -> Image {
    let palette: Vec<Point> = set.iter().map(|c| kmeans::rgb_point(c.rgb())).collect();
    let mut pixels = image.as_rgba().clone();
    if palette.is_empty() {
        return Image::from_rgba(pixels);
    }

    let mut cache: HashMap<[u8; 3], [u8; 3]> = HashMap::new();
    for pixel in pixels.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        if a == 0 {
            continue;
        }
        let [nr, ng, nb] = *cache.entry([r, g, b]).or_insert_with(|| {
            let index = kmeans::nearest(kmeans::rgb_point([r, g, b]), &palette);
            set.colors()[index].rgb()
        });
        *pixel = Rgba([nr, ng, nb, a]);
    }
    Image::from_rgba(pixels)
}

/// Per-pixel sum of absolute RGB differences, scaled so the largest
/// difference maps to 255. Identical images give an all-black map.
pub fn difference_map(source: &Image, target: &Image) -> Result<GrayImage> {
    if source.dimensions() != target.dimensions() {
        let (sw, sh) = source.dimensions();
        let (tw, th) = target.dimensions();
        return Err(ExtractError::invalid(format!(
            "cannot compare a {sw}x{sh} image with a {tw}x{th} one"
        )));
    }

    let differences: Vec<u32> = source
        .pixels()
        .zip(target.pixels())
        .map(|(a, b)| (0..3).map(|c| a[c].abs_diff(b[c]) as u32).sum())
        .collect();
    let max = differences.iter().copied().max().unwrap_or(0);

    let raw: Vec<u8> = differences
        .iter()
        .map(|&d| if max == 0 { 0 } else { (d * 255 / max) as u8 })
        .collect();

    let (width, height) = source.dimensions();
    GrayImage::from_raw(width, height, raw)
        .ok_or_else(|| ExtractError::invalid("failed to build difference image"))
}

/// Mean of the per-pixel summed RGB differences, in channel units (0..=765).
pub fn mean_difference(source: &Image, target: &Image) -> Result<f64> {
    if source.dimensions() != target.dimensions() {
        return Err(ExtractError::invalid("images must have the same dimensions"));
    }
    let count = source.pixel_count();
    if count == 0 {
        return Ok(0.0);
    }
    let total: u64 = source
        .pixels()
        .zip(target.pixels())
        .map(|(a, b)| (0..3).map(|c| a[c].abs_diff(b[c]) as u64).sum::<u64>())
        .sum();
    Ok(total as f64 / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractionConfig;
    use crate::extract::ColorExtractor;
    use crate::logging::NullSink;
    use image::RgbaImage;

    fn two_tone() -> Image {
        Image::from_rgb(
            4,
            1,
            &[[250, 0, 0], [255, 5, 5], [0, 0, 250], [5, 5, 255]],
        )
        .expect("valid dimensions")
    }

    #[test]
    fn reduced_image_only_uses_palette_colors() {
        let image = two_tone();
        let set = ColorExtractor::new(ExtractionConfig::default())
            .with_sink(NullSink)
            .extract(&image, 2)
            .expect("extraction succeeds");
        let palette: Vec<[u8; 3]> = set.iter().map(|c| c.rgb()).collect();

        let reduced = reduce(&image, &set);
        for [r, g, b, a] in reduced.pixels() {
            assert!(palette.contains(&[r, g, b]));
            assert_eq!(a, 255);
        }
        assert_eq!(reduced.pixel(0, 0), reduced.pixel(1, 0));
        assert_ne!(reduced.pixel(0, 0), reduced.pixel(2, 0));
    }

    #[test]
    fn transparent_pixels_survive_reduction() {
        let mut rgba = RgbaImage::new(2, 1);
        rgba.put_pixel(0, 0, Rgba([9, 9, 9, 0]));
        rgba.put_pixel(1, 0, Rgba([200, 10, 10, 255]));
        let image = Image::from_rgba(rgba);
        let set = ColorExtractor::default()
            .with_sink(NullSink)
            .extract(&image, 1)
            .expect("extraction succeeds");

        let reduced = reduce(&image, &set);
        assert_eq!(reduced.pixel(0, 0), [9, 9, 9, 0]);
        assert_eq!(reduced.pixel(1, 0), [200, 10, 10, 255]);
    }

    #[test]
    fn identical_images_have_an_empty_difference_map() {
        let image = two_tone();
        let map = difference_map(&image, &image).expect("same dimensions");
        assert!(map.pixels().all(|p| p.0[0] == 0));
        assert_eq!(mean_difference(&image, &image).expect("same dimensions"), 0.0);
    }

    #[test]
    fn difference_map_scales_to_the_largest_difference() {
        let a = Image::from_rgb(2, 1, &[[0, 0, 0], [0, 0, 0]]).expect("valid dimensions");
        let b = Image::from_rgb(2, 1, &[[10, 0, 0], [20, 0, 0]]).expect("valid dimensions");
        let map = difference_map(&a, &b).expect("same dimensions");
        assert_eq!(map.get_pixel(0, 0).0[0], 127);
        assert_eq!(map.get_pixel(1, 0).0[0], 255);
        assert_eq!(mean_difference(&a, &b).expect("same dimensions"), 15.0);
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let a = Image::from_rgb(1, 1, &[[0, 0, 0]]).expect("valid dimensions");
        let err = difference_map(&a, &two_tone()).unwrap_err();
        assert!(matches!(err, ExtractError::InvalidArgument(_)));
    }
}
