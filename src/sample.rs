//! Pixel subsampling and distinct-color histograms.

use std::collections::{BTreeMap, HashMap};

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::ExtractionConfig;
use crate::image::Image;

/// RGBA pixels drawn from an image for one extraction run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorSample {
    pixels: Vec<[u8; 4]>,
    /// Pixels eligible for sampling (after dropping transparent ones).
    population: usize,
}

/// A distinct color and how many samples carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorCount {
    pub color: [u8; 3],
    pub count: usize,
    /// Sum of the alpha values of those samples.
    pub alpha_sum: u64,
}

impl ColorCount {
    pub fn opaque(color: [u8; 3], count: usize) -> Self {
        Self {
            color,
            count,
            alpha_sum: 255 * count as u64,
        }
    }
}

impl ColorSample {
    /// Draw the sample for `image`.
    ///
    /// Images with at most `min_samples` eligible pixels are taken whole;
    /// larger ones keep `ceil(len * sample_rate)` pixels (never fewer than
    /// `min_samples`) chosen without replacement by a generator seeded with
    /// `seed`. Chosen pixels keep their row-major order.
    pub fn draw(image: &Image, config: &ExtractionConfig) -> Self {
        let eligible: Vec<[u8; 4]> = image
            .pixels()
            .filter(|px| !(config.skip_transparent && px[3] == 0))
            .collect();
        let population = eligible.len();

        let wanted = ((population as f64 * config.sample_rate).ceil() as usize)
            .max(config.min_samples)
            .min(population);

        if wanted == population {
            return Self {
                pixels: eligible,
                population,
            };
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut picked = rand::seq::index::sample(&mut rng, population, wanted).into_vec();
        picked.sort_unstable();

        Self {
            pixels: picked.into_iter().map(|i| eligible[i]).collect(),
            population,
        }
    }

    /// An opaque sample made of `colors`.
    pub fn from_colors(colors: Vec<[u8; 3]>) -> Self {
        Self::from_pixels(colors.into_iter().map(|[r, g, b]| [r, g, b, 255]).collect())
    }

    pub fn from_pixels(pixels: Vec<[u8; 4]>) -> Self {
        let population = pixels.len();
        Self { pixels, population }
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn population(&self) -> usize {
        self.population
    }

    pub fn pixels(&self) -> &[[u8; 4]] {
        &self.pixels
    }

    /// Distinct colors with their counts, sorted by color. Alpha is summed,
    /// not used to tell colors apart.
    pub fn histogram(&self) -> Vec<ColorCount> {
        histogram(&self.pixels)
    }

    /// One histogram per distinct alpha value, most transparent first.
    pub fn alpha_layers(&self) -> Vec<(u8, Vec<ColorCount>)> {
        let mut layers: BTreeMap<u8, Vec<[u8; 4]>> = BTreeMap::new();
        for &px in &self.pixels {
            layers.entry(px[3]).or_default().push(px);
        }
        layers
            .into_iter()
            .map(|(alpha, pixels)| (alpha, histogram(&pixels)))
            .collect()
    }
}

fn histogram(pixels: &[[u8; 4]]) -> Vec<ColorCount> {
    let mut counts: HashMap<[u8; 3], (usize, u64)> = HashMap::new();
    for &[r, g, b, a] in pixels {
        let entry = counts.entry([r, g, b]).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += a as u64;
    }
    let mut histogram: Vec<ColorCount> = counts
        .into_iter()
        .map(|(color, (count, alpha_sum))| ColorCount {
            color,
            count,
            alpha_sum,
        })
        .collect();
    histogram.sort_unstable_by_key(|c| c.color);
    histogram
}
