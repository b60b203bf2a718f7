//! Layered palettes: the sample is split into groups first (by alpha or by
//! luminance) and every group is clustered on its own.

use std::collections::BTreeMap;

use crate::extract::luminance;
use crate::kmeans::{self, Clustering, KmeansParams, Point};
use crate::sample::{ColorCount, ColorSample};

/// A part of the sample and its clustering. `clustering.assignments` index
/// into `histogram`.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub histogram: Vec<ColorCount>,
    pub clustering: Clustering,
}

/// Clustering backend applied to each group.
pub type Backend = fn(&[ColorCount], &KmeansParams) -> Clustering;

/// Cluster every distinct alpha value separately into at most `params.k`
/// colors.
pub fn alpha_layers(
    sample: &ColorSample,
    params: &KmeansParams,
    backend: Backend,
) -> Vec<Group> {
    sample
        .alpha_layers()
        .into_iter()
        .map(|(alpha, histogram)| {
            let k = params.k.min(histogram.len());
            tracing::debug!(alpha, k, distinct = histogram.len(), "clustering alpha layer");
            let clustering = backend(&histogram, &KmeansParams { k, ..*params });
            Group {
                histogram,
                clustering,
            }
        })
        .collect()
}

/// Split `histogram` into at most `k_luminance` luminance bands, then cluster
/// each band into at most `k_color` colors.
pub fn luminance_bands(
    histogram: &[ColorCount],
    k_luminance: usize,
    k_color: usize,
    params: &KmeansParams,
    backend: Backend,
) -> Vec<Group> {
    let levels = Levels::new(histogram);
    let k = k_luminance.min(levels.points.len());
    let band_params = KmeansParams { k, ..*params };
    let bands = kmeans::cluster_points(&levels.points, &levels.weights, &band_params);

    levels
        .split(histogram, &bands.assignments, k)
        .into_iter()
        .filter(|band| !band.is_empty())
        .map(|band| {
            let k = k_color.min(band.len());
            let clustering = backend(&band, &KmeansParams { k, ..*params });
            Group {
                histogram: band,
                clustering,
            }
        })
        .collect()
}

/// [`luminance_bands`] with the band count and every per-band color count
/// picked by silhouette, capped at `k_luminance` and `k_color`.
pub fn adaptive_bands(
    histogram: &[ColorCount],
    k_luminance: usize,
    k_color: usize,
    params: &KmeansParams,
    backend: Backend,
) -> Vec<Group> {
    let levels = Levels::new(histogram);
    let k = bounded_suggestion(&levels.points, &levels.weights, k_luminance, params);
    tracing::debug!(k, levels = levels.points.len(), "luminance bands chosen");
    let band_params = KmeansParams { k, ..*params };
    let bands = kmeans::cluster_points(&levels.points, &levels.weights, &band_params);

    levels
        .split(histogram, &bands.assignments, k)
        .into_iter()
        .filter(|band| !band.is_empty())
        .map(|band| {
            let points: Vec<Point> = band.iter().map(|c| kmeans::rgb_point(c.color)).collect();
            let weights: Vec<f64> = band.iter().map(|c| c.count as f64).collect();
            let k = bounded_suggestion(&points, &weights, k_color, params);
            let clustering = backend(&band, &KmeansParams { k, ..*params });
            Group {
                histogram: band,
                clustering,
            }
        })
        .collect()
}

fn bounded_suggestion(
    points: &[Point],
    weights: &[f64],
    cap: usize,
    params: &KmeansParams,
) -> usize {
    kmeans::suggest_k_points(points, weights, cap, params).min(cap).max(1)
}

/// Distinct luminance values of a histogram, as one-dimensional points.
struct Levels {
    points: Vec<Point>,
    weights: Vec<f64>,
    /// Level of each histogram entry.
    of_entry: Vec<usize>,
}

impl Levels {
    fn new(histogram: &[ColorCount]) -> Self {
        // Luminance is never negative, so the bit patterns sort like the values.
        let mut levels: BTreeMap<u64, f64> = BTreeMap::new();
        for entry in histogram {
            *levels.entry(luminance(entry.color).to_bits()).or_insert(0.0) += entry.count as f64;
        }
        let index: BTreeMap<u64, usize> =
            levels.keys().enumerate().map(|(i, &bits)| (bits, i)).collect();

        Self {
            points: levels.keys().map(|&bits| [f64::from_bits(bits), 0.0, 0.0]).collect(),
            weights: levels.values().copied().collect(),
            of_entry: histogram
                .iter()
                .map(|entry| index[&luminance(entry.color).to_bits()])
                .collect(),
        }
    }

    /// Histogram entries per band, each band still sorted by color.
    fn split(
        &self,
        histogram: &[ColorCount],
        level_bands: &[usize],
        k: usize,
    ) -> Vec<Vec<ColorCount>> {
        let mut bands = vec![Vec::new(); k];
        for (entry, &level) in histogram.iter().zip(&self.of_entry) {
            bands[level_bands[level]].push(*entry);
        }
        bands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(k: usize) -> KmeansParams {
        KmeansParams {
            k,
            max_iterations: 100,
            convergence_threshold: 0.01,
            restarts: 4,
            seed: 42,
        }
    }

    fn samples(groups: &[([u8; 4], usize)]) -> ColorSample {
        ColorSample::from_pixels(
            groups
                .iter()
                .flat_map(|&(px, n)| std::iter::repeat_n(px, n))
                .collect(),
        )
    }

    #[test]
    fn each_alpha_value_gets_its_own_clusters() {
        let sample = samples(&[
            ([255, 0, 0, 255], 3),
            ([0, 0, 255, 255], 3),
            ([255, 0, 0, 100], 2),
        ]);
        let groups = alpha_layers(&sample, &params(4), kmeans::cluster_rgb);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].clustering.centroids.len(), 1);
        assert_eq!(groups[0].histogram[0].alpha_sum, 200);
        assert_eq!(groups[1].clustering.centroids.len(), 2);
        let total: usize = groups.iter().flat_map(|g| &g.clustering.weights).sum();
        assert_eq!(total, 8);
    }

    #[test]
    fn dark_and_light_colors_land_in_different_bands() {
        let histogram = vec![
            ColorCount::opaque([0, 0, 0], 2),
            ColorCount::opaque([10, 0, 40], 2),
            ColorCount::opaque([240, 240, 240], 2),
            ColorCount::opaque([250, 250, 200], 2),
        ];
        let groups = luminance_bands(&histogram, 2, 1, &params(1), kmeans::cluster_rgb);

        assert_eq!(groups.len(), 2);
        for group in &groups {
            assert_eq!(group.histogram.len(), 2);
            assert_eq!(group.clustering.centroids.len(), 1);
            let dark = group.histogram.iter().filter(|c| c.color[0] < 128).count();
            assert!(dark == 0 || dark == 2);
        }
    }

    #[test]
    fn band_counts_shrink_to_the_distinct_levels() {
        let histogram = vec![ColorCount::opaque([9, 9, 9], 5)];
        let groups = luminance_bands(&histogram, 8, 8, &params(1), kmeans::cluster_rgb);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].clustering.weights, vec![5]);
    }

    #[test]
    fn adaptive_bands_stay_within_their_caps() {
        let histogram: Vec<ColorCount> = (0..30u8)
            .map(|i| ColorCount::opaque([i * 8, i * 8, 255 - i * 8], 1 + i as usize % 3))
            .collect();
        let groups = adaptive_bands(&histogram, 3, 2, &params(1), kmeans::cluster_rgb);

        assert!((1..=3).contains(&groups.len()));
        assert!(groups.iter().all(|g| g.clustering.centroids.len() <= 2));
        let entries: usize = groups.iter().map(|g| g.histogram.len()).sum();
        assert_eq!(entries, histogram.len());
    }
}
