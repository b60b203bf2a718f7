//! Dominant color extraction.

use std::cmp::Ordering;
use std::path::Path;

use palette::Srgb;

use crate::config::{ColorSpace, ExtractionConfig, MAX_CLUSTERS, PlotConfig, Strategy};
use crate::error::{ConvergenceWarning, ExtractError, Result};
use crate::image::{Image, load as load_image};
use crate::kmeans::{self, KmeansParams};
use crate::logging::{LogSink, TracingSink};
use crate::sample::ColorSample;
use crate::strategy::{self, Backend, Group};

/// Rec. 709 luma coefficients, applied to 8-bit sRGB channels.
const LUMINANCE_WEIGHTS: [f64; 3] = [0.2126, 0.7152, 0.0722];

/// One cluster of the result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DominantColor {
    pub color: Srgb<u8>,
    /// Mean alpha of the samples in this cluster.
    pub alpha: u8,
    /// Fraction of the sampled pixels assigned to this color.
    pub share: f64,
    pub sample_count: usize,
}

impl DominantColor {
    pub fn rgb(&self) -> [u8; 3] {
        [self.color.red, self.color.green, self.color.blue]
    }

    /// `RRGGBB`, upper case, no leading `#`.
    pub fn hex(&self) -> String {
        format!(
            "{:02X}{:02X}{:02X}",
            self.color.red, self.color.green, self.color.blue
        )
    }

    pub fn luminance(&self) -> f64 {
        luminance(self.rgb())
    }
}

/// K dominant colors ordered by descending population, plus how they were
/// obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct DominantColorSet {
    colors: Vec<DominantColor>,
    sample_count: usize,
    color_space: ColorSpace,
    strategy: Strategy,
    iterations: Option<usize>,
    warning: Option<ConvergenceWarning>,
}

impl DominantColorSet {
    pub fn colors(&self) -> &[DominantColor] {
        &self.colors
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DominantColor> {
        self.colors.iter()
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Number of pixels that went into the clustering.
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Lloyd iterations of the winning run, when the backend reports them.
    /// Layered palettes report the largest count over their groups.
    pub fn iterations(&self) -> Option<usize> {
        self.iterations
    }

    /// Set when clustering hit the iteration cap before settling. Layered
    /// palettes keep the warning with the largest final shift.
    pub fn warning(&self) -> Option<&ConvergenceWarning> {
        self.warning.as_ref()
    }

    pub fn is_converged(&self) -> bool {
        self.warning.is_none()
    }
}

impl<'a> IntoIterator for &'a DominantColorSet {
    type Item = &'a DominantColor;
    type IntoIter = std::slice::Iter<'a, DominantColor>;

    fn into_iter(self) -> Self::IntoIter {
        self.colors.iter()
    }
}

/// Loads images, extracts their dominant colors and plots them.
///
/// Configuration is handed in at construction; progress, warnings and every
/// error go to the injected [`LogSink`] before the call returns.
#[derive(Debug, Clone)]
pub struct ColorExtractor<S: LogSink = TracingSink> {
    config: ExtractionConfig,
    plot: PlotConfig,
    sink: S,
}

impl ColorExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self {
            config,
            plot: PlotConfig::default(),
            sink: TracingSink,
        }
    }
}

impl Default for ColorExtractor {
    fn default() -> Self {
        Self::new(ExtractionConfig::default())
    }
}

impl<S: LogSink> ColorExtractor<S> {
    pub fn with_sink<T: LogSink>(self, sink: T) -> ColorExtractor<T> {
        ColorExtractor {
            config: self.config,
            plot: self.plot,
            sink,
        }
    }

    pub fn with_plot(mut self, plot: PlotConfig) -> Self {
        self.plot = plot;
        self
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn plot_config(&self) -> &PlotConfig {
        &self.plot
    }

    pub fn load(&self, path: impl AsRef<Path>) -> Result<Image> {
        let path = path.as_ref();
        let timer = Timer::start();
        let image = load_image(path).or_else(|e| self.fail(e))?;
        self.sink.info(&format!(
            "loaded {} ({}x{}){}",
            path.display(),
            image.width(),
            image.height(),
            timer.suffix()
        ));
        Ok(image)
    }

    /// Cluster the pixels of `image` into `k` dominant colors.
    ///
    /// Fails with `InvalidArgument` when `k` is 0, above 256, or above the
    /// number of distinct colors in the sample, and when the image has no
    /// pixel left to sample.
    pub fn extract(&self, image: &Image, k: usize) -> Result<DominantColorSet> {
        self.check_k(k)?;
        let sample = self.sample(image)?;
        let histogram = sample.histogram();
        if k > histogram.len() {
            return self.fail(ExtractError::invalid(format!(
                "k = {k} exceeds the {} distinct colors sampled",
                histogram.len()
            )));
        }

        let timer = Timer::start();
        let clustering = self.backend()(&histogram, &self.params(k));
        let set = self.finish(
            vec![Group {
                histogram,
                clustering,
            }],
            sample.len(),
            Strategy::Kmeans,
        );
        self.sink.info(&format!(
            "extracted {k} dominant colors in {} space{}",
            set.color_space,
            timer.suffix()
        ));
        Ok(set)
    }

    /// Build the palette of `image` with the configured strategy.
    ///
    /// `kmeans` is [`extract`](Self::extract) with the configured `k`.
    /// `alpha_layers` clusters every distinct alpha value on its own into at
    /// most `k` colors. `luminance` splits the sample into at most
    /// `k_luminance` luminance bands and clusters each into at most `k_color`
    /// colors; `adaptive` does the same with both counts picked by silhouette.
    /// Shares are always fractions of the whole sample.
    pub fn palette(&self, image: &Image) -> Result<DominantColorSet> {
        let kind = self.config.strategy;
        let params = self.params(self.config.k);
        let (k_luminance, k_color) = (self.config.k_luminance, self.config.k_color);

        let (total, groups, timer) = match kind {
            Strategy::Kmeans => return self.extract(image, self.config.k),
            Strategy::AlphaLayers => {
                self.check_k(self.config.k)?;
                let sample = self.sample(image)?;
                let timer = Timer::start();
                let groups = strategy::alpha_layers(&sample, &params, self.backend());
                (sample.len(), groups, timer)
            }
            Strategy::Luminance | Strategy::Adaptive => {
                let sample = self.sample(image)?;
                let timer = Timer::start();
                let histogram = sample.histogram();
                let backend = self.backend();
                let groups = if kind == Strategy::Luminance {
                    strategy::luminance_bands(&histogram, k_luminance, k_color, &params, backend)
                } else {
                    strategy::adaptive_bands(&histogram, k_luminance, k_color, &params, backend)
                };
                (sample.len(), groups, timer)
            }
        };

        let group_count = groups.len();
        let set = self.finish(groups, total, kind);
        self.sink.info(&format!(
            "built a {kind} palette of {} colors from {group_count} groups{}",
            set.len(),
            timer.suffix()
        ));
        Ok(set)
    }

    /// Pick a cluster count for `image` between 2 and `max_k` by silhouette.
    pub fn suggest_k(&self, image: &Image, max_k: usize) -> Result<usize> {
        if max_k < 2 {
            return self.fail(ExtractError::invalid(format!(
                "max_k must be at least 2, got {max_k}"
            )));
        }
        let sample = self.sample(image)?;
        let histogram = sample.histogram();
        let k = kmeans::suggest_k(&histogram, max_k.min(MAX_CLUSTERS), &self.params(2));
        self.sink.info(&format!(
            "suggested k = {k} from {} distinct colors",
            histogram.len()
        ));
        Ok(k)
    }

    /// Render `set` as a 3D RGB scatter plot to `path`; the extension picks
    /// the format (`svg`, `png`, `jpg`, `jpeg`, `bmp`).
    #[cfg(not(target_arch = "wasm32"))]
    pub fn visualize(&self, set: &DominantColorSet, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if set.is_empty() {
            self.sink.warn("no colors to plot");
            return Ok(());
        }
        let timer = Timer::start();
        crate::plot::render_to_file(set, &self.plot, path).or_else(|e| self.fail(e))?;
        self.sink.info(&format!("plot written to {}{}", path.display(), timer.suffix()));
        Ok(())
    }

    /// Render `set` into an RGB8 buffer of `width * height * 3` bytes.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn render(&self, set: &DominantColorSet) -> Result<Vec<u8>> {
        crate::plot::render_to_rgb_buffer(set, &self.plot).or_else(|e| self.fail(e))
    }

    fn check_k(&self, k: usize) -> Result<()> {
        if k == 0 {
            return self.fail(ExtractError::invalid("k must be at least 1"));
        }
        if k > MAX_CLUSTERS {
            return self.fail(ExtractError::invalid(format!(
                "k = {k} exceeds the supported maximum of {MAX_CLUSTERS}"
            )));
        }
        Ok(())
    }

    /// Validate the settings and draw the sample clustering runs on.
    fn sample(&self, image: &Image) -> Result<ColorSample> {
        self.config.validate().or_else(|e| self.fail(e))?;

        let timer = Timer::start();
        let sample = ColorSample::draw(image, &self.config);
        if sample.is_empty() {
            return self.fail(ExtractError::invalid("image has no opaque pixels to sample"));
        }
        self.sink.debug(&format!(
            "sampled {} of {} pixels{}",
            sample.len(),
            sample.population(),
            timer.suffix()
        ));
        Ok(sample)
    }

    fn backend(&self) -> Backend {
        match self.config.color_space {
            ColorSpace::Rgb => kmeans::cluster_rgb,
            ColorSpace::Lab => kmeans::cluster_lab,
        }
    }

    /// Turn clustered groups into a set, reporting groups that did not
    /// converge.
    fn finish(&self, groups: Vec<Group>, total: usize, strategy: Strategy) -> DominantColorSet {
        let mut colors = Vec::new();
        let mut iterations = None;
        let mut warning: Option<ConvergenceWarning> = None;

        for group in &groups {
            let clustering = &group.clustering;
            iterations = iterations.max(clustering.iterations);
            if !clustering.converged {
                let group_warning = ConvergenceWarning {
                    iterations: clustering.iterations.unwrap_or(self.config.max_iterations),
                    final_shift: clustering.final_shift,
                    threshold: self.config.convergence_threshold,
                };
                self.sink.warn(&group_warning.to_string());
                if warning
                    .as_ref()
                    .is_none_or(|w| group_warning.final_shift > w.final_shift)
                {
                    warning = Some(group_warning);
                }
            }
            colors.extend(dominant_colors(group, total));
        }
        colors.sort_by(by_population);

        DominantColorSet {
            colors,
            sample_count: total,
            color_space: self.config.color_space,
            strategy,
            iterations,
            warning,
        }
    }

    fn params(&self, k: usize) -> KmeansParams {
        KmeansParams {
            k,
            max_iterations: self.config.max_iterations,
            convergence_threshold: self.config.convergence_threshold,
            restarts: self.config.restarts,
            seed: self.config.seed,
        }
    }

    fn fail<T>(&self, err: ExtractError) -> Result<T> {
        self.sink.error(&err.to_string());
        Err(err)
    }
}

fn dominant_colors(group: &Group, total: usize) -> Vec<DominantColor> {
    let clustering = &group.clustering;
    let mut alpha_sums = vec![0u64; clustering.centroids.len()];
    for (entry, &cluster) in group.histogram.iter().zip(&clustering.assignments) {
        alpha_sums[cluster] += entry.alpha_sum;
    }

    let mut colors: Vec<DominantColor> = clustering
        .centroids
        .iter()
        .zip(&clustering.weights)
        .zip(alpha_sums)
        .map(|((&centroid, &count), alpha_sum)| {
            let [r, g, b] = kmeans::to_rgb8(centroid);
            let alpha = if count == 0 {
                255
            } else {
                (alpha_sum as f64 / count as f64).round() as u8
            };
            DominantColor {
                color: Srgb::new(r, g, b),
                alpha,
                share: count as f64 / total as f64,
                sample_count: count,
            }
        })
        .collect();
    colors.sort_by(by_population);
    colors
}

/// Bigger clusters first; equal ones darker first, then by channel values.
fn by_population(a: &DominantColor, b: &DominantColor) -> Ordering {
    b.sample_count
        .cmp(&a.sample_count)
        .then_with(|| a.luminance().total_cmp(&b.luminance()))
        .then_with(|| a.rgb().cmp(&b.rgb()))
}

pub(crate) fn luminance([r, g, b]: [u8; 3]) -> f64 {
    LUMINANCE_WEIGHTS[0] * r as f64
        + LUMINANCE_WEIGHTS[1] * g as f64
        + LUMINANCE_WEIGHTS[2] * b as f64
}

/// Stage timing for log lines. `Instant` is unavailable on wasm32, where the
/// suffix is simply empty.
struct Timer {
    #[cfg(not(target_arch = "wasm32"))]
    started: std::time::Instant,
}

impl Timer {
    fn start() -> Self {
        Self {
            #[cfg(not(target_arch = "wasm32"))]
            started: std::time::Instant::now(),
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn suffix(&self) -> String {
        format!(" in {:.2?}", self.started.elapsed())
    }

    #[cfg(target_arch = "wasm32")]
    fn suffix(&self) -> String {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kmeans::Clustering;
    use crate::logging::NullSink;
    use crate::sample::ColorCount;

    fn color(rgb: [u8; 3], sample_count: usize) -> DominantColor {
        DominantColor {
            color: Srgb::new(rgb[0], rgb[1], rgb[2]),
            alpha: 255,
            share: 0.0,
            sample_count,
        }
    }

    #[test]
    fn equal_populations_put_the_darker_color_first() {
        let mut colors = vec![
            color([255, 255, 255], 3),
            color([0, 0, 0], 3),
            color([9, 9, 9], 5),
        ];
        colors.sort_by(by_population);
        assert_eq!(colors[0].rgb(), [9, 9, 9]);
        assert_eq!(colors[1].rgb(), [0, 0, 0]);
        assert_eq!(colors[2].rgb(), [255, 255, 255]);
    }

    #[test]
    fn hex_is_upper_case_without_hash() {
        assert_eq!(color([255, 10, 171], 1).hex(), "FF0AAB");
    }

    #[test]
    fn shares_and_alpha_follow_cluster_members() {
        let group = Group {
            histogram: vec![
                ColorCount::opaque([10, 10, 10], 1),
                ColorCount {
                    color: [200, 0, 0],
                    count: 3,
                    alpha_sum: 300,
                },
            ],
            clustering: Clustering {
                centroids: vec![[10.0, 10.0, 10.0], [200.4, 0.0, 0.0]],
                weights: vec![1, 3],
                assignments: vec![0, 1],
                inertia: 0.0,
                iterations: Some(1),
                converged: true,
                final_shift: 0.0,
            },
        };
        let colors = dominant_colors(&group, 8);
        assert_eq!(colors[0].rgb(), [200, 0, 0]);
        assert_eq!(colors[0].alpha, 100);
        assert_eq!(colors[0].share, 0.375);
        assert_eq!(colors[1].alpha, 255);
        assert_eq!(colors[1].share, 0.125);
    }

    #[test]
    fn iteration_cap_sets_the_warning() {
        let pixels: Vec<[u8; 3]> = (0..64u8).map(|i| [i * 4, 255 - i * 3, i]).collect();
        let image = Image::from_rgb(8, 8, &pixels).expect("valid dimensions");
        let extractor = ColorExtractor::new(ExtractionConfig {
            max_iterations: 1,
            convergence_threshold: 0.0,
            restarts: 1,
            ..ExtractionConfig::default()
        })
        .with_sink(NullSink);

        let set = extractor.extract(&image, 1).expect("extraction succeeds");
        assert_eq!(set.len(), 1);
        let warning = set.warning().expect("the seed is never the mean");
        assert_eq!(warning.iterations, 1);
        assert!(!set.is_converged());
    }

    #[test]
    fn alpha_layers_palette_keeps_layer_alpha() {
        let image = Image::from_rgba(::image::RgbaImage::from_fn(4, 2, |x, y| {
            let alpha = if y == 0 { 255 } else { 90 };
            ::image::Rgba([x as u8 * 60, 0, 200, alpha])
        }));
        let extractor = ColorExtractor::new(ExtractionConfig {
            strategy: Strategy::AlphaLayers,
            k: 2,
            ..ExtractionConfig::default()
        })
        .with_sink(NullSink);

        let set = extractor.palette(&image).expect("palette builds");
        assert_eq!(set.strategy(), Strategy::AlphaLayers);
        assert_eq!(set.len(), 4);
        assert_eq!(set.iter().filter(|c| c.alpha == 90).count(), 2);
        assert_eq!(set.iter().filter(|c| c.alpha == 255).count(), 2);
        assert_eq!(set.iter().map(|c| c.sample_count).sum::<usize>(), 8);
    }

    #[test]
    fn kmeans_palette_matches_extract() {
        let pixels: Vec<[u8; 3]> = (0..16u8).map(|i| [i * 16, 40, 255 - i * 16]).collect();
        let image = Image::from_rgb(4, 4, &pixels).expect("valid dimensions");
        let extractor = ColorExtractor::new(ExtractionConfig {
            k: 3,
            ..ExtractionConfig::default()
        })
        .with_sink(NullSink);

        assert_eq!(
            extractor.palette(&image).expect("palette builds"),
            extractor.extract(&image, 3).expect("extraction succeeds")
        );
    }

    #[test]
    fn fully_transparent_image_is_rejected() {
        let image = Image::from_rgba(::image::RgbaImage::new(3, 3));
        let err = ColorExtractor::default()
            .with_sink(NullSink)
            .extract(&image, 1)
            .unwrap_err();
        assert!(matches!(err, ExtractError::InvalidArgument(_)));
    }
}
