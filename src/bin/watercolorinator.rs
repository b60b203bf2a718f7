use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use watercolorinator::{
    ColorExtractor, ColorSpace, DominantColorSet, Strategy, config, logging, quantize,
};

/// Extract the dominant colors of images and plot them in RGB space.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// One or more input image paths
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Settings file (TOML or JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of dominant colors (defaults to the configured k)
    #[arg(short = 'k', long = "colors")]
    n_colors: Option<usize>,

    /// Choose k automatically, trying values up to this bound
    #[arg(long, value_name = "MAX", conflicts_with = "n_colors")]
    auto_k: Option<usize>,

    /// Fraction of pixels sampled on large images
    #[arg(long)]
    sample_rate: Option<f64>,

    /// Clustering iteration cap
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Centroid movement below which clustering stops
    #[arg(long)]
    threshold: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,

    /// Cluster in `rgb` or `lab`
    #[arg(long)]
    color_space: Option<ColorSpace>,

    /// Palette strategy: `kmeans`, `alpha_layers`, `luminance` or `adaptive`
    #[arg(long, conflicts_with = "auto_k")]
    strategy: Option<Strategy>,

    /// Write a 3D plot of the colors next to each output
    #[arg(long)]
    plot: bool,

    #[arg(long, default_value = "png", value_parser = ["png", "svg"])]
    plot_format: String,

    /// Also write the image recolored with its dominant colors, and a
    /// difference map against the original
    #[arg(long)]
    reduce: bool,

    /// Output directory (defaults to each input's directory)
    #[arg(short = 'd', long)]
    out_dir: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = config::load(args.config.as_deref()).context("failed to load settings")?;
    if args.verbose {
        settings.logging.level = "debug".to_string();
    }
    let extraction = &mut settings.extraction;
    if let Some(k) = args.n_colors {
        extraction.k = k;
    }
    if let Some(rate) = args.sample_rate {
        extraction.sample_rate = rate;
    }
    if let Some(cap) = args.max_iterations {
        extraction.max_iterations = cap;
    }
    if let Some(threshold) = args.threshold {
        extraction.convergence_threshold = threshold;
    }
    if let Some(seed) = args.seed {
        extraction.seed = seed;
    }
    if let Some(space) = args.color_space {
        extraction.color_space = space;
    }
    if let Some(strategy) = args.strategy {
        extraction.strategy = strategy;
    }
    settings.validate().context("invalid settings")?;

    logging::init_tracing(&settings.logging).context("failed to set up logging")?;

    let extractor =
        ColorExtractor::new(settings.extraction.clone()).with_plot(settings.plot.clone());
    let mut reports = Vec::new();

    for input in &args.inputs {
        let image = extractor.load(input)?;
        let set = match args.auto_k {
            Some(max_k) => {
                let k = extractor.suggest_k(&image, max_k)?;
                extractor.extract(&image, k)
            }
            None => extractor.palette(&image),
        }
        .with_context(|| format!("extraction failed for {}", input.display()))?;

        let stem = input.file_stem().unwrap_or_default().to_string_lossy();
        let dir = match &args.out_dir {
            Some(dir) => dir.clone(),
            None => input.parent().map(Path::to_path_buf).unwrap_or_default(),
        };
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(&dir)
                .with_context(|| format!("cannot create {}", dir.display()))?;
        }

        let mut written = Vec::new();
        if args.plot {
            let path = dir.join(format!("{stem}_colors.{}", args.plot_format));
            extractor.visualize(&set, &path)?;
            written.push(path);
        }
        if args.reduce {
            let reduced = quantize::reduce(&image, &set);
            let reduced_path = dir.join(format!("{stem}_reduced.png"));
            reduced.save(&reduced_path)?;

            let diff_path = dir.join(format!("{stem}_diff.png"));
            quantize::difference_map(&image, &reduced)?
                .save(&diff_path)
                .with_context(|| format!("cannot write {}", diff_path.display()))?;
            let mean = quantize::mean_difference(&image, &reduced)?;
            tracing::info!(mean_difference = mean, "reduced {}", input.display());

            written.push(reduced_path);
            written.push(diff_path);
        }

        if args.json {
            reports.push(report(input, &set, &written));
        } else {
            print_set(input, &set);
            for path in &written {
                println!("Saved → {}", path.display());
            }
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }
    Ok(())
}

fn print_set(input: &Path, set: &DominantColorSet) {
    println!(
        "{} ({} colors, {} samples, {})",
        input.display(),
        set.len(),
        set.sample_count(),
        set.strategy()
    );
    for color in set {
        println!(
            "  #{}  {:>3}  {:>6.2}%  {:>6.1}",
            color.hex(),
            color.alpha,
            color.share * 100.0,
            color.luminance()
        );
    }
    if let Some(warning) = set.warning() {
        println!("  warning: {warning}");
    }
}

fn report(input: &Path, set: &DominantColorSet, written: &[PathBuf]) -> serde_json::Value {
    let colors: Vec<_> = set
        .iter()
        .map(|c| {
            json!({
                "hex": format!("#{}", c.hex()),
                "rgb": c.rgb(),
                "alpha": c.alpha,
                "share": c.share,
                "samples": c.sample_count,
            })
        })
        .collect();
    json!({
        "input": input.display().to_string(),
        "color_space": set.color_space().to_string(),
        "strategy": set.strategy().to_string(),
        "samples": set.sample_count(),
        "iterations": set.iterations(),
        "converged": set.is_converged(),
        "warning": set.warning().map(ToString::to_string),
        "colors": colors,
        "outputs": written.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
    })
}
