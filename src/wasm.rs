//! Browser entry point, built on the same extraction path as the native API.

use js_sys::{Array, Object, Reflect};
use wasm_bindgen::prelude::*;

use crate::config::{DEFAULT_SEED, ExtractionConfig};
use crate::extract::ColorExtractor;
use crate::image::Image;
use crate::logging::NullSink;

/// Dominant colors of an encoded image (PNG, JPEG, ...).
///
/// Returns `{ palette: string[], shares: number[] }` with palette entries as
/// `RRGGBB` hex, most frequent first.
#[wasm_bindgen]
pub fn dominant_colors(
    input: Vec<u8>,
    n_colors: usize,
    seed: Option<u32>,
) -> Result<Object, JsValue> {
    let image = Image::decode(&input)
        .map_err(|e| JsValue::from_str(&format!("Unable to decode image: {e}")))?;

    let config = ExtractionConfig {
        seed: seed.map_or(DEFAULT_SEED, u64::from),
        ..ExtractionConfig::default()
    };
    let set = ColorExtractor::new(config)
        .with_sink(NullSink)
        .extract(&image, n_colors)
        .map_err(|e| JsValue::from_str(&e.to_string()))?;

    let palette_js = Array::new();
    let shares_js = Array::new();
    for color in set.iter() {
        palette_js.push(&JsValue::from_str(&color.hex()));
        shares_js.push(&JsValue::from_f64(color.share));
    }

    let result = Object::new();
    Reflect::set(&result, &JsValue::from_str("palette"), &palette_js)?;
    Reflect::set(&result, &JsValue::from_str("shares"), &shares_js)?;
    Ok(result)
}
