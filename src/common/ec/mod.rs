use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use log::{debug, warn};
use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::common::bitstream::BitStream;
use crate::common::metadata::MAX_PAYLOAD_BITS;

// Sampled bit
//------------------------------------------------------------------------------

/// One sampled (ring, segment) position with its local context, consumed
/// only by the corrector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampledBit {
    /// Raw intensity from bilinear interpolation, 0 = dark
    pub intensity: f32,
    /// Mean intensity of the local neighborhood
    pub local_avg: f32,
    /// Local gradient magnitude from central differences
    pub gradient: f32,
    /// Contrast based confidence in [0, 1]
    pub confidence: f32,
    /// False when the sample fell outside the image; forces a zero bit
    pub in_bounds: bool,
}

impl SampledBit {
    pub fn out_of_bounds() -> Self {
        Self { intensity: 0.0, local_avg: 0.0, gradient: 0.0, confidence: 0.0, in_bounds: false }
    }

    /// Fallback bit when no model is available. Dark is 1, matching the
    /// encoder's foreground convention.
    fn threshold_bit(&self) -> bool {
        self.in_bounds && self.intensity < 128.0
    }
}

// Correction model
//------------------------------------------------------------------------------

pub const FEATURE_COUNT: usize = 10;

const DEFAULT_MODEL_PATH: &str = "models/kd_correction.json";
const MODEL_PATH_ENV: &str = "KD_CORRECTION_MODEL";

/// Logistic classifier predicting a bit from its sampling context.
///
/// Immutable once constructed; a single instance is safe to share across
/// concurrent decode calls. The process wide default is loaded lazily and
/// exactly once by [`CorrectionModel::shared`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionModel {
    weights: [f64; FEATURE_COUNT],
    bias: f64,
}

static SHARED_MODEL: OnceLock<Option<CorrectionModel>> = OnceLock::new();

impl CorrectionModel {
    /// Loads a model artifact. Absence or a malformed artifact is not an
    /// error; the corrector degrades to threshold bits.
    pub fn load(path: &Path) -> Option<Self> {
        let raw = fs::read_to_string(path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(model) => Some(model),
            Err(e) => {
                warn!("Ignoring malformed correction model at {}: {e}", path.display());
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let raw = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, raw)
    }

    /// Process wide default model, loaded once from `$KD_CORRECTION_MODEL`
    /// or `models/kd_correction.json`.
    pub fn shared() -> Option<&'static Self> {
        SHARED_MODEL
            .get_or_init(|| {
                let path =
                    std::env::var(MODEL_PATH_ENV).unwrap_or_else(|_| DEFAULT_MODEL_PATH.into());
                let model = Self::load(Path::new(&path));
                debug!("Correction model at {path}: {}", if model.is_some() { "loaded" } else { "absent" });
                model
            })
            .as_ref()
    }

    /// Fits logistic weights on a synthetic noisy intensity set built
    /// through the same feature extraction the corrector uses at decode
    /// time. Deterministic for a fixed seed.
    pub fn train_synthetic(samples: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut model = Self { weights: [0.0; FEATURE_COUNT], bias: 0.0 };
        let rate = 0.05;

        for _ in 0..samples {
            // Dark is 1; simulate a drawn or background segment read
            // through sensor noise
            let bit = rng.random_bool(0.5);
            let clean: f64 =
                if bit { rng.random_range(0.0..100.0) } else { rng.random_range(155.0..255.0) };
            let sigma: f64 = rng.random_range(0.0..50.0);
            let noisy = (clean + (rng.random::<f64>() - 0.5) * 2.0 * sigma).clamp(0.0, 255.0);
            let local = (clean + (rng.random::<f64>() - 0.5) * 30.0).clamp(0.0, 255.0);

            let sample = SampledBit {
                intensity: noisy as f32,
                local_avg: local as f32,
                gradient: rng.random_range(0.0..255.0) as f32,
                confidence: (((noisy - local).abs() / 128.0).min(1.0)) as f32,
                in_bounds: true,
            };
            // Neighboring segments mostly share the bit value
            let prev = if rng.random_bool(0.85) { bit } else { !bit };
            let next = if rng.random_bool(0.85) { bit } else { !bit };
            let pos = rng.random_range(0..MAX_PAYLOAD_BITS);
            let features = context_features(&sample, Some(prev), Some(next), pos, MAX_PAYLOAD_BITS);

            let label = if bit { 1.0 } else { 0.0 };
            let err = model.probability(&features) - label;
            for (w, f) in model.weights.iter_mut().zip(features.iter()) {
                *w -= rate * err * f;
            }
            model.bias -= rate * err;
        }

        model
    }

    fn probability(&self, features: &[f64; FEATURE_COUNT]) -> f64 {
        let z: f64 =
            self.weights.iter().zip(features.iter()).map(|(w, f)| w * f).sum::<f64>() + self.bias;
        1.0 / (1.0 + (-z).exp())
    }

    /// Predicts a bit from a feature vector; 1 means dark.
    pub fn classify(&self, features: &[f64; FEATURE_COUNT]) -> bool {
        self.probability(features) >= 0.5
    }
}

// Contextual correction
//------------------------------------------------------------------------------

/// Feature vector for one sample given its neighbors and position.
fn context_features(
    sample: &SampledBit,
    prev_bit: Option<bool>,
    next_bit: Option<bool>,
    pos: usize,
    len: usize,
) -> [f64; FEATURE_COUNT] {
    let contrast = (sample.intensity - sample.local_avg).abs();
    [
        sample.intensity as f64 / 255.0,
        // Low contrast means a noisy, unreliable read
        (255.0 - contrast as f64) / 255.0,
        sample.local_avg as f64 / 255.0,
        sample.gradient as f64 / 255.0,
        sample.confidence as f64,
        prev_bit.map_or(0.5, |b| b as u8 as f64),
        next_bit.map_or(0.5, |b| b as u8 as f64),
        (pos % 8) as f64 / 8.0,
        if len > 0 { pos as f64 / len as f64 } else { 0.0 },
        if sample.intensity < 128.0 { 1.0 } else { 0.0 },
    ]
}

// A read this close to the threshold carries no contrast of its own and
// may be decided by its neighbors instead
const AMBIGUOUS_BAND: f32 = 48.0;

/// Corrects a sampled bit sequence into the final bit stream. Each bit is
/// corrected exactly once; the result is deterministic for a fixed model
/// and input.
///
/// Without a model the threshold bits pass through unchanged. With one,
/// the deterministic identical-neighbors override runs before the model:
/// an ambiguous read flipped between two equal neighbors takes the
/// neighbors' value. The override is limited to mid-range intensities so
/// it catches noise spikes without erasing legitimate isolated bits.
pub fn correct(samples: &[SampledBit], model: Option<&CorrectionModel>) -> BitStream {
    let threshold: Vec<bool> = samples.iter().map(SampledBit::threshold_bit).collect();

    let mut out = BitStream::new(samples.len().min(MAX_PAYLOAD_BITS));
    for (i, sample) in samples.iter().enumerate().take(MAX_PAYLOAD_BITS) {
        let prev = (i > 0).then(|| threshold[i - 1]);
        let next = (i + 1 < threshold.len()).then(|| threshold[i + 1]);
        let bit = threshold[i];

        let Some(model) = model else {
            out.push(bit);
            continue;
        };

        let ambiguous = (sample.intensity - 128.0).abs() < AMBIGUOUS_BAND;
        let corrected = match (prev, next) {
            // Single bit flip between identical neighbors
            (Some(p), Some(n)) if p == n && bit != p && ambiguous && sample.in_bounds => p,
            _ if sample.in_bounds => {
                model.classify(&context_features(sample, prev, next, i, samples.len()))
            }
            _ => bit,
        };
        out.push(corrected);
    }
    out
}

#[cfg(test)]
mod ec_tests {

    use super::*;

    fn dark(intensity: f32) -> SampledBit {
        SampledBit {
            intensity,
            local_avg: 128.0,
            gradient: 0.0,
            confidence: ((intensity - 128.0).abs() / 128.0).min(1.0),
            in_bounds: true,
        }
    }

    fn bits(stream: &BitStream) -> Vec<bool> {
        let mut s = stream.clone();
        s.rewind();
        s.collect()
    }

    #[test]
    fn test_threshold_passthrough_without_model() {
        // Isolated bits pass through untouched; the override needs a model
        let samples = [dark(20.0), dark(240.0), dark(20.0), dark(20.0)];
        let out = correct(&samples, None);
        assert_eq!(bits(&out), [true, false, true, true]);
    }

    #[test]
    fn test_neighbor_override_flips_ambiguous_spike() {
        let model = CorrectionModel::train_synthetic(20_000, 42);

        // 1 ?(150) 1 -> ambiguous middle takes the neighbors' value
        let samples = [dark(20.0), dark(150.0), dark(20.0)];
        let out = correct(&samples, Some(&model));
        assert_eq!(bits(&out), [true, true, true]);

        // 0 ?(110) 0 -> flips back to 0
        let samples = [dark(240.0), dark(110.0), dark(240.0)];
        let out = correct(&samples, Some(&model));
        assert_eq!(bits(&out), [false, false, false]);
    }

    #[test]
    fn test_neighbor_override_spares_confident_reads() {
        // A clearly bright read between dark neighbors is data, not noise
        let model = CorrectionModel::train_synthetic(20_000, 42);
        let samples = [dark(20.0), dark(245.0), dark(20.0)];
        let out = correct(&samples, Some(&model));
        assert_eq!(bits(&out), [true, false, true]);
    }

    #[test]
    fn test_out_of_bounds_is_zero() {
        let samples = [dark(20.0), SampledBit::out_of_bounds(), dark(240.0)];
        let out = correct(&samples, None);
        assert_eq!(bits(&out), [true, false, false]);
        assert_eq!(samples[1].confidence, 0.0);
    }

    #[test]
    fn test_trained_model_separates_clear_bits() {
        let model = CorrectionModel::train_synthetic(20_000, 42);
        let dark_features = context_features(&dark(10.0), Some(true), Some(true), 4, 16);
        let bright_features = context_features(&dark(245.0), Some(false), Some(false), 4, 16);
        assert!(model.classify(&dark_features));
        assert!(!model.classify(&bright_features));
    }

    #[test]
    fn test_model_is_deterministic() {
        let a = CorrectionModel::train_synthetic(5_000, 7);
        let b = CorrectionModel::train_synthetic(5_000, 7);
        assert_eq!(a.weights, b.weights);
        assert_eq!(a.bias, b.bias);
    }

    #[test]
    fn test_model_artifact_round_trip() {
        let model = CorrectionModel::train_synthetic(5_000, 11);
        let path = std::env::temp_dir().join("kd_correction_round_trip.json");
        model.save(&path).unwrap();
        let loaded = CorrectionModel::load(&path).unwrap();
        assert_eq!(model.weights, loaded.weights);
        assert_eq!(model.bias, loaded.bias);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_malformed_artifact_is_ignored() {
        let path = std::env::temp_dir().join("kd_correction_malformed.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(CorrectionModel::load(&path).is_none());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_correction_with_model_is_deterministic() {
        let model = CorrectionModel::train_synthetic(5_000, 3);
        let samples: Vec<SampledBit> =
            (0..32).map(|i| dark(if i % 3 == 0 { 30.0 } else { 220.0 })).collect();
        let a = correct(&samples, Some(&model));
        let b = correct(&samples, Some(&model));
        assert_eq!(bits(&a), bits(&b));
    }
}
