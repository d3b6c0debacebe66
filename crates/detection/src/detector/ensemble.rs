use super::features::{FeatureVector, FEATURE_COUNT};
use crate::model::Activity;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

/// Per-dimension z-scores are clipped here before scoring so a single wild
/// measurement cannot saturate the whole vector.
const Z_CLIP: f64 = 5.0;
/// Ensemble scores are capped below 1.0 to keep headroom; callers must not
/// treat the cap as "not an anomaly".
pub const SCORE_CAP: f64 = 0.95;

/// Standardization layer in front of the scorers.
///
/// The untrained default centers on zero with conservative prior spreads
/// per dimension; the training pipeline replaces both with fitted moments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureScaler {
    pub means: [f64; FEATURE_COUNT],
    pub stds: [f64; FEATURE_COUNT],
}

impl Default for FeatureScaler {
    fn default() -> Self {
        Self {
            means: [0.0; FEATURE_COUNT],
            // Priors roughly matching the plausible spread of each
            // dimension: megabyte counts vary by orders of magnitude more
            // than the [0,1] behavioral scores.
            stds: [50.0, 5.0, 2.0, 2.0, 100.0, 3.0, 50.0, 5.0, 0.25, 0.35, 0.3, 0.5, 0.5],
        }
    }
}

impl FeatureScaler {
    pub fn transform(&self, features: &FeatureVector) -> [f64; FEATURE_COUNT] {
        let raw = features.to_array();
        let mut scaled = [0.0; FEATURE_COUNT];
        for i in 0..FEATURE_COUNT {
            let std = if self.stds[i] > 1e-9 { self.stds[i] } else { 1.0 };
            scaled[i] = ((raw[i] - self.means[i]) / std).clamp(-Z_CLIP, Z_CLIP);
        }
        scaled
    }

    /// Fit means and standard deviations from training rows.
    pub fn fit(rows: &[[f64; FEATURE_COUNT]]) -> Self {
        let mut scaler = FeatureScaler {
            means: [0.0; FEATURE_COUNT],
            stds: [1.0; FEATURE_COUNT],
        };
        if rows.is_empty() {
            return scaler;
        }
        let n = rows.len() as f64;
        for i in 0..FEATURE_COUNT {
            let mean = rows.iter().map(|r| r[i]).sum::<f64>() / n;
            let var = rows.iter().map(|r| (r[i] - mean).powi(2)).sum::<f64>() / n;
            scaler.means[i] = mean;
            scaler.stds[i] = var.sqrt().max(1e-6);
        }
        scaler
    }
}

/// Unsupervised outlier scorer over the scaled feature vector.
///
/// Each dimension contributes a saturating response `|z| / (|z| + 1)`
/// weighted by how diagnostic that dimension is; the score is the strongest
/// weighted response, normalized to [0, 1]. A point is independently
/// flagged when any dimension exceeds the three-sigma vote threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlierModel {
    pub weights: [f64; FEATURE_COUNT],
    pub vote_threshold: f64,
}

impl Default for OutlierModel {
    fn default() -> Self {
        Self {
            // Sensitive access, deletion and rapid-burst deviations are the
            // most diagnostic for insider activity; bulk-transfer magnitudes
            // the least, they are handled by the pattern stage.
            weights: [0.4, 0.5, 0.9, 0.9, 0.15, 0.5, 0.1, 0.5, 0.5, 0.6, 0.7, 0.5, 0.5],
            vote_threshold: 3.0,
        }
    }
}

impl OutlierModel {
    pub fn score(&self, scaled: &[f64; FEATURE_COUNT]) -> f64 {
        let mut strongest: f64 = 0.0;
        for i in 0..FEATURE_COUNT {
            let magnitude = scaled[i].abs();
            let response = magnitude / (magnitude + 1.0);
            strongest = strongest.max(self.weights[i] * response);
        }
        strongest.clamp(0.0, 1.0)
    }

    /// Independent anomaly vote: any dimension past three sigma.
    pub fn is_outlier(&self, scaled: &[f64; FEATURE_COUNT]) -> bool {
        scaled.iter().any(|z| z.abs() >= self.vote_threshold)
    }
}

/// Optional supervised scorer fitted by the training pipeline. Linear over
/// the scaled features; absent until the first successful training cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModel {
    pub weights: [f64; FEATURE_COUNT],
    pub bias: f64,
}

impl LinearModel {
    pub fn score(&self, scaled: &[f64; FEATURE_COUNT]) -> f64 {
        let raw = self.bias
            + self
                .weights
                .iter()
                .zip(scaled.iter())
                .map(|(w, z)| w * z)
                .sum::<f64>();
        raw.clamp(0.0, 1.0)
    }
}

/// The full per-event model set, serialized as one artifact by the
/// training pipeline and swapped in atomically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectorModels {
    pub scaler: FeatureScaler,
    pub outlier: OutlierModel,
    pub regressor: Option<LinearModel>,
}

/// Verdict of the model ensemble before the pattern stage.
#[derive(Debug, Clone, Copy)]
pub struct EnsembleScore {
    pub score: f64,
    pub outlier_vote: bool,
    pub outlier_score: f64,
}

impl DetectorModels {
    /// Weighted combination: 0.6 outlier + 0.4 regression, falling back to
    /// the outlier score alone while the regressor is untrained.
    pub fn score(&self, features: &FeatureVector) -> EnsembleScore {
        let scaled = self.scaler.transform(features);
        let outlier_score = self.outlier.score(&scaled);
        let regression_score = self
            .regressor
            .as_ref()
            .map(|m| m.score(&scaled))
            .unwrap_or(outlier_score);
        EnsembleScore {
            score: 0.6 * outlier_score + 0.4 * regression_score,
            outlier_vote: self.outlier.is_outlier(&scaled),
            outlier_score,
        }
    }
}

/// Shared registry holding the live model set. The training scheduler
/// writes a new artifact and the serving process swaps it in whole; readers
/// never see a half-updated set.
pub struct ModelRegistry {
    models: RwLock<DetectorModels>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self {
            models: RwLock::new(DetectorModels::default()),
        }
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn score(&self, features: &FeatureVector) -> EnsembleScore {
        self.models.read().expect("model registry poisoned").score(features)
    }

    pub fn swap(&self, models: DetectorModels) {
        *self.models.write().expect("model registry poisoned") = models;
    }

    pub fn snapshot(&self) -> DetectorModels {
        self.models.read().expect("model registry poisoned").clone()
    }
}

/// Additive boosts for curated threat cues, applied after the model
/// ensemble and capped at [`SCORE_CAP`].
pub fn pattern_boost(activity: &Activity, features: &FeatureVector, same_kind_recent: usize) -> f64 {
    let details = &activity.details;
    let mut boost = 0.0;

    if details.file_size_mb() > 50.0 || features.data_transfer_mb > 50.0 {
        boost += 0.15;
    }
    if details.is_sensitive() {
        boost += 0.20;
    }
    if details.is_external() && details.attachment_size_mb() > 10.0 {
        boost += 0.25;
    }
    if activity.is_off_hours() {
        boost += 0.15;
    }
    if super::features::process_looks_suspicious(details) || details.suspicious_keywords() > 0 {
        boost += 0.20;
    }
    if same_kind_recent >= 10 {
        boost += 0.15;
    }

    boost
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_scaler_keeps_zero_vector_unremarkable() {
        let models = DetectorModels::default();
        let verdict = models.score(&FeatureVector::default());
        assert_eq!(verdict.score, 0.0);
        assert!(!verdict.outlier_vote);
    }

    #[test]
    fn single_strong_dimension_votes_outlier() {
        let models = DetectorModels::default();
        let features = FeatureVector {
            off_hours_score: 0.8,
            ..Default::default()
        };
        let verdict = models.score(&features);
        // 0.8 against a 0.25 prior spread is past three sigma.
        assert!(verdict.outlier_vote);
        assert!(verdict.score > 0.25, "got {}", verdict.score);
    }

    #[test]
    fn bulk_transfer_scores_moderately_without_regressor() {
        let models = DetectorModels::default();
        let features = FeatureVector {
            data_transfer_mb: 120.0,
            email_attachment_mb: 120.0,
            external_emails: 1.0,
            ..Default::default()
        };
        let verdict = models.score(&features);
        assert!(verdict.score < 0.25, "transfer magnitudes are pattern-stage work, got {}", verdict.score);
    }

    #[test]
    fn regressor_participates_when_present() {
        let mut models = DetectorModels::default();
        let features = FeatureVector {
            sensitive_file_count: 10.0,
            ..Default::default()
        };
        let without = models.score(&features).score;
        models.regressor = Some(LinearModel {
            weights: [0.2; FEATURE_COUNT],
            bias: 0.0,
        });
        let with = models.score(&features).score;
        assert_ne!(without, with);
    }

    #[test]
    fn scaler_fit_recovers_moments() {
        let rows = vec![[1.0; FEATURE_COUNT], [3.0; FEATURE_COUNT]];
        let scaler = FeatureScaler::fit(&rows);
        assert!((scaler.means[0] - 2.0).abs() < 1e-9);
        assert!((scaler.stds[0] - 1.0).abs() < 1e-9);
    }
}
