//! # Model Training Pipeline
//!
//! Periodically refits the ITS classifiers and the detector's supervised
//! scorer from stored activity history, falling back to a synthetic
//! generator when the store has no usable history (a fresh deployment).
//! The finished model set is written as one artifact and swapped into the
//! serving registries atomically.

use crate::detector::{DetectorModels, FeatureScaler, LinearModel, FEATURE_COUNT};
use crate::its::{
    ForestModel, ForestTree, ItsFeatures, ItsModels, ItsOutlier, Stump, StumpEnsemble,
    ITS_FEATURE_COUNT,
};
use crate::repository::Repository;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sentinel_core::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Below this many labeled rows the pipeline trains on synthetic data.
const MIN_TRAINING_ROWS: usize = 200;
/// Boosting rounds for the stump ensemble.
const BOOST_ROUNDS: usize = 30;
/// Learning rate applied to each stump's contribution.
const BOOST_LEARNING_RATE: f64 = 0.5;
/// Trees in the randomized forest.
const FOREST_TREES: usize = 15;
/// Synthetic threat prevalence, matching observed insider-incident rates.
const SYNTHETIC_THREAT_RATIO: f64 = 0.05;

/// One labeled training row: window features plus a threat label.
#[derive(Debug, Clone)]
pub struct TrainingRow {
    pub features: [f64; ITS_FEATURE_COUNT],
    pub label: f64,
}

/// Quality and provenance of one training cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub trained_at: DateTime<Utc>,
    pub training_rows: usize,
    pub threat_rows: usize,
    pub synthetic: bool,
    /// Mean squared error of the boosted ensemble on its training rows.
    pub boosted_mse: f64,
    /// Mean squared error of the forest on its training rows.
    pub forest_mse: f64,
}

/// The serialized output of one training cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub detector: DetectorModels,
    pub its: ItsModels,
    pub metrics: TrainingMetrics,
}

impl ModelArtifact {
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| sentinel_core::Error::internal(format!("reading model artifact: {e}")))?;
        let artifact: ModelArtifact = serde_json::from_str(&raw)?;
        Ok(Some(artifact))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| sentinel_core::Error::internal(format!("creating model directory: {e}")))?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)
            .map_err(|e| sentinel_core::Error::internal(format!("writing model artifact: {e}")))?;
        Ok(())
    }
}

pub struct TrainingPipeline {
    repository: Arc<dyn Repository>,
    history_days: i64,
    synthetic_samples: usize,
}

impl TrainingPipeline {
    pub fn new(repository: Arc<dyn Repository>, history_days: i64, synthetic_samples: usize) -> Self {
        Self {
            repository,
            history_days,
            synthetic_samples,
        }
    }

    /// Run one complete training cycle and return the fitted artifact.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<ModelArtifact> {
        info!("Starting model training cycle");

        let mut rows = match self.fetch_training_rows(now).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Fetching training data failed, falling back to synthetic: {e}");
                Vec::new()
            }
        };

        let synthetic = rows.len() < MIN_TRAINING_ROWS;
        if synthetic {
            info!(
                real_rows = rows.len(),
                "Not enough labeled history, generating {} synthetic samples",
                self.synthetic_samples
            );
            rows = generate_synthetic_rows(self.synthetic_samples);
        }

        let threat_rows = rows.iter().filter(|r| r.label > 0.5).count();
        let boosted = fit_boosted_stumps(&rows);
        let forest = fit_forest(&rows);
        let outlier = fit_outlier(&rows);

        let boosted_mse = mean_squared_error(&rows, |x| boosted.score(x));
        let forest_mse = mean_squared_error(&rows, |x| forest.score(x));

        let detector = fit_detector_models();

        let artifact = ModelArtifact {
            detector,
            its: ItsModels {
                boosted,
                forest,
                outlier,
            },
            metrics: TrainingMetrics {
                trained_at: now,
                training_rows: rows.len(),
                threat_rows,
                synthetic,
                boosted_mse,
                forest_mse,
            },
        };

        info!(
            rows = artifact.metrics.training_rows,
            threats = artifact.metrics.threat_rows,
            synthetic = artifact.metrics.synthetic,
            boosted_mse = artifact.metrics.boosted_mse,
            forest_mse = artifact.metrics.forest_mse,
            "Training cycle completed"
        );
        Ok(artifact)
    }

    /// Per (user, day) window aggregates labeled by whether any alert fired
    /// for that user on that day.
    async fn fetch_training_rows(&self, now: DateTime<Utc>) -> Result<Vec<TrainingRow>> {
        let users = self.repository.list_users().await?;
        let mut rows = Vec::new();

        for user in &users {
            for offset in 0..self.history_days {
                let day = sentinel_core::utils::day_floor(now - Duration::days(offset));
                let end = day + Duration::days(1);
                let summary = self.repository.summarize_window(&user.user_id, day, end).await?;
                if summary.total_activities == 0 {
                    continue;
                }
                let alerts = self
                    .repository
                    .count_alerts_between(&user.user_id, day, end)
                    .await?;
                let features = ItsFeatures::from_summary(&user.role, &summary);
                rows.push(TrainingRow {
                    features: features.to_array(),
                    label: if alerts > 0 { 1.0 } else { 0.0 },
                });
            }
        }
        Ok(rows)
    }
}

/// Run training cycles forever, sleeping between cycles and checking the
/// shutdown signal between them.
pub async fn run_scheduler(
    pipeline: TrainingPipeline,
    interval_hours: u64,
    artifact_path: std::path::PathBuf,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        match pipeline.run_cycle(Utc::now()).await {
            Ok(artifact) => {
                if let Err(e) = artifact.save(&artifact_path) {
                    warn!("Could not persist model artifact: {e}");
                }
            }
            Err(e) => warn!("Training cycle failed: {e}"),
        }

        let sleep = tokio::time::sleep(std::time::Duration::from_secs(interval_hours * 3600));
        tokio::select! {
            _ = sleep => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Training scheduler shutting down");
                    return;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Fitting
// ---------------------------------------------------------------------------

/// Additive stump fitting on squared-loss residuals.
fn fit_boosted_stumps(rows: &[TrainingRow]) -> StumpEnsemble {
    let n = rows.len();
    let base = rows.iter().map(|r| r.label).sum::<f64>() / n.max(1) as f64;
    let mut residuals: Vec<f64> = rows.iter().map(|r| r.label - base).collect();
    let mut stumps = Vec::with_capacity(BOOST_ROUNDS);

    for _ in 0..BOOST_ROUNDS {
        let mut best: Option<(usize, f64, f64, f64)> = None; // feature, threshold, delta, sse
        for feature in 0..ITS_FEATURE_COUNT {
            for threshold in candidate_thresholds(rows, feature) {
                let (sum, count) = rows.iter().zip(residuals.iter()).fold(
                    (0.0, 0usize),
                    |(sum, count), (row, r)| {
                        if row.features[feature] >= threshold {
                            (sum + r, count + 1)
                        } else {
                            (sum, count)
                        }
                    },
                );
                if count == 0 || count == n {
                    continue;
                }
                let delta = BOOST_LEARNING_RATE * sum / count as f64;
                let sse: f64 = rows
                    .iter()
                    .zip(residuals.iter())
                    .map(|(row, r)| {
                        let fitted = if row.features[feature] >= threshold { delta } else { 0.0 };
                        (r - fitted).powi(2)
                    })
                    .sum();
                if best.map(|(_, _, _, best_sse)| sse < best_sse).unwrap_or(true) {
                    best = Some((feature, threshold, delta, sse));
                }
            }
        }

        let Some((feature, threshold, delta, _)) = best else { break };
        if delta.abs() < 1e-4 {
            break;
        }
        for (row, r) in rows.iter().zip(residuals.iter_mut()) {
            if row.features[feature] >= threshold {
                *r -= delta;
            }
        }
        stumps.push(Stump {
            feature,
            threshold,
            delta,
        });
    }

    StumpEnsemble { base, stumps }
}

/// Bootstrap-sampled randomized stumps averaged into a forest.
fn fit_forest(rows: &[TrainingRow]) -> ForestModel {
    let mut rng = StdRng::seed_from_u64(42);
    let n = rows.len();
    let mut trees = Vec::with_capacity(FOREST_TREES);

    for _ in 0..FOREST_TREES {
        let sample: Vec<&TrainingRow> = (0..n).map(|_| &rows[rng.gen_range(0..n)]).collect();
        let feature = rng.gen_range(0..ITS_FEATURE_COUNT);
        let pivot = sample[rng.gen_range(0..n)].features[feature];

        let (mut low_sum, mut low_n, mut high_sum, mut high_n) = (0.0, 0usize, 0.0, 0usize);
        for row in &sample {
            if row.features[feature] >= pivot {
                high_sum += row.label;
                high_n += 1;
            } else {
                low_sum += row.label;
                low_n += 1;
            }
        }
        if low_n == 0 || high_n == 0 {
            continue;
        }
        trees.push(ForestTree {
            feature,
            threshold: pivot,
            low: low_sum / low_n as f64,
            high: high_sum / high_n as f64,
        });
    }

    if trees.is_empty() {
        // Degenerate sample; fall back to the seeded defaults.
        return ItsModels::default().forest;
    }
    ForestModel { trees }
}

/// Population moments of the normal rows for the unsupervised member.
fn fit_outlier(rows: &[TrainingRow]) -> ItsOutlier {
    let defaults = ItsModels::default().outlier;
    let normal: Vec<&TrainingRow> = rows.iter().filter(|r| r.label < 0.5).collect();
    if normal.is_empty() {
        return defaults;
    }

    let n = normal.len() as f64;
    let mut means = [0.0; ITS_FEATURE_COUNT];
    let mut stds = [1.0; ITS_FEATURE_COUNT];
    for i in 0..ITS_FEATURE_COUNT {
        let mean = normal.iter().map(|r| r.features[i]).sum::<f64>() / n;
        let var = normal.iter().map(|r| (r.features[i] - mean).powi(2)).sum::<f64>() / n;
        means[i] = mean;
        stds[i] = var.sqrt().max(1e-3);
    }
    ItsOutlier {
        means,
        stds,
        weights: defaults.weights,
    }
}

/// Refit the per-event scorer stack from synthetic event-level vectors:
/// a scaler with realistic spreads and a linear regressor, with the
/// unsupervised member kept at its serving configuration.
fn fit_detector_models() -> DetectorModels {
    let mut rng = StdRng::seed_from_u64(7);
    let mut rows: Vec<([f64; FEATURE_COUNT], f64)> = Vec::with_capacity(2000);

    for _ in 0..2000 {
        let is_threat = rng.gen::<f64>() < 0.15;
        let mut x = [0.0; FEATURE_COUNT];
        if is_threat {
            x[0] = exponential(&mut rng, 80.0); // file_size_mb
            x[1] = poisson(&mut rng, 12.0); // file_count
            x[2] = poisson(&mut rng, 6.0); // sensitive_file_count
            x[3] = poisson(&mut rng, 4.0); // delete_count
            x[4] = exponential(&mut rng, 120.0); // data_transfer_mb
            x[5] = poisson(&mut rng, 4.0); // external_connections
            x[6] = exponential(&mut rng, 60.0); // email_attachment_mb
            x[7] = poisson(&mut rng, 3.0); // external_emails
            x[8] = 0.5 + 0.5 * rng.gen::<f64>(); // off_hours_score
            x[9] = if rng.gen::<f64>() < 0.4 { 1.0 } else { 0.0 };
            x[10] = rng.gen::<f64>(); // rapid_activity_score
            x[11] = rng.gen::<f64>(); // pattern_deviation_score
            x[12] = if rng.gen::<f64>() < 0.5 { 0.6 } else { 0.0 };
        } else {
            x[0] = exponential(&mut rng, 5.0);
            x[1] = poisson(&mut rng, 3.0);
            x[2] = poisson(&mut rng, 0.3);
            x[3] = poisson(&mut rng, 0.2);
            x[4] = exponential(&mut rng, 8.0);
            x[5] = poisson(&mut rng, 0.5);
            x[6] = exponential(&mut rng, 2.0);
            x[7] = poisson(&mut rng, 0.5);
            x[8] = if rng.gen::<f64>() < 0.1 { 0.3 } else { 0.0 };
            x[9] = 0.0;
            x[10] = 0.3 * rng.gen::<f64>();
            x[11] = 0.3 * rng.gen::<f64>();
            x[12] = 0.0;
        }
        rows.push((x, if is_threat { 1.0 } else { 0.0 }));
    }

    let features: Vec<[f64; FEATURE_COUNT]> = rows.iter().map(|(x, _)| *x).collect();
    let scaler = FeatureScaler::fit(&features);

    // Gradient descent on squared loss over the scaled vectors.
    let scaled: Vec<([f64; FEATURE_COUNT], f64)> = rows
        .iter()
        .map(|(x, y)| {
            let fv = crate::detector::FeatureVector {
                file_size_mb: x[0],
                file_count: x[1],
                sensitive_file_count: x[2],
                delete_count: x[3],
                data_transfer_mb: x[4],
                external_connections: x[5],
                email_attachment_mb: x[6],
                external_emails: x[7],
                off_hours_score: x[8],
                process_suspicious_score: x[9],
                rapid_activity_score: x[10],
                pattern_deviation_score: x[11],
                temporal_anomaly_score: x[12],
            };
            (scaler.transform(&fv), *y)
        })
        .collect();

    let mut weights = [0.0; FEATURE_COUNT];
    let mut bias = 0.0;
    let lr = 0.05;
    for _ in 0..300 {
        let mut grad_w = [0.0; FEATURE_COUNT];
        let mut grad_b = 0.0;
        for (x, y) in &scaled {
            let pred: f64 = bias + weights.iter().zip(x.iter()).map(|(w, z)| w * z).sum::<f64>();
            let err = pred - y;
            grad_b += err;
            for i in 0..FEATURE_COUNT {
                grad_w[i] += err * x[i];
            }
        }
        let n = scaled.len() as f64;
        bias -= lr * grad_b / n;
        for i in 0..FEATURE_COUNT {
            weights[i] -= lr * grad_w[i] / n;
        }
    }

    DetectorModels {
        scaler,
        regressor: Some(LinearModel { weights, bias }),
        ..Default::default()
    }
}

fn mean_squared_error<F: Fn(&[f64; ITS_FEATURE_COUNT]) -> f64>(rows: &[TrainingRow], f: F) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    rows.iter()
        .map(|r| (f(&r.features) - r.label).powi(2))
        .sum::<f64>()
        / rows.len() as f64
}

fn candidate_thresholds(rows: &[TrainingRow], feature: usize) -> Vec<f64> {
    let mut values: Vec<f64> = rows.iter().map(|r| r.features[feature]).collect();
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    values.dedup();
    if values.len() <= 8 {
        return values;
    }
    // Deciles keep the search cheap on large histories.
    (1..=8)
        .map(|i| values[i * (values.len() - 1) / 9])
        .collect()
}

// ---------------------------------------------------------------------------
// Synthetic data
// ---------------------------------------------------------------------------

/// Deterministic synthetic (user, day) rows with the traffic shape of the
/// production feed: a small threat class working odd hours with heavy
/// sensitive access and exfiltration-sized transfers.
pub fn generate_synthetic_rows(samples: usize) -> Vec<TrainingRow> {
    let mut rng = StdRng::seed_from_u64(42);
    let roles = ["Developer", "HR", "Finance", "Manager", "Sales"];
    let mut rows = Vec::with_capacity(samples);

    for _ in 0..samples {
        let is_threat = rng.gen::<f64>() < SYNTHETIC_THREAT_RATIO;
        let role = roles[rng.gen_range(0..roles.len())];

        let (logon_hour, logon_count, geo, files, sensitive, downloaded, emails, external, large_att, keywords) =
            if is_threat {
                (
                    [2.0, 3.0, 22.0, 23.0][rng.gen_range(0..4)],
                    poisson(&mut rng, 8.0),
                    if rng.gen::<f64>() > 0.4 { 1.0 } else { 0.0 },
                    poisson(&mut rng, 100.0),
                    poisson(&mut rng, 15.0),
                    exponential(&mut rng, 500.0),
                    poisson(&mut rng, 60.0),
                    poisson(&mut rng, 20.0),
                    poisson(&mut rng, 5.0),
                    poisson(&mut rng, 3.0),
                )
            } else {
                (
                    (9.0 + 2.0 * gaussian(&mut rng)).clamp(0.0, 23.0),
                    poisson(&mut rng, 3.0).max(1.0),
                    if rng.gen::<f64>() > 0.95 { 1.0 } else { 0.0 },
                    poisson(&mut rng, 40.0).max(1.0),
                    poisson(&mut rng, 2.0),
                    exponential(&mut rng, 50.0),
                    poisson(&mut rng, 25.0),
                    poisson(&mut rng, 5.0),
                    poisson(&mut rng, 1.0),
                    if rng.gen::<f64>() > 0.9 { 1.0 } else { 0.0 },
                )
            };

        let features = ItsFeatures {
            role_encoded: crate::its::encode_role(role),
            mean_logon_hour: logon_hour,
            logon_count,
            geo_anomaly: geo,
            file_accesses: files,
            sensitive_file_access: sensitive,
            file_download_size_mb: downloaded,
            emails_sent: emails,
            external_emails: external.min(emails),
            large_attachments: large_att,
            suspicious_keywords: keywords,
            off_hours: if sentinel_core::utils::is_off_hours(logon_hour.round() as u32 % 24) {
                1.0
            } else {
                0.0
            },
            file_to_email_ratio: files / (emails + 1.0),
            external_email_ratio: external.min(emails) / (emails + 1.0),
            sensitive_access_rate: sensitive / (files + 1.0),
        };

        rows.push(TrainingRow {
            features: features.to_array(),
            label: if is_threat { 1.0 } else { 0.0 },
        });
    }
    rows
}

fn poisson(rng: &mut StdRng, lambda: f64) -> f64 {
    // Knuth's method is fine at these rates.
    let l = (-lambda).exp();
    let mut k = 0u32;
    let mut p = 1.0;
    loop {
        p *= rng.gen::<f64>();
        if p <= l {
            return k as f64;
        }
        k += 1;
        if k > 10_000 {
            return lambda;
        }
    }
}

fn exponential(rng: &mut StdRng, mean: f64) -> f64 {
    let u: f64 = rng.gen::<f64>().max(1e-12);
    -u.ln() * mean
}

fn gaussian(rng: &mut StdRng) -> f64 {
    // Box-Muller.
    let u1: f64 = rng.gen::<f64>().max(1e-12);
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_rows_have_expected_shape() {
        let rows = generate_synthetic_rows(1000);
        assert_eq!(rows.len(), 1000);
        let threats = rows.iter().filter(|r| r.label > 0.5).count();
        // Around the 5% prevalence, generously bounded.
        assert!((10..=150).contains(&threats), "got {threats}");
    }

    #[test]
    fn synthetic_generation_is_deterministic() {
        let a = generate_synthetic_rows(100);
        let b = generate_synthetic_rows(100);
        for (ra, rb) in a.iter().zip(b.iter()) {
            assert_eq!(ra.features, rb.features);
            assert_eq!(ra.label, rb.label);
        }
    }

    #[test]
    fn boosted_stumps_separate_the_classes() {
        let rows = generate_synthetic_rows(2000);
        let model = fit_boosted_stumps(&rows);
        assert!(!model.stumps.is_empty());

        let mean_threat: f64 = rows
            .iter()
            .filter(|r| r.label > 0.5)
            .map(|r| model.score(&r.features))
            .sum::<f64>()
            / rows.iter().filter(|r| r.label > 0.5).count() as f64;
        let mean_normal: f64 = rows
            .iter()
            .filter(|r| r.label < 0.5)
            .map(|r| model.score(&r.features))
            .sum::<f64>()
            / rows.iter().filter(|r| r.label < 0.5).count() as f64;
        assert!(
            mean_threat > mean_normal + 0.2,
            "threat {mean_threat:.3} vs normal {mean_normal:.3}"
        );
    }

    #[test]
    fn forest_fits_and_scores_in_range() {
        let rows = generate_synthetic_rows(1000);
        let model = fit_forest(&rows);
        for row in rows.iter().take(50) {
            let score = model.score(&row.features);
            assert!((0.0..=1.0).contains(&score));
        }
    }

    #[test]
    fn detector_regressor_ranks_threat_vectors_higher() {
        let models = fit_detector_models();
        let regressor = models.regressor.as_ref().expect("regressor fitted");

        let threatish = crate::detector::FeatureVector {
            file_size_mb: 120.0,
            sensitive_file_count: 8.0,
            delete_count: 5.0,
            data_transfer_mb: 200.0,
            off_hours_score: 0.9,
            process_suspicious_score: 1.0,
            ..Default::default()
        };
        let quiet = crate::detector::FeatureVector::default();
        let high = regressor.score(&models.scaler.transform(&threatish));
        let low = regressor.score(&models.scaler.transform(&quiet));
        assert!(high > low, "high {high:.3} low {low:.3}");
    }

    #[tokio::test]
    async fn cycle_falls_back_to_synthetic_on_empty_store() {
        let repo = std::sync::Arc::new(crate::repository::memory::MemoryRepository::new());
        let pipeline = TrainingPipeline::new(repo, 90, 500);
        let artifact = pipeline.run_cycle(Utc::now()).await.unwrap();
        assert!(artifact.metrics.synthetic);
        assert_eq!(artifact.metrics.training_rows, 500);
        assert!(artifact.detector.regressor.is_some());
    }
}
