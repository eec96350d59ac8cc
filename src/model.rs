//! Ridge linear regressor for the temperature horizons and its on-disk
//! artifacts (one JSON file per horizon).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use linfa_linalg::cholesky::SolveC;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::features::{assert_schema_compatible, build_feature_schema, FeatureError, FeatureRow, FeatureSchema};

const CV_SPLITS: usize = 5;
const MIN_STD: f64 = 1e-12;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("not enough training rows for +{horizon_h}h: have {have}, need {need}")]
    InsufficientData {
        horizon_h: u32,
        have: usize,
        need: usize,
    },
    #[error("training rows for +{horizon_h}h have no target value")]
    MissingTarget { horizon_h: u32 },
    #[error("normal equations could not be solved: {0}")]
    Singular(String),
    #[error("feature vector has {found} values, model expects {expected}")]
    FeatureLength { found: usize, expected: usize },
    #[error("artifact {path} is incompatible: {source}")]
    Incompatible {
        path: PathBuf,
        #[source]
        source: FeatureError,
    },
    #[error("artifact JSON error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait Regressor {
    fn predict(&self, features: &[f64]) -> Result<f64, ModelError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingConfig {
    pub ridge_lambda: f64,
    pub test_fraction: f64,
    pub min_rows: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            ridge_lambda: 1.0,
            test_fraction: 0.2,
            min_rows: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub model_name: String,
    pub horizon_h: u32,
    pub schema: FeatureSchema,
    pub intercept: f64,
    pub coefficients: Vec<f64>,
    pub feature_means: Vec<f64>,
    pub feature_scales: Vec<f64>,
}

impl Regressor for LinearModel {
    fn predict(&self, features: &[f64]) -> Result<f64, ModelError> {
        if features.len() != self.coefficients.len() {
            return Err(ModelError::FeatureLength {
                found: features.len(),
                expected: self.coefficients.len(),
            });
        }

        let z = (&ArrayView1::from(features) - &ArrayView1::from(&self.feature_means[..]))
            / &ArrayView1::from(&self.feature_scales[..]);
        Ok(self.intercept + z.dot(&ArrayView1::from(&self.coefficients[..])))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub model_name: String,
    pub horizon_h: u32,
    pub n_samples_total: usize,
    pub n_train: usize,
    pub n_test: usize,
    pub features: Vec<String>,
    pub cv_mae_mean: Option<f64>,
    pub cv_mae_std: Option<f64>,
    pub test_mae: f64,
}

pub fn model_name_for(horizon_h: u32) -> String {
    format!("linear_temp_{horizon_h}h_v1")
}

pub fn artifact_path(dir: &Path, horizon_h: u32) -> PathBuf {
    dir.join(format!("model_linear_temp_{horizon_h}h.json"))
}

pub fn metrics_path(dir: &Path, horizon_h: u32) -> PathBuf {
    dir.join(format!("metrics_linear_temp_{horizon_h}h.json"))
}

/// Fits ridge regression on standardized features. Rows are ordered by time
/// (then city) so the held-out tail is strictly later than the training part.
pub fn train_linear_model(
    rows: &[FeatureRow],
    horizon_h: u32,
    cfg: &TrainingConfig,
) -> Result<(LinearModel, TrainingMetrics), ModelError> {
    if rows.len() < cfg.min_rows.max(2) {
        return Err(ModelError::InsufficientData {
            horizon_h,
            have: rows.len(),
            need: cfg.min_rows.max(2),
        });
    }

    let mut ordered: Vec<&FeatureRow> = rows.iter().collect();
    ordered.sort_by(|a, b| (a.ts_utc, a.city_id).cmp(&(b.ts_utc, b.city_id)));
    let samples = ordered
        .iter()
        .map(|row| {
            row.target
                .map(|target| (row.values.as_slice(), target))
                .ok_or(ModelError::MissingTarget { horizon_h })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let (train, test) = chronological_split(&samples, cfg.test_fraction);
    let schema = build_feature_schema();

    let cv_maes = time_series_cv_maes(train, cfg.ridge_lambda);
    let (cv_mae_mean, cv_mae_std) = mean_and_std(&cv_maes);

    let model = fit(train, cfg.ridge_lambda, model_name_for(horizon_h), horizon_h, schema)?;
    let test_mae = mean_absolute_error(&model, test)?;

    let metrics = TrainingMetrics {
        model_name: model.model_name.clone(),
        horizon_h,
        n_samples_total: samples.len(),
        n_train: train.len(),
        n_test: test.len(),
        features: model.schema.columns.iter().map(|c| c.name.clone()).collect(),
        cv_mae_mean,
        cv_mae_std,
        test_mae,
    };

    info!(
        component = "model",
        event = "model.train.finish",
        model_name = %metrics.model_name,
        horizon_h,
        n_train = metrics.n_train,
        n_test = metrics.n_test,
        test_mae = metrics.test_mae,
        cv_mae_mean = ?metrics.cv_mae_mean
    );

    Ok((model, metrics))
}

pub fn save_artifact(
    dir: &Path,
    model: &LinearModel,
    metrics: &TrainingMetrics,
) -> Result<PathBuf, ModelError> {
    fs::create_dir_all(dir)?;
    let path = artifact_path(dir, model.horizon_h);
    write_json_atomic(&path, model)?;
    write_json_atomic(&metrics_path(dir, model.horizon_h), metrics)?;
    Ok(path)
}

/// Reads the artifact for a horizon. A missing file is `Ok(None)`; a file
/// trained on a different feature schema is `ModelError::Incompatible`.
pub fn load_artifact(dir: &Path, horizon_h: u32) -> Result<Option<LinearModel>, ModelError> {
    let path = artifact_path(dir, horizon_h);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let model: LinearModel = serde_json::from_slice(&bytes).map_err(|source| ModelError::Json {
        path: path.clone(),
        source,
    })?;
    assert_schema_compatible(&build_feature_schema(), &model.schema)
        .map_err(|source| ModelError::Incompatible { path: path.clone(), source })?;
    let width = model.schema.columns.len();
    if model.coefficients.len() != width
        || model.feature_means.len() != width
        || model.feature_scales.len() != width
    {
        return Err(ModelError::FeatureLength {
            found: model.coefficients.len(),
            expected: width,
        });
    }
    Ok(Some(model))
}

pub struct LoadedModel {
    pub model_name: String,
    pub regressor: Box<dyn Regressor>,
}

/// Where the materializer finds one trained model per horizon.
pub trait ArtifactSource {
    fn load(&self, horizon_h: u32) -> Result<Option<LoadedModel>, ModelError>;
}

#[derive(Debug, Clone)]
pub struct DirectoryArtifacts {
    pub dir: PathBuf,
}

impl DirectoryArtifacts {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ArtifactSource for DirectoryArtifacts {
    fn load(&self, horizon_h: u32) -> Result<Option<LoadedModel>, ModelError> {
        Ok(load_artifact(&self.dir, horizon_h)?.map(|model| LoadedModel {
            model_name: model.model_name.clone(),
            regressor: Box::new(model),
        }))
    }
}

fn chronological_split<T>(samples: &[T], test_fraction: f64) -> (&[T], &[T]) {
    let n = samples.len();
    let n_test = ((n as f64 * test_fraction).floor() as usize).clamp(1, n - 1);
    samples.split_at(n - n_test)
}

/// Expanding-window folds: fold k trains on everything before its
/// validation block.
fn time_series_cv_maes(train: &[(&[f64], f64)], lambda: f64) -> Vec<f64> {
    let fold_size = train.len() / (CV_SPLITS + 1);
    if fold_size == 0 {
        return Vec::new();
    }
    let first_train = train.len() - CV_SPLITS * fold_size;

    (0..CV_SPLITS)
        .filter_map(|k| {
            let train_end = first_train + k * fold_size;
            let (fold_train, rest) = train.split_at(train_end);
            let fold_val = &rest[..fold_size];
            let schema = build_feature_schema();
            let model = fit(fold_train, lambda, String::new(), 0, schema).ok()?;
            mean_absolute_error(&model, fold_val).ok()
        })
        .collect()
}

fn fit(
    samples: &[(&[f64], f64)],
    lambda: f64,
    model_name: String,
    horizon_h: u32,
    schema: FeatureSchema,
) -> Result<LinearModel, ModelError> {
    let width = schema.columns.len();
    if let Some((values, _)) = samples.iter().find(|(values, _)| values.len() != width) {
        return Err(ModelError::FeatureLength {
            found: values.len(),
            expected: width,
        });
    }
    if samples.is_empty() {
        return Err(ModelError::InsufficientData {
            horizon_h,
            have: 0,
            need: 2,
        });
    }

    let x = Array2::from_shape_fn((samples.len(), width), |(i, j)| samples[i].0[j]);
    let y: Array1<f64> = samples.iter().map(|(_, target)| *target).collect();

    let means = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(width));
    let scales = x
        .std_axis(Axis(0), 0.0)
        .mapv(|std| if std > MIN_STD { std } else { 1.0 });
    let y_mean = y.mean().unwrap_or(0.0);

    // (ZᵀZ + λI) β = Zᵀ(y - ȳ) on standardized features.
    let z = (&x - &means) / &scales;
    let gram = z.t().dot(&z) + Array2::<f64>::eye(width) * lambda;
    let rhs = z.t().dot(&(&y - y_mean)).insert_axis(Axis(1));

    let coefficients = solve_normal_equations(gram, &rhs)?;
    Ok(LinearModel {
        model_name,
        horizon_h,
        schema,
        intercept: y_mean,
        coefficients: coefficients.to_vec(),
        feature_means: means.to_vec(),
        feature_scales: scales.to_vec(),
    })
}

/// Cholesky solve; the ridge term keeps the system positive definite for
/// any `lambda > 0`.
fn solve_normal_equations(
    mut gram: Array2<f64>,
    rhs: &Array2<f64>,
) -> Result<Array1<f64>, ModelError> {
    let solution = gram
        .solvec(rhs)
        .map_err(|err| ModelError::Singular(err.to_string()))?;
    Ok(solution.column(0).to_owned())
}

fn mean_absolute_error(
    model: &LinearModel,
    samples: &[(&[f64], f64)],
) -> Result<f64, ModelError> {
    let errors = samples
        .iter()
        .map(|(values, target)| Ok((model.predict(values)? - target).abs()))
        .collect::<Result<Array1<f64>, ModelError>>()?;
    Ok(errors.mean().unwrap_or(0.0))
}

fn mean_and_std(values: &[f64]) -> (Option<f64>, Option<f64>) {
    let values = ArrayView1::from(values);
    match values.mean() {
        Some(mean) => (Some(mean), Some(values.std(0.0))),
        None => (None, None),
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ModelError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| ModelError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp_path = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}
