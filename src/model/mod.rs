//! Per-sensor anomaly model
//!
//! An [`AnomalyModel`] accumulates a bounded population of feature vectors and
//! keeps a calibrated [`IsolationForest`] fitted on it. The fitted model lives
//! behind a `watch` channel: retraining builds a new forest off to the side
//! and swaps the `Arc` in one step, so a [`ModelScorer`] that already holds the
//! previous model finishes with it undisturbed.
//!
//! ## Lifecycle
//!
//! ```text
//! untrained ──(population reaches min_samples)──▶ trained
//!    trained ──(every retrain_every observations)──▶ retrained
//! ```

mod forest;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::watch;
use tracing::{debug, instrument, trace};

pub use forest::{IsolationForest, average_path_length};

use crate::config::MonitorConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::features::FeatureVector;

// Lower bound on the calibration spread, keeps the logistic from saturating
const MIN_SPREAD: f64 = 0.02;

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub min_samples: usize,
    pub contamination: f64,
    pub n_trees: usize,
    pub max_population: usize,
    pub retrain_every: usize,
    pub seed: u64,
}

impl ModelSettings {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            min_samples: config.min_samples,
            contamination: config.contamination,
            n_trees: config.model.n_trees,
            max_population: config.model.max_population,
            retrain_every: config.model.retrain_every,
            seed: config.model.seed,
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

/// A forest together with its calibration
#[derive(Debug)]
pub struct FittedModel {
    forest: IsolationForest,
    threshold: f64,
    spread: f64,
    generation: u64,
    trained_on: usize,
}

impl FittedModel {
    fn fit(population: &[Vec<f64>], settings: &ModelSettings, generation: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(settings.seed.wrapping_add(generation));
        let forest = IsolationForest::fit(population, settings.n_trees, &mut rng);

        let mut raw: Vec<f64> = population.iter().map(|p| forest.raw_score(p)).collect();
        raw.sort_by(f64::total_cmp);

        let rank = ((1.0 - settings.contamination) * (raw.len() - 1) as f64).round() as usize;
        let threshold = raw[rank.min(raw.len() - 1)];

        let mean = raw.iter().sum::<f64>() / raw.len() as f64;
        let variance = raw.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / raw.len() as f64;

        Self {
            forest,
            threshold,
            spread: variance.sqrt().max(MIN_SPREAD),
            generation,
            trained_on: population.len(),
        }
    }

    /// Calibrated score in [0, 1]; the contamination quantile maps to 0.5
    pub fn score(&self, point: &[f64]) -> MonitorResult<f64> {
        if point.len() != self.forest.dimensions() {
            return Err(MonitorError::DimensionMismatch {
                expected: self.forest.dimensions(),
                actual: point.len(),
            });
        }

        let raw = self.forest.raw_score(point);
        Ok(1.0 / (1.0 + (-(raw - self.threshold) / self.spread).exp()))
    }

    pub fn raw_threshold(&self) -> f64 {
        self.threshold
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn trained_on(&self) -> usize {
        self.trained_on
    }
}

/// Read-only scoring view of an [`AnomalyModel`]
#[derive(Debug, Clone)]
pub struct ModelScorer {
    current: watch::Receiver<Option<Arc<FittedModel>>>,
    population: Arc<AtomicUsize>,
    min_samples: usize,
}

impl ModelScorer {
    pub fn score(&self, vector: &FeatureVector) -> MonitorResult<f64> {
        let population = self.population.load(Ordering::Acquire);
        let fitted = self.current.borrow().clone();

        match fitted {
            Some(model) => model.score(vector.as_slice()),
            None => Err(MonitorError::ModelNotTrained {
                population,
                required: self.min_samples,
            }),
        }
    }
}

#[derive(Debug)]
pub struct AnomalyModel {
    settings: ModelSettings,
    population: VecDeque<Vec<f64>>,
    dimensions: Option<usize>,
    since_fit: usize,
    generation: u64,
    fitted: watch::Sender<Option<Arc<FittedModel>>>,
    population_len: Arc<AtomicUsize>,
}

impl AnomalyModel {
    pub fn new(settings: ModelSettings) -> Self {
        let (fitted, _) = watch::channel(None);
        let capacity = settings.max_population.max(settings.min_samples);

        Self {
            settings: ModelSettings {
                max_population: capacity,
                ..settings
            },
            population: VecDeque::with_capacity(capacity),
            dimensions: None,
            since_fit: 0,
            generation: 0,
            fitted,
            population_len: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    pub fn population(&self) -> usize {
        self.population.len()
    }

    pub fn is_trained(&self) -> bool {
        self.fitted.borrow().is_some()
    }

    /// The model currently used for scoring
    pub fn current(&self) -> Option<Arc<FittedModel>> {
        self.fitted.borrow().clone()
    }

    pub fn scorer(&self) -> ModelScorer {
        ModelScorer {
            current: self.fitted.subscribe(),
            population: self.population_len.clone(),
            min_samples: self.settings.min_samples,
        }
    }

    /// Score a vector, failing with `ModelNotTrained` below `min_samples`
    pub fn score(&self, vector: &FeatureVector) -> MonitorResult<f64> {
        match self.current() {
            Some(model) => model.score(vector.as_slice()),
            None => Err(MonitorError::ModelNotTrained {
                population: self.population.len(),
                required: self.settings.min_samples,
            }),
        }
    }

    /// Whether the vector falls beyond the model's contamination quantile
    pub fn is_anomalous(&self, vector: &FeatureVector) -> MonitorResult<bool> {
        self.score(vector).map(|score| score > 0.5)
    }

    /// Add a vector to the training population
    ///
    /// Fits the first model as soon as the population reaches `min_samples`
    /// and refits after every `retrain_every` further observations.
    #[instrument(skip(self, vector), fields(population = self.population.len()))]
    pub fn observe(&mut self, vector: &FeatureVector) -> MonitorResult<()> {
        if vector.is_empty() {
            return Err(MonitorError::DimensionMismatch {
                expected: self.dimensions.unwrap_or_default(),
                actual: 0,
            });
        }

        let expected = *self.dimensions.get_or_insert(vector.len());
        if vector.len() != expected {
            return Err(MonitorError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }

        if self.population.len() == self.settings.max_population {
            self.population.pop_front();
        }
        self.population.push_back(vector.values.clone());
        self.population_len
            .store(self.population.len(), Ordering::Release);
        self.since_fit += 1;

        let due = if self.is_trained() {
            self.settings.retrain_every > 0 && self.since_fit >= self.settings.retrain_every
        } else {
            self.population.len() >= self.settings.min_samples
        };

        if due {
            self.retrain()?;
        } else {
            trace!("observation recorded");
        }

        Ok(())
    }

    /// Fit a new forest on the current population and swap it in
    pub fn retrain(&mut self) -> MonitorResult<()> {
        if self.population.is_empty() || self.population.len() < self.settings.min_samples {
            return Err(MonitorError::ModelNotTrained {
                population: self.population.len(),
                required: self.settings.min_samples,
            });
        }

        let population: Vec<Vec<f64>> = self.population.iter().cloned().collect();
        let model = FittedModel::fit(&population, &self.settings, self.generation);

        debug!(
            generation = self.generation,
            samples = population.len(),
            threshold = model.raw_threshold(),
            "model fitted"
        );

        self.generation += 1;
        self.since_fit = 0;
        self.fitted.send_replace(Some(Arc::new(model)));

        Ok(())
    }
}
