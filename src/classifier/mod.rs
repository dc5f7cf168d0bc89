//! Spam classification engine.
//!
//! A [`Detector`] is trained once from a [`Dataset`] and is immutable
//! afterwards, so it can be shared behind an `Arc` and read concurrently.

pub mod dataset;
pub mod ensemble;
pub mod explain;
pub mod metrics;
pub mod models;
pub mod text;
pub mod vectorizer;

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dataset::Dataset;
use ensemble::{EnsembleOutcome, Label, ModelVote};
use explain::{Contribution, ExplanationFeature, Method};
use metrics::{ConfusionMatrix, ModelMetrics};
use models::{
    BernoulliNb, Features, KeywordHeuristic, LogisticRegression, MultinomialNb, NearestCentroid,
    SpamModel,
};
use vectorizer::TfidfVectorizer;

pub const ENSEMBLE_NAME: &str = "Ensemble";
pub const MODEL_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DEFAULT_MAX_FEATURES: usize = 4000;

const TEST_RATIO: f64 = 0.2;
const NB_ALPHA: f64 = 1.0;
/// Features attached to every stored prediction.
const PREDICTION_TOP_FEATURES: usize = 5;

/// Outcome of classifying one message.
#[derive(Debug, Clone)]
pub struct Classification {
    pub outcome: EnsembleOutcome,
    pub feature_count: usize,
    pub processing_time_ms: u64,
    /// Keyword explanation of the decision
    pub top_features: Vec<ExplanationFeature>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplanationReport {
    pub method: Method,
    pub prediction: Label,
    pub spam_probability: f64,
    pub summary: String,
    pub top_features: Vec<ExplanationFeature>,
    pub methods_used: Vec<Method>,
    pub num_features: usize,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccuracySummary {
    pub training_accuracy: f64,
    pub validation_accuracy: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub model_loaded: bool,
    pub vectorizer_loaded: bool,
    pub model_name: &'static str,
    pub model_version: &'static str,
    pub models: Vec<&'static str>,
    pub feature_count: usize,
    pub training_samples: usize,
    pub validation_samples: usize,
    pub dataset_source: String,
    pub training_accuracy: f64,
    pub validation_accuracy: f64,
    pub explanation_methods: Vec<Method>,
    pub trained_at: DateTime<Utc>,
}

pub struct Detector {
    vectorizer: TfidfVectorizer,
    models: Vec<Box<dyn SpamModel>>,
    /// Validation accuracy per model, aligned with `models`
    weights: Vec<f64>,
    nb_log_ratios: Vec<f64>,
    metrics: BTreeMap<String, ModelMetrics>,
    accuracy: AccuracySummary,
    dataset_source: String,
    training_samples: usize,
    validation_samples: usize,
    trained_at: DateTime<Utc>,
}

impl std::fmt::Debug for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detector")
            .field("features", &self.vectorizer.len())
            .field("models", &self.model_names())
            .field("accuracy", &self.accuracy)
            .finish()
    }
}

impl Detector {
    /// Fit the vectorizer and every model on a stratified split of `dataset`.
    /// CPU bound; call from a blocking thread.
    pub fn train(dataset: &Dataset, max_features: usize) -> Self {
        let split = dataset.split(TEST_RATIO);
        let train_tokens: Vec<Vec<String>> =
            split.train.iter().map(|m| text::tokenize(&m.text)).collect();
        let train_labels: Vec<bool> = split.train.iter().map(|m| m.is_spam).collect();
        let test_labels: Vec<bool> = split.test.iter().map(|m| m.is_spam).collect();

        let vectorizer = TfidfVectorizer::fit(&train_tokens, max_features);
        let n = vectorizer.len();
        let train_vectors: Vec<_> = train_tokens
            .iter()
            .map(|t| vectorizer.transform_tokens(t))
            .collect();

        let nb = MultinomialNb::fit(&train_vectors, &train_labels, n, NB_ALPHA);
        let nb_log_ratios = nb.log_ratios();
        let models: Vec<Box<dyn SpamModel>> = vec![
            Box::new(nb),
            Box::new(BernoulliNb::fit(&train_vectors, &train_labels, n, NB_ALPHA)),
            Box::new(LogisticRegression::fit(&train_vectors, &train_labels, n)),
            Box::new(NearestCentroid::fit(&train_vectors, &train_labels, n)),
            Box::new(KeywordHeuristic),
        ];

        let train_features: Vec<Features> = split
            .train
            .iter()
            .map(|m| features_of(&vectorizer, &m.text))
            .collect();
        let test_features: Vec<Features> = split
            .test
            .iter()
            .map(|m| features_of(&vectorizer, &m.text))
            .collect();

        let mut metrics = BTreeMap::new();
        let mut weights = Vec::with_capacity(models.len());
        for model in &models {
            let predict = |rows: &[Features]| -> Vec<bool> {
                rows.iter()
                    .map(|f| model.spam_probability(f) > 0.5)
                    .collect()
            };
            let validation =
                ConfusionMatrix::from_predictions(&predict(&test_features), &test_labels);
            let training =
                ConfusionMatrix::from_predictions(&predict(&train_features), &train_labels);
            let m = ModelMetrics::new(&validation, &training);
            tracing::debug!(
                model = model.name(),
                accuracy = m.accuracy,
                f1 = m.f1,
                "Model evaluated"
            );
            weights.push(if test_labels.is_empty() { 1.0 } else { validation.accuracy() });
            metrics.insert(model.name().to_string(), m);
        }

        let mut detector = Self {
            vectorizer,
            models,
            weights,
            nb_log_ratios,
            metrics,
            accuracy: AccuracySummary {
                training_accuracy: 0.0,
                validation_accuracy: 0.0,
            },
            dataset_source: dataset.source.clone(),
            training_samples: split.train.len(),
            validation_samples: split.test.len(),
            trained_at: Utc::now(),
        };

        let majority_accuracy = |rows: &[Features], labels: &[bool]| {
            let predicted: Vec<bool> = rows
                .iter()
                .map(|f| detector.vote(f).majority == Label::Spam)
                .collect();
            metrics::round4(ConfusionMatrix::from_predictions(&predicted, labels).accuracy())
        };
        let accuracy = AccuracySummary {
            training_accuracy: majority_accuracy(&train_features, &train_labels),
            validation_accuracy: majority_accuracy(&test_features, &test_labels),
        };
        detector.accuracy = accuracy;

        tracing::info!(
            source = %detector.dataset_source,
            features = detector.vectorizer.len(),
            train = detector.training_samples,
            test = detector.validation_samples,
            validation_accuracy = accuracy.validation_accuracy,
            "Ensemble trained"
        );
        detector
    }

    pub fn model_names(&self) -> Vec<&'static str> {
        self.models.iter().map(|m| m.name()).collect()
    }

    pub fn metrics(&self) -> &BTreeMap<String, ModelMetrics> {
        &self.metrics
    }

    pub fn accuracy(&self) -> AccuracySummary {
        self.accuracy
    }

    pub fn feature_count(&self) -> usize {
        self.vectorizer.len()
    }

    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            model_loaded: self.models.iter().any(|m| m.is_trained()),
            vectorizer_loaded: !self.vectorizer.is_empty(),
            model_name: ENSEMBLE_NAME,
            model_version: MODEL_VERSION,
            models: self.model_names(),
            feature_count: self.vectorizer.len(),
            training_samples: self.training_samples,
            validation_samples: self.validation_samples,
            dataset_source: self.dataset_source.clone(),
            training_accuracy: self.accuracy.training_accuracy,
            validation_accuracy: self.accuracy.validation_accuracy,
            explanation_methods: vec![Method::Keyword, Method::Lime, Method::Shap, Method::Combined],
            trained_at: self.trained_at,
        }
    }

    fn vote(&self, features: &Features) -> EnsembleOutcome {
        let votes = self
            .models
            .iter()
            .zip(&self.weights)
            .map(|(model, &weight)| ModelVote {
                model: model.name().to_string(),
                spam_probability: model.spam_probability(features).clamp(0.0, 1.0),
                weight,
            })
            .collect();
        ensemble::combine(votes)
    }

    /// Ensemble weighted `P(spam)` of an already tokenized message.
    fn score_tokens(&self, tokens: &[String]) -> f64 {
        let normalized = tokens.join(" ");
        let features = Features {
            vector: self.vectorizer.transform_tokens(tokens),
            length: normalized.chars().count(),
            normalized,
        };
        self.vote(&features).weighted_spam_probability
    }

    pub fn classify(&self, message: &str) -> Classification {
        let started = Instant::now();
        let features = features_of(&self.vectorizer, message);
        let outcome = self.vote(&features);

        let tokens = text::tokenize(message);
        let explained = explain::explained_tokens(&tokens);
        let keyword = explain::keyword(&explained, &self.vectorizer, &self.nb_log_ratios);
        let top_features = explain::rank(
            keyword.into_iter().map(|c| (c, None)).collect(),
            Method::Keyword,
            message,
            PREDICTION_TOP_FEATURES,
        );

        Classification {
            feature_count: features.vector.entries.len(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            outcome,
            top_features,
        }
    }

    /// Explain the ensemble decision with one method, or all of them merged
    /// when `method` is [`Method::Combined`].
    pub fn explain(&self, message: &str, num_features: usize, method: Method) -> ExplanationReport {
        let started = Instant::now();
        let tokens = text::tokenize(message);
        let explained = explain::explained_tokens(&tokens);
        let seed = explain::message_seed(message);
        let score = |stream: &[String]| self.score_tokens(stream);

        let run = |m: Method| -> Vec<Contribution> {
            match m {
                Method::Keyword => {
                    explain::keyword(&explained, &self.vectorizer, &self.nb_log_ratios)
                }
                Method::Lime => {
                    explain::lime(&tokens, &explained, score, explain::LIME_SAMPLES, seed)
                }
                Method::Shap => {
                    explain::shap(&tokens, &explained, score, explain::SHAP_PERMUTATIONS, seed)
                }
                Method::Combined => Vec::new(),
            }
        };

        let (contributions, methods_used) = match method {
            Method::Combined => {
                let per_method: Vec<(Method, Vec<Contribution>)> =
                    [Method::Keyword, Method::Lime, Method::Shap]
                        .into_iter()
                        .map(|m| (m, run(m)))
                        .collect();
                let used = per_method
                    .iter()
                    .filter(|(_, c)| !c.is_empty())
                    .map(|(m, _)| *m)
                    .collect();
                let merged = explain::combine(&per_method)
                    .into_iter()
                    .map(|(c, methods)| (c, Some(methods)))
                    .collect();
                (merged, used)
            }
            single => (
                run(single).into_iter().map(|c| (c, None)).collect(),
                vec![single],
            ),
        };

        let top_features = explain::rank(contributions, method, message, num_features);
        let spam_probability = self.vote(&features_of(&self.vectorizer, message)).weighted_spam_probability;

        ExplanationReport {
            method,
            prediction: Label::from_probability(spam_probability),
            spam_probability,
            summary: explain::summary(&top_features),
            top_features,
            methods_used,
            num_features,
            processing_time_ms: started.elapsed().as_millis() as u64,
        }
    }
}

fn features_of(vectorizer: &TfidfVectorizer, message: &str) -> Features {
    Features {
        vector: vectorizer.transform(message),
        normalized: text::normalize(message),
        length: message.chars().count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    fn detector() -> &'static Detector {
        static DETECTOR: OnceLock<Detector> = OnceLock::new();
        DETECTOR.get_or_init(|| {
            let dataset = Dataset::seed().unwrap();
            Detector::train(&dataset, DEFAULT_MAX_FEATURES)
        })
    }

    #[test]
    fn test_training_reports_every_model() {
        let d = detector();
        assert_eq!(d.metrics().len(), 5);
        for name in ["MultinomialNB", "BernoulliNB", "LogisticRegression", "NearestCentroid", "KeywordHeuristic"] {
            let m = d.metrics().get(name).unwrap();
            assert!((0.0..=1.0).contains(&m.accuracy));
        }
        assert!(d.accuracy().validation_accuracy > 0.7);
        assert!(d.info().model_loaded);
    }

    #[test]
    fn test_classify_obvious_messages() {
        let d = detector();
        let spam = d.classify("WINNER!! You have won a FREE cash prize. Call now to claim your reward!");
        assert_eq!(spam.outcome.majority, Label::Spam);
        let ham = d.classify("Hey, are we still meeting for lunch tomorrow? Let me know");
        assert_eq!(ham.outcome.majority, Label::Ham);
    }

    #[test]
    fn test_consensus_invariants() {
        let d = detector();
        for message in ["", "ok", "Free entry! text WIN to 80082", "see you at home later"] {
            let c = d.classify(message).outcome.consensus;
            assert_eq!(c.spam_votes + c.ham_votes, c.total_votes);
            assert_eq!(c.total_votes, 5);
            assert!(c.majority_count <= c.total_votes);
            assert!(c.majority_count >= 3);
        }
    }

    #[test]
    fn test_classify_top_features_use_keyword_method() {
        let d = detector();
        let result = d.classify("Claim your free prize now");
        assert!(result.top_features.len() <= 5);
        assert!(result
            .top_features
            .iter()
            .all(|f| f.method == Some(Method::Keyword)));
    }

    #[test]
    fn test_explanations_are_deterministic_and_bounded() {
        let d = detector();
        let message = "URGENT! Your account will be suspended, click the link to verify now";
        let a = d.explain(message, 4, Method::Combined);
        let b = d.explain(message, 4, Method::Combined);
        assert!(a.top_features.len() <= 4);
        assert_eq!(
            a.top_features.iter().map(|f| &f.feature).collect::<Vec<_>>(),
            b.top_features.iter().map(|f| &f.feature).collect::<Vec<_>>()
        );
        assert!(a.summary.starts_with("Spam indicators: "));
        assert!(a.top_features.iter().all(|f| f.methods.is_some()));
        assert!(a
            .top_features
            .windows(2)
            .all(|w| w[0].importance >= w[1].importance));
    }

    #[test]
    fn test_explain_each_method() {
        let d = detector();
        for method in [Method::Keyword, Method::Lime, Method::Shap] {
            let report = d.explain("free prize waiting, call now", 3, method);
            assert_eq!(report.methods_used, vec![method]);
            assert!(report.top_features.iter().all(|f| f.method == Some(method)));
        }
    }
}
