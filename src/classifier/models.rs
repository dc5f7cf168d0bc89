//! The individual voters of the ensemble.

use super::vectorizer::SparseVector;

/// Everything a model may look at for one message.
#[derive(Debug, Clone)]
pub struct Features {
    pub vector: SparseVector,
    /// Output of `text::normalize`
    pub normalized: String,
    /// Length of the raw message in characters
    pub length: usize,
}

pub trait SpamModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Probability in `[0, 1]` that the message is spam.
    fn spam_probability(&self, features: &Features) -> f64;

    /// False for rule-based voters that are never fitted.
    fn is_trained(&self) -> bool {
        true
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// `P(spam)` from two class log-likelihoods.
fn posterior(log_spam: f64, log_ham: f64) -> f64 {
    let max = log_spam.max(log_ham);
    let spam = (log_spam - max).exp();
    let ham = (log_ham - max).exp();
    spam / (spam + ham)
}

fn class_log_priors(labels: &[bool]) -> (f64, f64) {
    let n = labels.len().max(1) as f64;
    let spam = labels.iter().filter(|&&l| l).count() as f64;
    let ham = labels.len() as f64 - spam;
    // Laplace smoothing keeps single-class corpora finite
    (((spam + 1.0) / (n + 2.0)).ln(), ((ham + 1.0) / (n + 2.0)).ln())
}

// ============================================================================
// MULTINOMIAL NAIVE BAYES
// ============================================================================

#[derive(Debug, Clone)]
pub struct MultinomialNb {
    log_prior: (f64, f64),
    /// `[spam, ham]` per-feature log probabilities
    feature_log_prob: [Vec<f64>; 2],
}

impl MultinomialNb {
    pub fn fit(vectors: &[SparseVector], labels: &[bool], n_features: usize, alpha: f64) -> Self {
        let mut counts = [vec![0.0; n_features], vec![0.0; n_features]];
        for (vector, &is_spam) in vectors.iter().zip(labels) {
            let class = if is_spam { 0 } else { 1 };
            for &(idx, w) in &vector.entries {
                counts[class][idx] += w;
            }
        }

        let feature_log_prob = counts.map(|class_counts| {
            let total: f64 = class_counts.iter().sum::<f64>() + alpha * n_features as f64;
            class_counts.iter().map(|c| ((c + alpha) / total).ln()).collect()
        });

        Self {
            log_prior: class_log_priors(labels),
            feature_log_prob,
        }
    }

    /// `log P(term | spam) - log P(term | ham)` for every feature.
    pub fn log_ratios(&self) -> Vec<f64> {
        self.feature_log_prob[0]
            .iter()
            .zip(&self.feature_log_prob[1])
            .map(|(s, h)| s - h)
            .collect()
    }
}

impl SpamModel for MultinomialNb {
    fn name(&self) -> &'static str {
        "MultinomialNB"
    }

    fn spam_probability(&self, features: &Features) -> f64 {
        let log_spam = self.log_prior.0 + features.vector.dot(&self.feature_log_prob[0]);
        let log_ham = self.log_prior.1 + features.vector.dot(&self.feature_log_prob[1]);
        posterior(log_spam, log_ham)
    }
}

// ============================================================================
// BERNOULLI NAIVE BAYES
// ============================================================================

#[derive(Debug, Clone)]
pub struct BernoulliNb {
    log_prior: (f64, f64),
    /// `log p - log(1 - p)` per class and feature
    present_delta: [Vec<f64>; 2],
    /// `Σ log(1 - p)` per class
    absent_sum: [f64; 2],
}

impl BernoulliNb {
    pub fn fit(vectors: &[SparseVector], labels: &[bool], n_features: usize, alpha: f64) -> Self {
        let mut doc_counts = [vec![0.0; n_features], vec![0.0; n_features]];
        let mut class_sizes = [0.0f64; 2];
        for (vector, &is_spam) in vectors.iter().zip(labels) {
            let class = if is_spam { 0 } else { 1 };
            class_sizes[class] += 1.0;
            for &(idx, _) in &vector.entries {
                doc_counts[class][idx] += 1.0;
            }
        }

        let mut present_delta = [Vec::with_capacity(n_features), Vec::with_capacity(n_features)];
        let mut absent_sum = [0.0; 2];
        for class in 0..2 {
            for &count in &doc_counts[class] {
                let p = (count + alpha) / (class_sizes[class] + 2.0 * alpha);
                present_delta[class].push(p.ln() - (1.0 - p).ln());
                absent_sum[class] += (1.0 - p).ln();
            }
        }

        Self {
            log_prior: class_log_priors(labels),
            present_delta,
            absent_sum,
        }
    }
}

impl SpamModel for BernoulliNb {
    fn name(&self) -> &'static str {
        "BernoulliNB"
    }

    fn spam_probability(&self, features: &Features) -> f64 {
        let score = |class: usize, prior: f64| {
            prior
                + self.absent_sum[class]
                + features
                    .vector
                    .entries
                    .iter()
                    .map(|&(idx, _)| self.present_delta[class][idx])
                    .sum::<f64>()
        };
        posterior(score(0, self.log_prior.0), score(1, self.log_prior.1))
    }
}

// ============================================================================
// LOGISTIC REGRESSION
// ============================================================================

#[derive(Debug, Clone)]
pub struct LogisticRegression {
    weights: Vec<f64>,
    bias: f64,
}

impl LogisticRegression {
    const EPOCHS: usize = 300;
    const LEARNING_RATE: f64 = 2.0;
    const L2: f64 = 1e-4;

    /// Full-batch gradient descent; deterministic for a given corpus.
    pub fn fit(vectors: &[SparseVector], labels: &[bool], n_features: usize) -> Self {
        let mut weights = vec![0.0; n_features];
        let mut bias = 0.0;
        let n = vectors.len().max(1) as f64;

        for _ in 0..Self::EPOCHS {
            let mut grad = vec![0.0; n_features];
            let mut grad_bias = 0.0;
            for (vector, &is_spam) in vectors.iter().zip(labels) {
                let target = if is_spam { 1.0 } else { 0.0 };
                let err = sigmoid(vector.dot(&weights) + bias) - target;
                for &(idx, w) in &vector.entries {
                    grad[idx] += err * w;
                }
                grad_bias += err;
            }
            for (w, g) in weights.iter_mut().zip(&grad) {
                *w -= Self::LEARNING_RATE * (g / n + Self::L2 * *w);
            }
            bias -= Self::LEARNING_RATE * grad_bias / n;
        }

        Self { weights, bias }
    }
}

impl SpamModel for LogisticRegression {
    fn name(&self) -> &'static str {
        "LogisticRegression"
    }

    fn spam_probability(&self, features: &Features) -> f64 {
        sigmoid(features.vector.dot(&self.weights) + self.bias)
    }
}

// ============================================================================
// NEAREST CENTROID
// ============================================================================

#[derive(Debug, Clone)]
pub struct NearestCentroid {
    spam_centroid: Vec<f64>,
    ham_centroid: Vec<f64>,
}

impl NearestCentroid {
    const SCALE: f64 = 10.0;

    pub fn fit(vectors: &[SparseVector], labels: &[bool], n_features: usize) -> Self {
        let mut centroids = [vec![0.0; n_features], vec![0.0; n_features]];
        for (vector, &is_spam) in vectors.iter().zip(labels) {
            let class = if is_spam { 0 } else { 1 };
            for &(idx, w) in &vector.entries {
                centroids[class][idx] += w;
            }
        }
        for centroid in &mut centroids {
            let norm = centroid.iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm > 0.0 {
                centroid.iter_mut().for_each(|v| *v /= norm);
            }
        }
        let [spam_centroid, ham_centroid] = centroids;
        Self { spam_centroid, ham_centroid }
    }
}

impl SpamModel for NearestCentroid {
    fn name(&self) -> &'static str {
        "NearestCentroid"
    }

    fn spam_probability(&self, features: &Features) -> f64 {
        let spam = features.vector.dot(&self.spam_centroid);
        let ham = features.vector.dot(&self.ham_centroid);
        sigmoid(Self::SCALE * (spam - ham))
    }
}

// ============================================================================
// KEYWORD HEURISTIC
// ============================================================================

/// Written in `text::normalize` form so apostrophes match as spaces.
pub const SPAM_KEYWORDS: &[&str] = &[
    "free", "winner", "urgent", "limited time", "click now", "congratulations", "prize",
    "claim", "offer", "deal", "money", "cash", "credit", "loan", "debt", "guarantee",
    "call now", "act now", "don t miss", "exclusive", "bonus", "win", "won", "winning",
    "lottery", "jackpot", "reward",
];

/// Rule-based voter that needs no training data.
#[derive(Debug, Clone, Default)]
pub struct KeywordHeuristic;

impl KeywordHeuristic {
    pub fn hits(normalized: &str) -> Vec<&'static str> {
        let padded = format!(" {} ", normalized);
        SPAM_KEYWORDS
            .iter()
            .filter(|kw| padded.contains(&format!(" {} ", kw)))
            .copied()
            .collect()
    }
}

impl SpamModel for KeywordHeuristic {
    fn name(&self) -> &'static str {
        "KeywordHeuristic"
    }

    fn spam_probability(&self, features: &Features) -> f64 {
        let k = Self::hits(&features.normalized).len() as f64;
        let is_spam = k >= 2.0 || (k >= 1.0 && features.length < 50);
        if is_spam {
            (0.6 + 0.1 * k).min(0.95)
        } else {
            (0.4 - 0.1 * k).max(0.05)
        }
    }

    fn is_trained(&self) -> bool {
        false
    }
}
