//! Per-token explanations of an ensemble decision.
//!
//! Every method produces signed contributions per token: positive values push
//! towards spam, negative towards ham. Perturbation methods (LIME, SHAP) work
//! on a token mask and ask a scoring function for `P(spam)` of the reduced
//! message; the keyword method reads naive Bayes log ratios directly.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::ensemble::Label;
use super::text;
use super::vectorizer::TfidfVectorizer;

pub const DEFAULT_NUM_FEATURES: usize = 10;
pub const MAX_NUM_FEATURES: usize = 20;
pub const MAX_EXPLAINED_TOKENS: usize = 40;

pub const LIME_SAMPLES: usize = 500;
pub const SHAP_PERMUTATIONS: usize = 64;

const KERNEL_WIDTH: f64 = 0.25;
const RIDGE_LAMBDA: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Keyword,
    Lime,
    Shap,
    Combined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationFeature {
    pub feature: String,
    pub importance: f64,
    pub contribution: f64,
    pub direction: Label,
    pub present: bool,
    pub explanation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<Method>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<Method>>,
}

/// Signed contribution of one token, as produced by a single method.
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub token: String,
    pub value: f64,
}

pub fn clamp_num_features(requested: Option<i64>) -> usize {
    match requested {
        Some(n) => n.clamp(1, MAX_NUM_FEATURES as i64) as usize,
        None => DEFAULT_NUM_FEATURES,
    }
}

/// Stable 64-bit FNV-1a, used to seed the samplers from the message text.
pub fn message_seed(message: &str) -> u64 {
    message.bytes().fold(0xcbf2_9ce4_8422_2325u64, |hash, b| {
        (hash ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

/// The tokens an explanation is computed over: distinct tokens, capped at the
/// most frequent [`MAX_EXPLAINED_TOKENS`] (ties keep first-seen order).
pub fn explained_tokens(tokens: &[String]) -> Vec<String> {
    let distinct = text::distinct_tokens(tokens);
    if distinct.len() <= MAX_EXPLAINED_TOKENS {
        return distinct;
    }
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for token in tokens {
        *counts.entry(token.as_str()).or_insert(0) += 1;
    }
    let mut ranked: Vec<(usize, &String)> = distinct.iter().enumerate().collect();
    ranked.sort_by(|a, b| counts[b.1.as_str()].cmp(&counts[a.1.as_str()]).then(a.0.cmp(&b.0)));
    ranked.truncate(MAX_EXPLAINED_TOKENS);
    ranked.sort_by_key(|&(pos, _)| pos);
    ranked.into_iter().map(|(_, t)| t.clone()).collect()
}

/// Token stream with the masked-out explained tokens removed. Tokens outside
/// the explained set are always kept.
fn masked_stream(tokens: &[String], explained: &[String], keep: &[bool]) -> Vec<String> {
    let dropped: std::collections::HashSet<&str> = explained
        .iter()
        .zip(keep)
        .filter(|(_, &k)| !k)
        .map(|(t, _)| t.as_str())
        .collect();
    tokens
        .iter()
        .filter(|t| !dropped.contains(t.as_str()))
        .cloned()
        .collect()
}

// ============================================================================
// KEYWORD
// ============================================================================

pub fn keyword(
    explained: &[String],
    vectorizer: &TfidfVectorizer,
    log_ratios: &[f64],
) -> Vec<Contribution> {
    explained
        .iter()
        .filter_map(|token| {
            let idx = vectorizer.index_of(token)?;
            Some(Contribution {
                token: token.clone(),
                value: *log_ratios.get(idx)?,
            })
        })
        .collect()
}

// ============================================================================
// LIME
// ============================================================================

/// Local linear surrogate fitted on random token masks.
pub fn lime<F>(
    tokens: &[String],
    explained: &[String],
    score: F,
    samples: usize,
    seed: u64,
) -> Vec<Contribution>
where
    F: Fn(&[String]) -> f64,
{
    let d = explained.len();
    if d == 0 {
        return Vec::new();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let samples = samples.max(2);

    let mut masks: Vec<Vec<bool>> = Vec::with_capacity(samples);
    masks.push(vec![true; d]);
    for _ in 1..samples {
        let remove = rng.gen_range(1..=d);
        let mut order: Vec<usize> = (0..d).collect();
        order.shuffle(&mut rng);
        let mut mask = vec![true; d];
        for &i in &order[..remove] {
            mask[i] = false;
        }
        masks.push(mask);
    }

    let targets: Vec<f64> = masks
        .iter()
        .map(|mask| score(&masked_stream(tokens, explained, mask)))
        .collect();
    let weights: Vec<f64> = masks
        .iter()
        .map(|mask| {
            let kept = mask.iter().filter(|&&k| k).count() as f64;
            let distance = 1.0 - (kept / d as f64).sqrt();
            (-(distance * distance) / (KERNEL_WIDTH * KERNEL_WIDTH)).exp().sqrt()
        })
        .collect();

    // Normal equations with an intercept in column 0, unpenalised
    let dim = d + 1;
    let mut a = vec![vec![0.0; dim]; dim];
    let mut b = vec![0.0; dim];
    for ((mask, &y), &w) in masks.iter().zip(&targets).zip(&weights) {
        let x: Vec<f64> = std::iter::once(1.0)
            .chain(mask.iter().map(|&k| if k { 1.0 } else { 0.0 }))
            .collect();
        for i in 0..dim {
            if x[i] == 0.0 {
                continue;
            }
            b[i] += w * x[i] * y;
            for j in 0..dim {
                a[i][j] += w * x[i] * x[j];
            }
        }
    }
    for (i, row) in a.iter_mut().enumerate().skip(1) {
        row[i] += RIDGE_LAMBDA;
    }

    let coefficients = solve(a, b).unwrap_or_else(|| vec![0.0; dim]);
    explained
        .iter()
        .zip(coefficients.into_iter().skip(1))
        .map(|(token, value)| Contribution {
            token: token.clone(),
            value,
        })
        .collect()
}

/// Gaussian elimination with partial pivoting. `None` for singular systems.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}

// ============================================================================
// SHAP
// ============================================================================

/// Monte Carlo permutation estimate of Shapley values.
pub fn shap<F>(
    tokens: &[String],
    explained: &[String],
    score: F,
    permutations: usize,
    seed: u64,
) -> Vec<Contribution>
where
    F: Fn(&[String]) -> f64,
{
    let d = explained.len();
    if d == 0 {
        return Vec::new();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let permutations = permutations.max(1);
    let mut totals = vec![0.0; d];

    let empty = score(&masked_stream(tokens, explained, &vec![false; d]));
    let mut order: Vec<usize> = (0..d).collect();
    for _ in 0..permutations {
        order.shuffle(&mut rng);
        let mut mask = vec![false; d];
        let mut previous = empty;
        for &i in &order {
            mask[i] = true;
            let current = score(&masked_stream(tokens, explained, &mask));
            totals[i] += current - previous;
            previous = current;
        }
    }

    explained
        .iter()
        .zip(totals)
        .map(|(token, total)| Contribution {
            token: token.clone(),
            value: total / permutations as f64,
        })
        .collect()
}

// ============================================================================
// COMBINED + RANKING
// ============================================================================

/// Mean of max-abs normalised contributions across methods.
pub fn combine(per_method: &[(Method, Vec<Contribution>)]) -> Vec<(Contribution, Vec<Method>)> {
    let mut merged: Vec<(String, f64, Vec<Method>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (method, contributions) in per_method {
        let scale = contributions
            .iter()
            .map(|c| c.value.abs())
            .fold(0.0f64, f64::max);
        for c in contributions {
            let value = if scale > 0.0 { c.value / scale } else { 0.0 };
            let slot = *index.entry(c.token.clone()).or_insert_with(|| {
                merged.push((c.token.clone(), 0.0, Vec::new()));
                merged.len() - 1
            });
            merged[slot].1 += value;
            merged[slot].2.push(*method);
        }
    }

    merged
        .into_iter()
        .map(|(token, sum, methods)| {
            let value = sum / methods.len() as f64;
            (Contribution { token, value }, methods)
        })
        .collect()
}

/// Sort by |contribution| (ties alphabetical) and build the wire features.
pub fn rank(
    contributions: Vec<(Contribution, Option<Vec<Method>>)>,
    method: Method,
    message: &str,
    num_features: usize,
) -> Vec<ExplanationFeature> {
    let mut contributions = contributions;
    contributions.sort_by(|a, b| {
        b.0.value
            .abs()
            .total_cmp(&a.0.value.abs())
            .then_with(|| a.0.token.cmp(&b.0.token))
    });
    contributions.truncate(num_features);

    let normalized = format!(" {} ", text::normalize(message));
    contributions
        .into_iter()
        .map(|(c, methods)| ExplanationFeature {
            importance: c.value.abs(),
            direction: if c.value > 0.0 { Label::Spam } else { Label::Ham },
            present: normalized.contains(&format!(" {} ", c.token)),
            explanation: describe_feature(&c.token, message),
            method: Some(method),
            methods,
            contribution: c.value,
            feature: c.token,
        })
        .collect()
}

/// `"Spam indicators: a, b | Ham indicators: c"`; an empty side reads `none`.
pub fn summary(features: &[ExplanationFeature]) -> String {
    let side = |label: Label| {
        let names: Vec<&str> = features
            .iter()
            .filter(|f| f.direction == label)
            .map(|f| f.feature.as_str())
            .collect();
        if names.is_empty() {
            "none".to_string()
        } else {
            names.join(", ")
        }
    };
    format!(
        "Spam indicators: {} | Ham indicators: {}",
        side(Label::Spam),
        side(Label::Ham)
    )
}

// ============================================================================
// FEATURE DESCRIPTIONS
// ============================================================================

const SPAM_INDICATORS: &[(&str, &str)] = &[
    ("call", "Spam often includes unknown phone numbers to call back"),
    ("cash", "Cash-related terms are a red flag for scam content"),
    ("claim", "Asking you to claim something you never asked for is a common scam hook"),
    ("click", "Spam messages often push you to click on suspicious links"),
    ("congratulations", "Unexpected congratulations are used to make spam seem legitimate"),
    ("free", "The word 'free' is widely used in spam to grab attention"),
    ("limited", "Claims of 'limited' offers are typical of promotional spam"),
    ("money", "Mentions of money often point to financial scams"),
    ("now", "Words like 'now' create the false urgency typical of spam"),
    ("offer", "Unsolicited offers are a hallmark of spam"),
    ("prize", "Prize notifications are frequently used in scam messages"),
    ("reply", "Requests to reply are used to confirm that a number is active"),
    ("stop", "Opt-out instructions such as 'stop' usually come with bulk messages"),
    ("text", "Instructions to text back are common in SMS spam"),
    ("txt", "Instructions to text back are common in SMS spam"),
    ("urgent", "Creating urgency is a common manipulation technique in spam"),
    ("win", "Words like 'win' often appear in scams promising prizes"),
    ("winner", "Telling someone they are a 'winner' is a classic spam tactic"),
    ("won", "Telling someone they have won something is a classic spam tactic"),
];

const HAM_INDICATORS: &[(&str, &str)] = &[
    ("family", "Family-related content usually indicates a genuine message"),
    ("friend", "References to friends suggest personal communication"),
    ("help", "Genuine requests for help read differently from spam offers of help"),
    ("home", "Personal location references are common in real messages"),
    ("love", "Emotional expressions often appear in genuine personal messages"),
    ("meeting", "Words like 'meeting' suggest ordinary scheduling between people"),
    ("please", "Courteous language is typical of normal conversation"),
    ("sorry", "Apologies are common in real human communication"),
    ("thanks", "Polite expressions like 'thanks' are common in genuine messages"),
    ("time", "References to time often appear in real scheduling messages"),
    ("today", "Date references suggest real plans or appointments"),
    ("tomorrow", "Planning ahead indicates genuine communication"),
    ("work", "Work-related terms suggest legitimate communication"),
];

fn lookup(table: &[(&str, &'static str)], word: &str) -> Option<&'static str> {
    table.iter().find(|(w, _)| *w == word).map(|(_, s)| *s)
}

/// Human-readable sentence for a feature.
pub fn describe_feature(feature: &str, message: &str) -> String {
    let lower = feature.to_lowercase();

    if let Some(s) = lookup(SPAM_INDICATORS, &lower).or_else(|| lookup(HAM_INDICATORS, &lower)) {
        return s.to_string();
    }

    if lower.split_whitespace().count() > 1 {
        return format!("The phrase '{}' was identified as significant by the model", feature);
    }

    if lower.contains("http") || lower.contains("www") {
        return "Links in messages can indicate spam, especially when unsolicited".to_string();
    }

    let digits = lower.chars().filter(|c| c.is_ascii_digit()).count();
    if digits >= 3 {
        return "Phone numbers or short codes in messages may indicate spam".to_string();
    } else if digits > 0 {
        return "Numeric content was flagged as potentially suspicious".to_string();
    }

    if lower.chars().any(|c| matches!(c, '!' | '$' | '%' | '*' | '£')) {
        return "Symbols like '!' or '$' are often used to grab attention in spam".to_string();
    }

    if message.to_lowercase().contains(&lower) {
        format!(
            "The model identified '{}' as a significant indicator based on training data",
            feature
        )
    } else {
        format!("The absence or low frequency of '{}' influenced the prediction", feature)
    }
}
