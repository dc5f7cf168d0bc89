//! TF-IDF vectorizer over unigrams and bigrams.

use std::collections::HashMap;

use super::text;

/// Sparse feature vector: `(feature index, weight)` sorted by index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseVector {
    pub entries: Vec<(usize, f64)>,
}

impl SparseVector {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dot(&self, dense: &[f64]) -> f64 {
        self.entries
            .iter()
            .map(|&(i, w)| dense.get(i).copied().unwrap_or(0.0) * w)
            .sum()
    }

    pub fn norm(&self) -> f64 {
        self.entries.iter().map(|(_, w)| w * w).sum::<f64>().sqrt()
    }
}

#[derive(Debug, Clone)]
pub struct TfidfVectorizer {
    vocabulary: HashMap<String, usize>,
    terms: Vec<String>,
    idf: Vec<f64>,
}

impl TfidfVectorizer {
    /// Build the vocabulary from token streams, keeping the `max_features`
    /// most frequent terms (ties broken alphabetically).
    pub fn fit(documents: &[Vec<String>], max_features: usize) -> Self {
        let mut term_counts: HashMap<String, usize> = HashMap::new();
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for tokens in documents {
            let terms = text::ngrams(tokens);
            let mut seen = std::collections::HashSet::new();
            for term in terms {
                *term_counts.entry(term.clone()).or_insert(0) += 1;
                if seen.insert(term.clone()) {
                    *doc_freq.entry(term).or_insert(0) += 1;
                }
            }
        }

        let mut ranked: Vec<(String, usize)> = term_counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(max_features.max(1));

        // Stable feature order independent of frequency ranking
        let mut terms: Vec<String> = ranked.into_iter().map(|(t, _)| t).collect();
        terms.sort();

        let n = documents.len() as f64;
        let idf = terms
            .iter()
            .map(|t| {
                let df = doc_freq.get(t).copied().unwrap_or(0) as f64;
                ((1.0 + n) / (1.0 + df)).ln() + 1.0
            })
            .collect();

        let vocabulary = terms
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i))
            .collect();

        Self { vocabulary, terms, idf }
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn term(&self, index: usize) -> Option<&str> {
        self.terms.get(index).map(String::as_str)
    }

    pub fn index_of(&self, term: &str) -> Option<usize> {
        self.vocabulary.get(term).copied()
    }

    /// L2-normalised TF-IDF vector of a token stream.
    pub fn transform_tokens(&self, tokens: &[String]) -> SparseVector {
        let mut counts: HashMap<usize, f64> = HashMap::new();
        for term in text::ngrams(tokens) {
            if let Some(&idx) = self.vocabulary.get(&term) {
                *counts.entry(idx).or_insert(0.0) += 1.0;
            }
        }

        let mut entries: Vec<(usize, f64)> = counts
            .into_iter()
            .map(|(idx, tf)| (idx, tf * self.idf[idx]))
            .collect();
        entries.sort_by_key(|&(idx, _)| idx);

        let mut vector = SparseVector { entries };
        let norm = vector.norm();
        if norm > 0.0 {
            for entry in &mut vector.entries {
                entry.1 /= norm;
            }
        }
        vector
    }

    pub fn transform(&self, message: &str) -> SparseVector {
        self.transform_tokens(&text::tokenize(message))
    }
}
