//! Labelled SMS corpus loading and train/test splitting.

use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use thiserror::Error;

const SEED_CORPUS: &str = include_str!("../../data/seed_corpus.csv");
const SPLIT_SEED: u64 = 42;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read dataset: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse dataset: {0}")]
    Csv(#[from] csv::Error),

    #[error("dataset has no usable rows")]
    Empty,

    #[error("dataset needs both spam and ham examples")]
    SingleClass,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabeledMessage {
    pub text: String,
    pub is_spam: bool,
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub messages: Vec<LabeledMessage>,
    /// Where the rows came from, reported by `/model/info`
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct Split {
    pub train: Vec<LabeledMessage>,
    pub test: Vec<LabeledMessage>,
}

fn parse_label(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "spam" | "1" => Some(true),
        "ham" | "0" => Some(false),
        _ => None,
    }
}

impl Dataset {
    /// The small corpus compiled into the binary.
    pub fn seed() -> Result<Self, DatasetError> {
        Self::from_reader(SEED_CORPUS.as_bytes(), "bundled seed corpus")
    }

    /// Load a CSV in SMS Spam Collection layout (`v1` label, `v2` text).
    /// Non UTF-8 bytes are decoded lossily.
    pub fn from_path(path: &Path) -> Result<Self, DatasetError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file, &path.display().to_string())
    }

    pub fn from_reader<R: std::io::Read>(reader: R, source: &str) -> Result<Self, DatasetError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .flexible(true)
            .has_headers(true)
            .from_reader(reader);

        let headers = csv_reader.byte_headers()?.clone();
        let column = |names: &[&str], fallback: usize| {
            headers
                .iter()
                .position(|h| {
                    let h = String::from_utf8_lossy(h).trim().to_ascii_lowercase();
                    names.contains(&h.as_str())
                })
                .unwrap_or(fallback)
        };
        let label_col = column(&["v1", "label", "target", "class"], 0);
        let text_col = column(&["v2", "text", "message", "sms"], 1);

        let mut messages = Vec::new();
        for record in csv_reader.byte_records() {
            let record = record?;
            let (Some(label), Some(text)) = (record.get(label_col), record.get(text_col)) else {
                continue;
            };
            let Some(is_spam) = parse_label(&String::from_utf8_lossy(label)) else {
                continue;
            };
            let text = String::from_utf8_lossy(text).trim().to_string();
            if text.is_empty() {
                continue;
            }
            messages.push(LabeledMessage { text, is_spam });
        }

        if messages.is_empty() {
            return Err(DatasetError::Empty);
        }
        let spam = messages.iter().filter(|m| m.is_spam).count();
        if spam == 0 || spam == messages.len() {
            return Err(DatasetError::SingleClass);
        }

        Ok(Self {
            messages,
            source: source.to_string(),
        })
    }

    pub fn spam_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_spam).count()
    }

    /// Stratified split with a fixed seed; each class keeps `test_ratio` of
    /// its rows (at least one when the class has two or more).
    pub fn split(&self, test_ratio: f64) -> Split {
        let mut rng = StdRng::seed_from_u64(SPLIT_SEED);
        let mut train = Vec::new();
        let mut test = Vec::new();

        for class in [true, false] {
            let mut rows: Vec<LabeledMessage> = self
                .messages
                .iter()
                .filter(|m| m.is_spam == class)
                .cloned()
                .collect();
            rows.shuffle(&mut rng);

            let mut n_test = (rows.len() as f64 * test_ratio).round() as usize;
            if n_test == 0 && rows.len() >= 2 {
                n_test = 1;
            }
            let rest = rows.split_off(n_test);
            test.extend(rows);
            train.extend(rest);
        }

        Split { train, test }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_corpus_loads() {
        let dataset = Dataset::seed().unwrap();
        assert!(dataset.messages.len() >= 100);
        assert!(dataset.spam_count() >= 40);
        assert!(dataset.messages.len() - dataset.spam_count() >= 40);
    }

    #[test]
    fn test_spam_collection_layout() {
        let csv = "v1,v2,,,\nham,Ok lar... Joking wif u oni...,,,\nspam,\"Free entry in 2 a wkly comp, text FA\",,,\n";
        let dataset = Dataset::from_reader(csv.as_bytes(), "inline").unwrap();
        assert_eq!(dataset.messages.len(), 2);
        assert!(!dataset.messages[0].is_spam);
        assert!(dataset.messages[1].is_spam);
        assert_eq!(dataset.messages[1].text, "Free entry in 2 a wkly comp, text FA");
    }

    #[test]
    fn test_named_columns_and_bad_rows() {
        let csv = "text,label\nhello there,ham\nwin now,spam\nbroken row,maybe\n,spam\n";
        let dataset = Dataset::from_reader(csv.as_bytes(), "inline").unwrap();
        assert_eq!(dataset.messages.len(), 2);
    }

    #[test]
    fn test_lossy_decoding() {
        let mut bytes = b"v1,v2\nham,caf".to_vec();
        bytes.push(0xE9);
        bytes.extend_from_slice(b" later\nspam,win\n");
        let dataset = Dataset::from_reader(bytes.as_slice(), "inline").unwrap();
        assert!(dataset.messages[0].text.starts_with("caf"));
    }

    #[test]
    fn test_single_class_rejected() {
        let csv = "v1,v2\nham,a\nham,b\n";
        assert!(matches!(
            Dataset::from_reader(csv.as_bytes(), "inline"),
            Err(DatasetError::SingleClass)
        ));
        assert!(matches!(
            Dataset::from_reader("v1,v2\n".as_bytes(), "inline"),
            Err(DatasetError::Empty)
        ));
    }

    #[test]
    fn test_split_is_stratified_and_deterministic() {
        let dataset = Dataset::seed().unwrap();
        let a = dataset.split(0.2);
        let b = dataset.split(0.2);
        assert_eq!(a.train.len() + a.test.len(), dataset.messages.len());
        assert_eq!(a.test, b.test);
        assert!(a.test.iter().any(|m| m.is_spam));
        assert!(a.test.iter().any(|m| !m.is_spam));
    }
}
