//! Consensus voting across the ensemble.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Spam,
    Ham,
}

impl Label {
    pub fn from_probability(spam_probability: f64) -> Self {
        if spam_probability > 0.5 {
            Label::Spam
        } else {
            Label::Ham
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Spam => "spam",
            Label::Ham => "ham",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "spam" => Some(Label::Spam),
            "ham" => Some(Label::Ham),
            _ => None,
        }
    }

    /// Probability assigned to this label given `P(spam)`.
    pub fn probability(&self, spam_probability: f64) -> f64 {
        match self {
            Label::Spam => spam_probability,
            Label::Ham => 1.0 - spam_probability,
        }
    }
}

/// Vote as shown in the consensus block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vote {
    Spam,
    Ham,
    Unknown,
}

impl From<Label> for Vote {
    fn from(label: Label) -> Self {
        match label {
            Label::Spam => Vote::Spam,
            Label::Ham => Vote::Ham,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn from_percent(percent: f64) -> Self {
        if percent >= 80.0 {
            ConfidenceLevel::High
        } else if percent >= 60.0 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelVote {
    pub model: String,
    pub spam_probability: f64,
    /// Validation accuracy of the model, used for the weighted vote
    pub weight: f64,
}

impl ModelVote {
    pub fn label(&self) -> Label {
        Label::from_probability(self.spam_probability)
    }

    pub fn confidence(&self) -> f64 {
        self.label().probability(self.spam_probability)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consensus {
    pub majority_vote: Vote,
    pub weighted_vote: Vote,
    /// `agreement × mean majority confidence`, in percent
    pub confidence: f64,
    pub agreement: f64,
    pub majority_count: usize,
    pub total_votes: usize,
    pub spam_votes: usize,
    pub ham_votes: usize,
}

#[derive(Debug, Clone)]
pub struct EnsembleOutcome {
    pub votes: Vec<ModelVote>,
    pub consensus: Consensus,
    pub majority: Label,
    /// Mean confidence of the models that voted with the majority
    pub majority_confidence: f64,
    pub weighted_spam_probability: f64,
    pub confidence_level: ConfidenceLevel,
    pub suggestion: &'static str,
}

const MIN_WEIGHT: f64 = 0.01;

pub fn combine(votes: Vec<ModelVote>) -> EnsembleOutcome {
    let total_votes = votes.len();
    let spam_votes = votes.iter().filter(|v| v.label() == Label::Spam).count();
    let ham_votes = total_votes - spam_votes;

    let majority = if spam_votes > ham_votes {
        Label::Spam
    } else {
        Label::Ham
    };
    let majority_count = spam_votes.max(ham_votes);
    let agreement = if total_votes == 0 {
        0.0
    } else {
        majority_count as f64 / total_votes as f64
    };

    let majority_confidences: Vec<f64> = votes
        .iter()
        .filter(|v| v.label() == majority)
        .map(ModelVote::confidence)
        .collect();
    let majority_confidence = if majority_confidences.is_empty() {
        0.0
    } else {
        majority_confidences.iter().sum::<f64>() / majority_confidences.len() as f64
    };

    let weight_sum: f64 = votes.iter().map(|v| v.weight.max(MIN_WEIGHT)).sum();
    let weighted_spam_probability = if weight_sum == 0.0 {
        0.5
    } else {
        votes
            .iter()
            .map(|v| v.weight.max(MIN_WEIGHT) * v.spam_probability)
            .sum::<f64>()
            / weight_sum
    };
    let weighted_vote = if weighted_spam_probability > 0.5 {
        Vote::Spam
    } else if weighted_spam_probability < 0.5 {
        Vote::Ham
    } else {
        Vote::Unknown
    };

    let confidence = (agreement * majority_confidence * 1000.0).round() / 10.0;
    let confidence_level = ConfidenceLevel::from_percent(confidence);

    EnsembleOutcome {
        consensus: Consensus {
            majority_vote: majority.into(),
            weighted_vote,
            confidence,
            agreement,
            majority_count,
            total_votes,
            spam_votes,
            ham_votes,
        },
        votes,
        majority,
        majority_confidence,
        weighted_spam_probability,
        confidence_level,
        suggestion: suggestion(majority, confidence_level),
    }
}

pub fn suggestion(label: Label, level: ConfidenceLevel) -> &'static str {
    match (label, level) {
        (Label::Spam, ConfidenceLevel::High) => {
            "All signs point to spam. Do not reply, click links or call any numbers; delete the message and block the sender."
        }
        (Label::Spam, ConfidenceLevel::Medium) => {
            "This message is likely spam. Avoid links and never share personal or banking details in response."
        }
        (Label::Spam, ConfidenceLevel::Low) => {
            "Some models flagged this message as spam. Verify the sender through an official channel before acting on it."
        }
        (Label::Ham, ConfidenceLevel::High) => {
            "This message looks legitimate. No action needed."
        }
        (Label::Ham, ConfidenceLevel::Medium) => {
            "This message is probably legitimate, but stay cautious with any links or payment requests."
        }
        (Label::Ham, ConfidenceLevel::Low) => {
            "The models disagree about this message. Treat it with care and confirm the sender if anything seems off."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(model: &str, p: f64, weight: f64) -> ModelVote {
        ModelVote {
            model: model.to_string(),
            spam_probability: p,
            weight,
        }
    }

    #[test]
    fn test_unanimous_spam() {
        let outcome = combine(vec![vote("a", 0.9, 1.0), vote("b", 0.8, 1.0), vote("c", 0.95, 1.0)]);
        let c = &outcome.consensus;
        assert_eq!(c.majority_vote, Vote::Spam);
        assert_eq!(c.weighted_vote, Vote::Spam);
        assert_eq!(c.spam_votes, 3);
        assert_eq!(c.ham_votes, 0);
        assert_eq!(c.majority_count, 3);
        assert_eq!(c.confidence, 88.3);
        assert_eq!(outcome.confidence_level, ConfidenceLevel::High);
    }

    #[test]
    fn test_votes_always_add_up() {
        let outcome = combine(vec![
            vote("a", 0.9, 0.9),
            vote("b", 0.2, 0.8),
            vote("c", 0.4, 0.7),
            vote("d", 0.6, 0.95),
            vote("e", 0.1, 0.5),
        ]);
        let c = &outcome.consensus;
        assert_eq!(c.spam_votes + c.ham_votes, c.total_votes);
        assert!(c.majority_count <= c.total_votes);
        assert_eq!(c.majority_vote, Vote::Ham);
        assert_eq!(c.majority_count, 3);
        assert!((c.agreement - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_vote_can_differ_from_majority() {
        // Two weak spam votes against one confident, accurate ham vote
        let outcome = combine(vec![
            vote("a", 0.55, 0.1),
            vote("b", 0.55, 0.1),
            vote("c", 0.01, 1.0),
        ]);
        assert_eq!(outcome.consensus.majority_vote, Vote::Spam);
        assert_eq!(outcome.consensus.weighted_vote, Vote::Ham);
        assert_eq!(outcome.confidence_level, ConfidenceLevel::Low);
    }

    #[test]
    fn test_exact_half_is_unknown_and_ham() {
        let outcome = combine(vec![vote("a", 0.5, 1.0)]);
        assert_eq!(outcome.consensus.weighted_vote, Vote::Unknown);
        assert_eq!(outcome.majority, Label::Ham);
    }

    #[test]
    fn test_empty_votes() {
        let outcome = combine(Vec::new());
        assert_eq!(outcome.consensus.total_votes, 0);
        assert_eq!(outcome.consensus.confidence, 0.0);
        assert_eq!(outcome.confidence_level, ConfidenceLevel::Low);
    }

    #[test]
    fn test_label_helpers() {
        assert_eq!(Label::parse(" SPAM "), Some(Label::Spam));
        assert_eq!(Label::parse("maybe"), None);
        assert!((Label::Ham.probability(0.25) - 0.75).abs() < 1e-12);
        assert_eq!(serde_json::to_value(Label::Spam).unwrap(), "spam");
        assert_eq!(serde_json::to_value(Vote::Unknown).unwrap(), "Unknown");
    }
}
