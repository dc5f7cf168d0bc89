//! Conversational assistant that explains spam verdicts in plain language.
//!
//! The service is stateless apart from a bounded per-user conversation
//! memory. Classification is done by the caller and passed in, so the
//! composition logic stays synchronous and cheap.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::classifier::ensemble::Label;
use crate::classifier::explain::ExplanationFeature;
use crate::classifier::text;

pub const MAX_MEMORY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    AccountExpiring,
    MoneyOffers,
    UrgentBanking,
    TechSupport,
    DeliveryIssues,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::AccountExpiring,
        Scenario::MoneyOffers,
        Scenario::UrgentBanking,
        Scenario::TechSupport,
        Scenario::DeliveryIssues,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::AccountExpiring => "account_expiring",
            Self::MoneyOffers => "money_offers",
            Self::UrgentBanking => "urgent_banking",
            Self::TechSupport => "tech_support",
            Self::DeliveryIssues => "delivery_issues",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::AccountExpiring => "Account Expiring",
            Self::MoneyOffers => "Money Offers",
            Self::UrgentBanking => "Urgent Banking",
            Self::TechSupport => "Tech Support",
            Self::DeliveryIssues => "Delivery Issues",
        }
    }

    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            Self::AccountExpiring => &["account", "expiring", "expire", "suspended", "verify", "confirm"],
            Self::MoneyOffers => &["free", "money", "cash", "prize", "winner", "won", "claim"],
            Self::UrgentBanking => &["bank", "urgent", "compromised", "fraud", "security", "alert"],
            Self::TechSupport => &["virus", "infected", "computer", "microsoft", "apple", "support"],
            Self::DeliveryIssues => &["package", "delivery", "shipping", "fedex", "ups", "dhl", "postal"],
        }
    }

    pub fn advice(&self) -> &'static str {
        match self {
            Self::AccountExpiring => "This looks like a phishing scam! Real companies don't ask you to verify accounts through text messages. Never click suspicious links or give personal info.",
            Self::MoneyOffers => "This is likely a money scam! If it sounds too good to be true, it probably is. Legitimate prizes don't require you to pay fees or give personal information.",
            Self::UrgentBanking => "This could be a banking scam! Real banks will never ask for passwords or account details via text. Call your bank directly using the number on your card.",
            Self::TechSupport => "This is probably a tech support scam! Real tech companies don't contact you about viruses through text messages. Don't click any links or call the numbers.",
            Self::DeliveryIssues => "This might be a delivery scam! Check if you're actually expecting a package. Real delivery companies use their official apps and websites for tracking.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspiciousElement {
    ContainsLinks,
    ContainsPhone,
    UrgentLanguage,
    FinancialContent,
}

impl SuspiciousElement {
    fn describe(&self) -> &'static str {
        match self {
            Self::ContainsLinks => "it contains links",
            Self::ContainsPhone => "it has phone numbers",
            Self::UrgentLanguage => "it uses urgent language",
            Self::FinancialContent => "it mentions money or payments",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageContext {
    pub detected_scenario: Option<Scenario>,
    /// Share of the scenario's keywords present in the message
    pub scenario_confidence: f64,
    pub suspicious_elements: Vec<SuspiciousElement>,
    pub message_length: usize,
    pub has_numbers: bool,
    pub has_caps: bool,
}

/// Verdict handed to the assistant by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub prediction: Label,
    /// Confidence in `prediction`, in `[0, 1]`
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub message: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub has_conversation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_messages: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_messages: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_messages: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioInfo {
    pub name: String,
    pub keywords: Vec<String>,
    pub advice: String,
}

fn link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"https?://|www\.|\.com\b|\.org\b|\.net\b|\blink\b|\bclick\b")
            .expect("valid link regex")
    })
}

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b|\b\d{10}\b").expect("valid phone regex")
    })
}

const URGENCY_WORDS: &[&str] = &["urgent", "immediate", "immediately", "now", "asap", "quickly", "hurry"];
const MONEY_WORDS: &[&str] = &["money", "cash", "pay", "fee", "cost", "price", "free"];

fn contains_word(padded: &str, word: &str) -> bool {
    padded.contains(&format!(" {} ", word))
}

/// Scenario, suspicious elements and surface features of a message.
pub fn analyze_context(message: &str) -> MessageContext {
    let lower = message.to_lowercase();
    let padded = format!(" {} ", text::normalize(message));

    let mut detected_scenario = None;
    let mut scenario_confidence = 0.0;
    for scenario in Scenario::ALL {
        let keywords = scenario.keywords();
        let hits = keywords.iter().filter(|k| contains_word(&padded, k)).count();
        let ratio = hits as f64 / keywords.len() as f64;
        if ratio > scenario_confidence {
            scenario_confidence = ratio;
            detected_scenario = Some(scenario);
        }
    }

    let mut suspicious_elements = Vec::new();
    if link_pattern().is_match(&lower) {
        suspicious_elements.push(SuspiciousElement::ContainsLinks);
    }
    if phone_pattern().is_match(message) {
        suspicious_elements.push(SuspiciousElement::ContainsPhone);
    }
    if URGENCY_WORDS.iter().any(|w| contains_word(&padded, w)) {
        suspicious_elements.push(SuspiciousElement::UrgentLanguage);
    }
    if lower.contains('$')
        || lower.contains('£')
        || MONEY_WORDS.iter().any(|w| contains_word(&padded, w))
    {
        suspicious_elements.push(SuspiciousElement::FinancialContent);
    }

    MessageContext {
        detected_scenario,
        scenario_confidence,
        suspicious_elements,
        message_length: message.chars().count(),
        has_numbers: message.chars().any(|c| c.is_ascii_digit()),
        has_caps: message.chars().any(|c| c.is_uppercase()),
    }
}

/// Compose the assistant's reply. `history_len` is the number of turns in
/// memory including the current user message.
pub fn compose_response(
    user_name: &str,
    message: &str,
    verdict: Option<Verdict>,
    features: &[ExplanationFeature],
    history_len: usize,
) -> String {
    let context = analyze_context(message);
    let has = |e: SuspiciousElement| context.suspicious_elements.contains(&e);
    let mut out = format!("Hi {}! ", user_name);

    match verdict {
        Some(Verdict {
            prediction: Label::Spam,
            confidence,
        }) => {
            out.push_str(&format!(
                "I analyzed your message and our AI thinks this is likely SPAM with {:.0}% confidence. ",
                confidence * 100.0
            ));
            if let Some(scenario) = context.detected_scenario {
                out.push_str(scenario.advice());
                out.push(' ');
            }
            out.push_str("Here's what I recommend: ");
            let mut tips = Vec::new();
            if has(SuspiciousElement::ContainsLinks) {
                tips.push("Don't click any links in the message");
            }
            if has(SuspiciousElement::ContainsPhone) {
                tips.push("Don't call any phone numbers mentioned");
            }
            if has(SuspiciousElement::FinancialContent) {
                tips.push("Never give out your financial information");
            }
            if has(SuspiciousElement::UrgentLanguage) {
                tips.push("Take time to think, scammers use urgency to pressure you");
            }
            if !tips.is_empty() {
                out.push_str(&format!("• {}. ", tips.join(" • ")));
            }
            out.push_str("When in doubt, delete the message and block the sender. Stay safe!");
        }
        Some(Verdict {
            prediction: Label::Ham,
            confidence,
        }) => {
            out.push_str(&format!(
                "Good news! Our AI thinks this message looks legitimate with {:.0}% confidence. ",
                confidence * 100.0
            ));
            if !context.suspicious_elements.is_empty() {
                out.push_str("However, I noticed a few things to keep in mind: ");
                if has(SuspiciousElement::ContainsLinks) {
                    out.push_str("Even though this seems legitimate, always be careful with links. Make sure they go to official websites. ");
                }
                if has(SuspiciousElement::FinancialContent) {
                    out.push_str("Since this involves money or payments, double-check it's from a trusted source. ");
                }
            }
            out.push_str("Trust your instincts. If something feels off, it's okay to be cautious!");
        }
        None => {
            out.push_str("I'd be happy to help you understand this message better! ");
            if !context.suspicious_elements.is_empty() {
                out.push_str("I notice this message has some elements that could be concerning: ");
                let descriptions: Vec<&str> = context
                    .suspicious_elements
                    .iter()
                    .map(SuspiciousElement::describe)
                    .collect();
                out.push_str(&descriptions.join(", "));
                out.push_str(". Would you like me to analyze this message with our spam detection system?");
            }
        }
    }

    if !features.is_empty() {
        let words = |label: Label| -> Vec<&str> {
            features
                .iter()
                .filter(|f| f.direction == label)
                .take(3)
                .map(|f| f.feature.as_str())
                .collect()
        };
        out.push_str("\n\nOur AI also found some key words that influenced the decision: ");
        let spam_words = words(Label::Spam);
        if !spam_words.is_empty() {
            out.push_str(&format!("Words that suggest spam: {}. ", spam_words.join(", ")));
        }
        let ham_words = words(Label::Ham);
        if !ham_words.is_empty() {
            out.push_str(&format!(
                "Words that suggest it's legitimate: {}. ",
                ham_words.join(", ")
            ));
        }
    }

    if history_len > 1 {
        out.push_str(&format!(
            "\n\nIs there anything else about this message or other messages you'd like to discuss, {}?",
            user_name
        ));
    } else {
        out.push_str(&format!(
            "\n\nFeel free to ask me about any other suspicious messages, {}!",
            user_name
        ));
    }
    out
}

pub fn scenarios() -> BTreeMap<&'static str, ScenarioInfo> {
    Scenario::ALL
        .iter()
        .map(|s| {
            (
                s.key(),
                ScenarioInfo {
                    name: s.title().to_string(),
                    keywords: s.keywords().iter().map(|k| k.to_string()).collect(),
                    advice: s.advice().to_string(),
                },
            )
        })
        .collect()
}

/// Per-user conversation memory, bounded to [`MAX_MEMORY`] turns.
#[derive(Debug, Default)]
pub struct ChatbotService {
    memory: Mutex<HashMap<String, VecDeque<ChatTurn>>>,
}

impl ChatbotService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn and return the conversation length afterwards.
    pub fn record(&self, user_id: &str, message: &str, sender: Sender) -> usize {
        let mut memory = self.memory.lock();
        let turns = memory.entry(user_id.to_string()).or_default();
        turns.push_back(ChatTurn {
            message: message.to_string(),
            sender,
            timestamp: Utc::now(),
        });
        while turns.len() > MAX_MEMORY {
            turns.pop_front();
        }
        turns.len()
    }

    /// Store a user message and the reply to it under one lock, so a failed
    /// reply never leaves a dangling user turn.
    pub fn record_exchange(&self, user_id: &str, message: &str, reply: &str) -> usize {
        let mut memory = self.memory.lock();
        let turns = memory.entry(user_id.to_string()).or_default();
        let now = Utc::now();
        turns.push_back(ChatTurn {
            message: message.to_string(),
            sender: Sender::User,
            timestamp: now,
        });
        turns.push_back(ChatTurn {
            message: reply.to_string(),
            sender: Sender::Bot,
            timestamp: now,
        });
        while turns.len() > MAX_MEMORY {
            turns.pop_front();
        }
        turns.len()
    }

    /// Turns currently held for a user.
    pub fn turn_count(&self, user_id: &str) -> usize {
        self.memory.lock().get(user_id).map_or(0, VecDeque::len)
    }

    pub fn conversation(&self, user_id: &str) -> Vec<ChatTurn> {
        self.memory
            .lock()
            .get(user_id)
            .map(|turns| turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn summary(&self, user_id: &str) -> ConversationSummary {
        let turns = self.conversation(user_id);
        if turns.is_empty() {
            return ConversationSummary {
                has_conversation: false,
                total_messages: None,
                user_messages: None,
                bot_messages: None,
                conversation_start: None,
                last_message: None,
            };
        }
        let user_messages = turns.iter().filter(|t| t.sender == Sender::User).count();
        ConversationSummary {
            has_conversation: true,
            total_messages: Some(turns.len()),
            user_messages: Some(user_messages),
            bot_messages: Some(turns.len() - user_messages),
            conversation_start: turns.first().map(|t| t.timestamp),
            last_message: turns.last().map(|t| t.timestamp),
        }
    }

    pub fn clear(&self, user_id: &str) -> bool {
        self.memory.lock().remove(user_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(name: &str, direction: Label) -> ExplanationFeature {
        ExplanationFeature {
            feature: name.to_string(),
            importance: 0.5,
            contribution: if direction == Label::Spam { 0.5 } else { -0.5 },
            direction,
            present: true,
            explanation: String::new(),
            method: None,
            methods: None,
        }
    }

    #[test]
    fn test_detects_scenario_by_keyword_ratio() {
        let ctx = analyze_context("Your account is suspended. Verify now to confirm");
        assert_eq!(ctx.detected_scenario, Some(Scenario::AccountExpiring));
        assert!((ctx.scenario_confidence - 4.0 / 6.0).abs() < 1e-9);
        assert!(ctx.suspicious_elements.contains(&SuspiciousElement::UrgentLanguage));
        assert!(ctx.has_caps);
    }

    #[test]
    fn test_suspicious_elements() {
        let ctx = analyze_context("Claim $500 cash at www.prize.com or call 555-123-4567");
        assert_eq!(
            ctx.suspicious_elements,
            vec![
                SuspiciousElement::ContainsLinks,
                SuspiciousElement::ContainsPhone,
                SuspiciousElement::FinancialContent
            ]
        );
        assert!(ctx.has_numbers);

        let plain = analyze_context("see you later");
        assert!(plain.suspicious_elements.is_empty());
        assert_eq!(plain.detected_scenario, None);
        assert_eq!(plain.scenario_confidence, 0.0);
    }

    #[test]
    fn test_whole_word_matching() {
        // "groups" must not match the "ups" delivery keyword
        let ctx = analyze_context("study groups tonight");
        assert_eq!(ctx.detected_scenario, None);
    }

    #[test]
    fn test_spam_response() {
        let reply = compose_response(
            "alice",
            "You WON a free prize! Click www.win.com now",
            Some(Verdict {
                prediction: Label::Spam,
                confidence: 0.93,
            }),
            &[feature("prize", Label::Spam), feature("tomorrow", Label::Ham)],
            1,
        );
        assert!(reply.starts_with("Hi alice! "));
        assert!(reply.contains("SPAM with 93% confidence"));
        assert!(reply.contains(Scenario::MoneyOffers.advice()));
        assert!(reply.contains("Don't click any links"));
        assert!(reply.contains("Words that suggest spam: prize."));
        assert!(reply.contains("Words that suggest it's legitimate: tomorrow."));
        assert!(reply.ends_with("Feel free to ask me about any other suspicious messages, alice!"));
    }

    #[test]
    fn test_ham_and_unanalyzed_responses() {
        let ham = compose_response(
            "bob",
            "Lunch tomorrow?",
            Some(Verdict {
                prediction: Label::Ham,
                confidence: 0.8,
            }),
            &[],
            3,
        );
        assert!(ham.contains("legitimate with 80% confidence"));
        assert!(!ham.contains("However"));
        assert!(ham.contains("anything else"));

        let none = compose_response("bob", "pay the fee now", None, &[], 1);
        assert!(none.contains("it uses urgent language, it mentions money or payments"));
    }

    #[test]
    fn test_memory_is_bounded() {
        let service = ChatbotService::new();
        for i in 0..15 {
            let sender = if i % 2 == 0 { Sender::User } else { Sender::Bot };
            service.record("u1", &format!("m{}", i), sender);
        }
        let turns = service.conversation("u1");
        assert_eq!(turns.len(), MAX_MEMORY);
        assert_eq!(turns[0].message, "m5");
        assert_eq!(turns[9].message, "m14");

        let summary = service.summary("u1");
        assert!(summary.has_conversation);
        assert_eq!(summary.total_messages, Some(10));

        assert!(service.conversation("u2").is_empty());
        assert!(!service.summary("u2").has_conversation);

        assert!(service.clear("u1"));
        assert!(!service.clear("u1"));
    }

    #[test]
    fn test_exchange_is_stored_as_a_pair() {
        let service = ChatbotService::new();
        assert_eq!(service.turn_count("u1"), 0);
        assert_eq!(service.record_exchange("u1", "is this spam?", "looks fine"), 2);
        assert_eq!(service.turn_count("u1"), 2);

        let turns = service.conversation("u1");
        assert_eq!(turns[0].sender, Sender::User);
        assert_eq!(turns[0].message, "is this spam?");
        assert_eq!(turns[1].sender, Sender::Bot);
        assert_eq!(turns[1].message, "looks fine");

        for i in 0..5 {
            service.record_exchange("u1", &format!("q{}", i), &format!("a{}", i));
        }
        let turns = service.conversation("u1");
        assert_eq!(turns.len(), MAX_MEMORY);
        assert_eq!(turns[0].message, "q0");
        assert_eq!(turns[0].sender, Sender::User);
    }

    #[test]
    fn test_scenarios_listing() {
        let all = scenarios();
        assert_eq!(all.len(), 5);
        assert_eq!(all["delivery_issues"].name, "Delivery Issues");
        assert!(all["money_offers"].keywords.contains(&"prize".to_string()));
    }
}
