//! Risk classification of intents before they reach the browser.
//!
//! Keyword based. Anything matching a rule is held for the operator; the
//! rules only ever raise the level.

use serde::{Deserialize, Serialize};

use crate::types::{ActionIntent, ActionKind, PageSnapshot};

/// Destructive verbs, English and Russian.
const DESTRUCTIVE_KEYWORDS: &[&str] = &[
    "delete", "remove", "cancel", "clear", "reset", "erase", "unsubscribe",
    "удалить", "удаление", "удали", "убрать", "отменить", "отмена", "очистить", "сбросить",
];

/// Pages where money changes hands.
const PAYMENT_PAGE_KEYWORDS: &[&str] = &[
    "payment", "checkout", "order", "billing", "cart", "pay",
    "оплата", "оплатить", "заказ", "корзина", "оформление",
];

/// Click targets that commit a payment.
const CONFIRM_KEYWORDS: &[&str] = &[
    "confirm", "submit", "pay", "buy", "purchase", "place order",
    "подтвердить", "подтверждение", "оплатить", "купить", "покупка", "заказать",
];

/// Click targets that send a form.
const SUBMIT_KEYWORDS: &[&str] = &["submit", "send", "отправить", "послать"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub risk: RiskLevel,
    pub requires_approval: bool,
    /// Which rule raised the risk to high.
    pub reason: Option<String>,
}

impl Verdict {
    fn high(reason: String) -> Self {
        Self {
            risk: RiskLevel::High,
            requires_approval: true,
            reason: Some(reason),
        }
    }

    fn base(risk: RiskLevel) -> Self {
        Self {
            risk,
            requires_approval: false,
            reason: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityGate;

impl SecurityGate {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, intent: &ActionIntent, snapshot: &PageSnapshot) -> Verdict {
        classify(intent, snapshot)
    }
}

/// Classify an intent against the page it would run on.
pub fn classify(intent: &ActionIntent, snapshot: &PageSnapshot) -> Verdict {
    if let ActionKind::AskApproval { reason, .. } = &intent.kind {
        return Verdict::high(format!("decider requested approval: {reason}"));
    }

    // Text the action is described by: selector, the element's own label,
    // the generated description and the decider's reasoning.
    let mut target = String::new();
    if let Some(selector) = intent.kind.selector() {
        target.push_str(selector);
        target.push(' ');
        if let Some(text) = snapshot.element_text(selector) {
            target.push_str(text);
            target.push(' ');
        }
    }
    target.push_str(&intent.description());
    let target = target.to_lowercase();
    let reasoning = intent.reasoning.to_lowercase();

    if let Some(word) = first_match(&target, DESTRUCTIVE_KEYWORDS)
        .or_else(|| first_match(&reasoning, DESTRUCTIVE_KEYWORDS))
    {
        return Verdict::high(format!("destructive keyword \"{word}\""));
    }

    if let ActionKind::Click { .. } = intent.kind {
        let page = format!("{} {}", snapshot.url, snapshot.description).to_lowercase();
        if let (Some(page_word), Some(target_word)) = (
            first_match(&page, PAYMENT_PAGE_KEYWORDS),
            first_match(&target, CONFIRM_KEYWORDS),
        ) {
            return Verdict::high(format!(
                "\"{target_word}\" click on a {page_word} page"
            ));
        }

        if !snapshot.forms.is_empty() {
            if let Some(word) = first_match(&target, SUBMIT_KEYWORDS) {
                return Verdict::high(format!("\"{word}\" click on a page with a form"));
            }
        }
    }

    match intent.kind {
        ActionKind::Click { .. } | ActionKind::TypeText { .. } => Verdict::base(RiskLevel::Medium),
        _ => Verdict::base(RiskLevel::Low),
    }
}

fn first_match(haystack: &str, keywords: &[&'static str]) -> Option<&'static str> {
    keywords.iter().copied().find(|k| haystack.contains(k))
}
