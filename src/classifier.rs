//! Intent classifier
//!
//! Maps a user utterance to one of the supported intents and pulls out the
//! entities the tools need:
//! - Forecast: "what will Italian EVOO cost next month?"
//! - CompareMarkets: "compare Spain and Greece over the last 3 months"
//! - PriceDrivers: "why are Spanish prices rising?"
//! - Help: "what can you do?"
//!
//! Utterances with no intent keywords ("and Spain?") classify without an
//! intent so the planner can treat them as follow-ups.

use crate::models::{Grade, COUNTRIES};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Forecast,
    CompareMarkets,
    PriceDrivers,
    Help,
}

/// How far ahead a forecast question looks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "unit", content = "count")]
pub enum Horizon {
    Weeks(u32),
    Months(u32),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Entities {
    /// Member-state codes in mention order
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default)]
    pub grade: Option<Grade>,
    #[serde(default)]
    pub horizon: Option<Horizon>,
    /// Look-back window such as "3 months"
    #[serde(default)]
    pub period: Option<String>,
}

impl Entities {
    pub fn is_empty(&self) -> bool {
        self.countries.is_empty() && self.grade.is_none() && self.horizon.is_none() && self.period.is_none()
    }

    /// Fill whatever this turn left unsaid from an earlier turn.
    pub fn inherit(&mut self, previous: &Entities) {
        if self.countries.is_empty() {
            self.countries = previous.countries.clone();
        }
        if self.grade.is_none() {
            self.grade = previous.grade;
        }
        if self.horizon.is_none() {
            self.horizon = previous.horizon;
        }
        if self.period.is_none() {
            self.period = previous.period.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub intent: Option<Intent>,
    pub entities: Entities,
}

/// Resolved intent and entities of a turn, kept in session memory so the
/// next turn can build on it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnContext {
    pub intent: Intent,
    pub entities: Entities,
}

const FORECAST_KEYWORDS: &[&str] = &[
    "forecast", "predict", "projection", "outlook", "will ", "expect", "next ", "going to", "future",
    "ahead", "from now",
];

const COMPARE_KEYWORDS: &[&str] = &[
    "compare", "comparison", "versus", " vs", "cheapest", "cheaper", "most expensive", "lowest",
    "highest", "difference between", "across markets", "which market", "which country",
];

const DRIVER_KEYWORDS: &[&str] = &[
    "driver", "driving", "why", "cause", "factor", "reason", "behind", "freight", "diesel",
    "exchange rate", "packaging", "explain",
];

const HELP_KEYWORDS: &[&str] = &["help", "what can you", "how do i", "how does this work"];

lazy_static! {
    static ref WORD: Regex = Regex::new(r"[a-z]+").unwrap();
    static ref GRADE: Regex =
        Regex::new(r"\b(extra[ -]virgin|evoo|virgin|voo|lampante|refined|pomace)\b").unwrap();
    static ref NEXT_HORIZON: Regex = Regex::new(r"\bnext (week|month|quarter|year)\b").unwrap();
    static ref IN_HORIZON: Regex = Regex::new(
        r"\b(?:in|within) (\d+|a|an|one|two|three|four|five|six|seven|eight|nine|ten|eleven|twelve) (week|month|quarter|year)s?\b"
    )
    .unwrap();
    static ref AHEAD_HORIZON: Regex =
        Regex::new(r"\b(\d+) (week|month)s? (?:ahead|out|from now)\b").unwrap();
    static ref PERIOD: Regex = Regex::new(
        r"\b(?:last|past|previous|over(?: the)?(?: last| past)?)\s+(?:(\d+)\s+)?(day|week|month|quarter|year)s?\b"
    )
    .unwrap();
}

fn number(word: &str) -> Option<u32> {
    let n = match word {
        "a" | "an" | "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "eleven" => 11,
        "twelve" => 12,
        digits => digits.parse().ok()?,
    };
    (n > 0).then_some(n)
}

/// `None` when the count does not fit in months.
fn horizon(count: u32, unit: &str) -> Option<Horizon> {
    match unit {
        "week" => Some(Horizon::Weeks(count)),
        "quarter" => count.checked_mul(3).map(Horizon::Months),
        "year" => count.checked_mul(12).map(Horizon::Months),
        _ => Some(Horizon::Months(count)),
    }
}

fn score(text: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|kw| text.contains(**kw)).count()
}

/// Intent classifier
pub struct IntentClassifier;

impl IntentClassifier {
    pub fn classify(utterance: &str) -> Classification {
        // padded so leading and trailing keywords still match
        let text = format!(" {} ", utterance.to_lowercase());
        let entities = Self::extract_entities(&text);

        let scores = [
            (Intent::PriceDrivers, score(&text, DRIVER_KEYWORDS)),
            (Intent::CompareMarkets, score(&text, COMPARE_KEYWORDS)),
            (Intent::Forecast, score(&text, FORECAST_KEYWORDS)),
        ];
        let best = scores
            .iter()
            .filter(|(_, s)| *s > 0)
            .max_by_key(|(_, s)| *s)
            .map(|(intent, _)| *intent);

        let intent = match best {
            Some(intent) => Some(intent),
            None if score(&text, HELP_KEYWORDS) > 0 => Some(Intent::Help),
            None if entities.horizon.is_some() && entities.countries.is_empty() => Some(Intent::Forecast),
            None => None,
        };

        Classification { intent, entities }
    }

    pub fn extract_entities(text: &str) -> Entities {
        let text = text.to_lowercase();
        let mut entities = Entities::default();

        for word in WORD.find_iter(&text).map(|m| m.as_str()) {
            let code = COUNTRIES
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(word) || c.adjective == word)
                .map(|c| c.code);
            if let Some(code) = code {
                if !entities.countries.iter().any(|c| c == code) {
                    entities.countries.push(code.to_string());
                }
            }
        }

        entities.grade = GRADE
            .captures(&text)
            .and_then(|c| Grade::canonical(&c[1].replace('-', " ")));

        entities.horizon = if let Some(c) = NEXT_HORIZON.captures(&text) {
            horizon(1, &c[1])
        } else if let Some(c) = IN_HORIZON.captures(&text) {
            number(&c[1]).and_then(|n| horizon(n, &c[2]))
        } else if let Some(c) = AHEAD_HORIZON.captures(&text) {
            number(&c[1]).and_then(|n| horizon(n, &c[2]))
        } else {
            None
        };

        entities.period = PERIOD.captures(&text).and_then(|c| {
            let count = match c.get(1) {
                Some(m) => number(m.as_str())?,
                None => 1,
            };
            let (count, unit) = match &c[2] {
                "quarter" => (count.checked_mul(3)?, "month"),
                "day" => (count, "day"),
                "week" => (count, "week"),
                "year" => (count, "year"),
                _ => (count, "month"),
            };
            Some(format!("{} {}{}", count, unit, if count == 1 { "" } else { "s" }))
        });

        entities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forecast_questions() {
        let c = IntentClassifier::classify("What will Italian extra virgin olive oil cost next month?");
        assert_eq!(c.intent, Some(Intent::Forecast));
        assert_eq!(c.entities.countries, vec!["IT"]);
        assert_eq!(c.entities.grade, Some(Grade::ExtraVirgin));
        assert_eq!(c.entities.horizon, Some(Horizon::Months(1)));

        let c = IntentClassifier::classify("Forecast Greek EVOO prices in 6 weeks");
        assert_eq!(c.intent, Some(Intent::Forecast));
        assert_eq!(c.entities.countries, vec!["EL"]);
        assert_eq!(c.entities.horizon, Some(Horizon::Weeks(6)));

        let c = IntentClassifier::classify("price outlook for spain next quarter");
        assert_eq!(c.entities.horizon, Some(Horizon::Months(3)));
    }

    #[test]
    fn test_comparison_questions() {
        let c = IntentClassifier::classify("Compare Spain and Greece over the last 3 months");
        assert_eq!(c.intent, Some(Intent::CompareMarkets));
        assert_eq!(c.entities.countries, vec!["ES", "EL"]);
        assert_eq!(c.entities.period.as_deref(), Some("3 months"));

        let c = IntentClassifier::classify("Which market is cheapest for lampante in the past year?");
        assert_eq!(c.intent, Some(Intent::CompareMarkets));
        assert_eq!(c.entities.grade, Some(Grade::Lampante));
        assert_eq!(c.entities.period.as_deref(), Some("1 year"));
    }

    #[test]
    fn test_driver_questions() {
        let c = IntentClassifier::classify("Why are prices rising in Spain?");
        assert_eq!(c.intent, Some(Intent::PriceDrivers));
        assert_eq!(c.entities.countries, vec!["ES"]);
        assert_eq!(c.entities.horizon, None);

        let c = IntentClassifier::classify("what is driving portuguese virgin oil prices");
        assert_eq!(c.intent, Some(Intent::PriceDrivers));
        assert_eq!(c.entities.grade, Some(Grade::Virgin));
    }

    #[test]
    fn test_follow_ups_and_help() {
        let c = IntentClassifier::classify("And Spain?");
        assert_eq!(c.intent, None);
        assert_eq!(c.entities.countries, vec!["ES"]);

        assert_eq!(IntentClassifier::classify("help").intent, Some(Intent::Help));
        assert_eq!(IntentClassifier::classify("What can you do?").intent, Some(Intent::Help));
        assert_eq!(IntentClassifier::classify("hmm").intent, None);
    }

    #[test]
    fn test_huge_counts_do_not_overflow() {
        let c = IntentClassifier::classify("forecast italy in 2000000000 years");
        assert_eq!(c.intent, Some(Intent::Forecast));
        assert_eq!(c.entities.horizon, None);

        let c = IntentClassifier::classify("compare spain and italy over the last 2000000000 quarters");
        assert_eq!(c.entities.period, None);

        // passed through as text; the tool rejects it
        let c = IntentClassifier::classify("compare spain and italy over the last 1000000 years");
        assert_eq!(c.entities.period.as_deref(), Some("1000000 years"));
        assert_eq!(c.entities.horizon, None);
    }

    #[test]
    fn test_inherit_keeps_new_values() {
        let mut now = IntentClassifier::extract_entities("and spain?");
        let before = IntentClassifier::extract_entities("italian evoo in 2 months over the last 6 months");
        now.inherit(&before);
        assert_eq!(now.countries, vec!["ES"]);
        assert_eq!(now.grade, Some(Grade::ExtraVirgin));
        assert_eq!(now.horizon, Some(Horizon::Months(2)));
        assert_eq!(now.period.as_deref(), Some("6 months"));
    }
}
