//! Pattern detection for natural-language queries
//!
//! Turns queries like "email" or "phone numbers and dates" into canned regex
//! searches. Each [`PatternKind`] has whole-word trigger keywords and a
//! canonical regex. When no keyword matches, the query's own shape is sniffed
//! (something that looks like an email address searches for emails, and so on).
//!
//! Regex sources never contain quote characters and spell spaces as `\s`, so
//! a combined multi-pattern source survives [`tokenize_query`] intact.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::fmt;

use crate::matcher::{SearchMode, tokenize_query};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternKind {
    Email,
    Phone,
    Url,
    Date,
    Time,
    CreditCard,
    Ssn,
    IpAddress,
    PostalCode,
    Address,
    State,
    Country,
    City,
}

impl PatternKind {
    pub const ALL: [PatternKind; 13] = [
        PatternKind::Email,
        PatternKind::Phone,
        PatternKind::Url,
        PatternKind::Date,
        PatternKind::Time,
        PatternKind::CreditCard,
        PatternKind::Ssn,
        PatternKind::IpAddress,
        PatternKind::PostalCode,
        PatternKind::Address,
        PatternKind::State,
        PatternKind::Country,
        PatternKind::City,
    ];

    pub fn description(&self) -> &'static str {
        match self {
            PatternKind::Email => "Email addresses",
            PatternKind::Phone => "Phone numbers",
            PatternKind::Url => "URLs",
            PatternKind::Date => "Dates",
            PatternKind::Time => "Times",
            PatternKind::CreditCard => "Credit card numbers",
            PatternKind::Ssn => "Social security numbers",
            PatternKind::IpAddress => "IP addresses",
            PatternKind::PostalCode => "ZIP/postal codes",
            PatternKind::Address => "Street addresses",
            PatternKind::State => "US states",
            PatternKind::Country => "Countries",
            PatternKind::City => "Cities",
        }
    }

    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            PatternKind::Email => &["email", "emails", "e-mail", "e-mails", "email address", "email addresses", "mail address"],
            PatternKind::Phone => &["phone", "phones", "phone number", "phone numbers", "telephone", "mobile", "cell number", "fax"],
            PatternKind::Url => &["url", "urls", "link", "links", "website", "websites", "web address", "web addresses"],
            PatternKind::Date => &["date", "dates", "birthday", "birth date", "dob"],
            PatternKind::Time => &["time", "times", "timestamp", "timestamps", "clock time"],
            PatternKind::CreditCard => &["credit card", "credit cards", "card number", "card numbers", "credit card number"],
            PatternKind::Ssn => &["ssn", "ssns", "social security", "social security number", "social security numbers"],
            PatternKind::IpAddress => &["ip", "ips", "ip address", "ip addresses", "ipv4"],
            PatternKind::PostalCode => &["zip", "zips", "zip code", "zip codes", "zipcode", "postal code", "postal codes", "postcode"],
            PatternKind::Address => &["address", "addresses", "street", "streets", "street address", "street addresses"],
            PatternKind::State => &["state", "states", "us state", "us states"],
            PatternKind::Country => &["country", "countries", "nation", "nations"],
            PatternKind::City => &["city", "cities", "town", "towns"],
        }
    }

    pub fn regex_source(&self) -> &'static str {
        match self {
            PatternKind::Email => r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}",
            PatternKind::Phone => r"(?:\+?\d{1,3}[\s.\-]?)?\(?\d{3}\)?[\s.\-]?\d{3}[\s.\-]?\d{4}",
            PatternKind::Url => r"(?:https?://|www\.)[^\s<>]+",
            PatternKind::Date => {
                r"\b(?:\d{1,4}[/\-.]\d{1,2}[/\-.]\d{1,4}|(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Sept|Oct|Nov|Dec)[a-z]*\.?\s\d{1,2}(?:,?\s\d{4})?)\b"
            }
            PatternKind::Time => r"\b(?:[01]?\d|2[0-3]):[0-5]\d(?::[0-5]\d)?(?:\s?[AaPp][Mm])?\b",
            PatternKind::CreditCard => r"\b(?:\d{4}[\s\-]?){3}\d{4}\b",
            PatternKind::Ssn => r"\b\d{3}-\d{2}-\d{4}\b",
            PatternKind::IpAddress => {
                r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b"
            }
            PatternKind::PostalCode => r"\b\d{5}(?:-\d{4})?\b",
            PatternKind::Address => {
                r"\b\d{1,6}\s(?-i:(?:[A-Z][a-z]+\s){1,4})(?:Street|St|Avenue|Ave|Road|Rd|Boulevard|Blvd|Lane|Ln|Drive|Dr|Court|Ct|Way|Place|Pl)\b\.?"
            }
            PatternKind::State => {
                r"\b(?:Alabama|Alaska|Arizona|Arkansas|California|Colorado|Connecticut|Delaware|Florida|Georgia|Hawaii|Idaho|Illinois|Indiana|Iowa|Kansas|Kentucky|Louisiana|Maine|Maryland|Massachusetts|Michigan|Minnesota|Mississippi|Missouri|Montana|Nebraska|Nevada|New\sHampshire|New\sJersey|New\sMexico|New\sYork|North\sCarolina|North\sDakota|Ohio|Oklahoma|Oregon|Pennsylvania|Rhode\sIsland|South\sCarolina|South\sDakota|Tennessee|Texas|Utah|Vermont|Virginia|Washington|West\sVirginia|Wisconsin|Wyoming|(?-i:AL|AK|AZ|AR|CA|CO|CT|DE|FL|GA|HI|ID|IL|IN|IA|KS|KY|LA|ME|MD|MA|MI|MN|MS|MO|MT|NE|NV|NH|NJ|NM|NY|NC|ND|OH|OK|OR|PA|RI|SC|SD|TN|TX|UT|VT|VA|WA|WV|WI|WY))\b"
            }
            PatternKind::Country => {
                r"\b(?:United\sStates|United\sKingdom|Canada|Mexico|Brazil|Argentina|Chile|Colombia|Peru|France|Germany|Spain|Portugal|Italy|Netherlands|Belgium|Switzerland|Austria|Sweden|Norway|Denmark|Finland|Poland|Ireland|Greece|Turkey|Russia|Ukraine|China|Japan|India|Pakistan|Indonesia|Philippines|Vietnam|Thailand|South\sKorea|Australia|New\sZealand|Egypt|Nigeria|Kenya|South\sAfrica|Israel|Saudi\sArabia|Iran|(?-i:USA|UK|UAE))\b"
            }
            PatternKind::City => {
                r"\b(?:New\sYork|Los\sAngeles|Chicago|Houston|Phoenix|Philadelphia|San\sAntonio|San\sDiego|Dallas|San\sJose|Austin|Seattle|Denver|Boston|Atlanta|Miami|San\sFrancisco|Portland|Toronto|Vancouver|Montreal|Mexico\sCity|London|Paris|Berlin|Madrid|Rome|Amsterdam|Vienna|Dublin|Moscow|Istanbul|Dubai|Mumbai|Delhi|Beijing|Shanghai|Tokyo|Seoul|Singapore|Sydney|Melbourne|Cairo|Lagos|Nairobi|(?-i:NYC|LA|SF))\b"
            }
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Result of a successful [`PatternDetector::detect`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedPattern {
    pub kinds: Vec<PatternKind>,
    /// One regex, or several quoted sub-patterns for multi-regex search
    pub regex_source: String,
    pub description: String,
}

impl DetectedPattern {
    fn single(kind: PatternKind) -> Self {
        Self {
            kinds: vec![kind],
            regex_source: kind.regex_source().to_string(),
            description: kind.description().to_string(),
        }
    }

    fn combined(kinds: Vec<PatternKind>) -> Self {
        if kinds.len() == 1 {
            return Self::single(kinds[0]);
        }
        let regex_source = kinds
            .iter()
            .map(|k| format!("\"{}\"", k.regex_source()))
            .collect::<Vec<_>>()
            .join(" ");
        let description = kinds
            .iter()
            .map(PatternKind::description)
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            kinds,
            regex_source,
            description,
        }
    }

    pub fn is_multi(&self) -> bool {
        self.kinds.len() > 1
    }

    /// The regex search this detection upgrades the query to
    pub fn search_mode(&self) -> SearchMode {
        if self.is_multi() {
            SearchMode::MultiRegex(tokenize_query(&self.regex_source, true))
        } else {
            SearchMode::Regex(self.regex_source.clone())
        }
    }
}

struct KeywordMatcher {
    kind: PatternKind,
    regex: Regex,
}

/// Whole-word keyword matchers, longest keyword first within each kind
static KEYWORD_MATCHERS: Lazy<Vec<KeywordMatcher>> = Lazy::new(|| {
    PatternKind::ALL
        .iter()
        .filter_map(|&kind| {
            let mut keywords: Vec<&str> = kind.keywords().to_vec();
            keywords.sort_by_key(|k| std::cmp::Reverse(k.len()));
            let alternation = keywords
                .iter()
                .map(|k| regex::escape(k).replace(' ', r"\s+"))
                .collect::<Vec<_>>()
                .join("|");
            match RegexBuilder::new(&format!(r"\b(?:{})\b", alternation))
                .case_insensitive(true)
                .build()
            {
                Ok(regex) => Some(KeywordMatcher { kind, regex }),
                Err(e) => {
                    log::error!("Keyword matcher for {:?} failed to compile: {}", kind, e);
                    None
                }
            }
        })
        .collect()
});

static DATE_SHAPE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^\d{1,4}[/\-.]\d{1,2}[/\-.]\d{1,4}$").ok());

#[derive(Debug, Clone, Copy, Default)]
pub struct PatternDetector;

impl PatternDetector {
    pub fn new() -> Self {
        Self
    }

    /// Map a query to canned patterns, or `None` if it isn't a pattern query
    pub fn detect(&self, query: &str) -> Option<DetectedPattern> {
        let normalized = query.trim();
        if normalized.is_empty() {
            return None;
        }

        let kinds = keyword_kinds(normalized);
        if !kinds.is_empty() {
            log::debug!("Query '{}' matched pattern keywords: {:?}", normalized, kinds);
            return Some(DetectedPattern::combined(kinds));
        }

        let kind = sniff_shape(normalized)?;
        log::debug!("Query '{}' looks like {:?}", normalized, kind);
        Some(DetectedPattern::single(kind))
    }
}

/// Kinds whose keywords hit, in table order
///
/// A hit that lies strictly inside a longer hit of another kind does not
/// count ("address" inside "email address").
fn keyword_kinds(query: &str) -> Vec<PatternKind> {
    let hits: Vec<(PatternKind, usize, usize)> = KEYWORD_MATCHERS
        .iter()
        .flat_map(|m| {
            m.regex
                .find_iter(query)
                .map(move |hit| (m.kind, hit.start(), hit.end()))
        })
        .collect();

    let shadowed = |kind: PatternKind, start: usize, end: usize| {
        hits.iter().any(|&(other, s, e)| {
            other != kind && s <= start && end <= e && (e - s) > (end - start)
        })
    };

    let mut kinds = Vec::new();
    for &(kind, start, end) in &hits {
        if !kinds.contains(&kind) && !shadowed(kind, start, end) {
            kinds.push(kind);
        }
    }
    kinds
}

fn sniff_shape(query: &str) -> Option<PatternKind> {
    if query.contains('@') && query.contains('.') {
        return Some(PatternKind::Email);
    }

    let digits = query.chars().filter(char::is_ascii_digit).count();
    let phone_like = query
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '-' | '(' | ')' | '+' | '.' | ' '));
    if digits >= 10 && phone_like {
        return Some(PatternKind::Phone);
    }

    let lower = query.to_lowercase();
    if lower.starts_with("http") || lower.starts_with("www.") {
        return Some(PatternKind::Url);
    }

    if DATE_SHAPE.as_ref().is_some_and(|re| re.is_match(query)) {
        return Some(PatternKind::Date);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::validate_patterns;

    #[test]
    fn test_all_sources_compile() {
        let sources: Vec<String> = PatternKind::ALL
            .iter()
            .map(|k| k.regex_source().to_string())
            .collect();
        assert!(validate_patterns(&sources, false).is_ok());
        assert!(validate_patterns(&sources, true).is_ok());
        assert_eq!(KEYWORD_MATCHERS.len(), PatternKind::ALL.len());
    }

    #[test]
    fn test_sources_have_no_quotes() {
        for kind in PatternKind::ALL {
            let source = kind.regex_source();
            assert!(!source.contains('"') && !source.contains('\''), "{:?}", kind);
            assert!(!source.contains(' '), "{:?}", kind);
        }
    }

    #[test]
    fn test_single_keyword() {
        let detected = PatternDetector::new().detect("email").unwrap();
        assert_eq!(detected.kinds, vec![PatternKind::Email]);
        assert_eq!(detected.regex_source, PatternKind::Email.regex_source());
        assert_eq!(detected.description, "Email addresses");
        assert!(matches!(detected.search_mode(), SearchMode::Regex(_)));
    }

    #[test]
    fn test_keywords_are_whole_words_and_case_insensitive() {
        let detector = PatternDetector::new();
        assert!(detector.detect("Phone Numbers").is_some());
        assert!(detector.detect("update").is_none());
        assert!(detector.detect("zipper").is_none());
    }

    #[test]
    fn test_multiple_keywords_combine() {
        let detected = PatternDetector::new().detect("phone numbers and dates").unwrap();
        assert_eq!(detected.kinds, vec![PatternKind::Phone, PatternKind::Date]);
        assert!(detected.is_multi());
        assert_eq!(detected.description, "Phone numbers, Dates");

        match detected.search_mode() {
            SearchMode::MultiRegex(patterns) => {
                assert_eq!(
                    patterns,
                    vec![
                        PatternKind::Phone.regex_source().to_string(),
                        PatternKind::Date.regex_source().to_string()
                    ]
                );
            }
            other => panic!("expected multi-regex, got {:?}", other),
        }
    }

    #[test]
    fn test_longer_keyword_shadows_contained_one() {
        let detector = PatternDetector::new();
        let detected = detector.detect("email address").unwrap();
        assert_eq!(detected.kinds, vec![PatternKind::Email]);
        let detected = detector.detect("ip addresses").unwrap();
        assert_eq!(detected.kinds, vec![PatternKind::IpAddress]);
        let detected = detector.detect("street address").unwrap();
        assert_eq!(detected.kinds, vec![PatternKind::Address]);
    }

    #[test]
    fn test_shape_fallbacks() {
        let detector = PatternDetector::new();
        let kind = |q: &str| detector.detect(q).map(|d| d.kinds[0]);
        assert_eq!(kind("someone@example.com"), Some(PatternKind::Email));
        assert_eq!(kind("(555) 123-4567"), Some(PatternKind::Phone));
        assert_eq!(kind("+1 555.123.4567"), Some(PatternKind::Phone));
        assert_eq!(kind("https://example.com/a"), Some(PatternKind::Url));
        assert_eq!(kind("www.example.org"), Some(PatternKind::Url));
        assert_eq!(kind("12/31/2024"), Some(PatternKind::Date));
        assert_eq!(kind("2024-01-05"), Some(PatternKind::Date));
    }

    #[test]
    fn test_plain_queries_are_not_patterns() {
        let detector = PatternDetector::new();
        assert_eq!(detector.detect("quarterly revenue"), None);
        assert_eq!(detector.detect("12345"), None);
        assert_eq!(detector.detect("   "), None);
    }

    #[test]
    fn test_email_source_matches_addresses() {
        let re = Regex::new(PatternKind::Email.regex_source()).unwrap();
        let found: Vec<&str> = re
            .find_iter("contact: a@b.com and c@d.org")
            .map(|m| m.as_str())
            .collect();
        assert_eq!(found, vec!["a@b.com", "c@d.org"]);
    }

    #[test]
    fn test_state_abbreviations_stay_uppercase_only() {
        let re = RegexBuilder::new(PatternKind::State.regex_source())
            .case_insensitive(true)
            .build()
            .unwrap();
        assert!(re.is_match("Austin, TX"));
        assert!(re.is_match("moving to texas"));
        assert!(!re.is_match("go in or out"));
    }
}
