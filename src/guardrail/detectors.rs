//! The fifteen detectors from spec §4.3: twelve pattern-based, plus three
//! with custom logic (generic API key, password-in-kv-context, names).

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use super::pattern::{Detector, Match};

fn re(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static detector regex"))
}

macro_rules! simple_detector {
    ($name:ident, $id:literal, $category:literal, $priority:expr, $bucket:literal, $pattern:expr) => {
        pub struct $name;
        impl Detector for $name {
            fn id(&self) -> &'static str {
                $id
            }
            fn category(&self) -> &'static str {
                $category
            }
            fn priority(&self) -> i32 {
                $priority
            }
            fn detect(&self, text: &str) -> Vec<Match> {
                static RE: OnceLock<Regex> = OnceLock::new();
                re(&RE, $pattern)
                    .find_iter(text)
                    .map(|m| Match {
                        start: m.start(),
                        end: m.end(),
                        value: m.as_str().to_string(),
                        bucket: $bucket,
                    })
                    .collect()
            }
        }
    };
}

simple_detector!(
    PrivateKeyDetector,
    "private_key",
    "credentials",
    10,
    "PRIVATE-KEY",
    r"-----BEGIN [A-Z ]*PRIVATE KEY-----[\s\S]*?-----END [A-Z ]*PRIVATE KEY-----"
);

simple_detector!(
    JwtDetector,
    "jwt",
    "credentials",
    20,
    "JWT",
    r"\beyJ[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]{10,}\b"
);

simple_detector!(
    IbanDetector,
    "iban",
    "financial",
    30,
    "IBAN",
    r"\b[A-Z]{2}\d{2}[A-Z0-9]{10,30}\b"
);

simple_detector!(
    Ipv6Detector,
    "ipv6",
    "network",
    80,
    "IPv6",
    r"\b(?:[0-9A-Fa-f]{1,4}:){7}[0-9A-Fa-f]{1,4}\b"
);

simple_detector!(
    AddressDetector,
    "address",
    "pii",
    90,
    "ADDR",
    r"\b\d{1,5}\s+[A-Za-z0-9.'\s]{2,40}\s+(?:Street|St|Avenue|Ave|Road|Rd|Boulevard|Blvd|Lane|Ln|Drive|Dr|Court|Ct|Way)\b"
);

/// AWS access key ids and `*_SECRET_KEY=...` assignments.
pub struct AwsKeyDetector;
impl Detector for AwsKeyDetector {
    fn id(&self) -> &'static str {
        "aws_key"
    }
    fn category(&self) -> &'static str {
        "credentials"
    }
    fn priority(&self) -> i32 {
        15
    }
    fn detect(&self, text: &str) -> Vec<Match> {
        static AKIA: OnceLock<Regex> = OnceLock::new();
        static SECRET: OnceLock<Regex> = OnceLock::new();
        let mut out: Vec<Match> = re(&AKIA, r"\bAKIA[0-9A-Z]{16}\b")
            .find_iter(text)
            .map(|m| Match {
                start: m.start(),
                end: m.end(),
                value: m.as_str().to_string(),
                bucket: "AKIA",
            })
            .collect();
        for caps in re(&SECRET, r"(?i)\w*_SECRET_KEY\s*=\s*([A-Za-z0-9/+=]{16,})").captures_iter(text) {
            if let Some(m) = caps.get(1) {
                out.push(Match {
                    start: m.start(),
                    end: m.end(),
                    value: m.as_str().to_string(),
                    bucket: "AWS-SECRET",
                });
            }
        }
        out
    }
}

/// US SSNs, validated against the area/group/serial rules from spec §4.3.
pub struct SsnDetector;
impl Detector for SsnDetector {
    fn id(&self) -> &'static str {
        "ssn"
    }
    fn category(&self) -> &'static str {
        "pii"
    }
    fn priority(&self) -> i32 {
        40
    }
    fn detect(&self, text: &str) -> Vec<Match> {
        static RE: OnceLock<Regex> = OnceLock::new();
        re(&RE, r"\b(\d{3})-(\d{2})-(\d{4})\b")
            .captures_iter(text)
            .filter_map(|caps| {
                let area: u32 = caps[1].parse().ok()?;
                let group: u32 = caps[2].parse().ok()?;
                let serial: u32 = caps[3].parse().ok()?;
                let valid = area != 0 && area != 666 && area < 900 && group != 0 && serial != 0;
                if !valid {
                    return None;
                }
                let m = caps.get(0)?;
                Some(Match {
                    start: m.start(),
                    end: m.end(),
                    value: m.as_str().to_string(),
                    bucket: "SSN",
                })
            })
            .collect()
    }
}

fn luhn_valid(digits: &str) -> bool {
    let mut sum = 0u32;
    let mut double = false;
    for c in digits.chars().rev() {
        let d = match c.to_digit(10) {
            Some(d) => d,
            None => return false,
        };
        let mut d = d;
        if double {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
        double = !double;
    }
    sum % 10 == 0
}

/// Visa/MasterCard/Amex/Discover numbers, Luhn-validated.
pub struct CreditCardDetector;
impl Detector for CreditCardDetector {
    fn id(&self) -> &'static str {
        "credit_card"
    }
    fn category(&self) -> &'static str {
        "financial"
    }
    fn priority(&self) -> i32 {
        35
    }
    fn detect(&self, text: &str) -> Vec<Match> {
        static RE: OnceLock<Regex> = OnceLock::new();
        re(&RE, r"\b(?:4\d{3}|5[1-5]\d{2}|3[47]\d{2}|6(?:011|5\d{2}))[ -]?\d{4}[ -]?\d{4}[ -]?\d{1,4}\b")
            .find_iter(text)
            .filter_map(|m| {
                let digits: String = m.as_str().chars().filter(|c| c.is_ascii_digit()).collect();
                if !luhn_valid(&digits) {
                    return None;
                }
                let bucket = match digits.as_bytes()[0] {
                    b'4' => "VISA",
                    b'3' => "AMEX",
                    b'6' => "DISC",
                    b'5' => "MC",
                    _ => "CARD",
                };
                Some(Match {
                    start: m.start(),
                    end: m.end(),
                    value: m.as_str().to_string(),
                    bucket,
                })
            })
            .collect()
    }
}

/// Emails, skipping already-anonymized `*@anon.com` addresses.
pub struct EmailDetector;
impl Detector for EmailDetector {
    fn id(&self) -> &'static str {
        "email"
    }
    fn category(&self) -> &'static str {
        "pii"
    }
    fn priority(&self) -> i32 {
        50
    }
    fn detect(&self, text: &str) -> Vec<Match> {
        static RE: OnceLock<Regex> = OnceLock::new();
        re(&RE, r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
            .find_iter(text)
            .filter(|m| !m.as_str().ends_with("@anon.com"))
            .map(|m| Match {
                start: m.start(),
                end: m.end(),
                value: m.as_str().to_string(),
                bucket: "EMAIL",
            })
            .collect()
    }
}

/// URLs carrying embedded `user:pass@` basic-auth credentials.
pub struct UrlBasicAuthDetector;
impl Detector for UrlBasicAuthDetector {
    fn id(&self) -> &'static str {
        "url_basic_auth"
    }
    fn category(&self) -> &'static str {
        "credentials"
    }
    fn priority(&self) -> i32 {
        25
    }
    fn detect(&self, text: &str) -> Vec<Match> {
        static RE: OnceLock<Regex> = OnceLock::new();
        re(&RE, r"https?://([^:/@\s]+):([^@/\s]+)@")
            .captures_iter(text)
            .filter_map(|caps| {
                let start = caps.get(1)?.start();
                let end = caps.get(2)?.end();
                Some(Match {
                    start,
                    end,
                    value: text[start..end].to_string(),
                    bucket: "redacted",
                })
            })
            .collect()
    }
}

/// US `NNN-NNN-NNNN` and E.164 `+NNNNNNNNNNN` phone numbers.
pub struct PhoneDetector;
impl Detector for PhoneDetector {
    fn id(&self) -> &'static str {
        "phone"
    }
    fn category(&self) -> &'static str {
        "pii"
    }
    fn priority(&self) -> i32 {
        60
    }
    fn detect(&self, text: &str) -> Vec<Match> {
        static US: OnceLock<Regex> = OnceLock::new();
        static E164: OnceLock<Regex> = OnceLock::new();
        let mut out: Vec<Match> = re(&US, r"\b\d{3}-\d{3}-\d{4}\b")
            .find_iter(text)
            .map(|m| Match {
                start: m.start(),
                end: m.end(),
                value: m.as_str().to_string(),
                bucket: "PHONE",
            })
            .collect();
        out.extend(re(&E164, r"\+\d{8,15}\b").find_iter(text).map(|m| Match {
            start: m.start(),
            end: m.end(),
            value: m.as_str().to_string(),
            bucket: "PHONE",
        }));
        out
    }
}

/// IPv4 addresses only (IPv6 is its own detector).
pub struct Ipv4Detector;
impl Detector for Ipv4Detector {
    fn id(&self) -> &'static str {
        "ipv4"
    }
    fn category(&self) -> &'static str {
        "network"
    }
    fn priority(&self) -> i32 {
        75
    }
    fn detect(&self, text: &str) -> Vec<Match> {
        static RE: OnceLock<Regex> = OnceLock::new();
        re(&RE, r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b")
            .find_iter(text)
            .map(|m| Match {
                start: m.start(),
                end: m.end(),
                value: m.as_str().to_string(),
                bucket: "IP",
            })
            .collect()
    }
}

/// Passport-like alphanumeric codes, gated on nearby "passport"/"document"
/// context so bare opaque codes aren't flagged everywhere (spec §4.3).
pub struct PassportDetector;
impl Detector for PassportDetector {
    fn id(&self) -> &'static str {
        "passport"
    }
    fn category(&self) -> &'static str {
        "pii"
    }
    fn priority(&self) -> i32 {
        65
    }
    fn detect(&self, text: &str) -> Vec<Match> {
        static RE: OnceLock<Regex> = OnceLock::new();
        static CONTEXT: OnceLock<Regex> = OnceLock::new();
        let context = re(&CONTEXT, r"(?i)passport|document");
        re(&RE, r"\b[A-Z]{1,2}[0-9]{6,9}\b")
            .find_iter(text)
            .filter(|m| {
                let window_start = m.start().saturating_sub(40);
                let window_end = (m.end() + 40).min(text.len());
                context.is_match(&text[window_start..window_end])
            })
            .map(|m| Match {
                start: m.start(),
                end: m.end(),
                value: m.as_str().to_string(),
                bucket: "PASSPORT",
            })
            .collect()
    }
}

const KNOWN_API_KEY_PREFIXES: &[&str] = &["sk-", "ghp_", "gho_", "github_pat_", "xoxb-", "AIza"];

fn shannon_entropy(s: &str) -> f64 {
    let mut counts = std::collections::HashMap::new();
    for c in s.chars() {
        *counts.entry(c).or_insert(0u32) += 1;
    }
    let len = s.len() as f64;
    counts
        .values()
        .map(|&c| {
            let p = c as f64 / len;
            -p * p.log2()
        })
        .sum()
}

fn char_classes(s: &str) -> usize {
    let mut classes = 0;
    if s.chars().any(|c| c.is_ascii_lowercase()) {
        classes += 1;
    }
    if s.chars().any(|c| c.is_ascii_uppercase()) {
        classes += 1;
    }
    if s.chars().any(|c| c.is_ascii_digit()) {
        classes += 1;
    }
    if s.chars().any(|c| !c.is_alphanumeric()) {
        classes += 1;
    }
    classes
}

/// Generic API keys: a known provider prefix, or high-entropy tokens with
/// at least three character classes (spec §4.3 custom logic #1).
pub struct ApiKeyDetector;
impl Detector for ApiKeyDetector {
    fn id(&self) -> &'static str {
        "api_key"
    }
    fn category(&self) -> &'static str {
        "credentials"
    }
    fn priority(&self) -> i32 {
        18
    }
    fn detect(&self, text: &str) -> Vec<Match> {
        static TOKEN: OnceLock<Regex> = OnceLock::new();
        re(&TOKEN, r"\b[A-Za-z0-9_-]{16,64}\b")
            .find_iter(text)
            .filter(|m| {
                let v = m.as_str();
                KNOWN_API_KEY_PREFIXES.iter().any(|p| v.starts_with(p))
                    || (shannon_entropy(v) >= 4.0 && char_classes(v) >= 3)
            })
            .map(|m| Match {
                start: m.start(),
                end: m.end(),
                value: m.as_str().to_string(),
                bucket: "APIKEY",
            })
            .collect()
    }
}

/// Provider prefix recognized by `ApiKeyDetector`, if any (used by the
/// registry to pick the `(prefix)[<token>]` envelope form from spec §6.1's
/// "Deanonymize" step 1).
pub fn known_api_key_prefix(value: &str) -> Option<&'static str> {
    KNOWN_API_KEY_PREFIXES.iter().copied().find(|p| value.starts_with(p))
}

/// `password: ...` / `pwd=...` style key-value assignments (spec §4.3
/// custom logic #2).
pub struct PasswordKvDetector;
impl Detector for PasswordKvDetector {
    fn id(&self) -> &'static str {
        "password_kv"
    }
    fn category(&self) -> &'static str {
        "credentials"
    }
    fn priority(&self) -> i32 {
        22
    }
    fn detect(&self, text: &str) -> Vec<Match> {
        static RE: OnceLock<Regex> = OnceLock::new();
        re(&RE, r#"(?i)\b(?:password|passwd|pwd)\b\s*[:=]\s*["']?([^\s"',;]{4,64})"#)
            .captures_iter(text)
            .filter_map(|caps| {
                let m = caps.get(1)?;
                Some(Match {
                    start: m.start(),
                    end: m.end(),
                    value: m.as_str().to_string(),
                    bucket: "REDACTED",
                })
            })
            .collect()
    }
}

const FAKE_FIRST_NAMES: &[&str] = &["Alex", "Jordan", "Taylor", "Morgan", "Casey", "Riley"];
const FAKE_LAST_NAMES: &[&str] = &["Rivera", "Chen", "Patel", "Novak", "Haddad", "Larsen"];
const KNOWN_FIRST_NAMES: &[&str] = &[
    "James", "Mary", "John", "Patricia", "Robert", "Jennifer", "Michael", "Linda", "David", "Elizabeth",
    "William", "Barbara", "Richard", "Susan", "Joseph", "Jessica", "Thomas", "Sarah", "Charles", "Karen",
];

/// Proper-name detection gated on greeting/attribution context (spec §4.3
/// custom logic #3). Deliberately conservative: a dictionary of common
/// given names plus a handful of context cues, not a full NER model.
pub struct NameDetector;
impl Detector for NameDetector {
    fn id(&self) -> &'static str {
        "name"
    }
    fn category(&self) -> &'static str {
        "pii"
    }
    fn priority(&self) -> i32 {
        95
    }
    fn detect(&self, text: &str) -> Vec<Match> {
        static FULL_NAME: OnceLock<Regex> = OnceLock::new();
        static CONTEXT: OnceLock<Regex> = OnceLock::new();
        let names: HashSet<&str> = KNOWN_FIRST_NAMES.iter().copied().collect();
        let context = re(
            &CONTEXT,
            r"(?i)author:|dear\s|hi\s|hello\s|regards,|sincerely,|signed,",
        );
        re(&FULL_NAME, r"\b([A-Z][a-z]+)\s([A-Z][a-z]+)\b")
            .find_iter(text)
            .filter(|m| {
                let first = &m.as_str()[..m.as_str().find(' ').unwrap_or(m.as_str().len())];
                if !names.contains(first) {
                    return false;
                }
                let window_start = m.start().saturating_sub(30);
                context.is_match(&text[window_start..m.start()])
            })
            .map(|m| Match {
                start: m.start(),
                end: m.end(),
                value: m.as_str().to_string(),
                bucket: "NAME",
            })
            .collect()
    }
}

/// Deterministic fake-name pool lookup, keyed by an HMAC-derived index over
/// the original name (spec §6.3 "drawn deterministically from fixed fake
/// pools keyed by HMAC").
pub fn fake_name_for(key: &[u8; 32], original: &str) -> String {
    let digest = super::crypto::keyed_index(key, original);
    let first = FAKE_FIRST_NAMES[(digest[0] as usize) % FAKE_FIRST_NAMES.len()];
    let last = FAKE_LAST_NAMES[(digest[1] as usize) % FAKE_LAST_NAMES.len()];
    format!("{first} {last}")
}

/// Deterministic fake IPv4, keyed the same way as `fake_name_for` (spec
/// §6.3 "Email: plain fake", "IPv4: `[IP-<fakeIPv4>-...]`").
pub fn fake_ipv4_for(key: &[u8; 32], original: &str) -> String {
    let digest = super::crypto::keyed_index(key, original);
    format!("{}.{}.{}.{}", digest[2], digest[3], digest[4], digest[5])
}

/// Deterministic fake email local-part, `first.lastNN@anon.com`.
pub fn fake_email_for(key: &[u8; 32], original: &str) -> String {
    let digest = super::crypto::keyed_index(key, original);
    let first = FAKE_FIRST_NAMES[(digest[0] as usize) % FAKE_FIRST_NAMES.len()].to_lowercase();
    let last = FAKE_LAST_NAMES[(digest[1] as usize) % FAKE_LAST_NAMES.len()].to_lowercase();
    let suffix = (digest[2] as u32) % 100;
    format!("{first}.{last}{suffix:02}@anon.com")
}

/// All fifteen detectors, in registration order (the registry sorts by
/// priority before running them).
pub fn all_detectors() -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(PrivateKeyDetector),
        Box::new(AwsKeyDetector),
        Box::new(ApiKeyDetector),
        Box::new(UrlBasicAuthDetector),
        Box::new(PasswordKvDetector),
        Box::new(JwtDetector),
        Box::new(IbanDetector),
        Box::new(SsnDetector),
        Box::new(CreditCardDetector),
        Box::new(EmailDetector),
        Box::new(PhoneDetector),
        Box::new(PassportDetector),
        Box::new(Ipv4Detector),
        Box::new(Ipv6Detector),
        Box::new(AddressDetector),
        Box::new(NameDetector),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssn_validator_rejects_invalid_area() {
        let d = SsnDetector;
        assert!(d.detect("my ssn is 666-12-3456").is_empty());
        assert_eq!(d.detect("my ssn is 123-45-6789").len(), 1);
    }

    #[test]
    fn email_skips_anon_domain() {
        let d = EmailDetector;
        assert!(d.detect("alice.smith01@anon.com").is_empty());
        assert_eq!(d.detect("alice@example.com").len(), 1);
    }

    #[test]
    fn credit_card_requires_luhn_validity() {
        let d = CreditCardDetector;
        assert_eq!(d.detect("4111 1111 1111 1111").len(), 1);
        assert!(d.detect("4111 1111 1111 1112").is_empty());
    }

    #[test]
    fn passport_requires_nearby_context() {
        let d = PassportDetector;
        assert!(d.detect("tracking code AB1234567 in the warehouse").is_empty());
        assert_eq!(d.detect("my passport number is AB1234567").len(), 1);
    }

    #[test]
    fn fake_generators_are_deterministic() {
        let key = [3u8; 32];
        assert_eq!(fake_name_for(&key, "John Smith"), fake_name_for(&key, "John Smith"));
        assert_eq!(fake_ipv4_for(&key, "10.0.0.1"), fake_ipv4_for(&key, "10.0.0.1"));
    }
}
