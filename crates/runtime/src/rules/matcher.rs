//! Pure content-vs-snapshot matching.

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{RuleAction, RuleSnapshot};
use crate::types::{RequestId, Verdict, VerdictSource};

const EMAIL_PATTERN: &str = r"[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,4}";

/// A run of exactly `digits` ASCII digits. The boundaries are ASCII-only so
/// that CJK text directly around the number still counts as a boundary.
pub fn phone_pattern(digits: usize) -> String {
    format!(r"(?-u:\b)[0-9]{{{}}}(?-u:\b)", digits)
}

/// Secondary PII detectors applied after the rule list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PiiPolicy {
    pub detect_email: bool,
    /// Exact digit count of a local phone number; `None` disables the check.
    pub phone_digits: Option<usize>,
}

impl Default for PiiPolicy {
    fn default() -> Self {
        Self {
            detect_email: true,
            phone_digits: Some(11),
        }
    }
}

/// Matches content against a [`RuleSnapshot`] plus the PII detectors.
///
/// Holds no mutable state, so one instance can be shared by every request.
#[derive(Debug, Clone)]
pub struct RuleMatcher {
    email: Option<Regex>,
    phone: Option<Regex>,
}

impl RuleMatcher {
    pub fn new(policy: &PiiPolicy) -> Result<Self, regex::Error> {
        let email = if policy.detect_email {
            Some(Regex::new(EMAIL_PATTERN)?)
        } else {
            None
        };
        let phone = match policy.phone_digits {
            Some(digits) if digits > 0 => Some(Regex::new(&phone_pattern(digits))?),
            _ => None,
        };
        Ok(Self { email, phone })
    }

    /// Decide on `content` using exactly the rules in `snapshot`.
    ///
    /// The first matching block rule wins. Allow rules never whitelist; they
    /// simply do not block. PII detectors run only when no rule blocked.
    pub fn match_content(
        &self,
        request_id: RequestId,
        content: &str,
        snapshot: &RuleSnapshot,
    ) -> Verdict {
        let lowered = content.to_lowercase();

        for compiled in snapshot.rules() {
            let rule = compiled.rule();
            if rule.action != RuleAction::Block || !compiled.matches(content, &lowered) {
                continue;
            }
            let reason = if rule.description.is_empty() {
                format!("matched {} rule '{}'", rule.kind.as_str(), rule.pattern)
            } else {
                format!(
                    "matched {} rule '{}' ({})",
                    rule.kind.as_str(),
                    rule.pattern,
                    rule.description
                )
            };
            return Verdict::block(request_id, reason, VerdictSource::RuleTier);
        }

        // The email pattern is lowercase-only, so search the lowered text.
        if let Some(re) = &self.email {
            if re.is_match(&lowered) {
                return Verdict::block(
                    request_id,
                    "contains an email address",
                    VerdictSource::RuleTier,
                );
            }
        }
        if let Some(re) = &self.phone {
            if re.is_match(content) {
                return Verdict::block(
                    request_id,
                    "contains a phone number",
                    VerdictSource::RuleTier,
                );
            }
        }

        Verdict::allow(request_id, "no rule matched", VerdictSource::RuleTier)
    }
}
