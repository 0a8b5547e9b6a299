use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Risk bucket reported by the analyst, in the wording the front-end expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "低风险")]
    Low,
    #[serde(rename = "中等风险")]
    Medium,
    #[serde(rename = "高风险")]
    High,
}

impl RiskLevel {
    /// Normalizes free-form risk wording ("风险较高", "中等", "low") into a
    /// bucket, if any is recognizable.
    pub fn from_text(text: &str) -> Option<RiskLevel> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let lower = text.to_lowercase();
        if text.contains('低') || lower.contains("low") {
            Some(RiskLevel::Low)
        } else if text.contains('高') || lower.contains("high") {
            Some(RiskLevel::High)
        } else if text.contains('中') || lower.contains("medium") || lower.contains("moderate") {
            Some(RiskLevel::Medium)
        } else {
            None
        }
    }
}

/// Terminal output of an analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisEnvelope {
    pub summary: String,
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
    pub risk_level: Option<RiskLevel>,
    pub confidence: Option<f64>,
    /// The model's final prose, verbatim.
    pub raw: String,
}

/// Loose mirror of the envelope used for parsing model output, where every
/// field may be missing or oddly typed.
#[derive(Debug, Deserialize)]
struct LooseEnvelope {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    insights: Option<Vec<String>>,
    #[serde(default)]
    recommendations: Option<Vec<String>>,
    #[serde(default)]
    risk_level: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

impl AnalysisEnvelope {
    /// Parses the model's final prose into a structured envelope.
    ///
    /// A fenced JSON block matching the envelope shape wins; otherwise the
    /// text is scanned for the Chinese section headings the prompt asks for.
    /// Unextracted fields stay empty or null.
    pub fn from_prose(prose: &str) -> AnalysisEnvelope {
        if let Some(envelope) = Self::from_fenced_json(prose) {
            return envelope;
        }
        Self::from_headings(prose)
    }

    fn from_fenced_json(prose: &str) -> Option<AnalysisEnvelope> {
        static FENCE: OnceLock<Regex> = OnceLock::new();
        let fence = FENCE.get_or_init(|| {
            Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fence regex")
        });

        let block = fence.captures(prose)?.get(1)?.as_str();
        let loose: LooseEnvelope = serde_json::from_str(block).ok()?;
        let summary = loose.summary.unwrap_or_default();
        if summary.trim().is_empty() {
            return None;
        }
        Some(AnalysisEnvelope {
            summary,
            insights: loose.insights.unwrap_or_default(),
            recommendations: loose.recommendations.unwrap_or_default(),
            risk_level: loose.risk_level.as_deref().and_then(RiskLevel::from_text),
            confidence: loose.confidence.filter(|c| (0.0..=1.0).contains(c)),
            raw: prose.to_string(),
        })
    }

    fn from_headings(prose: &str) -> AnalysisEnvelope {
        #[derive(Clone, Copy)]
        enum Section {
            None,
            Summary,
            Insights,
            Recommendations,
            Risk,
            Confidence,
        }

        // Fenced blocks that failed structured parsing are noise here.
        static ANY_FENCE: OnceLock<Regex> = OnceLock::new();
        let any_fence =
            ANY_FENCE.get_or_init(|| Regex::new(r"(?s)```.*?```").expect("fence regex"));
        let cleaned = any_fence.replace_all(prose, "");

        let mut summary_lines: Vec<String> = Vec::new();
        let mut insights = Vec::new();
        let mut recommendations = Vec::new();
        let mut risk_text = String::new();
        let mut confidence_text = String::new();
        let mut section = Section::None;

        for line in cleaned.lines() {
            let trimmed = line
                .trim()
                .trim_start_matches(['#', '*', '-', '·', '•'])
                .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')' || c == '、')
                .trim();
            if trimmed.is_empty() {
                continue;
            }

            let heading = heading_of(trimmed);
            if let Some((new_section, rest)) = heading {
                section = match new_section {
                    "summary" => Section::Summary,
                    "insights" => Section::Insights,
                    "recommendations" => Section::Recommendations,
                    "risk" => Section::Risk,
                    _ => Section::Confidence,
                };
                if !rest.is_empty() {
                    match section {
                        Section::Summary => summary_lines.push(rest.to_string()),
                        Section::Insights => insights.push(rest.to_string()),
                        Section::Recommendations => recommendations.push(rest.to_string()),
                        Section::Risk => risk_text.push_str(rest),
                        Section::Confidence => confidence_text.push_str(rest),
                        Section::None => {}
                    }
                }
                continue;
            }

            let item = trimmed;
            match section {
                Section::Summary => summary_lines.push(item.to_string()),
                Section::Insights => insights.push(item.to_string()),
                Section::Recommendations => recommendations.push(item.to_string()),
                Section::Risk => risk_text.push_str(item),
                Section::Confidence => confidence_text.push_str(item),
                // Prose before the first heading doubles as the summary.
                Section::None => summary_lines.push(item.to_string()),
            }
        }

        AnalysisEnvelope {
            summary: summary_lines.join(" "),
            insights,
            recommendations,
            risk_level: RiskLevel::from_text(&risk_text),
            confidence: parse_confidence(&confidence_text),
            raw: prose.to_string(),
        }
    }
}

/// Classifies a line as a section heading, returning the section key and any
/// content that follows the heading separator on the same line.
///
/// The marker must lead the line and be followed by a separator within a
/// couple of characters ("风险：", "风险提示："), so sentences that merely
/// mention a marker word ("风险偏好上升") stay content.
fn heading_of(line: &str) -> Option<(&'static str, &str)> {
    const HEADINGS: &[(&str, &'static str)] = &[
        ("总结", "summary"),
        ("摘要", "summary"),
        ("洞察", "insights"),
        ("要点", "insights"),
        ("发现", "insights"),
        ("建议", "recommendations"),
        ("风险", "risk"),
        ("置信度", "confidence"),
    ];

    let line = line.trim_start_matches(['【', '[']);
    for &(marker, key) in HEADINGS {
        let Some(rest) = line.strip_prefix(marker) else {
            continue;
        };
        if rest.is_empty() {
            return Some((key, ""));
        }
        if rest.starts_with([':', '：', ' ', '】', ']']) {
            let content = rest.trim_start_matches([':', '：', ' ', '】', ']']).trim();
            return Some((key, content));
        }
        // Allow a short qualifier between marker and separator, e.g. 风险提示：
        if let Some(sep) = rest.find([':', '：']) {
            if sep <= 9 {
                let content = rest[sep..].trim_start_matches([':', '：']).trim();
                return Some((key, content));
            }
        }
    }
    None
}

fn parse_confidence(text: &str) -> Option<f64> {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    let number = NUMBER.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)\s*(%?)").expect("number regex"));

    let captures = number.captures(text)?;
    let mut value: f64 = captures.get(1)?.as_str().parse().ok()?;
    if captures.get(2).is_some_and(|m| m.as_str() == "%") || value > 1.0 {
        value /= 100.0;
    }
    (0.0..=1.0).contains(&value).then_some(value)
}
