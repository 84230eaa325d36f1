// src/summarize/mod.rs
//! LLM synthesis: binding, prompt protocol, validation, derivation.
//!
//! Every selected item gets a stable 1-based `SOURCE_ID` for the prompt; the
//! model must cite ids from that list and nothing else. The response is
//! parsed into a strict schema, repaired once on failure, and validated:
//! out-of-range citations drop the offending insight, duplicates collapse,
//! confidence and priority are derived here rather than trusted from the
//! model, and surviving `[SOURCE_ID:k]` markers are re-bound to `[k]`
//! footnotes with the canonical URL resolved per id, so the report never
//! carries prompt-side markers. When the model cannot be reached at all the
//! summariser returns an honest empty result with `llm_failed` set; it
//! never fabricates content.

pub mod client;

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::scoring::{ScoredItem, Urgency};
use crate::vendors::VendorDictionary;
use client::{DynLlmClient, LlmError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Alpha,
    Beta,
    Gamma,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Pricing,
    Procurement,
    Strategy,
}

/// A selected item under its invocation-scoped SOURCE_ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundSource {
    pub source_id: usize,
    pub url: String,
    pub title: String,
    pub source_kind: crate::ingest::types::SourceKind,
    pub posted_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip)]
    pub urgency: Urgency,
    #[serde(skip)]
    pub vendors: BTreeSet<String>,
    /// Body text, prompt-side only; never serialised into the report.
    #[serde(skip)]
    pub body: String,
}

/// Validated, derived insight. `text` carries `[k]` footnote markers;
/// `citations` resolves each `k` to the cited source's canonical URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub text: String,
    pub priority: Priority,
    pub confidence: Confidence,
    pub role: Role,
    pub cited_source_ids: BTreeSet<usize>,
    pub citations: BTreeMap<usize, String>,
    #[serde(default)]
    pub redundant: bool,
}

/// The model's declared output schema.
#[derive(Debug, Clone, Deserialize)]
struct LlmSummary {
    insights: Vec<LlmInsight>,
    #[serde(default)]
    executive_summary: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmInsight {
    role: Role,
    text: String,
    claimed_priority: Priority,
}

/// Outcome of one parse attempt over a raw model response.
#[derive(Debug)]
enum ParseOutcome {
    Ok(LlmSummary),
    /// Worth one repair round-trip (fences, prose, schema drift).
    Repairable(String),
    /// Nothing to repair (empty response).
    Fatal(String),
}

#[derive(Debug, Default)]
pub struct SummaryOutcome {
    pub insights: Vec<Insight>,
    pub executive_summary: String,
    pub llm_failed: bool,
    /// Insights dropped by binding validation.
    pub llm_dropped: usize,
    pub tokens_used: u64,
}

static SOURCE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[SOURCE_ID:(\d+)\]").expect("marker regex"));

// Currency amounts, percentages, spelled-out percents, grouped counts.
static QUANTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[$€£]\s*\d[\d,]*(?:\.\d+)?|\b\d+(?:\.\d+)?\s*%|\b\d+(?:\.\d+)?\s*percent\b|\b\d{1,3}(?:,\d{3})+\b")
        .expect("quantifier regex")
});

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));

static PROFANITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:fuck\w*|shit\w*|damn|bitch|bastard|asshole|crap)\b")
        .expect("profanity regex")
});

/// Quantitative tokens present in `text` (currency, percent, counts).
pub fn quantifiers_in(text: &str) -> Vec<String> {
    QUANTIFIER
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Collapse whitespace and mask profanity; report text stays professional
/// without losing context.
pub fn sanitize_insight_text(text: &str) -> String {
    let collapsed = WHITESPACE.replace_all(text.trim(), " ").to_string();
    PROFANITY
        .replace_all(&collapsed, |caps: &regex::Captures<'_>| {
            "*".repeat(caps[0].len())
        })
        .to_string()
}

/// Assign 1-based SOURCE_IDs in selection order.
pub fn bind_sources(selected: &[ScoredItem]) -> Vec<BoundSource> {
    selected
        .iter()
        .enumerate()
        .map(|(idx, s)| BoundSource {
            source_id: idx + 1,
            url: s.item.url.clone(),
            title: s.item.title.clone(),
            source_kind: s.item.source_kind,
            posted_at: s.item.posted_at,
            urgency: s.score.urgency,
            vendors: s.score.vendors_detected.clone(),
            body: s.item.body.clone(),
        })
        .collect()
}

const SYSTEM_PROMPT: &str = "You are a senior intelligence analyst for a North American IT \
solutions provider. You specialise in vendor pricing intelligence, supply-chain analysis and \
competitive market intelligence for technology distribution.";

fn build_prompt(bindings: &[BoundSource], excerpt_max_chars: usize) -> String {
    let mut prompt = String::with_capacity(4096);
    prompt.push_str(
        "Analyse the sources below and produce role-tagged pricing intelligence.\n\n\
ROLES (every insight is written for exactly one):\n\
- pricing: margin impacts, SKU/list price changes, vendor discounts\n\
- procurement: supply risk, vendor terms, fulfilment, contract changes\n\
- strategy: M&A, partner-program shifts, market consolidation\n\n\
OUTPUT: a single JSON object, nothing else:\n\
{\n  \"insights\": [\n    {\"role\": \"pricing|procurement|strategy\",\n     \
\"text\": \"... [SOURCE_ID:k] ...\",\n     \"claimed_priority\": \"alpha|beta|gamma\"}\n  ],\n  \
\"executive_summary\": \"single paragraph\"\n}\n\n\
RULES:\n\
1. Every insight MUST cite at least one [SOURCE_ID:k] where k is an id listed below.\n\
2. Every insight MUST carry quantitative detail (amount, percentage, count) OR a specific \
vendor action.\n\
3. NEVER invent prices, companies or dates that do not appear in a cited source.\n\
4. claimed_priority: alpha = act now, beta = notable, gamma = watch.\n\
5. Return ONLY the JSON object. No markdown fences, no commentary.\n\n\
SOURCES:\n",
    );
    for b in bindings {
        let excerpt: String = b.body.chars().take(excerpt_max_chars).collect();
        prompt.push_str(&format!("SOURCE_ID: {}\nTITLE: {}\n", b.source_id, b.title));
        if !excerpt.is_empty() && excerpt != b.title {
            prompt.push_str(&format!("EXCERPT: {excerpt}\n"));
        }
        if !b.vendors.is_empty() {
            let vendors: Vec<&str> = b.vendors.iter().map(String::as_str).collect();
            prompt.push_str(&format!("VENDORS: {}\n", vendors.join(", ")));
        }
        prompt.push_str(&format!("URGENCY: {}\nURL: {}\n---\n", b.urgency, b.url));
    }
    prompt
}

/// Strip markdown fences and surrounding prose, then parse the schema.
fn parse_response(raw: &str) -> ParseOutcome {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return ParseOutcome::Fatal("empty response".into());
    }
    let mut content = trimmed.to_string();
    static FENCE_OPEN: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^```(?:json)?\s*").expect("fence regex"));
    static FENCE_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*```$").expect("fence regex"));
    content = FENCE_OPEN.replace(&content, "").to_string();
    content = FENCE_CLOSE.replace(&content, "").to_string();

    // Trim leading prose up to the first brace and trailing junk past the
    // last one; models love to narrate around the payload.
    let Some(start) = content.find('{') else {
        return ParseOutcome::Repairable("no JSON object in response".into());
    };
    let Some(end) = content.rfind('}') else {
        return ParseOutcome::Repairable("unterminated JSON object".into());
    };
    if end < start {
        return ParseOutcome::Repairable("malformed JSON object".into());
    }
    match serde_json::from_str::<LlmSummary>(&content[start..=end]) {
        Ok(summary) => ParseOutcome::Ok(summary),
        Err(e) => ParseOutcome::Repairable(format!("schema violation: {e}")),
    }
}

pub struct Summarizer {
    client: DynLlmClient,
    excerpt_max_chars: usize,
}

impl Summarizer {
    pub fn new(client: DynLlmClient, excerpt_max_chars: usize) -> Self {
        Self {
            client,
            excerpt_max_chars,
        }
    }

    pub async fn summarize(
        &self,
        bindings: &[BoundSource],
        dict: &VendorDictionary,
    ) -> SummaryOutcome {
        if bindings.is_empty() {
            return SummaryOutcome::default();
        }

        let prompt = build_prompt(bindings, self.excerpt_max_chars);
        debug!(target: "summarize", sources = bindings.len(), prompt = %prompt, "llm prompt built");
        let mut tokens_used = 0u64;

        let first = self.client.complete(SYSTEM_PROMPT, &prompt).await;
        let summary = match first {
            Ok(resp) => {
                debug!(target: "summarize", response = %resp.content, "llm raw response");
                tokens_used += u64::from(resp.tokens_used);
                match parse_response(&resp.content) {
                    ParseOutcome::Ok(s) => Some(s),
                    ParseOutcome::Fatal(reason) => {
                        warn!(%reason, "llm response unusable");
                        None
                    }
                    ParseOutcome::Repairable(reason) => {
                        debug!(%reason, "llm response malformed, sending repair prompt");
                        self.repair(&prompt, &reason, &mut tokens_used).await
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "llm call failed, retrying once");
                self.retry_transport(&prompt, e, &mut tokens_used).await
            }
        };

        let Some(summary) = summary else {
            return SummaryOutcome {
                llm_failed: true,
                tokens_used,
                ..SummaryOutcome::default()
            };
        };

        let (insights, dropped) = validate_insights(summary.insights, bindings, dict);
        SummaryOutcome {
            insights,
            executive_summary: sanitize_insight_text(&summary.executive_summary),
            llm_failed: false,
            llm_dropped: dropped,
            tokens_used,
        }
    }

    async fn repair(
        &self,
        prompt: &str,
        reason: &str,
        tokens_used: &mut u64,
    ) -> Option<LlmSummary> {
        let repair_prompt = format!(
            "{prompt}\n\nYour previous response was rejected: {reason}. \
Return ONLY the JSON object matching the schema above, with no other text."
        );
        match self.client.complete(SYSTEM_PROMPT, &repair_prompt).await {
            Ok(resp) => {
                *tokens_used += u64::from(resp.tokens_used);
                match parse_response(&resp.content) {
                    ParseOutcome::Ok(s) => Some(s),
                    ParseOutcome::Repairable(r) | ParseOutcome::Fatal(r) => {
                        warn!(reason = %r, "repair attempt failed, soft-failing");
                        None
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "repair call failed, soft-failing");
                None
            }
        }
    }

    async fn retry_transport(
        &self,
        prompt: &str,
        first_err: LlmError,
        tokens_used: &mut u64,
    ) -> Option<LlmSummary> {
        // Credentials and budget problems will not fix themselves mid-run.
        if matches!(first_err, LlmError::Unavailable | LlmError::BudgetExhausted) {
            return None;
        }
        match self.client.complete(SYSTEM_PROMPT, prompt).await {
            Ok(resp) => {
                *tokens_used += u64::from(resp.tokens_used);
                match parse_response(&resp.content) {
                    ParseOutcome::Ok(s) => Some(s),
                    ParseOutcome::Repairable(r) | ParseOutcome::Fatal(r) => {
                        warn!(reason = %r, "retry response malformed, soft-failing");
                        None
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "llm retry failed, soft-failing");
                None
            }
        }
    }
}

/// Binding validation, duplicate collapse, and post-hoc derivation.
fn validate_insights(
    raw: Vec<LlmInsight>,
    bindings: &[BoundSource],
    dict: &VendorDictionary,
) -> (Vec<Insight>, usize) {
    let n = bindings.len();
    let mut out: Vec<Insight> = Vec::with_capacity(raw.len());
    let mut seen_texts: BTreeSet<String> = BTreeSet::new();
    let mut dropped = 0usize;

    for raw_insight in raw {
        let text = sanitize_insight_text(&raw_insight.text);

        let cited: BTreeSet<usize> = SOURCE_MARKER
            .captures_iter(&text)
            .filter_map(|c| c[1].parse::<usize>().ok())
            .collect();

        // Binding integrity: unknown or missing citations kill the insight.
        if cited.is_empty() || cited.iter().any(|&k| k == 0 || k > n) {
            debug!(text = %text, "dropping insight with invalid source bindings");
            dropped += 1;
            continue;
        }

        // Collapse duplicates on normalised text, first one wins.
        let normalised = SOURCE_MARKER
            .replace_all(&text, "")
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if !seen_texts.insert(normalised) {
            continue;
        }

        let cited_sources: Vec<&BoundSource> =
            cited.iter().map(|&k| &bindings[k - 1]).collect();

        let quantifiers = quantifiers_in(&text);
        let has_quantifier = !quantifiers.is_empty();
        let vendor_mentioned = !dict.match_text(&text).vendors.is_empty();
        // Tier-1/2 vendors carry a confidence boost of 0.20 or better.
        let cites_major_vendor = cited_sources
            .iter()
            .flat_map(|s| s.vendors.iter())
            .any(|v| dict.confidence_boost(v) >= 0.20);

        let confidence = if cited.len() >= 3 && has_quantifier {
            Confidence::High
        } else if cited.len() >= 2 || (cites_major_vendor && has_quantifier) {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        let derived_priority = if cited_sources.iter().any(|s| s.urgency == Urgency::High) {
            Priority::Alpha
        } else if cited_sources.iter().any(|s| s.urgency == Urgency::Medium) {
            Priority::Beta
        } else {
            Priority::Gamma
        };
        // The model may escalate, never demote.
        let priority = derived_priority.min(raw_insight.claimed_priority);

        let redundant = !vendor_mentioned && !has_quantifier;

        // Re-bind footnote markers: prompt-side `[SOURCE_ID:k]` becomes a
        // plain `[k]` footnote, with the canonical URL resolved per id.
        let citations: BTreeMap<usize, String> = cited
            .iter()
            .map(|&k| (k, bindings[k - 1].url.clone()))
            .collect();
        let text = SOURCE_MARKER
            .replace_all(&text, |caps: &regex::Captures<'_>| format!("[{}]", &caps[1]))
            .to_string();
        let text = if redundant {
            format!("[REDUNDANT] {text}")
        } else {
            text
        };

        out.push(Insight {
            text,
            priority,
            confidence,
            role: raw_insight.role,
            cited_source_ids: cited,
            citations,
            redundant,
        });
    }

    (out, dropped)
}
