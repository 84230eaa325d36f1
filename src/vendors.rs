//! Vendor dictionary: canonical names, aliases, tiers, acquisition graph.
//!
//! The dictionary is static data loaded once at startup and shared read-only
//! across workers. Matching is case-insensitive with word-boundary semantics;
//! a substring inside a longer word never counts as a hit. When aliases
//! overlap within one span, the longest alias wins.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VendorEntry {
    #[serde(default)]
    pub aliases: Vec<String>,
    pub tier: u8,
    /// Tier-1 consolidator: its acquisitions carry extra scoring weight.
    #[serde(default)]
    pub consolidator: bool,
    /// Member of the cloud-security platform set.
    #[serde(default)]
    pub cloud_security: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AcquisitionEdge {
    pub acquirer: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

/// On-disk shape; roundtrips through TOML unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DictionaryFile {
    pub vendors: BTreeMap<String, VendorEntry>,
    #[serde(default)]
    pub acquisitions: Vec<AcquisitionEdge>,
}

/// Result of matching a text against the dictionary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VendorMatch {
    pub vendors: BTreeSet<String>,
    /// canonical -> aliases that actually hit, in match order.
    pub hits: BTreeMap<String, Vec<String>>,
}

struct CompiledVendor {
    canonical: String,
    re: Regex,
}

pub struct VendorDictionary {
    entries: BTreeMap<String, VendorEntry>,
    acquisitions: Vec<AcquisitionEdge>,
    compiled: Vec<CompiledVendor>,
    /// target -> acquirers, prebuilt for the chain walk.
    acquirers_of: HashMap<String, Vec<String>>,
}

impl VendorDictionary {
    pub fn load_from(path: &Path) -> Result<Self, PipelineError> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "reading vendor dictionary {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, PipelineError> {
        let file: DictionaryFile =
            toml::from_str(s).map_err(|e| PipelineError::Config(format!("vendor dictionary: {e}")))?;
        Self::build(file)
    }

    pub fn build(file: DictionaryFile) -> Result<Self, PipelineError> {
        // Aliases must be unique across the whole dictionary (canonical names
        // count as aliases of themselves).
        let mut seen: HashMap<String, String> = HashMap::new();
        for (canonical, entry) in &file.vendors {
            if !(1..=4).contains(&entry.tier) {
                return Err(PipelineError::Config(format!(
                    "vendor `{canonical}`: tier must be 1..=4, got {}",
                    entry.tier
                )));
            }
            for alias in entry.aliases.iter().map(String::as_str).chain([canonical.as_str()]) {
                let key = alias.to_lowercase();
                if let Some(prev) = seen.insert(key, canonical.clone()) {
                    if prev != *canonical {
                        return Err(PipelineError::Config(format!(
                            "alias `{alias}` claimed by both `{prev}` and `{canonical}`"
                        )));
                    }
                }
            }
        }

        for edge in &file.acquisitions {
            for name in [&edge.acquirer, &edge.target] {
                if !file.vendors.contains_key(name) {
                    return Err(PipelineError::Config(format!(
                        "acquisition edge references unknown vendor `{name}`"
                    )));
                }
            }
        }
        detect_cycles(&file.acquisitions)?;

        let mut compiled = Vec::with_capacity(file.vendors.len());
        for (canonical, entry) in &file.vendors {
            // Longest alias first so overlapping aliases resolve to the
            // longest hit within a single alternation.
            let mut terms: Vec<&str> = entry
                .aliases
                .iter()
                .map(String::as_str)
                .chain([canonical.as_str()])
                .collect();
            terms.sort_by_key(|t| std::cmp::Reverse(t.len()));
            let pattern = format!(
                r"(?i)\b(?:{})\b",
                terms
                    .iter()
                    .map(|t| regex::escape(t))
                    .collect::<Vec<_>>()
                    .join("|")
            );
            let re = Regex::new(&pattern).map_err(|e| {
                PipelineError::Config(format!("vendor `{canonical}` pattern: {e}"))
            })?;
            compiled.push(CompiledVendor {
                canonical: canonical.clone(),
                re,
            });
        }

        let mut acquirers_of: HashMap<String, Vec<String>> = HashMap::new();
        for edge in &file.acquisitions {
            acquirers_of
                .entry(edge.target.clone())
                .or_default()
                .push(edge.acquirer.clone());
        }
        for v in acquirers_of.values_mut() {
            v.sort();
            v.dedup();
        }

        Ok(Self {
            entries: file.vendors,
            acquisitions: file.acquisitions,
            compiled,
            acquirers_of,
        })
    }

    /// All canonical vendors present in `text` as whole words, with the
    /// aliases that hit.
    pub fn match_text(&self, text: &str) -> VendorMatch {
        let mut out = VendorMatch::default();
        for cv in &self.compiled {
            let hits: Vec<String> = cv
                .re
                .find_iter(text)
                .map(|m| m.as_str().to_lowercase())
                .collect();
            if !hits.is_empty() {
                out.vendors.insert(cv.canonical.clone());
                out.hits.insert(cv.canonical.clone(), hits);
            }
        }
        out
    }

    /// Walk the acquisition DAG from `vendor` following target -> acquirer
    /// edges, returning the acquirers in breadth-first order.
    pub fn acquisition_chain(&self, vendor: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut queue: Vec<&str> = vec![vendor];
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        while let Some(v) = queue.pop() {
            if let Some(acqs) = self.acquirers_of.get(v) {
                for a in acqs {
                    if seen.insert(a.as_str()) {
                        chain.push(a.clone());
                        queue.push(a.as_str());
                    }
                }
            }
        }
        chain
    }

    /// Direct acquirers of `vendor`, if any.
    pub fn acquirers_of(&self, vendor: &str) -> &[String] {
        self.acquirers_of
            .get(vendor)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether `vendor` appears on either side of any acquisition edge.
    pub fn in_acquisition(&self, vendor: &str) -> bool {
        self.acquisitions
            .iter()
            .any(|e| e.acquirer == vendor || e.target == vendor)
    }

    pub fn tier(&self, vendor: &str) -> Option<u8> {
        self.entries.get(vendor).map(|e| e.tier)
    }

    pub fn is_consolidator(&self, vendor: &str) -> bool {
        self.entries.get(vendor).map(|e| e.consolidator).unwrap_or(false)
    }

    pub fn is_cloud_security(&self, vendor: &str) -> bool {
        self.entries
            .get(vendor)
            .map(|e| e.cloud_security)
            .unwrap_or(false)
    }

    pub fn confidence_boost(&self, vendor: &str) -> f64 {
        match self.tier(vendor) {
            Some(1) => 0.30,
            Some(2) => 0.20,
            Some(3) => 0.10,
            _ => 0.0,
        }
    }

    pub fn tier_weight(&self, vendor: &str) -> f64 {
        match self.tier(vendor) {
            Some(1) => 3.0,
            Some(2) => 2.0,
            Some(3) => 1.5,
            _ => 1.0,
        }
    }

    /// Tier-1 vendor mentioned in `text`? Used by the forum quality filter
    /// to rescue low-engagement posts about vendors that always matter.
    pub fn tier1_mentioned(&self, text: &str) -> bool {
        self.match_text(text)
            .vendors
            .iter()
            .any(|v| self.tier(v) == Some(1))
    }

    pub fn canonicals(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn tier1_canonicals(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, e)| e.tier == 1)
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

/// Reject cycles in the target -> acquirer edge set. Iterative DFS with
/// three-colour marking over the canonical names.
fn detect_cycles(edges: &[AcquisitionEdge]) -> Result<(), PipelineError> {
    let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();
    for e in edges {
        adj.entry(e.target.as_str()).or_default().push(e.acquirer.as_str());
    }
    let mut done: HashSet<&str> = HashSet::new();
    for start in adj.keys().copied() {
        if done.contains(start) {
            continue;
        }
        let mut in_path: HashSet<&str> = HashSet::new();
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        in_path.insert(start);
        while let Some((node, idx)) = stack.pop() {
            let next = adj.get(node).and_then(|ns| ns.get(idx)).copied();
            match next {
                Some(n) => {
                    stack.push((node, idx + 1));
                    if in_path.contains(n) {
                        return Err(PipelineError::Config(format!(
                            "acquisition graph has a cycle through `{n}`"
                        )));
                    }
                    if !done.contains(n) {
                        in_path.insert(n);
                        stack.push((n, 0));
                    }
                }
                None => {
                    in_path.remove(node);
                    done.insert(node);
                }
            }
        }
    }
    Ok(())
}
