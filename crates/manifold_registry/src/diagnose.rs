//! Structured diagnostics for failed lookups and peer-reported errors.
//!
//! These are values the meta-tool layer renders, not transport failures:
//! a misnamed peer lists the installed peers, a misnamed tool suggests
//! the closest real one, and a schema violation is cross-referenced
//! against the tool's input schema to name the offending keys.

use crate::index::normalize;
use crate::state::Lifecycle;
use serde::Serialize;

/// An unknown parameter key plus the correction we can offer for it.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UnknownKey {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub did_you_mean: Option<String>,
}

/// One parameter the tool's schema declares.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub type_name: String,
    pub description: String,
    pub required: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("MCP server '{name}' is not registered. Registered servers: [{}]", .installed.join(", "))]
    PeerNotFound { name: String, installed: Vec<String> },

    #[error(
        "Tool '{tool}' not found on MCP server '{peer}'.{} Available tools: [{}]",
        .suggestion.as_ref().map(|s| format!(" Did you mean '{s}'?")).unwrap_or_default(),
        .available.join(", ")
    )]
    ToolNotFound {
        peer: String,
        tool: String,
        available: Vec<String>,
        suggestion: Option<String>,
    },

    #[error("Invalid parameters for tool '{tool}' on '{peer}': {}", render_parameter_error(.missing, .unknown))]
    InvalidParameters {
        peer: String,
        tool: String,
        missing: Vec<String>,
        unknown: Vec<UnknownKey>,
        expected: Vec<ParamSpec>,
        /// The peer's own error text, kept for logging.
        detail: String,
    },

    #[error("Protocol error from '{peer}': {message} ({hint})")]
    Protocol {
        peer: String,
        message: String,
        hint: String,
    },

    #[error("MCP server '{name}' is not connected (state: {lifecycle}){}", .last_error.as_ref().map(|e| format!(": {e}")).unwrap_or_default())]
    NotConnected {
        name: String,
        lifecycle: Lifecycle,
        last_error: Option<String>,
    },

    #[error("Failed to connect to MCP server '{name}': {reason}")]
    Connect { name: String, reason: String },

    #[error("MCP server '{name}' requires authentication: {reason}. Run auth_mcp with action=login")]
    AuthRequired { name: String, reason: String },

    #[error("Tool '{tool}' on '{peer}' failed: {message}")]
    CallFailed {
        peer: String,
        tool: String,
        message: String,
    },

    #[error("Operation canceled")]
    Canceled,

    #[error("{0}")]
    Config(#[from] manifold_core::config::ConfigError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

fn render_parameter_error(missing: &[String], unknown: &[UnknownKey]) -> String {
    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("missing required [{}]", missing.join(", ")));
    }
    if !unknown.is_empty() {
        let rendered: Vec<String> = unknown
            .iter()
            .map(|u| match &u.did_you_mean {
                Some(s) => format!("{} (did you mean '{}'?)", u.key, s),
                None => u.key.clone(),
            })
            .collect();
        parts.push(format!("unknown keys [{}]", rendered.join(", ")));
    }
    if parts.is_empty() {
        "schema validation failed".into()
    } else {
        parts.join("; ")
    }
}

// ============================================================================
// Similarity
// ============================================================================

/// Name similarity on a 0–100 scale: 100 for equality (exact,
/// case-insensitive or normalized), 80 for a one-edit slip, 70 for a
/// two-edit slip in a longer name, 40–50 for substring containment.
pub fn similarity(a: &str, b: &str) -> u32 {
    if a == b || a.eq_ignore_ascii_case(b) || normalize(a) == normalize(b) {
        return 100;
    }
    let la = a.to_lowercase();
    let lb = b.to_lowercase();
    match levenshtein(&la, &lb) {
        1 => return 80,
        2 if la.len().max(lb.len()) >= 6 => return 70,
        _ => {}
    }
    let (short, long) = if la.len() <= lb.len() { (&la, &lb) } else { (&lb, &la) };
    if short.len() >= 3 && long.contains(short.as_str()) {
        // Scale 40..=50 with how much of the longer name is covered.
        return 40 + (10 * short.len() / long.len()) as u32;
    }
    0
}

/// Pick the best candidate scoring at or above `threshold`.
pub fn suggest<'a, I>(target: &str, candidates: I, threshold: u32) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    candidates
        .into_iter()
        .map(|c| (similarity(target, c), c))
        .filter(|(score, _)| *score >= threshold)
        .max_by_key(|(score, _)| *score)
        .map(|(_, c)| c.to_string())
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

// ============================================================================
// Parameter diagnostics
// ============================================================================

/// Does the peer's error text look like a schema violation rather than an
/// execution failure?
pub fn looks_like_schema_violation(text: &str) -> bool {
    let t = text.to_lowercase();
    t.contains("invalid_type")
        || t.contains("invalid arguments")
        || t.contains("invalid params")
        || t.contains("-32602")
        || t.contains("validation")
        || t.contains("required")
        || t.contains("unrecognized key")
}

/// Extract the declared parameters from a JSON-schema object.
pub fn extract_params(schema: &serde_json::Value) -> Vec<ParamSpec> {
    let required: Vec<&str> = schema
        .get("required")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    schema
        .get("properties")
        .and_then(|v| v.as_object())
        .map(|props| {
            props
                .iter()
                .map(|(name, prop)| ParamSpec {
                    name: name.clone(),
                    type_name: prop
                        .get("type")
                        .and_then(|t| t.as_str())
                        .unwrap_or("any")
                        .to_string(),
                    description: prop
                        .get("description")
                        .and_then(|d| d.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    required: required.contains(&name.as_str()),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Cross-reference the caller's keys against the tool's schema and build
/// the InvalidParameters diagnostic.
///
/// A supplied key that matches an expected parameter after normalization
/// (`mcpname` for `mcp_name`) is treated as naming that parameter: it is
/// neither unknown nor leaves the parameter missing, so no suggestion is
/// emitted for it. Keys a small edit away (`mcp_nam`) are unknown and get
/// a "did you mean" correction.
pub fn diagnose_parameters(
    peer: &str,
    tool: &str,
    schema: &serde_json::Value,
    provided: &[String],
    detail: String,
) -> RegistryError {
    let expected = extract_params(schema);

    let matches_param = |key: &str, param: &ParamSpec| {
        key == param.name || normalize(key) == normalize(&param.name)
    };

    let missing: Vec<String> = expected
        .iter()
        .filter(|p| p.required)
        .filter(|p| !provided.iter().any(|k| matches_param(k, p)))
        .map(|p| p.name.clone())
        .collect();

    let unknown: Vec<UnknownKey> = provided
        .iter()
        .filter(|k| !expected.iter().any(|p| matches_param(k, p)))
        .map(|k| UnknownKey {
            key: k.clone(),
            did_you_mean: suggest(k, expected.iter().map(|p| p.name.as_str()), 70),
        })
        .collect();

    RegistryError::InvalidParameters {
        peer: peer.to_string(),
        tool: tool.to_string(),
        missing,
        unknown,
        expected,
        detail,
    }
}

// ============================================================================
// Protocol error hints
// ============================================================================

/// Translate common JSON-RPC / schema-validator codes found in a peer's
/// error text into a short remediation hint.
pub fn protocol_hint(text: &str) -> Option<&'static str> {
    let t = text.to_lowercase();
    if t.contains("expected object") && (t.contains("received null") || t.contains("got null")) {
        return Some("pass an empty object instead of null for the parameters");
    }
    if t.contains("-32601") || t.contains("method not found") {
        return Some("the server does not implement this method; re-check the tool name with search_tools");
    }
    if t.contains("-32602") || t.contains("invalid params") || t.contains("invalid_type") {
        return Some("the parameters do not match the tool's input schema; check get_metadata for the expected types");
    }
    if t.contains("-32700") || t.contains("parse error") {
        return Some("the request was not valid JSON");
    }
    None
}
