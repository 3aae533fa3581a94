//! Fuzzy-rankable catalog of every tool advertised by every peer.
//!
//! Rows are keyed by (peer, tool). Connect replaces a peer's rows
//! atomically, disconnect removes them atomically, so a search never
//! observes a half-updated peer.

use serde::Serialize;
use std::sync::RwLock;

pub const DEFAULT_SEARCH_LIMIT: usize = 20;
pub const MAX_SEARCH_LIMIT: usize = 100;

/// One indexed tool.
#[derive(Debug, Clone, Serialize)]
pub struct IndexedTool {
    pub peer: String,
    pub tool: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A search result row with its ranking score.
#[derive(Debug, Clone, Serialize)]
pub struct ToolHit {
    pub mcp_name: String,
    pub tool_name: String,
    pub description: String,
    pub score: i64,
}

/// One page of search results.
#[derive(Debug, Clone, Serialize)]
pub struct SearchPage {
    pub tools: Vec<ToolHit>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

/// Lowercase and strip `_`, `-` and whitespace, collapsing the usual
/// spellings of one name (`code_insight`, `code-insight`, `Code Insight`,
/// `CodeInsight`) to a single canonical form.
pub fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| *c != '_' && *c != '-' && !c.is_whitespace())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Lowercase and split on `_`, `-`, `.` and whitespace.
pub fn tokenize(s: &str) -> Vec<String> {
    s.to_lowercase()
        .split(|c: char| c == '_' || c == '-' || c == '.' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

pub struct ToolIndex {
    rows: RwLock<Vec<IndexedTool>>,
}

impl Default for ToolIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolIndex {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
        }
    }

    /// Replace every row belonging to `peer` with the given tools.
    pub fn replace_peer(&self, peer: &str, tools: Vec<IndexedTool>) {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        rows.retain(|r| r.peer != peer);
        rows.extend(tools);
    }

    /// Remove every row belonging to `peer`.
    pub fn remove_peer(&self, peer: &str) {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        rows.retain(|r| r.peer != peer);
    }

    pub fn clear(&self) {
        self.rows.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.rows.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of rows for one peer.
    pub fn tool_count(&self, peer: &str) -> usize {
        self.rows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.peer == peer)
            .count()
    }

    /// Ranked, paginated search. An empty query matches every row.
    /// `scope` restricts rows to one peer. Offsets below zero must be
    /// clamped by the caller; limits are defaulted and capped here.
    pub fn search(
        &self,
        query: &str,
        scope: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> SearchPage {
        let limit = if limit == 0 {
            DEFAULT_SEARCH_LIMIT
        } else {
            limit.min(MAX_SEARCH_LIMIT)
        };

        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        let query = query.trim();
        let query_norm = normalize(query);
        let tokens = tokenize(query);

        let mut hits: Vec<ToolHit> = rows
            .iter()
            .filter(|r| scope.map_or(true, |s| r.peer == s))
            .filter_map(|r| {
                let score = if query.is_empty() {
                    0
                } else {
                    match score_row(query, &query_norm, &tokens, r) {
                        0 => return None,
                        s => s,
                    }
                };
                Some(ToolHit {
                    mcp_name: r.peer.clone(),
                    tool_name: r.tool.clone(),
                    description: r.description.clone(),
                    score,
                })
            })
            .collect();

        // Stable sort keeps insertion order among equal scores, which is
        // what makes pagination reproducible.
        hits.sort_by(|a, b| b.score.cmp(&a.score));

        let total = hits.len();
        let page: Vec<ToolHit> = hits.into_iter().skip(offset).take(limit).collect();
        let has_more = offset + page.len() < total;

        SearchPage {
            tools: page,
            total,
            limit,
            offset,
            has_more,
        }
    }

    /// Full schema lookup for one (peer, tool) row.
    pub fn get(&self, peer: &str, tool: &str) -> Option<IndexedTool> {
        self.rows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|r| r.peer == peer && r.tool == tool)
            .cloned()
    }
}

/// Apply the ranking table. Signals are additive; the fuzzy fallback only
/// applies to rows that scored nothing else.
fn score_row(query: &str, query_norm: &str, tokens: &[String], row: &IndexedTool) -> i64 {
    let mut score = 0i64;

    let tool_lower = row.tool.to_lowercase();
    let tool_norm = normalize(&row.tool);
    let desc_lower = row.description.to_lowercase();
    let query_lower = query.to_lowercase();

    // Exact tool-name match, case-insensitive or normalized.
    if tool_lower == query_lower || tool_norm == *query_norm {
        score += 1000;
    }

    // Query names the peer itself, either as the whole query or as one of
    // its tokens.
    let peer_norm = normalize(&row.peer);
    if peer_norm == *query_norm || tokens.iter().any(|t| normalize(t) == peer_norm) {
        score += 800;
    }

    if tool_lower.starts_with(&query_lower) && tool_lower != query_lower {
        score += 300;
    }

    if !tokens.is_empty() {
        let in_tool: Vec<&String> = tokens.iter().filter(|t| tool_lower.contains(*t)).collect();
        let in_desc: Vec<&String> = tokens.iter().filter(|t| desc_lower.contains(*t)).collect();

        if in_tool.len() == tokens.len() {
            score += 200;
        }
        let combined = format!("{} {}", row.peer.to_lowercase(), tool_lower);
        if tokens.iter().all(|t| combined.contains(t)) {
            score += 150;
        }
        if in_desc.len() == tokens.len() {
            score += 100;
        }
        score += 50 * in_tool.len() as i64;
        score += 25 * in_desc.len() as i64;
    }

    // Fuzzy fallback: only when nothing else matched.
    if score == 0 && !query_norm.is_empty() {
        let row_norm = format!("{}{}", peer_norm, tool_norm);
        if tool_norm.contains(query_norm)
            || row_norm.contains(query_norm)
            || normalize(&row.description).contains(query_norm)
        {
            score = 10;
        }
    }

    score
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(peer: &str, name: &str, desc: &str) -> IndexedTool {
        IndexedTool {
            peer: peer.into(),
            tool: name.into(),
            description: desc.into(),
            input_schema: serde_json::json!({"type": "object"}),
        }
    }

    #[test]
    fn normalize_collapses_spellings() {
        for s in ["code_insight", "code-insight", "Code Insight", "CodeInsight"] {
            assert_eq!(normalize(s), "codeinsight");
        }
    }

    #[test]
    fn tokenize_splits_on_separators() {
        assert_eq!(
            tokenize("Read.File_from-disk now"),
            vec!["read", "file", "from", "disk", "now"]
        );
    }

    #[test]
    fn empty_query_returns_everything() {
        let index = ToolIndex::new();
        index.replace_peer(
            "demo",
            vec![tool("demo", "echo", "repeat"), tool("demo", "add", "sum")],
        );
        let page = index.search("", None, 0, 0);
        assert_eq!(page.total, 2);
        assert_eq!(page.tools.len(), 2);
        assert!(!page.has_more);
    }

    #[test]
    fn exact_match_outranks_prefix_outranks_partial() {
        let index = ToolIndex::new();
        index.replace_peer(
            "p",
            vec![
                tool("p", "search", "find things"),
                tool("p", "search_files", "find files"),
                tool("p", "grep", "search text in files"),
            ],
        );
        let page = index.search("search", None, 0, 0);
        assert_eq!(page.tools[0].tool_name, "search");
        assert_eq!(page.tools[1].tool_name, "search_files");
        assert_eq!(page.tools[2].tool_name, "grep");
        assert!(page.tools[0].score > page.tools[1].score);
        assert!(page.tools[1].score > page.tools[2].score);
    }

    #[test]
    fn peer_plus_tool_query_scores_high() {
        let index = ToolIndex::new();
        index.replace_peer("lci", vec![tool("lci", "code_insight", "analyze code")]);
        index.replace_peer("other", vec![tool("other", "unrelated", "nothing")]);

        let page = index.search("lci code insight", None, 0, 0);
        assert_eq!(page.tools[0].tool_name, "code_insight");
        assert!(page.tools[0].score >= 950, "score was {}", page.tools[0].score);
    }

    #[test]
    fn scope_filter_restricts_to_one_peer() {
        let index = ToolIndex::new();
        index.replace_peer("a", vec![tool("a", "echo", "")]);
        index.replace_peer("b", vec![tool("b", "echo", "")]);
        let page = index.search("echo", Some("a"), 0, 0);
        assert_eq!(page.total, 1);
        assert_eq!(page.tools[0].mcp_name, "a");
    }

    #[test]
    fn pagination_pages_are_disjoint_and_complete() {
        let index = ToolIndex::new();
        let tools: Vec<IndexedTool> = (0..50)
            .map(|i| tool("big", &format!("tool_{i:02}"), "desc"))
            .collect();
        index.replace_peer("big", tools);

        let mut seen = Vec::new();
        for offset in (0..50).step_by(10) {
            let page = index.search("", None, 10, offset);
            assert_eq!(page.total, 50);
            assert_eq!(page.tools.len(), 10);
            assert_eq!(page.has_more, offset + 10 < 50);
            seen.extend(page.tools.into_iter().map(|t| t.tool_name));
        }
        assert_eq!(seen.len(), 50);
        let mut dedup = seen.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), 50);
    }

    #[test]
    fn limit_defaults_and_caps() {
        let index = ToolIndex::new();
        let tools: Vec<IndexedTool> = (0..150)
            .map(|i| tool("big", &format!("t{i}"), ""))
            .collect();
        index.replace_peer("big", tools);

        assert_eq!(index.search("", None, 0, 0).tools.len(), DEFAULT_SEARCH_LIMIT);
        assert_eq!(index.search("", None, 500, 0).tools.len(), MAX_SEARCH_LIMIT);
    }

    #[test]
    fn replace_is_atomic_per_peer() {
        let index = ToolIndex::new();
        index.replace_peer("p", vec![tool("p", "old_a", ""), tool("p", "old_b", "")]);
        index.replace_peer("p", vec![tool("p", "new", "")]);
        assert_eq!(index.tool_count("p"), 1);
        assert!(index.get("p", "old_a").is_none());
        assert!(index.get("p", "new").is_some());
    }

    #[test]
    fn remove_peer_drops_all_rows() {
        let index = ToolIndex::new();
        index.replace_peer("p", vec![tool("p", "a", ""), tool("p", "b", "")]);
        index.replace_peer("q", vec![tool("q", "c", "")]);
        index.remove_peer("p");
        assert_eq!(index.search("", None, 0, 0).total, 1);
        assert_eq!(index.tool_count("p"), 0);
    }

    #[test]
    fn fuzzy_fallback_only_when_nothing_else_matches() {
        let index = ToolIndex::new();
        index.replace_peer("p", vec![tool("p", "code_insight", "")]);
        // "deinsi" is a normalized substring but matches no token/prefix.
        let page = index.search("deinsi", None, 0, 0);
        assert_eq!(page.total, 1);
        assert_eq!(page.tools[0].score, 10);
    }
}
