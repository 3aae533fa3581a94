//! Property-based tests for the tool index and reconnect backoff.
//!
//! Uses proptest to verify the invariants that must hold for ALL inputs:
//! normalization collapse, ranking monotonicity, pagination completeness
//! and the backoff schedule.

use manifold_registry::index::{normalize, IndexedTool, ToolIndex};
use manifold_registry::reconnect::{backoff_delay, MAX_BACKOFF};
use proptest::prelude::*;
use std::time::Duration;

// ============================================================================
// Strategies
// ============================================================================

/// Segments of a name, to be re-joined with arbitrary separators.
fn arb_segments() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z0-9]{1,5}", 1..5)
}

/// Separators that normalization must erase.
fn arb_separators(n: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(
        prop_oneof![
            Just("".to_string()),
            Just("_".to_string()),
            Just("-".to_string()),
            Just(" ".to_string()),
            Just("__".to_string()),
            Just(" - ".to_string()),
        ],
        n,
    )
}

fn render(segments: &[String], seps: &[String], upper_mask: u32) -> String {
    let mut out = String::new();
    let mut char_idx = 0usize;
    for (i, seg) in segments.iter().enumerate() {
        if i > 0 {
            out.push_str(&seps[i - 1]);
        }
        for c in seg.chars() {
            if upper_mask & (1 << (char_idx % 32)) != 0 {
                out.extend(c.to_uppercase());
            } else {
                out.push(c);
            }
            char_idx += 1;
        }
    }
    out
}

fn tool(peer: &str, name: &str, desc: &str) -> IndexedTool {
    IndexedTool {
        peer: peer.into(),
        tool: name.into(),
        description: desc.into(),
        input_schema: serde_json::json!({"type": "object"}),
    }
}

// ============================================================================
// Normalization
// ============================================================================

proptest! {
    /// Two renderings of the same segments, differing only in case and
    /// separator runs, normalize identically.
    #[test]
    fn normalization_collapses_case_and_separators(
        segments in arb_segments(),
        mask_a in any::<u32>(),
        mask_b in any::<u32>(),
    ) {
        let n = segments.len().saturating_sub(1);
        let seps_a = vec!["_".to_string(); n];
        let seps_b = vec![" - ".to_string(); n];
        let a = render(&segments, &seps_a, mask_a);
        let b = render(&segments, &seps_b, mask_b);
        prop_assert_eq!(normalize(&a), normalize(&b));
    }

    #[test]
    fn normalization_with_arbitrary_separators(
        segments in arb_segments(),
        seps in arb_separators(4),
        mask in any::<u32>(),
    ) {
        let joined = render(&segments, &seps, mask);
        let plain = segments.concat();
        prop_assert_eq!(normalize(&joined), normalize(&plain));
    }
}

// ============================================================================
// Ranking monotonicity
// ============================================================================

proptest! {
    /// Exact match > prefix match > partial-term match > fuzzy fallback,
    /// for any single-token query.
    #[test]
    fn ranking_is_monotonic(q in "[a-z]{3,8}") {
        let index = ToolIndex::new();
        // A fuzzy-only row: normalized form contains the query, raw form
        // does not (a separator splits the query text).
        let fuzzy_name = format!("0_{}_{}0", &q[..1], &q[1..]);
        index.replace_peer(
            "p0",
            vec![
                tool("p0", &q, ""),                      // exact
                tool("p0", &format!("{q}00"), ""),       // prefix
                tool("p0", &format!("00{q}"), ""),       // partial term
                tool("p0", &fuzzy_name, ""),             // fuzzy fallback
            ],
        );

        let page = index.search(&q, None, 10, 0);
        prop_assert_eq!(page.total, 4);
        let names: Vec<&str> = page.tools.iter().map(|t| t.tool_name.as_str()).collect();
        prop_assert_eq!(names[0], q.as_str());
        prop_assert_eq!(names[1], format!("{q}00").as_str());
        prop_assert_eq!(names[2], format!("00{q}").as_str());
        prop_assert_eq!(names[3], fuzzy_name.as_str());
        for pair in page.tools.windows(2) {
            prop_assert!(pair[0].score > pair[1].score);
        }
        prop_assert_eq!(page.tools[3].score, 10);
    }
}

// ============================================================================
// Pagination
// ============================================================================

proptest! {
    /// Walking the offsets reconstructs the full result sequence, and
    /// has_more is set exactly while rows remain.
    #[test]
    fn pagination_reconstructs_sequence(
        n_rows in 0usize..60,
        limit in 1usize..25,
    ) {
        let index = ToolIndex::new();
        let rows: Vec<IndexedTool> = (0..n_rows)
            .map(|i| tool("p", &format!("tool{i:03}"), "desc"))
            .collect();
        index.replace_peer("p", rows);

        let full = index.search("", None, 100, 0);
        prop_assert_eq!(full.total, n_rows);

        let mut collected = Vec::new();
        let mut offset = 0usize;
        loop {
            let page = index.search("", None, limit, offset);
            prop_assert_eq!(page.total, n_rows);
            let returned = page.tools.len();
            prop_assert_eq!(
                page.has_more,
                offset + returned < n_rows,
                "has_more wrong at offset {}",
                offset
            );
            collected.extend(page.tools.into_iter().map(|t| t.tool_name));
            if returned == 0 || !page_continues(offset, returned, n_rows) {
                break;
            }
            offset += limit;
        }

        let full_names: Vec<String> =
            full.tools.into_iter().map(|t| t.tool_name).collect();
        prop_assert_eq!(collected, full_names.into_iter().take(n_rows).collect::<Vec<_>>());
    }
}

fn page_continues(offset: usize, returned: usize, total: usize) -> bool {
    offset + returned < total
}

// ============================================================================
// Backoff schedule
// ============================================================================

#[test]
fn backoff_schedule_matches_contract() {
    let expected: Vec<Duration> = [1u64, 2, 4, 8, 16, 32, 60, 60, 60, 60]
        .iter()
        .map(|s| Duration::from_secs(*s))
        .collect();
    let actual: Vec<Duration> = (1..=10).map(backoff_delay).collect();
    assert_eq!(actual, expected);
}

proptest! {
    #[test]
    fn backoff_is_monotonic_and_capped(attempt in 1u32..500) {
        prop_assert!(backoff_delay(attempt) <= backoff_delay(attempt + 1) || backoff_delay(attempt) == MAX_BACKOFF);
        prop_assert!(backoff_delay(attempt) <= MAX_BACKOFF);
    }
}

// ============================================================================
// Index consistency across replace/remove
// ============================================================================

proptest! {
    #[test]
    fn remove_leaves_no_rows_behind(
        peers in prop::collection::vec("[a-z]{1,6}", 1..5),
        victim_idx in 0usize..5,
    ) {
        let index = ToolIndex::new();
        for (i, peer) in peers.iter().enumerate() {
            index.replace_peer(peer, vec![tool(peer, &format!("t{i}"), "")]);
        }
        let victim = &peers[victim_idx % peers.len()];
        index.remove_peer(victim);

        let page = index.search("", None, 100, 0);
        for hit in &page.tools {
            prop_assert_ne!(&hit.mcp_name, victim);
        }
    }
}
