//! Property-based tests for token expiry arithmetic plus a concurrency
//! hammer on the token store.

use manifold_auth::tokens::{TokenRecord, TokenStore, EXPIRY_SKEW_SECS};
use proptest::prelude::*;
use std::sync::Arc;

fn record(name: &str, expires_at: i64) -> TokenRecord {
    TokenRecord {
        server_name: name.into(),
        server_url: "https://example.com/mcp".into(),
        client_id: "cid".into(),
        access_token: "tok".into(),
        expires_at,
        ..Default::default()
    }
}

// ============================================================================
// Expiry arithmetic
// ============================================================================

proptest! {
    /// IsExpired(t) holds exactly when t is non-zero and now + skew
    /// passes it.
    #[test]
    fn expiry_definition(
        now in 0i64..4_000_000_000,
        expires_at in 0i64..4_000_000_000,
    ) {
        let r = record("p", expires_at);
        let expected = expires_at != 0 && now + EXPIRY_SKEW_SECS > expires_at;
        prop_assert_eq!(r.is_expired_at(now), expected);
    }

    #[test]
    fn zero_expiry_never_expires(now in 0i64..4_000_000_000) {
        prop_assert!(!record("p", 0).is_expired_at(now));
    }
}

// ============================================================================
// Concurrent store operations keep the file parseable
// ============================================================================

#[test]
fn concurrent_ops_leave_parseable_file() {
    let dir = std::env::temp_dir().join(format!(
        "manifold-tokens-hammer-{}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    let store = Arc::new(TokenStore::new(dir.join("auth.json")));

    let mut handles = Vec::new();
    for worker in 0..8 {
        let store = store.clone();
        handles.push(std::thread::spawn(move || {
            for round in 0..10 {
                let name = format!("peer{}", (worker + round) % 5);
                match round % 3 {
                    0 => {
                        store.set(record(&name, 1_700_000_000 + round as i64)).unwrap();
                    }
                    1 => {
                        let _ = store.get(&name).unwrap();
                    }
                    _ => {
                        let _ = store.delete(&name).unwrap();
                    }
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // Whatever interleaving happened, the file parses under the schema.
    let raw = std::fs::read_to_string(store.path()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed["version"], 1);
    assert!(parsed["servers"].is_object());
    // And the store itself still answers.
    let _ = store.list().unwrap();

    let _ = std::fs::remove_dir_all(&dir);
}
