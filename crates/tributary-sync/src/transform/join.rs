//! Join freshly transformed rows against carried-over metadata

use std::collections::HashMap;
use std::hash::Hash;
use tracing::warn;

/// Inner join of `rows` against `metadata` on a shared key.
///
/// Rows whose key has no metadata entry are dropped with a warning; foreign
/// fields are never null-filled. When several metadata entries share a key
/// the last one wins.
pub fn join_by_key<L, R, K, Out>(
    rows: Vec<L>,
    metadata: &[R],
    row_key: impl Fn(&L) -> K,
    metadata_key: impl Fn(&R) -> K,
    combine: impl Fn(L, &R) -> Out,
) -> Vec<Out>
where
    K: Eq + Hash + std::fmt::Debug,
{
    let index: HashMap<K, &R> = metadata.iter().map(|m| (metadata_key(m), m)).collect();

    let mut joined = Vec::with_capacity(rows.len());
    let mut dropped = 0usize;
    for row in rows {
        let key = row_key(&row);
        match index.get(&key) {
            Some(meta) => joined.push(combine(row, meta)),
            None => {
                dropped += 1;
                warn!(key = ?key, "Dropping row with no matching metadata");
            },
        }
    }

    if dropped > 0 {
        warn!(dropped, kept = joined.len(), "Join dropped unmatched rows");
    }
    joined
}
