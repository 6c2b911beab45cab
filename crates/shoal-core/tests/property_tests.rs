//! Property-based tests for the pure components
//!
//! These verify invariants that should hold for all inputs in a domain:
//! chunker determinism and coverage, scoring symmetry, and the bounded
//! behavior of the cache.

use proptest::prelude::*;
use shoal_core::cache::{CacheConfig, VectorCache};
use shoal_core::chunker::chunk_text;
use shoal_core::distance::{cosine_similarity, l2_norm};
use shoal_core::types::Vector;
use std::sync::Arc;
use std::time::Duration;

fn text_strategy() -> impl Strategy<Value = String> {
    // Word-ish soup with punctuation and paragraph breaks mixed in
    prop::collection::vec(
        prop_oneof![
            "[a-z]{1,12}",
            Just(".".to_string()),
            Just("!".to_string()),
            Just("\n\n".to_string()),
        ],
        1..200,
    )
    .prop_map(|words| words.join(" "))
}

fn vector_strategy(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-100.0f32..100.0f32, dim)
}

proptest! {
    #[test]
    fn chunking_is_a_pure_function(text in text_strategy()) {
        let a = chunk_text(&text, "doc", 64, 16);
        let b = chunk_text(&text, "doc", 64, 16);
        prop_assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            prop_assert_eq!(&x.id, &y.id);
            prop_assert_eq!(&x.text, &y.text);
        }
    }

    #[test]
    fn chunks_stay_within_bounds_and_order(text in text_strategy()) {
        let total_chars = text.chars().count() as u64;
        let chunks = chunk_text(&text, "doc", 64, 16);

        let mut last_start = 0u64;
        for (i, chunk) in chunks.iter().enumerate() {
            prop_assert_eq!(chunk.position, i as u32);
            prop_assert!(chunk.char_start < chunk.char_end);
            prop_assert!(chunk.char_end <= total_chars);
            prop_assert!(chunk.char_end - chunk.char_start <= 64);
            prop_assert!(chunk.char_start >= last_start);
            last_start = chunk.char_start;
            prop_assert!(!chunk.text.trim().is_empty());
        }
    }

    #[test]
    fn chunking_holds_for_any_legal_size_and_overlap(
        text in text_strategy(),
        chunk_size in 2u32..96,
        overlap_seed in 0u32..95,
    ) {
        // Any overlap strictly below chunk_size is legal, including
        // chunk_size - 1
        let overlap = overlap_seed % chunk_size;
        let chunks = chunk_text(&text, "doc", chunk_size, overlap);

        for (i, chunk) in chunks.iter().enumerate() {
            prop_assert_eq!(chunk.position, i as u32);
            prop_assert!(chunk.char_start < chunk.char_end);
            prop_assert!(chunk.char_end - chunk.char_start <= chunk_size as u64);
            prop_assert!(!chunk.text.trim().is_empty());
        }
    }

    #[test]
    fn cosine_similarity_is_symmetric(
        a in vector_strategy(16),
        b in vector_strategy(16),
    ) {
        let (Ok(norm_a), Ok(norm_b)) = (l2_norm(&a), l2_norm(&b)) else {
            // Zero vectors are rejected, which is fine here
            return Ok(());
        };
        let ab = cosine_similarity(&a, &b, norm_a, norm_b).unwrap();
        let ba = cosine_similarity(&b, &a, norm_b, norm_a).unwrap();
        prop_assert!((ab - ba).abs() < 1e-9);
        prop_assert!((-1.0001..=1.0001).contains(&ab));
    }

    #[test]
    fn self_similarity_is_one(a in vector_strategy(16)) {
        let Ok(norm) = l2_norm(&a) else { return Ok(()); };
        let score = cosine_similarity(&a, &a, norm, norm).unwrap();
        prop_assert!((score - 1.0).abs() < 1e-3);
    }

    #[test]
    fn cache_never_exceeds_its_bounds(
        inserts in prop::collection::vec((0u8..20, 1usize..30), 1..60),
    ) {
        let config = CacheConfig {
            max_entries: 5,
            max_bytes: 20_000,
            ttl: Duration::from_secs(3600),
        };
        let mut cache = VectorCache::with_config(config);

        for (key, count) in inserts {
            let vectors: Vec<Vector> = (0..count)
                .map(|i| Vector {
                    id: format!("d:v:{i}"),
                    document_id: "d".to_string(),
                    chunk_id: format!("d:c:{i}"),
                    embedding: vec![1.0; 8],
                    norm: 8f32.sqrt(),
                    model: "m".to_string(),
                    created_at: 0,
                })
                .collect();
            cache.insert(&format!("c{key}"), Arc::new(vectors));

            let stats = cache.stats();
            prop_assert!(stats.entry_count <= 5);
            prop_assert!(stats.total_memory_bytes <= 20_000);
        }
    }
}
