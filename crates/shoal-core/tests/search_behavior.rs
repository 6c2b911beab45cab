//! Adaptive search selection and determinism over a populated collection

mod common;

use common::{collection_request, document_request, ScriptedProvider};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shoal_core::{
    CollectionSettings, SearchOptions, ShoalDb, ShoalError, Vector, APPROXIMATE_THRESHOLD,
};
use std::sync::Arc;
use tempfile::tempdir;

const DIM: usize = 8;

fn random_unit_vector(rng: &mut StdRng) -> (Vec<f32>, f32) {
    let embedding: Vec<f32> = (0..DIM).map(|_| rng.gen::<f32>() - 0.5).collect();
    let norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    let unit: Vec<f32> = embedding.iter().map(|x| x / norm).collect();
    let unit_norm = unit.iter().map(|x| x * x).sum::<f32>().sqrt();
    (unit, unit_norm)
}

/// Brute-force ranking with the engine's scoring and tie-break rules
fn brute_force_top(
    vectors: &[(String, Vec<f32>, f32)],
    query: &[f32],
    query_norm: f32,
    k: usize,
) -> Vec<String> {
    let mut scored: Vec<(f64, &String)> = vectors
        .iter()
        .map(|(id, embedding, norm)| {
            let dot: f32 = query.iter().zip(embedding.iter()).map(|(a, b)| a * b).sum();
            ((dot / (query_norm * norm)) as f64, id)
        })
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    scored.into_iter().take(k).map(|(_, id)| id.clone()).collect()
}

/// One document whose 16-char chunks give us `count` vector slots
fn seed_collection(db: &ShoalDb, count: usize) -> String {
    let mut request = collection_request("c1");
    request.settings = Some(CollectionSettings {
        chunk_size: 16,
        chunk_overlap: 0,
        ..CollectionSettings::default()
    });
    db.create_collection(request, "alice").unwrap();

    let content = "abcdefghijklmnop".repeat(count);
    let document = db
        .add_document(document_request("c1", "Slots", &content), "alice")
        .unwrap();
    assert_eq!(document.total_chunks as usize, count);
    document.id
}

fn options(k: usize, use_approximate: bool) -> SearchOptions {
    SearchOptions {
        k,
        use_approximate,
        ..SearchOptions::default()
    }
}

#[test]
fn adaptive_selection_switches_at_the_threshold() {
    let dir = tempdir().unwrap();
    let db = ShoalDb::open(
        dir.path().join("s.redb"),
        Arc::new(ScriptedProvider::new(DIM)),
    )
    .unwrap();
    let document_id = seed_collection(&db, APPROXIMATE_THRESHOLD);

    let mut rng = StdRng::seed_from_u64(42);
    let mut local: Vec<(String, Vec<f32>, f32)> = Vec::new();

    // One below the threshold first
    for position in 0..(APPROXIMATE_THRESHOLD - 1) {
        let (embedding, norm) = random_unit_vector(&mut rng);
        let id = format!("{document_id}:v:{position}");
        db.insert_vector(
            "c1",
            Vector {
                id: id.clone(),
                document_id: document_id.clone(),
                chunk_id: format!("{document_id}:c:{position}"),
                embedding: embedding.clone(),
                norm,
                model: "seeded".to_string(),
                created_at: 0,
            },
            "alice",
        )
        .unwrap();
        local.push((id, embedding, norm));
    }
    assert_eq!(db.get_vector_count("c1").unwrap(), 999);

    let queries: Vec<(Vec<f32>, f32)> = (0..50).map(|_| random_unit_vector(&mut rng)).collect();

    // Below the threshold the approximate flag is ignored: results are
    // exactly the brute-force ranking
    for (query, query_norm) in queries.iter().take(5) {
        let matches = db
            .search_embedding("c1", query, options(5, true))
            .unwrap();
        let got: Vec<String> = matches
            .iter()
            .map(|m| {
                let position = m.chunk_id.rsplit(':').next().unwrap();
                format!("{}:v:{position}", m.document_id)
            })
            .collect();
        assert_eq!(got, brute_force_top(&local, query, *query_norm, 5));
    }

    // Cross the threshold
    let position = APPROXIMATE_THRESHOLD - 1;
    let (embedding, norm) = random_unit_vector(&mut rng);
    let id = format!("{document_id}:v:{position}");
    db.insert_vector(
        "c1",
        Vector {
            id: id.clone(),
            document_id: document_id.clone(),
            chunk_id: format!("{document_id}:c:{position}"),
            embedding: embedding.clone(),
            norm,
            model: "seeded".to_string(),
            created_at: 0,
        },
        "alice",
    )
    .unwrap();
    local.push((id, embedding, norm));
    assert_eq!(
        db.get_vector_count("c1").unwrap() as usize,
        APPROXIMATE_THRESHOLD
    );

    // The approximate path answers now; its top-1 should agree with the
    // exact ranking on nearly every query
    let mut agreement = 0;
    for (query, query_norm) in &queries {
        let matches = db
            .search_embedding("c1", query, options(1, true))
            .unwrap();
        let position = matches[0].chunk_id.rsplit(':').next().unwrap();
        let got = format!("{}:v:{position}", matches[0].document_id);
        if got == brute_force_top(&local, query, *query_norm, 1)[0] {
            agreement += 1;
        }
    }
    assert!(
        agreement >= 48,
        "approximate top-1 agreed on only {agreement}/50 queries"
    );

    // Forcing the exact path still matches brute force at full size
    let (query, query_norm) = &queries[0];
    let matches = db
        .search_embedding("c1", query, options(3, false))
        .unwrap();
    let got: Vec<String> = matches
        .iter()
        .map(|m| {
            let position = m.chunk_id.rsplit(':').next().unwrap();
            format!("{}:v:{position}", m.document_id)
        })
        .collect();
    assert_eq!(got, brute_force_top(&local, query, *query_norm, 3));
}

#[test]
fn searching_an_empty_collection_reports_no_vectors() {
    let dir = tempdir().unwrap();
    let db = ShoalDb::open(
        dir.path().join("s.redb"),
        Arc::new(ScriptedProvider::new(DIM)),
    )
    .unwrap();
    db.create_collection(collection_request("empty"), "alice").unwrap();

    let err = db
        .search_embedding("empty", &[1.0; DIM], options(5, true))
        .unwrap_err();
    assert!(matches!(err, ShoalError::NotFound(_)));
}

#[test]
fn searching_a_missing_collection_is_not_found() {
    let dir = tempdir().unwrap();
    let db = ShoalDb::open(
        dir.path().join("s.redb"),
        Arc::new(ScriptedProvider::new(DIM)),
    )
    .unwrap();

    assert!(matches!(
        db.search_embedding("ghost", &[1.0; DIM], options(5, true)),
        Err(ShoalError::NotFound(_))
    ));
}

#[test]
fn query_dimension_must_match_the_collection() {
    let dir = tempdir().unwrap();
    let db = ShoalDb::open(
        dir.path().join("s.redb"),
        Arc::new(ScriptedProvider::new(DIM)),
    )
    .unwrap();
    let document_id = seed_collection(&db, 4);

    let mut rng = StdRng::seed_from_u64(7);
    for position in 0..4 {
        let (embedding, norm) = random_unit_vector(&mut rng);
        db.insert_vector(
            "c1",
            Vector {
                id: format!("{document_id}:v:{position}"),
                document_id: document_id.clone(),
                chunk_id: format!("{document_id}:c:{position}"),
                embedding,
                norm,
                model: "seeded".to_string(),
                created_at: 0,
            },
            "alice",
        )
        .unwrap();
    }

    let err = db
        .search_embedding("c1", &[1.0, 0.0, 0.0], options(5, true))
        .unwrap_err();
    assert!(matches!(err, ShoalError::InvalidInput { .. }));
}

#[tokio::test]
async fn filtered_search_only_returns_allowed_documents() {
    let dir = tempdir().unwrap();
    let db = ShoalDb::open(
        dir.path().join("s.redb"),
        Arc::new(ScriptedProvider::new(DIM)),
    )
    .unwrap();
    db.create_collection(collection_request("c1"), "alice").unwrap();

    let mut allowed_ids = Vec::new();
    for title in ["Alpha", "Beta", "Gamma"] {
        let doc = db
            .add_document_and_embed(
                document_request("c1", title, &format!("{title} shared content words")),
                None,
                "alice",
            )
            .await
            .unwrap();
        if title != "Beta" {
            allowed_ids.push(doc.id);
        }
    }

    let request = shoal_core::SearchRequest {
        collection_id: "c1".to_string(),
        query: "shared content words".to_string(),
        limit: Some(10),
        min_score: None,
        filter: Some(allowed_ids.clone()),
        use_approximate: None,
    };
    let matches = db.search_filtered(request).await.unwrap();
    assert!(!matches.is_empty());
    for m in &matches {
        assert!(allowed_ids.contains(&m.document_id));
    }
}

#[tokio::test]
async fn find_similar_documents_excludes_the_source() {
    let dir = tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new(4));
    provider.set_embedding("cats and kittens", vec![1.0, 0.1, 0.0, 0.0]);
    provider.set_embedding("felines and cats", vec![0.9, 0.2, 0.0, 0.0]);
    provider.set_embedding("steel manufacturing", vec![0.0, 0.0, 1.0, 0.1]);

    let db = ShoalDb::open(dir.path().join("s.redb"), provider).unwrap();
    db.create_collection(collection_request("c1"), "alice").unwrap();

    let source = db
        .add_document_and_embed(document_request("c1", "Cats", "cats and kittens"), None, "alice")
        .await
        .unwrap();
    let similar = db
        .add_document_and_embed(
            document_request("c1", "Felines", "felines and cats"),
            None,
            "alice",
        )
        .await
        .unwrap();
    db.add_document_and_embed(
        document_request("c1", "Steel", "steel manufacturing"),
        None,
        "alice",
    )
    .await
    .unwrap();

    let matches = db
        .find_similar_documents(&source.id, "c1", Some(1), None)
        .unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].document_id, similar.id);
    assert!(matches.iter().all(|m| m.document_id != source.id));
}
