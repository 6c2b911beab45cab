//! Minimal end-to-end walkthrough: create a collection, ingest a few
//! documents, and run a similarity search.
//!
//! Uses the deterministic hash-embedding fixture so it runs without any
//! API key. Swap in `HttpEmbeddingProvider` and a real endpoint for
//! semantic results.
//!
//! ```sh
//! cargo run --example semantic_search
//! ```

use shoal_core::{
    AddDocumentRequest, CreateCollectionRequest, HashEmbedding, Result, SearchRequest, ShoalDb,
};
use std::sync::Arc;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let dir = std::env::temp_dir().join("shoal-semantic-search-demo");
    std::fs::create_dir_all(&dir).expect("temp dir is writable");

    let db = ShoalDb::open(dir.join("demo.redb"), Arc::new(HashEmbedding::new(256)))?;

    let caller = "demo-admin";
    if db.get_collection("articles")?.is_none() {
        db.create_collection(
            CreateCollectionRequest {
                id: "articles".into(),
                name: "Demo articles".into(),
                description: Some("Tiny corpus for the walkthrough".into()),
                settings: None,
            },
            caller,
        )?;
    }

    let corpus = [
        ("Pasta", "Fresh pasta with basil, olive oil, and parmesan cheese."),
        ("Football", "The football match went to extra time before the winning goal."),
        ("Compilers", "A compiler lowers source code into machine instructions."),
    ];
    for (title, content) in corpus {
        let document = db
            .add_document_and_embed(
                AddDocumentRequest {
                    collection_id: "articles".into(),
                    title: title.into(),
                    content: content.into(),
                    content_type: None,
                    source_url: None,
                    author: None,
                    tags: None,
                },
                None,
                caller,
            )
            .await?;
        println!(
            "ingested {:<10} -> {} ({} chunks)",
            title, document.id, document.total_chunks
        );
    }

    let matches = db
        .search(SearchRequest {
            collection_id: "articles".into(),
            query: "Who scored the winning goal in the match?".into(),
            limit: Some(3),
            min_score: None,
            filter: None,
            use_approximate: None,
        })
        .await?;

    println!("\ntop matches:");
    for m in matches {
        println!(
            "  {:.4}  {}  {}",
            m.score,
            m.document_title.unwrap_or_default(),
            m.chunk_text.unwrap_or_default()
        );
    }

    let stats = db.get_collection_with_stats("articles")?.stats;
    println!(
        "\ncollection holds {} documents / {} vectors",
        stats.document_count, stats.vector_count
    );
    Ok(())
}
