//! Search command: top-K cosine search over the collection

use crate::embed::guard_embeddings;
use crate::error::{Error, Result};
use crate::host::Host;
use crate::vector::{ScoredPoint, SearchFilter};

/// Options for a top-K query
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub limit: usize,
    pub min_score: Option<f32>,
    pub kind: Option<String>,
    pub rel_path: Option<String>,
}

pub async fn cmd_search(host: &Host, query: &str, options: &SearchOptions) -> Result<Vec<ScoredPoint>> {
    let components = host.start_once().await?;
    if components.is_degraded() {
        return Err(Error::VectorBackendUnavailable(
            "search needs a reachable vector backend".to_string(),
        ));
    }

    let vectors = components.embedder.embed(vec![query.to_string()]).await?;
    guard_embeddings(&vectors, 1, components.embedder.dimension())?;
    let query_vector = vectors
        .into_iter()
        .next()
        .ok_or_else(|| Error::Embedding("empty embedding batch".to_string()))?;

    let filter = SearchFilter {
        kind: options.kind.clone(),
        rel_path: options.rel_path.clone(),
        ..Default::default()
    };
    let filter = filter.to_json().is_some().then_some(filter);

    components
        .vectors
        .search_top_k(
            query_vector,
            options.limit.max(1),
            filter,
            options.min_score,
        )
        .await
}

pub fn print_search_results(results: &[ScoredPoint], json: bool) {
    if json {
        let rows: Vec<serde_json::Value> = results
            .iter()
            .map(|hit| {
                serde_json::json!({
                    "id": hit.id,
                    "score": hit.score,
                    "payload": hit.payload,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&rows).unwrap_or_default()
        );
        return;
    }

    if results.is_empty() {
        println!("No results");
        return;
    }

    for hit in results {
        let rel_path = hit.payload["rel_path"].as_str().unwrap_or("?");
        let range = hit.payload["range"].as_str().unwrap_or("?");
        println!("{:.3}  {rel_path}:{range}", hit.score);
        if let Some(text) = hit.payload["text"].as_str() {
            for line in text.lines().take(3) {
                println!("    {line}");
            }
        }
    }
}
