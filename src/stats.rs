//! Index and workflow statistics.
//!
//! A quick summary of what is loaded: document count, embedding coverage,
//! average content size, live workflow threads, and the configured provider
//! chain. Printed by `cw stats` and served by `GET /health`.

use anyhow::Result;
use serde::Serialize;

use coursewright_core::models::IndexStats;

use crate::app::App;

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub index: IndexStats,
    pub threads: usize,
    pub embeddings_enabled: bool,
    pub providers: Vec<String>,
}

pub async fn collect_stats(app: &App) -> Result<Stats> {
    Ok(Stats {
        index: app.index.stats().await?,
        threads: app.registry.len()?,
        embeddings_enabled: app.index.has_embedder(),
        providers: app.engine.chain().names(),
    })
}

pub async fn run_stats(app: &App) -> Result<()> {
    let stats = collect_stats(app).await?;
    let index = &stats.index;

    println!("Coursewright Stats");
    println!("==================");
    println!();
    println!("  Documents:   {}", index.total_documents);
    println!(
        "  Embedded:    {} / {} ({}%)",
        index.with_embeddings,
        index.total_documents,
        coverage_percent(index)
    );
    println!("  Avg length:  {:.0} chars", index.average_content_length);
    println!();
    println!("  Threads:     {}", stats.threads);
    println!(
        "  Embeddings:  {}",
        if stats.embeddings_enabled {
            "enabled"
        } else {
            "disabled (keyword search only)"
        }
    );
    if stats.providers.is_empty() {
        println!("  Providers:   none");
    } else {
        println!("  Providers:   {}", stats.providers.join(" → "));
    }
    println!();
    Ok(())
}

fn coverage_percent(index: &IndexStats) -> usize {
    if index.total_documents > 0 {
        index.with_embeddings * 100 / index.total_documents
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coverage_handles_empty_index() {
        assert_eq!(coverage_percent(&IndexStats::default()), 0);
        let index = IndexStats {
            total_documents: 4,
            with_embeddings: 3,
            average_content_length: 10.0,
        };
        assert_eq!(coverage_percent(&index), 75);
    }
}
