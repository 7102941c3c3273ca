//! `cw search`: query the index and print ranked results.

use anyhow::Result;

use coursewright_core::models::{SearchMode, SearchOptions, SearchResult};
use coursewright_core::text::excerpt;

use crate::app::App;

const SNIPPET_CHARS: usize = 200;

pub async fn run_search(
    app: &App,
    query: &str,
    limit: usize,
    threshold: Option<f64>,
) -> Result<()> {
    let options = SearchOptions {
        threshold,
        ..SearchOptions::default()
    };
    let results = app.index.search(query, limit, &options).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        print_result(i + 1, result);
    }
    Ok(())
}

fn print_result(rank: usize, result: &SearchResult) {
    let title = result
        .metadata
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or("(untitled)");
    let mode = match result.mode {
        SearchMode::Similarity => "similarity",
        SearchMode::Keyword => "keyword",
    };

    println!("{}. [{:.2} {}] {}", rank, result.score, mode, title);
    if let Some(source) = result.source() {
        println!("    source: {}", source);
    }
    println!(
        "    excerpt: \"{}\"",
        excerpt(&result.content, SNIPPET_CHARS).replace('\n', " ").trim()
    );
    println!("    id: {}", result.id);
    println!();
}
