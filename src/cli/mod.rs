//! CLI subcommands. Each opens the shared state the MCP server uses and calls
//! the synchronous engine through `spawn_blocking`.

pub mod add;
pub mod doctor;
pub mod reindex;
pub mod search;
pub mod similar;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use tome::config::TomeConfig;
use tome::records::store::fetch_records;
use tome::search::engine::SearchResult;
use tome::server::{setup_shared_state, SharedState};

const MODEL_URL: &str =
    "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/onnx/model.onnx";
const TOKENIZER_URL: &str =
    "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/tokenizer.json";

/// Download the ONNX embedding model and tokenizer to the cache directory.
pub async fn model_download(config: &tome::config::EmbeddingConfig) -> Result<()> {
    let cache_dir = tome::config::expand_tilde(&config.cache_dir);
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("failed to create cache dir: {}", cache_dir.display()))?;

    let model_path = cache_dir.join("model.onnx");
    let tokenizer_path = cache_dir.join("tokenizer.json");

    if model_path.exists() {
        println!("Model already exists at {}", model_path.display());
    } else {
        println!("Downloading model.onnx (~90MB)...");
        download_file(MODEL_URL, &model_path).await?;
        println!("Model saved to {}", model_path.display());
    }

    if tokenizer_path.exists() {
        println!("Tokenizer already exists at {}", tokenizer_path.display());
    } else {
        println!("Downloading tokenizer.json...");
        download_file(TOKENIZER_URL, &tokenizer_path).await?;
        println!("Tokenizer saved to {}", tokenizer_path.display());
    }

    println!("Model download complete. Semantic search will load it on first use.");
    Ok(())
}

/// Stream `url` into `dest`, writing to a `.tmp` sibling and renaming on success.
async fn download_file(url: &str, dest: &Path) -> Result<()> {
    let mut response = reqwest::get(url)
        .await
        .with_context(|| format!("HTTP request failed for {url}"))?;

    anyhow::ensure!(
        response.status().is_success(),
        "download of {url} failed with HTTP {}",
        response.status()
    );

    let pb = match response.content_length() {
        Some(size) => {
            let pb = ProgressBar::new(size);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("  {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
                    .context("progress template")?
                    .progress_chars("##-"),
            );
            pb
        }
        None => ProgressBar::new_spinner(),
    };

    let tmp_path = dest.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;

    while let Some(chunk) = response.chunk().await.context("error reading response")? {
        file.write_all(&chunk)
            .await
            .context("error writing to file")?;
        pb.inc(chunk.len() as u64);
    }
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, dest)
        .await
        .context("failed to rename temp file")?;

    pb.finish_and_clear();
    Ok(())
}

/// Open the database and engine off the async runtime.
pub(crate) async fn open_state(config: TomeConfig) -> Result<SharedState> {
    tokio::task::spawn_blocking(move || setup_shared_state(config))
        .await
        .context("setup task failed")?
}

/// Spinner shown while a blocking step (model load, rebuild) runs.
pub(crate) fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Print ranked hits with titles. Returns `false` for an unavailable result.
pub(crate) fn print_ranked(db: &Mutex<Connection>, result: &SearchResult) -> Result<bool> {
    let SearchResult::Ranked { hits, backend } = result else {
        return Ok(false);
    };
    if hits.is_empty() {
        println!("No results found.");
        return Ok(true);
    }

    let ids: Vec<&str> = hits.iter().map(|h| h.record_id.as_str()).collect();
    let records = {
        let conn = db
            .lock()
            .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))?;
        fetch_records(&conn, &ids)?
    };

    println!("Found {} result(s) via {backend} index\n", hits.len());
    for (i, hit) in hits.iter().enumerate() {
        let Some(record) = records.get(&hit.record_id) else {
            continue;
        };
        println!("  {}. {} (score: {:.4})", i + 1, record.title, hit.score);
        println!("     {}", record.id);
        println!("     {}", preview(&record.content));
        println!();
    }
    Ok(true)
}

pub(crate) fn preview(content: &str) -> String {
    let line = content.lines().next().unwrap_or_default();
    if line.chars().count() > 120 {
        format!("{}...", line.chars().take(120).collect::<String>())
    } else {
        line.to_string()
    }
}
