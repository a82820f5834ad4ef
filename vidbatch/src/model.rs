//! Whisper model cache.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::config::Model;
use crate::error::{Error, Result};

const MODEL_BASE_URL: &str = "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";

/// Anything smaller is an error page, not a model.
const MIN_MODEL_BYTES: u64 = 1_000_000;

/// Path to a usable model file, downloading it into `cache_dir` if missing.
pub async fn ensure_model(model: &Model, cache_dir: &Path) -> Result<PathBuf> {
    if let Model::Custom(path) = model {
        return if path.is_file() {
            Ok(path.clone())
        } else {
            Err(Error::ModelNotFound { path: path.clone() })
        };
    }

    let filename = model.filename();
    let model_path = cache_dir.join(&filename);
    if model_path.is_file() {
        info!(path = %model_path.display(), "model already cached");
        return Ok(model_path);
    }

    tokio::fs::create_dir_all(cache_dir).await.map_err(|e| {
        Error::Model(format!("failed to create cache dir {}: {e}", cache_dir.display()))
    })?;

    let url = format!("{MODEL_BASE_URL}/{filename}");
    info!(%url, "downloading model");
    download(&url, &model_path).await?;
    Ok(model_path)
}

async fn download(url: &str, dest: &Path) -> Result<()> {
    let response = reqwest::get(url)
        .await?
        .error_for_status()
        .map_err(|e| Error::ModelDownload(format!("HTTP error: {e}")))?;
    let total_size = response.content_length().unwrap_or(0);

    let pb = ProgressBar::new(total_size);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .map_err(|e| Error::ModelDownload(e.to_string()))?
            .progress_chars("#>-"),
    );
    pb.set_message(format!("Downloading {}", crate::types::display_name(dest)));

    let part = dest.with_extension("bin.part");
    let mut file = tokio::fs::File::create(&part).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        pb.set_position(written);
    }
    file.flush().await?;
    drop(file);

    if written < MIN_MODEL_BYTES {
        tokio::fs::remove_file(&part).await.ok();
        return Err(Error::ModelDownload(format!(
            "downloaded file too small ({written} bytes)"
        )));
    }
    if total_size > 0 && written != total_size {
        warn!(expected = total_size, actual = written, "model size mismatch");
    }

    tokio::fs::rename(&part, dest).await?;
    pb.finish_with_message("Download complete");
    info!(path = %dest.display(), size = written, "model saved");
    Ok(())
}
