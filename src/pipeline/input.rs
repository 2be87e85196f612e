//! Input resolution: a user-supplied path or URL → decoded raster.
//!
//! Bytes are sniffed with [`image::guess_format`] before decoding, and only
//! PNG and JPEG are accepted. A file with the wrong extension still works;
//! a PDF or a GIF named `receipt.png` is rejected with its magic bytes in the
//! error instead of a decoder message.

use crate::error::InvoiceError;
use image::{DynamicImage, ImageFormat};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Formats the pipeline accepts.
pub const SUPPORTED_FORMATS: [ImageFormat; 2] = [ImageFormat::Png, ImageFormat::Jpeg];

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Read the raw bytes behind `input`.
///
/// If the input is a URL, download it; otherwise read the local file.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<Vec<u8>, InvoiceError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(input).await
    }
}

/// Resolve and decode `input` in one step.
pub async fn load_image(input: &str, timeout_secs: u64) -> Result<DynamicImage, InvoiceError> {
    let bytes = resolve_input(input, timeout_secs).await?;
    decode_image(input, &bytes)
}

/// Decode PNG or JPEG bytes. `label` names the input in errors.
pub fn decode_image(label: &str, bytes: &[u8]) -> Result<DynamicImage, InvoiceError> {
    let format = match image::guess_format(bytes) {
        Ok(f) if SUPPORTED_FORMATS.contains(&f) => f,
        _ => {
            return Err(InvoiceError::UnsupportedFormat {
                input: label.to_string(),
                magic: bytes.iter().take(8).copied().collect(),
            })
        }
    };

    let img = image::load_from_memory_with_format(bytes, format).map_err(|source| {
        InvoiceError::ImageDecode {
            input: label.to_string(),
            source,
        }
    })?;
    debug!(
        "Decoded {} as {:?}: {}x{}",
        label,
        format,
        img.width(),
        img.height()
    );
    Ok(img)
}

async fn read_local(path_str: &str) -> Result<Vec<u8>, InvoiceError> {
    if path_str.trim().is_empty() {
        return Err(InvoiceError::InvalidInput {
            input: path_str.to_string(),
        });
    }
    let path = PathBuf::from(path_str);
    if path.is_dir() {
        return Err(InvoiceError::InvalidInput {
            input: path_str.to_string(),
        });
    }

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            debug!("Read {} bytes from {}", bytes.len(), path.display());
            Ok(bytes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(InvoiceError::PermissionDenied { path })
        }
        Err(_) => Err(InvoiceError::FileNotFound { path }),
    }
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, InvoiceError> {
    info!("Downloading image from: {}", url);

    let failed = |reason: String| InvoiceError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            InvoiceError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            InvoiceError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}
