//! Image conversion behind a pluggable trait.
//!
//! The engine only depends on the [`Converter`] contract; the shipped
//! implementation shells out to macOS `sips`. Tests plug in an in-memory
//! double.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;

use crate::utils;

/// Input extensions the pipeline will attempt to convert.
pub const CONVERTIBLE_EXTENSIONS: &[&str] = &[
    ".heic", ".heif", ".png", ".jpg", ".jpeg", ".tiff", ".bmp", ".gif",
];

/// Quality applied to jpeg output when none is requested.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Case-insensitive membership test against [`CONVERTIBLE_EXTENSIONS`].
pub fn is_convertible(ext: &str) -> bool {
    let lowered = ext.to_ascii_lowercase();
    CONVERTIBLE_EXTENSIONS.contains(&lowered.as_str())
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("unsupported format: {0}")]
    Unsupported(String),

    #[error("no image converter available: {0}")]
    ToolMissing(String),

    #[error("conversion of {path} failed: {stderr}")]
    Failed { path: PathBuf, stderr: String },

    #[error("conversion I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Options for a single conversion.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub output_format: String,
    pub output_dir: Option<PathBuf>,
    pub quality: Option<u8>,
}

impl ConvertOptions {
    pub fn jpeg() -> Self {
        Self {
            output_format: "jpeg".into(),
            output_dir: None,
            quality: None,
        }
    }
}

/// A completed conversion.
#[derive(Debug, Clone)]
pub struct Conversion {
    pub src_path: PathBuf,
    pub dest_path: PathBuf,
    pub format: String,
    pub duration_ms: u64,
}

/// Format test + convert, implemented per platform.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Whether `ext` (with leading dot, any case) can be converted.
    fn can_convert(&self, ext: &str) -> bool {
        is_convertible(ext)
    }

    async fn convert(&self, src: &Path, opts: &ConvertOptions) -> Result<Conversion, ConvertError>;
}

/// Destination for a conversion: requested dir (or the source's), source
/// stem, target format extension; `_2, _3, ...` when the slot is taken.
pub async fn resolve_output_path(src: &Path, opts: &ConvertOptions) -> PathBuf {
    let dir = opts
        .output_dir
        .clone()
        .unwrap_or_else(|| src.parent().unwrap_or(Path::new(".")).to_path_buf());
    let stem = src
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut n = 1u32;
    loop {
        let candidate = if n == 1 {
            format!("{stem}.{}", opts.output_format)
        } else {
            format!("{stem}_{n}.{}", opts.output_format)
        };
        let full = dir.join(candidate);
        if !tokio::fs::try_exists(&full).await.unwrap_or(false) {
            return full;
        }
        n += 1;
    }
}

/// Converter shelling out to macOS `sips`.
pub struct SipsConverter {
    binary: PathBuf,
}

impl SipsConverter {
    /// Locate `sips` on the PATH.
    pub fn discover() -> Result<Self, ConvertError> {
        which::which("sips")
            .map(|binary| Self { binary })
            .map_err(|e| ConvertError::ToolMissing(format!("sips: {e}")))
    }
}

#[async_trait]
impl Converter for SipsConverter {
    async fn convert(&self, src: &Path, opts: &ConvertOptions) -> Result<Conversion, ConvertError> {
        let ext = utils::ext_with_dot(src);
        if !self.can_convert(&ext) {
            return Err(ConvertError::Unsupported(ext));
        }
        let dest = resolve_output_path(src, opts).await;
        let started = Instant::now();

        let mut command = tokio::process::Command::new(&self.binary);
        command.arg("-s").arg("format").arg(&opts.output_format);
        if opts.output_format == "jpeg" {
            command
                .arg("-s")
                .arg("formatOptions")
                .arg(opts.quality.unwrap_or(DEFAULT_JPEG_QUALITY).to_string());
        }
        command.arg(src).arg("--out").arg(&dest);

        let output = command.output().await?;
        if !output.status.success() {
            return Err(ConvertError::Failed {
                path: src.to_path_buf(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(Conversion {
            src_path: src.to_path_buf(),
            dest_path: dest,
            format: opts.output_format.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Placeholder used when no converter binary was found at startup.
///
/// Format tests still answer by extension so matching profiles route into
/// the convert pipeline, which then surfaces a descriptive convert-error.
pub struct MissingConverter;

#[async_trait]
impl Converter for MissingConverter {
    async fn convert(&self, _src: &Path, _opts: &ConvertOptions) -> Result<Conversion, ConvertError> {
        Err(ConvertError::ToolMissing(
            "no image conversion tool found on this system".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_is_convertible() {
        assert!(is_convertible(".heic"));
        assert!(is_convertible(".HEIC"));
        assert!(is_convertible(".Jpeg"));
        assert!(!is_convertible(".mp4"));
        assert!(!is_convertible(""));
    }

    #[tokio::test]
    async fn test_resolve_output_path_collisions() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("IMG_1234.heic");
        let opts = ConvertOptions::jpeg();

        assert_eq!(
            resolve_output_path(&src, &opts).await,
            dir.path().join("IMG_1234.jpeg")
        );

        tokio::fs::write(dir.path().join("IMG_1234.jpeg"), b"x")
            .await
            .unwrap();
        assert_eq!(
            resolve_output_path(&src, &opts).await,
            dir.path().join("IMG_1234_2.jpeg")
        );

        tokio::fs::write(dir.path().join("IMG_1234_2.jpeg"), b"x")
            .await
            .unwrap();
        assert_eq!(
            resolve_output_path(&src, &opts).await,
            dir.path().join("IMG_1234_3.jpeg")
        );
    }

    #[tokio::test]
    async fn test_resolve_output_path_honors_output_dir() {
        let dir = tempdir().unwrap();
        let out = tempdir().unwrap();
        let src = dir.path().join("a.png");
        let opts = ConvertOptions {
            output_dir: Some(out.path().to_path_buf()),
            ..ConvertOptions::jpeg()
        };
        assert_eq!(
            resolve_output_path(&src, &opts).await,
            out.path().join("a.jpeg")
        );
    }
}
