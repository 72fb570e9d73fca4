use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::errors::{GatewayError, GatewayResult};
use crate::store::{MediaAttributes, ObjectRef, RawProgressFn, guess_mime};

use super::pool::SessionPool;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const MAX_NAME_CHARS: usize = 200;
const THUMBNAIL_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

// -----------------------------------------------------------------------------
// ----- UploadOptions ---------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct UploadOptions {
    pub title: Option<String>,
    pub performer: Option<String>,
    pub duration_secs: Option<u32>,
    pub thumbnail: Option<ThumbnailSource>,
}

#[derive(Clone, Debug)]
pub enum ThumbnailSource {
    Local(PathBuf),
    Remote(String),
}

/// Progress as surfaced to callers: (bytes sent, total, bytes per second).
pub type ProgressFn = Arc<dyn Fn(u64, u64, f64) + Send + Sync>;

// -----------------------------------------------------------------------------
// ----- Uploader --------------------------------------------------------------

pub struct Uploader {
    pool: Arc<SessionPool>,
    http: reqwest::Client,
}

impl Uploader {
    pub fn new(pool: Arc<SessionPool>) -> Self {
        Self {
            pool,
            http: reqwest::Client::builder()
                .timeout(THUMBNAIL_FETCH_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Send one local file to the bin channel and return its opaque
    /// reference. No retry here — the caller owns retry/backoff policy.
    pub async fn upload(
        &self,
        path: &Path,
        opts: UploadOptions,
        progress: Option<ProgressFn>,
    ) -> GatewayResult<ObjectRef> {
        if tokio::fs::metadata(path).await.is_err() {
            return Err(GatewayError::NotFound);
        }

        let original = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_owned());
        let clean_name = sanitize_name(&original);
        let mime = guess_mime(&clean_name);
        let attrs = classify(mime, &opts);

        // A remotely-fetched thumbnail lives in a NamedTempFile: dropping the
        // guard removes it whether the upload succeeds or not.
        let thumb_guard = self.fetch_thumbnail(opts.thumbnail.as_ref()).await;
        let thumb_path = match &thumb_guard {
            Some(ThumbFile::Local(p)) => Some(p.as_path()),
            Some(ThumbFile::Fetched(tmp)) => Some(tmp.path()),
            None => None,
        };

        let raw_progress = progress.map(wrap_progress);

        let session = self.pool.pick_for_write()?;
        info!("uploading {clean_name} ({mime}) on session {}", session.id());
        let id = session
            .send_file(path, &clean_name, &attrs, thumb_path, raw_progress)
            .await?;
        info!("upload complete, object ref {id}");
        Ok(id)
    }
}

// -----------------------------------------------------------------------------
// ----- Uploader: Private -----------------------------------------------------

enum ThumbFile {
    Local(PathBuf),
    Fetched(NamedTempFile),
}

impl Uploader {
    /// A thumbnail that can't be fetched degrades to no thumbnail.
    async fn fetch_thumbnail(&self, source: Option<&ThumbnailSource>) -> Option<ThumbFile> {
        match source {
            None => None,
            Some(ThumbnailSource::Local(path)) => Some(ThumbFile::Local(path.clone())),
            Some(ThumbnailSource::Remote(url)) => match self.download_thumbnail(url).await {
                Ok(tmp) => Some(ThumbFile::Fetched(tmp)),
                Err(err) => {
                    warn!("thumbnail fetch failed, uploading without: {err}");
                    None
                }
            },
        }
    }

    async fn download_thumbnail(&self, url: &str) -> Result<NamedTempFile, String> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| e.to_string())?;
        let body = resp.bytes().await.map_err(|e| e.to_string())?;

        let tmp = NamedTempFile::new().map_err(|e| e.to_string())?;
        tokio::fs::write(tmp.path(), &body)
            .await
            .map_err(|e| e.to_string())?;
        debug!("fetched thumbnail ({} bytes) from {url}", body.len());
        Ok(tmp)
    }
}

/// Wrap the caller's callback so it also sees instantaneous throughput.
fn wrap_progress(progress: ProgressFn) -> RawProgressFn {
    let started = Instant::now();
    Arc::new(move |sent, total| {
        let elapsed = started.elapsed().as_secs_f64();
        let speed = if elapsed > 0.0 { sent as f64 / elapsed } else { 0.0 };
        progress(sent, total, speed);
    })
}

// -----------------------------------------------------------------------------
// ----- Name sanitizing -------------------------------------------------------

/// Display name safe for the backing store's filename attribute: pipes become
/// dashes, characters illegal in filenames are stripped, and the result is
/// truncated to 200 chars with the extension preserved.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        match ch {
            '｜' | '|' => out.push('-'),
            '<' | '>' | ':' | '"' | '/' | '\\' | '?' | '*' => {}
            _ => out.push(ch),
        }
    }

    if out.chars().count() <= MAX_NAME_CHARS {
        return out;
    }

    let (stem, ext) = match out.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_owned(), format!(".{ext}")),
        _ => (out.clone(), String::new()),
    };
    let keep = MAX_NAME_CHARS.saturating_sub(ext.chars().count());
    let mut truncated: String = stem.chars().take(keep).collect();
    truncated.push_str(&ext);
    truncated
}

// -----------------------------------------------------------------------------
// ----- Attribute classification ----------------------------------------------

/// Tagged attribute variant by MIME class. The filename attribute rides
/// along separately whatever this returns.
pub fn classify(mime: &str, opts: &UploadOptions) -> MediaAttributes {
    if mime.starts_with("video/") {
        MediaAttributes::Video {
            duration_secs: opts.duration_secs.unwrap_or(0),
            supports_streaming: true,
        }
    } else if mime.starts_with("audio/") {
        MediaAttributes::Audio {
            duration_secs: opts.duration_secs.unwrap_or(0),
            title: opts.title.clone(),
            performer: opts.performer.clone(),
        }
    } else {
        MediaAttributes::Plain
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_pipes_and_strips_illegal_chars() {
        assert_eq!(
            sanitize_name(r#"artist ｜ track: "live"/take?2*.mp3"#),
            "artist - track livetake2.mp3"
        );
    }

    #[test]
    fn sanitize_truncates_preserving_extension() {
        let long = format!("{}.mp3", "x".repeat(500));
        let out = sanitize_name(&long);
        assert_eq!(out.chars().count(), 200);
        assert!(out.ends_with(".mp3"));
    }

    #[test]
    fn sanitize_leaves_short_names_alone() {
        assert_eq!(sanitize_name("track.mp3"), "track.mp3");
    }

    #[test]
    fn classify_by_mime_class() {
        let opts = UploadOptions {
            title: Some("Song".into()),
            performer: Some("Band".into()),
            duration_secs: Some(180),
            thumbnail: None,
        };

        assert_eq!(
            classify("audio/mpeg", &opts),
            MediaAttributes::Audio {
                duration_secs: 180,
                title: Some("Song".into()),
                performer: Some("Band".into()),
            }
        );
        assert_eq!(
            classify("video/mp4", &opts),
            MediaAttributes::Video {
                duration_secs: 180,
                supports_streaming: true,
            }
        );
        assert_eq!(classify("application/pdf", &opts), MediaAttributes::Plain);
    }

    #[test]
    fn progress_wrapper_reports_throughput() {
        use std::sync::Mutex;
        let seen: Arc<Mutex<Vec<(u64, u64, f64)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let wrapped = wrap_progress(Arc::new(move |sent, total, speed| {
            sink.lock().unwrap().push((sent, total, speed));
        }));

        std::thread::sleep(std::time::Duration::from_millis(5));
        wrapped(1024, 2048);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (sent, total, speed) = seen[0];
        assert_eq!((sent, total), (1024, 2048));
        assert!(speed > 0.0);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
