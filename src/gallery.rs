//! Gallery cache: invalidation-driven, rebuilt-on-demand directory summary.
//!
//! Mutations never update the cache in place; they set the dirty flag and
//! the next read does a full rebuild. The flag is set before the underlying
//! file operation is attempted, so the cache can over-invalidate but never
//! serve a stale listing after a known mutation.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Thumbnail files carry this prefix and are excluded from listings.
pub const THUMB_PREFIX: &str = "thumb_";
/// Duration sidecar extension, appended to the media file name.
pub const SIDECAR_SUFFIX: &str = ".meta";

/// Media kind by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
}

/// One stored artifact.
#[derive(Debug, Clone, Serialize)]
pub struct MediaItem {
    pub name: String,
    pub kind: MediaKind,
    pub size_bytes: u64,
    /// Recorded duration from the sidecar, videos only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
}

/// Cached directory summary plus aggregate usage figures.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GalleryListing {
    pub items: Vec<MediaItem>,
    pub used_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_bytes: Option<u64>,
}

/// Dirty-flag cache over the storage root.
pub struct Gallery {
    root: PathBuf,
    dirty: AtomicBool,
    cached: Mutex<GalleryListing>,
}

impl Gallery {
    /// Starts dirty so the first read reflects whatever is already on disk.
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            dirty: AtomicBool::new(true),
            cached: Mutex::new(GalleryListing::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Mark the cached listing stale. Idempotent; called from every
    /// mutation site.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Current listing, rebuilding first if a mutation invalidated it.
    pub async fn listing(&self) -> GalleryListing {
        let mut cached = self.cached.lock().await;
        // Clear the flag before scanning: a mutation landing mid-rebuild
        // re-marks dirty and the next read reconciles.
        if self.dirty.swap(false, Ordering::SeqCst) {
            *cached = rebuild(&self.root);
        }
        cached.clone()
    }

    /// Absolute path for a stored artifact, after name validation.
    pub fn media_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    /// Delete one artifact plus its thumbnail and sidecar.
    pub fn delete(&self, name: &str) -> Result<()> {
        self.mark_dirty();
        let path = self.media_path(name)?;
        fs::remove_file(&path).with_context(|| format!("Failed to delete {:?}", path))?;
        remove_companions(&self.root, name);
        debug!(%name, "media deleted");
        Ok(())
    }

    /// Delete every artifact in the storage root. Returns how many media
    /// files were removed; individual failures are logged and skipped.
    pub fn delete_all(&self) -> Result<usize> {
        self.mark_dirty();
        let entries = fs::read_dir(&self.root).context("Storage root unavailable")?;

        let mut removed = 0usize;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_media = classify(&path).is_some();
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = ?path, error = %e, "failed to delete file");
            } else if is_media {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Full rebuild by enumerating storage. Storage unavailable yields a
/// well-formed empty listing.
fn rebuild(root: &Path) -> GalleryListing {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(root = ?root, error = %e, "storage unavailable, serving empty listing");
            return GalleryListing::default();
        }
    };

    let mut items = Vec::new();
    let mut used_bytes = 0u64;

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Ok(meta) = entry.metadata() {
            used_bytes += meta.len();
        }

        let Some((name, kind)) = classify(&path) else {
            continue;
        };
        let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let duration_secs = match kind {
            MediaKind::Video => read_sidecar_duration(&path),
            MediaKind::Photo => None,
        };

        items.push(MediaItem {
            name,
            kind,
            size_bytes,
            duration_secs,
        });
    }

    // Timestamp-prefixed names: reverse lexicographic puts newest first
    items.sort_by(|a, b| b.name.cmp(&a.name));

    GalleryListing {
        items,
        used_bytes,
        available_bytes: available_bytes(root),
    }
}

/// Recognized media file under its listing name, or `None` for internal
/// artifacts (thumbnails, sidecars) and anything else.
fn classify(path: &Path) -> Option<(String, MediaKind)> {
    let name = path.file_name()?.to_str()?;
    if name.starts_with(THUMB_PREFIX) {
        return None;
    }
    let kind = match path.extension()?.to_str()? {
        "jpg" => MediaKind::Photo,
        "mjpg" => MediaKind::Video,
        _ => return None,
    };
    Some((name.to_string(), kind))
}

/// Duration persisted by the recorder at stop time.
fn read_sidecar_duration(media: &Path) -> Option<u64> {
    let mut sidecar = media.as_os_str().to_owned();
    sidecar.push(SIDECAR_SUFFIX);
    let raw = fs::read_to_string(PathBuf::from(sidecar)).ok()?;
    let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
    value.get("duration_secs")?.as_u64()
}

/// Best-effort removal of a media file's thumbnail and sidecar.
fn remove_companions(root: &Path, name: &str) {
    let _ = fs::remove_file(root.join(format!("{}{}", THUMB_PREFIX, thumb_stem(name))));
    let _ = fs::remove_file(root.join(format!("{}{}", name, SIDECAR_SUFFIX)));
}

/// Thumbnail name for a media file: stem with a jpg extension.
fn thumb_stem(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, _)) => format!("{}.jpg", stem),
        None => format!("{}.jpg", name),
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
        bail!("invalid media name: {:?}", name);
    }
    Ok(())
}

/// Free space on the filesystem holding the storage root.
#[cfg(unix)]
fn available_bytes(root: &Path) -> Option<u64> {
    use std::ffi::CString;
    let c_path = CString::new(root.to_str()?).ok()?;
    unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
            return None;
        }
        #[allow(clippy::unnecessary_cast)]
        Some(stat.f_bavail as u64 * stat.f_frsize as u64)
    }
}

#[cfg(not(unix))]
fn available_bytes(_root: &Path) -> Option<u64> {
    None
}
