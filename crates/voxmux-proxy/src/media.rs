//! Media delivery to clients and the media cache boundary.

use std::sync::Arc;

use dashmap::DashMap;
use voxmux_net::messages::{MediaBunch, MediaTransfer};

use crate::content::{GlobalContent, MediaFile};

/// A new bunch starts once the running byte total of the current one reaches
/// this.
pub const BYTES_PER_MEDIA_BUNCH: usize = 5000;

/// Known-good media files, so probes need not download them again.
pub trait MediaCache: Send + Sync {
    fn lookup(&self, name: &str, checksum: &str) -> Option<Arc<[u8]>>;

    /// Called with a server's complete media set after a probe fetched it.
    fn store(&self, files: &[MediaFile]);
}

/// Never hits, stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMediaCache;

impl MediaCache for NoMediaCache {
    fn lookup(&self, _name: &str, _checksum: &str) -> Option<Arc<[u8]>> {
        None
    }

    fn store(&self, _files: &[MediaFile]) {}
}

/// Keeps media in memory for the lifetime of the process.
#[derive(Default)]
pub struct MemoryMediaCache {
    files: DashMap<(String, String), Arc<[u8]>>,
}

impl MemoryMediaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl MediaCache for MemoryMediaCache {
    fn lookup(&self, name: &str, checksum: &str) -> Option<Arc<[u8]>> {
        self.files
            .get(&(name.to_string(), checksum.to_string()))
            .map(|entry| Arc::clone(entry.value()))
    }

    fn store(&self, files: &[MediaFile]) {
        for file in files {
            if let Some(data) = &file.data {
                self.files
                    .insert((file.name.clone(), file.checksum.clone()), Arc::clone(data));
            }
        }
    }
}

/// Group the requested files into bunches, in request order.
///
/// Names the merged content does not know, or has no bytes for, are logged
/// and skipped. At least one bunch is always produced so the client sees
/// the transfer end.
pub fn bunch_media(content: &GlobalContent, requested: &[String], client: &str) -> Vec<MediaBunch> {
    bunch_media_limited(content, requested, client, usize::from(u16::MAX))
}

/// Like [`bunch_media`], with at most `max_bunches` bunches. Files that do
/// not fit are logged and dropped.
fn bunch_media_limited(
    content: &GlobalContent,
    requested: &[String],
    client: &str,
    max_bunches: usize,
) -> Vec<MediaBunch> {
    let mut bunches: Vec<Vec<MediaTransfer>> = vec![Vec::new()];
    let mut bunch_size = 0;
    let mut full = false;

    for name in requested {
        let Some(data) = content.media(name).and_then(|f| f.data.as_ref()) else {
            tracing::warn!(dir = "<-", client = %client, file = %name, "request unknown media file");
            continue;
        };
        if full {
            tracing::warn!(dir = "<-", client = %client, file = %name, "too many media bunches, file dropped");
            continue;
        }

        if let Some(current) = bunches.last_mut() {
            current.push(MediaTransfer {
                name: name.clone(),
                data: data.to_vec(),
            });
        }
        bunch_size += data.len();
        if bunch_size >= BYTES_PER_MEDIA_BUNCH {
            if bunches.len() < max_bunches {
                bunches.push(Vec::new());
                bunch_size = 0;
            } else {
                full = true;
            }
        }
    }

    if bunches.len() > 1 && bunches.last().is_some_and(Vec::is_empty) {
        bunches.pop();
    }

    // Bounded by `max_bunches`, which never exceeds `u16::MAX`.
    let n = u16::try_from(bunches.len()).unwrap_or(u16::MAX);
    bunches
        .into_iter()
        .zip(0..=u16::MAX)
        .map(|(files, i)| MediaBunch { n, i, files })
        .collect()
}
