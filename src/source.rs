use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use image::RgbaImage;
use log::debug;

use crate::error::FetchError;
use crate::frame::FrameSpec;
use crate::loader::{FetchReply, Fetched, FrameSource};

/// Reads frames from a directory, one worker thread per request.
///
/// A frame's `source` is resolved relative to the directory, with any leading
/// `/` ignored so web-style patterns work unchanged.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, spec: &FrameSpec) -> PathBuf {
        self.root.join(spec.source.trim_start_matches('/'))
    }
}

impl FrameSource for DirectorySource {
    type Image = RgbaImage;

    fn request(&self, spec: &FrameSpec, reply: FetchReply<Self>) {
        let path = self.resolve(spec);
        let spawned = thread::Builder::new()
            .name(format!("frame-{:03}", spec.index))
            .spawn(move || reply.complete(read_frame(&path)));
        // On spawn failure the reply is dropped, which reports a fetch failure.
        if let Err(err) = spawned {
            debug!("failed to spawn frame worker: {err}");
        }
    }
}

fn read_frame(path: &Path) -> Result<Fetched<RgbaImage>, FetchError> {
    let bytes = fs::read(path)
        .map_err(|err| FetchError::new(format!("{}: {err}", path.display())))?;
    let image = image::load_from_memory(&bytes)
        .map_err(|err| FetchError::new(format!("{}: {err}", path.display())))?;
    Ok(Fetched::decoded(image.to_rgba8()))
}
