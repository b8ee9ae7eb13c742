//! Pixel I/O used by the palettizer: header probes, full reads, writes and removals.

use crate::config::ImageType;
use crate::error::{PaletteError, Result};
use image::{DynamicImage, ImageDecoder, ImageReader};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Size and channel count of an image, as read from its header.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageHeader {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
}

/// Storage the palettizer reads source images from and writes generated images to.
pub trait ImageStore {
    /// Reads only as much of the file as needed to learn its size and channel count.
    fn probe(&self, path: &Path) -> Result<ImageHeader>;
    /// Modification time in seconds since the epoch, if known.
    fn modified(&self, path: &Path) -> Option<u64>;
    fn read(&self, path: &Path) -> Result<DynamicImage>;
    fn write(&mut self, path: &Path, image: &DynamicImage, kind: ImageType) -> Result<()>;
    /// Removing a file that does not exist is not an error.
    fn remove(&mut self, path: &Path) -> Result<()>;
}

/// Converts `image` into something the encoder for `kind` accepts.
pub fn encodable(image: &DynamicImage, kind: ImageType) -> DynamicImage {
    if kind.supports_alpha() || !image.color().has_alpha() {
        return image.clone();
    }
    if image.color().channel_count() == 2 {
        DynamicImage::ImageLuma8(image.to_luma8())
    } else {
        DynamicImage::ImageRgb8(image.to_rgb8())
    }
}

/// Filesystem-backed store using the `image` crate codecs.
#[derive(Debug, Default, Clone)]
pub struct FsImageStore;

impl FsImageStore {
    pub fn new() -> Self {
        Self
    }
}

fn open_reader(path: &Path) -> Result<ImageReader<std::io::BufReader<fs::File>>> {
    let shown = path.display().to_string();
    ImageReader::open(path)
        .map_err(|e| PaletteError::read(shown.clone(), e))?
        .with_guessed_format()
        .map_err(|e| PaletteError::read(shown, e))
}

impl ImageStore for FsImageStore {
    fn probe(&self, path: &Path) -> Result<ImageHeader> {
        let decoder = open_reader(path)?
            .into_decoder()
            .map_err(|e| PaletteError::read(path.display().to_string(), e))?;
        let (width, height) = decoder.dimensions();
        Ok(ImageHeader {
            width,
            height,
            channels: decoder.color_type().channel_count(),
        })
    }

    fn modified(&self, path: &Path) -> Option<u64> {
        let time = fs::metadata(path).ok()?.modified().ok()?;
        time.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
    }

    fn read(&self, path: &Path) -> Result<DynamicImage> {
        open_reader(path)?
            .decode()
            .map_err(|e| PaletteError::read(path.display().to_string(), e))
    }

    fn write(&mut self, path: &Path, image: &DynamicImage, kind: ImageType) -> Result<()> {
        let shown = path.display().to_string();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| PaletteError::write(shown.clone(), e))?;
            }
        }
        encodable(image, kind)
            .save_with_format(path, kind.image_format())
            .map_err(|e| PaletteError::write(shown, e))
    }

    fn remove(&mut self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PaletteError::write(path.display().to_string(), e)),
        }
    }
}

/// In-memory store. Counts probes and reads and logs writes and removals,
/// which makes incremental behaviour observable.
#[derive(Debug, Default)]
pub struct MemoryImageStore {
    images: BTreeMap<PathBuf, (DynamicImage, u64)>,
    probes: Cell<usize>,
    reads: Cell<usize>,
    writes: Vec<PathBuf>,
    removals: Vec<PathBuf>,
    failing: BTreeSet<PathBuf>,
    clock: u64,
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) an image, stamping it with a fresh modification time.
    pub fn insert(&mut self, path: impl Into<PathBuf>, image: DynamicImage) {
        self.clock += 1;
        let stamp = self.clock;
        self.images.insert(path.into(), (image, stamp));
    }

    pub fn insert_with_time(&mut self, path: impl Into<PathBuf>, image: DynamicImage, modified: u64) {
        self.clock = self.clock.max(modified);
        self.images.insert(path.into(), (image, modified));
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<&DynamicImage> {
        self.images.get(path.as_ref()).map(|(img, _)| img)
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.images.contains_key(path.as_ref())
    }

    pub fn probe_count(&self) -> usize {
        self.probes.get()
    }

    pub fn read_count(&self) -> usize {
        self.reads.get()
    }

    pub fn writes(&self) -> &[PathBuf] {
        &self.writes
    }

    pub fn removals(&self) -> &[PathBuf] {
        &self.removals
    }

    /// Makes every later write to `path` fail, as a full or read-only disk would.
    pub fn fail_writes_to(&mut self, path: impl Into<PathBuf>) {
        self.failing.insert(path.into());
    }

    /// Lets writes to `path` succeed again.
    pub fn allow_writes_to(&mut self, path: impl AsRef<Path>) {
        self.failing.remove(path.as_ref());
    }

    /// Forgets the counters and the write/removal log, keeping the images.
    pub fn clear_log(&mut self) {
        self.probes.set(0);
        self.reads.set(0);
        self.writes.clear();
        self.removals.clear();
    }
}

impl ImageStore for MemoryImageStore {
    fn probe(&self, path: &Path) -> Result<ImageHeader> {
        self.probes.set(self.probes.get() + 1);
        let (image, _) = self
            .images
            .get(path)
            .ok_or_else(|| PaletteError::read(path.display().to_string(), "no such image"))?;
        Ok(ImageHeader {
            width: image.width(),
            height: image.height(),
            channels: image.color().channel_count(),
        })
    }

    fn modified(&self, path: &Path) -> Option<u64> {
        self.images.get(path).map(|(_, t)| *t)
    }

    fn read(&self, path: &Path) -> Result<DynamicImage> {
        self.reads.set(self.reads.get() + 1);
        self.images
            .get(path)
            .map(|(img, _)| img.clone())
            .ok_or_else(|| PaletteError::read(path.display().to_string(), "no such image"))
    }

    fn write(&mut self, path: &Path, image: &DynamicImage, kind: ImageType) -> Result<()> {
        if self.failing.contains(path) {
            return Err(PaletteError::write(path.display().to_string(), "write refused"));
        }
        self.clock += 1;
        let stamp = self.clock;
        self.images
            .insert(path.to_path_buf(), (encodable(image, kind), stamp));
        self.writes.push(path.to_path_buf());
        Ok(())
    }

    fn remove(&mut self, path: &Path) -> Result<()> {
        self.images.remove(path);
        self.removals.push(path.to_path_buf());
        Ok(())
    }
}
