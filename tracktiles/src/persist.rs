//! Tile PNG persistence and the recycled image buffer pool.
//!
//! Tiles live at `<root>/<z>/<x>/<y>.png`. Writes go through a `.tmp`
//! sibling and a rename, so a crash never leaves a torn PNG behind.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{ImageFormat, RgbaImage};
use log::debug;
use parking_lot::Mutex;

use crate::error::{RenderError, Result};
use crate::slippy::{TileXy, TILE_SIZE};

/// Check that the output directory exists and is listable before any
/// rendering starts; tile writes only create the `z/x` subtrees.
pub fn check_output_dir(root: &Path) -> Result<()> {
    fs::read_dir(root).map_err(|source| RenderError::OutputDir {
        path: root.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Shared pool of retired tile buffers, reused across zoom levels to
/// avoid re-allocating 256 KiB images per tile.
#[derive(Default)]
pub struct FreeImages {
    pool: Mutex<Vec<RgbaImage>>,
}

impl FreeImages {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take a recycled buffer, cleared back to fully transparent.
    fn take(&self) -> Option<RgbaImage> {
        let mut img = self.pool.lock().pop()?;
        img.fill(0);
        Some(img)
    }

    fn put(&self, img: RgbaImage) {
        self.pool.lock().push(img);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pool.lock().len()
    }
}

/// Reads and writes tile images under one output directory.
pub struct TileStore {
    root: PathBuf,
    free: Arc<FreeImages>,
}

impl TileStore {
    pub fn new(root: impl Into<PathBuf>, free: Arc<FreeImages>) -> Self {
        Self {
            root: root.into(),
            free,
        }
    }

    pub fn tile_path(&self, xy: TileXy, z: u8) -> PathBuf {
        self.root
            .join(z.to_string())
            .join(xy.x.to_string())
            .join(format!("{}.png", xy.y))
    }

    /// A transparent 256x256 buffer, recycled when one is available.
    pub fn fresh_image(&self) -> RgbaImage {
        self.free
            .take()
            .unwrap_or_else(|| RgbaImage::new(TILE_SIZE as u32, TILE_SIZE as u32))
    }

    /// Return a buffer to the shared pool.
    pub fn recycle(&self, img: RgbaImage) {
        self.free.put(img);
    }

    /// Load an existing tile PNG. Anything unusable (missing file, decode
    /// failure, wrong dimensions) counts as "no existing tile".
    pub fn load(&self, xy: TileXy, z: u8) -> Option<RgbaImage> {
        let path = self.tile_path(xy, z);
        let img = match image::open(&path) {
            Ok(img) => img.into_rgba8(),
            Err(err) => {
                if path.exists() {
                    debug!("{}: unreadable, starting fresh: {err}", path.display());
                }
                return None;
            }
        };
        if img.dimensions() != (TILE_SIZE as u32, TILE_SIZE as u32) {
            debug!("{}: unexpected size, starting fresh", path.display());
            return None;
        }
        Some(img)
    }

    /// Write a tile image: encode to PNG, write `<path>.tmp`, rename.
    pub fn save(&self, xy: TileXy, z: u8, img: &RgbaImage) -> Result<()> {
        let path = self.tile_path(xy, z);
        if let Some(parent) = path.parent() {
            make_dirs(parent)?;
        }

        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

        let tmp = path.with_extension("png.tmp");
        fs::write(&tmp, &png)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Recursively remove the tree of one zoom level (`-I`). A missing
    /// tree is not an error.
    pub fn clear_zoom(&self, z: u8) -> std::io::Result<()> {
        match fs::remove_dir_all(self.root.join(z.to_string())) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}

#[cfg(unix)]
fn make_dirs(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o775).create(path)
}

#[cfg(not(unix))]
fn make_dirs(path: &Path) -> std::io::Result<()> {
    fs::create_dir_all(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> TileStore {
        TileStore::new(tmp.path(), FreeImages::new())
    }

    #[test]
    fn save_then_load_round_trips() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let xy = TileXy::new(42, 17);

        let mut img = store.fresh_image();
        img.put_pixel(10, 20, Rgba([255, 0, 0, 255]));
        store.save(xy, 18, &img).unwrap();

        assert!(tmp.path().join("18/42/17.png").exists());
        assert!(!tmp.path().join("18/42/17.png.tmp").exists());

        let loaded = store.load(xy, 18).expect("tile exists");
        assert_eq!(loaded.get_pixel(10, 20), &Rgba([255, 0, 0, 255]));
        assert_eq!(loaded.get_pixel(0, 0), &Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn load_missing_tile_is_none() {
        let tmp = TempDir::new().unwrap();
        assert!(store(&tmp).load(TileXy::new(1, 1), 3).is_none());
    }

    #[test]
    fn load_wrong_size_is_none() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let path = store.tile_path(TileXy::new(0, 0), 1);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        RgbaImage::new(64, 64).save(&path).unwrap();
        assert!(store.load(TileXy::new(0, 0), 1).is_none());
    }

    #[test]
    fn recycled_buffers_come_back_cleared() {
        let free = FreeImages::new();
        let store = TileStore::new("unused", Arc::clone(&free));

        let mut img = store.fresh_image();
        img.put_pixel(5, 5, Rgba([9, 9, 9, 9]));
        store.recycle(img);
        assert_eq!(free.len(), 1);

        let img = store.fresh_image();
        assert_eq!(free.len(), 0);
        assert_eq!(img.get_pixel(5, 5), &Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn output_dir_check_rejects_missing_directories() {
        let tmp = TempDir::new().unwrap();
        assert!(check_output_dir(tmp.path()).is_ok());
        let err = check_output_dir(&tmp.path().join("nope")).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn clear_zoom_removes_tree_and_tolerates_absence() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.save(TileXy::new(3, 4), 7, &store.fresh_image()).unwrap();
        assert!(tmp.path().join("7").exists());

        store.clear_zoom(7).unwrap();
        assert!(!tmp.path().join("7").exists());
        store.clear_zoom(7).unwrap();
    }
}
