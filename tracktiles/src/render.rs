//! Render configuration and the per-zoom worker loop.
//!
//! Each zoom level runs make tiles -> save -> free against its own tile
//! cache. Zoom levels are independent, so they are partitioned across
//! worker threads; high and low zooms interleave so every worker gets a
//! mix of cheap and expensive levels.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use image::Rgba;
use log::{info, warn};
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::persist::{FreeImages, TileStore};
use crate::raster::{self, PassFlags};
use crate::tile::ZoomCache;
use crate::track::Track;

/// Highest zoom level the tile scheme supports here.
pub const MAX_ZOOM: u8 = 19;

/// Diagnostic overlay switches (`-d` bitmask).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagMask(u8);

impl DiagMask {
    pub const SHADOWS: u8 = 1 << 0;
    pub const CROSSINGS: u8 = 1 << 1;
    pub const LABELS: u8 = 1 << 2;

    pub fn from_bits(bits: u8) -> Self {
        DiagMask(bits)
    }

    /// Shadow DOP circles on precise points.
    pub fn shadows(self) -> bool {
        self.0 & Self::SHADOWS != 0
    }

    /// Highlight cross-tile line segments.
    pub fn crossings(self) -> bool {
        self.0 & Self::CROSSINGS != 0
    }

    /// Per-tile speed labels.
    pub fn labels(self) -> bool {
        self.0 & Self::LABELS != 0
    }
}

/// Everything a render run needs to know.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub out_dir: PathBuf,
    pub min_zoom: u8,
    pub max_zoom: u8,
    /// Wipe each requested `<z>/` tree before rendering.
    pub reinit: bool,
    /// Resident tile image budget per zoom level; `None` is unbounded.
    pub max_resident: Option<usize>,
    /// Thread count for loaders and zoom workers.
    pub jobs: usize,
    /// Below this zoom only dots are drawn.
    pub no_lines_below: u8,
    /// Waypoints appear from this zoom on.
    pub waypoints_from: u8,
    pub heatmap: bool,
    /// Line width per zoom level, indexed by `z`.
    pub thickness: [u8; (MAX_ZOOM + 1) as usize],
    /// Fixed line color overriding the speed palette.
    pub fixed_color: Option<Rgba<u8>>,
    /// Assumed speed in km/h overriding per-point speeds.
    pub assumed_speed_kph: Option<f64>,
    /// Waypoint disc diameter in pixels.
    pub waypoint_diameter: u32,
    pub diag: DiagMask,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            out_dir: PathBuf::from("."),
            min_zoom: 1,
            max_zoom: 18,
            reinit: false,
            max_resident: None,
            jobs: 4,
            no_lines_below: 7,
            waypoints_from: 16,
            heatmap: false,
            thickness: [1; (MAX_ZOOM + 1) as usize],
            fixed_color: None,
            assumed_speed_kph: None,
            waypoint_diameter: 5,
            diag: DiagMask::default(),
        }
    }
}

impl RenderConfig {
    /// Line width at a zoom level.
    pub fn thickness(&self, z: u8) -> u8 {
        self.thickness[(z.min(MAX_ZOOM)) as usize]
    }

    /// Set the line width at `z`, optionally extending it to every
    /// higher zoom (the `-t z:w+` form).
    pub fn set_thickness(&mut self, z: u8, width: u8, extend: bool) {
        let z = z.min(MAX_ZOOM) as usize;
        if extend {
            for w in &mut self.thickness[z..] {
                *w = width;
            }
        } else {
            self.thickness[z] = width;
        }
    }
}

/// What a render run produced.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderStats {
    /// Tiles touched across all zoom levels.
    pub tiles: usize,
}

/// Owns the shared buffer pool and drives the zoom workers.
pub struct Renderer {
    cfg: RenderConfig,
    free: Arc<FreeImages>,
}

/// Zoom order interleaving cheap and expensive levels:
/// `zmin, zmax, zmin+1, zmax-1, ...`
fn interleaved_zooms(zmin: u8, zmax: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity((zmax - zmin + 1) as usize);
    let (mut lo, mut hi) = (zmin, zmax);
    while lo < hi {
        out.push(lo);
        out.push(hi);
        lo += 1;
        hi -= 1;
    }
    if lo == hi {
        out.push(lo);
    }
    out
}

impl Renderer {
    pub fn new(cfg: RenderConfig) -> Self {
        Renderer {
            cfg,
            free: FreeImages::new(),
        }
    }

    /// Render every zoom level for the given tracks.
    pub fn run(&self, tracks: &[Track]) -> RenderStats {
        let zmin = self.cfg.min_zoom;
        let zmax = self.cfg.max_zoom.max(zmin);

        if self.cfg.reinit {
            let store = TileStore::new(self.cfg.out_dir.clone(), Arc::clone(&self.free));
            for z in zmin..=zmax {
                if let Err(err) = store.clear_zoom(z) {
                    warn!("z{z}: could not clear tile tree: {err}");
                }
            }
        }

        let order = interleaved_zooms(zmin, zmax);
        let workers = self.cfg.jobs.clamp(1, order.len());
        let tiles = Mutex::new(0usize);

        thread::scope(|s| {
            for w in 0..workers {
                let zooms: Vec<u8> = order.iter().skip(w).step_by(workers).copied().collect();
                let tiles = &tiles;
                s.spawn(move || {
                    for z in zooms {
                        let n = self.render_zoom(z, tracks);
                        *tiles.lock() += n;
                    }
                });
            }
        });

        RenderStats {
            tiles: tiles.into_inner(),
        }
    }

    /// One zoom level: rasterize all tracks, flush, free. Returns the
    /// tile count.
    fn render_zoom(&self, z: u8, tracks: &[Track]) -> usize {
        let store = TileStore::new(self.cfg.out_dir.clone(), Arc::clone(&self.free));
        let mut cache = ZoomCache::new(z, self.cfg.max_resident);

        for track in tracks {
            for seg in &track.segments {
                let flags = PassFlags {
                    badsrc: seg.src.unreliable_speed(),
                    ..PassFlags::default()
                };
                raster::draw_points(&mut cache, &store, &self.cfg, &seg.points, flags);
            }
            if z >= self.cfg.waypoints_from && !track.waypoints.is_empty() {
                let flags = PassFlags {
                    no_lines: true,
                    circle: true,
                    ..PassFlags::default()
                };
                raster::draw_points(&mut cache, &store, &self.cfg, &track.waypoints, flags);
            }
        }

        let tiles = cache.tile_cnt();
        info!(
            "z {z} ({tiles} tiles, dx {:.6} dy {:.9})",
            cache.xunit, cache.yunit
        );

        self.save_zoom_level(&mut cache, &store);
        cache.free_all(&store);
        tiles
    }

    /// Flush every resident tile of a finished zoom level; the PNG
    /// encodes are independent, so they run on the rayon pool.
    fn save_zoom_level(&self, cache: &mut ZoomCache, store: &TileStore) {
        let z = cache.z;
        cache.drain_images().into_par_iter().for_each(|(xy, img)| {
            if let Err(err) = store.save(xy, z, &img) {
                warn!("z{z} {}/{}: tile not written: {err}", xy.x, xy.y);
            }
            store.recycle(img);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zooms_interleave_low_and_high() {
        assert_eq!(interleaved_zooms(1, 5), vec![1, 5, 2, 4, 3]);
        assert_eq!(interleaved_zooms(3, 4), vec![3, 4]);
        assert_eq!(interleaved_zooms(7, 7), vec![7]);
    }

    #[test]
    fn thickness_extends_to_higher_zooms() {
        let mut cfg = RenderConfig::default();
        cfg.set_thickness(12, 3, false);
        assert_eq!(cfg.thickness(12), 3);
        assert_eq!(cfg.thickness(13), 1);

        cfg.set_thickness(14, 2, true);
        assert_eq!(cfg.thickness(13), 1);
        assert_eq!(cfg.thickness(14), 2);
        assert_eq!(cfg.thickness(MAX_ZOOM), 2);
    }

    #[test]
    fn diag_mask_bits() {
        let d = DiagMask::from_bits(DiagMask::SHADOWS | DiagMask::LABELS);
        assert!(d.shadows());
        assert!(!d.crossings());
        assert!(d.labels());
        assert!(!DiagMask::default().shadows());
    }
}
