//! Per-zoom tile cache with reference counting and a resident-image
//! budget.
//!
//! Each zoom level owns one `ZoomCache`, used from a single thread. A
//! tile's metadata stays in the cache for the whole zoom pass; its image
//! buffer exists only between `open` and a flush. Flushing writes the
//! PNG and recycles the buffer, so the budget bounds memory, not the
//! number of tiles touched.

use image::RgbaImage;
use log::{error, warn};

use crate::persist::TileStore;
use crate::slippy::{tile_x_to_lon, tile_y_to_lat, LatLon, TileXy};

/// Fixed bucket count of the per-zoom tile hash. Never resized: a single
/// render run touches at most a few thousand tiles per zoom level.
const TILE_BUCKETS: i64 = 256;

/// One slippy-map tile of the current zoom level.
#[derive(Debug)]
pub struct Tile {
    pub xy: TileXy,
    /// NW corner of the tile.
    pub loc: LatLon,
    pub point_cnt: i32,
    refcnt: i32,
    pub speed_labeled: bool,
    img: Option<RgbaImage>,
}

impl Tile {
    fn new(xy: TileXy, z: u8) -> Self {
        Tile {
            xy,
            loc: LatLon::new(tile_y_to_lat(xy.y, z), tile_x_to_lon(xy.x, z)),
            point_cnt: 0,
            refcnt: 0,
            speed_labeled: false,
            img: None,
        }
    }

    pub fn refcnt(&self) -> i32 {
        self.refcnt
    }

    pub fn is_open(&self) -> bool {
        self.img.is_some()
    }
}

/// Stable handle to a tile within its `ZoomCache`. Tiles are never
/// removed before `free_all`, so bucket/slot indices stay valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileId {
    bucket: usize,
    slot: usize,
}

/// The tile set of one zoom level.
pub struct ZoomCache {
    pub z: u8,
    buckets: Vec<Vec<Tile>>,
    tile_cnt: usize,
    resident: usize,
    max_resident: Option<usize>,
    budget_warned: bool,
    /// Tile width in degrees of longitude.
    pub xunit: f64,
    /// Tile height as a fraction of the projected world.
    pub yunit: f64,
}

fn bucket_of(xy: TileXy) -> usize {
    ((((xy.y as i64) << 3) | (xy.x as i64 & 7)).rem_euclid(TILE_BUCKETS)) as usize
}

impl ZoomCache {
    pub fn new(z: u8, max_resident: Option<usize>) -> Self {
        let n = 2.0_f64.powi(z as i32);
        ZoomCache {
            z,
            buckets: (0..TILE_BUCKETS).map(|_| Vec::new()).collect(),
            tile_cnt: 0,
            resident: 0,
            max_resident,
            budget_warned: false,
            xunit: 360.0 / n,
            yunit: 1.0 / n,
        }
    }

    pub fn tile_cnt(&self) -> usize {
        self.tile_cnt
    }

    pub fn resident_images(&self) -> usize {
        self.resident
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.buckets.iter().flatten()
    }

    pub fn tile(&self, id: TileId) -> &Tile {
        &self.buckets[id.bucket][id.slot]
    }

    pub fn tile_mut(&mut self, id: TileId) -> &mut Tile {
        &mut self.buckets[id.bucket][id.slot]
    }

    /// The open tile's image. `None` before `open` or after a flush.
    pub fn image_mut(&mut self, id: TileId) -> Option<&mut RgbaImage> {
        self.buckets[id.bucket][id.slot].img.as_mut()
    }

    /// Find or allocate the metadata entry for a tile coordinate.
    pub fn get_or_create(&mut self, xy: TileXy) -> TileId {
        let bucket = bucket_of(xy);
        if let Some(slot) = self.buckets[bucket].iter().position(|t| t.xy == xy) {
            return TileId { bucket, slot };
        }
        self.buckets[bucket].push(Tile::new(xy, self.z));
        self.tile_cnt += 1;
        TileId {
            bucket,
            slot: self.buckets[bucket].len() - 1,
        }
    }

    /// Pin the tile and make its image resident, loading the existing
    /// PNG when one is on disk. Every `open` pairs with one `close`.
    pub fn open(&mut self, id: TileId, store: &TileStore) {
        let z = self.z;
        let tile = self.tile_mut(id);
        tile.refcnt += 1;
        if tile.img.is_none() {
            let xy = tile.xy;
            let img = store.load(xy, z).unwrap_or_else(|| store.fresh_image());
            self.tile_mut(id).img = Some(img);
            self.resident += 1;
        }
    }

    /// Unpin the tile; then evict other tiles as needed to honor the
    /// resident-image budget.
    pub fn close(&mut self, id: TileId, store: &TileStore) {
        let z = self.z;
        let tile = self.tile_mut(id);
        if tile.refcnt <= 0 {
            error!("tile refcount underflow at z{z} {:?}", tile.xy);
            panic!("tile refcount underflow");
        }
        tile.refcnt -= 1;
        self.enforce_budget(store);
    }

    /// Write the tile's image to disk and drop it from memory. The
    /// metadata (including `point_cnt`) stays behind.
    pub fn flush(&mut self, id: TileId, store: &TileStore) {
        let z = self.z;
        let tile = self.tile_mut(id);
        let Some(img) = tile.img.take() else { return };
        let xy = tile.xy;
        self.resident -= 1;
        if let Err(err) = store.save(xy, z, &img) {
            warn!("z{} {}/{}: tile not written: {err}", z, xy.x, xy.y);
        }
        store.recycle(img);
    }

    fn enforce_budget(&mut self, store: &TileStore) {
        let Some(max) = self.max_resident else { return };
        while self.resident > max {
            match self.evict_candidate() {
                Some(id) => self.flush(id, store),
                None => {
                    if !self.budget_warned {
                        warn!(
                            "z{}: {} tile images resident, budget {max}, nothing evictable",
                            self.z, self.resident
                        );
                        self.budget_warned = true;
                    }
                    break;
                }
            }
        }
    }

    /// Any unpinned tile with a resident image, first found in bucket
    /// scan order.
    fn evict_candidate(&self) -> Option<TileId> {
        for (bucket, tiles) in self.buckets.iter().enumerate() {
            for (slot, tile) in tiles.iter().enumerate() {
                if tile.refcnt == 0 && tile.img.is_some() {
                    return Some(TileId { bucket, slot });
                }
            }
        }
        None
    }

    /// Take every resident image out of the cache, for a parallel final
    /// flush. Metadata stays.
    pub fn drain_images(&mut self) -> Vec<(TileXy, RgbaImage)> {
        let mut out = Vec::with_capacity(self.resident);
        for tile in self.buckets.iter_mut().flatten() {
            if let Some(img) = tile.img.take() {
                out.push((tile.xy, img));
            }
        }
        self.resident -= out.len();
        out
    }

    /// Finish the zoom level: flush anything still resident, recycle the
    /// buffers, and drop all tile metadata.
    pub fn free_all(&mut self, store: &TileStore) {
        let z = self.z;
        for (xy, img) in self.drain_images() {
            if let Err(err) = store.save(xy, z, &img) {
                warn!("z{} {}/{}: tile not written: {err}", z, xy.x, xy.y);
            }
            store.recycle(img);
        }
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.tile_cnt = 0;
    }
}
