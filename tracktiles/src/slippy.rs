//! Web mercator slippy-map tile math.
//!
//! Maps WGS84 coordinates to tile numbers and tile-relative pixel
//! positions per the OpenStreetMap slippy map convention: the world is
//! covered by `2^z x 2^z` tiles of 256x256 pixels at zoom `z`.

use std::f64::consts::PI;

/// Tile edge length in pixels.
pub const TILE_SIZE: i32 = 256;

/// A WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Check that the coordinate is finite and within WGS84 bounds.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Integer tile coordinates at some zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileXy {
    pub x: i32,
    pub y: i32,
}

impl TileXy {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A tile-relative pixel position.
///
/// May be negative or >= 256 when a point is expressed in a neighboring
/// tile's coordinate space; drawing clips per pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelXy {
    pub x: i32,
    pub y: i32,
}

impl PixelXy {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Express this pixel, native to tile `own`, in the space of tile
    /// `other` at the same zoom.
    pub fn translated(self, own: TileXy, other: TileXy) -> PixelXy {
        PixelXy {
            x: self.x + (own.x - other.x) * TILE_SIZE,
            y: self.y + (own.y - other.y) * TILE_SIZE,
        }
    }
}

/// Tile containing the given coordinate at zoom `z`.
pub fn tile_at(loc: LatLon, z: u8) -> TileXy {
    let n = 2.0_f64.powi(z as i32);
    let lat_rad = loc.lat.to_radians();
    TileXy {
        x: ((loc.lon + 180.0) / 360.0 * n).floor() as i32,
        y: ((1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * n).floor() as i32,
    }
}

/// Whether a tile coordinate exists at zoom `z`.
pub fn tile_in_range(xy: TileXy, z: u8) -> bool {
    let n = 1i32 << z.min(30);
    (0..n).contains(&xy.x) && (0..n).contains(&xy.y)
}

/// Longitude of the western edge of tile column `x`.
pub fn tile_x_to_lon(x: i32, z: u8) -> f64 {
    x as f64 / 2.0_f64.powi(z as i32) * 360.0 - 180.0
}

/// Latitude of the northern edge of tile row `y`.
pub fn tile_y_to_lat(y: i32, z: u8) -> f64 {
    let n = PI - 2.0 * PI * y as f64 / 2.0_f64.powi(z as i32);
    n.sinh().atan().to_degrees()
}

/// WGS84 bounds of a tile: south, west, north, east edges.
#[derive(Debug, Clone, Copy)]
pub struct Projection {
    pub s: f64,
    pub w: f64,
    pub n: f64,
    pub e: f64,
}

/// Projection rectangle of a tile.
pub fn project(xy: TileXy, z: u8) -> Projection {
    let unit = 360.0 / 2.0_f64.powi(z as i32);
    let w = -180.0 + xy.x as f64 * unit;
    Projection {
        s: tile_y_to_lat(xy.y + 1, z),
        w,
        n: tile_y_to_lat(xy.y, z),
        e: w + unit,
    }
}

/// Pixel position of a coordinate inside its own tile at zoom `z`.
///
/// The result is in `[0, 256)` for any in-range coordinate; callers that
/// need the position relative to another tile translate it afterwards.
pub fn pixel_pos(loc: LatLon, z: u8) -> PixelXy {
    let proj = project(tile_at(loc, z), z);
    PixelXy {
        x: ((loc.lon - proj.w) * TILE_SIZE as f64 / (proj.e - proj.w)) as i32,
        y: ((loc.lat - proj.n) * TILE_SIZE as f64 / (proj.s - proj.n)) as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_tile_covers_globe() {
        let proj = project(TileXy::new(0, 0), 0);
        assert!((proj.w - (-180.0)).abs() < 1e-9);
        assert!((proj.e - 180.0).abs() < 1e-9);
        assert!((proj.n - 85.0511).abs() < 0.001);
        assert!((proj.s + 85.0511).abs() < 0.001);
    }

    #[test]
    fn projection_round_trip() {
        for z in 0u8..=19 {
            let n = 1i32 << z;
            // Sample corners, edges and a diagonal; the full grid is 4^19.
            let samples = [0, 1, n / 3, n / 2, n - 2, n - 1];
            for &x in &samples {
                for &y in &samples {
                    if x < 0 || y < 0 || x >= n || y >= n {
                        continue;
                    }
                    let loc = LatLon::new(tile_y_to_lat(y, z), tile_x_to_lon(x, z));
                    // The NW corner belongs to the tile itself.
                    assert_eq!(tile_at(loc, z), TileXy::new(x, y), "z={z} x={x} y={y}");
                }
            }
        }
    }

    #[test]
    fn pixel_stays_inside_own_tile() {
        let pts = [
            LatLon::new(0.0, 0.0),
            LatLon::new(51.5074, -0.1278),
            LatLon::new(-33.8688, 151.2093),
            LatLon::new(84.9, -179.9),
            LatLon::new(-84.9, 179.9),
        ];
        for z in 0u8..=19 {
            for &loc in &pts {
                let pix = pixel_pos(loc, z);
                assert!((0..TILE_SIZE).contains(&pix.x), "{loc:?} z={z} -> {pix:?}");
                assert!((0..TILE_SIZE).contains(&pix.y), "{loc:?} z={z} -> {pix:?}");
            }
        }
    }

    #[test]
    fn equator_meridian_lands_on_tile_corner() {
        // (0, 0) at z=1: x = (0+180)/360*2 = 1, y = (1-0)/2*2 = 1,
        // and the pixel is the tile's NW corner.
        let loc = LatLon::new(0.0, 0.0);
        assert_eq!(tile_at(loc, 1), TileXy::new(1, 1));
        assert_eq!(pixel_pos(loc, 1), PixelXy::new(0, 0));
    }

    #[test]
    fn translated_pixel_shifts_by_tile_delta() {
        let pix = PixelXy::new(10, 20);
        let own = TileXy::new(5, 7);
        assert_eq!(pix.translated(own, own), pix);
        assert_eq!(
            pix.translated(own, TileXy::new(6, 7)),
            PixelXy::new(10 - 256, 20)
        );
        assert_eq!(
            pix.translated(own, TileXy::new(5, 6)),
            PixelXy::new(10, 20 + 256)
        );
    }
}
