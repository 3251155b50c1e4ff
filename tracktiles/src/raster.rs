//! Point and line rasterization into tile images.
//!
//! The walker follows a point sequence, opening the tile under each
//! point (and the previous point's tile) and drawing dots, waypoint
//! discs, DOP circles, and connecting lines. Lines that leave their
//! endpoint tiles are split across neighbors via `clip`. Drawing is
//! aliased on purpose: anti-aliased strokes smear badly over light base
//! maps.

use image::{Rgba, RgbaImage};

use crate::clip;
use crate::persist::TileStore;
use crate::render::RenderConfig;
use crate::slippy::{pixel_pos, tile_at, tile_in_range, PixelXy, TileXy, TILE_SIZE};
use crate::tile::{TileId, ZoomCache};
use crate::track::Point;

/// Speed bucket upper bounds in km/h. Speeds above the last bound take
/// the final color.
pub const SPEED_KPH_BOUNDS: [f64; 8] = [0.0, 10.0, 20.0, 25.0, 40.0, 50.0, 55.0, 60.0];

/// One color per speed bucket, slowest first.
const SPEED_COLORS: [Rgba<u8>; 9] = [
    Rgba([0x00, 0x00, 0x7f, 0xff]), // navy: no speed / standing
    Rgba([0xcf, 0x00, 0x00, 0xff]), // dark red
    Rgba([0xa4, 0x61, 0x00, 0xff]), // brown
    Rgba([0xf4, 0xfb, 0x39, 0xff]), // yellow
    Rgba([0x00, 0x7f, 0x00, 0xff]), // green
    Rgba([0x00, 0x9f, 0x9f, 0xff]), // teal
    Rgba([0x1e, 0x83, 0xff, 0xff]), // sky blue
    Rgba([0x7a, 0x3f, 0xe0, 0xff]), // violet
    Rgba([0xd0, 0x00, 0xd0, 0xff]), // magenta
];

/// Cross-tile segments drawn with the crossings diagnostic enabled.
const HIGHLIGHT_COLOR: Rgba<u8> = Rgba([0xff, 0x00, 0xef, 0xff]);

/// Shadow DOP circle for points that pass the precision cut.
const SHADOW_COLOR: Rgba<u8> = Rgba([40, 40, 40, 120]);

/// Heatmap base color: dark red, HSV value 0.3.
const HEAT_BASE: Rgba<u8> = Rgba([77, 0, 0, 255]);
const HEAT_STEP: f32 = 0.05;

/// Zoom from which heatmap points cover a 3x3 square.
const HEAT_SQUARE_ZOOM: u8 = 15;

/// Zoom from which DOP circles are drawn.
const DOP_MIN_ZOOM: u8 = 17;

/// Minimum pdop considered bad enough to mark.
const DOP_BAD: f32 = 1.8;

/// Segments slower than this (km/h) draw no line: stationary GPS jitter
/// produces speckle, not movement.
pub const NO_LINES_SPEED_KPH: f64 = 1.0;

/// Per-pass draw switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassFlags {
    /// Never draw connecting lines (waypoint passes).
    pub no_lines: bool,
    /// The segment source is unreliable; ignore its speeds.
    pub badsrc: bool,
    /// Draw each point as a filled disc.
    pub circle: bool,
}

/// Bucket index for a speed in km/h: the lowest bound not below it.
pub fn speed_bucket(kph: f64) -> usize {
    SPEED_KPH_BOUNDS
        .iter()
        .position(|&b| kph <= b)
        .unwrap_or(SPEED_KPH_BOUNDS.len())
}

fn effective_kph(pt: &Point, flags: PassFlags, cfg: &RenderConfig) -> Option<f64> {
    cfg.assumed_speed_kph.or_else(|| {
        if flags.badsrc {
            None
        } else {
            pt.speed.map(|s| s * 3.6)
        }
    })
}

fn point_color(pt: &Point, flags: PassFlags, cfg: &RenderConfig) -> Rgba<u8> {
    if let Some(c) = cfg.fixed_color {
        return c;
    }
    SPEED_COLORS[speed_bucket(effective_kph(pt, flags, cfg).unwrap_or(0.0))]
}

// ---------------------------------------------------------------------
// Pixel primitives
// ---------------------------------------------------------------------

fn put_pixel(img: &mut RgbaImage, x: i32, y: i32, color: Rgba<u8>) {
    if (0..TILE_SIZE).contains(&x) && (0..TILE_SIZE).contains(&y) {
        img.put_pixel(x as u32, y as u32, color);
    }
}

/// Source-over blend for translucent annotation colors.
fn blend_pixel(img: &mut RgbaImage, x: i32, y: i32, color: Rgba<u8>) {
    if !(0..TILE_SIZE).contains(&x) || !(0..TILE_SIZE).contains(&y) {
        return;
    }
    let dst = img.get_pixel_mut(x as u32, y as u32);
    let src_a = color[3] as f32 / 255.0;
    let dst_a = dst[3] as f32 / 255.0;
    let out_a = src_a + dst_a * (1.0 - src_a);
    if out_a <= 0.0 {
        return;
    }
    for i in 0..3 {
        let s = color[i] as f32;
        let d = dst[i] as f32;
        dst[i] = ((s * src_a + d * dst_a * (1.0 - src_a)) / out_a) as u8;
    }
    dst[3] = (out_a * 255.0) as u8;
}

/// Bresenham line walk; endpoints may lie outside the tile, the bounds
/// check clips per pixel.
fn draw_line_px(img: &mut RgbaImage, a: PixelXy, b: PixelXy, color: Rgba<u8>) {
    let (mut x, mut y) = (a.x, a.y);
    let dx = (b.x - a.x).abs();
    let sx = if a.x < b.x { 1 } else { -1 };
    let dy = -(b.y - a.y).abs();
    let sy = if a.y < b.y { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        put_pixel(img, x, y, color);
        if x == b.x && y == b.y {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

/// Thick lines draw as parallel single-pixel lines offset along the
/// minor axis.
fn draw_line(img: &mut RgbaImage, a: PixelXy, b: PixelXy, color: Rgba<u8>, width: i32) {
    if width <= 1 {
        draw_line_px(img, a, b, color);
        return;
    }
    let along_x = (b.x - a.x).abs() >= (b.y - a.y).abs();
    for i in 0..width {
        let off = i - width / 2;
        let (oa, ob) = if along_x {
            (PixelXy::new(a.x, a.y + off), PixelXy::new(b.x, b.y + off))
        } else {
            (PixelXy::new(a.x + off, a.y), PixelXy::new(b.x + off, b.y))
        };
        draw_line_px(img, oa, ob, color);
    }
}

fn draw_disc(img: &mut RgbaImage, c: PixelXy, diameter: i32, color: Rgba<u8>) {
    let r = (diameter / 2).max(0);
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy <= r * r {
                put_pixel(img, c.x + dx, c.y + dy, color);
            }
        }
    }
}

/// Midpoint circle outline, blended.
fn draw_circle(img: &mut RgbaImage, c: PixelXy, diameter: i32, color: Rgba<u8>) {
    let r = (diameter / 2).max(1);
    let (mut x, mut y) = (r, 0);
    let mut d = 1 - r;
    while x >= y {
        for &(px, py) in &[
            (c.x + x, c.y + y),
            (c.x - x, c.y + y),
            (c.x + x, c.y - y),
            (c.x - x, c.y - y),
            (c.x + y, c.y + x),
            (c.x - y, c.y + x),
            (c.x + y, c.y - x),
            (c.x - y, c.y - x),
        ] {
            blend_pixel(img, px, py, color);
        }
        y += 1;
        if d < 0 {
            d += 2 * y + 1;
        } else {
            x -= 1;
            d += 2 * (y - x) + 1;
        }
    }
}

// 3x5 digit glyphs for the per-tile speed label, one bitmask row per
// scanline.
const DIGIT_GLYPHS: [[u8; 5]; 10] = [
    [0b111, 0b101, 0b101, 0b101, 0b111], // 0
    [0b010, 0b110, 0b010, 0b010, 0b111], // 1
    [0b111, 0b001, 0b111, 0b100, 0b111], // 2
    [0b111, 0b001, 0b111, 0b001, 0b111], // 3
    [0b101, 0b101, 0b111, 0b001, 0b001], // 4
    [0b111, 0b100, 0b111, 0b001, 0b111], // 5
    [0b111, 0b100, 0b111, 0b101, 0b111], // 6
    [0b111, 0b001, 0b001, 0b001, 0b001], // 7
    [0b111, 0b101, 0b111, 0b101, 0b111], // 8
    [0b111, 0b101, 0b111, 0b001, 0b111], // 9
];

fn draw_label(img: &mut RgbaImage, x: i32, y: i32, text: &str, color: Rgba<u8>) {
    let mut cx = x;
    for ch in text.chars() {
        if let Some(d) = ch.to_digit(10) {
            let glyph = &DIGIT_GLYPHS[d as usize];
            for (row, bits) in glyph.iter().enumerate() {
                for col in 0..3 {
                    if bits & (0b100 >> col) != 0 {
                        put_pixel(img, cx + col, y + row as i32, color);
                    }
                }
            }
        }
        cx += 4;
    }
}

// ---------------------------------------------------------------------
// Heatmap
// ---------------------------------------------------------------------

fn rgb_to_hsv(p: Rgba<u8>) -> (f32, f32, f32) {
    let r = p[0] as f32 / 255.0;
    let g = p[1] as f32 / 255.0;
    let b = p[2] as f32 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let d = max - min;
    let h = if d == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / d).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / d + 2.0)
    } else {
        60.0 * ((r - g) / d + 4.0)
    };
    let s = if max == 0.0 { 0.0 } else { d / max };
    (h, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgba<u8> {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;
    let (r, g, b) = match (h / 60.0) as i32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    Rgba([
        ((r + m) * 255.0).round() as u8,
        ((g + m) * 255.0).round() as u8,
        ((b + m) * 255.0).round() as u8,
        255,
    ])
}

/// Visit a heatmap pixel: first touch paints the base color, every
/// further touch raises the HSV value, saturating at 1.
fn heat_pixel(img: &mut RgbaImage, x: i32, y: i32) {
    if !(0..TILE_SIZE).contains(&x) || !(0..TILE_SIZE).contains(&y) {
        return;
    }
    let px = *img.get_pixel(x as u32, y as u32);
    let next = if px[3] == 0 {
        HEAT_BASE
    } else {
        let (h, s, v) = rgb_to_hsv(px);
        hsv_to_rgb(h, s, (v + HEAT_STEP).min(1.0))
    };
    img.put_pixel(x as u32, y as u32, next);
}

fn heat_dot(img: &mut RgbaImage, pix: PixelXy, z: u8) {
    if z >= HEAT_SQUARE_ZOOM {
        for dy in -1..=1 {
            for dx in -1..=1 {
                heat_pixel(img, pix.x + dx, pix.y + dy);
            }
        }
    } else {
        heat_pixel(img, pix.x, pix.y);
    }
}

// ---------------------------------------------------------------------
// Point walker
// ---------------------------------------------------------------------

/// Rasterize a point sequence into the zoom level's tiles.
pub fn draw_points(
    cache: &mut ZoomCache,
    store: &TileStore,
    cfg: &RenderConfig,
    points: &[Point],
    flags: PassFlags,
) {
    let z = cache.z;
    let width = cfg.thickness(z) as i32;
    let mut prev: Option<(TileXy, PixelXy)> = None;

    for pt in points {
        if !pt.loc.is_valid() {
            prev = None;
            continue;
        }
        let xy = tile_at(pt.loc, z);
        let pix = pixel_pos(pt.loc, z);
        let id = cache.get_or_create(xy);
        cache.open(id, store);
        cache.tile_mut(id).point_cnt += 1;

        let (pxy, ppix) = prev.unwrap_or((xy, pix));
        let pid = cache.get_or_create(pxy);
        cache.open(pid, store);

        if cfg.heatmap {
            if let Some(img) = cache.image_mut(id) {
                heat_dot(img, pix, z);
            }
        } else {
            let color = point_color(pt, flags, cfg);
            if let Some(img) = cache.image_mut(id) {
                put_pixel(img, pix.x, pix.y, color);
            }
            if flags.circle {
                draw_spilled_disc(cache, store, xy, pix, cfg.waypoint_diameter as i32, color);
            }
            annotate_point(cache, id, pix, pt, color, cfg);
            if !flags.no_lines && z >= cfg.no_lines_below {
                draw_connecting_line(
                    cache, store, cfg, flags, id, pxy, ppix, xy, pix, pt, color, width,
                );
            }
        }

        cache.close(pid, store);
        cache.close(id, store);
        prev = Some((xy, pix));
    }
}

/// DOP circles and the once-per-tile speed label.
fn annotate_point(
    cache: &mut ZoomCache,
    id: TileId,
    pix: PixelXy,
    pt: &Point,
    color: Rgba<u8>,
    cfg: &RenderConfig,
) {
    let z = cache.z;
    if z >= DOP_MIN_ZOOM {
        if let Some(pdop) = pt.pdop {
            let d = (pdop * 3.0) as i32;
            if pdop > DOP_BAD {
                let faint = Rgba([color[0], color[1], color[2], 160]);
                if let Some(img) = cache.image_mut(id) {
                    draw_circle(img, pix, d, faint);
                }
            } else if cfg.diag.shadows() {
                if let Some(img) = cache.image_mut(id) {
                    draw_circle(img, pix, d.max(2), SHADOW_COLOR);
                }
            }
        }
    }
    if cfg.diag.labels() && !cache.tile(id).speed_labeled {
        if let Some(kph) = pt.speed.map(|s| s * 3.6) {
            cache.tile_mut(id).speed_labeled = true;
            let text = format!("{}", kph.round() as i64);
            if let Some(img) = cache.image_mut(id) {
                draw_label(img, 2, 2, &text, color);
            }
        }
    }
}

/// Filled waypoint disc, spilling into any neighbor tile it overlaps.
fn draw_spilled_disc(
    cache: &mut ZoomCache,
    store: &TileStore,
    xy: TileXy,
    pix: PixelXy,
    diameter: i32,
    color: Rgba<u8>,
) {
    let z = cache.z;
    let r = diameter / 2;
    for dy in -1..=1i32 {
        for dx in -1..=1i32 {
            let hit_x = match dx {
                -1 => pix.x - r < 0,
                1 => pix.x + r >= TILE_SIZE,
                _ => true,
            };
            let hit_y = match dy {
                -1 => pix.y - r < 0,
                1 => pix.y + r >= TILE_SIZE,
                _ => true,
            };
            if !(hit_x && hit_y) {
                continue;
            }
            let t = TileXy::new(xy.x + dx, xy.y + dy);
            if !tile_in_range(t, z) {
                continue;
            }
            let tid = cache.get_or_create(t);
            cache.open(tid, store);
            if let Some(img) = cache.image_mut(tid) {
                draw_disc(img, pix.translated(xy, t), diameter, color);
            }
            cache.close(tid, store);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn draw_connecting_line(
    cache: &mut ZoomCache,
    store: &TileStore,
    cfg: &RenderConfig,
    flags: PassFlags,
    id: TileId,
    pxy: TileXy,
    ppix: PixelXy,
    xy: TileXy,
    pix: PixelXy,
    pt: &Point,
    color: Rgba<u8>,
    width: i32,
) {
    if let Some(kph) = effective_kph(pt, flags, cfg) {
        if kph < NO_LINES_SPEED_KPH {
            return;
        }
    }

    if pxy == xy {
        if ppix != pix {
            if let Some(img) = cache.image_mut(id) {
                draw_line(img, ppix, pix, color, width);
            }
        }
        return;
    }

    let line_color = if cfg.diag.crossings() {
        HIGHLIGHT_COLOR
    } else {
        color
    };
    for (t, a, b) in clip::line_tiles(pxy, ppix, xy, pix) {
        if !tile_in_range(t, cache.z) {
            continue;
        }
        let tid = cache.get_or_create(t);
        cache.open(tid, store);
        if let Some(img) = cache.image_mut(tid) {
            draw_line(img, a, b, line_color, width);
        }
        cache.close(tid, store);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::FreeImages;
    use crate::render::RenderConfig;
    use tempfile::TempDir;

    #[test]
    fn speed_buckets_are_monotone_with_fixed_boundaries() {
        assert_eq!(speed_bucket(0.0), 0);
        assert_eq!(speed_bucket(5.0), 1);
        assert_eq!(speed_bucket(10.0), 1);
        assert_eq!(speed_bucket(10.5), 2);
        assert_eq!(speed_bucket(25.0), 3);
        assert_eq!(speed_bucket(39.0), 4);
        assert_eq!(speed_bucket(59.9), 7);
        assert_eq!(speed_bucket(61.0), 8);
        assert_eq!(speed_bucket(300.0), 8);

        let mut last = 0;
        for tenth in 0..=700 {
            let b = speed_bucket(tenth as f64 / 10.0);
            assert!(b >= last);
            last = b;
        }
    }

    #[test]
    fn line_draws_both_endpoints() {
        let mut img = RgbaImage::new(256, 256);
        let c = SPEED_COLORS[1];
        draw_line_px(&mut img, PixelXy::new(10, 10), PixelXy::new(50, 30), c);
        assert_eq!(img.get_pixel(10, 10), &c);
        assert_eq!(img.get_pixel(50, 30), &c);
    }

    #[test]
    fn line_clips_outside_endpoints() {
        let mut img = RgbaImage::new(256, 256);
        let c = SPEED_COLORS[2];
        draw_line_px(&mut img, PixelXy::new(-20, 100), PixelXy::new(20, 100), c);
        assert_eq!(img.get_pixel(0, 100), &c);
        assert_eq!(img.get_pixel(20, 100), &c);
    }

    #[test]
    fn thick_line_covers_more_pixels() {
        let count = |w: i32| {
            let mut img = RgbaImage::new(256, 256);
            draw_line(
                &mut img,
                PixelXy::new(10, 128),
                PixelXy::new(240, 128),
                SPEED_COLORS[4],
                w,
            );
            img.pixels().filter(|p| p[3] != 0).count()
        };
        assert_eq!(count(3), count(1) * 3);
    }

    #[test]
    fn disc_is_filled_and_bounded() {
        let mut img = RgbaImage::new(256, 256);
        draw_disc(&mut img, PixelXy::new(100, 100), 7, SPEED_COLORS[0]);
        assert_eq!(img.get_pixel(100, 100), &SPEED_COLORS[0]);
        assert_eq!(img.get_pixel(103, 100), &SPEED_COLORS[0]);
        assert_eq!(img.get_pixel(100, 97), &SPEED_COLORS[0]);
        assert_eq!(img.get_pixel(105, 100)[3], 0);
    }

    #[test]
    fn heat_pixel_intensifies_and_saturates() {
        let mut img = RgbaImage::new(256, 256);
        heat_pixel(&mut img, 5, 5);
        assert_eq!(img.get_pixel(5, 5), &HEAT_BASE);

        for _ in 0..9 {
            heat_pixel(&mut img, 5, 5);
        }
        let (_, _, v) = rgb_to_hsv(*img.get_pixel(5, 5));
        assert!((v - 0.75).abs() < 0.02, "v={v}");

        // Many more visits saturate at full value.
        for _ in 0..100 {
            heat_pixel(&mut img, 5, 5);
        }
        let (_, _, v) = rgb_to_hsv(*img.get_pixel(5, 5));
        assert!(v > 0.99);
    }

    #[test]
    fn heat_dot_is_square_at_high_zoom() {
        let mut img = RgbaImage::new(256, 256);
        heat_dot(&mut img, PixelXy::new(50, 50), 16);
        assert_eq!(img.pixels().filter(|p| p[3] != 0).count(), 9);

        let mut img = RgbaImage::new(256, 256);
        heat_dot(&mut img, PixelXy::new(50, 50), 10);
        assert_eq!(img.pixels().filter(|p| p[3] != 0).count(), 1);
    }

    #[test]
    fn hsv_round_trip_preserves_color() {
        for &p in &SPEED_COLORS {
            let (h, s, v) = rgb_to_hsv(p);
            let q = hsv_to_rgb(h, s, v);
            for i in 0..3 {
                assert!((p[i] as i32 - q[i] as i32).abs() <= 1, "{p:?} vs {q:?}");
            }
        }
    }

    #[test]
    fn walker_leaves_all_tiles_unpinned() {
        let tmp = TempDir::new().unwrap();
        let store = TileStore::new(tmp.path(), FreeImages::new());
        let mut cache = ZoomCache::new(10, None);
        let cfg = RenderConfig::default();

        // A short run crossing a tile boundary.
        let points: Vec<Point> = (0..20)
            .map(|i| {
                let mut p = Point::new(50.0, 8.0 + i as f64 * 0.02);
                p.speed = Some(10.0);
                p
            })
            .collect();
        draw_points(&mut cache, &store, &cfg, &points, PassFlags::default());

        assert!(cache.tile_cnt() > 1);
        for tile in cache.tiles() {
            assert_eq!(tile.refcnt(), 0, "{:?}", tile.xy);
        }
    }

    #[test]
    fn fixed_color_overrides_speed() {
        let cfg = RenderConfig {
            fixed_color: Some(Rgba([1, 2, 3, 255])),
            ..RenderConfig::default()
        };
        let mut pt = Point::new(0.0, 0.0);
        pt.speed = Some(20.0);
        assert_eq!(
            point_color(&pt, PassFlags::default(), &cfg),
            Rgba([1, 2, 3, 255])
        );
    }

    #[test]
    fn badsrc_ignores_speed_for_color() {
        let cfg = RenderConfig::default();
        let mut pt = Point::new(0.0, 0.0);
        pt.speed = Some(20.0); // 72 km/h would be the last bucket
        let flags = PassFlags {
            badsrc: true,
            ..PassFlags::default()
        };
        assert_eq!(point_color(&pt, flags, &cfg), SPEED_COLORS[0]);
        assert_eq!(
            point_color(&pt, PassFlags::default(), &cfg),
            SPEED_COLORS[8]
        );
    }
}
