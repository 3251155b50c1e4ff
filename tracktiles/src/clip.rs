//! Cross-tile line splitting.
//!
//! A line between two track points can leave its endpoint tiles and cut
//! through neighbors. The candidate set is the integer rectangle spanned
//! by the endpoint tiles; each candidate is kept only if the segment,
//! translated into the candidate's pixel space, actually crosses one of
//! its edges. The edge test is the integer orientation predicate, so a
//! line passing near a corner but outside the tile never opens it.

use crate::slippy::{PixelXy, TileXy, TILE_SIZE};

/// Sign of the turn A -> B -> C: positive for counter-clockwise,
/// negative for clockwise, zero for collinear. Widened to i64 so
/// far-extrapolated pixel coordinates cannot overflow.
pub fn turn(a: PixelXy, b: PixelXy, c: PixelXy) -> i32 {
    let v = (c.y as i64 - a.y as i64) * (b.x as i64 - a.x as i64)
        - (b.y as i64 - a.y as i64) * (c.x as i64 - a.x as i64);
    v.signum() as i32
}

/// Proper intersection of segments AB and CD.
pub fn segments_intersect(a: PixelXy, b: PixelXy, c: PixelXy, d: PixelXy) -> bool {
    turn(a, c, d) != turn(b, c, d) && turn(a, b, c) != turn(a, b, d)
}

/// Does the segment cross any of the four edges of the 256x256 tile box
/// at the origin? Both endpoints are in the tile's own pixel space.
pub fn crosses_tile_edge(a: PixelXy, b: PixelXy) -> bool {
    let m = TILE_SIZE - 1;
    let nw = PixelXy::new(0, 0);
    let ne = PixelXy::new(m, 0);
    let sw = PixelXy::new(0, m);
    let se = PixelXy::new(m, m);
    segments_intersect(a, b, nw, ne)
        || segments_intersect(a, b, nw, sw)
        || segments_intersect(a, b, ne, se)
        || segments_intersect(a, b, sw, se)
}

/// Tiles the segment from `(ptile, ppix)` to `(tile, pix)` must be drawn
/// into, with both endpoints translated into each tile's pixel space.
/// The endpoint tiles are always included; intermediate tiles only when
/// the segment crosses their boundary.
pub fn line_tiles(
    ptile: TileXy,
    ppix: PixelXy,
    tile: TileXy,
    pix: PixelXy,
) -> Vec<(TileXy, PixelXy, PixelXy)> {
    let mut out = Vec::new();
    for x in ptile.x.min(tile.x)..=ptile.x.max(tile.x) {
        for y in ptile.y.min(tile.y)..=ptile.y.max(tile.y) {
            let t = TileXy::new(x, y);
            let a = ppix.translated(ptile, t);
            let b = pix.translated(tile, t);
            if t == ptile || t == tile || crosses_tile_edge(a, b) {
                out.push((t, a, b));
            }
        }
    }
    out
}
