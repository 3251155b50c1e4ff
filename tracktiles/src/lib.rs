//! # tracktiles
//!
//! Renders GPS tracklogs into a slippy-map tree of transparent 256x256
//! PNG tiles (`<z>/<x>/<y>.png`), suitable for overlaying on any base
//! map using the OpenStreetMap tile convention.
//!
//! Tracks draw as speed-colored polylines; waypoints as filled discs at
//! high zoom; a heatmap mode accumulates visit intensity instead. The
//! pipeline is a loader thread pool feeding per-zoom render workers,
//! each owning a refcounted tile cache with a bounded resident-image
//! budget.
//!
//! ```no_run
//! use tracktiles::{load_track, RenderConfig, Renderer};
//!
//! let track = load_track(std::path::Path::new("ride.gpx"));
//! let cfg = RenderConfig {
//!     out_dir: "tiles".into(),
//!     min_zoom: 8,
//!     max_zoom: 16,
//!     ..RenderConfig::default()
//! };
//! let stats = Renderer::new(cfg).run(&[track]);
//! println!("{} tiles", stats.tiles);
//! ```

// Slippy-map projection math
pub mod slippy;
pub use slippy::{pixel_pos, tile_at, LatLon, PixelXy, TileXy, TILE_SIZE};

// Track model and GPX loading
pub mod track;
pub use track::{load_track, Point, Segment, SegmentSource, Track};

// Unified error handling
pub mod error;
pub use error::{RenderError, Result};

// Tile PNG persistence and buffer recycling
pub mod persist;
pub use persist::{check_output_dir, FreeImages, TileStore};

// Per-zoom tile cache
pub mod tile;
pub use tile::{Tile, TileId, ZoomCache};

// Cross-tile line splitting
pub mod clip;

// Point and line rasterization
pub mod raster;
pub use raster::PassFlags;

// Parallel tracklog loading
pub mod loader;
pub use loader::LoaderPool;

// Render orchestration
pub mod render;
pub use render::{DiagMask, RenderConfig, RenderStats, Renderer, MAX_ZOOM};
