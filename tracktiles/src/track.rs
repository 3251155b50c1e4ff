//! Track model and the GPX parser adaptation.
//!
//! Loading is delegated to the `gpx` crate; this module normalizes its
//! output into the renderer's model: consecutive duplicate points are
//! merged, and points that carry a timestamp but no speed get one
//! synthesized from their neighbors.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use time::OffsetDateTime;

use crate::slippy::LatLon;

/// Mean earth radius in meters, for great-circle distances.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A single track point. Optional fields are absent when the source file
/// did not carry them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Point {
    pub loc: LatLon,
    pub time: Option<OffsetDateTime>,
    /// Speed over ground in m/s.
    pub speed: Option<f64>,
    pub ele: Option<f32>,
    pub geoidheight: Option<f32>,
    /// Course over ground in degrees. GPX 1.1 dropped the element and
    /// the parser surfaces nothing here.
    pub course: Option<f32>,
    pub hdop: Option<f32>,
    pub vdop: Option<f32>,
    pub pdop: Option<f32>,
    pub sat: Option<i32>,
}

impl Point {
    pub fn new(lat: f64, lon: f64) -> Self {
        Point {
            loc: LatLon::new(lat, lon),
            ..Point::default()
        }
    }

    /// Fold the other point's present fields into this one. Used when two
    /// consecutive points share position and timestamp.
    fn merge_from(&mut self, other: &Point) {
        self.speed = self.speed.or(other.speed);
        self.ele = self.ele.or(other.ele);
        self.geoidheight = self.geoidheight.or(other.geoidheight);
        self.course = self.course.or(other.course);
        self.hdop = self.hdop.or(other.hdop);
        self.vdop = self.vdop.or(other.vdop);
        self.pdop = self.pdop.or(other.pdop);
        self.sat = self.sat.or(other.sat);
    }
}

/// Where a segment's fixes came from. `Network` fixes are drawn but their
/// speeds are not trusted for coloring.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SegmentSource {
    Gps,
    Network,
    #[default]
    Unknown,
    Other(String),
}

impl SegmentSource {
    pub fn parse(src: Option<&str>) -> Self {
        match src {
            None | Some("") => SegmentSource::Unknown,
            Some("gps") => SegmentSource::Gps,
            Some("network") => SegmentSource::Network,
            Some(other) => SegmentSource::Other(other.to_string()),
        }
    }

    /// True when speed values from this source should not drive coloring.
    pub fn unreliable_speed(&self) -> bool {
        *self == SegmentSource::Network
    }
}

/// An ordered run of points linked by drawn lines.
#[derive(Debug, Clone, Default)]
pub struct Segment {
    pub src: SegmentSource,
    pub points: Vec<Point>,
}

/// One loaded tracklog file.
#[derive(Debug, Clone, Default)]
pub struct Track {
    pub path: PathBuf,
    pub time: Option<OffsetDateTime>,
    pub segments: Vec<Segment>,
    pub waypoints: Vec<Point>,
    /// Number of segment points (waypoints not included).
    pub point_count: usize,
}

impl Track {
    /// An empty track, the result of a failed load.
    pub fn empty(path: &Path) -> Self {
        Track {
            path: path.to_path_buf(),
            ..Track::default()
        }
    }
}

/// Great-circle distance in meters, spherical law of cosines.
pub fn great_circle_m(a: LatLon, b: LatLon) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlon = (b.lon - a.lon).to_radians();
    let cosc = (lat1.sin() * lat2.sin() + lat1.cos() * lat2.cos() * dlon.cos()).clamp(-1.0, 1.0);
    EARTH_RADIUS_M * cosc.acos()
}

fn convert_point(wpt: &gpx::Waypoint) -> Point {
    let p = wpt.point();
    Point {
        loc: LatLon::new(p.y(), p.x()),
        time: wpt.time.map(OffsetDateTime::from),
        speed: wpt.speed,
        ele: wpt.elevation.map(|v| v as f32),
        geoidheight: wpt.geoidheight.map(|v| v as f32),
        course: None,
        hdop: wpt.hdop.map(|v| v as f32),
        vdop: wpt.vdop.map(|v| v as f32),
        pdop: wpt.pdop.map(|v| v as f32),
        sat: wpt.sat.map(|v| v as i32),
    }
}

/// Append a converted point, merging it into the previous one when both
/// share position and timestamp (trackers often emit such duplicates on
/// fix loss). Returns the number of points actually kept.
fn push_point(points: &mut Vec<Point>, pt: Point) -> usize {
    if let Some(last) = points.last_mut() {
        if last.loc == pt.loc && last.time == pt.time {
            last.merge_from(&pt);
            return 0;
        }
    }
    points.push(pt);
    1
}

/// Fill in missing speeds on points that carry a timestamp: the average
/// of the neighbors' speeds when both neighbors have one, otherwise
/// great-circle distance over the time delta (clamped to >= 1 s).
fn synthesize_speeds(points: &mut [Point]) {
    for i in 0..points.len() {
        if points[i].speed.is_some() || points[i].time.is_none() {
            continue;
        }
        let prev = i.checked_sub(1).and_then(|j| points[j].speed);
        let next = points.get(i + 1).and_then(|p| p.speed);
        points[i].speed = match (prev, next) {
            (Some(a), Some(b)) => Some((a + b) / 2.0),
            _ => i.checked_sub(1).and_then(|j| {
                let (cur, before) = (&points[i], &points[j]);
                let secs = (cur.time? - before.time?).whole_seconds().max(1) as f64;
                Some(great_circle_m(before.loc, cur.loc) / secs)
            }),
        };
    }
}

fn convert_gpx(gpx: gpx::Gpx, path: &Path) -> Track {
    let mut track = Track::empty(path);
    track.time = gpx
        .metadata
        .as_ref()
        .and_then(|m| m.time)
        .map(OffsetDateTime::from);

    for trk in &gpx.tracks {
        let src = SegmentSource::parse(trk.source.as_deref());
        for seg in &trk.segments {
            let mut points = Vec::with_capacity(seg.points.len());
            for wpt in &seg.points {
                track.point_count += push_point(&mut points, convert_point(wpt));
            }
            synthesize_speeds(&mut points);
            if !points.is_empty() {
                track.segments.push(Segment {
                    src: src.clone(),
                    points,
                });
            }
        }
    }
    track.waypoints = gpx.waypoints.iter().map(convert_point).collect();
    track
}

/// Load and normalize one tracklog. Never fails: unreadable or malformed
/// files come back as an empty track and the pipeline carries on.
pub fn load_track(path: &Path) -> Track {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(err) => {
            warn!("{}: {err}", path.display());
            return Track::empty(path);
        }
    };
    match gpx::read(BufReader::new(file)) {
        Ok(gpx) => {
            let track = convert_gpx(gpx, path);
            debug!(
                "{}: {} segments, {} points, {} waypoints",
                path.display(),
                track.segments.len(),
                track.point_count,
                track.waypoints.len()
            );
            track
        }
        Err(err) => {
            warn!("{}: {err}", path.display());
            Track::empty(path)
        }
    }
}
