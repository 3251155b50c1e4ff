use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::{ArgAction, CommandFactory, Parser};
use log::info;

use tracktiles::{DiagMask, LoaderPool, RenderConfig, RenderStats, Renderer, Track, MAX_ZOOM};

#[derive(Parser, Debug)]
#[command(
    name = "tracktiles",
    version,
    about = "Render GPS tracklogs into a slippy-map PNG tile tree"
)]
struct Opts {
    /// Minimum zoom level
    #[arg(short = 'z', value_name = "N", default_value_t = 1)]
    min_zoom: u8,

    /// Maximum zoom level (raised to the minimum when lower)
    #[arg(short = 'Z', value_name = "N", default_value_t = 18)]
    max_zoom: u8,

    /// Output directory for the tile tree
    #[arg(short = 'C', value_name = "DIR", default_value = ".")]
    out_dir: PathBuf,

    /// Remove each rendered zoom's tile tree before rendering
    #[arg(short = 'I')]
    reinit: bool,

    /// Maximum resident tile images per zoom level
    #[arg(short = 'T', value_name = "N")]
    max_tiles: Option<usize>,

    /// Worker threads for loading and rendering
    #[arg(short = 'j', value_name = "N", default_value_t = 4)]
    jobs: usize,

    /// Read NUL-terminated file names from stdin
    #[arg(short = '0')]
    stdin_paths: bool,

    /// Zoom level below which no lines are drawn
    #[arg(short = 'L', value_name = "N", default_value_t = 7)]
    no_lines_below: u8,

    /// Zoom level below which waypoints are not drawn
    #[arg(short = 'P', value_name = "N", default_value_t = 16)]
    waypoints_from: u8,

    /// Heatmap mode: accumulate visit intensity instead of speed colors
    #[arg(short = 'H')]
    heatmap: bool,

    /// Line thickness "z:w", or "z:w+" to extend to all higher zooms
    #[arg(short = 't', value_name = "Z:W[+]")]
    thickness: Vec<String>,

    /// Fixed line color as rrggbb hex, overriding the speed palette
    #[arg(short = 'c', value_name = "HEX")]
    color: Option<String>,

    /// Assume a fixed speed in km/h for all points
    #[arg(short = 'S', value_name = "KPH")]
    speed: Option<f64>,

    /// Waypoint circle diameter in pixels
    #[arg(short = 'p', value_name = "D", default_value_t = 5)]
    diameter: u32,

    /// Diagnostics bitmask: 1 shadows, 2 tile crossings, 4 speed labels
    #[arg(short = 'd', value_name = "MASK", default_value_t = 0)]
    diag: u8,

    /// Increase verbosity (repeatable)
    #[arg(short = 'v', action = ArgAction::Count)]
    verbose: u8,

    /// GPX files to render
    #[arg(value_name = "FILE")]
    files: Vec<PathBuf>,
}

/// Parse a `-t` argument: `z:w` with an optional trailing `+`.
fn parse_thickness(arg: &str) -> Result<(u8, u8, bool), String> {
    let (z, rest) = arg
        .split_once(':')
        .ok_or_else(|| format!("`{arg}`: expected z:w[+]"))?;
    let z: u8 = z.parse().map_err(|_| format!("`{arg}`: bad zoom"))?;
    if z > MAX_ZOOM {
        return Err(format!("`{arg}`: zoom out of range 0-{MAX_ZOOM}"));
    }
    let (w, extend) = match rest.strip_suffix('+') {
        Some(w) => (w, true),
        None => (rest, false),
    };
    let width: u8 = w.parse().map_err(|_| format!("`{arg}`: bad width"))?;
    Ok((z, width, extend))
}

/// Parse a `-c` argument: six hex digits, `rrggbb`.
fn parse_color(arg: &str) -> Result<image::Rgba<u8>, String> {
    let arg = arg.strip_prefix('#').unwrap_or(arg);
    if arg.len() != 6 {
        return Err(format!("`{arg}`: expected rrggbb"));
    }
    let v = u32::from_str_radix(arg, 16).map_err(|_| format!("`{arg}`: expected rrggbb"))?;
    Ok(image::Rgba([
        (v >> 16) as u8,
        (v >> 8) as u8,
        v as u8,
        0xff,
    ]))
}

fn usage_error(msg: &str) -> ExitCode {
    eprintln!("tracktiles: {msg}");
    eprintln!("{}", Opts::command().render_usage());
    ExitCode::from(1)
}

fn build_config(opts: &Opts) -> Result<RenderConfig, String> {
    if opts.min_zoom > MAX_ZOOM || opts.max_zoom > MAX_ZOOM {
        return Err(format!("zoom levels must be within 0-{MAX_ZOOM}"));
    }
    let mut cfg = RenderConfig {
        out_dir: opts.out_dir.clone(),
        min_zoom: opts.min_zoom,
        max_zoom: opts.max_zoom.max(opts.min_zoom),
        reinit: opts.reinit,
        max_resident: opts.max_tiles,
        jobs: opts.jobs.max(1),
        no_lines_below: opts.no_lines_below,
        waypoints_from: opts.waypoints_from,
        heatmap: opts.heatmap,
        assumed_speed_kph: opts.speed,
        waypoint_diameter: opts.diameter,
        diag: DiagMask::from_bits(opts.diag),
        ..RenderConfig::default()
    };
    for arg in &opts.thickness {
        let (z, w, extend) = parse_thickness(arg)?;
        cfg.set_thickness(z, w, extend);
    }
    if let Some(hex) = &opts.color {
        cfg.fixed_color = Some(parse_color(hex)?);
    }
    Ok(cfg)
}

/// Load all tracks, from the argument list and optionally from stdin.
fn load_tracks(opts: &Opts) -> anyhow::Result<Vec<Track>> {
    let pool = LoaderPool::new(opts.jobs.max(1));
    for path in &opts.files {
        pool.enqueue(path.clone());
    }
    if opts.stdin_paths {
        let stdin = io::stdin();
        pool.enqueue_stream(stdin.lock())
            .context("reading file list from stdin")?;
    }
    Ok(pool.finish())
}

fn run(opts: &Opts, cfg: RenderConfig) -> anyhow::Result<RenderStats> {
    let start = Instant::now();
    let tracks = load_tracks(opts)?;
    let points: usize = tracks.iter().map(|t| t.point_count).sum();
    info!(
        "{} files, {} points, {:.3}s",
        tracks.len(),
        points,
        start.elapsed().as_secs_f64()
    );

    let start = Instant::now();
    let stats = Renderer::new(cfg.clone()).run(&tracks);
    info!(
        "z {}-{} processed in {:.3}s",
        cfg.min_zoom,
        cfg.max_zoom,
        start.elapsed().as_secs_f64()
    );
    Ok(stats)
}

fn main() -> ExitCode {
    let opts = match Opts::try_parse() {
        Ok(opts) => opts,
        Err(err)
            if matches!(
                err.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ) =>
        {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(1);
        }
    };

    env_logger::Builder::new()
        .filter_level(match opts.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        })
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cfg = match build_config(&opts) {
        Ok(cfg) => cfg,
        Err(msg) => return usage_error(&msg),
    };

    if let Err(err) = tracktiles::check_output_dir(&cfg.out_dir) {
        eprintln!("tracktiles: {err}");
        return ExitCode::from(2);
    }

    match run(&opts, cfg) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("tracktiles: {err:#}");
            ExitCode::from(2)
        }
    }
}
