//! fpring CLI: ring finding and Airy fitting on interferogram images.

use clap::{Args, Parser, Subcommand, ValueEnum};
use image::{GrayImage, ImageBuffer, Luma};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fpring::{
    array_hash, estimate_b_ratio, fit_airy, AiryFitInput, AiryModel, AiryParam, AiryParams, Cube,
    FinderConfig, ParInfo, RingFinder, RingFinderResult, H_ALPHA_UM,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "fpring")]
#[command(about = "Find concentric fringes and fit Airy geometry in Fabry-Perot interferograms")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the concentric ring system in a stack of planes.
    Find(FindArgs),

    /// Fit the Airy transmission model to one plane.
    FitAiry(FitAiryArgs),

    /// Render a synthetic Airy plane to a 16-bit PNG.
    Synth(SynthArgs),

    /// Estimate the pixel/focal-length ratio from two radii and orders.
    BRatio {
        /// Ring radii in pixels, innermost first (comma separated).
        #[arg(long, value_delimiter = ',', required = true)]
        radii: Vec<f64>,

        /// Interference orders matching the radii (comma separated).
        #[arg(long, value_delimiter = ',', required = true)]
        orders: Vec<i64>,
    },

    /// Print the SHA-1 identity of an image plane.
    Hash {
        /// Path to the image.
        image: PathBuf,
    },
}

#[derive(Debug, Clone, Args)]
struct FindArgs {
    /// Plane images, one per plane, in cube order.
    #[arg(required = true)]
    planes: Vec<PathBuf>,

    /// Path to write the finder result (JSON).
    #[arg(long)]
    out: PathBuf,

    /// Process only this plane instead of scanning.
    #[arg(long)]
    plane: Option<usize>,

    /// Stop scanning once a plane has this many rings.
    #[arg(long, default_value = "1")]
    min_rings: usize,

    /// Finder configuration (JSON); absent fields keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory to write the ridge and arc masks to (PNG).
    #[arg(long)]
    dump_masks: Option<PathBuf>,

    /// Wall-clock budget per plane, in seconds.
    #[arg(long)]
    plane_budget_secs: Option<f64>,

    /// Wall-clock budget per circle fit, in seconds.
    #[arg(long)]
    fit_budget_secs: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ParamArg {
    BRatio,
    CenterCol,
    CenterRow,
    Continuum,
    Finesse,
    Gap,
    Intensity,
}

impl From<ParamArg> for AiryParam {
    fn from(p: ParamArg) -> Self {
        match p {
            ParamArg::BRatio => AiryParam::BRatio,
            ParamArg::CenterCol => AiryParam::CenterCol,
            ParamArg::CenterRow => AiryParam::CenterRow,
            ParamArg::Continuum => AiryParam::Continuum,
            ParamArg::Finesse => AiryParam::Finesse,
            ParamArg::Gap => AiryParam::Gap,
            ParamArg::Intensity => AiryParam::Intensity,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct FitAiryArgs {
    /// Path to the plane image.
    #[arg(long)]
    image: PathBuf,

    /// Path to write the fitted parameters (JSON).
    #[arg(long)]
    out: PathBuf,

    /// Path to write the fitted model (16-bit PNG).
    #[arg(long)]
    model_png: Option<PathBuf>,

    /// Per-pixel residual weights (image), e.g. a flat field.
    #[arg(long)]
    flat: Option<PathBuf>,

    /// Wavelength in microns.
    #[arg(long, default_value_t = H_ALPHA_UM)]
    wavelength: f64,

    /// Initial pixel/focal-length ratio. Estimated from --radii/--orders when
    /// omitted.
    #[arg(long)]
    b_ratio: Option<f64>,

    /// Ring radii for the b estimate (comma separated). Taken from a finder
    /// run when omitted.
    #[arg(long, value_delimiter = ',')]
    radii: Vec<f64>,

    /// Interference orders for the b estimate (comma separated).
    #[arg(long, value_delimiter = ',')]
    orders: Vec<i64>,

    /// Initial center column. Taken from a finder run when omitted.
    #[arg(long)]
    center_col: Option<f64>,

    /// Initial center row. Taken from a finder run when omitted.
    #[arg(long)]
    center_row: Option<f64>,

    /// Initial finesse.
    #[arg(long, default_value = "5.0")]
    finesse: f64,

    /// Initial etalon gap in microns.
    #[arg(long)]
    gap: f64,

    /// Parameters to hold at their initial value.
    #[arg(long, value_enum, value_delimiter = ',')]
    fix: Vec<ParamArg>,

    /// Wall-clock budget for the fit, in seconds.
    #[arg(long)]
    budget_secs: Option<f64>,
}

#[derive(Debug, Clone, Args)]
struct SynthArgs {
    /// Path to write the plane (16-bit PNG).
    #[arg(long)]
    out: PathBuf,

    #[arg(long, default_value = "256")]
    rows: usize,

    #[arg(long, default_value = "256")]
    cols: usize,

    /// Center column; defaults to the plane middle.
    #[arg(long)]
    center_col: Option<f64>,

    /// Center row; defaults to the plane middle.
    #[arg(long)]
    center_row: Option<f64>,

    #[arg(long, default_value = "1.2e-3")]
    b_ratio: f64,

    #[arg(long, default_value = "5.0")]
    finesse: f64,

    /// Etalon gap in microns.
    #[arg(long, default_value = "250.0")]
    gap: f64,

    #[arg(long, default_value = "1.0")]
    continuum: f64,

    #[arg(long, default_value = "100.0")]
    intensity: f64,

    /// Wavelength in microns.
    #[arg(long, default_value_t = H_ALPHA_UM)]
    wavelength: f64,

    /// Uniform noise amplitude, in model units.
    #[arg(long, default_value_t = 0.0)]
    noise: f64,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Model units per 16-bit count.
    #[arg(long, default_value = "100.0")]
    scale: f64,
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Find(args) => run_find(&args),
        Commands::FitAiry(args) => run_fit_airy(&args),
        Commands::Synth(args) => run_synth(&args),
        Commands::BRatio { radii, orders } => run_b_ratio(&radii, &orders),
        Commands::Hash { image } => run_hash(&image),
    }
}

// ── image I/O ──────────────────────────────────────────────────────────

fn load_plane(path: &Path) -> CliResult<Array2<f64>> {
    let img = image::open(path).map_err(|e| -> CliError {
        format!("Failed to open image {}: {}", path.display(), e).into()
    })?;
    let gray = img.into_luma16();
    let (w, h) = gray.dimensions();
    tracing::debug!("Loaded {} ({}x{})", path.display(), w, h);
    Ok(Array2::from_shape_fn((h as usize, w as usize), |(r, c)| {
        gray.get_pixel(c as u32, r as u32)[0] as f64
    }))
}

fn save_plane_u16(plane: &Array2<f64>, scale: f64, path: &Path) -> CliResult<()> {
    let (rows, cols) = plane.dim();
    let img: ImageBuffer<Luma<u16>, Vec<u16>> =
        ImageBuffer::from_fn(cols as u32, rows as u32, |x, y| {
            let v = (plane[(y as usize, x as usize)] * scale).round();
            Luma([v.clamp(0.0, u16::MAX as f64) as u16])
        });
    img.save(path)?;
    Ok(())
}

fn save_mask(mask: &Array2<u8>, path: &Path) -> CliResult<()> {
    let (rows, cols) = mask.dim();
    let img = GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
        Luma([if mask[(y as usize, x as usize)] != 0 { 255 } else { 0 }])
    });
    img.save(path)?;
    Ok(())
}

fn secs(v: Option<f64>) -> CliResult<Option<Duration>> {
    v.map(|s| {
        Duration::try_from_secs_f64(s)
            .map_err(|e| -> CliError { format!("invalid budget {s}: {e}").into() })
    })
    .transpose()
}

// ── find ───────────────────────────────────────────────────────────────

fn run_find(args: &FindArgs) -> CliResult<()> {
    let mut config = match &args.config {
        Some(path) => FinderConfig::from_json_file(path)?,
        None => FinderConfig::default(),
    };
    if args.plane_budget_secs.is_some() {
        config.plane_budget = secs(args.plane_budget_secs)?;
    }
    if args.fit_budget_secs.is_some() {
        config.fit_budget = secs(args.fit_budget_secs)?;
    }

    let planes = args
        .planes
        .iter()
        .map(|p| load_plane(p))
        .collect::<CliResult<Vec<_>>>()?;
    let cube = Cube::from_planes(&planes)?;
    let (rows, cols) = cube.plane_dim();
    tracing::info!("Cube: {} planes of {}x{}", cube.planes(), cols, rows);

    let finder = RingFinder::new(config);
    let Some(result) = finder.find(&cube, args.plane, args.min_rings)? else {
        tracing::warn!("No concentric ring system found");
        std::fs::write(&args.out, "null")?;
        return Ok(());
    };

    match &result.system {
        Some(system) => tracing::info!(
            "Plane {}: {} rings around ({:.2}, {:.2}), radii {:?}",
            result.plane,
            system.ring_count(),
            system.center_col,
            system.center_row,
            system.radii,
        ),
        None => tracing::info!("Plane {}: no concentric system", result.plane),
    }
    for w in &result.warnings {
        tracing::warn!("{}", w);
    }

    let json = serde_json::to_string_pretty(&result)?;
    std::fs::write(&args.out, &json)?;
    tracing::info!("Results written to {}", args.out.display());

    if let Some(dir) = &args.dump_masks {
        dump_masks(&result, dir)?;
    }
    Ok(())
}

fn dump_masks(result: &RingFinderResult, dir: &Path) -> CliResult<()> {
    std::fs::create_dir_all(dir)?;
    save_mask(&result.ridge, &dir.join("ridge.png"))?;
    save_mask(&result.upper_mask, &dir.join("upper.png"))?;
    save_mask(&result.lower_mask, &dir.join("lower.png"))?;
    for (i, arc) in result.arcs.iter().enumerate() {
        save_mask(&arc.mask, &dir.join(format!("arc_{i:03}.png")))?;
    }
    for (i, fit) in result.fits.iter().enumerate().filter(|(_, f)| !f.sentinel) {
        save_mask(&fit.render(result.plane_dim()), &dir.join(format!("fit_{i:03}.png")))?;
    }
    tracing::info!("Masks written to {}", dir.display());
    Ok(())
}

// ── fit-airy ───────────────────────────────────────────────────────────

fn run_fit_airy(args: &FitAiryArgs) -> CliResult<()> {
    let data = load_plane(&args.image)?;

    let need_finder = args.center_col.is_none()
        || args.center_row.is_none()
        || (args.b_ratio.is_none() && args.radii.is_empty());
    let found = if need_finder {
        let cube = Cube::from_planes(std::slice::from_ref(&data))?;
        RingFinder::default().find(&cube, Some(0), 1)?
    } else {
        None
    };
    let system = found.as_ref().and_then(|r| r.system.as_ref());

    let center = match (args.center_col, args.center_row, system) {
        (Some(c), Some(r), _) => [c, r],
        (c, r, Some(s)) => [c.unwrap_or(s.center_col), r.unwrap_or(s.center_row)],
        _ => return Err("no center given and the finder found no ring system".into()),
    };

    let b_ratio = match args.b_ratio {
        Some(b) => b,
        None => {
            let radii = match (args.radii.is_empty(), system) {
                (false, _) => args.radii.clone(),
                (true, Some(s)) => s.radii.clone(),
                (true, None) => return Err("no b-ratio, radii or ring system available".into()),
            };
            estimate_b_ratio(&radii, &args.orders)
                .ok_or("b-ratio is undefined for the given radii and orders")?
        }
    };
    tracing::info!(
        "Initial guesses: b={:.4e}, center=({:.2}, {:.2}), finesse={}, gap={}",
        b_ratio,
        center[0],
        center[1],
        args.finesse,
        args.gap,
    );

    let mut input = AiryFitInput::new(data, args.wavelength, b_ratio, center, args.finesse, args.gap);
    input.parinfo = args
        .fix
        .iter()
        .map(|&p| ParInfo::fixed(p.into()))
        .collect();
    input.flat = args.flat.as_deref().map(load_plane).transpose()?;
    input.budget = secs(args.budget_secs)?;

    let fit = fit_airy(input)?;
    for p in &fit.at_bound {
        tracing::warn!("{} ended on its bound", p);
    }

    let json = serde_json::to_string_pretty(&serde_json::json!({
        "params": fit.params,
        "initial": fit.initial,
        "wavelength": fit.wavelength,
        "chi2": fit.chi2,
        "passes": fit.passes,
        "converged": fit.converged,
        "at_bound": fit.at_bound,
    }))?;
    std::fs::write(&args.out, &json)?;
    tracing::info!("Parameters written to {}", args.out.display());

    if let Some(path) = &args.model_png {
        save_plane_u16(&fit.model, 1.0, path)?;
        tracing::info!("Model written to {}", path.display());
    }
    Ok(())
}

// ── synth ──────────────────────────────────────────────────────────────

fn run_synth(args: &SynthArgs) -> CliResult<()> {
    let params = AiryParams {
        b_ratio: args.b_ratio,
        center_col: args.center_col.unwrap_or(args.cols as f64 / 2.0),
        center_row: args.center_row.unwrap_or(args.rows as f64 / 2.0),
        continuum: args.continuum,
        finesse: args.finesse,
        gap: args.gap,
        intensity: args.intensity,
    };
    let mut plane = AiryModel::new(params, args.wavelength, (args.rows, args.cols)).render();
    if args.noise > 0.0 {
        let mut rng = StdRng::seed_from_u64(args.seed);
        plane.mapv_inplace(|v| v + rng.gen_range(-args.noise..args.noise));
    }
    save_plane_u16(&plane, args.scale, &args.out)?;
    tracing::info!(
        "Synthetic {}x{} plane centered at ({:.2}, {:.2}) written to {}",
        args.cols,
        args.rows,
        params.center_col,
        params.center_row,
        args.out.display(),
    );
    Ok(())
}

// ── b-ratio ────────────────────────────────────────────────────────────

fn run_b_ratio(radii: &[f64], orders: &[i64]) -> CliResult<()> {
    let b = estimate_b_ratio(radii, orders).ok_or("b-ratio is undefined for these inputs")?;
    println!("{b:.17e}");
    Ok(())
}

// ── hash ───────────────────────────────────────────────────────────────

fn run_hash(image: &Path) -> CliResult<()> {
    let plane = load_plane(image)?;
    println!("{}  {}", array_hash(&plane), image.display());
    Ok(())
}
