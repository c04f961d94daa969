// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use slog::{info, o, Drain, Logger};

use eikonal_marker::tensors::{ConstantTensors, TensorField};
use eikonal_marker::update_kernels::{LocalSolve, Stencil};
use eikonal_marker::{Concurrency, HeapKind, MarkerStats, ProgressInfo, SourceOrder, TimeMarker};

#[derive(Clone, Copy, ValueEnum)]
enum ConcurrencyArg {
    Serial,
    Parallel,
    ParallelX,
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderArg {
    Shuffled,
    HeapMax,
    HeapMin,
}

#[derive(Parser)]
#[command(
    name = "eikonal-marker",
    about = "Times and marks of nearest known samples on a synthetic tensor field"
)]
struct Cli {
    /// Dimensionality (2 or 3)
    #[arg(short = 'd', long)]
    dim: usize,

    /// Grid size, comma-separated (e.g., 256,256 or 64,64,64)
    #[arg(short = 's', long)]
    size: String,

    /// Known sample indices, comma-separated (repeatable; marks are 1, 2, ...)
    #[arg(long, num_args = 1)]
    known: Vec<String>,

    /// Tensor field: "isotropic", "isotropic:<s>", or (2D only)
    /// "eigen:<angle>,<au>,<av>"
    #[arg(long, default_value = "isotropic")]
    tensor: String,

    /// Sweep concurrency strategy
    #[arg(long, value_enum, default_value = "parallel")]
    concurrency: ConcurrencyArg,

    /// Order in which known samples are used as sources
    #[arg(long, value_enum, default_value = "shuffled")]
    order: OrderArg,

    /// Number of Rayon worker threads
    #[arg(long)]
    threads: Option<usize>,

    /// Relative convergence tolerance
    #[arg(long, default_value = "0.001")]
    epsilon: f32,

    /// Bound on neighbor re-examination relative to the best known time
    #[arg(long, default_value = "1.5")]
    neighbor_factor: f32,

    /// Print source progress to stderr
    #[arg(long)]
    progress: bool,

    /// Log solver activity to stderr
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn root_logger(verbose: bool) -> Logger {
    if !verbose {
        return Logger::root(slog::Discard, o!());
    }
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!("version" => env!("CARGO_PKG_VERSION")))
}

fn parse_list<T: std::str::FromStr>(s: &str, what: &str, dim: usize) -> Result<Vec<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let parts: Vec<T> = s
        .split(',')
        .map(|p| p.trim().parse::<T>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("invalid --{}: '{}'", what, s))?;
    if parts.len() != dim {
        bail!(
            "--{} has {} components, expected {}",
            what,
            parts.len(),
            dim
        );
    }
    Ok(parts)
}

fn to_array<const N: usize>(v: &[usize]) -> [usize; N] {
    let mut a = [0usize; N];
    a.copy_from_slice(&v[..N]);
    a
}

fn parse_scale(mode: &str) -> Result<f32> {
    let s = match mode.strip_prefix("isotropic:") {
        Some(v) => v.parse::<f32>().context("invalid isotropic scale")?,
        None => 1.0,
    };
    if !s.is_finite() || s <= 0.0 {
        bail!("isotropic scale must be positive and finite, got {}", s);
    }
    Ok(s)
}

fn build_tensors_2d(mode: &str) -> Result<ConstantTensors<2>> {
    if let Some(params) = mode.strip_prefix("eigen:") {
        let p: Vec<f32> = parse_list(params, "tensor", 3)?;
        if p[1] <= 0.0 || p[2] <= 0.0 {
            bail!("eigen: eigenvalues must be positive, got {} and {}", p[1], p[2]);
        }
        return Ok(ConstantTensors::<2>::from_eigen(p[0], p[1], p[2]));
    }
    if mode == "isotropic" || mode.starts_with("isotropic:") {
        return Ok(ConstantTensors::scaled_identity(parse_scale(mode)?));
    }
    bail!(
        "unknown --tensor mode: '{}'. Expected 'isotropic', 'isotropic:<s>', or 'eigen:<angle>,<au>,<av>'",
        mode
    );
}

fn build_tensors_3d(mode: &str) -> Result<ConstantTensors<3>> {
    if mode == "isotropic" || mode.starts_with("isotropic:") {
        return Ok(ConstantTensors::scaled_identity(parse_scale(mode)?));
    }
    bail!(
        "unknown --tensor mode for 3D: '{}'. Expected 'isotropic' or 'isotropic:<s>'",
        mode
    );
}

fn print_summary(stats: &MarkerStats, times: &[f32], marks: &[i32]) {
    let mut tmin = f32::INFINITY;
    let mut tmax = 0.0f32;
    let mut unreached = 0usize;
    let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
    for (&t, &m) in times.iter().zip(marks) {
        if t.is_finite() {
            if t > 0.0 {
                tmin = tmin.min(t);
            }
            tmax = tmax.max(t);
            *counts.entry(m).or_insert(0) += 1;
        } else {
            unreached += 1;
        }
    }

    println!("sources:         {}", stats.sources);
    println!("passes:          {}", stats.passes);
    println!(
        "samples visited: {} ({:.2} per sample)",
        stats.samples_visited,
        stats.samples_visited as f64 / times.len() as f64
    );
    println!("elapsed:         {:.3?}", stats.elapsed);
    println!("time range:      {} .. {}", tmin, tmax);
    println!("unreached:       {}", unreached);
    for (mark, count) in counts {
        println!("mark {:>4}:       {} samples", mark, count);
    }
}

fn run<const N: usize, T: TensorField<N>>(
    cli: &Cli,
    log: &Logger,
    shape: [usize; N],
    tensors: T,
) -> Result<()>
where
    Stencil<N>: LocalSolve<N>,
{
    let n: usize = shape.iter().product();
    let mut times = vec![f32::INFINITY; n];
    let mut marks = vec![0i32; n];
    for (i, k) in cli.known.iter().enumerate() {
        let idx: [usize; N] = to_array(&parse_list::<usize>(k, "known", N)?);
        if idx.iter().zip(shape.iter()).any(|(&x, &s)| x >= s) {
            bail!("--known {} is outside the grid {:?}", k, shape);
        }
        let flat = idx
            .iter()
            .zip(shape.iter())
            .fold(0, |acc, (&x, &s)| acc * s + x);
        times[flat] = 0.0;
        marks[flat] = i as i32 + 1;
    }

    let concurrency = match cli.concurrency {
        ConcurrencyArg::Serial => Concurrency::Serial,
        ConcurrencyArg::Parallel => Concurrency::Parallel,
        ConcurrencyArg::ParallelX => Concurrency::ParallelX,
    };
    let order = match cli.order {
        OrderArg::Shuffled => SourceOrder::Shuffled,
        OrderArg::HeapMax => SourceOrder::TimeHeap(HeapKind::Max),
        OrderArg::HeapMin => SourceOrder::TimeHeap(HeapKind::Min),
    };

    info!(log, "Known samples placed";
        "shape" => format!("{:?}", shape),
        "count" => cli.known.len(),
        "tensor" => cli.tensor.clone());

    let mut marker = TimeMarker::new(shape, tensors)?
        .with_logger(log)
        .with_concurrency(concurrency)
        .with_source_order(order)
        .with_epsilon(cli.epsilon)?
        .with_neighbor_factor(cli.neighbor_factor)?;
    if let Some(threads) = cli.threads {
        marker = marker.with_threads(threads)?;
    }
    if cli.progress {
        marker = marker.with_progress(Box::new(|info: ProgressInfo| {
            let step = (info.sources_total / 10).max(1);
            if info.sources_done % step == 0 || info.sources_done == info.sources_total {
                eprintln!(
                    "[{:.1}s] sources={}/{} visited={}",
                    info.elapsed.as_secs_f64(),
                    info.sources_done,
                    info.sources_total,
                    info.samples_visited,
                );
            }
        }));
    }

    let stats = marker
        .apply(&mut times, &mut marks)
        .context("time marking failed")?;
    print_summary(&stats, &times, &marks);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log = root_logger(cli.verbose);

    if cli.dim != 2 && cli.dim != 3 {
        bail!("--dim must be 2 or 3, got {}", cli.dim);
    }

    if cli.known.is_empty() {
        bail!("at least one --known sample must be specified");
    }

    let size: Vec<usize> = parse_list(&cli.size, "size", cli.dim)?;

    match cli.dim {
        2 => {
            let tensors = build_tensors_2d(&cli.tensor)?;
            run::<2, _>(&cli, &log, to_array(&size), tensors)?;
        }
        3 => {
            let tensors = build_tensors_3d(&cli.tensor)?;
            run::<3, _>(&cli, &log, to_array(&size), tensors)?;
        }
        _ => unreachable!(),
    }

    Ok(())
}
