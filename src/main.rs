use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use emisgrid::emission::{to_gigagrams, EmissionTotal};
use emisgrid::grid::bounds::write_bounds_file;
use emisgrid::grid::region::RegionBounds;
use emisgrid::time::DateRange;
use emisgrid::{provenance, Dataset, EmissionAggregator, GridDescription, RegridDriver, RunFile};

#[derive(Parser)]
#[command(name = "emisgrid", about = "Emission totals and regridding of gridded fluxes")]
struct Cli {
    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// TOML run file with [aggregation] and [regrid] sections
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Do not warn about assumed units
    #[arg(long, global = true)]
    ignore_warnings: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print area- and time-integrated totals of a field, in Gg
    Total {
        file: PathBuf,
        variable: String,

        /// Grid description; the field's own file is used otherwise
        #[arg(long)]
        grid: Option<PathBuf>,

        #[arg(long, num_args = 2, value_names = ["WEST", "EAST"], allow_negative_numbers = true)]
        lon_range: Option<Vec<f64>>,

        #[arg(long, num_args = 2, value_names = ["SOUTH", "NORTH"], allow_negative_numbers = true)]
        lat_range: Option<Vec<f64>>,

        #[arg(long, num_args = 2, value_names = ["START", "END"])]
        date_range: Option<Vec<String>>,

        /// Days represented by a field without a time axis
        #[arg(long)]
        ndays: Option<u32>,

        /// Sum the time series
        #[arg(long)]
        reduce_time: bool,

        #[arg(long)]
        unit: Option<String>,

        /// Molecular weight in g/mol
        #[arg(long)]
        mw: Option<f64>,
    },
    /// Regrid fields between FV grids and SE meshes
    Regrid {
        file: PathBuf,

        #[arg(long)]
        src_grid: PathBuf,

        #[arg(long)]
        dst_grid: PathBuf,

        /// Load weights instead of generating them
        #[arg(long)]
        weights: Option<PathBuf>,

        /// Save generated weights here
        #[arg(long)]
        save_weights: Option<PathBuf>,

        #[arg(long)]
        weights_only: bool,

        #[arg(long)]
        method: Option<String>,

        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,

        #[arg(long, value_delimiter = ',')]
        pass_through: Vec<String>,

        #[arg(long)]
        output: Option<PathBuf>,

        /// Write each field as soon as it is regridded
        #[arg(long)]
        streaming: bool,

        /// Report totals before and after regridding
        #[arg(long)]
        check: bool,

        #[arg(long)]
        unit: Option<String>,

        #[arg(long)]
        mw: Option<f64>,

        #[arg(long)]
        scale_factor: Option<f64>,

        /// f4 or f8
        #[arg(long)]
        output_type: Option<String>,

        /// Do not append _cYYYYMMDD to written files
        #[arg(long)]
        no_date_stamp: bool,
    },
    /// Write an FV grid description with lat_bnds/lon_bnds
    Bounds { file: PathBuf, output: PathBuf },
}

fn range(values: Option<Vec<f64>>) -> Option<[f64; 2]> {
    values.map(|v| [v[0], v[1]])
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let run = match &cli.config {
        Some(path) => RunFile::load(path).with_context(|| format!("reading {}", path.display()))?,
        None => RunFile::default(),
    };

    match cli.command {
        Command::Total {
            file,
            variable,
            grid,
            lon_range,
            lat_range,
            date_range,
            ndays,
            reduce_time,
            unit,
            mw,
        } => {
            let mut config = run.aggregation;
            config.ignore_warnings |= cli.ignore_warnings;
            config.reduce_time |= reduce_time;
            if lon_range.is_some() || lat_range.is_some() {
                config.region = RegionBounds::new(range(lon_range), range(lat_range));
            }
            if let Some(dates) = date_range {
                config.date_range = Some(DateRange::new(&dates[0], &dates[1]));
            }
            if let Some(ndays) = ndays {
                config.ndays = ndays;
            }

            let dataset = Dataset::open(&file)?;
            let field = dataset.field(&variable)?;
            let grid = GridDescription::open(grid.as_ref().unwrap_or(&file))?;
            let vertical = dataset.vertical_axis(&field, config.ignore_warnings)?;

            let aggregator = EmissionAggregator::new(&grid.topology, config);
            match aggregator.aggregate_field(&field, unit.as_deref(), mw, vertical.as_ref())? {
                EmissionTotal::Scalar { kg, .. } => {
                    println!("{variable}: {:.6} Gg", to_gigagrams(kg))
                }
                EmissionTotal::Series(steps) => {
                    for step in steps {
                        println!(
                            "{} {} {} {:.6}",
                            step.date.year,
                            step.date.month,
                            step.date.day,
                            to_gigagrams(step.kg)
                        );
                    }
                }
            }
        }
        Command::Regrid {
            file,
            src_grid,
            dst_grid,
            weights,
            save_weights,
            weights_only,
            method,
            fields,
            pass_through,
            output,
            streaming,
            check,
            unit,
            mw,
            scale_factor,
            output_type,
            no_date_stamp,
        } => {
            let mut config = run.regrid;
            config.ignore_warnings |= cli.ignore_warnings;
            config.weights_only |= weights_only;
            config.streaming |= streaming;
            config.check_conservation |= check;
            config.date_stamp &= !no_date_stamp;
            if let Some(method) = method {
                config.method = method.parse()?;
            }
            if let Some(kind) = output_type {
                config.output_type = kind.parse()?;
            }
            if !fields.is_empty() {
                config.fields = fields;
            }
            if !pass_through.is_empty() {
                config.pass_through = pass_through;
            }
            config.weights = weights.or(config.weights);
            config.save_weights = save_weights.or(config.save_weights);
            config.output = output.or(config.output);
            config.unit = unit.or(config.unit);
            config.molecular_weight = mw.or(config.molecular_weight);
            if let Some(scale) = scale_factor {
                config.scale_factor = scale;
            }
            if config.weights_only && config.weights.is_some() {
                bail!("--weights-only generates weights; it cannot be combined with --weights");
            }

            let dataset = Dataset::open(&file)?;
            let source = GridDescription::open(&src_grid)?;
            let destination = GridDescription::open(&dst_grid)?;

            let output = config.output.as_ref().map(|path| {
                if config.date_stamp {
                    provenance::dated_today(path)
                } else {
                    path.clone()
                }
            });

            let mut driver = RegridDriver::with_sparse_weights(source, destination, config);
            let outcome = match &output {
                Some(path) => driver.run_to_file(&dataset, path)?,
                None => driver.run(&dataset, None)?,
            };
            if let Some(path) = outcome.saved_weights {
                info!(path = %path.display(), "weights saved");
            }
            for report in &outcome.reports {
                println!(
                    "{} [{}]: before {:.6e} g, after {:.6e} g, relative difference {:.3e}",
                    report.field,
                    report.slice,
                    report.source_grams,
                    report.destination_grams,
                    report.relative_difference()
                );
            }
        }
        Command::Bounds { file, output } => {
            write_bounds_file(&file, &output)?;
        }
    }

    Ok(())
}
