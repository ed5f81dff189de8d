use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod batch;
mod commands;
mod visualize;

use commands::{BuildOptions, IcpOptions, PosteriorOptions};

#[derive(Parser)]
#[command(name = "shapemodels")]
#[command(about = "Build statistical shape models and fit them to point clouds")]
struct Cli {
    /// Worker threads for batch fitting (defaults to one per core)
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a model from a directory of corresponding .pts shapes
    Build {
        /// Directory with one training shape per .pts file
        #[arg(long)]
        input: PathBuf,

        /// Where to write the model (JSON)
        #[arg(long)]
        output: PathBuf,

        /// Keep at most this many modes
        #[arg(long)]
        max_components: Option<usize>,
    },

    /// Fit the posterior model to indexed observations (x y z id)
    Posterior {
        /// Model file written by `build`
        #[arg(long)]
        pdm: PathBuf,

        /// Indexed .pts file or directory of them
        #[arg(long)]
        input: PathBuf,

        /// Output directory
        #[arg(long)]
        output: PathBuf,

        /// Write a coloured PLY scene per input
        #[arg(long)]
        visualize: bool,

        /// Posterior samples to draw per input
        #[arg(long, default_value_t = 0)]
        samples: usize,

        /// Seed for reproducible samples
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Fit the model to unordered point clouds with ICP
    Icp {
        /// Model file written by `build`
        #[arg(long)]
        pdm: PathBuf,

        /// Plain .pts file or directory of them
        #[arg(long)]
        input: PathBuf,

        /// Output directory
        #[arg(long)]
        output: PathBuf,

        /// Write a coloured PLY scene per input
        #[arg(long)]
        visualize: bool,

        /// Correspondence/refit rounds (overrides the config file)
        #[arg(long)]
        iterations: Option<usize>,

        /// Stop once no tracked point moves further than this
        #[arg(long)]
        convergence_threshold: Option<f64>,

        /// JSON file with ICP parameters
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("cannot configure worker pool")?;
    }

    match cli.command {
        Commands::Build {
            input,
            output,
            max_components,
        } => {
            commands::build(&BuildOptions {
                input,
                output,
                max_components,
            })?;
        }
        Commands::Posterior {
            pdm,
            input,
            output,
            visualize,
            samples,
            seed,
        } => {
            let fitted = commands::fit_posterior(&PosteriorOptions {
                pdm,
                input,
                output,
                visualize,
                samples,
                seed,
            })?;
            info!(files = fitted, "posterior fitting complete");
        }
        Commands::Icp {
            pdm,
            input,
            output,
            visualize,
            iterations,
            convergence_threshold,
            config,
        } => {
            let fitted = commands::fit_icp_batch(&IcpOptions {
                pdm,
                input,
                output,
                visualize,
                iterations,
                convergence_threshold,
                config,
            })?;
            info!(files = fitted, "icp fitting complete");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn icp_flags_parse() {
        let cli = Cli::try_parse_from([
            "shapemodels",
            "icp",
            "--pdm",
            "model.json",
            "--input",
            "scans",
            "--output",
            "out",
            "--iterations",
            "5",
            "--threads",
            "2",
        ])
        .unwrap();
        assert_eq!(cli.threads, Some(2));
        match cli.command {
            Commands::Icp {
                iterations,
                visualize,
                convergence_threshold,
                ..
            } => {
                assert_eq!(iterations, Some(5));
                assert!(!visualize);
                assert_eq!(convergence_threshold, None);
            }
            _ => panic!("expected icp subcommand"),
        }
    }

    #[test]
    fn posterior_requires_pdm() {
        assert!(Cli::try_parse_from(["shapemodels", "posterior", "--input", "a", "--output", "b"])
            .is_err());
    }
}
