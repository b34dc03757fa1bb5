//! CLI for enst: fold site telemetry into windows, rank ENST, replay power policies.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "enst")]
#[command(about = "enst: energy-normalized throughput for compute sites")]
#[command(version = enst_core::VERSION)]
struct Cli {
    /// Pipeline config JSON (window_secs, mode, gpu_weight, default_price_usd_per_mwh, data_source).
    /// Command-line flags override values from the file.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate usage and power samples into TSV records (NDJSON)
    Normalize {
        /// Usage samples: NDJSON or header-row CSV, optionally .gz
        #[arg(long)]
        usage: String,

        /// Power samples: NDJSON or header-row CSV, optionally .gz
        #[arg(long)]
        power: String,

        /// Window size in seconds
        #[arg(long)]
        window_secs: Option<u64>,

        /// Tag stamped on every record's data_source
        #[arg(long)]
        data_source: Option<String>,

        /// Output path (default: stdout)
        #[arg(long)]
        output: Option<String>,
    },

    /// Annotate TSV records with work units and ENST
    Enst {
        /// TSV records (NDJSON or CSV, optionally .gz); "-" for stdin
        input: String,

        /// Work-unit mode: infra (default) or domain
        #[arg(long)]
        mode: Option<String>,

        /// Weight of one GPU-second relative to one core-second
        #[arg(long)]
        gpu_weight: Option<f64>,

        /// Output path (default: stdout)
        #[arg(long)]
        output: Option<String>,
    },

    /// Rank sites by ENST and write the leaderboard CSV
    Leaderboard {
        /// ENST-annotated TSV records; "-" for stdin
        input: String,

        /// Price used for windows without one, USD/MWh
        #[arg(long)]
        default_price: Option<f64>,

        /// Output path (default: stdout)
        #[arg(long)]
        output: Option<String>,
    },

    /// Replay TSV records through a power policy and report the impact
    Replay {
        /// ENST-annotated TSV records; "-" for stdin
        input: String,

        /// Policy JSON (energy_cap_w, thermal_cap_w, grid_stress_cap, throttle_factor)
        #[arg(long)]
        policy: String,

        /// Price used for windows without one, USD/MWh
        #[arg(long)]
        default_price: Option<f64>,

        /// Write the impact summary JSON here (default: stdout)
        #[arg(long)]
        output: Option<String>,

        /// Also write the policy-applied records as NDJSON
        #[arg(long)]
        records: Option<String>,
    },

    /// Normalize, annotate and optionally rank in one pass
    Run {
        #[arg(long)]
        usage: String,

        #[arg(long)]
        power: String,

        #[arg(long)]
        window_secs: Option<u64>,

        #[arg(long)]
        mode: Option<String>,

        #[arg(long)]
        gpu_weight: Option<f64>,

        #[arg(long)]
        data_source: Option<String>,

        #[arg(long)]
        default_price: Option<f64>,

        /// ENST records output path (default: stdout)
        #[arg(long)]
        output: Option<String>,

        /// Also write the leaderboard CSV here
        #[arg(long)]
        leaderboard: Option<String>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Normalize {
            usage,
            power,
            window_secs,
            data_source,
            output,
        } => {
            let config = commands::resolve_config(
                config_path,
                &commands::ConfigOverrides {
                    window_secs,
                    data_source,
                    ..Default::default()
                },
            );
            commands::normalize::run(config, &usage, &power, output.as_deref())
        }
        Commands::Enst {
            input,
            mode,
            gpu_weight,
            output,
        } => {
            let config = commands::resolve_config(
                config_path,
                &commands::ConfigOverrides {
                    mode,
                    gpu_weight,
                    ..Default::default()
                },
            );
            commands::enst::run(&config, &input, output.as_deref())
        }
        Commands::Leaderboard {
            input,
            default_price,
            output,
        } => {
            let config = commands::resolve_config(
                config_path,
                &commands::ConfigOverrides {
                    default_price,
                    ..Default::default()
                },
            );
            commands::leaderboard::run(&config, &input, output.as_deref())
        }
        Commands::Replay {
            input,
            policy,
            default_price,
            output,
            records,
        } => {
            let config = commands::resolve_config(
                config_path,
                &commands::ConfigOverrides {
                    default_price,
                    ..Default::default()
                },
            );
            commands::replay::run(commands::replay::ReplayCommandConfig {
                config: &config,
                input: &input,
                policy_path: &policy,
                output_path: output.as_deref(),
                records_path: records.as_deref(),
            })
        }
        Commands::Run {
            usage,
            power,
            window_secs,
            mode,
            gpu_weight,
            data_source,
            default_price,
            output,
            leaderboard,
        } => {
            let config = commands::resolve_config(
                config_path,
                &commands::ConfigOverrides {
                    window_secs,
                    mode,
                    gpu_weight,
                    default_price,
                    data_source,
                },
            );
            commands::run::run(commands::run::RunCommandConfig {
                config,
                usage_path: &usage,
                power_path: &power,
                output_path: output.as_deref(),
                leaderboard_path: leaderboard.as_deref(),
            })
        }
    }
}
