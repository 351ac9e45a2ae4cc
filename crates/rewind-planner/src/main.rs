use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, Command};
use rewind_planner::test_harness::{run_simulator, SimulatorConfig};
use rewind_planner::RewindConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Command::new("rewind-sim")
        .version(rewind_planner::VERSION)
        .about("Action rewind planner simulator")
        .subcommand(
            Command::new("simulate")
                .about("Plan rewinds over randomly generated builds")
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("builds")
                        .long("builds")
                        .default_value("50")
                        .value_parser(value_parser!(u64))
                        .help("Number of builds to generate"),
                )
                .arg(
                    Arg::new("losses")
                        .long("losses")
                        .default_value("8")
                        .value_parser(value_parser!(u64))
                        .help("Lost-input failures injected per build"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML file with planner limits"),
                )
                .arg(
                    Arg::new("stop-on-violation")
                        .long("stop-on-violation")
                        .action(ArgAction::SetTrue)
                        .help("Stop simulation on first violation"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        );

    let matches = cli.get_matches();

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let rewind = match args.get_one::<PathBuf>("config") {
                Some(path) => {
                    let source = std::fs::read_to_string(path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    RewindConfig::from_toml_str(&source)
                        .with_context(|| format!("parsing {}", path.display()))?
                }
                None => RewindConfig::default(),
            };
            let defaults = SimulatorConfig::default();
            let config = SimulatorConfig {
                seed: args.get_one::<u64>("seed").copied().unwrap_or(defaults.seed),
                builds: args.get_one::<u64>("builds").copied().unwrap_or(defaults.builds),
                losses_per_build: args
                    .get_one::<u64>("losses")
                    .copied()
                    .unwrap_or(defaults.losses_per_build),
                stop_on_first_violation: args.get_flag("stop-on-violation"),
                rewind,
                ..defaults
            };

            let report = run_simulator(config).await;
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.generate_text());
            }

            std::process::exit(if report.passed() { 0 } else { 1 });
        }
        _ => Ok(()),
    }
}
