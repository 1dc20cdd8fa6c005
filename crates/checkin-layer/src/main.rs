use anyhow::{Context, Result};
use checkin_layer::test_harness::{run_simulator, SimulatorConfig};
use checkin_layer::{DeviceClass, LayerConfig};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Command::new("checkin-sim")
        .version(checkin_layer::VERSION)
        .about("Check-in map layer simulator")
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Drive the layer through randomized refresh, remount and camera cycles")
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("refreshes")
                        .long("refreshes")
                        .default_value("200")
                        .value_parser(value_parser!(u32))
                        .help("Number of data refreshes"),
                )
                .arg(
                    Arg::new("locations")
                        .long("locations")
                        .default_value("60")
                        .value_parser(value_parser!(u32))
                        .help("Distinct locations"),
                )
                .arg(
                    Arg::new("users")
                        .long("users")
                        .default_value("40")
                        .value_parser(value_parser!(u32))
                        .help("Distinct users"),
                )
                .arg(
                    Arg::new("remount-every")
                        .long("remount-every")
                        .default_value("25")
                        .value_parser(value_parser!(u32))
                        .help("Unmount and remount every N refreshes (0 = never)"),
                )
                .arg(
                    Arg::new("failure-rate")
                        .long("failure-rate")
                        .default_value("0.2")
                        .value_parser(value_parser!(f64))
                        .help("Share of avatar URLs that fail to load"),
                )
                .arg(
                    Arg::new("viewport-width")
                        .long("viewport-width")
                        .default_value("1280")
                        .value_parser(value_parser!(u32))
                        .help("Viewport width picking desktop or mobile clustering"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(String))
                        .help("TOML layer config; overrides --viewport-width"),
                )
                .arg(
                    Arg::new("stop-on-violation")
                        .long("stop-on-violation")
                        .action(ArgAction::SetTrue)
                        .help("Stop at the first violation"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output the report as JSON"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective layer configuration")
                .arg(
                    Arg::new("file")
                        .long("file")
                        .value_parser(value_parser!(String))
                        .help("TOML config file"),
                )
                .arg(
                    Arg::new("device")
                        .long("device")
                        .value_parser(["desktop", "mobile"])
                        .default_value("desktop")
                        .help("Device class defaults"),
                ),
        );

    let matches = cli.get_matches();
    init_tracing(matches.get_flag("log-json"));

    let result = match matches.subcommand() {
        Some(("simulate", args)) => simulate(args).await,
        Some(("config", args)) => print_config(args),
        _ => Ok(true),
    };

    match result {
        Ok(passed) => std::process::exit(if passed { 0 } else { 1 }),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(2);
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn simulate(args: &ArgMatches) -> Result<bool> {
    let layer = match args.get_one::<String>("config") {
        Some(path) => load_config(path)?,
        None => {
            let width = args.get_one::<u32>("viewport-width").copied().unwrap_or(1280);
            LayerConfig::for_viewport(width).with_env_overrides()
        }
    };
    layer.validate().context("invalid layer configuration")?;

    let defaults = SimulatorConfig::default();
    let config = SimulatorConfig {
        seed: args.get_one::<u64>("seed").copied().unwrap_or(defaults.seed),
        refreshes: args.get_one::<u32>("refreshes").copied().unwrap_or(defaults.refreshes),
        locations: args.get_one::<u32>("locations").copied().unwrap_or(defaults.locations),
        users: args.get_one::<u32>("users").copied().unwrap_or(defaults.users),
        remount_every: args
            .get_one::<u32>("remount-every")
            .copied()
            .unwrap_or(defaults.remount_every),
        failure_rate: args
            .get_one::<f64>("failure-rate")
            .copied()
            .unwrap_or(defaults.failure_rate),
        stop_on_first_violation: args.get_flag("stop-on-violation"),
        layer,
    };

    tracing::info!(
        seed = config.seed,
        refreshes = config.refreshes,
        device = ?config.layer.device_class,
        "running simulator"
    );
    let report = run_simulator(config).await;

    if args.get_flag("json") {
        println!("{}", report.to_json().context("serializing report")?);
    } else {
        println!("{}", report.generate_text());
    }
    Ok(report.passed())
}

fn print_config(args: &ArgMatches) -> Result<bool> {
    let config = match args.get_one::<String>("file") {
        Some(path) => load_config(path)?,
        None => {
            let device = match args.get_one::<String>("device").map(String::as_str) {
                Some("mobile") => DeviceClass::Mobile,
                _ => DeviceClass::Desktop,
            };
            LayerConfig::for_device(device).with_env_overrides()
        }
    };
    config.validate().context("invalid layer configuration")?;

    let rendered = toml::to_string_pretty(&config).context("rendering config")?;
    println!("{rendered}");
    Ok(true)
}

fn load_config(path: &str) -> Result<LayerConfig> {
    let source =
        std::fs::read_to_string(path).with_context(|| format!("reading config file {path}"))?;
    let config = LayerConfig::from_toml_str(&source)
        .with_context(|| format!("parsing config file {path}"))?;
    Ok(config.with_env_overrides())
}
