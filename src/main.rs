use std::env;
use std::rc::Rc;

use clap::Parser;
use file_rotate::compression::Compression;
use file_rotate::suffix::AppendCount;
use file_rotate::{ContentLimit, FileRotate};
use log::info;

use dslab_provreq::config::SimulationConfig;
use dslab_provreq::simulation_callbacks::{
    RunUntilDeadlineCallbacks, RunUntilProvisioningRequestsSettledCallbacks, SimulationCallbacks,
};
use dslab_provreq::simulator::ProvreqSimulation;
use dslab_provreq::trace::generic::GenericTrace;

const MAX_LOG_FILE_SIZE: usize = 64 * 1024 * 1024;
const MAX_LOG_FILES: usize = 8;

#[derive(Parser)]
struct Args {
    #[clap(short, long)]
    config_file: std::path::PathBuf,
    #[clap(short, long)]
    trace_file: std::path::PathBuf,
    /// Stop the simulation at this time (in seconds). Without it the simulation runs until all
    /// provisioning requests are provisioned or failed.
    #[clap(long)]
    deadline: Option<f64>,
    /// Period of checking provisioning requests when running without deadline.
    #[clap(long, default_value_t = 60.0)]
    check_interval: f64,
}

fn init_logger(logs_filepath: Option<&String>) {
    // log level INFO by default
    let mut env_logger_builder = env_logger::builder();
    if env::var("RUST_LOG").is_err() {
        env_logger_builder.filter_level(log::LevelFilter::Info);
    }
    if let Some(path) = logs_filepath {
        let log_file = FileRotate::new(
            path,
            AppendCount::new(MAX_LOG_FILES),
            ContentLimit::BytesSurpassed(MAX_LOG_FILE_SIZE),
            Compression::None,
            #[cfg(unix)]
            None,
        );
        env_logger_builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    env_logger_builder.init();
}

fn main() {
    let args = Args::parse();

    let config_yaml =
        std::fs::read_to_string(&args.config_file).expect("could not read config file");
    let trace_yaml =
        std::fs::read_to_string(&args.trace_file).expect("could not read trace file");

    let config = Rc::new(
        serde_yaml::from_str::<SimulationConfig>(&config_yaml).expect("could not parse config"),
    );
    init_logger(config.logs_filepath.as_ref());

    info!("Path to config file: {:?}", args.config_file);
    info!("Path to trace file: {:?}", args.trace_file);

    let mut trace =
        serde_yaml::from_str::<GenericTrace>(&trace_yaml).expect("could not parse trace");

    let mut simulation =
        ProvreqSimulation::new(config).expect("could not create simulation from config");
    simulation.initialize(&mut trace);

    let callbacks: Box<dyn SimulationCallbacks> = match args.deadline {
        Some(deadline) => Box::new(RunUntilDeadlineCallbacks::new(deadline)),
        None => Box::new(RunUntilProvisioningRequestsSettledCallbacks::new(
            f64::MAX,
            args.check_interval,
        )),
    };
    simulation.run_with_callbacks(callbacks);
}
