use clap::Parser;
use log::*;
#[cfg(debug_assertions)]
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::{
    append::rolling_file::{
        RollingFileAppender,
        policy::compound::{
            CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger,
        },
    },
    config::{Appender, Config as LogConfig, Logger, Root},
    encode::pattern::PatternEncoder,
};
use court_common::match_snapshot::MatchSnapshot;
use std::path::{Path, PathBuf};

mod controller;
mod sync_adapter;

mod config;
use config::{Config, MatchDefaults};

use controller::Controller;
use sync_adapter::{CourtKey, SyncAdapter};

const APP_NAME: &str = "courtside";

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(long, short, action(clap::ArgAction::Count))]
    /// Increase the log verbosity
    verbose: u8,

    #[clap(long)]
    /// Port to listen on for read-only view connections, overrides the config file
    view_port: Option<u16>,

    #[clap(long)]
    /// Port to listen on for controller connections, overrides the config file
    control_port: Option<u16>,

    #[clap(long)]
    /// TOML file with the match settings for new courts, overrides the config file
    match_defaults: Option<PathBuf>,

    #[clap(long)]
    /// Directory with `<court>.json` snapshots to resume the configured courts from
    restore_dir: Option<PathBuf>,

    #[clap(long)]
    /// Directory within which log files will be placed, default is platform dependent
    log_location: Option<PathBuf>,

    #[clap(long, default_value = "5000000")]
    /// Max size in bytes that a log file is allowed to reach before being rolled over
    log_max_file_size: u64,

    #[clap(long, default_value = "3")]
    /// Number of archived logs to keep
    num_old_logs: u32,
}

fn init_logging(args: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let log_level = match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let log_base_path = match args.log_location.clone() {
        Some(path) => path,
        None => {
            let mut path = directories::BaseDirs::new()
                .ok_or("Could not find a directory to store logs")?
                .data_local_dir()
                .to_path_buf();
            path.push("courtside-logs");
            path
        }
    };
    let mut log_path = log_base_path.clone();
    let mut archived_log_path = log_base_path;
    log_path.push(format!("{APP_NAME}-log.txt"));
    archived_log_path.push(format!("{APP_NAME}-log-{{}}.txt.gz"));

    #[cfg(debug_assertions)]
    println!("Log path: {}", log_path.display());

    // Only log to the console in debug mode
    #[cfg(debug_assertions)]
    let console = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("[{d} {h({l:5})} {M}] {m}{n}")))
        .build();

    // Setup the file log roller
    let roller = FixedWindowRoller::builder().build(
        archived_log_path
            .to_str()
            .ok_or("Log path is not valid UTF-8")?,
        args.num_old_logs,
    )?;
    let file_policy = CompoundPolicy::new(
        Box::new(SizeTrigger::new(args.log_max_file_size)),
        Box::new(roller),
    );
    let file_appender = RollingFileAppender::builder()
        .append(true)
        .encoder(Box::new(PatternEncoder::new("[{d} {l:5} {M}] {m}{n}")))
        .build(log_path, Box::new(file_policy))?;

    // Setup the logging from all locations to use `LevelFilter::Error`
    let root = Root::builder().appender("file_appender");
    #[cfg(debug_assertions)]
    let root = root.appender("console");
    let root = root.build(LevelFilter::Error);

    // Setup the top level logging config
    let log_config = LogConfig::builder()
        .appender(Appender::builder().build("file_appender", Box::new(file_appender)));

    #[cfg(debug_assertions)]
    let log_config = log_config.appender(Appender::builder().build("console", Box::new(console)));

    let log_config = log_config
        .logger(Logger::builder().build(APP_NAME, log_level))
        .logger(Logger::builder().build("court_common", log_level))
        .build(root)?;

    log4rs::init_config(log_config)?;
    log_panics::init();

    Ok(())
}

fn load_config() -> Config {
    match confy::get_configuration_file_path(APP_NAME, None) {
        Ok(path) => info!("Reading config file from {path:?}"),
        Err(e) => warn!("Could not determine the config file path: {e}"),
    }

    match confy::load(APP_NAME, None) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file, overwriting with default. Error: {e}");
            let config = Config::default();
            if let Err(e) = confy::store(APP_NAME, None, &config) {
                error!("Failed to write default config file: {e}");
            }
            config
        }
    }
}

/// Starting snapshot of every configured court. A stored `<court>.json` in
/// `restore_dir` is used over the match defaults when there is one.
fn initial_courts(config: &Config, restore_dir: Option<&Path>) -> Vec<(CourtKey, MatchSnapshot)> {
    let mut initial = vec![];
    for name in &config.courts {
        let key = match CourtKey::new(name) {
            Ok(key) => key,
            Err(e) => {
                warn!("Skipping court {name:?} from the config file: {e}");
                continue;
            }
        };

        let stored = restore_dir
            .map(|dir| dir.join(format!("{name}.json")))
            .filter(|path| path.is_file());
        let snapshot = match stored {
            Some(path) => match std::fs::read_to_string(&path) {
                Ok(data) => {
                    info!("Restoring court {key} from {path:?}");
                    MatchSnapshot::from_json_str(&data)
                }
                Err(e) => {
                    warn!("Could not read {path:?}, using match defaults: {e}");
                    config.match_defaults.snapshot()
                }
            },
            None => config.match_defaults.snapshot(),
        };
        initial.push((key, snapshot));
    }
    initial
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();
    init_logging(&args)?;

    info!("Starting {APP_NAME}");

    let mut config = load_config();
    if let Some(path) = &args.match_defaults {
        config.match_defaults = MatchDefaults::new_from_file(path)?;
    }
    let view_port = args.view_port.unwrap_or(config.server.view_port);
    let control_port = args.control_port.unwrap_or(config.server.control_port);

    let initial = initial_courts(&config, args.restore_dir.as_deref());
    info!(
        "Serving courts {:?}",
        initial.iter().map(|(key, _)| key.as_str()).collect::<Vec<_>>()
    );

    let mut adapter = SyncAdapter::new(initial);
    adapter.listen_for_views(view_port);
    let control_join =
        controller::spawn_control_listener(Controller::new(adapter.handle()), control_port);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    control_join.abort();
    drop(adapter);

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use court_common::{bundles::SideBundle, match_snapshot::BestOf};
    use tempfile::TempDir;

    fn config(courts: &[&str]) -> Config {
        let mut config = Config {
            courts: courts.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        };
        config.match_defaults.best_of = BestOf::Five;
        config
    }

    #[test]
    fn test_initial_courts_from_defaults() {
        let initial = initial_courts(&config(&["court1", " padded", "court2"]), None);
        let keys: Vec<_> = initial.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(keys, vec!["court1", "court2"]);
        for (_, snapshot) in &initial {
            assert_eq!(snapshot.meta.best_of, BestOf::Five);
        }
    }

    #[test]
    fn test_initial_courts_restored() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("court1.json"),
            r#"{"games":{"side1":4,"side2":2},"server":"side2","sets":{"side1":[6],"side2":[]}}"#,
        )
        .unwrap();
        std::fs::write(temp_dir.path().join("court2.json"), "{truncated").unwrap();

        let initial = initial_courts(
            &config(&["court1", "court2", "court3"]),
            Some(temp_dir.path()),
        );
        assert_eq!(initial.len(), 3);

        let (_, restored) = &initial[0];
        assert_eq!(restored.games, SideBundle::new(4, 2));
        assert_eq!(restored.sets, SideBundle::new(vec![], vec![]));
        assert_eq!(restored.meta.best_of, BestOf::Three);

        let (_, unreadable) = &initial[1];
        assert_eq!(*unreadable, MatchSnapshot::default());

        let (_, missing) = &initial[2];
        assert_eq!(missing.meta.best_of, BestOf::Five);
    }
}
