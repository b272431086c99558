use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use ieddata::{locate, AppEngineDb, Config, DockerEngine, PLATFORM_BOX_DB};

/// iedctl
#[derive(Debug, Parser)]
#[clap(name = "iedctl", version)]
pub struct App {
    /// TOML configuration file
    #[clap(long)]
    config: Option<PathBuf>,

    /// PID of a process in the runtime container's mount namespace; skips
    /// asking the container engine
    #[clap(long)]
    pid: Option<u32>,

    /// Database to open, relative to the database directory
    #[clap(long, default_value = PLATFORM_BOX_DB)]
    db: String,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Prints the PID of the runtime container's initial process
    Locate,
    /// Lists the installed apps
    Apps,
    /// Lists the device information entries
    DeviceInfo,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            Config::from_toml(&content).with_context(|| format!("parsing {}", path.display()))?
        }
        None => Config::default(),
    };
    Ok(config.with_env_overrides())
}

async fn locate_pid(config: &Config) -> Result<u32> {
    let engine = DockerEngine::new(&config.docker_host)?;
    Ok(locate(engine, &config.container_name).await?)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = App::parse();
    let config = load_config(args.config.as_ref())?;

    let pid = match args.pid {
        Some(pid) => pid,
        None => locate_pid(&config).await?,
    };

    if let Command::Locate = args.cmd {
        println!("{pid}");
        return Ok(());
    }

    let db = AppEngineDb::open_in_pid_with(&config, &args.db, pid)
        .with_context(|| format!("opening {:?} in PID {pid}", args.db))?;
    let result = match args.cmd {
        Command::Locate => Ok(()),
        Command::Apps => db.apps().map(|mut apps| {
            apps.sort_by(|a, b| a.title.cmp(&b.title));
            for app in apps {
                println!("{:?} {} {}", app.title, app.version, app.id);
            }
        }),
        Command::DeviceInfo => db.device_info().map(|info| {
            let mut entries: Vec<_> = info.into_iter().collect();
            entries.sort();
            for (key, value) in entries {
                println!("{key}={value}");
            }
        }),
    };
    db.close()?;
    Ok(result?)
}
