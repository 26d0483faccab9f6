//! The `ecofsd` daemon: configuration, daemonization and the request
//! loop.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use clap::Parser;
use log::LevelFilter;
use log::error;
use log::info;

use ecofs::Config;
use ecofs::FileServer;
use ecofs::ServerOptions;
use ecofs::fs::typemap::TypeMap;
use ecofs::transport::Transport;
use ecofs::transport::aun::AunTransport;
use ecofs::transport::beebem::BeebemTransport;
use ecofs::users::UserProvider;
use ecofs::users::null::NullUsers;
use ecofs::users::pwfile::PwFile;

/// Serve a Unix directory tree to legacy network clients.
#[derive(Debug, Parser)]
#[command(name = "ecofsd", version)]
struct Args {
    /// Configuration file.
    #[arg(short = 'c', default_value = "/etc/ecofsd.conf")]
    config: PathBuf,

    /// Force debug logging on.
    #[arg(short = 'd', conflicts_with = "no_debug")]
    debug: bool,

    /// Force debug logging off.
    #[arg(short = 'D')]
    no_debug: bool,

    /// Stay in the foreground.
    #[arg(short = 'f')]
    foreground: bool,

    /// Pid file.
    #[arg(short = 'p', default_value = "/var/run/ecofsd.pid")]
    pidfile: PathBuf,

    /// Force system-log output on.
    #[arg(short = 's', conflicts_with = "no_syslog")]
    syslog: bool,

    /// Force system-log output off.
    #[arg(short = 'S')]
    no_syslog: bool,
}

static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn catch_signal(_: i32) {
    STOP.store(true, Ordering::Relaxed);
}

fn install_signal_handler() -> nix::Result<()> {
    use nix::sys::signal;
    let action = signal::SigAction::new(
        signal::SigHandler::Handler(catch_signal),
        signal::SaFlags::empty(),
        signal::SigSet::empty(),
    );
    // The handler only raises a flag checked between requests.
    unsafe {
        signal::sigaction(signal::Signal::SIGINT, &action)?;
        signal::sigaction(signal::Signal::SIGTERM, &action)?;
    }
    Ok(())
}

/// The disc is named after the host, up to the first dot or sixteen
/// characters, whichever is sooner.
fn default_discname() -> String {
    let host = nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut name: String = host.split('.').next().unwrap_or("").chars().take(16).collect();
    if name.is_empty() {
        name = "ecofs".to_string();
    }
    name
}

fn run(args: Args) -> Result<(), String> {
    let mut config = Config::load(&args.config)
        .map_err(|e| format!("{}: {e}", args.config.display()))?;

    // Command-line overrides beat the configuration file.
    if args.debug {
        config.debug = true;
    }
    if args.no_debug {
        config.debug = false;
    }
    if args.syslog {
        config.syslog = true;
    }
    if args.no_syslog {
        config.syslog = false;
    }

    env_logger::Builder::new()
        .filter_level(if config.debug {
            LevelFilter::Debug
        } else if config.syslog {
            LevelFilter::Info
        } else {
            LevelFilter::Warn
        })
        .init();

    let users: Box<dyn UserProvider> = match &config.pwfile {
        Some(pwfile) => Box::new(PwFile::new(pwfile.clone(), config.opt4)),
        None => Box::new(NullUsers::new(config.urd.clone(), config.opt4)),
    };

    let transport: Box<dyn Transport> = match &config.beebem_cfg {
        Some(cfg) => Box::new(
            BeebemTransport::new(cfg, config.station, config.beebem_ingress)
                .map_err(|e| format!("emulated transport: {e}"))?,
        ),
        None => Box::new(AunTransport::new().map_err(|e| format!("bind: {e}"))?),
    };

    // All file access is by relative path from the root of the served
    // tree.
    let root = config
        .root
        .clone()
        .ok_or_else(|| "configuration names no root".to_string())?;
    std::env::set_current_dir(&root).map_err(|e| format!("{}: {e}", root.display()))?;

    install_signal_handler().map_err(|e| format!("sigaction: {e}"))?;

    if !(config.debug || args.foreground) {
        nix::unistd::daemon(true, false).map_err(|e| format!("daemon: {e}"))?;
    }
    if let Err(e) = write_pidfile(&args.pidfile) {
        error!("{}: {e}", args.pidfile.display());
    }

    let opts = ServerOptions {
        discname: default_discname(),
        lib: config.lib.clone(),
        infofmt: config.infofmt,
        safehandles: config.safehandles,
        typemap: std::mem::replace(&mut config.typemap, TypeMap::default()),
    };
    info!("started, serving {}", root.display());

    let mut server = FileServer::new(transport, users, opts);
    let result = server.run(&STOP);
    let _ = fs::remove_file(&args.pidfile);
    result.map_err(|e| format!("server: {e}"))
}

fn write_pidfile(path: &std::path::Path) -> std::io::Result<()> {
    let mut f = fs::File::create(path)?;
    writeln!(f, "{}", std::process::id())
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ecofsd: {e}");
            ExitCode::FAILURE
        }
    }
}
