use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use rs_upf::config::Config;
use rs_upf::orchestrator::Orchestrator;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML config file. Missing keys fall back to built-in defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = match args.config {
        Some(path) => match Config::from_file(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::error!(error = %e, "failed to load config");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    let orchestrator = match Orchestrator::start(config) {
        Ok(o) => o,
        Err(e) => {
            tracing::error!(error = %e, "failed to start UPF data plane");
            std::process::exit(1);
        }
    };

    if let Err(e) = wait_for_shutdown_signal() {
        tracing::warn!(error = %e, "failed to install signal handler, running until killed");
        loop {
            std::thread::sleep(std::time::Duration::from_secs(3600));
        }
    }

    tracing::info!("shutdown signal received, stopping data plane");
    orchestrator.shutdown();
}

/// Blocks until SIGINT/SIGTERM. Installed by hand (no `ctrlc`/`signal-hook`
/// dependency) since all we need is "wake the main thread once".
fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use std::sync::atomic::{AtomicBool, Ordering};

    static RECEIVED: AtomicBool = AtomicBool::new(false);

    extern "C" fn handler(_signum: libc::c_int) {
        RECEIVED.store(true, Ordering::SeqCst);
    }

    unsafe {
        if libc::signal(libc::SIGINT, handler as libc::sighandler_t) == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error());
        }
        if libc::signal(libc::SIGTERM, handler as libc::sighandler_t) == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error());
        }
    }

    while !RECEIVED.load(Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_millis(200));
    }
    Ok(())
}
