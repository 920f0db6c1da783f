//! witnessd-entropyd: the isolated entropy daemon wrapper.
//!
//! Thin CLI around `witnessd_entropy::EntropyDaemon`: assemble the source
//! set, bind the owner-only socket, drop privileges, serve until
//! interrupted.
//!
//! Exit codes: 0 normal shutdown, 1 fatal initialization failure, 2 socket
//! bind failure, 130 interrupted.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use witnessd_core::{PrivilegeDropper, UnixPrivilegeDropper};
use witnessd_entropy::{
    BlendedEntropyPool, DaemonConfig, EntropyDaemon, EntropySource, JitterSource, OsSource,
    RdrandSource, RdseedSource,
};

const EXIT_FATAL_INIT: u8 = 1;
const EXIT_SOCKET_BIND: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug, Parser)]
#[command(name = "witnessd-entropyd", about = "witnessd isolated entropy daemon")]
struct Args {
    /// Socket path (default: per-user runtime dir + /entropy.sock)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Drop to this UID after binding (0 = do not drop)
    #[arg(long, default_value_t = 0)]
    uid: u32,

    /// Drop to this GID after binding (0 = do not drop)
    #[arg(long, default_value_t = 0)]
    gid: u32,

    /// Do not daemonize
    #[arg(long)]
    foreground: bool,

    /// TPM device path (default: auto-detect /dev/tpmrm0, /dev/tpm0)
    #[arg(long)]
    tpm_device: Option<PathBuf>,

    /// Optional TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    witnessd_core::logging::init();
    let args = Args::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to start runtime");
            return ExitCode::from(EXIT_FATAL_INIT);
        }
    };
    runtime.block_on(serve(args))
}

async fn serve(args: Args) -> ExitCode {
    let mut config = match args.config.as_deref() {
        Some(path) => match DaemonConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "failed to load configuration");
                return ExitCode::from(EXIT_FATAL_INIT);
            }
        },
        None => DaemonConfig::default(),
    };
    if let Some(socket) = args.socket {
        config.socket_path = socket;
    }
    config.drop_uid = args.uid;
    config.drop_gid = args.gid;

    if !args.foreground {
        tracing::warn!("daemonization is delegated to the service manager; staying in foreground");
    }

    let pool = Arc::new(build_pool(&config, args.tpm_device.as_deref()));

    let self_test = pool.startup_self_test(witnessd_entropy::DEFAULT_SELF_TEST_BYTES);
    for source in &self_test.sources {
        tracing::info!(
            source = %source.name,
            passed = source.passed,
            "start-up self-test"
        );
    }
    if !self_test.passed {
        tracing::warn!("one or more entropy sources failed the start-up self-test");
    }

    let dropper: Box<dyn PrivilegeDropper> = Box::new(UnixPrivilegeDropper);
    let daemon = match EntropyDaemon::bind(config, Arc::clone(&pool), dropper.as_ref()) {
        Ok(daemon) => daemon,
        Err(e) => {
            tracing::error!(error = %e, "socket bind failed");
            return ExitCode::from(EXIT_SOCKET_BIND);
        }
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let server = tokio::spawn(daemon.run(shutdown_rx));

    let interrupted = tokio::signal::ctrl_c().await.is_ok();
    tracing::info!("interrupt received; shutting down");
    let _ = shutdown_tx.send(());
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "daemon exited with error"),
        Err(e) => tracing::error!(error = %e, "daemon task panicked"),
    }

    if interrupted {
        ExitCode::from(EXIT_INTERRUPTED)
    } else {
        ExitCode::SUCCESS
    }
}

/// Assemble the daemon's source set: the kernel CSPRNG and CPU jitter
/// always, the x86 hardware instructions when the CPU has them.
fn build_pool(config: &DaemonConfig, tpm_device: Option<&std::path::Path>) -> BlendedEntropyPool {
    let pool = BlendedEntropyPool::new(config.pool.clone());
    pool.add_source(Box::new(OsSource::new()));
    pool.add_source(Box::new(JitterSource::new()));

    let rdrand = RdrandSource::new();
    if rdrand.available() {
        pool.add_source(Box::new(rdrand));
    }
    let rdseed = RdseedSource::new();
    if rdseed.available() {
        pool.add_source(Box::new(rdseed));
    }

    match tpm_device
        .map(|p| p.to_path_buf())
        .or_else(witnessd_tpm::detect_tpm_device)
    {
        Some(device) => tracing::info!(
            device = %device.display(),
            "TPM present; the TPM-backed source requires a vendor provider build"
        ),
        None => tracing::debug!("no TPM device detected"),
    }

    pool
}
