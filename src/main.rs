use std::env;
use std::io::{self, Write};
use std::process;

use anyhow::{Context, Result};
use demoter::{Argv, Identity, Limits};
use tokio::runtime;

fn setup_tracing() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter};

    // stdout carries the usage report and stderr the diagnostics,
    // so nothing is logged unless RUST_LOG asks for it
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off"));

    tracing_subscriber::fmt()
        .event_format(fmt::format::Format::default().pretty())
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .with_timer(fmt::time::ChronoLocal::rfc3339())
        .finish()
        .with(ErrorLayer::default())
        .init();
}

fn launch() -> Result<i32> {
    demoter::drop_to(Identity::unprivileged())?;

    dotenv::dotenv().ok();
    setup_tracing();

    let limits = Limits::from_env()?;
    let argv = Argv::new(env::args_os().skip(1))?;

    let runtime = runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .max_blocking_threads(1)
        .enable_time()
        .build()
        .context("failed to build runtime")?;

    let report = {
        let _enter = runtime.enter();
        demoter::run(&argv, &limits)?
    };

    {
        let stderr = io::stderr();
        let mut stderr_lock = stderr.lock();
        report.write_diagnostics(&mut stderr_lock)?;
    }

    {
        let stdout = io::stdout();
        let mut stdout_lock = stdout.lock();
        report.write_usage(&mut stdout_lock)?;
        stdout_lock.flush()?;
    }

    Ok(report.exit_code())
}

fn main() {
    let code = match launch() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            1
        }
    };
    process::exit(code)
}
