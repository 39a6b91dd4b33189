use std::path::PathBuf;
use std::process::ExitCode;

use switchboard::error::GatewayError;
use switchboard::{Config, Gateway};

/// Exit codes: 0 normal, 1 configuration error, 2 listener bind failure,
/// 3 fatal runtime error
#[tokio::main]
async fn main() -> ExitCode {
    let config_path: Option<PathBuf> = std::env::args().nth(1).map(PathBuf::from);

    let config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(1);
        }
    };

    let gateway = Gateway::new(config);

    let run = {
        let gateway = gateway.clone();
        tokio::spawn(gateway.run())
    };

    let outcome = tokio::select! {
        result = run => match result {
            Ok(inner) => inner,
            Err(e) => Err(GatewayError::generic(format!("server task panicked: {e}"))),
        },
        _ = shutdown_signal() => Ok(()),
    };

    gateway.shutdown().await;

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(GatewayError::BindFailed { port, reason }) => {
            eprintln!("bind failed on port {port}: {reason}");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("fatal: {e}");
            ExitCode::from(3)
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("sigterm handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
