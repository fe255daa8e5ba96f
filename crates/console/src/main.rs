//! Headless session check.
//!
//! Usage: `nexus-console [capability] [location]`
//!
//! Restores the persisted session, refreshes the profile if logged in, then
//! runs the guard for `capability` (default `users:read`) at `location`
//! (default `/users`) and logs the outcome.

use std::process::ExitCode;
use std::sync::Arc;

use nexus_auth::{Capability, NavigationOutcome};
use nexus_console::{Console, ConsoleConfig, TracingNotifier};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match ConsoleConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            return ExitCode::from(2);
        }
    };
    nexus_observability::init(config.log_format);

    let mut args = std::env::args().skip(1);
    let capability = Capability::new(args.next().unwrap_or_else(|| "users:read".to_string()));
    let location = args.next().unwrap_or_else(|| "/users".to_string());

    let console = match Console::bootstrap(config, Arc::new(TracingNotifier)) {
        Ok(console) => console,
        Err(err) => {
            tracing::error!(error = %err, "failed to start console");
            return ExitCode::FAILURE;
        }
    };

    if console.session().is_authenticated() {
        if let Err(handled) = console.refresh_profile().await {
            tracing::warn!(kind = ?handled.kind, "{}", handled.message);
        }
    }

    match console.navigate(&capability, &location).await {
        NavigationOutcome::Proceed => {
            tracing::info!(capability = %capability, location = %location, "access granted");
            ExitCode::SUCCESS
        }
        NavigationOutcome::Redirect(redirect) => {
            tracing::info!(reason = ?redirect.reason, target = %redirect.href(), "redirected");
            ExitCode::from(3)
        }
        NavigationOutcome::Blocked(err) => {
            tracing::error!(error = %err, "authorization could not be established");
            ExitCode::FAILURE
        }
        NavigationOutcome::Superseded => ExitCode::FAILURE,
    }
}
