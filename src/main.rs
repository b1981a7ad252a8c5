//! aci-deploy CLI entrypoint.

use std::io::Write;
use std::process::ExitCode;

use aci_deploy::auth::{AuthSettings, ServerProbe, TokenClient};
use aci_deploy::cancel::CancelToken;
use aci_deploy::cli::{Cli, Commands, LogFormat, ManageCommands, OutputFormatter};
use aci_deploy::cloud::AzureCli;
use aci_deploy::config::{CliParams, ConfigResolver, TargetParams};
use aci_deploy::error::{DeployError, Result};
use aci_deploy::lifecycle::{
    ConfirmationProvider, DeleteOptions, ForcedConfirmation, LifecycleManager, LogOptions,
    TerminalConfirmation,
};
use aci_deploy::planner::{DeploymentExecutor, DeploymentPlanner};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_format);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    let cancel = CancelToken::new();

    match runtime.block_on(run_interruptible(cli, formatter, cancel)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", formatter.error(e.kind(), &e.to_string()));
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. `RUST_LOG` takes precedence.
fn init_logging(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Runs the command with Ctrl-C wired to `cancel`.
async fn run_interruptible(
    cli: Cli,
    formatter: OutputFormatter,
    cancel: CancelToken,
) -> Result<ExitCode> {
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping");
            watcher.cancel();
        }
    });

    run(cli, &formatter, &cancel).await
}

/// Main async entry point.
async fn run(cli: Cli, formatter: &OutputFormatter, cancel: &CancelToken) -> Result<ExitCode> {
    let resolver = ConfigResolver::from_path(cli.env_file.as_deref())?;
    let client = AzureCli::new().with_subscription(
        resolver
            .env_file()
            .get("AZURE_SUBSCRIPTION_ID")
            .map(ToString::to_string),
    );

    match cli.command {
        Commands::Deploy { params } => cmd_deploy(&resolver, &client, &params, formatter, cancel).await,
        Commands::Plan { params } => cmd_plan(&resolver, &client, &params, formatter).await,
        Commands::Manage { target, command } => {
            cmd_manage(&resolver, &client, &target, command, formatter, cancel).await
        }
        Commands::Cleanup {
            target,
            include_registry,
            keep_group,
            force,
        } => {
            let options = DeleteOptions {
                delete_group_if_empty: !keep_group,
                include_registry,
                allow_missing_instance: true,
            };
            cmd_delete(&resolver, &client, &target, options, force, formatter).await
        }
        Commands::Token { show } => cmd_token(&resolver, show, formatter).await,
        Commands::Verify {
            target,
            url,
            no_auth,
        } => cmd_verify(&resolver, &client, target, url, no_auth, formatter, cancel).await,
    }
}

/// Plan and apply a deployment.
async fn cmd_deploy(
    resolver: &ConfigResolver,
    client: &AzureCli,
    params: &CliParams,
    formatter: &OutputFormatter,
    cancel: &CancelToken,
) -> Result<ExitCode> {
    let config = resolver.resolve(params)?;
    info!("Deploying {} as {}", config.desired.image, config.target);

    let plan = DeploymentPlanner::new(client).plan(&config).await?;
    if !formatter.is_json() {
        emit(&formatter.format_plan(&plan, &config.target));
    }

    let report = DeploymentExecutor::new(client)
        .with_cancel(cancel.clone())
        .execute(&plan, &config.target, &config.desired)
        .await;

    let service_url = report
        .final_state()
        .and_then(|state| state.fqdn.as_deref())
        .map(|fqdn| config.service_url(fqdn));
    emit(&formatter.format_report(&report, service_url.as_deref()));

    Ok(if report.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Show the deployment plan without executing it.
async fn cmd_plan(
    resolver: &ConfigResolver,
    client: &AzureCli,
    params: &CliParams,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let config = resolver.resolve(params)?;
    let plan = DeploymentPlanner::new(client).plan(&config).await?;
    emit(&formatter.format_plan(&plan, &config.target));
    Ok(ExitCode::SUCCESS)
}

/// Instance management commands.
async fn cmd_manage(
    resolver: &ConfigResolver,
    client: &AzureCli,
    target_params: &TargetParams,
    command: ManageCommands,
    formatter: &OutputFormatter,
    cancel: &CancelToken,
) -> Result<ExitCode> {
    if let ManageCommands::Delete {
        force,
        delete_group,
    } = command
    {
        let options = DeleteOptions {
            delete_group_if_empty: delete_group,
            include_registry: false,
            allow_missing_instance: false,
        };
        return cmd_delete(resolver, client, target_params, options, force, formatter).await;
    }

    let target = resolver.resolve_target(target_params)?;
    let manager = LifecycleManager::new(client).with_cancel(cancel.clone());

    match command {
        ManageCommands::Status => {
            let state = manager.status(&target).await?;
            let service_url = state
                .fqdn
                .as_deref()
                .and_then(|fqdn| service_url(resolver, target_params, fqdn).ok());
            emit(&formatter.format_status(&target, &state, service_url.as_deref()));
        }
        ManageCommands::Logs { follow, tail } => {
            let mut stream = manager.logs(&target, LogOptions { follow, tail }).await?;
            if follow {
                eprintln!("Following logs of {} (Ctrl-C to stop)", target.instance);
            }
            while let Some(line) = stream.next_line().await? {
                emit(&line);
            }
        }
        ManageCommands::Restart => {
            info!("Restarting {}", target.instance);
            let state = manager.restart(&target).await?;
            emit(&formatter.format_status(&target, &state, None));
        }
        ManageCommands::Start => {
            info!("Starting {}", target.instance);
            let state = manager.start(&target).await?;
            emit(&formatter.format_status(&target, &state, None));
        }
        ManageCommands::Stop => {
            manager.stop(&target).await?;
            emit(&formatter.success(&format!("Stopped {}", target.instance)));
        }
        ManageCommands::Delete { .. } => {}
    }

    Ok(ExitCode::SUCCESS)
}

/// Delete the instance and, depending on `options`, the registry and group.
async fn cmd_delete(
    resolver: &ConfigResolver,
    client: &AzureCli,
    target_params: &TargetParams,
    options: DeleteOptions,
    force: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let target = resolver.resolve_target(target_params)?;
    let confirmation: &dyn ConfirmationProvider = if force {
        &ForcedConfirmation
    } else {
        &TerminalConfirmation
    };

    let report = LifecycleManager::new(client)
        .delete(&target, options, confirmation)
        .await?;

    emit(&formatter.format_delete(&report));
    Ok(ExitCode::SUCCESS)
}

/// Fetch and print a bearer token.
async fn cmd_token(
    resolver: &ConfigResolver,
    show: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let settings = AuthSettings::from_env_file(resolver.env_file())?;
    let token = TokenClient::new()?.fetch(&settings).await?;
    emit(&formatter.format_token(&token, show));
    Ok(ExitCode::SUCCESS)
}

/// Probe the deployed server.
async fn cmd_verify(
    resolver: &ConfigResolver,
    client: &AzureCli,
    target_params: TargetParams,
    url: Option<String>,
    no_auth: bool,
    formatter: &OutputFormatter,
    cancel: &CancelToken,
) -> Result<ExitCode> {
    let base_url = match url {
        Some(url) => url,
        None => {
            let target = resolver.resolve_target(&target_params)?;
            let state = LifecycleManager::new(client)
                .with_cancel(cancel.clone())
                .status(&target)
                .await?;
            let fqdn = state
                .fqdn
                .ok_or_else(|| DeployError::not_found("Public FQDN of instance", &target.instance))?;
            service_url(resolver, &target_params, &fqdn)?
        }
    };

    let token = if no_auth {
        None
    } else {
        match AuthSettings::from_env_file(resolver.env_file()) {
            Ok(settings) => Some(TokenClient::new()?.fetch(&settings).await?),
            Err(e) => {
                warn!("No token available, checking /health only: {e}");
                None
            }
        }
    };

    let report = ServerProbe::new()?.verify(&base_url, token.as_ref()).await;
    emit(&formatter.format_probe(&report));

    Ok(if report.healthy() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Service URL from the configured ports.
fn service_url(resolver: &ConfigResolver, target: &TargetParams, fqdn: &str) -> Result<String> {
    let params = CliParams {
        target: target.clone(),
        ..CliParams::default()
    };
    let config = resolver.resolve(&params)?;
    debug!("Service port resolved for {}", config.target.instance);
    Ok(config.service_url(fqdn))
}

/// Writes command output to stdout; logs and prompts go to stderr.
fn emit(text: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{text}");
}
