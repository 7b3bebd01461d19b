//! Shell-courier binary entry point.

use std::process::ExitCode;

use shell_courier::cli::{self, ServiceAction, Subcommand};
use shell_courier::config::Config;
use shell_courier::{execution, logging, net, CourierError, RemoteClient};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Run with --help for usage.");
            return ExitCode::from(2);
        }
    };

    if args.help {
        cli::print_help();
        return ExitCode::SUCCESS;
    }
    if args.version {
        cli::print_version();
        return ExitCode::SUCCESS;
    }

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(2);
        }
    };

    if let Err(e) = logging::init_with_filter(config.log_filter()) {
        eprintln!("warning: logging disabled: {}", e);
    }

    let Some(command) = args.command else {
        cli::print_help();
        return ExitCode::from(2);
    };

    match run(&config, command).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            exit_code(&e)
        }
    }
}

async fn run(config: &Config, command: Subcommand) -> shell_courier::Result<ExitCode> {
    if command.is_remote() {
        return run_on_host(config, command).await;
    }
    match command {
        Subcommand::Eval { command_line } => {
            // Output already streamed to the terminal.
            execution::command(&command_line).await?;
            Ok(ExitCode::SUCCESS)
        }
        Subcommand::WaitTcp {
            host,
            port,
            timeout,
        } => {
            if net::wait_for_tcp(&host, port, timeout).await {
                Ok(ExitCode::SUCCESS)
            } else {
                error!("{}:{} not reachable within {:?}", host, port, timeout);
                Ok(ExitCode::FAILURE)
            }
        }
        _ => Ok(ExitCode::SUCCESS),
    }
}

async fn run_on_host(config: &Config, command: Subcommand) -> shell_courier::Result<ExitCode> {
    let remote_config = config
        .to_remote_config()
        .map_err(|e| CourierError::Config(e.to_string()))?;
    let client = RemoteClient::new(remote_config);
    client
        .open_with_retry(config.remote.connect_attempts)
        .await?;
    info!("connected to {}", client.config().target());

    let outcome = run_remote(&client, command).await;
    if let Err(e) = client.close().await {
        error!("close failed: {}", e);
    }
    outcome
}

async fn run_remote(client: &RemoteClient, command: Subcommand) -> shell_courier::Result<ExitCode> {
    match command {
        Subcommand::Ssh { sudo, command } => {
            // Output already streamed to the terminal.
            client.run(sudo, &command).await.into_result()?;
        }
        Subcommand::Scp {
            local,
            remote,
            owner,
            group,
            mode,
        } => {
            client.scp_file(&local, &remote, &owner, &group, mode).await?;
        }
        Subcommand::Service { action, name } => match action {
            ServiceAction::Enable => client.enable_linux_service(&name).await?,
            ServiceAction::Disable => client.disable_linux_service(&name).await?,
            ServiceAction::Start => client.start_linux_service(&name).await?,
            ServiceAction::Stop => client.stop_linux_service(&name).await?,
            ServiceAction::Status => {
                let status = client.service_status(&name).await?;
                println!(
                    "{}: {}, {}",
                    name,
                    if status.enabled { "enabled" } else { "disabled" },
                    if status.running { "running" } else { "stopped" }
                );
            }
        },
        Subcommand::DeployService { name, unit_file } => {
            client.deploy_linux_service(&name, &unit_file).await?;
        }
        Subcommand::Eval { .. } | Subcommand::WaitTcp { .. } => {}
    }
    Ok(ExitCode::SUCCESS)
}

/// Exit with the failing command's status when there is one.
fn exit_code(err: &CourierError) -> ExitCode {
    match err {
        CourierError::ExitStatus { code: Some(code), .. }
        | CourierError::RemoteExit { code: Some(code), .. } => {
            u8::try_from(*code).map(ExitCode::from).unwrap_or(ExitCode::FAILURE)
        }
        _ => ExitCode::FAILURE,
    }
}
