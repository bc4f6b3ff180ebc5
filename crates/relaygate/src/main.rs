use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use relaygate_core::ops::{self, Context};
use relaygate_core::{
    normalize_domain, parse_ports, AddPortOutcome, ConfigStore, Role, SystemPaths, TunnelConfig,
};
use relaygate_tui::{logs, monitor, Menu, Printer};

mod logging;
mod runner;

/// relaygate - TCP port forwarding tunnel with an nginx/certbot edge
#[derive(Parser, Debug)]
#[command(name = "relaygate")]
#[command(about = "Forward TCP ports between an edge server and an upstream server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Tunnel config record
    #[arg(long, global = true, env = "RELAYGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Persistent log for operator commands
    #[arg(long, global = true, env = "RELAYGATE_LOG")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the config, set up the edge (iran role) and start the service
    Install(InstallArgs),

    /// Remove the service, the edge artifacts and the config
    Uninstall {
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Run the forwarders (used by the service unit)
    Run,

    /// Forward one more port and restart the service
    AddPort {
        port: u16,
    },

    /// Make the running service reread the config (SIGHUP)
    Reload,

    /// Restart the service periodically
    Schedule {
        /// 1h, 3h, 6h, 12h, 24h or off; omit to show the current setting
        interval: Option<String>,
    },

    /// Follow a log, or search all logs
    Logs {
        #[arg(value_enum, default_value_t = LogName::Service)]
        log: LogName,

        /// Search every log for a keyword instead of following one
        #[arg(long)]
        search: Option<String>,
    },

    /// Print config, service state, listening ports and recent log lines
    Monitor,

    /// Print status, optionally as JSON
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Interactive menu (the default)
    Menu,
}

#[derive(clap::Args, Debug)]
struct InstallArgs {
    /// iran (edge) or foreign (upstream)
    #[arg(long)]
    role: Role,

    /// Ports to forward, comma separated
    #[arg(long)]
    ports: String,

    /// Panel port; never forwarded and denied on the edge
    #[arg(long)]
    panel_port: u16,

    /// Public domain (iran role)
    #[arg(long)]
    domain: Option<String>,

    /// Foreign server address (iran role)
    #[arg(long)]
    foreign_ip: Option<String>,

    /// ACME registration email
    #[arg(long)]
    email: Option<String>,

    /// Path prefix proxied to the local tunnel service
    #[arg(long, default_value = "/")]
    control_path: String,

    /// Local port behind the control path (defaults to the first forwarded port)
    #[arg(long)]
    control_port: Option<u16>,

    /// Close relayed connections idle for this many seconds (0 = never)
    #[arg(long, default_value_t = 0)]
    idle_timeout: u64,
}

impl InstallArgs {
    fn into_config(self) -> Result<TunnelConfig> {
        let ports = parse_ports(&self.ports)?;
        let mut config = TunnelConfig::new(self.role, ports, self.panel_port);
        config.domain = self.domain.as_deref().map(normalize_domain);
        config.upstream_address = self.foreign_ip;
        config.acme_email = self.email;
        config.control_path = self.control_path;
        config.control_port = self.control_port;
        config.idle_timeout_secs = self.idle_timeout;
        config.validate()?;
        Ok(config)
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogName {
    Install,
    Service,
    Error,
    ProxyAccess,
    ProxyError,
}

impl LogName {
    fn label(&self) -> &'static str {
        match self {
            LogName::Install => "install",
            LogName::Service => "service",
            LogName::Error => "error",
            LogName::ProxyAccess => "proxy-access",
            LogName::ProxyError => "proxy-error",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut paths = SystemPaths::from_env();
    if let Some(config) = &cli.config {
        paths = paths.with_config_file(config);
    }
    let log_file = cli.log_file.clone().unwrap_or_else(|| paths.install_log());

    let command = cli.command.unwrap_or(Commands::Menu);
    match &command {
        Commands::Run => logging::init_service()?,
        Commands::Menu => logging::init_cli(&log_file, true)?,
        _ => logging::init_cli(&log_file, false)?,
    }

    if let Err(e) = dispatch(command, paths).await {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn dispatch(command: Commands, paths: SystemPaths) -> Result<()> {
    match command {
        Commands::Run => runner::run(ConfigStore::new(&paths.config_file)).await,
        Commands::Install(args) => install(paths, args).await,
        Commands::Uninstall { yes } => uninstall(paths, yes).await,
        Commands::AddPort { port } => add_port(paths, port).await,
        Commands::Reload => reload(paths).await,
        Commands::Schedule { interval } => schedule(paths, interval).await,
        Commands::Logs { log, search } => show_logs(paths, log, search).await,
        Commands::Monitor => show_status(paths, false, 20).await,
        Commands::Status { json } => show_status(paths, json, 0).await,
        Commands::Menu => menu(paths).await,
    }
}

async fn install(paths: SystemPaths, args: InstallArgs) -> Result<()> {
    let config = args.into_config()?;
    ops::preflight(config.role)?;

    let exe = std::env::current_exe().context("Failed to locate the relaygate executable")?;
    let ctx = Context::system(paths);
    tracing::info!("Installing {} role", config.role);

    let report = ops::install(&ctx, &config, exe)
        .await
        .context("Install failed")?;
    if let Some(bootstrap) = &report.bootstrap {
        tracing::info!(
            "Edge for {} is serving with {}",
            bootstrap.site.domain,
            bootstrap.certificate.cert_path.display()
        );
    }
    tracing::info!("Install complete (config version {})", report.config_version);
    Ok(())
}

async fn uninstall(paths: SystemPaths, yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!("Uninstall removes the service, routing rules, certificates and config; pass --yes to confirm");
    }
    let ctx = Context::system(paths);
    let report = ops::uninstall(&ctx).await;
    if report.warnings.is_empty() {
        tracing::info!("relaygate removed");
    } else {
        tracing::warn!("relaygate removed with {} warning(s)", report.warnings.len());
    }
    Ok(())
}

async fn add_port(paths: SystemPaths, port: u16) -> Result<()> {
    let ctx = Context::system(paths);
    match ops::add_port(&ctx, port).await? {
        AddPortOutcome::Added(config) => {
            let ports: Vec<String> = config.ports.iter().map(u16::to_string).collect();
            tracing::info!("Forwarding ports: {}", ports.join(","));
        }
        AddPortOutcome::AlreadyExists => {
            println!("Port {} already exists", port);
        }
    }
    Ok(())
}

async fn reload(paths: SystemPaths) -> Result<()> {
    let ctx = Context::system(paths);
    let config = ops::reload(&ctx).await.context("Reload failed")?;
    let ports: Vec<String> = config.forwarded_ports().map(|p| p.to_string()).collect();
    tracing::info!("Reload requested; forwarding ports: {}", ports.join(","));
    Ok(())
}

async fn schedule(paths: SystemPaths, interval: Option<String>) -> Result<()> {
    let ctx = Context::system(paths);
    let manager = ctx.schedule();
    match interval.as_deref() {
        None => match manager.current().await? {
            Some(interval) => println!("Service restarts every {}", interval),
            None => println!("Scheduled restart is off"),
        },
        Some(off) if off.eq_ignore_ascii_case("off") => {
            manager.disable().await?;
        }
        Some(value) => {
            manager.install(value.parse()?).await?;
        }
    }
    Ok(())
}

async fn show_logs(paths: SystemPaths, log: LogName, search: Option<String>) -> Result<()> {
    let all_logs = paths.all_logs();
    let mut stdout = std::io::stdout();

    if let Some(keyword) = search {
        let hits = logs::print_search(&all_logs, &keyword, &mut stdout)?;
        if hits == 0 {
            println!("No matches for '{}'", keyword);
        }
        return Ok(());
    }

    let path = all_logs
        .iter()
        .find(|(label, _)| *label == log.label())
        .map(|(_, path)| path.clone())
        .context("Unknown log")?;

    if log == LogName::Install {
        for line in relaygate_core::status::tail_lines(&path, 200)? {
            println!("{}", line);
        }
        return Ok(());
    }
    logs::follow(&path, &mut stdout, runner::shutdown_signal()).await?;
    Ok(())
}

async fn show_status(paths: SystemPaths, json: bool, log_lines: usize) -> Result<()> {
    let ctx = Context::system(paths);
    let report = relaygate_core::status::collect(&ctx, log_lines).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        monitor::render(&mut Printer::stdout(), &report, chrono::Local::now())?;
    }
    Ok(())
}

async fn menu(paths: SystemPaths) -> Result<()> {
    let exe = std::env::current_exe().context("Failed to locate the relaygate executable")?;
    let ctx = Arc::new(Context::system(paths));
    let handle = tokio::runtime::Handle::current();

    tokio::task::spawn_blocking(move || Menu::new(ctx, handle, exe)?.run())
        .await
        .context("Menu thread panicked")?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_install_args_build_edge_config() {
        let cli = Cli::try_parse_from([
            "relaygate",
            "install",
            "--role",
            "iran",
            "--ports",
            "8443,8080",
            "--panel-port",
            "2053",
            "--domain",
            "T.example.com",
            "--foreign-ip",
            "203.0.113.9",
        ])
        .unwrap();
        let Some(Commands::Install(args)) = cli.command else {
            panic!("expected install");
        };
        let config = args.into_config().unwrap();
        assert_eq!(config.role, Role::Edge);
        assert_eq!(config.domain.as_deref(), Some("t.example.com"));
        assert_eq!(config.ports, vec![8443, 8080]);
        assert_eq!(config.excluded_port, 2053);
    }

    #[test]
    fn test_install_args_reject_missing_domain() {
        let cli = Cli::try_parse_from([
            "relaygate",
            "install",
            "--role",
            "iran",
            "--ports",
            "8443",
            "--panel-port",
            "2053",
        ])
        .unwrap();
        let Some(Commands::Install(args)) = cli.command else {
            panic!("expected install");
        };
        assert!(args.into_config().is_err());
    }

    #[test]
    fn test_global_config_after_subcommand() {
        let cli = Cli::try_parse_from(["relaygate", "run", "--config", "/tmp/tunnel.conf"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Run)));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/tunnel.conf")));
    }

    #[test]
    fn test_reload_subcommand() {
        let cli = Cli::try_parse_from(["relaygate", "reload"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Reload)));
    }

    #[test]
    fn test_logs_defaults_to_service() {
        let cli = Cli::try_parse_from(["relaygate", "logs"]).unwrap();
        match cli.command {
            Some(Commands::Logs { log, search }) => {
                assert_eq!(log, LogName::Service);
                assert!(search.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
        let cli = Cli::try_parse_from(["relaygate", "logs", "proxy-error"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Logs { log: LogName::ProxyError, .. })
        ));
    }
}
