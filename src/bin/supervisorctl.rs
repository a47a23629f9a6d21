//! A thin `clap`-driven command-line front end over [`svc_supervisor::supervisor::Supervisor`],
//! standing in for the out-of-scope HTTP/WebSocket surface for local testing and demos.

use clap::{Parser, Subcommand};
use std::sync::Arc;
use svc_supervisor::catalog::{CatalogRepository, InMemoryCatalog};
use svc_supervisor::config::SupervisorConfig;
use svc_supervisor::logger::{self, LogLevel};
use svc_supervisor::service::{ServiceDefinition, ServiceType};
use svc_supervisor::supervisor::Supervisor;
use svc_supervisor::log;

#[derive(Parser)]
#[command(name = "supervisorctl", about = "Local demo front end for the service supervisor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Registers a demo service with the in-memory catalog, then starts it.
    Start {
        id: String,
        command: String,
        #[arg(long, default_value = "/tmp")]
        path: String,
        #[arg(long)]
        port: Option<u16>,
    },
    Stop { id: String },
    Restart { id: String },
    ForceKill { id: String },
    Status { id: String },
    Ports,
}

#[tokio::main]
async fn main() {
    logger::set_log_level(LogLevel::Info);
    let cli = Cli::parse();

    let catalog = Arc::new(InMemoryCatalog::new());
    let config = match SupervisorConfig::new() {
        Ok(cfg) => cfg,
        Err(e) => {
            log!(LogLevel::Warn, "Falling back to defaults: {}", e);
            SupervisorConfig::dummy()
        }
    };
    let supervisor = Supervisor::new(catalog.clone(), config);

    let result = run(&supervisor, catalog, cli.command).await;
    if let Err(e) = result {
        log!(LogLevel::Error, "{}", e);
        std::process::exit(1);
    }
}

async fn run(
    supervisor: &Supervisor,
    catalog: Arc<InMemoryCatalog>,
    command: Commands,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Start { id, command, path, port } => {
            let mut def = ServiceDefinition::new(&id, ServiceType::Backend, path).with_command(command);
            if let Some(port) = port {
                def = def.with_port(port);
            }
            catalog.upsert(def).await?;
            supervisor.start(&id).await?;
            println!("started '{id}'");
        }
        Commands::Stop { id } => {
            supervisor.stop(&id).await?;
            println!("stopped '{id}'");
        }
        Commands::Restart { id } => {
            supervisor.restart(&id).await?;
            println!("restarted '{id}'");
        }
        Commands::ForceKill { id } => {
            supervisor.force_kill(&id).await?;
            println!("force-killed '{id}'");
        }
        Commands::Status { id } => {
            let status = supervisor.status(&id).await?;
            println!(
                "{}: status={} pid={} last_error={:?}",
                status.id, status.status, status.pid, status.last_error
            );
        }
        Commands::Ports => {
            for record in supervisor.ports().await {
                println!(
                    "{:>6}  pid={:<8} {} {}",
                    record.port, record.pid, record.process_name, record.command_line
                );
            }
        }
    }
    Ok(())
}
