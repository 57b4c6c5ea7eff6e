use clap::{Parser, Subcommand};
use pipeswitch::capture::AfPacketBackend;
use pipeswitch::config;
use pipeswitch::pipeline::StageRegistry;
use pipeswitch::telemetry::{init_logging, MetricsRegistry};
use pipeswitch::Switch;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "pipeswitch")]
#[command(about = "A layered software Ethernet switch and router")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the switch
    Run {
        /// Path to the switch configuration
        #[arg(short, long, default_value = "switch.toml")]
        config: PathBuf,
    },
    /// Check a configuration without starting the switch
    Validate {
        #[arg(short, long, default_value = "switch.toml")]
        config: PathBuf,
    },
    /// List the stages that can be placed in `control_process`
    Stages,
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { config } => cmd_run(&config),
        Commands::Validate { config } => cmd_validate(&config),
        Commands::Stages => {
            cmd_stages();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

fn cmd_run(config_path: &PathBuf) -> Result<(), String> {
    use tokio::runtime::Runtime;

    let cfg = config::load(config_path).map_err(|e| format!("Failed to load config: {}", e))?;
    init_logging(cfg.logging.as_ref());
    info!("Loaded {}", config_path.display());

    let registry = StageRegistry::builtin();
    let validation = config::validate(&cfg, &registry);
    validation.print_diagnostics();
    if validation.has_errors() {
        return Err("Validation failed with errors".to_string());
    }

    let rt = Runtime::new().map_err(|e| format!("Failed to create runtime: {}", e))?;

    rt.block_on(async move {
        let metrics = Arc::new(MetricsRegistry::new());
        let mut switch = Switch::from_config(&cfg, &registry, AfPacketBackend, metrics.clone())
            .map_err(|e| format!("Failed to build switch: {}", e))?;
        switch
            .start()
            .map_err(|e| format!("Failed to start switch: {}", e))?;

        info!("{} running, press Ctrl-C to stop", switch.name());
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to wait for Ctrl-C: {}", e);
        }

        let stopped = switch.stop().await;
        for (name, value) in metrics.export() {
            info!("{} = {}", name, value);
        }
        stopped.map_err(|e| format!("Shutdown error: {}", e))
    })
}

fn cmd_validate(config_path: &PathBuf) -> Result<(), String> {
    println!("[INFO] Validating {}...", config_path.display());

    let cfg = config::load(config_path).map_err(|e| format!("Failed to parse config: {}", e))?;

    let validation = config::validate(&cfg, &StageRegistry::builtin());
    validation.print_diagnostics();

    if validation.has_errors() {
        Err("Validation failed".to_string())
    } else {
        println!("[INFO] Configuration is valid");
        Ok(())
    }
}

fn cmd_stages() {
    for (layer, name) in StageRegistry::builtin().keys() {
        println!("L{}  {}", layer, name);
    }
}
