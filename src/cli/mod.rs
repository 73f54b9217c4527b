use std::sync::Arc;

use anyhow::{Context, Result, bail};
use console::style;

use crate::core::config::PipelineConfig;
use crate::core::controller::RunController;
use crate::core::slurm::{SchedulerGateway, SlurmGateway};
use crate::interfaces::web::ApiServer;

const DEFAULT_API_HOST: &str = "127.0.0.1";
const DEFAULT_API_PORT: u16 = 8000;

pub async fn run_main() -> Result<()> {
    crate::logging::init();

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        None | Some("serve") => serve(&args).await,
        Some("help") | Some("--help") | Some("-h") => {
            print_usage();
            Ok(())
        }
        Some(other) => bail!("unknown command: {other} (try 'expressdiff serve')"),
    }
}

async fn serve(args: &[String]) -> Result<()> {
    let mut api_host = DEFAULT_API_HOST.to_string();
    let mut api_port = DEFAULT_API_PORT;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--api-host" => {
                if i + 1 < args.len() {
                    api_host = args[i + 1].clone();
                    i += 2;
                } else {
                    bail!("--api-host requires a value");
                }
            }
            "--api-port" => {
                if i + 1 < args.len() {
                    api_port = args[i + 1]
                        .parse()
                        .with_context(|| format!("invalid port: {}", args[i + 1]))?;
                    i += 2;
                } else {
                    bail!("--api-port requires a value");
                }
            }
            _ => i += 1,
        }
    }

    let config = PipelineConfig::from_env().context("resolving install/work directories")?;
    config
        .ensure_layout()
        .with_context(|| format!("preparing work directory {}", config.work_dir.display()))?;

    let scheduler: Arc<dyn SchedulerGateway> = Arc::new(SlurmGateway::new(&config));
    let controller = Arc::new(RunController::new(config.clone(), scheduler)?);

    println!("{}", style("ExpressDiff pipeline server").bold());
    println!(
        "  {} {}",
        style("install dir").dim(),
        config.install_dir.display()
    );
    println!(
        "  {} {}",
        style("work dir").dim(),
        config.work_dir.display()
    );
    println!(
        "  {} http://{}:{}",
        style("api").dim(),
        api_host,
        api_port
    );

    ApiServer::new(controller, api_host, api_port).serve().await
}

fn print_usage() {
    println!("expressdiff — web-controlled SLURM orchestrator for RNA-seq pipelines");
    println!();
    println!("USAGE:");
    println!("  expressdiff serve [--api-host HOST] [--api-port PORT]");
    println!();
    println!("ENVIRONMENT:");
    println!("  EXPRESSDIFF_HOME     install directory (templates)");
    println!("  EXPRESSDIFF_WORKDIR  work directory override");
    println!("  SCRATCH              work directory fallback ($SCRATCH/expressdiff)");
}
