use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use weft::runtime_config::RuntimeConfig;
use weft::server::FragmentServer;
use weft::template::FsTemplateSource;
use weft::{PipelineConfig, RequestHandler};

#[derive(Parser)]
#[command(name = "weft")]
#[command(about = "Streaming HTML fragment composition server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve composed pages from a template directory
    Serve {
        /// Directory of .html page templates
        #[arg(short, long)]
        templates: PathBuf,

        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { templates, addr } => {
            let runtime = RuntimeConfig::from_env();
            may::config().set_stack_size(runtime.stack_size);

            let handler = RequestHandler::new(
                PipelineConfig::from_env(),
                Arc::new(FsTemplateSource::new(templates)),
            )?
            .with_runtime(runtime);

            let server = FragmentServer::new(handler).start(addr.as_str())?;
            println!("weft serving on {addr}");
            server
                .join()
                .map_err(|e| anyhow::anyhow!("server error: {e:?}"))?;
            Ok(())
        }
    }
}
