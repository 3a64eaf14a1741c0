use clap::{Parser, Subcommand};
use imgfly::config::{self, CONFIG_FILE_NAME, Config};
use imgfly::server::{ServerState, SharedState, start_server};
use imgfly::service::{Imagefly, TransformRequest};
use imgfly::{output, warm};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "imgfly")]
#[command(about = "On-demand image transformation cache")]
#[command(long_about = "\
On-demand image transformation cache

Requests name a source image and a hyphen-delimited operation list:

  GET /imagefly/w200-h150-c-q85-logo/photos/beach.jpg
  GET /imagefly/w800/https://example.com/img/a.jpg?v=2

Operations:
  w<int>   target width
  h<int>   target height
  c        crop to exactly w x h (a missing side copies the other)
  q<int>   encode quality, 1-100
  <other>  selects the watermark configured under that name

Each result is built once and cached under a name derived from the source
path, the normalized operations and the source's modification time.

Run 'imgfly gen-config' to generate a documented imgfly.toml.")]
#[command(version)]
struct Cli {
    /// Config file
    #[arg(long, default_value = CONFIG_FILE_NAME, global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server
    Serve {
        /// Listen address, overrides [server] listen
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Run a single request and print a summary
    Render {
        /// Operation list, e.g. w200-h150-c
        params: String,
        /// Source path below source_root, or an http(s) URI
        source: String,
        /// Query string forwarded to remote sources
        #[arg(long)]
        query: Option<String>,
        /// Write the response body to this file
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Pre-build presets for every image below source_root
    Warm {
        /// Operation lists to build (defaults to the configured presets)
        params: Vec<String>,
    },
    /// Validate the configuration
    Check,
    /// Print a stock imgfly.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing()?;

    match cli.command {
        Command::Serve { listen } => {
            let config = config::load_config(&cli.config)?;
            let addr = match listen {
                Some(addr) => addr,
                None => config.server.listen.parse()?,
            };
            let service = Imagefly::from_config(&config);
            service.store().init()?;
            log_startup(&config);

            let state: SharedState = Arc::new(ServerState::new(service));
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(start_server(state, addr))?;
        }
        Command::Render {
            params,
            source,
            query,
            output: output_path,
        } => {
            let config = config::load_config(&cli.config)?;
            let service = Imagefly::from_config(&config);
            let request = TransformRequest {
                params: &params,
                source: &source,
                query: query.as_deref(),
                if_modified_since: None,
            };
            let served = service.handle(&request, chrono::Utc::now())?;
            if let Some(path) = &output_path {
                std::fs::write(path, &served.response.body)?;
            }
            output::print_render_output(&served, output_path.as_deref());
        }
        Command::Warm { params } => {
            let config = config::load_config(&cli.config)?;
            let presets = if params.is_empty() {
                config.presets.clone()
            } else {
                params
            };
            init_thread_pool(&config.processing);
            let service = Imagefly::from_config(&config);

            let (tx, rx) = std::sync::mpsc::channel();
            let printer = std::thread::spawn(move || {
                for event in rx {
                    for line in output::format_warm_event(&event) {
                        println!("{}", line);
                    }
                }
            });
            let result = warm::warm(&service, &config.source_root, &presets, Some(tx));
            printer.join().ok();
            output::print_warm_summary(&result?);
        }
        Command::Check => {
            let config = config::load_config(&cli.config)?;
            output::print_check_output(&config, &describe_config_source(&cli.config));
            println!("==> Config is valid");
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Structured logs on stderr; JSON when `LOG_FORMAT=json`.
fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::from_default_env().add_directive("imgfly=info".parse()?);

    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

fn log_startup(config: &Config) {
    info!("Source root: {}", config.source_root.display());
    info!("Cache dir: {}", config.cache_dir.display());
    info!(
        "Output: {} at quality {}, expires after {}s",
        config.output_format, config.quality, config.cache_expire
    );
    if config.enforce_presets {
        info!("Enforcing {} presets", config.presets.len());
    }
}

fn describe_config_source(path: &Path) -> String {
    if path.exists() {
        path.display().to_string()
    } else {
        format!("stock defaults ({} not found)", path.display())
    }
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores. The user can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
