use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opendesk::api::AppState;
use opendesk::client::OpenDeskClient;
use opendesk::config::{home_scripts_dir, ServerConfig, DEFAULT_PORT};
use opendesk::gateway::Gateway;
use opendesk::models::script_file_name;
use opendesk::registry::Registry;
use opendesk::server::Server;

#[derive(Parser)]
#[command(name = "opendesk")]
#[command(about = "Run the scripts in a directory as tasks over HTTP")]
struct Cli {
    /// Scripts directory (default: `scripts/` next to the executable)
    #[arg(long, global = true)]
    scripts_dir: Option<PathBuf>,

    /// Use `~/.opendesk/scripts` as the scripts directory
    #[arg(long, global = true, conflicts_with = "scripts_dir")]
    home: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the task server
    Serve {
        /// Port for HTTP API
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,
    },
    /// List registered scripts
    List,
    /// Print the content of a script
    Show {
        /// Script filename, e.g. `mute.ts`
        file: String,
    },
    /// Create a new script from a file or stdin
    New {
        /// Task name; the extension is added
        name: String,

        /// Id for the new script (default: highest id + 1)
        #[arg(long)]
        id: Option<u32>,

        /// Script extension
        #[arg(long, default_value = "ts", value_parser = ["ts", "js"])]
        ext: String,

        /// Read content from this file instead of stdin
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Replace a script's content, optionally moving it to a new id
    Edit {
        id: u32,

        #[arg(long)]
        new_id: Option<u32>,

        /// Read content from this file instead of stdin
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Delete a script and its manifest entry
    Rm { id: u32 },
    /// Talk to a running server
    Remote {
        #[arg(long, default_value = "localhost")]
        host: String,

        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        #[command(subcommand)]
        action: RemoteAction,
    },
}

#[derive(Subcommand)]
enum RemoteAction {
    /// List task names
    List,
    /// Run a task and print its output
    Run { name: String },
}

/// Initialize tracing. The server logs to stdout; other commands log to
/// stderr so their output can be piped.
fn init_tracing(use_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "opendesk=debug,tower_http=debug".into()),
    );

    if use_stderr {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let serving = matches!(cli.command, None | Some(Commands::Serve { .. }));
    init_tracing(!serving);

    let mut config = ServerConfig::from_env();
    if cli.home {
        config.scripts_dir = home_scripts_dir().context("Could not determine home directory")?;
    } else if let Some(dir) = cli.scripts_dir {
        config.scripts_dir = dir;
    }

    match cli.command.unwrap_or(Commands::Serve {
        port: None,
        host: None,
    }) {
        Commands::Serve { port, host } => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(host) = host {
                config.host = host;
            }
            serve(config).await?;
        }
        Commands::List => {
            let registry = open_registry(&config)?;
            let mut scripts = registry.list()?;
            scripts.sort_by_key(|s| s.id);
            for script in scripts {
                println!("{:>4}  {:<24}  {}", script.id, script.display_name(), script.file);
            }
        }
        Commands::Show { file } => {
            let registry = open_registry(&config)?;
            print!("{}", registry.read(&file)?);
        }
        Commands::New {
            name,
            id,
            ext,
            file,
        } => {
            let registry = open_registry(&config)?;
            let Some(filename) = script_file_name(&name, &ext) else {
                bail!("Invalid task name: {name:?}");
            };
            let id = match id {
                Some(id) => id,
                None => registry
                    .max_id()?
                    .checked_add(1)
                    .context("No script ids left; pass --id explicitly")?,
            };
            let content = read_content(file)?;
            let script = registry.create(id, &filename, &content)?;
            println!("Created {} ({})", script.file, script.id);
        }
        Commands::Edit { id, new_id, file } => {
            let registry = open_registry(&config)?;
            let Some(existing) = registry.list()?.into_iter().find(|s| s.id == id) else {
                bail!("No script with id {id}");
            };
            let content = read_content(file)?;
            registry.update(&existing, new_id.unwrap_or(id), &content)?;
            println!("Updated {}", existing.file);
        }
        Commands::Rm { id } => {
            let registry = open_registry(&config)?;
            match registry.delete(id)? {
                Some(script) => println!("Deleted {} ({})", script.file, script.id),
                None => bail!("No script with id {id}"),
            }
        }
        Commands::Remote { host, port, action } => {
            let client = match std::env::var("OPENDESK_URL") {
                Ok(_) => OpenDeskClient::from_env(),
                Err(_) => OpenDeskClient::for_host(&host, port),
            };
            match action {
                RemoteAction::List => {
                    for name in client.list_scripts().await? {
                        println!("{name}");
                    }
                }
                RemoteAction::Run { name } => {
                    println!("{}", client.run_script(&name).await?);
                }
            }
        }
    }

    Ok(())
}

fn open_registry(config: &ServerConfig) -> anyhow::Result<Registry> {
    Registry::open(&config.scripts_dir).with_context(|| {
        format!(
            "Failed to open scripts directory {}",
            config.scripts_dir.display()
        )
    })
}

fn read_content(file: Option<PathBuf>) -> anyhow::Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut content = String::new();
            std::io::stdin()
                .read_to_string(&mut content)
                .context("Failed to read script from stdin")?;
            Ok(content)
        }
    }
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    tracing::info!(
        host = %config.host,
        port = config.port,
        scripts_dir = %config.scripts_dir.display(),
        interpreter = %config.exec.program,
        "Starting OpenDesk server"
    );

    let registry = open_registry(&config)?;
    // An unreadable directory is reported per request rather than aborting startup.
    match registry.list() {
        Ok(scripts) => tracing::info!(count = scripts.len(), "Loaded scripts"),
        Err(e) => tracing::warn!("Initial script scan failed: {}", e),
    }

    let gateway = Gateway::new(registry.dir(), config.exec.clone());
    let server = Server::new(AppState::new(registry, gateway), config.host.clone());

    server.start(config.port).wait().await?;

    shutdown_signal().await;
    server.shutdown().await;
    tracing::info!("Graceful shutdown complete");

    Ok(())
}

/// Wait for Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
