use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dockwright::schematic::SchematicFile;
use dockwright::shell::CommandOutput;
use dockwright::{ConfigDiscovery, DockwrightConfig, DockwrightError, Workbench};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "dockwright")]
#[command(author = "Dockwright Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build images from schematics and run scripts in containers")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
struct Args {
    /// Configuration file path (defaults to discovery)
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,
    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the Dockerfile a schematic resolves to
    Preview {
        /// Schematic file
        schematic: PathBuf,
    },
    /// Build the image of a schematic
    Build {
        /// Schematic file
        schematic: PathBuf,
        /// Image tag (defaults to the schematic's tag or `<image_repo>/<name>`)
        #[arg(short = 't', long = "tag")]
        tag: Option<String>,
        /// Push the image after building
        #[arg(long = "push")]
        push: bool,
    },
    /// Run a script in a fresh container
    Run {
        /// Schematic file
        schematic: PathBuf,
        /// Script text
        script: String,
        /// Skip the schematic's init scripts
        #[arg(long = "no-init")]
        no_init: bool,
    },
    /// Run a script in a named persistent container
    Exec {
        /// Schematic file
        schematic: PathBuf,
        /// Container name
        name: String,
        /// Script text
        script: String,
    },
    /// Copy a file into a persistent container
    Upload {
        schematic: PathBuf,
        name: String,
        local: PathBuf,
        remote: PathBuf,
    },
    /// Copy a file out of a persistent container
    Download {
        schematic: PathBuf,
        name: String,
        remote: PathBuf,
        local: PathBuf,
    },
    /// Stop a persistent container
    Stop {
        schematic: PathBuf,
        name: String,
    },
    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter = if args.verbose {
        "dockwright=debug"
    } else {
        "dockwright=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(()) => {}
        Err(e) => {
            // A failing script exits with its own code.
            if let Some(DockwrightError::CommandFailure {
                exit_code, stdout, stderr, ..
            }) = e.downcast_ref::<DockwrightError>()
            {
                print!("{}", stdout);
                eprint!("{}", stderr);
                error!("{}", e);
                std::process::exit(*exit_code);
            }
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<DockwrightConfig> {
    match path {
        Some(path) => {
            info!("Loading configuration override from: {:?}", path);
            DockwrightConfig::from_toml_file(path)
                .with_context(|| format!("failed to load configuration {}", path.display()))
        }
        None => Ok(ConfigDiscovery::discover_config()?),
    }
}

fn check_tools(config: &DockwrightConfig) {
    let mut tools = vec!["docker", "rsync"];
    if config.docker.host.is_some() {
        tools.extend(["ssh", "scp"]);
    }
    for tool in tools {
        if which::which(tool).is_err() {
            warn!("`{}` was not found on PATH", tool);
        }
    }
}

fn print_output(output: &CommandOutput) {
    print!("{}", output.stdout);
    eprint!("{}", output.stderr);
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(args.config.as_deref())?;

    let schematic_path = match &args.command {
        Commands::ShowConfig => {
            if let Some(path) = ConfigDiscovery::find_config_file() {
                println!("# {}", path.display());
            }
            print!("{}", config.to_toml_string());
            return Ok(());
        }
        Commands::Preview { schematic }
        | Commands::Build { schematic, .. }
        | Commands::Run { schematic, .. }
        | Commands::Exec { schematic, .. }
        | Commands::Upload { schematic, .. }
        | Commands::Download { schematic, .. }
        | Commands::Stop { schematic, .. } => schematic.clone(),
    };

    check_tools(&config);
    let (schematic, storage, file_tag) = SchematicFile::load(&schematic_path)
        .with_context(|| format!("failed to load schematic {}", schematic_path.display()))?;
    let bench = Workbench::from_config(&config, Arc::new(storage));

    match args.command {
        Commands::Preview { .. } => {
            let env = bench.docker_env(&schematic, file_tag);
            print!("{}", env.preview().await?);
        }
        Commands::Build { tag, push, .. } => {
            let env = bench.docker_env(&schematic, tag.or(file_tag));
            let built = if push {
                bench.images().build_and_push(env.recipe(), env.tag()).await?
            } else {
                bench.images().build(env.recipe(), env.tag()).await?
            };
            println!("{}", built);
        }
        Commands::Run {
            script, no_init, ..
        } => {
            let env = bench.docker_env(&schematic, file_tag);
            let output = if no_init {
                env.run_script_without_init(&script).await?
            } else {
                env.run_script(&script).await?
            };
            print_output(&output);
        }
        Commands::Exec { name, script, .. } => {
            let container = bench.persistent(&schematic, &name, file_tag);
            print_output(&container.run(&script).await?);
        }
        Commands::Upload {
            name,
            local,
            remote,
            ..
        } => {
            let container = bench.persistent(&schematic, &name, file_tag);
            container.upload(&local, &remote).await?;
        }
        Commands::Download {
            name,
            remote,
            local,
            ..
        } => {
            let container = bench.persistent(&schematic, &name, file_tag);
            container.download(&remote, &local).await?;
        }
        Commands::Stop { name, .. } => {
            let container = bench.persistent(&schematic, &name, file_tag);
            container.stop().await?;
        }
        Commands::ShowConfig => {}
    }
    Ok(())
}
