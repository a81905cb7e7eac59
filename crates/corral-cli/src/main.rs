mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_FAILURE, EXIT_INPUT_ERROR, EXIT_SCHEMA_ERROR};
use corral_core::{install_signal_handler, CorralConfig};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "corral",
    version,
    about = "Container model sync and self-healing reconciliation over a flat-config engine"
)]
struct Cli {
    /// Path to a corral.toml configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Derive the engine object name of a container.
    Id {
        /// Container name.
        #[arg(long)]
        container: String,
        /// Sandbox name.
        #[arg(long)]
        sandbox: String,
        /// Sandbox namespace.
        #[arg(long)]
        namespace: String,
        /// Sandbox attempt.
        #[arg(long, default_value_t = 0)]
        attempt: u32,
        /// Sandbox uid.
        #[arg(long)]
        uid: String,
        /// Owner tag (overrides the configured one).
        #[arg(long)]
        owner: Option<String>,
    },
    /// Derive a logical state from an engine status code and state marker.
    State {
        /// Engine status code, e.g. 102 for stopped.
        #[arg(long)]
        status: u16,
        /// Value of the state marker, if the record carries one.
        #[arg(long)]
        marker: Option<String>,
    },
    /// Encode a container JSON document into an engine record.
    Encode {
        /// Path to the container JSON file.
        container: PathBuf,
    },
    /// Decode an engine record JSON document.
    Decode {
        /// Path to the record JSON file.
        record: PathBuf,
        /// Engine object name. Defaults to the file stem.
        #[arg(long)]
        id: Option<String>,
    },
    /// List the config keys and prefixes Corral reserves.
    Keys,
    /// Print the effective configuration.
    Config,
    /// Replay a scenario against an in-memory engine and report its writes.
    Replay {
        /// Path to the scenario JSON file.
        scenario: PathBuf,
        /// How long to let background repairs run after the last event.
        #[arg(long, default_value_t = 500)]
        settle_ms: u64,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("CORRAL_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let config = match CorralConfig::load_or_default(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_INPUT_ERROR);
        }
    };
    let json_output = cli.json;

    let result = match cli.command {
        Commands::Id {
            container,
            sandbox,
            namespace,
            attempt,
            uid,
            owner,
        } => commands::id::run(
            owner.as_deref().unwrap_or(&config.identity.owner_tag),
            &container,
            &sandbox,
            &namespace,
            attempt,
            &uid,
            json_output,
        ),
        Commands::State { status, marker } => {
            commands::state::run(status, marker.as_deref(), json_output)
        }
        Commands::Encode { container } => commands::encode::run(&container, json_output),
        Commands::Decode { record, id } => commands::decode::run(&record, id.as_deref(), json_output),
        Commands::Keys => commands::keys::run(json_output),
        Commands::Config => commands::config::run(&config, json_output),
        Commands::Replay {
            scenario,
            settle_ms,
        } => {
            install_signal_handler();
            commands::replay::run(&config, &scenario, settle_ms, json_output)
        }
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("schema error:") {
                EXIT_SCHEMA_ERROR
            } else if msg.starts_with("failed to read")
                || msg.starts_with("failed to parse")
                || msg.starts_with("invalid input")
            {
                EXIT_INPUT_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
