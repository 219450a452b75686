use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "railctl", version, about = "Run your project locally with its remote environment")]
struct Cli {
    /// Show debug logs (RUST_LOG takes precedence). Must come before the subcommand.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command, or the project's Dockerfile, with the environment's variables
    #[command(disable_help_flag = true)]
    Run {
        /// [--environment=<name>] [--service=<name>] [--ephemeral] [command [args...]]
        #[arg(
            value_name = "ARGS",
            num_args = 0..,
            trailing_var_arg = true,
            allow_hyphen_values = true
        )]
        args: Vec<String>,
    },
    /// Print version and exit
    Version,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.cmd {
        Commands::Run { args } => match commands::run::run(args).await {
            Ok(code) => std::process::exit(code),
            Err(e) => {
                // Error messages already carry their causes.
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
        }
    }
    Ok(())
}
