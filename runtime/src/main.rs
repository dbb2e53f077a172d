use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use harvest_runtime::cli::{cia_cmd, doctor, fbi_cmd, fred_cmd, mail_cmd, state_cmd};
use harvest_runtime::config::Config;

#[derive(Parser, Debug)]
#[command(name = "harvest", version, about = "Public-records harvesters and mail-archive tools")]
struct Cli {
    /// Machine-readable JSON output (and JSON logs)
    #[arg(long, global = true)]
    json: bool,
    /// Only print errors
    #[arg(long, short, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Debug logging
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
    /// State directory (default: $HARVEST_HOME or ~/.harvest)
    #[arg(long, global = true)]
    home: Option<PathBuf>,
    /// Directory relative paths resolve against (default: current directory)
    #[arg(long, global = true)]
    workdir: Option<PathBuf>,
    /// Output directory of the scraper jobs (default: <workdir>/output)
    #[arg(long, global = true)]
    output: Option<PathBuf>,
    /// Fetch pages with headless Chromium
    #[arg(long, global = true)]
    browser: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// CIA reading room search results and document pages
    Cia {
        #[command(subcommand)]
        command: cia_cmd::CiaCommand,
    },
    /// FBI Vault PDFs and their OCR text
    Fbi {
        #[command(subcommand)]
        command: fbi_cmd::FbiCommand,
    },
    /// State Department living quarters allowances
    State {
        #[command(subcommand)]
        command: state_cmd::StateCommand,
    },
    /// FRED economic series
    Fred(fred_cmd::FredArgs),
    /// Mail archive: export, consolidate, repair, compress, metadata, search
    Mail {
        #[command(subcommand)]
        command: mail_cmd::MailCommand,
    },
    /// Check external tools and the environment
    Doctor,
    /// Print a shell completion script
    Completions { shell: Shell },
}

fn init_tracing(cli: &Cli) {
    let default = if cli.verbose {
        "harvest_runtime=debug"
    } else if cli.quiet {
        "harvest_runtime=error"
    } else {
        "harvest_runtime=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if cli.json {
        builder.json().init();
    } else {
        builder.with_ansi(!cli.no_color && std::env::var_os("NO_COLOR").is_none()).init();
    }
}

/// `cli::output` reads these.
fn export_output_flags(cli: &Cli) {
    for (set, var) in [
        (cli.quiet, "HARVEST_QUIET"),
        (cli.verbose, "HARVEST_VERBOSE"),
        (cli.json, "HARVEST_JSON"),
        (cli.no_color, "HARVEST_NO_COLOR"),
    ] {
        if set {
            std::env::set_var(var, "1");
        }
    }
    if cli.no_color {
        std::env::set_var("NO_COLOR", "1");
    }
}

fn build_config(cli: &Cli) -> Config {
    let mut config = Config::from_env();
    if let Some(home) = &cli.home {
        config = config.with_home(home);
    }
    if let Some(dir) = &cli.workdir {
        config = config.with_work_dir(dir);
    }
    if let Some(dir) = &cli.output {
        config.output = Some(dir.clone());
    }
    config.use_browser |= cli.browser;
    config
}

async fn dispatch(config: &Config, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Cia { command } => cia_cmd::run(config, command).await,
        Commands::Fbi { command } => fbi_cmd::run(config, command).await,
        Commands::State { command } => state_cmd::run(config, command).await,
        Commands::Fred(args) => fred_cmd::run(config, args).await,
        Commands::Mail { command } => mail_cmd::run(config, command).await,
        Commands::Doctor => doctor::run(config).await,
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "harvest", &mut std::io::stdout());
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    export_output_flags(&cli);
    init_tracing(&cli);
    let config = build_config(&cli);

    if let Err(e) = dispatch(&config, cli.command).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
