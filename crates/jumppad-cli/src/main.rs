mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{up::UpArgs, Context};
use jumppad_core::config::default_home;
use jumppad_core::{install_signal_handler, ApplyOptions, CancellationToken, DestroyOptions};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "jumppad",
    version,
    about = "Declarative orchestrator for local development environments"
)]
struct Cli {
    /// Jumppad home directory [default: $JUMPPAD_HOME or ~/.jumppad].
    #[arg(long, global = true)]
    home: Option<PathBuf>,

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
    /// Create or update the resources of a blueprint.
    #[command(visible_alias = "apply")]
    Up {
        /// Blueprint file or directory.
        #[arg(default_value = ".")]
        path: PathBuf,
        /// Set a variable (repeatable).
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
        /// TOML file of variable values.
        #[arg(long)]
        vars_file: Option<PathBuf>,
        /// Maximum number of resources worked on at once.
        #[arg(long)]
        parallelism: Option<usize>,
        /// Re-pull images and re-create resources that are already applied.
        #[arg(long, default_value_t = false)]
        force_update: bool,
        /// Keep resources that are in state but no longer declared.
        #[arg(long, default_value_t = false)]
        no_destroy_orphans: bool,
    },
    /// Destroy every resource in state.
    #[command(visible_alias = "destroy")]
    Down {
        /// Log provider errors and carry on.
        #[arg(long, default_value_t = false)]
        force: bool,
        /// Stop at the first failure.
        #[arg(long, default_value_t = false)]
        strict: bool,
        /// Maximum number of resources worked on at once.
        #[arg(long)]
        parallelism: Option<usize>,
    },
    /// Bring applied resources whose external state drifted back in line.
    Refresh,
    /// List the resources in state.
    Status,
    /// Show what `up` would change.
    Diff {
        /// Blueprint file or directory.
        #[arg(default_value = ".")]
        path: PathBuf,
        /// Set a variable (repeatable).
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
        /// TOML file of variable values.
        #[arg(long)]
        vars_file: Option<PathBuf>,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
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
            tracing_subscriber::EnvFilter::try_from_env("JUMPPAD_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let ctx = Context {
        home: cli.home.unwrap_or_else(default_home),
        json: cli.json,
        cancel: install_signal_handler(&CancellationToken::new()),
    };

    let result = match cli.command {
        Commands::Up {
            path,
            vars,
            vars_file,
            parallelism,
            force_update,
            no_destroy_orphans,
        } => commands::up::run(
            &ctx,
            &UpArgs {
                path: &path,
                vars: &vars,
                vars_file,
                parallelism,
                force_update,
                no_destroy_orphans,
            },
        ),
        Commands::Down {
            force,
            strict,
            parallelism,
        } => commands::down::run(
            &ctx,
            DestroyOptions {
                force,
                strict,
                parallelism,
            },
        ),
        Commands::Refresh => commands::refresh::run(&ctx),
        Commands::Status => commands::status::run(&ctx),
        Commands::Diff {
            path,
            vars,
            vars_file,
        } => commands::up::options(&UpArgs {
            path: &path,
            vars: &vars,
            vars_file,
            parallelism: None,
            force_update: false,
            no_destroy_orphans: false,
        })
        .and_then(|options: ApplyOptions| commands::diff::run(&ctx, &path, &options)),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(failure) => {
            eprintln!("error: {}", failure.message);
            ExitCode::from(failure.code)
        }
    }
}
