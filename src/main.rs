//! # inoc CLI Entry Point
//!
//! Parses arguments with clap and routes commands to the engine.
//!
//! - **Build**: `build`, `watch`, `clean`
//! - **Inspect**: `boards`, `prefs`
//! - **Misc**: `open`, `completion`

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use colored::*;
use std::path::PathBuf;

use inoc::build::{self, BuildOptions};
use inoc::commands::{self, Session};

#[derive(Parser)]
#[command(name = "inoc")]
#[command(about = "Build sketches for microcontroller boards", version = env!("CARGO_PKG_VERSION"))]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone)]
struct BuildArgs {
    /// Sketch folder
    #[arg(default_value = ".")]
    sketch: PathBuf,
    /// Board as package:arch:board[:menu=option,...]
    #[arg(long)]
    fqbn: Option<String>,
    /// Show tool command lines and unmodified output
    #[arg(short, long)]
    verbose: bool,
    /// Compile units of a stage in parallel
    #[arg(short = 'j', long)]
    parallel: bool,
    /// Copy the final image next to the sketch
    #[arg(long)]
    export: bool,
    /// Compiler warnings: none, default, more, all
    #[arg(long)]
    warnings: Option<String>,
}

impl BuildArgs {
    fn options(&self, session: &Session) -> BuildOptions {
        let mut options = BuildOptions::from(&session.config.build);
        options.verbose |= self.verbose;
        options.parallel |= self.parallel;
        options.export |= self.export;
        if let Some(level) = &self.warnings {
            options.warning_level = level.clone();
        }
        options
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compile the sketch
    Build(BuildArgs),
    /// Rebuild whenever the sketch changes
    Watch(BuildArgs),
    /// Remove the sketch's build folder
    Clean {
        #[arg(default_value = ".")]
        sketch: PathBuf,
    },
    /// List installed boards
    Boards {
        /// Only boards whose FQBN or name contains this
        filter: Option<String>,
        /// Sketch folder whose configuration to use
        #[arg(long, default_value = ".")]
        sketch: PathBuf,
    },
    /// Print the resolved build preferences
    Prefs {
        #[arg(default_value = ".")]
        sketch: PathBuf,
        #[arg(long)]
        fqbn: Option<String>,
        /// Only keys starting with this
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Open the sketch or its build folder in the file manager
    Open {
        #[arg(default_value = ".")]
        sketch: PathBuf,
        /// Open the build folder instead
        #[arg(long)]
        build: bool,
    },
    /// Generate shell completion scripts
    Completion { shell: Shell },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build(args) => {
            let session = Session::open(&args.sketch)?;
            let (ctx, libraries) = session.context(args.fqbn.as_deref(), args.options(&session))?;
            if !build::build_sketch(&ctx, &libraries)? {
                std::process::exit(1);
            }
            Ok(())
        }

        Commands::Watch(args) => {
            let session = Session::open(&args.sketch)?;
            let folder = session.sketch_folder.clone();
            build::watch(&folder, || {
                // tabs and inoc.toml may have changed
                let session = Session::open(&folder)?;
                let (ctx, libraries) =
                    session.context(args.fqbn.as_deref(), args.options(&session))?;
                build::build_sketch(&ctx, &libraries)
            })
        }

        Commands::Clean { sketch } => {
            let session = Session::open(sketch)?;
            build::clean(&session.build_path())
        }

        Commands::Boards { filter, sketch } => {
            let session = Session::open(sketch)?;
            commands::boards::list_boards(&session.catalog, filter.as_deref());
            Ok(())
        }

        Commands::Prefs {
            sketch,
            fqbn,
            prefix,
        } => {
            let session = Session::open(sketch)?;
            let (ctx, _) = session.context(fqbn.as_deref(), BuildOptions::from(&session.config.build))?;
            for line in commands::prefs::render(&ctx.prefs, prefix.as_deref()) {
                println!("{line}");
            }
            Ok(())
        }

        Commands::Open { sketch, build } => {
            let session = Session::open(sketch)?;
            let folder = if *build {
                session.build_path()
            } else {
                session.sketch_folder.clone()
            };
            session.host.open_folder(&folder)?;
            println!("{} Opened {}", "✓".green(), folder.display());
            Ok(())
        }

        Commands::Completion { shell } => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            generate(*shell, &mut cmd, bin_name, &mut std::io::stdout());
            Ok(())
        }
    }
}
