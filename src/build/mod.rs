//! The build engine.
//!
//! [`pipeline::build`] is the entry point; everything else in here is a
//! component it drives. [`build_sketch`] wraps it for the command line.

pub mod clean;
pub mod context;
pub mod depfile;
pub mod diagnostics;
pub mod feedback;
pub mod observer;
pub mod pipeline;
pub mod preprocess;
pub mod runner;
pub mod size;
mod watcher;

use anyhow::Result;
use colored::*;
use std::time::Instant;

pub use clean::clean;
pub use context::{BuildContext, BuildOptions};
pub use diagnostics::CompileDiagnostic;
pub use observer::{BuildEvent, BuildObserver, CancelToken, NullObserver, RecordingObserver};
pub use pipeline::{BuildOutcome, BuildSummary, Pipeline, Stage};
pub use watcher::watch;

use crate::error::BuildError;
use crate::library::LibraryResolver;
use crate::ui::ConsoleObserver;

/// Build once and print the outcome. Returns whether the build succeeded.
pub fn build_sketch(ctx: &BuildContext, libraries: &dyn LibraryResolver) -> Result<bool> {
    let start_time = Instant::now();
    let observer = ConsoleObserver::new();
    let outcome = pipeline::build(ctx, libraries, &observer, CancelToken::new());
    observer.finish();

    match outcome {
        BuildOutcome::Done(summary) => {
            println!(
                "{} Built {} ({} objects) in {:.2?}",
                "✓".green(),
                ctx.sketch.name().bold(),
                summary.objects.len(),
                start_time.elapsed()
            );
            Ok(true)
        }
        BuildOutcome::Failed { stage, error } => {
            println!("{} {:?} failed: {}", "x".red(), stage, error);
            if let BuildError::CompileDiagnostic(d) = &error
                && let Some(tab) = &d.tab
            {
                println!("  {} in tab {}", "→".cyan(), tab.bold());
            }
            Ok(false)
        }
        BuildOutcome::Cancelled { before } => {
            println!("{} Build cancelled before {:?}", "!".yellow(), before);
            Ok(false)
        }
    }
}
