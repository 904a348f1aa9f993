//! # inoc - sketch build orchestrator
//!
//! inoc turns a sketch (a folder of `.ino` tabs plus helper sources) into a
//! firmware image. Board settings come from the installed hardware
//! definitions (`boards.txt`, `platform.txt`); every tool invocation is a
//! recipe expanded from those settings.
//!
//! ## Quick Start
//!
//! ```bash
//! # List installed boards
//! inoc boards
//!
//! # Build the sketch in the current folder
//! inoc build --fqbn arduino:avr:uno
//! ```
//!
//! ## Module Organization
//!
//! - [`build`] - The pipeline and its components
//! - [`resolver`] - Layered board configuration
//! - [`recipe`] - Command template expansion
//! - [`hardware`] - Installed packages, platforms and boards

/// Build pipeline, compile cache, process runner, diagnostics.
pub mod build;

/// CLI command handlers.
pub mod commands;

/// Configuration file parsing (`inoc.toml`, `settings.toml`).
pub mod config;

/// Build error taxonomy.
pub mod error;

/// Hardware catalog loaded from `boards.txt` / `platform.txt`.
pub mod hardware;

/// Library discovery and header lookup.
pub mod library;

/// Host operating system capabilities.
pub mod platform;

/// Dotted-key preference maps.
pub mod prefs;

/// `{key}` template expansion.
pub mod recipe;

/// Merges the configuration layers for one board.
pub mod resolver;

/// Sketch folders and their tabs.
pub mod sketch;

/// Terminal UI (progress, tables).
pub mod ui;
