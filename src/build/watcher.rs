use anyhow::Result;
use colored::*;
use notify::{Config, Event, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::mpsc::channel;
use std::time::Duration;

use crate::config::CONFIG_FILE;
use crate::sketch::{OTHER_EXTENSIONS, SKETCH_EXTENSIONS};

/// Rebuild whenever a tab or `inoc.toml` in `sketch_folder` changes.
pub fn watch<F>(sketch_folder: &Path, mut rebuild: F) -> Result<()>
where
    F: FnMut() -> Result<bool>,
{
    println!(
        "{} Watching for changes in {}...",
        "👀".cyan(),
        sketch_folder.display()
    );

    let (tx, rx) = channel::<notify::Result<Event>>();
    let config_notify = Config::default().with_poll_interval(Duration::from_secs(1));
    let mut watcher = notify::RecommendedWatcher::new(tx, config_notify)?;
    watcher.watch(sketch_folder, RecursiveMode::NonRecursive)?;

    // First run
    run_and_clear(&mut rebuild);

    while let Ok(event) = rx.recv() {
        if !event.as_ref().is_ok_and(is_relevant) {
            continue;
        }
        // Debounce simple
        std::thread::sleep(Duration::from_millis(100));
        while rx.try_recv().is_ok() {}
        run_and_clear(&mut rebuild);
    }
    Ok(())
}

fn is_relevant(event: &Event) -> bool {
    event.paths.iter().any(|p| is_watched_file(p))
}

fn is_watched_file(path: &Path) -> bool {
    if path.file_name().is_some_and(|n| n == CONFIG_FILE) {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SKETCH_EXTENSIONS.contains(&e) || OTHER_EXTENSIONS.contains(&e))
}

fn run_and_clear<F>(rebuild: &mut F)
where
    F: FnMut() -> Result<bool>,
{
    print!("\x1B[2J\x1B[1;1H");
    println!("{} Sketch changed. Rebuilding...", "🔄".yellow());

    if let Err(e) = rebuild() {
        println!("{} Error: {}", "x".red(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_sketch_files_trigger() {
        assert!(is_watched_file(Path::new("/s/Blink/Blink.ino")));
        assert!(is_watched_file(Path::new("/s/Blink/helpers.cpp")));
        assert!(is_watched_file(Path::new("/s/Blink/inoc.toml")));
        assert!(!is_watched_file(Path::new("/s/Blink/Blink.ino.swp")));
        assert!(!is_watched_file(Path::new("/s/Blink/notes.txt")));
    }
}
