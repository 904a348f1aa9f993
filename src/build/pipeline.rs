//! The build pipeline.
//!
//! ```text
//! preprocess -> compile sketch -> compile libraries -> compile core
//!            -> archive core -> link -> post-process -> [export] -> size check
//! ```
//!
//! The first failing stage ends the run; whatever it already wrote stays in
//! the build folder. Cancellation is honoured between stages only.

use rayon::prelude::*;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use walkdir::WalkDir;

use super::clean;
use super::context::BuildContext;
use super::depfile;
use super::diagnostics::DiagnosticRemapper;
use super::feedback::FeedbackAnalyzer;
use super::observer::{BuildObserver, CancelToken};
use super::preprocess::preprocess;
use super::runner::ProcessRunner;
use super::size::{self, SizeLimits, SizeReport};
use crate::error::{BuildError, IoContext, Result};
use crate::library::{Library, LibraryResolver};
use crate::prefs::PreferencesMap;
use crate::recipe;
use crate::resolver::IDE_VERSION;
use crate::sketch::is_hidden_or_scm;

pub const CORE_ARCHIVE: &str = "core.a";
pub const COMPILE_COMMANDS: &str = "compile_commands.json";

/// An `ar` archive with no members.
const EMPTY_ARCHIVE: &[u8] = b"!<arch>\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Preprocess,
    CompileSketch,
    CompileLibraries,
    CompileCore,
    ArchiveCore,
    Link,
    PostProcess,
    Export,
    SizeCheck,
}

impl Stage {
    /// Progress reported when the stage starts.
    pub fn progress(self) -> Option<(u8, &'static str)> {
        match self {
            Stage::Preprocess | Stage::ArchiveCore => None,
            Stage::CompileSketch => Some((20, "Compiling sketch...")),
            Stage::CompileLibraries => Some((30, "Compiling libraries...")),
            Stage::CompileCore => Some((40, "Compiling core...")),
            Stage::Link => Some((50, "Linking everything together...")),
            Stage::PostProcess => Some((60, "Post-processing...")),
            Stage::Export => Some((80, "Exporting compiled binary...")),
            Stage::SizeCheck => Some((90, "Checking size...")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildSummary {
    /// Objects handed to the linker.
    pub objects: Vec<PathBuf>,
    pub libraries: Vec<Library>,
    pub size: Option<SizeReport>,
    /// True when a preference change forced a full rebuild.
    pub full_rebuild: bool,
}

#[derive(Debug)]
pub enum BuildOutcome {
    Done(BuildSummary),
    Failed { stage: Stage, error: BuildError },
    Cancelled { before: Stage },
}

impl BuildOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, BuildOutcome::Done(_))
    }
}

enum Abort {
    Failed(BuildError),
    Cancelled,
}

impl From<BuildError> for Abort {
    fn from(e: BuildError) -> Self {
        Abort::Failed(e)
    }
}

struct Unit {
    source: PathBuf,
    object: PathBuf,
    dep_file: PathBuf,
    recipe: &'static str,
}

pub struct Pipeline<'a> {
    ctx: &'a BuildContext,
    libraries: &'a dyn LibraryResolver,
    observer: &'a dyn BuildObserver,
    cancel: CancelToken,
    runner: ProcessRunner,
    remapper: Mutex<DiagnosticRemapper>,
    compile_db: Mutex<Vec<serde_json::Value>>,
    stage: Stage,
    objects: Vec<PathBuf>,
    imported: Vec<Library>,
    duplicates: Vec<(String, Vec<Library>)>,
}

/// Run a full build of `ctx`.
pub fn build(
    ctx: &BuildContext,
    libraries: &dyn LibraryResolver,
    observer: &dyn BuildObserver,
    cancel: CancelToken,
) -> BuildOutcome {
    Pipeline::new(ctx, libraries, observer).with_cancel(cancel).run()
}

impl<'a> Pipeline<'a> {
    pub fn new(
        ctx: &'a BuildContext,
        libraries: &'a dyn LibraryResolver,
        observer: &'a dyn BuildObserver,
    ) -> Self {
        Self {
            ctx,
            libraries,
            observer,
            cancel: CancelToken::new(),
            runner: ProcessRunner::new(ctx.options.line_timeout),
            remapper: Mutex::new(DiagnosticRemapper::new(&ctx.build_path, ctx.options.verbose)),
            compile_db: Mutex::new(Vec::new()),
            stage: Stage::Preprocess,
            objects: Vec::new(),
            imported: Vec::new(),
            duplicates: Vec::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run(mut self) -> BuildOutcome {
        let result = self.run_stages();
        self.write_compile_db();
        self.report_duplicates();

        match result {
            Ok(summary) => {
                self.observer.progress(100, "Done compiling.");
                BuildOutcome::Done(summary)
            }
            Err(Abort::Cancelled) => BuildOutcome::Cancelled { before: self.stage },
            Err(Abort::Failed(error)) => {
                if let BuildError::ToolExit { stderr_tail, .. } = &error
                    && let Some(advice) = FeedbackAnalyzer::analyze(&stderr_tail.join("\n"))
                {
                    self.observer.info(&advice);
                }
                BuildOutcome::Failed {
                    stage: self.stage,
                    error,
                }
            }
        }
    }

    fn run_stages(&mut self) -> std::result::Result<BuildSummary, Abort> {
        let ctx = self.ctx;
        let build_path = ctx.build_path.as_path();

        self.enter(Stage::Preprocess)?;
        let full_rebuild = self.prepare_build_folder()?;
        self.run_hooks("prebuild")?;
        let prelude = ctx.prefs.get_or("build.sketch_prelude", "");
        let source_map = preprocess(&ctx.sketch, build_path, prelude)?;
        self.remapper().set_source_map(source_map);
        self.resolve_libraries();

        self.enter(Stage::CompileSketch)?;
        self.check_architectures();
        self.run_hooks("sketch.prebuild")?;
        let includes = self.include_folders();
        let sketch_objects = self.compile_files(build_path, build_path, false, &includes)?;
        self.objects.extend(sketch_objects);
        self.run_hooks("sketch.postbuild")?;

        self.enter(Stage::CompileLibraries)?;
        self.run_hooks("libraries.prebuild")?;
        self.compile_libraries(&includes)?;
        self.run_hooks("libraries.postbuild")?;

        self.enter(Stage::CompileCore)?;
        self.run_hooks("core.prebuild")?;
        let core_objects = self.compile_core()?;

        self.enter(Stage::ArchiveCore)?;
        self.archive_core(&core_objects)?;
        self.run_hooks("core.postbuild")?;

        self.enter(Stage::Link)?;
        self.run_hooks("linking.prelink")?;
        self.link()?;
        self.run_hooks("linking.postlink")?;

        self.enter(Stage::PostProcess)?;
        self.run_hooks("objcopy.preobjcopy")?;
        self.objcopy()?;
        self.run_hooks("objcopy.postobjcopy")?;

        if ctx.options.export {
            self.enter(Stage::Export)?;
            self.run_hooks("savehex.presavehex")?;
            self.save_hex()?;
            self.run_hooks("savehex.postsavehex")?;
        }

        self.enter(Stage::SizeCheck)?;
        let size = self.size_check()?;
        self.run_hooks("postbuild")?;

        Ok(BuildSummary {
            objects: self.objects.clone(),
            libraries: self.imported.clone(),
            size,
            full_rebuild,
        })
    }

    fn enter(&mut self, stage: Stage) -> std::result::Result<(), Abort> {
        self.stage = stage;
        if self.cancel.is_cancelled() {
            return Err(Abort::Cancelled);
        }
        self.remapper().set_sketch_stage(stage == Stage::CompileSketch);
        if let Some((percent, message)) = stage.progress() {
            self.observer.progress(percent, message);
        }
        Ok(())
    }

    fn remapper(&self) -> MutexGuard<'_, DiagnosticRemapper> {
        self.remapper.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Helper: Build folder ---

    fn prepare_build_folder(&self) -> Result<bool> {
        let ctx = self.ctx;
        let fingerprint = clean::fingerprint(&ctx.prefs, &ctx.options.fingerprint_prefixes);
        let mut keep = vec![format!("{}.cpp", ctx.sketch.name())];
        keep.extend(
            ctx.sketch
                .codes()
                .iter()
                .filter(|c| !c.is_sketch_tab())
                .map(|c| c.file_name()),
        );
        let wiped = clean::prepare_build_folder(&ctx.build_path, &fingerprint, &keep)?;
        if wiped && ctx.options.verbose {
            self.observer
                .info("Build options changed, rebuilding all");
        }
        Ok(wiped)
    }

    // --- Helper: Libraries ---

    fn resolve_libraries(&mut self) {
        let sketch = &self.ctx.sketch;
        for header in sketch.includes() {
            if sketch.has_tab(&header) {
                continue;
            }
            let candidates = self.libraries.candidates(&header);
            let Some(chosen) = candidates.first() else {
                continue;
            };
            if !self.imported.iter().any(|l| l.folder == chosen.folder) {
                self.imported.push(chosen.clone());
            }
            if candidates.len() > 1 {
                self.duplicates.push((header, candidates));
            }
        }
    }

    fn check_architectures(&self) {
        let mut archs = vec![self.ctx.arch.clone()];
        archs.extend(
            self.ctx
                .prefs
                .get_or("architecture.override_check", "")
                .split(',')
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty()),
        );
        for lib in &self.imported {
            if !lib.supports_architecture(&archs) {
                self.observer.warn(&format!(
                    "WARNING: library {} claims to run on {} architecture(s) and may be incompatible with your current board which runs on {} architecture(s).",
                    lib.name,
                    lib.architectures.join(", "),
                    archs.join(", ")
                ));
            }
        }
    }

    fn report_duplicates(&self) {
        for (header, candidates) in &self.duplicates {
            let mut message = format!("Multiple libraries were found for \"{header}\"");
            for (i, lib) in candidates.iter().enumerate() {
                let label = if i == 0 { "Used" } else { "Not used" };
                message.push_str(&format!("\n {label}: {}", lib.folder.display()));
            }
            self.observer.info(&message);
        }
    }

    fn include_folders(&self) -> Vec<PathBuf> {
        let prefs = &self.ctx.prefs;
        let mut folders = Vec::new();
        if let Some(core) = prefs.get_path("build.core.path") {
            folders.push(core);
        }
        if let Some(variant) = prefs.get("build.variant.path").filter(|v| !v.is_empty()) {
            folders.push(PathBuf::from(variant));
        }
        folders.extend(self.imported.iter().map(|l| l.src_folder.clone()));
        folders
    }

    fn compile_libraries(&mut self, includes: &[PathBuf]) -> Result<()> {
        let ctx = self.ctx;
        let build_path = &ctx.build_path;
        for lib in self.imported.clone() {
            let out = build_path.join(&lib.name);
            if lib.use_recursion() {
                let objects = self.compile_files(&out, &lib.src_folder, true, includes)?;
                self.objects.extend(objects);
                continue;
            }

            // utility/ is visible only to the library that owns it
            let utility = lib.src_folder.join("utility");
            let mut lib_includes = includes.to_vec();
            lib_includes.push(utility.clone());
            let objects = self.compile_files(&out, &lib.src_folder, false, &lib_includes)?;
            self.objects.extend(objects);
            if utility.is_dir() {
                let objects =
                    self.compile_files(&out.join("utility"), &utility, false, &lib_includes)?;
                self.objects.extend(objects);
            }
        }
        Ok(())
    }

    // --- Helper: Core ---

    fn compile_core(&mut self) -> Result<Vec<PathBuf>> {
        let ctx = self.ctx;
        let prefs = &ctx.prefs;
        let build_path = &ctx.build_path;
        let core_folder = prefs
            .get_path("build.core.path")
            .filter(|p| p.is_dir())
            .ok_or_else(|| {
                BuildError::config(format!(
                    "Core folder {} does not exist",
                    prefs.get_or("build.core.path", "")
                ))
            })?;

        let mut includes = vec![core_folder.clone()];
        let variant = prefs
            .get("build.variant.path")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        if let Some(variant) = &variant {
            includes.push(variant.clone());
            // variant objects are linked directly
            let objects = self.compile_files(&build_path.join("variant"), variant, true, &includes)?;
            self.objects.extend(objects);
        }

        self.compile_files(&build_path.join("core"), &core_folder, true, &includes)
    }

    fn archive_core(&self, core_objects: &[PathBuf]) -> Result<()> {
        let archive = self.ctx.build_path.join(CORE_ARCHIVE);
        if core_objects.is_empty() {
            // the link recipe still names the archive
            return write_empty_archive(&archive);
        }
        if archive.exists() && !core_objects.iter().any(|o| is_newer(o, &archive)) {
            if self.ctx.options.verbose {
                self.observer.info(&format!(
                    "Using previously compiled file: {}",
                    archive.display()
                ));
            }
            return Ok(());
        }

        if archive.exists() {
            fs::remove_file(&archive).at(&archive)?;
        }
        for object in core_objects {
            let mut dict = self.base_dict();
            dict.put("archive_file", CORE_ARCHIVE);
            dict.put("archive_file_path", path_str(&archive));
            dict.put("object_file", path_str(object));
            let result = recipe::expand_key("recipe.ar.pattern", &dict).and_then(|argv| self.exec(&argv));
            if let Err(e) = result {
                let _ = fs::remove_file(&archive);
                return Err(e);
            }
        }
        Ok(())
    }

    // --- Helper: Link & post-process ---

    fn link(&self) -> Result<()> {
        let object_files: Vec<String> = self
            .objects
            .iter()
            .map(|o| format!("\"{}\"", o.display()))
            .collect();
        let mut dict = self.base_dict();
        dict.put("object_files", object_files.join(" "));
        dict.put("archive_file", CORE_ARCHIVE);
        dict.put(
            "archive_file_path",
            path_str(&self.ctx.build_path.join(CORE_ARCHIVE)),
        );
        let argv = recipe::expand_key("recipe.c.combine.pattern", &dict)?;
        self.exec(&argv)
    }

    fn objcopy(&self) -> Result<()> {
        let keys: Vec<String> = self
            .ctx
            .prefs
            .keys_with_prefix("recipe.objcopy.")
            .filter(|k| k.ends_with(".pattern"))
            .map(str::to_string)
            .collect();
        for key in keys {
            self.run_recipe(&key)?;
        }
        Ok(())
    }

    fn save_hex(&self) -> Result<()> {
        let prefs = &self.ctx.prefs;
        let (Some(tmp_file), Some(save_file)) = (
            prefs.get("recipe.output.tmp_file"),
            prefs.get("recipe.output.save_file"),
        ) else {
            self.observer.warn("Warning: This core does not support exporting sketches. Please consider upgrading it or contacting its author");
            return Ok(());
        };
        let source = self
            .ctx
            .build_path
            .join(recipe::replace_from_mapping(tmp_file, prefs)?);
        let target = self
            .ctx
            .sketch
            .folder()
            .join(recipe::replace_from_mapping(save_file, prefs)?);
        fs::copy(&source, &target).at(&source)?;
        self.observer
            .info(&format!("Saved {}", target.display()));
        Ok(())
    }

    fn run_hooks(&self, class: &str) -> Result<()> {
        let prefix = format!("recipe.hooks.{class}.");
        let keys: Vec<String> = self
            .ctx
            .prefs
            .keys_with_prefix(&prefix)
            .filter(|k| k.ends_with(".pattern"))
            .map(str::to_string)
            .collect();
        for key in keys {
            self.run_recipe(&key)?;
        }
        Ok(())
    }

    fn run_recipe(&self, key: &str) -> Result<()> {
        let argv = recipe::expand_key(key, &self.base_dict())?;
        self.exec(&argv)
    }

    // --- Helper: Size ---

    fn size_check(&self) -> Result<Option<SizeReport>> {
        let prefs = &self.ctx.prefs;
        let Some(limits) = SizeLimits::from_prefs(prefs)? else {
            return Ok(None);
        };

        let report = match self.measure() {
            Ok(report) => report,
            Err(e) => {
                self.observer
                    .warn(&format!("Couldn't determine program size: {e}"));
                return Ok(None);
            }
        };

        for line in size::usage(&report, &limits) {
            self.observer.info(&line);
        }
        if let Some(warning) = size::check(&report, &limits)? {
            self.observer.warn(&warning);
        }
        Ok(Some(report))
    }

    fn measure(&self) -> Result<SizeReport> {
        let argv = recipe::expand_key("recipe.size.pattern", &self.base_dict())?;
        if self.ctx.options.verbose {
            self.observer.info(&argv.join(" "));
        }
        let mut output = String::new();
        let run = self.runner.run(&argv, |_, line| {
            output.push_str(line);
            output.push('\n');
        })?;
        if !run.success() {
            return Err(BuildError::ToolExit {
                program: argv.first().cloned().unwrap_or_default(),
                code: run.code,
                stderr_tail: run.stderr_tail,
            });
        }
        size::parse_size_output(&output, &self.ctx.prefs)
    }

    // --- Helper: Compilation ---

    fn base_dict(&self) -> PreferencesMap {
        let mut dict = self.ctx.prefs.clone();
        let ide_version = dict
            .get_or("runtime.ide.version", IDE_VERSION)
            .to_string();
        dict.put("ide_version", ide_version);
        let level_key = format!("compiler.warning_flags.{}", self.ctx.options.warning_level);
        if let Some(flags) = dict.get(&level_key).map(str::to_string) {
            dict.put("compiler.warning_flags", flags);
        }
        dict
    }

    fn compile_files(
        &self,
        out_dir: &Path,
        src_dir: &Path,
        recurse: bool,
        includes: &[PathBuf],
    ) -> Result<Vec<PathBuf>> {
        let units = find_units(out_dir, src_dir, recurse);
        for unit in &units {
            if let Some(parent) = unit.object.parent() {
                fs::create_dir_all(parent).at(parent)?;
            }
        }

        let dict = {
            let mut dict = self.base_dict();
            dict.put("includes", prepare_includes(includes));
            dict
        };

        if self.ctx.options.parallel {
            units
                .par_iter()
                .try_for_each(|unit| self.compile_unit(unit, &dict))?;
        } else {
            for unit in &units {
                self.compile_unit(unit, &dict)?;
            }
        }
        Ok(units.into_iter().map(|u| u.object).collect())
    }

    fn compile_unit(&self, unit: &Unit, base: &PreferencesMap) -> Result<()> {
        let mut dict = base.clone();
        dict.put("source_file", path_str(&unit.source));
        dict.put("object_file", path_str(&unit.object));
        let argv = recipe::expand_key(unit.recipe, &dict)?;

        // reused objects belong in the database too
        self.compile_db
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(json!({
                "directory": path_str(&self.ctx.build_path),
                "command": argv.join(" "),
                "file": path_str(&unit.source),
            }));

        if depfile::should_skip(&unit.source, &unit.object, &unit.dep_file) {
            if self.ctx.options.verbose {
                self.observer.info(&format!(
                    "Using previously compiled file: {}",
                    unit.object.display()
                ));
            }
            return Ok(());
        }

        self.exec(&argv)
    }

    /// Run one tool invocation through the remapper.
    fn exec(&self, argv: &[String]) -> Result<()> {
        if self.ctx.options.verbose {
            self.observer.info(&argv.join(" "));
        }
        let run = self.runner.run(argv, |_, line| {
            let text = self.remapper().process(line);
            self.observer.diagnostic(&text);
        })?;

        if let Some(diagnostic) = self.remapper().first_error().cloned() {
            return Err(BuildError::CompileDiagnostic(diagnostic));
        }
        let program = argv
            .iter()
            .find(|a| !a.trim().is_empty())
            .cloned()
            .unwrap_or_default();
        if run.code > 1 {
            self.observer
                .warn(&format!("{program} returned {}", run.code));
        }
        if !run.success() {
            return Err(BuildError::ToolExit {
                program,
                code: run.code,
                stderr_tail: run.stderr_tail,
            });
        }
        Ok(())
    }

    fn write_compile_db(&self) {
        let mut entries = std::mem::take(
            &mut *self
                .compile_db
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if entries.is_empty() {
            return;
        }
        // parallel units arrive in any order
        entries.sort_by(|a, b| a["file"].as_str().cmp(&b["file"].as_str()));
        let path = self.ctx.build_path.join(COMPILE_COMMANDS);
        let written = serde_json::to_string_pretty(&entries)
            .map_err(std::io::Error::other)
            .and_then(|text| fs::write(&path, text));
        if let Err(e) = written {
            self.observer
                .warn(&format!("Could not write {}: {e}", path.display()));
        }
    }
}

/// Sources directly in `src_dir` (or below it when recursing), each paired
/// with an object path that mirrors its location under `out_dir`.
fn find_units(out_dir: &Path, src_dir: &Path, recurse: bool) -> Vec<Unit> {
    let max_depth = if recurse { usize::MAX } else { 1 };
    WalkDir::new(src_dir)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden_or_scm(e.path()))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let source = e.into_path();
            let recipe = match source.extension().and_then(|x| x.to_str()) {
                Some("S") => "recipe.S.o.pattern",
                Some("c") => "recipe.c.o.pattern",
                Some("cpp") => "recipe.cpp.o.pattern",
                _ => return None,
            };
            let relative = source.strip_prefix(src_dir).ok()?;
            let file_name = relative.file_name()?.to_string_lossy().to_string();
            let object = match relative.parent() {
                Some(parent) => out_dir.join(parent).join(format!("{file_name}.o")),
                None => out_dir.join(format!("{file_name}.o")),
            };
            Some(Unit {
                dep_file: object.with_extension("d"),
                object,
                source,
                recipe,
            })
        })
        .collect()
}

fn write_empty_archive(path: &Path) -> Result<()> {
    if fs::read(path).is_ok_and(|bytes| bytes == EMPTY_ARCHIVE) {
        return Ok(());
    }
    fs::write(path, EMPTY_ARCHIVE).at(path)
}

fn prepare_includes(folders: &[PathBuf]) -> String {
    folders
        .iter()
        .map(|f| format!("\"-I{}\"", f.display()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_newer(file: &Path, than: &Path) -> bool {
    let mtime = |p: &Path| fs::metadata(p).and_then(|m| m.modified()).ok();
    match (mtime(file), mtime(than)) {
        (Some(a), Some(b)) => a > b,
        _ => true,
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
