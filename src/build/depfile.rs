//! Incremental compile cache.
//!
//! The compiler writes a make-style dependency record next to every object:
//!
//! ```text
//! /build/Blink.cpp.o: /build/Blink.cpp \
//!  /hw/arduino/avr/cores/arduino/Arduino.h
//! ```
//!
//! An object is reused only when the record proves nothing it was built from
//! has changed since.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// True when `object` is still valid for `source`. Any doubt means rebuild.
pub fn should_skip(source: &Path, object: &Path, dep_file: &Path) -> bool {
    let (Some(src_time), Some(obj_time), Some(dep_time)) =
        (mtime(source), mtime(object), mtime(dep_file))
    else {
        return false;
    };
    if src_time >= obj_time || src_time >= dep_time {
        return false;
    }

    let Ok(text) = fs::read_to_string(dep_file) else {
        return false;
    };
    let Some((target, prerequisites)) = parse(&text) else {
        return false;
    };

    // the record must describe this very object
    let (Ok(target), Ok(object)) = (fs::canonicalize(&target), fs::canonicalize(object)) else {
        return false;
    };
    if target != object {
        return false;
    }

    prerequisites
        .iter()
        .all(|p| mtime(p).is_some_and(|t| t < obj_time))
}

fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Split a dependency record into its target and prerequisites.
///
/// Continuation lines are joined first. The target is the first token and
/// must end with `:`; prerequisites may follow on the same line.
fn parse(text: &str) -> Option<(PathBuf, Vec<PathBuf>)> {
    let tokens = tokenize(text);
    let mut iter = tokens.into_iter();
    let target = iter.next()?;
    let target = target.strip_suffix(':')?;
    if target.is_empty() {
        return None;
    }
    Some((PathBuf::from(target), iter.map(PathBuf::from).collect()))
}

/// Whitespace-separated tokens, honouring escapes and line continuations.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek() {
                Some(&next) if matches!(next, ' ' | '#' | '\\') => {
                    current.push(next);
                    chars.next();
                }
                // continuation
                Some('\n') | Some('\r') => {
                    while matches!(chars.peek(), Some('\n') | Some('\r')) {
                        chars.next();
                    }
                    flush(&mut tokens, &mut current);
                }
                None => flush(&mut tokens, &mut current),
                _ => current.push(c),
            },
            '$' if chars.peek() == Some(&'$') => {
                current.push('$');
                chars.next();
            }
            c if c.is_whitespace() => flush(&mut tokens, &mut current),
            c => current.push(c),
        }
    }
    flush(&mut tokens, &mut current);

    // a lone ":" after a target separated by space belongs to the target
    let mut merged: Vec<String> = Vec::with_capacity(tokens.len());
    for token in tokens {
        if token == ":"
            && let Some(last) = merged.last_mut()
            && !last.ends_with(':')
        {
            last.push(':');
            continue;
        }
        merged.push(token);
    }
    merged
}

fn flush(tokens: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        tokens.push(std::mem::take(current));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::TempDir;

    fn touch(path: &Path, age_secs: u64) {
        if !path.exists() {
            fs::write(path, "x").unwrap();
        }
        let when = SystemTime::now() - Duration::from_secs(age_secs);
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(when)
            .unwrap();
    }

    struct Unit {
        _tmp: TempDir,
        src: PathBuf,
        header: PathBuf,
        obj: PathBuf,
        dep: PathBuf,
    }

    /// source and header older than object and dep record
    fn compiled_unit() -> Unit {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("Blink.cpp");
        let header = tmp.path().join("my header.h");
        let obj = tmp.path().join("Blink.cpp.o");
        let dep = tmp.path().join("Blink.cpp.d");
        touch(&src, 300);
        touch(&header, 300);
        touch(&obj, 100);
        fs::write(
            &dep,
            format!(
                "{}: \\\n {} \\\n {}\n",
                obj.display(),
                src.display(),
                header.display().to_string().replace(' ', "\\ ")
            ),
        )
        .unwrap();
        touch(&dep, 100);
        Unit {
            _tmp: tmp,
            src,
            header,
            obj,
            dep,
        }
    }

    #[test]
    fn test_fresh_object_is_reused_repeatedly() {
        let u = compiled_unit();
        assert!(should_skip(&u.src, &u.obj, &u.dep));
        assert!(should_skip(&u.src, &u.obj, &u.dep));
    }

    #[test]
    fn test_touched_source_forces_rebuild() {
        let u = compiled_unit();
        touch(&u.src, 0);
        assert!(!should_skip(&u.src, &u.obj, &u.dep));
    }

    #[test]
    fn test_touched_header_forces_rebuild() {
        let u = compiled_unit();
        touch(&u.header, 0);
        assert!(!should_skip(&u.src, &u.obj, &u.dep));
    }

    #[test]
    fn test_missing_prerequisite_forces_rebuild() {
        let u = compiled_unit();
        fs::remove_file(&u.header).unwrap();
        assert!(!should_skip(&u.src, &u.obj, &u.dep));
    }

    #[test]
    fn test_record_for_other_object_is_rejected() {
        let u = compiled_unit();
        let other = u.obj.with_file_name("Other.cpp.o");
        touch(&other, 100);
        fs::write(&u.dep, format!("{}:\n {}\n", other.display(), u.src.display())).unwrap();
        touch(&u.dep, 100);
        assert!(!should_skip(&u.src, &u.obj, &u.dep));
    }

    #[test]
    fn test_target_on_its_own_line() {
        let u = compiled_unit();
        fs::write(&u.dep, format!("{}:\n{}\n", u.obj.display(), u.src.display())).unwrap();
        touch(&u.dep, 100);
        assert!(should_skip(&u.src, &u.obj, &u.dep));
    }

    #[test]
    fn test_missing_files_never_skip() {
        let u = compiled_unit();
        fs::remove_file(&u.dep).unwrap();
        assert!(!should_skip(&u.src, &u.obj, &u.dep));

        let u = compiled_unit();
        fs::remove_file(&u.obj).unwrap();
        assert!(!should_skip(&u.src, &u.obj, &u.dep));
    }

    #[test]
    fn test_garbage_record_never_skips() {
        let u = compiled_unit();
        fs::write(&u.dep, "this is not a dependency file").unwrap();
        touch(&u.dep, 100);
        assert!(!should_skip(&u.src, &u.obj, &u.dep));
    }

    #[test]
    fn test_tokenize_handles_escapes() {
        let tokens = tokenize("out.o: my\\ file.c \\\n  inc/a.h\n");
        assert_eq!(tokens, vec!["out.o:", "my file.c", "inc/a.h"]);
        let tokens = tokenize(r"a.o: we\#ird\\x.h $$HOME.h C:\Users\x.h");
        assert_eq!(tokens, vec!["a.o:", r"we#ird\x.h", "$HOME.h", r"C:\Users\x.h"]);
    }
}
