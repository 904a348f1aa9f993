//! Sketch preprocessing: concatenation of `.ino`/`.pde` tabs into one unit
//! and copying of the other tabs.

use std::fs;
use std::path::Path;

use super::diagnostics::{SourceMap, TabSpan};
use crate::error::{IoContext, Result};
use crate::sketch::{Sketch, SketchCode};

/// Write `<build>/<sketch>.cpp` and the auxiliary tabs, returning where each
/// tab's lines ended up.
///
/// Files whose content is unchanged are left alone so their objects stay
/// valid.
pub fn preprocess(sketch: &Sketch, build_path: &Path, prelude: &str) -> Result<SourceMap> {
    fs::create_dir_all(build_path).at(build_path)?;

    let unit_name = format!("{}.cpp", sketch.name());
    let mut unit = String::new();
    let mut offset = 0;
    if !prelude.is_empty() {
        unit.push_str(prelude);
        unit.push('\n');
        offset = prelude.matches('\n').count() + 1;
    }

    let mut source_map = SourceMap {
        unit_name: unit_name.clone(),
        ..SourceMap::default()
    };

    for code in sketch.codes() {
        if code.is_sketch_tab() {
            source_map.tabs.push(span(code, offset));
            unit.push_str(&code.text);
            unit.push('\n');
            offset += code.line_count();
        } else {
            let target = build_path.join(code.file_name());
            write_if_changed(&target, &code.text)?;
            source_map.copied.push(span(code, 0));
        }
    }

    write_if_changed(&build_path.join(&unit_name), &unit)?;
    Ok(source_map)
}

fn span(code: &SketchCode, offset: usize) -> TabSpan {
    let display_name = if code.is_sketch_tab() {
        code.pretty_name()
    } else {
        code.file_name()
    };
    TabSpan {
        file_name: code.file_name(),
        display_name,
        offset,
    }
}

fn write_if_changed(path: &Path, content: &str) -> Result<()> {
    if fs::read_to_string(path).is_ok_and(|old| old == content) {
        return Ok(());
    }
    fs::write(path, content).at(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sketch() -> Sketch {
        Sketch::from_codes(
            "/s/Robot",
            vec![
                SketchCode::new("/s/Robot/Robot.ino", "void setup() {}\nvoid loop() {}"),
                SketchCode::new("/s/Robot/motors.ino", "int speed;\n\nvoid go() {}\n"),
                SketchCode::new("/s/Robot/pins.h", "#define LED 13\n"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_concatenation_records_offsets() {
        let tmp = TempDir::new().unwrap();
        let map = preprocess(&sketch(), tmp.path(), "#include <Arduino.h>").unwrap();

        let unit = fs::read_to_string(tmp.path().join("Robot.cpp")).unwrap();
        let lines: Vec<&str> = unit.lines().collect();
        assert_eq!(lines[0], "#include <Arduino.h>");
        assert_eq!(lines[1], "void setup() {}");

        let tabs = &map.tabs;
        assert_eq!(tabs[0].offset, 1);
        assert_eq!(tabs[1].file_name, "motors.ino");
        assert_eq!(tabs[1].offset, 3);
        assert_eq!(lines[tabs[1].offset], "int speed;");
        // line 3 of motors.ino maps back through the unit
        let (tab, line) = map.locate("Robot.cpp", 6).unwrap();
        assert_eq!((tab.display_name.as_str(), line), ("motors", 3));
        assert_eq!(lines[5], "void go() {}");
    }

    #[test]
    fn test_auxiliary_tabs_copied() {
        let tmp = TempDir::new().unwrap();
        let map = preprocess(&sketch(), tmp.path(), "").unwrap();
        assert_eq!(
            fs::read_to_string(tmp.path().join("pins.h")).unwrap(),
            "#define LED 13\n"
        );
        assert_eq!(map.copied.len(), 1);
        assert_eq!(map.copied[0].file_name, "pins.h");
        assert_eq!(map.tabs[0].offset, 0);
    }

    #[test]
    fn test_unchanged_unit_keeps_its_mtime() {
        let tmp = TempDir::new().unwrap();
        let unit = tmp.path().join("Robot.cpp");
        preprocess(&sketch(), tmp.path(), "").unwrap();
        let before = fs::metadata(&unit).unwrap().modified().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        preprocess(&sketch(), tmp.path(), "").unwrap();
        let after = fs::metadata(&unit).unwrap().modified().unwrap();
        assert_eq!(before, after);
    }
}
