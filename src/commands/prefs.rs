//! `inoc prefs`: print the resolved preferences for the selected board.

use crate::prefs::PreferencesMap;

/// `key=value` lines, sorted, optionally limited to keys starting with `prefix`.
pub fn render(prefs: &PreferencesMap, prefix: Option<&str>) -> Vec<String> {
    prefs
        .iter()
        .filter(|(k, _)| prefix.is_none_or(|p| k.starts_with(p)))
        .map(|(k, v)| format!("{k}={v}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_filters_by_prefix() {
        let prefs = PreferencesMap::parse("build.mcu=atmega328p\nupload.speed=115200\nbuild.f_cpu=16000000L\n");
        assert_eq!(
            render(&prefs, Some("build.")),
            vec!["build.f_cpu=16000000L", "build.mcu=atmega328p"]
        );
        assert_eq!(render(&prefs, None).len(), 3);
    }
}
