use criterion::{Criterion, criterion_group, criterion_main};
use inoc::prefs::PreferencesMap;
use inoc::recipe;
use std::hint::black_box;

const MOCK_PLATFORM: &str = r#"
name=Arduino AVR Boards
version=1.8.6
compiler.path={runtime.tools.avr-gcc.path}/bin/
compiler.c.cmd=avr-gcc
compiler.c.flags=-c -g -Os {compiler.warning_flags} -std=gnu11 -ffunction-sections -fdata-sections -MMD -flto -fno-fat-lto-objects
compiler.cpp.cmd=avr-g++
compiler.cpp.flags=-c -g -Os {compiler.warning_flags} -std=gnu++11 -fpermissive -fno-exceptions -ffunction-sections -fdata-sections -fno-threadsafe-statics -Wno-error=narrowing -MMD -flto
compiler.c.extra_flags=
compiler.cpp.extra_flags=
build.extra_flags=
recipe.cpp.o.pattern="{compiler.path}{compiler.cpp.cmd}" {compiler.cpp.flags} -mmcu={build.mcu} -DF_CPU={build.f_cpu} -DARDUINO={runtime.ide.version} -DARDUINO_{build.board} -DARDUINO_ARCH_{build.arch} {compiler.cpp.extra_flags} {build.extra_flags} {includes} "{source_file}" -o "{object_file}"
recipe.size.regex=^(?:\.text|\.data|\.bootloader)\s+([0-9]+).*
tools.avrdude.path={runtime.tools.avrdude.path}
tools.avrdude.cmd.path={path}/bin/avrdude
tools.avrdude.cmd.path.linux={path}/bin/avrdude
tools.avrdude.cmd.path.windows={path}/bin/avrdude.exe
"#;

fn compile_dict() -> PreferencesMap {
    let mut prefs = PreferencesMap::parse(MOCK_PLATFORM);
    prefs.put("runtime.tools.avr-gcc.path", "/opt/arduino/tools/avr-gcc/7.3.0");
    prefs.put("compiler.warning_flags", "-w");
    prefs.put("build.mcu", "atmega328p");
    prefs.put("build.f_cpu", "16000000L");
    prefs.put("build.board", "AVR_UNO");
    prefs.put("build.arch", "AVR");
    prefs.put("runtime.ide.version", "10800");
    prefs.put(
        "includes",
        "\"-I/opt/arduino/hardware/arduino/avr/cores/arduino\" \"-I/opt/arduino/hardware/arduino/avr/variants/standard\"",
    );
    prefs.put("source_file", "/tmp/inoc-build/Blink.cpp");
    prefs.put("object_file", "/tmp/inoc-build/Blink.cpp.o");
    prefs
}

fn bench_prefs_parse(c: &mut Criterion) {
    c.bench_function("parse_platform_txt", |b| {
        b.iter(|| PreferencesMap::parse(black_box(MOCK_PLATFORM)))
    });
}

fn bench_recipe_expand(c: &mut Criterion) {
    let dict = compile_dict();
    c.bench_function("expand_cpp_recipe", |b| {
        b.iter(|| recipe::expand_key(black_box("recipe.cpp.o.pattern"), black_box(&dict)))
    });
}

criterion_group!(benches, bench_prefs_parse, bench_recipe_expand);
criterion_main!(benches);
