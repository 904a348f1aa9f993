use colored::*;

/// A known compiler message replaced with friendlier advice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub headline: &'static str,
    pub detail: &'static str,
}

static RENAMES: [(&str, Rename); 9] = [
    (
        "SPI.h: No such file or directory",
        Rename {
            headline: "Please import the SPI library from the Sketch > Import Library menu.",
            detail: "\nAs of Arduino 0019, the Ethernet library depends on the SPI library.\nYou appear to be using it or another library that depends on the SPI library.\n\n",
        },
    ),
    (
        "'BYTE' was not declared in this scope",
        Rename {
            headline: "The 'BYTE' keyword is no longer supported.",
            detail: "\nAs of Arduino 1.0, the 'BYTE' keyword is no longer supported.\nPlease use Serial.write() instead.\n\n",
        },
    ),
    (
        "no matching function for call to 'Server::Server(int)'",
        Rename {
            headline: "The Server class has been renamed EthernetServer.",
            detail: "\nAs of Arduino 1.0, the Server class in the Ethernet library has been renamed to EthernetServer.\n\n",
        },
    ),
    (
        "no matching function for call to 'Client::Client(byte [4], int)'",
        Rename {
            headline: "The Client class has been renamed EthernetClient.",
            detail: "\nAs of Arduino 1.0, the Client class in the Ethernet library has been renamed to EthernetClient.\n\n",
        },
    ),
    (
        "'Udp' was not declared in this scope",
        Rename {
            headline: "The Udp class has been renamed EthernetUdp.",
            detail: "\nAs of Arduino 1.0, the Udp class in the Ethernet library has been renamed to EthernetUdp.\n\n",
        },
    ),
    (
        "'class TwoWire' has no member named 'send'",
        Rename {
            headline: "Wire.send() has been renamed Wire.write().",
            detail: "\nAs of Arduino 1.0, the Wire.send() function was renamed to Wire.write() for consistency with other libraries.\n\n",
        },
    ),
    (
        "'class TwoWire' has no member named 'receive'",
        Rename {
            headline: "Wire.receive() has been renamed Wire.read().",
            detail: "\nAs of Arduino 1.0, the Wire.receive() function was renamed to Wire.read() for consistency with other libraries.\n\n",
        },
    ),
    (
        "'Mouse' was not declared in this scope",
        Rename {
            headline: "'Mouse' only supported on the Arduino Leonardo",
            detail: "",
        },
    ),
    (
        "'Keyboard' was not declared in this scope",
        Rename {
            headline: "'Keyboard' only supported on the Arduino Leonardo",
            detail: "",
        },
    ),
];

pub struct FeedbackAnalyzer;

impl FeedbackAnalyzer {
    /// Friendlier wording for a known compiler error message.
    pub fn rename(error: &str) -> Option<&'static Rename> {
        let error = error.trim();
        RENAMES.iter().find(|(m, _)| *m == error).map(|(_, r)| r)
    }

    /// Link errors from libraries that forgot to pull in a dependency.
    pub fn link_hint(line: &str) -> Option<&'static str> {
        if !line.contains("libraries/Robot_Control") {
            return None;
        }
        if line.contains("undefined reference to `SPIClass::begin()'") {
            return Some("Please import the SPI library from the Sketch > Import Library menu.");
        }
        if line.contains("undefined reference to `Wire'") {
            return Some("Please import the Wire library from the Sketch > Import Library menu.");
        }
        None
    }

    /// General advice for a failed tool run, from its output.
    pub fn analyze(output: &str) -> Option<String> {
        // 1. Sketch entry points missing
        if output.contains("undefined reference to `setup'")
            || output.contains("undefined reference to `loop'")
        {
            return Some(format!(
                "Your sketch is missing a {} or {} function.\nEvery sketch needs both, even if they are empty.",
                "setup()".bold().yellow(),
                "loop()".bold().yellow()
            ));
        }

        // 2. Generic missing symbol (linker)
        if output.contains("undefined reference to") {
            return Some(format!(
                "It looks like a {} error.\nA library the sketch uses may not be installed, or is not {}d by any tab.",
                "Linker".bold().red(),
                "#include".bold().yellow()
            ));
        }

        // 3. Missing header (compiler)
        if output.contains("fatal error: ") && output.contains("No such file or directory") {
            return Some(format!(
                "It looks like a {} error.\nInstall the library that provides it, or add its folder to {} in {}.",
                "Missing Header".bold().red(),
                "[paths] libraries".bold().yellow(),
                "inoc.toml".bold().yellow()
            ));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rename_known_messages() {
        let r = FeedbackAnalyzer::rename("  'BYTE' was not declared in this scope ").unwrap();
        assert_eq!(r.headline, "The 'BYTE' keyword is no longer supported.");
        assert!(r.detail.contains("Serial.write()"));

        let r = FeedbackAnalyzer::rename("'class TwoWire' has no member named 'send'").unwrap();
        assert_eq!(r.headline, "Wire.send() has been renamed Wire.write().");
        assert!(FeedbackAnalyzer::rename("'Keyboard' was not declared in this scope").is_some());
    }

    #[test]
    fn test_rename_requires_exact_message() {
        assert!(FeedbackAnalyzer::rename("'Serial' was not declared in this scope").is_none());
    }

    #[test]
    fn test_robot_control_hints() {
        let line = "/x/libraries/Robot_Control/Arduino_LCD.cpp:12: undefined reference to `SPIClass::begin()'";
        assert!(FeedbackAnalyzer::link_hint(line).unwrap().contains("SPI library"));
        let line = "/x/libraries/Robot_Control/Compass.cpp:3: undefined reference to `Wire'";
        assert!(FeedbackAnalyzer::link_hint(line).unwrap().contains("Wire library"));
        assert!(FeedbackAnalyzer::link_hint("undefined reference to `Wire'").is_none());
    }

    #[test]
    fn test_linker_error() {
        let msg = FeedbackAnalyzer::analyze("sketch.cpp.o: undefined reference to `foo()'").unwrap();
        assert!(msg.contains("Linker"));
    }

    #[test]
    fn test_include_error() {
        let err = "fatal error: Servo.h: No such file or directory";
        let msg = FeedbackAnalyzer::analyze(err).unwrap();
        assert!(msg.contains("Missing Header"));
    }

    #[test]
    fn test_missing_loop() {
        let msg = FeedbackAnalyzer::analyze("main.cpp:(.text+0x8): undefined reference to `loop'").unwrap();
        assert!(msg.contains("setup()"));
    }
}
