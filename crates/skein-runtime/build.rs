//! Build script for skein-runtime
//!
//! Merges compile-time configuration:
//! 1. Start with library defaults
//! 2. If SKEIN_CONFIG_RS is set, read the user's const file
//! 3. User values override defaults
//! 4. Write OUT_DIR/skein_merged_config.rs
//!
//! The user file only needs the constants it changes.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

const CONFIG_ENV: &str = "SKEIN_CONFIG_RS";

struct ConfigParam {
    name: &'static str,
    rust_type: &'static str,
    default_value: &'static str,
}

const CONFIG_PARAMS: &[ConfigParam] = &[
    ConfigParam {
        name: "STACK_SIZE",
        rust_type: "usize",
        default_value: "2 * 1024 * 1024",
    },
    ConfigParam {
        name: "POOL_CAPACITY",
        rust_type: "usize",
        default_value: "0",
    },
    ConfigParam {
        name: "MAX_FIBERS",
        rust_type: "usize",
        default_value: "65_536",
    },
    ConfigParam {
        name: "IDLE_SLEEP_MS",
        rust_type: "u64",
        default_value: "10",
    },
    ConfigParam {
        name: "DEBUG_LOGGING",
        rust_type: "bool",
        default_value: "false",
    },
];

fn main() {
    let Ok(out_dir) = env::var("OUT_DIR") else {
        panic!("OUT_DIR not set");
    };
    let dest_path = Path::new(&out_dir).join("skein_merged_config.rs");

    let mut config: HashMap<&'static str, String> = CONFIG_PARAMS
        .iter()
        .map(|p| (p.name, p.default_value.to_string()))
        .collect();

    let user_path = env::var(CONFIG_ENV).ok();
    if let Some(path) = &user_path {
        println!("cargo:rerun-if-changed={}", path);
        match fs::read_to_string(path) {
            Ok(content) => {
                merge(&content, &mut config);
                println!("cargo:warning=Using custom config: {}", path);
            }
            Err(e) => println!("cargo:warning=Failed to read {} ({}): {}", CONFIG_ENV, path, e),
        }
    }
    println!("cargo:rerun-if-env-changed={}", CONFIG_ENV);

    let output = render(&config, user_path.is_some());
    if let Err(e) = fs::write(&dest_path, output) {
        panic!("failed to write merged config: {}", e);
    }
}

/// Fold every recognised `pub const NAME: TYPE = VALUE;` line into `config`.
fn merge(content: &str, config: &mut HashMap<&'static str, String>) {
    for line in content.lines().map(str::trim) {
        if line.starts_with("//") {
            continue;
        }
        let Some((name, value)) = parse_const_line(line) else {
            continue;
        };
        match CONFIG_PARAMS.iter().find(|p| p.name == name) {
            Some(param) => {
                config.insert(param.name, value);
            }
            None => println!("cargo:warning=Unknown config parameter: {}", name),
        }
    }
}

fn parse_const_line(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("pub const ")?.trim();
    let (name, rest) = rest.split_once(':')?;
    let (_, value) = rest.split_once('=')?;
    let value = value.trim().trim_end_matches(';').trim();
    Some((name.trim().to_string(), value.to_string()))
}

fn render(config: &HashMap<&'static str, String>, custom: bool) -> String {
    let mut output = String::from("// Generated by build.rs\n");
    if custom {
        output.push_str("// Library defaults merged with the user's config file\n");
    }
    output.push('\n');
    for param in CONFIG_PARAMS {
        let value = config
            .get(param.name)
            .map(String::as_str)
            .unwrap_or(param.default_value);
        output.push_str(&format!(
            "pub const {}: {} = {};\n",
            param.name, param.rust_type, value
        ));
    }
    output
}
