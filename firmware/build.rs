use std::env;
use std::path::Path;

/// (name, default). An empty default means "keep the preset value".
const SETTINGS: &[(&str, &str)] = &[
    ("WIFI_SSID", ""),
    ("WIFI_PASSWORD", ""),
    ("UPLOAD_URL", "http://10.20.115.23:3000/pic"),
    ("DEVICE_ID", "wakecam-01"),
    ("CYCLE_PRESET", "single-shot"),
    ("WAKE_POLICY", ""),
    ("UPLOAD_MODE", ""),
    ("CAPTURE_COUNT", ""),
    ("CAPTURE_INTERVAL_SECS", ""),
    ("LINK_DEADLINE_SECS", ""),
    ("TELEMETRY_TEMP_C", "25.0"),
    ("TELEMETRY_VOLTS", "3.3"),
];

fn main() {
    load_env_config();

    linker_be_nice();
    // make sure linkall.x is the last linker script (otherwise might cause problems with flip-link)
    println!("cargo:rustc-link-arg=-Tlinkall.x");
}

/// Load cycle configuration from the .env file.
/// Environment variables take priority over .env file values.
fn load_env_config() {
    println!("cargo:rerun-if-changed=.env");
    for (name, _) in SETTINGS {
        println!("cargo:rerun-if-env-changed={}", name);
    }

    if Path::new(".env").exists() {
        match dotenvy::dotenv() {
            Ok(_) => println!("cargo:warning=Loaded .env file"),
            Err(e) => println!("cargo:warning=Failed to load .env file: {}", e),
        }
    }

    let mut errors = Vec::new();
    for (name, default) in SETTINGS {
        let value = env::var(name)
            .map(|v| v.trim().to_string())
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string());

        if let Err(e) = validate(name, &value) {
            errors.push(format!("{}={:?}: {}", name, value, e));
        }
        println!("cargo:rustc-env={}={}", name, value);
    }

    if errors.is_empty() {
        report();
    } else {
        for e in &errors {
            eprintln!("invalid setting {}", e);
        }
        std::process::exit(1);
    }
}

fn validate(name: &str, value: &str) -> Result<(), String> {
    let one_of = |allowed: &[&str]| {
        if value.is_empty() || allowed.contains(&value) {
            Ok(())
        } else {
            Err(format!("expected one of {}", allowed.join(", ")))
        }
    };

    match name {
        "UPLOAD_URL" => {
            let rest = value
                .strip_prefix("http://")
                .ok_or_else(|| "only http:// URLs are supported".to_string())?;
            if rest.is_empty() || rest.starts_with('/') || rest.starts_with(':') {
                return Err("missing host".into());
            }
            Ok(())
        }
        "DEVICE_ID" if value.is_empty() || value.contains(',') => {
            Err("must be non-empty and free of commas".into())
        }
        "CYCLE_PRESET" => one_of(&["single-shot", "single", "burst"]),
        "WAKE_POLICY" => one_of(&["always", "always-run", "trigger", "run-only-on-trigger"]),
        "UPLOAD_MODE" => one_of(&["raw", "raw-jpeg", "packaged"]),
        "CAPTURE_COUNT" if !value.is_empty() => match value.parse::<u16>() {
            Ok(0) | Err(_) => Err("expected 1-65535".into()),
            Ok(_) => Ok(()),
        },
        "CAPTURE_INTERVAL_SECS" | "LINK_DEADLINE_SECS" if !value.is_empty() => value
            .parse::<u32>()
            .map(|_| ())
            .map_err(|_| "expected whole seconds".into()),
        "TELEMETRY_TEMP_C" | "TELEMETRY_VOLTS" => value
            .parse::<f32>()
            .map(|_| ())
            .map_err(|_| "expected a number".into()),
        _ => Ok(()),
    }
}

fn report() {
    let ssid = env::var("WIFI_SSID").unwrap_or_default();
    if ssid.trim().is_empty() {
        println!("cargo:warning=WIFI_SSID is empty - the link will never come up");
    } else {
        println!("cargo:warning=WIFI_SSID configured: {}", ssid.trim());
    }
    let password = env::var("WIFI_PASSWORD").unwrap_or_default();
    println!(
        "cargo:warning=WIFI_PASSWORD configured (length: {})",
        password.trim().len()
    );
}

fn linker_be_nice() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        let kind = &args[1];
        let what = &args[2];

        match kind.as_str() {
            "undefined-symbol" => match what.as_str() {
                "_stack_start" => {
                    eprintln!();
                    eprintln!("💡 Is the linker script `linkall.x` missing?");
                    eprintln!();
                }
                "esp_wifi_preempt_enable"
                | "esp_wifi_preempt_yield_task"
                | "esp_wifi_preempt_task_create" => {
                    eprintln!();
                    eprintln!("💡 `esp-wifi` has no scheduler enabled. Make sure you have the `builtin-scheduler` feature enabled, or that you provide an external scheduler.");
                    eprintln!();
                }
                _ => (),
            },
            // we don't have anything helpful for "missing-lib" yet
            _ => {
                std::process::exit(1);
            }
        }

        std::process::exit(0);
    }

    println!(
        "cargo:rustc-link-arg=--error-handling-script={}",
        std::env::current_exe().unwrap().display()
    );
}
