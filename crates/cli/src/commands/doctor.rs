//! `docuchat doctor` — Diagnose configuration and database health.

use docuchat_config::AppConfig;
use docuchat_store::Store;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 docuchat Doctor — System Diagnostics");
    println!("=======================================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        match AppConfig::load() {
            Ok(config) => {
                println!("  ✅ Config file valid");

                if config.has_api_key() {
                    println!("  ✅ Gemini API key configured");
                } else {
                    println!("  ⚠️  No API key — set GEMINI_API_KEY or add api_key to config.toml");
                    issues += 1;
                }

                match Store::open(&config.database.path).await {
                    Ok(_) => println!("  ✅ Database reachable: {}", config.database.path),
                    Err(e) => {
                        println!("  ❌ Database unreachable: {e}");
                        issues += 1;
                    }
                }
            }
            Err(e) => {
                println!("  ❌ Config file invalid: {e}");
                issues += 1;
            }
        }
    } else {
        println!("  ❌ No config file — run `docuchat onboard`");
        issues += 1;
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
