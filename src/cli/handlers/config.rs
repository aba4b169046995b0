//! CLI handlers for configuration inspection.

use anyhow::Result;
use serde::Serialize;

use crate::cli::output::{output_json, print_error, print_kv, print_success, OutputMode};
use crate::client::ModelClient;
use crate::config::{StationsConfig, CONFIG_FILE_NAME};

pub fn handle_show(config: &StationsConfig, mode: OutputMode) -> Result<()> {
    match mode {
        OutputMode::Json => output_json(config),
        _ => {
            let text = toml::to_string_pretty(config)
                .map_err(|e| anyhow::anyhow!("Failed to render config: {}", e))?;
            if mode == OutputMode::Markdown {
                println!("```toml\n{}```", text);
            } else {
                print!("{}", text);
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct ConfigPath {
    source: &'static str,
    path: String,
    exists: bool,
}

pub fn handle_paths(mode: OutputMode) {
    let mut paths = Vec::new();
    if let Ok(path) = std::env::var("STATIONS_CONFIG") {
        paths.push(("STATIONS_CONFIG", std::path::PathBuf::from(path)));
    }
    paths.push(("working directory", std::path::PathBuf::from(CONFIG_FILE_NAME)));
    if let Some(dir) = dirs::config_dir() {
        paths.push(("user config", dir.join("seven-stations").join(CONFIG_FILE_NAME)));
    }
    let entries: Vec<ConfigPath> = paths
        .into_iter()
        .map(|(source, path)| ConfigPath {
            source,
            exists: path.exists(),
            path: path.display().to_string(),
        })
        .collect();

    if mode == OutputMode::Json {
        output_json(&entries);
        return;
    }
    for entry in &entries {
        let marker = if entry.exists { "found" } else { "missing" };
        print_kv(entry.source, &format!("{} ({})", entry.path, marker));
    }
}

pub async fn handle_check(config: &StationsConfig, mode: OutputMode) -> Result<()> {
    let client = ModelClient::from_env(config.client.clone())
        .map_err(|e| anyhow::anyhow!("Failed to create model client: {}", e))?;
    let ok = client.test_connection().await;

    if mode == OutputMode::Json {
        output_json(&serde_json::json!({
            "connected": ok,
            "model": config.client.default_model,
        }));
    } else if ok {
        print_success(&format!("{} is reachable", config.client.default_model));
    } else {
        print_error(&format!("{} did not answer", config.client.default_model));
    }

    if !ok {
        anyhow::bail!("connection check failed");
    }
    Ok(())
}
