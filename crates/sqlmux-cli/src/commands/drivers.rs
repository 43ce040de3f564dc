use sqlmux_core::{DriverEntry, MuxConfig};

/// Registry rows in lookup order; configured drivers come before built-ins.
pub fn entries(config: &MuxConfig) -> Vec<DriverEntry> {
    config.driver_registry().entries().to_vec()
}

pub fn list(config: &MuxConfig, format: &str) -> anyhow::Result<()> {
    let entries = entries(config);

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    let width = entries.iter().map(|e| e.prefix.len()).max().unwrap_or(0);
    println!("{:<width$}  DRIVER", "PREFIX");
    for entry in &entries {
        println!("{:<width$}  {}", entry.prefix, entry.token);
    }
    Ok(())
}
