//! Status command handler

use anyhow::Result;

use backref_core::{Config, IndexError, Store, SCHEMA_VERSION};

use crate::output::{Output, OutputFormat};

/// Show status information
pub fn show(config: &Config, output: &Output) -> Result<()> {
    let db_path = config.db_path();
    let store = match Store::open_existing(&db_path) {
        Ok(store) => Some(store),
        Err(IndexError::NotInitialized { .. }) => None,
        Err(e) => return Err(e.into()),
    };
    let counts = store.as_ref().map(|s| s.counts()).transpose()?;
    let dangling = store
        .as_ref()
        .map(|s| s.dangling_links().map(|links| links.len()))
        .transpose()?;
    let size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    match output.format {
        OutputFormat::Json => output.json(&serde_json::json!({
            "corpus_root": config.corpus_root,
            "db_path": db_path,
            "initialized": store.is_some(),
            "schema_version": SCHEMA_VERSION,
            "ref_policy": config.ref_policy,
            "database_size": size,
            "counts": counts,
            "dangling_links": dangling,
        }))?,
        OutputFormat::Quiet => {
            println!("{}", db_path.display());
        }
        OutputFormat::Human => {
            println!("Backref Status");
            println!("==============");
            println!();
            println!("Corpus:");
            println!("  Root:       {}", config.corpus_root.display());
            println!("  Extensions: {}", config.extensions.join(", "));
            if let Some(ref exclude) = config.exclude {
                println!("  Exclude:    {}", exclude);
            }
            println!();
            println!("Index:");
            println!("  Location:   {}", db_path.display());
            println!("  Schema:     v{}", SCHEMA_VERSION);
            println!("  Ref policy: {:?}", config.ref_policy);
            match (counts, dangling) {
                (Some(counts), Some(dangling)) => {
                    println!("  Size:       {}", human_size(size));
                    println!();
                    println!("Contents:");
                    println!("  Documents: {}", counts.documents);
                    println!("  Links:     {} ({} dangling)", counts.links, dangling);
                    println!("  Titles:    {}", counts.titles);
                    println!("  Refs:      {}", counts.refs);
                }
                _ => {
                    println!("  Status:     not initialized (run `backref sync`)");
                }
            }
        }
    }

    Ok(())
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
