use super::{json_pretty, Failure, EXIT_CACHE_ERROR, EXIT_SUCCESS};
use runpack_core::{CoreError, Engine};

pub fn list(engine: &Engine, json: bool) -> Result<u8, Failure> {
    let artifacts = engine.cache().list().map_err(CoreError::from)?;

    if json {
        let entries: Vec<_> = artifacts
            .iter()
            .map(|a| {
                serde_json::json!({
                    "uri": a.metadata.uri,
                    "path": a.path,
                    "checksum": format!("{}:{}", a.metadata.algorithm, a.metadata.checksum),
                    "size": a.metadata.size,
                    "fetched_at": a.metadata.fetched_at.to_rfc3339(),
                    "read_only": a.read_only,
                })
            })
            .collect();
        println!("{}", json_pretty(&entries)?);
    } else if artifacts.is_empty() {
        println!("cache is empty");
    } else {
        for a in &artifacts {
            let marker = if a.read_only { " (read-only)" } else { "" };
            println!("{}{marker}", a.metadata.uri);
            println!(
                "  {} bytes, fetched {}",
                a.metadata.size,
                a.metadata.fetched_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn evict(engine: &Engine, uri: &str, json: bool) -> Result<u8, Failure> {
    let removed = engine.cache().evict(uri).map_err(CoreError::from)?;

    if json {
        let payload = serde_json::json!({
            "uri": uri,
            "evicted": removed,
        });
        println!("{}", json_pretty(&payload)?);
    } else if removed {
        println!("evicted {uri}");
    } else {
        println!("{uri} is not in the writable cache");
    }
    Ok(EXIT_SUCCESS)
}

pub fn verify(engine: &Engine, json: bool) -> Result<u8, Failure> {
    let report = engine.cache().verify_all().map_err(CoreError::from)?;

    if json {
        let payload = serde_json::json!({
            "checked": report.checked,
            "passed": report.passed,
            "failed": report.corrupt.len(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "cache integrity: {}/{} artifacts passed",
            report.passed, report.checked
        );
        for c in &report.corrupt {
            println!("  FAIL {}: expected {}, got {}", c.uri, c.expected, c.actual);
        }
    }

    if report.corrupt.is_empty() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_CACHE_ERROR)
    }
}
