use super::{colorize_category, json_pretty, Failure, EXIT_FAILURE, EXIT_SUCCESS};
use runpack_core::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<u8, Failure> {
    let detection = engine.detect()?;

    if json {
        let payload = serde_json::json!({
            "app_dir": engine.app_dir(),
            "participants": detection.participants,
            "tags": detection.tags(),
        });
        println!("{}", json_pretty(&payload)?);
    } else if detection.is_empty() {
        println!("no components apply to {}", engine.app_dir().display());
    } else {
        for p in &detection.participants {
            println!("{:<24} {:<12} {}", p.id.as_str(), colorize_category(&p.category), p.tag);
        }
    }

    // A buildpack that detects nothing reports failure to its caller.
    if detection.is_empty() {
        Ok(EXIT_FAILURE)
    } else {
        Ok(EXIT_SUCCESS)
    }
}
