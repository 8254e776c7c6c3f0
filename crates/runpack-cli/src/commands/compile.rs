use super::{json_pretty, with_spinner, Failure, EXIT_SUCCESS};
use runpack_core::{Engine, STAGING_DIR};

pub fn run(engine: &Engine, json: bool) -> Result<u8, Failure> {
    let detection = with_spinner(
        json,
        "staging components...",
        "components staged",
        "compile failed",
        || engine.compile(),
    )?;

    let staged = engine.app_dir().join(STAGING_DIR);
    if json {
        let payload = serde_json::json!({
            "staging_dir": staged,
            "participants": detection.participants,
            "status": "compiled",
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        for p in &detection.participants {
            println!("staged {}", p.tag);
        }
        println!("staging dir: {}", staged.display());
    }
    Ok(EXIT_SUCCESS)
}
