use super::{json_pretty, with_spinner, Failure, EXIT_SUCCESS};
use runpack_core::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<u8, Failure> {
    let result = with_spinner(
        json,
        "building application...",
        "application built",
        "build failed",
        || engine.build(),
    )?;

    if json {
        let payload = serde_json::json!({
            "participants": result.detection.participants,
            "coprocesses": result.manifest.coprocesses(),
            "main_command": result.manifest.main_command(),
            "release": result.manifest.payload(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("detected: {}", result.detection.tags().join(", "));
        println!("web: {}", result.manifest.start_command());
    }
    Ok(EXIT_SUCCESS)
}
