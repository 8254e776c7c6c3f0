use super::{Failure, EXIT_SUCCESS};
use runpack_core::{CoreError, Engine};

pub fn run(engine: &Engine, json: bool) -> Result<u8, Failure> {
    let manifest = engine.release()?;
    let rendered = if json {
        manifest.to_json()
    } else {
        manifest.to_yaml()
    }
    .map_err(CoreError::from)?;
    print!("{rendered}");
    if json {
        println!();
    }
    Ok(EXIT_SUCCESS)
}
