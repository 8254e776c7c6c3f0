use super::{json_pretty, Failure, EXIT_SUCCESS};
use runpack_core::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<u8, Failure> {
    let resolved = engine.resolve_all()?;

    if json {
        let entries: Vec<_> = resolved
            .iter()
            .map(|(component, dep)| {
                serde_json::json!({
                    "component": component.id,
                    "dependency": dep,
                })
            })
            .collect();
        println!("{}", json_pretty(&entries)?);
    } else if resolved.is_empty() {
        println!("no enabled component declares a dependency");
    } else {
        for (component, dep) in &resolved {
            println!("{} -> {} {}", component.id, dep.name, dep.version);
            println!("  uri:      {}", dep.uri);
            println!("  checksum: {}", dep.checksum);
        }
    }
    Ok(EXIT_SUCCESS)
}
