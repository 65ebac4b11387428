use globkit_core::{REPORT_SCHEMA_VERSION, VERSION};
use miette::Result;
use serde_json::json;

pub fn run(json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            json!({ "name": "globkit", "version": VERSION, "report_schema_version": REPORT_SCHEMA_VERSION })
        );
    } else {
        println!("globkit {VERSION}");
    }
    Ok(())
}
