//! `flood version`: report this installation.
//!
//! `--json` prints the [`Installation`] record that an orchestrating host
//! compares against its own before dispatching remote jobs.

use anyhow::Result;

use flood::loadtest::remote::Installation;
use flood::loadtest::vegeta::VegetaBinary;

use super::GlobalOptions;

pub fn execute(globals: &GlobalOptions, json: bool) -> Result<()> {
    let config = globals.load_config()?;
    let engine = VegetaBinary::new(config.engine.vegeta_path);
    let installation = Installation::local(&engine);

    if json {
        println!("{}", serde_json::to_string(&installation)?);
    } else {
        println!("flood {}", installation.flood_version);
        match &installation.vegeta_path {
            Some(path) => println!("vegeta: {path}"),
            None => println!("vegeta: not found ({})", engine.path()),
        }
    }
    Ok(())
}
