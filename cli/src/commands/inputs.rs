use anyhow::Result;
use openhvi::Config;

pub fn run(config: &Config) -> Result<()> {
    let inputs = config.resolve_inputs()?;
    for (name, path) in [
        ("units", &inputs.units),
        ("regions", &inputs.regions),
        ("census", &inputs.census),
        ("exposure values", &inputs.exposure_values),
        ("exposure coordinates", &inputs.exposure_coords),
        ("landcover", &inputs.landcover),
    ] {
        println!("{name:<22} {}", path.display());
    }
    Ok(())
}
