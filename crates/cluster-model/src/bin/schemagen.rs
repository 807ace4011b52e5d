//! Print the JSON schema of the spec file as YAML
//!
//! Usage: `cargo run -p cluster-model --bin schemagen > schema.yaml`

use cluster_model::DesiredState;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let schema = schemars::schema_for!(DesiredState);
    print!("{}", serde_yaml::to_string(&schema)?);
    Ok(())
}
