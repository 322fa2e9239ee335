//! Prints the SupabaseProject CustomResourceDefinition as YAML.
//!
//! ```sh
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use kube::CustomResourceExt;
use supabase_operator::SupabaseProject;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&SupabaseProject::crd())?);
    Ok(())
}
