use alertsync_operator::crd::{AlertDefinition, AlertGroupConfig};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    println!("---");
    println!("# AlertDefinition CRD");
    println!("{}", serde_yaml::to_string(&AlertDefinition::crd())?);

    println!("---");
    println!("# AlertGroupConfig CRD");
    println!("{}", serde_yaml::to_string(&AlertGroupConfig::crd())?);

    Ok(())
}
