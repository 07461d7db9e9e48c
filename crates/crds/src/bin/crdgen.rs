//! Prints the CRD manifests owned by this workspace as a multi-document YAML
//! stream, ready for `kubectl apply -f -`.

use crds::DanmEp;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [DanmEp::crd()];
    for crd in &crds {
        println!("---");
        print!("{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
