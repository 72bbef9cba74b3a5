use kube::CustomResourceExt;
use control_plane_operator::crd::{ApiServerOperatorConfig, WebConsoleOperatorConfig};

fn main() -> Result<(), serde_yaml::Error> {
    for crd in [WebConsoleOperatorConfig::crd(), ApiServerOperatorConfig::crd()] {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
