//! Deployment type of the running installation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Environment variable naming the deployment type.
pub const DEPLOY_TYPE_ENV: &str = "DEPLOY_TYPE";

/// How the installation is deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeployType {
    #[default]
    Kubernetes,
    Helm,
    DockerCompose,
    PureDocker,
    /// Everything in one container; `externalURL` is optional there.
    #[serde(rename = "docker-container")]
    SingleDockerContainer,
    Dev,
    App,
}

impl DeployType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployType::Kubernetes => "kubernetes",
            DeployType::Helm => "helm",
            DeployType::DockerCompose => "docker-compose",
            DeployType::PureDocker => "pure-docker",
            DeployType::SingleDockerContainer => "docker-container",
            DeployType::Dev => "dev",
            DeployType::App => "app",
        }
    }

    pub fn is_single_docker_container(&self) -> bool {
        matches!(self, DeployType::SingleDockerContainer)
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, DeployType::Dev)
    }
}

impl fmt::Display for DeployType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeployType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "kubernetes" | "k8s" => Ok(DeployType::Kubernetes),
            "helm" => Ok(DeployType::Helm),
            "docker-compose" => Ok(DeployType::DockerCompose),
            "pure-docker" => Ok(DeployType::PureDocker),
            "docker-container" => Ok(DeployType::SingleDockerContainer),
            "dev" => Ok(DeployType::Dev),
            "app" => Ok(DeployType::App),
            other => Err(format!("unknown deploy type '{}'", other)),
        }
    }
}
