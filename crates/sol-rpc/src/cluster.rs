use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A Solana cluster, either well-known or a custom RPC URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Cluster {
    MainnetBeta,
    #[default]
    Devnet,
    Testnet,
    Localnet,
    Custom(String),
}

impl Cluster {
    pub fn name(&self) -> &str {
        match self {
            Cluster::MainnetBeta => "mainnet-beta",
            Cluster::Devnet => "devnet",
            Cluster::Testnet => "testnet",
            Cluster::Localnet => "localnet",
            Cluster::Custom(url) => url,
        }
    }

    /// Default public RPC endpoint.
    pub fn url(&self) -> &str {
        match self {
            Cluster::MainnetBeta => "https://api.mainnet-beta.solana.com",
            Cluster::Devnet => "https://api.devnet.solana.com",
            Cluster::Testnet => "https://api.testnet.solana.com",
            Cluster::Localnet => "http://127.0.0.1:8899",
            Cluster::Custom(url) => url,
        }
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Cluster {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "mainnet-beta" => Ok(Cluster::MainnetBeta),
            "devnet" => Ok(Cluster::Devnet),
            "testnet" => Ok(Cluster::Testnet),
            "localnet" | "localhost" => Ok(Cluster::Localnet),
            lower if lower.starts_with("http://") || lower.starts_with("https://") => {
                Ok(Cluster::Custom(s.to_string()))
            }
            _ => Err(format!(
                "unknown cluster {s:?}; expected mainnet-beta, devnet, testnet, \
                 localnet or an http(s) URL"
            )),
        }
    }
}

impl TryFrom<String> for Cluster {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Cluster> for String {
    fn from(cluster: Cluster) -> Self {
        cluster.name().to_string()
    }
}
