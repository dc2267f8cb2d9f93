use anyhow::{anyhow, Context, Result};
use ethers::types::{Address, U256};
use serde::Deserialize;
use serde_json::Value;
use std::{env, fs, path::Path};

/// Canonical EntryPoint v0.6 deployment (same address on every supported chain).
pub const DEFAULT_ENTRY_POINT: &str = "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789";

/// Optional network profile JSON.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkProfileRaw {
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub rpc: Option<String>,
    #[serde(default)]
    pub rpc_env_var: Option<String>,
    #[serde(default)]
    pub bundler: Option<String>,
    #[serde(default)]
    pub entry_point: Option<String>,
    #[serde(default)]
    pub factory: Option<String>,
    #[serde(default)]
    pub paymaster: Option<PaymasterProfileRaw>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterProfileRaw {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub url_env_var: Option<String>,
    #[serde(default)]
    pub context: Option<Value>,
}

/// Values supplied on the command line (or through their env vars).
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub rpc: Option<String>,
    pub bundler: Option<String>,
    pub entry_point: Option<String>,
    pub factory: Option<String>,
    pub paymaster_url: Option<String>,
    pub paymaster_context: Option<String>,
    pub salt: u64,
}

#[derive(Debug, Clone)]
pub struct PaymasterConfig {
    pub url: String,
    pub context: Value,
}

#[derive(Debug, Clone)]
pub struct AccountConfig {
    pub chain_id: Option<u64>,
    pub rpc_url: String,
    pub bundler_url: String,
    pub entry_point: Address,
    pub factory: Address,
    pub salt: U256,
    pub paymaster: Option<PaymasterConfig>,
}

pub fn load_profile(path: &Path) -> Result<NetworkProfileRaw> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read network profile at {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse network profile at {}", path.display()))
}

pub fn resolve(profile: &NetworkProfileRaw, cli: CliOverrides) -> Result<AccountConfig> {
    let rpc_url = cli
        .rpc
        .or_else(|| profile.rpc_env_var.as_ref().and_then(|k| env::var(k).ok()))
        .or_else(|| profile.rpc.clone())
        .ok_or_else(|| {
            anyhow!("no rpc url provided. pass --rpc, set AA_RPC_URL, or set rpc/rpcEnvVar in the network profile")
        })?;

    // Many bundler endpoints also proxy node RPC, so the node URL is a sensible default.
    let bundler_url = cli
        .bundler
        .or_else(|| profile.bundler.clone())
        .unwrap_or_else(|| rpc_url.clone());

    let entry_point = cli
        .entry_point
        .or_else(|| profile.entry_point.clone())
        .unwrap_or_else(|| DEFAULT_ENTRY_POINT.to_string());
    let entry_point = parse_addr(&entry_point).context("invalid entryPoint address")?;

    let factory = cli
        .factory
        .or_else(|| profile.factory.clone())
        .ok_or_else(|| anyhow!("no factory provided. pass --factory, set AA_FACTORY, or set factory in the network profile"))?;
    let factory = parse_addr(&factory).context("invalid factory address")?;

    let pm_profile = profile.paymaster.clone().unwrap_or_default();
    let paymaster_url = cli
        .paymaster_url
        .or_else(|| pm_profile.url_env_var.as_ref().and_then(|k| env::var(k).ok()))
        .or(pm_profile.url);
    let paymaster_context = match cli.paymaster_context {
        Some(s) => serde_json::from_str(&s).context("invalid --paymaster-context JSON")?,
        None => pm_profile
            .context
            .unwrap_or_else(|| serde_json::json!({ "type": "payg" })),
    };

    for url in [Some(&rpc_url), Some(&bundler_url), paymaster_url.as_ref()]
        .into_iter()
        .flatten()
    {
        if url.contains("alchemy.com/v2/") || url.contains("infura.io/v3/") {
            tracing::warn!("endpoint URL looks like it may contain an API key; prefer passing it through the environment instead of committing it.");
        }
    }

    Ok(AccountConfig {
        chain_id: profile.chain_id,
        rpc_url,
        bundler_url,
        entry_point,
        factory,
        salt: U256::from(cli.salt),
        paymaster: paymaster_url.map(|url| PaymasterConfig {
            url,
            context: paymaster_context,
        }),
    })
}

fn parse_addr(s: &str) -> Result<Address> {
    s.parse::<Address>().map_err(|e| anyhow!("{e}"))
}
