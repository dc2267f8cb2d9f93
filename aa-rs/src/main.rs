mod account;
mod bundler;
mod client;
mod config;
mod contracts;
mod encoding;
mod error;
mod middleware;
mod paymaster;
mod predictor;
mod rpc;
#[cfg(test)]
mod testing;
mod types;

use account::{AccountParams, SmartAccount};
use anyhow::{anyhow, Context, Result};
use bundler::BundlerClient;
use clap::{Args, Parser, Subcommand};
use client::{SendOptions, SubmissionClient, DEFAULT_WAIT_INTERVAL};
use config::{AccountConfig, CliOverrides};
use error::AccountError;
use ethers::prelude::*;
use middleware::{UserOperationMiddleware, VerifyingPaymaster};
use paymaster::PaymasterClient;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use types::{UserOperation, UserOperationOverrides};

// In machine mode (`--json`) stdout carries exactly one JSON document, so all
// human-readable output goes to stderr.
macro_rules! outln {
    ($machine_mode:expr, $($arg:tt)*) => {{
        if $machine_mode {
            eprintln!($($arg)*);
        } else {
            println!($($arg)*);
        }
    }};
}

#[derive(Parser, Debug)]
#[command(name = "smart-account-aa", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the counterfactual smart account address (and deployment status).
    Address(AddressArgs),

    /// Build, sign and send a UserOperation that calls `to` with `value` and `data`.
    Transfer(TransferArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Optional network profile JSON (chainId, rpc, bundler, entryPoint, factory, paymaster).
    #[arg(long, env = "AA_NETWORK")]
    network: Option<PathBuf>,

    /// Node RPC URL (overrides the profile).
    #[arg(long, env = "AA_RPC_URL")]
    rpc: Option<String>,

    /// Bundler RPC URL (must support ERC-4337 JSON-RPC methods). Defaults to the node RPC URL.
    #[arg(long, env = "AA_BUNDLER_URL")]
    bundler: Option<String>,

    /// EntryPoint address. Defaults to the canonical v0.6 deployment.
    #[arg(long, env = "AA_ENTRYPOINT")]
    entrypoint: Option<String>,

    /// Smart account factory address.
    #[arg(long, env = "AA_FACTORY")]
    factory: Option<String>,

    /// Owner private key.
    ///
    /// Recommended: set via env var AA_SIGNING_KEY.
    #[arg(long, env = "AA_SIGNING_KEY", hide_env_values = true)]
    signing_key: String,

    /// CREATE2 salt for the smart account.
    #[arg(long, default_value_t = 0)]
    salt: u64,

    /// Paymaster RPC URL (`pm_sponsorUserOperation`).
    #[arg(long, env = "AA_PAYMASTER_URL")]
    paymaster_url: Option<String>,

    /// Paymaster context JSON (defaults to `{"type":"payg"}`).
    #[arg(long, env = "AA_PAYMASTER_CONTEXT")]
    paymaster_context: Option<String>,

    /// Gas price multiplier in basis points (e.g. 15000 = 1.5x).
    ///
    /// Applied to maxFeePerGas and maxPriorityFeePerGas.
    #[arg(long, default_value_t = 10000, env = "AA_GAS_MULTIPLIER_BPS")]
    gas_multiplier_bps: u64,
}

#[derive(Args, Debug)]
struct AddressArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Print a single JSON object to stdout:
    /// `{ "owner": "0x...", "smartAccount": "0x...", "isDeployed": bool, "isOwner": bool|null }`
    ///
    /// All other output is written to stderr.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct TransferArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Call target.
    #[arg(long)]
    to: String,

    /// Value to send, in ETH (decimal string).
    #[arg(long, default_value = "0")]
    value_eth: String,

    /// Calldata for the inner call (hex).
    #[arg(long, default_value = "0x")]
    data: String,

    /// Sponsor gas through the configured paymaster.
    #[arg(long, default_value_t = false)]
    sponsor_gas: bool,

    /// Do not send the UserOperation; only build, estimate and sign.
    #[arg(long)]
    dry_run: bool,

    /// Do not wait for the userOp receipt.
    #[arg(long)]
    no_wait: bool,

    /// Max seconds to wait for the userOp receipt.
    #[arg(long, default_value_t = 30)]
    max_wait_seconds: u64,

    /// Pin maxFeePerGas (gwei, decimal string) instead of deriving it from the network.
    #[arg(long)]
    max_fee_gwei: Option<String>,

    /// Pin maxPriorityFeePerGas (gwei, decimal string).
    #[arg(long)]
    max_priority_fee_gwei: Option<String>,

    /// Pin callGasLimit instead of using the bundler/paymaster value.
    #[arg(long)]
    call_gas_limit: Option<u64>,
}

impl TransferArgs {
    fn overrides(&self) -> Result<UserOperationOverrides> {
        Ok(UserOperationOverrides {
            max_fee_per_gas: self
                .max_fee_gwei
                .as_deref()
                .map(|v| parse_gwei(v, "--max-fee-gwei"))
                .transpose()?,
            max_priority_fee_per_gas: self
                .max_priority_fee_gwei
                .as_deref()
                .map(|v| parse_gwei(v, "--max-priority-fee-gwei"))
                .transpose()?,
            call_gas_limit: self.call_gas_limit.map(U256::from),
            ..Default::default()
        })
    }
}

fn parse_gwei(value: &str, flag: &str) -> Result<U256> {
    let parsed = ethers::utils::parse_units(value, "gwei")
        .with_context(|| format!("invalid {flag} value: {value}"))?;
    Ok(parsed.into())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        // Logs always go to stderr so stdout stays usable for scripts.
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Address(args) => cmd_address(args).await,
        Command::Transfer(args) => cmd_transfer(args).await,
    }
}

struct Session {
    cfg: AccountConfig,
    account: SmartAccount<Provider<Http>>,
    bundler: Arc<BundlerClient>,
}

async fn connect(common: &CommonArgs, sponsor_gas: bool) -> Result<Session> {
    let profile = match common.network.as_ref() {
        Some(path) => config::load_profile(path)?,
        None => Default::default(),
    };
    let cfg = config::resolve(
        &profile,
        CliOverrides {
            rpc: common.rpc.clone(),
            bundler: common.bundler.clone(),
            entry_point: common.entrypoint.clone(),
            factory: common.factory.clone(),
            paymaster_url: common.paymaster_url.clone(),
            paymaster_context: common.paymaster_context.clone(),
            salt: common.salt,
        },
    )?;

    let provider =
        Provider::<Http>::try_from(cfg.rpc_url.as_str())?.interval(Duration::from_millis(350));

    if let Some(expected) = cfg.chain_id {
        let chain_id = provider
            .get_chainid()
            .await
            .context("eth_chainId failed")?
            .as_u64();
        if chain_id != expected {
            return Err(anyhow!(
                "chainId mismatch: network profile has {}, RPC returned {}",
                expected,
                chain_id
            ));
        }
    }

    let wallet: LocalWallet = common
        .signing_key
        .trim()
        .parse()
        .map_err(|_| anyhow!("invalid --signing-key (expected a 32-byte hex private key)"))?;

    let bundler = Arc::new(BundlerClient::new(cfg.bundler_url.clone()));

    let paymaster: Option<Arc<dyn UserOperationMiddleware>> = if sponsor_gas {
        let pm = cfg.paymaster.as_ref().ok_or_else(|| {
            anyhow!("--sponsor-gas requires --paymaster-url (or AA_PAYMASTER_URL, or paymaster.url in the network profile)")
        })?;
        Some(Arc::new(VerifyingPaymaster::new(
            Arc::new(PaymasterClient::new(pm.url.clone())),
            pm.context.clone(),
        )))
    } else {
        None
    };

    let account = SmartAccount::init(
        wallet,
        Arc::new(provider),
        bundler.clone(),
        AccountParams {
            entry_point: cfg.entry_point,
            factory: cfg.factory,
            salt: cfg.salt,
            gas_multiplier_bps: common.gas_multiplier_bps.max(1),
        },
        paymaster,
    )
    .await?;

    Ok(Session {
        cfg,
        account,
        bundler,
    })
}

async fn cmd_address(args: AddressArgs) -> Result<()> {
    let machine_mode = args.json;
    let Session { cfg, account, .. } = connect(&args.common, false).await?;

    let deployed = account.is_deployed().await?;
    let is_owner = if deployed {
        let trusted = account.account_entry_point().await?;
        if trusted != cfg.entry_point {
            tracing::warn!(
                account_entry_point = ?trusted,
                configured = ?cfg.entry_point,
                "deployed account trusts a different EntryPoint"
            );
        }
        Some(account.is_owner(account.owner()).await?)
    } else {
        None
    };

    if args.json {
        let out = serde_json::json!({
            "owner": encoding::fmt_address(account.owner()),
            "smartAccount": encoding::fmt_address(account.sender()),
            "isDeployed": deployed,
            "isOwner": is_owner,
        });
        println!("{}", out);
    }

    outln!(machine_mode, "chainId:        {}", account.chain_id());
    outln!(machine_mode, "entryPoint:     {}", encoding::fmt_address(cfg.entry_point));
    outln!(machine_mode, "factory:        {}", encoding::fmt_address(cfg.factory));
    outln!(machine_mode, "owner:          {}", encoding::fmt_address(account.owner()));
    outln!(machine_mode, "smartAccount:   {}", encoding::fmt_address(account.sender()));
    outln!(machine_mode, "isDeployed:     {}", deployed);
    if !deployed {
        outln!(
            machine_mode,
            "initCode:       {}",
            encoding::fmt_bytes(account.init_code())
        );
    }
    if let Some(is_owner) = is_owner {
        outln!(machine_mode, "isOwner:        {}", is_owner);
    }

    Ok(())
}

async fn cmd_transfer(args: TransferArgs) -> Result<()> {
    let machine_mode = false;
    let to: Address = args
        .to
        .parse()
        .map_err(|_| anyhow!("invalid --to address: {}", args.to))?;
    let value = ethers::utils::parse_ether(args.value_eth.as_str())
        .with_context(|| format!("invalid --value-eth value: {}", args.value_eth))?;
    let data = encoding::parse_bytes(&args.data).context("invalid --data hex")?;
    let overrides = args.overrides()?;

    let Session {
        cfg,
        account,
        bundler,
    } = connect(&args.common, args.sponsor_gas).await?;

    outln!(machine_mode, "owner:          {}", encoding::fmt_address(account.owner()));
    outln!(machine_mode, "smartAccount:   {}", encoding::fmt_address(account.sender()));
    outln!(machine_mode, "bundler:        {}", cfg.bundler_url);
    outln!(
        machine_mode,
        "pipeline:       {}",
        account.pipeline().step_names().join(" -> ")
    );

    let submitter = SubmissionClient::new(bundler, cfg.entry_point).with_wait(
        DEFAULT_WAIT_INTERVAL,
        Duration::from_secs(args.max_wait_seconds),
    );

    let pending = account.execute(to, value, data).with_overrides(overrides);
    let print_op = |op: &UserOperation| {
        let rendered = serde_json::to_string_pretty(&encoding::user_op_to_json(op))
            .unwrap_or_else(|e| format!("<unprintable user operation: {e}>"));
        outln!(machine_mode, "\nUserOperation (signed):\n{}", rendered);
    };

    let res = submitter
        .send_user_operation(
            &pending,
            SendOptions {
                dry_run: args.dry_run,
                on_build: Some(Box::new(print_op)),
            },
        )
        .await?;

    if res.is_dry_run() {
        outln!(
            machine_mode,
            "\n--dry-run set: not sending user operation (userOpHash would be {}).",
            encoding::fmt_h256(res.user_op_hash)
        );
        return Ok(());
    }

    outln!(
        machine_mode,
        "\nuserOpHash: {}",
        encoding::fmt_h256(res.user_op_hash)
    );

    if args.no_wait {
        outln!(machine_mode, "--no-wait set: not waiting for receipt.");
        return Ok(());
    }

    match res.wait_for_inclusion().await {
        Ok(receipt) => {
            if receipt.user_op_hash != res.user_op_hash {
                tracing::warn!(
                    expected = ?res.user_op_hash,
                    got = ?receipt.user_op_hash,
                    "bundler returned a receipt for a different userOpHash"
                );
            }
            outln!(
                machine_mode,
                "transaction:    {}",
                encoding::fmt_h256(receipt.receipt.transaction_hash)
            );
            if let Some(block) = receipt.receipt.block_number {
                outln!(machine_mode, "blockNumber:    {}", block);
            }
            outln!(machine_mode, "sender:         {}", encoding::fmt_address(receipt.sender));
            outln!(machine_mode, "nonce:          {}", receipt.nonce);
            if let Some(pm) = receipt.paymaster.filter(|pm| !pm.is_zero()) {
                outln!(machine_mode, "paymaster:      {}", encoding::fmt_address(pm));
            }
            outln!(machine_mode, "success:        {}", receipt.success);
            outln!(machine_mode, "actualGasUsed:  {}", receipt.actual_gas_used);
            outln!(
                machine_mode,
                "actualGasCost:  {}",
                encoding::fmt_u256(receipt.actual_gas_cost)
            );
            if let Some(reason) = receipt.reason.filter(|r| !r.is_empty()) {
                outln!(machine_mode, "reason:         {}", reason);
            }
        }
        Err(AccountError::InclusionTimeout { waited, .. }) => {
            outln!(
                machine_mode,
                "no receipt after {}s; the operation may still be included later.",
                waited.as_secs()
            );
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
