use crate::{
    chains::{ChainClient, PendingTx, ReadCall, WriteCall},
    config::{is_local_chain, NetworkConfig},
    errors::PipelineError,
    retry::{first_ok, Backoff},
    types::{CallResult, CallStatus},
};
use alloy::{
    consensus::{SignableTransaction as _, TxEip1559, TxEnvelope, TxLegacy},
    network::TransactionBuilder as _,
    primitives::{Address, Bytes, TxKind, B256, U256},
    providers::{Provider as _, RootProvider},
    rpc::types::{BlockNumberOrTag, TransactionReceipt, TransactionRequest},
    signers::{local::PrivateKeySigner, SignerSync as _},
};
use async_trait::async_trait;
use eyre::{Context as _, ContextCompat as _};
use reqwest::Client;
use secrecy::{ExposeSecret as _, SecretString};
use std::{str::FromStr as _, time::Duration};
use tokio::time::sleep;

const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_RPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Hardhat/Anvil development account #0. Only ever used on the local chain id.
const LOCAL_DEV_PRIVATE_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

type EvmProvider = RootProvider;

/// Resolve the signing key: explicit key first, the development key on a local fork.
pub fn load_signer(chain_id: u64, key: Option<&SecretString>) -> eyre::Result<PrivateKeySigner> {
    match key {
        Some(k) => PrivateKeySigner::from_str(k.expose_secret().trim())
            .context("parse AAVE_PIPELINE_PRIVATE_KEY"),
        None if is_local_chain(chain_id) => {
            PrivateKeySigner::from_str(LOCAL_DEV_PRIVATE_KEY).context("parse dev key")
        }
        None => eyre::bail!(
            "no signing key for chain {chain_id}; set AAVE_PIPELINE_PRIVATE_KEY"
        ),
    }
}

/// Fee split for EIP-1559: priority is max(1.5 gwei, gas_price / 10) and the cap leaves
/// room for the base fee to double.
pub fn compute_eip1559_fees(base_fee: u128, gas_price: u128) -> (u128, u128) {
    let min_priority: u128 = 1_500_000_000;
    let priority = std::cmp::max(min_priority, gas_price / 10);
    let max_fee = base_fee
        .saturating_mul(2)
        .saturating_add(priority)
        .max(base_fee.saturating_add(priority));
    (max_fee, priority)
}

/// Fill fee fields, preferring EIP-1559 when the chain reports a base fee.
/// A request that already carries fees is returned untouched.
pub fn apply_fee_policy(
    mut tx: TransactionRequest,
    base_fee: Option<u128>,
    gas_price: u128,
) -> TransactionRequest {
    if tx.max_fee_per_gas.is_some() || tx.gas_price.is_some() {
        return tx;
    }
    match base_fee {
        Some(base_fee) => {
            let (max_fee, priority) = compute_eip1559_fees(base_fee, gas_price);
            tx.max_fee_per_gas = Some(max_fee);
            tx.max_priority_fee_per_gas = Some(priority);
        }
        None => tx.gas_price = Some(gas_price),
    }
    tx
}

fn broadcast_err_is_ok(err: &eyre::Report) -> bool {
    let s = format!("{err:#}").to_lowercase();
    s.contains("already known")
        || s.contains("known transaction")
        || s.contains("already imported")
        || s.contains("already in mempool")
}

fn sign_request(signer: &PrivateKeySigner, tx: &TransactionRequest) -> eyre::Result<(TxEnvelope, B256)> {
    let to = tx.to.unwrap_or(TxKind::Create);
    let value = tx.value.unwrap_or(U256::ZERO);
    let input = tx.input.clone().into_input().unwrap_or_default();
    let nonce = tx.nonce.context("nonce not set")?;
    let gas_limit = tx.gas.context("gas limit not set")?;
    let chain_id = tx.chain_id.context("chain id not set")?;

    if let Some(max_fee_per_gas) = tx.max_fee_per_gas {
        let unsigned = TxEip1559 {
            chain_id,
            nonce,
            gas_limit,
            max_fee_per_gas,
            max_priority_fee_per_gas: tx.max_priority_fee_per_gas.unwrap_or(0),
            to,
            value,
            input,
            access_list: tx.access_list.clone().unwrap_or_default(),
        };
        let sig = signer
            .sign_hash_sync(&unsigned.signature_hash())
            .context("sign eip1559")?;
        let signed = unsigned.into_signed(sig);
        let hash = *signed.hash();
        Ok((TxEnvelope::Eip1559(signed), hash))
    } else {
        let unsigned = TxLegacy {
            chain_id: Some(chain_id),
            nonce,
            gas_price: tx.gas_price.unwrap_or(0),
            gas_limit,
            to,
            value,
            input,
        };
        let sig = signer
            .sign_hash_sync(&unsigned.signature_hash())
            .context("sign legacy")?;
        let signed = unsigned.into_signed(sig);
        let hash = *signed.hash();
        Ok((TxEnvelope::Legacy(signed), hash))
    }
}

fn rpc_err(e: &eyre::Report) -> PipelineError {
    PipelineError::classify_rpc(e)
}

/// `ChainClient` over JSON-RPC with a local signer.
#[derive(Debug, Clone)]
pub struct EvmClient {
    pub network: String,
    pub chain_id: u64,
    pub rpc_url: String,
    pub fallback_rpc_urls: Vec<String>,
    pub poll_interval: Duration,
    backoff: Backoff,
    signer: PrivateKeySigner,
}

impl EvmClient {
    pub fn new(
        network: &str,
        cfg: &NetworkConfig,
        signer: PrivateKeySigner,
        poll_interval: Duration,
    ) -> Self {
        Self {
            network: network.to_owned(),
            chain_id: cfg.chain_id,
            rpc_url: cfg.rpc_url.clone(),
            fallback_rpc_urls: cfg.fallback_rpc_urls.clone(),
            poll_interval,
            backoff: Backoff::default(),
            signer,
        }
    }

    fn provider_for_url(url: &str) -> eyre::Result<EvmProvider> {
        let u: reqwest::Url = url
            .parse()
            .with_context(|| format!("invalid rpc url: {url}"))?;
        let client = Client::builder()
            .timeout(DEFAULT_RPC_TIMEOUT)
            .connect_timeout(DEFAULT_RPC_CONNECT_TIMEOUT)
            .build()
            .context("build rpc http client")?;
        let http = alloy::transports::http::Http::with_client(client, u);
        let rpc_client = alloy::rpc::client::RpcClient::new(http, false);
        Ok(RootProvider::new(rpc_client))
    }

    /// Primary first, then fallbacks, trimmed and de-duplicated.
    fn endpoints(&self) -> Vec<String> {
        let mut urls: Vec<String> = Vec::with_capacity(1 + self.fallback_rpc_urls.len());
        for u in std::iter::once(&self.rpc_url).chain(&self.fallback_rpc_urls) {
            let t = u.trim();
            if !t.is_empty() && !urls.iter().any(|x| x == t) {
                urls.push(t.to_owned());
            }
        }
        urls
    }

    async fn read<T, Fut>(
        &self,
        label: &'static str,
        f: impl Fn(EvmProvider) -> Fut + Sync,
    ) -> eyre::Result<T>
    where
        T: Send,
        Fut: std::future::Future<Output = eyre::Result<T>> + Send,
    {
        let urls = self.endpoints();
        first_ok(
            &urls,
            &self.backoff,
            |u| {
                let u = u.clone();
                let f = &f;
                async move { f(Self::provider_for_url(&u)?).await }
            },
            label,
        )
        .await
    }

    async fn pick_healthy_provider(&self) -> eyre::Result<EvmProvider> {
        let urls = self.endpoints();
        first_ok(
            &urls,
            &self.backoff,
            |u| {
                let u = u.clone();
                async move {
                    let p = Self::provider_for_url(&u)?;
                    p.get_block_number().await.context("get block number")?;
                    Ok(p)
                }
            },
            "select rpc",
        )
        .await
    }

    /// Populate fees, nonce and gas, sign once, then broadcast the same raw bytes to every
    /// endpoint until one accepts it.
    async fn send_tx(&self, mut tx: TransactionRequest) -> eyre::Result<B256> {
        let provider = self.pick_healthy_provider().await?;
        let from = self.signer.address();
        tx.chain_id = Some(self.chain_id);
        tx.from = Some(from);

        let base_fee = provider
            .get_block_by_number(BlockNumberOrTag::Pending)
            .await
            .ok()
            .flatten()
            .and_then(|b| b.header.base_fee_per_gas.map(u128::from));
        let gas_price = provider.get_gas_price().await.context("get gas price")?;
        tx = apply_fee_policy(tx, base_fee, gas_price);

        let nonce = provider
            .get_transaction_count(from)
            .pending()
            .await
            .context("get nonce")?;
        tx.nonce = Some(nonce);

        // Reverts surface here, before anything is broadcast.
        let gas = provider
            .estimate_gas(tx.clone())
            .await
            .context("estimate gas")?;
        tx.gas = Some(gas.saturating_mul(120) / 100);

        let (envelope, tx_hash) = sign_request(&self.signer, &tx).context("sign tx")?;
        let raw = alloy::eips::eip2718::Encodable2718::encoded_2718(&envelope);

        let urls = self.endpoints();
        first_ok(
            &urls,
            &self.backoff,
            |u| {
                let u = u.clone();
                let raw = raw.clone();
                async move {
                    let p = Self::provider_for_url(&u)?;
                    match p.send_raw_transaction(&raw).await {
                        Ok(_pending) => Ok(()),
                        Err(e) => {
                            let report: eyre::Report = e.into();
                            if broadcast_err_is_ok(&report) {
                                Ok(())
                            } else {
                                Err(report).context("broadcast raw tx")
                            }
                        }
                    }
                }
            },
            "send transaction",
        )
        .await?;

        Ok(tx_hash)
    }

    async fn receipt(&self, tx: B256) -> eyre::Result<Option<TransactionReceipt>> {
        self.read("get tx receipt", |p| async move {
            p.get_transaction_receipt(tx)
                .await
                .context("get transaction receipt")
        })
        .await
    }

    /// One look at the receipt and head. `None` while unmined or not yet `depth` deep.
    async fn poll_confirmation(&self, tx: B256, depth: u64) -> eyre::Result<Option<CallResult>> {
        let Some(r) = self.receipt(tx).await? else {
            return Ok(None);
        };
        let Some(mined_in) = r.block_number else {
            return Ok(None);
        };
        let gas_used = Some(r.gas_used);
        if !r.status() {
            return Ok(Some(CallResult {
                status: CallStatus::Reverted,
                tx_hash: tx,
                block_number: Some(mined_in),
                confirmations: 1,
                gas_used,
            }));
        }
        let head = self.block_number().await?;
        let confirmations = head.saturating_sub(mined_in).saturating_add(1);
        Ok((confirmations >= depth).then_some(CallResult {
            status: CallStatus::Confirmed,
            tx_hash: tx,
            block_number: Some(mined_in),
            confirmations,
            gas_used,
        }))
    }

    async fn block_number(&self) -> eyre::Result<u64> {
        self.read("get block number", |p| async move {
            p.get_block_number().await.context("get block number")
        })
        .await
    }
}

#[async_trait]
impl ChainClient for EvmClient {
    fn current_account(&self) -> Address {
        self.signer.address()
    }

    async fn submit(&self, call: WriteCall) -> Result<PendingTx, PipelineError> {
        let tx = TransactionRequest::default()
            .with_to(call.to)
            .with_input(call.data)
            .with_value(call.value);
        tracing::debug!(network = %self.network, label = call.label, to = %call.to, "submitting");
        let tx_hash = self.send_tx(tx).await.map_err(|e| rpc_err(&e))?;
        Ok(PendingTx { tx_hash })
    }

    async fn wait_for_confirmations(
        &self,
        pending: &PendingTx,
        depth: u64,
    ) -> Result<CallResult, PipelineError> {
        let depth = depth.max(1);
        // The tx is already broadcast: transport errors only delay the answer.
        loop {
            match self.poll_confirmation(pending.tx_hash, depth).await {
                Ok(Some(result)) => return Ok(result),
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    network = %self.network,
                    tx = %pending.tx_hash,
                    error = %format!("{e:#}"),
                    "confirmation poll failed; retrying"
                ),
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn call(&self, call: ReadCall) -> Result<Bytes, PipelineError> {
        let ReadCall { to, data } = call;
        self.read("eth_call", |p| {
            let data = data.clone();
            async move {
                let req = TransactionRequest::default().with_to(to).with_input(data);
                p.call(req).await.context("eth_call")
            }
        })
        .await
        .map_err(|e| rpc_err(&e))
    }

    async fn latest_block_timestamp(&self) -> Result<u64, PipelineError> {
        self.read("latest block", |p| async move {
            let block = p
                .get_block_by_number(BlockNumberOrTag::Latest)
                .await
                .context("get latest block")?
                .ok_or_else(|| eyre::eyre!("node returned no latest block"))?;
            Ok(block.header.timestamp)
        })
        .await
        .map_err(|e| rpc_err(&e))
    }

    async fn native_balance(&self, account: Address) -> Result<U256, PipelineError> {
        self.read("get balance", |p| async move {
            p.get_balance(account).await.context("get balance")
        })
        .await
        .map_err(|e| rpc_err(&e))
    }
}
