//! NFT minting on an EVM chain
//!
//! The traceability contract is an ERC-721 exposing `safeMint(to, uri)`.
//! A mint is submitted and confirmed in two calls so the caller can store the
//! transaction hash in between. The minted token id is read back from the
//! `Transfer` event of the receipt.

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, TxHash};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

/// Delay between receipt lookups
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Lookups before a confirmation attempt gives up
const RECEIPT_POLL_ATTEMPTS: u32 = 30;

sol! {
    #[sol(rpc)]
    contract TraceabilityNft {
        event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);

        function safeMint(address to, string memory uri) external;
    }
}

/// Result of a successful mint
#[derive(Debug, Clone, PartialEq)]
pub struct MintReceipt {
    pub transaction_hash: String,
    pub block_number: Option<u64>,
    pub token_id: String,
}

/// Blockchain client used by the anchoring pipeline
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Broadcast `safeMint(to, token_uri)`; returns the transaction hash
    async fn submit_mint(&self, to: &str, token_uri: &str) -> Result<String>;

    /// Wait for the receipt of a submitted mint and read the token id
    async fn confirm_mint(&self, tx_hash: &str) -> Result<MintReceipt>;

    /// Address of the minting contract, as configured
    fn contract_address(&self) -> &str;
}

/// alloy-backed client for the traceability contract
pub struct EvmChainClient {
    rpc_url: String,
    private_key: String,
    contract_address: String,
    contract: Address,
}

impl EvmChainClient {
    /// Validate the configuration up front; no network access
    pub fn new(rpc_url: &str, private_key: &str, contract_address: &str) -> Result<Self> {
        let _ = private_key
            .parse::<PrivateKeySigner>()
            .map_err(|e| anyhow!("Invalid private key: {}", e))?;
        let contract = contract_address
            .parse::<Address>()
            .map_err(|e| anyhow!("Invalid contract address '{}': {}", contract_address, e))?;
        let _: reqwest::Url = rpc_url
            .parse()
            .with_context(|| format!("Invalid RPC URL '{}'", rpc_url))?;

        Ok(Self {
            rpc_url: rpc_url.to_string(),
            private_key: private_key.to_string(),
            contract_address: contract_address.to_string(),
            contract,
        })
    }

    fn rpc_url(&self) -> Result<reqwest::Url> {
        self.rpc_url
            .parse()
            .map_err(|e| anyhow!("Invalid RPC URL: {}", e))
    }
}

#[async_trait]
impl ChainClient for EvmChainClient {
    async fn submit_mint(&self, to: &str, token_uri: &str) -> Result<String> {
        let recipient = to
            .parse::<Address>()
            .map_err(|e| anyhow!("Invalid recipient address '{}': {}", to, e))?;

        let signer = self
            .private_key
            .parse::<PrivateKeySigner>()
            .map_err(|e| anyhow!("Invalid private key: {}", e))?;
        let wallet = EthereumWallet::from(signer);
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(self.rpc_url()?);

        let contract = TraceabilityNft::new(self.contract, &provider);

        debug!(to, token_uri, "Sending safeMint transaction");
        let pending_tx = contract
            .safeMint(recipient, token_uri.to_string())
            .send()
            .await
            .map_err(|e| anyhow!("safeMint failed: {}", e))?;

        let tx_hash = format!("0x{:x}", pending_tx.tx_hash());
        info!(tx_hash = %tx_hash, "safeMint submitted");
        Ok(tx_hash)
    }

    async fn confirm_mint(&self, tx_hash: &str) -> Result<MintReceipt> {
        let hash = tx_hash
            .parse::<TxHash>()
            .map_err(|e| anyhow!("Invalid transaction hash '{}': {}", tx_hash, e))?;
        let provider = ProviderBuilder::new().connect_http(self.rpc_url()?);

        let mut receipt = None;
        for _ in 0..RECEIPT_POLL_ATTEMPTS {
            receipt = provider
                .get_transaction_receipt(hash)
                .await
                .map_err(|e| anyhow!("Failed to get mint receipt: {}", e))?;
            if receipt.is_some() {
                break;
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
        let receipt =
            receipt.ok_or_else(|| anyhow!("Mint transaction {} not yet mined", tx_hash))?;

        if !receipt.status() {
            return Err(anyhow!("Mint transaction {} reverted", tx_hash));
        }

        let token_id = receipt
            .inner
            .logs()
            .iter()
            .find_map(|log| log.log_decode::<TraceabilityNft::Transfer>().ok())
            .map(|decoded| decoded.data().tokenId.to_string())
            .ok_or_else(|| anyhow!("Transfer event not found in mint receipt"))?;

        let result = MintReceipt {
            transaction_hash: format!("0x{:x}", receipt.transaction_hash),
            block_number: receipt.block_number,
            token_id,
        };
        info!(
            token_id = %result.token_id,
            tx_hash = %result.transaction_hash,
            "NFT minted"
        );
        Ok(result)
    }

    fn contract_address(&self) -> &str {
        &self.contract_address
    }
}

/// Explorer page of a minted token
pub fn explorer_url(explorer_base_url: &str, contract_address: &str, token_id: &str) -> String {
    format!(
        "{}/token/{}/instance/{}",
        explorer_base_url.trim_end_matches('/'),
        contract_address,
        token_id
    )
}
