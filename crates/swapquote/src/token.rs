use alloy::primitives::{address, Address};
use async_trait::async_trait;
use eyre::Context as _;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path};

/// Sentinel address routers use for the chain's native gas token.
pub const NATIVE_TOKEN_ADDRESS: Address = address!("0xEeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE");

/// Identity and display metadata of a tradeable asset.
///
/// Field aliases accept the covalent-style token list the wallet UI already serves
/// (`contract_address`, `contract_ticker_symbol`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRef {
    #[serde(alias = "contract_address")]
    pub address: Address,
    #[serde(alias = "contract_ticker_symbol")]
    pub symbol: String,
    #[serde(default, alias = "contract_name")]
    pub name: String,
    pub decimals: u8,
    /// Unit price in the reference fiat.
    #[serde(default, alias = "quote_rate", skip_serializing_if = "Option::is_none")]
    pub fiat_rate: Option<f64>,
    #[serde(default, alias = "logo_url", skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl TokenRef {
    pub fn is_native(&self) -> bool {
        self.address == NATIVE_TOKEN_ADDRESS
    }

    /// Same asset, regardless of refreshed display metadata.
    pub fn same_asset(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

#[async_trait]
pub trait TokenResolver: Send + Sync {
    async fn resolve(&self, address: Address) -> eyre::Result<TokenRef>;
}

/// In-memory token list keyed by address.
#[derive(Debug, Clone, Default)]
pub struct TokenList {
    by_address: BTreeMap<Address, TokenRef>,
}

impl TokenList {
    pub fn new(tokens: impl IntoIterator<Item = TokenRef>) -> Self {
        let mut by_address = BTreeMap::new();
        for t in tokens {
            by_address.insert(t.address, t);
        }
        Self { by_address }
    }

    /// Load a JSON array of tokens.
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read token list {}", path.display()))?;
        let tokens: Vec<TokenRef> = serde_json::from_str(&s)
            .with_context(|| format!("parse token list {}", path.display()))?;
        Ok(Self::new(tokens))
    }

    pub fn insert(&mut self, token: TokenRef) {
        self.by_address.insert(token.address, token);
    }

    pub fn get(&self, address: &Address) -> Option<&TokenRef> {
        self.by_address.get(address)
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }

    /// Look a token up by address, or by symbol (case-insensitive) when unambiguous.
    pub fn find(&self, query: &str) -> eyre::Result<TokenRef> {
        let q = query.trim();
        if let Ok(addr) = q.parse::<Address>() {
            return self
                .get(&addr)
                .cloned()
                .ok_or_else(|| eyre::eyre!("token not in list: {addr:#x}"));
        }

        let mut hits = self
            .by_address
            .values()
            .filter(|t| t.symbol.eq_ignore_ascii_case(q));
        match (hits.next(), hits.next()) {
            (Some(t), None) => Ok(t.clone()),
            (Some(_), Some(_)) => eyre::bail!("symbol {q} is ambiguous; use the token address"),
            (None, _) => eyre::bail!("unknown token: {q}"),
        }
    }
}

#[async_trait]
impl TokenResolver for TokenList {
    async fn resolve(&self, address: Address) -> eyre::Result<TokenRef> {
        self.get(&address)
            .cloned()
            .ok_or_else(|| eyre::eyre!("token not in list: {address:#x}"))
    }
}
