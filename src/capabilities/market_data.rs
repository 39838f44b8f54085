//! Derivatives and on-chain market data
//!
//! Funding, open interest and liquidations come from the public CoinGlass
//! endpoints. Exchange flows need a CryptoQuant key.

use super::{http::fetch_json, Capability};
use crate::Result;
use chrono::Utc;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

const COINGLASS_BASE_URL: &str = "https://open-api.coinglass.com/public/v2";
const CRYPTOQUANT_BASE_URL: &str = "https://api.cryptoquant.com/v1";

const DESCRIPTION: &str = "Advanced crypto market data (funding rates, open interest, liquidations, exchange flows).
Input: \"<SYMBOL> <TYPE>\" where TYPE is one of funding, open_interest (oi), liquidation (liq), flows (exchange_flows).
Examples: \"BTCUSDT funding\", \"ETHUSDT oi\", \"BTCUSDT liquidation\"";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketDataKind {
    Funding,
    OpenInterest,
    Liquidation,
    ExchangeFlows,
}

impl MarketDataKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "funding" => Some(Self::Funding),
            "open_interest" | "oi" => Some(Self::OpenInterest),
            "liquidation" | "liq" => Some(Self::Liquidation),
            "flows" | "exchange_flows" => Some(Self::ExchangeFlows),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Funding => "funding",
            Self::OpenInterest => "open interest",
            Self::Liquidation => "liquidation",
            Self::ExchangeFlows => "exchange flows",
        }
    }
}

/// A parsed `"<SYMBOL> <TYPE>"` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketDataRequest {
    pub symbol: String,
    pub kind: MarketDataKind,
}

impl MarketDataRequest {
    /// Parse the capability input, or return the usage text to show the model.
    pub fn parse(input: &str) -> std::result::Result<Self, String> {
        let mut parts = input.split_whitespace();
        let (Some(symbol), Some(kind)) = (parts.next(), parts.next()) else {
            return Err("Format: SYMBOL TYPE (e.g. BTCUSDT funding)".to_string());
        };

        let kind = MarketDataKind::parse(kind).ok_or_else(|| {
            format!(
                "Unsupported data type: {}. Available types: funding, open_interest, liquidation, flows",
                kind.to_lowercase()
            )
        })?;

        Ok(Self {
            symbol: symbol.to_uppercase(),
            kind,
        })
    }

    /// Base coin of the pair, as CoinGlass expects it.
    pub fn coin(&self) -> String {
        self.symbol.replace("USDT", "").replace("USD", "")
    }
}

pub struct MarketDataCapability {
    client: Client,
    cryptoquant_api_key: Option<String>,
}

impl MarketDataCapability {
    pub fn new(client: Client, cryptoquant_api_key: Option<String>) -> Self {
        Self {
            client,
            cryptoquant_api_key,
        }
    }

    async fn fetch(&self, request: &MarketDataRequest) -> Result<Option<String>> {
        let coin = request.coin();

        if request.kind == MarketDataKind::ExchangeFlows {
            let Some(key) = &self.cryptoquant_api_key else {
                return Ok(Some("CryptoQuant API key not configured (CRYPTOQUANT_API_KEY)".to_string()));
            };
            let url = format!("{}/{}/exchange-flows", CRYPTOQUANT_BASE_URL, coin.to_lowercase());
            let body = fetch_json(
                self.client
                    .get(url)
                    .bearer_auth(key)
                    .query(&[("exchange", "all"), ("window", "24h")]),
            )
            .await?;
            return Ok(body.map(|b| format_exchange_flows(&coin, &b)));
        }

        let endpoint = match request.kind {
            MarketDataKind::Funding => "funding",
            MarketDataKind::OpenInterest => "open_interest",
            _ => "liquidation",
        };

        debug!(symbol = %request.symbol, endpoint, "Fetching CoinGlass data");

        let body = fetch_json(
            self.client
                .get(format!("{}/{}", COINGLASS_BASE_URL, endpoint))
                .header("accept", "application/json")
                .query(&[("symbol", coin.as_str())]),
        )
        .await?;

        Ok(body.and_then(|b| format_coinglass(request, &b)))
    }
}

#[async_trait::async_trait]
impl Capability for MarketDataCapability {
    fn name(&self) -> &str {
        "market_data"
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    async fn execute(&self, input: &str) -> Result<String> {
        let request = match MarketDataRequest::parse(input) {
            Ok(request) => request,
            Err(usage) => return Ok(usage),
        };

        Ok(match self.fetch(&request).await {
            Ok(Some(text)) => text,
            Ok(None) => format!(
                "{} data not available for {}",
                capitalize(request.kind.label()),
                request.symbol
            ),
            Err(e) => format!("Failed to fetch {} for {}: {}", request.kind.label(), request.symbol, e),
        })
    }
}

/// Render the first CoinGlass record, or `None` when the payload is empty.
fn format_coinglass(request: &MarketDataRequest, body: &Value) -> Option<String> {
    let record = body["data"].as_array()?.first()?;
    let exchange = field(&record["exchangeName"]);
    let symbol = &request.symbol;

    let text = match request.kind {
        MarketDataKind::Funding => format!(
            "Funding rate for {}:\n- Funding Rate: {}%\n- Exchange: {}\n- Timestamp: {}\n",
            symbol,
            field(&record["uMarginList"][0]["rate"]),
            exchange,
            Utc::now().format("%Y-%m-%d %H:%M UTC"),
        ),
        MarketDataKind::OpenInterest => format!(
            "Open interest for {}:\n- Open Interest: ${}\n- Exchange: {}\n- Change 24h: {}%\n",
            symbol,
            field(&record["openInterest"]),
            exchange,
            field(&record["change24h"]),
        ),
        MarketDataKind::Liquidation => format!(
            "Liquidations for {}:\n- Liquidations 24h: ${}\n- Long: ${}\n- Short: ${}\n",
            symbol,
            field(&record["liquidation24h"]),
            field(&record["longLiquidation"]),
            field(&record["shortLiquidation"]),
        ),
        MarketDataKind::ExchangeFlows => return None,
    };

    Some(text)
}

fn format_exchange_flows(coin: &str, body: &Value) -> String {
    let pretty = serde_json::to_string_pretty(body).unwrap_or_else(|_| body.to_string());
    format!("Exchange flows for {} (24h, all exchanges):\n{}\n", coin, pretty)
}

fn field(value: &Value) -> String {
    match value {
        Value::Null => "N/A".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
