use anyhow::Context;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Digest, Sha256, Sha512};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::execution::{ExecutionError, FeedError, OrderVenue, PriceFeed};
use crate::models::Side;

pub const KRAKEN_API_BASE: &str = "https://api.kraken.com";
const TICKER_PATH: &str = "/0/public/Ticker";
const ADD_ORDER_PATH: &str = "/0/private/AddOrder";

type HmacSha512 = Hmac<Sha512>;
type KrakenRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// API key pair for private endpoints
#[derive(Clone)]
pub struct KrakenCredentials {
    pub api_key: String,
    pub api_secret: String,
}

impl KrakenCredentials {
    /// Read `KRAKEN_API_KEY` / `KRAKEN_API_SECRET`
    pub fn from_env() -> Result<Self, ExecutionError> {
        let api_key = std::env::var("KRAKEN_API_KEY")
            .map_err(|_| ExecutionError::MissingCredentials("KRAKEN_API_KEY not set".into()))?;
        let api_secret = std::env::var("KRAKEN_API_SECRET").map_err(|_| {
            ExecutionError::MissingCredentials("KRAKEN_API_SECRET not set".into())
        })?;
        Ok(Self {
            api_key,
            api_secret,
        })
    }
}

impl std::fmt::Debug for KrakenCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KrakenCredentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Every Kraken REST reply wraps its payload the same way
#[derive(Debug, Deserialize)]
struct KrakenResponse<T> {
    #[serde(default)]
    error: Vec<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TickerInfo {
    /// Last trade closed: [price, lot volume]
    c: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AddOrderResult {
    #[serde(default)]
    txid: Vec<String>,
}

/// Client for the Kraken spot REST API
///
/// Cloneable; clones share the rate limiter and nonce counter.
#[derive(Clone)]
pub struct KrakenClient {
    client: Client,
    base_url: String,
    credentials: Option<KrakenCredentials>,
    rate_limiter: Arc<KrakenRateLimiter>,
    last_nonce: Arc<AtomicU64>,
}

impl KrakenClient {
    pub fn new(base_url: &str, credentials: Option<KrakenCredentials>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent(concat!("krakenbot/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        // Kraken's public tier allows roughly one call per second
        let quota = Quota::per_second(NonZeroU32::MIN);

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            last_nonce: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Replace the default one-request-per-second budget
    pub fn with_requests_per_second(mut self, per_second: NonZeroU32) -> Self {
        self.rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));
        self
    }

    /// Strictly increasing millisecond nonce
    fn next_nonce(&self) -> u64 {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let mut last = self.last_nonce.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(last + 1);
            match self.last_nonce.compare_exchange(
                last,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }

    /// Pull `result` out of a Kraken envelope, surfacing its error list
    fn unwrap_envelope<T>(body: KrakenResponse<T>) -> Result<T, String> {
        if !body.error.is_empty() {
            return Err(body.error.join(", "));
        }
        body.result.ok_or_else(|| "response has no result".to_string())
    }

    async fn read_json<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<KrakenResponse<T>, reqwest::Error> {
        response.error_for_status()?.json().await
    }

    /// Last traded price for `pair`
    pub async fn get_ticker_price(&self, pair: &str) -> Result<f64, FeedError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, TICKER_PATH);
        let response = self.client.get(&url).query(&[("pair", pair)]).send().await?;
        let body: KrakenResponse<HashMap<String, TickerInfo>> = Self::read_json(response).await?;
        let result = Self::unwrap_envelope(body).map_err(FeedError::Api)?;

        // Kraken may answer under its canonical pair name (XBTGBP -> XXBTZGBP)
        let ticker = match result.get(pair) {
            Some(t) => t,
            None if result.len() == 1 => result
                .values()
                .next()
                .ok_or_else(|| FeedError::MissingPair(pair.to_string()))?,
            None => return Err(FeedError::MissingPair(pair.to_string())),
        };

        let raw = ticker
            .c
            .first()
            .ok_or_else(|| FeedError::Parse(format!("{} ticker has no last trade", pair)))?;
        let price: f64 = raw
            .parse()
            .map_err(|_| FeedError::Parse(format!("bad price '{}' for {}", raw, pair)))?;

        if !(price.is_finite() && price > 0.0) {
            return Err(FeedError::Parse(format!("non-positive price {} for {}", price, pair)));
        }

        tracing::debug!(pair = %pair, price, "Fetched Kraken ticker");
        Ok(price)
    }

    /// Submit a market order; returns the first transaction id
    pub async fn add_market_order(
        &self,
        side: Side,
        pair: &str,
        volume: f64,
    ) -> Result<String, ExecutionError> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| ExecutionError::MissingCredentials("no API key configured".into()))?;

        self.rate_limiter.until_ready().await;

        let nonce = self.next_nonce();
        let body = format!(
            "nonce={}&ordertype=market&pair={}&type={}&volume={}",
            nonce,
            pair,
            side.as_str(),
            format_volume(volume)
        );
        let signature = sign_request(ADD_ORDER_PATH, nonce, &body, &credentials.api_secret)?;

        let url = format!("{}{}", self.base_url, ADD_ORDER_PATH);
        let response = self
            .client
            .post(&url)
            .header("API-Key", &credentials.api_key)
            .header("API-Sign", signature)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        let body: KrakenResponse<AddOrderResult> = Self::read_json(response).await?;
        let result = Self::unwrap_envelope(body).map_err(ExecutionError::Api)?;

        result
            .txid
            .into_iter()
            .next()
            .ok_or_else(|| ExecutionError::Parse("AddOrder returned no txid".to_string()))
    }
}

/// Order volume as Kraken expects it: at most 8 decimals, no trailing zeros
pub fn format_volume(volume: f64) -> String {
    let fixed = format!("{:.8}", volume);
    if !fixed.contains('.') {
        return fixed;
    }
    fixed.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// `API-Sign` header: HMAC-SHA512 of path + SHA256(nonce + body), keyed with
/// the base64-decoded secret
pub fn sign_request(
    path: &str,
    nonce: u64,
    body: &str,
    api_secret: &str,
) -> Result<String, ExecutionError> {
    let secret = BASE64
        .decode(api_secret)
        .map_err(|e| ExecutionError::MissingCredentials(format!("API secret is not base64: {}", e)))?;

    let mut sha = Sha256::new();
    sha.update(nonce.to_string().as_bytes());
    sha.update(body.as_bytes());
    let digest = sha.finalize();

    let mut mac = HmacSha512::new_from_slice(&secret)
        .map_err(|e| ExecutionError::MissingCredentials(format!("bad API secret: {}", e)))?;
    mac.update(path.as_bytes());
    mac.update(&digest);

    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl PriceFeed for KrakenClient {
    async fn get_price(&self, symbol: &str) -> Result<f64, FeedError> {
        self.get_ticker_price(symbol).await
    }
}

#[async_trait]
impl OrderVenue for KrakenClient {
    async fn place_market_order(
        &self,
        side: Side,
        symbol: &str,
        amount: f64,
    ) -> Result<String, ExecutionError> {
        self.add_market_order(side, symbol, amount).await
    }
}
