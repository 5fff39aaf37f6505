//! HTTP price feed client (CoinGecko-style simple price API).

use std::collections::HashMap;
use std::time::Duration;

use log::debug;

use crate::config::FeedConfig;
use crate::error::{Error, Result};
use crate::gateway::PriceSource;
use crate::portfolio::PriceMap;
use crate::token::{Symbol, Token};

/// Response shape of `/simple/price`: feed id -> currency -> price.
type RawQuotes = HashMap<String, HashMap<String, f64>>;

pub struct HttpPriceFeed {
    client: reqwest::blocking::Client,
    endpoint: String,
    quote: String,
    /// Tracked tokens paired with their feed identifiers, in basket order.
    ids: Vec<(Symbol, String)>,
}

impl HttpPriceFeed {
    pub fn new(cfg: &FeedConfig, tokens: &[Token]) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| Error::Feed(format!("http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            quote: cfg.quote.clone(),
            ids: tokens
                .iter()
                .map(|t| (t.symbol, t.feed_id.clone()))
                .collect(),
        })
    }

    fn request_url(&self) -> String {
        let ids: Vec<&str> = self.ids.iter().map(|(_, id)| id.as_str()).collect();
        format!(
            "{}/simple/price?ids={}&vs_currencies={}",
            self.endpoint,
            ids.join(","),
            self.quote
        )
    }
}

impl PriceSource for HttpPriceFeed {
    fn fetch(&self) -> Result<PriceMap> {
        let url = self.request_url();
        debug!("fetching quotes: {url}");

        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| Error::Feed(format!("request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::Feed(format!("feed returned {}", resp.status())));
        }

        let raw: RawQuotes = resp
            .json()
            .map_err(|e| Error::Feed(format!("malformed response: {e}")))?;
        parse_response(&raw, &self.ids, &self.quote)
    }
}

fn parse_response(raw: &RawQuotes, ids: &[(Symbol, String)], quote: &str) -> Result<PriceMap> {
    let mut prices = PriceMap::default();
    for (symbol, id) in ids {
        let entry = raw
            .get(id)
            .ok_or_else(|| Error::Feed(format!("no quote for {id}")))?;
        let price = entry
            .get(quote)
            .ok_or_else(|| Error::Feed(format!("{id} has no {quote} quote")))?;
        prices.insert(*symbol, *price);
    }
    Ok(prices)
}
