//! Domain-keyed market data lookup.

use async_trait::async_trait;
use reqwest::{Client, Url};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::PriceSourceConfig;
use crate::domain::TargetDomain;
use crate::error::{AugurError, Result};

/// Current value of a target from an external market-data provider.
///
/// `Ok(None)` means the provider has no usable price for the symbol; callers
/// treat that as a skip rather than a failure.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Recorded as the `source` of every snapshot this provider produces
    fn name(&self) -> &'static str;

    async fn fetch_price(&self, domain: TargetDomain, symbol: &str) -> Result<Option<Decimal>>;
}

/// HTTP price source driven by per-domain URL templates
#[derive(Clone)]
pub struct HttpPriceSource {
    http: Client,
    config: PriceSourceConfig,
}

impl HttpPriceSource {
    pub fn new(config: PriceSourceConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent("augur-price-source/0.1")
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| AugurError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Expand the domain's template. The symbol is percent-encoded as a path
    /// segment or query value, wherever the placeholder sits.
    fn url_for(&self, domain: TargetDomain, symbol: &str) -> Result<Option<Url>> {
        let Some(template) = self.config.endpoint_for(domain) else {
            return Ok(None);
        };
        let invalid = |reason: String| {
            AugurError::Validation(format!("price endpoint '{}' is not a valid URL: {}", template, reason))
        };

        let mut url = Url::parse(&template.replace(SYMBOL_PLACEHOLDER, SYMBOL_MARKER))
            .map_err(|e| invalid(e.to_string()))?;

        let segments: Option<Vec<String>> = url
            .path_segments()
            .map(|segments| segments.map(|s| s.replace(SYMBOL_MARKER, symbol)).collect());
        if let Some(segments) = segments {
            url.path_segments_mut()
                .map_err(|_| invalid("cannot be a base".to_string()))?
                .clear()
                .extend(segments.iter());
        }

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.replace(SYMBOL_MARKER, symbol)))
            .collect();
        if !pairs.is_empty() {
            url.query_pairs_mut().clear().extend_pairs(pairs.iter());
        }

        Ok(Some(url))
    }
}

const SYMBOL_PLACEHOLDER: &str = "{symbol}";
/// Stands in for the placeholder while the template is parsed
const SYMBOL_MARKER: &str = "__augur_symbol__";

/// Pull a price out of a provider payload. Accepts a top-level `price`
/// field, or the first element of an array carrying one, as number or string.
pub fn extract_price(payload: &Value) -> Option<Decimal> {
    let field = match payload {
        Value::Array(items) => items.first()?.get("price")?,
        other => other.get("price")?,
    };

    match field {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch_price(&self, domain: TargetDomain, symbol: &str) -> Result<Option<Decimal>> {
        let Some(url) = self.url_for(domain, symbol)? else {
            return Err(AugurError::MarketDataUnavailable(format!(
                "no price endpoint configured for domain {}",
                domain
            )));
        };

        let response = self.http.get(url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!("No quote for {} ({})", symbol, domain);
            return Ok(None);
        }
        if !status.is_success() {
            warn!("Price request for {} failed with {}", symbol, status);
            return Err(AugurError::MarketDataUnavailable(format!(
                "{} returned {} for {}",
                domain, status, symbol
            )));
        }

        let payload: Value = response.json().await?;
        Ok(extract_price(&payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_extract_price_shapes() {
        assert_eq!(extract_price(&json!({"price": 185.25})), Some(dec!(185.25)));
        assert_eq!(extract_price(&json!({"price": "0.62"})), Some(dec!(0.62)));
        assert_eq!(extract_price(&json!([{"price": 42}])), Some(dec!(42)));
        assert_eq!(extract_price(&json!({"last": 1})), None);
        assert_eq!(extract_price(&json!({"price": null})), None);
    }

    #[test]
    fn test_url_template_substitution() {
        let mut config = PriceSourceConfig::default();
        config.endpoints.insert(
            "stocks".to_string(),
            "https://quotes.example/v1/{symbol}".to_string(),
        );
        config.endpoints.insert(
            "crypto".to_string(),
            "https://ticker.example/products/{symbol}-USD/ticker?fields=price&pair={symbol}".to_string(),
        );
        let source = HttpPriceSource::new(config).unwrap();
        let url = source.url_for(TargetDomain::Stocks, "AAPL").unwrap().unwrap();
        assert_eq!(url.as_str(), "https://quotes.example/v1/AAPL");

        let url = source.url_for(TargetDomain::Crypto, "BTC").unwrap().unwrap();
        assert_eq!(
            url.as_str(),
            "https://ticker.example/products/BTC-USD/ticker?fields=price&pair=BTC"
        );
        assert!(source.url_for(TargetDomain::Elections, "X").unwrap().is_none());
    }

    #[test]
    fn test_symbol_is_percent_encoded() {
        let mut config = PriceSourceConfig::default();
        config.endpoints.insert(
            "stocks".to_string(),
            "https://quotes.example/v1/{symbol}".to_string(),
        );
        config.endpoints.insert(
            "polymarket".to_string(),
            "https://markets.example/price?slug={symbol}".to_string(),
        );
        let source = HttpPriceSource::new(config).unwrap();

        let url = source.url_for(TargetDomain::Stocks, "BRK/B ?x#1").unwrap().unwrap();
        assert_eq!(url.path(), "/v1/BRK%2FB%20%3Fx%231");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);

        let url = source
            .url_for(TargetDomain::Polymarket, "a&b=c")
            .unwrap()
            .unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs, vec![("slug".to_string(), "a&b=c".to_string())]);
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_market_data_error() {
        let source = HttpPriceSource::new(PriceSourceConfig::default()).unwrap();
        let err = source
            .fetch_price(TargetDomain::Elections, "PRES-2028")
            .await
            .unwrap_err();
        assert!(matches!(err, AugurError::MarketDataUnavailable(_)));
    }
}
