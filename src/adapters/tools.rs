use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;
use tracing::{debug, warn};

use super::price_source::PriceSource;
use crate::domain::{Claim, Source, TargetDomain};
use crate::error::Result;
use crate::persistence::TargetRepository;
use crate::pipeline::DataTool;

const FALLBACK_DOMAIN: TargetDomain = TargetDomain::Stocks;

/// Turns a [`PriceSource`] into `price` claims.
///
/// The domain of each instrument comes from its registered target; unknown
/// symbols are priced as stocks.
pub struct PriceClaimTool {
    prices: Arc<dyn PriceSource>,
    targets: Arc<dyn TargetRepository>,
}

impl PriceClaimTool {
    pub fn new(prices: Arc<dyn PriceSource>, targets: Arc<dyn TargetRepository>) -> Self {
        Self {
            prices,
            targets,
        }
    }
}

#[async_trait]
impl DataTool for PriceClaimTool {
    fn name(&self) -> &str {
        "price_feed"
    }

    async fn execute(&self, instruments: &[String]) -> Result<Vec<Source>> {
        let mut claims = Vec::with_capacity(instruments.len());

        for symbol in instruments {
            let domain = match self.targets.find_target_by_symbol(symbol).await {
                Ok(Some(target)) => target.domain,
                Ok(None) => FALLBACK_DOMAIN,
                Err(e) => {
                    warn!("Target lookup for {} failed: {}", symbol, e);
                    FALLBACK_DOMAIN
                }
            };

            match self.prices.fetch_price(domain, symbol).await {
                Ok(Some(price)) => {
                    let Some(value) = price.to_f64() else {
                        warn!("Price {} for {} is not representable", price, symbol);
                        continue;
                    };
                    claims.push(
                        Claim::new("price", symbol.as_str(), value, Utc::now())
                            .with_unit("USD")
                            .with_metadata("provider", self.prices.name().into()),
                    );
                }
                Ok(None) => debug!("No price for {}, skipping", symbol),
                Err(e) => warn!("Price fetch for {} failed: {}", symbol, e),
            }
        }

        Ok(vec![Source {
            tool: self.name().to_string(),
            claims,
            fetched_at: Utc::now(),
            published_at: None,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::price_source::MockPriceSource;
    use crate::adapters::InMemoryStore;
    use crate::domain::{ClaimValue, Target};
    use crate::error::AugurError;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_price_claims_use_target_domain() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_target(Target::new("BTC", TargetDomain::Crypto))
            .await;

        let mut prices = MockPriceSource::new();
        prices.expect_name().return_const("mock");
        prices.expect_fetch_price().returning(|domain, symbol| match (domain, symbol) {
            (TargetDomain::Crypto, "BTC") => Ok(Some(dec!(64000.5))),
            (TargetDomain::Stocks, "AAPL") => Ok(None),
            _ => Err(AugurError::MarketDataUnavailable(symbol.to_string())),
        });

        let tool = PriceClaimTool::new(Arc::new(prices), store);
        let sources = tool
            .execute(&["BTC".to_string(), "AAPL".to_string(), "ZZZ".to_string()])
            .await
            .unwrap();

        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].tool, "price_feed");
        let claims = &sources[0].claims;
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].claim_type, "price");
        assert_eq!(claims[0].value, ClaimValue::Number(64000.5));
    }
}
