//! Live trade recording port trait.

use crate::domain::error::SignalbotError;
use crate::domain::live::LiveTrade;

/// Destination for executed live trades. Called from the scanner task and
/// from manual trades, possibly concurrently.
pub trait TradeSinkPort: Send + Sync {
    fn record(&self, trade: &LiveTrade) -> Result<(), SignalbotError>;
}
