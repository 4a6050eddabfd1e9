//! Indicator snapshots and the per-run indicator cache.
//!
//! A snapshot is the set of indicator values for one (symbol, date). A
//! missing key means the value could not be computed on that bar.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::domain::indicator::macd::calculate_macd;
use crate::domain::indicator::rank::percentile_ranks;
use crate::domain::indicator::{compute_series, IndicatorKind, IndicatorSeries};
use crate::domain::ohlcv::PriceBar;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    pub symbol: String,
    pub date: NaiveDate,
    pub values: BTreeMap<IndicatorKind, f64>,
}

impl IndicatorSnapshot {
    pub fn get(&self, kind: IndicatorKind) -> Option<f64> {
        self.values.get(&kind).copied()
    }

    pub fn close(&self) -> Option<f64> {
        self.get(IndicatorKind::Close)
    }

    /// Kinds from `required` with no value on this bar.
    pub fn missing<'a>(
        &self,
        required: impl IntoIterator<Item = &'a IndicatorKind>,
    ) -> Vec<IndicatorKind> {
        required
            .into_iter()
            .filter(|k| !self.values.contains_key(k))
            .copied()
            .collect()
    }
}

/// Expand requested kinds with what they depend on. Close and volume are
/// always present since signals price targets and liquidity from them.
pub fn expand_kinds(kinds: &BTreeSet<IndicatorKind>) -> BTreeSet<IndicatorKind> {
    let mut out: BTreeSet<IndicatorKind> = kinds.clone();
    out.insert(IndicatorKind::Close);
    out.insert(IndicatorKind::Volume);
    for kind in kinds {
        if let IndicatorKind::RsRank(h) = kind {
            out.insert(IndicatorKind::RelativeStrength(*h));
        }
    }
    out
}

/// Build one snapshot per bar. Cross-sectional kinds are left for
/// [`IndicatorCache::apply_ranks`].
pub fn build_snapshots(
    bars: &[PriceBar],
    kinds: &BTreeSet<IndicatorKind>,
) -> Vec<IndicatorSnapshot> {
    let kinds = expand_kinds(kinds);
    let mut series: Vec<IndicatorSeries> = Vec::with_capacity(kinds.len());

    if kinds.iter().any(|k| k.is_macd()) {
        let macd = calculate_macd(bars);
        for kind in kinds.iter().filter(|k| k.is_macd()) {
            series.push(macd.clone().series(*kind));
        }
    }
    for kind in kinds
        .iter()
        .filter(|k| !k.is_macd() && !k.is_cross_sectional())
    {
        series.push(compute_series(bars, *kind));
    }

    bars.iter()
        .enumerate()
        .map(|(i, bar)| IndicatorSnapshot {
            symbol: bar.symbol.clone(),
            date: bar.date,
            values: series
                .iter()
                .filter_map(|s| s.get(i).map(|v| (s.kind, v)))
                .collect(),
        })
        .collect()
}

/// Bars and snapshots of one symbol, indexed by date.
#[derive(Debug, Clone)]
pub struct SymbolData {
    pub symbol: String,
    pub bars: Vec<PriceBar>,
    pub snapshots: Vec<IndicatorSnapshot>,
    pub date_index: HashMap<NaiveDate, usize>,
}

impl SymbolData {
    pub fn new(symbol: String, bars: Vec<PriceBar>, kinds: &BTreeSet<IndicatorKind>) -> Self {
        let date_index = bars
            .iter()
            .enumerate()
            .map(|(i, bar)| (bar.date, i))
            .collect();
        let snapshots = build_snapshots(&bars, kinds);
        Self {
            symbol,
            bars,
            snapshots,
            date_index,
        }
    }

    pub fn bar_count(&self) -> usize {
        self.bars.len()
    }

    pub fn get_bar_index(&self, date: NaiveDate) -> Option<usize> {
        self.date_index.get(&date).copied()
    }

    pub fn get_bar(&self, date: NaiveDate) -> Option<&PriceBar> {
        self.get_bar_index(date).map(|i| &self.bars[i])
    }

    /// Snapshot at `index` and the one before it.
    pub fn snapshot_pair(&self, index: usize) -> (&IndicatorSnapshot, Option<&IndicatorSnapshot>) {
        let previous = index.checked_sub(1).map(|p| &self.snapshots[p]);
        (&self.snapshots[index], previous)
    }

    /// Last bar dated on or before `date`.
    pub fn last_bar_on_or_before(&self, date: NaiveDate) -> Option<&PriceBar> {
        let end = self.bars.partition_point(|b| b.date <= date);
        end.checked_sub(1).map(|i| &self.bars[i])
    }
}

/// Indicator state owned by a single backtest run or scanner tick.
#[derive(Debug, Clone, Default)]
pub struct IndicatorCache {
    symbols: BTreeMap<String, SymbolData>,
}

impl IndicatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: &str, bars: Vec<PriceBar>, kinds: &BTreeSet<IndicatorKind>) {
        self.symbols.insert(
            symbol.to_string(),
            SymbolData::new(symbol.to_string(), bars, kinds),
        );
    }

    pub fn get(&self, symbol: &str) -> Option<&SymbolData> {
        self.symbols.get(symbol)
    }

    /// Symbols in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &SymbolData> {
        self.symbols.values()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// All distinct bar dates across the cached symbols, ascending.
    pub fn timeline(&self) -> Vec<NaiveDate> {
        let unique: BTreeSet<NaiveDate> = self
            .symbols
            .values()
            .flat_map(|sd| sd.bars.iter().map(|bar| bar.date))
            .collect();
        unique.into_iter().collect()
    }

    /// Fill cross-sectional kinds by ranking every symbol present on each date.
    pub fn apply_ranks(&mut self, kinds: &BTreeSet<IndicatorKind>) {
        let horizons: Vec<usize> = kinds
            .iter()
            .filter_map(|k| match k {
                IndicatorKind::RsRank(h) => Some(*h),
                _ => None,
            })
            .collect();
        if horizons.is_empty() {
            return;
        }

        for date in self.timeline() {
            let members: Vec<(String, usize)> = self
                .symbols
                .values()
                .filter_map(|sd| sd.get_bar_index(date).map(|i| (sd.symbol.clone(), i)))
                .collect();

            for &h in &horizons {
                let values: Vec<Option<f64>> = members
                    .iter()
                    .map(|(s, i)| {
                        self.symbols[s].snapshots[*i].get(IndicatorKind::RelativeStrength(h))
                    })
                    .collect();
                let ranks = percentile_ranks(&values);

                for ((symbol, i), rank) in members.iter().zip(ranks) {
                    if let (Some(rank), Some(sd)) = (rank, self.symbols.get_mut(symbol)) {
                        sd.snapshots[*i].values.insert(IndicatorKind::RsRank(h), rank);
                    }
                }
            }
        }
    }
}
