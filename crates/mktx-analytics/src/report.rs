//! Plain-language market summaries derived from a statistics snapshot and a
//! trend snapshot.

use mktx_core::{StatisticsSnapshot, TrendSnapshot};
use serde::{Deserialize, Serialize};

pub const DIRECTION_THRESHOLD_PCT: f64 = 5.0;
pub const ACTIVITY_THRESHOLD_PCT: f64 = 20.0;
pub const HETEROGENEOUS_SPREAD: f64 = 0.5;
pub const HOMOGENEOUS_SPREAD: f64 = 0.2;
pub const LOW_SAMPLE_COUNT: usize = 5;
pub const HIGH_SAMPLE_COUNT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarketDirection {
    Rising,
    Cooling,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Activity {
    High,
    Normal,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriceSpread {
    Homogeneous,
    Mixed,
    NonHomogeneous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SampleStrength {
    Low,
    Moderate,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketReport {
    pub direction: MarketDirection,
    pub activity: Activity,
    pub spread: PriceSpread,
    pub sample_strength: SampleStrength,
    pub summary: String,
    pub insights: Vec<String>,
}

pub fn direction(trend: &TrendSnapshot) -> MarketDirection {
    if trend.six_month_change_pct > DIRECTION_THRESHOLD_PCT {
        MarketDirection::Rising
    } else if trend.six_month_change_pct < -DIRECTION_THRESHOLD_PCT {
        MarketDirection::Cooling
    } else {
        MarketDirection::Stable
    }
}

pub fn activity(trend: &TrendSnapshot) -> Activity {
    if trend.volume_change_pct > ACTIVITY_THRESHOLD_PCT {
        Activity::High
    } else if trend.volume_change_pct < -ACTIVITY_THRESHOLD_PCT {
        Activity::Low
    } else {
        Activity::Normal
    }
}

/// `(max - min) / average`, or mixed when there is no average to divide by.
pub fn spread(snapshot: &StatisticsSnapshot) -> PriceSpread {
    if snapshot.average_price_per_sqm <= 0.0 {
        return PriceSpread::Mixed;
    }
    let ratio = (snapshot.max_price_per_sqm - snapshot.min_price_per_sqm) / snapshot.average_price_per_sqm;
    if ratio > HETEROGENEOUS_SPREAD {
        PriceSpread::NonHomogeneous
    } else if ratio < HOMOGENEOUS_SPREAD {
        PriceSpread::Homogeneous
    } else {
        PriceSpread::Mixed
    }
}

pub fn sample_strength(snapshot: &StatisticsSnapshot) -> SampleStrength {
    if snapshot.count < LOW_SAMPLE_COUNT {
        SampleStrength::Low
    } else if snapshot.count >= HIGH_SAMPLE_COUNT {
        SampleStrength::High
    } else {
        SampleStrength::Moderate
    }
}

pub fn summarize(snapshot: &StatisticsSnapshot, trend: &TrendSnapshot) -> String {
    let label = match direction(trend) {
        MarketDirection::Rising => "Rising market",
        MarketDirection::Cooling => "Cooling market",
        MarketDirection::Stable => "Stable market",
    };
    format!(
        "{label}: {} transactions, average {:.0} per m² (median {:.0}), 6-month change {:+.1}%.",
        snapshot.count, snapshot.average_price_per_sqm, snapshot.median_price_per_sqm, trend.six_month_change_pct
    )
}

pub fn insights(snapshot: &StatisticsSnapshot, trend: &TrendSnapshot) -> Vec<String> {
    let mut out = Vec::new();

    match direction(trend) {
        MarketDirection::Rising => out.push(format!(
            "Prices are rising: {:+.1}% over the last six months.",
            trend.six_month_change_pct
        )),
        MarketDirection::Cooling => out.push(format!(
            "Prices are cooling: {:+.1}% over the last six months.",
            trend.six_month_change_pct
        )),
        MarketDirection::Stable => out.push("Prices are stable over the last six months.".to_string()),
    }

    match activity(trend) {
        Activity::High => out.push(format!(
            "High market activity: transaction volume {:+.0}%.",
            trend.volume_change_pct
        )),
        Activity::Low => out.push(format!(
            "Low market activity: transaction volume {:+.0}%.",
            trend.volume_change_pct
        )),
        Activity::Normal => {}
    }

    match spread(snapshot) {
        PriceSpread::NonHomogeneous => {
            out.push("Wide price spread; the area is not homogeneous and comparables need care.".to_string())
        }
        PriceSpread::Homogeneous => out.push("Narrow price spread; the area is homogeneous.".to_string()),
        PriceSpread::Mixed => {}
    }

    match sample_strength(snapshot) {
        SampleStrength::Low => out.push(format!(
            "Only {} transactions found; treat the figures with low confidence.",
            snapshot.count
        )),
        SampleStrength::High => out.push(format!(
            "{} transactions found; figures carry high confidence.",
            snapshot.count
        )),
        SampleStrength::Moderate => {}
    }

    out
}

pub fn build_report(snapshot: &StatisticsSnapshot, trend: &TrendSnapshot) -> MarketReport {
    MarketReport {
        direction: direction(trend),
        activity: activity(trend),
        spread: spread(snapshot),
        sample_strength: sample_strength(snapshot),
        summary: summarize(snapshot, trend),
        insights: insights(snapshot, trend),
    }
}

impl MarketReport {
    pub fn render_markdown(&self, title: &str, snapshot: &StatisticsSnapshot) -> String {
        let mut out = String::new();
        out.push_str(&format!("# {title}\n\n"));
        out.push_str(&self.summary);
        out.push_str("\n\n## Price per m²\n\n");
        out.push_str(&format!(
            "- Average: {:.0}\n- Median: {:.0}\n- Min: {:.0}\n- Max: {:.0}\n- Count: {}\n",
            snapshot.average_price_per_sqm,
            snapshot.median_price_per_sqm,
            snapshot.min_price_per_sqm,
            snapshot.max_price_per_sqm,
            snapshot.count
        ));

        if !snapshot.by_category.is_empty() {
            out.push_str("\n## By property type\n\n");
            for (kind, avg) in &snapshot.by_category {
                out.push_str(&format!("- {}: {:.0}\n", kind.as_str(), avg));
            }
        }

        if !snapshot.by_month.is_empty() {
            out.push_str("\n## Volume by month\n\n");
            for (month, count) in &snapshot.by_month {
                out.push_str(&format!("- {month}: {count}\n"));
            }
        }

        if !self.insights.is_empty() {
            out.push_str("\n## Insights\n\n");
            for insight in &self.insights {
                out.push_str(&format!("- {insight}\n"));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mktx_core::PropertyType;

    fn snapshot(count: usize, min: f64, avg: f64, max: f64) -> StatisticsSnapshot {
        StatisticsSnapshot {
            average_price_per_sqm: avg,
            median_price_per_sqm: avg,
            min_price_per_sqm: min,
            max_price_per_sqm: max,
            count,
            ..StatisticsSnapshot::default()
        }
    }

    fn trend(six_month: f64, volume: f64) -> TrendSnapshot {
        TrendSnapshot {
            six_month_change_pct: six_month,
            twelve_month_change_pct: six_month,
            volume_change_pct: volume,
            ..TrendSnapshot::default()
        }
    }

    #[test]
    fn thresholds_classify_direction_and_activity() {
        assert_eq!(direction(&trend(5.1, 0.0)), MarketDirection::Rising);
        assert_eq!(direction(&trend(-7.0, 0.0)), MarketDirection::Cooling);
        assert_eq!(direction(&trend(5.0, 0.0)), MarketDirection::Stable);
        assert_eq!(activity(&trend(0.0, 25.0)), Activity::High);
        assert_eq!(activity(&trend(0.0, -25.0)), Activity::Low);
        assert_eq!(activity(&trend(0.0, 10.0)), Activity::Normal);
    }

    #[test]
    fn spread_and_sample_strength() {
        assert_eq!(spread(&snapshot(10, 10.0, 20.0, 30.0)), PriceSpread::NonHomogeneous);
        assert_eq!(spread(&snapshot(10, 19.0, 20.0, 21.0)), PriceSpread::Homogeneous);
        assert_eq!(spread(&snapshot(10, 17.0, 20.0, 23.0)), PriceSpread::Mixed);
        assert_eq!(spread(&StatisticsSnapshot::default()), PriceSpread::Mixed);
        assert_eq!(sample_strength(&snapshot(4, 1.0, 1.0, 1.0)), SampleStrength::Low);
        assert_eq!(sample_strength(&snapshot(20, 1.0, 1.0, 1.0)), SampleStrength::High);
    }

    #[test]
    fn summary_mentions_direction_and_figures() {
        let text = summarize(&snapshot(7, 20_000.0, 30_000.0, 40_000.0), &trend(8.3, 0.0));
        assert_eq!(
            text,
            "Rising market: 7 transactions, average 30000 per m² (median 30000), 6-month change +8.3%."
        );
    }

    #[test]
    fn markdown_lists_categories_and_insights() {
        let mut stats = snapshot(3, 10.0, 20.0, 30.0);
        stats.by_category.insert(PropertyType::Apartment, 20.0);
        stats.by_month.insert("2024-05".into(), 3);
        let report = build_report(&stats, &trend(0.0, 0.0));
        let md = report.render_markdown("Tel Aviv", &stats);
        assert!(md.starts_with("# Tel Aviv\n"));
        assert!(md.contains("- apartment: 20\n"));
        assert!(md.contains("- 2024-05: 3\n"));
        assert!(md.contains("low confidence"));
        assert!(md.contains("not homogeneous"));
    }
}
