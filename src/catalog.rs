use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Forex,
    Futures,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Forex => f.write_str("forex"),
            Category::Futures => f.write_str("futures"),
        }
    }
}

/// Category filter accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CategoryFilter {
    Forex,
    Futures,
    #[default]
    All,
}

impl FromStr for CategoryFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "forex" => Ok(Self::Forex),
            "futures" => Ok(Self::Futures),
            "all" => Ok(Self::All),
            other => Err(format!("unknown category '{other}' (expected forex, futures or all)")),
        }
    }
}

impl CategoryFilter {
    fn admits(self, category: Category) -> bool {
        match self {
            CategoryFilter::All => true,
            CategoryFilter::Forex => category == Category::Forex,
            CategoryFilter::Futures => category == Category::Futures,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmEntry {
    pub name: &'static str,
    pub url: &'static str,
    pub category: Category,
}

/// Firm name → review page mapping, read-only.
const FIRMS: &[FirmEntry] = &[
    FirmEntry { name: "FTMO", url: "https://www.trustpilot.com/review/ftmo.com", category: Category::Forex },
    FirmEntry { name: "FundingTraders", url: "https://www.trustpilot.com/review/fundingtraders.com", category: Category::Forex },
    FirmEntry { name: "FundedNext", url: "https://www.trustpilot.com/review/fundednext.com", category: Category::Forex },
    FirmEntry { name: "AlphaCapital", url: "https://www.trustpilot.com/review/alphacapitalgroup.uk", category: Category::Forex },
    FirmEntry { name: "FundingPips", url: "https://www.trustpilot.com/review/fundingpips.com", category: Category::Forex },
    FirmEntry { name: "MyFundedFutures", url: "https://www.trustpilot.com/review/myfundedfutures.com", category: Category::Futures },
    FirmEntry { name: "TopStep", url: "https://www.trustpilot.com/review/topstep.com", category: Category::Futures },
    FirmEntry { name: "ApexTraderFunding", url: "https://www.trustpilot.com/review/apextraderfunding.com", category: Category::Futures },
    FirmEntry { name: "Tradeify", url: "https://www.trustpilot.com/review/tradeify.co", category: Category::Futures },
    FirmEntry { name: "TopOneFutures", url: "https://www.trustpilot.com/review/toponefutures.com", category: Category::Futures },
];

pub fn find_firm(name: &str) -> Option<&'static FirmEntry> {
    FIRMS.iter().find(|f| f.name.eq_ignore_ascii_case(name))
}

/// Resolve the firms to harvest. Explicit names win over the category filter;
/// unknown names are skipped with a warning. `limit` applies last.
pub fn select_firms(
    names: &[String],
    filter: CategoryFilter,
    limit: Option<usize>,
) -> Vec<&'static FirmEntry> {
    let selected: Vec<&'static FirmEntry> = if names.is_empty() {
        FIRMS.iter().filter(|f| filter.admits(f.category)).collect()
    } else {
        names
            .iter()
            .filter_map(|name| {
                let found = find_firm(name);
                if found.is_none() {
                    warn!(firm = %name, "Firm not found in catalog, skipping");
                }
                found
            })
            .collect()
    };

    match limit {
        Some(n) => selected.into_iter().take(n).collect(),
        None => selected,
    }
}
