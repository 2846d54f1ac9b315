//! Plans, billing cycles and the gateway product catalog

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::common::config::ProductIds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Pro,
    Business,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Pro => "pro",
            Plan::Business => "business",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pro" => Some(Plan::Pro),
            "business" => Some(Plan::Business),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    Monthly,
    Yearly,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::Monthly => "monthly",
            BillingCycle::Yearly => "yearly",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "monthly" => Some(BillingCycle::Monthly),
            "yearly" => Some(BillingCycle::Yearly),
            _ => None,
        }
    }

    fn months(&self) -> u32 {
        match self {
            BillingCycle::Monthly => 1,
            BillingCycle::Yearly => 12,
        }
    }

    /// End of a period starting at `start`, by calendar arithmetic.
    /// Days past the end of the target month clamp to its last day
    /// (Jan 31 + 1 month = Feb 28/29).
    pub fn period_end(&self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        start.checked_add_months(Months::new(self.months()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub plan: Plan,
    pub cycle: BillingCycle,
    pub product_id: String,
}

/// Static mapping between (plan, cycle) and gateway product ids
#[derive(Debug, Clone, Default)]
pub struct ProductCatalog {
    entries: Vec<CatalogEntry>,
}

impl ProductCatalog {
    /// Unconfigured products are left out of the catalog
    pub fn from_product_ids(ids: &ProductIds) -> Self {
        let candidates = [
            (Plan::Pro, BillingCycle::Monthly, &ids.pro_monthly),
            (Plan::Pro, BillingCycle::Yearly, &ids.pro_yearly),
            (Plan::Business, BillingCycle::Monthly, &ids.business_monthly),
            (Plan::Business, BillingCycle::Yearly, &ids.business_yearly),
        ];

        let entries = candidates
            .into_iter()
            .filter_map(|(plan, cycle, id)| {
                id.as_ref().map(|product_id| CatalogEntry {
                    plan,
                    cycle,
                    product_id: product_id.clone(),
                })
            })
            .collect();

        Self { entries }
    }

    pub fn product_id(&self, plan: Plan, cycle: BillingCycle) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.plan == plan && e.cycle == cycle)
            .map(|e| e.product_id.as_str())
    }

    pub fn resolve(&self, product_id: &str) -> Option<(Plan, BillingCycle)> {
        self.entries
            .iter()
            .find(|e| e.product_id == product_id)
            .map(|e| (e.plan, e.cycle))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
