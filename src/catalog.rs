//! Waste-type pricing and statistics routing.
//!
//! Two tables live here and they are deliberately separate:
//!
//! - [`WasteCatalog`] holds the administrable points-per-unit rules.
//! - [`StatsTable`] holds the fixed per-type weight constants and the
//!   statistic bucket each type accumulates into. It is injected through
//!   configuration, not edited by catalog administration.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use crate::model::WasteTypeId;
use crate::{Grams, Rate};

/// Errors raised by catalog lookups and edits.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("unknown or inactive waste type '{0}'")]
    UnknownWasteType(WasteTypeId),
    #[error("waste type '{0}' has a negative points-per-unit rate")]
    NegativeRate(WasteTypeId),
}

/// Measurement unit of a waste type's `count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Item,
    Kg,
    G,
}

/// An administrable pricing rule for one category of recyclable material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WasteTypeRule {
    pub id: WasteTypeId,
    pub name: String,
    pub points_per_unit: Rate,
    pub unit: Unit,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl WasteTypeRule {
    pub fn new(id: impl Into<WasteTypeId>, name: impl Into<String>, rate: Rate, unit: Unit) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            points_per_unit: rate,
            unit,
            active: true,
        }
    }
}

/// The rate a deposit line is priced with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub points_per_unit: Rate,
    pub unit: Unit,
}

/// Registry of waste-type rules.
#[derive(Debug, Clone, Default)]
pub struct WasteCatalog {
    rules: HashMap<WasteTypeId, WasteTypeRule>,
}

impl WasteCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from seed rules; rules with negative rates are rejected.
    pub fn from_rules(rules: impl IntoIterator<Item = WasteTypeRule>) -> Result<Self, CatalogError> {
        let mut catalog = Self::new();
        for rule in rules {
            catalog.upsert(rule)?;
        }
        Ok(catalog)
    }

    /// Current rate for `id`. Inactive rules resolve like absent ones.
    pub fn rate_for(&self, id: &str) -> Result<Quote, CatalogError> {
        match self.rules.get(id) {
            Some(rule) if rule.active => Ok(Quote {
                points_per_unit: rule.points_per_unit,
                unit: rule.unit,
            }),
            _ => Err(CatalogError::UnknownWasteType(id.to_string())),
        }
    }

    pub fn upsert(&mut self, rule: WasteTypeRule) -> Result<(), CatalogError> {
        if rule.points_per_unit.is_negative() {
            return Err(CatalogError::NegativeRate(rule.id));
        }
        self.rules.insert(rule.id.clone(), rule);
        Ok(())
    }

    /// Mark a rule inactive. Returns false when the rule does not exist.
    pub fn deactivate(&mut self, id: &str) -> bool {
        match self.rules.get_mut(id) {
            Some(rule) => {
                rule.active = false;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&WasteTypeRule> {
        self.rules.get(id)
    }

    pub fn rules(&self) -> impl Iterator<Item = &WasteTypeRule> + '_ {
        self.rules.values()
    }
}

/// Per-user statistic a waste type accumulates into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    PlasticBottles,
    GlassBottles,
    AluminumCans,
    PaperGrams,
    EWaste,
}

/// Where a waste type's counts go and how much one unit weighs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatRoute {
    pub bucket: Bucket,
    pub grams_per_unit: u64,
}

impl StatRoute {
    pub fn new(bucket: Bucket, grams_per_unit: u64) -> Self {
        Self {
            bucket,
            grams_per_unit,
        }
    }
}

/// Fixed waste-type → (bucket, grams per unit) table.
///
/// Types missing from the table still earn points but contribute neither
/// bucket counts nor weight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatsTable {
    routes: BTreeMap<WasteTypeId, StatRoute>,
}

impl StatsTable {
    pub fn empty() -> Self {
        Self {
            routes: BTreeMap::new(),
        }
    }

    pub fn with_route(mut self, id: impl Into<WasteTypeId>, route: StatRoute) -> Self {
        self.routes.insert(id.into(), route);
        self
    }

    pub fn route(&self, id: &str) -> Option<StatRoute> {
        self.routes.get(id).copied()
    }

    /// Weight contributed by `count` units of `id`.
    pub fn weight_of(&self, id: &str, count: u64) -> Grams {
        self.route(id)
            .map(|r| Grams::new(r.grams_per_unit.saturating_mul(count)))
            .unwrap_or(Grams::ZERO)
    }
}

impl Default for StatsTable {
    fn default() -> Self {
        Self::empty()
            .with_route("1", StatRoute::new(Bucket::PlasticBottles, 20))
            .with_route("2", StatRoute::new(Bucket::GlassBottles, 200))
            .with_route("3", StatRoute::new(Bucket::AluminumCans, 15))
            .with_route("4", StatRoute::new(Bucket::PaperGrams, 1))
            .with_route("5", StatRoute::new(Bucket::EWaste, 100))
    }
}

/// Rules the platform ships with.
pub fn default_rules() -> Vec<WasteTypeRule> {
    vec![
        WasteTypeRule::new("1", "Plastic Bottle", Rate::whole(10), Unit::Item),
        WasteTypeRule::new("2", "Glass Bottle", Rate::whole(15), Unit::Item),
        WasteTypeRule::new("3", "Aluminum Can", Rate::whole(12), Unit::Item),
        WasteTypeRule::new("4", "Paper", Rate::from_float(0.05), Unit::G),
        WasteTypeRule::new("5", "E-Waste", Rate::whole(50), Unit::Item),
    ]
}
