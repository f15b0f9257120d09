//! Identifier tables shared by scenario setup and comparison.

use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::compare::IdTable;
use crate::error::{HarnessError, HarnessResult};
use crate::reference::Character;

/// Relic the live side always carries; it owns the die roll.
pub const DIE_RELIC_ID: &str = "BoardGame:BGTheDieRelic";

/// Wire identifiers for the reference engine's cards and relics.
#[derive(Debug, Clone)]
pub struct Catalog<C, R> {
    pub cards: IdTable<C>,
    pub relics: IdTable<R>,
    pub die_relic: String,
    starter_relics: BTreeMap<Character, R>,
}

impl<C, R> Catalog<C, R>
where
    C: Copy + Ord + Debug,
    R: Copy + Ord + Debug,
{
    pub fn new(cards: IdTable<C>, relics: IdTable<R>) -> Self {
        Self {
            cards,
            relics,
            die_relic: DIE_RELIC_ID.to_string(),
            starter_relics: BTreeMap::new(),
        }
    }

    /// Relic given to `character` when a scenario leaves relics unspecified.
    pub fn with_starter_relic(mut self, character: Character, relic: R) -> Self {
        self.starter_relics.insert(character, relic);
        self
    }

    pub fn with_die_relic(mut self, id: impl Into<String>) -> Self {
        self.die_relic = id.into();
        self
    }

    pub fn starter_relic(&self, character: Character) -> Option<R> {
        self.starter_relics.get(&character).copied()
    }

    pub fn card_id(&self, card: C) -> HarnessResult<&str> {
        self.cards
            .wire(card)
            .ok_or_else(|| HarnessError::UnknownIdentifier(format!("card {card:?}")))
    }

    pub fn relic_id(&self, relic: R) -> HarnessResult<&str> {
        self.relics
            .wire(relic)
            .ok_or_else(|| HarnessError::UnknownIdentifier(format!("relic {relic:?}")))
    }

    /// Wire id for display in reports; unmapped cards render as `?Card`.
    pub(crate) fn card_label(&self, card: C) -> String {
        self.cards
            .wire(card)
            .map(str::to_string)
            .unwrap_or_else(|| format!("?{card:?}"))
    }

    pub(crate) fn relic_label(&self, relic: R) -> String {
        self.relics
            .wire(relic)
            .map(str::to_string)
            .unwrap_or_else(|| format!("?{relic:?}"))
    }
}
