//! Structural comparison between a reference combat and a live snapshot.
//!
//! Every disagreeing field is collected as a [`Mismatch`]; nothing short
//! circuits, so one run reports all differences at once.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Debug};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::catalog::Catalog;
use crate::error::{HarnessError, HarnessResult};
use crate::reference::{PowerType, ReferenceCombat};
use crate::snapshot::{CombatSnapshot, Pile, Power, Snapshot};

/// Live power carrying the current die roll.
pub const DIE_POWER_ID: &str = "BGTheDiePower";

/// Live power ids for every reference power.
///
/// Multi-word powers travel with spaces and without a `Power` suffix.
/// Live ids spelled exactly like a variant name resolve through
/// [`PowerType::from_name`] as well.
pub const STANDARD_POWERS: [(&str, PowerType); 68] = [
    ("Strength", PowerType::Strength),
    ("Vulnerable", PowerType::Vulnerable),
    ("Weak", PowerType::Weak),
    ("Ritual", PowerType::Ritual),
    ("Curl Up", PowerType::CurlUp),
    ("Dexterity", PowerType::Dexterity),
    ("Thorns", PowerType::Thorns),
    ("Metallicize", PowerType::Metallicize),
    ("Barricade", PowerType::Barricade),
    ("Rage", PowerType::Rage),
    ("Feel No Pain", PowerType::FeelNoPain),
    ("Dark Embrace", PowerType::DarkEmbrace),
    ("Rupture", PowerType::Rupture),
    ("Combust", PowerType::Combust),
    ("Evolve", PowerType::Evolve),
    ("Fire Breathing", PowerType::FireBreathing),
    ("Anger", PowerType::Anger),
    ("Entangled", PowerType::Entangled),
    ("Artifact", PowerType::Artifact),
    ("Spore Cloud", PowerType::SporeCloud),
    ("Juggernaut", PowerType::Juggernaut),
    ("Demon Form", PowerType::DemonForm),
    ("Corruption", PowerType::Corruption),
    ("Double Tap", PowerType::DoubleTap),
    ("No Draw", PowerType::NoDraw),
    ("Berserk", PowerType::Berserk),
    ("Poison", PowerType::Poison),
    ("Accuracy", PowerType::Accuracy),
    ("After Image", PowerType::AfterImage),
    ("Envenom", PowerType::Envenom),
    ("Noxious Fumes", PowerType::NoxiousFumes),
    ("A Thousand Cuts", PowerType::AThousandCuts),
    ("Infinite Blades", PowerType::InfiniteBlades),
    ("Well Laid Plans", PowerType::WellLaidPlans),
    ("Wraith Form", PowerType::WraithForm),
    ("Tools Of The Trade", PowerType::ToolsOfTheTrade),
    ("Distraction", PowerType::Distraction),
    ("Corpse Explosion", PowerType::CorpseExplosion),
    ("Burst", PowerType::Burst),
    ("Storm", PowerType::Storm),
    ("Loop", PowerType::Loop),
    ("Buffer", PowerType::BufferPower),
    ("Heatsink", PowerType::Heatsink),
    ("Echo Form", PowerType::EchoForm),
    ("Draw Per Turn", PowerType::DrawPerTurn),
    ("Electrodynamics", PowerType::Electrodynamics),
    ("Orb Evoke", PowerType::OrbEvoke),
    ("Orb Passive", PowerType::OrbPassive),
    ("Static Discharge", PowerType::StaticDischarge),
    ("Amplify Dark", PowerType::AmplifyDark),
    ("Energy Per Turn", PowerType::EnergyPerTurn),
    ("Triple Attack", PowerType::TripleAttack),
    ("Mental Fortress", PowerType::MentalFortress),
    ("Rushdown", PowerType::Rushdown),
    ("Like Water", PowerType::LikeWater),
    ("Omega", PowerType::OmegaPower),
    ("Devotion", PowerType::DevotionPower),
    ("Simmering Fury", PowerType::SimmeringFury),
    ("Nirvana", PowerType::NirvanaPower),
    ("Foresight", PowerType::ForesightPower),
    ("Study", PowerType::StudyPower),
    ("Deva Form", PowerType::DevaFormPower),
    ("Establishment", PowerType::EstablishmentPower),
    ("Battle Hymn", PowerType::BattleHymnPower),
    ("Conclusion", PowerType::ConclusionPower),
    ("Miracle Count", PowerType::MiracleCount),
    ("Lose Strength", PowerType::LoseStrength),
    ("Conjure Blade", PowerType::ConjureBladePower),
];

/// Bidirectional wire id <-> value table, one-to-one by construction.
#[derive(Debug, Clone)]
pub struct IdTable<T> {
    by_wire: BTreeMap<String, T>,
    by_value: BTreeMap<T, String>,
}

impl<T: Copy + Ord + Debug> IdTable<T> {
    /// Build a table, rejecting any id or value that appears twice.
    pub fn new<I, S>(entries: I) -> HarnessResult<Self>
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
    {
        let mut by_wire = BTreeMap::new();
        let mut by_value = BTreeMap::new();
        for (wire, value) in entries {
            let wire = wire.into();
            if by_wire.contains_key(&wire) {
                return Err(HarnessError::DuplicateMapping(format!("wire id {wire:?}")));
            }
            if by_value.contains_key(&value) {
                return Err(HarnessError::DuplicateMapping(format!("value {value:?}")));
            }
            by_wire.insert(wire.clone(), value);
            by_value.insert(value, wire);
        }
        Ok(Self { by_wire, by_value })
    }

    pub fn value(&self, wire: &str) -> Option<T> {
        self.by_wire.get(wire).copied()
    }

    pub fn wire(&self, value: T) -> Option<&str> {
        self.by_value.get(&value).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_wire.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_wire.is_empty()
    }
}

impl IdTable<PowerType> {
    pub fn standard_powers() -> HarnessResult<Self> {
        Self::new(STANDARD_POWERS)
    }
}

/// One disagreeing field. `expected` is the reference value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mismatch {
    pub field: String,
    pub expected: Value,
    pub actual: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Mismatch {
    pub fn new(field: impl Into<String>, expected: impl Into<Value>, actual: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            expected: expected.into(),
            actual: actual.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MISMATCH {}: expected={}, actual={}",
            self.field,
            render(&self.expected),
            render(&self.actual)
        )?;
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerifyResult {
    pub matches: bool,
    pub mismatches: Vec<Mismatch>,
}

impl VerifyResult {
    pub fn from_mismatches(mismatches: Vec<Mismatch>) -> Self {
        Self {
            matches: mismatches.is_empty(),
            mismatches,
        }
    }

    /// Append another result's mismatches.
    pub fn merge(&mut self, other: VerifyResult) {
        self.mismatches.extend(other.mismatches);
        self.matches = self.mismatches.is_empty();
    }

    pub fn field(&self, field: &str) -> Option<&Mismatch> {
        self.mismatches.iter().find(|mismatch| mismatch.field == field)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl fmt::Display for VerifyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.matches {
            return f.write_str("OK: all fields match");
        }
        write!(f, "FAILED: {} mismatch(es)", self.mismatches.len())?;
        for mismatch in &self.mismatches {
            write!(f, "\n  - {mismatch}")?;
        }
        Ok(())
    }
}

/// How piles are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PileCheck {
    /// Sizes of all four piles.
    #[default]
    Sizes,
    /// Order-independent card ids of all four piles.
    Contents,
}

fn diff_field<T>(out: &mut Vec<Mismatch>, field: impl Into<String>, expected: T, actual: T)
where
    T: PartialEq + Into<Value>,
{
    if expected != actual {
        out.push(Mismatch::new(field, expected, actual));
    }
}

pub struct Comparator<C, R> {
    powers: IdTable<PowerType>,
    ignored_powers: BTreeSet<String>,
    catalog: Catalog<C, R>,
}

impl<C, R> Comparator<C, R>
where
    C: Copy + Ord + Debug,
    R: Copy + Ord + Debug,
{
    pub fn new(catalog: Catalog<C, R>) -> HarnessResult<Self> {
        Ok(Self {
            powers: IdTable::standard_powers()?,
            ignored_powers: BTreeSet::from([DIE_POWER_ID.to_string()]),
            catalog,
        })
    }

    pub fn with_power_table(mut self, powers: IdTable<PowerType>) -> Self {
        self.powers = powers;
        self
    }

    /// Skip a live power id during power comparison.
    pub fn ignore_power(mut self, power_id: impl Into<String>) -> Self {
        self.ignored_powers.insert(power_id.into());
        self
    }

    pub fn catalog(&self) -> &Catalog<C, R> {
        &self.catalog
    }

    /// Compare a reference combat against a live combat view.
    pub fn verify<E>(&self, sim: &E, live: &CombatSnapshot, piles: PileCheck) -> VerifyResult
    where
        E: ReferenceCombat<Card = C, Relic = R>,
    {
        let mut out = Vec::new();

        let player = sim.player();
        diff_field(&mut out, "player.hp", player.hp, live.player.current_hp);
        diff_field(&mut out, "player.max_hp", player.max_hp, live.player.max_hp);
        diff_field(&mut out, "player.block", player.block, live.player.block);
        diff_field(&mut out, "player.energy", player.energy, live.player.energy);
        self.diff_powers(&mut out, "player", &sim.player_powers(), &live.player.powers);

        let sim_monsters = sim.monsters();
        let live_monsters: Vec<_> = live.living_monsters().collect();
        if sim_monsters.len() != live_monsters.len() {
            out.push(Mismatch::new(
                "monster_count",
                sim_monsters.len(),
                live_monsters.len(),
            ));
        } else {
            for (i, (expected, actual)) in sim_monsters.iter().zip(&live_monsters).enumerate() {
                let prefix = format!("monster[{i}]({})", actual.name);
                diff_field(&mut out, format!("{prefix}.hp"), expected.hp, actual.current_hp);
                diff_field(&mut out, format!("{prefix}.block"), expected.block, actual.block);
                self.diff_powers(&mut out, &prefix, &sim.monster_powers(i), &actual.powers);
            }
        }

        for pile in Pile::ALL {
            let expected = sim.pile(pile);
            let actual = live.pile(pile);
            match piles {
                PileCheck::Sizes => {
                    diff_field(&mut out, pile.size_field(), expected.len(), actual.len());
                }
                PileCheck::Contents => {
                    let mut expected: Vec<String> = expected
                        .iter()
                        .map(|instance| self.catalog.card_label(instance.card))
                        .collect();
                    let mut actual: Vec<String> =
                        actual.iter().map(|card| card.card_id.clone()).collect();
                    expected.sort();
                    actual.sort();
                    diff_field(&mut out, pile.wire_key(), expected, actual);
                }
            }
        }

        if let (Some(die), Some(expected)) = (live.player.power(DIE_POWER_ID), sim.die_roll()) {
            diff_field(&mut out, "die_roll", expected, die.amount);
        }

        VerifyResult::from_mismatches(out)
    }

    /// Compare relic sets, ignoring the always-present die relic.
    pub fn verify_relics<E>(&self, sim: &E, live: &Snapshot) -> VerifyResult
    where
        E: ReferenceCombat<Card = C, Relic = R>,
    {
        let mut expected: Vec<String> = sim
            .relics()
            .into_iter()
            .map(|relic| self.catalog.relic_label(relic))
            .filter(|id| *id != self.catalog.die_relic)
            .collect();
        let mut actual: Vec<String> = live
            .relics
            .iter()
            .map(|relic| relic.relic_id.clone())
            .filter(|id| *id != self.catalog.die_relic)
            .collect();
        expected.sort();
        actual.sort();

        let mut out = Vec::new();
        diff_field(&mut out, "relics", expected, actual);
        VerifyResult::from_mismatches(out)
    }

    /// [`Comparator::verify`], logging the rendered report.
    pub fn verify_and_report<E>(&self, sim: &E, live: &CombatSnapshot, piles: PileCheck) -> VerifyResult
    where
        E: ReferenceCombat<Card = C, Relic = R>,
    {
        let result = self.verify(sim, live, piles);
        info!("{result}");
        result
    }

    fn diff_powers(
        &self,
        out: &mut Vec<Mismatch>,
        prefix: &str,
        sim: &BTreeMap<PowerType, i32>,
        live: &[Power],
    ) {
        let mut seen = BTreeSet::new();
        for power in live {
            if self.ignored_powers.contains(&power.power_id) {
                continue;
            }
            let field = format!("{prefix}.power({})", power.power_id);
            let kind = self
                .powers
                .value(&power.power_id)
                .or_else(|| PowerType::from_name(&power.power_id));
            match kind {
                Some(kind) => {
                    seen.insert(kind);
                    let expected = sim.get(&kind).copied().unwrap_or(0);
                    if expected != power.amount {
                        out.push(
                            Mismatch::new(field, expected, power.amount).with_detail(format!(
                                "sim has {expected}, live has {}",
                                power.amount
                            )),
                        );
                    }
                }
                None => out.push(
                    Mismatch::new(field, Value::Null, power.amount)
                        .with_detail(format!("unmapped power identifier {:?}", power.power_id)),
                ),
            }
        }

        for (kind, amount) in sim {
            if *amount == 0 || seen.contains(kind) {
                continue;
            }
            match self.powers.wire(*kind) {
                Some(wire) => out.push(
                    Mismatch::new(format!("{prefix}.power({wire})"), *amount, 0)
                        .with_detail(format!("sim has {amount}, live has 0")),
                ),
                None => out.push(
                    Mismatch::new(format!("{prefix}.power({kind:?})"), *amount, Value::Null)
                        .with_detail(format!("unmapped power identifier {kind:?}")),
                ),
            }
        }
    }
}
