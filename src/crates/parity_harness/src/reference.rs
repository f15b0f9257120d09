//! Interface to the in-process reference combat engine.
//!
//! The harness never implements combat rules itself. It drives whatever
//! engine implements [`ReferenceCombat`] through direct mutator calls and
//! reads it back through the accessors for comparison.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::snapshot::Pile;

/// Power vocabulary of the reference engine.
///
/// Variant names double as the identifiers sent in a `set` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PowerType {
    Strength,
    Vulnerable,
    Weak,
    Ritual,
    CurlUp,
    Dexterity,
    Thorns,
    Metallicize,
    Barricade,
    Rage,
    FeelNoPain,
    DarkEmbrace,
    Rupture,
    Combust,
    Evolve,
    FireBreathing,
    Anger,
    Entangled,
    Artifact,
    SporeCloud,
    Juggernaut,
    DemonForm,
    Corruption,
    DoubleTap,
    NoDraw,
    Berserk,
    Poison,
    Accuracy,
    AfterImage,
    Envenom,
    NoxiousFumes,
    AThousandCuts,
    InfiniteBlades,
    WellLaidPlans,
    WraithForm,
    ToolsOfTheTrade,
    Distraction,
    CorpseExplosion,
    Burst,
    Storm,
    Loop,
    BufferPower,
    Heatsink,
    EchoForm,
    DrawPerTurn,
    Electrodynamics,
    OrbEvoke,
    OrbPassive,
    StaticDischarge,
    AmplifyDark,
    EnergyPerTurn,
    TripleAttack,
    MentalFortress,
    Rushdown,
    LikeWater,
    OmegaPower,
    DevotionPower,
    SimmeringFury,
    NirvanaPower,
    ForesightPower,
    StudyPower,
    DevaFormPower,
    EstablishmentPower,
    BattleHymnPower,
    ConclusionPower,
    MiracleCount,
    LoseStrength,
    ConjureBladePower,
}

impl PowerType {
    pub const ALL: [PowerType; 68] = [
        PowerType::Strength,
        PowerType::Vulnerable,
        PowerType::Weak,
        PowerType::Ritual,
        PowerType::CurlUp,
        PowerType::Dexterity,
        PowerType::Thorns,
        PowerType::Metallicize,
        PowerType::Barricade,
        PowerType::Rage,
        PowerType::FeelNoPain,
        PowerType::DarkEmbrace,
        PowerType::Rupture,
        PowerType::Combust,
        PowerType::Evolve,
        PowerType::FireBreathing,
        PowerType::Anger,
        PowerType::Entangled,
        PowerType::Artifact,
        PowerType::SporeCloud,
        PowerType::Juggernaut,
        PowerType::DemonForm,
        PowerType::Corruption,
        PowerType::DoubleTap,
        PowerType::NoDraw,
        PowerType::Berserk,
        PowerType::Poison,
        PowerType::Accuracy,
        PowerType::AfterImage,
        PowerType::Envenom,
        PowerType::NoxiousFumes,
        PowerType::AThousandCuts,
        PowerType::InfiniteBlades,
        PowerType::WellLaidPlans,
        PowerType::WraithForm,
        PowerType::ToolsOfTheTrade,
        PowerType::Distraction,
        PowerType::CorpseExplosion,
        PowerType::Burst,
        PowerType::Storm,
        PowerType::Loop,
        PowerType::BufferPower,
        PowerType::Heatsink,
        PowerType::EchoForm,
        PowerType::DrawPerTurn,
        PowerType::Electrodynamics,
        PowerType::OrbEvoke,
        PowerType::OrbPassive,
        PowerType::StaticDischarge,
        PowerType::AmplifyDark,
        PowerType::EnergyPerTurn,
        PowerType::TripleAttack,
        PowerType::MentalFortress,
        PowerType::Rushdown,
        PowerType::LikeWater,
        PowerType::OmegaPower,
        PowerType::DevotionPower,
        PowerType::SimmeringFury,
        PowerType::NirvanaPower,
        PowerType::ForesightPower,
        PowerType::StudyPower,
        PowerType::DevaFormPower,
        PowerType::EstablishmentPower,
        PowerType::BattleHymnPower,
        PowerType::ConclusionPower,
        PowerType::MiracleCount,
        PowerType::LoseStrength,
        PowerType::ConjureBladePower,
    ];

    /// Parse a variant name such as `"WraithForm"`.
    pub fn from_name(name: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(name.to_string())).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OrbType {
    Lightning,
    Frost,
    Dark,
}

/// Playable character, as the reference engine and the `start` command name it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Character {
    Ironclad,
    Silent,
    Defect,
    Watcher,
}

impl Character {
    /// Identifier passed to `start`.
    pub fn wire_name(self) -> &'static str {
        match self {
            Character::Ironclad => "BG_IRONCLAD",
            Character::Silent => "BG_SILENT",
            Character::Defect => "BG_DEFECT",
            Character::Watcher => "BG_WATCHER",
        }
    }
}

impl fmt::Display for Character {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayerState {
    pub hp: i32,
    pub max_hp: i32,
    pub block: i32,
    pub energy: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonsterState {
    pub name: String,
    pub hp: i32,
    pub block: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CardInstance<C> {
    pub card: C,
    pub upgraded: bool,
}

/// One monster handed to [`ReferenceFactory::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonsterSetup {
    pub name: String,
    pub hp: i32,
    pub block: i32,
    pub powers: BTreeMap<PowerType, i32>,
}

/// A combat in progress inside the reference engine.
pub trait ReferenceCombat {
    type Card: Copy + Ord + fmt::Debug;
    type Relic: Copy + Ord + fmt::Debug;
    type Error: fmt::Display;

    fn player(&self) -> PlayerState;
    /// Monsters still in the fight, in roster order.
    fn monsters(&self) -> Vec<MonsterState>;
    fn pile(&self, pile: Pile) -> Vec<CardInstance<Self::Card>>;
    fn relics(&self) -> Vec<Self::Relic>;
    fn player_powers(&self) -> BTreeMap<PowerType, i32>;
    /// Powers of the monster at `index` in [`ReferenceCombat::monsters`].
    fn monster_powers(&self, index: usize) -> BTreeMap<PowerType, i32>;

    /// Last die roll, for engines that model one.
    fn die_roll(&self) -> Option<i32> {
        None
    }

    fn player_power(&self, power: PowerType) -> i32 {
        self.player_powers().get(&power).copied().unwrap_or(0)
    }

    fn set_player_energy(&mut self, energy: i32);
    fn set_player_max_hp(&mut self, max_hp: i32);
    fn set_player_hp(&mut self, hp: i32);
    fn set_player_block(&mut self, block: i32);
    fn clear_relics(&mut self);
    fn add_relic(&mut self, relic: Self::Relic);
    fn apply_player_power(&mut self, power: PowerType, amount: i32);
    fn set_orb_slots(&mut self, slots: usize);
    fn channel_orb(&mut self, orb: OrbType);
    fn add_card(&mut self, pile: Pile, card: Self::Card, upgraded: bool);
    fn set_die_value(&mut self, value: i32);

    /// Play the card at `hand_index` (0-based), optionally at a target
    /// monster and with an answer for any choice the card asks for.
    fn play_card(
        &mut self,
        hand_index: usize,
        target: Option<usize>,
        choice: Option<usize>,
    ) -> Result<(), Self::Error>;
}

/// Builds fresh reference combats.
pub trait ReferenceFactory {
    type Combat: ReferenceCombat;

    fn create(&self, monsters: &[MonsterSetup], seed: u64, character: Character) -> Self::Combat;
}
