//! Typed point-in-time view of the live application.
//!
//! Parsing is total: every field carries a default, a missing or wrong-typed
//! value degrades to that default, and unrecognized enum strings land on an
//! explicit sentinel variant. Absence of information is representable, never
//! fatal.

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Deserialize `T`, falling back to `T::default()` on any shape mismatch.
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Deserialize a list element by element. A wrong-typed element becomes
/// `T::default()` in place; a non-list becomes an empty list.
pub(crate) fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let elements = match Value::deserialize(deserializer)? {
        Value::Array(elements) => elements,
        _ => return Ok(Vec::new()),
    };
    Ok(elements
        .into_iter()
        .map(|element| serde_json::from_value(element).unwrap_or_default())
        .collect())
}

fn lenient_act<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_else(|_| default_act()))
}

fn lenient_class<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_else(|_| default_class()))
}

fn lenient_symbol<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_else(|_| default_symbol()))
}

fn default_act() -> i32 {
    1
}

fn default_class() -> String {
    "IRONCLAD".to_string()
}

fn default_symbol() -> String {
    "?".to_string()
}

/// Which screen the live application is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScreenType {
    Event,
    Chest,
    ShopRoom,
    Rest,
    CardReward,
    CombatReward,
    Map,
    BossReward,
    ShopScreen,
    Grid,
    HandSelect,
    GameOver,
    Complete,
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    Attack,
    AttackBuff,
    AttackDebuff,
    AttackDefend,
    Buff,
    Debuff,
    StrongDebuff,
    Debug,
    Defend,
    DefendDebuff,
    DefendBuff,
    Escape,
    Magic,
    None,
    Sleep,
    Stun,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardType {
    #[default]
    Attack,
    Skill,
    Power,
    Status,
    Curse,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardRarity {
    #[default]
    Basic,
    Common,
    Uncommon,
    Rare,
    Special,
    Curse,
    #[serde(other)]
    Unknown,
}

/// The four card piles of a battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Pile {
    Hand,
    Draw,
    Discard,
    Exhaust,
}

impl Pile {
    pub const ALL: [Pile; 4] = [Pile::Hand, Pile::Draw, Pile::Discard, Pile::Exhaust];

    /// Key used for this pile on the wire.
    pub fn wire_key(self) -> &'static str {
        match self {
            Pile::Hand => "hand",
            Pile::Draw => "draw_pile",
            Pile::Discard => "discard_pile",
            Pile::Exhaust => "exhaust_pile",
        }
    }

    /// Field path used when the pile sizes disagree.
    pub fn size_field(self) -> &'static str {
        match self {
            Pile::Hand => "hand_size",
            Pile::Draw => "draw_pile_size",
            Pile::Discard => "discard_pile_size",
            Pile::Exhaust => "exhaust_pile_size",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Power {
    #[serde(rename = "id", deserialize_with = "lenient")]
    pub power_id: String,
    #[serde(deserialize_with = "lenient")]
    pub name: String,
    #[serde(deserialize_with = "lenient")]
    pub amount: i32,
    #[serde(deserialize_with = "lenient")]
    pub damage: i32,
    #[serde(deserialize_with = "lenient")]
    pub misc: i32,
    #[serde(deserialize_with = "lenient")]
    pub just_applied: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Card {
    #[serde(rename = "id", deserialize_with = "lenient")]
    pub card_id: String,
    #[serde(deserialize_with = "lenient")]
    pub name: String,
    #[serde(rename = "type", deserialize_with = "lenient")]
    pub card_type: CardType,
    #[serde(deserialize_with = "lenient")]
    pub rarity: CardRarity,
    #[serde(deserialize_with = "lenient")]
    pub uuid: String,
    #[serde(deserialize_with = "lenient")]
    pub cost: i32,
    #[serde(deserialize_with = "lenient")]
    pub upgrades: i32,
    #[serde(deserialize_with = "lenient")]
    pub has_target: bool,
    #[serde(deserialize_with = "lenient")]
    pub is_playable: bool,
    #[serde(deserialize_with = "lenient")]
    pub exhausts: bool,
    #[serde(deserialize_with = "lenient")]
    pub misc: i32,
    #[serde(deserialize_with = "lenient")]
    pub price: i32,
}

impl Card {
    pub fn is_upgraded(&self) -> bool {
        self.upgrades > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Relic {
    #[serde(rename = "id", deserialize_with = "lenient")]
    pub relic_id: String,
    #[serde(deserialize_with = "lenient")]
    pub name: String,
    #[serde(deserialize_with = "lenient")]
    pub counter: i32,
    #[serde(deserialize_with = "lenient")]
    pub price: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Potion {
    #[serde(rename = "id", deserialize_with = "lenient")]
    pub potion_id: String,
    #[serde(deserialize_with = "lenient")]
    pub name: String,
    #[serde(deserialize_with = "lenient")]
    pub can_use: bool,
    #[serde(deserialize_with = "lenient")]
    pub can_discard: bool,
    #[serde(deserialize_with = "lenient")]
    pub requires_target: bool,
    #[serde(deserialize_with = "lenient")]
    pub price: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapNode {
    #[serde(deserialize_with = "lenient")]
    pub x: i32,
    #[serde(deserialize_with = "lenient")]
    pub y: i32,
    #[serde(deserialize_with = "lenient_symbol")]
    pub symbol: String,
    #[serde(deserialize_with = "lenient_list")]
    pub children: Vec<MapNode>,
}

impl Default for MapNode {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            symbol: default_symbol(),
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerView {
    #[serde(deserialize_with = "lenient")]
    pub max_hp: i32,
    #[serde(deserialize_with = "lenient")]
    pub current_hp: i32,
    #[serde(deserialize_with = "lenient")]
    pub block: i32,
    #[serde(deserialize_with = "lenient")]
    pub energy: i32,
    #[serde(deserialize_with = "lenient_list")]
    pub powers: Vec<Power>,
}

impl PlayerView {
    pub fn power(&self, power_id: &str) -> Option<&Power> {
        self.powers.iter().find(|power| power.power_id == power_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonsterView {
    #[serde(deserialize_with = "lenient")]
    pub name: String,
    #[serde(rename = "id", deserialize_with = "lenient")]
    pub monster_id: String,
    #[serde(deserialize_with = "lenient")]
    pub max_hp: i32,
    #[serde(deserialize_with = "lenient")]
    pub current_hp: i32,
    #[serde(deserialize_with = "lenient")]
    pub block: i32,
    #[serde(deserialize_with = "lenient")]
    pub intent: Intent,
    #[serde(deserialize_with = "lenient")]
    pub half_dead: bool,
    #[serde(deserialize_with = "lenient")]
    pub is_gone: bool,
    #[serde(deserialize_with = "lenient")]
    pub move_id: i32,
    #[serde(deserialize_with = "lenient")]
    pub last_move_id: i32,
    #[serde(deserialize_with = "lenient")]
    pub second_last_move_id: i32,
    #[serde(deserialize_with = "lenient")]
    pub move_base_damage: i32,
    #[serde(deserialize_with = "lenient")]
    pub move_adjusted_damage: i32,
    #[serde(deserialize_with = "lenient")]
    pub move_hits: i32,
    #[serde(deserialize_with = "lenient_list")]
    pub powers: Vec<Power>,
    /// Position in the payload's monster list, stable across removals.
    #[serde(skip_deserializing)]
    pub index: usize,
}

impl MonsterView {
    pub fn power(&self, power_id: &str) -> Option<&Power> {
        self.powers.iter().find(|power| power.power_id == power_id)
    }
}

/// Battle-only portion of a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombatSnapshot {
    #[serde(deserialize_with = "lenient")]
    pub player: PlayerView,
    #[serde(deserialize_with = "lenient_list")]
    pub monsters: Vec<MonsterView>,
    #[serde(deserialize_with = "lenient_list")]
    pub hand: Vec<Card>,
    #[serde(deserialize_with = "lenient_list")]
    pub draw_pile: Vec<Card>,
    #[serde(deserialize_with = "lenient_list")]
    pub discard_pile: Vec<Card>,
    #[serde(deserialize_with = "lenient_list")]
    pub exhaust_pile: Vec<Card>,
    #[serde(deserialize_with = "lenient")]
    pub turn: i32,
    #[serde(deserialize_with = "lenient")]
    pub cards_discarded_this_turn: i32,
}

impl CombatSnapshot {
    pub fn pile(&self, pile: Pile) -> &[Card] {
        match pile {
            Pile::Hand => &self.hand,
            Pile::Draw => &self.draw_pile,
            Pile::Discard => &self.discard_pile,
            Pile::Exhaust => &self.exhaust_pile,
        }
    }

    /// Monsters still on the field, in payload order.
    pub fn living_monsters(&self) -> impl Iterator<Item = &MonsterView> {
        self.monsters.iter().filter(|monster| !monster.is_gone)
    }

    /// Index of the first hand card with the given wire id.
    pub fn hand_index_of(&self, card_id: &str) -> Option<usize> {
        self.hand.iter().position(|card| card.card_id == card_id)
    }
}

/// Immutable view of one parsed state payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    #[serde(deserialize_with = "lenient")]
    pub current_hp: i32,
    #[serde(deserialize_with = "lenient")]
    pub max_hp: i32,
    #[serde(deserialize_with = "lenient")]
    pub floor: i32,
    #[serde(deserialize_with = "lenient_act")]
    pub act: i32,
    #[serde(deserialize_with = "lenient")]
    pub gold: i32,
    #[serde(deserialize_with = "lenient")]
    pub seed: i64,
    #[serde(rename = "class", deserialize_with = "lenient_class")]
    pub character_class: String,
    #[serde(deserialize_with = "lenient")]
    pub ascension_level: i32,
    #[serde(deserialize_with = "lenient_list")]
    pub deck: Vec<Card>,
    #[serde(deserialize_with = "lenient_list")]
    pub relics: Vec<Relic>,
    #[serde(deserialize_with = "lenient_list")]
    pub potions: Vec<Potion>,
    #[serde(rename = "map", deserialize_with = "lenient_list")]
    pub map_nodes: Vec<MapNode>,
    #[serde(deserialize_with = "lenient")]
    pub act_boss: String,
    #[serde(deserialize_with = "lenient")]
    pub screen_type: ScreenType,
    #[serde(deserialize_with = "lenient")]
    pub room_phase: String,
    #[serde(deserialize_with = "lenient")]
    pub room_type: String,
    #[serde(deserialize_with = "lenient")]
    pub is_screen_up: bool,
    #[serde(deserialize_with = "lenient_list")]
    pub choice_list: Vec<String>,
    #[serde(deserialize_with = "lenient")]
    pub screen_state: Map<String, Value>,
    /// Sibling of the game state on the wire, merged in by [`parse_snapshot`].
    #[serde(skip_deserializing)]
    pub available_commands: Vec<String>,
    #[serde(rename = "combat_state", skip_deserializing)]
    pub combat: Option<CombatSnapshot>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            current_hp: 0,
            max_hp: 0,
            floor: 0,
            act: default_act(),
            gold: 0,
            seed: 0,
            character_class: default_class(),
            ascension_level: 0,
            deck: Vec::new(),
            relics: Vec::new(),
            potions: Vec::new(),
            map_nodes: Vec::new(),
            act_boss: String::new(),
            screen_type: ScreenType::None,
            room_phase: String::new(),
            room_type: String::new(),
            is_screen_up: false,
            choice_list: Vec::new(),
            screen_state: Map::new(),
            available_commands: Vec::new(),
            combat: None,
        }
    }
}

impl Snapshot {
    pub fn is_in_combat(&self) -> bool {
        self.combat.is_some()
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.available_commands.iter().any(|command| command == name)
    }
}

/// Build a [`Snapshot`] from a nested game-state object and the payload's
/// sibling `available_commands` list. Never fails.
pub fn parse_snapshot(game_state: &Value, available_commands: &[String]) -> Snapshot {
    // Structs also deserialize from arrays positionally; only objects count.
    let mut snapshot = if game_state.is_object() {
        Snapshot::deserialize(game_state).unwrap_or_default()
    } else {
        Snapshot::default()
    };
    snapshot.combat = game_state.get("combat_state").and_then(parse_combat);
    snapshot.available_commands = available_commands.to_vec();
    snapshot
}

/// An absent, null or empty combat section means no battle is reported.
fn parse_combat(value: &Value) -> Option<CombatSnapshot> {
    let object = value.as_object()?;
    if object.is_empty() {
        return None;
    }
    let mut combat = CombatSnapshot::deserialize(value).ok()?;
    for (index, monster) in combat.monsters.iter_mut().enumerate() {
        monster.index = index;
    }
    Some(combat)
}
