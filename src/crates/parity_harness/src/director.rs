//! Scenario setup on both sides, and paired actions.
//!
//! The live side is overwritten with one `set` command and then drained until
//! it reports ready. The reference side is built fresh through mutator calls
//! from the same [`ScenarioSpec`].

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::thread;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::client::GameLink;
use crate::config::DirectorConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::protocol::{Command, CommandSet};
use crate::reference::{
    Character, MonsterSetup, OrbType, PowerType, ReferenceCombat, ReferenceFactory,
};
use crate::resolve::{Resolution, Resolver};
use crate::snapshot::{Pile, ScreenType, Snapshot};

/// Orb slots both sides always get, so orb cards are playable.
pub const ORB_SLOTS: usize = 3;
/// Die value both sides are locked to after setup.
pub const LOCKED_DIE: i32 = 1;

const RELAUNCH_RETRIES: usize = 8;
const PROBE_RETRIES: usize = 5;
const MENU_STEPS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardSpec<C> {
    pub card: C,
    pub upgraded: bool,
}

impl<C> CardSpec<C> {
    pub fn new(card: C) -> Self {
        Self {
            card,
            upgraded: false,
        }
    }

    pub fn upgraded(card: C) -> Self {
        Self {
            card,
            upgraded: true,
        }
    }
}

impl<C> From<C> for CardSpec<C> {
    fn from(card: C) -> Self {
        Self::new(card)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonsterSpec {
    /// Name given to the reference monster; defaults to `Monster_<index>`.
    pub name: Option<String>,
    pub hp: i32,
    pub block: i32,
    pub powers: BTreeMap<PowerType, i32>,
}

impl Default for MonsterSpec {
    fn default() -> Self {
        Self {
            name: None,
            hp: 30,
            block: 0,
            powers: BTreeMap::new(),
        }
    }
}

impl MonsterSpec {
    pub fn new(hp: i32) -> Self {
        Self {
            hp,
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_block(mut self, block: i32) -> Self {
        self.block = block;
        self
    }

    pub fn with_power(mut self, power: PowerType, amount: i32) -> Self {
        self.powers.insert(power, amount);
        self
    }
}

/// Complete starting point of one combat scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioSpec<C, R> {
    pub character: Character,
    pub hand: Vec<CardSpec<C>>,
    pub draw_pile: Vec<CardSpec<C>>,
    pub discard_pile: Vec<CardSpec<C>>,
    pub energy: i32,
    pub player_hp: i32,
    pub player_max_hp: i32,
    pub player_block: i32,
    pub player_powers: BTreeMap<PowerType, i32>,
    /// `None` keeps the character's starter relic.
    pub relics: Option<Vec<R>>,
    pub orbs: Option<Vec<OrbType>>,
    pub monsters: Vec<MonsterSpec>,
    pub seed: u64,
}

impl<C, R> Default for ScenarioSpec<C, R> {
    fn default() -> Self {
        Self {
            character: Character::Ironclad,
            hand: Vec::new(),
            draw_pile: Vec::new(),
            discard_pile: Vec::new(),
            energy: 3,
            player_hp: 9,
            player_max_hp: 9,
            player_block: 0,
            player_powers: BTreeMap::new(),
            relics: None,
            orbs: None,
            monsters: vec![MonsterSpec::new(8)],
            seed: 0,
        }
    }
}

fn card_specs<C, I, T>(cards: I) -> Vec<CardSpec<C>>
where
    I: IntoIterator<Item = T>,
    T: Into<CardSpec<C>>,
{
    cards.into_iter().map(Into::into).collect()
}

impl<C, R> ScenarioSpec<C, R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_character(mut self, character: Character) -> Self {
        self.character = character;
        self
    }

    pub fn with_hand<I, T>(mut self, cards: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<CardSpec<C>>,
    {
        self.hand = card_specs(cards);
        self
    }

    pub fn with_draw_pile<I, T>(mut self, cards: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<CardSpec<C>>,
    {
        self.draw_pile = card_specs(cards);
        self
    }

    pub fn with_discard_pile<I, T>(mut self, cards: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<CardSpec<C>>,
    {
        self.discard_pile = card_specs(cards);
        self
    }

    pub fn with_energy(mut self, energy: i32) -> Self {
        self.energy = energy;
        self
    }

    pub fn with_player_hp(mut self, hp: i32) -> Self {
        self.player_hp = hp;
        self
    }

    pub fn with_player_block(mut self, block: i32) -> Self {
        self.player_block = block;
        self
    }

    pub fn with_player_power(mut self, power: PowerType, amount: i32) -> Self {
        self.player_powers.insert(power, amount);
        self
    }

    pub fn with_relics(mut self, relics: impl IntoIterator<Item = R>) -> Self {
        self.relics = Some(relics.into_iter().collect());
        self
    }

    pub fn with_orbs(mut self, orbs: impl IntoIterator<Item = OrbType>) -> Self {
        self.orbs = Some(orbs.into_iter().collect());
        self
    }

    /// Replace the monster roster.
    pub fn with_monsters(mut self, monsters: impl IntoIterator<Item = MonsterSpec>) -> Self {
        self.monsters = monsters.into_iter().collect();
        self
    }

    /// Shorthand for a single monster with the given hp.
    pub fn with_monster_hp(self, hp: i32) -> Self {
        self.with_monsters([MonsterSpec::new(hp)])
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

#[derive(Serialize)]
struct SetPayload<'a> {
    clear_turn: bool,
    relics: Vec<&'a str>,
    player: PlayerSection<'a>,
    monsters: Vec<MonsterSection<'a>>,
    die: i32,
}

#[derive(Serialize)]
struct PlayerSection<'a> {
    current_hp: i32,
    max_hp: i32,
    energy: i32,
    block: i32,
    max_orbs: usize,
    hand: Vec<WireCard<'a>>,
    draw_pile: Vec<WireCard<'a>>,
    discard_pile: Vec<WireCard<'a>>,
    exhaust_pile: Vec<WireCard<'a>>,
    powers: &'a BTreeMap<PowerType, i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    orbs: Option<&'a [OrbType]>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum WireCard<'a> {
    Plain(&'a str),
    Upgraded { id: &'a str, upgraded: bool },
}

#[derive(Serialize)]
struct MonsterSection<'a> {
    index: usize,
    current_hp: i32,
    max_hp: i32,
    block: i32,
    powers: &'a BTreeMap<PowerType, i32>,
}

fn wire_cards<'a, C, R>(
    catalog: &'a Catalog<C, R>,
    cards: &[CardSpec<C>],
) -> HarnessResult<Vec<WireCard<'a>>>
where
    C: Copy + Ord + Debug,
    R: Copy + Ord + Debug,
{
    cards
        .iter()
        .map(|spec| {
            let id = catalog.card_id(spec.card)?;
            Ok(if spec.upgraded {
                WireCard::Upgraded { id, upgraded: true }
            } else {
                WireCard::Plain(id)
            })
        })
        .collect()
}

impl<C, R> ScenarioSpec<C, R>
where
    C: Copy + Ord + Debug,
    R: Copy + Ord + Debug,
{
    /// Body of the `set` command that puts the live side into this scenario.
    pub fn set_payload(&self, catalog: &Catalog<C, R>) -> HarnessResult<Value> {
        let mut relics = vec![catalog.die_relic.as_str()];
        match &self.relics {
            Some(chosen) => {
                for relic in chosen {
                    relics.push(catalog.relic_id(*relic)?);
                }
            }
            None => {
                if let Some(starter) = catalog.starter_relic(self.character) {
                    relics.push(catalog.relic_id(starter)?);
                }
            }
        }

        let payload = SetPayload {
            clear_turn: true,
            relics,
            player: PlayerSection {
                current_hp: self.player_hp,
                max_hp: self.player_max_hp,
                energy: self.energy,
                block: self.player_block,
                max_orbs: ORB_SLOTS,
                hand: wire_cards(catalog, &self.hand)?,
                draw_pile: wire_cards(catalog, &self.draw_pile)?,
                discard_pile: wire_cards(catalog, &self.discard_pile)?,
                exhaust_pile: Vec::new(),
                powers: &self.player_powers,
                orbs: self.orbs.as_deref(),
            },
            monsters: self
                .monsters
                .iter()
                .enumerate()
                .map(|(index, monster)| MonsterSection {
                    index,
                    current_hp: monster.hp,
                    max_hp: monster.hp,
                    block: monster.block,
                    powers: &monster.powers,
                })
                .collect(),
            die: LOCKED_DIE,
        };
        Ok(serde_json::to_value(&payload)?)
    }

    /// Build the equivalent reference combat.
    ///
    /// Cards go in draw, then discard, then hand order.
    pub fn build_reference<F>(&self, factory: &F) -> F::Combat
    where
        F: ReferenceFactory,
        F::Combat: ReferenceCombat<Card = C, Relic = R>,
    {
        let roster: Vec<MonsterSetup> = self
            .monsters
            .iter()
            .enumerate()
            .map(|(index, monster)| MonsterSetup {
                name: monster
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("Monster_{index}")),
                hp: monster.hp,
                block: monster.block,
                powers: monster.powers.clone(),
            })
            .collect();

        let mut sim = factory.create(&roster, self.seed, self.character);
        sim.set_player_energy(self.energy);
        sim.set_player_max_hp(self.player_max_hp);
        sim.set_player_hp(self.player_hp);
        sim.set_player_block(self.player_block);

        if let Some(relics) = &self.relics {
            sim.clear_relics();
            for relic in relics {
                sim.add_relic(*relic);
            }
        }
        for (power, amount) in &self.player_powers {
            sim.apply_player_power(*power, *amount);
        }

        sim.set_orb_slots(ORB_SLOTS);
        for orb in self.orbs.iter().flatten() {
            sim.channel_orb(*orb);
        }

        for (pile, cards) in [
            (Pile::Draw, &self.draw_pile),
            (Pile::Discard, &self.discard_pile),
            (Pile::Hand, &self.hand),
        ] {
            for spec in cards {
                sim.add_card(pile, spec.card, spec.upgraded);
            }
        }

        sim.set_die_value(LOCKED_DIE);
        sim
    }
}

/// Both sides of a freshly configured scenario.
#[derive(Debug)]
pub struct Scenario<E> {
    /// Live snapshot once the `set` settled, if one arrived.
    pub live: Option<Snapshot>,
    pub reference: E,
}

/// Sets up scenarios and plays cards on both sides.
pub struct Director<C, R> {
    catalog: Catalog<C, R>,
    config: DirectorConfig,
    resolver: Resolver,
}

impl<C, R> Director<C, R>
where
    C: Copy + Ord + Debug,
    R: Copy + Ord + Debug,
{
    pub fn new(catalog: Catalog<C, R>, config: DirectorConfig) -> Self {
        let resolver = Resolver::new(config.resolution);
        Self {
            catalog,
            config,
            resolver,
        }
    }

    pub fn catalog(&self) -> &Catalog<C, R> {
        &self.catalog
    }

    pub fn config(&self) -> &DirectorConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Clear overlay screens left behind by an earlier, possibly failed, test.
    pub fn dismiss_blocking_screens<L>(&self, link: &mut L) -> HarnessResult<()>
    where
        L: GameLink + ?Sized,
    {
        for round in 0..self.config.dismiss_rounds {
            link.drain(self.config.drain_window)?;
            link.send(&Command::State)?;
            let snapshot = match link.wait_for_state(Some(self.config.dismiss_timeout)) {
                Ok(snapshot) => snapshot,
                Err(HarnessError::Timeout(_)) => return Ok(()),
                Err(err) => return Err(err),
            };

            let command = {
                let commands = link.session().commands();
                if commands.can_play_turn() {
                    return Ok(());
                }
                let hand_select = snapshot
                    .as_ref()
                    .map(|snapshot| snapshot.screen_type == ScreenType::HandSelect)
                    .unwrap_or(false);
                if commands.has("choose") {
                    if commands.has("confirm") {
                        Some(Command::Confirm)
                    } else {
                        Some(Command::Choose(0))
                    }
                } else if hand_select {
                    Some(Command::KeyConfirm)
                } else {
                    commands.first_screen_action()
                }
            };

            if let Some(command) = command {
                debug!(round, %command, "dismissing leftover screen");
                link.send(&command)?;
            }
            thread::sleep(self.config.settle_delay);
        }
        Ok(())
    }

    /// Put the live side into `spec` and wait until it reports ready.
    ///
    /// Returns the last snapshot received, settled or not.
    pub fn apply_live<L>(
        &self,
        link: &mut L,
        spec: &ScenarioSpec<C, R>,
    ) -> HarnessResult<Option<Snapshot>>
    where
        L: GameLink + ?Sized,
    {
        self.dismiss_blocking_screens(link)?;
        let payload = spec.set_payload(&self.catalog)?;

        link.drain(self.config.drain_window)?;
        link.send(&Command::Set(payload))?;

        let mut state = None;
        for _ in 0..self.config.set_max_reads {
            match link.wait_for_state(Some(self.config.settle_timeout)) {
                Ok(snapshot) => state = snapshot,
                Err(HarnessError::Timeout(waited)) => {
                    warn!(?waited, "scenario did not settle");
                    break;
                }
                Err(err) => return Err(err),
            }
            if link.session().ready_for_command {
                break;
            }
            thread::sleep(self.config.drain_window);
        }
        Ok(state)
    }

    /// Configure both sides from `spec`.
    pub fn setup<L, F>(
        &self,
        link: &mut L,
        factory: &F,
        spec: &ScenarioSpec<C, R>,
    ) -> HarnessResult<Scenario<F::Combat>>
    where
        L: GameLink + ?Sized,
        F: ReferenceFactory,
        F::Combat: ReferenceCombat<Card = C, Relic = R>,
    {
        let live = self.apply_live(link, spec)?;
        let reference = spec.build_reference(factory);
        Ok(Scenario { live, reference })
    }

    /// Play the same hand index on both sides.
    ///
    /// The live side is fully resolved first. The reference engine receives
    /// the first supplied choice, if any.
    pub fn play_card_both<L, E>(
        &self,
        link: &mut L,
        sim: &mut E,
        hand_index: usize,
        target: Option<usize>,
        choices: &[usize],
    ) -> HarnessResult<Resolution>
    where
        L: GameLink + ?Sized,
        E: ReferenceCombat<Card = C, Relic = R>,
    {
        self.play_on_both(link, sim, hand_index, hand_index, target, choices)
    }

    /// Play `card` on both sides, locating it in each hand separately.
    ///
    /// The live hand is matched on the wire id alone, since upgraded copies
    /// share it; the reference hand is matched on card and upgrade.
    pub fn play_named_card<L, E>(
        &self,
        link: &mut L,
        sim: &mut E,
        live: &Snapshot,
        card: CardSpec<C>,
        target: Option<usize>,
        choices: &[usize],
    ) -> HarnessResult<Resolution>
    where
        L: GameLink + ?Sized,
        E: ReferenceCombat<Card = C, Relic = R>,
    {
        let wire = self.catalog.card_id(card.card)?;
        let live_index = live
            .combat
            .as_ref()
            .and_then(|combat| combat.hand_index_of(wire))
            .ok_or_else(|| {
                HarnessError::scenario(format!("card {wire} not found in live hand"))
            })?;
        let sim_index = sim
            .pile(Pile::Hand)
            .iter()
            .position(|held| held.card == card.card && held.upgraded == card.upgraded)
            .ok_or_else(|| {
                HarnessError::scenario(format!(
                    "card {:?} (upgraded={}) not found in reference hand",
                    card.card, card.upgraded
                ))
            })?;

        self.play_on_both(link, sim, live_index, sim_index, target, choices)
    }

    fn play_on_both<L, E>(
        &self,
        link: &mut L,
        sim: &mut E,
        live_index: usize,
        sim_index: usize,
        target: Option<usize>,
        choices: &[usize],
    ) -> HarnessResult<Resolution>
    where
        L: GameLink + ?Sized,
        E: ReferenceCombat<Card = C, Relic = R>,
    {
        link.send(&Command::play(live_index, target))?;
        let resolution = self.resolver.resolve(link, choices)?;
        sim.play_card(sim_index, target, choices.first().copied())
            .map_err(|err| HarnessError::Reference(err.to_string()))?;
        Ok(resolution)
    }

    /// Navigate the live side into a combat encounter from wherever it is.
    ///
    /// Abandons a run in progress, walks back to the main menu, starts a new
    /// game as `character` and takes the first option on every screen until a
    /// combat section shows up. Returns `None` if that never happens.
    pub fn enter_combat<L>(
        &self,
        link: &mut L,
        character: Character,
        ascension: u32,
    ) -> HarnessResult<Option<Snapshot>>
    where
        L: GameLink + ?Sized,
    {
        link.drain(self.config.drain_window)?;
        let (mut state, mut commands) = self.probe(link)?;
        if in_live_combat(link) {
            return Ok(state);
        }

        if CommandSet(&commands).has("abandon") {
            info!("abandoning run in progress");
            link.send(&Command::Abandon)?;
            (state, commands) = self.wait_and_probe(link, PROBE_RETRIES)?;
        }

        for _ in 0..MENU_STEPS {
            if CommandSet(&commands).has("start") {
                break;
            }
            if let Some(command) = CommandSet(&commands).first_screen_action() {
                link.send(&command)?;
            }
            (state, commands) = self.wait_and_probe(link, PROBE_RETRIES)?;
        }
        if !CommandSet(&commands).has("start") {
            warn!("main menu not reachable");
            return Ok(None);
        }

        info!(%character, ascension, "starting new run");
        link.send(&Command::start(character.wire_name(), ascension))?;
        (state, commands) = self.wait_and_probe(link, RELAUNCH_RETRIES)?;

        for _ in 0..self.config.navigation_attempts {
            if in_live_combat(link) {
                break;
            }
            let available = CommandSet(&commands);
            let offers_choice = state
                .as_ref()
                .map(|snapshot| {
                    !snapshot.choice_list.is_empty()
                        && (snapshot.screen_type == ScreenType::Map || available.has("choose"))
                })
                .unwrap_or(false);
            if offers_choice {
                link.send(&Command::Choose(0))?;
            } else if let Some(command) = available.first_screen_action() {
                link.send(&command)?;
            }
            (state, commands) = self.wait_and_probe(link, PROBE_RETRIES)?;
        }

        if in_live_combat(link) {
            Ok(state)
        } else {
            warn!("combat not reached");
            Ok(None)
        }
    }

    /// Request state once. A timeout yields `(None, [])`.
    fn probe<L>(&self, link: &mut L) -> HarnessResult<(Option<Snapshot>, Vec<String>)>
    where
        L: GameLink + ?Sized,
    {
        link.send(&Command::State)?;
        match link.wait_for_state(Some(self.config.settle_timeout)) {
            Ok(state) => Ok((state, link.session().available_commands.clone())),
            Err(HarnessError::Timeout(_)) => Ok((None, Vec::new())),
            Err(err) => Err(err),
        }
    }

    fn wait_and_probe<L>(
        &self,
        link: &mut L,
        retries: usize,
    ) -> HarnessResult<(Option<Snapshot>, Vec<String>)>
    where
        L: GameLink + ?Sized,
    {
        for _ in 0..retries {
            thread::sleep(self.config.settle_delay);
            link.drain(self.config.drain_window)?;
            let (state, commands) = self.probe(link)?;
            if state.is_some() || !commands.is_empty() {
                return Ok((state, commands));
            }
        }
        Ok((None, Vec::new()))
    }
}

fn in_live_combat<L: GameLink + ?Sized>(link: &L) -> bool {
    let session = link.session();
    session.in_game && session.payload_has_combat()
}
