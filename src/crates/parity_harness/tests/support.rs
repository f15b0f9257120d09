#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::io::{self, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use parity_harness::{
    relay, CardInstance, Catalog, Character, Command, GameLink, HarnessError, HarnessResult,
    IdTable, MonsterSetup, MonsterState, OrbType, Payload, Pile, PlayerState, PowerType,
    ReferenceCombat, ReferenceFactory, RelayConfig, RelayHandle, Session, Snapshot,
};
use serde_json::{json, Value};

pub fn relay_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_parity-relay") {
        return PathBuf::from(path);
    }

    // Fallback to the workspace target directory.
    let mut path = std::env::current_exe().expect("current exe");
    path.pop(); // deps
    path.pop(); // debug or release
    path.push("parity-relay");
    if cfg!(windows) {
        path.set_extension("exe");
    }
    path
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Read side of an in-memory pipe; EOF once every sender is dropped.
pub struct ChannelReader {
    rx: mpsc::Receiver<Vec<u8>>,
    current: Vec<u8>,
    pos: usize,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.current.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.current = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len() - self.pos);
        buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

pub fn pipe() -> (mpsc::Sender<Vec<u8>>, BufReader<ChannelReader>) {
    let (tx, rx) = mpsc::channel();
    let reader = ChannelReader {
        rx,
        current: Vec::new(),
        pos: 0,
    };
    (tx, BufReader::new(reader))
}

/// Cloneable writer capturing everything into a shared buffer.
#[derive(Clone, Default)]
pub struct SharedOutput(Arc<Mutex<Vec<u8>>>);

impl SharedOutput {
    pub fn lines(&self) -> Vec<String> {
        let buffer = self.0.lock().expect("output lock");
        String::from_utf8_lossy(&buffer)
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn wait_for_line(&self, expected: &str, timeout: Duration) -> bool {
        wait_until(timeout, || self.lines().iter().any(|line| line == expected))
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("output lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct InProcessRelay {
    pub handle: RelayHandle,
    pub input: mpsc::Sender<Vec<u8>>,
    pub output: SharedOutput,
}

impl InProcessRelay {
    pub fn start() -> Self {
        let config = RelayConfig::new("127.0.0.1", 0)
            .with_poll_interval(Duration::from_millis(20))
            .with_idle_backoff(Duration::from_millis(5));
        let (input, reader) = pipe();
        let output = SharedOutput::default();
        let handle = relay::spawn(&config, reader, output.clone()).expect("relay should start");
        Self {
            handle,
            input,
            output,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    pub fn feed(&self, line: &str) {
        self.input
            .send(format!("{line}\n").into_bytes())
            .expect("relay input open");
    }

    /// Connect a raw client and wait until the relay has installed it.
    pub fn attach(&self) -> TcpStream {
        let before = self.handle.generation();
        let stream = TcpStream::connect(self.addr()).expect("connect to relay");
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .expect("read timeout");
        assert!(
            wait_until(Duration::from_secs(2), || self.handle.generation() > before
                && self.handle.is_attached()),
            "relay should install the new client"
        );
        stream
    }
}

/// Read one newline-terminated line from a raw stream.
pub fn read_line(stream: &mut TcpStream) -> io::Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match stream.read(&mut byte)? {
            0 => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
            _ if byte[0] == b'\n' => break,
            _ => line.push(byte[0]),
        }
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

/// A one-shot TCP peer playing the relay's side of a client session.
pub fn scripted_peer<F>(script: F) -> (SocketAddr, thread::JoinHandle<()>)
where
    F: FnOnce(TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind scripted peer");
    let addr = listener.local_addr().expect("peer addr");
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept client");
        script(stream);
    });
    (addr, handle)
}

/// Build one relay payload line.
pub fn payload(ready: bool, commands: &[&str], game_state: Option<Value>) -> String {
    let mut line = json!({
        "error": null,
        "ready_for_command": ready,
        "in_game": game_state.is_some(),
        "available_commands": commands,
    });
    if let Some(state) = game_state {
        line["game_state"] = state;
    }
    line.to_string()
}

pub fn combat_state(player_hp: i32, hand: &[&str]) -> Value {
    json!({
        "floor": 1,
        "screen_type": "NONE",
        "combat_state": {
            "player": {"current_hp": player_hp, "max_hp": 9, "block": 0, "energy": 3, "powers": []},
            "monsters": [{"name": "Jaw Worm", "id": "JawWorm", "current_hp": 8, "max_hp": 8, "block": 0, "powers": []}],
            "hand": hand.iter().map(|id| json!({"id": id})).collect::<Vec<_>>(),
            "draw_pile": [],
            "discard_pile": [],
            "exhaust_pile": [],
            "turn": 1
        }
    })
}

pub fn screen_state(screen: &str, choices: &[&str]) -> Value {
    json!({
        "floor": 1,
        "screen_type": screen,
        "choice_list": choices,
    })
}

#[derive(Debug, Clone)]
pub enum Reply {
    Line(String),
    Timeout,
    Disconnect,
}

/// In-memory [`GameLink`] answering receives from a fixed script.
#[derive(Debug, Default)]
pub struct ScriptedLink {
    pub script: VecDeque<Reply>,
    pub sent: Vec<Command>,
    pub timeouts: Vec<Option<Duration>>,
    pub session: Session,
}

impl ScriptedLink {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            script: replies.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn lines(lines: impl IntoIterator<Item = String>) -> Self {
        Self::new(lines.into_iter().map(Reply::Line))
    }

    pub fn receives(&self) -> usize {
        self.timeouts.len()
    }
}

impl GameLink for ScriptedLink {
    fn send(&mut self, command: &Command) -> HarnessResult<()> {
        self.sent.push(command.clone());
        Ok(())
    }

    fn wait_for_state(&mut self, timeout: Option<Duration>) -> HarnessResult<Option<Snapshot>> {
        self.timeouts.push(timeout);
        match self.script.pop_front() {
            Some(Reply::Line(line)) => {
                let (raw, payload) = Payload::parse(&line)?;
                Ok(self.session.absorb(raw, payload))
            }
            Some(Reply::Disconnect) => Err(HarnessError::Disconnected),
            Some(Reply::Timeout) | None => Err(HarnessError::Timeout(timeout.unwrap_or_default())),
        }
    }

    fn drain(&mut self, _window: Duration) -> HarnessResult<usize> {
        Ok(0)
    }

    fn session(&self) -> &Session {
        &self.session
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TestCard {
    Strike,
    Defend,
    Bash,
    Cleave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TestRelic {
    BurningBlood,
    Anchor,
    Vajra,
}

pub fn catalog() -> Catalog<TestCard, TestRelic> {
    let cards = IdTable::new([
        ("BGStrike_R", TestCard::Strike),
        ("BGDefend_R", TestCard::Defend),
        ("BGBash", TestCard::Bash),
    ])
    .expect("card table");
    let relics = IdTable::new([
        ("BoardGame:BurningBlood", TestRelic::BurningBlood),
        ("BoardGame:BGAnchor", TestRelic::Anchor),
    ])
    .expect("relic table");
    Catalog::new(cards, relics).with_starter_relic(Character::Ironclad, TestRelic::BurningBlood)
}

/// Minimal reference engine recording every mutation.
#[derive(Debug, Clone, Default)]
pub struct MockCombat {
    pub character: Option<Character>,
    pub seed: u64,
    pub player: PlayerState,
    pub player_powers: BTreeMap<PowerType, i32>,
    pub monsters: Vec<MonsterState>,
    pub monster_powers: Vec<BTreeMap<PowerType, i32>>,
    pub hand: Vec<CardInstance<TestCard>>,
    pub draw: Vec<CardInstance<TestCard>>,
    pub discard: Vec<CardInstance<TestCard>>,
    pub exhaust: Vec<CardInstance<TestCard>>,
    pub relics: Vec<TestRelic>,
    pub orb_slots: usize,
    pub orbs: Vec<OrbType>,
    pub die: Option<i32>,
    pub played: Vec<(usize, Option<usize>, Option<usize>)>,
    pub calls: Vec<String>,
}

impl MockCombat {
    fn pile_mut(&mut self, pile: Pile) -> &mut Vec<CardInstance<TestCard>> {
        match pile {
            Pile::Hand => &mut self.hand,
            Pile::Draw => &mut self.draw,
            Pile::Discard => &mut self.discard,
            Pile::Exhaust => &mut self.exhaust,
        }
    }
}

impl ReferenceCombat for MockCombat {
    type Card = TestCard;
    type Relic = TestRelic;
    type Error = String;

    fn player(&self) -> PlayerState {
        self.player
    }

    fn monsters(&self) -> Vec<MonsterState> {
        self.monsters.iter().filter(|m| m.hp > 0).cloned().collect()
    }

    fn pile(&self, pile: Pile) -> Vec<CardInstance<TestCard>> {
        match pile {
            Pile::Hand => self.hand.clone(),
            Pile::Draw => self.draw.clone(),
            Pile::Discard => self.discard.clone(),
            Pile::Exhaust => self.exhaust.clone(),
        }
    }

    fn relics(&self) -> Vec<TestRelic> {
        self.relics.clone()
    }

    fn player_powers(&self) -> BTreeMap<PowerType, i32> {
        self.player_powers.clone()
    }

    fn monster_powers(&self, index: usize) -> BTreeMap<PowerType, i32> {
        self.monster_powers.get(index).cloned().unwrap_or_default()
    }

    fn die_roll(&self) -> Option<i32> {
        self.die
    }

    fn set_player_energy(&mut self, energy: i32) {
        self.player.energy = energy;
        self.calls.push(format!("energy {energy}"));
    }

    fn set_player_max_hp(&mut self, max_hp: i32) {
        self.player.max_hp = max_hp;
        self.calls.push(format!("max_hp {max_hp}"));
    }

    fn set_player_hp(&mut self, hp: i32) {
        self.player.hp = hp;
        self.calls.push(format!("hp {hp}"));
    }

    fn set_player_block(&mut self, block: i32) {
        self.player.block = block;
        self.calls.push(format!("block {block}"));
    }

    fn clear_relics(&mut self) {
        self.relics.clear();
        self.calls.push("clear_relics".to_string());
    }

    fn add_relic(&mut self, relic: TestRelic) {
        self.relics.push(relic);
        self.calls.push(format!("relic {relic:?}"));
    }

    fn apply_player_power(&mut self, power: PowerType, amount: i32) {
        *self.player_powers.entry(power).or_insert(0) += amount;
        self.calls.push(format!("power {power:?} {amount}"));
    }

    fn set_orb_slots(&mut self, slots: usize) {
        self.orb_slots = slots;
        self.calls.push(format!("orb_slots {slots}"));
    }

    fn channel_orb(&mut self, orb: OrbType) {
        self.orbs.push(orb);
        self.calls.push(format!("orb {orb:?}"));
    }

    fn add_card(&mut self, pile: Pile, card: TestCard, upgraded: bool) {
        self.pile_mut(pile).push(CardInstance { card, upgraded });
        self.calls.push(format!("card {pile:?} {card:?} {upgraded}"));
    }

    fn set_die_value(&mut self, value: i32) {
        self.die = Some(value);
        self.calls.push(format!("die {value}"));
    }

    /// Strike deals 6 to the target; every played card is discarded.
    fn play_card(
        &mut self,
        hand_index: usize,
        target: Option<usize>,
        choice: Option<usize>,
    ) -> Result<(), String> {
        if hand_index >= self.hand.len() {
            return Err(format!("no card at hand index {hand_index}"));
        }
        let played = self.hand.remove(hand_index);
        if played.card == TestCard::Strike {
            let monster = self
                .monsters
                .get_mut(target.unwrap_or(0))
                .ok_or_else(|| "no such target".to_string())?;
            monster.hp -= 6;
        }
        self.discard.push(played);
        self.played.push((hand_index, target, choice));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MockFactory;

impl ReferenceFactory for MockFactory {
    type Combat = MockCombat;

    fn create(&self, monsters: &[MonsterSetup], seed: u64, character: Character) -> MockCombat {
        MockCombat {
            character: Some(character),
            seed,
            player: PlayerState {
                hp: 80,
                max_hp: 80,
                block: 0,
                energy: 3,
            },
            monsters: monsters
                .iter()
                .map(|setup| MonsterState {
                    name: setup.name.clone(),
                    hp: setup.hp,
                    block: setup.block,
                })
                .collect(),
            monster_powers: monsters.iter().map(|setup| setup.powers.clone()).collect(),
            relics: vec![TestRelic::BurningBlood],
            ..MockCombat::default()
        }
    }
}
