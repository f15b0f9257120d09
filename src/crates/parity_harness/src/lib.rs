//! Differential-testing harness for a live, screen-driven game and an
//! in-process reference combat engine.
//!
//! The live game is reached through the `parity-relay` binary, which bridges
//! the game's stdio scripting channel to one TCP client. A [`Client`] speaks
//! the line protocol, a [`Director`] puts both sides into the same scenario,
//! the [`Resolver`] drives the live side through any follow-up screens, and a
//! [`Comparator`] reports every field where the two disagree.
//!
//! Typical usage:
//! ```no_run
//! use parity_harness::{Client, ClientConfig, Command, ResolutionPolicy, Resolver};
//!
//! let mut client = Client::attach(ClientConfig::from_env()).expect("relay should be reachable");
//! client.send(&Command::play(0, Some(0))).expect("send should succeed");
//! let resolution = Resolver::new(ResolutionPolicy::default())
//!     .resolve(&mut client, &[])
//!     .expect("resolution should finish");
//! if let Some(combat) = resolution.combat() {
//!     println!("player hp {}", combat.player.current_hp);
//! }
//! ```

mod catalog;
mod client;
mod compare;
mod config;
mod director;
mod error;
mod process;
mod protocol;
mod reference;
pub mod relay;
mod resolve;
mod snapshot;

pub use catalog::{Catalog, DIE_RELIC_ID};
pub use client::{live_client, Client, GameLink, Session};
pub use compare::{
    Comparator, IdTable, Mismatch, PileCheck, VerifyResult, DIE_POWER_ID, STANDARD_POWERS,
};
pub use config::{
    ClientConfig, DirectorConfig, RelayConfig, RelayProcessConfig, ResolutionPolicy,
    DEFAULT_HOST, DEFAULT_PORT, HOST_ENV, PORT_ENV,
};
pub use director::{CardSpec, Director, MonsterSpec, Scenario, ScenarioSpec, LOCKED_DIE, ORB_SLOTS};
pub use error::{HarnessError, HarnessResult};
pub use process::{parse_listen_line, LogLine, LogStream, RelayProcess};
pub use protocol::{Command, CommandSet, Payload, SCREEN_ACTIONS};
pub use reference::{
    CardInstance, Character, MonsterSetup, MonsterState, OrbType, PlayerState, PowerType,
    ReferenceCombat, ReferenceFactory,
};
pub use relay::{ConnectionSlot, RelayHandle};
pub use resolve::{decide, ChoiceQueue, Outcome, Resolution, Resolver, Step};
pub use snapshot::{
    parse_snapshot, Card, CardRarity, CardType, CombatSnapshot, Intent, MapNode, MonsterView,
    Pile, PlayerView, Potion, Power, Relic, ScreenType, Snapshot,
};
