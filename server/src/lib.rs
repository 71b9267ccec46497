//! # Region Capture Engine
//!
//! Authoritative server for a real-time, location-based multiplayer game.
//! Players walk into circular map regions to capture them, owned regions grow
//! troops every tick, and players score by the number of regions they hold.
//! A session ends when someone reaches the win score, when its maximum
//! duration elapses, or when its last player leaves.
//!
//! ## Architecture
//!
//! ### Sessions
//! Each game is a [`session::GameSession`]: a [`game::GameState`] behind a
//! single-writer lock, a bounded event queue, a periodic tick task and a
//! persistence mirror. Client operations and ticks are serialized per session;
//! different sessions never contend.
//!
//! ### Registry
//! The [`registry::SessionRegistry`] creates sessions, resolves them by id or
//! by member, and retires them once they end. It also owns the
//! [`users::UserDirectory`] every operation resolves users against.
//!
//! ### Game rules
//! - [`region_map`]: the regions of one game and their seeding
//! - [`capture`]: ownership changes caused by position updates
//! - [`economy`]: troop pools, production and transfers
//! - [`score`]: per-tick scoring and win conditions
//!
//! ### Plumbing
//! - [`notifications`]: per-session publish/subscribe with drop-oldest queues
//! - [`ticker`]: the periodic task driving production and scoring
//! - [`persistence`]: asynchronous, retried mirroring into a document store
//! - [`network`]: UDP request/response front used by the binary
//! - [`config`]: engine tunables from TOML and the command line
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::EngineConfig;
//! use server::registry::SessionRegistry;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = SessionRegistry::new(EngineConfig::default())?;
//!     let james = registry.users().create("james", "secret", None).await?;
//!
//!     let game = registry.create("room1", james.id, 52.52, 13.405).await?;
//!     let _subscription = game.listen_for_region_change(|change| {
//!         println!("tick {}: {} captures", change.tick, change.captures.len());
//!     });
//!
//!     // Walking into the capital captures it before the call returns
//!     let snapshot = game.set_geolocation(james.id, 13.405, 52.52).await?;
//!     assert_eq!(snapshot.regions[0].owner, Some(james.id));
//!     Ok(())
//! }
//! ```

pub mod capture;
pub mod config;
pub mod economy;
pub mod game;
pub mod network;
pub mod notifications;
pub mod persistence;
pub mod region_map;
pub mod registry;
pub mod score;
pub mod session;
pub mod ticker;
pub mod users;
pub mod utils;
