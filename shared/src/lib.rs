use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub type UserId = u32;
pub type GameId = u32;

/// Mean earth radius used for all proximity checks.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;
/// Largest accepted magnitude for either coordinate axis, in degrees.
pub const MAX_COORDINATE: f64 = 180.0;

/// Errors surfaced synchronously to callers of the session operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq)]
pub enum GameError {
    #[error("game {0} not found")]
    GameNotFound(GameId),
    #[error("user {0} not found")]
    UserNotFound(UserId),
    #[error("no user named {0:?}")]
    UsernameNotFound(String),
    #[error("region {0} not found")]
    RegionNotFound(usize),
    #[error("user {user} is not in game {game}")]
    PlayerNotInGame { user: UserId, game: GameId },
    #[error("user {0:?} is not playing in any game")]
    MemberNotInGame(String),
    #[error("username {0:?} is already taken")]
    Conflict(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("game {0} is not accepting changes")]
    Closed(GameId),
    #[error("session limit of {0} reached")]
    Full(usize),
}

impl GameError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            GameError::GameNotFound(_)
                | GameError::UserNotFound(_)
                | GameError::UsernameNotFound(_)
                | GameError::RegionNotFound(_)
                | GameError::PlayerNotInGame { .. }
                | GameError::MemberNotInGame(_)
        )
    }
}

pub type GameResult<T> = Result<T, GameError>;

/// A validated point on the globe, in degrees.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    /// Validates raw coordinates. Rejects NaN, infinities and axis
    /// magnitudes above [`MAX_COORDINATE`].
    pub fn new(lat: f64, lon: f64) -> GameResult<Self> {
        for (axis, value) in [("lat", lat), ("lon", lon)] {
            if !value.is_finite() {
                return Err(GameError::Validation(format!("{} is not a number", axis)));
            }
            if value.abs() > MAX_COORDINATE {
                return Err(GameError::Validation(format!(
                    "{} {} is outside +/-{}",
                    axis, value, MAX_COORDINATE
                )));
            }
        }
        Ok(Self { lat, lon })
    }

    /// Great-circle distance in metres.
    pub fn distance_m(&self, other: &LatLon) -> f64 {
        haversine_m(self, other)
    }
}

pub fn haversine_m(a: &LatLon, b: &LatLon) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lon - a.lon).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// A player's last reported position.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Geolocation {
    pub lat: f64,
    pub lon: f64,
    /// Milliseconds since the unix epoch.
    pub updated_at: u64,
}

impl Geolocation {
    pub fn new(position: LatLon, updated_at: u64) -> Self {
        Self {
            lat: position.lat,
            lon: position.lon,
            updated_at,
        }
    }

    pub fn position(&self) -> LatLon {
        LatLon {
            lat: self.lat,
            lon: self.lon,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum RegionType {
    /// The region every session is seeded with.
    Capital,
    Outpost,
}

/// Full attribute set of one region as seen by clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RegionView {
    pub index: usize,
    pub lat: f64,
    pub lon: f64,
    pub radius: f64,
    #[serde(rename = "type")]
    pub region_type: RegionType,
    pub owner: Option<UserId>,
    pub garrison: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum GameStatus {
    Open,
    Active,
    Ended,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// A player's score reached the win threshold.
    Threshold,
    /// The maximum session duration elapsed.
    Timeout,
    /// The last player left.
    Abandoned,
}

/// Immutable copy of a session's state.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GameSnapshot {
    pub id: GameId,
    pub name: String,
    pub status: GameStatus,
    pub users: Vec<UserId>,
    pub geolocations: BTreeMap<UserId, Option<Geolocation>>,
    pub regions: Vec<RegionView>,
    pub troops: BTreeMap<UserId, u32>,
    pub scores: BTreeMap<UserId, u64>,
    pub tick: u64,
    pub created_at: u64,
    pub winner: Option<UserId>,
    pub end_reason: Option<EndReason>,
}

impl GameSnapshot {
    pub fn player_count(&self) -> usize {
        self.users.len()
    }

    pub fn region(&self, index: usize) -> Option<&RegionView> {
        self.regions.get(index)
    }

    pub fn troops_of(&self, user: UserId) -> u32 {
        self.troops.get(&user).copied().unwrap_or(0)
    }

    pub fn score_of(&self, user: UserId) -> u64 {
        self.scores.get(&user).copied().unwrap_or(0)
    }

    pub fn is_ended(&self) -> bool {
        self.status == GameStatus::Ended
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CaptureEvent {
    pub region: usize,
    pub previous_owner: Option<UserId>,
    pub new_owner: UserId,
    pub timestamp: u64,
}

/// Published whenever any region attribute changes. Always carries every
/// region in full.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RegionChange {
    pub game: GameId,
    pub tick: u64,
    pub regions: Vec<RegionView>,
    pub troops: BTreeMap<UserId, u32>,
    pub captures: Vec<CaptureEvent>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum SessionEvent {
    RegionChange(RegionChange),
    Ended {
        game: GameId,
        winner: Option<UserId>,
        reason: EndReason,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UserView {
    pub id: UserId,
    pub username: String,
    pub email: Option<String>,
}

/// How a joining player names the session to enter.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum JoinTarget {
    Game(GameId),
    /// The session that the user with this username is playing in.
    Member(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Request {
    CreateUser {
        username: String,
        password: String,
        email: Option<String>,
    },
    Create {
        name: String,
        creator: UserId,
        lat: f64,
        lon: f64,
    },
    Join {
        target: JoinTarget,
        user: UserId,
        lat: Option<f64>,
        lon: Option<f64>,
    },
    Leave {
        game: GameId,
        user: UserId,
    },
    SetGeolocation {
        game: GameId,
        user: UserId,
        lon: f64,
        lat: f64,
    },
    TransferTroopsToBase {
        game: GameId,
        user: UserId,
        region: usize,
        amount: i64,
    },
    GetGame {
        game: GameId,
    },
    ListenForRegionChange {
        game: GameId,
    },
    Unlisten {
        game: GameId,
    },
}

impl Request {
    /// Join whichever game the user called `username` is playing in.
    pub fn join_member(username: &str, user: UserId) -> Self {
        Request::Join {
            target: JoinTarget::Member(username.to_string()),
            user,
            lat: None,
            lon: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Response {
    User(UserView),
    Game(GameSnapshot),
    Subscribed { game: GameId },
    Unsubscribed { game: GameId },
    Error(GameError),
}

impl From<GameResult<GameSnapshot>> for Response {
    fn from(result: GameResult<GameSnapshot>) -> Self {
        match result {
            Ok(snapshot) => Response::Game(snapshot),
            Err(e) => Response::Error(e),
        }
    }
}

/// Datagram envelope exchanged with clients.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Request { id: u32, request: Request },
    Response { id: u32, response: Response },
    Event(SessionEvent),
}
