use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a member of the binary tree.
///
/// # Examples
///
/// ```
/// use binary_engine::core::member::MemberId;
///
/// let a = MemberId::new("alice");
/// let b = MemberId::new("bob");
/// assert_ne!(a, b);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MemberId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// One of the two downline slots of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// Left first, then right: the order every traversal visits children in.
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is neither `left` nor `right`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSideError(pub String);

impl fmt::Display for ParseSideError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "position must be 'left' or 'right', got '{}'", self.0)
    }
}

impl std::error::Error for ParseSideError {}

impl FromStr for Side {
    type Err = ParseSideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(Side::Left),
            "right" => Ok(Side::Right),
            _ => Err(ParseSideError(s.to_string())),
        }
    }
}

/// Random 8-digit member code in `10000000..99999999`.
pub fn generate_member_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(10_000_000..99_999_999);
    format!("{:08}", n)
}

/// True when `code` is exactly eight ASCII digits.
pub fn is_valid_member_code(code: &str) -> bool {
    code.len() == 8 && code.bytes().all(|b| b.is_ascii_digit())
}

/// A member occupying one node of the binary tree.
///
/// `sponsor_id` and `position` point at the tree parent and the slot this
/// member holds under it; both are set once at placement and never change.
/// A member holds at most one child per side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    /// 8-digit public code.
    pub code: String,
    pub name: String,
    pub sponsor_id: Option<MemberId>,
    pub position: Option<Side>,
    pub left_child_id: Option<MemberId>,
    pub right_child_id: Option<MemberId>,
    /// Unconsumed volume accrued on the left leg.
    pub network_volume_left: Decimal,
    /// Unconsumed volume accrued on the right leg.
    pub network_volume_right: Decimal,
    pub total_earnings: Decimal,
    /// Withdrawable balance.
    pub balance: Decimal,
    /// Lifetime paid-cycle count.
    pub cycle_count: u32,
    pub joined_at: DateTime<Utc>,
}

impl Member {
    /// A fresh unattached member with zeroed volumes and earnings.
    pub fn new(id: MemberId, code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            code: code.into(),
            name: name.into(),
            sponsor_id: None,
            position: None,
            left_child_id: None,
            right_child_id: None,
            network_volume_left: Decimal::ZERO,
            network_volume_right: Decimal::ZERO,
            total_earnings: Decimal::ZERO,
            balance: Decimal::ZERO,
            cycle_count: 0,
            joined_at: Utc::now(),
        }
    }

    /// Attach under `parent` on `side`.
    pub fn placed_under(mut self, parent: MemberId, side: Side) -> Self {
        self.sponsor_id = Some(parent);
        self.position = Some(side);
        self
    }

    /// Preset leg volumes (seeding and tests).
    pub fn with_volumes(mut self, left: Decimal, right: Decimal) -> Self {
        self.network_volume_left = left;
        self.network_volume_right = right;
        self
    }

    pub fn is_root(&self) -> bool {
        self.sponsor_id.is_none()
    }

    pub fn child(&self, side: Side) -> Option<&MemberId> {
        match side {
            Side::Left => self.left_child_id.as_ref(),
            Side::Right => self.right_child_id.as_ref(),
        }
    }

    pub fn child_mut(&mut self, side: Side) -> &mut Option<MemberId> {
        match side {
            Side::Left => &mut self.left_child_id,
            Side::Right => &mut self.right_child_id,
        }
    }

    pub fn volume(&self, side: Side) -> Decimal {
        match side {
            Side::Left => self.network_volume_left,
            Side::Right => self.network_volume_right,
        }
    }

    pub fn volume_mut(&mut self, side: Side) -> &mut Decimal {
        match side {
            Side::Left => &mut self.network_volume_left,
            Side::Right => &mut self.network_volume_right,
        }
    }

    /// First empty slot, preferring left.
    pub fn open_side(&self) -> Option<Side> {
        Side::BOTH.into_iter().find(|s| self.child(*s).is_none())
    }

    pub fn is_full(&self) -> bool {
        self.left_child_id.is_some() && self.right_child_id.is_some()
    }

    /// Both legs, left then right.
    pub fn children(&self) -> impl Iterator<Item = (Side, &MemberId)> + '_ {
        Side::BOTH
            .into_iter()
            .filter_map(move |s| self.child(s).map(|id| (s, id)))
    }
}

/// Input for enrolling a new member.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewMember {
    /// Explicit identity; generated when absent.
    pub id: Option<MemberId>,
    pub name: String,
}

impl NewMember {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }

    pub fn with_id(mut self, id: MemberId) -> Self {
        self.id = Some(id);
        self
    }
}

/// A recorded sale. Any sale makes its seller an active member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    pub id: Uuid,
    pub member_id: MemberId,
    pub amount: Decimal,
    pub recorded_at: DateTime<Utc>,
}

impl Sale {
    pub fn new(member_id: MemberId, amount: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            member_id,
            amount,
            recorded_at: Utc::now(),
        }
    }
}
