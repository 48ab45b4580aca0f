//! Value Objects for the Tradepost domain
//!
//! Immutable, validated domain primitives.
//! All value objects enforce invariants at construction time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Domain errors for value object validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Endpoint names must be short identifiers
    #[error("Invalid endpoint name: {0}")]
    InvalidEndpointName(String),

    /// Stack amount out of range for its item kind
    #[error("Invalid item stack: {0}")]
    InvalidItemStack(String),

    /// Actor display names must be non-empty
    #[error("Invalid actor: {0}")]
    InvalidActor(String),
}

// =============================================================================
// Actor identity
// =============================================================================

/// Stable actor identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(Uuid);

impl ActorId {
    /// Wrap an existing UUID
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a fresh identifier (tests and tooling)
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ActorId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Reference to an actor.
///
/// Identity is the id alone; the display name is advisory and may go stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorRef {
    pub id: ActorId,
    pub name: String,
}

impl ActorRef {
    /// Create an actor reference
    ///
    /// # Errors
    /// Returns `DomainError::InvalidActor` if the display name is blank
    pub fn new(id: ActorId, name: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::InvalidActor(format!("actor {} has an empty name", id)));
        }
        Ok(Self { id, name })
    }
}

impl PartialEq for ActorRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ActorRef {}

impl fmt::Display for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

// =============================================================================
// Endpoint name
// =============================================================================

/// Case-insensitive endpoint name.
///
/// # Invariants
/// - 1 to 32 characters
/// - ASCII alphanumerics, `-` and `_` only
/// - Equality, ordering and hashing use the lowercase key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EndpointName {
    display: String,
    key: String,
}

impl EndpointName {
    /// Maximum name length
    pub const MAX_LEN: usize = 32;

    /// Create a validated endpoint name
    ///
    /// # Errors
    /// Returns `DomainError::InvalidEndpointName` on empty, overlong or
    /// non-identifier input
    pub fn new(name: &str) -> Result<Self, DomainError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::InvalidEndpointName("name is empty".to_string()));
        }
        if name.len() > Self::MAX_LEN {
            return Err(DomainError::InvalidEndpointName(format!(
                "'{}' is longer than {} characters",
                name,
                Self::MAX_LEN
            )));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(DomainError::InvalidEndpointName(format!(
                "'{}' may only contain letters, digits, '-' and '_'",
                name
            )));
        }
        Ok(Self {
            display: name.to_string(),
            key: name.to_ascii_lowercase(),
        })
    }

    /// Name as originally entered
    pub fn as_str(&self) -> &str {
        &self.display
    }

    /// Lowercase lookup key
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl PartialEq for EndpointName {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for EndpointName {}

impl Hash for EndpointName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for EndpointName {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EndpointName {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

impl TryFrom<String> for EndpointName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<EndpointName> for String {
    fn from(name: EndpointName) -> Self {
        name.display
    }
}

impl fmt::Display for EndpointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display)
    }
}

/// Opaque handle the World uses to find an endpoint's container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerRef(pub String);

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A point in a named world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Location {
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
    }

    /// Euclidean distance, `None` across worlds
    pub fn distance_to(&self, other: &Location) -> Option<f64> {
        if self.world != other.world {
            return None;
        }
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        Some((dx * dx + dy * dy + dz * dz).sqrt())
    }
}

// =============================================================================
// Side
// =============================================================================

/// One of the two positions in a trade session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    One,
    Two,
}

impl Side {
    /// Both sides in evaluation order
    pub const ALL: [Side; 2] = [Side::One, Side::Two];

    /// The opposite side
    pub fn other(self) -> Side {
        match self {
            Side::One => Side::Two,
            Side::Two => Side::One,
        }
    }

    /// Array index for per-side storage
    pub fn index(self) -> usize {
        match self {
            Side::One => 0,
            Side::Two => 1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::One => write!(f, "side 1"),
            Side::Two => write!(f, "side 2"),
        }
    }
}

// =============================================================================
// Items
// =============================================================================

/// Item type plus metadata. Stacks merge only when kinds are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKind {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<String>,
    pub max_stack: u32,
}

impl ItemKind {
    pub fn new(id: impl Into<String>, max_stack: u32) -> Self {
        Self {
            id: id.into(),
            meta: None,
            max_stack,
        }
    }

    pub fn with_meta(mut self, meta: impl Into<String>) -> Self {
        self.meta = Some(meta.into());
        self
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.meta {
            Some(meta) => write!(f, "{}[{}]", self.id, meta),
            None => write!(f, "{}", self.id),
        }
    }
}

/// A stack of identical items.
///
/// # Invariants
/// - `1 <= amount <= kind.max_stack`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub kind: ItemKind,
    pub amount: u32,
}

impl ItemStack {
    /// Create a validated stack
    ///
    /// # Errors
    /// Returns `DomainError::InvalidItemStack` if the amount is zero or
    /// exceeds the kind's maximum
    pub fn new(kind: ItemKind, amount: u32) -> Result<Self, DomainError> {
        if kind.max_stack == 0 {
            return Err(DomainError::InvalidItemStack(format!("{} has max stack 0", kind)));
        }
        if amount == 0 || amount > kind.max_stack {
            return Err(DomainError::InvalidItemStack(format!(
                "{} x{} outside 1..={}",
                kind, amount, kind.max_stack
            )));
        }
        Ok(Self { kind, amount })
    }

    /// Remaining capacity before the stack is full
    pub fn space(&self) -> u32 {
        self.kind.max_stack.saturating_sub(self.amount)
    }

    pub fn can_merge(&self, other: &ItemStack) -> bool {
        self.kind == other.kind
    }
}

impl fmt::Display for ItemStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x{}", self.kind, self.amount)
    }
}

/// Ordered container or inventory slots; `None` is an empty slot.
pub type Slots = Vec<Option<ItemStack>>;

/// Non-empty stacks of `slots`, in slot order
pub fn stacks_of(slots: &[Option<ItemStack>]) -> Vec<ItemStack> {
    slots.iter().flatten().cloned().collect()
}

/// True when no slot holds anything
pub fn is_vacant(slots: &[Option<ItemStack>]) -> bool {
    slots.iter().all(Option::is_none)
}

/// Total amount per item kind. Used for conservation checks and summaries.
pub fn tally<'a>(stacks: impl IntoIterator<Item = &'a ItemStack>) -> BTreeMap<ItemKind, u64> {
    let mut totals = BTreeMap::new();
    for stack in stacks {
        *totals.entry(stack.kind.clone()).or_insert(0) += u64::from(stack.amount);
    }
    totals
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_endpoint_name_case_insensitive() {
        let a = EndpointName::new("North").unwrap();
        let b = EndpointName::new("north").unwrap();

        assert_eq!(a, b);
        assert_eq!(a.as_str(), "North");
        assert_eq!(a.key(), "north");

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_endpoint_name_validation() {
        assert!(EndpointName::new("").is_err());
        assert!(EndpointName::new("   ").is_err());
        assert!(EndpointName::new("has space").is_err());
        assert!(EndpointName::new(&"x".repeat(33)).is_err());
        assert!(EndpointName::new("shop_2-east").is_ok());
    }

    #[test]
    fn test_endpoint_name_serde_roundtrip_keeps_display() {
        let name = EndpointName::new("South").unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"South\"");

        let parsed: EndpointName = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.as_str(), "South");
        assert!(serde_json::from_str::<EndpointName>("\"bad name\"").is_err());
    }

    #[test]
    fn test_item_stack_bounds() {
        let diamond = ItemKind::new("diamond", 64);
        assert!(ItemStack::new(diamond.clone(), 0).is_err());
        assert!(ItemStack::new(diamond.clone(), 65).is_err());

        let stack = ItemStack::new(diamond, 60).unwrap();
        assert_eq!(stack.space(), 4);
    }

    #[test]
    fn test_meta_prevents_merge() {
        let plain = ItemStack::new(ItemKind::new("sword", 1), 1).unwrap();
        let named = ItemStack::new(ItemKind::new("sword", 1).with_meta("Excalibur"), 1).unwrap();
        assert!(!plain.can_merge(&named));
    }

    #[test]
    fn test_tally_sums_across_stacks() {
        let kind = ItemKind::new("emerald", 64);
        let slots: Slots = vec![
            Some(ItemStack::new(kind.clone(), 10).unwrap()),
            None,
            Some(ItemStack::new(kind.clone(), 5).unwrap()),
        ];

        let totals = tally(stacks_of(&slots).iter());
        assert_eq!(totals.get(&kind), Some(&15));
        assert!(!is_vacant(&slots));
        assert!(is_vacant(&[None, None]));
    }

    #[test]
    fn test_location_distance() {
        let a = Location::new("overworld", 0.0, 64.0, 0.0);
        let b = Location::new("overworld", 3.0, 64.0, 4.0);
        let c = Location::new("nether", 3.0, 64.0, 4.0);

        assert_eq!(a.distance_to(&b), Some(5.0));
        assert_eq!(a.distance_to(&c), None);
    }

    #[test]
    fn test_side_other() {
        assert_eq!(Side::One.other(), Side::Two);
        assert_eq!(Side::Two.other(), Side::One);
        assert_eq!(Side::Two.index(), 1);
    }
}
