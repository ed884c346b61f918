//! Simulation-side collaborators as seen from the script host.
//!
//! The host never owns simulation objects. It refers to them through
//! [`EntityRef`] values that the simulation resolves on every call; a stale
//! reference simply fails to resolve.

mod memory;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

pub use memory::MemoryWorld;

use crate::legacy::LegacyVm;

/// Script-visible kinds of native objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeTag {
    Container,
    Actor,
    Item,
    World,
    Interactive,
}

impl TypeTag {
    pub const ALL: [TypeTag; 5] = [
        TypeTag::Container,
        TypeTag::Actor,
        TypeTag::Item,
        TypeTag::World,
        TypeTag::Interactive,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Container => "Container",
            TypeTag::Actor => "Actor",
            TypeTag::Item => "Item",
            TypeTag::World => "World",
            TypeTag::Interactive => "Interactive",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Arena slot index plus the generation the slot had when the id was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    pub index: u32,
    pub generation: u32,
}

impl EntityId {
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Typed, non-owning reference to a native object.
///
/// A container reference carries the id of the actor or interactive object
/// that owns the inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityRef {
    pub tag: TypeTag,
    pub id: EntityId,
}

impl EntityRef {
    pub const fn new(tag: TypeTag, id: EntityId) -> Self {
        Self { tag, id }
    }

    pub const fn actor(id: EntityId) -> Self {
        Self::new(TypeTag::Actor, id)
    }

    pub const fn item(id: EntityId) -> Self {
        Self::new(TypeTag::Item, id)
    }

    pub const fn world(id: EntityId) -> Self {
        Self::new(TypeTag::World, id)
    }

    pub const fn interactive(id: EntityId) -> Self {
        Self::new(TypeTag::Interactive, id)
    }

    pub const fn container(owner: EntityId) -> Self {
        Self::new(TypeTag::Container, owner)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.tag, self.id)
    }
}

/// One stack of items inside an inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryEntry {
    pub class_id: u32,
    pub name: String,
    pub count: u32,
    pub equipped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInfo {
    pub class_id: u32,
    pub name: String,
    pub count: u32,
    pub equipped: bool,
    pub value: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Attribute {
    HitPoints,
    HitPointsMax,
    Mana,
    ManaMax,
    Strength,
    Dexterity,
}

impl Attribute {
    pub const ALL: [Attribute; 6] = [
        Attribute::HitPoints,
        Attribute::HitPointsMax,
        Attribute::Mana,
        Attribute::ManaMax,
        Attribute::Strength,
        Attribute::Dexterity,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Attribute::HitPoints => "hitpoints",
            Attribute::HitPointsMax => "hitpoints_max",
            Attribute::Mana => "mana",
            Attribute::ManaMax => "mana_max",
            Attribute::Strength => "strength",
            Attribute::Dexterity => "dexterity",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|attribute| attribute.name().eq_ignore_ascii_case(name))
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Services the simulation offers to the script host.
///
/// Every query returns `None`/`false` when an id no longer resolves, which
/// the native API turns into its documented default.
pub trait Simulation {
    fn is_alive(&self, entity: EntityRef) -> bool;
    fn current_world(&self) -> Option<EntityId>;
    /// Legacy VM instance bound to the currently loaded world.
    fn script_vm(&self) -> Option<Rc<dyn LegacyVm>>;
    fn print_message(&mut self, text: &str);
    fn damage_estimate(&self, attacker: EntityId, victim: EntityId) -> Option<i32>;

    fn inventory_entries(&self, owner: EntityId) -> Option<Vec<InventoryEntry>>;
    fn inventory_owner(&self, owner: EntityId) -> Option<EntityRef>;
    /// Moves up to `count` items of a class and returns how many moved.
    fn transfer_items(&mut self, from: EntityId, to: EntityId, class_id: u32, count: u32) -> u32;

    fn actor_name(&self, actor: EntityId) -> Option<String>;
    fn actor_attribute(&self, actor: EntityId, attribute: Attribute) -> Option<i32>;
    fn set_actor_attribute(&mut self, actor: EntityId, attribute: Attribute, value: i32) -> bool;
    fn actor_is_dead(&self, actor: EntityId) -> Option<bool>;
    fn actor_position(&self, actor: EntityId) -> Option<[f32; 3]>;
    fn give_item(&mut self, actor: EntityId, class_id: u32, count: u32) -> bool;

    fn item_info(&self, item: EntityId) -> Option<ItemInfo>;

    fn world_name(&self, world: EntityId) -> Option<String>;
    fn world_player(&self, world: EntityId) -> Option<EntityId>;
    fn find_actor(&self, world: EntityId, name: &str) -> Option<EntityId>;
    fn spawn_actor(&mut self, world: EntityId, instance: &str, waypoint: &str) -> Option<EntityId>;
    fn spawn_item(&mut self, world: EntityId, class_id: u32, waypoint: &str) -> Option<EntityId>;
    fn world_time(&self, world: EntityId) -> Option<(u32, u32)>;

    fn interactive_name(&self, mob: EntityId) -> Option<String>;
    fn interactive_state(&self, mob: EntityId) -> Option<i32>;
    fn interactive_is_locked(&self, mob: EntityId) -> Option<bool>;
    fn interactive_has_inventory(&self, mob: EntityId) -> Option<bool>;
}

pub type SharedWorld = Rc<RefCell<dyn Simulation>>;

/// Runs a read-only query, yielding `None` if the simulation is busy.
pub(crate) fn query<T>(world: &SharedWorld, f: impl FnOnce(&dyn Simulation) -> Option<T>) -> Option<T> {
    match world.try_borrow() {
        Ok(sim) => f(&*sim),
        Err(_) => {
            log::debug!("simulation busy; native query skipped");
            None
        }
    }
}

/// Runs a mutating call, yielding `None` if the simulation is busy.
pub(crate) fn mutate<T>(
    world: &SharedWorld,
    f: impl FnOnce(&mut dyn Simulation) -> Option<T>,
) -> Option<T> {
    match world.try_borrow_mut() {
        Ok(mut sim) => f(&mut *sim),
        Err(_) => {
            log::debug!("simulation busy; native call skipped");
            None
        }
    }
}
