use std::collections::BTreeMap;
use std::rc::Rc;

use super::{Attribute, EntityId, EntityRef, InventoryEntry, ItemInfo, Simulation, TypeTag};
use crate::legacy::LegacyVm;

#[derive(Debug, Clone)]
struct ItemClass {
    name: String,
    value: i32,
}

#[derive(Debug, Clone)]
struct WorldData {
    name: String,
    player: Option<EntityId>,
    time: (u32, u32),
    waypoints: BTreeMap<String, [f32; 3]>,
}

#[derive(Debug, Clone)]
struct ActorData {
    world: EntityId,
    name: String,
    attributes: [i32; 6],
    position: [f32; 3],
    inventory: Vec<InventoryEntry>,
}

#[derive(Debug, Clone)]
struct ItemData {
    class_id: u32,
    count: u32,
    position: [f32; 3],
}

#[derive(Debug, Clone)]
struct InteractiveData {
    name: String,
    state: i32,
    locked: bool,
    inventory: Option<Vec<InventoryEntry>>,
}

#[derive(Debug, Clone)]
enum EntityData {
    World(WorldData),
    Actor(ActorData),
    Item(ItemData),
    Interactive(InteractiveData),
}

impl EntityData {
    fn tag(&self) -> TypeTag {
        match self {
            EntityData::World(_) => TypeTag::World,
            EntityData::Actor(_) => TypeTag::Actor,
            EntityData::Item(_) => TypeTag::Item,
            EntityData::Interactive(_) => TypeTag::Interactive,
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    data: Option<EntityData>,
}

/// Small in-memory simulation: a generational arena of worlds, actors,
/// dropped items and interactive objects.
#[derive(Default)]
pub struct MemoryWorld {
    slots: Vec<Slot>,
    free: Vec<u32>,
    classes: BTreeMap<u32, ItemClass>,
    current_world: Option<EntityId>,
    vm: Option<Rc<dyn LegacyVm>>,
    messages: Vec<String>,
}

const DEFAULT_ATTRIBUTES: [i32; 6] = [40, 40, 10, 10, 10, 10];

impl MemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_item_class(&mut self, class_id: u32, name: &str, value: i32) {
        self.classes.insert(
            class_id,
            ItemClass {
                name: name.to_string(),
                value,
            },
        );
    }

    /// Adds a world; the first world added becomes the current one.
    pub fn add_world(&mut self, name: &str) -> EntityId {
        let id = self.allocate(EntityData::World(WorldData {
            name: name.to_string(),
            player: None,
            time: (8, 0),
            waypoints: BTreeMap::new(),
        }));
        if self.current_world.is_none() {
            self.current_world = Some(id);
        }
        id
    }

    pub fn set_current_world(&mut self, world: Option<EntityId>) {
        self.current_world = world;
    }

    pub fn add_waypoint(&mut self, world: EntityId, name: &str, position: [f32; 3]) -> bool {
        match self.world_mut(world) {
            Some(data) => {
                data.waypoints.insert(name.to_ascii_uppercase(), position);
                true
            }
            None => false,
        }
    }

    pub fn set_time(&mut self, world: EntityId, hour: u32, minute: u32) -> bool {
        match self.world_mut(world) {
            Some(data) => {
                data.time = (hour % 24, minute % 60);
                true
            }
            None => false,
        }
    }

    pub fn add_actor(&mut self, world: EntityId, name: &str) -> EntityId {
        self.allocate(EntityData::Actor(ActorData {
            world,
            name: name.to_string(),
            attributes: DEFAULT_ATTRIBUTES,
            position: [0.0; 3],
            inventory: Vec::new(),
        }))
    }

    pub fn set_player(&mut self, world: EntityId, actor: EntityId) -> bool {
        match self.world_mut(world) {
            Some(data) => {
                data.player = Some(actor);
                true
            }
            None => false,
        }
    }

    /// Adds an interactive object that owns an inventory (chest, cupboard).
    pub fn add_container(&mut self, name: &str, locked: bool) -> EntityId {
        self.allocate(EntityData::Interactive(InteractiveData {
            name: name.to_string(),
            state: 0,
            locked,
            inventory: Some(Vec::new()),
        }))
    }

    /// Adds an interactive object without an inventory (lever, bed).
    pub fn add_interactive(&mut self, name: &str) -> EntityId {
        self.allocate(EntityData::Interactive(InteractiveData {
            name: name.to_string(),
            state: 0,
            locked: false,
            inventory: None,
        }))
    }

    /// Adds a stack to an actor's or container's inventory.
    pub fn add_item(&mut self, owner: EntityId, class_id: u32, count: u32) -> bool {
        let Some(class) = self.classes.get(&class_id).cloned() else {
            return false;
        };
        match self.inventory_mut(owner) {
            Some(inventory) => {
                stack_into(inventory, class_id, &class.name, count);
                true
            }
            None => false,
        }
    }

    /// Marks one item of a class as equipped, splitting it off its stack.
    pub fn equip(&mut self, owner: EntityId, class_id: u32) -> bool {
        let Some(inventory) = self.inventory_mut(owner) else {
            return false;
        };
        let Some(pos) = inventory
            .iter()
            .position(|entry| entry.class_id == class_id && !entry.equipped)
        else {
            return false;
        };
        let mut equipped = inventory[pos].clone();
        equipped.count = 1;
        equipped.equipped = true;
        inventory[pos].count -= 1;
        if inventory[pos].count == 0 {
            inventory.remove(pos);
        }
        inventory.push(equipped);
        true
    }

    /// Drops an item entity into the world at a position.
    pub fn drop_item(&mut self, class_id: u32, count: u32, position: [f32; 3]) -> Option<EntityId> {
        if !self.classes.contains_key(&class_id) || count == 0 {
            return None;
        }
        Some(self.allocate(EntityData::Item(ItemData {
            class_id,
            count,
            position,
        })))
    }

    pub fn set_state(&mut self, mob: EntityId, state: i32) -> bool {
        match self.resolve_mut(mob) {
            Some(EntityData::Interactive(data)) => {
                data.state = state;
                true
            }
            _ => false,
        }
    }

    /// Destroys an entity. Its slot's generation moves on, so ids issued
    /// before this call no longer resolve.
    pub fn despawn(&mut self, id: EntityId) -> bool {
        let Some(slot) = self.slots.get_mut(id.index as usize) else {
            return false;
        };
        if slot.generation != id.generation || slot.data.is_none() {
            return false;
        }
        slot.data = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        if self.current_world == Some(id) {
            self.current_world = None;
        }
        true
    }

    pub fn set_script_vm(&mut self, vm: Option<Rc<dyn LegacyVm>>) {
        self.vm = vm;
    }

    /// Messages shown on screen so far.
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    fn allocate(&mut self, data: EntityData) -> EntityId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.data = Some(data);
            return EntityId::new(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            data: Some(data),
        });
        EntityId::new(index, 0)
    }

    fn resolve(&self, id: EntityId) -> Option<&EntityData> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.data.as_ref()
    }

    fn resolve_mut(&mut self, id: EntityId) -> Option<&mut EntityData> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.data.as_mut()
    }

    fn world(&self, id: EntityId) -> Option<&WorldData> {
        match self.resolve(id)? {
            EntityData::World(data) => Some(data),
            _ => None,
        }
    }

    fn world_mut(&mut self, id: EntityId) -> Option<&mut WorldData> {
        match self.resolve_mut(id)? {
            EntityData::World(data) => Some(data),
            _ => None,
        }
    }

    fn actor(&self, id: EntityId) -> Option<&ActorData> {
        match self.resolve(id)? {
            EntityData::Actor(data) => Some(data),
            _ => None,
        }
    }

    fn actor_mut(&mut self, id: EntityId) -> Option<&mut ActorData> {
        match self.resolve_mut(id)? {
            EntityData::Actor(data) => Some(data),
            _ => None,
        }
    }

    fn interactive(&self, id: EntityId) -> Option<&InteractiveData> {
        match self.resolve(id)? {
            EntityData::Interactive(data) => Some(data),
            _ => None,
        }
    }

    fn inventory(&self, owner: EntityId) -> Option<&Vec<InventoryEntry>> {
        match self.resolve(owner)? {
            EntityData::Actor(data) => Some(&data.inventory),
            EntityData::Interactive(data) => data.inventory.as_ref(),
            _ => None,
        }
    }

    fn inventory_mut(&mut self, owner: EntityId) -> Option<&mut Vec<InventoryEntry>> {
        match self.resolve_mut(owner)? {
            EntityData::Actor(data) => Some(&mut data.inventory),
            EntityData::Interactive(data) => data.inventory.as_mut(),
            _ => None,
        }
    }
}

fn stack_into(inventory: &mut Vec<InventoryEntry>, class_id: u32, name: &str, count: u32) {
    if count == 0 {
        return;
    }
    match inventory
        .iter_mut()
        .find(|entry| entry.class_id == class_id && !entry.equipped)
    {
        Some(entry) => entry.count = entry.count.saturating_add(count),
        None => inventory.push(InventoryEntry {
            class_id,
            name: name.to_string(),
            count,
            equipped: false,
        }),
    }
}

impl Simulation for MemoryWorld {
    fn is_alive(&self, entity: EntityRef) -> bool {
        match entity.tag {
            TypeTag::Container => self.inventory(entity.id).is_some(),
            tag => self
                .resolve(entity.id)
                .is_some_and(|data| data.tag() == tag),
        }
    }

    fn current_world(&self) -> Option<EntityId> {
        self.current_world.filter(|id| self.world(*id).is_some())
    }

    fn script_vm(&self) -> Option<Rc<dyn LegacyVm>> {
        self.vm.clone()
    }

    fn print_message(&mut self, text: &str) {
        log::info!("[message] {text}");
        self.messages.push(text.to_string());
    }

    fn damage_estimate(&self, attacker: EntityId, victim: EntityId) -> Option<i32> {
        let attacker = self.actor(attacker)?;
        let victim = self.actor(victim)?;
        let strength = attacker.attributes[Attribute::Strength.index()];
        let dexterity = victim.attributes[Attribute::Dexterity.index()];
        Some((strength - dexterity / 2).max(0))
    }

    fn inventory_entries(&self, owner: EntityId) -> Option<Vec<InventoryEntry>> {
        self.inventory(owner).cloned()
    }

    fn inventory_owner(&self, owner: EntityId) -> Option<EntityRef> {
        self.inventory(owner)?;
        let tag = self.resolve(owner)?.tag();
        Some(EntityRef::new(tag, owner))
    }

    fn transfer_items(&mut self, from: EntityId, to: EntityId, class_id: u32, count: u32) -> u32 {
        if from == to || self.inventory(to).is_none() {
            return 0;
        }
        let Some(source) = self.inventory_mut(from) else {
            return 0;
        };
        let Some(pos) = source
            .iter()
            .position(|entry| entry.class_id == class_id && !entry.equipped)
        else {
            return 0;
        };
        let moved = count.min(source[pos].count);
        let name = source[pos].name.clone();
        source[pos].count -= moved;
        if source[pos].count == 0 {
            source.remove(pos);
        }
        if let Some(target) = self.inventory_mut(to) {
            stack_into(target, class_id, &name, moved);
        }
        moved
    }

    fn actor_name(&self, actor: EntityId) -> Option<String> {
        self.actor(actor).map(|data| data.name.clone())
    }

    fn actor_attribute(&self, actor: EntityId, attribute: Attribute) -> Option<i32> {
        self.actor(actor)
            .map(|data| data.attributes[attribute.index()])
    }

    fn set_actor_attribute(&mut self, actor: EntityId, attribute: Attribute, value: i32) -> bool {
        match self.actor_mut(actor) {
            Some(data) => {
                data.attributes[attribute.index()] = value;
                true
            }
            None => false,
        }
    }

    fn actor_is_dead(&self, actor: EntityId) -> Option<bool> {
        self.actor(actor)
            .map(|data| data.attributes[Attribute::HitPoints.index()] <= 0)
    }

    fn actor_position(&self, actor: EntityId) -> Option<[f32; 3]> {
        self.actor(actor).map(|data| data.position)
    }

    fn give_item(&mut self, actor: EntityId, class_id: u32, count: u32) -> bool {
        if count == 0 || self.actor(actor).is_none() {
            return false;
        }
        self.add_item(actor, class_id, count)
    }

    fn item_info(&self, item: EntityId) -> Option<ItemInfo> {
        let data = match self.resolve(item)? {
            EntityData::Item(data) => data,
            _ => return None,
        };
        let class = self.classes.get(&data.class_id)?;
        Some(ItemInfo {
            class_id: data.class_id,
            name: class.name.clone(),
            count: data.count,
            equipped: false,
            value: class.value,
        })
    }

    fn world_name(&self, world: EntityId) -> Option<String> {
        self.world(world).map(|data| data.name.clone())
    }

    fn world_player(&self, world: EntityId) -> Option<EntityId> {
        let player = self.world(world)?.player?;
        self.actor(player).map(|_| player)
    }

    fn find_actor(&self, world: EntityId, name: &str) -> Option<EntityId> {
        self.world(world)?;
        self.slots.iter().enumerate().find_map(|(index, slot)| {
            match &slot.data {
                Some(EntityData::Actor(data))
                    if data.world == world && data.name.eq_ignore_ascii_case(name) =>
                {
                    Some(EntityId::new(index as u32, slot.generation))
                }
                _ => None,
            }
        })
    }

    fn spawn_actor(&mut self, world: EntityId, instance: &str, waypoint: &str) -> Option<EntityId> {
        let position = *self
            .world(world)?
            .waypoints
            .get(&waypoint.to_ascii_uppercase())?;
        let id = self.add_actor(world, instance);
        if let Some(data) = self.actor_mut(id) {
            data.position = position;
        }
        Some(id)
    }

    fn spawn_item(&mut self, world: EntityId, class_id: u32, waypoint: &str) -> Option<EntityId> {
        let position = *self
            .world(world)?
            .waypoints
            .get(&waypoint.to_ascii_uppercase())?;
        self.drop_item(class_id, 1, position)
    }

    fn world_time(&self, world: EntityId) -> Option<(u32, u32)> {
        self.world(world).map(|data| data.time)
    }

    fn interactive_name(&self, mob: EntityId) -> Option<String> {
        self.interactive(mob).map(|data| data.name.clone())
    }

    fn interactive_state(&self, mob: EntityId) -> Option<i32> {
        self.interactive(mob).map(|data| data.state)
    }

    fn interactive_is_locked(&self, mob: EntityId) -> Option<bool> {
        self.interactive(mob).map(|data| data.locked)
    }

    fn interactive_has_inventory(&self, mob: EntityId) -> Option<bool> {
        self.interactive(mob).map(|data| data.inventory.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryWorld;
    use crate::world::{Attribute, EntityRef, Simulation};

    fn world_with_hero() -> (MemoryWorld, crate::world::EntityId, crate::world::EntityId) {
        let mut world = MemoryWorld::new();
        world.define_item_class(1, "ItMi_Gold", 1);
        world.define_item_class(2, "ItMw_Sword", 50);
        let newworld = world.add_world("NEWWORLD");
        let hero = world.add_actor(newworld, "Hero");
        world.set_player(newworld, hero);
        (world, newworld, hero)
    }

    #[test]
    fn despawned_ids_stop_resolving_after_slot_reuse() {
        let (mut world, newworld, hero) = world_with_hero();
        let bandit = world.add_actor(newworld, "Bandit");
        assert!(world.despawn(bandit));
        let wolf = world.add_actor(newworld, "Wolf");
        assert_eq!(wolf.index, bandit.index);
        assert_ne!(wolf.generation, bandit.generation);
        assert_eq!(world.actor_name(bandit), None);
        assert!(!world.is_alive(EntityRef::actor(bandit)));
        assert_eq!(world.actor_name(wolf).as_deref(), Some("Wolf"));
        assert!(world.is_alive(EntityRef::container(hero)));
    }

    #[test]
    fn transfers_merge_into_existing_stacks() {
        let (mut world, _, hero) = world_with_hero();
        let chest = world.add_container("CHEST", false);
        world.add_item(hero, 1, 5);
        world.add_item(chest, 1, 20);
        assert_eq!(world.transfer_items(chest, hero, 1, 20), 20);
        let entries = world.inventory_entries(hero).expect("hero inventory");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].count, 25);
        assert_eq!(world.inventory_entries(chest), Some(Vec::new()));
    }

    #[test]
    fn equipped_items_are_not_transferred() {
        let (mut world, _, hero) = world_with_hero();
        let chest = world.add_container("CHEST", false);
        world.add_item(hero, 2, 1);
        assert!(world.equip(hero, 2));
        assert_eq!(world.transfer_items(hero, chest, 2, 1), 0);
    }

    #[test]
    fn spawning_requires_a_known_waypoint() {
        let (mut world, newworld, _) = world_with_hero();
        assert!(world.add_waypoint(newworld, "ow_start", [1.0, 2.0, 3.0]));
        assert_eq!(world.spawn_actor(newworld, "Wolf", "NOWHERE"), None);
        let wolf = world
            .spawn_actor(newworld, "Wolf", "OW_START")
            .expect("spawned");
        assert_eq!(world.actor_position(wolf), Some([1.0, 2.0, 3.0]));
        assert_eq!(world.find_actor(newworld, "wolf"), Some(wolf));
    }

    #[test]
    fn dead_means_no_hitpoints_left() {
        let (mut world, _, hero) = world_with_hero();
        assert_eq!(world.actor_is_dead(hero), Some(false));
        world.set_actor_attribute(hero, Attribute::HitPoints, 0);
        assert_eq!(world.actor_is_dead(hero), Some(true));
    }
}
