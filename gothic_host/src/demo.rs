use std::cell::RefCell;
use std::rc::Rc;

use gothic_host::legacy::{LegacyVm, MemoryVm, ReturnType, VmValue};
use gothic_host::world::{EntityId, MemoryWorld, SharedWorld};
use gothic_host::{NativeArg, SignalBoard};

pub const GOLD: u32 = 1;
pub const SWORD: u32 = 2;
pub const APPLE: u32 = 3;

/// Small world used by the binary: a hero, a bandit and a chest.
pub struct Demo {
    pub world: Rc<RefCell<MemoryWorld>>,
    pub vm: Rc<MemoryVm>,
    pub newworld: EntityId,
    pub hero: EntityId,
    pub bandit: EntityId,
    pub chest: EntityId,
}

impl Demo {
    pub fn build() -> Self {
        let vm = Rc::new(legacy_vm());
        let mut world = MemoryWorld::new();
        world.define_item_class(GOLD, "ItMi_Gold", 1);
        world.define_item_class(SWORD, "ItMw_1h_Sld_Sword", 60);
        world.define_item_class(APPLE, "ItFo_Apple", 8);

        let newworld = world.add_world("NEWWORLD");
        world.add_waypoint(newworld, "NW_CITY_MERCHANT_PATH_01", [120.0, 0.0, -40.0]);
        let hero = world.add_actor(newworld, "Hero");
        world.set_player(newworld, hero);
        world.add_item(hero, SWORD, 1);
        world.equip(hero, SWORD);

        let bandit = world.add_actor(newworld, "Bandit");
        world.add_item(bandit, GOLD, 17);

        let chest = world.add_container("CHESTBIG_OCCHESTLARGE", false);
        world.add_item(chest, GOLD, 50);
        world.add_item(chest, APPLE, 3);

        let dyn_vm: Rc<dyn LegacyVm> = vm.clone();
        world.set_script_vm(Some(dyn_vm));

        Self {
            world: Rc::new(RefCell::new(world)),
            vm,
            newworld,
            hero,
            bandit,
            chest,
        }
    }

    pub fn shared(&self) -> SharedWorld {
        self.world.clone()
    }

    /// Raises one of each gameplay signal and reports what the scripts did.
    pub fn run_events(&self, signals: &SignalBoard) {
        let world = NativeArg::Entity(Some(self.newworld));
        let hero = NativeArg::Entity(Some(self.hero));
        let bandit = NativeArg::Entity(Some(self.bandit));
        let chest = NativeArg::Entity(Some(self.chest));

        signals.emit("onWorldLoaded", &[world]);
        let handled = signals.emit("onOpen", &[hero.clone(), chest]);
        println!("onOpen handled: {handled}");
        signals.emit("onDamage", &[bandit.clone(), hero.clone(), NativeArg::Int(12)]);
        let handled = signals.emit("onRansack", &[hero.clone(), bandit.clone()]);
        println!("onRansack handled: {handled}");
        signals.emit("onNpcKilled", &[bandit, hero]);

        for message in self.world.borrow().messages() {
            println!("message: {message}");
        }
        let calls = self.vm.calls();
        if !calls.is_empty() {
            println!("legacy calls: {}", calls.join(", "));
        }
    }
}

fn legacy_vm() -> MemoryVm {
    let vm = MemoryVm::new();
    vm.define_int("KAPITEL", &[1], true);
    vm.define_int("HERO_XP", &[0], false);
    vm.define_int("MIS_BANDITLOOT", &[0], false);
    vm.define_string("HERO_TITLE", &["Nameless"], false);
    vm.define_function("B_GIVEXP", ReturnType::Int, |vm| {
        let amount = vm.pop_int()?;
        let xp = vm
            .find_symbol("HERO_XP")
            .ok_or_else(|| gothic_host::legacy::VmError::Script("HERO_XP missing".to_string()))?;
        let total = match vm.read(xp, 0)? {
            VmValue::Int(current) => current + amount,
            _ => amount,
        };
        vm.write(xp, 0, VmValue::Int(total))?;
        vm.push_int(total);
        Ok(())
    });
    vm.declare_external("B_ONLOOT", ReturnType::Void);
    vm
}
