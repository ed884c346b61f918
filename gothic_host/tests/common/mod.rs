#![allow(dead_code)]

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use gothic_host::legacy::{LegacyVm, MemoryVm, ReturnType, VmError, VmValue};
use gothic_host::world::{EntityId, MemoryWorld, SharedWorld};
use gothic_host::{HostConfig, NativeArg, ScriptEngine, SignalBoard};

pub const GOLD: u32 = 1;
pub const SWORD: u32 = 2;
pub const APPLE: u32 = 3;

/// A world with a hero, a bandit carrying gold, apples and an equipped
/// sword, one unlocked and one locked chest, and a legacy VM.
pub struct Fixture {
    pub world: Rc<RefCell<MemoryWorld>>,
    pub vm: Rc<MemoryVm>,
    pub signals: Rc<SignalBoard>,
    pub engine: ScriptEngine,
    pub newworld: EntityId,
    pub hero: EntityId,
    pub bandit: EntityId,
    pub chest: EntityId,
    pub locked_chest: EntityId,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_signals(SignalBoard::gameplay())
    }

    pub fn with_signals(signals: SignalBoard) -> Self {
        let vm = Rc::new(legacy_vm());
        let mut world = MemoryWorld::new();
        world.define_item_class(GOLD, "ItMi_Gold", 1);
        world.define_item_class(SWORD, "ItMw_1h_Sld_Sword", 60);
        world.define_item_class(APPLE, "ItFo_Apple", 8);

        let newworld = world.add_world("NEWWORLD");
        world.add_waypoint(newworld, "NW_FARM1_PATH_01", [10.0, 0.0, 5.0]);
        world.set_time(newworld, 8, 30);
        let hero = world.add_actor(newworld, "Hero");
        world.set_player(newworld, hero);

        let bandit = world.add_actor(newworld, "Bandit");
        world.add_item(bandit, SWORD, 1);
        world.equip(bandit, SWORD);
        world.add_item(bandit, GOLD, 17);
        world.add_item(bandit, APPLE, 2);

        let chest = world.add_container("CHESTSMALL_OCCRATESMALL", false);
        world.add_item(chest, GOLD, 50);
        let locked_chest = world.add_container("CHESTBIG_OCCHESTLARGE_LOCKED", true);
        world.add_item(locked_chest, GOLD, 500);

        let dyn_vm: Rc<dyn LegacyVm> = vm.clone();
        world.set_script_vm(Some(dyn_vm));

        let world = Rc::new(RefCell::new(world));
        let shared: SharedWorld = world.clone();
        let signals = Rc::new(signals);
        let engine = ScriptEngine::new(test_config(), shared, signals.clone());

        Self {
            world,
            vm,
            signals,
            engine,
            newworld,
            hero,
            bandit,
            chest,
            locked_chest,
        }
    }

    /// Builds the fixture and initialises its engine.
    pub fn started() -> Self {
        let mut fixture = Self::new();
        assert!(fixture.engine.initialize(), "engine failed to initialise");
        fixture
    }

    pub fn run(&self, code: &str) -> String {
        self.engine.execute_string(code)
    }

    /// Runs `call` under `pcall` and renders the status and the error text.
    pub fn attempt(&self, call: &str) -> String {
        self.run(&format!(
            "local ok, err = pcall(function() return {call} end) return ok, tostring(err)"
        ))
    }

    pub fn actor(&self, id: EntityId) -> NativeArg {
        NativeArg::Entity(Some(id))
    }
}

pub fn test_config() -> HostConfig {
    HostConfig {
        scripts_dir: PathBuf::from("does-not-exist"),
        manifest: None,
        enable_jit: false,
        load_mod_scripts: false,
    }
}

/// Legacy symbols shared by the tests.
pub fn legacy_vm() -> MemoryVm {
    let vm = MemoryVm::new();
    vm.define_int("KAPITEL", &[1], true);
    vm.define_int("HERO_XP", &[0], false);
    vm.define_int("MIS_BANDITLOOT", &[0], false);
    vm.define_int("DIA_FLAGS", &[0, 0, 0], false);
    vm.define_float("RAIN_LEVEL", &[0.25], false);
    vm.define_string("HERO_TITLE", &["Nameless"], false);
    vm.define_function("B_GIVEXP", ReturnType::Int, |vm| {
        let amount = vm.pop_int()?;
        let xp = vm
            .find_symbol("HERO_XP")
            .ok_or_else(|| VmError::Script("HERO_XP missing".to_string()))?;
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
