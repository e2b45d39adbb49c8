//! Ordered system schedule

use crate::clock::GameClock;
use crate::system::RuntimeSystem;
use ember_core::Result;
use ember_ecs::SceneWorld;

/// Runs registered systems in order, once per frame
#[derive(Default)]
pub struct SystemSchedule {
    systems: Vec<Box<dyn RuntimeSystem>>,
    initialized: bool,
}

impl SystemSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, system: Box<dyn RuntimeSystem>) {
        self.systems.push(system);
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Call `initialize` on every system. Idempotent.
    pub fn initialize(&mut self, world: &mut SceneWorld) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        for system in &mut self.systems {
            log::info!("Initializing system '{}'", system.name());
            system.initialize(world)?;
        }
        self.initialized = true;
        Ok(())
    }

    /// Run one frame with the clock's current time values
    pub fn run_frame(&mut self, world: &mut SceneWorld, clock: &GameClock) -> Result<()> {
        self.initialize(world)?;
        for system in &mut self.systems {
            system.update(world, clock.total_time, clock.delta_time)?;
        }
        Ok(())
    }

    /// Shut systems down in reverse registration order
    pub fn shutdown(&mut self, world: &mut SceneWorld) -> Result<()> {
        for system in self.systems.iter_mut().rev() {
            log::info!("Shutting down system '{}'", system.name());
            system.shutdown(world)?;
        }
        self.initialized = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Probe {
        label: &'static str,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl RuntimeSystem for Probe {
        fn initialize(&mut self, _world: &mut SceneWorld) -> Result<()> {
            self.log.borrow_mut().push(format!("init {}", self.label));
            Ok(())
        }

        fn update(&mut self, _world: &mut SceneWorld, _time: f64, dt: f64) -> Result<()> {
            self.log.borrow_mut().push(format!("update {} {dt}", self.label));
            Ok(())
        }

        fn shutdown(&mut self, _world: &mut SceneWorld) -> Result<()> {
            self.log.borrow_mut().push(format!("shutdown {}", self.label));
            Ok(())
        }

        fn name(&self) -> &str {
            self.label
        }
    }

    #[test]
    fn systems_run_in_order_and_shut_down_in_reverse() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut schedule = SystemSchedule::new();
        schedule.add(Box::new(Probe { label: "a", log: log.clone() }));
        schedule.add(Box::new(Probe { label: "b", log: log.clone() }));

        let mut world = SceneWorld::new();
        let mut clock = GameClock::new();
        clock.advance(0.5);
        schedule.run_frame(&mut world, &clock).unwrap();
        schedule.run_frame(&mut world, &clock).unwrap();
        schedule.shutdown(&mut world).unwrap();

        assert_eq!(
            *log.borrow(),
            vec![
                "init a",
                "init b",
                "update a 0.25",
                "update b 0.25",
                "update a 0.25",
                "update b 0.25",
                "shutdown b",
                "shutdown a",
            ]
        );
    }
}
