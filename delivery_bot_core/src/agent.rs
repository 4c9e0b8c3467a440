use serde::{Deserialize, Serialize};

use crate::Position;

/// Mutable state of the delivery robot.
///
/// `battery` is allowed to go negative: the robot keeps moving in a degraded
/// state and the simulation charges a higher per-step penalty instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub position: Position,
    /// Packages currently carried.
    pub cargo: u32,
    pub cargo_capacity: u32,
    pub battery: i32,
    pub max_battery: i32,
}

impl Agent {
    pub fn new(position: Position, battery: i32, max_battery: i32, cargo_capacity: u32) -> Self {
        Agent {
            position,
            cargo: 0,
            cargo_capacity,
            battery,
            max_battery,
        }
    }

    #[inline]
    pub fn has_cargo(&self) -> bool {
        self.cargo > 0
    }

    #[inline]
    pub fn has_spare_capacity(&self) -> bool {
        self.cargo < self.cargo_capacity
    }

    /// Moves to `next` and drains one unit of battery.
    ///
    /// Returns true if the battery was already empty before the move.
    pub fn step_to(&mut self, next: Position) -> bool {
        let stranded = self.battery <= 0;
        self.position = next;
        self.battery -= 1;
        stranded
    }

    pub fn recharge(&mut self) {
        self.battery = self.max_battery;
    }

    /// Loads one package. Returns false when already at capacity.
    pub fn load(&mut self) -> bool {
        if !self.has_spare_capacity() {
            return false;
        }
        self.cargo += 1;
        true
    }

    /// Unloads one package. Returns false when carrying nothing.
    pub fn unload(&mut self) -> bool {
        if !self.has_cargo() {
            return false;
        }
        self.cargo -= 1;
        true
    }
}
