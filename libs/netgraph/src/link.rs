//! Links: real switch-to-switch connections and virtual endpoint links.

use serde::Serialize;

use crate::allotment::{Allotment, QueueDir};

/// A switch/port/queue-number triple, the address a flow-mod queues on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Spq {
    pub switch: String,
    pub port: i32,
    /// Queue number; 0 is the default queue (used once a reservation has
    /// been released), negative means the lookup failed.
    pub queue: i32,
}

/// A connection between two switch-ports with a capacity and a bandwidth
/// book. Endpoint links are virtual: they model the switch-to-host hop so
/// egress queues toward the host can be placed; their second side is the
/// host itself.
#[derive(Debug, Clone)]
pub struct Link {
    pub id: String,
    pub sw1: String,
    pub port1: i32,
    pub sw2: String,
    pub port2: i32,
    pub capacity: i64,
    pub is_endpoint: bool,
    pub allotment: Allotment,
}

impl Link {
    pub fn between(sw1: &str, port1: i32, sw2: &str, port2: i32, capacity: i64) -> Self {
        Self {
            id: format!("{sw1}/{port1}-{sw2}/{port2}"),
            sw1: sw1.to_string(),
            port1,
            sw2: sw2.to_string(),
            port2,
            capacity,
            is_endpoint: false,
            allotment: Allotment::new(),
        }
    }

    /// A virtual switch-to-host link.
    pub fn endpoint(switch: &str, port: i32, host: &str, capacity: i64) -> Self {
        Self {
            id: endpoint_id(switch, port, host),
            sw1: switch.to_string(),
            port1: port,
            sw2: host.to_string(),
            port2: -1,
            capacity,
            is_endpoint: true,
            allotment: Allotment::new(),
        }
    }

    /// The switch-port a queue of the given direction sits on.
    pub fn port_for(&self, dir: QueueDir) -> (&str, i32) {
        match dir {
            QueueDir::Forward => (&self.sw1, self.port1),
            QueueDir::Backward => (&self.sw2, self.port2),
        }
    }

    /// Resolve `(switch, port, queue-num)` for a named queue at `t`.
    ///
    /// A missing queue resolves to the default queue 0 rather than failing:
    /// released reservations still need addressable flow-mods to withdraw.
    pub fn spq(&self, name: &str, dir: QueueDir, t: i64) -> Spq {
        let (switch, port) = self.port_for(dir);
        let queue = self
            .allotment
            .queue_at(name, t)
            .map(|q| q.num as i32)
            .unwrap_or(0);
        Spq {
            switch: switch.to_string(),
            port,
            queue,
        }
    }
}

pub fn endpoint_id(switch: &str, port: i32, host: &str) -> String {
    format!("{switch}/{port}@{host}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spq_resolves_direction_and_number() {
        let mut l = Link::between("swA", 1, "swB", 2, 1_000_000_000);
        l.allotment.add_queue("r1", QueueDir::Forward, 100, 200, 10);
        l.allotment.add_queue("Rr1", QueueDir::Backward, 100, 200, 10);

        let f = l.spq("r1", QueueDir::Forward, 150);
        assert_eq!((f.switch.as_str(), f.port, f.queue), ("swA", 1, 2));

        let b = l.spq("Rr1", QueueDir::Backward, 150);
        assert_eq!((b.switch.as_str(), b.port, b.queue), ("swB", 2, 2));
    }

    #[test]
    fn missing_queue_degrades_to_default() {
        let l = Link::between("swA", 1, "swB", 2, 1_000_000_000);
        assert_eq!(l.spq("gone", QueueDir::Forward, 10).queue, 0);
    }
}
