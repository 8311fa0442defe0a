//! # Demands Store
//!
//! The store holds exactly one demand, the most recent one written. Demands describe a continuous
//! state rather than a sequence of events, so a write simply overwrites the previous value and a
//! reader which misses an intermediate value loses nothing.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::Arc;

use comms_if::eqpt::servo::ServoDems;
use parking_lot::Mutex;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Handle to the shared current demand.
///
/// Cloning the handle shares the same underlying demand. The [`DemsServer`] writes it and the
/// [`ServoCtrl`] reads it, both through the same lock, so both fields of a demand are always
/// observed together.
///
/// [`DemsServer`]: crate::dems_server::DemsServer
/// [`ServoCtrl`]: crate::servo_ctrl::ServoCtrl
#[derive(Clone, Debug, Default)]
pub struct DemsStore {
    dems: Arc<Mutex<ServoDems>>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DemsStore {
    /// Create a new store holding the neutral demand.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current demand.
    pub fn set(&self, dems: ServoDems) {
        *self.dems.lock() = dems;
    }

    /// Replace the current demand with the neutral demand.
    pub fn set_neutral(&self) {
        self.set(ServoDems::NEUTRAL);
    }

    /// Get the most recently set demand.
    pub fn get(&self) -> ServoDems {
        *self.dems.lock()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::thread;

    #[test]
    fn test_set_get() {
        let store = DemsStore::new();
        assert_eq!(store.get(), ServoDems::NEUTRAL);

        let clone = store.clone();
        clone.set(ServoDems::new(40.0, 10.0));
        assert_eq!(store.get(), ServoDems::new(40.0, 10.0));

        // Last write wins
        clone.set(ServoDems::new(41.0, 11.0));
        clone.set(ServoDems::new(42.0, 12.0));
        assert_eq!(store.get(), ServoDems::new(42.0, 12.0));

        store.set_neutral();
        assert_eq!(clone.get(), ServoDems::NEUTRAL);
    }

    /// Every demand written has `rudder == -throttle`, so a reader seeing fields from two
    /// different writes would break the relation.
    #[test]
    fn test_no_torn_reads() {
        const NUM_WRITES: u32 = 200_000;

        let store = DemsStore::new();

        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..NUM_WRITES {
                    let v = (i % 101) as f64;
                    store.set(ServoDems::new(v, -v));
                }
            })
        };

        let reader = {
            let store = store.clone();
            thread::spawn(move || {
                let mut num_reads = 0u64;
                loop {
                    let dems = store.get();
                    assert_eq!(dems.rudder_pct, -dems.throttle_pct, "Torn read: {:?}", dems);
                    num_reads += 1;

                    if num_reads > NUM_WRITES as u64 {
                        break;
                    }
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();
    }
}
