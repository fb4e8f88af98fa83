//! Built-in device decoders.
//!
//! Each module exposes a `device()` constructor returning the descriptor with
//! its timings, field list and decode callback. The table below is enumerated
//! at registration time; table order fixes the protocol numbers.

mod intertechno;
mod tfa_pool;

use crate::device::Device;

/// The built-in device table, in protocol-number order.
pub fn builtin_devices() -> Vec<Device> {
    vec![intertechno::device(), tfa_pool::device()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_stable() {
        let devices = builtin_devices();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "Intertechno 433");
        assert_eq!(devices[1].name, "TFA pool temperature sensor");
    }
}
