//! Protocol registry: enumerates the built-in device table, applies the
//! user's selection set, creates flex devices from spec strings, and keeps
//! the sample-space timings of every registered device current.

use crate::config::Config;
use crate::device::Device;
use crate::devices::builtin_devices;
use crate::error::Result;
use crate::flex;

/// The registered decoders of one pipeline run.
#[derive(Debug, Default)]
pub struct Registry {
    devices: Vec<Device>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn devices_mut(&mut self) -> &mut [Device] {
        &mut self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Any registered FSK-family device means the FM path must run.
    pub fn needs_fm(&self) -> bool {
        self.devices.iter().any(|d| d.modulation.is_fsk())
    }

    /// Register flex devices from spec strings. Flex devices go in front of
    /// the built-in table.
    pub fn register_flex_devices(&mut self, cfg: &Config, specs: &[String]) -> Result<()> {
        for spec in specs {
            let dev = flex::create_device(spec)?;
            self.register(cfg, dev);
        }
        Ok(())
    }

    /// Enumerate and register the built-in table. Protocol numbers are
    /// 1-based table indices. A non-empty `selection` enables exactly the
    /// listed entries - except descriptors with `disabled == 2`, which stay
    /// as declared (the forced carve-out for pseudo-devices).
    pub fn register_builtin_devices(&mut self, cfg: &Config, selection: &[bool]) {
        let mut table = builtin_devices();
        for (i, dev) in table.iter_mut().enumerate() {
            dev.protocol_num = i as u32 + 1;
            if !selection.is_empty() && dev.disabled != 2 {
                dev.disabled = u8::from(!selection.get(i).copied().unwrap_or(false));
            }
        }
        for dev in table {
            if dev.disabled == 0 || dev.disabled == 2 {
                self.register(cfg, dev);
            }
        }
    }

    /// Register an already-configured device (timings must be current).
    pub fn push_device(&mut self, dev: Device) {
        tracing::debug!("registering protocol [{}] {:?}", dev.protocol_num, dev.name);
        self.devices.push(dev);
    }

    fn register(&mut self, cfg: &Config, mut dev: Device) {
        dev.update_timings(cfg.sample_rate);
        tracing::debug!("registering protocol [{}] {:?}", dev.protocol_num, dev.name);
        self.devices.push(dev);
    }

    /// Recompute every device's sample-space timings after a rate change.
    pub fn update_timings(&mut self, sample_rate: u32) {
        for dev in &mut self.devices {
            dev.update_timings(sample_rate);
        }
    }

    /// The union of well-known fields and every enabled device's field list,
    /// duplicates removed, order preserved (the CSV schema).
    pub fn csv_fields(&self, well_known: &[&str]) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();
        let mut push = |f: &str, fields: &mut Vec<String>| {
            if !fields.iter().any(|x| x == f) {
                fields.push(f.to_string());
            }
        };
        for f in well_known {
            push(f, &mut fields);
        }
        for dev in &self.devices {
            if dev.disabled != 1 {
                if dev.fields.is_empty() {
                    tracing::warn!(
                        "device {} {:?} does not declare CSV fields",
                        dev.protocol_num,
                        dev.name
                    );
                }
                for f in &dev.fields {
                    push(f, &mut fields);
                }
            }
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registration_numbers_protocols() {
        let cfg = Config::default();
        let mut reg = Registry::new();
        reg.register_builtin_devices(&cfg, &[]);
        // Intertechno ships disabled; TFA enabled
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.devices()[0].protocol_num, 2);
    }

    #[test]
    fn selection_set_overrides_disabled_flag() {
        let cfg = Config::default();
        let mut reg = Registry::new();
        reg.register_builtin_devices(&cfg, &[true, false]);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.devices()[0].name, "Intertechno 433");
    }

    #[test]
    fn flex_devices_register_before_builtins() {
        let cfg = Config::default();
        let mut reg = Registry::new();
        reg.register_flex_devices(&cfg, &["n=probe,m=OOK_PPM,s=400,l=2000,r=10000".into()])
            .unwrap();
        reg.register_builtin_devices(&cfg, &[]);
        assert_eq!(reg.devices()[0].name, "probe");
        // timings were derived at registration
        assert!((reg.devices()[0].s_short_width - 100.0).abs() < 1e-3);
    }

    #[test]
    fn needs_fm_only_with_fsk_devices() {
        let cfg = Config::default();
        let mut reg = Registry::new();
        reg.register_builtin_devices(&cfg, &[]);
        assert!(!reg.needs_fm());
        reg.register_flex_devices(&cfg, &["n=f,m=FSK_PCM,s=50,l=50,r=5000".into()])
            .unwrap();
        assert!(reg.needs_fm());
    }

    #[test]
    fn csv_schema_well_known_then_declared_dedup() {
        let cfg = Config::default();
        let mut reg = Registry::new();
        reg.register_flex_devices(&cfg, &["n=a,m=OOK_PPM,s=1,l=2,r=3".into()])
            .unwrap();
        reg.devices_mut()[0].fields =
            ["model", "id", "temp"].iter().map(|s| s.to_string()).collect();
        reg.register_flex_devices(&cfg, &["n=b,m=OOK_PPM,s=1,l=2,r=3".into()])
            .unwrap();
        reg.devices_mut()[1].fields =
            ["model", "id", "batt"].iter().map(|s| s.to_string()).collect();
        let fields = reg.csv_fields(&["time"]);
        assert_eq!(fields, vec!["time", "model", "id", "temp", "batt"]);
    }
}
