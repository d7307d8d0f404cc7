//! Device and maintenance-template configuration sources

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;
use crate::model::{Device, MaintenanceTemplate};

/// Read-only source of the polled devices and the maintenance schedule
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Devices that should currently be polled
    async fn list_active_devices(&self) -> Result<Vec<Device>>;

    /// The template marked as default, if any
    async fn get_default_maintenance_template(&self) -> Result<Option<MaintenanceTemplate>>;
}

/// Provider backed by the YAML configuration.
///
/// The device list can be swapped at runtime, after which a message on the
/// reload channel makes the poller pick it up.
#[derive(Debug, Default)]
pub struct StaticConfigProvider {
    devices: RwLock<Vec<Device>>,
    template: RwLock<Option<MaintenanceTemplate>>,
}

impl StaticConfigProvider {
    pub fn new(devices: Vec<Device>, template: Option<MaintenanceTemplate>) -> Self {
        Self {
            devices: RwLock::new(devices),
            template: RwLock::new(template),
        }
    }

    pub fn replace_devices(&self, devices: Vec<Device>) {
        *self.devices.write() = devices;
    }

    pub fn replace_template(&self, template: Option<MaintenanceTemplate>) {
        *self.template.write() = template;
    }
}

#[async_trait]
impl ConfigProvider for StaticConfigProvider {
    async fn list_active_devices(&self) -> Result<Vec<Device>> {
        Ok(self
            .devices
            .read()
            .iter()
            .filter(|d| d.active)
            .cloned()
            .collect())
    }

    async fn get_default_maintenance_template(&self) -> Result<Option<MaintenanceTemplate>> {
        Ok(self.template.read().clone())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::model::{DeviceClass, ProtocolKind};

    fn device(id: i64, active: bool) -> Device {
        Device {
            id,
            name: format!("Gen{id}"),
            site_code: "MKZ".to_string(),
            device_class: DeviceClass::Generator,
            protocol: ProtocolKind::FramedTcp,
            host: "10.0.0.5".to_string(),
            port: 502,
            unit_id: 1,
            active,
        }
    }

    #[tokio::test]
    async fn test_inactive_devices_are_hidden() {
        let provider = StaticConfigProvider::new(vec![device(1, true), device(2, false)], None);
        let ids: Vec<i64> = provider
            .list_active_devices()
            .await
            .unwrap()
            .iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec![1]);

        provider.replace_devices(vec![device(2, true), device(3, true)]);
        assert_eq!(provider.list_active_devices().await.unwrap().len(), 2);
        assert!(provider
            .get_default_maintenance_template()
            .await
            .unwrap()
            .is_none());
    }
}
