//! Server-side binding records: who may write to which local feature.

use eebus_runtime::EebusError;
use eebus_wire::spine::FeatureAddress;
use eebus_wire::spine::node_management::BindingManagementEntry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingEntry {
    pub id: u32,
    /// The remote client feature allowed to write.
    pub client: FeatureAddress,
    /// The local server feature being written.
    pub server: FeatureAddress,
}

#[derive(Default)]
pub struct BindingManager {
    entries: Vec<BindingEntry>,
    next_id: u32,
}

impl BindingManager {
    pub fn new() -> Self {
        BindingManager {
            entries: Vec::new(),
            next_id: 1,
        }
    }

    pub fn add(
        &mut self,
        server: FeatureAddress,
        client: FeatureAddress,
    ) -> Result<u32, EebusError> {
        if self.has_binding(&server, &client) {
            return Err(EebusError::NoChange);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(BindingEntry { id, client, server });
        Ok(id)
    }

    pub fn remove(
        &mut self,
        server: &FeatureAddress,
        client: &FeatureAddress,
    ) -> Result<(), EebusError> {
        let before = self.entries.len();
        self.entries
            .retain(|e| !(&e.server == server && &e.client == client));
        if self.entries.len() == before {
            return Err(EebusError::NoChange);
        }
        Ok(())
    }

    /// Gate for accepting a write from `client` on `server`.
    pub fn has_binding(&self, server: &FeatureAddress, client: &FeatureAddress) -> bool {
        self.entries
            .iter()
            .any(|e| e.server.matches_local(server) && &e.client == client)
    }

    /// Drop every entry whose client lives on the given remote device.
    pub fn remove_device_bindings(&mut self, remote_device: &str) {
        self.entries
            .retain(|e| e.client.device.as_deref() != Some(remote_device));
    }

    pub fn entries(&self) -> &[BindingEntry] {
        &self.entries
    }

    /// The wire rows reported in `nodeManagementBindingData`.
    pub fn management_entries(&self) -> Vec<BindingManagementEntry> {
        self.entries
            .iter()
            .map(|e| BindingManagementEntry {
                binding_id: Some(e.id),
                client_address: e.client.clone(),
                server_address: e.server.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(device: &str, feature: u32) -> FeatureAddress {
        FeatureAddress::new(Some(device.into()), vec![1], feature)
    }

    #[test]
    fn binding_gates_by_exact_client() {
        let mut manager = BindingManager::new();
        manager.add(addr("d:local", 1), addr("d:remote", 2)).unwrap();

        assert!(manager.has_binding(&addr("d:local", 1), &addr("d:remote", 2)));
        assert!(!manager.has_binding(&addr("d:local", 1), &addr("d:other", 2)));
    }

    #[test]
    fn remove_device_drops_entries() {
        let mut manager = BindingManager::new();
        manager.add(addr("d:local", 1), addr("d:remote", 2)).unwrap();
        manager.remove_device_bindings("d:remote");
        assert!(manager.entries().is_empty());
    }
}
