//! Server-side subscription records: who gets notified about which local
//! feature.

use eebus_runtime::EebusError;
use eebus_wire::spine::FeatureAddress;
use eebus_wire::spine::node_management::SubscriptionManagementEntry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEntry {
    pub id: u32,
    /// The remote client feature receiving notifies.
    pub client: FeatureAddress,
    /// The local server feature being observed.
    pub server: FeatureAddress,
}

#[derive(Default)]
pub struct SubscriptionManager {
    entries: Vec<SubscriptionEntry>,
    next_id: u32,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        SubscriptionManager {
            entries: Vec::new(),
            next_id: 1,
        }
    }

    pub fn add(
        &mut self,
        server: FeatureAddress,
        client: FeatureAddress,
    ) -> Result<u32, EebusError> {
        if self.has_subscription(&server, &client) {
            return Err(EebusError::NoChange);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(SubscriptionEntry { id, client, server });
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

    pub fn has_subscription(&self, server: &FeatureAddress, client: &FeatureAddress) -> bool {
        self.entries
            .iter()
            .any(|e| &e.server == server && &e.client == client)
    }

    /// Remote clients subscribed to the given local feature.
    pub fn subscribers_of(&self, server: &FeatureAddress) -> Vec<FeatureAddress> {
        self.entries
            .iter()
            .filter(|e| e.server.matches_local(server))
            .map(|e| e.client.clone())
            .collect()
    }

    /// Drop every entry whose client lives on the given remote device.
    pub fn remove_device_subscriptions(&mut self, remote_device: &str) {
        self.entries
            .retain(|e| e.client.device.as_deref() != Some(remote_device));
    }

    pub fn entries(&self) -> &[SubscriptionEntry] {
        &self.entries
    }

    /// The wire rows reported in `nodeManagementSubscriptionData`.
    pub fn management_entries(&self) -> Vec<SubscriptionManagementEntry> {
        self.entries
            .iter()
            .map(|e| SubscriptionManagementEntry {
                subscription_id: Some(e.id),
                client_address: e.client.clone(),
                server_address: e.server.clone(),
            })
            .collect()
    }
}
