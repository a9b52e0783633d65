//! Mirror of a remote device, built from detailed discovery.

use eebus_wire::spine::node_management::{
    DeviceDescription, FeatureSet, NodeManagementDetailedDiscoveryData, NodeManagementUseCaseData,
    Role,
};
use eebus_wire::spine::{EntityAddress, FeatureAddress, FunctionData, FunctionType};

use crate::entity::EntityRemote;
use crate::feature::{FeatureRemote, feature_type};
use crate::sender::Sender;

pub struct DeviceRemote {
    ski: String,
    address: Option<String>,
    device_type: Option<String>,
    feature_set: Option<FeatureSet>,
    entities: Vec<EntityRemote>,
    sender: Sender,
}

impl DeviceRemote {
    /// A fresh mirror knows nothing but the peer's node management, which
    /// exists at (entity [0], feature 0) of every device.
    pub fn new(ski: impl Into<String>, sender: Sender) -> Self {
        let ski = ski.into();
        let mut device_information = EntityRemote::new(
            EntityAddress::device_information(None),
            Some(crate::entity::entity_type::DEVICE_INFORMATION.to_owned()),
        );
        device_information.add_feature(FeatureRemote::new(
            FeatureAddress::node_management(None),
            Some(feature_type::NODE_MANAGEMENT.to_owned()),
            Some(Role::Special),
        ));

        DeviceRemote {
            ski,
            address: None,
            device_type: None,
            feature_set: None,
            entities: vec![device_information],
            sender,
        }
    }

    pub fn ski(&self) -> &str {
        &self.ski
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn feature_set(&self) -> Option<FeatureSet> {
        self.feature_set
    }

    pub fn entities(&self) -> &[EntityRemote] {
        &self.entities
    }

    /// Apply the device description learned from discovery.
    pub fn update_device(&mut self, description: &DeviceDescription) {
        if let Some(addr) = &description.device_address {
            self.address = Some(addr.device.clone());
        }
        if description.device_type.is_some() {
            self.device_type = description.device_type.clone();
        }
        if description.network_feature_set.is_some() {
            self.feature_set = description.network_feature_set;
        }
    }

    pub fn entity(&self, entity_path: &[u32]) -> Option<&EntityRemote> {
        self.entities
            .iter()
            .find(|e| e.address().entity == entity_path)
    }

    pub fn entity_mut(&mut self, entity_path: &[u32]) -> Option<&mut EntityRemote> {
        self.entities
            .iter_mut()
            .find(|e| e.address().entity == entity_path)
    }

    pub fn feature(&self, address: &FeatureAddress) -> Option<&FeatureRemote> {
        self.entity(&address.entity)?.feature_with_id(address.feature)
    }

    pub fn feature_mut(&mut self, address: &FeatureAddress) -> Option<&mut FeatureRemote> {
        self.entity_mut(&address.entity)?
            .feature_with_id_mut(address.feature)
    }

    pub fn feature_with_type_and_role(
        &self,
        entity_path: &[u32],
        feature_type: &str,
        role: Role,
    ) -> Option<&FeatureRemote> {
        self.entity(entity_path)?
            .feature_with_type_and_role(feature_type, role)
    }

    /// Make sure a mirror for the given remote feature exists, creating
    /// entity and feature stubs on demand.
    pub fn ensure_feature(&mut self, address: &FeatureAddress) -> &mut FeatureRemote {
        if self.entity(&address.entity).is_none() {
            self.entities.push(EntityRemote::new(
                EntityAddress::new(address.device.clone(), address.entity.clone()),
                None,
            ));
        }

        let entity = self
            .entity_mut(&address.entity)
            .expect("entity just ensured");

        if entity.feature_with_id(address.feature).is_none() {
            entity.add_feature(FeatureRemote::new(address.clone(), None, None));
        }

        entity
            .feature_with_id_mut(address.feature)
            .expect("feature just ensured")
    }

    /// Install the entity and feature tree advertised in a discovery
    /// reply. Returns the addresses of every installed entity.
    pub fn install_discovery(
        &mut self,
        data: &NodeManagementDetailedDiscoveryData,
    ) -> Vec<EntityAddress> {
        let mut installed = Vec::new();

        for entity_info in &data.entity_information {
            let description = &entity_info.description;
            let path = description.entity_address.entity.clone();

            if self.entity(&path).is_none() {
                self.entities.push(EntityRemote::new(
                    EntityAddress::new(self.address.clone(), path.clone()),
                    None,
                ));
            }
            let entity = self.entity_mut(&path).expect("entity just ensured");
            if description.entity_type.is_some() {
                entity.set_entity_type(description.entity_type.clone());
            }
            // A discovery install replaces whatever was mirrored before.
            entity.clear_features();

            installed.push(EntityAddress::new(self.address.clone(), path));
        }

        for feature_info in &data.feature_information {
            let description = &feature_info.description;
            let path = &description.feature_address.entity;
            if self.entity(path).is_none() {
                continue;
            }
            let address = FeatureAddress::new(
                self.address.clone(),
                path.clone(),
                description.feature_address.feature,
            );
            let entity = self.entity_mut(path).expect("entity just checked");
            let mut feature = FeatureRemote::new(address, None, None);
            feature.apply_description(description);
            entity.add_feature(feature);
        }

        installed
    }

    /// The peer's advertised use cases, from its node management mirror.
    pub fn use_cases_data_copy(&self) -> Option<NodeManagementUseCaseData> {
        let nm = self.feature_with_type_and_role(
            &[eebus_wire::spine::address::DEVICE_INFORMATION_ENTITY_ID],
            feature_type::NODE_MANAGEMENT,
            Role::Special,
        )?;
        match nm.data_copy(FunctionType::NodeManagementUseCaseData)? {
            FunctionData::NodeManagementUseCaseData(data) => Some(data),
            _ => None,
        }
    }

    /// The destination-list row describing this peer.
    pub fn create_destination_data(&self) -> DeviceDescription {
        DeviceDescription {
            device_address: self
                .address
                .clone()
                .map(eebus_wire::spine::DeviceAddress::new),
            device_type: self.device_type.clone(),
            network_feature_set: self.feature_set,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eebus_runtime::EebusError;
    use eebus_ship::DataWriter;
    use std::sync::Arc;

    struct NullWriter;

    impl DataWriter for NullWriter {
        fn write_payload(&self, _payload: serde_json::Value) -> Result<(), EebusError> {
            Ok(())
        }
    }

    fn remote() -> DeviceRemote {
        DeviceRemote::new("ski-a", Sender::new("ski-a", Arc::new(NullWriter)))
    }

    #[test]
    fn fresh_mirror_has_node_management() {
        let remote = remote();
        let nm = remote.feature(&FeatureAddress::node_management(None));
        assert!(nm.is_some());
        assert_eq!(nm.unwrap().role(), Some(Role::Special));
    }

    #[test]
    fn ensure_feature_creates_stubs() {
        let mut remote = remote();
        let addr = FeatureAddress::new(None, vec![1, 2], 5);
        remote.ensure_feature(&addr);
        assert!(remote.feature(&addr).is_some());
        // Idempotent.
        remote.ensure_feature(&addr);
        assert_eq!(remote.entity(&[1, 2]).unwrap().features().len(), 1);
    }
}
