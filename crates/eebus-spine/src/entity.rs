//! Local entities and their remote mirrors.

use eebus_wire::spine::EntityAddress;
use eebus_wire::spine::node_management::{
    EntityDescription, EntityInformation, Role, UseCaseInformation,
};

use crate::feature::{FeatureLocal, FeatureRemote};
use crate::heartbeat::HeartbeatManager;

/// Well-known entity type names.
pub mod entity_type {
    pub const DEVICE_INFORMATION: &str = "DeviceInformation";
    pub const CEM: &str = "CEM";
    pub const GRID_GUARD: &str = "GridGuard";
    pub const EV: &str = "EV";
    pub const HEAT_PUMP: &str = "HeatPumpAppliance";
}

pub struct EntityLocal {
    address: EntityAddress,
    entity_type: String,
    next_feature_id: u32,
    features: Vec<FeatureLocal>,
    heartbeat: Option<HeartbeatManager>,
    use_cases: Vec<UseCaseInformation>,
}

impl EntityLocal {
    pub fn new(address: EntityAddress, entity_type: impl Into<String>) -> Self {
        EntityLocal {
            address,
            entity_type: entity_type.into(),
            next_feature_id: 0,
            features: Vec::new(),
            heartbeat: None,
            use_cases: Vec::new(),
        }
    }

    pub fn address(&self) -> &EntityAddress {
        &self.address
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Hand out the next free feature id within this entity.
    pub fn next_feature_id(&mut self) -> u32 {
        let id = self.next_feature_id;
        self.next_feature_id += 1;
        id
    }

    pub fn add_feature(&mut self, feature: FeatureLocal) {
        self.features.push(feature);
    }

    pub fn feature_with_id(&self, id: u32) -> Option<&FeatureLocal> {
        self.features.iter().find(|f| f.id() == id)
    }

    pub fn feature_with_id_mut(&mut self, id: u32) -> Option<&mut FeatureLocal> {
        self.features.iter_mut().find(|f| f.id() == id)
    }

    pub fn feature_with_type_and_role(&self, feature_type: &str, role: Role) -> Option<&FeatureLocal> {
        self.features
            .iter()
            .find(|f| f.feature_type() == feature_type && f.role() == role)
    }

    pub fn features(&self) -> &[FeatureLocal] {
        &self.features
    }

    pub fn features_mut(&mut self) -> &mut [FeatureLocal] {
        &mut self.features
    }

    pub fn heartbeat(&self) -> Option<&HeartbeatManager> {
        self.heartbeat.as_ref()
    }

    pub fn heartbeat_mut(&mut self) -> Option<&mut HeartbeatManager> {
        self.heartbeat.as_mut()
    }

    pub fn set_heartbeat(&mut self, manager: HeartbeatManager) {
        self.heartbeat = Some(manager);
    }

    pub fn add_use_case_support(&mut self, info: UseCaseInformation) {
        self.use_cases.push(info);
    }

    pub fn remove_all_use_case_supports(&mut self) {
        self.use_cases.clear();
    }

    /// Use-case rows advertised by this entity, with the address filled in.
    pub fn use_case_information(&self) -> Vec<UseCaseInformation> {
        self.use_cases
            .iter()
            .map(|info| {
                let mut info = info.clone();
                if info.address.is_none() {
                    info.address = Some(self.address.clone());
                }
                info
            })
            .collect()
    }

    pub fn create_information(&self) -> EntityInformation {
        EntityInformation {
            description: EntityDescription {
                entity_address: self.address.clone(),
                entity_type: Some(self.entity_type.clone()),
                last_state_change: None,
                description: None,
            },
        }
    }
}

pub struct EntityRemote {
    address: EntityAddress,
    entity_type: Option<String>,
    features: Vec<FeatureRemote>,
}

impl EntityRemote {
    pub fn new(address: EntityAddress, entity_type: Option<String>) -> Self {
        EntityRemote {
            address,
            entity_type,
            features: Vec::new(),
        }
    }

    pub fn address(&self) -> &EntityAddress {
        &self.address
    }

    pub fn entity_type(&self) -> Option<&str> {
        self.entity_type.as_deref()
    }

    pub fn set_entity_type(&mut self, entity_type: Option<String>) {
        self.entity_type = entity_type;
    }

    pub fn add_feature(&mut self, feature: FeatureRemote) {
        self.features.push(feature);
    }

    pub fn feature_with_id(&self, id: u32) -> Option<&FeatureRemote> {
        self.features.iter().find(|f| f.address().feature == id)
    }

    pub fn feature_with_id_mut(&mut self, id: u32) -> Option<&mut FeatureRemote> {
        self.features.iter_mut().find(|f| f.address().feature == id)
    }

    pub fn feature_with_type_and_role(
        &self,
        feature_type: &str,
        role: Role,
    ) -> Option<&FeatureRemote> {
        self.features
            .iter()
            .find(|f| f.feature_type() == Some(feature_type) && f.role() == Some(role))
    }

    pub fn features(&self) -> &[FeatureRemote] {
        &self.features
    }

    /// Drop every cached feature, ahead of a fresh discovery install.
    pub fn clear_features(&mut self) {
        self.features.clear();
    }
}
