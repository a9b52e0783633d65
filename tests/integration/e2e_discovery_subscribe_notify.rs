//! End-to-end: two services handshake over an in-memory transport, run
//! detailed discovery, subscribe, and see notifies flow.

use std::sync::Arc;
use std::time::Duration;

use eebus::spine::node_management::{FeatureSet, Role};
use eebus::spine::{
    FeatureAddress, FunctionData, FunctionType, LoadControlLimit, LoadControlLimitListData,
    ScaledNumber,
};
use eebus::{EebusService, EntitySpec, FeatureSpec, ServiceConfig, ServiceReader, ShipRole, transport};

struct Quiet;

impl ServiceReader for Quiet {}

fn service(name: &str, role: ShipRole, ski: &str) -> EebusService {
    EebusService::new(
        ServiceConfig {
            vendor: "acme".into(),
            brand: "acme".into(),
            model: name.into(),
            serial: "1".into(),
            ship_id: format!("SHIP-{name}"),
            device_type: "EnergyManagementSystem".into(),
            feature_set: FeatureSet::Smart,
            port: 4711,
            role,
            local_ski: ski.into(),
        },
        Arc::new(Quiet),
    )
}

async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

fn limits(value: i64) -> FunctionData {
    FunctionData::LoadControlLimitListData(LoadControlLimitListData {
        limits: vec![LoadControlLimit {
            limit_id: 1,
            is_limit_active: Some(true),
            value: Some(ScaledNumber::new(value)),
            ..Default::default()
        }],
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn discovery_subscription_and_notify_flow() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .try_init();

    // Heat pump: one CEM entity carrying a LoadControl server.
    let heat_pump = service("heatpump", ShipRole::Server, "ski-hp");
    let hp_device = heat_pump.local_device();
    let hp_entity = hp_device.add_entity(EntitySpec {
        entity_type: "HeatPumpAppliance".into(),
        heartbeat_period: None,
    });
    let hp_load_control = hp_device
        .add_feature(
            &hp_entity,
            FeatureSpec {
                feature_type: "LoadControl".into(),
                role: Role::Server,
            },
        )
        .unwrap();
    hp_device
        .set_function_operations(
            &hp_load_control,
            FunctionType::LoadControlLimitListData,
            true,
            true,
        )
        .unwrap();
    hp_device
        .set_feature_data(&hp_load_control, limits(4200))
        .unwrap();
    heat_pump.start().unwrap();

    // HEMS: a CEM entity with a LoadControl client.
    let hems = service("hems", ShipRole::Client, "ski-hems");
    let hems_device = hems.local_device();
    let cem = hems_device.add_entity(EntitySpec {
        entity_type: "CEM".into(),
        heartbeat_period: None,
    });
    let hems_load_control = hems_device
        .add_feature(
            &cem,
            FeatureSpec {
                feature_type: "LoadControl".into(),
                role: Role::Client,
            },
        )
        .unwrap();
    hems.start().unwrap();

    heat_pump.register_remote_ski("ski-hems", true);
    hems.register_remote_ski("ski-hp", true);

    let (hp_side, hems_side) = transport::pair(32);
    heat_pump.accept_peer("ski-hems", hp_side).unwrap();
    hems.connect_peer("ski-hp", hems_side).unwrap();

    // Discovery installs the mirrors on both sides.
    wait_for("hems to learn the heat pump address", || {
        hems_device.remote_device_address("ski-hp").is_some()
    })
    .await;
    wait_for("heat pump to learn the hems address", || {
        hp_device.remote_device_address("ski-hems").is_some()
    })
    .await;

    // The node-management bootstrap subscribes both ways and reads use
    // cases.
    wait_for("node management subscriptions", || {
        !hp_device.subscription_entries().is_empty()
            && !hems_device.subscription_entries().is_empty()
    })
    .await;
    wait_for("use case data from the heat pump", || {
        hems_device.remote_use_cases("ski-hp").is_some()
    })
    .await;

    // Subscribe the HEMS load control client to the heat pump's server.
    let hp_address = hems_device.remote_device_address("ski-hp").unwrap();
    let remote_load_control = FeatureAddress::new(
        Some(hp_address),
        hp_load_control.entity.clone(),
        hp_load_control.feature,
    );
    hems_device
        .subscribe_to_remote(&hems_load_control, &remote_load_control)
        .unwrap();

    wait_for("the feature subscription on the heat pump", || {
        hp_device
            .subscription_entries()
            .iter()
            .any(|e| e.server.entity == hp_load_control.entity)
    })
    .await;

    // A data update on the heat pump reaches the HEMS mirror as a notify.
    hp_device
        .set_feature_data(&hp_load_control, limits(6300))
        .unwrap();

    wait_for("the notify to land in the hems mirror", || {
        matches!(
            hems_device.remote_feature_data(
                "ski-hp",
                &remote_load_control,
                FunctionType::LoadControlLimitListData,
            ),
            Some(FunctionData::LoadControlLimitListData(data))
                if data.limits.first().and_then(|l| l.value).map(|v| v.number) == Some(6300)
        )
    })
    .await;

    hems.stop().await;
    heat_pump.stop().await;
}
