//! End-to-end: unregistering a SKI closes the connection and removes all
//! mirrored state, subscriptions and bindings on both sides.

use std::sync::Arc;
use std::time::Duration;

use eebus::spine::node_management::{FeatureSet, Role};
use eebus::spine::FunctionType;
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

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unregister_tears_down_both_sides() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .try_init();

    let heat_pump = service("heatpump", ShipRole::Server, "ski-hp");
    let hp_device = heat_pump.local_device();
    let hp_entity = hp_device.add_entity(EntitySpec {
        entity_type: "HeatPumpAppliance".into(),
        heartbeat_period: None,
    });
    let diagnosis = hp_device
        .add_feature(
            &hp_entity,
            FeatureSpec {
                feature_type: "DeviceDiagnosis".into(),
                role: Role::Server,
            },
        )
        .unwrap();
    hp_device
        .set_function_operations(
            &diagnosis,
            FunctionType::DeviceDiagnosisHeartbeatData,
            true,
            false,
        )
        .unwrap();
    heat_pump.start().unwrap();

    let hems = service("hems", ShipRole::Client, "ski-hems");
    let hems_device = hems.local_device();
    hems.start().unwrap();

    heat_pump.register_remote_ski("ski-hems", true);
    hems.register_remote_ski("ski-hp", true);

    let (hp_side, hems_side) = transport::pair(32);
    heat_pump.accept_peer("ski-hems", hp_side).unwrap();
    hems.connect_peer("ski-hp", hems_side).unwrap();

    // The bootstrap leaves node-management subscriptions on both sides.
    wait_for("node management subscriptions", || {
        !hp_device.subscription_entries().is_empty()
            && !hems_device.subscription_entries().is_empty()
    })
    .await;
    assert!(hp_device.has_remote_device("ski-hems"));
    assert!(hems_device.has_remote_device("ski-hp"));

    // Unregister from the HEMS side: the close announce/confirm exchange
    // runs and both mirrors disappear.
    hems.unregister_remote_ski("ski-hp");

    wait_for("the hems mirror teardown", || {
        !hems_device.has_remote_device("ski-hp")
    })
    .await;
    wait_for("the heat pump mirror teardown", || {
        !hp_device.has_remote_device("ski-hems")
    })
    .await;

    wait_for("connection state cleanup", || {
        hems.connection_state("ski-hp").is_none()
            && heat_pump.connection_state("ski-hems").is_none()
    })
    .await;

    assert!(hp_device.subscription_entries().is_empty());
    assert!(hems_device.subscription_entries().is_empty());
    assert!(hp_device.binding_entries().is_empty());
    assert!(hems_device.binding_entries().is_empty());

    hems.stop().await;
    heat_pump.stop().await;
}
