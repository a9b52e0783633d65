//! End-to-end: writes are refused without a binding and applied with one.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use eebus::spine::node_management::{FeatureSet, Role};
use eebus::spine::{
    FeatureAddress, FunctionData, FunctionType, LoadControlLimit, LoadControlLimitListData,
    ScaledNumber, result_error,
};
use eebus::{
    EebusService, EntitySpec, FeatureSpec, ResponseResult, ServiceConfig, ServiceReader, ShipRole,
    transport,
};

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
            value: Some(ScaledNumber::new(value)),
            ..Default::default()
        }],
    })
}

fn stored_limit(
    device: &Arc<eebus::DeviceLocal>,
    feature: &FeatureAddress,
) -> Option<i64> {
    match device.feature_data(feature, FunctionType::LoadControlLimitListData)? {
        FunctionData::LoadControlLimitListData(data) => {
            data.limits.first().and_then(|l| l.value).map(|v| v.number)
        }
        _ => None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn write_is_gated_by_binding() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .try_init();

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
        .set_feature_data(&hp_load_control, limits(100))
        .unwrap();
    heat_pump.start().unwrap();

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

    wait_for("discovery on both sides", || {
        hems_device.remote_device_address("ski-hp").is_some()
            && hp_device.remote_device_address("ski-hems").is_some()
    })
    .await;

    let hp_address = hems_device.remote_device_address("ski-hp").unwrap();
    let remote_load_control = FeatureAddress::new(
        Some(hp_address),
        hp_load_control.entity.clone(),
        hp_load_control.feature,
    );

    // Collect result frames arriving at the client feature.
    let errors: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let errors2 = Arc::clone(&errors);
    hems_device
        .add_result_callback(
            &hems_load_control,
            Arc::new(move |response| {
                if let ResponseResult::Data {
                    data: FunctionData::ResultData(result),
                    ..
                } = &response.result
                {
                    errors2.lock().unwrap().push(result.error_number);
                }
            }),
        )
        .unwrap();

    // Without a binding the write bounces with a general error and the
    // stored data stays put.
    hems_device
        .write_remote_data(
            &hems_load_control,
            &remote_load_control,
            limits(999),
            None,
            None,
        )
        .unwrap();

    wait_for("the rejection result", || {
        errors
            .lock()
            .unwrap()
            .contains(&result_error::GENERAL_ERROR)
    })
    .await;
    assert_eq!(stored_limit(&hp_device, &hp_load_control), Some(100));

    // Bind, then write again: accepted and applied.
    hems_device
        .bind_to_remote(&hems_load_control, &remote_load_control)
        .unwrap();
    wait_for("the binding on the heat pump", || {
        !hp_device.binding_entries().is_empty()
    })
    .await;

    hems_device
        .write_remote_data(
            &hems_load_control,
            &remote_load_control,
            limits(999),
            None,
            None,
        )
        .unwrap();

    wait_for("the write to be applied", || {
        stored_limit(&hp_device, &hp_load_control) == Some(999)
    })
    .await;
    wait_for("the success ack", || {
        errors.lock().unwrap().contains(&result_error::NO_ERROR)
    })
    .await;

    hems.stop().await;
    heat_pump.stop().await;
}
