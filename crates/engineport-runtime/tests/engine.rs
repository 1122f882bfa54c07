mod common;

use anyhow::Result;
use bytes::Bytes;
use engineport_core::{
    Capability, DeviceDescriptor, EnginePayload, MalformedBindingName, MalformedDeviceRecord,
    Tensor,
};
use engineport_runtime::{DeviceContext, EngineError, ExecutionEngine};

use common::{binding, shuffled_bindings, two_devices, MockFactory};

const BLOB: &[u8] = b"engine-blob";

#[test]
fn restores_on_recorded_device() -> Result<()> {
    let driver = two_devices();
    let devices = DeviceContext::new(driver.clone());
    let factory = MockFactory::new(shuffled_bindings());
    let recorded = DeviceDescriptor::new(1, 8, 6);
    let payload = EnginePayload {
        device_info: recorded.encode(),
        engine: Bytes::from_static(BLOB),
    };

    let engine = ExecutionEngine::from_payload(&devices, &factory, "model", &payload)?;
    assert_eq!(driver.switches(), vec![1]);
    assert_eq!(engine.device(), &recorded);

    let [device_info, blob] = engine.serialize()?;
    assert_eq!(DeviceDescriptor::decode(&device_info)?, recorded);
    assert_eq!(blob.as_ref(), BLOB);
    Ok(())
}

#[test]
fn legacy_form_keeps_active_device() -> Result<()> {
    let driver = two_devices();
    let devices = DeviceContext::new(driver.clone());
    let factory = MockFactory::new(shuffled_bindings());

    let engine = ExecutionEngine::from_serialized(&devices, &factory, BLOB)?;
    assert!(driver.switches().is_empty());
    assert_eq!(engine.device(), &DeviceDescriptor::new(0, 7, 5));
    assert_eq!(engine.name(), "deserialized_trt_engine");
    Ok(())
}

#[test]
fn two_part_form_round_trips() -> Result<()> {
    let driver = two_devices();
    let devices = DeviceContext::new(driver.clone());
    let factory = MockFactory::new(shuffled_bindings());

    let first = ExecutionEngine::new(&devices, &factory, "my.model", BLOB, &[])?;
    assert_eq!(first.name(), "my_model_engine");

    let parts = first.serialize()?;
    let second = ExecutionEngine::from_parts(&devices, &factory, &parts)?;
    assert_eq!(second.device(), first.device());
    assert_eq!(second.serialize()?, parts);
    assert_eq!(driver.switches(), vec![0]);
    Ok(())
}

#[test]
fn short_device_record_is_rejected_before_deserializing() {
    let devices = DeviceContext::new(two_devices());
    let factory = MockFactory::new(shuffled_bindings());

    let err = ExecutionEngine::new(&devices, &factory, "m", BLOB, &[0u8; 11]).unwrap_err();
    assert_eq!(
        err,
        EngineError::MalformedDeviceRecord(MalformedDeviceRecord {
            expected: 12,
            len: 11
        })
    );
    assert!(factory.drops().is_empty());
}

#[test]
fn newer_engine_fails_on_older_device() {
    let devices = DeviceContext::new(two_devices());
    let mut factory = MockFactory::new(shuffled_bindings());
    factory.built_for = Some(Capability::new(9, 0));

    let err = ExecutionEngine::from_serialized(&devices, &factory, BLOB).unwrap_err();
    assert_eq!(
        err,
        EngineError::DeviceMismatch {
            device: DeviceDescriptor::new(0, 7, 5),
            built_for: Capability::new(9, 0),
        }
    );
    assert_eq!(factory.drops(), ["engine", "runtime"]);
}

#[test]
fn older_engine_runs_on_newer_device() -> Result<()> {
    let devices = DeviceContext::new(two_devices());
    let mut factory = MockFactory::new(shuffled_bindings());
    factory.built_for = Some(Capability::new(7, 0));
    ExecutionEngine::from_serialized(&devices, &factory, BLOB)?;
    Ok(())
}

#[test]
fn backend_failure_surfaces() {
    let devices = DeviceContext::new(two_devices());
    let factory = MockFactory::new(shuffled_bindings());
    let err = ExecutionEngine::from_serialized(&devices, &factory, b"corrupt").unwrap_err();
    assert!(matches!(err, EngineError::Backend(_)), "{err}");
    assert_eq!(factory.drops(), ["runtime"]);
}

#[test]
fn binding_maps_use_name_suffix() -> Result<()> {
    let devices = DeviceContext::new(two_devices());
    let factory = MockFactory::new(shuffled_bindings());
    let engine = ExecutionEngine::from_serialized(&devices, &factory, BLOB)?;

    assert_eq!(engine.num_io(), (2, 2));
    assert_eq!(engine.in_binding_map().get(&0), Some(&1));
    assert_eq!(engine.in_binding_map().get(&2), Some(&0));
    assert_eq!(engine.out_binding_map().get(&1), Some(&1));
    assert_eq!(engine.out_binding_map().get(&3), Some(&0));
    Ok(())
}

#[test]
fn malformed_binding_name_releases_handles_in_order() {
    let devices = DeviceContext::new(two_devices());
    let factory = MockFactory::new(vec![binding("input_0", true), binding("output_x", false)]);

    let err = ExecutionEngine::from_serialized(&devices, &factory, BLOB).unwrap_err();
    assert_eq!(
        err,
        EngineError::MalformedBindingName(MalformedBindingName {
            name: "output_x".to_string()
        })
    );
    assert_eq!(factory.drops(), ["context", "engine", "runtime"]);
}

#[test]
fn duplicate_logical_index_is_rejected() {
    let devices = DeviceContext::new(two_devices());
    let factory = MockFactory::new(vec![
        binding("input_0", true),
        binding("other_input_0", true),
        binding("output_0", false),
    ]);
    let err = ExecutionEngine::from_serialized(&devices, &factory, BLOB).unwrap_err();
    assert!(matches!(err, EngineError::BindingIndex { .. }), "{err}");
}

#[test]
fn drop_releases_context_then_engine_then_runtime() -> Result<()> {
    let devices = DeviceContext::new(two_devices());
    let factory = MockFactory::new(shuffled_bindings());
    let engine = ExecutionEngine::from_serialized(&devices, &factory, BLOB)?;
    assert!(factory.drops().is_empty());
    drop(engine);
    assert_eq!(factory.drops(), ["context", "engine", "runtime"]);
    Ok(())
}

#[test]
fn execute_maps_logical_order_through_physical_slots() -> Result<()> {
    let devices = DeviceContext::new(two_devices());
    let factory = MockFactory::new(shuffled_bindings());
    let mut engine = ExecutionEngine::from_serialized(&devices, &factory, BLOB)?;

    let a = Tensor::from_f32(&[2], &[1.0, 2.0])?;
    let b = Tensor::from_f32(&[2], &[3.0, 4.0])?;
    let outputs = engine.execute(vec![a.clone(), b.clone()])?;
    assert_eq!(outputs, vec![a.clone(), b]);

    let err = engine.execute(vec![a]).unwrap_err();
    assert_eq!(err, EngineError::InputCount { expected: 2, got: 1 });
    Ok(())
}

#[test]
fn recorded_capability_is_checked_without_backend_metadata() {
    let driver = two_devices();
    let devices = DeviceContext::new(driver.clone());
    let factory = MockFactory::new(shuffled_bindings());
    assert_eq!(factory.built_for, None);
    let payload = EnginePayload {
        device_info: DeviceDescriptor::new(1, 9, 0).encode(),
        engine: Bytes::from_static(BLOB),
    };

    let err = ExecutionEngine::from_payload(&devices, &factory, "model", &payload).unwrap_err();
    assert_eq!(
        err,
        EngineError::DeviceMismatch {
            device: DeviceDescriptor::new(1, 8, 6),
            built_for: Capability::new(9, 0),
        }
    );
    assert_eq!(driver.switches(), vec![1]);
    assert!(factory.drops().is_empty());
}

#[test]
fn record_from_older_device_still_loads() -> Result<()> {
    let devices = DeviceContext::new(two_devices());
    let factory = MockFactory::new(shuffled_bindings());
    let payload = EnginePayload {
        device_info: DeviceDescriptor::new(1, 8, 0).encode(),
        engine: Bytes::from_static(BLOB),
    };
    let engine = ExecutionEngine::from_payload(&devices, &factory, "model", &payload)?;
    assert_eq!(engine.device(), &DeviceDescriptor::new(1, 8, 0));
    Ok(())
}
