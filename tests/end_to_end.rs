//! Host to plugin round trips through the loopback service.
//!
//! Pattern: a real client instance, a real service instance, and shared-memory buffers in a
//! temporary directory. The audio thread is the test thread calling `process`.

mod helpers;

use aap::prelude::*;
use approx::assert_relative_eq;
use helpers::*;
use std::thread;
use std::time::Duration;

/// Drives `process` until `worker` finishes, as an audio thread would.
fn process_until_done<T>(
    instance: &mut RemotePluginInstance,
    worker: thread::JoinHandle<T>,
) -> T {
    let mut cycles = 0;
    while !worker.is_finished() {
        instance
            .process(TEST_FRAMES, 1_000_000)
            .expect("process failed");
        cycles += 1;
        assert!(cycles < 10_000, "worker never completed");
        thread::sleep(Duration::from_millis(1));
    }
    worker.join().expect("worker panicked")
}

#[test]
fn test_tunneled_preset_change_completes() {
    let fixture = Fixture::new();
    let mut instance = fixture.active_instance();
    let presets = instance.presets().expect("presets extension registered");

    let worker = thread::spawn(move || presets.set_preset_index(2));
    process_until_done(&mut instance, worker).expect("set_preset_index failed");

    let probe = fixture.probe.lock();
    assert_eq!(probe.preset_selections, vec![2]);
    assert_eq!(probe.tunneled_preset_packets, 1);
    drop(probe);
    assert_eq!(instance.pending_callbacks(), 0);
}

#[test]
fn test_tunneled_typed_reply_is_read_back() {
    let fixture = Fixture::new();
    let mut instance = fixture.active_instance();
    let presets = instance.presets().unwrap();

    let worker = thread::spawn(move || {
        let count = presets.get_preset_count()?;
        let preset = presets.get_preset(1)?;
        Ok::<_, aap::xs::XsError>((count, preset))
    });
    let (count, preset) = process_until_done(&mut instance, worker).unwrap();

    assert_eq!(count, 3);
    assert_eq!(preset.id, 101);
    assert_eq!(preset.name, "Bright");
}

#[test]
fn test_direct_calls_while_inactive() {
    let fixture = Fixture::new();
    let instance = fixture.prepared_instance();

    let presets = instance.presets().unwrap();
    assert_eq!(presets.get_preset_count().unwrap(), 3);
    assert_eq!(presets.get_preset(2).unwrap().name, "Dark");
    presets.set_preset_index(1).unwrap();
    assert_eq!(presets.get_preset_index().unwrap(), 1);

    let parameters = instance.parameters().unwrap();
    assert_eq!(parameters.get_parameter_count().unwrap(), 2);
    let mode = parameters.get_parameter(1).unwrap();
    assert_eq!(mode.display_name, "Mode");
    assert_relative_eq!(mode.max_value, 2.0);
    assert_eq!(parameters.get_enumeration_count(1).unwrap(), 3);
    assert_eq!(parameters.get_enumeration(1, 2).unwrap().name, "Mode 2");

    let state = instance.state_extension().unwrap();
    state.set_state(b"probe-state").unwrap();
    assert_eq!(state.get_state_size().unwrap(), 11);
    assert_eq!(state.get_state().unwrap(), b"probe-state");

    // Direct calls never touch the tunnel.
    let probe = fixture.probe.lock();
    assert_eq!(probe.preset_selections, vec![1]);
    assert_eq!(probe.tunneled_preset_packets, 0);
}

#[test]
fn test_host_notifications_arrive_with_next_cycle() {
    let fixture = Fixture::new();
    let mut instance = fixture.active_instance();

    let service = fixture.channel.instance(instance.instance_id()).unwrap();
    {
        let service = service.lock();
        service.presets_service().unwrap().notify_preset_loaded().unwrap();
        service
            .parameters_service()
            .unwrap()
            .notify_parameters_changed()
            .unwrap();
    }
    assert!(fixture.host_events.lock().is_empty());

    // Queued on the service side during this cycle, read by the client from its output.
    instance.process(TEST_FRAMES, 0).unwrap();
    assert_eq!(
        *fixture.host_events.lock(),
        vec!["preset_loaded", "parameters_changed"]
    );

    instance.process(TEST_FRAMES, 0).unwrap();
    assert_eq!(fixture.host_events.lock().len(), 2);
}

#[test]
fn test_audio_crosses_shared_buffers() {
    let fixture = Fixture::new();
    let mut instance = fixture.active_instance();

    let input: Vec<f32> = (0..TEST_FRAMES).map(|i| i as f32 / TEST_FRAMES as f32).collect();
    assert_eq!(instance.buffer().write_audio(AUDIO_IN, &input), TEST_FRAMES);
    instance.process(TEST_FRAMES, 0).unwrap();

    let mut output = vec![0.0f32; TEST_FRAMES];
    assert_eq!(instance.buffer().read_audio(AUDIO_OUT, &mut output), TEST_FRAMES);
    for (out, inp) in output.iter().zip(&input) {
        assert_relative_eq!(*out, inp * PROBE_GAIN, epsilon = 1e-6);
    }
}

#[test]
fn test_deactivate_then_dispose() {
    let fixture = Fixture::new();
    let mut instance = fixture.active_instance();
    let id = instance.instance_id();

    instance.process(TEST_FRAMES, 0).unwrap();
    instance.deactivate().unwrap();
    instance.dispose().unwrap();

    assert_eq!(instance.state(), PluginInstantiationState::Terminated);
    assert!(fixture.channel.instance(id).is_none());
    let probe = fixture.probe.lock();
    assert_eq!(probe.activations, 1);
    assert_eq!(probe.deactivations, 1);
}
