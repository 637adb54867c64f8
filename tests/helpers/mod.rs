//! Test fixtures for aap integration tests
//!
//! A [`ProbePlugin`] served by a [`LoopbackChannel`] in the test process, with shared-memory
//! files in a temporary directory. Everything the plugin and host observe is recorded in
//! [`Probe`] and [`HostEvents`] so tests can assert on it after driving the instance.

#![allow(dead_code)]

use aap::prelude::*;
use aap::xs::extensions::parameters::{ParameterEnumeration, ParameterInfo};
use aap::xs::extensions::presets::{OPCODE_SET_PRESET_INDEX, PRESETS_EXTENSION_URI};
use aap::xs::extensions::{
    MidiExtension, ParametersExtension, ParametersHostExtension, PresetInfo, PresetsExtension,
    PresetsHostExtension, StateExtension,
};
use aap::xs::{AapxsCall, AapxsProcessor};
use aap::midi::buffer::MidiBufferView;
use aap::midi::ump::{self, UmpIter};
use parking_lot::Mutex;
use std::sync::Arc;
use tempfile::TempDir;

pub const TEST_PLUGIN_ID: &str = "org.example.probe";

/// Frames per cycle for deterministic testing
pub const TEST_FRAMES: usize = 256;

/// Port layout of the probe plugin.
pub const AUDIO_IN: usize = 0;
pub const AUDIO_OUT: usize = 1;
pub const MIDI_IN: usize = 2;
pub const MIDI_OUT: usize = 3;

/// Gain applied from `AUDIO_IN` to `AUDIO_OUT`.
pub const PROBE_GAIN: f32 = 0.5;

pub const PRESET_NAMES: [&str; 3] = ["Init", "Bright", "Dark"];

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn probe_ports() -> Vec<PortInfo> {
    vec![
        PortInfo::audio("audio_in", PortDirection::Input),
        PortInfo::audio("audio_out", PortDirection::Output),
        PortInfo::midi2("midi_in", PortDirection::Input),
        PortInfo::midi2("midi_out", PortDirection::Output),
    ]
}

/// What the plugin side observed.
#[derive(Debug, Default)]
pub struct Probe {
    /// Every `set_preset_index` the plugin received, in order.
    pub preset_selections: Vec<i32>,
    /// SET_PRESET_INDEX SysEx8 messages seen in the MIDI2 input port.
    pub tunneled_preset_packets: usize,
    /// Non-empty MIDI2 input sequences, one per cycle.
    pub midi_inputs: Vec<Vec<u8>>,
    pub process_calls: usize,
    pub activations: usize,
    pub deactivations: usize,
}

pub struct ProbePlugin {
    probe: Arc<Mutex<Probe>>,
    preset_index: i32,
    mapping_policy: MappingPolicy,
    state: Vec<u8>,
    aapxs: AapxsProcessor,
}

impl ProbePlugin {
    pub fn new(probe: Arc<Mutex<Probe>>, mapping_policy: MappingPolicy) -> Self {
        Self {
            probe,
            preset_index: 0,
            mapping_policy,
            state: Vec::new(),
            aapxs: AapxsProcessor::new(aap::core::AAPXS_DATA_MAX_SIZE),
        }
    }
}

impl PresetsExtension for ProbePlugin {
    fn get_preset_count(&mut self) -> i32 {
        PRESET_NAMES.len() as i32
    }

    fn get_preset(&mut self, index: i32) -> Option<PresetInfo> {
        let name = PRESET_NAMES.get(usize::try_from(index).ok()?)?;
        Some(PresetInfo {
            id: 100 + index,
            name: name.to_string(),
        })
    }

    fn get_preset_index(&mut self) -> i32 {
        self.preset_index
    }

    fn set_preset_index(&mut self, index: i32) {
        self.preset_index = index;
        self.probe.lock().preset_selections.push(index);
    }
}

impl ParametersExtension for ProbePlugin {
    fn get_parameter_count(&mut self) -> i32 {
        2
    }

    fn get_parameter(&mut self, index: i32) -> Option<ParameterInfo> {
        let (name, max) = match index {
            0 => ("Gain", 1.0),
            1 => ("Mode", 2.0),
            _ => return None,
        };
        Some(ParameterInfo {
            stable_id: index,
            display_name: name.to_string(),
            path: "/main".to_string(),
            min_value: 0.0,
            max_value: max,
            default_value: 0.0,
        })
    }

    fn get_property(&mut self, parameter_id: i32, _property_id: i32) -> f64 {
        parameter_id as f64 * 0.25
    }

    fn get_enumeration_count(&mut self, parameter_id: i32) -> i32 {
        if parameter_id == 1 {
            3
        } else {
            0
        }
    }

    fn get_enumeration(
        &mut self,
        parameter_id: i32,
        enum_index: i32,
    ) -> Option<ParameterEnumeration> {
        (parameter_id == 1 && (0..3).contains(&enum_index)).then(|| ParameterEnumeration {
            value: enum_index as f64,
            name: format!("Mode {}", enum_index),
        })
    }
}

impl StateExtension for ProbePlugin {
    fn get_state_size(&mut self) -> usize {
        self.state.len()
    }

    fn get_state(&mut self, dst: &mut [u8]) -> usize {
        let len = self.state.len().min(dst.len());
        dst[..len].copy_from_slice(&self.state[..len]);
        len
    }

    fn set_state(&mut self, data: &[u8]) {
        self.state = data.to_vec();
    }
}

impl MidiExtension for ProbePlugin {
    fn get_mapping_policy(&mut self, _plugin_id: &str) -> MappingPolicy {
        self.mapping_policy
    }
}

impl PluginExtensions for ProbePlugin {
    fn state(&mut self) -> Option<&mut dyn StateExtension> {
        Some(self)
    }

    fn presets(&mut self) -> Option<&mut dyn PresetsExtension> {
        Some(self)
    }

    fn parameters(&mut self) -> Option<&mut dyn ParametersExtension> {
        Some(self)
    }

    fn midi(&mut self) -> Option<&mut dyn MidiExtension> {
        Some(self)
    }
}

impl AudioPlugin for ProbePlugin {
    fn ports(&self) -> Vec<PortInfo> {
        probe_ports()
    }

    fn activate(&mut self) {
        self.probe.lock().activations += 1;
    }

    fn process(&mut self, buffer: &PluginBuffer, frame_count: usize, _timeout_ns: u64) {
        let mut samples = vec![0.0f32; frame_count];
        let read = buffer.read_audio(AUDIO_IN, &mut samples);
        samples[..read].iter_mut().for_each(|s| *s *= PROBE_GAIN);
        buffer.write_audio(AUDIO_OUT, &samples[..read]);

        let ump = buffer
            .with_port(MIDI_IN, |bytes| MidiBufferView::new(bytes).ump().to_vec())
            .unwrap_or_default();
        let mut packets = 0;
        self.aapxs.process(&ump, &mut |call: &AapxsCall<'_>| {
            if call.uri == PRESETS_EXTENSION_URI && call.opcode == OPCODE_SET_PRESET_INDEX {
                packets += 1;
            }
        });

        let mut probe = self.probe.lock();
        probe.process_calls += 1;
        probe.tunneled_preset_packets += packets;
        if !ump.is_empty() {
            probe.midi_inputs.push(ump);
        }
    }

    fn deactivate(&mut self) {
        self.probe.lock().deactivations += 1;
    }
}

/// Host notifications received by the client.
pub type HostEvents = Arc<Mutex<Vec<&'static str>>>;

pub struct RecordingHost {
    events: HostEvents,
}

impl PresetsHostExtension for RecordingHost {
    fn notify_preset_loaded(&mut self) {
        self.events.lock().push("preset_loaded");
    }

    fn notify_presets_updated(&mut self) {
        self.events.lock().push("presets_updated");
    }
}

impl ParametersHostExtension for RecordingHost {
    fn notify_parameters_changed(&mut self) {
        self.events.lock().push("parameters_changed");
    }
}

impl HostExtensions for RecordingHost {
    fn presets_host(&mut self) -> Option<&mut dyn PresetsHostExtension> {
        Some(self)
    }

    fn parameters_host(&mut self) -> Option<&mut dyn ParametersHostExtension> {
        Some(self)
    }
}

/// One host context and loopback service in a private shared-memory directory.
pub struct Fixture {
    _dir: TempDir,
    pub context: Arc<HostContext>,
    pub channel: Arc<LoopbackChannel>,
    pub probe: Arc<Mutex<Probe>>,
    pub host_events: HostEvents,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_policy(MappingPolicy::NONE)
    }

    /// Fixture whose plugin reports `policy` from its MIDI extension.
    pub fn with_policy(policy: MappingPolicy) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("Failed to create shm directory");
        let context = Arc::new(
            HostContext::new(HostConfig::default())
                .expect("Failed to create host context")
                .with_shm_directory(dir.path()),
        );
        let probe = Arc::new(Mutex::new(Probe::default()));
        let plugin_probe = Arc::clone(&probe);
        let channel = Arc::new(LoopbackChannel::new(
            Arc::clone(&context),
            move |plugin_id: &str, _sample_rate: u32| -> Option<Box<dyn AudioPlugin>> {
                (plugin_id == TEST_PLUGIN_ID).then(|| {
                    Box::new(ProbePlugin::new(Arc::clone(&plugin_probe), policy))
                        as Box<dyn AudioPlugin>
                })
            },
        ));
        Self {
            _dir: dir,
            context,
            channel,
            probe,
            host_events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn direct_channel(&self) -> Arc<dyn DirectChannel> {
        Arc::clone(&self.channel) as Arc<dyn DirectChannel>
    }

    /// A fresh instance in `INITIAL`.
    pub fn instantiate(&self) -> RemotePluginInstance {
        RemotePluginInstance::instantiate(
            Arc::clone(&self.context),
            self.direct_channel(),
            TEST_PLUGIN_ID,
            probe_ports(),
            Box::new(RecordingHost {
                events: Arc::clone(&self.host_events),
            }),
        )
        .expect("Failed to instantiate probe plugin")
    }

    /// A fresh instance in `INACTIVE`.
    pub fn prepared_instance(&self) -> RemotePluginInstance {
        let mut instance = self.instantiate();
        instance
            .complete_instantiation()
            .expect("complete_instantiation failed");
        instance.prepare(TEST_FRAMES).expect("prepare failed");
        instance
    }

    /// A fresh instance in `ACTIVE`.
    pub fn active_instance(&self) -> RemotePluginInstance {
        let mut instance = self.prepared_instance();
        instance.activate().expect("activate failed");
        instance
    }
}

/// `(message type, status nibble)` of each message in `ump`, skipping timestamps.
pub fn ump_messages(ump: &[u8]) -> Vec<(u8, u8)> {
    UmpIter::new(ump)
        .map(|message| message.word(0))
        .filter(|&word| ump::message_type(word) != ump::MESSAGE_TYPE_UTILITY)
        .map(|word| (ump::message_type(word), ump::status_nibble(word)))
        .collect()
}
