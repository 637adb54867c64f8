//! The same instance driven over the socket transport instead of in-process calls.
//!
//! The service end runs `serve` on its own tokio runtime thread, the client end is a blocking
//! `TransportChannel`, as a host and a plugin service process would be.

mod helpers;

use aap::prelude::*;
use aap::xs::{serve, MessageTransport};
use helpers::*;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread;

struct ServiceThread {
    handle: thread::JoinHandle<aap::xs::Result<()>>,
}

impl ServiceThread {
    fn spawn(stream: UnixStream, channel: Arc<dyn DirectChannel>) -> Self {
        let handle = thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_io()
                .build()?;
            runtime.block_on(async move {
                let transport = MessageTransport::from_std(stream)?;
                serve(transport, channel).await
            })
        });
        Self { handle }
    }

    fn join(self) -> aap::xs::Result<()> {
        self.handle.join().expect("service thread panicked")
    }
}

fn connect(fixture: &Fixture) -> (Arc<dyn DirectChannel>, ServiceThread) {
    let (client_end, service_end) = UnixStream::pair().unwrap();
    let service = ServiceThread::spawn(service_end, fixture.direct_channel());
    let client = TransportChannel::from_std(client_end).unwrap();
    (Arc::new(client), service)
}

fn instantiate(fixture: &Fixture, channel: Arc<dyn DirectChannel>) -> RemotePluginInstance {
    RemotePluginInstance::instantiate(
        Arc::clone(&fixture.context),
        channel,
        TEST_PLUGIN_ID,
        probe_ports(),
        Box::new(()),
    )
    .unwrap()
}

#[test]
fn test_lifecycle_and_calls_over_socket() {
    let fixture = Fixture::new();
    let (channel, service) = connect(&fixture);
    let mut instance = instantiate(&fixture, channel);

    instance.complete_instantiation().unwrap();
    instance.prepare(TEST_FRAMES).unwrap();

    let presets = instance.presets().unwrap();
    assert_eq!(presets.get_preset_count().unwrap(), 3);
    assert_eq!(presets.get_preset(0).unwrap().name, "Init");

    instance.activate().unwrap();
    let worker = thread::spawn(move || presets.set_preset_index(2));
    while !worker.is_finished() {
        instance.process(TEST_FRAMES, 1_000_000).unwrap();
        thread::yield_now();
    }
    worker.join().unwrap().unwrap();

    instance.deactivate().unwrap();
    instance.dispose().unwrap();
    drop(instance);

    // Hanging up ends the service loop cleanly.
    service.join().unwrap();

    let probe = fixture.probe.lock();
    assert_eq!(probe.preset_selections, vec![2]);
    assert_eq!(probe.tunneled_preset_packets, 1);
    assert!(fixture.channel.is_empty());
}

#[test]
fn test_service_errors_reach_the_client() {
    let fixture = Fixture::new();
    let (channel, service) = connect(&fixture);

    match RemotePluginInstance::instantiate(
        Arc::clone(&fixture.context),
        Arc::clone(&channel),
        "org.example.nothing",
        probe_ports(),
        Box::new(()),
    ) {
        Err(Error::Xs(aap::xs::XsError::Remote(msg))) => {
            assert!(msg.contains("org.example.nothing"))
        }
        Err(e) => panic!("Expected Remote error, got {}", e),
        Ok(_) => panic!("Expected instantiation to fail"),
    }
    match channel.activate(42) {
        Err(aap::xs::XsError::Remote(msg)) => assert!(msg.contains("42")),
        other => panic!("Expected Remote error, got {:?}", other),
    }

    drop(channel);
    service.join().unwrap();
}
