#![forbid(unsafe_code)]

//! End-to-end fallback flow: companion service -> binding -> raw queue
//! -> parser worker -> parsed queue -> dispatch scheduler.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::json;
use streambridge_backend::fallback::host::{
	CapabilityError, ComponentHost, ComponentModule, ListenerFn, ListenerGuard, ServiceSurface, raw_payload_channel,
};
use streambridge_backend::fallback::{COMPONENT_ID, MESSAGE_EVENT, SEND_MEMBER, SERVICE_TYPE, bind, probe_ready};
use streambridge_backend::parsed_event_channel;
use streambridge_domain::{BackendKind, ChatEvent, UNKNOWN_SENDER};
use streambridge_pipeline::dispatch::DispatchConfig;
use streambridge_pipeline::parser::spawn_parser_worker;
use streambridge_pipeline::{DispatchScheduler, EventListener};
use tokio::sync::watch;

struct RelayService {
	listeners: Mutex<Vec<(String, ListenerFn)>>,
}

impl RelayService {
	fn new() -> Self {
		Self {
			listeners: Mutex::new(Vec::new()),
		}
	}

	fn emit(&self, payload: serde_json::Value) {
		for (name, listener) in self.listeners.lock().iter() {
			if name == MESSAGE_EVENT {
				listener(payload.clone());
			}
		}
	}
}

impl ServiceSurface for RelayService {
	fn has_member(&self, name: &str) -> bool {
		name == MESSAGE_EVENT || name == SEND_MEMBER
	}

	fn invoke(&self, member: &str, _args: serde_json::Value) -> Result<serde_json::Value, CapabilityError> {
		if !self.has_member(member) {
			return Err(CapabilityError::MemberNotFound(member.to_string()));
		}
		Ok(serde_json::Value::Null)
	}

	fn attach_listener(&self, event: &str, listener: ListenerFn) -> Result<ListenerGuard, CapabilityError> {
		if !self.has_member(event) {
			return Err(CapabilityError::AttachFailed {
				event: event.to_string(),
				detail: "unknown event".to_string(),
			});
		}
		self.listeners.lock().push((event.to_string(), listener));
		Ok(ListenerGuard::noop())
	}
}

struct RelayModule {
	service: Arc<RelayService>,
}

impl ComponentModule for RelayModule {
	fn service(&self, type_name: &str) -> Option<Arc<dyn ServiceSurface>> {
		(type_name == SERVICE_TYPE).then(|| Arc::clone(&self.service) as Arc<dyn ServiceSurface>)
	}
}

struct RelayHost {
	module: Arc<RelayModule>,
}

impl ComponentHost for RelayHost {
	fn module(&self, logical_id: &str) -> Option<Arc<dyn ComponentModule>> {
		(logical_id == COMPONENT_ID).then(|| Arc::clone(&self.module) as Arc<dyn ComponentModule>)
	}
}

#[derive(Default)]
struct Collector {
	events: Arc<Mutex<Vec<(String, String, u64)>>>,
}

impl EventListener for Collector {
	fn on_chat(&mut self, ev: &ChatEvent) {
		assert_eq!(ev.origin, BackendKind::Fallback);
		self.events.lock().push((ev.sender.clone(), ev.text.clone(), ev.bits));
	}
}

#[tokio::test]
async fn companion_payloads_reach_dispatch_in_order() {
	let service = Arc::new(RelayService::new());
	let host = RelayHost {
		module: Arc::new(RelayModule {
			service: Arc::clone(&service),
		}),
	};

	let bound = probe_ready(&host).expect("companion ready");
	let (raw_tx, raw_rx) = raw_payload_channel();
	let binding = bind(bound, raw_tx).expect("binding");
	assert!(binding.can_send());

	let (parsed_tx, parsed_rx) = parsed_event_channel();
	let (cancel_tx, cancel_rx) = watch::channel(false);
	let worker = spawn_parser_worker(raw_rx, parsed_tx, cancel_rx);

	service.emit(json!({ "DisplayName": "alice", "Message": "first" }));
	service.emit(json!({ "Text": "no sender fields" }));
	service.emit(json!({ "UserName": "bob", "Message": "" }));
	service.emit(json!({ "Name": "carol", "Content": "third", "BitsAmount": "50" }));

	let events = Arc::new(Mutex::new(Vec::new()));
	let mut dispatcher = DispatchScheduler::new(parsed_rx, DispatchConfig::default());
	dispatcher.add_listener(Box::new(Collector {
		events: Arc::clone(&events),
	}));

	// The parser runs on the runtime; tick until the three surviving
	// payloads come through the other end.
	let deadline = Instant::now() + Duration::from_secs(2);
	while events.lock().len() < 3 && Instant::now() < deadline {
		dispatcher.tick(&|| true);
		tokio::time::sleep(Duration::from_millis(10)).await;
	}

	assert_eq!(
		*events.lock(),
		vec![
			("alice".to_string(), "first".to_string(), 0),
			(UNKNOWN_SENDER.to_string(), "no sender fields".to_string(), 0),
			("carol".to_string(), "third".to_string(), 50),
		]
	);

	let _ = cancel_tx.send(true);
	tokio::time::timeout(Duration::from_millis(500), worker)
		.await
		.expect("parser exits on cancellation")
		.unwrap();
}
