// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Test doubles shared by the unit and functional tests.

use core::ops::ControlFlow;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::crypto::EntropySource;
use crate::features::NodeFeatures;
use crate::graph::{DirectedChannel, GraphError, NodeTraverser};
use crate::logger::{Logger, Record};
use crate::registry::{ActorRegistry, PeerActor};
use crate::types::{OnionMessage, Vertex};

/// Creates a test `Vertex` from a single byte for readability. Such vertices
/// do not parse as public keys and are only suitable for pathfinding tests.
pub fn vertex_from_byte(b: u8) -> Vertex {
	let mut bytes = [0u8; 33];
	bytes[0] = b;
	Vertex::from_bytes(bytes)
}

/// An in-memory channel graph with per-node feature vectors and injectable
/// traversal failures.
pub struct TestGraph {
	edges: HashMap<Vertex, Vec<Vertex>>,
	features: HashMap<Vertex, NodeFeatures>,
	failing_channels: HashSet<Vertex>,
	feature_fetches: AtomicUsize,
}

impl TestGraph {
	pub fn new() -> Self {
		TestGraph {
			edges: HashMap::new(),
			features: HashMap::new(),
			failing_channels: HashSet::new(),
			feature_fetches: AtomicUsize::new(0),
		}
	}

	pub fn add_node_with_onion_support(&mut self, vertex: Vertex) {
		let mut features = NodeFeatures::empty();
		features.set_onion_messages_optional();
		self.features.insert(vertex, features);
	}

	pub fn add_node_without_onion_support(&mut self, vertex: Vertex) {
		self.features.insert(vertex, NodeFeatures::empty());
	}

	/// Adds a bidirectional channel between two nodes.
	pub fn add_edge(&mut self, a: Vertex, b: Vertex) {
		self.edges.entry(a).or_default().push(b);
		self.edges.entry(b).or_default().push(a);
	}

	/// Makes channel iteration fail for the given node.
	pub fn fail_channels_of(&mut self, vertex: Vertex) {
		self.failing_channels.insert(vertex);
	}

	/// Returns how many feature lookups the graph has served.
	pub fn feature_fetches(&self) -> usize {
		self.feature_fetches.load(Ordering::SeqCst)
	}
}

impl NodeTraverser for TestGraph {
	fn for_each_node_channel(
		&self, node: &Vertex,
		visit: &mut dyn FnMut(&DirectedChannel) -> Result<ControlFlow<()>, GraphError>,
	) -> Result<ControlFlow<()>, GraphError> {
		if self.failing_channels.contains(node) {
			return Err(GraphError::Backend("injected channel failure".to_string()));
		}
		if let Some(neighbors) = self.edges.get(node) {
			for neighbor in neighbors {
				if let ControlFlow::Break(()) =
					visit(&DirectedChannel { other_node: *neighbor })?
				{
					return Ok(ControlFlow::Break(()));
				}
			}
		}
		Ok(ControlFlow::Continue(()))
	}

	fn fetch_node_features(&self, node: &Vertex) -> Result<NodeFeatures, GraphError> {
		self.feature_fetches.fetch_add(1, Ordering::SeqCst);
		self.features.get(node).cloned().ok_or(GraphError::NodeNotFound)
	}
}

/// A logger that records formatted lines for assertions.
pub struct TestLogger {
	lines: Mutex<Vec<String>>,
}

impl TestLogger {
	pub fn new() -> Self {
		TestLogger { lines: Mutex::new(Vec::new()) }
	}

	pub fn lines(&self) -> usize {
		self.lines.lock().unwrap().len()
	}
}

impl Logger for TestLogger {
	fn log(&self, record: &Record) {
		self.lines.lock().unwrap().push(format!("{} {}", record.level, record.args));
	}
}

/// A deterministic entropy source. Each draw yields a distinct, valid secret
/// key, and two sources built from the same seed yield the same sequence.
pub struct TestEntropySource {
	seed: u8,
	counter: AtomicU8,
}

impl TestEntropySource {
	pub fn new(seed: u8) -> Self {
		TestEntropySource { seed, counter: AtomicU8::new(0) }
	}
}

impl EntropySource for TestEntropySource {
	fn get_secure_random_bytes(&self) -> [u8; 32] {
		let draw = self.counter.fetch_add(1, Ordering::SeqCst);
		[self.seed.wrapping_add(draw).wrapping_add(1); 32]
	}
}

/// A peer actor that records every envelope handed to it.
#[derive(Clone)]
pub struct TestPeerActor {
	sent: Arc<Mutex<Vec<OnionMessage>>>,
}

impl PeerActor for TestPeerActor {
	fn tell(&self, msg: OnionMessage) {
		self.sent.lock().unwrap().push(msg);
	}
}

/// An actor registry over a fixed set of recording peer actors.
pub struct TestActorRegistry {
	actors: HashMap<Vertex, TestPeerActor>,
}

impl TestActorRegistry {
	pub fn new() -> Self {
		TestActorRegistry { actors: HashMap::new() }
	}

	/// Registers an actor for the node and returns the buffer its envelopes
	/// land in.
	pub fn register_peer(&mut self, vertex: Vertex) -> Arc<Mutex<Vec<OnionMessage>>> {
		let sent = Arc::new(Mutex::new(Vec::new()));
		self.actors.insert(vertex, TestPeerActor { sent: Arc::clone(&sent) });
		sent
	}
}

impl ActorRegistry for TestActorRegistry {
	type Actor = TestPeerActor;

	fn find_peer_actor(&self, node_id: &Vertex) -> Option<TestPeerActor> {
		self.actors.get(node_id).cloned()
	}
}
