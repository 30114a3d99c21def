// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Onion message pathfinding lives here.
//!
//! It differs from payment pathfinding in that channel liquidity, fees, and
//! knobs such as `htlc_maximum_msat` do not factor into path selection --
//! onion messages require a peer connection and nothing more. A plain
//! breadth-first search over the channel graph therefore finds the shortest
//! usable route, filtered to nodes that advertise onion message support.

use core::ops::ControlFlow;
use std::collections::{HashMap, HashSet};

use crate::graph::NodeTraverser;
use crate::logger::Logger;
use crate::messenger::{SendContext, SendError};
use crate::types::{OnionMessagePath, Vertex};

/// Finds the shortest path (by hop count) from `source` to `destination`
/// through nodes that support onion messaging.
///
/// The returned hops run from the first-hop peer to the destination and never
/// include `source`; a path from a node to itself is empty. Paths are capped
/// at `max_hops` hops. Among paths of equal length the graph's neighbor
/// iteration order decides, and callers must not depend on the tie-break.
pub fn find_path<G, L>(
	graph: &G, source: &Vertex, destination: &Vertex, max_hops: usize, logger: &L,
) -> Result<OnionMessagePath, SendError>
where
	G: NodeTraverser + ?Sized,
	L: Logger + ?Sized,
{
	find_path_in_context(graph, source, destination, max_hops, &SendContext::new(), logger)
}

/// [`find_path`] with a cancellation context, polled before every
/// graph-adapter call.
pub(crate) fn find_path_in_context<G, L>(
	graph: &G, source: &Vertex, destination: &Vertex, max_hops: usize, ctx: &SendContext,
	logger: &L,
) -> Result<OnionMessagePath, SendError>
where
	G: NodeTraverser + ?Sized,
	L: Logger + ?Sized,
{
	if ctx.is_cancelled() {
		return Err(SendError::Cancelled);
	}

	// The destination must advertise support before any traversal is worth
	// doing. An unknown node is treated the same as an unsupported one, but
	// reported distinctly so callers can fall back to a direct send.
	let dest_features =
		graph.fetch_node_features(destination).map_err(|_| SendError::DestinationUnknown)?;
	if !dest_features.supports_onion_messages() {
		return Err(SendError::DestinationNoOnionSupport);
	}

	// An empty path. The caller decides whether sending to itself makes
	// sense; dispatch rejects it.
	if source == destination {
		return Ok(OnionMessagePath { hops: Vec::new() });
	}

	let mut visited: HashSet<Vertex> = HashSet::new();
	let mut parent: HashMap<Vertex, Vertex> = HashMap::new();

	// A single search may reach the same candidate from several frontier
	// nodes; the cache bounds feature fetches to one per reached vertex. It
	// must not outlive the call, as node features change on reconnection.
	let mut feature_cache: HashMap<Vertex, bool> = HashMap::new();
	feature_cache.insert(*destination, true);

	visited.insert(*source);

	let mut queue = vec![*source];
	let mut depth = 0;

	while !queue.is_empty() {
		depth += 1;
		if depth > max_hops {
			break;
		}

		let mut next_queue = Vec::new();

		for current in queue.iter() {
			if ctx.is_cancelled() {
				return Err(SendError::Cancelled);
			}

			let flow = graph
				.for_each_node_channel(current, &mut |channel| {
					let neighbor = channel.other_node;

					if visited.contains(&neighbor) {
						return Ok(ControlFlow::Continue(()));
					}

					if !supports_onion_messages(graph, &mut feature_cache, &neighbor) {
						return Ok(ControlFlow::Continue(()));
					}

					visited.insert(neighbor);
					parent.insert(neighbor, *current);

					if neighbor == *destination {
						return Ok(ControlFlow::Break(()));
					}

					next_queue.push(neighbor);

					Ok(ControlFlow::Continue(()))
				})
				.map_err(SendError::Graph)?;

			if let ControlFlow::Break(()) = flow {
				let path = reconstruct_path(&parent, source, destination);
				log_debug!(
					logger,
					"Found path to {} with {} hop(s)",
					destination,
					path.hops.len()
				);
				return Ok(path);
			}
		}

		queue = next_queue;
	}

	log_debug!(logger, "No path found to {} within {} hops", destination, max_hops);

	Err(SendError::NoPathFound)
}

/// Checks (with caching) whether a node advertises the onion messages feature
/// bit. A node whose features cannot be fetched is cached as unsupported.
fn supports_onion_messages<G: NodeTraverser + ?Sized>(
	graph: &G, feature_cache: &mut HashMap<Vertex, bool>, node: &Vertex,
) -> bool {
	if let Some(cached) = feature_cache.get(node) {
		return *cached;
	}

	let supports = match graph.fetch_node_features(node) {
		Ok(features) => features.supports_onion_messages(),
		Err(_) => false,
	};

	feature_cache.insert(*node, supports);

	supports
}

/// Rebuilds the path from destination back to source using the parent map,
/// returning the hops in forward order (excluding source).
fn reconstruct_path(
	parent: &HashMap<Vertex, Vertex>, source: &Vertex, destination: &Vertex,
) -> OnionMessagePath {
	let mut hops = Vec::new();

	let mut current = *destination;
	while current != *source {
		hops.push(current);
		match parent.get(&current) {
			Some(prev) => current = *prev,
			None => {
				debug_assert!(false, "every visited vertex has a parent");
				break;
			},
		}
	}

	hops.reverse();

	OnionMessagePath { hops }
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::graph::GraphError;
	use crate::test_utils::{vertex_from_byte, TestGraph, TestLogger};

	#[test]
	fn direct_neighbor() {
		let mut graph = TestGraph::new();
		let source = vertex_from_byte(1);
		let dest = vertex_from_byte(2);
		graph.add_node_with_onion_support(source);
		graph.add_node_with_onion_support(dest);
		graph.add_edge(source, dest);

		let path = find_path(&graph, &source, &dest, 20, &TestLogger::new()).unwrap();
		assert_eq!(path.hops, vec![dest]);
	}

	#[test]
	fn multi_hop_chain() {
		let mut graph = TestGraph::new();
		let nodes: Vec<Vertex> = (1..=4).map(vertex_from_byte).collect();
		for node in nodes.iter() {
			graph.add_node_with_onion_support(*node);
		}
		graph.add_edge(nodes[0], nodes[1]);
		graph.add_edge(nodes[1], nodes[2]);
		graph.add_edge(nodes[2], nodes[3]);

		let path = find_path(&graph, &nodes[0], &nodes[3], 20, &TestLogger::new()).unwrap();
		assert_eq!(path.hops, vec![nodes[1], nodes[2], nodes[3]]);
	}

	#[test]
	fn unsupported_node_is_routed_around() {
		// Two equal-length routes; the one through a node without the feature
		// bit must lose to the supported one.
		let mut graph = TestGraph::new();
		let source = vertex_from_byte(1);
		let no_onion = vertex_from_byte(2);
		let with_onion = vertex_from_byte(3);
		let dest = vertex_from_byte(4);
		graph.add_node_with_onion_support(source);
		graph.add_node_without_onion_support(no_onion);
		graph.add_node_with_onion_support(with_onion);
		graph.add_node_with_onion_support(dest);
		graph.add_edge(source, no_onion);
		graph.add_edge(no_onion, dest);
		graph.add_edge(source, with_onion);
		graph.add_edge(with_onion, dest);

		let path = find_path(&graph, &source, &dest, 20, &TestLogger::new()).unwrap();
		assert_eq!(path.hops, vec![with_onion, dest]);
	}

	#[test]
	fn longer_supported_path_beats_shorter_unsupported_one() {
		let mut graph = TestGraph::new();
		let source = vertex_from_byte(1);
		let no_onion = vertex_from_byte(2);
		let a = vertex_from_byte(3);
		let b = vertex_from_byte(4);
		let dest = vertex_from_byte(5);
		graph.add_node_with_onion_support(source);
		graph.add_node_without_onion_support(no_onion);
		graph.add_node_with_onion_support(a);
		graph.add_node_with_onion_support(b);
		graph.add_node_with_onion_support(dest);
		// Two hops through the unsupported node, three through supported ones.
		graph.add_edge(source, no_onion);
		graph.add_edge(no_onion, dest);
		graph.add_edge(source, a);
		graph.add_edge(a, b);
		graph.add_edge(b, dest);

		let path = find_path(&graph, &source, &dest, 20, &TestLogger::new()).unwrap();
		assert_eq!(path.hops, vec![a, b, dest]);
	}

	#[test]
	fn disconnected_graph_has_no_path() {
		let mut graph = TestGraph::new();
		let source = vertex_from_byte(1);
		let dest = vertex_from_byte(2);
		graph.add_node_with_onion_support(source);
		graph.add_node_with_onion_support(dest);

		let err = find_path(&graph, &source, &dest, 20, &TestLogger::new()).unwrap_err();
		assert_eq!(err, SendError::NoPathFound);
	}

	#[test]
	fn destination_not_in_graph() {
		let mut graph = TestGraph::new();
		let source = vertex_from_byte(1);
		let dest = vertex_from_byte(2);
		graph.add_node_with_onion_support(source);

		let err = find_path(&graph, &source, &dest, 20, &TestLogger::new()).unwrap_err();
		assert_eq!(err, SendError::DestinationUnknown);
	}

	#[test]
	fn destination_without_onion_support_is_rejected_up_front() {
		// Even a directly connected destination is rejected when it lacks the
		// feature bit.
		let mut graph = TestGraph::new();
		let source = vertex_from_byte(1);
		let dest = vertex_from_byte(2);
		graph.add_node_with_onion_support(source);
		graph.add_node_without_onion_support(dest);
		graph.add_edge(source, dest);

		let err = find_path(&graph, &source, &dest, 20, &TestLogger::new()).unwrap_err();
		assert_eq!(err, SendError::DestinationNoOnionSupport);
	}

	#[test]
	fn hop_cap_is_inclusive() {
		let mut graph = TestGraph::new();
		let nodes: Vec<Vertex> = (1..=4).map(vertex_from_byte).collect();
		for node in nodes.iter() {
			graph.add_node_with_onion_support(*node);
		}
		graph.add_edge(nodes[0], nodes[1]);
		graph.add_edge(nodes[1], nodes[2]);
		graph.add_edge(nodes[2], nodes[3]);

		// The path needs three hops; a cap of two must fail...
		let err =
			find_path(&graph, &nodes[0], &nodes[3], 2, &TestLogger::new()).unwrap_err();
		assert_eq!(err, SendError::NoPathFound);

		// ...and a cap of exactly three must succeed.
		let path = find_path(&graph, &nodes[0], &nodes[3], 3, &TestLogger::new()).unwrap();
		assert_eq!(path.hops.len(), 3);
	}

	#[test]
	fn zero_hop_cap_finds_nothing() {
		let mut graph = TestGraph::new();
		let source = vertex_from_byte(1);
		let dest = vertex_from_byte(2);
		graph.add_node_with_onion_support(source);
		graph.add_node_with_onion_support(dest);
		graph.add_edge(source, dest);

		let err = find_path(&graph, &source, &dest, 0, &TestLogger::new()).unwrap_err();
		assert_eq!(err, SendError::NoPathFound);
	}

	#[test]
	fn cycles_terminate() {
		let mut graph = TestGraph::new();
		let source = vertex_from_byte(1);
		let a = vertex_from_byte(2);
		let b = vertex_from_byte(3);
		let c = vertex_from_byte(4);
		let dest = vertex_from_byte(5);
		for node in [source, a, b, c, dest] {
			graph.add_node_with_onion_support(node);
		}
		// A cycle a -> b -> c -> a, with the destination hanging off b.
		graph.add_edge(source, a);
		graph.add_edge(a, b);
		graph.add_edge(b, c);
		graph.add_edge(c, a);
		graph.add_edge(b, dest);

		let path = find_path(&graph, &source, &dest, 20, &TestLogger::new()).unwrap();
		assert_eq!(path.hops, vec![a, b, dest]);
	}

	#[test]
	fn shortest_path_wins() {
		let mut graph = TestGraph::new();
		let nodes: Vec<Vertex> = (1..=5).map(vertex_from_byte).collect();
		for node in nodes.iter() {
			graph.add_node_with_onion_support(*node);
		}
		// Long route 1-2-3-4-5 plus the single-hop 1-5.
		graph.add_edge(nodes[0], nodes[1]);
		graph.add_edge(nodes[1], nodes[2]);
		graph.add_edge(nodes[2], nodes[3]);
		graph.add_edge(nodes[3], nodes[4]);
		graph.add_edge(nodes[0], nodes[4]);

		let path = find_path(&graph, &nodes[0], &nodes[4], 20, &TestLogger::new()).unwrap();
		assert_eq!(path.hops, vec![nodes[4]]);
	}

	#[test]
	fn source_equals_destination_yields_empty_path() {
		let mut graph = TestGraph::new();
		let node = vertex_from_byte(1);
		graph.add_node_with_onion_support(node);

		let path = find_path(&graph, &node, &node, 20, &TestLogger::new()).unwrap();
		assert!(path.hops.is_empty());

		let path = find_path(&graph, &node, &node, 0, &TestLogger::new()).unwrap();
		assert!(path.hops.is_empty());
	}

	#[test]
	fn parallel_channels_are_idempotent() {
		// Duplicate edges between the same pair must not distort the result.
		let mut graph = TestGraph::new();
		let source = vertex_from_byte(1);
		let dest = vertex_from_byte(2);
		graph.add_node_with_onion_support(source);
		graph.add_node_with_onion_support(dest);
		graph.add_edge(source, dest);
		graph.add_edge(source, dest);

		let path = find_path(&graph, &source, &dest, 20, &TestLogger::new()).unwrap();
		assert_eq!(path.hops, vec![dest]);
	}

	#[test]
	fn backend_failure_surfaces() {
		let mut graph = TestGraph::new();
		let source = vertex_from_byte(1);
		let mid = vertex_from_byte(2);
		let dest = vertex_from_byte(3);
		graph.add_node_with_onion_support(source);
		graph.add_node_with_onion_support(mid);
		graph.add_node_with_onion_support(dest);
		graph.add_edge(source, mid);
		graph.add_edge(mid, dest);
		graph.fail_channels_of(source);

		let err = find_path(&graph, &source, &dest, 20, &TestLogger::new()).unwrap_err();
		assert!(matches!(err, SendError::Graph(GraphError::Backend(_))));
	}

	#[test]
	fn cancelled_context_stops_the_search() {
		let mut graph = TestGraph::new();
		let source = vertex_from_byte(1);
		let dest = vertex_from_byte(2);
		graph.add_node_with_onion_support(source);
		graph.add_node_with_onion_support(dest);
		graph.add_edge(source, dest);

		let ctx = SendContext::new();
		ctx.cancel();
		let err = find_path_in_context(&graph, &source, &dest, 20, &ctx, &TestLogger::new())
			.unwrap_err();
		assert_eq!(err, SendError::Cancelled);
	}

	#[test]
	fn feature_fetches_are_cached_per_search() {
		// An unsupported node is never marked visited, so every frontier node
		// adjacent to it re-examines it; the cache must hold feature fetches
		// to one per distinct vertex regardless.
		let mut graph = TestGraph::new();
		let source = vertex_from_byte(1);
		let a = vertex_from_byte(2);
		let b = vertex_from_byte(3);
		let unsupported = vertex_from_byte(4);
		let dest = vertex_from_byte(5);
		graph.add_node_with_onion_support(source);
		graph.add_node_with_onion_support(a);
		graph.add_node_with_onion_support(b);
		graph.add_node_without_onion_support(unsupported);
		graph.add_node_with_onion_support(dest);
		graph.add_edge(source, a);
		graph.add_edge(source, b);
		graph.add_edge(a, unsupported);
		graph.add_edge(b, unsupported);

		let err = find_path(&graph, &source, &dest, 20, &TestLogger::new()).unwrap_err();
		assert_eq!(err, SendError::NoPathFound);
		// One fetch for the destination precondition, one each for a and b,
		// and exactly one for the unsupported node despite two sightings.
		assert_eq!(graph.feature_fetches(), 4);
	}
}
