// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Read-only access to the channel graph, abstracted so that pathfinding is
//! independent of how the graph is stored.

use core::fmt;
use core::ops::ControlFlow;

use crate::features::NodeFeatures;
use crate::types::Vertex;

/// A channel direction revealed while walking a node's neighbors. Pathfinding
/// only reads the counterparty; everything else about the channel stays in
/// the graph store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirectedChannel {
	/// The node on the other end of the channel.
	pub other_node: Vertex,
}

/// Errors surfaced by a graph backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GraphError {
	/// The requested node is not present in the graph.
	NodeNotFound,
	/// The backend failed to serve the request.
	Backend(String),
}

impl fmt::Display for GraphError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			GraphError::NodeNotFound => write!(f, "node not found in graph"),
			GraphError::Backend(e) => write!(f, "graph backend error: {}", e),
		}
	}
}

impl std::error::Error for GraphError {}

/// Read-only traversal over the channel graph.
///
/// Both operations may perform I/O and may block; implementations must be
/// safe to call concurrently for distinct lookups. A consistent point-in-time
/// view is not required — pathfinding tolerates slightly stale reads.
pub trait NodeTraverser {
	/// Invokes `visit` once per directed channel leaving `node`, in an
	/// implementation-defined but per-call-stable order.
	///
	/// The visitor may return [`ControlFlow::Break`] to stop iteration early;
	/// the implementation must propagate it as `Ok(ControlFlow::Break(()))`
	/// rather than treating it as a failure. Visitor errors abort iteration
	/// and are returned as-is.
	fn for_each_node_channel(
		&self, node: &Vertex,
		visit: &mut dyn FnMut(&DirectedChannel) -> Result<ControlFlow<()>, GraphError>,
	) -> Result<ControlFlow<()>, GraphError>;

	/// Returns the feature vector advertised by `node`, or an error if the
	/// node is unknown. A node absent from the graph is indistinguishable
	/// from one that advertises nothing.
	fn fetch_node_features(&self, node: &Vertex) -> Result<NodeFeatures, GraphError>;
}
