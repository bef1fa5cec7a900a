pub mod capability;
pub mod node;
pub mod resource_graph;
pub mod walker;
