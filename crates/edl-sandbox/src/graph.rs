//! Visual-script graphs: nodes, pin links, and compile status.

use edl_protocol::EditorError;
use serde::Serialize;
use serde_json::{Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompileStatus {
    /// Edited since the last compile.
    Dirty,
    Compiling,
    UpToDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    pub node_type: String,
    pub pos_x: f64,
    pub pos_y: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PinLink {
    pub from_node: String,
    pub from_pin: String,
    pub to_node: String,
    pub to_pin: String,
}

#[derive(Debug, Clone)]
pub struct Graph {
    pub name: String,
    nodes: Vec<GraphNode>,
    links: Vec<PinLink>,
    status: CompileStatus,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            links: Vec::new(),
            status: CompileStatus::Dirty,
        }
    }

    pub fn status(&self) -> CompileStatus {
        self.status
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn links(&self) -> &[PinLink] {
        &self.links
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Graphs cannot be edited while a compile is running.
    pub fn ensure_editable(&self) -> Result<(), EditorError> {
        if self.status == CompileStatus::Compiling {
            return Err(EditorError::conflict(format!(
                "graph '{}' is compiling",
                self.name
            )));
        }
        Ok(())
    }

    pub fn add_node(&mut self, node: GraphNode) -> Result<(), EditorError> {
        self.ensure_editable()?;
        self.nodes.push(node);
        self.status = CompileStatus::Dirty;
        Ok(())
    }

    /// Remove a node and every link touching it. Returns the number of links removed.
    pub fn remove_node(&mut self, id: &str) -> Result<usize, EditorError> {
        self.ensure_editable()?;
        let index = self
            .nodes
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| self.missing_node(id))?;
        self.nodes.remove(index);

        let before = self.links.len();
        self.links.retain(|l| l.from_node != id && l.to_node != id);
        self.status = CompileStatus::Dirty;
        Ok(before - self.links.len())
    }

    pub fn connect(&mut self, link: PinLink) -> Result<(), EditorError> {
        self.ensure_editable()?;
        for id in [&link.from_node, &link.to_node] {
            if self.node(id).is_none() {
                return Err(self.missing_node(id));
            }
        }
        if link.from_node == link.to_node {
            return Err(EditorError::validation("cannot link a node to itself"));
        }
        if self.links.contains(&link) {
            return Err(EditorError::conflict(format!(
                "{}.{} is already linked to {}.{}",
                link.from_node, link.from_pin, link.to_node, link.to_pin
            )));
        }
        self.links.push(link);
        self.status = CompileStatus::Dirty;
        Ok(())
    }

    pub fn begin_compile(&mut self) -> Result<(), EditorError> {
        self.ensure_editable()?;
        self.status = CompileStatus::Compiling;
        Ok(())
    }

    pub fn finish_compile(&mut self) {
        self.status = CompileStatus::UpToDate;
    }

    /// Abandoned compile: the graph keeps its edits but is not up to date.
    pub fn cancel_compile(&mut self) {
        if self.status == CompileStatus::Compiling {
            self.status = CompileStatus::Dirty;
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "graph": self.name,
            "status": self.status,
            "nodes": self.nodes,
            "links": self.links,
        })
    }

    fn missing_node(&self, id: &str) -> EditorError {
        EditorError::not_found(format!("node '{id}' not found in graph '{}'", self.name))
    }
}
