//! The sandbox editor model and its command handlers.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use edl_protocol::{
    ContinuationToken, EditorError, EditorOperations, HandlerResult, OperationOutcome,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::catalog::SandboxCommands;
use crate::gameplay::{EffectSpec, GameplayEffect, ModifierSpec, TagTable, effect_path};
use crate::graph::{Graph, GraphNode, PinLink};
use crate::widget::WidgetTree;

/// Polls a compile takes before it resolves.
const DEFAULT_COMPILE_TICKS: u32 = 3;
const DEFAULT_ROOT_WIDGET: &str = "CanvasPanel";

#[derive(Debug)]
enum Continuation {
    Compile { graph: String, remaining: u32 },
    Save { path: String, remaining: u32 },
}

/// In-memory editor model. Lives on the editor thread.
#[derive(Debug)]
pub struct SandboxEditor {
    graphs: BTreeMap<String, Graph>,
    widgets: BTreeMap<String, WidgetTree>,
    tags: TagTable,
    effects: BTreeMap<String, GameplayEffect>,
    saved: BTreeMap<String, DateTime<Utc>>,
    continuations: HashMap<String, Continuation>,
    /// Commands executed, in order.
    history: Vec<String>,
    next_node_id: u64,
    next_token: u64,
    compile_ticks: u32,
}

impl Default for SandboxEditor {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxEditor {
    pub fn new() -> Self {
        Self {
            graphs: BTreeMap::new(),
            widgets: BTreeMap::new(),
            tags: TagTable::new(),
            effects: BTreeMap::new(),
            saved: BTreeMap::new(),
            continuations: HashMap::new(),
            history: Vec::new(),
            next_node_id: 1,
            next_token: 1,
            compile_ticks: DEFAULT_COMPILE_TICKS,
        }
    }

    /// Number of polls a `compileGraph` continuation needs (at least one).
    pub fn with_compile_ticks(mut self, ticks: u32) -> Self {
        self.compile_ticks = ticks.max(1);
        self
    }

    /// Start node numbering at `id`.
    pub fn with_next_node_id(mut self, id: u64) -> Self {
        self.next_node_id = id;
        self
    }

    /// Seed an empty graph.
    pub fn with_graph(mut self, name: &str) -> Self {
        self.graphs.insert(name.to_string(), Graph::new(name));
        self
    }

    /// Seed a registered gameplay tag. Invalid or duplicate tags are ignored.
    pub fn with_tag(mut self, tag: &str) -> Self {
        let _ = self.tags.add(tag, None);
        self
    }

    pub fn graph(&self, name: &str) -> Option<&Graph> {
        self.graphs.get(name)
    }

    pub fn widget_tree(&self, name: &str) -> Option<&WidgetTree> {
        self.widgets.get(name)
    }

    pub fn effect(&self, path: &str) -> Option<&GameplayEffect> {
        self.effects.get(path)
    }

    pub fn tags(&self) -> &TagTable {
        &self.tags
    }

    pub fn is_saved(&self, path: &str) -> bool {
        self.saved.contains_key(path)
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn pending_continuations(&self) -> usize {
        self.continuations.len()
    }

    // ── Dispatch ────────────────────────────────────────────────────────────

    fn execute(&mut self, command: &str, params: &Value) -> HandlerResult {
        match command {
            SandboxCommands::CREATE_GRAPH => self.create_graph(parse_params(params)?),
            SandboxCommands::CREATE_GRAPH_NODE => self.create_graph_node(parse_params(params)?),
            SandboxCommands::REMOVE_GRAPH_NODE => self.remove_graph_node(parse_params(params)?),
            SandboxCommands::CONNECT_PINS => self.connect_pins(parse_params(params)?),
            SandboxCommands::GET_GRAPH => {
                let p: GraphParams = parse_params(params)?;
                Ok(self.graph_ref(&p.graph)?.to_json())
            }
            SandboxCommands::CREATE_WIDGET_TREE => self.create_widget_tree(parse_params(params)?),
            SandboxCommands::ADD_WIDGET => self.add_widget(parse_params(params)?),
            SandboxCommands::GET_WIDGET_TREE => {
                let p: TreeParams = parse_params(params)?;
                self.widgets
                    .get(&p.tree)
                    .map(WidgetTree::to_json)
                    .ok_or_else(|| tree_not_found(&p.tree))
            }
            SandboxCommands::ADD_GAMEPLAY_TAG => {
                let p: AddTagParams = parse_params(params)?;
                self.tags.add(&p.tag, p.comment)?;
                info!("Registered gameplay tag {}", p.tag);
                Ok(json!({ "tag": p.tag, "tagCount": self.tags.len() }))
            }
            SandboxCommands::LIST_GAMEPLAY_TAGS => {
                let p: ListTagsParams = parse_params(params)?;
                Ok(json!({ "tags": self.tags.list(p.prefix.as_deref()) }))
            }
            SandboxCommands::CREATE_GAMEPLAY_EFFECT => self.create_gameplay_effect(parse_params(params)?),
            SandboxCommands::GET_GAMEPLAY_EFFECT => {
                let p: PathParams = parse_params(params)?;
                let effect = self.effects.get(&p.path).ok_or_else(|| {
                    EditorError::not_found(format!("gameplay effect '{}' not found", p.path))
                })?;
                serde_json::to_value(effect).map_err(|e| EditorError::internal(e.to_string()))
            }
            _ => Err(EditorError::unknown_command(command)),
        }
    }

    fn next_token(&mut self, prefix: &str) -> ContinuationToken {
        let token = ContinuationToken::new(format!("{prefix}-{}", self.next_token));
        self.next_token += 1;
        token
    }

    fn graph_ref(&self, name: &str) -> Result<&Graph, EditorError> {
        self.graphs.get(name).ok_or_else(|| graph_not_found(name))
    }

    fn graph_mut(&mut self, name: &str) -> Result<&mut Graph, EditorError> {
        self.graphs.get_mut(name).ok_or_else(|| graph_not_found(name))
    }

    // ── Graphs ──────────────────────────────────────────────────────────────

    fn create_graph(&mut self, p: GraphParams) -> HandlerResult {
        if self.graphs.contains_key(&p.graph) {
            return Err(EditorError::conflict(format!("graph '{}' already exists", p.graph)));
        }
        self.graphs.insert(p.graph.clone(), Graph::new(&p.graph));
        info!("Created graph {}", p.graph);
        Ok(json!({ "graph": p.graph }))
    }

    fn create_graph_node(&mut self, p: CreateNodeParams) -> HandlerResult {
        let id = format!("N{}", self.next_node_id);
        let graph = self.graph_mut(&p.graph)?;
        graph.add_node(GraphNode {
            id: id.clone(),
            node_type: p.node_type,
            pos_x: p.pos_x.unwrap_or_default(),
            pos_y: p.pos_y.unwrap_or_default(),
        })?;
        self.next_node_id += 1;
        debug!("Added {id} to graph {}", p.graph);
        Ok(json!({ "nodeId": id }))
    }

    fn remove_graph_node(&mut self, p: RemoveNodeParams) -> HandlerResult {
        let removed_links = self.graph_mut(&p.graph)?.remove_node(&p.node_id)?;
        Ok(json!({ "removed": p.node_id, "removedLinks": removed_links }))
    }

    fn connect_pins(&mut self, p: ConnectParams) -> HandlerResult {
        let graph = self.graph_mut(&p.graph)?;
        graph.connect(PinLink {
            from_node: p.from_node,
            from_pin: p.from_pin,
            to_node: p.to_node,
            to_pin: p.to_pin,
        })?;
        Ok(json!({ "linkCount": graph.links().len() }))
    }

    fn compile_graph(&mut self, params: &Value) -> Result<ContinuationToken, EditorError> {
        let p: GraphParams = parse_params(params)?;
        self.graph_mut(&p.graph)?.begin_compile()?;
        let token = self.next_token("compile");
        debug!("Compiling graph {} as {token}", p.graph);
        self.continuations.insert(
            token.as_str().to_string(),
            Continuation::Compile {
                graph: p.graph,
                remaining: self.compile_ticks,
            },
        );
        Ok(token)
    }

    // ── Widgets ─────────────────────────────────────────────────────────────

    fn create_widget_tree(&mut self, p: CreateTreeParams) -> HandlerResult {
        if self.widgets.contains_key(&p.tree) {
            return Err(EditorError::conflict(format!(
                "widget blueprint '{}' already exists",
                p.tree
            )));
        }
        let root_type = p.root_type.unwrap_or_else(|| DEFAULT_ROOT_WIDGET.to_string());
        let tree = WidgetTree::new(&p.tree, root_type);
        let result = json!({ "tree": p.tree, "root": tree.root() });
        self.widgets.insert(p.tree, tree);
        Ok(result)
    }

    fn add_widget(&mut self, p: AddWidgetParams) -> HandlerResult {
        let tree = self
            .widgets
            .get_mut(&p.tree)
            .ok_or_else(|| tree_not_found(&p.tree))?;
        let widget = tree.add(&p.name, &p.widget_type, p.parent.as_deref())?;
        Ok(json!({ "name": widget.name, "parent": widget.parent }))
    }

    // ── Gameplay effects ────────────────────────────────────────────────────

    fn create_gameplay_effect(&mut self, p: CreateEffectParams) -> HandlerResult {
        let path = effect_path(&p.package_path, &p.name)?;
        let existed = self.effects.contains_key(&path);
        if existed && !p.overwrite {
            return Err(EditorError::conflict(format!(
                "gameplay effect '{path}' already exists; pass overwrite=true to replace it"
            )));
        }
        let spec = EffectSpec {
            duration_policy: p.duration_policy,
            duration_seconds: p.duration_seconds,
            modifiers: p.modifiers,
            granted_tags: p.granted_tags,
        };
        let effect = spec.build(path.clone(), &self.tags)?;
        let body = serde_json::to_value(&effect).map_err(|e| EditorError::internal(e.to_string()))?;
        self.effects.insert(path.clone(), effect);
        info!("{} gameplay effect {path}", if existed { "Overwrote" } else { "Created" });
        Ok(json!({ "path": path, "created": !existed, "effect": body }))
    }

    // ── Saving ──────────────────────────────────────────────────────────────

    fn save_asset(&mut self, params: &Value) -> Result<ContinuationToken, EditorError> {
        let p: PathParams = parse_params(params)?;
        if let Some(graph) = self.graphs.get(&p.path) {
            graph.ensure_editable()?;
        } else if !self.widgets.contains_key(&p.path) && !self.effects.contains_key(&p.path) {
            return Err(EditorError::not_found(format!("asset '{}' not found", p.path)));
        }
        let token = self.next_token("save");
        self.continuations.insert(
            token.as_str().to_string(),
            Continuation::Save {
                path: p.path,
                remaining: 1,
            },
        );
        Ok(token)
    }
}

impl EditorOperations for SandboxEditor {
    fn execute_operation(&mut self, command: &str, params: &Value) -> OperationOutcome {
        self.history.push(command.to_string());
        let started = match command {
            SandboxCommands::COMPILE_GRAPH => self.compile_graph(params),
            SandboxCommands::SAVE_ASSET => self.save_asset(params),
            _ => return self.execute(command, params).into(),
        };
        match started {
            Ok(token) => OperationOutcome::Continuation(token),
            Err(e) => OperationOutcome::Failed(e),
        }
    }

    fn poll_continuation(&mut self, token: &ContinuationToken) -> OperationOutcome {
        let Some(continuation) = self.continuations.get_mut(token.as_str()) else {
            return OperationOutcome::Failed(EditorError::not_found(format!(
                "unknown continuation '{token}'"
            )));
        };

        match continuation {
            Continuation::Compile { remaining, .. } | Continuation::Save { remaining, .. }
                if *remaining > 1 =>
            {
                *remaining -= 1;
                return OperationOutcome::Continuation(token.clone());
            }
            _ => {}
        }

        match self.continuations.remove(token.as_str()) {
            Some(Continuation::Compile { graph, .. }) => match self.graphs.get_mut(&graph) {
                Some(g) => {
                    g.finish_compile();
                    info!("Compiled graph {graph}");
                    OperationOutcome::Resolved(json!({
                        "graph": graph,
                        "status": g.status(),
                        "nodeCount": g.nodes().len(),
                    }))
                }
                None => OperationOutcome::Failed(graph_not_found(&graph)),
            },
            Some(Continuation::Save { path, .. }) => {
                let saved_at = Utc::now();
                self.saved.insert(path.clone(), saved_at);
                info!("Saved {path}");
                OperationOutcome::Resolved(json!({
                    "saved": true,
                    "path": path,
                    "savedAt": saved_at.to_rfc3339(),
                }))
            }
            None => OperationOutcome::Failed(EditorError::internal("continuation vanished")),
        }
    }

    fn release_continuation(&mut self, token: &ContinuationToken) {
        if let Some(Continuation::Compile { graph, .. }) = self.continuations.remove(token.as_str()) {
            if let Some(g) = self.graphs.get_mut(&graph) {
                g.cancel_compile();
            }
            debug!("Released compile of {graph}");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parameter types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct GraphParams {
    graph: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateNodeParams {
    graph: String,
    node_type: String,
    #[serde(default)]
    pos_x: Option<f64>,
    #[serde(default)]
    pos_y: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoveNodeParams {
    graph: String,
    node_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectParams {
    graph: String,
    from_node: String,
    from_pin: String,
    to_node: String,
    to_pin: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTreeParams {
    tree: String,
    #[serde(default)]
    root_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddWidgetParams {
    tree: String,
    name: String,
    widget_type: String,
    #[serde(default)]
    parent: Option<String>,
}

#[derive(Deserialize)]
struct TreeParams {
    tree: String,
}

#[derive(Deserialize)]
struct AddTagParams {
    tag: String,
    #[serde(default)]
    comment: Option<String>,
}

#[derive(Deserialize, Default)]
struct ListTagsParams {
    #[serde(default)]
    prefix: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateEffectParams {
    package_path: String,
    name: String,
    #[serde(default)]
    duration_policy: Option<String>,
    #[serde(default)]
    duration_seconds: Option<f64>,
    #[serde(default)]
    modifiers: Vec<ModifierSpec>,
    #[serde(default)]
    granted_tags: Vec<String>,
    #[serde(default)]
    overwrite: bool,
}

#[derive(Deserialize)]
struct PathParams {
    path: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn parse_params<T: DeserializeOwned>(params: &Value) -> Result<T, EditorError> {
    serde_json::from_value(params.clone())
        .map_err(|e| EditorError::validation(format!("invalid parameters: {e}")))
}

fn graph_not_found(name: &str) -> EditorError {
    EditorError::not_found(format!("graph '{name}' not found"))
}

fn tree_not_found(name: &str) -> EditorError {
    EditorError::not_found(format!("widget blueprint '{name}' not found"))
}
