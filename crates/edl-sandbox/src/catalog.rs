//! Command catalog — descriptors for every command the sandbox answers.

use edl_protocol::{CommandDescriptor, ParamField, ParamKind, ScopeRule};

/// Sandbox command names.
pub struct SandboxCommands;

impl SandboxCommands {
    pub const CREATE_GRAPH: &str = "createGraph";
    pub const CREATE_GRAPH_NODE: &str = "createGraphNode";
    pub const REMOVE_GRAPH_NODE: &str = "removeGraphNode";
    pub const CONNECT_PINS: &str = "connectPins";
    pub const GET_GRAPH: &str = "getGraph";
    pub const COMPILE_GRAPH: &str = "compileGraph";

    pub const CREATE_WIDGET_TREE: &str = "createWidgetTree";
    pub const ADD_WIDGET: &str = "addWidget";
    pub const GET_WIDGET_TREE: &str = "getWidgetTree";

    pub const ADD_GAMEPLAY_TAG: &str = "addGameplayTag";
    pub const LIST_GAMEPLAY_TAGS: &str = "listGameplayTags";
    pub const CREATE_GAMEPLAY_EFFECT: &str = "createGameplayEffect";
    pub const GET_GAMEPLAY_EFFECT: &str = "getGameplayEffect";

    pub const SAVE_ASSET: &str = "saveAsset";
}

/// Scope key shared by every gameplay-tag command.
pub const TAGS_SCOPE: &str = "tags:";
/// Scope key shared by every gameplay-effect command.
pub const EFFECTS_SCOPE: &str = "effects:";

fn graph_param() -> ParamField {
    ParamField::required("graph", ParamKind::String, "Graph asset name")
}

fn tree_param() -> ParamField {
    ParamField::required("tree", ParamKind::String, "Widget blueprint name")
}

/// Every sandbox command, ready to register.
pub fn descriptors() -> Vec<CommandDescriptor> {
    let graph_scope = || ScopeRule::asset("graph", "graph");
    let widget_scope = || ScopeRule::asset("widget", "tree");

    vec![
        // ── Graphs ──
        CommandDescriptor::mutation(SandboxCommands::CREATE_GRAPH, "Create an empty visual-script graph")
            .param(graph_param())
            .scope(graph_scope()),
        CommandDescriptor::mutation(SandboxCommands::CREATE_GRAPH_NODE, "Add a node to a graph")
            .param(graph_param())
            .param(ParamField::required("nodeType", ParamKind::String, "Node class, e.g. Branch"))
            .param(ParamField::optional("posX", ParamKind::Number, "Editor X position"))
            .param(ParamField::optional("posY", ParamKind::Number, "Editor Y position"))
            .scope(graph_scope()),
        CommandDescriptor::mutation(SandboxCommands::REMOVE_GRAPH_NODE, "Remove a node and its links")
            .param(graph_param())
            .param(ParamField::required("nodeId", ParamKind::String, "Node id"))
            .scope(graph_scope()),
        CommandDescriptor::mutation(SandboxCommands::CONNECT_PINS, "Link an output pin to an input pin")
            .param(graph_param())
            .param(ParamField::required("fromNode", ParamKind::String, "Source node id"))
            .param(ParamField::required("fromPin", ParamKind::String, "Source pin name"))
            .param(ParamField::required("toNode", ParamKind::String, "Target node id"))
            .param(ParamField::required("toPin", ParamKind::String, "Target pin name"))
            .scope(graph_scope()),
        CommandDescriptor::query(SandboxCommands::GET_GRAPH, "Read a graph's nodes, links and compile status")
            .param(graph_param())
            .scope(graph_scope()),
        CommandDescriptor::mutation(SandboxCommands::COMPILE_GRAPH, "Compile a graph (spans several ticks)")
            .param(graph_param())
            .scope(graph_scope()),
        // ── Widgets ──
        CommandDescriptor::mutation(SandboxCommands::CREATE_WIDGET_TREE, "Create a widget blueprint")
            .param(tree_param())
            .param(ParamField::optional("rootType", ParamKind::String, "Root panel type (CanvasPanel)"))
            .scope(widget_scope()),
        CommandDescriptor::mutation(SandboxCommands::ADD_WIDGET, "Add a widget to a widget blueprint")
            .param(tree_param())
            .param(ParamField::required("name", ParamKind::String, "Widget name, unique per tree"))
            .param(ParamField::required("widgetType", ParamKind::String, "Widget class, e.g. Button"))
            .param(ParamField::optional("parent", ParamKind::String, "Parent widget (root when omitted)"))
            .scope(widget_scope()),
        CommandDescriptor::query(SandboxCommands::GET_WIDGET_TREE, "Read a widget blueprint as a nested tree")
            .param(tree_param())
            .scope(widget_scope()),
        // ── Gameplay ──
        CommandDescriptor::mutation(SandboxCommands::ADD_GAMEPLAY_TAG, "Register a gameplay tag")
            .param(ParamField::required("tag", ParamKind::String, "Dotted tag, e.g. State.Stunned"))
            .param(ParamField::optional("comment", ParamKind::String, "Developer comment"))
            .scope(ScopeRule::Fixed(TAGS_SCOPE.into())),
        CommandDescriptor::query(SandboxCommands::LIST_GAMEPLAY_TAGS, "List registered gameplay tags")
            .param(ParamField::optional("prefix", ParamKind::String, "Only tags starting with this"))
            .scope(ScopeRule::Fixed(TAGS_SCOPE.into())),
        CommandDescriptor::mutation(SandboxCommands::CREATE_GAMEPLAY_EFFECT, "Create or overwrite a gameplay effect")
            .param(ParamField::required("packagePath", ParamKind::String, "Package path, e.g. /Game/Effects"))
            .param(ParamField::required("name", ParamKind::String, "Asset name"))
            .param(ParamField::optional(
                "durationPolicy",
                ParamKind::String,
                "Instant, Infinite or HasDuration",
            ))
            .param(ParamField::optional("durationSeconds", ParamKind::Number, "Required for HasDuration"))
            .param(ParamField::optional("modifiers", ParamKind::Array, "Attribute modifiers"))
            .param(ParamField::optional("grantedTags", ParamKind::Array, "Registered tags granted to the target"))
            .param(ParamField::optional("overwrite", ParamKind::Boolean, "Replace an existing effect"))
            .scope(ScopeRule::Fixed(EFFECTS_SCOPE.into())),
        CommandDescriptor::query(SandboxCommands::GET_GAMEPLAY_EFFECT, "Read a gameplay effect definition")
            .param(ParamField::required("path", ParamKind::String, "Effect object path"))
            .scope(ScopeRule::Fixed(EFFECTS_SCOPE.into())),
        // ── Assets ──
        CommandDescriptor::mutation(SandboxCommands::SAVE_ASSET, "Save an asset to disk (completes next tick)")
            .param(ParamField::required("path", ParamKind::String, "Graph, widget blueprint or effect path"))
            .scope(ScopeRule::AnyOf(vec![
                ScopeRule::asset("graph", "path"),
                ScopeRule::asset("widget", "path"),
                ScopeRule::Fixed(EFFECTS_SCOPE.into()),
            ])),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn names_are_unique() {
        let all = descriptors();
        let names: HashSet<&str> = all.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names.len(), all.len());
    }

    #[test]
    fn save_shares_scope_with_the_asset_it_names() {
        use serde_json::json;
        let all = descriptors();
        let scope_of = |name: &str, params: serde_json::Value| {
            let d = all.iter().find(|d| d.name == name).unwrap();
            d.scope.resolve(&params)
        };
        let save = scope_of(SandboxCommands::SAVE_ASSET, json!({"path": "G1"}));
        assert!(save.overlaps(&scope_of(SandboxCommands::COMPILE_GRAPH, json!({"graph": "G1"}))));
        assert!(save.overlaps(&scope_of(SandboxCommands::ADD_WIDGET, json!({"tree": "G1"}))));
        assert!(save.overlaps(&scope_of(SandboxCommands::GET_GAMEPLAY_EFFECT, json!({"path": "/Game/GE"}))));
        assert!(!save.overlaps(&scope_of(SandboxCommands::GET_GRAPH, json!({"graph": "G2"}))));
    }

    #[test]
    fn reads_are_not_mutating() {
        for d in descriptors() {
            let is_read = d.name.starts_with("get") || d.name.starts_with("list");
            assert_eq!(d.mutating, !is_read, "{}", d.name);
        }
    }
}
