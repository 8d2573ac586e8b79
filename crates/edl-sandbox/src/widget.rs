//! Widget blueprints: a named tree of widgets under one root panel.

use edl_protocol::EditorError;
use serde_json::{Value, json};

/// Widget types that may hold children.
const PANEL_TYPES: &[&str] = &[
    "CanvasPanel",
    "VerticalBox",
    "HorizontalBox",
    "Overlay",
    "GridPanel",
    "ScrollBox",
    "SizeBox",
    "Border",
    "Button",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Widget {
    pub name: String,
    pub widget_type: String,
    pub parent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WidgetTree {
    pub name: String,
    /// Creation order; the root is always first.
    widgets: Vec<Widget>,
}

impl WidgetTree {
    pub fn new(name: impl Into<String>, root_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            widgets: vec![Widget {
                name: "Root".into(),
                widget_type: root_type.into(),
                parent: None,
            }],
        }
    }

    pub fn root(&self) -> &str {
        &self.widgets[0].name
    }

    pub fn len(&self) -> usize {
        self.widgets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.widgets.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Widget> {
        self.widgets.iter().find(|w| w.name == name)
    }

    /// Add a widget under `parent` (the root when `None`).
    pub fn add(
        &mut self,
        name: &str,
        widget_type: &str,
        parent: Option<&str>,
    ) -> Result<&Widget, EditorError> {
        if name.trim().is_empty() {
            return Err(EditorError::validation("widget name must not be empty"));
        }
        if self.get(name).is_some() {
            return Err(EditorError::conflict(format!(
                "widget '{name}' already exists in '{}'",
                self.name
            )));
        }
        let parent = parent.unwrap_or(self.root()).to_string();
        let parent_type = self
            .get(&parent)
            .map(|w| w.widget_type.as_str())
            .ok_or_else(|| {
                EditorError::not_found(format!("parent widget '{parent}' not found in '{}'", self.name))
            })?;
        if !PANEL_TYPES.contains(&parent_type) {
            return Err(EditorError::conflict(format!(
                "'{parent}' ({parent_type}) cannot hold child widgets"
            )));
        }

        self.widgets.push(Widget {
            name: name.to_string(),
            widget_type: widget_type.to_string(),
            parent: Some(parent),
        });
        Ok(&self.widgets[self.widgets.len() - 1])
    }

    /// Nested representation rooted at the root panel.
    pub fn to_json(&self) -> Value {
        json!({
            "tree": self.name,
            "widgetCount": self.widgets.len(),
            "root": self.subtree(&self.widgets[0]),
        })
    }

    fn subtree(&self, widget: &Widget) -> Value {
        let children: Vec<Value> = self
            .widgets
            .iter()
            .filter(|w| w.parent.as_deref() == Some(widget.name.as_str()))
            .map(|w| self.subtree(w))
            .collect();
        json!({
            "name": widget.name,
            "type": widget.widget_type,
            "children": children,
        })
    }
}
