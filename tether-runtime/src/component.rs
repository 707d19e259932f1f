//! Component definitions
//!
//! A [`ComponentDef`] describes one component: its initial state, derived
//! (computed) values, watchers, callable methods, lifecycle hooks and render
//! function. Definitions are immutable; [`Component`](crate::Component)
//! instances are created from them.
//!
//! Reactivity is deliberately flat. Computed values are an ordered list
//! re-evaluated on every update, and watchers compare the old and new value of
//! one top-level state key. There is no dependency graph.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Component state: a flat JSON object
pub type State = Map<String, Value>;

pub type ComputedFn = Box<dyn Fn(&View<'_>) -> Value + Send + Sync>;
pub type WatchFn = Box<dyn Fn(&Value, &Value) + Send + Sync>;
pub type MethodFn =
    Box<dyn Fn(&mut MethodContext<'_>, &[Value]) -> anyhow::Result<Value> + Send + Sync>;
pub type RenderFn = Box<dyn Fn(&View<'_>) -> Vec<String> + Send + Sync>;
pub type HookFn = Box<dyn Fn(&View<'_>) + Send + Sync>;

/// Read-only view over `state ∪ computed`
///
/// State keys take precedence over computed names of the same key.
#[derive(Debug, Clone, Copy)]
pub struct View<'a> {
    state: &'a State,
    computed: &'a Map<String, Value>,
}

impl<'a> View<'a> {
    pub fn new(state: &'a State, computed: &'a Map<String, Value>) -> Self {
        Self { state, computed }
    }

    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.state.get(key).or_else(|| self.computed.get(key))
    }

    pub fn get_str(&self, key: &str) -> Option<&'a str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn state(&self) -> &'a State {
        self.state
    }

    pub fn computed(&self) -> &'a Map<String, Value> {
        self.computed
    }
}

/// What a method body sees of its owning instance
///
/// Reads go through staged updates first, then the instance view. Staged
/// updates are applied with `update_state` once the method returns
/// successfully.
pub struct MethodContext<'a> {
    id: &'a str,
    view: View<'a>,
    staged: State,
}

impl<'a> MethodContext<'a> {
    pub fn new(id: &'a str, view: View<'a>) -> Self {
        Self {
            id,
            view,
            staged: State::new(),
        }
    }

    /// Id of the instance the method runs on
    pub fn id(&self) -> &str {
        self.id
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.staged.get(key).or_else(|| self.view.get(key))
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn view(&self) -> View<'a> {
        self.view
    }

    /// Stage a single key
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.staged.insert(key.into(), value);
    }

    /// Stage a partial state update
    pub fn update_state(&mut self, partial: State) {
        self.staged.extend(partial);
    }

    pub fn staged(&self) -> &State {
        &self.staged
    }

    pub(crate) fn into_staged(self) -> State {
        self.staged
    }
}

#[derive(Default)]
pub(crate) struct Hooks {
    pub(crate) before_mount: Option<HookFn>,
    pub(crate) on_mounted: Option<HookFn>,
    pub(crate) on_updated: Option<HookFn>,
    pub(crate) on_before_destroy: Option<HookFn>,
    pub(crate) on_destroyed: Option<HookFn>,
}

/// Immutable description of a component
pub struct ComponentDef {
    pub(crate) id: String,
    pub(crate) state: State,
    pub(crate) computed: Vec<(String, ComputedFn)>,
    pub(crate) watchers: Vec<(String, WatchFn)>,
    pub(crate) methods: HashMap<String, MethodFn>,
    pub(crate) render: Option<RenderFn>,
    pub(crate) hooks: Hooks,
}

impl ComponentDef {
    pub fn builder(id: impl Into<String>) -> ComponentBuilder {
        ComponentBuilder {
            def: ComponentDef {
                id: id.into(),
                state: State::new(),
                computed: Vec::new(),
                watchers: Vec::new(),
                methods: HashMap::new(),
                render: None,
                hooks: Hooks::default(),
            },
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn initial_state(&self) -> &State {
        &self.state
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Method names in sorted order
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn is_watched(&self, key: &str) -> bool {
        self.watchers.iter().any(|(k, _)| k == key)
    }

    /// Evaluate every computed entry in declaration order
    ///
    /// Later entries can read the values of earlier ones.
    pub(crate) fn compute(&self, state: &State) -> Map<String, Value> {
        let mut computed = Map::new();
        for (name, derive) in &self.computed {
            let value = derive(&View::new(state, &computed));
            computed.insert(name.clone(), value);
        }
        computed
    }

    pub(crate) fn render_lines(&self, view: &View<'_>) -> Vec<String> {
        match &self.render {
            Some(render) => render(view),
            None => Vec::new(),
        }
    }
}

impl fmt::Debug for ComponentDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDef")
            .field("id", &self.id)
            .field("state", &self.state)
            .field(
                "computed",
                &self.computed.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            )
            .field(
                "watchers",
                &self.watchers.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            )
            .field("methods", &self.method_names())
            .field("has_render", &self.render.is_some())
            .finish()
    }
}

/// Builder for [`ComponentDef`]
pub struct ComponentBuilder {
    def: ComponentDef,
}

impl ComponentBuilder {
    /// Initial state; non-object values are ignored
    pub fn state(mut self, state: Value) -> Self {
        if let Value::Object(map) = state {
            self.def.state = map;
        }
        self
    }

    pub fn computed<F>(mut self, name: impl Into<String>, derive: F) -> Self
    where
        F: Fn(&View<'_>) -> Value + Send + Sync + 'static,
    {
        self.def.computed.push((name.into(), Box::new(derive)));
        self
    }

    /// Watch a top-level state key; called with `(new, old)`
    pub fn watch<F>(mut self, key: impl Into<String>, watcher: F) -> Self
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        self.def.watchers.push((key.into(), Box::new(watcher)));
        self
    }

    /// Register a callable method; a second registration under the same
    /// name replaces the first
    pub fn method<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&mut MethodContext<'_>, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.def.methods.insert(name.into(), Box::new(method));
        self
    }

    pub fn render<F>(mut self, render: F) -> Self
    where
        F: Fn(&View<'_>) -> Vec<String> + Send + Sync + 'static,
    {
        self.def.render = Some(Box::new(render));
        self
    }

    pub fn before_mount<F>(mut self, hook: F) -> Self
    where
        F: Fn(&View<'_>) + Send + Sync + 'static,
    {
        self.def.hooks.before_mount = Some(Box::new(hook));
        self
    }

    pub fn on_mounted<F>(mut self, hook: F) -> Self
    where
        F: Fn(&View<'_>) + Send + Sync + 'static,
    {
        self.def.hooks.on_mounted = Some(Box::new(hook));
        self
    }

    pub fn on_updated<F>(mut self, hook: F) -> Self
    where
        F: Fn(&View<'_>) + Send + Sync + 'static,
    {
        self.def.hooks.on_updated = Some(Box::new(hook));
        self
    }

    pub fn on_before_destroy<F>(mut self, hook: F) -> Self
    where
        F: Fn(&View<'_>) + Send + Sync + 'static,
    {
        self.def.hooks.on_before_destroy = Some(Box::new(hook));
        self
    }

    pub fn on_destroyed<F>(mut self, hook: F) -> Self
    where
        F: Fn(&View<'_>) + Send + Sync + 'static,
    {
        self.def.hooks.on_destroyed = Some(Box::new(hook));
        self
    }

    pub fn build(self) -> ComponentDef {
        self.def
    }
}
