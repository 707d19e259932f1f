//! Component instances
//!
//! An instance pairs a [`ComponentDef`] with live state and, while mounted, a
//! render target. Its lifecycle is
//!
//! ```text
//! Created ──mount()──► Mounted ──update_state()──► Mounted ──destroy()──► Destroyed
//! ```
//!
//! Duplicate `mount()` or `destroy()` calls are tolerated with a warning so
//! repeated host signals are harmless. Anything issued after `Destroyed` fails
//! with [`RuntimeError::Lifecycle`].
//!
//! User callbacks never run while the instance lock is held, so hooks and
//! watchers may read the instance they belong to.

use crate::component::{ComponentDef, HookFn, MethodContext, State, View};
use crate::error::{RuntimeError, RuntimeResult};
use crate::target::{RenderTarget, TargetHandle};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tether_bridge::Bridge;
use tether_types::{actions, LifecyclePayload, Message};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Created,
    Mounted,
    Destroyed,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lifecycle::Created => "created",
            Lifecycle::Mounted => "mounted",
            Lifecycle::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

struct Inner {
    state: State,
    computed: Map<String, Value>,
    lifecycle: Lifecycle,
    target: Option<TargetHandle>,
    renders: u64,
    /// Set once `destroy()` has started; the lifecycle flips at its end
    tearing_down: bool,
}

impl Inner {
    /// Lifecycle as seen by new operations; a teardown in progress counts
    /// as destroyed
    fn effective(&self) -> Lifecycle {
        if self.tearing_down {
            Lifecycle::Destroyed
        } else {
            self.lifecycle
        }
    }
}

/// A live component instance
pub struct Component {
    def: ComponentDef,
    bridge: Arc<Bridge>,
    targets: Arc<dyn RenderTarget>,
    inner: Mutex<Inner>,
}

impl Component {
    pub fn new(def: ComponentDef, bridge: Arc<Bridge>, targets: Arc<dyn RenderTarget>) -> Self {
        let state = def.state.clone();
        let computed = def.compute(&state);
        Self {
            def,
            bridge,
            targets,
            inner: Mutex::new(Inner {
                state,
                computed,
                lifecycle: Lifecycle::Created,
                target: None,
                renders: 0,
                tearing_down: false,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.def.id
    }

    pub fn definition(&self) -> &ComponentDef {
        &self.def
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lock().lifecycle
    }

    pub fn is_mounted(&self) -> bool {
        self.lifecycle() == Lifecycle::Mounted
    }

    pub fn state(&self) -> State {
        self.inner.lock().state.clone()
    }

    pub fn computed(&self) -> Map<String, Value> {
        self.inner.lock().computed.clone()
    }

    /// Value of `key` in `state ∪ computed`
    pub fn get(&self, key: &str) -> Option<Value> {
        let inner = self.inner.lock();
        View::new(&inner.state, &inner.computed).get(key).cloned()
    }

    pub fn target(&self) -> Option<TargetHandle> {
        self.inner.lock().target.clone()
    }

    /// Number of completed writes to the render target
    pub fn render_count(&self) -> u64 {
        self.inner.lock().renders
    }

    fn snapshot(&self) -> (State, Map<String, Value>) {
        let inner = self.inner.lock();
        (inner.state.clone(), inner.computed.clone())
    }

    fn lifecycle_error(&self, state: Lifecycle, operation: &'static str) -> RuntimeError {
        RuntimeError::Lifecycle {
            id: self.def.id.clone(),
            state,
            operation,
        }
    }

    fn ensure_alive(&self, operation: &'static str) -> RuntimeResult<()> {
        match self.inner.lock().effective() {
            Lifecycle::Destroyed => Err(self.lifecycle_error(Lifecycle::Destroyed, operation)),
            _ => Ok(()),
        }
    }

    fn run_hook(&self, hook: &Option<HookFn>) {
        if let Some(hook) = hook {
            let (state, computed) = self.snapshot();
            hook(&View::new(&state, &computed));
        }
    }

    async fn emit(&self, action: &'static str) {
        let payload = LifecyclePayload {
            id: self.def.id.clone(),
        };
        let message = match Message::event(self.def.id.clone(), action).with_payload_of(&payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(id = %self.def.id, action, error = %err, "failed to encode lifecycle event");
                return;
            }
        };

        if let Err(err) = self.bridge.send(message).await {
            warn!(id = %self.def.id, action, error = %err, "failed to emit lifecycle event");
        }
    }

    // ===== Lifecycle =====

    /// Allocate the render target, render once and announce the mount
    ///
    /// Order: acquire target, `before_mount`, render (followed by
    /// `on_updated`), `on_mounted`, `component:mounted` event.
    pub async fn mount(&self) -> RuntimeResult<()> {
        let current = self.inner.lock().effective();
        match current {
            Lifecycle::Created => {}
            Lifecycle::Mounted => {
                warn!(id = %self.def.id, "mount called on a mounted component; ignoring");
                return Ok(());
            }
            Lifecycle::Destroyed => {
                return Err(self.lifecycle_error(Lifecycle::Destroyed, "mount"));
            }
        }

        let handle = self.targets.create(&self.def.id).await?;
        self.inner.lock().target = Some(handle.clone());

        self.run_hook(&self.def.hooks.before_mount);

        if let Err(err) = self.render_into(&handle).await {
            self.inner.lock().target = None;
            if let Err(close_err) = self.targets.close(&handle).await {
                warn!(id = %self.def.id, error = %close_err, "failed to release target after failed mount");
            }
            return Err(err);
        }

        self.inner.lock().lifecycle = Lifecycle::Mounted;
        debug!(id = %self.def.id, target = handle.id, "component mounted");

        self.run_hook(&self.def.hooks.on_mounted);
        self.emit(actions::COMPONENT_MOUNTED).await;
        Ok(())
    }

    /// Merge `partial` into state and propagate
    ///
    /// Order: shallow merge, recompute every computed entry, fire watchers
    /// whose key changed, re-render, `on_updated`. Before mount only the
    /// first three steps run since there is no surface yet.
    pub async fn update_state(&self, partial: State) -> RuntimeResult<()> {
        let (mut state, lifecycle) = {
            let inner = self.inner.lock();
            if inner.effective() == Lifecycle::Destroyed {
                return Err(self.lifecycle_error(Lifecycle::Destroyed, "update"));
            }
            (inner.state.clone(), inner.lifecycle)
        };

        let mut previous = Map::new();
        for (key, new) in partial.iter() {
            let old = state.insert(key.clone(), new.clone()).unwrap_or(Value::Null);
            previous.insert(key.clone(), old);
        }

        let computed = self.def.compute(&state);
        {
            let mut inner = self.inner.lock();
            inner.state = state;
            inner.computed = computed;
        }

        for (key, watcher) in &self.def.watchers {
            let (Some(new), Some(old)) = (partial.get(key), previous.get(key)) else {
                continue;
            };
            if new != old {
                watcher(new, old);
            }
        }

        if lifecycle == Lifecycle::Mounted {
            self.render().await?;
        }
        Ok(())
    }

    /// Convenience wrapper for a single-key update
    pub async fn set(&self, key: impl Into<String>, value: Value) -> RuntimeResult<()> {
        let mut partial = State::new();
        partial.insert(key.into(), value);
        self.update_state(partial).await
    }

    /// Overwrite the render target with the current view, then `on_updated`
    pub async fn render(&self) -> RuntimeResult<()> {
        let handle = {
            let inner = self.inner.lock();
            match (inner.effective(), inner.target.clone()) {
                (Lifecycle::Mounted, Some(handle)) => handle,
                (state, _) => return Err(self.lifecycle_error(state, "render")),
            }
        };
        self.render_into(&handle).await
    }

    async fn render_into(&self, handle: &TargetHandle) -> RuntimeResult<()> {
        let lines = {
            let (state, computed) = self.snapshot();
            self.def.render_lines(&View::new(&state, &computed))
        };

        self.targets.set_lines(handle, lines).await?;
        self.inner.lock().renders += 1;

        self.run_hook(&self.def.hooks.on_updated);
        Ok(())
    }

    /// Invoke a named method against this instance
    ///
    /// State staged by the method through its [`MethodContext`] is applied
    /// with [`update_state`](Self::update_state) after it returns.
    pub async fn call_method(&self, name: &str, args: &[Value]) -> RuntimeResult<Value> {
        self.ensure_alive("call method on")?;

        let method = self
            .def
            .methods
            .get(name)
            .ok_or_else(|| RuntimeError::MethodNotFound {
                id: self.def.id.clone(),
                method: name.to_string(),
            })?;

        let (state, computed) = self.snapshot();
        let mut ctx = MethodContext::new(&self.def.id, View::new(&state, &computed));
        let result = method(&mut ctx, args).map_err(|source| RuntimeError::Method {
            id: self.def.id.clone(),
            method: name.to_string(),
            source,
        })?;

        let staged = ctx.into_staged();
        if !staged.is_empty() {
            self.update_state(staged).await?;
        }
        Ok(result)
    }

    /// Release the render target and announce the teardown
    ///
    /// Order: `on_before_destroy`, release target, `on_destroyed`,
    /// `component:destroyed` event, transition to `Destroyed`.
    pub async fn destroy(&self) -> RuntimeResult<()> {
        {
            let mut inner = self.inner.lock();
            if inner.effective() == Lifecycle::Destroyed {
                warn!(id = %self.def.id, "destroy called on a destroyed component; ignoring");
                return Ok(());
            }
            inner.tearing_down = true;
        }

        self.run_hook(&self.def.hooks.on_before_destroy);

        let target = self.inner.lock().target.take();
        if let Some(handle) = target {
            if let Err(err) = self.targets.close(&handle).await {
                warn!(id = %self.def.id, error = %err, "failed to release render target");
            }
        }

        self.run_hook(&self.def.hooks.on_destroyed);
        self.emit(actions::COMPONENT_DESTROYED).await;

        self.inner.lock().lifecycle = Lifecycle::Destroyed;
        debug!(id = %self.def.id, "component destroyed");
        Ok(())
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Component")
            .field("id", &self.def.id)
            .field("lifecycle", &inner.lifecycle)
            .field("state", &inner.state)
            .field("target", &inner.target)
            .finish()
    }
}
