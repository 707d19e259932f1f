//! Component runtime and remote dispatch
//!
//! The [`ComponentRuntime`] owns the table of live instances and, from the
//! moment it is constructed, answers remote requests addressed to them:
//!
//! | action              | effect                                  | correlated reply            |
//! |---------------------|-----------------------------------------|-----------------------------|
//! | `callMethod`        | `call_method(payload.method, args)`     | `response` `methodResult`   |
//! | `setState`          | `update_state(payload)`                 | `response` `stateSnapshot`  |
//! | `getState`          | read state and computed values          | `response` `stateSnapshot`  |
//! | `component:destroy` | tear the instance down                  | `response` `component:destroyed` |
//!
//! The message `id` names the target instance. A `component:destroy` for an
//! id that is no longer known succeeds quietly. Failures become `error`
//! replies carrying the same `correlationId`; without a correlation id they
//! are only logged. Uncorrelated `getState` is answered with a `state`
//! message.

use crate::component::{ComponentDef, State};
use crate::error::{RuntimeError, RuntimeResult};
use crate::instance::{Component, Lifecycle};
use crate::target::RenderTarget;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tether_bridge::{Bridge, Handler, HandlerRef, HandlerResult};
use tether_types::{
    actions, CallMethodPayload, ErrorPayload, LifecyclePayload, Message, MessageType,
    MethodResultPayload, StateSnapshotPayload,
};
use tracing::{debug, warn};

const DISPATCH_ACTIONS: [&str; 4] = [
    actions::CALL_METHOD,
    actions::SET_STATE,
    actions::GET_STATE,
    actions::COMPONENT_DESTROY,
];

/// Live instances keyed by id
#[derive(Default)]
struct ComponentTable {
    components: Mutex<HashMap<String, Arc<Component>>>,
}

impl ComponentTable {
    fn get(&self, id: &str) -> Option<Arc<Component>> {
        self.components.lock().get(id).cloned()
    }

    fn resolve(&self, id: &str) -> RuntimeResult<Arc<Component>> {
        self.get(id)
            .ok_or_else(|| RuntimeError::ComponentNotFound(id.to_string()))
    }

    async fn destroy(&self, id: &str) -> RuntimeResult<()> {
        let component = self.resolve(id)?;
        let outcome = component.destroy().await;
        // Only drop the entry if it still refers to the instance we destroyed.
        let mut components = self.components.lock();
        if components
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, &component))
        {
            components.remove(id);
        }
        outcome
    }
}

fn snapshot_of(component: &Component) -> StateSnapshotPayload {
    StateSnapshotPayload {
        state: component.state(),
        computed: component.computed(),
    }
}

/// Bridge handler routing remote requests to instances
struct RpcDispatcher {
    bridge: Weak<Bridge>,
    table: Weak<ComponentTable>,
}

impl RpcDispatcher {
    fn table(&self) -> RuntimeResult<Arc<ComponentTable>> {
        self.table
            .upgrade()
            .ok_or_else(|| RuntimeError::ComponentNotFound(String::from("<runtime dropped>")))
    }

    async fn call_method(&self, message: &Message) -> RuntimeResult<Value> {
        let payload: CallMethodPayload = message.payload_as()?;
        let component = self.table()?.resolve(&message.id)?;
        let result = component.call_method(&payload.method, &payload.args).await?;
        Ok(serde_json::to_value(MethodResultPayload { result })
            .map_err(tether_types::ProtocolError::Encode)?)
    }

    async fn set_state(&self, message: &Message) -> RuntimeResult<Value> {
        let partial: State = message.payload_as()?;
        let component = self.table()?.resolve(&message.id)?;
        component.update_state(partial).await?;
        Ok(serde_json::to_value(snapshot_of(&component))
            .map_err(tether_types::ProtocolError::Encode)?)
    }

    async fn get_state(&self, message: &Message) -> RuntimeResult<Value> {
        let component = self.table()?.resolve(&message.id)?;
        if component.lifecycle() == Lifecycle::Destroyed {
            return Err(RuntimeError::Lifecycle {
                id: message.id.clone(),
                state: Lifecycle::Destroyed,
                operation: "read state of",
            });
        }
        Ok(serde_json::to_value(snapshot_of(&component))
            .map_err(tether_types::ProtocolError::Encode)?)
    }

    async fn destroy(&self, message: &Message) -> RuntimeResult<Value> {
        match self.table()?.destroy(&message.id).await {
            Ok(()) => {}
            Err(RuntimeError::ComponentNotFound(_)) => {
                debug!(id = %message.id, "destroy signal for a component that is already gone");
            }
            Err(err) => return Err(err),
        }
        Ok(serde_json::to_value(LifecyclePayload {
            id: message.id.clone(),
        })
        .map_err(tether_types::ProtocolError::Encode)?)
    }

    /// Answer `request` with `outcome`, if the peer asked for an answer
    async fn reply(
        &self,
        request: &Message,
        reply_action: &'static str,
        outcome: RuntimeResult<Value>,
    ) -> HandlerResult {
        let reply = match (&request.correlation_id, outcome) {
            (Some(_), Ok(payload)) => {
                Message::reply_to(request, MessageType::Response, reply_action).with_payload(payload)
            }
            (Some(_), Err(err)) => {
                debug!(id = %request.id, action = %request.action, error = %err, "replying with error");
                Message::reply_to(request, MessageType::Error, reply_action).with_payload_of(
                    &ErrorPayload::new(err.to_string()).with_code(err.code()),
                )?
            }
            (None, Ok(payload)) if request.action == actions::GET_STATE => {
                Message::new(request.id.clone(), MessageType::State, reply_action)
                    .with_payload(payload)
            }
            (None, Ok(_)) => return Ok(()),
            (None, Err(err)) => {
                warn!(id = %request.id, action = %request.action, error = %err, "remote request failed");
                return Ok(());
            }
        };

        let Some(bridge) = self.bridge.upgrade() else {
            warn!(id = %request.id, "bridge dropped before reply could be sent");
            return Ok(());
        };
        bridge.send(reply).await?;
        Ok(())
    }
}

#[async_trait]
impl Handler for RpcDispatcher {
    async fn handle(&self, message: &Message) -> HandlerResult {
        if message.kind.is_reply() {
            return Ok(());
        }

        match message.action.as_str() {
            actions::CALL_METHOD => {
                let outcome = self.call_method(message).await;
                self.reply(message, actions::METHOD_RESULT, outcome).await
            }
            actions::SET_STATE => {
                let outcome = self.set_state(message).await;
                self.reply(message, actions::STATE_SNAPSHOT, outcome).await
            }
            actions::GET_STATE => {
                let outcome = self.get_state(message).await;
                self.reply(message, actions::STATE_SNAPSHOT, outcome).await
            }
            actions::COMPONENT_DESTROY => {
                let outcome = self.destroy(message).await;
                self.reply(message, actions::COMPONENT_DESTROYED, outcome).await
            }
            _ => Ok(()),
        }
    }
}

/// Creates instances and serves remote calls for them
pub struct ComponentRuntime {
    bridge: Arc<Bridge>,
    targets: Arc<dyn RenderTarget>,
    table: Arc<ComponentTable>,
    dispatcher: HandlerRef,
}

impl ComponentRuntime {
    /// Build the runtime and register its dispatcher on `bridge`
    pub fn new(bridge: Arc<Bridge>, targets: Arc<dyn RenderTarget>) -> Self {
        let table = Arc::new(ComponentTable::default());
        let dispatcher: HandlerRef = Arc::new(RpcDispatcher {
            bridge: Arc::downgrade(&bridge),
            table: Arc::downgrade(&table),
        });

        for action in DISPATCH_ACTIONS {
            bridge.register_handler(action, dispatcher.clone());
        }

        Self {
            bridge,
            targets,
            table,
            dispatcher,
        }
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    pub fn targets(&self) -> &Arc<dyn RenderTarget> {
        &self.targets
    }

    /// Instantiate `def`; ids must be unique among live instances
    ///
    /// A destroyed instance with the same id is replaced.
    pub fn create(&self, def: ComponentDef) -> RuntimeResult<Arc<Component>> {
        let mut components = self.table.components.lock();
        if let Some(existing) = components.get(def.id()) {
            if existing.lifecycle() != Lifecycle::Destroyed {
                return Err(RuntimeError::DuplicateComponent(def.id().to_string()));
            }
        }

        let id = def.id().to_string();
        let component = Arc::new(Component::new(
            def,
            self.bridge.clone(),
            self.targets.clone(),
        ));
        components.insert(id.clone(), component.clone());
        debug!(id = %id, "component created");
        Ok(component)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Component>> {
        self.table.get(id)
    }

    /// Ids of all known instances, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.table.components.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.table.components.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.components.lock().is_empty()
    }

    /// Destroy an instance and forget it
    pub async fn destroy(&self, id: &str) -> RuntimeResult<()> {
        self.table.destroy(id).await
    }

    /// Destroy every instance, logging individual failures
    pub async fn destroy_all(&self) {
        for id in self.ids() {
            if let Err(err) = self.table.destroy(&id).await {
                warn!(id = %id, error = %err, "failed to destroy component");
            }
        }
    }
}

impl Drop for ComponentRuntime {
    fn drop(&mut self) {
        for action in DISPATCH_ACTIONS {
            self.bridge.unregister_handler(action, &self.dispatcher);
        }
    }
}
