use std::collections::HashSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::datatype::{DataType, Value, ValueKind};
use crate::error::UpnpError;

/// Inclusive numeric bounds for a state variable.
#[derive(Debug, Clone)]
pub struct ValueRange {
    pub minimum: Value,
    pub maximum: Value,
}

#[derive(Debug, Clone)]
pub struct StateVariableSpec {
    pub name: String,
    pub data_type: DataType,
    pub send_events: bool,
    pub allowed_values: Option<Vec<String>>,
    pub allowed_range: Option<ValueRange>,
    pub default_value: Option<Value>,
}

impl StateVariableSpec {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            send_events: false,
            allowed_values: None,
            allowed_range: None,
            default_value: None,
        }
    }

    pub fn send_events(mut self, send_events: bool) -> Self {
        self.send_events = send_events;
        self
    }

    pub fn allowed_values(mut self, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allowed_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn allowed_range(mut self, minimum: impl Into<Value>, maximum: impl Into<Value>) -> Self {
        self.allowed_range = Some(ValueRange {
            minimum: minimum.into(),
            maximum: maximum.into(),
        });
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }
}

/// A typed named datum on a service. The current value is the only mutable
/// state in the tree; action handlers update it through [`StateVariable::set_value`].
pub struct StateVariable {
    spec: StateVariableSpec,
    value: Mutex<Option<Value>>,
}

impl StateVariable {
    fn from_spec(spec: StateVariableSpec) -> Result<Self, UpnpError> {
        if let Some(range) = &spec.allowed_range {
            let kind = spec.data_type.kind();
            if range.minimum.kind() != kind || range.maximum.kind() != kind {
                return Err(UpnpError::invalid_value(
                    &spec.name,
                    format!("allowed range bounds must be {kind:?} values"),
                ));
            }
        }
        let state_var = Self {
            value: Mutex::new(None),
            spec,
        };
        if let Some(default) = state_var.spec.default_value.clone() {
            state_var.set_value(default)?;
        }
        Ok(state_var)
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn data_type(&self) -> DataType {
        self.spec.data_type
    }

    pub fn send_events(&self) -> bool {
        self.spec.send_events
    }

    pub fn allowed_values(&self) -> Option<&[String]> {
        self.spec.allowed_values.as_deref()
    }

    pub fn allowed_range(&self) -> Option<&ValueRange> {
        self.spec.allowed_range.as_ref()
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.spec.default_value.as_ref()
    }

    pub fn value(&self) -> Option<Value> {
        self.value.lock().clone()
    }

    /// Parse a textual value and check it against this variable's
    /// constraints.
    pub fn coerce(&self, text: &str) -> Result<Value, UpnpError> {
        let value = self
            .spec
            .data_type
            .parse(text)
            .map_err(|e| UpnpError::invalid_value(&self.spec.name, e.to_string()))?;
        self.validate(&value)?;
        Ok(value)
    }

    pub fn validate(&self, value: &Value) -> Result<(), UpnpError> {
        if value.kind() != self.spec.data_type.kind() {
            return Err(UpnpError::invalid_value(
                &self.spec.name,
                format!(
                    "expected {:?}, got {:?}",
                    self.spec.data_type.kind(),
                    value.kind()
                ),
            ));
        }
        if let Some(allowed) = &self.spec.allowed_values {
            let text = self.spec.data_type.render(value)?;
            if !allowed.contains(&text) {
                return Err(UpnpError::invalid_value(
                    &self.spec.name,
                    format!("{text:?} not in allowed value list"),
                ));
            }
        }
        if let Some(range) = &self.spec.allowed_range {
            let below = value
                .numeric_cmp(&range.minimum)
                .is_some_and(|o| o.is_lt());
            let above = value
                .numeric_cmp(&range.maximum)
                .is_some_and(|o| o.is_gt());
            if below || above {
                return Err(UpnpError::invalid_value(
                    &self.spec.name,
                    "value out of allowed range".to_owned(),
                ));
            }
        }
        Ok(())
    }

    pub fn set_value(&self, value: Value) -> Result<(), UpnpError> {
        self.validate(&value)?;
        *self.value.lock() = Some(value);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_upnp(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

/// An argument of a runtime [`Action`]. The related state variable dictates
/// the argument's type; the link is by name within the owning service.
#[derive(Debug, Clone)]
pub struct Argument {
    pub name: String,
    pub direction: Direction,
    pub related_state_variable: String,
}

/// What an action binder entry declares about one argument: the wire name,
/// the state variable it relates to, and the host-side kind the handler
/// expects (checked against the state variable at startup).
#[derive(Debug, Clone)]
pub struct ArgumentDescriptor {
    pub name: String,
    pub related_state_variable: String,
    pub kind: ValueKind,
}

/// Coerced in-arguments passed to an action handler, keyed by argument name.
#[derive(Debug, Default)]
pub struct ActionArgs {
    values: IndexMap<String, Value>,
}

impl ActionArgs {
    pub(crate) fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    fn require(&self, name: &str) -> Result<&Value, UpnpError> {
        self.values
            .get(name)
            .ok_or_else(|| UpnpError::action_failed(format!("missing argument {name}")))
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, UpnpError> {
        self.require(name)?
            .as_bool()
            .ok_or_else(|| UpnpError::action_failed(format!("argument {name} is not a boolean")))
    }

    pub fn get_u64(&self, name: &str) -> Result<u64, UpnpError> {
        self.require(name)?
            .as_u64()
            .ok_or_else(|| UpnpError::action_failed(format!("argument {name} is not an unsigned integer")))
    }

    pub fn get_i64(&self, name: &str) -> Result<i64, UpnpError> {
        self.require(name)?
            .as_i64()
            .ok_or_else(|| UpnpError::action_failed(format!("argument {name} is not an integer")))
    }

    pub fn get_f64(&self, name: &str) -> Result<f64, UpnpError> {
        self.require(name)?
            .as_f64()
            .ok_or_else(|| UpnpError::action_failed(format!("argument {name} is not a number")))
    }

    pub fn get_str(&self, name: &str) -> Result<&str, UpnpError> {
        self.require(name)?
            .as_str()
            .ok_or_else(|| UpnpError::action_failed(format!("argument {name} is not a string")))
    }
}

/// Out-argument values produced by an action handler, in response order.
#[derive(Debug, Default)]
pub struct ActionOutput {
    values: IndexMap<String, Value>,
}

impl ActionOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }
}

pub type ActionHandler = Box<
    dyn Fn(Arc<Service>, ActionArgs) -> BoxFuture<'static, Result<ActionOutput, UpnpError>>
        + Send
        + Sync,
>;

/// Declaration of one action: its name, argument descriptors and the handler
/// to dispatch to. Validated and installed by [`Service::from_spec`].
pub struct ActionSpec {
    pub(crate) name: String,
    pub(crate) in_args: Vec<ArgumentDescriptor>,
    pub(crate) out_args: Vec<ArgumentDescriptor>,
    pub(crate) handler: ActionHandler,
}

impl ActionSpec {
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arc<Service>, ActionArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ActionOutput, UpnpError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            in_args: Vec::new(),
            out_args: Vec::new(),
            handler: Box::new(move |service, args| Box::pin(handler(service, args))),
        }
    }

    pub fn in_arg(
        mut self,
        name: impl Into<String>,
        state_variable: impl Into<String>,
        kind: ValueKind,
    ) -> Self {
        self.in_args.push(ArgumentDescriptor {
            name: name.into(),
            related_state_variable: state_variable.into(),
            kind,
        });
        self
    }

    pub fn out_arg(
        mut self,
        name: impl Into<String>,
        state_variable: impl Into<String>,
        kind: ValueKind,
    ) -> Self {
        self.out_args.push(ArgumentDescriptor {
            name: name.into(),
            related_state_variable: state_variable.into(),
            kind,
        });
        self
    }
}

/// A named RPC operation with its typed arguments and bound handler.
pub struct Action {
    name: String,
    arguments: Vec<Argument>,
    handler: ActionHandler,
}

impl Action {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// In-arguments first, then out-arguments, in declaration order.
    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    pub fn in_arguments(&self) -> impl Iterator<Item = &Argument> {
        self.arguments
            .iter()
            .filter(|a| a.direction == Direction::In)
    }

    pub fn out_arguments(&self) -> impl Iterator<Item = &Argument> {
        self.arguments
            .iter()
            .filter(|a| a.direction == Direction::Out)
    }

    pub fn argument(&self, name: &str, direction: Direction) -> Option<&Argument> {
        self.arguments
            .iter()
            .find(|a| a.direction == direction && a.name == name)
    }

    pub(crate) async fn invoke(
        &self,
        service: Arc<Service>,
        args: ActionArgs,
    ) -> Result<ActionOutput, UpnpError> {
        (self.handler)(service, args).await
    }
}

pub struct ServiceSpec {
    pub service_type: String,
    pub service_id: String,
    pub scpd_url: String,
    pub control_url: String,
    pub event_sub_url: String,
    pub state_variables: Vec<StateVariableSpec>,
    pub actions: Vec<ActionSpec>,
}

/// A running service: state variables plus bound actions. Owned by its
/// device; the back-link to the device is a lookup through the tree, not a
/// reference.
pub struct Service {
    pub service_type: String,
    pub service_id: String,
    pub scpd_url: String,
    pub control_url: String,
    pub event_sub_url: String,
    state_variables: IndexMap<String, StateVariable>,
    actions: IndexMap<String, Action>,
}

impl Service {
    /// Build the runtime service. All binder validation happens here and is
    /// fatal: unknown or type-mismatched state variables, duplicate names.
    pub(crate) fn from_spec(spec: ServiceSpec) -> Result<Arc<Service>, UpnpError> {
        let mut state_variables = IndexMap::new();
        for var_spec in spec.state_variables {
            let name = var_spec.name.clone();
            if state_variables.contains_key(&name) {
                return Err(UpnpError::DuplicateStateVariable(name));
            }
            state_variables.insert(name, StateVariable::from_spec(var_spec)?);
        }

        let mut actions = IndexMap::new();
        for action_spec in spec.actions {
            let action = bind_action(&state_variables, action_spec)?;
            if actions.contains_key(action.name()) {
                return Err(UpnpError::DuplicateAction(action.name().to_owned()));
            }
            actions.insert(action.name.clone(), action);
        }

        Ok(Arc::new(Service {
            service_type: spec.service_type,
            service_id: spec.service_id,
            scpd_url: spec.scpd_url,
            control_url: spec.control_url,
            event_sub_url: spec.event_sub_url,
            state_variables,
            actions,
        }))
    }

    pub fn state_variable(&self, name: &str) -> Option<&StateVariable> {
        self.state_variables.get(name)
    }

    pub fn state_variables(&self) -> impl Iterator<Item = &StateVariable> {
        self.state_variables.values()
    }

    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.values()
    }
}

fn bind_action(
    state_variables: &IndexMap<String, StateVariable>,
    spec: ActionSpec,
) -> Result<Action, UpnpError> {
    let mut arguments = Vec::with_capacity(spec.in_args.len() + spec.out_args.len());
    let mut seen_in_args = HashSet::new();

    for descriptor in &spec.in_args {
        if !seen_in_args.insert(descriptor.name.clone()) {
            return Err(UpnpError::DuplicateArgumentName {
                action: spec.name.clone(),
                argument: descriptor.name.clone(),
            });
        }
        check_descriptor(state_variables, &spec.name, descriptor)?;
        arguments.push(Argument {
            name: descriptor.name.clone(),
            direction: Direction::In,
            related_state_variable: descriptor.related_state_variable.clone(),
        });
    }

    for descriptor in &spec.out_args {
        check_descriptor(state_variables, &spec.name, descriptor)?;
        arguments.push(Argument {
            name: descriptor.name.clone(),
            direction: Direction::Out,
            related_state_variable: descriptor.related_state_variable.clone(),
        });
    }

    Ok(Action {
        name: spec.name,
        arguments,
        handler: spec.handler,
    })
}

fn check_descriptor(
    state_variables: &IndexMap<String, StateVariable>,
    action: &str,
    descriptor: &ArgumentDescriptor,
) -> Result<(), UpnpError> {
    let state_var = state_variables
        .get(&descriptor.related_state_variable)
        .ok_or_else(|| UpnpError::NoSuchStateVariable {
            action: action.to_owned(),
            state_variable: descriptor.related_state_variable.clone(),
        })?;
    if state_var.data_type().kind() != descriptor.kind {
        return Err(UpnpError::ArgumentTypeMismatch {
            action: action.to_owned(),
            argument: descriptor.name.clone(),
            declared: descriptor.kind,
            state_variable: descriptor.related_state_variable.clone(),
            data_type: state_var.data_type(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::DataType;

    fn switch_spec(actions: Vec<ActionSpec>) -> ServiceSpec {
        ServiceSpec {
            service_type: "urn:schemas-upnp-org:service:SwitchPower:1".to_owned(),
            service_id: "urn:upnp-org:serviceId:SwitchPower".to_owned(),
            scpd_url: "/SwitchPower/scpd.xml".to_owned(),
            control_url: "/SwitchPower/control".to_owned(),
            event_sub_url: "/SwitchPower/events".to_owned(),
            state_variables: vec![
                StateVariableSpec::new("Target", DataType::Boolean).default_value(false),
                StateVariableSpec::new("Status", DataType::Boolean).default_value(false),
            ],
            actions,
        }
    }

    fn set_target_action() -> ActionSpec {
        ActionSpec::new("SetTarget", |service: Arc<Service>, args: ActionArgs| {
            async move {
                let target = args.get_bool("NewTargetValue")?;
                service
                    .state_variable("Target")
                    .unwrap()
                    .set_value(Value::Bool(target))?;
                Ok(ActionOutput::new())
            }
        })
        .in_arg("NewTargetValue", "Target", ValueKind::Bool)
    }

    #[tokio::test]
    async fn test_bound_handler_updates_state() {
        let service = Service::from_spec(switch_spec(vec![set_target_action()])).unwrap();
        let action = service.action("SetTarget").unwrap();

        let mut args = ActionArgs::default();
        args.insert("NewTargetValue", Value::Bool(true));
        action.invoke(service.clone(), args).await.unwrap();

        assert_eq!(
            service.state_variable("Target").unwrap().value(),
            Some(Value::Bool(true))
        );
    }

    #[test]
    fn test_default_value_applied() {
        let service = Service::from_spec(switch_spec(vec![])).unwrap();
        assert_eq!(
            service.state_variable("Status").unwrap().value(),
            Some(Value::Bool(false))
        );
    }

    #[test]
    fn test_duplicate_state_variable_rejected() {
        let mut spec = switch_spec(vec![]);
        spec.state_variables
            .push(StateVariableSpec::new("Target", DataType::Str));
        match Service::from_spec(spec) {
            Err(UpnpError::DuplicateStateVariable(name)) => assert_eq!(name, "Target"),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("expected DuplicateStateVariable"),
        }
    }

    #[test]
    fn test_binder_rejects_unknown_state_variable() {
        let action = ActionSpec::new("Broken", |_service: Arc<Service>, _args: ActionArgs| {
            async move { Ok(ActionOutput::new()) }
        })
        .in_arg("X", "NoSuchVar", ValueKind::Bool);
        match Service::from_spec(switch_spec(vec![action])) {
            Err(UpnpError::NoSuchStateVariable { state_variable, .. }) => {
                assert_eq!(state_variable, "NoSuchVar")
            }
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("expected NoSuchStateVariable"),
        }
    }

    #[test]
    fn test_binder_rejects_kind_mismatch() {
        let action = ActionSpec::new("Broken", |_service: Arc<Service>, _args: ActionArgs| {
            async move { Ok(ActionOutput::new()) }
        })
        .in_arg("NewTargetValue", "Target", ValueKind::Str);
        match Service::from_spec(switch_spec(vec![action])) {
            Err(UpnpError::ArgumentTypeMismatch { argument, .. }) => {
                assert_eq!(argument, "NewTargetValue")
            }
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("expected ArgumentTypeMismatch"),
        }
    }

    #[test]
    fn test_binder_rejects_duplicate_in_arg() {
        let action = ActionSpec::new("Broken", |_service: Arc<Service>, _args: ActionArgs| {
            async move { Ok(ActionOutput::new()) }
        })
        .in_arg("A", "Target", ValueKind::Bool)
        .in_arg("A", "Status", ValueKind::Bool);
        match Service::from_spec(switch_spec(vec![action])) {
            Err(UpnpError::DuplicateArgumentName { argument, .. }) => assert_eq!(argument, "A"),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("expected DuplicateArgumentName"),
        }
    }

    #[test]
    fn test_state_variable_constraints() {
        let var = StateVariable::from_spec(
            StateVariableSpec::new("Level", DataType::Ui2)
                .allowed_range(0u64, 100u64)
                .default_value(50u64),
        )
        .unwrap();
        assert_eq!(var.value(), Some(Value::UInt(50)));
        assert!(var.set_value(Value::UInt(100)).is_ok());
        assert!(var.set_value(Value::UInt(101)).is_err());
        assert!(var.coerce("42").is_ok());
        assert!(var.coerce("200").is_err());
        assert!(var.coerce("nope").is_err());

        let mode = StateVariable::from_spec(
            StateVariableSpec::new("Mode", DataType::Str).allowed_values(["On", "Off"]),
        )
        .unwrap();
        assert!(mode.set_value(Value::Str("On".to_owned())).is_ok());
        assert!(mode.set_value(Value::Str("Dimmed".to_owned())).is_err());
    }
}
