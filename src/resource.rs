use std::marker::PhantomData;

use crate::action::{ActionDescriptor, ClassAction, InstanceAction};
use crate::model::Model;

/// One model and the actions attached to it; the unit a store registers.
#[derive(Debug, Clone)]
pub struct Resource {
    model: &'static str,
    fields: &'static [&'static str],
    actions: Vec<ActionDescriptor>,
}

impl Resource {
    pub fn builder<M: Model>() -> ResourceBuilder<M> {
        ResourceBuilder {
            actions: Vec::new(),
            _model: PhantomData,
        }
    }

    pub fn model(&self) -> &'static str {
        self.model
    }

    pub fn fields(&self) -> &'static [&'static str] {
        self.fields
    }

    pub fn actions(&self) -> &[ActionDescriptor] {
        &self.actions
    }

    pub fn class_actions(&self) -> impl Iterator<Item = &ActionDescriptor> {
        self.actions.iter().filter(|a| a.class_method)
    }

    pub fn instance_actions(&self) -> impl Iterator<Item = &ActionDescriptor> {
        self.actions.iter().filter(|a| !a.class_method)
    }
}

pub struct ResourceBuilder<M> {
    actions: Vec<ActionDescriptor>,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> ResourceBuilder<M> {
    pub fn class_action<A: ClassAction<M>>(mut self) -> Self {
        self.actions.push(A::descriptor());
        self
    }

    pub fn instance_action<A: InstanceAction<M>>(mut self) -> Self {
        self.actions.push(A::descriptor());
        self
    }

    pub fn finish(self) -> Resource {
        Resource {
            model: M::NAME,
            fields: M::FIELDS,
            actions: self.actions,
        }
    }
}
