use super::event::{CallbackId, Event, EventFuture};
use super::value_event::{ValueEvent, ValueFuture};
use crate::environment::Environment;
use crate::error::FailureReason;

use std::cell::{Cell, RefCell};
use std::fmt::{Debug, Formatter};
use std::future::IntoFuture;
use std::rc::Rc;

/// A child watched by an [`AnyOf`] condition.
///
/// Tagging value-carrying children up front keeps value retrieval statically typed: [`AnyOf::value()`] knows which
/// children can answer without inspecting them at runtime.
pub enum Watched<T> {
    /// A child that only signals completion.
    Plain(Event),
    /// A child whose value is exposed through the condition if it fires first.
    Value(ValueEvent<T>),
}

impl<T> Watched<T> {
    pub fn event(&self) -> &Event {
        match self {
            Self::Plain(event) => event,
            Self::Value(value_event) => value_event.event(),
        }
    }
}

impl<T> From<Event> for Watched<T> {
    fn from(event: Event) -> Self {
        Self::Plain(event)
    }
}

impl<T> From<ValueEvent<T>> for Watched<T> {
    fn from(value_event: ValueEvent<T>) -> Self {
        Self::Value(value_event)
    }
}

impl<T> Clone for Watched<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Plain(event) => Self::Plain(event.clone()),
            Self::Value(value_event) => Self::Value(value_event.clone()),
        }
    }
}

impl<T> Debug for Watched<T> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Self::Plain(event) => f.debug_tuple("Plain").field(event).finish(),
            Self::Value(value_event) => f.debug_tuple("Value").field(value_event).finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    All,
    Any,
}

/// Shared state behind both condition kinds. The outcome carries the index of the child whose firing settled it.
struct ConditionCore {
    rule: Rule,
    children: Vec<Event>,
    outcome: ValueEvent<usize>,
    subscriptions: RefCell<Vec<(Event, CallbackId)>>,
    settled: Cell<bool>,
}

impl ConditionCore {
    fn arm(env: &Environment, rule: Rule, children: Vec<Event>) -> Rc<Self> {
        let core = Rc::new(Self {
            rule,
            children,
            outcome: ValueEvent::new(env),
            subscriptions: RefCell::new(Vec::new()),
            settled: Cell::new(false),
        });

        for (index, child) in core.children.iter().enumerate() {
            if child.is_triggered() {
                core.child_fired(index, child);
            }
        }
        if rule == Rule::All && core.children.is_empty() {
            core.settle(Ok(0));
        }
        if core.settled.get() {
            return core;
        }

        let mut subscriptions = Vec::with_capacity(core.children.len());
        for (index, child) in core.children.iter().enumerate() {
            let watcher = Rc::clone(&core);
            if let Some(key) = child.subscribe(move |child| watcher.child_fired(index, child), false) {
                subscriptions.push((child.clone(), key));
            }
        }
        *core.subscriptions.borrow_mut() = subscriptions;
        core
    }

    fn child_fired(&self, index: usize, child: &Event) {
        if self.settled.get() {
            return;
        }

        if let Some(reason) = child.failure() {
            self.settle(Err(reason));
            return;
        }
        match self.rule {
            Rule::Any => self.settle(Ok(index)),
            Rule::All if self.children.iter().all(Event::is_triggered) => self.settle(Ok(index)),
            Rule::All => {},
        }
    }

    fn settle(&self, result: Result<usize, FailureReason>) {
        self.settled.set(true);
        let scheduled = match result {
            Ok(index) => self.outcome.succeed(index),
            Err(reason) => self.outcome.event().fail_shared(reason),
        };
        if let Err(error) = scheduled {
            tracing::warn!(%error, "condition could not schedule its outcome");
        }

        // stop listening to siblings that have not fired yet
        for (child, key) in self.subscriptions.borrow_mut().drain(..) {
            child.unsubscribe(key);
        }
    }
}

/// Composite event that succeeds once every watched child has triggered.
///
/// The set of children is fixed at construction. A condition over zero children succeeds immediately. If a child is
/// failed instead of succeeded, the condition fails with the same reason. Once settled, the condition detaches its
/// callbacks from any child that has not fired.
#[derive(Clone)]
pub struct AllOf {
    core: Rc<ConditionCore>,
}

impl AllOf {
    pub fn new<I>(env: &Environment, children: I) -> Self
    where
        I: IntoIterator<Item = Event>,
    {
        Self {
            core: ConditionCore::arm(env, Rule::All, children.into_iter().collect()),
        }
    }

    /// The event that fires when the condition is met.
    pub fn event(&self) -> &Event {
        self.core.outcome.event()
    }

    pub fn children(&self) -> &[Event] {
        &self.core.children
    }

    pub fn is_triggered(&self) -> bool {
        self.event().is_triggered()
    }
}

impl AsRef<Event> for AllOf {
    fn as_ref(&self) -> &Event {
        self.event()
    }
}

impl Debug for AllOf {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.debug_struct("AllOf")
            .field("event", self.event())
            .field("children", &self.core.children.len())
            .finish()
    }
}

impl IntoFuture for &AllOf {
    type Output = crate::Result;
    type IntoFuture = EventFuture;

    fn into_future(self) -> Self::IntoFuture {
        self.event().into_future()
    }
}

/// Composite event that succeeds as soon as any watched child triggers.
///
/// The condition remembers which child settled it; if that child is a [`Watched::Value`], its value is available
/// through [`value()`]. Awaiting the condition resolves to the index of that child. A condition over zero children
/// never fires.
///
/// [`value()`]: AnyOf::value
pub struct AnyOf<T = ()> {
    core: Rc<ConditionCore>,
    children: Rc<[Watched<T>]>,
}

impl<T> AnyOf<T> {
    pub fn new<I>(env: &Environment, children: I) -> Self
    where
        I: IntoIterator<Item = Watched<T>>,
    {
        let children: Rc<[Watched<T>]> = children.into_iter().collect();
        let events = children.iter().map(|child| child.event().clone()).collect();
        Self {
            core: ConditionCore::arm(env, Rule::Any, events),
            children,
        }
    }

    /// The event that fires when the condition is met.
    pub fn event(&self) -> &Event {
        self.core.outcome.event()
    }

    /// Index of the child that settled the condition.
    pub fn triggered_index(&self) -> Option<usize> {
        self.core.outcome.value()
    }

    /// The child that settled the condition.
    pub fn triggered_child(&self) -> Option<&Watched<T>> {
        self.triggered_index().and_then(|index| self.children.get(index))
    }

    pub fn children(&self) -> &[Watched<T>] {
        &self.children
    }

    pub fn is_triggered(&self) -> bool {
        self.event().is_triggered()
    }
}

impl<T: Clone> AnyOf<T> {
    /// Value of the child that settled the condition, if that child carries one.
    pub fn value(&self) -> Option<T> {
        match self.triggered_child()? {
            Watched::Value(value_event) => value_event.value(),
            Watched::Plain(_) => None,
        }
    }
}

impl<T> Clone for AnyOf<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
            children: Rc::clone(&self.children),
        }
    }
}

impl<T> AsRef<Event> for AnyOf<T> {
    fn as_ref(&self) -> &Event {
        self.event()
    }
}

impl<T> Debug for AnyOf<T> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.debug_struct("AnyOf")
            .field("event", self.event())
            .field("triggered_index", &self.triggered_index())
            .field("children", &self.children.len())
            .finish()
    }
}

impl<T> IntoFuture for &AnyOf<T> {
    type Output = crate::Result<usize>;
    type IntoFuture = ValueFuture<usize>;

    fn into_future(self) -> Self::IntoFuture {
        self.core.outcome.clone().into_future()
    }
}
