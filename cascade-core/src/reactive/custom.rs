//! Custom sources.
//!
//! A custom source wraps some external producer (a timer, a socket, a UI
//! listener) and feeds it into the graph. The producer is set up in
//! `on_start` and torn down in `on_stop`. Values are fired through a
//! [`SourceContext`], each in a transaction of its own.
//!
//! ```text
//! first observer  --> on_will_start --> when(start_index)? --> on_start
//! last observer   --> on_stop (only if the matching on_start ran)
//! ```

use std::cell::Cell;
use std::rc::{Rc, Weak};

use crate::error::{self, Error, Try};
use crate::graph::{
    fire_signal, fire_try, try_now, CurrentValue, Node, NodeCore, Observer, SignalNode,
    Transaction,
};

use super::{EventStream, Signal};

type Hook = Box<dyn Fn()>;
type StartGate = Box<dyn Fn(u32) -> bool>;

/// Lifecycle callbacks of a custom source.
#[derive(Default)]
pub struct SourceConfig {
    on_will_start: Option<Hook>,
    on_start: Option<Hook>,
    on_stop: Option<Hook>,
    when: Option<StartGate>,
}

impl SourceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs before the source starts, before observers are attached.
    pub fn on_will_start(mut self, f: impl Fn() + 'static) -> Self {
        self.on_will_start = Some(Box::new(f));
        self
    }

    /// Runs every time the source starts. A panic is fired as a failure.
    pub fn on_start(mut self, f: impl Fn() + 'static) -> Self {
        self.on_start = Some(Box::new(f));
        self
    }

    /// Runs when the source stops, if `on_start` ran for this start.
    pub fn on_stop(mut self, f: impl Fn() + 'static) -> Self {
        self.on_stop = Some(Box::new(f));
        self
    }

    /// Only run `on_start` for starts where `should_start(start_index)`
    /// holds. The first start has index 1.
    pub fn when(mut self, should_start: impl Fn(u32) -> bool + 'static) -> Self {
        self.when = Some(Box::new(should_start));
        self
    }

    /// Only run `on_start` the first time the source starts.
    pub fn first_start_only(self) -> Self {
        self.when(|start_index| start_index == 1)
    }
}

/// Handle given to a custom source for firing values.
pub struct SourceContext<T: Clone + 'static> {
    node: Weak<CustomSource<T>>,
}

impl<T: Clone + 'static> Clone for SourceContext<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
        }
    }
}

impl<T: Clone + 'static> SourceContext<T> {
    pub fn fire_value(&self, value: T) {
        self.fire_try(Ok(value));
    }

    pub fn fire_error(&self, err: Error) {
        self.fire_try(Err(err));
    }

    /// Fire in a new transaction. Does nothing once the source is gone.
    pub fn fire_try(&self, value: Try<T>) {
        let Some(node) = self.node.upgrade() else {
            return;
        };
        Transaction::run(move |trx| {
            if node.is_signal {
                fire_signal(&*node, value, trx);
            } else {
                fire_try(&*node, &value, trx);
            }
        });
    }

    /// How many times the source has started. 0 before the first start.
    pub fn start_index(&self) -> u32 {
        self.node
            .upgrade()
            .map_or(0, |node| node.core.start_index())
    }

    pub fn is_started(&self) -> bool {
        self.node
            .upgrade()
            .is_some_and(|node| node.core.is_started())
    }

    /// Current value of a signal source. `None` for streams.
    pub fn current(&self) -> Option<Try<T>> {
        let node = self.node.upgrade()?;
        node.is_signal.then(|| try_now(&*node))
    }
}

pub(crate) struct CustomSource<T: Clone + 'static> {
    core: NodeCore<T>,
    config: SourceConfig,
    context: SourceContext<T>,
    is_signal: bool,
    initial: Try<T>,
    current: CurrentValue<T>,
    started_hook_ran: Cell<bool>,
}

impl<T: Clone + 'static> CustomSource<T> {
    fn new<F>(is_signal: bool, initial: Try<T>, make: F) -> Rc<Self>
    where
        F: FnOnce(SourceContext<T>) -> SourceConfig,
    {
        Rc::new_cyclic(|this: &Weak<Self>| {
            let context = SourceContext { node: this.clone() };
            Self {
                core: NodeCore::source(),
                config: make(context.clone()),
                context,
                is_signal,
                initial,
                current: CurrentValue::empty(),
                started_hook_ran: Cell::new(false),
            }
        })
    }
}

impl<T: Clone + 'static> Node<T> for CustomSource<T> {
    fn core(&self) -> &NodeCore<T> {
        &self.core
    }

    fn on_will_start(&self) {
        if let Some(hook) = &self.config.on_will_start {
            if let Err(err) = error::catch(hook) {
                self.context.fire_error(err);
            }
        }
    }

    fn on_start(&self) {
        let start_index = self.core.start_index();
        let allowed = self
            .config
            .when
            .as_ref()
            .map_or(true, |when| when(start_index));
        if !allowed {
            tracing::debug!(node = %self.core.display_name(), start_index, "start hook skipped");
            return;
        }
        self.started_hook_ran.set(true);
        if let Some(hook) = &self.config.on_start {
            if let Err(err) = error::catch(hook) {
                self.context.fire_error(err);
            }
        }
    }

    fn on_stop(&self) {
        if !self.started_hook_ran.replace(false) {
            return;
        }
        if let Some(hook) = &self.config.on_stop {
            hook();
        }
    }

    fn on_added_external_observer(&self, observer: &Observer<T>) {
        if self.is_signal {
            observer.on_try(&try_now(self));
        }
    }
}

impl<T: Clone + 'static> SignalNode<T> for CustomSource<T> {
    fn current(&self) -> &CurrentValue<T> {
        &self.current
    }

    fn initial_value(&self) -> Try<T> {
        self.initial.clone()
    }
}

/// A listener callback handed to [`EventStream::from_listener`].
pub type Listener<T> = Rc<dyn Fn(T)>;

impl<T: Clone + 'static> EventStream<T> {
    /// Stream fed by a custom source. `make` is called once, right away.
    pub fn from_custom_source<F>(make: F) -> EventStream<T>
    where
        F: FnOnce(SourceContext<T>) -> SourceConfig,
    {
        EventStream::from_node(CustomSource::new(
            false,
            Err(Error::failed("streams have no current value")),
            make,
        ))
    }

    /// Stream fed by an external listener API.
    ///
    /// `add` is called with a listener on every start and `remove` on every
    /// stop. Each call of the listener fires in a new transaction.
    pub fn from_listener<A, R>(add: A, remove: R) -> EventStream<T>
    where
        A: Fn(Listener<T>) + 'static,
        R: Fn() + 'static,
    {
        Self::from_custom_source(move |ctx| {
            SourceConfig::new()
                .on_start(move || {
                    let ctx = ctx.clone();
                    add(Rc::new(move |value| ctx.fire_value(value)));
                })
                .on_stop(remove)
        })
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Signal fed by a custom source, holding `initial` until it fires.
    pub fn from_custom_source<F>(initial: Try<T>, make: F) -> Signal<T>
    where
        F: FnOnce(SourceContext<T>) -> SourceConfig,
    {
        Signal::from_node(CustomSource::new(true, initial, make))
    }
}
