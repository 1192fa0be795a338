//! Fixed-capacity publish/subscribe relay.
//!
//! Producers (controls, note input, jack detector, timer callbacks) push
//! events into one bounded FIFO shared by all sources. The owner of the bus
//! drains it with [`EventBus::dispatch`], which runs every subscriber of the
//! event's source on the calling thread, in subscription order.
//!
//! Subscribers receive a `&mut C` context at dispatch time instead of
//! capturing shared state, so handlers can mutate the components they
//! coordinate without locks.

use std::time::Duration;

use arrayvec::ArrayVec;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError, bounded};
use interrupter_core::{Error, Event, EventSource, Resource, Result};

/// Events that may be pending at once.
pub const QUEUE_CAPACITY: usize = 32;

/// Subscribers per source.
pub const MAX_SUBSCRIBERS: usize = 4;

pub type Callback<C> = Box<dyn FnMut(&Event, &mut C) + Send>;

pub struct EventBus<C> {
  tx: Sender<Event>,
  rx: Receiver<Event>,
  subscribers: [ArrayVec<Callback<C>, MAX_SUBSCRIBERS>; EventSource::COUNT],
}

impl<C> Default for EventBus<C> {
  fn default() -> Self {
    Self::new()
  }
}

impl<C> EventBus<C> {
  pub fn new() -> Self {
    let (tx, rx) = bounded(QUEUE_CAPACITY);
    Self {
      tx,
      rx,
      subscribers: Default::default(),
    }
  }

  /// Register `callback` for every event of `source`.
  pub fn subscribe(
    &mut self,
    source: EventSource,
    callback: impl FnMut(&Event, &mut C) + Send + 'static,
  ) -> Result<()> {
    self.subscribers[source.index()]
      .try_push(Box::new(callback))
      .map_err(|_| Error::Capacity(Resource::Subscribers))
  }

  pub fn subscriber_count(&self, source: EventSource) -> usize {
    self.subscribers[source.index()].len()
  }

  /// Enqueue an event without blocking.
  pub fn publish(&self, event: Event) -> Result<()> {
    send(&self.tx, event)
  }

  /// A cloneable handle producers can keep.
  pub fn publisher(&self) -> EventPublisher {
    EventPublisher {
      tx: self.tx.clone(),
    }
  }

  pub fn pending(&self) -> usize {
    self.rx.len()
  }

  /// Wait up to `timeout` for the next event and deliver it.
  ///
  /// Returns the source of the delivered event.
  pub fn dispatch(&mut self, ctx: &mut C, timeout: Duration) -> Result<EventSource> {
    let event = match self.rx.recv_timeout(timeout) {
      Ok(event) => event,
      Err(RecvTimeoutError::Timeout) => return Err(Error::Timeout),
      Err(RecvTimeoutError::Disconnected) => return Err(Error::InvalidState("event queue closed")),
    };
    self.deliver(&event, ctx);
    Ok(event.source)
  }

  /// Deliver everything already queued. Returns the number of events.
  pub fn dispatch_pending(&mut self, ctx: &mut C) -> usize {
    let mut delivered = 0;
    loop {
      match self.rx.try_recv() {
        Ok(event) => {
          self.deliver(&event, ctx);
          delivered += 1;
        }
        Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return delivered,
      }
    }
  }

  fn deliver(&mut self, event: &Event, ctx: &mut C) {
    for callback in self.subscribers[event.source.index()].iter_mut() {
      callback(event, ctx);
    }
  }
}

/// Producer side of an [`EventBus`]. Safe to use from any thread.
#[derive(Clone)]
pub struct EventPublisher {
  tx: Sender<Event>,
}

impl EventPublisher {
  pub fn publish(&self, event: Event) -> Result<()> {
    send(&self.tx, event)
  }
}

fn send(tx: &Sender<Event>, event: Event) -> Result<()> {
  match tx.try_send(event) {
    Ok(()) => Ok(()),
    Err(TrySendError::Full(_)) => Err(Error::Capacity(Resource::EventQueue)),
    Err(TrySendError::Disconnected(_)) => Err(Error::InvalidState("event queue closed")),
  }
}
