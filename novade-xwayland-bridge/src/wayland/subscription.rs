use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use super::SeatNotification;

type Queue = RefCell<VecDeque<SeatNotification>>;

/// A registered seat listener.
///
/// Notifications queue up until [`take`](Subscription::take) is called.
/// Dropping the subscription unregisters it.
#[derive(Debug)]
pub struct Subscription {
    queue: Rc<Queue>,
}

impl Subscription {
    pub fn take(&self) -> Vec<SeatNotification> {
        self.queue.borrow_mut().drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}

/// The state's side: weak handles to every live subscription.
#[derive(Debug, Default)]
pub(super) struct Subscribers {
    listeners: Vec<Weak<Queue>>,
}

impl Subscribers {
    pub(super) fn subscribe(&mut self) -> Subscription {
        let queue = Rc::new(RefCell::new(VecDeque::new()));
        self.listeners.push(Rc::downgrade(&queue));
        Subscription { queue }
    }

    pub(super) fn notify(&mut self, notification: SeatNotification) {
        self.listeners.retain(|listener| match listener.upgrade() {
            Some(queue) => {
                queue.borrow_mut().push_back(notification);
                true
            }
            None => false,
        });
    }

    pub(super) fn len(&self) -> usize {
        self.listeners.iter().filter(|listener| listener.strong_count() > 0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wayland::SelectionKind;

    #[test]
    fn test_dropped_subscription_stops_receiving() {
        let mut subscribers = Subscribers::default();
        let first = subscribers.subscribe();
        let second = subscribers.subscribe();
        subscribers.notify(SeatNotification::DragStarted);
        drop(second);
        subscribers.notify(SeatNotification::SelectionChanged(SelectionKind::Clipboard));
        assert_eq!(
            first.take(),
            vec![SeatNotification::DragStarted, SeatNotification::SelectionChanged(SelectionKind::Clipboard)]
        );
        assert!(first.is_empty());
        assert_eq!(subscribers.len(), 1);
    }
}
