//! Single-slot handoff between the sensor worker and the main tick.
//!
//! The slow probe read must not touch machine fields directly; it publishes
//! into this guarded slot and the tick consumes it non-blockingly. Only the
//! latest value matters, so an unread value is simply overwritten.

use std::sync::Mutex;

/// A mutex-guarded latest-value-wins slot.
#[derive(Debug, Default)]
pub struct Mailbox<T> {
    slot: Mutex<Option<T>>,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Store a value, replacing any unread one.
    pub fn publish(&self, value: T) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(value);
        }
    }

    /// Consume the stored value, if any.
    pub fn take(&self) -> Option<T> {
        self.slot.lock().ok().and_then(|mut slot| slot.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn empty_until_published() {
        let mailbox: Mailbox<u32> = Mailbox::new();
        assert_eq!(mailbox.take(), None);
    }

    #[test]
    fn take_consumes_the_slot() {
        let mailbox = Mailbox::new();
        mailbox.publish(7u32);
        assert_eq!(mailbox.take(), Some(7));
        assert_eq!(mailbox.take(), None);
    }

    #[test]
    fn latest_value_wins() {
        let mailbox = Mailbox::new();
        mailbox.publish(1u32);
        mailbox.publish(2);
        mailbox.publish(3);
        assert_eq!(mailbox.take(), Some(3));
    }

    #[test]
    fn shared_across_threads() {
        let mailbox = Arc::new(Mailbox::new());
        let writer = {
            let mailbox = Arc::clone(&mailbox);
            std::thread::spawn(move || {
                for i in 0..100u32 {
                    mailbox.publish(i);
                }
            })
        };
        writer.join().unwrap();
        assert_eq!(mailbox.take(), Some(99));
    }
}
