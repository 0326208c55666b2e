use std::sync::Arc;

use parking_lot::RwLock;

#[derive(Debug, Default)]
struct ProgressCell {
    value: f32,
    version: u64,
}

/// Creates a single-writer progress channel.
///
/// The publisher is not `Clone`, so exactly one producer (the scroll binder)
/// owns the value; any number of subscribers read it.
pub fn progress_channel() -> (ProgressPublisher, ProgressSubscriber) {
    let cell = Arc::new(RwLock::new(ProgressCell::default()));
    (
        ProgressPublisher {
            cell: Arc::clone(&cell),
        },
        ProgressSubscriber { cell, seen: 0 },
    )
}

#[derive(Debug)]
pub struct ProgressPublisher {
    cell: Arc<RwLock<ProgressCell>>,
}

impl ProgressPublisher {
    /// Publishes `progress` clamped to [0, 1]. Non-finite values count as 0.
    /// Returns true when the published value changed.
    pub fn publish(&self, progress: f32) -> bool {
        let progress = if progress.is_finite() {
            progress.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let mut cell = self.cell.write();
        if cell.version > 0 && cell.value == progress {
            return false;
        }
        cell.value = progress;
        cell.version += 1;
        true
    }

    pub fn subscribe(&self) -> ProgressSubscriber {
        ProgressSubscriber {
            cell: Arc::clone(&self.cell),
            seen: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressSubscriber {
    cell: Arc<RwLock<ProgressCell>>,
    seen: u64,
}

impl ProgressSubscriber {
    /// Latest published value (0 before the first publish).
    pub fn latest(&self) -> f32 {
        self.cell.read().value
    }

    /// Returns the value if it was published since this subscriber last looked.
    pub fn changed(&mut self) -> Option<f32> {
        let cell = self.cell.read();
        if cell.version == self.seen {
            return None;
        }
        self.seen = cell.version;
        Some(cell.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_see_each_change_once() {
        let (publisher, mut first) = progress_channel();
        let mut second = publisher.subscribe();
        assert_eq!(first.changed(), None);

        assert!(publisher.publish(0.25));
        assert_eq!(first.changed(), Some(0.25));
        assert_eq!(first.changed(), None);
        assert_eq!(second.changed(), Some(0.25));

        assert!(!publisher.publish(0.25));
        assert_eq!(first.changed(), None);
    }

    #[test]
    fn publish_clamps_and_sanitizes() {
        let (publisher, subscriber) = progress_channel();
        publisher.publish(1.7);
        assert_eq!(subscriber.latest(), 1.0);
        publisher.publish(-0.3);
        assert_eq!(subscriber.latest(), 0.0);
        publisher.publish(f32::NAN);
        assert_eq!(subscriber.latest(), 0.0);
    }

    #[test]
    fn first_publish_of_zero_is_a_change() {
        let (publisher, mut subscriber) = progress_channel();
        assert!(publisher.publish(0.0));
        assert_eq!(subscriber.changed(), Some(0.0));
    }
}
