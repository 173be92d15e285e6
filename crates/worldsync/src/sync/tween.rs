use std::time::Duration;

use crate::actor::TransformChannel;
use crate::clock::Timestamp;
use crate::math::Vec3;

/// Linear interpolation of one transform channel between two instants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tween {
    pub channel: TransformChannel,
    pub from: Vec3,
    pub to: Vec3,
    pub started_at: Timestamp,
    pub duration: Duration,
}

impl Tween {
    pub fn new(
        channel: TransformChannel,
        from: Vec3,
        to: Vec3,
        started_at: Timestamp,
        duration: Duration,
    ) -> Self {
        Self {
            channel,
            from,
            to,
            started_at,
            duration,
        }
    }

    pub fn fraction_at(&self, now: Timestamp) -> f32 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.since(self.started_at).as_secs_f64();
        (elapsed / self.duration.as_secs_f64()).min(1.0) as f32
    }

    pub fn sample(&self, now: Timestamp) -> Vec3 {
        self.from.lerp(self.to, self.fraction_at(now))
    }

    pub fn is_finished(&self, now: Timestamp) -> bool {
        self.fraction_at(now) >= 1.0
    }
}

/// Clamped tween length for a sample stamped `sample_time` and received at `now`.
pub fn tween_duration(now: Timestamp, sample_time: Timestamp, minimum: Duration) -> Duration {
    now.since(sample_time).max(minimum)
}

/// At most one in-flight tween per channel.
#[derive(Debug, Clone, Default)]
pub struct TweenSet {
    slots: [Option<Tween>; 3],
}

impl TweenSet {
    /// Starts `tween`, returning the tween it superseded on the same channel.
    pub fn start(&mut self, tween: Tween) -> Option<Tween> {
        self.slots[tween.channel.index()].replace(tween)
    }

    pub fn cancel(&mut self, channel: TransformChannel) -> Option<Tween> {
        self.slots[channel.index()].take()
    }

    pub fn cancel_all(&mut self) {
        self.slots = [None; 3];
    }

    pub fn get(&self, channel: TransformChannel) -> Option<&Tween> {
        self.slots[channel.index()].as_ref()
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.active_count() == 0
    }

    /// Samples every active tween at `now`, dropping the ones that completed.
    pub fn advance(&mut self, now: Timestamp) -> Vec<(TransformChannel, Vec3)> {
        let mut writes = Vec::with_capacity(self.active_count());
        for slot in &mut self.slots {
            let Some(tween) = slot else {
                continue;
            };
            writes.push((tween.channel, tween.sample(now)));
            if tween.is_finished(now) {
                *slot = None;
            }
        }
        writes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position_tween(from: f32, to: f32, start: u64, millis: u64) -> Tween {
        Tween::new(
            TransformChannel::Position,
            Vec3::new(from, 0.0, 0.0),
            Vec3::new(to, 0.0, 0.0),
            Timestamp(start),
            Duration::from_millis(millis),
        )
    }

    #[test]
    fn duration_is_clamped_to_minimum() {
        let minimum = Duration::from_millis(1_000);
        assert_eq!(
            tween_duration(Timestamp(10_000), Timestamp(9_900), minimum),
            minimum
        );
        assert_eq!(
            tween_duration(Timestamp(10_000), Timestamp(7_500), minimum),
            Duration::from_millis(2_500)
        );
        assert_eq!(
            tween_duration(Timestamp(10_000), Timestamp(12_000), minimum),
            minimum
        );
    }

    #[test]
    fn advance_writes_intermediate_values_then_retires() {
        let mut set = TweenSet::default();
        set.start(position_tween(0.0, 10.0, 1_000, 1_000));

        let halfway = set.advance(Timestamp(1_500));
        assert_eq!(
            halfway,
            vec![(TransformChannel::Position, Vec3::new(5.0, 0.0, 0.0))]
        );
        assert_eq!(set.active_count(), 1);

        let done = set.advance(Timestamp(2_000));
        assert_eq!(
            done,
            vec![(TransformChannel::Position, Vec3::new(10.0, 0.0, 0.0))]
        );
        assert!(set.is_empty());
        assert!(set.advance(Timestamp(2_500)).is_empty());
    }

    #[test]
    fn starting_on_same_channel_replaces_previous() {
        let mut set = TweenSet::default();
        assert!(set.start(position_tween(0.0, 10.0, 0, 1_000)).is_none());
        let replaced = set.start(position_tween(3.0, -3.0, 200, 1_000));
        assert_eq!(replaced.map(|tween| tween.to.x), Some(10.0));
        assert_eq!(set.active_count(), 1);

        set.start(Tween::new(
            TransformChannel::Scaling,
            Vec3::ONE,
            Vec3::new(2.0, 2.0, 2.0),
            Timestamp(200),
            Duration::from_millis(1_000),
        ));
        assert_eq!(set.active_count(), 2);
        set.cancel(TransformChannel::Position);
        assert!(set.get(TransformChannel::Position).is_none());
        assert!(set.get(TransformChannel::Scaling).is_some());
    }
}
