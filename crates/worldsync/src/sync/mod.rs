mod throttle;
mod tween;

pub use throttle::{Debounce, DueWrites, PersistenceSchedule};
pub use tween::{tween_duration, Tween, TweenSet};
